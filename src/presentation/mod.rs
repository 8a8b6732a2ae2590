// Presentation layer - HTTP routes and observer WebSocket
pub mod app_state;
pub mod handlers;
pub mod observer;
