// Application layer - Use cases and the ports they depend on
pub mod broadcaster;
pub mod command_relay;
pub mod history_service;
pub mod pipeline;
pub mod sample_repository;
