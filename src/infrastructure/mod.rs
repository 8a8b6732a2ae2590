// Infrastructure layer - External dependencies and adapters
pub mod config;
pub mod memory_repository;
pub mod mqtt;
pub mod pg_repository;
