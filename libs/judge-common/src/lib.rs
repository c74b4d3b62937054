pub mod config;
pub mod event;
pub mod redis;
pub mod types;
