mod client;
mod config;
mod message_repository;
mod migrations;

pub use client::*;
pub use config::*;
pub use message_repository::*;
pub use migrations::*;
