pub mod clock;
pub mod commands;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod models;
pub mod tasks;
pub mod voting;

pub use config::Settings;
pub use engine::VotingEngine;
pub use error::{Result, VotingError};
