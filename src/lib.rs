pub mod auth;
pub mod clock;
pub mod config;
pub mod cursor;
pub mod error;
pub mod export;
pub mod handlers;
pub mod listing;
pub mod storage;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
