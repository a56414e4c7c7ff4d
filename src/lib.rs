pub mod cache;
pub mod config;
pub mod error;
pub mod model;
pub mod protocol;
pub mod server;
pub mod store;

pub use error::{AppError, Result};
