pub mod config;
pub mod error;
pub mod infrastructure;
pub mod services;

pub use config::Config;
pub use error::{Error, Result};
