// Core modules
pub mod aggregation;
pub mod settings;
pub mod db;
pub mod error;
pub mod indicators;
pub mod models;
pub mod pipeline;
pub mod regime;
pub mod signals;
pub mod stage;
pub mod store;
pub mod synthetic;

// Re-export commonly used types
pub use error::Error;
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, Error>;
