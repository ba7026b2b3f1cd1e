pub mod config;
pub mod error;
pub mod traits;
pub mod types;
pub mod workflow;

pub use config::AppConfig;
pub use error::{BuildError, CrewForgeError, ErrorClass, FieldError, Result};
pub use types::*;
pub use workflow::*;
