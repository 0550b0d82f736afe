//! Service configuration
//!
//! Configuration is assembled from defaults, an optional JSON file,
//! environment variables, then command line flags (applied by the binary).

mod env;
pub mod schema;

pub use schema::{AppConfig, ModelConfig, StreamConfig, WebConfig};
