pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::WorkgraphConfig;
pub use error::{Result, WorkgraphError};
