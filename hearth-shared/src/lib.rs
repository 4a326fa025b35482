pub mod clients;
pub mod config;
pub mod errors;
pub mod telemetry;
pub mod types;

pub use config::RemoteConfig;
pub use errors::{AppError, AppResult, ErrorCode};
pub use types::*;
