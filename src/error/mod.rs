mod app;
mod config;
mod http;
mod metrics;
mod transfer;
mod validation;

#[cfg(test)]
mod test_support;

pub use app::{AppError, AppResult};
pub use config::ConfigError;
pub use http::HttpError;
pub use metrics::MetricsError;
pub use transfer::{ErrorCode, TransferError};
pub use validation::ValidationError;
