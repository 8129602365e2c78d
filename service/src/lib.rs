//! SimpleBank Service
//!
//! Everything a caller puts around the transfer engine: configuration,
//! request validation and authorization, conflict retries, metrics and
//! logging setup.

pub mod config;
pub mod guard;
pub mod logging;
pub mod metrics;
pub mod processor;
pub mod retry;

pub use config::{DatabaseConfig, LockConfig, LogFormat, RetryConfig, ServiceConfig};
pub use guard::{TransferGuard, TransferRequest};
pub use logging::init_tracing;
pub use metrics::{ActiveTransfer, MetricsSnapshot, SharedMetrics, TransferMetrics};
pub use processor::TransferProcessor;
pub use retry::RetryPolicy;
