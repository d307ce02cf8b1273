//! Top-level error type for process startup, reported by `main` via
//! `anyhow::Result`.
//!
//! Per-connection failures (admission rejections, PTY spawn errors) stay
//! local to `AdmissionError`/`PtyError` and are handled inline by the
//! session engine — they never reach `main`, so they have no variant here.

use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to register signal handlers: {0}")]
    Signal(#[source] anyhow::Error),

    #[error("failed to start the tokio runtime: {0}")]
    Runtime(#[from] std::io::Error),
}
