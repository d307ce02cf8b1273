pub mod config;
pub mod error;
pub mod frame;
pub mod origin;
pub mod pty;
pub mod registry;
pub mod server;
pub mod session;
pub mod shutdown;

pub use config::{Cli, ServerConfig};
pub use error::AppError;
pub use server::{run_server, AppState};
