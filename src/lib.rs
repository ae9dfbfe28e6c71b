pub mod api;
mod cli;
pub mod config;
pub mod editor;
mod error;
pub mod fleet;
pub mod ids;
pub mod logs;
pub mod session;
pub mod task;
#[cfg(test)]
mod testing;

pub use cli::run;
pub use error::{AppError, ErrorKind, Result};
pub use session::Session;
