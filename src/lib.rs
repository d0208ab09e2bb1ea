pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod notify;
pub mod parse;
pub mod remote;
pub mod transfer;
pub mod util;

pub use error::FailureCategory;
pub use error::TransferError;
