#![forbid(unsafe_code)]
#![warn(clippy::cargo, clippy::suspicious, rust_2018_idioms)]

pub mod tracing;

pub mod cache;
pub mod config;
mod errors;
pub mod evaluator;
pub mod model;
pub mod notifier;
pub mod scheduler;
pub mod services;
pub mod subscriptions;
pub mod users;

pub use config::{CliOptions, Settings};
pub use errors::CoreError;
