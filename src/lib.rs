pub mod app;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod monitor;
pub mod rate;
pub mod store;
pub mod units;

pub use error::{Error, Result};
