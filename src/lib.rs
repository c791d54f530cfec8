pub mod classifier;
pub mod config;
pub mod core;
pub mod db;
pub mod detectors;
pub mod error;
pub mod export;
pub mod feeds;
pub mod ledger;
pub mod propagation;
pub mod query;
pub mod store;

pub use crate::core::{Chain, Flag, MAX_RISK};
pub use crate::error::EngineError;
