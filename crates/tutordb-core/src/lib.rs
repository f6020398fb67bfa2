//! Core data model and seams for the curriculum retrieval pipeline.

pub mod chunker;
pub mod config;
pub mod error;
pub mod store;
pub mod traits;
pub mod types;

pub use error::{Error, ErrorKind, Result};
