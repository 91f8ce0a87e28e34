//! Curation engine: ingest candidates, judge and serve them, learn a taste
//! profile from curator labels and gate profile changes behind proposals.

pub mod actions;
pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod learning;
pub mod oracle;
pub mod proposal;
pub mod scheduler;
pub mod schema;
pub mod scoring;
pub mod serving;
pub mod settings;
pub mod tasks;

pub use config::Config;
pub use error::{CurationError, Result};
pub use oracle::{HttpOracle, Oracle};
