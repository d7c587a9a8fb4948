//! Core library for gitsecret: scans git history and working trees for
//! leaked credentials, aggregates findings into reports, and purges secrets
//! from both the working tree and (optionally) full git history.

pub mod analyzer;
pub mod cleaner;
pub mod config;
pub mod diff;
pub mod error;
pub mod report;
pub mod scanner;
pub mod types;

pub use analyzer::Analyzer;
pub use cleaner::{CleanOptions, CleanResult, Cleaner, LoadSecretsResult, Source, Tool};
pub use config::{default_config, Config};
pub use error::{Error, Result};
pub use scanner::{ScanOptions, Scanner};
pub use types::{Analysis, ScanResult, Secret};
