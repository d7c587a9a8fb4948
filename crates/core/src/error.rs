//! Typed error kinds for the scan/analyze/clean pipeline.
//!
//! Propagation policy (see each component's module docs for specifics):
//! pattern-compile and per-keyword scan task errors are swallowed, never
//! surfaced as [`Error`]; Analyzer line-parse errors and Cleaner I/O errors
//! are surfaced.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("input not found: {0}")]
    InputMissing(String),

    #[error("parse error: {0}")]
    ParseError(String),

    #[error("subprocess failure: {0}")]
    SubprocessFailure(String),

    #[error("io failure: {0}")]
    IoFailure(#[from] std::io::Error),

    #[error("policy violation: {0}")]
    PolicyViolation(String),
}

pub type Result<T> = std::result::Result<T, Error>;
