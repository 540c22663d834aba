//! Error types shared across the inspection pipeline.
//!
//! Structural failures (empty input, unparsable URL) are the only hard
//! errors; everything a tag does wrong is reported as verdict data on
//! the [`crate::analyzer::AnalysisResult`] instead.

use serde::Serialize;
use thiserror::Error;

/// Errors returned by [`crate::parser::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("URL is empty")]
    EmptyUrl,
}

/// Errors returned by [`crate::classifier::classify`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifyError {
    #[error("URL is empty")]
    EmptyUrl,
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Errors returned by [`crate::analyzer::analyze`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalyzeError {
    #[error("parameters are empty")]
    EmptyParameters,
}

/// A structured parameter value that failed to decode.
///
/// Reported alongside the successfully decoded parameters rather than
/// aborting the parse; the raw scalar stays in the parameter map so the
/// rest of the tag remains visible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("failed to decode structured value for `{parameter}`: {message}")]
pub struct StructuredValueError {
    /// Name of the parameter whose value failed to decode.
    pub parameter: String,
    /// Human-readable decode failure.
    pub message: String,
}

/// Any failure of the end-to-end [`crate::inspect::inspect`] pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InspectError {
    #[error(transparent)]
    Classify(#[from] ClassifyError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Analyze(#[from] AnalyzeError),
}
