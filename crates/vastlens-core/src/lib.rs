//! # vastlens-core
//!
//! Core library for inspecting VAST redirect URLs (ad tags).
//!
//! This library provides:
//! - Query-string parsing with structured-value decoding
//! - Tag-type classification (Standard, PAL, PAI, IMA SDK, ...)
//! - Rule-based parameter validation per implementation context
//! - Weighted completeness scoring
//!
//! ## Features
//!
//! - `default`: The synchronous inspection pipeline, no network access
//! - `fetch`: Async VAST response fetching with caching and request
//!   coalescing
//!
//! ## Example
//!
//! ```
//! use vastlens_core::{AnalyzerOptions, ImplementationType, TagType, inspect};
//!
//! let url = "https://pubads.g.doubleclick.net/gampad/ads?iu=/1/a&output=vast&correlator=";
//! let inspection = inspect(url, ImplementationType::Web, None, &AnalyzerOptions::default())?;
//!
//! assert_eq!(inspection.tag_type, TagType::Standard);
//! assert!(inspection.score.weighted <= 100);
//! # Ok::<(), vastlens_core::InspectError>(())
//! ```

pub mod analyzer;
pub mod catalog;
pub mod classifier;
pub mod error;
pub mod inspect;
pub mod parser;
pub mod score;

#[cfg(feature = "fetch")]
pub mod fetch;

// Re-export commonly used types
pub use analyzer::{AnalysisResult, AnalyzerOptions, ParameterVerdict, analyze};
pub use catalog::{CATALOG_VERSION, ImplementationType, RuleCatalog, catalog, example_url};
pub use classifier::{Classification, TagType, classify};
pub use error::{AnalyzeError, ClassifyError, InspectError, ParseError, StructuredValueError};
pub use inspect::{Inspection, inspect};
pub use parser::{ParamValue, ParseOutcome, parse};
pub use score::{BucketScore, ScoreReport, score};

#[cfg(feature = "fetch")]
pub use fetch::{FetchCache, VastResponse};
