//! End-to-end inspection: classify, parse, analyze and score in one
//! call.

use serde::Serialize;

use crate::analyzer::{AnalysisResult, AnalyzerOptions, analyze};
use crate::catalog::ImplementationType;
use crate::classifier::{TagType, classify};
use crate::error::{InspectError, StructuredValueError};
use crate::parser::{ParseOutcome, parse};
use crate::score::{ScoreReport, score};

/// The complete inspection report for one tag URL.
#[derive(Debug, Clone, Serialize)]
pub struct Inspection {
    pub url: String,
    pub tag_type: TagType,
    pub implementation: ImplementationType,
    /// Decoded parameters and any structured-value decode failures.
    #[serde(flatten)]
    pub parameters: ParseOutcome,
    /// Non-fatal findings from classification and analysis.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub analysis: AnalysisResult,
    pub score: ScoreReport,
}

impl Inspection {
    /// All structured-value decode failures from the parse stage.
    pub fn structured_errors(&self) -> &[StructuredValueError] {
        &self.parameters.structured_errors
    }
}

/// Inspect a VAST tag URL against an implementation context.
///
/// `tag_type` overrides the classifier when the caller already knows
/// the serving variant; otherwise the classifier decides. Structural
/// failures (empty input, unparsable URL, no query parameters) abort
/// with an error; everything the tag does wrong is verdict data.
pub fn inspect(
    url: &str,
    implementation: ImplementationType,
    tag_type: Option<TagType>,
    options: &AnalyzerOptions,
) -> Result<Inspection, InspectError> {
    let classification = classify(url)?;
    let tag_type = tag_type.unwrap_or(classification.tag_type);

    let parameters = parse(url)?;
    let analysis = analyze(url, &parameters.params, tag_type, implementation, options)?;
    let score = score(&analysis);

    let mut warnings = Vec::new();
    if let Some(warning) = classification.warning {
        warnings.push(warning);
    }

    Ok(Inspection {
        url: url.to_string(),
        tag_type,
        implementation,
        parameters,
        warnings,
        analysis,
        score,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::example_url;
    use crate::error::{AnalyzeError, ClassifyError};

    #[test]
    fn inspects_a_standard_tag_end_to_end() {
        let url = example_url(TagType::Standard).unwrap();
        let inspection = inspect(
            url,
            ImplementationType::Web,
            None,
            &AnalyzerOptions::default(),
        )
        .unwrap();
        assert_eq!(inspection.tag_type, TagType::Standard);
        assert!(inspection.analysis.required["iu"].valid);
        assert!(inspection.warnings.is_empty());
        assert!(inspection.structured_errors().is_empty());
    }

    #[test]
    fn caller_supplied_tag_type_wins_over_the_classifier() {
        let url = example_url(TagType::Standard).unwrap();
        let inspection = inspect(
            url,
            ImplementationType::Web,
            Some(TagType::Pal),
            &AnalyzerOptions::default(),
        )
        .unwrap();
        assert_eq!(inspection.tag_type, TagType::Pal);
        // givn is now required and missing.
        assert!(!inspection.analysis.required["givn"].exists);
    }

    #[test]
    fn legacy_pal_warning_propagates() {
        let url = example_url(TagType::PalLegacy).unwrap();
        let inspection = inspect(
            url,
            ImplementationType::Web,
            None,
            &AnalyzerOptions::default(),
        )
        .unwrap();
        assert_eq!(inspection.tag_type, TagType::PalLegacy);
        assert!(inspection.warnings.iter().any(|w| w.contains("givn")));
    }

    #[test]
    fn url_without_query_fails_with_empty_parameters() {
        let error = inspect(
            "https://pubads.g.doubleclick.net/gampad/ads",
            ImplementationType::Web,
            None,
            &AnalyzerOptions::default(),
        )
        .unwrap_err();
        assert_eq!(error, InspectError::Analyze(AnalyzeError::EmptyParameters));
    }

    #[test]
    fn invalid_url_aborts_before_analysis() {
        let error = inspect(
            "not a url",
            ImplementationType::Web,
            None,
            &AnalyzerOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(
            error,
            InspectError::Classify(ClassifyError::InvalidUrl(_))
        ));
    }

    #[test]
    fn inspection_serializes_to_json() {
        let url = example_url(TagType::Pal).unwrap();
        let inspection = inspect(
            url,
            ImplementationType::Web,
            None,
            &AnalyzerOptions::default(),
        )
        .unwrap();
        let json = serde_json::to_value(&inspection).unwrap();
        assert_eq!(json["tag_type"], "PAL");
        assert_eq!(json["implementation"], "web");
        assert!(json["score"]["weighted"].is_u64());
        assert_eq!(
            json["analysis"]["required"]["givn"]["override"],
            serde_json::Value::Bool(false)
        );
    }
}
