//! Score aggregation over analyzer verdicts.
//!
//! Turns the bucketed verdicts into per-bucket completion percentages
//! and one weighted overall score. Pure function of the analysis
//! result.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::analyzer::{AnalysisResult, ParameterVerdict};

/// Weight of the required bucket in the overall score.
const REQUIRED_WEIGHT: f64 = 0.7;
/// Weight of the programmatic-required bucket.
const PROGRAMMATIC_REQUIRED_WEIGHT: f64 = 0.2;
/// Weight of the programmatic-recommended bucket.
const PROGRAMMATIC_RECOMMENDED_WEIGHT: f64 = 0.1;

/// Aggregated counts and completion for one verdict bucket.
#[derive(Debug, Clone, Serialize)]
pub struct BucketScore {
    /// Percentage of verdicts with `valid=true`, floored.
    pub completion: u8,
    pub valid: usize,
    pub invalid: usize,
    pub missing: usize,
    pub overridden: usize,
    pub sdk_managed: usize,
    pub total: usize,
    /// Sum of the individual verdict scores.
    pub score: f64,
}

impl BucketScore {
    fn from_bucket(bucket: &BTreeMap<String, ParameterVerdict>) -> Self {
        let mut score = BucketScore {
            completion: 0,
            valid: 0,
            invalid: 0,
            missing: 0,
            overridden: 0,
            sdk_managed: 0,
            total: bucket.len(),
            score: 0.0,
        };
        for verdict in bucket.values() {
            score.score += verdict.score;
            if verdict.overridden {
                score.overridden += 1;
            }
            if verdict.sdk_managed {
                score.sdk_managed += 1;
            }
            if verdict.valid {
                score.valid += 1;
            } else if !verdict.exists {
                score.missing += 1;
            } else {
                score.invalid += 1;
            }
        }
        if score.total > 0 {
            score.completion = ((score.valid * 100) / score.total) as u8;
        }
        score
    }

    fn all_valid(&self) -> bool {
        self.valid == self.total
    }

    /// Valid ratio for weighting; an empty bucket is trivially complete.
    fn ratio(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.valid as f64 / self.total as f64
        }
    }
}

/// The aggregated score report for one analysis.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreReport {
    /// Weighted overall score, 0..=100.
    pub weighted: u8,
    pub required: BucketScore,
    pub programmatic_required: BucketScore,
    pub programmatic_recommended: BucketScore,
    /// Informational only; never contributes to the weighted score.
    pub other: BucketScore,
}

/// Aggregate bucketed verdicts into completion percentages and the
/// weighted overall score.
///
/// A single missing or invalid required parameter forces the weighted
/// score to zero, no matter how complete the other buckets are.
pub fn score(analysis: &AnalysisResult) -> ScoreReport {
    let required = BucketScore::from_bucket(&analysis.required);
    let programmatic_required = BucketScore::from_bucket(&analysis.programmatic_required);
    let programmatic_recommended = BucketScore::from_bucket(&analysis.programmatic_recommended);
    let other = BucketScore::from_bucket(&analysis.other);

    let weighted = if required.total > 0 && !required.all_valid() {
        0
    } else {
        let blended = required.ratio() * REQUIRED_WEIGHT
            + programmatic_required.ratio() * PROGRAMMATIC_REQUIRED_WEIGHT
            + programmatic_recommended.ratio() * PROGRAMMATIC_RECOMMENDED_WEIGHT;
        (100.0 * blended).round() as u8
    };

    ScoreReport {
        weighted,
        required,
        programmatic_required,
        programmatic_recommended,
        other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{AnalyzerOptions, analyze, points};
    use crate::catalog::ImplementationType;
    use crate::classifier::TagType;
    use crate::parser::parse;

    const DEFAULT_VAST_URL: &str = "https://pubads.g.doubleclick.net/gampad/ads?iu=/21775744923/external/single_ad_samples&sz=640x480&cust_params=sample_ct%3Dlinear&ciu_szs=300x250%2C728x90&gdfp_req=1&output=vast&unviewed_position_start=1&env=vp&impl=s&correlator=&url=https%3A%2F%2Fwww.example.com%2Fvideo-page&description_url=https%3A%2F%2Fwww.example.com%2Fvideo&env=vp";

    fn report(url: &str) -> ScoreReport {
        let outcome = parse(url).unwrap();
        let analysis = analyze(
            url,
            &outcome.params,
            TagType::Standard,
            ImplementationType::Web,
            &AnalyzerOptions::default(),
        )
        .unwrap();
        score(&analysis)
    }

    #[test]
    fn incomplete_required_bucket_forces_zero() {
        // iu alone leaves the rest of the required bucket missing.
        let report = report("https://pubads.g.doubleclick.net/gampad/ads?iu=/1/a&plcmt=1&vpa=auto&vpmute=1&wta=1");
        assert!(report.required.missing > 0);
        assert_eq!(report.weighted, 0);
        // Perfect programmatic-required bucket does not rescue it.
        assert_eq!(report.programmatic_required.completion, 100);
    }

    #[test]
    fn complete_required_bucket_scores_at_least_seventy() {
        let report = report(DEFAULT_VAST_URL);
        assert_eq!(report.required.completion, 100);
        assert!(report.weighted >= 70, "weighted was {}", report.weighted);
    }

    #[test]
    fn fully_programmatic_tag_scores_one_hundred() {
        let url = format!(
            "{DEFAULT_VAST_URL}&plcmt=1&vpa=auto&vpmute=1&wta=1&dth=1&givn=AQzzBGQEVGjRW4svCeU1&hl=en&ppid=12JD92JD8078S8J29SDOAKC0EF230337&ppsj=eyJrIjoidiJ9&rdp=1&sid=143B1AB4-F655-425F-B5C2-D49BC807C875&vconp=1&vpos=preroll"
        );
        let report = report(&url);
        assert_eq!(report.required.completion, 100);
        assert_eq!(report.programmatic_required.completion, 100);
        assert_eq!(report.programmatic_recommended.completion, 100);
        assert_eq!(report.weighted, 100);
    }

    #[test]
    fn completion_is_floored_integer_math() {
        // Two of three valid -> 66, not 67.
        let url = "https://pubads.g.doubleclick.net/gampad/ads?plcmt=1&vpa=auto&vpmute=bad&iu=/1/a&sz=640x480&gdfp_req=1&output=vast&unviewed_position_start=1&env=vp&correlator=1&url=https%3A%2F%2Fexample.com&description_url=https%3A%2F%2Fexample.com";
        let outcome = parse(url).unwrap();
        let analysis = analyze(
            url,
            &outcome.params,
            TagType::Standard,
            ImplementationType::Web,
            &AnalyzerOptions::default(),
        )
        .unwrap();
        let report = score(&analysis);
        // wta missing, vpmute invalid: 2 of 4 valid.
        assert_eq!(report.programmatic_required.total, 4);
        assert_eq!(report.programmatic_required.valid, 2);
        assert_eq!(report.programmatic_required.completion, 50);

        let partial = "https://pubads.g.doubleclick.net/gampad/ads?plcmt=1&vpa=auto&vpmute=1";
        let outcome = parse(partial).unwrap();
        let analysis = analyze(
            partial,
            &outcome.params,
            TagType::Standard,
            ImplementationType::Web,
            &AnalyzerOptions::default(),
        )
        .unwrap();
        let report = score(&analysis);
        // 3 of 4 valid floors to 75; 2 of 3 would floor to 66.
        assert_eq!(report.programmatic_required.completion, 75);
    }

    #[test]
    fn overridden_counts_as_valid_for_completion() {
        let url = "https://serverside.doubleclick.net/gampad/ads?ssss=vast_url_validator_test&iu=/1/a&sz=640x480&gdfp_req=1&output=vast&unviewed_position_start=1&env=vp&correlator=1&url=https%3A%2F%2Fexample.com&description_url=https%3A%2F%2Fexample.com";
        let outcome = parse(url).unwrap();
        let analysis = analyze(
            url,
            &outcome.params,
            TagType::Pai,
            ImplementationType::Web,
            &AnalyzerOptions {
                ip_via_http_header: true,
            },
        )
        .unwrap();
        let report = score(&analysis);
        assert_eq!(report.required.overridden, 1);
        assert_eq!(report.required.completion, 100);
        assert!(report.weighted > 0);
    }

    #[test]
    fn bucket_score_sums_verdict_points() {
        let report = report("https://pubads.g.doubleclick.net/gampad/ads?iu=/1/a");
        let expected = points::REQUIRED_PARAM_VALIDATED
            + points::REQUIRED_PARAM_MISSING * (report.required.total as f64 - 1.0);
        assert_eq!(report.required.score, expected);
    }
}
