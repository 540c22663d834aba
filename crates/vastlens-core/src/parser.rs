//! Query-string parser for VAST redirect URLs.
//!
//! Turns a raw tag URL into a map of decoded parameter values. Two
//! parameters carry structured payloads and are decoded further:
//! `cust_params` (a nested `key=value` list) and `ppsj` (base64-encoded
//! publisher-provided signals JSON). A malformed structured value never
//! hides the rest of the tag; it is reported on
//! [`ParseOutcome::structured_errors`] while the raw scalar stays in
//! the map.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use percent_encoding::percent_decode_str;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::error::{ParseError, StructuredValueError};

/// Parameter whose value is a nested `&`-joined `key=value` list.
const NESTED_PARAMETER: &str = "cust_params";

/// Parameters that always carry a base64-encoded JSON document.
const STRUCTURED_JSON_PARAMETERS: &[&str] = &["ppsj"];

/// A single decoded parameter value.
///
/// Exactly one shape per parameter: a plain scalar, a nested
/// string-to-string map, or an arbitrary JSON document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Scalar(String),
    Nested(BTreeMap<String, String>),
    Json(JsonValue),
}

impl ParamValue {
    /// Scalar accessor; `None` for nested and JSON values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Scalar(value) => Some(value),
            _ => None,
        }
    }

    /// Render the value back into a single query-style string, used for
    /// display and for regex validation of structured values.
    pub fn to_display_string(&self) -> String {
        match self {
            ParamValue::Scalar(value) => value.clone(),
            ParamValue::Nested(map) => map
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect::<Vec<_>>()
                .join("&"),
            ParamValue::Json(value) => value.to_string(),
        }
    }
}

/// Decoded parameters plus any structured-value decode failures.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParseOutcome {
    /// Decoded parameters keyed by their (decoded) name. Duplicate keys
    /// in the query string collapse to the last occurrence.
    pub params: BTreeMap<String, ParamValue>,
    /// Structured values that failed to decode; the affected parameter
    /// keeps its raw scalar in `params`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub structured_errors: Vec<StructuredValueError>,
}

/// Parse the query string of a VAST tag URL into decoded parameters.
///
/// Pure string transformation: no network, no catalog lookups. A URL
/// without a query string yields an empty map, which the analyzer later
/// rejects as [`crate::error::AnalyzeError::EmptyParameters`].
pub fn parse(url: &str) -> Result<ParseOutcome, ParseError> {
    if url.trim().is_empty() {
        return Err(ParseError::EmptyUrl);
    }

    let mut outcome = ParseOutcome::default();
    let query = match url.split_once('?') {
        Some((_, query)) => query,
        None => return Ok(outcome),
    };

    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (raw_key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = percent_decode(raw_key);
        let value = percent_decode(raw_value);

        let decoded = if key == NESTED_PARAMETER {
            ParamValue::Nested(parse_nested(&value))
        } else if STRUCTURED_JSON_PARAMETERS.contains(&key.as_str()) {
            match decode_base64_json(&value) {
                Ok(json) => ParamValue::Json(json),
                Err(message) => {
                    outcome.structured_errors.push(StructuredValueError {
                        parameter: key.clone(),
                        message,
                    });
                    ParamValue::Scalar(value)
                }
            }
        } else if let Some(json) = sniff_base64_json(&value) {
            ParamValue::Json(json)
        } else {
            ParamValue::Scalar(value)
        };

        // Last occurrence wins, matching standard query-string semantics.
        outcome.params.insert(key, decoded);
    }

    Ok(outcome)
}

fn percent_decode(input: &str) -> String {
    percent_decode_str(input).decode_utf8_lossy().into_owned()
}

/// Decode a `cust_params` value: an `&`-joined list of `key=value`
/// pairs whose keys and values are themselves percent-encoded. A single
/// pair without an internal `&` still decodes to one entry.
fn parse_nested(value: &str) -> BTreeMap<String, String> {
    let mut nested = BTreeMap::new();
    for pair in value.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, val) = pair.split_once('=').unwrap_or((pair, ""));
        nested.insert(percent_decode(key), percent_decode(val));
    }
    nested
}

/// Strict decode for parameters that must carry base64 JSON.
fn decode_base64_json(value: &str) -> Result<JsonValue, String> {
    let bytes = BASE64
        .decode(value.as_bytes())
        .map_err(|err| format!("value is not valid base64: {err}"))?;
    serde_json::from_slice(&bytes).map_err(|err| format!("decoded value is not valid JSON: {err}"))
}

/// Opportunistic detection of base64 JSON in arbitrary parameters.
///
/// Plenty of ordinary values happen to be base64-shaped (`vast`,
/// device identifiers, PAL nonces), so this only accepts payloads that
/// decode to UTF-8 text starting with a JSON object or array marker and
/// that parse as JSON. Anything else stays a scalar.
fn sniff_base64_json(value: &str) -> Option<JsonValue> {
    if value.len() < 8 {
        return None;
    }
    let bytes = BASE64.decode(value.as_bytes()).ok()?;
    let text = std::str::from_utf8(&bytes).ok()?;
    let trimmed = text.trim_start();
    if !trimmed.starts_with('{') && !trimmed.starts_with('[') {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT_VAST_URL: &str = "https://pubads.g.doubleclick.net/gampad/ads?iu=/21775744923/external/single_ad_samples&sz=640x480&cust_params=sample_ct%3Dlinear&ciu_szs=300x250%2C728x90&gdfp_req=1&output=vast&unviewed_position_start=1&env=vp&impl=s&correlator=";

    const PPSJ_VALUE: &str = "eyJQdWJsaXNoZXJQcm92aWRlZFRheG9ub215U2lnbmFscyI6W3sidGF4b25vbXkiOiJJQUJfQ09OVEVOVF8yXzIiLCJ2YWx1ZXMiOlsidjlpM09uIiwiMTg2IiwiNDMyIiwiSkxCQ1U3Il19XX0=";

    fn scalar(outcome: &ParseOutcome, key: &str) -> String {
        outcome.params[key].as_str().expect("scalar value").to_string()
    }

    #[test]
    fn rejects_empty_url() {
        assert_eq!(parse("").unwrap_err(), ParseError::EmptyUrl);
        assert_eq!(parse("   ").unwrap_err(), ParseError::EmptyUrl);
    }

    #[test]
    fn url_without_query_yields_empty_map() {
        let outcome = parse("https://example.com").unwrap();
        assert!(outcome.params.is_empty());
        assert!(outcome.structured_errors.is_empty());
    }

    #[test]
    fn parses_standard_vast_url() {
        let outcome = parse(DEFAULT_VAST_URL).unwrap();
        assert_eq!(scalar(&outcome, "iu"), "/21775744923/external/single_ad_samples");
        assert_eq!(scalar(&outcome, "sz"), "640x480");
        assert_eq!(scalar(&outcome, "ciu_szs"), "300x250,728x90");
        assert_eq!(scalar(&outcome, "gdfp_req"), "1");
        assert_eq!(scalar(&outcome, "output"), "vast");
        assert_eq!(scalar(&outcome, "unviewed_position_start"), "1");
        assert_eq!(scalar(&outcome, "env"), "vp");
        assert_eq!(scalar(&outcome, "impl"), "s");
        assert_eq!(scalar(&outcome, "correlator"), "");
    }

    #[test]
    fn decodes_single_cust_params_pair() {
        let outcome = parse("https://example.com?cust_params=a%3D1").unwrap();
        let expected: BTreeMap<String, String> =
            [("a".to_string(), "1".to_string())].into_iter().collect();
        assert_eq!(outcome.params["cust_params"], ParamValue::Nested(expected));
    }

    #[test]
    fn decodes_multiple_cust_params_pairs() {
        let outcome = parse("https://example.com?cust_params=a%3D1%26b%3D2").unwrap();
        let expected: BTreeMap<String, String> = [
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
        ]
        .into_iter()
        .collect();
        assert_eq!(outcome.params["cust_params"], ParamValue::Nested(expected));
    }

    #[test]
    fn decodes_cust_params_with_encoded_values() {
        let outcome = parse(
            "https://example.com?cust_params=section%3Dblog%26anotherKey%3Dvalue1%2Cvalue2&output=vast",
        )
        .unwrap();
        let expected: BTreeMap<String, String> = [
            ("section".to_string(), "blog".to_string()),
            ("anotherKey".to_string(), "value1,value2".to_string()),
        ]
        .into_iter()
        .collect();
        assert_eq!(outcome.params["cust_params"], ParamValue::Nested(expected));
        assert_eq!(scalar(&outcome, "output"), "vast");
    }

    #[test]
    fn decodes_ppsj_base64_json() {
        let outcome = parse(&format!("https://example.com?ppsj={PPSJ_VALUE}&output=vast")).unwrap();
        let json = match &outcome.params["ppsj"] {
            ParamValue::Json(json) => json,
            other => panic!("expected JSON value, got {other:?}"),
        };
        assert_eq!(
            json["PublisherProvidedTaxonomySignals"][0]["taxonomy"],
            "IAB_CONTENT_2_2"
        );
        assert_eq!(
            json["PublisherProvidedTaxonomySignals"][0]["values"][0],
            "v9i3On"
        );
        assert_eq!(scalar(&outcome, "output"), "vast");
    }

    #[test]
    fn malformed_ppsj_keeps_remaining_parameters() {
        let outcome = parse("https://example.com?ppsj=invalid&output=vast").unwrap();
        assert_eq!(scalar(&outcome, "ppsj"), "invalid");
        assert_eq!(scalar(&outcome, "output"), "vast");
        assert_eq!(outcome.structured_errors.len(), 1);
        assert_eq!(outcome.structured_errors[0].parameter, "ppsj");
    }

    #[test]
    fn base64_shaped_scalars_stay_scalars() {
        // "vast" and a PAL-style nonce are base64-shaped but not JSON.
        let outcome = parse("https://example.com?output=vast&givn=AQzzBGQEVGjRW4svCeU1").unwrap();
        assert_eq!(scalar(&outcome, "output"), "vast");
        assert_eq!(scalar(&outcome, "givn"), "AQzzBGQEVGjRW4svCeU1");
        assert!(outcome.structured_errors.is_empty());
    }

    #[test]
    fn key_without_equals_yields_empty_value() {
        let outcome = parse("https://example.com?flag&output=vast").unwrap();
        assert_eq!(scalar(&outcome, "flag"), "");
        assert_eq!(scalar(&outcome, "output"), "vast");
    }

    #[test]
    fn duplicate_keys_last_occurrence_wins() {
        let outcome = parse("https://example.com?output=vast&output=vmap").unwrap();
        assert_eq!(scalar(&outcome, "output"), "vmap");
    }

    #[test]
    fn percent_decodes_keys_and_values_independently() {
        let outcome = parse("https://example.com?media_url=https%3A%2F%2Fexample.com%2Fad.mp4").unwrap();
        assert_eq!(scalar(&outcome, "media_url"), "https://example.com/ad.mp4");
    }

    #[test]
    fn nested_display_string_round_trips() {
        let outcome = parse("https://example.com?cust_params=a%3D1%26b%3D2").unwrap();
        assert_eq!(outcome.params["cust_params"].to_display_string(), "a=1&b=2");
    }
}
