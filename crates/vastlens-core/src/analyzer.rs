//! Rule engine producing per-parameter verdicts.
//!
//! Consumes the decoded parameter map, the classified tag type and the
//! target implementation context, and validates everything against the
//! rule catalog. Rule violations are never errors: a missing or invalid
//! parameter becomes a verdict with a negative score, and only a tag
//! with no query parameters at all aborts the run.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use tracing::debug;

use crate::catalog::{ImplementationType, ParameterDefinition, catalog};
use crate::classifier::TagType;
use crate::error::AnalyzeError;
use crate::parser::ParamValue;

/// Point table for individual verdicts.
pub mod points {
    /// Required parameter present, no validation pattern defined.
    pub const REQUIRED_PARAM: f64 = 4.0;
    /// Required parameter missing or failing validation.
    pub const REQUIRED_PARAM_MISSING: f64 = -5.0;
    /// Required parameter matching the discouraged "accepted" pattern.
    pub const REQUIRED_PARAM_VALID: f64 = 3.0;
    /// Required parameter matching its primary validation pattern.
    pub const REQUIRED_PARAM_VALIDATED: f64 = 5.0;
    /// Optional parameter present, no validation pattern defined.
    pub const OPTIONAL_PARAM: f64 = 0.5;
    /// Optional parameter missing or failing validation.
    pub const OPTIONAL_PARAM_MISSING: f64 = 0.0;
    /// Optional parameter matching the discouraged "accepted" pattern.
    pub const OPTIONAL_PARAM_VALID: f64 = 0.5;
    /// Optional parameter matching its primary validation pattern.
    pub const OPTIONAL_PARAM_VALIDATED: f64 = 1.0;
    /// Fixed neutral score for overridden and SDK-managed parameters.
    pub const OVERRIDE_PARAM: f64 = 2.5;
}

/// Caller-declared facts that adjust rule evaluation.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalyzerOptions {
    /// The viewer IP reaches the ad server via an HTTP header instead of
    /// the `ip` URL parameter (server-side stitching setups).
    pub ip_via_http_header: bool,
}

/// The verdict for a single rule-list or observed parameter.
#[derive(Debug, Clone, Serialize)]
pub struct ParameterVerdict {
    /// Canonical parameter name.
    pub name: String,
    /// Decoded value as found in the URL; `None` when missing.
    pub value: Option<String>,
    /// Alias that satisfied the lookup, when the canonical key was absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub exists: bool,
    pub valid: bool,
    pub score: f64,
    /// Satisfied out-of-band (PAL nonce contents, IP via HTTP header).
    #[serde(rename = "override")]
    pub overridden: bool,
    /// The client SDK fills this parameter in by itself.
    pub sdk_managed: bool,
    /// Matched the discouraged-but-tolerated secondary pattern.
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Bucketed verdicts for one analysis run.
///
/// Buckets are disjoint; a parameter lands in exactly one, by rule-list
/// precedence: required, then programmatic-required, then
/// programmatic-recommended, then everything else observed in the URL.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub tag_type: TagType,
    pub implementation: ImplementationType,
    pub required: BTreeMap<String, ParameterVerdict>,
    pub programmatic_required: BTreeMap<String, ParameterVerdict>,
    pub programmatic_recommended: BTreeMap<String, ParameterVerdict>,
    pub other: BTreeMap<String, ParameterVerdict>,
}

/// Video positions that make `ott_placement` redundant.
const POSITIONAL_VPOS_VALUES: &[&str] = &["preroll", "midroll", "postroll"];

/// Validate decoded parameters against the rule catalog.
///
/// The catalog's rule lists are cloned before any tag-type adjustment,
/// so concurrent analyses never observe each other's mutations.
pub fn analyze(
    url: &str,
    params: &BTreeMap<String, ParamValue>,
    tag_type: TagType,
    implementation: ImplementationType,
    options: &AnalyzerOptions,
) -> Result<AnalysisResult, AnalyzeError> {
    if params.is_empty() {
        return Err(AnalyzeError::EmptyParameters);
    }
    debug!(%url, %tag_type, %implementation, "analyzing tag parameters");

    let mut rules = catalog().rules_for(implementation).clone();
    let mut overrides: HashSet<&str> = HashSet::new();
    let mut sdk_managed: HashSet<&str> = HashSet::new();

    match tag_type {
        TagType::ImaSdk => {
            rules
                .programmatic
                .recommended
                .retain(|name| name != "dth" && name != "givn");
            sdk_managed.extend(catalog().sdk_parameter_names());
        }
        TagType::Pai => {
            register_server_side_rules(&mut rules.required, &mut overrides, options);
        }
        TagType::Pal => {
            push_unique(&mut rules.required, "givn");
            overrides.extend(catalog().pal_nonce_names());
        }
        TagType::PaiPal => {
            register_server_side_rules(&mut rules.required, &mut overrides, options);
            push_unique(&mut rules.required, "givn");
            overrides.extend(catalog().pal_nonce_names());
        }
        TagType::PalLegacy => {
            push_unique(&mut rules.required, "paln");
            overrides.extend(catalog().pal_nonce_names());
        }
        TagType::Standard | TagType::Unknown => {}
    }

    // A scheduled video position already fixes the placement, so
    // ott_placement drops from mandatory to recommended.
    if rules.programmatic.required.iter().any(|name| name == "ott_placement")
        && params
            .get("vpos")
            .and_then(ParamValue::as_str)
            .is_some_and(|vpos| POSITIONAL_VPOS_VALUES.contains(&vpos))
    {
        rules.programmatic.required.retain(|name| name != "ott_placement");
        push_unique(&mut rules.programmatic.recommended, "ott_placement");
    }

    let required_names = rules.required.clone();
    let programmatic_required_names: Vec<String> = rules
        .programmatic
        .required
        .iter()
        .filter(|name| !rules.required.contains(*name))
        .cloned()
        .collect();
    let programmatic_recommended_names: Vec<String> = rules
        .programmatic
        .recommended
        .iter()
        .filter(|name| {
            !rules.required.contains(*name) && !rules.programmatic.required.contains(*name)
        })
        .cloned()
        .collect();

    // Every rule-list name and its aliases claim their query keys; what
    // remains in the URL lands in the informational "other" bucket.
    let mut claimed: HashSet<String> = HashSet::new();
    for name in required_names
        .iter()
        .chain(programmatic_required_names.iter())
        .chain(programmatic_recommended_names.iter())
    {
        claimed.insert(name.clone());
        if let Some(definition) = catalog().definition(name) {
            claimed.extend(definition.aliases.iter().cloned());
        }
    }
    let other_names: Vec<String> = params
        .keys()
        .filter(|key| !claimed.contains(*key))
        .cloned()
        .collect();

    let mut result = AnalysisResult {
        tag_type,
        implementation,
        required: validate_parameters(&required_names, params, false, &overrides, &sdk_managed),
        programmatic_required: validate_parameters(
            &programmatic_required_names,
            params,
            false,
            &overrides,
            &sdk_managed,
        ),
        programmatic_recommended: validate_parameters(
            &programmatic_recommended_names,
            params,
            true,
            &overrides,
            &sdk_managed,
        ),
        other: validate_parameters(&other_names, params, true, &overrides, &sdk_managed),
    };

    apply_continuous_playback_rules(&mut result, params, implementation);

    Ok(result)
}

fn register_server_side_rules(
    required: &mut Vec<String>,
    overrides: &mut HashSet<&str>,
    options: &AnalyzerOptions,
) {
    push_unique(required, "ssss");
    push_unique(required, "ip");
    if options.ip_via_http_header {
        overrides.insert("ip");
    }
}

fn push_unique(list: &mut Vec<String>, name: &str) {
    if !list.iter().any(|entry| entry == name) {
        list.push(name.to_string());
    }
}

fn validate_parameters(
    names: &[String],
    params: &BTreeMap<String, ParamValue>,
    optional: bool,
    overrides: &HashSet<&str>,
    sdk_managed: &HashSet<&str>,
) -> BTreeMap<String, ParameterVerdict> {
    names
        .iter()
        .map(|name| {
            let verdict = validate_parameter(name, params, optional, overrides, sdk_managed);
            (name.clone(), verdict)
        })
        .collect()
}

fn validate_parameter(
    name: &str,
    params: &BTreeMap<String, ParamValue>,
    optional: bool,
    overrides: &HashSet<&str>,
    sdk_managed: &HashSet<&str>,
) -> ParameterVerdict {
    let definition = catalog().definition(name);

    let (value, alias) = lookup(name, definition, params);
    let display = value.map(ParamValue::to_display_string);

    let missing_score = if optional {
        points::OPTIONAL_PARAM_MISSING
    } else {
        points::REQUIRED_PARAM_MISSING
    };

    let mut verdict = ParameterVerdict {
        name: name.to_string(),
        value: display.clone(),
        alias,
        exists: display.is_some(),
        valid: false,
        score: missing_score,
        overridden: overrides.contains(name),
        sdk_managed: sdk_managed.contains(name),
        accepted: false,
        warning: None,
    };

    if let Some(display) = &display {
        match definition.and_then(|definition| definition.validation.as_ref()) {
            Some(validation) if validation.is_match(display) => {
                verdict.valid = true;
                verdict.score = if optional {
                    points::OPTIONAL_PARAM_VALIDATED
                } else {
                    points::REQUIRED_PARAM_VALIDATED
                };
            }
            Some(_) => {
                let accepted_match = definition
                    .and_then(|definition| definition.accepted.as_ref())
                    .is_some_and(|accepted| accepted.is_match(display));
                if accepted_match {
                    verdict.valid = true;
                    verdict.accepted = true;
                    verdict.score = if optional {
                        points::OPTIONAL_PARAM_VALID
                    } else {
                        points::REQUIRED_PARAM_VALID
                    };
                }
            }
            None => {
                verdict.valid = true;
                verdict.score = if optional {
                    points::OPTIONAL_PARAM
                } else {
                    points::REQUIRED_PARAM
                };
            }
        }
        if let Some(deprecated) = definition.and_then(|definition| definition.deprecated.as_deref())
        {
            verdict.warning = Some(deprecated.to_string());
        }
    }

    // Another system supplies overridden and SDK-managed parameters, so
    // they are never penalized, present or not.
    if verdict.overridden || verdict.sdk_managed {
        verdict.valid = true;
        verdict.score = points::OVERRIDE_PARAM;
    }

    verdict
}

/// Resolve a rule name against the parameter map, canonical key first,
/// then declared aliases in catalog order.
fn lookup<'a>(
    name: &str,
    definition: Option<&ParameterDefinition>,
    params: &'a BTreeMap<String, ParamValue>,
) -> (Option<&'a ParamValue>, Option<String>) {
    if let Some(value) = params.get(name) {
        return (Some(value), None);
    }
    if let Some(definition) = definition {
        for alias in &definition.aliases {
            if let Some(value) = params.get(alias) {
                return (Some(value), Some(alias.clone()));
            }
        }
    }
    (None, None)
}

/// `aconp` and `vconp` carry the same continuous-playback signal for
/// audio and video inventory respectively. They never make sense
/// together, and each one is suspicious in the other one's context.
fn apply_continuous_playback_rules(
    result: &mut AnalysisResult,
    params: &BTreeMap<String, ParamValue>,
    implementation: ImplementationType,
) {
    let has_aconp = params.contains_key("aconp");
    let has_vconp = params.contains_key("vconp");

    if has_aconp && has_vconp {
        for name in ["aconp", "vconp"] {
            if let Some(verdict) = find_verdict_mut(result, name) {
                verdict.valid = false;
                verdict.accepted = false;
                verdict.score = points::REQUIRED_PARAM_MISSING;
                verdict.warning = Some(
                    "The aconp and vconp parameters are mutually exclusive; send only one continuous playback signal.".to_string(),
                );
            }
        }
        return;
    }

    if has_aconp && implementation != ImplementationType::Audio {
        if let Some(verdict) = find_verdict_mut(result, "aconp") {
            verdict.warning = Some(
                "The aconp parameter is intended for audio tags only; use vconp for video implementations.".to_string(),
            );
        }
    }

    if has_vconp && implementation == ImplementationType::Audio {
        if let Some(verdict) = find_verdict_mut(result, "vconp") {
            verdict.valid = false;
            verdict.accepted = false;
            verdict.score = points::REQUIRED_PARAM_MISSING;
            verdict.warning = Some(
                "The vconp parameter is not suitable for audio implementations; use aconp instead.".to_string(),
            );
        }
    }
}

fn find_verdict_mut<'a>(
    result: &'a mut AnalysisResult,
    name: &str,
) -> Option<&'a mut ParameterVerdict> {
    result
        .required
        .get_mut(name)
        .or_else(|| result.programmatic_required.get_mut(name))
        .or_else(|| result.programmatic_recommended.get_mut(name))
        .or_else(|| result.other.get_mut(name))
}
