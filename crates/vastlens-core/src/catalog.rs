//! Static, versioned rule catalog.
//!
//! Parameter definitions, SDK-managed parameters, PAL nonce parameters
//! and per-implementation rule lists are embedded as JSON and loaded
//! once at process start. The loaded catalog is read-only: the analyzer
//! deep-clones whatever rule lists it needs before applying per-run
//! adjustments.

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::classifier::TagType;

/// Version stamp of the embedded rule data.
pub const CATALOG_VERSION: &str = "2025-08";

const AD_TAG_PARAMETERS_JSON: &str = include_str!("../data/ad_tag_parameters.json");
const PAL_NONCE_PARAMETERS_JSON: &str = include_str!("../data/pal_nonce_parameters.json");
const SDK_PARAMETERS_JSON: &str = include_str!("../data/sdk_parameters.json");
const WEB_RULES_JSON: &str = include_str!("../data/rules/web.json");
const MOBILE_APP_RULES_JSON: &str = include_str!("../data/rules/mobile_app.json");
const CONNECTED_TV_RULES_JSON: &str = include_str!("../data/rules/connected_tv.json");
const AUDIO_RULES_JSON: &str = include_str!("../data/rules/audio.json");
const DIGITAL_OUT_OF_HOME_RULES_JSON: &str = include_str!("../data/rules/digital_out_of_home.json");

/// The implementation context a tag is validated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ImplementationType {
    #[serde(rename = "web")]
    Web,
    #[serde(rename = "mobileApp")]
    MobileApp,
    #[serde(rename = "connectedTV")]
    ConnectedTv,
    #[serde(rename = "audio")]
    Audio,
    #[serde(rename = "digitalOutOfHome")]
    DigitalOutOfHome,
}

impl ImplementationType {
    pub const ALL: &'static [ImplementationType] = &[
        ImplementationType::Web,
        ImplementationType::MobileApp,
        ImplementationType::ConnectedTv,
        ImplementationType::Audio,
        ImplementationType::DigitalOutOfHome,
    ];

    /// Parse a user-supplied label (CLI `--implementation`).
    pub fn from_label(label: &str) -> Option<ImplementationType> {
        let normalized = label
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "web" => Some(ImplementationType::Web),
            "mobileapp" | "mobile" | "app" => Some(ImplementationType::MobileApp),
            "connectedtv" | "ctv" | "tv" => Some(ImplementationType::ConnectedTv),
            "audio" => Some(ImplementationType::Audio),
            "digitaloutofhome" | "dooh" | "doh" => Some(ImplementationType::DigitalOutOfHome),
            _ => None,
        }
    }
}

impl fmt::Display for ImplementationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ImplementationType::Web => "web",
            ImplementationType::MobileApp => "mobile app",
            ImplementationType::ConnectedTv => "connected TV",
            ImplementationType::Audio => "audio",
            ImplementationType::DigitalOutOfHome => "digital out-of-home",
        };
        f.write_str(label)
    }
}

/// One catalog entry describing a VAST tag parameter.
#[derive(Debug)]
pub struct ParameterDefinition {
    pub name: String,
    pub aliases: Vec<String>,
    /// Primary validation pattern; `None` means any value is accepted.
    pub validation: Option<Regex>,
    /// Secondary, looser pattern whose match is valid but discouraged.
    pub accepted: Option<Regex>,
    pub deprecated: Option<String>,
    pub description: Option<String>,
    pub help: Option<String>,
    pub examples: Vec<String>,
    pub accepted_examples: Vec<String>,
}

/// A parameter whose value the client SDK fills in by itself.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SdkParameter {
    pub name: String,
    pub sdk_handling_info: String,
    pub sdk: Vec<String>,
}

/// Required/recommended parameter lists for one implementation context.
///
/// Cloned per analysis run; tag-type adjustments mutate the clone only.
#[derive(Debug, Clone, Deserialize)]
pub struct ImplementationRuleSet {
    pub required: Vec<String>,
    pub programmatic: ProgrammaticRules,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgrammaticRules {
    pub required: Vec<String>,
    pub recommended: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ParameterDefinitionData {
    name: String,
    #[serde(default)]
    aliases: Vec<String>,
    validation: Option<String>,
    accepted: Option<AcceptedPatternData>,
    deprecated: Option<String>,
    description: Option<String>,
    help: Option<String>,
    #[serde(default)]
    examples: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct AcceptedPatternData {
    validation: String,
    #[serde(default)]
    examples: Vec<String>,
}

/// The loaded, immutable rule catalog.
#[derive(Debug)]
pub struct RuleCatalog {
    definitions: Vec<ParameterDefinition>,
    /// Canonical name and every alias map to a definition index.
    index: HashMap<String, usize>,
    pal_nonce: Vec<ParameterDefinition>,
    sdk_parameters: Vec<SdkParameter>,
    rule_sets: HashMap<ImplementationType, ImplementationRuleSet>,
}

static CATALOG: Lazy<RuleCatalog> =
    Lazy::new(|| RuleCatalog::load().expect("embedded rule catalog is valid"));

/// The process-wide catalog instance.
pub fn catalog() -> &'static RuleCatalog {
    &CATALOG
}

impl RuleCatalog {
    fn load() -> Result<Self, String> {
        let definitions = parse_definitions(AD_TAG_PARAMETERS_JSON)?;
        let pal_nonce = parse_definitions(PAL_NONCE_PARAMETERS_JSON)?;
        let sdk_parameters: Vec<SdkParameter> = serde_json::from_str(SDK_PARAMETERS_JSON)
            .map_err(|err| format!("invalid sdk_parameters.json: {err}"))?;

        let mut index = HashMap::new();
        for (position, definition) in definitions.iter().enumerate() {
            for key in std::iter::once(&definition.name).chain(definition.aliases.iter()) {
                if index.insert(key.clone(), position).is_some() {
                    return Err(format!("duplicate parameter name or alias `{key}`"));
                }
            }
        }

        let mut rule_sets = HashMap::new();
        for (implementation, json) in [
            (ImplementationType::Web, WEB_RULES_JSON),
            (ImplementationType::MobileApp, MOBILE_APP_RULES_JSON),
            (ImplementationType::ConnectedTv, CONNECTED_TV_RULES_JSON),
            (ImplementationType::Audio, AUDIO_RULES_JSON),
            (
                ImplementationType::DigitalOutOfHome,
                DIGITAL_OUT_OF_HOME_RULES_JSON,
            ),
        ] {
            let rule_set: ImplementationRuleSet = serde_json::from_str(json)
                .map_err(|err| format!("invalid rule set for {implementation}: {err}"))?;
            rule_sets.insert(implementation, rule_set);
        }

        Ok(RuleCatalog {
            definitions,
            index,
            pal_nonce,
            sdk_parameters,
            rule_sets,
        })
    }

    /// Look up a definition by canonical name or alias.
    pub fn definition(&self, name: &str) -> Option<&ParameterDefinition> {
        self.index.get(name).map(|&position| &self.definitions[position])
    }

    pub fn definitions(&self) -> &[ParameterDefinition] {
        &self.definitions
    }

    /// The base rule set for an implementation context. Callers clone it
    /// before applying tag-type adjustments.
    pub fn rules_for(&self, implementation: ImplementationType) -> &ImplementationRuleSet {
        &self.rule_sets[&implementation]
    }

    /// Parameter names the PAL SDK encodes inside the nonce.
    pub fn pal_nonce_names(&self) -> impl Iterator<Item = &str> {
        self.pal_nonce.iter().map(|definition| definition.name.as_str())
    }

    pub fn pal_nonce_definitions(&self) -> &[ParameterDefinition] {
        &self.pal_nonce
    }

    /// Parameter names a client SDK manages on its own.
    pub fn sdk_parameter_names(&self) -> impl Iterator<Item = &str> {
        self.sdk_parameters.iter().map(|parameter| parameter.name.as_str())
    }

    pub fn sdk_parameters(&self) -> &[SdkParameter] {
        &self.sdk_parameters
    }

    pub fn description(&self, name: &str) -> Option<&str> {
        self.definition(name)?.description.as_deref()
    }

    pub fn help(&self, name: &str) -> Option<&str> {
        self.definition(name)?.help.as_deref()
    }

    pub fn deprecation(&self, name: &str) -> Option<&str> {
        self.definition(name)?.deprecated.as_deref()
    }

    pub fn sdk_handling_info(&self, name: &str) -> Option<&str> {
        self.sdk_parameters
            .iter()
            .find(|parameter| parameter.name == name)
            .map(|parameter| parameter.sdk_handling_info.as_str())
    }
}

fn parse_definitions(json: &str) -> Result<Vec<ParameterDefinition>, String> {
    let data: Vec<ParameterDefinitionData> =
        serde_json::from_str(json).map_err(|err| format!("invalid parameter JSON: {err}"))?;
    data.into_iter()
        .map(|entry| {
            let validation = entry
                .validation
                .map(|pattern| compile(&entry.name, &pattern))
                .transpose()?;
            let (accepted, accepted_examples) = match entry.accepted {
                Some(accepted) => (
                    Some(compile(&entry.name, &accepted.validation)?),
                    accepted.examples,
                ),
                None => (None, Vec::new()),
            };
            Ok(ParameterDefinition {
                name: entry.name,
                aliases: entry.aliases,
                validation,
                accepted,
                deprecated: entry.deprecated,
                description: entry.description,
                help: entry.help,
                examples: entry.examples,
                accepted_examples,
            })
        })
        .collect()
}

fn compile(name: &str, pattern: &str) -> Result<Regex, String> {
    Regex::new(pattern).map_err(|err| format!("invalid validation pattern for `{name}`: {err}"))
}

/// Example tag URL per tag type, used by tests and the CLI `--example`
/// flag.
pub fn example_url(tag_type: TagType) -> Option<&'static str> {
    match tag_type {
        TagType::Standard => Some(
            "https://pubads.g.doubleclick.net/gampad/ads?iu=/21775744923/external/single_ad_samples&sz=640x480&cust_params=sample_ct%3Dlinear&ciu_szs=300x250%2C728x90&gdfp_req=1&output=vast&unviewed_position_start=1&env=vp&impl=s&correlator=",
        ),
        TagType::Pal => Some(
            "https://pubads.g.doubleclick.net/gampad/ads?iu=/21775744923/external/single_ad_samples&sz=640x480&cust_params=sample_ct%3Dlinear&ciu_szs=300x250%2C728x90&gdfp_req=1&output=vast&unviewed_position_start=1&env=vp&impl=s&givn=AQzzBGQEVGjRW4svCeU1wKejaeWhATJKF8aSNC5L1tYtef8Hbnrk..&correlator=",
        ),
        TagType::PalLegacy => Some(
            "https://pubads.g.doubleclick.net/gampad/ads?iu=/21775744923/external/single_ad_samples&sz=640x480&cust_params=sample_ct%3Dlinear&ciu_szs=300x250%2C728x90&gdfp_req=1&output=vast&unviewed_position_start=1&env=vp&impl=s&paln=AQzzBGQEVGjRW4svCeU1wKejaeWhATJKF8aSNC5L1tYtef8Hbnrk..&correlator=",
        ),
        TagType::Pai => Some(
            "https://serverside.doubleclick.net/gampad/ads?iu=/21775744923/external/single_ad_samples&sz=640x480&cust_params=sample_ct%3Dlinear&ciu_szs=300x250%2C728x90&gdfp_req=1&output=vast&unviewed_position_start=1&env=vp&impl=s&ssss=vast_url_validator_test&ip=203.0.113.1&correlator=",
        ),
        TagType::PaiPal => Some(
            "https://serverside.doubleclick.net/gampad/ads?iu=/21775744923/external/single_ad_samples&sz=640x480&cust_params=sample_ct%3Dlinear&ciu_szs=300x250%2C728x90&gdfp_req=1&output=vast&unviewed_position_start=1&env=vp&impl=s&ssss=vast_url_validator_test&ip=203.0.113.1&givn=AQzzBGQEVGjRW4svCeU1wKejaeWhATJKF8aSNC5L1tYtef8Hbnrk..&correlator=",
        ),
        TagType::ImaSdk => Some(
            "https://pagead2.googlesyndication.com/gampad/ads?iu=%2F21775744923%2Fexternal%2Fsingle_ad_samples&sz=640x480&cust_params=sample_ct%3Dlinear&ciu_szs=fluid%7C728x90%2Cfluid%7C300x250&gdfp_req=1&output=xml_vast4&unviewed_position_start=1&env=vp&correlator=2920090807217010&sdkv=h.3.688.0&osd=2&frm=0&vis=1&sdr=1&hl=en&sdki=445&adk=1083529519&sdk_apis=2%2C7%2C8&omid_p=Google1%2Fh.3.688.0&sid=143B1AB4-F655-425F-B5C2-D49BC807C875&url=https%3A%2F%2Fgoogleads.github.io%2Fgoogleads-ima-html5%2Fvsi%2F",
        ),
        TagType::Unknown => None,
    }
}
