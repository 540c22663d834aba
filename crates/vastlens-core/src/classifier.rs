//! Tag-type classifier for VAST redirect URLs.
//!
//! Classification is a pure decision tree over the URL's host, path and
//! the presence of a handful of query keys (`givn`, `paln`, `ssss`,
//! `sdkv`). It is independent of the decoded parameter map: the raw URL
//! alone determines the serving variant.

use std::fmt;

use serde::Serialize;
use url::Url;

use crate::error::ClassifyError;

/// Host serving server-side (PAI) ad requests.
const SERVER_SIDE_AD_HOST: &str = "serverside.doubleclick.net";

/// Hosts serving client-side ad requests.
const CLIENT_SIDE_AD_HOSTS: &[&str] = &[
    "pubads.g.doubleclick.net",
    "securepubads.g.doubleclick.net",
];

/// Internal host variants count as client-side when they serve the ad
/// request path.
const INTERNAL_HOST_SUFFIX: &str = ".corp.google.com";
const AD_SERVING_PATH_PREFIX: &str = "/gampad/ads";

/// Host the IMA SDK requests ads from.
const SDK_HOST: &str = "pagead2.googlesyndication.com";

/// The ad-serving protocol variant a tag URL represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TagType {
    #[serde(rename = "Standard")]
    Standard,
    #[serde(rename = "PAL")]
    Pal,
    #[serde(rename = "PAL (legacy)")]
    PalLegacy,
    #[serde(rename = "PAI")]
    Pai,
    #[serde(rename = "PAI + PAL")]
    PaiPal,
    #[serde(rename = "IMA SDK")]
    ImaSdk,
    #[serde(rename = "Unknown")]
    Unknown,
}

impl fmt::Display for TagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TagType::Standard => "Standard",
            TagType::Pal => "PAL",
            TagType::PalLegacy => "PAL (legacy)",
            TagType::Pai => "PAI",
            TagType::PaiPal => "PAI + PAL",
            TagType::ImaSdk => "IMA SDK",
            TagType::Unknown => "Unknown",
        };
        f.write_str(label)
    }
}

impl TagType {
    /// All classifiable variants, in display order.
    pub const ALL: &'static [TagType] = &[
        TagType::Standard,
        TagType::Pal,
        TagType::PalLegacy,
        TagType::Pai,
        TagType::PaiPal,
        TagType::ImaSdk,
        TagType::Unknown,
    ];

    /// Parse a user-supplied label (CLI `--tag-type`).
    pub fn from_label(label: &str) -> Option<TagType> {
        let normalized = label
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "standard" => Some(TagType::Standard),
            "pal" => Some(TagType::Pal),
            "pallegacy" | "paln" => Some(TagType::PalLegacy),
            "pai" => Some(TagType::Pai),
            "paipal" => Some(TagType::PaiPal),
            "imasdk" | "ima" => Some(TagType::ImaSdk),
            "unknown" => Some(TagType::Unknown),
            _ => None,
        }
    }
}

/// Result of classifying a URL.
#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub tag_type: TagType,
    /// Non-fatal classification warning (e.g. deprecated `paln` nonce).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl Classification {
    fn new(tag_type: TagType) -> Self {
        Self {
            tag_type,
            warning: None,
        }
    }
}

/// Classify a VAST tag URL into exactly one [`TagType`].
///
/// Fails only for unparsable URLs and non-http(s) schemes; an
/// unrecognized host classifies as [`TagType::Unknown`], which is a
/// valid terminal result rather than an error.
pub fn classify(url: &str) -> Result<Classification, ClassifyError> {
    if url.trim().is_empty() {
        return Err(ClassifyError::EmptyUrl);
    }
    let parsed = Url::parse(url).map_err(|err| ClassifyError::InvalidUrl(err.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(ClassifyError::InvalidUrl(format!(
                "unsupported scheme `{scheme}`"
            )));
        }
    }

    let host = parsed.host_str().unwrap_or_default();
    let has_key = |key: &str| parsed.query_pairs().any(|(k, _)| k == key);

    if host == SERVER_SIDE_AD_HOST && has_key("ssss") {
        let tag_type = if has_key("givn") {
            TagType::PaiPal
        } else {
            TagType::Pai
        };
        return Ok(Classification::new(tag_type));
    }

    if is_client_side_host(host, parsed.path()) {
        if has_key("givn") {
            return Ok(Classification::new(TagType::Pal));
        }
        if has_key("paln") {
            return Ok(Classification {
                tag_type: TagType::PalLegacy,
                warning: Some(
                    "The paln parameter is deprecated; migrate to the givn PAL nonce parameter."
                        .to_string(),
                ),
            });
        }
        return Ok(Classification::new(TagType::Standard));
    }

    if host == SDK_HOST && has_key("sdkv") {
        return Ok(Classification::new(TagType::ImaSdk));
    }

    Ok(Classification::new(TagType::Unknown))
}

fn is_client_side_host(host: &str, path: &str) -> bool {
    if CLIENT_SIDE_AD_HOSTS.contains(&host) {
        return true;
    }
    host.ends_with(INTERNAL_HOST_SUFFIX) && path.starts_with(AD_SERVING_PATH_PREFIX)
}
