//! Local ↔ OHT language tags.
//!
//! The mapping table is static and fails closed: an unmapped local tag is
//! unsupported, never guessed. Several local tags may share one remote tag
//! (`pt` and `pt-pt`); the reverse lookup returns the first local tag
//! registered for it.

use crate::client::{OhtClient, RemoteLanguage};
use crate::error::{GatewayError, GatewayResult};
use tokio::sync::OnceCell;

/// Default local → OHT table.
static DEFAULT_MAPPINGS: &[(&str, &str)] = &[
    ("af", "af"),
    ("ar", "ar-sa"),
    ("az", "az-az"),
    ("bg", "bg-bg"),
    ("bn", "bn-bd"),
    ("bs", "bs-ba"),
    ("ca", "ca-es"),
    ("cs", "cs-cz"),
    ("da", "da"),
    ("de", "de-de"),
    ("el", "el-gr"),
    ("en", "en-us"),
    ("es", "es-es"),
    ("et", "et-ee"),
    ("fa", "fa-ir"),
    ("fi", "fi-fi"),
    ("fr", "fr-fr"),
    ("gu", "gu-in"),
    ("he", "he-il"),
    ("hi", "hi-in"),
    ("hr", "hr-hr"),
    ("ht", "ht"),
    ("hu", "hu-hu"),
    ("hy", "hy-am"),
    ("id", "id-id"),
    ("is", "is-is"),
    ("it", "it-it"),
    ("ja", "ja-jp"),
    ("ka", "ka-ge"),
    ("kk", "kk-kz"),
    ("km", "km-kh"),
    ("ko", "ko-kp"),
    ("ku", "ku-tr"),
    ("lt", "lt-lt"),
    ("lv", "lv-lv"),
    ("mk", "mk-mk"),
    ("mr", "mr-in"),
    ("ms", "ms-my"),
    ("nl", "nl-nl"),
    // Norwegian Bokmål
    ("nb", "no-no"),
    ("pa", "pa-in"),
    ("pl", "pl-pl"),
    ("ps", "ps"),
    ("pt", "pt-pt"),
    ("pt-br", "pt-br"),
    ("pt-pt", "pt-pt"),
    ("ro", "ro-ro"),
    ("ru", "ru-ru"),
    ("sa", "sa-in"),
    ("sk", "sk-sk"),
    ("sl", "sl-si"),
    ("sq", "sq-al"),
    ("sr", "sr-rs"),
    ("sv", "sv-se"),
    ("ta", "ta-in"),
    ("th", "th-th"),
    ("tl", "tl-ph"),
    ("tr", "tr-tr"),
    ("uk", "uk-ua"),
    ("ur", "ur-pk"),
    ("uz", "uz-uz"),
    ("vi", "vi-vn"),
    ("zh-hans", "zh-cn-cmn-s"),
    ("zh-hant", "zh-cn-cmn-t"),
];

/// One row of the mapping table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageMapping {
    pub local: String,
    pub remote: String,
}

/// Bidirectional lookup over the default table plus host overrides.
#[derive(Debug, Clone)]
pub struct LanguageMapper {
    /// Overrides first, then defaults; lookups take the first match
    mappings: Vec<LanguageMapping>,
}

impl LanguageMapper {
    pub fn new() -> Self {
        Self::with_overrides(&[])
    }

    /// Layer `(local, remote)` overrides over the default table.
    pub fn with_overrides(overrides: &[(String, String)]) -> Self {
        let overrides = overrides.iter().map(|(local, remote)| LanguageMapping {
            local: local.to_ascii_lowercase(),
            remote: remote.to_ascii_lowercase(),
        });
        let defaults = DEFAULT_MAPPINGS.iter().map(|(local, remote)| LanguageMapping {
            local: local.to_string(),
            remote: remote.to_string(),
        });

        Self {
            mappings: overrides.chain(defaults).collect(),
        }
    }

    /// Remote tag for a local tag, or `UnsupportedLanguage`.
    pub fn to_remote(&self, local: &str) -> GatewayResult<&str> {
        let local = local.trim().to_ascii_lowercase();
        self.mappings
            .iter()
            .find(|m| m.local == local)
            .map(|m| m.remote.as_str())
            .ok_or(GatewayError::UnsupportedLanguage(local))
    }

    /// First local tag registered for a remote tag.
    pub fn to_local(&self, remote: &str) -> Option<&str> {
        let remote = remote.trim().to_ascii_lowercase();
        self.mappings
            .iter()
            .find(|m| m.remote == remote)
            .map(|m| m.local.as_str())
    }

    pub fn is_supported(&self, local: &str) -> bool {
        self.to_remote(local).is_ok()
    }

    /// Effective table, one entry per local tag, in lookup order.
    pub fn mappings(&self) -> Vec<&LanguageMapping> {
        let mut seen = std::collections::HashSet::new();
        self.mappings
            .iter()
            .filter(|m| seen.insert(m.local.as_str()))
            .collect()
    }
}

impl Default for LanguageMapper {
    fn default() -> Self {
        Self::new()
    }
}

/// The provider's supported-language list, fetched at most once.
///
/// Owned by the caller (typically one per process). A failed fetch leaves
/// the cache empty so the next call tries again; a successful one is kept
/// for the cache's lifetime.
#[derive(Debug, Default)]
pub struct LanguageCache {
    languages: OnceCell<Vec<RemoteLanguage>>,
}

impl LanguageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_fetch(&self, client: &OhtClient) -> GatewayResult<&[RemoteLanguage]> {
        self.languages
            .get_or_try_init(|| client.supported_languages())
            .await
            .map(Vec::as_slice)
    }

    pub fn cached(&self) -> Option<&[RemoteLanguage]> {
        self.languages.get().map(Vec::as_slice)
    }
}
