//! # Feature Records

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Separator between module and feature code in flat keys
const KEY_SEPARATOR: &str = "::";

/// Identity of a feature: owning module plus feature code
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeatureKey {
    pub module_code: String,
    pub feature_code: String,
}

impl FeatureKey {
    pub fn new(module_code: impl Into<String>, feature_code: impl Into<String>) -> Self {
        Self {
            module_code: module_code.into(),
            feature_code: feature_code.into(),
        }
    }

    /// Parse a flat `module::feature` key
    pub fn parse(flat: &str) -> Option<Self> {
        let (module, feature) = flat.split_once(KEY_SEPARATOR)?;
        if module.is_empty() || feature.is_empty() {
            return None;
        }
        Some(Self::new(module, feature))
    }
}

impl fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.module_code, KEY_SEPARATOR, self.feature_code)
    }
}

/// A feature toggle as stored by the remote store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub module_code: String,
    pub feature_code: String,
    pub enabled: bool,
    pub updated_at: DateTime<Utc>,
}

impl FeatureRecord {
    pub fn new(
        module_code: impl Into<String>,
        feature_code: impl Into<String>,
        enabled: bool,
    ) -> Self {
        Self {
            module_code: module_code.into(),
            feature_code: feature_code.into(),
            enabled,
            updated_at: Utc::now(),
        }
    }

    pub fn key(&self) -> FeatureKey {
        FeatureKey::new(&self.module_code, &self.feature_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_key_roundtrip() {
        let key = FeatureKey::new("shop", "cart");
        assert_eq!(key.to_string(), "shop::cart");
        assert_eq!(FeatureKey::parse("shop::cart"), Some(key));
    }

    #[test]
    fn test_flat_key_keeps_inner_separators_in_feature() {
        let key = FeatureKey::parse("admin.tools::users::export").unwrap();
        assert_eq!(key.module_code, "admin.tools");
        assert_eq!(key.feature_code, "users::export");
    }

    #[test]
    fn test_flat_key_rejects_malformed() {
        assert_eq!(FeatureKey::parse("shop"), None);
        assert_eq!(FeatureKey::parse("::cart"), None);
        assert_eq!(FeatureKey::parse("shop::"), None);
    }
}
