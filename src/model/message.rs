//! # Sync Messages
//!
//! Transient change notices exchanged between contexts of one origin.
//! Never persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::feature::FeatureKey;
use super::module::ModuleStatus;

/// Kind of change carried by a [`SyncMessage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncKind {
    ModuleStatusChange,
    FeatureStatusChange,
}

impl SyncKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncKind::ModuleStatusChange => "ModuleStatusChange",
            SyncKind::FeatureStatusChange => "FeatureStatusChange",
        }
    }
}

/// New value carried by a [`SyncMessage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SyncValue {
    Status(ModuleStatus),
    Enabled(bool),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPayload {
    /// Module code, or `module::feature` for features
    pub key: String,
    pub new_value: SyncValue,
    pub timestamp: DateTime<Utc>,
}

/// A change notice on the broadcast channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMessage {
    #[serde(rename = "type")]
    pub kind: SyncKind,
    pub payload: SyncPayload,
}

impl SyncMessage {
    pub fn module_status(code: impl Into<String>, status: ModuleStatus, at: DateTime<Utc>) -> Self {
        Self {
            kind: SyncKind::ModuleStatusChange,
            payload: SyncPayload {
                key: code.into(),
                new_value: SyncValue::Status(status),
                timestamp: at,
            },
        }
    }

    pub fn feature_enabled(key: &FeatureKey, enabled: bool, at: DateTime<Utc>) -> Self {
        Self {
            kind: SyncKind::FeatureStatusChange,
            payload: SyncPayload {
                key: key.to_string(),
                new_value: SyncValue::Enabled(enabled),
                timestamp: at,
            },
        }
    }

    /// Feature identity, for feature messages with a well-formed key
    pub fn feature_key(&self) -> Option<FeatureKey> {
        match self.kind {
            SyncKind::FeatureStatusChange => FeatureKey::parse(&self.payload.key),
            SyncKind::ModuleStatusChange => None,
        }
    }
}
