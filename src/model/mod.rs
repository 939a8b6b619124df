//! # Data Model
//!
//! Records are owned by the remote store; the engine only caches copies.

pub mod feature;
pub mod message;
pub mod module;

use std::collections::BTreeMap;

pub use feature::{FeatureKey, FeatureRecord};
pub use message::{SyncKind, SyncMessage, SyncPayload, SyncValue};
pub use module::{ModuleRecord, ModuleStatus};

/// Features grouped by owning module code
pub type FeaturesByModule = BTreeMap<String, Vec<FeatureRecord>>;

/// Group a flat feature list by module, keeping input order within a group
pub fn group_features(features: impl IntoIterator<Item = FeatureRecord>) -> FeaturesByModule {
    let mut grouped = FeaturesByModule::new();
    for feature in features {
        grouped
            .entry(feature.module_code.clone())
            .or_default()
            .push(feature);
    }
    grouped
}
