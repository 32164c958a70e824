//! Persisted manager state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use widgets_util::{BufferEncoding, BufferPath};

use crate::protocol::{STATE_VERSION_MAJOR, STATE_VERSION_MINOR};
use crate::view::ViewOptions;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateOptions {
    /// Leave out attributes equal to their type default.
    pub drop_defaults: bool,
    /// Only models with at least one root view.
    pub only_displayed: bool,
    /// Only models with a live comm.
    pub only_live: bool,
}

/// `{version_major, version_minor, state: {model_id: ModelSnapshot}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerState {
    pub version_major: u32,
    pub version_minor: u32,
    pub state: BTreeMap<String, ModelSnapshot>,
}

impl Default for ManagerState {
    fn default() -> Self {
        Self {
            version_major: STATE_VERSION_MAJOR,
            version_minor: STATE_VERSION_MINOR,
            state: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub model_name: String,
    pub model_module: String,
    #[serde(default)]
    pub model_module_version: String,
    #[serde(default)]
    pub state: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffers: Option<Vec<SnapshotBuffer>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub views: Option<Vec<ViewOptions>>,
}

/// A binary leaf of a snapshot, stored as text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotBuffer {
    pub data: String,
    pub path: BufferPath,
    pub encoding: BufferEncoding,
}
