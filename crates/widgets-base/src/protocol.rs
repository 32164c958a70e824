//! Wire-level constants and message bodies.

use serde::{Deserialize, Serialize};
use widgets_util::BufferPath;

/// Widget message protocol version sent with comm-open metadata.
pub const PROTOCOL_VERSION: &str = "2.1.0";
pub const PROTOCOL_MAJOR_VERSION: &str = "2";

/// Comm target used for widget channels.
pub const COMM_TARGET_NAME: &str = "jupyter.widget";

pub const BASE_MODULE: &str = "@jupyter-widgets/base";
pub const BASE_MODULE_VERSION: &str = "2.0.0";
pub const BASE_MODEL_NAME: &str = "WidgetModel";

/// Prefix of string-encoded model references.
pub const MODEL_REF_PREFIX: &str = "IPY_MODEL_";

/// Snapshot format version written by the manager.
pub const STATE_VERSION_MAJOR: u32 = 2;
pub const STATE_VERSION_MINOR: u32 = 0;

/// Message verbs carried in `data.method`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Update,
    EchoUpdate,
    Custom,
    RequestState,
}

impl Method {
    /// Parses a verb; unknown verbs yield `None` and are ignored by receivers.
    pub fn parse(method: &str) -> Option<Self> {
        match method {
            "update" => Some(Method::Update),
            "echo_update" => Some(Method::EchoUpdate),
            "custom" => Some(Method::Custom),
            "request_state" => Some(Method::RequestState),
            _ => None,
        }
    }
}

/// Body of `update`/`echo_update` messages and of comm-open data.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StateData {
    #[serde(default)]
    pub state: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub buffer_paths: Vec<BufferPath>,
}

/// Returns the model id referenced by an `"IPY_MODEL_<id>"` string.
pub fn parse_model_ref(value: &str) -> Option<&str> {
    value.strip_prefix(MODEL_REF_PREFIX)
}

pub fn model_ref(model_id: &str) -> String {
    format!("{MODEL_REF_PREFIX}{model_id}")
}
