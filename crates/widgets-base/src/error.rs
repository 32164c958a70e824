use thiserror::Error;
use widgets_util::BufferError;

/// Failures reported by a [`Comm`](crate::comm::Comm) or a backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommError {
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("comm is closed")]
    Closed,
    #[error("could not create comm: {0}")]
    CreateFailed(String),
    #[error("comm info request failed: {0}")]
    InfoFailed(String),
}

/// Errors surfaced by models, views and the manager.
///
/// Cloneable so that one failure can be observed by every awaiter of a
/// shared deferred result.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WidgetError {
    #[error("syncing error: no comm channel defined")]
    NoComm,
    #[error("could not create model {model_id}: {reason}")]
    ModelConstruction { model_id: String, reason: String },
    #[error("widget model not found: {0}")]
    ModelNotFound(String),
    #[error("module '{0}' is not registered")]
    ModuleNotFound(String),
    #[error("class '{name}' not found in module '{module}'")]
    ClassNotFound { module: String, name: String },
    #[error(
        "failed to create view for '{view_name}' from module '{view_module}' with model {model_id}: {reason}"
    )]
    ViewCreation {
        model_id: String,
        view_name: String,
        view_module: String,
        reason: String,
    },
    #[error("new_widget(...) must be given view information in the options")]
    MissingViewInfo,
    #[error("wrong widget protocol version: received '{received}', expected major version '{expected}'")]
    ProtocolVersionMismatch {
        received: String,
        expected: &'static str,
    },
    #[error("unsupported widget state format (version_major {0})")]
    UnsupportedStateVersion(u32),
    #[error("error serializing attribute '{attr}': {reason}")]
    Serialize { attr: String, reason: String },
    #[error("error deserializing attribute '{attr}': {reason}")]
    Deserialize { attr: String, reason: String },
    #[error("malformed message: {0}")]
    Message(String),
    #[error("render failed: {0}")]
    Render(String),
    #[error("widget model {0} is closed")]
    ModelClosed(String),
    #[error("widget manager has been dropped")]
    ManagerDropped,
    #[error("task cancelled: {0}")]
    TaskCancelled(String),
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error(transparent)]
    Comm(#[from] CommError),
}

impl From<serde_json::Error> for WidgetError {
    fn from(err: serde_json::Error) -> Self {
        WidgetError::Message(err.to_string())
    }
}

pub type Result<T, E = WidgetError> = std::result::Result<T, E>;
