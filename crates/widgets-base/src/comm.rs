//! Message channel contract and message shapes.

use std::fmt;
use std::rc::Rc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::CommError;

/// Id of a sent message, echoed back in replies' `parent_header.msg_id`.
pub type MsgId = String;

pub type MsgHandler = Box<dyn Fn(CommMessage)>;

/// A bidirectional, per-widget message channel.
///
/// Implementations must not invoke the status callback from inside
/// [`Comm::send`]; acknowledgements arrive later, as they do from a kernel.
pub trait Comm {
    fn comm_id(&self) -> &str;

    fn target_name(&self) -> &str;

    fn send(
        &self,
        data: serde_json::Value,
        callbacks: CommCallbacks,
        metadata: serde_json::Value,
        buffers: Vec<Bytes>,
    ) -> Result<MsgId, CommError>;

    fn close(
        &self,
        data: serde_json::Value,
        callbacks: CommCallbacks,
        metadata: serde_json::Value,
        buffers: Vec<Bytes>,
    ) -> Result<MsgId, CommError>;

    /// Replaces the inbound message handler.
    fn on_msg(&self, handler: MsgHandler);

    /// Replaces the handler run when the remote side closes the channel.
    fn on_close(&self, handler: MsgHandler);
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MsgHeader {
    #[serde(default)]
    pub msg_id: String,
    #[serde(default)]
    pub msg_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommContent {
    #[serde(default)]
    pub comm_id: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// An inbound (or recorded outbound) comm message. Buffers travel
/// out-of-band and are not part of the JSON form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommMessage {
    #[serde(default)]
    pub header: MsgHeader,
    #[serde(default)]
    pub parent_header: Option<MsgHeader>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub content: CommContent,
    #[serde(skip)]
    pub buffers: Vec<Bytes>,
}

impl CommMessage {
    pub fn new(comm_id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            content: CommContent {
                comm_id: comm_id.into(),
                data,
            },
            ..Self::default()
        }
    }

    pub fn with_parent(mut self, msg_id: impl Into<String>) -> Self {
        self.parent_header = Some(MsgHeader {
            msg_id: msg_id.into(),
            msg_type: "comm_msg".to_owned(),
        });
        self
    }

    pub fn with_buffers(mut self, buffers: Vec<Bytes>) -> Self {
        self.buffers = buffers;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// `data.method`, if present.
    pub fn method(&self) -> Option<&str> {
        self.content.data.get("method").and_then(serde_json::Value::as_str)
    }

    /// Parent message id; an empty header counts as absent.
    pub fn parent_msg_id(&self) -> Option<&str> {
        self.parent_header
            .as_ref()
            .map(|h| h.msg_id.as_str())
            .filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    Busy,
    Idle,
    Starting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub execution_state: ExecutionState,
}

impl StatusMessage {
    pub fn idle() -> Self {
        Self {
            execution_state: ExecutionState::Idle,
        }
    }

    pub fn busy() -> Self {
        Self {
            execution_state: ExecutionState::Busy,
        }
    }
}

pub type StatusCallback = Rc<dyn Fn(&StatusMessage)>;

/// Per-message reply hooks.
#[derive(Clone, Default)]
pub struct CommCallbacks {
    pub iopub_status: Option<StatusCallback>,
}

impl CommCallbacks {
    pub fn on_status<F>(callback: F) -> Self
    where
        F: Fn(&StatusMessage) + 'static,
    {
        Self {
            iopub_status: Some(Rc::new(callback)),
        }
    }
}

impl fmt::Debug for CommCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommCallbacks")
            .field("iopub_status", &self.iopub_status.is_some())
            .finish()
    }
}
