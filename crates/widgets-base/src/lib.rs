//! Widget model synchronization.
//!
//! A [`WidgetModel`] mirrors the attributes of an object living in a remote
//! kernel and keeps both sides in step over a [`Comm`]. A [`WidgetManager`]
//! creates models (from kernel comm-opens, from local requests and from
//! saved snapshots), attaches views to them and saves or restores the whole
//! set.
//!
//! Everything here is single-threaded and expects to run inside a
//! `tokio::task::LocalSet`.

pub mod attributes;
pub mod comm;
pub mod deferred;
pub mod error;
pub mod events;
pub mod graph;
pub mod manager;
pub mod model;
pub mod protocol;
pub mod registry;
pub mod serializers;
pub mod snapshot;
pub mod view;
pub mod viewlist;

pub use attributes::{AttrMap, AttrValue, SetOptions, SetOutcome};
pub use comm::{Comm, CommCallbacks, CommMessage, ExecutionState, MsgHandler, MsgHeader, MsgId, StatusMessage};
pub use deferred::{settled, spawn_deferred, Deferred};
pub use error::{CommError, Result, WidgetError};
pub use events::{ListenerId, ModelEvent};
pub use graph::{find_connected_widgets, find_widget_children, WidgetGraph};
pub use manager::{ManagerBackend, ModelCreateOptions, WeakManager, WidgetManager};
pub use model::{ModelOptions, PlainState, SyncMethod, SyncOptions, WidgetModel};
pub use protocol::{PROTOCOL_MAJOR_VERSION, PROTOCOL_VERSION};
pub use registry::{AttributeSerializer, ModelType, Registry};
pub use serializers::{model_references, pack_models, unpack_models};
pub use snapshot::{ManagerState, ModelSnapshot, SnapshotBuffer, StateOptions};
pub use view::{View, ViewFactory, ViewOptions, WidgetView};
pub use viewlist::ViewList;
