//! Subscribe/emit notification bus.
//!
//! Handlers run synchronously in subscription order. The handler list is
//! snapshotted before dispatch, so handlers may subscribe, unsubscribe or
//! emit again while an event is being delivered.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use bytes::Bytes;

use crate::attributes::AttrValue;

pub type ListenerId = u64;

type Handler<E> = Rc<dyn Fn(&E)>;

struct Table<E> {
    next_listener_id: ListenerId,
    listeners: BTreeMap<ListenerId, Handler<E>>,
}

pub struct Listeners<E> {
    inner: RefCell<Table<E>>,
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self {
            inner: RefCell::new(Table {
                next_listener_id: 1,
                listeners: BTreeMap::new(),
            }),
        }
    }
}

impl<E> Listeners<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&E) + 'static,
    {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_listener_id;
        inner.next_listener_id = inner.next_listener_id.saturating_add(1);
        inner.listeners.insert(id, Rc::new(listener));
        id
    }

    pub fn unsubscribe(&self, listener_id: ListenerId) -> bool {
        self.inner.borrow_mut().listeners.remove(&listener_id).is_some()
    }

    pub fn clear(&self) {
        self.inner.borrow_mut().listeners.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Handler<E>> = self.inner.borrow().listeners.values().cloned().collect();
        for listener in snapshot {
            listener(event);
        }
    }
}

/// Notifications published by a [`WidgetModel`](crate::model::WidgetModel).
#[derive(Debug, Clone)]
pub enum ModelEvent {
    /// `change:<name>`; `value` is the value assigned by the originating set.
    ChangeAttr { name: String, value: AttrValue },
    /// Aggregate `change`, fired after the per-attribute notifications.
    Change,
    /// A validated set was rejected.
    Invalid { error: String },
    /// The channel binding changed; not a change event.
    CommLiveUpdate { live: bool },
    /// The remote side closed the channel.
    CommClose,
    Destroy,
    /// `msg:custom`
    Custom {
        content: serde_json::Value,
        buffers: Vec<Bytes>,
    },
}

impl ModelEvent {
    /// Backbone-style event name, used in logs.
    pub fn name(&self) -> String {
        match self {
            ModelEvent::ChangeAttr { name, .. } => format!("change:{name}"),
            ModelEvent::Change => "change".to_owned(),
            ModelEvent::Invalid { .. } => "invalid".to_owned(),
            ModelEvent::CommLiveUpdate { .. } => "comm_live_update".to_owned(),
            ModelEvent::CommClose => "comm:close".to_owned(),
            ModelEvent::Destroy => "destroy".to_owned(),
            ModelEvent::Custom { .. } => "msg:custom".to_owned(),
        }
    }
}
