//! Synchronized widget model.
//!
//! A model mirrors one remote object: local sets accumulate into a diff that
//! [`WidgetModel::save_changes`] sends over the comm, at most one sync message
//! is in flight at a time, and inbound updates are applied under a state lock
//! so that they are not echoed back.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use bytes::Bytes;
use futures_util::future::{self, FutureExt, LocalBoxFuture};
use indexmap::{IndexMap, IndexSet};
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use widgets_util::{option_equal, put_buffers, remove_buffers, Reference, Value};

use crate::attributes::{AttrMap, AttrValue, Attributes, Notification, SetOptions, SetOutcome};
use crate::comm::{Comm, CommCallbacks, CommMessage, ExecutionState, MsgId, StatusMessage};
use crate::deferred::{peek_ok, Deferred};
use crate::error::{Result, WidgetError};
use crate::events::{ListenerId, Listeners, ModelEvent};
use crate::manager::{WeakManager, WidgetManager};
use crate::protocol::{model_ref, Method, StateData};
use crate::registry::ModelType;
use crate::view::{View, ViewOptions};

/// Serialized attributes: references replaced by their plain form.
pub type PlainState = widgets_util::Map;

type Job = LocalBoxFuture<'static, ()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMethod {
    /// Full state, sent when a widget is first created on this side.
    Create,
    /// Full state.
    Update,
    /// Only the attributes given in [`SyncOptions::attrs`].
    Patch,
}

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub attrs: Option<AttrMap>,
    pub drop_defaults: bool,
    pub callbacks: Option<CommCallbacks>,
}

pub struct ModelOptions {
    pub model_id: String,
    pub comm: Option<Rc<dyn Comm>>,
    pub manager: WeakManager,
    pub model_type: Rc<ModelType>,
}

/// Handle to a model. Clones share the same model.
#[derive(Clone)]
pub struct WidgetModel {
    inner: Rc<ModelInner>,
}

struct ModelInner {
    model_id: String,
    model_type: Rc<ModelType>,
    manager: WeakManager,
    listeners: Listeners<ModelEvent>,
    mailbox: RefCell<Option<mpsc::UnboundedSender<Job>>>,
    state: RefCell<SyncState>,
}

#[derive(Default)]
struct SyncState {
    attributes: Attributes,
    comm: Option<Rc<dyn Comm>>,
    closed: bool,
    state_lock: Option<AttrMap>,
    buffered_state_diff: AttrMap,
    /// Values flushed by `save_changes` while a set was still running.
    synced_in_cascade: Option<AttrMap>,
    msg_buffer: Option<PlainState>,
    msg_buffer_callbacks: Option<CommCallbacks>,
    pending_msgs: usize,
    expected_echo_msg_ids: HashMap<String, MsgId>,
    attrs_to_update: IndexSet<String>,
    views: IndexMap<String, Deferred<View>>,
}

impl fmt::Debug for WidgetModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WidgetModel")
            .field("model_id", &self.inner.model_id)
            .finish_non_exhaustive()
    }
}

impl Reference for WidgetModel {
    fn to_plain(&self) -> Value {
        Value::String(model_ref(&self.inner.model_id))
    }

    fn same_as(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl WidgetModel {
    /// Builds a model whose attributes are the type defaults overlaid with
    /// `attributes`, and binds the comm if one is given.
    pub fn new(attributes: AttrMap, options: ModelOptions) -> Self {
        let mut initial = options.model_type.defaults();
        initial.extend(attributes);
        let model = WidgetModel {
            inner: Rc::new(ModelInner {
                model_id: options.model_id,
                model_type: options.model_type,
                manager: options.manager,
                listeners: Listeners::new(),
                mailbox: RefCell::new(None),
                state: RefCell::new(SyncState {
                    attributes: Attributes::new(initial),
                    ..SyncState::default()
                }),
            }),
        };
        if let Some(comm) = options.comm {
            model.bind_comm(comm);
        }
        model
    }

    pub fn model_id(&self) -> &str {
        &self.inner.model_id
    }

    pub fn model_type(&self) -> &Rc<ModelType> {
        &self.inner.model_type
    }

    /// `_model_name`
    pub fn name(&self) -> String {
        self.get_str("_model_name")
    }

    /// `_model_module`
    pub fn module(&self) -> String {
        self.get_str("_model_module")
    }

    /// `_model_module_version`
    pub fn module_version(&self) -> String {
        self.get_str("_model_module_version")
    }

    pub fn manager(&self) -> Result<WidgetManager> {
        self.inner.manager.upgrade().ok_or(WidgetError::ManagerDropped)
    }

    pub fn comm(&self) -> Option<Rc<dyn Comm>> {
        self.inner.state.borrow().comm.clone()
    }

    pub fn comm_live(&self) -> bool {
        self.inner.state.borrow().comm.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.borrow().closed
    }

    pub fn pending_msgs(&self) -> usize {
        self.inner.state.borrow().pending_msgs
    }

    /// Attributes changed locally and not yet saved.
    pub fn buffered_state_diff(&self) -> AttrMap {
        self.inner.state.borrow().buffered_state_diff.clone()
    }

    /// The coalesced message held back while a sync is in flight.
    pub fn buffered_message(&self) -> Option<PlainState> {
        self.inner.state.borrow().msg_buffer.clone()
    }

    /// Id of the last sent message carrying `attr`, while its echo is outstanding.
    pub fn expected_echo(&self, attr: &str) -> Option<MsgId> {
        self.inner.state.borrow().expected_echo_msg_ids.get(attr).cloned()
    }

    pub fn get(&self, key: &str) -> Option<AttrValue> {
        self.inner.state.borrow().attributes.get(key).cloned()
    }

    fn get_str(&self, key: &str) -> String {
        self.get(key)
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_default()
    }

    pub fn previous(&self, key: &str) -> Option<AttrValue> {
        self.inner.state.borrow().attributes.previous(key).cloned()
    }

    pub fn has_changed(&self, key: &str) -> bool {
        self.inner.state.borrow().attributes.has_changed(key)
    }

    pub fn changed_attributes(&self) -> Option<AttrMap> {
        self.inner.state.borrow().attributes.changed_attributes()
    }

    // ---------------------------------------------------------------- events

    pub fn on<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ModelEvent) + 'static,
    {
        self.inner.listeners.subscribe(listener)
    }

    /// `change:<attr>`
    pub fn on_change<F>(&self, attr: &str, listener: F) -> ListenerId
    where
        F: Fn(&AttrValue) + 'static,
    {
        let attr = attr.to_owned();
        self.on(move |event| {
            if let ModelEvent::ChangeAttr { name, value } = event {
                if *name == attr {
                    listener(value);
                }
            }
        })
    }

    /// Runs `listener` on the aggregate change when any of `keys` changed.
    pub fn on_some_change<F>(&self, keys: &[&str], listener: F) -> ListenerId
    where
        F: Fn(&WidgetModel) + 'static,
    {
        let keys: Vec<String> = keys.iter().map(|k| (*k).to_owned()).collect();
        let weak = Rc::downgrade(&self.inner);
        self.on(move |event| {
            if !matches!(event, ModelEvent::Change) {
                return;
            }
            let Some(inner) = weak.upgrade() else { return };
            let model = WidgetModel { inner };
            if keys.iter().any(|key| model.has_changed(key)) {
                listener(&model);
            }
        })
    }

    pub fn off(&self, listener_id: ListenerId) -> bool {
        self.inner.listeners.unsubscribe(listener_id)
    }

    fn emit(&self, event: ModelEvent) {
        self.inner.listeners.emit(&event);
    }

    // ------------------------------------------------------------ mutation

    pub fn set(&self, key: &str, value: impl Into<AttrValue>) -> SetOutcome {
        let mut attrs = AttrMap::new();
        attrs.insert(key.to_owned(), value.into());
        self.set_attrs(attrs, SetOptions::default())
    }

    pub fn unset(&self, key: &str) -> SetOutcome {
        let mut attrs = AttrMap::new();
        attrs.insert(key.to_owned(), AttrValue::Null);
        self.set_attrs(
            attrs,
            SetOptions {
                unset: true,
                ..SetOptions::default()
            },
        )
    }

    /// Applies `attrs`, delivers notifications and records the resulting
    /// changes in the outbound diff.
    ///
    /// A call made from inside a listener applies immediately; its
    /// notifications are delivered by the outermost call after the ones
    /// already queued.
    pub fn set_attrs(&self, attrs: AttrMap, options: SetOptions) -> SetOutcome {
        if options.validate {
            let verdict = {
                let state = self.inner.state.borrow();
                let candidate = state.attributes.candidate(&attrs, options.unset);
                self.inner.model_type.validate(&candidate)
            };
            if let Err(error) = verdict {
                self.emit(ModelEvent::Invalid {
                    error: error.clone(),
                });
                return SetOutcome::Rejected { error };
            }
        }

        let (outermost, changes) = self.inner.state.borrow_mut().attributes.apply(attrs, options);
        if outermost {
            self.deliver_notifications();
            self.inner.state.borrow_mut().attributes.finish();
        }
        self.record_diff(outermost);
        SetOutcome::Applied { changes }
    }

    fn deliver_notifications(&self) {
        loop {
            let next = self.inner.state.borrow_mut().attributes.next_notification();
            match next {
                Some(Notification::Attr { name, value }) => {
                    self.emit(ModelEvent::ChangeAttr { name, value })
                }
                Some(Notification::Change) => self.emit(ModelEvent::Change),
                None => break,
            }
        }
    }

    fn record_diff(&self, outermost: bool) {
        let mut state = self.inner.state.borrow_mut();
        let state = &mut *state;
        if let Some(mut changed) = state.attributes.changed_attributes() {
            for skip in [&state.state_lock, &state.synced_in_cascade].into_iter().flatten() {
                changed.retain(|key, value| !option_equal(skip.get(key), Some(&*value)));
            }
            state.buffered_state_diff.extend(changed);
        }
        if outermost {
            state.synced_in_cascade = None;
        }
    }

    /// Applies state that came from the remote side without echoing it.
    pub fn set_state(&self, state: AttrMap) {
        self.inner.state.borrow_mut().state_lock = Some(state.clone());
        let _lock = StateLock(self);
        if let SetOutcome::Rejected { error } = self.set_attrs(state, SetOptions::default()) {
            tracing::warn!(model_id = %self.inner.model_id, %error, "could not set model state");
        }
    }

    /// Snapshot of the attributes; with `drop_defaults`, attributes equal to
    /// the type default are left out.
    pub fn get_state(&self, drop_defaults: bool) -> AttrMap {
        let all = self.inner.state.borrow().attributes.all().clone();
        if !drop_defaults {
            return all;
        }
        let defaults = self.inner.model_type.defaults();
        all.into_iter()
            .filter(|(key, value)| !option_equal(defaults.get(key), Some(value)))
            .collect()
    }

    /// Applies per-attribute serializers and converts references to their
    /// wire form.
    pub fn serialize(&self, state: &AttrMap) -> Result<PlainState> {
        let mut out = PlainState::with_capacity(state.len());
        for (attr, value) in state {
            let serialize = self
                .inner
                .model_type
                .serializer(attr)
                .and_then(|s| s.serialize.clone());
            let value = match serialize {
                Some(serialize) => serialize(value, self).map_err(|err| WidgetError::Serialize {
                    attr: attr.clone(),
                    reason: err.to_string(),
                })?,
                None => value.clone(),
            };
            out.insert(attr.clone(), value.to_plain());
        }
        Ok(out)
    }

    /// Sends the accumulated diff, if the comm is live.
    pub fn save_changes(&self, callbacks: Option<CommCallbacks>) {
        if !self.comm_live() {
            return;
        }
        let diff = {
            let mut state = self.inner.state.borrow_mut();
            let diff = std::mem::take(&mut state.buffered_state_diff);
            if state.attributes.is_changing() {
                state
                    .synced_in_cascade
                    .get_or_insert_with(AttrMap::new)
                    .extend(diff.clone());
            }
            diff
        };
        if !self.set_attrs(diff.clone(), SetOptions::validated()).is_applied() {
            return;
        }
        let options = SyncOptions {
            attrs: Some(diff),
            callbacks,
            ..SyncOptions::default()
        };
        if let Err(err) = self.sync(SyncMethod::Patch, options) {
            tracing::error!(model_id = %self.inner.model_id, error = %err, "could not save changes");
        }
    }

    /// Pushes state over the comm.
    ///
    /// While a previous sync is unacknowledged the payload is held back:
    /// patches merge into the held message, full syncs replace it.
    pub fn sync(&self, method: SyncMethod, options: SyncOptions) -> Result<()> {
        if !self.comm_live() {
            return Err(WidgetError::NoComm);
        }
        let mut attrs = match method {
            SyncMethod::Patch => options.attrs.unwrap_or_default(),
            SyncMethod::Create | SyncMethod::Update => self.get_state(options.drop_defaults),
        };
        {
            let mut state = self.inner.state.borrow_mut();
            if let Some(lock) = &state.state_lock {
                attrs.retain(|key, value| !option_equal(lock.get(key), Some(&*value)));
            }
        }

        let msg_state = self.serialize(&attrs)?;
        self.inner
            .state
            .borrow_mut()
            .attrs_to_update
            .extend(attrs.into_keys());
        if msg_state.is_empty() {
            return Ok(());
        }
        let callbacks = options.callbacks.unwrap_or_else(|| self.callbacks(None));

        let held = {
            let mut state = self.inner.state.borrow_mut();
            if state.pending_msgs >= 1 {
                if method == SyncMethod::Patch {
                    state
                        .msg_buffer
                        .get_or_insert_with(PlainState::new)
                        .extend(msg_state.clone());
                } else {
                    state.msg_buffer = Some(msg_state.clone());
                }
                state.msg_buffer_callbacks = Some(callbacks.clone());
                true
            } else {
                false
            }
        };
        if !held {
            let msg_id = self.send_sync_message(msg_state, callbacks);
            self.remember_last_update_for(msg_id);
        }
        Ok(())
    }

    fn remember_last_update_for(&self, msg_id: Option<MsgId>) {
        let mut state = self.inner.state.borrow_mut();
        let attrs = std::mem::take(&mut state.attrs_to_update);
        if let Some(msg_id) = msg_id {
            for attr in attrs {
                state.expected_echo_msg_ids.insert(attr, msg_id.clone());
            }
        }
    }

    /// Sends an `update` message. Returns the message id on success.
    fn send_sync_message(&self, state: PlainState, callbacks: CommCallbacks) -> Option<MsgId> {
        let comm = self.comm()?;
        let weak = Rc::downgrade(&self.inner);
        let user_status = callbacks.iopub_status.clone();
        let callbacks = CommCallbacks::on_status(move |status| {
            if let Some(inner) = weak.upgrade() {
                WidgetModel { inner }.handle_status(status);
            }
            if let Some(user_status) = &user_status {
                user_status(status);
            }
        });

        let split = remove_buffers(&Value::Object(state));
        let data = json!({
            "method": "update",
            "state": split.state,
            "buffer_paths": split.buffer_paths,
        });
        match comm.send(data, callbacks, json!({}), split.buffers) {
            Ok(msg_id) => {
                self.inner.state.borrow_mut().pending_msgs += 1;
                Some(msg_id)
            }
            Err(err) => {
                tracing::error!(model_id = %self.inner.model_id, error = %err, "could not send model state");
                None
            }
        }
    }

    /// Handles an iopub status for a sync message this model sent.
    pub fn handle_status(&self, status: &StatusMessage) {
        if status.execution_state != ExecutionState::Idle || !self.comm_live() {
            return;
        }
        let flush = {
            let mut state = self.inner.state.borrow_mut();
            if state.pending_msgs == 0 {
                tracing::error!(
                    model_id = %self.inner.model_id,
                    "pending message count went negative, resetting to 0"
                );
            } else {
                state.pending_msgs -= 1;
            }
            if state.pending_msgs < 1 {
                let callbacks = state.msg_buffer_callbacks.take().unwrap_or_default();
                state.msg_buffer.take().map(|buffer| (buffer, callbacks))
            } else {
                None
            }
        };
        if let Some((buffer, callbacks)) = flush {
            let msg_id = self.send_sync_message(buffer, callbacks);
            self.remember_last_update_for(msg_id);
        }
    }

    /// Sends a `custom` message.
    pub fn send(
        &self,
        content: serde_json::Value,
        callbacks: Option<CommCallbacks>,
        buffers: Vec<Bytes>,
    ) {
        let Some(comm) = self.comm() else { return };
        let data = json!({"method": "custom", "content": content});
        let callbacks = callbacks.unwrap_or_default();
        if let Err(err) = comm.send(data, callbacks, json!({}), buffers) {
            tracing::error!(model_id = %self.inner.model_id, error = %err, "could not send custom message");
        }
    }

    /// Callbacks for messages sent on behalf of `view`.
    pub fn callbacks(&self, view: Option<&View>) -> CommCallbacks {
        match self.manager() {
            Ok(manager) => manager.callbacks(view),
            Err(_) => CommCallbacks::default(),
        }
    }

    // -------------------------------------------------------- inbound side

    fn bind_comm(&self, comm: Rc<dyn Comm>) {
        let weak: Weak<ModelInner> = Rc::downgrade(&self.inner);
        let on_msg = weak.clone();
        comm.on_msg(Box::new(move |msg| {
            if let Some(inner) = on_msg.upgrade() {
                drop(WidgetModel { inner }.handle_comm_msg(msg));
            }
        }));
        comm.on_close(Box::new(move |msg| {
            if let Some(inner) = weak.upgrade() {
                WidgetModel { inner }.handle_comm_closed(msg);
            }
        }));
        self.inner.state.borrow_mut().comm = Some(comm);
        self.emit(ModelEvent::CommLiveUpdate { live: true });
    }

    /// Dispatches an inbound comm message.
    ///
    /// State updates go through the model's mailbox; the returned future
    /// resolves once this message has been processed. The work happens
    /// whether or not the future is awaited.
    pub fn handle_comm_msg(&self, msg: CommMessage) -> LocalBoxFuture<'static, ()> {
        match msg.method().and_then(Method::parse) {
            Some(method @ (Method::Update | Method::EchoUpdate)) => {
                let model = self.clone();
                let done = self.enqueue(
                    async move {
                        let echo = method == Method::EchoUpdate;
                        if let Err(err) = model.apply_update(msg, echo).await {
                            tracing::error!(
                                model_id = %model.inner.model_id,
                                error = %err,
                                "could not process update msg"
                            );
                        }
                    }
                    .boxed_local(),
                );
                async move {
                    let _ = done.await;
                }
                .boxed_local()
            }
            Some(Method::Custom) => {
                let content = msg.content.data.get("content").cloned().unwrap_or_default();
                self.emit(ModelEvent::Custom {
                    content,
                    buffers: msg.buffers,
                });
                future::ready(()).boxed_local()
            }
            _ => {
                tracing::debug!(model_id = %self.inner.model_id, method = ?msg.method(), "ignoring comm message");
                future::ready(()).boxed_local()
            }
        }
    }

    async fn apply_update(&self, msg: CommMessage, echo: bool) -> Result<()> {
        let parent = msg.parent_msg_id().map(str::to_owned);
        let data: StateData = serde_json::from_value(msg.content.data)?;
        let mut tree = AttrValue::from(serde_json::Value::Object(data.state));
        put_buffers(&mut tree, &data.buffer_paths, &msg.buffers)?;
        let Value::Object(mut state) = tree else {
            return Err(WidgetError::Message("update state is not an object".to_owned()));
        };

        // An echo without a parent id matches no outstanding message.
        if echo {
            self.drop_stale_echoes(&mut state, parent.as_deref().unwrap_or_default());
        }

        let manager = self.manager()?;
        let attrs = self.inner.model_type.deserialize_state(state, &manager).await?;
        self.set_state(attrs);
        Ok(())
    }

    /// Filters an echo of message `msg_id`.
    ///
    /// An attribute whose last sent value has not been echoed yet only
    /// accepts the echo of that message, and even then a newer local value
    /// waiting in the throttle buffer wins.
    fn drop_stale_echoes(&self, state: &mut AttrMap, msg_id: &str) {
        let mut sync = self.inner.state.borrow_mut();
        let sync = &mut *sync;
        state.retain(|attr, _| {
            let matches = sync.expected_echo_msg_ids.get(attr).map(|expected| expected == msg_id);
            match matches {
                None => true,
                Some(false) => {
                    tracing::debug!(model_id = %self.inner.model_id, attr = %attr, "dropping stale echo");
                    false
                }
                Some(true) => {
                    sync.expected_echo_msg_ids.remove(attr);
                    !sync
                        .msg_buffer
                        .as_ref()
                        .is_some_and(|buffer| buffer.contains_key(attr))
                }
            }
        });
    }

    fn handle_comm_closed(&self, _msg: CommMessage) {
        self.emit(ModelEvent::CommClose);
        drop(self.close(true));
    }

    /// Tears the model down: closes the comm (unless it is already closed),
    /// emits `destroy`, detaches listeners and removes every view.
    ///
    /// Idempotent. Views that are already rendered are removed before this
    /// returns; the future resolves once the rest are removed too.
    pub fn close(&self, comm_closed: bool) -> LocalBoxFuture<'static, ()> {
        let (comm, views) = {
            let mut state = self.inner.state.borrow_mut();
            if state.closed {
                return future::ready(()).boxed_local();
            }
            state.closed = true;
            (state.comm.clone(), std::mem::take(&mut state.views))
        };

        if let (Some(comm), false) = (&comm, comm_closed) {
            if let Err(err) = comm.close(json!({}), CommCallbacks::default(), json!({}), Vec::new()) {
                tracing::error!(model_id = %self.inner.model_id, error = %err, "could not close comm");
            }
        }
        self.emit(ModelEvent::Destroy);
        self.inner.state.borrow_mut().comm = None;
        if comm.is_some() {
            self.emit(ModelEvent::CommLiveUpdate { live: false });
        }
        self.inner.listeners.clear();

        let mut pending = Vec::new();
        for (_, view) in views {
            match peek_ok(&view) {
                Some(view) => view.remove(),
                None => pending.push(view),
            }
        }
        if pending.is_empty() {
            return future::ready(()).boxed_local();
        }
        let removal = tokio::task::spawn_local(async move {
            for view in future::join_all(pending).await.into_iter().flatten() {
                view.remove();
            }
        });
        async move {
            let _ = removal.await;
        }
        .boxed_local()
    }

    // -------------------------------------------------------------- mailbox

    /// Queues `job` behind everything already in the mailbox.
    pub(crate) fn enqueue<T: 'static>(&self, job: LocalBoxFuture<'static, T>) -> oneshot::Receiver<T> {
        let (tx, rx) = oneshot::channel();
        let wrapped = async move {
            let _ = tx.send(job.await);
        }
        .boxed_local();
        if self.mailbox().send(wrapped).is_err() {
            tracing::error!(model_id = %self.inner.model_id, "model mailbox is gone");
        }
        rx
    }

    fn mailbox(&self) -> mpsc::UnboundedSender<Job> {
        let mut slot = self.inner.mailbox.borrow_mut();
        if let Some(tx) = slot.as_ref() {
            return tx.clone();
        }
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let model_id = self.inner.model_id.clone();
        tokio::task::spawn_local(async move {
            while let Some(job) = rx.recv().await {
                job.await;
            }
            tracing::debug!(model_id = %model_id, "model mailbox closed");
        });
        *slot = Some(tx.clone());
        tx
    }

    /// Resolves once every state change queued before this call is applied.
    pub async fn state_change(&self) {
        let _ = self.enqueue(future::ready(()).boxed_local()).await;
    }

    // ---------------------------------------------------------------- views

    pub(crate) fn register_view(&self, view_id: String, view: Deferred<View>) {
        self.inner.state.borrow_mut().views.insert(view_id, view);
    }

    pub(crate) fn unregister_view(&self, view_id: &str) {
        self.inner.state.borrow_mut().views.shift_remove(view_id);
    }

    pub fn views(&self) -> Vec<(String, Deferred<View>)> {
        self.inner
            .state
            .borrow()
            .views
            .iter()
            .map(|(id, view)| (id.clone(), view.clone()))
            .collect()
    }

    /// Options of the live views that have no parent view.
    pub async fn root_view_options(&self) -> Vec<ViewOptions> {
        let views: Vec<Deferred<View>> = self.views().into_iter().map(|(_, view)| view).collect();
        future::join_all(views)
            .await
            .into_iter()
            .flatten()
            .filter(|view| !view.is_removed() && view.options().parent.is_none())
            .map(|view| view.options().clone())
            .collect()
    }
}

struct StateLock<'a>(&'a WidgetModel);

impl Drop for StateLock<'_> {
    fn drop(&mut self) {
        self.0.inner.state.borrow_mut().state_lock = None;
    }
}
