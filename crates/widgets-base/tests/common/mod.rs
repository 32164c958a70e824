//! In-memory comm and backend shared by the integration tests.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::{self, FutureExt, LocalBoxFuture};
use serde_json::json;
use tokio::task::LocalSet;
use tracing_subscriber::layer::SubscriberExt;
use widgets_base::comm::{MsgHandler, StatusCallback};
use widgets_base::manager::ManagerBackend;
use widgets_base::{
    model_references, AttrMap, AttrValue, Comm, CommCallbacks, CommError, CommMessage, ModelType,
    Registry, View, ViewFactory, ViewOptions, WidgetError, WidgetManager, WidgetModel, WidgetView,
    PROTOCOL_VERSION,
};

pub const TEST_MODULE: &str = "test-widgets";
pub const TEST_MODEL: &str = "TestModel";
pub const BOX_MODEL: &str = "BoxModel";
pub const TEST_VIEW: &str = "TestView";
pub const BROKEN_VIEW: &str = "BrokenView";
pub const VERSION: &str = "1.0.0";

pub async fn local<F: Future>(fut: F) -> F::Output {
    LocalSet::new().run_until(fut).await
}

pub fn attrs(value: serde_json::Value) -> AttrMap {
    match AttrValue::from(value) {
        AttrValue::Object(map) => map,
        _ => AttrMap::new(),
    }
}

// ------------------------------------------------------------------- comm

#[derive(Debug, Clone)]
pub struct Sent {
    pub msg_id: String,
    pub data: serde_json::Value,
    pub buffers: Vec<Bytes>,
}

pub struct TestComm {
    comm_id: String,
    pub open_data: Option<serde_json::Value>,
    pub open_metadata: Option<serde_json::Value>,
    sent: RefCell<Vec<Sent>>,
    status: RefCell<VecDeque<StatusCallback>>,
    on_msg: RefCell<Option<MsgHandler>>,
    on_close: RefCell<Option<MsgHandler>>,
    next_msg: Cell<u32>,
    fail_sends: Cell<bool>,
    closes: Cell<usize>,
}

impl TestComm {
    pub fn new(comm_id: &str) -> Rc<Self> {
        Self::opened(comm_id, None, None)
    }

    pub fn opened(
        comm_id: &str,
        open_data: Option<serde_json::Value>,
        open_metadata: Option<serde_json::Value>,
    ) -> Rc<Self> {
        Rc::new(Self {
            comm_id: comm_id.to_owned(),
            open_data,
            open_metadata,
            sent: RefCell::new(Vec::new()),
            status: RefCell::new(VecDeque::new()),
            on_msg: RefCell::new(None),
            on_close: RefCell::new(None),
            next_msg: Cell::new(0),
            fail_sends: Cell::new(false),
            closes: Cell::new(0),
        })
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.borrow().clone()
    }

    /// `state` of every `update` message sent so far.
    pub fn updates(&self) -> Vec<serde_json::Value> {
        self.sent
            .borrow()
            .iter()
            .filter(|s| s.data["method"] == "update")
            .map(|s| s.data["state"].clone())
            .collect()
    }

    pub fn last_msg_id(&self) -> String {
        self.sent.borrow().last().map(|s| s.msg_id.clone()).unwrap_or_default()
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.set(fail);
    }

    pub fn close_count(&self) -> usize {
        self.closes.get()
    }

    /// Delivers an `idle` status for the oldest unacknowledged message.
    pub fn ack(&self) -> bool {
        let callback = self.status.borrow_mut().pop_front();
        match callback {
            Some(callback) => {
                callback(&widgets_base::StatusMessage::idle());
                true
            }
            None => false,
        }
    }

    /// Delivers a message from the kernel.
    pub fn deliver(&self, msg: CommMessage) {
        if let Some(handler) = self.on_msg.borrow().as_ref() {
            handler(msg);
        }
    }

    /// The kernel closes the comm.
    pub fn kernel_close(&self) {
        if let Some(handler) = self.on_close.borrow().as_ref() {
            handler(CommMessage::new(self.comm_id.clone(), json!({})));
        }
    }
}

impl Comm for TestComm {
    fn comm_id(&self) -> &str {
        &self.comm_id
    }

    fn target_name(&self) -> &str {
        "jupyter.widget"
    }

    fn send(
        &self,
        data: serde_json::Value,
        callbacks: CommCallbacks,
        _metadata: serde_json::Value,
        buffers: Vec<Bytes>,
    ) -> Result<String, CommError> {
        if self.closes.get() > 0 {
            return Err(CommError::Closed);
        }
        if self.fail_sends.get() {
            return Err(CommError::SendFailed("wire unplugged".into()));
        }
        let n = self.next_msg.get() + 1;
        self.next_msg.set(n);
        let msg_id = format!("{}-msg-{n}", self.comm_id);
        self.sent.borrow_mut().push(Sent {
            msg_id: msg_id.clone(),
            data,
            buffers,
        });
        if let Some(status) = callbacks.iopub_status {
            self.status.borrow_mut().push_back(status);
        }
        Ok(msg_id)
    }

    fn close(
        &self,
        _data: serde_json::Value,
        _callbacks: CommCallbacks,
        _metadata: serde_json::Value,
        _buffers: Vec<Bytes>,
    ) -> Result<String, CommError> {
        self.closes.set(self.closes.get() + 1);
        Ok(format!("{}-close", self.comm_id))
    }

    fn on_msg(&self, handler: MsgHandler) {
        *self.on_msg.borrow_mut() = Some(handler);
    }

    fn on_close(&self, handler: MsgHandler) {
        *self.on_close.borrow_mut() = Some(handler);
    }
}

pub fn update_msg(comm_id: &str, state: serde_json::Value) -> CommMessage {
    CommMessage::new(comm_id, json!({"method": "update", "state": state, "buffer_paths": []}))
}

pub fn echo_msg(comm_id: &str, parent: &str, state: serde_json::Value) -> CommMessage {
    CommMessage::new(
        comm_id,
        json!({"method": "echo_update", "state": state, "buffer_paths": []}),
    )
    .with_parent(parent)
}

// ---------------------------------------------------------------- backend

#[derive(Default)]
pub struct TestBackend {
    pub comms: RefCell<Vec<Rc<TestComm>>>,
    pub live: RefCell<Vec<String>>,
    pub fail_create: Cell<bool>,
    pub fail_info: Cell<bool>,
    pub displayed: RefCell<Vec<String>>,
}

impl TestBackend {
    pub fn comm(&self, comm_id: &str) -> Option<Rc<TestComm>> {
        self.comms
            .borrow()
            .iter()
            .find(|c| c.comm_id() == comm_id)
            .cloned()
    }
}

#[async_trait(?Send)]
impl ManagerBackend for TestBackend {
    async fn create_comm(
        &self,
        _target_name: &str,
        model_id: Option<&str>,
        data: Option<serde_json::Value>,
        metadata: Option<serde_json::Value>,
        _buffers: Vec<Bytes>,
    ) -> Result<Rc<dyn Comm>, CommError> {
        if self.fail_create.get() {
            return Err(CommError::CreateFailed("no kernel".into()));
        }
        let comm_id = model_id
            .map(str::to_owned)
            .unwrap_or_else(widgets_util::uuid);
        let comm = TestComm::opened(&comm_id, data, metadata);
        self.comms.borrow_mut().push(comm.clone());
        Ok(comm as Rc<dyn Comm>)
    }

    async fn get_comm_info(&self) -> Result<Vec<String>, CommError> {
        if self.fail_info.get() {
            return Err(CommError::InfoFailed("kernel busy".into()));
        }
        Ok(self.live.borrow().clone())
    }

    async fn display_view(&self, view: &View) -> widgets_base::Result<()> {
        self.displayed.borrow_mut().push(view.id().to_owned());
        Ok(())
    }
}

// ------------------------------------------------------------------ views

#[derive(Default)]
pub struct Recorder {
    pub renders: Cell<usize>,
    pub removes: Cell<usize>,
    /// `value` of the model at the time each view was built.
    pub seen_values: RefCell<Vec<AttrValue>>,
}

struct TestView {
    recorder: Rc<Recorder>,
    fail: bool,
}

impl WidgetView for TestView {
    fn render(&self, _view: &View) -> LocalBoxFuture<'static, widgets_base::Result<()>> {
        self.recorder.renders.set(self.recorder.renders.get() + 1);
        let result = if self.fail {
            Err(WidgetError::Render("canvas unavailable".into()))
        } else {
            Ok(())
        };
        future::ready(result).boxed_local()
    }

    fn remove(&self) {
        self.recorder.removes.set(self.recorder.removes.get() + 1);
    }
}

fn view_factory(recorder: Rc<Recorder>, fail: bool) -> ViewFactory {
    Rc::new(move |model: &WidgetModel, _options: &ViewOptions| -> widgets_base::Result<Rc<dyn WidgetView>> {
        recorder
            .seen_values
            .borrow_mut()
            .push(model.get("value").unwrap_or_default());
        let view: Rc<dyn WidgetView> = Rc::new(TestView {
            recorder: recorder.clone(),
            fail,
        });
        Ok(view)
    })
}

// ---------------------------------------------------------------- fixture

pub fn test_model_type() -> ModelType {
    ModelType::new(TEST_MODULE, TEST_MODEL, VERSION)
        .with_view(TEST_MODULE, TEST_VIEW, VERSION)
        .with_defaults(attrs(json!({"value": 0, "description": ""})))
}

pub fn box_model_type() -> ModelType {
    ModelType::new(TEST_MODULE, BOX_MODEL, VERSION)
        .with_view(TEST_MODULE, TEST_VIEW, VERSION)
        .with_defaults(attrs(json!({"children": []})))
        .with_serializer("children", model_references())
}

pub struct Fixture {
    pub manager: WidgetManager,
    pub backend: Rc<TestBackend>,
    pub recorder: Rc<Recorder>,
}

pub fn fixture() -> Fixture {
    fixture_with(|_| {})
}

/// Like [`fixture`], with extra registrations applied on top.
pub fn fixture_with(extra: impl FnOnce(&mut Registry)) -> Fixture {
    let recorder = Rc::new(Recorder::default());
    let mut registry = Registry::with_base();
    registry.register_model(TEST_MODULE, TEST_MODEL, test_model_type());
    registry.register_model(TEST_MODULE, BOX_MODEL, box_model_type());
    registry.register_view(TEST_MODULE, TEST_VIEW, view_factory(recorder.clone(), false));
    registry.register_view(TEST_MODULE, BROKEN_VIEW, view_factory(recorder.clone(), true));
    extra(&mut registry);

    let backend = Rc::new(TestBackend::default());
    let manager = WidgetManager::new(registry, backend.clone());
    Fixture {
        manager,
        backend,
        recorder,
    }
}

/// Comm-open payload for a model of class `model_name` with extra `state`.
pub fn open_msg(comm_id: &str, model_name: &str, state: serde_json::Value) -> CommMessage {
    let mut full = json!({
        "_model_module": TEST_MODULE,
        "_model_module_version": VERSION,
        "_model_name": model_name,
    });
    if let (Some(full), Some(extra)) = (full.as_object_mut(), state.as_object()) {
        for (key, value) in extra {
            full.insert(key.clone(), value.clone());
        }
    }
    CommMessage::new(comm_id, json!({"state": full, "buffer_paths": []}))
        .with_metadata(json!({"version": PROTOCOL_VERSION}))
}

/// Opens a `TestModel` the way the kernel would.
pub async fn open_model(fx: &Fixture, comm_id: &str, state: serde_json::Value) -> (WidgetModel, Rc<TestComm>) {
    open_model_of(fx, comm_id, TEST_MODEL, state).await
}

pub async fn open_model_of(
    fx: &Fixture,
    comm_id: &str,
    model_name: &str,
    state: serde_json::Value,
) -> (WidgetModel, Rc<TestComm>) {
    let comm = TestComm::new(comm_id);
    let msg = open_msg(comm_id, model_name, state);
    let model = fx
        .manager
        .handle_comm_open(comm.clone(), msg)
        .await
        .expect("comm open should create a model");
    (model, comm)
}

// ------------------------------------------------------------------- logs

#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: tracing::Level,
    pub message: String,
    pub fields: Vec<(String, String)>,
}

struct FieldVisitor(Vec<(String, String)>);

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0.push((field.name().to_string(), format!("{value:?}")));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0.push((field.name().to_string(), value.to_string()));
    }
}

struct EventCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for EventCapture {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut visitor = FieldVisitor(Vec::new());
        event.record(&mut visitor);
        let message = visitor
            .0
            .iter()
            .find(|(k, _)| k == "message")
            .map(|(_, v)| v.clone())
            .unwrap_or_default();
        self.events.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            message,
            fields: visitor.0,
        });
    }
}

/// Events logged on this thread while the guard is alive, including those
/// from local tasks.
pub struct LogCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
    _guard: tracing::subscriber::DefaultGuard,
}

impl LogCapture {
    pub fn start() -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::registry()
            .with(tracing_subscriber::filter::LevelFilter::TRACE)
            .with(EventCapture {
                events: events.clone(),
            });
        let guard = tracing::subscriber::set_default(subscriber);
        Self {
            events,
            _guard: guard,
        }
    }

    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn contains(&self, level: tracing::Level, message: &str) -> bool {
        self.events()
            .iter()
            .any(|e| e.level == level && e.message.contains(message))
    }
}
