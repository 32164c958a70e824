//! Model registry and lifecycle: creation from comms and snapshots, view
//! creation and whole-state save/restore.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::{self, FutureExt};
use serde_json::json;
use widgets_util::{put_buffers, remove_buffers, uuid, BufferEncoding, BufferError, BufferPath, Value};

use crate::attributes::{AttrMap, AttrValue};
use crate::comm::{Comm, CommCallbacks, CommMessage};
use crate::deferred::{from_receiver, peek_ok, settled, spawn_deferred, Deferred};
use crate::error::{CommError, Result, WidgetError};
use crate::events::ModelEvent;
use crate::model::{ModelOptions, SyncMethod, SyncOptions, WidgetModel};
use crate::protocol::{StateData, COMM_TARGET_NAME, PROTOCOL_MAJOR_VERSION, PROTOCOL_VERSION, STATE_VERSION_MAJOR};
use crate::registry::{ModelType, Registry};
use crate::snapshot::{ManagerState, ModelSnapshot, SnapshotBuffer, StateOptions};
use crate::view::{View, ViewFactory, ViewOptions};

/// Host environment of a manager: where comms come from and where views go.
#[async_trait(?Send)]
pub trait ManagerBackend {
    fn comm_target_name(&self) -> &str {
        COMM_TARGET_NAME
    }

    /// Opens a comm to the kernel. `model_id`, when given, becomes the comm id.
    async fn create_comm(
        &self,
        target_name: &str,
        model_id: Option<&str>,
        data: Option<serde_json::Value>,
        metadata: Option<serde_json::Value>,
        buffers: Vec<Bytes>,
    ) -> std::result::Result<Rc<dyn Comm>, CommError>;

    /// Ids of the comms currently open on the kernel side.
    async fn get_comm_info(&self) -> std::result::Result<Vec<String>, CommError>;

    /// Attaches a created view to the host display.
    async fn display_view(&self, view: &View) -> Result<()> {
        let _ = view;
        Ok(())
    }

    /// Callbacks attached to messages sent on behalf of `view`.
    fn callbacks(&self, view: Option<&View>) -> CommCallbacks {
        let _ = view;
        CommCallbacks::default()
    }
}

/// What to create: the model class and, for `new_widget`, the view class.
#[derive(Clone, Default)]
pub struct ModelCreateOptions {
    pub model_name: String,
    pub model_module: String,
    pub model_module_version: String,
    pub view_name: Option<String>,
    pub view_module: Option<String>,
    pub view_module_version: Option<String>,
    pub model_id: Option<String>,
    pub comm: Option<Rc<dyn Comm>>,
}

impl fmt::Debug for ModelCreateOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelCreateOptions")
            .field("model_name", &self.model_name)
            .field("model_module", &self.model_module)
            .field("model_module_version", &self.model_module_version)
            .field("view_name", &self.view_name)
            .field("view_module", &self.view_module)
            .field("view_module_version", &self.view_module_version)
            .field("model_id", &self.model_id)
            .field("comm", &self.comm.as_ref().map(|c| c.comm_id().to_owned()))
            .finish()
    }
}

impl ModelCreateOptions {
    pub fn new(model_module: &str, model_name: &str, model_module_version: &str) -> Self {
        Self {
            model_name: model_name.to_owned(),
            model_module: model_module.to_owned(),
            model_module_version: model_module_version.to_owned(),
            ..Self::default()
        }
    }

    pub fn with_view(mut self, view_module: &str, view_name: &str, view_module_version: &str) -> Self {
        self.view_module = Some(view_module.to_owned());
        self.view_name = Some(view_name.to_owned());
        self.view_module_version = Some(view_module_version.to_owned());
        self
    }

    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    pub fn with_comm(mut self, comm: Rc<dyn Comm>) -> Self {
        self.comm = Some(comm);
        self
    }
}

/// Handle to a manager. Clones share the same registry of models.
#[derive(Clone)]
pub struct WidgetManager {
    inner: Rc<ManagerInner>,
}

pub(crate) struct ManagerInner {
    registry: RefCell<Registry>,
    backend: Rc<dyn ManagerBackend>,
    models: RefCell<HashMap<String, Deferred<WidgetModel>>>,
}

/// Non-owning manager handle held by models.
#[derive(Clone, Default)]
pub struct WeakManager(Weak<ManagerInner>);

impl WeakManager {
    pub fn upgrade(&self) -> Option<WidgetManager> {
        self.0.upgrade().map(|inner| WidgetManager { inner })
    }
}

/// A decoded snapshot entry waiting to be turned into a model.
struct Restore {
    model_id: String,
    options: ModelCreateOptions,
    attrs: AttrMap,
    views: Vec<ViewOptions>,
}

impl WidgetManager {
    pub fn new(registry: Registry, backend: Rc<dyn ManagerBackend>) -> Self {
        Self {
            inner: Rc::new(ManagerInner {
                registry: RefCell::new(registry),
                backend,
                models: RefCell::new(HashMap::new()),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakManager {
        WeakManager(Rc::downgrade(&self.inner))
    }

    pub fn register_model_type(&self, module: &str, name: &str, model_type: ModelType) {
        self.inner
            .registry
            .borrow_mut()
            .register_model(module, name, model_type);
    }

    pub fn register_view_type(&self, module: &str, name: &str, factory: ViewFactory) {
        self.inner.registry.borrow_mut().register_view(module, name, factory);
    }

    pub fn callbacks(&self, view: Option<&View>) -> CommCallbacks {
        self.inner.backend.callbacks(view)
    }

    // --------------------------------------------------------------- lookup

    /// The registered (possibly still constructing) model for `model_id`.
    pub fn get_model(&self, model_id: &str) -> Option<Deferred<WidgetModel>> {
        self.inner.models.borrow().get(model_id).cloned()
    }

    pub fn has_model(&self, model_id: &str) -> bool {
        self.inner.models.borrow().contains_key(model_id)
    }

    /// Waits for `model_id`; a failed construction counts as not found.
    pub async fn resolve_model(&self, model_id: &str) -> Result<WidgetModel> {
        let not_found = || WidgetError::ModelNotFound(model_id.to_owned());
        let deferred = self.get_model(model_id).ok_or_else(not_found)?;
        deferred.await.map_err(|_| not_found())
    }

    pub fn model_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.models.borrow().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Models whose construction has already finished, ordered by id.
    pub fn resolved_models(&self) -> Vec<WidgetModel> {
        let mut models: Vec<WidgetModel> = self
            .inner
            .models
            .borrow()
            .values()
            .filter_map(peek_ok)
            .collect();
        models.sort_by(|a, b| a.model_id().cmp(b.model_id()));
        models
    }

    // ------------------------------------------------------------- creation

    /// Creates and registers a model from serialized state.
    ///
    /// The id is `options.model_id`, else the comm id. The placeholder is
    /// registered before this returns, so lookups made while the model is
    /// still being built wait for it, and a second request for the same id
    /// gets the same model.
    pub fn new_model(&self, options: ModelCreateOptions, serialized_state: AttrMap) -> Deferred<WidgetModel> {
        let model_id = options
            .model_id
            .clone()
            .or_else(|| options.comm.as_ref().map(|comm| comm.comm_id().to_owned()));
        let Some(model_id) = model_id else {
            return settled(Err(WidgetError::ModelConstruction {
                model_id: String::new(),
                reason: "neither comm nor model_id provided in options object".to_owned(),
            }));
        };
        if let Some(existing) = self.get_model(&model_id) {
            return existing;
        }

        let manager = self.clone();
        let id = model_id.clone();
        let deferred = spawn_deferred(async move {
            let result = manager.make_model(id.clone(), options, serialized_state).await;
            manager.settle_placeholder(&id, result)
        });
        self.inner.models.borrow_mut().insert(model_id, deferred.clone());
        deferred
    }

    async fn make_model(
        &self,
        model_id: String,
        options: ModelCreateOptions,
        serialized_state: AttrMap,
    ) -> Result<WidgetModel> {
        let model_type = self
            .inner
            .registry
            .borrow()
            .resolve_model(&options.model_module, &options.model_name)?;
        let attributes = model_type.deserialize_state(serialized_state, self).await?;
        let model = WidgetModel::new(
            attributes,
            ModelOptions {
                model_id: model_id.clone(),
                comm: options.comm,
                manager: self.downgrade(),
                model_type,
            },
        );

        let manager = self.downgrade();
        model.on(move |event| {
            if matches!(event, ModelEvent::CommClose) {
                if let Some(manager) = manager.upgrade() {
                    manager.inner.models.borrow_mut().remove(&model_id);
                }
            }
        });
        Ok(model)
    }

    fn settle_placeholder(&self, model_id: &str, result: Result<WidgetModel>) -> Result<WidgetModel> {
        result.map_err(|err| {
            self.inner.models.borrow_mut().remove(model_id);
            tracing::error!(model_id = %model_id, error = %err, "could not create model");
            match err {
                WidgetError::ModelConstruction { .. } => err,
                other => WidgetError::ModelConstruction {
                    model_id: model_id.to_owned(),
                    reason: other.to_string(),
                },
            }
        })
    }

    /// Creates a model for a widget that originates on this side, opening a
    /// comm for it and sending its full state.
    ///
    /// When no comm can be opened the model is still created, without one.
    pub async fn new_widget(
        &self,
        options: ModelCreateOptions,
        serialized_state: AttrMap,
    ) -> Result<WidgetModel> {
        let (Some(view_name), Some(view_module), Some(view_module_version)) = (
            options.view_name.as_deref(),
            options.view_module.as_deref(),
            options.view_module_version.as_deref(),
        ) else {
            return Err(WidgetError::MissingViewInfo);
        };
        let data = json!({
            "state": {
                "_model_module": options.model_module,
                "_model_module_version": options.model_module_version,
                "_model_name": options.model_name,
                "_view_module": view_module,
                "_view_module_version": view_module_version,
                "_view_name": view_name,
            },
            "buffer_paths": [],
        });

        let mut options = options;
        let comm = match options.comm.clone() {
            Some(comm) => Ok(comm),
            None => {
                let backend = &self.inner.backend;
                backend
                    .create_comm(
                        backend.comm_target_name(),
                        options.model_id.as_deref(),
                        Some(data),
                        Some(json!({ "version": PROTOCOL_VERSION })),
                        Vec::new(),
                    )
                    .await
            }
        };

        match comm {
            Ok(comm) => {
                options.comm = Some(comm);
                let model = self.new_model(options, serialized_state).await?;
                model.sync(SyncMethod::Create, SyncOptions::default())?;
                Ok(model)
            }
            Err(err) => {
                tracing::warn!(error = %err, "could not create a comm, the widget will not sync");
                if options.model_id.is_none() {
                    options.model_id = Some(uuid());
                }
                self.new_model(options, serialized_state).await
            }
        }
    }

    /// Handles a comm opened by the kernel on the widget target.
    pub async fn handle_comm_open(&self, comm: Rc<dyn Comm>, msg: CommMessage) -> Result<WidgetModel> {
        let version = msg
            .metadata
            .get("version")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        if version.split('.').next() != Some(PROTOCOL_MAJOR_VERSION) {
            return Err(WidgetError::ProtocolVersionMismatch {
                received: version.to_owned(),
                expected: PROTOCOL_MAJOR_VERSION,
            });
        }

        let data: StateData = serde_json::from_value(msg.content.data)?;
        let mut tree = AttrValue::from(serde_json::Value::Object(data.state));
        put_buffers(&mut tree, &data.buffer_paths, &msg.buffers)?;
        let Value::Object(state) = tree else {
            return Err(WidgetError::Message("comm open state is not an object".to_owned()));
        };

        let text = |key: &str| {
            state
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_owned()
        };
        let options = ModelCreateOptions {
            model_name: text("_model_name"),
            model_module: text("_model_module"),
            model_module_version: text("_model_module_version"),
            comm: Some(comm),
            ..ModelCreateOptions::default()
        };
        self.new_model(options, state).await
    }

    // ---------------------------------------------------------------- views

    /// Creates a view of `model`.
    ///
    /// Creation is queued behind the model's pending state updates. The view
    /// is registered with the model right away and deregistered when it is
    /// removed.
    pub fn create_view(&self, model: &WidgetModel, options: ViewOptions) -> Deferred<View> {
        if model.is_closed() {
            return settled(Err(WidgetError::ModelClosed(model.model_id().to_owned())));
        }
        let view_id = uuid();
        let manager = self.clone();
        let target = model.clone();
        let id = view_id.clone();
        let done = model.enqueue(async move { manager.build_view(&target, id, options).await }.boxed_local());
        let view = from_receiver(done);
        model.register_view(view_id, view.clone());
        view
    }

    async fn build_view(&self, model: &WidgetModel, view_id: String, options: ViewOptions) -> Result<View> {
        let view_name = model
            .get("_view_name")
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_default();
        let view_module = model
            .get("_view_module")
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_default();

        let result = async {
            let factory = self.inner.registry.borrow().resolve_view(&view_module, &view_name)?;
            let renderer = factory(model, &options)?;
            let view = View::new(view_id, model.clone(), options, renderer);
            if let Err(err) = view.render().await {
                view.remove();
                return Err(err);
            }
            let owner = model.clone();
            view.on_remove(move |view| owner.unregister_view(view.id()));
            Ok::<_, WidgetError>(view)
        }
        .await;

        result.map_err(|err| {
            let err = WidgetError::ViewCreation {
                model_id: model.model_id().to_owned(),
                view_name,
                view_module,
                reason: err.to_string(),
            };
            tracing::error!(model_id = %model.model_id(), error = %err, "could not create view");
            err
        })
    }

    /// Creates a view and hands it to the backend for display.
    pub async fn display_model(&self, model: &WidgetModel, options: ViewOptions) -> Result<View> {
        let view = self.create_view(model, options).await?;
        self.inner.backend.display_view(&view).await?;
        Ok(view)
    }

    // ---------------------------------------------------------------- state

    /// Snapshot of every registered model.
    pub async fn get_state(&self, options: StateOptions) -> Result<ManagerState> {
        let entries: Vec<(String, Deferred<WidgetModel>)> = self
            .inner
            .models
            .borrow()
            .iter()
            .map(|(id, model)| (id.clone(), model.clone()))
            .collect();

        let mut state = ManagerState::default();
        for (model_id, deferred) in entries {
            let model = match deferred.await {
                Ok(model) => model,
                Err(err) => {
                    tracing::debug!(model_id = %model_id, error = %err, "skipping model that failed to load");
                    continue;
                }
            };
            if options.only_live && !model.comm_live() {
                continue;
            }
            let views = model.root_view_options().await;
            if options.only_displayed && views.is_empty() {
                continue;
            }

            let plain = model.serialize(&model.get_state(options.drop_defaults))?;
            let split = remove_buffers(&Value::Object(plain));
            let buffers: Vec<SnapshotBuffer> = split
                .buffer_paths
                .into_iter()
                .zip(split.buffers)
                .map(|(path, data)| SnapshotBuffer {
                    data: BufferEncoding::Base64.encode(&data),
                    path,
                    encoding: BufferEncoding::Base64,
                })
                .collect();
            let attrs = match split.state {
                serde_json::Value::Object(attrs) => attrs,
                _ => serde_json::Map::new(),
            };

            state.state.insert(
                model_id,
                ModelSnapshot {
                    model_name: model.name(),
                    model_module: model.module(),
                    model_module_version: model.module_version(),
                    state: attrs,
                    buffers: (!buffers.is_empty()).then_some(buffers),
                    views: (!views.is_empty()).then_some(views),
                },
            );
        }
        Ok(state)
    }

    /// Restores models from a snapshot and redisplays their recorded views.
    ///
    /// Models already registered get the stored state applied. Models whose
    /// comm is still open on the kernel are reconnected and asked for their
    /// current state instead of using the stored one.
    pub async fn set_state(&self, state: ManagerState) -> Result<Vec<WidgetModel>> {
        if !(1..=STATE_VERSION_MAJOR).contains(&state.version_major) {
            return Err(WidgetError::UnsupportedStateVersion(state.version_major));
        }
        let restores = decode_snapshots(state)?;

        let live: HashSet<String> = match self.inner.backend.get_comm_info().await {
            Ok(ids) => ids.into_iter().collect(),
            Err(err) => {
                tracing::warn!(error = %err, "could not list live comms");
                HashSet::new()
            }
        };

        let mut pending = Vec::with_capacity(restores.len());
        for restore in restores {
            let model = if let Some(existing) = self.get_model(&restore.model_id) {
                let manager = self.clone();
                let attrs = restore.attrs;
                spawn_deferred(async move {
                    let model = existing.await?;
                    let attrs = model.model_type().deserialize_state(attrs, &manager).await?;
                    model.set_state(attrs);
                    Ok::<_, WidgetError>(model)
                })
            } else if live.contains(&restore.model_id) {
                self.connect_live_model(restore.model_id, restore.options)
            } else {
                self.new_model(restore.options, restore.attrs)
            };
            pending.push((model, restore.views));
        }

        let mut models = Vec::with_capacity(pending.len());
        for (model, views) in pending {
            let model = model.await?;
            for options in views {
                if let Err(err) = self.display_model(&model, options).await {
                    tracing::error!(model_id = %model.model_id(), error = %err, "could not restore view");
                }
            }
            models.push(model);
        }
        Ok(models)
    }

    /// Reattaches to a comm the kernel still has open and requests a full
    /// state update over it.
    fn connect_live_model(&self, model_id: String, options: ModelCreateOptions) -> Deferred<WidgetModel> {
        let manager = self.clone();
        let id = model_id.clone();
        let deferred = spawn_deferred(async move {
            let result = async {
                let backend = &manager.inner.backend;
                let comm = backend
                    .create_comm(backend.comm_target_name(), Some(&id), None, None, Vec::new())
                    .await?;
                let options = ModelCreateOptions {
                    comm: Some(comm.clone()),
                    ..options
                };
                let model = manager.make_model(id.clone(), options, AttrMap::new()).await?;
                let request = json!({ "method": "request_state" });
                if let Err(err) = comm.send(request, CommCallbacks::default(), json!({}), Vec::new()) {
                    tracing::error!(model_id = %id, error = %err, "could not request state");
                }
                Ok::<_, WidgetError>(model)
            }
            .await;
            manager.settle_placeholder(&id, result)
        });
        self.inner.models.borrow_mut().insert(model_id, deferred.clone());
        deferred
    }

    /// Closes every model and empties the registry.
    pub async fn clear_state(&self) {
        let models: Vec<Deferred<WidgetModel>> =
            self.inner.models.borrow_mut().drain().map(|(_, model)| model).collect();
        for model in future::join_all(models).await.into_iter().flatten() {
            model.close(false).await;
        }
    }
}

fn decode_snapshots(state: ManagerState) -> Result<Vec<Restore>> {
    let mut restores = Vec::with_capacity(state.state.len());
    for (model_id, snapshot) in state.state {
        let mut tree = AttrValue::from(serde_json::Value::Object(snapshot.state));
        if let Some(buffers) = &snapshot.buffers {
            let paths: Vec<BufferPath> = buffers.iter().map(|b| b.path.clone()).collect();
            let data = buffers
                .iter()
                .map(|b| b.encoding.decode(&b.data))
                .collect::<std::result::Result<Vec<Bytes>, BufferError>>()?;
            put_buffers(&mut tree, &paths, &data)?;
        }
        let attrs = match tree {
            Value::Object(attrs) => attrs,
            _ => AttrMap::new(),
        };
        let options = ModelCreateOptions::new(
            &snapshot.model_module,
            &snapshot.model_name,
            &snapshot.model_module_version,
        )
        .with_model_id(model_id.clone());
        restores.push(Restore {
            model_id,
            options,
            attrs,
            views: snapshot.views.unwrap_or_default(),
        });
    }
    Ok(restores)
}
