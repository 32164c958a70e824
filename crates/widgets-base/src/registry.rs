//! Model and view types, looked up by `(module, name)`.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use futures_util::future::{self, FutureExt, LocalBoxFuture};
use indexmap::IndexMap;

use crate::attributes::{AttrMap, AttrValue};
use crate::error::{Result, WidgetError};
use crate::manager::WidgetManager;
use crate::model::WidgetModel;
use crate::protocol::{BASE_MODEL_NAME, BASE_MODULE, BASE_MODULE_VERSION};
use crate::view::ViewFactory;

pub type SerializeFn = Rc<dyn Fn(&AttrValue, &WidgetModel) -> Result<AttrValue>>;
pub type DeserializeFn =
    Rc<dyn Fn(AttrValue, WidgetManager) -> LocalBoxFuture<'static, Result<AttrValue>>>;
pub type ValidateFn = Rc<dyn Fn(&AttrMap) -> std::result::Result<(), String>>;

/// Custom wire conversion for one attribute.
#[derive(Clone, Default)]
pub struct AttributeSerializer {
    pub serialize: Option<SerializeFn>,
    pub deserialize: Option<DeserializeFn>,
}

/// Defaults of the base widget model.
pub fn base_defaults() -> AttrMap {
    let mut defaults = AttrMap::new();
    defaults.insert("_model_module".into(), BASE_MODULE.into());
    defaults.insert("_model_module_version".into(), BASE_MODULE_VERSION.into());
    defaults.insert("_model_name".into(), BASE_MODEL_NAME.into());
    defaults.insert("_view_count".into(), AttrValue::Null);
    defaults.insert("_view_module".into(), BASE_MODULE.into());
    defaults.insert("_view_module_version".into(), BASE_MODULE_VERSION.into());
    defaults.insert("_view_name".into(), AttrValue::Null);
    defaults
}

/// Behavior shared by every model of one class.
#[derive(Clone)]
pub struct ModelType {
    defaults: AttrMap,
    serializers: IndexMap<String, AttributeSerializer>,
    validate: Option<ValidateFn>,
}

impl fmt::Debug for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelType")
            .field("defaults", &self.defaults)
            .field("serializers", &self.serializers.keys().collect::<Vec<_>>())
            .field("validate", &self.validate.is_some())
            .finish()
    }
}

impl Default for ModelType {
    fn default() -> Self {
        Self::base()
    }
}

impl ModelType {
    /// `@jupyter-widgets/base` `WidgetModel`.
    pub fn base() -> Self {
        Self {
            defaults: base_defaults(),
            serializers: IndexMap::new(),
            validate: None,
        }
    }

    /// A subtype whose `_model_module`/`_model_name` defaults name it.
    pub fn new(module: &str, name: &str, version: &str) -> Self {
        let mut identity = AttrMap::new();
        identity.insert("_model_module".into(), module.into());
        identity.insert("_model_module_version".into(), version.into());
        identity.insert("_model_name".into(), name.into());
        Self::base().with_defaults(identity)
    }

    /// Merges `extra` over the current defaults.
    pub fn with_defaults(mut self, extra: AttrMap) -> Self {
        self.defaults.extend(extra);
        self
    }

    pub fn with_view(self, module: &str, name: &str, version: &str) -> Self {
        let mut view = AttrMap::new();
        view.insert("_view_module".into(), module.into());
        view.insert("_view_module_version".into(), version.into());
        view.insert("_view_name".into(), name.into());
        self.with_defaults(view)
    }

    pub fn with_serializer(mut self, attr: &str, serializer: AttributeSerializer) -> Self {
        self.serializers.insert(attr.to_owned(), serializer);
        self
    }

    pub fn with_validator<F>(mut self, validate: F) -> Self
    where
        F: Fn(&AttrMap) -> std::result::Result<(), String> + 'static,
    {
        self.validate = Some(Rc::new(validate));
        self
    }

    pub fn defaults(&self) -> AttrMap {
        self.defaults.clone()
    }

    pub fn serializer(&self, attr: &str) -> Option<&AttributeSerializer> {
        self.serializers.get(attr)
    }

    pub(crate) fn validate(&self, candidate: &AttrMap) -> std::result::Result<(), String> {
        match &self.validate {
            Some(validate) => validate(candidate),
            None => Ok(()),
        }
    }

    /// Converts raw wire state into attribute values.
    ///
    /// Attributes with a deserializer run concurrently; the rest pass
    /// through. Resolves once all of them have settled.
    pub fn deserialize_state(
        &self,
        state: AttrMap,
        manager: &WidgetManager,
    ) -> LocalBoxFuture<'static, Result<AttrMap>> {
        let pending: Vec<_> = state
            .into_iter()
            .map(|(attr, value)| {
                let deserialize = self.serializer(&attr).and_then(|s| s.deserialize.clone());
                let converted = match deserialize {
                    Some(deserialize) => deserialize(value, manager.clone()),
                    None => future::ready(Ok(value)).boxed_local(),
                };
                async move { (attr, converted.await) }
            })
            .collect();

        async move {
            let mut out = AttrMap::new();
            for (attr, result) in future::join_all(pending).await {
                let value = result.map_err(|err| match err {
                    WidgetError::Deserialize { .. } => err,
                    other => WidgetError::Deserialize {
                        attr: attr.clone(),
                        reason: other.to_string(),
                    },
                })?;
                out.insert(attr, value);
            }
            Ok(out)
        }
        .boxed_local()
    }
}

/// Two-level lookup table: module, then class name.
#[derive(Default)]
pub struct Registry {
    models: HashMap<String, HashMap<String, Rc<ModelType>>>,
    views: HashMap<String, HashMap<String, ViewFactory>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding only the base model type.
    pub fn with_base() -> Self {
        let mut registry = Self::new();
        registry.register_model(BASE_MODULE, BASE_MODEL_NAME, ModelType::base());
        registry
    }

    pub fn register_model(&mut self, module: &str, name: &str, model_type: ModelType) {
        self.models
            .entry(module.to_owned())
            .or_default()
            .insert(name.to_owned(), Rc::new(model_type));
    }

    pub fn register_view(&mut self, module: &str, name: &str, factory: ViewFactory) {
        self.views
            .entry(module.to_owned())
            .or_default()
            .insert(name.to_owned(), factory);
    }

    pub fn resolve_model(&self, module: &str, name: &str) -> Result<Rc<ModelType>> {
        lookup(&self.models, module, name).cloned()
    }

    pub fn resolve_view(&self, module: &str, name: &str) -> Result<ViewFactory> {
        lookup(&self.views, module, name).cloned()
    }
}

fn lookup<'a, T>(
    table: &'a HashMap<String, HashMap<String, T>>,
    module: &str,
    name: &str,
) -> Result<&'a T> {
    let classes = table
        .get(module)
        .ok_or_else(|| WidgetError::ModuleNotFound(module.to_owned()))?;
    classes.get(name).ok_or_else(|| WidgetError::ClassNotFound {
        module: module.to_owned(),
        name: name.to_owned(),
    })
}
