//! Ready-made attribute serializers for nested widget references.

use std::rc::Rc;

use futures_util::future::{self, FutureExt, LocalBoxFuture};
use widgets_util::Value;

use crate::attributes::AttrValue;
use crate::error::Result;
use crate::manager::WidgetManager;
use crate::model::WidgetModel;
use crate::protocol::parse_model_ref;
use crate::registry::AttributeSerializer;

/// Replaces every `"IPY_MODEL_<id>"` string in `value`, at any depth, with
/// the registered model. Fails if a referenced model cannot be resolved.
pub fn unpack_models(value: AttrValue, manager: WidgetManager) -> LocalBoxFuture<'static, Result<AttrValue>> {
    async move {
        match value {
            Value::String(text) => match parse_model_ref(&text) {
                Some(model_id) => Ok(Value::Ref(manager.resolve_model(model_id).await?)),
                None => Ok(Value::String(text)),
            },
            Value::Array(items) => {
                let items = items.into_iter().map(|item| unpack_models(item, manager.clone()));
                Ok(Value::Array(future::try_join_all(items).await?))
            }
            Value::Object(map) => {
                let (keys, values): (Vec<String>, Vec<AttrValue>) = map.into_iter().unzip();
                let values = values.into_iter().map(|item| unpack_models(item, manager.clone()));
                let values = future::try_join_all(values).await?;
                Ok(Value::Object(keys.into_iter().zip(values).collect()))
            }
            other => Ok(other),
        }
    }
    .boxed_local()
}

/// Replaces every model reference in `value` with its `"IPY_MODEL_<id>"` form.
pub fn pack_models(value: &AttrValue, _model: &WidgetModel) -> Result<AttrValue> {
    Ok(value.to_plain().widen())
}

/// Serializer pair for attributes holding widget references.
pub fn model_references() -> AttributeSerializer {
    AttributeSerializer {
        serialize: Some(Rc::new(pack_models)),
        deserialize: Some(Rc::new(unpack_models)),
    }
}
