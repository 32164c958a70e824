//! Views: renderers attached to a model.

use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};

use futures_util::future::{self, FutureExt, LocalBoxFuture};
use serde::{Deserialize, Serialize};

use crate::comm::CommCallbacks;
use crate::error::Result;
use crate::events::{ListenerId, Listeners, ModelEvent};
use crate::model::WidgetModel;

/// Options a view was created with. `parent` marks a view nested inside
/// another view; only views without one are recorded in snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ViewOptions {
    pub fn child_of(parent: impl Into<String>) -> Self {
        Self {
            parent: Some(parent.into()),
            ..Self::default()
        }
    }
}

/// Rendering backend of a view type.
pub trait WidgetView {
    /// Runs inside the model's mailbox, so it must not wait for
    /// [`WidgetModel::state_change`].
    fn render(&self, view: &View) -> LocalBoxFuture<'static, Result<()>> {
        let _ = view;
        future::ready(Ok(())).boxed_local()
    }

    /// Releases whatever `render` attached.
    fn remove(&self) {}
}

/// Builds the renderer for a new view of `model`.
pub type ViewFactory = Rc<dyn Fn(&WidgetModel, &ViewOptions) -> Result<Rc<dyn WidgetView>>>;

/// Handle to a created view. Clones share the same view.
#[derive(Clone)]
pub struct View {
    inner: Rc<ViewInner>,
}

struct ViewInner {
    id: String,
    model: WidgetModel,
    options: ViewOptions,
    renderer: Rc<dyn WidgetView>,
    removed: Cell<bool>,
    destroy_listener: Cell<Option<ListenerId>>,
    on_remove: Listeners<View>,
}

impl fmt::Debug for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View")
            .field("id", &self.inner.id)
            .field("model", &self.inner.model)
            .field("removed", &self.inner.removed.get())
            .finish()
    }
}

impl View {
    /// Creates a view that removes itself when `model` is destroyed.
    pub fn new(
        id: String,
        model: WidgetModel,
        options: ViewOptions,
        renderer: Rc<dyn WidgetView>,
    ) -> Self {
        let view = View {
            inner: Rc::new(ViewInner {
                id,
                model,
                options,
                renderer,
                removed: Cell::new(false),
                destroy_listener: Cell::new(None),
                on_remove: Listeners::new(),
            }),
        };
        let weak: Weak<ViewInner> = Rc::downgrade(&view.inner);
        let listener = view.inner.model.on(move |event| {
            if matches!(event, ModelEvent::Destroy) {
                if let Some(inner) = weak.upgrade() {
                    View { inner }.remove();
                }
            }
        });
        view.inner.destroy_listener.set(Some(listener));
        view
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn model(&self) -> &WidgetModel {
        &self.inner.model
    }

    pub fn options(&self) -> &ViewOptions {
        &self.inner.options
    }

    pub fn is_removed(&self) -> bool {
        self.inner.removed.get()
    }

    pub(crate) fn render(&self) -> LocalBoxFuture<'static, Result<()>> {
        self.inner.renderer.render(self)
    }

    pub fn on_remove<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&View) + 'static,
    {
        self.inner.on_remove.subscribe(listener)
    }

    /// Removes the view. Idempotent.
    pub fn remove(&self) {
        if self.inner.removed.replace(true) {
            return;
        }
        if let Some(listener) = self.inner.destroy_listener.take() {
            self.inner.model.off(listener);
        }
        self.inner.renderer.remove();
        self.inner.on_remove.emit(self);
        self.inner.on_remove.clear();
    }

    pub fn callbacks(&self) -> CommCallbacks {
        self.inner.model.callbacks(Some(self))
    }

    /// Saves the model's pending changes with this view's callbacks.
    pub fn touch(&self) {
        self.inner.model.save_changes(Some(self.callbacks()));
    }

    /// Sends a custom message through the model.
    pub fn send(&self, content: serde_json::Value) {
        self.inner.model.send(content, Some(self.callbacks()), Vec::new());
    }
}

impl PartialEq for View {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}
