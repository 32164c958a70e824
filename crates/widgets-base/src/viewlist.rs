//! Keeps an ordered list of child views in step with a list of models.

use std::rc::Rc;

use futures_util::future::{self, FutureExt, LocalBoxFuture};
use tokio::task::JoinHandle;
use widgets_util::Reference;

use crate::deferred::{spawn_deferred, Deferred};
use crate::error::Result;

pub type CreateViewFn<M, V> = Rc<dyn Fn(&M, usize) -> LocalBoxFuture<'static, Result<V>>>;
pub type RemoveViewFn<V> = Rc<dyn Fn(V) -> LocalBoxFuture<'static, ()>>;

/// Views for a sequence of models, reconciled by model identity.
///
/// On [`ViewList::update`] a model that was already in the list keeps its
/// view, wherever it moved to. Models new to the list get a view from the
/// create callback and models that left have theirs passed to the remove
/// callback. Both callbacks start immediately; the returned future only
/// reports completion.
///
/// Must be used from within a `tokio::task::LocalSet`.
pub struct ViewList<M, V> {
    entries: Vec<(M, Deferred<V>)>,
    create: CreateViewFn<M, V>,
    remove: RemoveViewFn<V>,
}

impl<M, V> ViewList<M, V>
where
    M: Reference + 'static,
    V: Clone + 'static,
{
    pub fn new<C, R>(create: C, remove: R) -> Self
    where
        C: Fn(&M, usize) -> LocalBoxFuture<'static, Result<V>> + 'static,
        R: Fn(V) -> LocalBoxFuture<'static, ()> + 'static,
    {
        Self {
            entries: Vec::new(),
            create: Rc::new(create),
            remove: Rc::new(remove),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn models(&self) -> Vec<M> {
        self.entries.iter().map(|(model, _)| model.clone()).collect()
    }

    /// The current views, in order.
    pub fn views(&self) -> LocalBoxFuture<'static, Result<Vec<V>>> {
        let views: Vec<Deferred<V>> = self.entries.iter().map(|(_, view)| view.clone()).collect();
        future::try_join_all(views).boxed_local()
    }

    /// Reconciles the list with `models` and resolves to the views in the
    /// new order once creations and removals have finished.
    pub fn update(&mut self, models: &[M]) -> LocalBoxFuture<'static, Result<Vec<V>>> {
        let mut old: Vec<Option<(M, Deferred<V>)>> =
            std::mem::take(&mut self.entries).into_iter().map(Some).collect();

        for (index, model) in models.iter().enumerate() {
            let kept = old
                .iter_mut()
                .find(|slot| matches!(slot, Some((m, _)) if m.same_as(model)))
                .and_then(Option::take);
            let entry = match kept {
                Some(entry) => entry,
                None => (model.clone(), spawn_deferred((self.create)(model, index))),
            };
            self.entries.push(entry);
        }

        let removals: Vec<JoinHandle<()>> = old
            .into_iter()
            .flatten()
            .map(|(_, view)| self.spawn_removal(view))
            .collect();
        let views = self.views();
        async move {
            for removal in removals {
                let _ = removal.await;
            }
            views.await
        }
        .boxed_local()
    }

    /// Removes every view and empties the list.
    pub fn remove(&mut self) -> LocalBoxFuture<'static, ()> {
        let removals: Vec<JoinHandle<()>> = std::mem::take(&mut self.entries)
            .into_iter()
            .map(|(_, view)| self.spawn_removal(view))
            .collect();
        async move {
            for removal in removals {
                let _ = removal.await;
            }
        }
        .boxed_local()
    }

    fn spawn_removal(&self, view: Deferred<V>) -> JoinHandle<()> {
        let remove = self.remove.clone();
        tokio::task::spawn_local(async move {
            if let Ok(view) = view.await {
                remove(view).await;
            }
        })
    }
}
