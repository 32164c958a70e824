//! Reference graph between widgets.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use indexmap::IndexSet;
use widgets_util::Value;

use crate::attributes::AttrValue;
use crate::deferred::peek_ok;
use crate::model::WidgetModel;
use crate::protocol::parse_model_ref;

fn collect_refs(value: &AttrValue, out: &mut Vec<(String, Option<WidgetModel>)>) {
    match value {
        Value::Ref(model) => out.push((model.model_id().to_owned(), Some(model.clone()))),
        Value::String(text) => {
            if let Some(model_id) = parse_model_ref(text) {
                out.push((model_id.to_owned(), None));
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_refs(item, out)),
        Value::Object(map) => map.values().for_each(|item| collect_refs(item, out)),
        _ => {}
    }
}

fn direct_children(model: &WidgetModel) -> Vec<(String, Option<WidgetModel>)> {
    let mut out = Vec::new();
    for value in model.get_state(false).values() {
        collect_refs(value, &mut out);
    }
    out
}

/// Ids of the widgets `model` references from its attributes, in discovery
/// order. With `recursive`, references of references are followed too;
/// string references are followed through the manager when the target model
/// is already built.
pub fn find_widget_children(model: &WidgetModel, recursive: bool) -> Vec<String> {
    let mut found: IndexSet<String> = IndexSet::new();
    let mut visited: HashSet<String> = HashSet::from([model.model_id().to_owned()]);
    let mut queue = VecDeque::from([model.clone()]);

    while let Some(current) = queue.pop_front() {
        for (child_id, child) in direct_children(&current) {
            found.insert(child_id.clone());
            if !recursive || !visited.insert(child_id.clone()) {
                continue;
            }
            let child = child.or_else(|| {
                let manager = current.manager().ok()?;
                manager.get_model(&child_id).as_ref().and_then(peek_ok)
            });
            if let Some(child) = child {
                queue.push_back(child);
            }
        }
    }
    found.shift_remove(model.model_id());
    found.into_iter().collect()
}

/// Parent/child links between widget ids.
#[derive(Debug, Clone, Default)]
pub struct WidgetGraph {
    children: BTreeMap<String, BTreeSet<String>>,
    parents: BTreeMap<String, BTreeSet<String>>,
}

impl WidgetGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Graph of `models` and their direct references.
    pub fn from_models(models: &[WidgetModel]) -> Self {
        let mut graph = Self::new();
        for model in models {
            graph.add_node(model.model_id());
            for child in find_widget_children(model, false) {
                graph.add_edge(model.model_id(), &child);
            }
        }
        graph
    }

    pub fn add_node(&mut self, id: &str) {
        self.children.entry(id.to_owned()).or_default();
        self.parents.entry(id.to_owned()).or_default();
    }

    pub fn add_edge(&mut self, parent: &str, child: &str) {
        self.add_node(parent);
        self.add_node(child);
        if let Some(children) = self.children.get_mut(parent) {
            children.insert(child.to_owned());
        }
        if let Some(parents) = self.parents.get_mut(child) {
            parents.insert(parent.to_owned());
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(String::as_str)
    }

    /// Removes every seed and, transitively, everything linked to it as a
    /// parent or a child. Returns the ids that remain.
    pub fn find_connected_widgets(&self, seeds: &[&str]) -> BTreeSet<String> {
        let mut removed: HashSet<&str> = HashSet::new();
        for seed in seeds {
            let mut stack = vec![*seed];
            while let Some(id) = stack.pop() {
                if !removed.insert(id) {
                    continue;
                }
                let linked = self.children.get(id).into_iter().chain(self.parents.get(id)).flatten();
                stack.extend(linked.map(String::as_str));
            }
        }
        self.nodes()
            .filter(|id| !removed.contains(id))
            .map(str::to_owned)
            .collect()
    }
}

/// [`WidgetGraph::find_connected_widgets`] over `models`.
pub fn find_connected_widgets(models: &[WidgetModel], seeds: &[&str]) -> BTreeSet<String> {
    WidgetGraph::from_models(models).find_connected_widgets(seeds)
}
