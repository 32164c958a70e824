//! Attribute storage with change tracking.
//!
//! `Attributes` only records what changed; delivering notifications is the
//! owner's job (see [`WidgetModel::set_attrs`](crate::model::WidgetModel::set_attrs)).
//! A set that starts while another one is running is *nested*: it applies
//! immediately and queues its notifications behind the outermost call.

use std::collections::VecDeque;

use widgets_util::{option_equal, Map, Value};

use crate::model::WidgetModel;

/// Attribute value; nested widgets are held as `Value::Ref`.
pub type AttrValue = Value<WidgetModel>;
pub type AttrMap = Map<WidgetModel>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Mutate without any notification.
    pub silent: bool,
    /// Consult the model type's validation hook first.
    pub validate: bool,
    /// Remove the named attributes instead of assigning them.
    pub unset: bool,
}

impl SetOptions {
    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::default()
        }
    }

    pub fn validated() -> Self {
        Self {
            validate: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SetOutcome {
    /// Names whose value differs from the value before this call, in input order.
    Applied { changes: Vec<String> },
    Rejected { error: String },
}

impl SetOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, SetOutcome::Applied { .. })
    }

    pub fn changes(&self) -> &[String] {
        match self {
            SetOutcome::Applied { changes } => changes,
            SetOutcome::Rejected { .. } => &[],
        }
    }
}

/// A queued notification.
#[derive(Debug, Clone)]
pub(crate) enum Notification {
    Attr { name: String, value: AttrValue },
    Change,
}

#[derive(Debug, Default)]
pub(crate) struct Attributes {
    current: AttrMap,
    previous: AttrMap,
    changed: AttrMap,
    changing: bool,
    pending: bool,
    queue: VecDeque<Notification>,
}

impl Attributes {
    pub(crate) fn new(initial: AttrMap) -> Self {
        Self {
            current: initial,
            ..Self::default()
        }
    }

    pub(crate) fn all(&self) -> &AttrMap {
        &self.current
    }

    pub(crate) fn get(&self, key: &str) -> Option<&AttrValue> {
        self.current.get(key)
    }

    pub(crate) fn previous(&self, key: &str) -> Option<&AttrValue> {
        self.previous.get(key)
    }

    pub(crate) fn has_changed(&self, key: &str) -> bool {
        self.changed.contains_key(key)
    }

    pub(crate) fn changed_attributes(&self) -> Option<AttrMap> {
        if self.changed.is_empty() {
            None
        } else {
            Some(self.changed.clone())
        }
    }

    pub(crate) fn is_changing(&self) -> bool {
        self.changing
    }

    /// Current attributes with `attrs` merged over them.
    pub(crate) fn candidate(&self, attrs: &AttrMap, unset: bool) -> AttrMap {
        let mut merged = self.current.clone();
        for (key, value) in attrs {
            if unset {
                merged.shift_remove(key);
            } else {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    }

    /// Applies `attrs`. Returns whether this is the outermost call and the
    /// names whose value changed.
    pub(crate) fn apply(&mut self, attrs: AttrMap, options: SetOptions) -> (bool, Vec<String>) {
        let outermost = !self.changing;
        if outermost {
            self.changing = true;
            self.previous = self.current.clone();
            self.changed.clear();
        }

        let mut changes = Vec::new();
        for (attr, value) in attrs {
            let next = if options.unset { None } else { Some(&value) };
            if !option_equal(self.current.get(&attr), next) {
                changes.push(attr.clone());
            }
            if option_equal(self.previous.get(&attr), next) {
                self.changed.shift_remove(&attr);
            } else {
                self.changed.insert(attr.clone(), value.clone());
            }
            if options.unset {
                self.current.shift_remove(&attr);
            } else {
                self.current.insert(attr, value);
            }
        }

        if !options.silent && !changes.is_empty() {
            self.pending = true;
            for name in &changes {
                let value = self.current.get(name).cloned().unwrap_or_default();
                self.queue.push_back(Notification::Attr {
                    name: name.clone(),
                    value,
                });
            }
        }
        (outermost, changes)
    }

    /// Next notification for the outermost call to deliver.
    pub(crate) fn next_notification(&mut self) -> Option<Notification> {
        if let Some(next) = self.queue.pop_front() {
            return Some(next);
        }
        if self.pending {
            self.pending = false;
            return Some(Notification::Change);
        }
        None
    }

    /// Ends the outermost call.
    pub(crate) fn finish(&mut self) {
        self.changing = false;
        self.pending = false;
        self.queue.clear();
    }
}
