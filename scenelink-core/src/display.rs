//! The set of visible objects.
//!
//! In buffered mode display changes are queued instead of applied. `flush`
//! applies the queue in order and reports only the net change per name, so
//! a bulk load that hides and re-shows an object reports nothing for it.

use indexmap::{IndexMap, IndexSet};

#[derive(Debug, Clone, Default)]
pub struct DisplaySet {
    visible: IndexSet<String>,
    /// Nesting depth of `buffer()` calls
    depth: usize,
    queued: Vec<(String, bool)>,
}

impl DisplaySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.visible.contains(name)
    }

    pub fn len(&self) -> usize {
        self.visible.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.visible.iter().map(String::as_str)
    }

    pub fn is_buffering(&self) -> bool {
        self.depth > 0
    }

    /// Enter buffered mode. Calls nest; only the outermost `flush` applies.
    pub fn buffer(&mut self) {
        self.depth += 1;
    }

    /// Queue a change while buffering.
    pub(crate) fn queue(&mut self, name: &str, on: bool) {
        self.queued.push((name.to_string(), on));
    }

    /// Apply a change immediately. Returns whether membership changed.
    pub(crate) fn set(&mut self, name: &str, on: bool) -> bool {
        if on {
            self.visible.insert(name.to_string())
        } else {
            self.visible.shift_remove(name)
        }
    }

    /// Leave one level of buffered mode. At the outermost level the queue is
    /// applied and the net changes are returned in first-touched order.
    pub(crate) fn flush(&mut self) -> Vec<(String, bool)> {
        if self.depth == 0 {
            return Vec::new();
        }
        self.depth -= 1;
        if self.depth > 0 {
            return Vec::new();
        }

        let mut before: IndexMap<String, bool> = IndexMap::new();
        for (name, on) in std::mem::take(&mut self.queued) {
            let was = self.contains(&name);
            before.entry(name.clone()).or_insert(was);
            self.set(&name, on);
        }
        before
            .into_iter()
            .filter_map(|(name, was)| {
                let now = self.contains(&name);
                (now != was).then_some((name, now))
            })
            .collect()
    }

    /// Drop every trace of `name`, queued changes included.
    pub(crate) fn forget(&mut self, name: &str) {
        self.visible.shift_remove(name);
        self.queued.retain(|(n, _)| n != name);
    }
}
