//! In-memory container backend.
//!
//! Mirrors the layout of a FAST5 file as maps keyed by normalized path.
//! Used by the test suite and by anything that wants to synthesize a
//! container without touching HDF5.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::{norm, Container, EventTable, Value};
use crate::Fast5Error;

#[derive(Debug, Clone, Default)]
pub struct MemContainer {
    groups: BTreeSet<String>,
    attrs: HashMap<String, BTreeMap<String, Value>>,
    tables: HashMap<String, EventTable>,
    signals: HashMap<String, Vec<u16>>,
    texts: HashMap<String, String>,
}

impl MemContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a group and all of its ancestors.
    pub fn add_group(&mut self, path: &str) {
        let path = norm(path);
        let mut node = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            if !node.is_empty() {
                node.push('/');
            }
            node.push_str(part);
            self.groups.insert(node.clone());
        }
    }

    pub fn set_attr<V: Into<Value>>(&mut self, path: &str, name: &str, value: V) {
        self.add_group(path);
        self.attrs
            .entry(norm(path).to_string())
            .or_default()
            .insert(name.to_string(), value.into());
    }

    pub fn add_table(&mut self, path: &str, table: EventTable) {
        self.add_group(path);
        self.tables.insert(norm(path).to_string(), table);
    }

    pub fn add_signal(&mut self, path: &str, samples: Vec<u16>) {
        self.add_group(path);
        self.signals.insert(norm(path).to_string(), samples);
    }

    pub fn add_text(&mut self, path: &str, text: &str) {
        self.add_group(path);
        self.texts.insert(norm(path).to_string(), text.to_string());
    }

    /// Drops a whole subtree, the write half of stripping. Returns whether
    /// anything was removed.
    pub fn remove_subtree(&mut self, path: &str) -> bool {
        let path = norm(path).to_string();
        let prefix = format!("{path}/");
        let hit = |key: &str| key == path || key.starts_with(&prefix);
        let before = self.groups.len()
            + self.attrs.len()
            + self.tables.len()
            + self.signals.len()
            + self.texts.len();
        self.groups.retain(|k| !hit(k));
        self.attrs.retain(|k, _| !hit(k));
        self.tables.retain(|k, _| !hit(k));
        self.signals.retain(|k, _| !hit(k));
        self.texts.retain(|k, _| !hit(k));
        before
            != self.groups.len()
                + self.attrs.len()
                + self.tables.len()
                + self.signals.len()
                + self.texts.len()
    }
}

impl Container for MemContainer {
    fn exists(&self, path: &str) -> bool {
        let path = norm(path);
        if path.is_empty() {
            return true;
        }
        self.groups.contains(path)
            || self.tables.contains_key(path)
            || self.signals.contains_key(path)
            || self.texts.contains_key(path)
    }

    fn attr(&self, path: &str, name: &str) -> Option<Value> {
        self.attrs.get(norm(path))?.get(name).cloned()
    }

    fn children(&self, path: &str) -> Vec<String> {
        let prefix = format!("{}/", norm(path));
        let mut out: Vec<String> = self
            .groups
            .iter()
            .map(String::as_str)
            .chain(self.tables.keys().map(String::as_str))
            .chain(self.signals.keys().map(String::as_str))
            .chain(self.texts.keys().map(String::as_str))
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter(|rest| !rest.contains('/'))
            .map(String::from)
            .collect();
        out.sort();
        out.dedup();
        out
    }

    fn table(&self, path: &str) -> Result<EventTable, Fast5Error> {
        self.tables
            .get(norm(path))
            .cloned()
            .ok_or_else(|| Fast5Error::MissingPath(path.to_string()))
    }

    fn signal(&self, path: &str) -> Result<Vec<u16>, Fast5Error> {
        self.signals
            .get(norm(path))
            .cloned()
            .ok_or_else(|| Fast5Error::MissingPath(path.to_string()))
    }

    fn text(&self, path: &str) -> Result<String, Fast5Error> {
        self.texts
            .get(norm(path))
            .cloned()
            .ok_or_else(|| Fast5Error::MissingPath(path.to_string()))
    }
}
