use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::value::Value;

/// An ordered map from composite key (column values in declaration
/// order) to the sorted set of row ids sharing that key (spec §4.G.3
/// "Internally, each index stores an ordered map...").
#[derive(Debug, Clone)]
pub(crate) struct TableIndex {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    map: BTreeMap<Vec<Value>, BTreeSet<u64>>,
}

impl TableIndex {
    pub fn new(name: impl Into<String>, columns: Vec<String>, unique: bool) -> Self {
        Self {
            name: name.into(),
            columns,
            unique,
            map: BTreeMap::new(),
        }
    }

    pub fn extract_key(&self, values: &HashMap<String, Value>) -> Vec<Value> {
        self.columns
            .iter()
            .map(|c| values.get(c).cloned().unwrap_or(Value::Null))
            .collect()
    }

    pub fn would_violate_unique(&self, key: &[Value]) -> bool {
        self.unique && self.map.get(key).map_or(false, |ids| !ids.is_empty())
    }

    pub fn would_violate_unique_excluding(&self, key: &[Value], exclude: u64) -> bool {
        self.unique
            && self
                .map
                .get(key)
                .map_or(false, |ids| ids.iter().any(|&id| id != exclude))
    }

    pub fn insert_key(&mut self, key: Vec<Value>, id: u64) {
        self.map.entry(key).or_default().insert(id);
    }

    pub fn remove_key(&mut self, key: &[Value], id: u64) {
        if let Some(ids) = self.map.get_mut(key) {
            ids.remove(&id);
            if ids.is_empty() {
                self.map.remove(key);
            }
        }
    }

    pub fn find_exact(&self, key: &[Value]) -> Vec<u64> {
        self.map.get(key).map(|ids| ids.iter().copied().collect()).unwrap_or_default()
    }

    /// Row ids whose composite key falls in `start..=end`, in key order
    /// (spec §4.G.3 "enabling both exact-match and range lookup").
    pub fn find_range(&self, start: &[Value], end: &[Value]) -> Vec<u64> {
        self.map
            .range(start.to_vec()..=end.to_vec())
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}
