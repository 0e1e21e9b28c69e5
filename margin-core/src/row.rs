//! Rows and row-sets
//!
//! A [`RowSet`] is an ordered batch of rows belonging to one entity, with a
//! designated identity column. Rows are addressed by position; removing a row
//! shifts every later row down by one.

use crate::{ConfigError, StorageError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Cell value. JSON values keep the storage layer type-agnostic.
pub type Value = serde_json::Value;

/// Canonical string form of a value, used to match identities across row-sets.
///
/// Strings map to their raw text so that `"42"` and `42` address the same row.
pub fn identity_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// One row: a mapping from column name to value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(BTreeMap<String, Value>);

impl Row {
    /// Create an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(column.into(), value.into());
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.0.remove(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.0.contains_key(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Overwrite this row's columns with the columns present in `other`.
    pub fn merge(&mut self, other: &Row) {
        for (column, value) in other.iter() {
            self.0.insert(column.clone(), value.clone());
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl std::ops::Index<&str> for Row {
    type Output = Value;

    fn index(&self, column: &str) -> &Value {
        self.0.get(column).unwrap_or(&Value::Null)
    }
}

impl From<BTreeMap<String, Value>> for Row {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

/// Ordered batch of rows of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    entity: String,
    identity_column: String,
    rows: Vec<Row>,
}

impl RowSet {
    /// Create an empty row-set for an entity.
    pub fn new(entity: impl Into<String>, identity_column: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            identity_column: identity_column.into(),
            rows: Vec::new(),
        }
    }

    /// Set the rows.
    pub fn with_rows(mut self, rows: impl IntoIterator<Item = Row>) -> Self {
        self.rows = rows.into_iter().collect();
        self
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn identity_column(&self) -> &str {
        &self.identity_column
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [Row] {
        &mut self.rows
    }

    pub fn row(&self, index: usize) -> Option<&Row> {
        self.rows.get(index)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push(&mut self, row: Row) {
        self.rows.push(row);
    }

    /// Append rows, keeping their order.
    pub fn add_rows(&mut self, rows: impl IntoIterator<Item = Row>) {
        self.rows.extend(rows);
    }

    /// Insert a row at `index`, shifting later rows up.
    pub fn insert_row(&mut self, index: usize, row: Row) -> Result<(), StorageError> {
        if index > self.rows.len() {
            return Err(StorageError::RowIndexOutOfRange {
                index,
                len: self.rows.len(),
            });
        }
        self.rows.insert(index, row);
        Ok(())
    }

    /// Remove the row at `index`. Later rows are re-indexed.
    pub fn remove_row(&mut self, index: usize) -> Result<Row, StorageError> {
        if index >= self.rows.len() {
            return Err(StorageError::RowIndexOutOfRange {
                index,
                len: self.rows.len(),
            });
        }
        Ok(self.rows.remove(index))
    }

    /// Remove several rows by their current indices.
    ///
    /// Indices are processed in descending order so that earlier removals do
    /// not shift the positions of rows still to be removed. Duplicates and
    /// out-of-range indices are ignored. Returns the removed rows in ascending
    /// index order.
    pub fn remove_rows(&mut self, indices: impl IntoIterator<Item = usize>) -> Vec<Row> {
        let mut indices: Vec<usize> = indices
            .into_iter()
            .filter(|i| *i < self.rows.len())
            .collect();
        indices.sort_unstable_by(|a, b| b.cmp(a));
        indices.dedup();

        let mut removed: Vec<Row> = indices.into_iter().map(|i| self.rows.remove(i)).collect();
        removed.reverse();
        removed
    }

    /// Copy of this row-set holding only the rows that satisfy `predicate`.
    pub fn filter<F>(&self, mut predicate: F) -> RowSet
    where
        F: FnMut(&Row) -> bool,
    {
        RowSet {
            entity: self.entity.clone(),
            identity_column: self.identity_column.clone(),
            rows: self.rows.iter().filter(|r| predicate(r)).cloned().collect(),
        }
    }

    /// Values of one column, in row order. Rows without the column are skipped.
    pub fn column_values(&self, column: &str) -> Vec<&Value> {
        self.rows.iter().filter_map(|r| r.get(column)).collect()
    }

    /// Identity value of a row, if set and not null.
    pub fn identity_of<'r>(&self, row: &'r Row) -> Option<&'r Value> {
        row.get(&self.identity_column).filter(|v| !v.is_null())
    }

    /// Distinct identity values in encounter order.
    pub fn identities(&self) -> Vec<Value> {
        let mut seen = HashSet::new();
        self.rows
            .iter()
            .filter_map(|r| self.identity_of(r))
            .filter(|v| seen.insert(identity_key(v)))
            .cloned()
            .collect()
    }

    /// Distinct identity values in encounter order. Fails on the first row
    /// without an identity.
    pub fn required_identities(&self) -> Result<Vec<Value>, ConfigError> {
        let mut seen = HashSet::new();
        let mut identities = Vec::with_capacity(self.rows.len());
        for (position, row) in self.rows.iter().enumerate() {
            let identity = self.identity_of(row).ok_or_else(|| ConfigError::MissingIdentity {
                entity: self.entity.clone(),
                column: self.identity_column.clone(),
                row: position,
            })?;
            if seen.insert(identity_key(identity)) {
                identities.push(identity.clone());
            }
        }
        Ok(identities)
    }

    /// Map from identity key to the row's position.
    ///
    /// When an identity appears twice the first position wins.
    pub fn index_by_identity(&self) -> HashMap<String, usize> {
        let mut index = HashMap::with_capacity(self.rows.len());
        for (i, row) in self.rows.iter().enumerate() {
            if let Some(id) = self.identity_of(row) {
                index.entry(identity_key(id)).or_insert(i);
            }
        }
        index
    }

    /// First row carrying the given identity.
    pub fn find_by_identity(&self, identity: &Value) -> Option<&Row> {
        let key = identity_key(identity);
        self.rows
            .iter()
            .find(|r| self.identity_of(r).map(identity_key).as_deref() == Some(key.as_str()))
    }
}

impl<'a> IntoIterator for &'a RowSet {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

// =============================================================================
// TESTS
// =============================================================================
