//! In-memory `RecordStore` for tests. Evaluates filters the way the store does.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{Fields, Filter, ListQuery, Record, RecordStore, Table};
use crate::error::StoreError;

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<Table, BTreeMap<String, Fields>>>,
    next_id: AtomicUsize,
    failing: Mutex<HashSet<Table>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record with a chosen id
    pub fn seed(&self, table: Table, id: &str, fields: Value) {
        let fields = fields.as_object().cloned().unwrap_or_default();
        self.tables
            .lock()
            .unwrap()
            .entry(table)
            .or_default()
            .insert(id.to_string(), fields);
    }

    /// Make every request against `table` fail with a 503
    pub fn fail(&self, table: Table) {
        self.failing.lock().unwrap().insert(table);
    }

    pub fn count(&self, table: Table) -> usize {
        self.tables
            .lock()
            .unwrap()
            .get(&table)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    fn check(&self, table: Table) -> Result<(), StoreError> {
        if self.failing.lock().unwrap().contains(&table) {
            return Err(StoreError::upstream(
                503,
                json!({ "error": { "message": "service unavailable" } }),
            ));
        }
        Ok(())
    }

    fn not_found() -> StoreError {
        StoreError::upstream(404, json!({ "error": "NOT_FOUND" }))
    }
}

fn joined(value: Option<&Value>) -> String {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(","),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn matches(filter: &Filter, fields: &Fields) -> bool {
    match filter {
        Filter::LinksTo { field, id } => joined(fields.get(*field)).contains(id.as_str()),
        Filter::Equals { field, value } => joined(fields.get(*field)) == *value,
        Filter::And(parts) => parts.iter().all(|part| matches(part, fields)),
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, table: Table, id: &str) -> Result<Record, StoreError> {
        self.check(table)?;
        let tables = self.tables.lock().unwrap();
        let fields = tables
            .get(&table)
            .and_then(|rows| rows.get(id))
            .ok_or_else(Self::not_found)?;
        Ok(Record {
            id: id.to_string(),
            fields: fields.clone(),
            created_time: None,
        })
    }

    async fn list(&self, table: Table, query: ListQuery) -> Result<Vec<Record>, StoreError> {
        self.check(table)?;
        let tables = self.tables.lock().unwrap();
        let limit = query.max_records.map(|n| n as usize).unwrap_or(usize::MAX);
        Ok(tables
            .get(&table)
            .into_iter()
            .flat_map(|rows| rows.iter())
            .filter(|(_, fields)| query.filter.as_ref().map_or(true, |f| matches(f, fields)))
            .take(limit)
            .map(|(id, fields)| Record {
                id: id.clone(),
                fields: fields.clone(),
                created_time: None,
            })
            .collect())
    }

    async fn create(&self, table: Table, fields: Fields) -> Result<Record, StoreError> {
        self.check(table)?;
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = format!("rec{}{:04}", table.name(), n);
        self.tables
            .lock()
            .unwrap()
            .entry(table)
            .or_default()
            .insert(id.clone(), fields.clone());
        Ok(Record {
            id,
            fields,
            created_time: None,
        })
    }

    async fn update(&self, table: Table, id: &str, fields: Fields) -> Result<Record, StoreError> {
        self.check(table)?;
        let mut tables = self.tables.lock().unwrap();
        let existing = tables
            .get_mut(&table)
            .and_then(|rows| rows.get_mut(id))
            .ok_or_else(Self::not_found)?;
        existing.extend(fields);
        Ok(Record {
            id: id.to_string(),
            fields: existing.clone(),
            created_time: None,
        })
    }

    async fn delete(&self, table: Table, id: &str) -> Result<(), StoreError> {
        self.check(table)?;
        let mut tables = self.tables.lock().unwrap();
        tables
            .get_mut(&table)
            .and_then(|rows| rows.remove(id))
            .map(|_| ())
            .ok_or_else(Self::not_found)
    }
}
