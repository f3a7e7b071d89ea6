//! Record Adapter: typed access to the external record store

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;

mod airtable;
mod filter;
#[cfg(test)]
pub mod memory;
pub mod schema;

pub use airtable::AirtableStore;
pub use filter::Filter;
pub use schema::{FromRecord, ToFields};

/// Flat field map as the store holds it
pub type Fields = Map<String, Value>;

/// A single record as returned by the store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(default)]
    pub fields: Fields,
    #[serde(default, rename = "createdTime", skip_serializing_if = "Option::is_none")]
    pub created_time: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Boards,
    Sessions,
    Topics,
    Votes,
    Comments,
    Users,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Boards => "boards",
            Table::Sessions => "sessions",
            Table::Topics => "topics",
            Table::Votes => "votes",
            Table::Comments => "comments",
            Table::Users => "users",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub filter: Option<Filter>,
    pub max_records: Option<u32>,
}

impl ListQuery {
    pub fn filtered(filter: Filter) -> Self {
        Self {
            filter: Some(filter),
            max_records: None,
        }
    }

    pub fn limit(mut self, max_records: u32) -> Self {
        self.max_records = Some(max_records);
        self
    }
}

/// Storage seam the ledger and loader are written against
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch one record. A missing record is `StoreError::Upstream` with status 404.
    async fn get(&self, table: Table, id: &str) -> Result<Record, StoreError>;

    /// All records matching the query, across every page
    async fn list(&self, table: Table, query: ListQuery) -> Result<Vec<Record>, StoreError>;

    async fn create(&self, table: Table, fields: Fields) -> Result<Record, StoreError>;

    /// Partial update: only the given fields change
    async fn update(&self, table: Table, id: &str, fields: Fields) -> Result<Record, StoreError>;

    async fn delete(&self, table: Table, id: &str) -> Result<(), StoreError>;
}

/// Fetch one record, with a missing record mapped to `None`
pub async fn fetch_optional<T: FromRecord>(
    store: &dyn RecordStore,
    table: Table,
    id: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(table, id).await {
        Ok(record) => Ok(Some(T::from_record(record))),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

pub async fn list_all<T: FromRecord>(
    store: &dyn RecordStore,
    table: Table,
    query: ListQuery,
) -> Result<Vec<T>, StoreError> {
    let records = store.list(table, query).await?;
    Ok(records.into_iter().map(T::from_record).collect())
}

pub async fn insert<T: FromRecord>(
    store: &dyn RecordStore,
    table: Table,
    input: &impl ToFields,
) -> Result<T, StoreError> {
    store.create(table, input.to_fields()).await.map(T::from_record)
}

pub async fn patch<T: FromRecord>(
    store: &dyn RecordStore,
    table: Table,
    id: &str,
    input: &impl ToFields,
) -> Result<T, StoreError> {
    store.update(table, id, input.to_fields()).await.map(T::from_record)
}
