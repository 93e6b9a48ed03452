//! Column facts from the schema catalog
//!
//! Binlog events don't include column names, signedness or character sets,
//! only types and values. These are looked up in INFORMATION_SCHEMA over a
//! regular client connection when a TABLE_MAP event arrives, and cached per
//! table and table id.

use async_trait::async_trait;
use mysql_async::prelude::*;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

use crate::common::{CdcError, Result};

use super::config::ReplicationConfig;

/// Catalog facts about one column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogColumn {
    pub name: String,
    /// `COLUMN_TYPE` includes `unsigned`
    pub unsigned: bool,
    /// `CHARACTER_SET_NAME`; `None` for numeric and binary columns
    pub charset: Option<String>,
}

impl CatalogColumn {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unsigned: false,
            charset: None,
        }
    }

    pub fn unsigned(mut self) -> Self {
        self.unsigned = true;
        self
    }

    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = Some(charset.into());
        self
    }

    /// Build from an `INFORMATION_SCHEMA.COLUMNS` row.
    pub fn from_catalog(name: String, column_type: &str, charset: Option<String>) -> Self {
        Self {
            name,
            unsigned: column_type.to_ascii_lowercase().contains("unsigned"),
            charset: charset.filter(|c| c != "binary"),
        }
    }
}

/// Source of column facts for a table, in ordinal order
#[async_trait]
pub trait SchemaLookup: Send + Sync {
    async fn columns(&self, schema: &str, table: &str) -> Result<Vec<CatalogColumn>>;
}

#[derive(Debug)]
struct CachedTable {
    /// Table id the columns were resolved for. The server assigns a new id
    /// when a table is reopened after DDL.
    table_id: u64,
    columns: Vec<CatalogColumn>,
}

/// Catalog cache with FIFO eviction
///
/// Uses simple FIFO eviction when the cache exceeds the maximum size to prevent
/// unbounded memory growth.
#[derive(Debug)]
pub struct SchemaCache {
    /// Map of (schema, table) -> columns in order
    tables: HashMap<(String, String), CachedTable>,
    /// Insertion order for FIFO eviction
    insertion_order: VecDeque<(String, String)>,
    max_entries: usize,
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaCache {
    /// Default maximum cache entries
    pub const DEFAULT_MAX_ENTRIES: usize = 1000;

    pub fn new() -> Self {
        Self::with_max_entries(Self::DEFAULT_MAX_ENTRIES)
    }

    /// Create with custom maximum entries (at least one)
    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            tables: HashMap::new(),
            insertion_order: VecDeque::new(),
            max_entries: max_entries.max(1),
        }
    }

    /// Cached columns for `schema.table`, if they were resolved for
    /// `table_id`. A different id means the table may have changed.
    pub fn get_columns(
        &self,
        schema: &str,
        table: &str,
        table_id: u64,
    ) -> Option<&[CatalogColumn]> {
        self.tables
            .get(&(schema.to_string(), table.to_string()))
            .filter(|cached| cached.table_id == table_id)
            .map(|cached| cached.columns.as_slice())
    }

    /// Cache columns; replacing an entry keeps its eviction slot.
    pub fn set_columns(
        &mut self,
        schema: &str,
        table: &str,
        table_id: u64,
        columns: Vec<CatalogColumn>,
    ) {
        use std::collections::hash_map::Entry;

        let key = (schema.to_string(), table.to_string());
        let cached = CachedTable { table_id, columns };

        match self.tables.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                entry.insert(cached);
            }
            Entry::Vacant(entry) => {
                self.insertion_order.push_back(key);
                entry.insert(cached);

                while self.tables.len() > self.max_entries {
                    let Some(oldest) = self.insertion_order.pop_front() else {
                        break;
                    };
                    self.tables.remove(&oldest);
                    debug!("Evicted schema cache entry for {}.{}", oldest.0, oldest.1);
                }
            }
        }
    }

    /// Drop a table's columns, e.g. after they no longer match its layout.
    pub fn invalidate(&mut self, schema: &str, table: &str) {
        let key = (schema.to_string(), table.to_string());
        if self.tables.remove(&key).is_some() {
            self.insertion_order.retain(|k| k != &key);
        }
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn clear(&mut self) {
        self.tables.clear();
        self.insertion_order.clear();
    }
}

/// [`SchemaLookup`] backed by `INFORMATION_SCHEMA.COLUMNS`
pub struct InformationSchemaLookup {
    pool: mysql_async::Pool,
}

impl InformationSchemaLookup {
    const COLUMNS_QUERY: &'static str = r#"
        SELECT COLUMN_NAME, COLUMN_TYPE, CHARACTER_SET_NAME
        FROM INFORMATION_SCHEMA.COLUMNS
        WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
        ORDER BY ORDINAL_POSITION
    "#;

    /// Create a lazily connecting pool for `config`'s server.
    pub fn new(config: &ReplicationConfig) -> Result<Self> {
        // The URL carries credentials; keep it scoped to pool creation
        let opts = {
            let url = config.connection_url();
            mysql_async::Opts::from_url(&url)
                .map_err(|e| CdcError::config(format!("Invalid MySQL connection options: {}", e)))?
        };
        Ok(Self {
            pool: mysql_async::Pool::new(opts),
        })
    }

    pub async fn disconnect(self) -> Result<()> {
        self.pool
            .disconnect()
            .await
            .map_err(|e| CdcError::schema(format!("Failed to close metadata pool: {}", e)))
    }
}

#[async_trait]
impl SchemaLookup for InformationSchemaLookup {
    async fn columns(&self, schema: &str, table: &str) -> Result<Vec<CatalogColumn>> {
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| CdcError::schema(format!("Failed to get metadata connection: {}", e)))?;

        let rows: Vec<(String, String, Option<String>)> = conn
            .exec(Self::COLUMNS_QUERY, (schema, table))
            .await
            .map_err(|e| {
                CdcError::schema(format!(
                    "Failed to query columns for {}.{}: {}",
                    schema, table, e
                ))
            })?;
        let columns: Vec<CatalogColumn> = rows
            .into_iter()
            .map(|(name, column_type, charset)| {
                CatalogColumn::from_catalog(name, &column_type, charset)
            })
            .collect();

        debug!(
            "Loaded {} columns for {}.{}",
            columns.len(),
            schema,
            table
        );
        Ok(columns)
    }
}
