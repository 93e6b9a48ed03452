//! Table map cache
//!
//! Row events only carry a numeric table id and positional values. The
//! layout needed to read them arrives in a preceding TABLE_MAP event and is
//! kept here, keyed by table id, until a newer map for the same id replaces
//! it.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;

use super::error::DecodeError;
use super::schema::CatalogColumn;

/// MySQL column types as they appear in TABLE_MAP events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ColumnType {
    Decimal = 0,
    Tiny = 1,
    Short = 2,
    Long = 3,
    Float = 4,
    Double = 5,
    Null = 6,
    Timestamp = 7,
    LongLong = 8,
    Int24 = 9,
    Date = 10,
    Time = 11,
    DateTime = 12,
    Year = 13,
    NewDate = 14,
    Varchar = 15,
    Bit = 16,
    Timestamp2 = 17,
    DateTime2 = 18,
    Time2 = 19,
    TypedArray = 20,
    Json = 245,
    NewDecimal = 246,
    Enum = 247,
    Set = 248,
    TinyBlob = 249,
    MediumBlob = 250,
    LongBlob = 251,
    Blob = 252,
    VarString = 253,
    String = 254,
    Geometry = 255,
}

impl TryFrom<u8> for ColumnType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => ColumnType::Decimal,
            1 => ColumnType::Tiny,
            2 => ColumnType::Short,
            3 => ColumnType::Long,
            4 => ColumnType::Float,
            5 => ColumnType::Double,
            6 => ColumnType::Null,
            7 => ColumnType::Timestamp,
            8 => ColumnType::LongLong,
            9 => ColumnType::Int24,
            10 => ColumnType::Date,
            11 => ColumnType::Time,
            12 => ColumnType::DateTime,
            13 => ColumnType::Year,
            14 => ColumnType::NewDate,
            15 => ColumnType::Varchar,
            16 => ColumnType::Bit,
            17 => ColumnType::Timestamp2,
            18 => ColumnType::DateTime2,
            19 => ColumnType::Time2,
            20 => ColumnType::TypedArray,
            245 => ColumnType::Json,
            246 => ColumnType::NewDecimal,
            247 => ColumnType::Enum,
            248 => ColumnType::Set,
            249 => ColumnType::TinyBlob,
            250 => ColumnType::MediumBlob,
            251 => ColumnType::LongBlob,
            252 => ColumnType::Blob,
            253 => ColumnType::VarString,
            254 => ColumnType::String,
            255 => ColumnType::Geometry,
            other => return Err(DecodeError::UnsupportedColumnType(other)),
        })
    }
}

impl ColumnType {
    /// Type code on the wire
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Width of this type's entry in the TABLE_MAP metadata block.
    pub fn metadata_len(self) -> usize {
        match self {
            ColumnType::Float
            | ColumnType::Double
            | ColumnType::Blob
            | ColumnType::TinyBlob
            | ColumnType::MediumBlob
            | ColumnType::LongBlob
            | ColumnType::Json
            | ColumnType::Geometry
            | ColumnType::Time2
            | ColumnType::DateTime2
            | ColumnType::Timestamp2 => 1,
            ColumnType::Bit
            | ColumnType::Varchar
            | ColumnType::VarString
            | ColumnType::NewDecimal
            | ColumnType::String
            | ColumnType::Enum
            | ColumnType::Set => 2,
            _ => 0,
        }
    }
}

/// One column of a mapped table
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    pub column_type: ColumnType,
    /// Type metadata from the TABLE_MAP event.
    ///
    /// - VARCHAR / VAR_STRING: maximum length in bytes
    /// - STRING / ENUM / SET: `(real_type << 8) | length`
    /// - NEWDECIMAL: `(precision << 8) | scale`
    /// - BIT: `(bytes << 8) | bits`
    /// - BLOB / JSON / GEOMETRY: width of the length prefix
    /// - FLOAT / DOUBLE: storage size
    /// - TIME2 / DATETIME2 / TIMESTAMP2: fractional seconds precision
    pub metadata: u16,
    pub nullable: bool,
    /// Column name from the schema catalog, when known
    pub name: Option<String>,
    /// Integer columns declared `UNSIGNED` (catalog only)
    pub unsigned: bool,
    /// Character set of text columns (catalog only). TEXT columns share the
    /// BLOB wire types and are told apart by this.
    pub charset: Option<String>,
}

impl ColumnDescriptor {
    pub fn new(column_type: ColumnType, metadata: u16, nullable: bool) -> Self {
        Self {
            column_type,
            metadata,
            nullable,
            name: None,
            unsigned: false,
            charset: None,
        }
    }

    pub fn is_text(&self) -> bool {
        self.charset.is_some()
    }

    fn apply_catalog(&mut self, catalog: &CatalogColumn) {
        self.name = Some(catalog.name.clone());
        self.unsigned = catalog.unsigned;
        self.charset = catalog.charset.clone();
    }
}

/// Schema-qualified reference to a mapped table
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub table_id: u64,
    pub schema: String,
    pub table: String,
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Layout announced by a TABLE_MAP event
#[derive(Debug, Clone, PartialEq)]
pub struct TableMapEntry {
    pub table_id: u64,
    pub flags: u16,
    pub schema: String,
    pub table: String,
    pub columns: Vec<ColumnDescriptor>,
}

impl TableMapEntry {
    pub fn table_ref(&self) -> TableRef {
        TableRef {
            table_id: self.table_id,
            schema: self.schema.clone(),
            table: self.table.clone(),
        }
    }

    /// Name used for column `idx` in row images: the catalog name when
    /// known, `col{idx}` otherwise.
    pub fn column_name(&self, idx: usize) -> String {
        self.columns
            .get(idx)
            .and_then(|c| c.name.clone())
            .unwrap_or_else(|| format!("col{}", idx))
    }

    /// True once every column has a catalog name.
    pub fn has_column_names(&self) -> bool {
        !self.columns.is_empty() && self.columns.iter().all(|c| c.name.is_some())
    }
}

/// Table id → layout cache, owned by the stream's read loop
#[derive(Debug, Default)]
pub struct TableMapCache {
    tables: HashMap<u64, TableMapEntry>,
}

impl TableMapCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or fully replace the entry for `table_id`.
    pub fn on_table_map(
        &mut self,
        table_id: u64,
        schema: impl Into<String>,
        table: impl Into<String>,
        columns: Vec<ColumnDescriptor>,
    ) -> &TableMapEntry {
        self.insert(TableMapEntry {
            table_id,
            flags: 0,
            schema: schema.into(),
            table: table.into(),
            columns,
        })
    }

    /// Insert or fully replace an already built entry.
    pub fn insert(&mut self, entry: TableMapEntry) -> &TableMapEntry {
        match self.tables.entry(entry.table_id) {
            Entry::Occupied(mut occupied) => {
                occupied.insert(entry);
                occupied.into_mut()
            }
            Entry::Vacant(vacant) => vacant.insert(entry),
        }
    }

    pub fn lookup(&self, table_id: u64) -> Option<&TableMapEntry> {
        self.tables.get(&table_id)
    }

    /// Attach catalog names, signedness and character sets to a cached
    /// entry.
    ///
    /// Returns `false` (and leaves the entry untouched) when the table id is
    /// unknown or the catalog column count differs from the mapped one.
    pub fn apply_catalog(&mut self, table_id: u64, catalog: &[CatalogColumn]) -> bool {
        match self.tables.get_mut(&table_id) {
            Some(entry) if entry.columns.len() == catalog.len() => {
                for (column, catalog) in entry.columns.iter_mut().zip(catalog) {
                    column.apply_catalog(catalog);
                }
                true
            }
            _ => false,
        }
    }

    pub fn clear(&mut self) {
        self.tables.clear();
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn catalog(names: &[&str]) -> Vec<CatalogColumn> {
        names.iter().map(|name| CatalogColumn::new(*name)).collect()
    }

    fn int_varchar() -> Vec<ColumnDescriptor> {
        vec![
            ColumnDescriptor::new(ColumnType::Long, 0, false),
            ColumnDescriptor::new(ColumnType::Varchar, 255, true),
        ]
    }

    #[test]
    fn test_column_type_from_u8() {
        assert_eq!(ColumnType::try_from(1).unwrap(), ColumnType::Tiny);
        assert_eq!(ColumnType::try_from(15).unwrap(), ColumnType::Varchar);
        assert_eq!(ColumnType::try_from(245).unwrap(), ColumnType::Json);
        assert_eq!(ColumnType::try_from(254).unwrap(), ColumnType::String);
        assert_eq!(
            ColumnType::try_from(200).unwrap_err(),
            DecodeError::UnsupportedColumnType(200)
        );
        assert_eq!(ColumnType::NewDecimal.code(), 246);
    }

    #[test]
    fn test_metadata_len() {
        assert_eq!(ColumnType::Long.metadata_len(), 0);
        assert_eq!(ColumnType::Double.metadata_len(), 1);
        assert_eq!(ColumnType::DateTime2.metadata_len(), 1);
        assert_eq!(ColumnType::Varchar.metadata_len(), 2);
        assert_eq!(ColumnType::NewDecimal.metadata_len(), 2);
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut cache = TableMapCache::new();
        assert!(cache.lookup(7).is_none());

        cache.on_table_map(7, "shop", "orders", int_varchar());
        let entry = cache.lookup(7).unwrap();
        assert_eq!(entry.schema, "shop");
        assert_eq!(entry.table, "orders");
        assert_eq!(entry.columns.len(), 2);
        assert_eq!(entry.table_ref().to_string(), "shop.orders");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_reapply_replaces_entry() {
        let mut cache = TableMapCache::new();
        cache.on_table_map(7, "shop", "orders", int_varchar());
        assert!(cache.apply_catalog(7, &catalog(&["id", "name"])));

        cache.on_table_map(
            7,
            "shop",
            "orders_v2",
            vec![ColumnDescriptor::new(ColumnType::LongLong, 0, false)],
        );
        let entry = cache.lookup(7).unwrap();
        assert_eq!(entry.table, "orders_v2");
        assert_eq!(entry.columns.len(), 1);
        assert_eq!(entry.columns[0].column_type, ColumnType::LongLong);
        assert_eq!(entry.columns[0].name, None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_column_names() {
        let mut cache = TableMapCache::new();
        cache.on_table_map(7, "shop", "orders", int_varchar());
        assert_eq!(cache.lookup(7).unwrap().column_name(1), "col1");
        assert!(!cache.lookup(7).unwrap().has_column_names());

        // Mismatched count is rejected
        assert!(!cache.apply_catalog(7, &catalog(&["id"])));
        assert!(!cache.apply_catalog(8, &catalog(&["id", "name"])));

        assert!(cache.apply_catalog(7, &catalog(&["id", "name"])));
        let entry = cache.lookup(7).unwrap();
        assert_eq!(entry.column_name(0), "id");
        assert_eq!(entry.column_name(1), "name");
        assert!(entry.has_column_names());
    }

    #[test]
    fn test_catalog_signedness_and_charset() {
        let mut cache = TableMapCache::new();
        cache.on_table_map(7, "shop", "orders", int_varchar());

        assert!(cache.apply_catalog(
            7,
            &[
                CatalogColumn::new("id").unsigned(),
                CatalogColumn::new("name").with_charset("utf8mb4"),
            ]
        ));
        let entry = cache.lookup(7).unwrap();
        assert!(entry.columns[0].unsigned);
        assert!(!entry.columns[0].is_text());
        assert!(!entry.columns[1].unsigned);
        assert!(entry.columns[1].is_text());
    }

    #[test]
    fn test_clear() {
        let mut cache = TableMapCache::new();
        cache.on_table_map(1, "a", "b", int_varchar());
        cache.on_table_map(2, "a", "c", int_varchar());
        assert_eq!(cache.len(), 2);
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.lookup(1).is_none());
    }
}
