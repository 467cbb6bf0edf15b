use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;
use std::path::PathBuf;

/// An uploaded file spooled to local disk, waiting to be ingested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedArtifact {
    pub temporary_path: PathBuf,
    pub original_name: String,
    pub declared_mime_type: String,
    pub size_in_bytes: u64,
}

impl UploadedArtifact {
    pub fn new(
        temporary_path: impl Into<PathBuf>,
        original_name: impl Into<String>,
        declared_mime_type: impl Into<String>,
        size_in_bytes: u64,
    ) -> Self {
        Self {
            temporary_path: temporary_path.into(),
            original_name: original_name.into(),
            declared_mime_type: declared_mime_type.into(),
            size_in_bytes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Number,
    Boolean,
    String,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Number => "number",
            ColumnType::Boolean => "boolean",
            ColumnType::String => "string",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single converted cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Number(serde_json::Number),
    Boolean(bool),
    Text(String),
}

impl CellValue {
    pub fn column_type(&self) -> ColumnType {
        match self {
            CellValue::Number(_) => ColumnType::Number,
            CellValue::Boolean(_) => ColumnType::Boolean,
            CellValue::Text(_) => ColumnType::String,
        }
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Number(value.into())
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Boolean(value)
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

/// Column name to type mapping, kept in header order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InferredSchema {
    columns: Vec<(String, ColumnType)>,
}

impl InferredSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a column. Returns `false` and leaves the schema untouched when the
    /// name is already present.
    pub fn push(&mut self, name: impl Into<String>, column_type: ColumnType) -> bool {
        let name = name.into();
        if self.get(&name).is_some() {
            return false;
        }
        self.columns.push((name, column_type));
        true
    }

    pub fn get(&self, name: &str) -> Option<ColumnType> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, column_type)| *column_type)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ColumnType)> {
        self.columns.iter().map(|(name, ty)| (name.as_str(), *ty))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, ColumnType)> for InferredSchema {
    fn from_iter<I: IntoIterator<Item = (S, ColumnType)>>(iter: I) -> Self {
        let mut schema = InferredSchema::new();
        for (name, column_type) in iter {
            schema.push(name, column_type);
        }
        schema
    }
}

impl Serialize for InferredSchema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_ordered(&self.columns, serializer)
    }
}

impl<'de> Deserialize<'de> for InferredSchema {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let columns = deserializer.deserialize_map(OrderedMapVisitor::new())?;
        Ok(Self { columns })
    }
}

/// One converted row. Empty cells are left out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataRecord {
    fields: Vec<(String, CellValue)>,
}

impl DataRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<CellValue>) {
        let column = column.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(name, _)| *name == column) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CellValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<S: Into<String>, V: Into<CellValue>> FromIterator<(S, V)> for DataRecord {
    fn from_iter<I: IntoIterator<Item = (S, V)>>(iter: I) -> Self {
        let mut record = DataRecord::new();
        for (column, value) in iter {
            record.insert(column, value);
        }
        record
    }
}

impl Serialize for DataRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_ordered(&self.fields, serializer)
    }
}

impl<'de> Deserialize<'de> for DataRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let fields = deserializer.deserialize_map(OrderedMapVisitor::new())?;
        Ok(Self { fields })
    }
}

fn serialize_ordered<S, V>(entries: &[(String, V)], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    V: Serialize,
{
    let mut map = serializer.serialize_map(Some(entries.len()))?;
    for (key, value) in entries {
        map.serialize_entry(key, value)?;
    }
    map.end()
}

struct OrderedMapVisitor<V> {
    marker: PhantomData<V>,
}

impl<V> OrderedMapVisitor<V> {
    fn new() -> Self {
        Self {
            marker: PhantomData,
        }
    }
}

impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<V> {
    type Value = Vec<(String, V)>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a map keyed by column name")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut entries: Vec<(String, V)> = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((key, value)) = access.next_entry::<String, V>()? {
            if entries.iter().any(|(existing, _)| *existing == key) {
                return Err(serde::de::Error::custom(format!(
                    "duplicate column '{}'",
                    key
                )));
            }
            entries.push((key, value));
        }
        Ok(entries)
    }
}

/// What the metadata store is asked to record for a new upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewDatasourceMetadata {
    pub name: String,
    pub schema: InferredSchema,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasourceMetadata {
    pub id: String,
    pub name: String,
    pub schema: InferredSchema,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadOutcome {
    pub collection_id: String,
}
