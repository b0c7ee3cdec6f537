//! Flat records produced by page extractors and the fixed schema they are
//! coerced to before reaching the CSV sink.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One extracted row: field name → value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    fields: HashMap<String, String>,
    /// Fields whose value is a best guess rather than observed data
    inferred: BTreeSet<String>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(field, value);
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<String>) {
        let field = field.into();
        self.inferred.remove(&field);
        self.fields.insert(field, value.into());
    }

    /// Store a fallback value and flag it as low-confidence.
    ///
    /// Used when an identifying field had to be guessed (e.g. defaulting a
    /// missing province to the first one available).
    pub fn set_inferred(&mut self, field: impl Into<String>, value: impl Into<String>) {
        let field = field.into();
        self.fields.insert(field.clone(), value.into());
        self.inferred.insert(field);
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn is_inferred(&self, field: &str) -> bool {
        self.inferred.contains(field)
    }

    pub fn inferred_fields(&self) -> impl Iterator<Item = &str> {
        self.inferred.iter().map(String::as_str)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// A record with no fields counts as "no data" for the batch pipeline.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Record
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Self::new();
        for (k, v) in iter {
            record.set(k, v);
        }
        record
    }
}

/// What to do with extractor fields the schema does not declare
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtraFieldPolicy {
    #[default]
    Drop,
    Reject,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Schema must declare at least one column")]
    Empty,

    #[error("Duplicate column '{0}' in schema")]
    DuplicateColumn(String),

    #[error("Record contains undeclared fields: {}", .0.join(", "))]
    UndeclaredFields(Vec<String>),
}

/// Column layout declared before a run starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSchema {
    columns: Vec<String>,
    confidence_column: Option<String>,
    extra_fields: ExtraFieldPolicy,
}

impl RecordSchema {
    pub fn new<I, S>(columns: I) -> Result<Self, SchemaError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        if columns.is_empty() {
            return Err(SchemaError::Empty);
        }
        let mut seen = BTreeSet::new();
        for column in &columns {
            if !seen.insert(column.as_str()) {
                return Err(SchemaError::DuplicateColumn(column.clone()));
            }
        }
        Ok(Self {
            columns,
            confidence_column: None,
            extra_fields: ExtraFieldPolicy::Drop,
        })
    }

    /// Append a column listing the record's inferred fields
    pub fn with_confidence_column(mut self, name: impl Into<String>) -> Result<Self, SchemaError> {
        let name = name.into();
        if self.columns.contains(&name) {
            return Err(SchemaError::DuplicateColumn(name));
        }
        self.columns.push(name.clone());
        self.confidence_column = Some(name);
        Ok(self)
    }

    #[must_use]
    pub fn with_extra_fields(mut self, policy: ExtraFieldPolicy) -> Self {
        self.extra_fields = policy;
        self
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn header(&self) -> Vec<&str> {
        self.columns.iter().map(String::as_str).collect()
    }

    /// Project a record onto the declared columns.
    ///
    /// Missing fields become empty strings. Undeclared fields are dropped or
    /// rejected depending on the schema policy.
    pub fn coerce(&self, record: &Record) -> Result<Vec<String>, SchemaError> {
        if self.extra_fields == ExtraFieldPolicy::Reject {
            let mut extra: Vec<String> = record
                .field_names()
                .filter(|name| !self.is_data_column(name))
                .map(str::to_string)
                .collect();
            if !extra.is_empty() {
                extra.sort();
                return Err(SchemaError::UndeclaredFields(extra));
            }
        }

        let row = self
            .columns
            .iter()
            .map(|column| {
                if self.confidence_column.as_deref() == Some(column.as_str()) {
                    record.inferred_fields().collect::<Vec<_>>().join(";")
                } else {
                    record.get(column).unwrap_or_default().to_string()
                }
            })
            .collect();
        Ok(row)
    }

    fn is_data_column(&self, name: &str) -> bool {
        self.confidence_column.as_deref() != Some(name) && self.columns.iter().any(|c| c == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parcel_schema() -> RecordSchema {
        RecordSchema::new(["parcel_id", "province_id", "area"]).unwrap()
    }

    #[test]
    fn coerce_orders_and_defaults_missing_fields() {
        let record = Record::new().with("area", "512.5").with("parcel_id", "P-1");
        let row = parcel_schema().coerce(&record).unwrap();
        assert_eq!(row, vec!["P-1", "", "512.5"]);
    }

    #[test]
    fn extra_fields_are_dropped_by_default() {
        let record = Record::new().with("parcel_id", "P-1").with("debug", "x");
        let row = parcel_schema().coerce(&record).unwrap();
        assert_eq!(row, vec!["P-1", "", ""]);
    }

    #[test]
    fn extra_fields_can_be_rejected() {
        let schema = parcel_schema().with_extra_fields(ExtraFieldPolicy::Reject);
        let record = Record::new().with("parcel_id", "P-1").with("zeta", "1").with("alpha", "2");
        let err = schema.coerce(&record).unwrap_err();
        assert_eq!(
            err,
            SchemaError::UndeclaredFields(vec!["alpha".into(), "zeta".into()])
        );
    }

    #[test]
    fn inferred_fields_are_reported_in_confidence_column() {
        let schema = parcel_schema().with_confidence_column("low_confidence").unwrap();
        let mut record = Record::new().with("parcel_id", "P-1");
        record.set_inferred("province_id", "3");

        let row = schema.coerce(&record).unwrap();
        assert_eq!(row, vec!["P-1", "3", "", "province_id"]);
        assert!(record.is_inferred("province_id"));
    }

    #[test]
    fn observed_value_clears_inferred_flag() {
        let mut record = Record::new();
        record.set_inferred("province_id", "3");
        record.set("province_id", "7");
        assert!(!record.is_inferred("province_id"));
        assert_eq!(record.get("province_id"), Some("7"));
    }

    #[test]
    fn schema_rejects_duplicates_and_empty() {
        assert_eq!(
            RecordSchema::new(Vec::<String>::new()).unwrap_err(),
            SchemaError::Empty
        );
        assert_eq!(
            RecordSchema::new(["a", "a"]).unwrap_err(),
            SchemaError::DuplicateColumn("a".into())
        );
        assert!(parcel_schema().with_confidence_column("area").is_err());
    }

    #[test]
    fn record_from_iterator() {
        let record: Record = [("name", "Tire"), ("price", "120")].into_iter().collect();
        assert_eq!(record.len(), 2);
        assert!(!record.is_empty());
    }
}
