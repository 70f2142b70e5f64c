use std::fmt;

use crate::record::{Record, Value};

/// Destination column types understood by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    String,
    Bool,
    DateTime,
    TimeSpan,
    Int,
    Real,
    Dynamic,
}

impl ColumnType {
    /// Maps the native kind of a first-record value to its column type.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::String(_) => ColumnType::String,
            Value::Bool(_) => ColumnType::Bool,
            Value::Timestamp(_) => ColumnType::DateTime,
            Value::Duration(_) => ColumnType::TimeSpan,
            Value::Int(_) | Value::Binary(_) => ColumnType::Int,
            Value::Real(_) => ColumnType::Real,
            Value::Null | Value::Dynamic(_) => ColumnType::Dynamic,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Bool => "bool",
            ColumnType::DateTime => "datetime",
            ColumnType::TimeSpan => "timespan",
            ColumnType::Int => "int",
            ColumnType::Real => "real",
            ColumnType::Dynamic => "dynamic",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

/// Table layout inferred from the first record a sink sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<Column>,
}

impl TableSchema {
    /// Column order follows the record's field order.
    pub fn infer(table: &str, record: &Record) -> Self {
        let columns = record
            .iter()
            .map(|(name, value)| Column {
                name: name.to_string(),
                column_type: ColumnType::of(value),
            })
            .collect();

        Self {
            table: table.to_string(),
            columns,
        }
    }

    /// `a: string, b: bool, ...`
    pub fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|column| format!("{}: {}", column.name, column.column_type))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn create_merge_command(&self) -> String {
        format!(".create-merge table {} ({})", self.table, self.column_list())
    }
}

pub fn drop_table_command(table: &str) -> String {
    format!(".drop table {table} ifexists")
}

pub fn ingestion_time_policy_command(table: &str) -> String {
    format!(".alter table {table} policy ingestiontime true")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use serde_json::json;

    #[test]
    fn test_infer_keeps_first_record_order() {
        let record: Record = [
            ("a", Value::from("x")),
            ("b", Value::from(true)),
            ("c", Value::from(1.5)),
        ]
        .into_iter()
        .collect();

        let schema = TableSchema::infer("Events", &record);
        assert_eq!(schema.column_list(), "a: string, b: bool, c: real");
        assert_eq!(
            schema.create_merge_command(),
            ".create-merge table Events (a: string, b: bool, c: real)"
        );
    }

    #[test]
    fn test_infer_from_parsed_json() {
        let json: serde_json::Value =
            serde_json::from_str(r#"{"a": "x", "b": true, "c": 3.14}"#).unwrap();
        let record = Record::from_json(json).unwrap();

        let schema = TableSchema::infer("Events", &record);
        assert_eq!(schema.column_list(), "a: string, b: bool, c: real");
    }

    #[test]
    fn test_column_type_mapping() {
        assert_eq!(ColumnType::of(&Value::from(Utc::now())), ColumnType::DateTime);
        assert_eq!(ColumnType::of(&Value::from(Duration::seconds(1))), ColumnType::TimeSpan);
        assert_eq!(ColumnType::of(&Value::from(7i64)), ColumnType::Int);
        assert_eq!(ColumnType::of(&Value::from(vec![0u8, 1])), ColumnType::Int);
        assert_eq!(ColumnType::of(&Value::Null), ColumnType::Dynamic);
        assert_eq!(ColumnType::of(&Value::from(json!([1, 2]))), ColumnType::Dynamic);
    }

    #[test]
    fn test_drop_command() {
        assert_eq!(drop_table_command("Events"), ".drop table Events ifexists");
    }
}
