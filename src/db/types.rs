//! Engine values to JSON row values.
//!
//! A column's declared type picks a [`ValueKind`]; each engine then tries the
//! Rust types that kind can hold, in order, and keeps the first non-null
//! decode. Decimals stay strings so no precision is lost.

use crate::models::{DataField, DriverKind, Row as JsonRow};
use serde_json::Value as JsonValue;
use sqlx::mysql::MySqlRow;
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row, Type, TypeInfo};

/// What a column holds, as far as JSON conversion cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Temporal,
    Other,
}

impl ValueKind {
    /// Kind of a column from its engine type name.
    pub fn of(type_name: &str, driver: DriverKind) -> Self {
        let lower = type_name.to_ascii_lowercase();
        let has = |needle: &str| lower.contains(needle);

        if has("decimal") || has("numeric") {
            // SQLite's NUMERIC affinity stores a float
            return if driver == DriverKind::Sqlite && lower == "numeric" {
                Self::Float
            } else {
                Self::Decimal
            };
        }
        // Before integers: "tinytext" contains "tiny"
        if has("char") || has("text") || lower == "enum" || lower == "set" {
            return Self::Text;
        }
        if has("date") || has("time") || lower == "year" {
            return Self::Temporal;
        }
        if has("int") || has("serial") || has("tiny") {
            return Self::Integer;
        }
        match lower.as_str() {
            "bool" | "boolean" => Self::Boolean,
            "real" | "float4" | "float8" => Self::Float,
            "json" | "jsonb" => Self::Json,
            "bytea" => Self::Binary,
            _ if has("float") || has("double") => Self::Float,
            _ if has("blob") || has("binary") => Self::Binary,
            _ => Self::Other,
        }
    }
}

/// DECIMAL/NUMERIC read as its textual representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

macro_rules! raw_decimal {
    ($db:ty) => {
        impl Type<$db> for RawDecimal {
            fn type_info() -> <$db as sqlx::Database>::TypeInfo {
                <String as Type<$db>>::type_info()
            }

            fn compatible(ty: &<$db as sqlx::Database>::TypeInfo) -> bool {
                let name = ty.name().to_ascii_lowercase();
                name.contains("decimal") || name.contains("numeric")
            }
        }

        impl<'r> Decode<'r, $db> for RawDecimal {
            fn decode(
                value: <$db as sqlx::Database>::ValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                Ok(Self(<&str as Decode<$db>>::decode(value)?.to_string()))
            }
        }
    };
}

raw_decimal!(sqlx::MySql);
raw_decimal!(sqlx::Postgres);

/// First candidate type that decodes a non-null value, mapped to JSON.
macro_rules! first_decoded {
    ($row:expr, $idx:expr; $($ty:ty => $map:expr),+ $(,)?) => {{
        let mut value = JsonValue::Null;
        $(
            if value.is_null() {
                if let Ok(Some(v)) = $row.try_get::<Option<$ty>, _>($idx) {
                    value = ($map)(v);
                }
            }
        )+
        value
    }};
}

/// Binary data as a base64 JSON string.
pub fn encode_binary_value(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    JsonValue::String(STANDARD.encode(bytes))
}

/// Non-finite floats have no JSON number; keep their text.
fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

/// Text column, parsed when the engine calls it JSON.
fn text_value(text: String, type_name: &str) -> JsonValue {
    if type_name.to_ascii_lowercase().contains("json") {
        if let Ok(json) = serde_json::from_str(&text) {
            return json;
        }
    }
    JsonValue::String(text)
}

fn datetime_text(v: chrono::NaiveDateTime) -> JsonValue {
    JsonValue::String(v.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// Quote an identifier the way a driver expects it.
pub fn escape_identifier(name: &str, driver: DriverKind) -> String {
    match driver {
        DriverKind::MySql => format!("`{}`", name.replace('`', "``")),
        DriverKind::MsSql => format!("[{}]", name.replace(']', "]]")),
        _ => format!("\"{}\"", name.replace('"', "\"\"")),
    }
}

/// Conversion of an sqlx row into a JSON map and field metadata.
pub trait RowToJson {
    fn to_json_map(&self) -> JsonRow;
    fn data_fields(&self) -> Vec<DataField>;
}

fn sqlx_fields<C: Column>(columns: &[C], driver: DriverKind) -> Vec<DataField> {
    columns
        .iter()
        .map(|col| {
            let field = DataField::new(col.name(), col.type_info().name())
                .with_escaped(escape_identifier(col.name(), driver));
            if col.type_info().is_null() {
                field.with_flag("null")
            } else {
                field
            }
        })
        .collect()
}

macro_rules! impl_row_to_json {
    ($row:ty, $driver:expr, $decode:path) => {
        impl RowToJson for $row {
            fn to_json_map(&self) -> JsonRow {
                self.columns()
                    .iter()
                    .map(|col| {
                        let type_name = col.type_info().name();
                        let kind = ValueKind::of(type_name, $driver);
                        let value = $decode(self, col.ordinal(), kind, type_name);
                        (col.name().to_string(), value)
                    })
                    .collect()
            }

            fn data_fields(&self) -> Vec<DataField> {
                sqlx_fields(self.columns(), $driver)
            }
        }
    };
}

impl_row_to_json!(MySqlRow, DriverKind::MySql, decode_mysql);
impl_row_to_json!(PgRow, DriverKind::PgSql, decode_postgres);
impl_row_to_json!(SqliteRow, DriverKind::Sqlite, decode_sqlite);

fn decode_mysql(row: &MySqlRow, idx: usize, kind: ValueKind, type_name: &str) -> JsonValue {
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
    match kind {
        ValueKind::Decimal => first_decoded!(row, idx; RawDecimal => |d: RawDecimal| JsonValue::String(d.0)),
        ValueKind::Integer => first_decoded!(row, idx;
            i64 => JsonValue::from,
            u64 => JsonValue::from,
            i32 => JsonValue::from,
            u32 => JsonValue::from,
            i16 => JsonValue::from,
            u16 => JsonValue::from,
            i8 => JsonValue::from,
            u8 => JsonValue::from,
        ),
        ValueKind::Boolean => first_decoded!(row, idx; bool => JsonValue::Bool),
        ValueKind::Float => first_decoded!(row, idx;
            f64 => float_value,
            f32 => |v: f32| float_value(v as f64),
        ),
        ValueKind::Binary => first_decoded!(row, idx; Vec<u8> => |b: Vec<u8>| encode_binary_value(&b)),
        ValueKind::Json => first_decoded!(row, idx; JsonValue => |v| v),
        ValueKind::Temporal => first_decoded!(row, idx;
            NaiveDateTime => datetime_text,
            DateTime<Utc> => |v: DateTime<Utc>| datetime_text(v.naive_utc()),
            NaiveDate => |v: NaiveDate| JsonValue::String(v.to_string()),
            NaiveTime => |v: NaiveTime| JsonValue::String(v.to_string()),
            u16 => JsonValue::from,
        ),
        ValueKind::Text | ValueKind::Other => first_decoded!(row, idx;
            String => |s| text_value(s, type_name),
            // information_schema columns come back as VARBINARY on some servers
            Vec<u8> => |b: Vec<u8>| JsonValue::String(String::from_utf8_lossy(&b).into_owned()),
        ),
    }
}

fn decode_postgres(row: &PgRow, idx: usize, kind: ValueKind, type_name: &str) -> JsonValue {
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
    match kind {
        ValueKind::Decimal => first_decoded!(row, idx; RawDecimal => |d: RawDecimal| JsonValue::String(d.0)),
        ValueKind::Integer => first_decoded!(row, idx;
            i64 => JsonValue::from,
            i32 => JsonValue::from,
            i16 => JsonValue::from,
        ),
        ValueKind::Boolean => first_decoded!(row, idx; bool => JsonValue::Bool),
        ValueKind::Float => first_decoded!(row, idx;
            f64 => float_value,
            f32 => |v: f32| float_value(v as f64),
        ),
        ValueKind::Binary => first_decoded!(row, idx; Vec<u8> => |b: Vec<u8>| encode_binary_value(&b)),
        ValueKind::Json => first_decoded!(row, idx; JsonValue => |v| v),
        ValueKind::Temporal => first_decoded!(row, idx;
            NaiveDateTime => datetime_text,
            DateTime<Utc> => |v: DateTime<Utc>| JsonValue::String(v.to_rfc3339()),
            NaiveDate => |v: NaiveDate| JsonValue::String(v.to_string()),
            NaiveTime => |v: NaiveTime| JsonValue::String(v.to_string()),
            String => JsonValue::String,
        ),
        ValueKind::Text | ValueKind::Other => {
            first_decoded!(row, idx; String => |s| text_value(s, type_name))
        }
    }
}

fn decode_sqlite(row: &SqliteRow, idx: usize, kind: ValueKind, type_name: &str) -> JsonValue {
    match kind {
        ValueKind::Integer => first_decoded!(row, idx; i64 => JsonValue::from),
        ValueKind::Boolean => first_decoded!(row, idx; bool => JsonValue::Bool),
        ValueKind::Float | ValueKind::Decimal => first_decoded!(row, idx; f64 => float_value),
        ValueKind::Binary => first_decoded!(row, idx; Vec<u8> => |b: Vec<u8>| encode_binary_value(&b)),
        // Expression columns carry their runtime storage class
        _ => first_decoded!(row, idx;
            String => |s| text_value(s, type_name),
            i64 => JsonValue::from,
            f64 => float_value,
        ),
    }
}

pub mod mssql {
    //! Decoding for tiberius rows, which carry typed cells instead of sqlx values.

    use super::{encode_binary_value, escape_identifier, float_value};
    use crate::models::{DataField, DriverKind, Row as JsonRow};
    use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
    use serde_json::Value as JsonValue;
    use tiberius::{ColumnData, FromSql};

    /// Convert one MsSql row into a JSON map.
    pub fn row_to_json(row: tiberius::Row) -> JsonRow {
        let names: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
        names
            .into_iter()
            .zip(row.into_iter())
            .map(|(name, data)| (name, decode_cell(&data)))
            .collect()
    }

    /// Field metadata for an MsSql row.
    pub fn data_fields(row: &tiberius::Row) -> Vec<DataField> {
        row.columns()
            .iter()
            .map(|col| {
                DataField::new(col.name(), format!("{:?}", col.column_type()))
                    .with_escaped(escape_identifier(col.name(), DriverKind::MsSql))
            })
            .collect()
    }

    fn decode_cell(data: &ColumnData<'static>) -> JsonValue {
        match data {
            ColumnData::U8(v) => v.map(JsonValue::from).unwrap_or_default(),
            ColumnData::I16(v) => v.map(JsonValue::from).unwrap_or_default(),
            ColumnData::I32(v) => v.map(JsonValue::from).unwrap_or_default(),
            ColumnData::I64(v) => v.map(JsonValue::from).unwrap_or_default(),
            ColumnData::F32(v) => v.map(|v| float_value(v as f64)).unwrap_or_default(),
            ColumnData::F64(v) => v.map(float_value).unwrap_or_default(),
            ColumnData::Bit(v) => v.map(JsonValue::Bool).unwrap_or_default(),
            ColumnData::String(v) => v
                .as_ref()
                .map(|s| JsonValue::String(s.to_string()))
                .unwrap_or_default(),
            ColumnData::Guid(v) => v
                .map(|g| JsonValue::String(g.to_string()))
                .unwrap_or_default(),
            ColumnData::Binary(v) => v
                .as_ref()
                .map(|b| encode_binary_value(b))
                .unwrap_or_default(),
            ColumnData::Numeric(v) => v
                .map(|n| JsonValue::String(n.to_string()))
                .unwrap_or_default(),
            other => decode_temporal(other),
        }
    }

    fn decode_temporal(data: &ColumnData<'static>) -> JsonValue {
        if let Ok(Some(v)) = NaiveDateTime::from_sql(data) {
            return super::datetime_text(v);
        }
        if let Ok(Some(v)) = DateTime::<FixedOffset>::from_sql(data) {
            return JsonValue::String(v.to_rfc3339());
        }
        if let Ok(Some(v)) = NaiveDate::from_sql(data) {
            return JsonValue::String(v.to_string());
        }
        if let Ok(Some(v)) = NaiveTime::from_sql(data) {
            return JsonValue::String(v.to_string());
        }
        JsonValue::Null
    }
}
