//! MySQL field types and the column value mapping.
//!
//! Rows arrive in the text protocol: every non-NULL payload is a byte string
//! of exact length, without terminator. The mapping onto [`Value`] is:
//!
//! | field type | value |
//! |---|---|
//! | TINY, SHORT, LONG, FLOAT, INT24, DOUBLE | [`Value::Double`] |
//! | LONGLONG | [`Value::Int`], or [`Value::UInt`] for unsigned columns |
//! | absent payload | [`Value::Null`] or [`Value::ExplicitNull`] |
//! | everything else | [`Value::Bytes`] |
//!
//! Narrow numerics are widened to a double on purpose so hosts with a single
//! number type see one representation.

use crate::client::FieldMetadata;
use coio_core::{ColumnInfo, NullMode, Row, RowShape, Value};
use std::sync::Arc;

/// MySQL field type codes.
///
/// These are the `MYSQL_TYPE_*` constants from the MySQL C API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldType {
    /// DECIMAL (MYSQL_TYPE_DECIMAL)
    Decimal = 0x00,
    /// TINYINT (MYSQL_TYPE_TINY)
    Tiny = 0x01,
    /// SMALLINT (MYSQL_TYPE_SHORT)
    Short = 0x02,
    /// INT (MYSQL_TYPE_LONG)
    Long = 0x03,
    /// FLOAT (MYSQL_TYPE_FLOAT)
    Float = 0x04,
    /// DOUBLE (MYSQL_TYPE_DOUBLE)
    Double = 0x05,
    /// NULL (MYSQL_TYPE_NULL)
    Null = 0x06,
    /// TIMESTAMP (MYSQL_TYPE_TIMESTAMP)
    Timestamp = 0x07,
    /// BIGINT (MYSQL_TYPE_LONGLONG)
    LongLong = 0x08,
    /// MEDIUMINT (MYSQL_TYPE_INT24)
    Int24 = 0x09,
    /// DATE (MYSQL_TYPE_DATE)
    Date = 0x0A,
    /// TIME (MYSQL_TYPE_TIME)
    Time = 0x0B,
    /// DATETIME (MYSQL_TYPE_DATETIME)
    DateTime = 0x0C,
    /// YEAR (MYSQL_TYPE_YEAR)
    Year = 0x0D,
    /// NEWDATE (MYSQL_TYPE_NEWDATE)
    NewDate = 0x0E,
    /// VARCHAR (MYSQL_TYPE_VARCHAR)
    VarChar = 0x0F,
    /// BIT (MYSQL_TYPE_BIT)
    Bit = 0x10,
    /// TIMESTAMP2 (MYSQL_TYPE_TIMESTAMP2)
    Timestamp2 = 0x11,
    /// DATETIME2 (MYSQL_TYPE_DATETIME2)
    DateTime2 = 0x12,
    /// TIME2 (MYSQL_TYPE_TIME2)
    Time2 = 0x13,
    /// JSON (MYSQL_TYPE_JSON)
    Json = 0xF5,
    /// NEWDECIMAL (MYSQL_TYPE_NEWDECIMAL)
    NewDecimal = 0xF6,
    /// ENUM (MYSQL_TYPE_ENUM)
    Enum = 0xF7,
    /// SET (MYSQL_TYPE_SET)
    Set = 0xF8,
    /// TINYBLOB (MYSQL_TYPE_TINY_BLOB)
    TinyBlob = 0xF9,
    /// MEDIUMBLOB (MYSQL_TYPE_MEDIUM_BLOB)
    MediumBlob = 0xFA,
    /// LONGBLOB (MYSQL_TYPE_LONG_BLOB)
    LongBlob = 0xFB,
    /// BLOB (MYSQL_TYPE_BLOB)
    Blob = 0xFC,
    /// VARCHAR (MYSQL_TYPE_VAR_STRING)
    VarString = 0xFD,
    /// CHAR (MYSQL_TYPE_STRING)
    String = 0xFE,
    /// GEOMETRY (MYSQL_TYPE_GEOMETRY)
    Geometry = 0xFF,
}

impl FieldType {
    /// Parse a field type from its code. Unknown codes are treated as
    /// strings.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => FieldType::Decimal,
            0x01 => FieldType::Tiny,
            0x02 => FieldType::Short,
            0x03 => FieldType::Long,
            0x04 => FieldType::Float,
            0x05 => FieldType::Double,
            0x06 => FieldType::Null,
            0x07 => FieldType::Timestamp,
            0x08 => FieldType::LongLong,
            0x09 => FieldType::Int24,
            0x0A => FieldType::Date,
            0x0B => FieldType::Time,
            0x0C => FieldType::DateTime,
            0x0D => FieldType::Year,
            0x0E => FieldType::NewDate,
            0x0F => FieldType::VarChar,
            0x10 => FieldType::Bit,
            0x11 => FieldType::Timestamp2,
            0x12 => FieldType::DateTime2,
            0x13 => FieldType::Time2,
            0xF5 => FieldType::Json,
            0xF6 => FieldType::NewDecimal,
            0xF7 => FieldType::Enum,
            0xF8 => FieldType::Set,
            0xF9 => FieldType::TinyBlob,
            0xFA => FieldType::MediumBlob,
            0xFB => FieldType::LongBlob,
            0xFC => FieldType::Blob,
            0xFD => FieldType::VarString,
            0xFE => FieldType::String,
            0xFF => FieldType::Geometry,
            _ => FieldType::String,
        }
    }

    /// Types delivered to the host as a double.
    pub const fn is_widened_numeric(self) -> bool {
        matches!(
            self,
            FieldType::Tiny
                | FieldType::Short
                | FieldType::Long
                | FieldType::Float
                | FieldType::Int24
                | FieldType::Double
        )
    }

    /// Get the type name as a string.
    pub const fn name(self) -> &'static str {
        match self {
            FieldType::Decimal => "DECIMAL",
            FieldType::Tiny => "TINYINT",
            FieldType::Short => "SMALLINT",
            FieldType::Long => "INT",
            FieldType::Float => "FLOAT",
            FieldType::Double => "DOUBLE",
            FieldType::Null => "NULL",
            FieldType::Timestamp => "TIMESTAMP",
            FieldType::LongLong => "BIGINT",
            FieldType::Int24 => "MEDIUMINT",
            FieldType::Date => "DATE",
            FieldType::Time => "TIME",
            FieldType::DateTime => "DATETIME",
            FieldType::Year => "YEAR",
            FieldType::NewDate => "DATE",
            FieldType::VarChar => "VARCHAR",
            FieldType::Bit => "BIT",
            FieldType::Timestamp2 => "TIMESTAMP",
            FieldType::DateTime2 => "DATETIME",
            FieldType::Time2 => "TIME",
            FieldType::Json => "JSON",
            FieldType::NewDecimal => "DECIMAL",
            FieldType::Enum => "ENUM",
            FieldType::Set => "SET",
            FieldType::TinyBlob => "TINYBLOB",
            FieldType::MediumBlob => "MEDIUMBLOB",
            FieldType::LongBlob => "LONGBLOB",
            FieldType::Blob => "BLOB",
            FieldType::VarString => "VARCHAR",
            FieldType::String => "CHAR",
            FieldType::Geometry => "GEOMETRY",
        }
    }
}

/// Column flags in result set metadata.
pub mod column_flags {
    pub const NOT_NULL: u16 = 1;
    pub const PRIMARY_KEY: u16 = 2;
    pub const UNIQUE_KEY: u16 = 4;
    pub const BLOB: u16 = 16;
    pub const UNSIGNED: u16 = 32;
    pub const BINARY: u16 = 128;
    pub const NUM: u16 = 32768;
}

/// Convert one column payload. `None` is an absent payload and always
/// yields NULL, whatever the declared type.
pub fn convert(field: &FieldMetadata, payload: Option<&[u8]>, null_mode: NullMode) -> Value {
    let Some(bytes) = payload else {
        return match null_mode {
            NullMode::Omit => Value::Null,
            NullMode::Explicit => Value::ExplicitNull,
        };
    };

    match field.field_type {
        t if t.is_widened_numeric() => Value::Double(parse_double(bytes)),
        FieldType::LongLong => parse_longlong(bytes, field.is_unsigned())
            .unwrap_or_else(|| Value::Bytes(bytes.to_vec())),
        _ => Value::Bytes(bytes.to_vec()),
    }
}

/// Longest-prefix float parse: leading whitespace is skipped, trailing
/// garbage ignored, and text with no numeric prefix reads as `0.0`.
fn parse_double(bytes: &[u8]) -> f64 {
    let Ok(text) = std::str::from_utf8(bytes) else {
        return 0.0;
    };
    let text = text.trim_start();
    let run = text
        .bytes()
        .take_while(|b| b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'e' | b'E'))
        .count();
    (1..=run)
        .rev()
        .find_map(|end| text[..end].parse::<f64>().ok())
        .unwrap_or(0.0)
}

fn parse_longlong(bytes: &[u8], unsigned: bool) -> Option<Value> {
    let text = std::str::from_utf8(bytes).ok()?.trim();
    if unsigned {
        text.parse::<u64>().ok().map(Value::UInt)
    } else {
        text.parse::<i64>().ok().map(Value::Int)
    }
}

/// Builds rows for one result from per-column payloads.
#[derive(Debug, Clone)]
pub struct RowBuilder {
    fields: Vec<FieldMetadata>,
    columns: Arc<ColumnInfo>,
    shape: RowShape,
    null_mode: NullMode,
}

impl RowBuilder {
    pub fn new(fields: Vec<FieldMetadata>, shape: RowShape, null_mode: NullMode) -> Self {
        let columns = Arc::new(ColumnInfo::new(
            fields.iter().map(|f| f.name.clone()).collect(),
        ));
        Self {
            fields,
            columns,
            shape,
            null_mode,
        }
    }

    pub fn fields(&self) -> &[FieldMetadata] {
        &self.fields
    }

    pub fn columns(&self) -> Arc<ColumnInfo> {
        Arc::clone(&self.columns)
    }

    /// Build a row from one payload per column, in column order. Missing
    /// trailing payloads are treated as NULL.
    pub fn build<'a, I>(&self, payloads: I) -> Row
    where
        I: IntoIterator<Item = Option<&'a [u8]>>,
    {
        let mut payloads = payloads.into_iter();
        let values = self
            .fields
            .iter()
            .map(|field| {
                let payload = payloads.next().flatten();
                match convert(field, payload, self.null_mode) {
                    Value::Null => None,
                    value => Some(value),
                }
            })
            .collect();
        Row::with_columns(self.columns(), self.shape, values)
    }
}
