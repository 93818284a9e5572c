//! The Definition Set: the static mapping from source collections to target
//! tables.
//!
//! A [`Definition`] names one collection/table pair and carries an ordered
//! list of [`FieldMapping`]s, exactly one of which (always `_id`) is the
//! primary key. Definitions are built once from the configuration and shared
//! read-only between the tailer and the mutation executor.

use chrono::{Datelike, Timelike};
use mongodb::bson::{Bson, Document};
use mysql_async::Value;
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::{Config, FieldCase};
use crate::{Error, Result};

/// The source field that is always the primary key.
pub const ID_FIELD: &str = "_id";

/// Declared field type, each mapped to one fixed MySQL column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Boolean,
    Number,
    String,
    Date,
}

impl ColumnType {
    pub fn parse(alias: &str) -> Result<Self> {
        match alias {
            "boolean" => Ok(ColumnType::Boolean),
            "number" => Ok(ColumnType::Number),
            "string" => Ok(ColumnType::String),
            "date" => Ok(ColumnType::Date),
            other => Err(Error::Config(format!("unknown field type: {other}"))),
        }
    }

    pub fn sql_type(self) -> &'static str {
        match self {
            ColumnType::Boolean => "TINYINT",
            ColumnType::Number => "DOUBLE",
            ColumnType::String => "VARCHAR(255)",
            ColumnType::Date => "DATETIME",
        }
    }

    /// Converts a resolved BSON value into a statement parameter.
    /// Absent or unconvertible values render as NULL.
    pub fn to_value(self, field: Option<&Bson>) -> Value {
        let Some(field) = field else {
            return Value::NULL;
        };
        match self {
            ColumnType::Boolean => match field {
                Bson::Boolean(b) => Value::Int(*b as i64),
                Bson::Int32(i) => Value::Int((*i != 0) as i64),
                Bson::Int64(i) => Value::Int((*i != 0) as i64),
                Bson::Double(f) => Value::Int((*f != 0.0) as i64),
                _ => Value::NULL,
            },
            ColumnType::Number => match field {
                Bson::Int32(i) => Value::Double(*i as f64),
                Bson::Int64(i) => Value::Double(*i as f64),
                Bson::Double(f) => Value::Double(*f),
                Bson::Boolean(b) => Value::Double(*b as i64 as f64),
                Bson::String(s) => match s.parse::<f64>() {
                    Ok(f) => Value::Double(f),
                    Err(_) => Value::NULL,
                },
                _ => Value::NULL,
            },
            ColumnType::String => match field {
                Bson::String(s) => Value::from(s.clone()),
                Bson::ObjectId(oid) => Value::from(oid.to_hex()),
                Bson::Int32(i) => Value::from(i.to_string()),
                Bson::Int64(i) => Value::from(i.to_string()),
                Bson::Double(f) => Value::from(f.to_string()),
                Bson::Boolean(b) => Value::from(b.to_string()),
                Bson::DateTime(dt) => Value::from(dt.to_chrono().to_rfc3339()),
                Bson::Document(_) | Bson::Array(_) => Value::from(field.to_string()),
                Bson::Null | Bson::Undefined => Value::NULL,
                other => Value::from(other.to_string()),
            },
            ColumnType::Date => match field {
                Bson::DateTime(dt) => datetime_value(dt.to_chrono()),
                Bson::String(s) => match chrono::DateTime::parse_from_rfc3339(s) {
                    Ok(dt) => datetime_value(dt.with_timezone(&chrono::Utc)),
                    Err(_) => Value::NULL,
                },
                Bson::Int64(ms) => match chrono::DateTime::from_timestamp_millis(*ms) {
                    Some(dt) => datetime_value(dt),
                    None => Value::NULL,
                },
                Bson::Double(ms) => match chrono::DateTime::from_timestamp_millis(*ms as i64) {
                    Some(dt) => datetime_value(dt),
                    None => Value::NULL,
                },
                Bson::Timestamp(ts) => match chrono::DateTime::from_timestamp(ts.time as i64, 0) {
                    Some(dt) => datetime_value(dt),
                    None => Value::NULL,
                },
                _ => Value::NULL,
            },
        }
    }
}

fn datetime_value(dt: chrono::DateTime<chrono::Utc>) -> Value {
    let naive = dt.naive_utc();
    Value::Date(
        naive.year() as u16,
        naive.month() as u8,
        naive.day() as u8,
        naive.hour() as u8,
        naive.minute() as u8,
        naive.second() as u8,
        naive.nanosecond() / 1000,
    )
}

/// One source-field-to-target-column mapping.
#[derive(Debug, Clone)]
pub struct FieldMapping {
    /// Dot-separated source field path.
    pub field: String,
    /// Target column name, after case conversion.
    pub column: String,
    pub ty: ColumnType,
    pub primary: bool,
}

impl FieldMapping {
    /// Resolves this mapping's field in `doc` and converts it.
    pub fn convert(&self, doc: &Document) -> Value {
        self.ty.to_value(lookup(doc, &self.field))
    }
}

/// Static mapping from one source collection to one target table.
#[derive(Debug, Clone)]
pub struct Definition {
    /// Source collection name.
    pub collection: String,
    /// Source namespace, `<database>.<collection>`.
    pub ns: String,
    /// Target table name, prefix applied.
    pub table: String,
    pub fields: Vec<FieldMapping>,
    id_index: usize,
}

impl Definition {
    pub fn new(
        collection: String,
        ns: String,
        table: String,
        fields: Vec<FieldMapping>,
    ) -> Result<Self> {
        let id_index = fields
            .iter()
            .position(|f| f.primary)
            .ok_or_else(|| Error::Config(format!("collection {collection} maps no {ID_FIELD}")))?;
        Ok(Self {
            collection,
            ns,
            table,
            fields,
            id_index,
        })
    }

    pub fn id_field(&self) -> &FieldMapping {
        &self.fields[self.id_index]
    }
}

/// Resolves a dot-separated path against a document.
///
/// A literal dotted key wins over nested traversal, since update modifier
/// payloads (`$set`/`$unset`) address nested fields with flat dotted keys.
pub fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    if let Some(value) = doc.get(path) {
        return Some(value);
    }
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_document()?.get(part)?;
    }
    Some(current)
}

/// Builds the shared Definition Set from the configuration.
pub fn build_definitions(config: &Config) -> Result<Arc<Vec<Definition>>> {
    let db = config.database_name()?;
    let exclusions: HashSet<&str> = name_list(&config.exclusions);
    let inclusions: HashSet<&str> = name_list(&config.inclusions);

    let mut defs = Vec::with_capacity(config.collections.len());
    for (name, field_specs) in &config.collections {
        let mut fields = Vec::new();
        for (field, alias) in field_specs {
            if field != ID_FIELD {
                if exclusions.contains(field.as_str()) {
                    continue;
                }
                if !inclusions.is_empty() && !inclusions.contains(field.as_str()) {
                    continue;
                }
            }
            fields.push(FieldMapping {
                column: column_name(field, config.field_case),
                ty: ColumnType::parse(alias)?,
                primary: field == ID_FIELD,
                field: field.clone(),
            });
        }
        defs.push(Definition::new(
            name.clone(),
            format!("{db}.{name}"),
            format!("{}{}", config.prefix, name),
            fields,
        )?);
    }
    Ok(Arc::new(defs))
}

fn name_list(raw: &str) -> HashSet<&str> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Target column name for a source field path. Nested path separators become
/// underscores before the configured case conversion is applied.
fn column_name(field: &str, case: FieldCase) -> String {
    let flat = field.replace('.', "_");
    match case {
        FieldCase::None => flat,
        FieldCase::Camel => to_camel(&flat),
        FieldCase::Snake => to_snake(&flat),
    }
}

fn to_snake(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for (i, c) in s.char_indices() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn to_camel(s: &str) -> String {
    let prefix_len = s.len() - s.trim_start_matches('_').len();
    let (prefix, body) = s.split_at(prefix_len);
    let mut out = String::with_capacity(s.len());
    out.push_str(prefix);
    let mut upper_next = false;
    for c in body.chars() {
        if c == '_' {
            upper_next = true;
        } else if upper_next {
            out.push(c.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}
