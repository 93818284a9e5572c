//! Parameterized statement construction.
//!
//! Builders are pure: they turn a [`Definition`] plus document data into SQL
//! text with `?` placeholders and a positional parameter list. Document
//! content is untrusted and only ever travels as a bound parameter, never as
//! statement text. Identifiers come from the static Definition Set and are
//! backtick-quoted.

use mongodb::bson::{Bson, Document};
use mysql_async::Value;

use crate::defs::{lookup, Definition};

/// The reserved table holding one replication position per source database.
pub const CHECKPOINT_TABLE: &str = "replication_checkpoint";

/// One executable statement: SQL text plus positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// INSERT (or REPLACE) binding every mapped field through its converter.
/// Fields absent from `doc` bind as NULL.
pub fn insert(def: &Definition, doc: &Document, replace: bool) -> Statement {
    let verb = if replace { "REPLACE" } else { "INSERT" };
    let columns = def
        .fields
        .iter()
        .map(|f| format!("`{}`", f.column))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = vec!["?"; def.fields.len()].join(", ");
    let params = def.fields.iter().map(|f| f.convert(doc)).collect();
    Statement {
        sql: format!(
            "{verb} INTO `{}` ({columns}) VALUES ({placeholders})",
            def.table
        ),
        params,
    }
}

/// UPDATE touching the union of columns named by `set` and `unset`.
/// Unset columns bind as NULL. Returns None when no mapped column is touched,
/// in which case nothing must be executed.
pub fn update(
    def: &Definition,
    id: &Bson,
    set: Option<&Document>,
    unset: Option<&Document>,
) -> Option<Statement> {
    let mut assignments = Vec::new();
    let mut params = Vec::new();
    for f in &def.fields {
        if let Some(value) = set.and_then(|d| lookup(d, &f.field)) {
            assignments.push(format!("`{}` = ?", f.column));
            params.push(f.ty.to_value(Some(value)));
        } else if unset.and_then(|d| lookup(d, &f.field)).is_some() {
            assignments.push(format!("`{}` = ?", f.column));
            params.push(Value::NULL);
        }
    }
    if assignments.is_empty() {
        return None;
    }
    let id_field = def.id_field();
    params.push(id_field.ty.to_value(Some(id)));
    Some(Statement {
        sql: format!(
            "UPDATE `{}` SET {} WHERE `{}` = ?",
            def.table,
            assignments.join(", "),
            id_field.column
        ),
        params,
    })
}

/// DELETE by primary key.
pub fn delete(def: &Definition, id: &Bson) -> Statement {
    let id_field = def.id_field();
    Statement {
        sql: format!("DELETE FROM `{}` WHERE `{}` = ?", def.table, id_field.column),
        params: vec![id_field.ty.to_value(Some(id))],
    }
}

/// DDL recreating the target table for one definition.
pub fn create_table(def: &Definition) -> Vec<String> {
    let columns = def
        .fields
        .iter()
        .map(|f| {
            format!(
                "`{}` {}{}",
                f.column,
                f.ty.sql_type(),
                if f.primary { " PRIMARY KEY" } else { "" }
            )
        })
        .collect::<Vec<_>>()
        .join(", ");
    vec![
        format!("DROP TABLE IF EXISTS `{}`", def.table),
        format!("CREATE TABLE `{}` ({columns})", def.table),
    ]
}

/// DDL recreating the checkpoint table.
pub fn create_checkpoint_table() -> Vec<String> {
    vec![
        format!("DROP TABLE IF EXISTS `{CHECKPOINT_TABLE}`"),
        format!("CREATE TABLE `{CHECKPOINT_TABLE}` (service varchar(20), timestamp BIGINT)"),
    ]
}

/// Seeds the checkpoint row for one source database at position zero.
pub fn seed_checkpoint(service: &str) -> Statement {
    Statement {
        sql: format!("INSERT INTO `{CHECKPOINT_TABLE}` (service, timestamp) VALUES (?, 0)"),
        params: vec![Value::from(service)],
    }
}
