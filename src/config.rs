use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::{Error, Result};

/// Runtime configuration, read from a JSON file.
///
/// The shape matches the source system's conventional config file:
///
/// ```json
/// {
///   "src": "mongodb://localhost:27017/app",
///   "dist": "mysql://root@localhost:3306/app",
///   "prefix": "t_",
///   "fieldCase": "snake",
///   "collections": {
///     "users": { "_id": "string", "name": "string", "age": "number" }
///   }
/// }
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// MongoDB URL, must name the database to replicate from.
    pub src: String,
    /// MySQL URL the mutations are applied to.
    pub dist: String,
    /// Prefix prepended to every target table name.
    #[serde(default)]
    pub prefix: String,
    /// Case conversion applied to target column names.
    #[serde(default)]
    pub field_case: FieldCase,
    /// Comma-separated source field names dropped from every mapping.
    #[serde(default)]
    pub exclusions: String,
    /// Comma-separated source field names; when non-empty, only these
    /// (plus `_id`) are mapped.
    #[serde(default)]
    pub inclusions: String,
    /// Collection name to `{field path: type alias}` mapping.
    pub collections: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldCase {
    #[default]
    #[serde(alias = "")]
    None,
    Camel,
    Snake,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.collections.is_empty() {
            return Err(Error::Config("no collections configured".to_string()));
        }
        self.database_name()?;
        Ok(())
    }

    /// The database named by the source URL. Doubles as the service identity
    /// under which the replication checkpoint is stored.
    pub fn database_name(&self) -> Result<String> {
        let rest = self
            .src
            .splitn(2, "//")
            .nth(1)
            .ok_or_else(|| Error::Config(format!("invalid source URL: {}", self.src)))?;
        let path = rest.splitn(2, '/').nth(1).unwrap_or("");
        let name = path.split('?').next().unwrap_or("").trim_end_matches('/');
        if name.is_empty() {
            return Err(Error::Config(format!(
                "source URL names no database: {}",
                self.src
            )));
        }
        Ok(name.to_string())
    }
}
