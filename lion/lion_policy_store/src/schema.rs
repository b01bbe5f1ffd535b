//! Rule table schema.
//!
//! A [`RuleSchema`] names the table and its columns. The default schema has
//! `id`, `ptype` and `v0`..`v5`; callers may supply their own schema with
//! extra columns, such as a soft-delete flag, as long as the required
//! columns are present.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AdapterError, Result};
use crate::model::MAX_FIELDS;

/// Name of the surrogate key column.
pub const ID_COLUMN: &str = "id";

/// Name of the policy type column.
pub const PTYPE_COLUMN: &str = "ptype";

/// Names of the positional value columns.
pub const VALUE_COLUMNS: [&str; MAX_FIELDS] = ["v0", "v1", "v2", "v3", "v4", "v5"];

/// Default table name.
pub const DEFAULT_TABLE: &str = "policy_rule";

/// SQL column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    /// 64-bit integer.
    Integer,
    /// Bounded string.
    Varchar(u32),
    /// Boolean flag.
    Boolean,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Integer => write!(f, "INTEGER"),
            ColumnType::Varchar(len) => write!(f, "VARCHAR({})", len),
            ColumnType::Boolean => write!(f, "BOOLEAN"),
        }
    }
}

/// A column definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,

    /// Column type.
    pub ty: ColumnType,

    /// Whether the column accepts NULL.
    pub nullable: bool,

    /// Whether to create an index on the column.
    pub indexed: bool,
}

impl ColumnDef {
    /// A nullable `VARCHAR(255)` column.
    pub fn string(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ColumnType::Varchar(255),
            nullable: true,
            indexed: false,
        }
    }

    /// A `BOOLEAN NOT NULL DEFAULT FALSE` column.
    pub fn boolean(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ColumnType::Boolean,
            nullable: false,
            indexed: false,
        }
    }

    /// An `INTEGER` column.
    pub fn integer(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ColumnType::Integer,
            nullable: true,
            indexed: false,
        }
    }

    /// Request an index on this column.
    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    fn ddl(&self) -> String {
        let mut ddl = format!("{} {}", quote(&self.name), self.ty);
        if self.name == ID_COLUMN {
            ddl.push_str(" PRIMARY KEY");
            return ddl;
        }
        if !self.nullable {
            ddl.push_str(" NOT NULL");
        }
        if self.ty == ColumnType::Boolean {
            ddl.push_str(" DEFAULT FALSE");
        }
        ddl
    }
}

/// Table layout for stored rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSchema {
    table: String,
    columns: Vec<ColumnDef>,
}

impl RuleSchema {
    /// Create the default layout under the given table name.
    pub fn new(table: impl Into<String>) -> Result<Self> {
        let mut schema = Self::bare(table)?;
        schema.columns.push(ColumnDef::integer(ID_COLUMN));
        schema.columns.push(ColumnDef::string(PTYPE_COLUMN));
        for name in VALUE_COLUMNS {
            schema.columns.push(ColumnDef::string(name));
        }
        Ok(schema)
    }

    /// Create a schema with no columns.
    ///
    /// Columns are added with [`RuleSchema::column`]. The result is only
    /// usable by an adapter once it defines every required column.
    pub fn bare(table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        validate_identifier(&table)?;
        Ok(Self {
            table,
            columns: Vec::new(),
        })
    }

    /// Add a column, replacing any existing column of the same name.
    pub fn column(mut self, def: ColumnDef) -> Result<Self> {
        validate_identifier(&def.name)?;
        match self.columns.iter_mut().find(|c| c.name == def.name) {
            Some(existing) => *existing = def,
            None => self.columns.push(def),
        }
        Ok(self)
    }

    /// Add an indexed boolean soft-delete column.
    pub fn with_soft_delete_column(self, name: impl Into<String>) -> Result<Self> {
        self.column(ColumnDef::boolean(name).indexed())
    }

    /// The table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// The column definitions, in table order.
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Look up a column by name.
    pub fn get(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Check that every required column is present.
    pub fn validate(&self) -> Result<()> {
        let required = [ID_COLUMN, PTYPE_COLUMN]
            .into_iter()
            .chain(VALUE_COLUMNS);
        for name in required {
            if self.get(name).is_none() {
                return Err(AdapterError::MissingColumn(name.to_string()));
            }
        }
        Ok(())
    }

    /// Check that `name` is a boolean column of this schema.
    pub fn check_soft_delete_column(&self, name: &str) -> Result<()> {
        match self.get(name) {
            Some(col) if col.ty == ColumnType::Boolean => Ok(()),
            Some(col) => Err(AdapterError::InvalidSoftDeleteColumn {
                column: name.to_string(),
                found: col.ty.to_string(),
            }),
            None => Err(AdapterError::MissingColumn(name.to_string())),
        }
    }

    /// `CREATE TABLE IF NOT EXISTS` for this schema.
    pub fn create_table_sql(&self) -> String {
        let columns: Vec<String> = self.columns.iter().map(ColumnDef::ddl).collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote(&self.table),
            columns.join(", ")
        )
    }

    /// `CREATE INDEX IF NOT EXISTS` for every indexed column.
    pub fn create_index_sql(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.indexed)
            .map(|c| {
                format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                    quote(&format!("ix_{}_{}", self.table, c.name)),
                    quote(&self.table),
                    quote(&c.name)
                )
            })
            .collect()
    }
}

impl Default for RuleSchema {
    fn default() -> Self {
        let mut columns = vec![ColumnDef::integer(ID_COLUMN), ColumnDef::string(PTYPE_COLUMN)];
        columns.extend(VALUE_COLUMNS.into_iter().map(ColumnDef::string));
        Self {
            table: DEFAULT_TABLE.to_string(),
            columns,
        }
    }
}

/// Quote a validated identifier.
pub(crate) fn quote(ident: &str) -> String {
    format!("\"{}\"", ident)
}

/// Accept `[A-Za-z_][A-Za-z0-9_]*`.
pub(crate) fn validate_identifier(ident: &str) -> Result<()> {
    let mut chars = ident.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(AdapterError::InvalidIdentifier(ident.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schema() {
        let schema = RuleSchema::default();
        assert_eq!(schema.table(), "policy_rule");
        assert_eq!(schema.columns().len(), 8);
        schema.validate().unwrap();
        assert_eq!(schema, RuleSchema::new("policy_rule").unwrap());
    }

    #[test]
    fn test_create_table_sql() {
        let schema = RuleSchema::new("rules")
            .unwrap()
            .with_soft_delete_column("is_deleted")
            .unwrap();

        let sql = schema.create_table_sql();
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"rules\" ("));
        assert!(sql.contains("\"id\" INTEGER PRIMARY KEY"));
        assert!(sql.contains("\"v5\" VARCHAR(255)"));
        assert!(sql.contains("\"is_deleted\" BOOLEAN NOT NULL DEFAULT FALSE"));

        let indexes = schema.create_index_sql();
        assert_eq!(
            indexes,
            vec![
                "CREATE INDEX IF NOT EXISTS \"ix_rules_is_deleted\" ON \"rules\" (\"is_deleted\")"
                    .to_string()
            ]
        );
    }

    #[test]
    fn test_missing_column() {
        let schema = RuleSchema::bare("rules")
            .unwrap()
            .column(ColumnDef::integer("id"))
            .unwrap()
            .column(ColumnDef::string("ptype"))
            .unwrap();

        let result = schema.validate();
        assert!(matches!(result, Err(AdapterError::MissingColumn(ref c)) if c == "v0"));
    }

    #[test]
    fn test_soft_delete_column_type() {
        let schema = RuleSchema::default()
            .column(ColumnDef::string("is_deleted"))
            .unwrap();

        let result = schema.check_soft_delete_column("is_deleted");
        assert!(matches!(
            result,
            Err(AdapterError::InvalidSoftDeleteColumn { ref found, .. }) if found == "VARCHAR(255)"
        ));
        assert!(matches!(
            schema.check_soft_delete_column("gone"),
            Err(AdapterError::MissingColumn(_))
        ));
    }

    #[test]
    fn test_column_replaces_existing() {
        let schema = RuleSchema::default()
            .column(ColumnDef::string("ptype").indexed())
            .unwrap();
        assert_eq!(schema.columns().len(), 8);
        assert!(schema.get("ptype").unwrap().indexed);
    }

    #[test]
    fn test_invalid_identifier() {
        assert!(RuleSchema::new("rules; DROP TABLE x").is_err());
        assert!(RuleSchema::new("1rules").is_err());
        assert!(RuleSchema::default()
            .column(ColumnDef::string("bad\"name"))
            .is_err());
        assert!(validate_identifier("_ok_2").is_ok());
    }
}
