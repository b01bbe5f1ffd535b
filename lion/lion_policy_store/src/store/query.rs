//! Rule query construction.
//!
//! A [`RuleQuery`] is an ordered list of predicates over the rule table.
//! The render functions turn it into `sqlx` statements for a given schema.
//! All values are bound; only validated identifiers are spliced into SQL.

use sqlx::{QueryBuilder, Sqlite};

use crate::error::{AdapterError, Result};
use crate::model::{valid_span, Filter, RuleRow, MAX_FIELDS};
use crate::schema::{quote, RuleSchema, ID_COLUMN, PTYPE_COLUMN, VALUE_COLUMNS};

/// Rows per multi-row `INSERT`. Eight binds per row stays under SQLite's
/// historical limit of 999 variables.
const INSERT_CHUNK_ROWS: usize = 120;

/// Ids per `UPDATE .. WHERE id IN (..)`.
const ID_CHUNK: usize = 900;

/// A column of the rule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// The surrogate key.
    Id,
    /// The policy type.
    PolicyType,
    /// A positional value, `v0`..`v5`.
    Value(usize),
}

impl Field {
    /// The column name for this field.
    pub fn column(&self) -> &'static str {
        match self {
            Field::Id => ID_COLUMN,
            Field::PolicyType => PTYPE_COLUMN,
            Field::Value(index) => VALUE_COLUMNS[*index],
        }
    }
}

/// A single restriction on the rule table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// `field = value`
    Equals(Field, String),
    /// `field IN (values)`
    In(Field, Vec<String>),
    /// `field IS NULL`
    IsNull(Field),
    /// `flag = FALSE`
    NotDeleted(String),
}

/// A retrieval or match query over the rule table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleQuery {
    predicates: Vec<Predicate>,
    order_by_id: bool,
}

impl RuleQuery {
    /// An unrestricted query.
    pub fn select_all() -> Self {
        Self::default()
    }

    /// Hide soft-deleted rows.
    ///
    /// With no soft-delete column this is a no-op. The restriction is placed
    /// ahead of every other predicate.
    pub fn not_deleted(mut self, soft_delete: Option<&str>) -> Self {
        if let Some(column) = soft_delete {
            let predicate = Predicate::NotDeleted(column.to_string());
            if !self.predicates.contains(&predicate) {
                self.predicates.insert(0, predicate);
            }
        }
        self
    }

    /// Apply a filter and order by id.
    pub fn filter(mut self, filter: &Filter) -> Self {
        if !filter.ptype.is_empty() {
            self.predicates
                .push(Predicate::In(Field::PolicyType, filter.ptype.clone()));
        }
        for (index, accepted) in filter.values.iter().enumerate() {
            if !accepted.is_empty() {
                self.predicates
                    .push(Predicate::In(Field::Value(index), accepted.clone()));
            }
        }
        self.order_by_id = true;
        self
    }

    /// Match `ptype` and `v_i = values[i]` for each supplied value.
    pub fn match_values<S: AsRef<str>>(mut self, ptype: &str, values: &[S]) -> Result<Self> {
        if values.len() > MAX_FIELDS {
            return Err(AdapterError::TooManyValues(values.len()));
        }
        self.predicates
            .push(Predicate::Equals(Field::PolicyType, ptype.to_string()));
        for (index, value) in values.iter().enumerate() {
            self.predicates.push(Predicate::Equals(
                Field::Value(index),
                value.as_ref().to_string(),
            ));
        }
        Ok(self)
    }

    /// Match exactly one stored rule: its values, and unset slots after them.
    pub fn match_exact<S: AsRef<str>>(self, ptype: &str, values: &[S]) -> Result<Self> {
        let mut query = self.match_values(ptype, values)?;
        for index in values.len()..MAX_FIELDS {
            query.predicates.push(Predicate::IsNull(Field::Value(index)));
        }
        Ok(query)
    }

    /// Match any of `rules`, field by field.
    ///
    /// Field `i` must equal one of the values seen at position `i` across
    /// all rules, independently per field, up to the shortest rule. This can
    /// match combinations that are not in `rules`.
    pub fn match_any(mut self, ptype: &str, rules: &[Vec<String>]) -> Self {
        self.predicates
            .push(Predicate::Equals(Field::PolicyType, ptype.to_string()));

        let width = rules.iter().map(Vec::len).min().unwrap_or(0).min(MAX_FIELDS);
        for index in 0..width {
            let mut seen: Vec<String> = Vec::new();
            for rule in rules {
                if !seen.contains(&rule[index]) {
                    seen.push(rule[index].clone());
                }
            }
            self.predicates.push(Predicate::In(Field::Value(index), seen));
        }
        self
    }

    /// Match `ptype` plus `values` placed from `start_index` onwards.
    ///
    /// Empty strings place no constraint on their position.
    ///
    /// # Returns
    ///
    /// `None` if the span is invalid, see [`valid_span`].
    pub fn match_field_values<S: AsRef<str>>(
        mut self,
        ptype: &str,
        start_index: usize,
        values: &[S],
    ) -> Option<Self> {
        if !valid_span(start_index, values.len()) {
            return None;
        }
        self.predicates
            .push(Predicate::Equals(Field::PolicyType, ptype.to_string()));
        for (offset, value) in values.iter().enumerate() {
            let value = value.as_ref();
            if !value.is_empty() {
                self.predicates.push(Predicate::Equals(
                    Field::Value(start_index + offset),
                    value.to_string(),
                ));
            }
        }
        Some(self)
    }

    /// The predicates, in render order.
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    fn push_where(&self, qb: &mut QueryBuilder<'static, Sqlite>) {
        for (position, predicate) in self.predicates.iter().enumerate() {
            qb.push(if position == 0 { " WHERE " } else { " AND " });
            match predicate {
                Predicate::Equals(field, value) => {
                    qb.push(quote(field.column()))
                        .push(" = ")
                        .push_bind(value.clone());
                }
                Predicate::In(_, values) if values.is_empty() => {
                    qb.push("FALSE");
                }
                Predicate::In(field, values) => {
                    qb.push(quote(field.column())).push(" IN (");
                    let mut list = qb.separated(", ");
                    for value in values {
                        list.push_bind(value.clone());
                    }
                    list.push_unseparated(")");
                }
                Predicate::IsNull(field) => {
                    qb.push(quote(field.column())).push(" IS NULL");
                }
                Predicate::NotDeleted(column) => {
                    qb.push(quote(column)).push(" = ").push_bind(false);
                }
            }
        }
    }

    fn push_order(&self, qb: &mut QueryBuilder<'static, Sqlite>) {
        if self.order_by_id {
            qb.push(" ORDER BY ").push(quote(ID_COLUMN)).push(" ASC");
        }
    }
}

/// Columns read back for a row, in decode order.
fn row_columns(soft_delete: Option<&str>) -> Vec<String> {
    let mut columns = vec![quote(ID_COLUMN), quote(PTYPE_COLUMN)];
    columns.extend(VALUE_COLUMNS.iter().map(|c| quote(c)));
    if let Some(flag) = soft_delete {
        columns.push(quote(flag));
    }
    columns
}

/// `SELECT id, ptype, v0..v5[, flag] FROM ..`
pub fn select(
    schema: &RuleSchema,
    soft_delete: Option<&str>,
    query: &RuleQuery,
) -> QueryBuilder<'static, Sqlite> {
    let mut qb = QueryBuilder::new(format!(
        "SELECT {} FROM {}",
        row_columns(soft_delete).join(", "),
        quote(schema.table())
    ));
    query.push_where(&mut qb);
    query.push_order(&mut qb);
    qb
}

/// `SELECT id FROM ..`
pub fn select_ids(schema: &RuleSchema, query: &RuleQuery) -> QueryBuilder<'static, Sqlite> {
    let mut qb = QueryBuilder::new(format!(
        "SELECT {} FROM {}",
        quote(ID_COLUMN),
        quote(schema.table())
    ));
    query.push_where(&mut qb);
    query.push_order(&mut qb);
    qb
}

/// `DELETE FROM ..`
pub fn delete(schema: &RuleSchema, query: &RuleQuery) -> QueryBuilder<'static, Sqlite> {
    let mut qb = QueryBuilder::new(format!("DELETE FROM {}", quote(schema.table())));
    query.push_where(&mut qb);
    qb
}

/// `UPDATE .. SET flag = TRUE WHERE id IN (..)`, chunked.
pub fn flag_deleted(
    schema: &RuleSchema,
    column: &str,
    ids: &[i64],
) -> Vec<QueryBuilder<'static, Sqlite>> {
    ids.chunks(ID_CHUNK)
        .map(|chunk| {
            let mut qb = QueryBuilder::new(format!(
                "UPDATE {} SET {} = ",
                quote(schema.table()),
                quote(column)
            ));
            qb.push_bind(true);
            qb.push(" WHERE ").push(quote(ID_COLUMN)).push(" IN (");
            let mut list = qb.separated(", ");
            for id in chunk {
                list.push_bind(*id);
            }
            list.push_unseparated(")");
            qb
        })
        .collect()
}

/// Multi-row `INSERT`, chunked. New rows get the soft-delete flag cleared.
pub fn insert(
    schema: &RuleSchema,
    soft_delete: Option<&str>,
    rows: &[RuleRow],
) -> Vec<QueryBuilder<'static, Sqlite>> {
    let mut columns = vec![quote(PTYPE_COLUMN)];
    columns.extend(VALUE_COLUMNS.iter().map(|c| quote(c)));
    if let Some(flag) = soft_delete {
        columns.push(quote(flag));
    }
    let head = format!(
        "INSERT INTO {} ({}) ",
        quote(schema.table()),
        columns.join(", ")
    );

    rows.chunks(INSERT_CHUNK_ROWS)
        .map(|chunk| {
            let mut qb = QueryBuilder::new(head.clone());
            qb.push_values(chunk, |mut b, row| {
                b.push_bind(row.ptype.clone());
                for value in &row.values {
                    b.push_bind(value.clone());
                }
                if soft_delete.is_some() {
                    b.push_bind(false);
                }
            });
            qb
        })
        .collect()
}

/// `UPDATE .. SET v0 = .., v1 = .. WHERE id = ..` for the leading values.
///
/// Returns `None` when there is nothing to set.
pub fn update_values(
    schema: &RuleSchema,
    id: i64,
    values: &[Option<String>],
) -> Option<QueryBuilder<'static, Sqlite>> {
    if values.is_empty() {
        return None;
    }

    let mut qb = QueryBuilder::new(format!("UPDATE {} SET ", quote(schema.table())));
    {
        let mut assignments = qb.separated(", ");
        for (column, value) in VALUE_COLUMNS.iter().zip(values) {
            assignments
                .push(format!("{} = ", quote(column)))
                .push_bind_unseparated(value.clone());
        }
    }
    qb.push(" WHERE ").push(quote(ID_COLUMN)).push(" = ").push_bind(id);
    Some(qb)
}
