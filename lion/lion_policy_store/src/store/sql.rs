//! SQL policy store.
//!
//! This module provides the SQLite implementation of the [`Adapter`] trait.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use super::deletion::DeletionStrategy;
use super::query::{self, RuleQuery};
use super::session::{SessionScope, SharedSession};
use super::Adapter;
use crate::config::AdapterConfig;
use crate::error::{AdapterError, Result};
use crate::model::{load_policy_line, Filter, PolicyModel, RuleRow, Section, MAX_FIELDS};
use crate::schema::RuleSchema;

/// A policy adapter backed by a SQLite table.
#[derive(Debug)]
pub struct SqlAdapter {
    /// The connection pool.
    pool: SqlitePool,

    /// The rule table layout.
    schema: RuleSchema,

    /// How removals are carried out.
    strategy: DeletionStrategy,

    /// A caller-owned transaction to run in, if any.
    session: Option<SharedSession>,

    /// Whether the last load was partial.
    filtered: AtomicBool,
}

/// Builder for [`SqlAdapter`].
#[derive(Debug)]
pub struct SqlAdapterBuilder {
    pool: SqlitePool,
    schema: RuleSchema,
    soft_delete_column: Option<String>,
    session: Option<SharedSession>,
    filtered: bool,
}

impl SqlAdapterBuilder {
    /// Use a custom table layout.
    pub fn schema(mut self, schema: RuleSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Soft-delete rows through the given boolean column.
    pub fn soft_delete_column(mut self, column: impl Into<String>) -> Self {
        self.soft_delete_column = Some(column.into());
        self
    }

    /// Run every operation inside a caller-owned transaction.
    pub fn session(mut self, session: SharedSession) -> Self {
        self.session = Some(session);
        self
    }

    /// Set the initial filtered marker.
    pub fn filtered(mut self, filtered: bool) -> Self {
        self.filtered = filtered;
        self
    }

    /// Validate the configuration and build the adapter.
    ///
    /// # Returns
    ///
    /// * `Ok(SqlAdapter)` - The adapter.
    /// * `Err` - If the schema lacks a required column, or the soft-delete
    ///   column is missing or not boolean.
    pub fn build(self) -> Result<SqlAdapter> {
        self.schema.validate()?;
        if let Some(column) = &self.soft_delete_column {
            self.schema.check_soft_delete_column(column)?;
        }

        Ok(SqlAdapter {
            pool: self.pool,
            strategy: DeletionStrategy::from_column(self.soft_delete_column.as_deref()),
            schema: self.schema,
            session: self.session,
            filtered: AtomicBool::new(self.filtered),
        })
    }
}

impl SqlAdapter {
    /// Create an adapter over the default schema with hard deletion.
    pub fn new(pool: SqlitePool) -> Result<Self> {
        Self::builder(pool).build()
    }

    /// Start building an adapter.
    pub fn builder(pool: SqlitePool) -> SqlAdapterBuilder {
        SqlAdapterBuilder {
            pool,
            schema: RuleSchema::default(),
            soft_delete_column: None,
            session: None,
            filtered: false,
        }
    }

    /// Connect using a configuration.
    ///
    /// The soft-delete column, when configured, is added to the schema as an
    /// indexed boolean column.
    pub async fn connect(config: &AdapterConfig) -> Result<Self> {
        config.validate()?;

        let options = SqliteConnectOptions::from_str(&config.database_url)?.create_if_missing(true);
        let mut pool_options = SqlitePoolOptions::new().max_connections(config.max_connections);
        if config.is_in_memory() {
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        let pool = pool_options.connect_with(options).await?;

        let mut schema = RuleSchema::new(config.table_name.clone())?;
        let mut builder = Self::builder(pool).filtered(config.filtered);
        if let Some(column) = &config.soft_delete_column {
            schema = schema.with_soft_delete_column(column.clone())?;
            builder = builder.soft_delete_column(column.clone());
        }
        let adapter = builder.schema(schema).build()?;

        if config.create_table {
            adapter.create_table().await?;
        }

        info!(
            "Policy store connected: table={}, soft_delete={:?}",
            adapter.schema.table(),
            adapter.soft_delete()
        );
        Ok(adapter)
    }

    /// The connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// The rule table layout.
    pub fn schema(&self) -> &RuleSchema {
        &self.schema
    }

    /// The deletion strategy in use.
    pub fn strategy(&self) -> &DeletionStrategy {
        &self.strategy
    }

    /// Create the rule table and its indexes if they do not exist.
    ///
    /// Runs on the pool, outside any shared session.
    pub async fn create_table(&self) -> Result<()> {
        sqlx::query(&self.schema.create_table_sql())
            .execute(&self.pool)
            .await?;
        for sql in self.schema.create_index_sql() {
            sqlx::query(&sql).execute(&self.pool).await?;
        }
        info!("Created policy table {}", self.schema.table());
        Ok(())
    }

    fn soft_delete(&self) -> Option<&str> {
        self.strategy.soft_delete_column()
    }

    async fn scope(&self) -> Result<SessionScope> {
        SessionScope::acquire(&self.pool, self.session.as_ref()).await
    }

    fn decode_row(&self, row: &SqliteRow) -> Result<Option<RuleRow>> {
        let id: i64 = row.try_get(0)?;
        let Some(ptype) = row.try_get::<Option<String>, _>(1)? else {
            warn!("Skipping rule {} with no policy type", id);
            return Ok(None);
        };

        let mut values: [Option<String>; MAX_FIELDS] = Default::default();
        for (index, slot) in values.iter_mut().enumerate() {
            *slot = row.try_get(index + 2)?;
        }

        let deleted = match self.soft_delete() {
            Some(_) => Some(
                row.try_get::<Option<bool>, _>(MAX_FIELDS + 2)?
                    .unwrap_or(false),
            ),
            None => None,
        };

        Ok(Some(RuleRow {
            id: Some(id),
            ptype,
            values,
            deleted,
        }))
    }

    async fn fetch_rows(
        &self,
        conn: &mut SqliteConnection,
        matching: &RuleQuery,
    ) -> Result<Vec<RuleRow>> {
        let rows = query::select(&self.schema, self.soft_delete(), matching)
            .build()
            .fetch_all(&mut *conn)
            .await?;

        let mut rules = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(rule) = self.decode_row(row)? {
                rules.push(rule);
            }
        }
        Ok(rules)
    }

    async fn fetch_ids(&self, conn: &mut SqliteConnection, matching: &RuleQuery) -> Result<Vec<i64>> {
        let rows = query::select_ids(&self.schema, matching)
            .build()
            .fetch_all(&mut *conn)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<i64, _>(0).map_err(AdapterError::from))
            .collect()
    }

    async fn insert_rules(
        &self,
        conn: &mut SqliteConnection,
        ptype: &str,
        rules: &[Vec<String>],
    ) -> Result<u64> {
        if rules.is_empty() {
            return Ok(0);
        }

        let rows = rules
            .iter()
            .map(|rule| RuleRow::from_tuple(ptype, rule))
            .collect::<Result<Vec<_>>>()?;
        for mut statement in query::insert(&self.schema, self.soft_delete(), &rows) {
            statement.build().execute(&mut *conn).await?;
        }
        Ok(rows.len() as u64)
    }

    async fn update_rule(
        &self,
        conn: &mut SqliteConnection,
        ptype: &str,
        old_rule: &[String],
        new_rule: &[String],
    ) -> Result<()> {
        let replacement = RuleRow::from_tuple(ptype, new_rule)?;
        let matching = RuleQuery::select_all()
            .not_deleted(self.soft_delete())
            .match_exact(ptype, old_rule)?;

        let ids = self.fetch_ids(conn, &matching).await?;
        let id = match ids.as_slice() {
            [id] => *id,
            [] => return Err(AdapterError::RuleNotFound(describe(ptype, old_rule))),
            _ => {
                return Err(AdapterError::AmbiguousRule {
                    rule: describe(ptype, old_rule),
                    count: ids.len(),
                })
            }
        };

        let longest = old_rule.len().max(new_rule.len());
        if let Some(mut statement) =
            query::update_values(&self.schema, id, &replacement.values[..longest])
        {
            statement.build().execute(&mut *conn).await?;
        }
        debug!("Updated rule {} to {}", id, replacement);
        Ok(())
    }

    /// Delete everything, then insert the model's rules.
    async fn save_destructive(
        &self,
        conn: &mut SqliteConnection,
        model: &dyn PolicyModel,
    ) -> Result<u64> {
        query::delete(&self.schema, &RuleQuery::select_all())
            .build()
            .execute(&mut *conn)
            .await?;

        let mut inserted = 0;
        for sec in Section::PERSISTED {
            for (ptype, rules) in model.policy_sets(sec) {
                inserted += self.insert_rules(conn, &ptype, &rules).await?;
            }
        }
        Ok(inserted)
    }

    /// Insert rules missing from storage, then flag rows missing from the
    /// model. Unchanged rules keep their rows.
    async fn save_reconciled(
        &self,
        conn: &mut SqliteConnection,
        model: &dyn PolicyModel,
    ) -> Result<(u64, u64)> {
        let visible = RuleQuery::select_all().not_deleted(self.soft_delete());
        let snapshot = self.fetch_rows(conn, &visible).await?;

        let mut inserted = 0;
        for sec in Section::PERSISTED {
            for (ptype, rules) in model.policy_sets(sec) {
                for rule in rules {
                    let matching = visible.clone().match_exact(&ptype, &rule)?;
                    if self.fetch_ids(conn, &matching).await?.is_empty() {
                        inserted += self
                            .insert_rules(conn, &ptype, std::slice::from_ref(&rule))
                            .await?;
                    }
                }
            }
        }

        let stale: Vec<i64> = snapshot
            .iter()
            .filter(|row| match Section::of_ptype(&row.ptype) {
                Some(sec) => !model.has_policy(sec, &row.ptype, &row.to_tuple()),
                None => true,
            })
            .filter_map(|row| row.id)
            .collect();
        let flagged = self.strategy.flag_rows(conn, &self.schema, &stale).await?;

        Ok((inserted, flagged))
    }

    async fn load_rows(&self, matching: &RuleQuery) -> Result<Vec<RuleRow>> {
        let mut scope = self.scope().await?;
        let outcome: Result<Vec<RuleRow>> = async {
            let conn = scope.conn()?;
            self.fetch_rows(conn, matching).await
        }
        .await;
        scope.finish(outcome).await
    }

    async fn remove_matching(&self, matching: RuleQuery) -> Result<bool> {
        let mut scope = self.scope().await?;
        let outcome: Result<u64> = async {
            let conn = scope.conn()?;
            self.strategy.apply(conn, &self.schema, matching).await
        }
        .await;
        Ok(scope.finish(outcome).await? > 0)
    }
}

/// Human-readable form of a rule for error messages.
fn describe(ptype: &str, rule: &[String]) -> String {
    std::iter::once(ptype)
        .chain(rule.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(", ")
}

#[async_trait]
impl Adapter for SqlAdapter {
    async fn load_policy(&self, model: &mut dyn PolicyModel) -> Result<()> {
        let matching = RuleQuery::select_all()
            .not_deleted(self.soft_delete())
            .filter(&Filter::default());
        let rules = self.load_rows(&matching).await?;

        for rule in &rules {
            load_policy_line(rule, model);
        }
        self.filtered.store(false, Ordering::SeqCst);

        debug!("Loaded {} rules", rules.len());
        Ok(())
    }

    async fn load_filtered_policy(
        &self,
        model: &mut dyn PolicyModel,
        filter: &Filter,
    ) -> Result<()> {
        let matching = RuleQuery::select_all()
            .not_deleted(self.soft_delete())
            .filter(filter);
        let rules = self.load_rows(&matching).await?;

        for rule in &rules {
            load_policy_line(rule, model);
        }
        self.filtered.store(true, Ordering::SeqCst);

        debug!("Loaded {} filtered rules", rules.len());
        Ok(())
    }

    fn is_filtered(&self) -> bool {
        self.filtered.load(Ordering::SeqCst)
    }

    async fn save_policy(&self, model: &dyn PolicyModel) -> Result<bool> {
        let mut scope = self.scope().await?;
        let outcome: Result<(u64, u64)> = async {
            let conn = scope.conn()?;
            match self.strategy {
                DeletionStrategy::Hard => Ok((self.save_destructive(conn, model).await?, 0)),
                DeletionStrategy::Soft { .. } => self.save_reconciled(conn, model).await,
            }
        }
        .await;
        let (inserted, flagged) = scope.finish(outcome).await?;

        info!(
            "Saved policy: {} rules inserted, {} rules flagged deleted",
            inserted, flagged
        );
        Ok(true)
    }

    async fn add_policy(&self, sec: Section, ptype: &str, rule: &[String]) -> Result<()> {
        self.add_policies(sec, ptype, &[rule.to_vec()]).await
    }

    async fn add_policies(&self, _sec: Section, ptype: &str, rules: &[Vec<String>]) -> Result<()> {
        if rules.is_empty() {
            return Ok(());
        }

        let mut scope = self.scope().await?;
        let outcome: Result<u64> = async {
            let conn = scope.conn()?;
            self.insert_rules(conn, ptype, rules).await
        }
        .await;
        let inserted = scope.finish(outcome).await?;

        debug!("Added {} {} rules", inserted, ptype);
        Ok(())
    }

    async fn remove_policy(&self, _sec: Section, ptype: &str, rule: &[String]) -> Result<bool> {
        let matching = RuleQuery::select_all().match_values(ptype, rule)?;
        self.remove_matching(matching).await
    }

    async fn remove_policies(
        &self,
        _sec: Section,
        ptype: &str,
        rules: &[Vec<String>],
    ) -> Result<bool> {
        if rules.is_empty() {
            return Ok(false);
        }
        let matching = RuleQuery::select_all().match_any(ptype, rules);
        self.remove_matching(matching).await
    }

    async fn remove_filtered_policy(
        &self,
        _sec: Section,
        ptype: &str,
        field_index: usize,
        field_values: &[String],
    ) -> Result<bool> {
        let Some(matching) =
            RuleQuery::select_all().match_field_values(ptype, field_index, field_values)
        else {
            debug!(
                "Ignoring filtered removal with invalid span: index {}, {} values",
                field_index,
                field_values.len()
            );
            return Ok(false);
        };
        self.remove_matching(matching).await
    }

    async fn update_policy(
        &self,
        _sec: Section,
        ptype: &str,
        old_rule: &[String],
        new_rule: &[String],
    ) -> Result<()> {
        let mut scope = self.scope().await?;
        let outcome: Result<()> = async {
            let conn = scope.conn()?;
            self.update_rule(conn, ptype, old_rule, new_rule).await
        }
        .await;
        scope.finish(outcome).await
    }

    async fn update_policies(
        &self,
        _sec: Section,
        ptype: &str,
        old_rules: &[Vec<String>],
        new_rules: &[Vec<String>],
    ) -> Result<()> {
        if old_rules.len() != new_rules.len() {
            return Err(AdapterError::LengthMismatch {
                old: old_rules.len(),
                new: new_rules.len(),
            });
        }

        let mut scope = self.scope().await?;
        let outcome: Result<()> = async {
            let conn = scope.conn()?;
            for (old_rule, new_rule) in old_rules.iter().zip(new_rules) {
                self.update_rule(conn, ptype, old_rule, new_rule).await?;
            }
            Ok(())
        }
        .await;
        scope.finish(outcome).await
    }

    async fn update_filtered_policies(
        &self,
        _sec: Section,
        ptype: &str,
        new_rules: &[Vec<String>],
        field_index: usize,
        field_values: &[String],
    ) -> Result<Vec<Vec<String>>> {
        let Some(filter) = Filter::from_field_values(ptype, field_index, field_values) else {
            debug!(
                "Ignoring filtered update with invalid span: index {}, {} values",
                field_index,
                field_values.len()
            );
            return Ok(Vec::new());
        };

        let mut scope = self.scope().await?;
        let outcome: Result<Vec<Vec<String>>> = async {
            let conn = scope.conn()?;
            let matching = RuleQuery::select_all()
                .not_deleted(self.soft_delete())
                .filter(&filter);
            let old_rules: Vec<Vec<String>> = self
                .fetch_rows(conn, &matching)
                .await?
                .iter()
                .map(RuleRow::to_tuple)
                .collect();

            if !old_rules.is_empty() {
                let replaced = RuleQuery::select_all().match_any(ptype, &old_rules);
                self.strategy.apply(conn, &self.schema, replaced).await?;
            }
            self.insert_rules(conn, ptype, new_rules).await?;
            Ok(old_rules)
        }
        .await;
        scope.finish(outcome).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDef;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_build_rejects_missing_column() {
        let schema = RuleSchema::bare("rules")
            .unwrap()
            .column(ColumnDef::integer("id"))
            .unwrap()
            .column(ColumnDef::string("ptype"))
            .unwrap()
            .column(ColumnDef::string("v0"))
            .unwrap();

        let result = SqlAdapter::builder(memory_pool().await).schema(schema).build();
        assert!(matches!(result, Err(AdapterError::MissingColumn(ref c)) if c == "v1"));
    }

    #[tokio::test]
    async fn test_build_rejects_non_boolean_soft_delete() {
        let schema = RuleSchema::default()
            .column(ColumnDef::integer("is_deleted"))
            .unwrap();

        let result = SqlAdapter::builder(memory_pool().await)
            .schema(schema)
            .soft_delete_column("is_deleted")
            .build();
        assert!(matches!(
            result,
            Err(AdapterError::InvalidSoftDeleteColumn { .. })
        ));
    }

    #[tokio::test]
    async fn test_build_picks_strategy() {
        let adapter = SqlAdapter::new(memory_pool().await).unwrap();
        assert_eq!(adapter.strategy(), &DeletionStrategy::Hard);
        assert!(!adapter.is_filtered());

        let schema = RuleSchema::default()
            .with_soft_delete_column("is_deleted")
            .unwrap();
        let adapter = SqlAdapter::builder(memory_pool().await)
            .schema(schema)
            .soft_delete_column("is_deleted")
            .filtered(true)
            .build()
            .unwrap();
        assert_eq!(adapter.soft_delete(), Some("is_deleted"));
        assert!(adapter.is_filtered());
    }

    #[tokio::test]
    async fn test_decode_skips_null_ptype() {
        let adapter = SqlAdapter::new(memory_pool().await).unwrap();
        adapter.create_table().await.unwrap();
        sqlx::query("INSERT INTO \"policy_rule\" (\"v0\") VALUES ('orphan')")
            .execute(adapter.pool())
            .await
            .unwrap();

        let rows = adapter
            .load_rows(&RuleQuery::select_all().filter(&Filter::default()))
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_describe() {
        let rule = vec!["alice".to_string(), "data1".to_string()];
        assert_eq!(describe("p", &rule), "p, alice, data1");
        assert_eq!(describe("g", &[]), "g");
    }
}
