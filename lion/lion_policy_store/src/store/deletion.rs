//! Deletion strategies.
//!
//! Hard deletion removes rows. Soft deletion keeps them and sets a boolean
//! flag, which every read path then filters out.

use sqlx::{Row, SqliteConnection};
use tracing::debug;

use super::query::{self, RuleQuery};
use crate::error::Result;
use crate::schema::RuleSchema;

/// How matched rows are removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionStrategy {
    /// Physically delete rows.
    Hard,

    /// Set `column` to true and keep the row.
    Soft {
        /// The boolean flag column.
        column: String,
    },
}

impl DeletionStrategy {
    /// Pick the strategy for an optional soft-delete column.
    pub fn from_column(column: Option<&str>) -> Self {
        match column {
            Some(column) => DeletionStrategy::Soft {
                column: column.to_string(),
            },
            None => DeletionStrategy::Hard,
        }
    }

    /// The soft-delete column, if any.
    pub fn soft_delete_column(&self) -> Option<&str> {
        match self {
            DeletionStrategy::Hard => None,
            DeletionStrategy::Soft { column } => Some(column),
        }
    }

    /// Remove every visible row selected by `matching`.
    ///
    /// # Returns
    ///
    /// The number of rows deleted or flagged.
    pub async fn apply(
        &self,
        conn: &mut SqliteConnection,
        schema: &RuleSchema,
        matching: RuleQuery,
    ) -> Result<u64> {
        let matching = matching.not_deleted(self.soft_delete_column());

        match self {
            DeletionStrategy::Hard => {
                let result = query::delete(schema, &matching)
                    .build()
                    .execute(&mut *conn)
                    .await?;
                debug!("Deleted {} rules", result.rows_affected());
                Ok(result.rows_affected())
            }
            DeletionStrategy::Soft { .. } => {
                let ids: Vec<i64> = query::select_ids(schema, &matching)
                    .build()
                    .fetch_all(&mut *conn)
                    .await?
                    .iter()
                    .map(|row| row.try_get::<i64, _>(0))
                    .collect::<std::result::Result<_, _>>()?;
                self.flag_rows(conn, schema, &ids).await
            }
        }
    }

    /// Flag rows by id. A no-op under hard deletion.
    pub async fn flag_rows(
        &self,
        conn: &mut SqliteConnection,
        schema: &RuleSchema,
        ids: &[i64],
    ) -> Result<u64> {
        let Some(column) = self.soft_delete_column() else {
            return Ok(0);
        };

        for mut statement in query::flag_deleted(schema, column, ids) {
            statement.build().execute(&mut *conn).await?;
        }
        debug!("Flagged {} rules as deleted", ids.len());
        Ok(ids.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_column() {
        assert_eq!(DeletionStrategy::from_column(None), DeletionStrategy::Hard);
        let soft = DeletionStrategy::from_column(Some("is_deleted"));
        assert_eq!(soft.soft_delete_column(), Some("is_deleted"));
        assert_eq!(DeletionStrategy::Hard.soft_delete_column(), None);
    }
}
