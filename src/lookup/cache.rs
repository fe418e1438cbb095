//! Query -> external id associations, memoized in memory in front of the
//! persisted `*_lookups` tables. Lives for the whole process and is shared by
//! every lookup of one kind; entries go away only through explicit
//! invalidation.

use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::models::LookupAssociation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationKind {
    Series,
    Movie,
}

impl AssociationKind {
    fn table(&self) -> &'static str {
        match self {
            AssociationKind::Series => "tv_lookups",
            AssociationKind::Movie => "movie_lookups",
        }
    }
}

pub struct AssociationCache {
    kind: AssociationKind,
    pool: SqlitePool,
    memory: RwLock<HashMap<String, i64>>,
}

impl AssociationCache {
    pub fn new(kind: AssociationKind, pool: SqlitePool) -> Self {
        Self {
            kind,
            pool,
            memory: RwLock::new(HashMap::new()),
        }
    }

    fn remember(&self, query: &str, id: i64) {
        self.memory
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(query.to_string(), id);
    }

    /// In-memory hit, else the persisted association (which is then memoized)
    pub async fn get(&self, query: &str) -> Result<Option<i64>, sqlx::Error> {
        let hit = self
            .memory
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(query)
            .copied();
        if hit.is_some() {
            return Ok(hit);
        }

        let row: Option<LookupAssociation> = sqlx::query_as(&format!(
            "SELECT query, external_id FROM {} WHERE query = ?",
            self.kind.table()
        ))
        .bind(query)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|assoc| {
            self.remember(&assoc.query, assoc.external_id);
            assoc.external_id
        }))
    }

    pub async fn put(&self, query: &str, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query(&format!(
            "INSERT INTO {} (query, external_id) VALUES (?, ?)
             ON CONFLICT(query) DO UPDATE SET external_id = excluded.external_id",
            self.kind.table()
        ))
        .bind(query)
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.remember(query, id);
        Ok(())
    }

    /// Drop every association pointing at `id`
    pub async fn invalidate_id(&self, id: i64) -> Result<u64, sqlx::Error> {
        self.memory
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|_, v| *v != id);

        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE external_id = ?",
            self.kind.table()
        ))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
