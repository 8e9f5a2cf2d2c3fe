//! SQLite-backed [`LeadStore`] implementation (the content store).
//!
//! Base records live in `leads`; the lexical shadow is the contentless
//! FTS5 table `leads_fts` whose rowid equals `leads.id`. Both are written in
//! the same transaction, so after any committed batch the two sets of ids
//! are identical. [`SqliteStore::alignment`] verifies that and
//! [`SqliteStore::rebuild_lexical`] restores it from the base table.

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use lead_search_core::models::{AppendOutcome, LeadRecord, LexicalHit, NewLead};
use lead_search_core::store::{query_terms, LeadStore};

use crate::checkpoint::CheckpointLedger;
use crate::config::Config;
use crate::db::{self, StoreState};

/// Max bound parameters per `IN (...)` list.
const IN_CHUNK: usize = 500;

/// Id-set comparison between `leads` and `leads_fts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alignment {
    pub records: i64,
    pub shadow: i64,
    /// Records with no lexical entry.
    pub missing: i64,
    /// Lexical entries with no record.
    pub orphaned: i64,
}

impl Alignment {
    pub fn is_aligned(&self) -> bool {
        self.missing == 0 && self.orphaned == 0
    }
}

/// SQLite implementation of the [`LeadStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open the configured store: integrity check (recreating a corrupt
    /// store), migrations, then lexical alignment check with automatic
    /// repair.
    pub async fn open(config: &Config) -> Result<(Self, StoreState)> {
        let (pool, state) = db::open(config).await?;
        let store = Self::new(pool);
        let alignment = store.alignment().await?;
        if !alignment.is_aligned() {
            tracing::warn!(
                missing = alignment.missing,
                orphaned = alignment.orphaned,
                "lexical shadow out of sync; rebuilding"
            );
            store.rebuild_lexical().await?;
        }
        Ok((store, state))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn checkpoints(&self) -> CheckpointLedger {
        CheckpointLedger::new(self.pool.clone())
    }

    pub async fn alignment(&self) -> Result<Alignment> {
        let records: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM leads")
            .fetch_one(&self.pool)
            .await?;
        let shadow: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM leads_fts_docsize")
            .fetch_one(&self.pool)
            .await?;
        let missing: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM leads l WHERE NOT EXISTS (SELECT 1 FROM leads_fts_docsize d WHERE d.id = l.id)",
        )
        .fetch_one(&self.pool)
        .await?;
        let orphaned: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM leads_fts_docsize d WHERE NOT EXISTS (SELECT 1 FROM leads l WHERE l.id = d.id)",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(Alignment {
            records,
            shadow,
            missing,
            orphaned,
        })
    }

    /// Drop every lexical entry and regenerate them from `leads`, in one
    /// transaction. Returns the number of entries written.
    pub async fn rebuild_lexical(&self) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO leads_fts(leads_fts) VALUES('delete-all')")
            .execute(&mut *tx)
            .await?;
        let written = sqlx::query("INSERT INTO leads_fts(rowid, text) SELECT id, text_concat FROM leads")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        tracing::info!(entries = written, "rebuilt lexical shadow");
        Ok(written)
    }

    /// Record counts per dataset, ordered by dataset name.
    pub async fn dataset_counts(&self) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query("SELECT dataset, COUNT(*) AS n FROM leads GROUP BY dataset ORDER BY dataset")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get::<String, _>("dataset"), r.get::<i64, _>("n")))
            .collect())
    }
}

/// Dedup key of one source row.
pub fn row_hash(lead: &NewLead) -> String {
    let mut hasher = Sha256::new();
    hasher.update(lead.dataset.as_bytes());
    hasher.update([0u8]);
    hasher.update(lead.source_file.as_bytes());
    hasher.update([0u8]);
    hasher.update(lead.source_row.to_le_bytes());
    hasher.update([0u8]);
    hasher.update(lead.lead.text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// FTS5 expression: every term double-quoted, implicit AND.
fn fts_expression(query: &str) -> Option<String> {
    let terms = query_terms(query);
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" "),
    )
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn record_from_row(row: &SqliteRow) -> LeadRecord {
    LeadRecord {
        id: row.get("id"),
        dataset: row.get("dataset"),
        username: row.get("username"),
        name: row.get("name"),
        bio: row.get("bio"),
        category: row.get("category"),
        follower_count: row.get("follower_count"),
        following_count: row.get("following_count"),
        website: row.get("website"),
        email: row.get("email"),
        phone: row.get("phone"),
        text: row.get("text_concat"),
    }
}

#[async_trait]
impl LeadStore for SqliteStore {
    async fn append_batch(&self, batch: &[NewLead]) -> Result<AppendOutcome> {
        let mut outcome = AppendOutcome::default();
        if batch.is_empty() {
            return Ok(outcome);
        }

        let mut tx = self.pool.begin().await?;
        for new in batch {
            let hash = row_hash(new);
            let lead = &new.lead;
            let inserted: Option<i64> = sqlx::query_scalar(
                r#"
                INSERT INTO leads (dataset, source_file, source_row, username, name, bio,
                                   category, follower_count, following_count, website,
                                   email, phone, text_concat, row_hash)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(row_hash) DO NOTHING
                RETURNING id
                "#,
            )
            .bind(&new.dataset)
            .bind(&new.source_file)
            .bind(new.source_row)
            .bind(&lead.username)
            .bind(&lead.name)
            .bind(&lead.bio)
            .bind(&lead.category)
            .bind(lead.follower_count)
            .bind(lead.following_count)
            .bind(&lead.website)
            .bind(&lead.email)
            .bind(&lead.phone)
            .bind(&lead.text)
            .bind(&hash)
            .fetch_optional(&mut *tx)
            .await?;

            let id = match inserted {
                Some(id) => {
                    sqlx::query("INSERT INTO leads_fts(rowid, text) VALUES (?, ?)")
                        .bind(id)
                        .bind(&lead.text)
                        .execute(&mut *tx)
                        .await?;
                    outcome.inserted += 1;
                    id
                }
                None => sqlx::query_scalar::<_, i64>("SELECT id FROM leads WHERE row_hash = ?")
                    .bind(&hash)
                    .fetch_one(&mut *tx)
                    .await
                    .with_context(|| {
                        format!("row {} of {} conflicted but is missing", new.source_row, new.source_file)
                    })?,
            };
            outcome.ids.push(id);
        }
        tx.commit().await?;

        Ok(outcome)
    }

    async fn lexical_search(
        &self,
        query: &str,
        limit: usize,
        datasets: Option<&[String]>,
    ) -> Result<Vec<LexicalHit>> {
        let Some(expr) = fts_expression(query) else {
            return Ok(Vec::new());
        };
        if limit == 0 || datasets.is_some_and(|d| d.is_empty()) {
            return Ok(Vec::new());
        }

        let sql = match datasets {
            None => "SELECT rowid AS id, rank FROM leads_fts WHERE leads_fts MATCH ? ORDER BY rank, rowid LIMIT ?".to_string(),
            Some(ds) => format!(
                "SELECT rowid AS id, rank FROM leads_fts WHERE leads_fts MATCH ? \
                 AND rowid IN (SELECT id FROM leads WHERE dataset IN ({})) \
                 ORDER BY rank, rowid LIMIT ?",
                placeholders(ds.len())
            ),
        };

        let mut q = sqlx::query(&sql).bind(&expr);
        if let Some(ds) = datasets {
            for d in ds {
                q = q.bind(d);
            }
        }
        let rows = q.bind(limit as i64).fetch_all(&self.pool).await?;

        Ok(rows
            .iter()
            .map(|row| LexicalHit {
                id: row.get("id"),
                rank: row.get("rank"),
            })
            .collect())
    }

    async fn fetch(&self, ids: &[i64]) -> Result<HashMap<i64, LeadRecord>> {
        let mut out = HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(IN_CHUNK) {
            let sql = format!(
                "SELECT id, dataset, username, name, bio, category, follower_count, following_count, \
                 website, email, phone, text_concat FROM leads WHERE id IN ({})",
                placeholders(chunk.len())
            );
            let mut q = sqlx::query(&sql);
            for id in chunk {
                q = q.bind(id);
            }
            for row in q.fetch_all(&self.pool).await? {
                let record = record_from_row(&row);
                out.insert(record.id, record);
            }
        }
        Ok(out)
    }

    async fn filter_datasets(&self, ids: &[i64], datasets: &[String]) -> Result<HashSet<i64>> {
        let mut out = HashSet::new();
        if datasets.is_empty() {
            return Ok(out);
        }
        for chunk in ids.chunks(IN_CHUNK) {
            let sql = format!(
                "SELECT id FROM leads WHERE id IN ({}) AND dataset IN ({})",
                placeholders(chunk.len()),
                placeholders(datasets.len())
            );
            let mut q = sqlx::query_scalar::<_, i64>(&sql);
            for id in chunk {
                q = q.bind(id);
            }
            for d in datasets {
                q = q.bind(d);
            }
            out.extend(q.fetch_all(&self.pool).await?);
        }
        Ok(out)
    }

    async fn count(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM leads")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }

    async fn health_check(&self) -> Result<bool> {
        db::quick_check(&self.pool).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lead_search_core::normalize::normalize_row;

    fn lead(dataset: &str, file: &str, row: i64, username: &str, name: &str) -> NewLead {
        let raw = [("username", username), ("name", name)]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        NewLead {
            dataset: dataset.to_string(),
            source_file: file.to_string(),
            source_row: row,
            lead: normalize_row(&raw),
        }
    }

    async fn open_store(dir: &std::path::Path) -> SqliteStore {
        SqliteStore::open(&Config::in_dir(dir)).await.unwrap().0
    }

    #[tokio::test]
    async fn test_append_is_atomic_sequential_and_aligned() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = open_store(tmp.path()).await;
        let out = store
            .append_batch(&[
                lead("d", "a.csv", 1, "user1", "Alpha"),
                lead("d", "a.csv", 2, "user2", "Beta"),
            ])
            .await
            .unwrap();
        assert_eq!(out.ids, vec![1, 2]);
        assert_eq!(out.inserted, 2);

        let alignment = store.alignment().await.unwrap();
        assert!(alignment.is_aligned());
        assert_eq!(alignment.records, 2);
        assert_eq!(alignment.shadow, 2);
    }

    #[tokio::test]
    async fn test_reappending_resolves_existing_ids() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = open_store(tmp.path()).await;
        let batch = vec![
            lead("d", "a.csv", 1, "user1", "Alpha"),
            lead("d", "a.csv", 2, "user2", "Beta"),
        ];
        store.append_batch(&batch[..1]).await.unwrap();
        let out = store.append_batch(&batch).await.unwrap();
        assert_eq!(out.ids, vec![1, 2]);
        assert_eq!(out.inserted, 1);
        assert_eq!(store.count().await.unwrap(), 2);
        assert!(store.alignment().await.unwrap().is_aligned());
    }

    #[tokio::test]
    async fn test_lexical_search_orders_and_filters() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = open_store(tmp.path()).await;
        store
            .append_batch(&[
                lead("shops", "a.csv", 1, "user1", "Alpha Bakery"),
                lead("shops", "a.csv", 2, "user2", "Beta Garage"),
                lead("cafes", "b.csv", 1, "user3", "Gamma Bakery"),
            ])
            .await
            .unwrap();

        let hits = store.lexical_search("bakery", 10, None).await.unwrap();
        let ids: Vec<i64> = hits.iter().map(|h| h.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&1) && ids.contains(&3));

        let cafes = vec!["cafes".to_string()];
        let hits = store
            .lexical_search("bakery", 10, Some(cafes.as_slice()))
            .await
            .unwrap();
        assert_eq!(hits.iter().map(|h| h.id).collect::<Vec<_>>(), vec![3]);

        // punctuation and FTS syntax are neutralized
        assert!(store.lexical_search("\"*(", 10, None).await.unwrap().is_empty());
        assert_eq!(store.lexical_search("alpha AND", 10, None).await.unwrap().len(), 0);
        assert_eq!(store.lexical_search("Alpha", 10, None).await.unwrap()[0].id, 1);
    }

    #[tokio::test]
    async fn test_fetch_and_filter() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = open_store(tmp.path()).await;
        store
            .append_batch(&[
                lead("shops", "a.csv", 1, "user1", "Alpha"),
                lead("cafes", "b.csv", 1, "user2", "Beta"),
            ])
            .await
            .unwrap();
        let records = store.fetch(&[2, 1, 99]).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[&1].username.as_deref(), Some("user1"));
        assert_eq!(records[&2].dataset, "cafes");
        assert_eq!(records[&1].text, "user1 | Alpha");

        let kept = store
            .filter_datasets(&[1, 2], &["cafes".to_string()])
            .await
            .unwrap();
        assert_eq!(kept, HashSet::from([2]));
        assert_eq!(
            store.dataset_counts().await.unwrap(),
            vec![("cafes".to_string(), 1), ("shops".to_string(), 1)]
        );
    }

    #[tokio::test]
    async fn test_misaligned_shadow_is_repaired_on_open() {
        let tmp = tempfile::TempDir::new().unwrap();
        {
            let store = open_store(tmp.path()).await;
            store
                .append_batch(&[lead("d", "a.csv", 1, "user1", "Alpha")])
                .await
                .unwrap();
            sqlx::query("INSERT INTO leads_fts(leads_fts) VALUES('delete-all')")
                .execute(store.pool())
                .await
                .unwrap();
            let broken = store.alignment().await.unwrap();
            assert_eq!(broken.missing, 1);
            assert!(store.lexical_search("alpha", 5, None).await.unwrap().is_empty());
            store.pool().close().await;
        }

        let store = open_store(tmp.path()).await;
        assert!(store.alignment().await.unwrap().is_aligned());
        assert_eq!(store.lexical_search("alpha", 5, None).await.unwrap()[0].id, 1);
        assert!(store.health_check().await.unwrap());
    }
}
