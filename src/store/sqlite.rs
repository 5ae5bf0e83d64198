use super::{
    LocationPredicate, LocationRewrite, NewNodeRecord, NodeFilter, NodeOrder, NodeQuery,
    NodeRecord, StoreError, StoreTransaction, TreeStore,
};
use crate::types::{current_timestamp, Marriage, NodeId, TreeId};
use async_trait::async_trait;
use sqlx::{
    sqlite::{
        SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
        SqliteRow,
    },
    ConnectOptions, QueryBuilder, Row, Sqlite, Transaction,
};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

const SELECT_NODES: &str =
    "SELECT id, tree_id, location, gender, payload, created_at, updated_at FROM nodes";

const SELECT_MARRIAGES: &str = "SELECT husband_id, wife_id, metadata, created_at FROM marriages";

/// Largest id list bound into one statement
const ID_BATCH: usize = 500;

/// Configuration for the SQLite tree store
#[derive(Debug, Clone)]
pub struct SqliteStoreConfig {
    /// Path to SQLite database
    pub db_path: PathBuf,

    /// Upper bound on pooled connections
    pub max_connections: u32,
}

impl Default for SqliteStoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("lineage.db"),
            max_connections: 5,
        }
    }
}

/// SQLite-backed [`TreeStore`].
///
/// One `nodes` table keyed by `(tree_id, location)` plus a `marriages` edge
/// table. Equality, prefix, range and length predicates run in SQL; regular
/// expressions are checked on the rows SQL returns, so every pattern query
/// also carries a prefix or length constraint to keep the scan narrow.
///
/// SQLite has a single writer per database. Write transactions are handed out
/// one at a time, whatever tree they touch, so a second writer waits instead
/// of failing with `SQLITE_BUSY`.
pub struct SqliteTreeStore {
    pool: SqlitePool,
    writer: Arc<Mutex<()>>,
}

impl SqliteTreeStore {
    /// Open (or create) the database and run migrations
    pub async fn new(config: SqliteStoreConfig) -> Result<Self, StoreError> {
        let db_url = format!("sqlite:{}?mode=rwc", config.db_path.display());
        let mut connect_options: SqliteConnectOptions = db_url.parse()?;
        connect_options = connect_options
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);
        connect_options.disable_statement_logging();
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(connect_options)
            .await?;

        let store = Self {
            pool,
            writer: Arc::new(Mutex::new(())),
        };
        store.run_migrations().await?;

        tracing::debug!(db = %config.db_path.display(), "Opened tree store");
        Ok(store)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                tree_id TEXT NOT NULL,
                location TEXT NOT NULL,
                gender TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE (tree_id, location)
            );

            CREATE TABLE IF NOT EXISTS marriages (
                husband_id TEXT NOT NULL,
                wife_id TEXT NOT NULL,
                metadata TEXT,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (husband_id, wife_id),
                FOREIGN KEY (husband_id) REFERENCES nodes(id) ON DELETE CASCADE,
                FOREIGN KEY (wife_id) REFERENCES nodes(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_nodes_tree_location ON nodes(tree_id, location);
            CREATE INDEX IF NOT EXISTS idx_marriages_wife ON marriages(wife_id);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl TreeStore for SqliteTreeStore {
    async fn query(&self, query: &NodeQuery) -> Result<Vec<NodeRecord>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        fetch_nodes(&mut conn, query).await
    }

    async fn count(&self, filter: &NodeFilter) -> Result<u64, StoreError> {
        let mut conn = self.pool.acquire().await?;
        if filter.has_patterns() || split_ids(filter).len() > 1 {
            let rows = fetch_nodes(&mut conn, &NodeQuery::new(filter.clone())).await?;
            return Ok(rows.len() as u64);
        }
        let mut builder = QueryBuilder::new("SELECT COUNT(*) AS count FROM nodes");
        push_filter(&mut builder, filter);
        let row = builder.build().fetch_one(&mut *conn).await?;
        let count: i64 = row.try_get("count")?;
        Ok(count as u64)
    }

    async fn marriages_of(&self, ids: &[NodeId]) -> Result<Vec<Marriage>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        fetch_marriages(&mut conn, ids).await
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let writer = self.writer.clone().lock_owned().await;
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteTransaction {
            tx,
            _writer: writer,
        }))
    }
}

/// A pooled connection inside `BEGIN`; sqlx rolls it back if dropped uncommitted.
///
/// Fields drop in order, so the writer slot is released after the connection.
struct SqliteTransaction {
    tx: Transaction<'static, Sqlite>,
    _writer: OwnedMutexGuard<()>,
}

impl SqliteTransaction {
    async fn matching_ids(&mut self, filter: &NodeFilter) -> Result<Vec<NodeId>, StoreError> {
        let rows = fetch_nodes(&mut self.tx, &NodeQuery::new(filter.clone())).await?;
        Ok(rows.into_iter().map(|r| r.id).collect())
    }

    /// Filters with regular expressions are resolved to ids, then split into
    /// batches small enough to bind
    async fn pushdown(&mut self, filter: &NodeFilter) -> Result<Vec<NodeFilter>, StoreError> {
        if !filter.has_patterns() {
            return Ok(split_ids(filter));
        }
        let ids = self.matching_ids(filter).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(split_ids(&NodeFilter::ids(ids)))
    }
}

#[async_trait]
impl StoreTransaction for SqliteTransaction {
    async fn query(&mut self, query: &NodeQuery) -> Result<Vec<NodeRecord>, StoreError> {
        fetch_nodes(&mut self.tx, query).await
    }

    async fn insert(&mut self, row: NewNodeRecord) -> Result<NodeRecord, StoreError> {
        let now = current_timestamp();
        let record = NodeRecord {
            id: NodeId::new(),
            tree_id: row.tree_id,
            location: row.location,
            gender: row.gender,
            payload: row.payload,
            created_at: now,
            updated_at: now,
        };
        let payload = serde_json::to_string(&record.payload)
            .map_err(|e| StoreError::Corrupt(format!("Failed to serialize payload: {}", e)))?;

        sqlx::query(
            "INSERT INTO nodes (id, tree_id, location, gender, payload, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(record.tree_id.to_string())
        .bind(&record.location)
        .bind(record.gender.as_str())
        .bind(payload)
        .bind(now)
        .bind(now)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| unique_violation(e, &record.location))?;

        Ok(record)
    }

    async fn update_location(
        &mut self,
        filter: &NodeFilter,
        rewrite: &LocationRewrite,
    ) -> Result<u64, StoreError> {
        let mut rows = 0;
        for filter in self.pushdown(filter).await? {
            let mut builder = QueryBuilder::new("UPDATE nodes SET location = ");
            match rewrite {
                LocationRewrite::Set(value) => {
                    builder.push_bind(value.clone());
                }
                LocationRewrite::ReplacePrefix {
                    prefix_len,
                    replacement,
                } => {
                    builder
                        .push_bind(replacement.clone())
                        .push(" || substr(location, ")
                        .push_bind(*prefix_len as i64 + 1)
                        .push(")");
                }
                LocationRewrite::Prepend(prefix) => {
                    builder.push_bind(prefix.clone()).push(" || location");
                }
            }
            builder.push(", updated_at = ").push_bind(current_timestamp());
            push_filter(&mut builder, &filter);

            let result = builder
                .build()
                .execute(&mut *self.tx)
                .await
                .map_err(|e| unique_violation(e, &format!("{:?}", rewrite)))?;
            rows += result.rows_affected();
        }
        Ok(rows)
    }

    async fn delete(&mut self, filter: &NodeFilter) -> Result<u64, StoreError> {
        let mut rows = 0;
        for filter in self.pushdown(filter).await? {
            let mut builder = QueryBuilder::new("DELETE FROM nodes");
            push_filter(&mut builder, &filter);
            rows += builder.build().execute(&mut *self.tx).await?.rows_affected();
        }
        Ok(rows)
    }

    async fn marriages_of(&mut self, ids: &[NodeId]) -> Result<Vec<Marriage>, StoreError> {
        fetch_marriages(&mut self.tx, ids).await
    }

    async fn insert_marriage(&mut self, marriage: &Marriage) -> Result<(), StoreError> {
        let metadata = marriage
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Corrupt(format!("Failed to serialize metadata: {}", e)))?;

        sqlx::query(
            "INSERT INTO marriages (husband_id, wife_id, metadata, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(marriage.husband.to_string())
        .bind(marriage.wife.to_string())
        .bind(metadata)
        .bind(marriage.created_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn delete_marriage(&mut self, a: &NodeId, b: &NodeId) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM marriages
             WHERE (husband_id = ? AND wife_id = ?) OR (husband_id = ? AND wife_id = ?)",
        )
        .bind(a.to_string())
        .bind(b.to_string())
        .bind(b.to_string())
        .bind(a.to_string())
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_marriages_within(&mut self, filter: &NodeFilter) -> Result<u64, StoreError> {
        let mut rows = 0;
        for filter in self.pushdown(filter).await? {
            let mut builder =
                QueryBuilder::new("DELETE FROM marriages WHERE husband_id IN (SELECT id FROM nodes");
            push_filter(&mut builder, &filter);
            builder.push(") OR wife_id IN (SELECT id FROM nodes");
            push_filter(&mut builder, &filter);
            builder.push(")");
            rows += builder.build().execute(&mut *self.tx).await?.rows_affected();
        }
        Ok(rows)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

// ============================================================================
// SQL helpers
// ============================================================================

/// One filter per batch of at most [`ID_BATCH`] ids; the filter itself when it
/// carries no id list or a short one
fn split_ids(filter: &NodeFilter) -> Vec<NodeFilter> {
    match &filter.ids {
        Some(ids) if ids.len() > ID_BATCH => ids
            .chunks(ID_BATCH)
            .map(|chunk| NodeFilter {
                ids: Some(chunk.to_vec()),
                ..filter.clone()
            })
            .collect(),
        _ => vec![filter.clone()],
    }
}

async fn fetch_nodes(
    conn: &mut SqliteConnection,
    query: &NodeQuery,
) -> Result<Vec<NodeRecord>, StoreError> {
    let batches = split_ids(&query.filter);
    if batches.len() == 1 {
        return fetch_node_batch(conn, query).await;
    }

    let mut records = Vec::new();
    for filter in batches {
        let batch = NodeQuery::new(filter).order(query.order);
        records.extend(fetch_node_batch(conn, &batch).await?);
    }
    query.order.sort(&mut records);
    if let Some(limit) = query.limit {
        records.truncate(limit);
    }
    Ok(records)
}

async fn fetch_node_batch(
    conn: &mut SqliteConnection,
    query: &NodeQuery,
) -> Result<Vec<NodeRecord>, StoreError> {
    let patterns = query.filter.compile_patterns()?;

    let mut builder = QueryBuilder::new(SELECT_NODES);
    push_filter(&mut builder, &query.filter);
    builder.push(match query.order {
        NodeOrder::LocationAsc => " ORDER BY location ASC",
        NodeOrder::LocationDesc => " ORDER BY location DESC",
        NodeOrder::LongestFirst => " ORDER BY length(location) DESC, location DESC",
    });
    if let (Some(limit), false) = (query.limit, query.filter.has_patterns()) {
        builder.push(" LIMIT ").push_bind(limit as i64);
    }

    let rows = builder.build().fetch_all(&mut *conn).await?;

    let mut records = Vec::with_capacity(rows.len());
    for row in &rows {
        let record = decode_node(row)?;
        if patterns.is_empty() || query.filter.location_accepts(&record.location, &patterns) {
            records.push(record);
        }
    }
    if let Some(limit) = query.limit {
        records.truncate(limit);
    }
    Ok(records)
}

async fn fetch_marriages(
    conn: &mut SqliteConnection,
    ids: &[NodeId],
) -> Result<Vec<Marriage>, StoreError> {
    let mut seen = HashSet::new();
    let mut marriages = Vec::new();
    for chunk in ids.chunks(ID_BATCH) {
        let mut builder = QueryBuilder::new(SELECT_MARRIAGES);
        builder.push(" WHERE husband_id IN ");
        push_id_list(&mut builder, chunk);
        builder.push(" OR wife_id IN ");
        push_id_list(&mut builder, chunk);

        let rows = builder.build().fetch_all(&mut *conn).await?;
        for row in &rows {
            let marriage = decode_marriage(row)?;
            // Both partners may fall in different batches
            if seen.insert((marriage.husband, marriage.wife)) {
                marriages.push(marriage);
            }
        }
    }
    marriages.sort_by_key(|m| m.created_at);
    Ok(marriages)
}

fn push_id_list(builder: &mut QueryBuilder<'_, Sqlite>, ids: &[NodeId]) {
    builder.push("(");
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(id.to_string());
    }
    separated.push_unseparated(")");
}

/// Smallest string greater than every string starting with `prefix`, if one exists
fn prefix_upper_bound(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    let last = chars.pop()?;
    let next = char::from_u32(last as u32 + 1)?;
    chars.push(next);
    Some(chars.into_iter().collect())
}

/// Append a WHERE clause for everything SQL can evaluate itself
fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &NodeFilter) {
    builder.push(" WHERE 1 = 1");

    if let Some(tree_id) = filter.tree_id {
        builder.push(" AND tree_id = ").push_bind(tree_id.to_string());
    }
    if let Some(ids) = &filter.ids {
        if ids.is_empty() {
            builder.push(" AND 0 = 1");
        } else {
            builder.push(" AND id IN ");
            push_id_list(builder, ids);
        }
    }
    if let Some(gender) = filter.gender {
        builder.push(" AND gender = ").push_bind(gender.as_str());
    }

    for predicate in &filter.location {
        match predicate {
            LocationPredicate::Equals(value) => {
                builder.push(" AND location = ").push_bind(value.clone());
            }
            // A range over the (tree_id, location) index where possible
            LocationPredicate::StartsWith(prefix) => match prefix_upper_bound(prefix) {
                Some(upper) => {
                    builder
                        .push(" AND location >= ")
                        .push_bind(prefix.clone())
                        .push(" AND location < ")
                        .push_bind(upper);
                }
                None => {
                    builder
                        .push(" AND substr(location, 1, ")
                        .push_bind(prefix.chars().count() as i64)
                        .push(") = ")
                        .push_bind(prefix.clone());
                }
            },
            LocationPredicate::Matches(_) => {}
            LocationPredicate::Less(value) => {
                builder.push(" AND location < ").push_bind(value.clone());
            }
            LocationPredicate::Greater(value) => {
                builder.push(" AND location > ").push_bind(value.clone());
            }
            LocationPredicate::LessOrEqual(value) => {
                builder.push(" AND location <= ").push_bind(value.clone());
            }
            LocationPredicate::GreaterOrEqual(value) => {
                builder.push(" AND location >= ").push_bind(value.clone());
            }
            LocationPredicate::In(values) => {
                if values.is_empty() {
                    builder.push(" AND 0 = 1");
                } else {
                    builder.push(" AND location IN (");
                    let mut separated = builder.separated(", ");
                    for value in values {
                        separated.push_bind(value.clone());
                    }
                    separated.push_unseparated(")");
                }
            }
            LocationPredicate::Length(len) => {
                builder.push(" AND length(location) = ").push_bind(*len as i64);
            }
            LocationPredicate::LengthAtMost(len) => {
                builder.push(" AND length(location) <= ").push_bind(*len as i64);
            }
        }
    }
}

fn decode_node(row: &SqliteRow) -> Result<NodeRecord, StoreError> {
    let id: String = row.try_get("id")?;
    let tree_id: String = row.try_get("tree_id")?;
    let gender: String = row.try_get("gender")?;
    let payload: String = row.try_get("payload")?;

    Ok(NodeRecord {
        id: NodeId::parse_str(&id).map_err(StoreError::Corrupt)?,
        tree_id: TreeId::parse_str(&tree_id).map_err(StoreError::Corrupt)?,
        location: row.try_get("location")?,
        gender: gender.parse().map_err(StoreError::Corrupt)?,
        payload: serde_json::from_str(&payload)
            .map_err(|e| StoreError::Corrupt(format!("Invalid payload for node {}: {}", id, e)))?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn decode_marriage(row: &SqliteRow) -> Result<Marriage, StoreError> {
    let husband: String = row.try_get("husband_id")?;
    let wife: String = row.try_get("wife_id")?;
    let metadata: Option<String> = row.try_get("metadata")?;

    Ok(Marriage {
        husband: NodeId::parse_str(&husband).map_err(StoreError::Corrupt)?,
        wife: NodeId::parse_str(&wife).map_err(StoreError::Corrupt)?,
        metadata: metadata
            .map(|m| serde_json::from_str(&m))
            .transpose()
            .map_err(|e| StoreError::Corrupt(format!("Invalid marriage metadata: {}", e)))?,
        created_at: row.try_get("created_at")?,
    })
}

fn unique_violation(error: sqlx::Error, location: &str) -> StoreError {
    match &error {
        sqlx::Error::Database(db) if db.message().contains("UNIQUE constraint failed") => {
            StoreError::UniqueViolation {
                location: location.to_string(),
            }
        }
        _ => StoreError::Database(error),
    }
}
