use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use sherpa_graphs::{EdgeRecord, EdgeSource, EdgeType, NodeKind, NodeRecord};

use crate::error::StoreError;
use crate::replay::{COLD_START_PRIORITY, MAX_PRIORITY, MIN_PRIORITY};
use crate::types::{
    Decision, Embedding, ExecutionTrace, TaskResult, TraceId, TraceInput, TraceKind,
    TraceStoreStats,
};

use super::SherpaStore;
use super::schema;

/// SQLite-backed implementation of [`SherpaStore`].
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a store at the given path.
    pub fn open(path: &Path) -> crate::error::Result<Self> {
        let conn = Connection::open(path).map_err(StoreError::Sqlite)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> crate::error::Result<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::Sqlite)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> crate::error::Result<()> {
        let conn = self.conn.lock().unwrap();

        // Performance pragmas (skip WAL for in-memory — it's auto)
        conn.execute_batch(
            "PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(StoreError::Sqlite)?;

        let _ = conn.execute_batch("PRAGMA journal_mode = WAL;");

        conn.execute_batch(schema::SCHEMA_SQL)
            .map_err(StoreError::Sqlite)?;

        conn.execute(
            "INSERT OR IGNORE INTO sherpa_meta (key, value) VALUES ('schema_version', ?1)",
            params![schema::SCHEMA_VERSION],
        )
        .map_err(StoreError::Sqlite)?;

        Ok(())
    }

    fn parse_json<T: serde::de::DeserializeOwned + Default>(text: &str) -> T {
        serde_json::from_str(text).unwrap_or_default()
    }

    fn parse_time(text: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(text)
            .map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
    }

    fn row_to_trace(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExecutionTrace> {
        let trace_id: String = row.get("trace_id")?;
        let parent: Option<String> = row.get("parent_trace_id")?;
        let kind: String = row.get("kind")?;
        let started_at: String = row.get("started_at")?;
        let finished_at: String = row.get("finished_at")?;
        let executed_path: String = row.get("executed_path")?;
        let embedding_blob: Option<Vec<u8>> = row.get("intent_embedding")?;
        let decisions: String = row.get("decisions")?;
        let task_results: String = row.get("task_results")?;

        Ok(ExecutionTrace {
            trace_id: TraceId::from_str(&trace_id)
                .unwrap_or_else(|_| TraceId(uuid::Uuid::nil())),
            parent_trace_id: parent.and_then(|p| TraceId::from_str(&p).ok()),
            kind: if kind == "CapabilityRun" {
                TraceKind::CapabilityRun
            } else {
                TraceKind::ToolRun
            },
            node_id: row.get("node_id")?,
            started_at: Self::parse_time(&started_at),
            finished_at: Self::parse_time(&finished_at),
            success: row.get::<_, i64>("success")? != 0,
            executed_path: Self::parse_json(&executed_path),
            intent_text: row.get("intent_text")?,
            intent_embedding: embedding_blob.as_deref().and_then(Embedding::from_packed),
            priority: row.get("priority")?,
            user_id: row.get("user_id")?,
            agent_id: row.get("agent_id")?,
            decisions: Self::parse_json::<Vec<Decision>>(&decisions),
            task_results: Self::parse_json::<Vec<TaskResult>>(&task_results),
        })
    }
}

#[async_trait::async_trait]
impl SherpaStore for SqliteStore {
    // ── Traces ─────────────────────────────────────────────────────

    async fn save_trace(&self, input: TraceInput) -> crate::error::Result<ExecutionTrace> {
        let trace = ExecutionTrace {
            trace_id: TraceId::generate(),
            parent_trace_id: input.parent_trace_id,
            kind: input.kind,
            node_id: input.node_id,
            started_at: input.started_at,
            finished_at: input.finished_at,
            success: input.success,
            executed_path: input.executed_path,
            intent_text: input.intent_text,
            intent_embedding: input.intent_embedding,
            priority: input
                .priority
                .unwrap_or(COLD_START_PRIORITY)
                .clamp(MIN_PRIORITY, MAX_PRIORITY),
            user_id: input.user_id,
            agent_id: input.agent_id,
            decisions: input.decisions,
            task_results: input
                .task_results
                .into_iter()
                .map(|r| TaskResult {
                    tool: r.tool,
                    output: r.output.sanitized(),
                })
                .collect(),
        };

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO traces (trace_id, parent_trace_id, kind, node_id, started_at,
                                 finished_at, success, executed_path, intent_text,
                                 intent_embedding, priority, user_id, agent_id,
                                 decisions, task_results)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                trace.trace_id.to_string(),
                trace.parent_trace_id.map(|p| p.to_string()),
                trace.kind.as_str(),
                trace.node_id,
                // Millisecond precision keeps julianday() arithmetic valid.
                trace
                    .started_at
                    .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                trace
                    .finished_at
                    .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                i64::from(trace.success),
                serde_json::to_string(&trace.executed_path)
                    .map_err(StoreError::Serialization)?,
                trace.intent_text,
                trace.intent_embedding.as_ref().map(Embedding::to_packed),
                trace.priority,
                trace.user_id,
                trace.agent_id,
                serde_json::to_string(&trace.decisions).map_err(StoreError::Serialization)?,
                serde_json::to_string(&trace.task_results)
                    .map_err(StoreError::Serialization)?,
            ],
        )
        .map_err(StoreError::Sqlite)?;

        let mut stmt = conn
            .prepare_cached(
                "INSERT INTO trace_nodes (trace_id, node_id, position) VALUES (?1, ?2, ?3)",
            )
            .map_err(StoreError::Sqlite)?;
        for (position, node) in trace.executed_path.iter().enumerate() {
            stmt.execute(params![
                trace.trace_id.to_string(),
                node,
                i64::try_from(position).unwrap_or(i64::MAX)
            ])
            .map_err(StoreError::Sqlite)?;
        }

        Ok(trace)
    }

    async fn get_trace(&self, id: TraceId) -> crate::error::Result<Option<ExecutionTrace>> {
        let conn = self.conn.lock().unwrap();
        let trace = conn
            .query_row(
                "SELECT * FROM traces WHERE trace_id = ?1",
                params![id.to_string()],
                Self::row_to_trace,
            )
            .optional()
            .map_err(StoreError::Sqlite)?;
        Ok(trace)
    }

    async fn children_of(&self, id: TraceId) -> crate::error::Result<Vec<ExecutionTrace>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare_cached(
                "SELECT * FROM traces WHERE parent_trace_id = ?1 ORDER BY started_at ASC",
            )
            .map_err(StoreError::Sqlite)?;
        let traces = stmt
            .query_map(params![id.to_string()], Self::row_to_trace)
            .map_err(StoreError::Sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Sqlite)?;
        Ok(traces)
    }

    async fn trace_priorities(
        &self,
        min_priority: f64,
    ) -> crate::error::Result<Vec<(TraceId, f64)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare_cached("SELECT trace_id, priority FROM traces WHERE priority >= ?1")
            .map_err(StoreError::Sqlite)?;
        let rows = stmt
            .query_map(params![min_priority], |row| {
                let id: String = row.get(0)?;
                let priority: f64 = row.get(1)?;
                Ok((id, priority))
            })
            .map_err(StoreError::Sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Sqlite)?;
        Ok(rows
            .into_iter()
            .filter_map(|(id, p)| TraceId::from_str(&id).ok().map(|id| (id, p)))
            .collect())
    }

    async fn traces_by_ids(
        &self,
        ids: &[TraceId],
    ) -> crate::error::Result<Vec<ExecutionTrace>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare_cached("SELECT * FROM traces WHERE trace_id = ?1")
            .map_err(StoreError::Sqlite)?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(trace) = stmt
                .query_row(params![id.to_string()], Self::row_to_trace)
                .optional()
                .map_err(StoreError::Sqlite)?
            {
                out.push(trace);
            }
        }
        Ok(out)
    }

    async fn traces_mentioning(
        &self,
        node_id: &str,
    ) -> crate::error::Result<Vec<ExecutionTrace>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare_cached(
                "SELECT DISTINCT t.* FROM traces t
                 LEFT JOIN trace_nodes tn ON tn.trace_id = t.trace_id
                 WHERE t.node_id = ?1 OR tn.node_id = ?1
                 ORDER BY t.started_at ASC",
            )
            .map_err(StoreError::Sqlite)?;
        let traces = stmt
            .query_map(params![node_id], Self::row_to_trace)
            .map_err(StoreError::Sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Sqlite)?;
        Ok(traces)
    }

    async fn usage_counts(&self) -> crate::error::Result<HashMap<String, u64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare_cached(
                "SELECT node_id, COUNT(*) FROM trace_nodes GROUP BY node_id",
            )
            .map_err(StoreError::Sqlite)?;
        let rows = stmt
            .query_map([], |row| {
                let node: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok((node, count.max(0).unsigned_abs()))
            })
            .map_err(StoreError::Sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Sqlite)?;
        Ok(rows.into_iter().collect())
    }

    async fn anonymize_user_traces(&self, user_id: &str) -> crate::error::Result<u64> {
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute(
                "UPDATE traces
                 SET user_id = 'anonymized', intent_text = NULL, intent_embedding = NULL
                 WHERE user_id = ?1",
                params![user_id],
            )
            .map_err(StoreError::Sqlite)?;
        Ok(changed as u64)
    }

    async fn stats(&self) -> crate::error::Result<TraceStoreStats> {
        let conn = self.conn.lock().unwrap();
        let stats = conn
            .query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(success), 0),
                        COALESCE(AVG((julianday(finished_at) - julianday(started_at))
                                     * 86400000.0), 0.0),
                        COALESCE(AVG(priority), 0.5)
                 FROM traces",
                [],
                |row| {
                    let total: i64 = row.get(0)?;
                    let successful: i64 = row.get(1)?;
                    Ok(TraceStoreStats {
                        total: total.max(0).unsigned_abs(),
                        successful: successful.max(0).unsigned_abs(),
                        avg_duration_ms: row.get(2)?,
                        avg_priority: row.get(3)?,
                    })
                },
            )
            .map_err(StoreError::Sqlite)?;
        Ok(stats)
    }

    // ── Hypergraph snapshot ────────────────────────────────────────

    async fn save_graph_snapshot(
        &self,
        nodes: &[NodeRecord],
        edges: &[EdgeRecord],
    ) -> crate::error::Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(StoreError::Sqlite)?;
        tx.execute("DELETE FROM graph_nodes", [])
            .map_err(StoreError::Sqlite)?;
        tx.execute("DELETE FROM graph_edges", [])
            .map_err(StoreError::Sqlite)?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO graph_nodes (id, kind, embedding, parents, children)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .map_err(StoreError::Sqlite)?;
            for node in nodes {
                let packed: Vec<u8> =
                    node.embedding.iter().flat_map(|x| x.to_le_bytes()).collect();
                stmt.execute(params![
                    node.id,
                    node.kind.as_str(),
                    packed,
                    serde_json::to_string(&node.parents).map_err(StoreError::Serialization)?,
                    serde_json::to_string(&node.children)
                        .map_err(StoreError::Serialization)?,
                ])
                .map_err(StoreError::Sqlite)?;
            }
        }
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO graph_edges (id, sources, targets, weight, edge_type,
                                              edge_source, observed_count, version, metadata)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )
                .map_err(StoreError::Sqlite)?;
            for edge in edges {
                stmt.execute(params![
                    edge.id,
                    serde_json::to_string(&edge.sources).map_err(StoreError::Serialization)?,
                    serde_json::to_string(&edge.targets).map_err(StoreError::Serialization)?,
                    edge.weight,
                    edge.edge_type.as_str(),
                    edge.edge_source.as_str(),
                    i64::from(edge.observed_count),
                    i64::try_from(edge.version).unwrap_or(i64::MAX),
                    serde_json::to_string(&edge.metadata)
                        .map_err(StoreError::Serialization)?,
                ])
                .map_err(StoreError::Sqlite)?;
            }
        }
        tx.commit().map_err(StoreError::Sqlite)?;
        Ok(())
    }

    async fn load_graph_snapshot(
        &self,
    ) -> crate::error::Result<(Vec<NodeRecord>, Vec<EdgeRecord>)> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare("SELECT id, kind, embedding, parents, children FROM graph_nodes")
            .map_err(StoreError::Sqlite)?;
        let nodes = stmt
            .query_map([], |row| {
                let kind: String = row.get(1)?;
                let blob: Vec<u8> = row.get(2)?;
                let parents: String = row.get(3)?;
                let children: String = row.get(4)?;
                Ok(NodeRecord {
                    id: row.get(0)?,
                    kind: NodeKind::from_str(&kind).unwrap_or(NodeKind::Tool),
                    embedding: blob
                        .chunks_exact(4)
                        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                        .collect(),
                    parents: Self::parse_json(&parents),
                    children: Self::parse_json(&children),
                })
            })
            .map_err(StoreError::Sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Sqlite)?;

        let mut stmt = conn
            .prepare(
                "SELECT id, sources, targets, weight, edge_type, edge_source,
                        observed_count, version, metadata
                 FROM graph_edges",
            )
            .map_err(StoreError::Sqlite)?;
        let edges = stmt
            .query_map([], |row| {
                let sources: String = row.get(1)?;
                let targets: String = row.get(2)?;
                let edge_type: String = row.get(4)?;
                let edge_source: String = row.get(5)?;
                let observed: i64 = row.get(6)?;
                let version: i64 = row.get(7)?;
                let metadata: String = row.get(8)?;
                Ok(EdgeRecord {
                    id: row.get(0)?,
                    sources: Self::parse_json(&sources),
                    targets: Self::parse_json(&targets),
                    weight: row.get(3)?,
                    edge_type: EdgeType::from_str(&edge_type)
                        .unwrap_or(EdgeType::Dependency),
                    edge_source: EdgeSource::from_str(&edge_source)
                        .unwrap_or(EdgeSource::Template),
                    observed_count: u32::try_from(observed.max(0)).unwrap_or(u32::MAX),
                    version: u64::try_from(version.max(0)).unwrap_or(0),
                    metadata: Self::parse_json(&metadata),
                })
            })
            .map_err(StoreError::Sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Sqlite)?;

        Ok((nodes, edges))
    }

    // ── Model parameters ───────────────────────────────────────────

    async fn save_model_params(&self, name: &str, blob: &[u8]) -> crate::error::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO model_params (name, blob, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET blob = ?2, updated_at = ?3",
            params![name, blob, Utc::now().to_rfc3339()],
        )
        .map_err(StoreError::Sqlite)?;
        Ok(())
    }

    async fn load_model_params(&self, name: &str) -> crate::error::Result<Option<Vec<u8>>> {
        let conn = self.conn.lock().unwrap();
        let blob = conn
            .query_row(
                "SELECT blob FROM model_params WHERE name = ?1",
                params![name],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()
            .map_err(StoreError::Sqlite)?;
        Ok(blob)
    }

    // ── Checkpoints ────────────────────────────────────────────────

    async fn get_checkpoint(&self, key: &str) -> crate::error::Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT value FROM sherpa_meta WHERE key = ?1",
                params![format!("checkpoint:{key}")],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(StoreError::Sqlite)?;
        Ok(value)
    }

    async fn set_checkpoint(&self, key: &str, value: &str) -> crate::error::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO sherpa_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = ?2",
            params![format!("checkpoint:{key}"), value],
        )
        .map_err(StoreError::Sqlite)?;
        Ok(())
    }
}

// ── Tests ──────────────────────────────────────────────────────────
