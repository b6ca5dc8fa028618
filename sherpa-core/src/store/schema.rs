//! SQLite schema for the Sherpa store.

pub const SCHEMA_VERSION: &str = "2";

pub const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS sherpa_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Append-only execution traces.
CREATE TABLE IF NOT EXISTS traces (
    trace_id        TEXT PRIMARY KEY,
    parent_trace_id TEXT,
    kind            TEXT NOT NULL,
    node_id         TEXT NOT NULL,
    started_at      TEXT NOT NULL,
    finished_at     TEXT NOT NULL,
    success         INTEGER NOT NULL,
    executed_path   TEXT NOT NULL,
    intent_text     TEXT,
    intent_embedding BLOB,
    priority        REAL NOT NULL,
    user_id         TEXT,
    agent_id        TEXT,
    decisions       TEXT NOT NULL DEFAULT '[]',
    task_results    TEXT NOT NULL DEFAULT '[]'
);

CREATE INDEX IF NOT EXISTS idx_traces_parent   ON traces(parent_trace_id);
CREATE INDEX IF NOT EXISTS idx_traces_node     ON traces(node_id);
CREATE INDEX IF NOT EXISTS idx_traces_priority ON traces(priority);
CREATE INDEX IF NOT EXISTS idx_traces_user     ON traces(user_id);

-- Flattened executed-path membership for mention/usage queries.
CREATE TABLE IF NOT EXISTS trace_nodes (
    trace_id TEXT NOT NULL,
    node_id  TEXT NOT NULL,
    position INTEGER NOT NULL,
    PRIMARY KEY (trace_id, position)
);

CREATE INDEX IF NOT EXISTS idx_trace_nodes_node ON trace_nodes(node_id);

-- Hypergraph snapshot.
CREATE TABLE IF NOT EXISTS graph_nodes (
    id        TEXT PRIMARY KEY,
    kind      TEXT NOT NULL,
    embedding BLOB,
    parents   TEXT NOT NULL DEFAULT '[]',
    children  TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS graph_edges (
    id             TEXT PRIMARY KEY,
    sources        TEXT NOT NULL,
    targets        TEXT NOT NULL,
    weight         REAL NOT NULL,
    edge_type      TEXT NOT NULL,
    edge_source    TEXT NOT NULL,
    observed_count INTEGER NOT NULL DEFAULT 0,
    version        INTEGER NOT NULL DEFAULT 0,
    metadata       TEXT NOT NULL DEFAULT '{}'
);

-- Named SHGAT parameter blobs, one per hierarchy level.
CREATE TABLE IF NOT EXISTS model_params (
    name       TEXT PRIMARY KEY,
    blob       BLOB NOT NULL,
    updated_at TEXT NOT NULL
);
";
