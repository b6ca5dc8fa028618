// Sherpa MCP server — exposes the recommendation engine as MCP tools for
// AI agents.
//
// Tools:
//   sherpa_score    — rank capabilities for an intent
//   sherpa_predict  — suggest the next tool to invoke
//   sherpa_path     — shortest hyperpath between two tools
//   sherpa_stats    — engine metrics

use std::sync::Arc;
use std::time::{Duration, Instant};

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{ServerCapabilities, ServerInfo};
use rmcp::{ServerHandler, schemars, tool, tool_router};
use serde::Deserialize;

use sherpa_core::runtime::SherpaRuntime;

// ── Tool parameter types ──────────────────────────────────────────

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ScoreParams {
    /// Natural-language intent to score capabilities against
    #[schemars(description = "Natural-language intent to score capabilities against")]
    pub intent: String,
    /// Recently used tool/capability ids, oldest first
    #[schemars(description = "Recently used tool or capability ids, oldest first (optional)")]
    pub context: Option<Vec<String>>,
    /// Maximum number of results (default: 10)
    #[schemars(description = "Maximum number of results (default: 10)")]
    pub top_k: Option<u32>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct PredictParams {
    /// Natural-language intent
    #[schemars(description = "Natural-language intent")]
    pub intent: String,
    /// Recently used tool/capability ids, oldest first
    #[schemars(description = "Recently used tool or capability ids, oldest first (optional)")]
    pub context: Option<Vec<String>>,
    /// Score threshold below which no suggestion is made (default: 0.4)
    #[schemars(description = "Score threshold below which no suggestion is made (default: 0.4)")]
    pub threshold: Option<f32>,
    /// Deadline in milliseconds for the whole prediction (default: 2000)
    #[schemars(description = "Deadline in milliseconds (default: 2000)")]
    pub deadline_ms: Option<u64>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct PathParams {
    /// Source tool id
    #[schemars(description = "Source tool id")]
    pub from: String,
    /// Target tool id
    #[schemars(description = "Target tool id")]
    pub to: String,
}

// ── Server struct ─────────────────────────────────────────────────

#[derive(Clone)]
pub struct SherpaMcpServer {
    runtime: Arc<SherpaRuntime>,
    #[allow(dead_code)]
    tool_router: ToolRouter<Self>,
}

impl std::fmt::Debug for SherpaMcpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SherpaMcpServer").finish_non_exhaustive()
    }
}

impl SherpaMcpServer {
    pub fn new(runtime: Arc<SherpaRuntime>) -> Self {
        Self {
            runtime,
            tool_router: Self::tool_router(),
        }
    }
}

// ── Tool implementations ──────────────────────────────────────────

#[tool_router]
impl SherpaMcpServer {
    #[tool(
        name = "sherpa_score",
        description = "Rank registered capabilities for a natural-language intent. Returns scores, attention head weights, and a rationale per capability."
    )]
    async fn score(&self, Parameters(params): Parameters<ScoreParams>) -> String {
        match self.do_score(params).await {
            Ok(s) => s,
            Err(e) => format!("Error: {e}"),
        }
    }

    #[tool(
        name = "sherpa_predict",
        description = "Suggest the next tool to invoke for an intent, given recently used tools. Returns the chosen capability, the next tool, a confidence, and the routing path."
    )]
    async fn predict(&self, Parameters(params): Parameters<PredictParams>) -> String {
        match self.do_predict(params).await {
            Ok(s) => s,
            Err(e) => format!("Error: {e}"),
        }
    }

    #[tool(
        name = "sherpa_path",
        description = "Shortest hyperpath between two tools over the capability hypergraph. Disconnection is reported, not an error."
    )]
    async fn path(&self, Parameters(params): Parameters<PathParams>) -> String {
        match self.do_path(params) {
            Ok(s) => s,
            Err(e) => format!("Error: {e}"),
        }
    }

    #[tool(
        name = "sherpa_stats",
        description = "Engine metrics: node/edge counts, graph version, average PageRank, trace totals, cache hit rate, and the scoring blend coefficient."
    )]
    async fn stats(&self) -> String {
        match self.do_stats().await {
            Ok(s) => s,
            Err(e) => format!("Error: {e}"),
        }
    }
}

impl ServerHandler for SherpaMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Sherpa MCP server — capability recommendation for AI agents. \
                 Use sherpa_score to rank capabilities for an intent, \
                 sherpa_predict to get the next tool to invoke, sherpa_path \
                 to route between tools, and sherpa_stats for engine metrics."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

// ── Tool logic (separated for testability) ────────────────────────

impl SherpaMcpServer {
    async fn do_score(&self, params: ScoreParams) -> Result<String, String> {
        let context = params.context.unwrap_or_default();
        let top_k = params.top_k.unwrap_or(10) as usize;
        let scores = self
            .runtime
            .predictor
            .score_capabilities(&params.intent, &context, None)
            .await
            .map_err(|e| e.to_string())?;

        let results: Vec<_> = scores
            .iter()
            .take(top_k)
            .map(|s| {
                serde_json::json!({
                    "id": s.id,
                    "score": s.score,
                    "head_weights": s.head_weights,
                    "rationale": s.rationale,
                    "alpha": s.alpha,
                })
            })
            .collect();

        serde_json::to_string_pretty(&serde_json::json!({
            "count": results.len(),
            "results": results,
        }))
        .map_err(|e| format!("JSON error: {e}"))
    }

    async fn do_predict(&self, params: PredictParams) -> Result<String, String> {
        let context = params.context.unwrap_or_default();
        let deadline =
            Instant::now() + Duration::from_millis(params.deadline_ms.unwrap_or(2000));
        let suggestion = self
            .runtime
            .predictor
            .predict_next_node(&params.intent, &context, params.threshold, Some(deadline))
            .await
            .map_err(|e| e.to_string())?;

        let body = match suggestion {
            Some(s) => serde_json::json!({
                "suggestion": {
                    "next_node": s.next_node,
                    "capability": s.capability,
                    "confidence": s.confidence,
                    "path": s.path,
                }
            }),
            None => serde_json::json!({
                "suggestion": null,
                "note": "no capability scored above the threshold",
            }),
        };
        serde_json::to_string_pretty(&body).map_err(|e| format!("JSON error: {e}"))
    }

    fn do_path(&self, params: PathParams) -> Result<String, String> {
        let view = self
            .runtime
            .engine
            .find_shortest_hyperpath(&params.from, &params.to, None)
            .map_err(|e| e.to_string())?;
        serde_json::to_string_pretty(&serde_json::json!({
            "found": view.found,
            "node_sequence": view.node_sequence,
            "hyperedges_used": view.hyperedges_used,
            "total_weight": if view.total_weight.is_finite() {
                serde_json::json!(view.total_weight)
            } else {
                serde_json::json!("infinity")
            },
        }))
        .map_err(|e| format!("JSON error: {e}"))
    }

    async fn do_stats(&self) -> Result<String, String> {
        let stats = self.runtime.stats().await.map_err(|e| e.to_string())?;
        serde_json::to_string_pretty(&stats).map_err(|e| format!("JSON error: {e}"))
    }
}

// ── Entry points for the CLI ──────────────────────────────────────

/// Serve the engine over stdio until the client disconnects.
pub async fn serve_stdio(runtime: Arc<SherpaRuntime>) -> Result<(), Box<dyn std::error::Error>> {
    use rmcp::ServiceExt;

    let server = SherpaMcpServer::new(runtime);
    tracing::info!("Starting Sherpa MCP server (stdio transport)");

    let transport = tokio::io::join(tokio::io::stdin(), tokio::io::stdout());
    let service = server.serve(transport).await?;
    service.waiting().await?;

    Ok(())
}

/// Resolve the Sherpa database path from a workspace path.
pub fn resolve_db_path(root: &std::path::Path) -> Option<std::path::PathBuf> {
    let db = root.join(".sherpa/sherpa.db");
    if db.exists() { Some(db) } else { None }
}

// ── Tests ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use sherpa_core::NodeKind;
    use sherpa_core::config::SherpaConfig;

    async fn server() -> SherpaMcpServer {
        let mut config = SherpaConfig::default();
        config.engine.embedding_dim = 64;
        config.shgat.num_heads = 2;
        config.shgat.hidden_dim = 8;
        let runtime = SherpaRuntime::in_memory(config).await.unwrap();
        runtime
            .register_node("payments", NodeKind::Capability, "payment validate charge")
            .await
            .unwrap();
        runtime
            .register_node("payment_validate", NodeKind::Tool, "validate a payment")
            .await
            .unwrap();
        runtime
            .register_node("payment_charge", NodeKind::Tool, "charge a card")
            .await
            .unwrap();
        runtime.engine.link_hierarchy("payments", "payment_validate").unwrap();
        runtime.engine.link_hierarchy("payments", "payment_charge").unwrap();
        SherpaMcpServer::new(Arc::new(runtime))
    }

    #[tokio::test]
    async fn score_returns_ranked_json() {
        let server = server().await;
        let out = server
            .do_score(ScoreParams {
                intent: "validate a payment".into(),
                context: None,
                top_k: Some(5),
            })
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["count"], 1);
        assert_eq!(parsed["results"][0]["id"], "payments");
    }

    #[tokio::test]
    async fn predict_returns_suggestion_or_null() {
        let server = server().await;
        let out = server
            .do_predict(PredictParams {
                intent: "validate a payment".into(),
                context: None,
                threshold: Some(0.0),
                deadline_ms: None,
            })
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["suggestion"]["capability"], "payments");
        assert_eq!(parsed["suggestion"]["next_node"], "payment_validate");
    }

    #[tokio::test]
    async fn path_reports_disconnection() {
        let server = server().await;
        let out = server
            .do_path(PathParams {
                from: "payment_validate".into(),
                to: "payment_charge".into(),
            })
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["found"], false);
        assert_eq!(parsed["total_weight"], "infinity");
    }

    #[tokio::test]
    async fn stats_render() {
        let server = server().await;
        let out = server.do_stats().await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["node_count"], 3);
    }
}
