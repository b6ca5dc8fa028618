// Integration test utilities and fixture builders for Sherpa.

use chrono::{Duration, Utc};

use sherpa_core::config::SherpaConfig;
use sherpa_core::runtime::SherpaRuntime;
use sherpa_core::types::{TraceInput, TraceKind};
use sherpa_graphs::{EdgeSource, EdgeType, HyperedgeSpec, NodeKind};

/// The six checkout tools, in execution order.
pub const CHECKOUT_TOOLS: [&str; 6] = [
    "db_get_cart",
    "inventory_check",
    "payment_validate",
    "payment_charge",
    "db_save_order",
    "email_confirm",
];

/// Small test configuration: narrow embeddings, small attention model.
pub fn test_config() -> SherpaConfig {
    let mut config = SherpaConfig::default();
    config.engine.embedding_dim = 128;
    config.shgat.num_heads = 2;
    config.shgat.hidden_dim = 8;
    config
}

/// An in-memory engine with the checkout flow: one capability whose six
/// tools are chained by 1-to-1 `sequence`/`inferred` hyperedges (derived
/// weight 0.35 each).
pub async fn checkout_runtime() -> SherpaRuntime {
    let runtime = SherpaRuntime::in_memory(test_config()).await.unwrap();

    runtime
        .register_node(
            "cap_checkout",
            NodeKind::Capability,
            "checkout cart inventory payment order email",
        )
        .await
        .unwrap();
    for tool in CHECKOUT_TOOLS {
        runtime
            .register_node(tool, NodeKind::Tool, &tool.replace('_', " "))
            .await
            .unwrap();
        runtime.engine.link_hierarchy("cap_checkout", tool).unwrap();
    }
    for pair in CHECKOUT_TOOLS.windows(2) {
        runtime
            .engine
            .add_hyperedge(HyperedgeSpec::pairwise(
                format!("{}->{}", pair[0], pair[1]),
                pair[0],
                pair[1],
                EdgeType::Sequence,
                EdgeSource::Inferred,
            ))
            .unwrap();
    }
    runtime
}

/// Four embedded capabilities with their tool sequences, no traces: the
/// backward/"suggestion"-mode fixture.
pub async fn four_capability_runtime() -> SherpaRuntime {
    let runtime = SherpaRuntime::in_memory(test_config()).await.unwrap();

    let caps: [(&str, &str, &[&str]); 4] = [
        (
            "checkout",
            "checkout cart inventory payment order email confirm flow",
            &["db_get_cart", "inventory_check", "payment_validate"],
        ),
        (
            "payment_only",
            "payment validate charge card transaction",
            &["payment_validate", "payment_charge"],
        ),
        (
            "user_profile",
            "user profile avatar account settings",
            &["db_get_user", "render_profile"],
        ),
        (
            "order_confirmation",
            "order confirmation email receipt send",
            &["db_save_order", "email_confirm"],
        ),
    ];

    for (cap, description, tools) in caps {
        runtime
            .register_node(cap, NodeKind::Capability, description)
            .await
            .unwrap();
        for tool in tools {
            if runtime.engine.node_kind(tool).is_none() {
                runtime
                    .register_node(tool, NodeKind::Tool, &tool.replace('_', " "))
                    .await
                    .unwrap();
            }
            runtime.engine.link_hierarchy(cap, tool).unwrap();
        }
        for pair in tools.windows(2) {
            runtime
                .engine
                .add_hyperedge(HyperedgeSpec::pairwise(
                    format!("{cap}:{}->{}", pair[0], pair[1]),
                    pair[0],
                    pair[1],
                    EdgeType::Sequence,
                    EdgeSource::Inferred,
                ))
                .unwrap();
        }
    }
    runtime
}

/// A finished-run input with sensible defaults.
pub fn trace_input(
    node_id: &str,
    kind: TraceKind,
    path: &[&str],
    success: bool,
) -> TraceInput {
    let start = Utc::now() - Duration::minutes(1);
    TraceInput {
        parent_trace_id: None,
        kind,
        node_id: node_id.into(),
        started_at: start,
        finished_at: start + Duration::seconds(3),
        success,
        executed_path: path.iter().map(ToString::to_string).collect(),
        intent_text: None,
        intent_embedding: None,
        priority: None,
        user_id: None,
        agent_id: None,
        decisions: vec![],
        task_results: vec![],
    }
}
