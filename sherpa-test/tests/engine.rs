// End-to-end scenarios over the assembled engine: hyperpath routing,
// incremental updates, provenance promotion, replay priorities, backward
// scoring, and persistence round trips.

use sherpa_core::replay;
use sherpa_core::store::SherpaStore;
use sherpa_core::types::{TraceInput, TraceKind};
use sherpa_graphs::{EdgeSource, EdgeType, GraphUpdate, HyperedgeSpec, NodeKind};
use sherpa_test::{CHECKOUT_TOOLS, checkout_runtime, four_capability_runtime, trace_input};

// ── Basic hyperpath over a sequence chain ──────────────────────────

#[tokio::test]
async fn checkout_chain_routes_in_order() {
    let runtime = checkout_runtime().await;
    let path = runtime
        .engine
        .find_shortest_hyperpath("db_get_cart", "email_confirm", None)
        .unwrap();

    assert!(path.found);
    assert_eq!(path.node_sequence, CHECKOUT_TOOLS);
    assert!((path.total_weight - 5.0 / 0.35).abs() < 1e-9);
}

// ── Weight updates reconverge without changing the route ───────────

#[tokio::test]
async fn weight_update_shifts_total_but_not_route() {
    let runtime = checkout_runtime().await;
    let before = runtime
        .engine
        .find_shortest_hyperpath("db_get_cart", "email_confirm", None)
        .unwrap();

    // Push the validate→charge hop's cost to 1/0.2.
    runtime
        .engine
        .apply_update(GraphUpdate::WeightSet {
            edge: "payment_validate->payment_charge".into(),
            weight: 0.2,
        })
        .unwrap();

    let after = runtime
        .engine
        .find_shortest_hyperpath("db_get_cart", "email_confirm", None)
        .unwrap();
    assert_eq!(after.node_sequence, CHECKOUT_TOOLS);
    let delta = after.total_weight - before.total_weight;
    assert!((delta - (1.0 / 0.2 - 1.0 / 0.35)).abs() < 1e-9);
}

// ── An alternative edge shortens the path ──────────────────────────

#[tokio::test]
async fn alternative_edge_wins() {
    let runtime = checkout_runtime().await;
    runtime
        .engine
        .apply_update(GraphUpdate::AddHyperedge(HyperedgeSpec {
            id: "fast_confirm".into(),
            sources: vec!["db_get_cart".into()],
            targets: vec!["email_confirm".into()],
            edge_type: EdgeType::Alternative,
            edge_source: EdgeSource::Inferred,
            weight: Some(0.5),
            metadata: std::collections::HashMap::new(),
        }))
        .unwrap();

    let path = runtime
        .engine
        .find_shortest_hyperpath("db_get_cart", "email_confirm", None)
        .unwrap();
    assert_eq!(path.node_sequence, vec!["db_get_cart", "email_confirm"]);
    assert!((path.total_weight - 2.0).abs() < 1e-9);
}

// ── Repeated observation promotes edge provenance ──────────────────

#[tokio::test]
async fn three_observations_promote_to_observed() {
    let runtime = checkout_runtime().await;

    runtime
        .engine
        .observe_edge("cap_checkout", "db_get_cart", EdgeType::Contains)
        .unwrap();
    runtime.engine.with_graph(|g| {
        let idx = g.edge_idx("cap_checkout->db_get_cart:contains").unwrap();
        let he = g.edge(idx).unwrap();
        assert_eq!(he.observed_count, 1);
        assert_eq!(he.edge_source, EdgeSource::Inferred);
        assert!((he.weight - 0.56).abs() < 1e-12);
    });

    runtime
        .engine
        .observe_edge("cap_checkout", "db_get_cart", EdgeType::Contains)
        .unwrap();
    runtime
        .engine
        .observe_edge("cap_checkout", "db_get_cart", EdgeType::Contains)
        .unwrap();
    runtime.engine.with_graph(|g| {
        let idx = g.edge_idx("cap_checkout->db_get_cart:contains").unwrap();
        let he = g.edge(idx).unwrap();
        assert_eq!(he.observed_count, 3);
        assert_eq!(he.edge_source, EdgeSource::Observed);
        assert!((he.weight - 0.8).abs() < 1e-12);
    });
}

// ── Cold-start replay priority ─────────────────────────────────────

#[tokio::test]
async fn cold_start_trace_gets_neutral_priority() {
    let runtime = checkout_runtime().await;
    // No intent embedding on the trace — the model cannot predict, so the
    // TD priority is the neutral default.
    let report = runtime
        .learner
        .fold(sherpa_core::learn::RunRecord::leaf(trace_input(
            "cap_checkout",
            TraceKind::CapabilityRun,
            &["payment_validate", "payment_charge"],
            true,
        )))
        .await
        .unwrap();
    assert!((report.priority - 0.5).abs() < f64::EPSILON);
}

// ── Suggestion-mode scoring without context ────────────────────────

#[tokio::test]
async fn payment_intent_outranks_profile_without_context() {
    let runtime = four_capability_runtime().await;
    let scores = runtime
        .predictor
        .score_capabilities("validate and charge a payment card", &[], None)
        .await
        .unwrap();

    let rank = |id: &str| scores.iter().position(|s| s.id == id).unwrap();
    assert_eq!(scores.len(), 4);
    assert!(rank("payment_only") <= 1, "payment_only in the top two: {scores:?}");
    assert!(rank("payment_only") < rank("user_profile"));
}

// ── Replay sampling falls back to uniform on flat pools ────────────

#[tokio::test]
async fn near_uniform_priorities_sample_uniformly() {
    let runtime = checkout_runtime().await;
    for delta in [-0.0001, 0.0, 0.0001, 0.0] {
        let mut input = trace_input(
            "cap_checkout",
            TraceKind::CapabilityRun,
            &["db_get_cart"],
            true,
        );
        input.priority = Some(0.5 + delta);
        runtime.store.save_trace(input).await.unwrap();
    }

    let sampled = replay::sample_by_priority(
        runtime.store.as_ref(),
        &runtime.config.per,
        2,
        0.1,
    )
    .await
    .unwrap();
    assert_eq!(sampled.len(), 2);
    assert_ne!(sampled[0].trace_id, sampled[1].trace_id);
}

// ── Snapshot round trip ────────────────────────────────────────────

#[tokio::test]
async fn graph_snapshot_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("sherpa.db");

    {
        let runtime =
            sherpa_core::runtime::SherpaRuntime::open(sherpa_test::test_config(), &db)
                .await
                .unwrap();
        runtime
            .register_node("cap", NodeKind::Capability, "payments and orders")
            .await
            .unwrap();
        runtime
            .register_node("t1", NodeKind::Tool, "charge card")
            .await
            .unwrap();
        runtime.engine.link_hierarchy("cap", "t1").unwrap();
        let mut spec = HyperedgeSpec::pairwise(
            "cap->t1",
            "cap",
            "t1",
            EdgeType::Contains,
            EdgeSource::Observed,
        );
        spec.metadata
            .insert("success_rate".into(), serde_json::json!(0.9));
        runtime.engine.add_hyperedge(spec).unwrap();
        runtime.persist().await.unwrap();
    }

    let reopened =
        sherpa_core::runtime::SherpaRuntime::open(sherpa_test::test_config(), &db)
            .await
            .unwrap();
    assert_eq!(reopened.engine.node_count(), 2);
    assert_eq!(reopened.engine.edge_count(), 1);
    reopened.engine.with_graph(|g| {
        let idx = g.edge_idx("cap->t1").unwrap();
        let he = g.edge(idx).unwrap();
        assert_eq!(he.edge_source, EdgeSource::Observed);
        assert_eq!(he.metadata["success_rate"], serde_json::json!(0.9));
    });
    assert_eq!(reopened.engine.capability_tools("cap"), vec!["t1"]);
}

// ── Trace round trip ───────────────────────────────────────────────

#[tokio::test]
async fn saved_trace_reads_back() {
    let runtime = checkout_runtime().await;
    let mut input = trace_input(
        "cap_checkout",
        TraceKind::CapabilityRun,
        &["db_get_cart", "inventory_check"],
        true,
    );
    input.intent_text = Some("check out".into());
    input.user_id = Some("u1".into());

    let saved = runtime.store.save_trace(input).await.unwrap();
    let loaded = runtime
        .store
        .get_trace(saved.trace_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.node_id, saved.node_id);
    assert_eq!(loaded.executed_path, saved.executed_path);
    assert_eq!(loaded.intent_text, saved.intent_text);
    assert_eq!(loaded.success, saved.success);
}

// ── Anonymization idempotence ──────────────────────────────────────

#[tokio::test]
async fn anonymization_is_idempotent() {
    let runtime = checkout_runtime().await;
    for _ in 0..3 {
        let mut input = trace_input(
            "cap_checkout",
            TraceKind::CapabilityRun,
            &["db_get_cart"],
            true,
        );
        input.user_id = Some("carol".into());
        input.intent_text = Some("private intent".into());
        runtime.store.save_trace(input).await.unwrap();
    }

    assert_eq!(runtime.store.anonymize_user_traces("carol").await.unwrap(), 3);
    assert_eq!(runtime.store.anonymize_user_traces("carol").await.unwrap(), 0);
}

// ── Learning loop end to end ───────────────────────────────────────

#[tokio::test]
async fn folding_runs_grows_the_graph_and_replay_pool() {
    let runtime = four_capability_runtime().await;

    for success in [true, true, false] {
        let record = sherpa_core::learn::RunRecord {
            input: trace_input(
                "payment_only",
                TraceKind::CapabilityRun,
                &["payment_validate", "payment_charge"],
                success,
            ),
            children: vec![
                sherpa_core::learn::RunRecord::leaf(trace_input(
                    "payment_validate",
                    TraceKind::ToolRun,
                    &[],
                    true,
                )),
                sherpa_core::learn::RunRecord::leaf(trace_input(
                    "payment_charge",
                    TraceKind::ToolRun,
                    &[],
                    success,
                )),
            ],
        };
        runtime.learner.fold(record).await.unwrap();
    }

    // Three folds of the same structure promote the projected edges.
    runtime.engine.with_graph(|g| {
        let idx = g
            .edge_idx("payment_validate->payment_charge:sequence")
            .unwrap();
        let he = g.edge(idx).unwrap();
        assert_eq!(he.observed_count, 3);
        assert_eq!(he.edge_source, EdgeSource::Observed);
    });

    let stats = runtime.store.stats().await.unwrap();
    assert_eq!(stats.total, 9);
    assert_eq!(runtime.learner.drain_pending().len(), 3);
}

// ── Version-tagged derived state (I6) ──────────────────────────────

#[tokio::test]
async fn graph_features_follow_version() {
    let runtime = checkout_runtime().await;
    let before = runtime
        .engine
        .graph_features("payment_charge", &["db_get_cart".to_string()]);

    runtime
        .engine
        .apply_update(GraphUpdate::WeightSet {
            edge: "db_get_cart->inventory_check".into(),
            weight: 0.9,
        })
        .unwrap();

    let after = runtime
        .engine
        .graph_features("payment_charge", &["db_get_cart".to_string()]);
    assert!(after.graph_version > before.graph_version);
}

// ── Prediction end to end ──────────────────────────────────────────

#[tokio::test]
async fn prediction_suggests_tool_from_winning_capability() {
    let runtime = four_capability_runtime().await;
    let suggestion = runtime
        .predictor
        .predict_next_node("validate and charge a payment card", &[], Some(0.0), None)
        .await
        .unwrap()
        .expect("a capability should win at threshold 0");

    let tools = runtime.engine.capability_tools(&suggestion.capability);
    assert!(tools.contains(&suggestion.next_node));
    assert!(suggestion.confidence <= 0.9);
    assert!(suggestion.confidence >= 0.0);
}

#[tokio::test]
async fn duplicate_node_registration_fails_cleanly() {
    let runtime = checkout_runtime().await;
    let err = runtime
        .register_node("db_get_cart", NodeKind::Tool, "get the cart")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Duplicate node"));

    // Nothing changed.
    assert_eq!(runtime.engine.node_count(), 7);
}

#[tokio::test]
async fn trace_input_json_shape_is_stable() {
    // The CLI accepts TraceInput documents; keep the field names stable.
    let json = serde_json::json!({
        "kind": "CapabilityRun",
        "node_id": "cap_checkout",
        "started_at": "2026-07-01T10:00:00Z",
        "finished_at": "2026-07-01T10:00:03Z",
        "success": true,
        "executed_path": ["db_get_cart", "email_confirm"],
    });
    let input: TraceInput = serde_json::from_value(json).unwrap();
    assert_eq!(input.node_id, "cap_checkout");
    assert!(input.priority.is_none());
}
