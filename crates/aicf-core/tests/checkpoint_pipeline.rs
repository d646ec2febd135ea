use std::fs;
use std::path::Path;
use std::sync::Arc;

use aicf_core::agents::{AgentKind, ExtractionAgent, ExtractionResult};
use aicf_core::{
    default_agents, AgentError, AgentResult, Checkpoint, DecayReport, MemoryConfig, MemoryStore,
    Message, Orchestrator, ProcessingReport,
};
use aicf_format::{parse_category, parse_index, Category};
use async_trait::async_trait;

const END_TIME: &str = "2025-03-01T10:00:00Z";

fn jwt_checkpoint() -> Checkpoint {
    let mut cp = Checkpoint::new("sess-jwt", 1)
        .with_times("2025-03-01T09:00:00Z", END_TIME)
        .with_messages(vec![
            Message::user("Let's use JWT for auth"),
            Message::assistant("Agreed, implementing JWT middleware in src/auth/middleware.rs"),
        ]);
    cp.token_count = 42;
    cp
}

fn orchestrator(root: &Path, config: MemoryConfig) -> Orchestrator {
    Orchestrator::new(Arc::new(MemoryStore::open(root, config)))
}

fn read(path: impl AsRef<Path>) -> String {
    fs::read_to_string(path).unwrap()
}

#[tokio::test]
async fn test_jwt_checkpoint_end_to_end() {
    aicf_core::init_tracing(false, tracing::Level::DEBUG);
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path(), MemoryConfig::default());

    let report = orch.process_checkpoint(&jwt_checkpoint()).await;
    let ProcessingReport::Success(success) = &report else {
        panic!("expected success, got {report:?}");
    };
    assert_eq!(success.checkpoint_number, 1);
    assert_eq!(success.agents_executed, 4);
    assert!(success.agents_failed.is_empty());

    // Decision row carries the checkpoint end time.
    let decisions = parse_category(&read(dir.path().join(".aicf/decisions.aicf")));
    let jwt = decisions
        .rows
        .iter()
        .find(|r| r.get(&decisions.schema, "DECISION").unwrap_or_default().contains("JWT"))
        .expect("a decision mentioning JWT");
    assert_eq!(jwt.get(&decisions.schema, "TIMESTAMP"), Some(END_TIME));
    assert_eq!(jwt.get(&decisions.schema, "IMPACT"), Some("HIGH"));
    assert_eq!(jwt.get(&decisions.schema, "CONFIDENCE"), Some("HIGH"));

    // Conversation row links to what it produced.
    let conversations = parse_category(&read(dir.path().join(".aicf/conversations.aicf")));
    let rows = conversations.filter("SESSION", "sess-jwt");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get(&conversations.schema, "TOKENS"), Some("42"));
    assert_eq!(rows[0].get(&conversations.schema, "CONFIDENCE"), Some("HIGH"));
    assert!(conversations
        .all_links()
        .any(|l| l.from.to_string() == "C:1" && l.to.to_string() == "D:1"));

    // Index reflects the checkpoint.
    let index = parse_index(&read(dir.path().join(".aicf/index.aicf")));
    assert_eq!(index.counts.get("conversations"), Some("1"));
    assert_eq!(index.state.get("last_session"), Some("sess-jwt"));
    assert_eq!(index.recent_activity.len(), 1);
    assert_eq!(index.recent_activity[0].kind, "checkpoint");

    // Narrative entry is prepended with the decision.
    let log = read(dir.path().join(".ai/conversation-log.md"));
    assert!(log.contains("## Chat #1 - 2025-03-01 - "));
    assert!(log.contains("### Key Decisions"));
    assert!(log.contains("JWT"));
    assert!(!log.contains("Missing signals"));
}

#[tokio::test]
async fn test_invalid_checkpoint_is_rejected_without_writes() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path(), MemoryConfig::default());

    let cp = Checkpoint::from_json(r#"{"checkpointNumber": 3, "messages": []}"#).unwrap();
    let report = orch.process_checkpoint(&cp).await;
    let ProcessingReport::Failure(failure) = &report else {
        panic!("expected failure, got {report:?}");
    };
    assert_eq!(failure.error_kind, "ValidationError");
    assert_eq!(failure.checkpoint_number, Some(3));

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["success"], false);
    assert!(json["processingTime"].is_u64());
    assert!(!dir.path().join(".aicf").exists());
    assert!(!dir.path().join(".ai").exists());
}

struct BrokenInsights;

#[async_trait]
impl ExtractionAgent for BrokenInsights {
    fn kind(&self) -> AgentKind {
        AgentKind::Insights
    }

    async fn extract(&self, _messages: &[Message]) -> AgentResult<ExtractionResult> {
        Err(AgentError::Failed {
            agent: "insights".to_string(),
            reason: "model unavailable".to_string(),
        })
    }
}

#[tokio::test]
async fn test_one_failing_agent_does_not_stop_the_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::open(dir.path(), MemoryConfig::default()));
    let mut agents = default_agents();
    agents[2] = Arc::new(BrokenInsights);
    let orch = Orchestrator::with_agents(store, agents);

    let report = orch.process_checkpoint(&jwt_checkpoint()).await;
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["success"], true);
    assert_eq!(json["agentsExecuted"], 4);
    assert_eq!(json["agentsFailed"], serde_json::json!(["error_insights"]));

    // The other three agents still produced their rows.
    let decisions = parse_category(&read(dir.path().join(".aicf/decisions.aicf")));
    assert!(!decisions.rows.is_empty());
    let conversations = parse_category(&read(dir.path().join(".aicf/conversations.aicf")));
    assert_eq!(
        conversations.rows[0].get(&conversations.schema, "CONFIDENCE"),
        Some("MEDIUM")
    );

    let log = read(dir.path().join(".ai/conversation-log.md"));
    assert!(log.contains("> Missing signals: error_insights"));
}

#[tokio::test]
async fn test_decay_skipped_under_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path(), MemoryConfig::default());
    let report = orch.process_checkpoint(&jwt_checkpoint()).await;
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["memoryDecayApplied"], false);
}

#[tokio::test]
async fn test_decay_applied_over_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = MemoryConfig::default();
    config.decay.threshold_bytes = 512;
    config.decay.keep_recent = 1;
    let store = Arc::new(MemoryStore::open(dir.path(), config));
    store.ensure_layout().unwrap();

    let conversations = store.category_path(Category::Conversations);
    for i in 1..=30u32 {
        let id = i.to_string();
        let summary = format!("old low value session number {i} with a fairly long summary");
        store
            .writer()
            .append_row(
                &conversations,
                "DATA",
                &[
                    id.as_str(),
                    "2020-01-01T00:00:00Z",
                    "old",
                    id.as_str(),
                    "2",
                    "10",
                    summary.as_str(),
                    "LOW",
                    "0.20",
                ],
            )
            .unwrap();
    }

    let orch = Orchestrator::new(Arc::clone(&store));
    let report = orch.process_checkpoint(&jwt_checkpoint()).await;
    let ProcessingReport::Success(success) = &report else {
        panic!("expected success, got {report:?}");
    };
    assert!(success.memory_decay_applied);

    let record = store.read_category(Category::Conversations).unwrap();
    assert_eq!(record.rows.len(), 1);
    assert_eq!(
        record.rows[0].get(&record.schema, "SESSION"),
        Some("sess-jwt")
    );

    // Only the kept recent row remains, so a second run has nothing to do.
    let monitor = aicf_core::DecayMonitor::new(store.config().decay.clone(), store.writer().clone());
    let direct = monitor.apply(&conversations, chrono::Utc::now()).unwrap();
    assert!(matches!(direct, DecayReport::Skipped { .. }), "{direct:?}");
}

#[tokio::test]
async fn test_decay_compression_ratio_is_positive() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = MemoryConfig::default();
    config.decay.keep_recent = 0;
    let store = MemoryStore::open(dir.path(), config);
    store.ensure_layout().unwrap();

    let decisions = store.category_path(Category::Decisions);
    for i in 1..=5u32 {
        let id = i.to_string();
        store
            .writer()
            .append_row(
                &decisions,
                "DATA",
                &[
                    id.as_str(),
                    "2020-01-01T00:00:00Z",
                    "switch to a much longer decision text that will be cut down by decay",
                    "",
                    "LOW",
                    "LOW",
                    "0.20",
                ],
            )
            .unwrap();
    }

    let monitor = aicf_core::DecayMonitor::new(store.config().decay.clone(), store.writer().clone());
    let report = monitor.apply(&decisions, chrono::Utc::now()).unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["applied"], true);
    assert_eq!(json["itemsProcessed"], 5);
    assert!(json["compressionRatio"].as_f64().unwrap() > 0.0);
    assert_eq!(json["decayStatistics"]["dropped"], 5);
}

#[tokio::test]
async fn test_write_failure_reports_and_keeps_earlier_files() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::open(dir.path(), MemoryConfig::default()));
    store.ensure_layout().unwrap();

    // An index without RECENT_ACTIVITY fails the index update, which runs
    // after the category rows are written.
    let index_path = store.index_path();
    let index = read(&index_path);
    let cut = index.find("@RECENT_ACTIVITY").unwrap();
    fs::write(&index_path, &index[..cut]).unwrap();

    let orch = Orchestrator::new(Arc::clone(&store));
    let report = orch.process_checkpoint(&jwt_checkpoint()).await;
    let ProcessingReport::Failure(failure) = &report else {
        panic!("expected failure, got {report:?}");
    };
    assert_eq!(failure.error_kind, "WriteError");
    assert!(failure.error.contains("RECENT_ACTIVITY"));
    assert_eq!(failure.session_id, "sess-jwt");

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["success"], false);
    assert!(json["processingTime"].is_u64());

    // No cross-file rollback.
    let decisions = store.read_category(Category::Decisions).unwrap();
    assert!(!decisions.rows.is_empty());
    let conversations = store.read_category(Category::Conversations).unwrap();
    assert_eq!(conversations.filter("SESSION", "sess-jwt").len(), 1);
    assert!(!read(dir.path().join(".ai/conversation-log.md")).contains("## Chat #1"));
}

#[tokio::test]
async fn test_conversations_without_schema_fail_before_any_row() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::open(dir.path(), MemoryConfig::default()));
    store.ensure_layout().unwrap();
    fs::write(store.category_path(Category::Conversations), "@DATA\n").unwrap();

    let orch = Orchestrator::new(Arc::clone(&store));
    for _ in 0..2 {
        let report = orch.process_checkpoint(&jwt_checkpoint()).await;
        let ProcessingReport::Failure(failure) = &report else {
            panic!("expected failure, got {report:?}");
        };
        assert_eq!(failure.error_kind, "WriteError");
        assert!(failure.error.contains("@SCHEMA"));
    }

    // Retrying did not pile up rows in the other categories.
    assert!(store.read_category(Category::Decisions).unwrap().rows.is_empty());
    assert!(store.read_category(Category::Tasks).unwrap().rows.is_empty());
}

#[tokio::test]
async fn test_decay_failure_does_not_fail_the_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = MemoryConfig::default();
    config.decay.threshold_bytes = 0;
    config.decay.tracked = vec!["conversations".to_string(), "knowledge".to_string()];
    let store = Arc::new(MemoryStore::open(dir.path(), config));
    store.ensure_layout().unwrap();
    // Knowledge rows only come from the insights agent, which fails here, so
    // the broken file is only ever seen by decay.
    fs::write(store.category_path(Category::Knowledge), "@DATA\n1|2|3\n").unwrap();

    let mut agents = default_agents();
    agents[2] = Arc::new(BrokenInsights);
    let orch = Orchestrator::with_agents(Arc::clone(&store), agents);

    let monitor = aicf_core::DecayMonitor::new(store.config().decay.clone(), store.writer().clone());
    let knowledge = store.category_path(Category::Knowledge);
    assert!(matches!(
        monitor.maybe_apply(&knowledge, chrono::Utc::now()),
        DecayReport::Failed { .. }
    ));

    let report = orch.process_checkpoint(&jwt_checkpoint()).await;
    let ProcessingReport::Success(success) = &report else {
        panic!("expected success, got {report:?}");
    };
    assert!(!success.memory_decay_applied);
    assert!(!success.files_updated.is_empty());
    assert_eq!(read(&knowledge), "@DATA\n1|2|3\n");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_checkpoints_are_serialised() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::open(dir.path(), MemoryConfig::default()));
    let orch = Arc::new(Orchestrator::new(Arc::clone(&store)));

    let tasks: Vec<_> = (1..=4u64)
        .map(|n| {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move {
                let mut cp = jwt_checkpoint();
                cp.checkpoint_number = Some(n);
                orch.process_checkpoint(&cp).await
            })
        })
        .collect();
    for task in tasks {
        assert!(task.await.unwrap().is_success());
    }

    let conversations = store.read_category(Category::Conversations).unwrap();
    let mut ids: Vec<&str> = conversations
        .rows
        .iter()
        .filter_map(|r| r.get(&conversations.schema, "ID"))
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["1", "2", "3", "4"]);
    let index = store.read_index().unwrap();
    assert_eq!(index.counts.get("conversations"), Some("4"));
    assert_eq!(index.recent_activity.len(), 4);
}
