//! Orchestrator integration tests
//!
//! Exercises DAG scheduling, retries, timeouts, and the error policies
//! with scripted synthetic agents.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use medflow_core::{
    Agent, AgentContext, AgentData, AgentResult, CaseMeta, CaseNotes, CaseStatus, Demographics,
    ErrorKind, HistoryStatus, MedflowResult, ProcessingError, ServiceRegistry, Severity,
    WorkflowState,
};
use medflow_runtime::{
    ErrorPolicy, OrchestratorConfig, RetryPolicy, StageRegistration, WorkflowOrchestrator,
};

/// Scripted agent: optional delay, a number of initial failing attempts,
/// and an execution log shared with the test.
struct ScriptedAgent {
    name: String,
    delay: Duration,
    failures_remaining: AtomicU32,
    failure_severity: Severity,
    executions: Arc<AtomicU32>,
    log: Arc<Mutex<Vec<String>>>,
}

impl ScriptedAgent {
    fn new(name: &str, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.to_string(),
            delay: Duration::from_millis(5),
            failures_remaining: AtomicU32::new(0),
            failure_severity: Severity::Medium,
            executions: Arc::new(AtomicU32::new(0)),
            log,
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn failing_first(self, attempts: u32) -> Self {
        self.failures_remaining.store(attempts, Ordering::SeqCst);
        self
    }

    fn with_failure_severity(mut self, severity: Severity) -> Self {
        self.failure_severity = severity;
        self
    }

    fn executions(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.executions)
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "scripted test agent"
    }

    async fn execute(&self, _ctx: &AgentContext) -> MedflowResult<AgentResult> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(self.name.clone());
        tokio::time::sleep(self.delay).await;

        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Ok(AgentResult::failure(
                ProcessingError::new(&self.name, "injected failure", self.failure_severity)
                    .with_kind(ErrorKind::ExternalApi),
            ));
        }

        Ok(AgentResult::success(AgentData::Empty))
    }
}

fn test_state() -> WorkflowState {
    WorkflowState::new(
        CaseMeta::new(
            "case-1",
            "pat-1",
            "prov-1",
            NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
        ),
        Demographics::default(),
        CaseNotes::new("test note"),
    )
}

fn register(
    orchestrator: &mut WorkflowOrchestrator,
    agent: ScriptedAgent,
    deps: &[&str],
    priority: i32,
) {
    let step = agent.name.clone();
    orchestrator
        .register(
            StageRegistration::new(step, Arc::new(agent))
                .with_deps(deps.iter().copied())
                .with_priority(priority),
        )
        .unwrap();
}

// ============================================================================
// DAG validation
// ============================================================================

#[tokio::test]
async fn test_duplicate_registration_rejected() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut orchestrator = WorkflowOrchestrator::new(ServiceRegistry::new());
    register(&mut orchestrator, ScriptedAgent::new("a", Arc::clone(&log)), &[], 0);

    let err = orchestrator
        .register(StageRegistration::new(
            "a",
            Arc::new(ScriptedAgent::new("a", log)),
        ))
        .unwrap_err();
    assert!(err.to_string().contains("already registered"));
}

#[tokio::test]
async fn test_unknown_dependency_is_fatal() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut orchestrator = WorkflowOrchestrator::new(ServiceRegistry::new());
    register(&mut orchestrator, ScriptedAgent::new("a", log), &["ghost"], 0);

    assert!(orchestrator.run(test_state()).await.is_err());
}

#[tokio::test]
async fn test_cycle_is_fatal() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut orchestrator = WorkflowOrchestrator::new(ServiceRegistry::new());
    register(&mut orchestrator, ScriptedAgent::new("a", Arc::clone(&log)), &["b"], 0);
    register(&mut orchestrator, ScriptedAgent::new("b", log), &["a"], 0);

    let err = orchestrator.run(test_state()).await.unwrap_err();
    assert!(err.to_string().contains("cycle"));
}

// ============================================================================
// Scheduling
// ============================================================================

#[tokio::test]
async fn test_dependencies_are_honored() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut orchestrator = WorkflowOrchestrator::new(ServiceRegistry::new());
    register(&mut orchestrator, ScriptedAgent::new("extract", Arc::clone(&log)), &[], 0);
    register(
        &mut orchestrator,
        ScriptedAgent::new("link", Arc::clone(&log)),
        &["extract"],
        0,
    );
    register(
        &mut orchestrator,
        ScriptedAgent::new("validate", Arc::clone(&log)),
        &["link"],
        0,
    );

    let state = orchestrator.run(test_state()).await.unwrap();

    assert_eq!(state.case_meta.status, CaseStatus::Completed);
    let order = log.lock().unwrap().clone();
    assert_eq!(order, vec!["extract", "link", "validate"]);
}

#[tokio::test]
async fn test_priority_orders_ready_set() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut orchestrator = WorkflowOrchestrator::new(ServiceRegistry::new());
    register(&mut orchestrator, ScriptedAgent::new("low", Arc::clone(&log)), &[], 1);
    register(&mut orchestrator, ScriptedAgent::new("high", Arc::clone(&log)), &[], 10);
    register(&mut orchestrator, ScriptedAgent::new("mid", Arc::clone(&log)), &[], 5);

    let mut config = OrchestratorConfig::default();
    config.max_concurrent_jobs = 1;
    orchestrator.configure(config);

    orchestrator.run(test_state()).await.unwrap();

    let order = log.lock().unwrap().clone();
    assert_eq!(order, vec!["high", "mid", "low"]);
}

#[tokio::test]
async fn test_one_history_entry_per_completed_stage() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut orchestrator = WorkflowOrchestrator::new(ServiceRegistry::new());
    for name in ["a", "b", "c"] {
        register(&mut orchestrator, ScriptedAgent::new(name, Arc::clone(&log)), &[], 0);
    }

    let state = orchestrator.run(test_state()).await.unwrap();

    for name in ["a", "b", "c"] {
        let entries = state.history.iter().filter(|h| h.agent == name).count();
        assert_eq!(entries, 1, "expected one history entry for {}", name);
    }
    assert_eq!(state.completed_steps.len(), 3);
}

#[tokio::test]
async fn test_merge_timestamps_monotone() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut orchestrator = WorkflowOrchestrator::new(ServiceRegistry::new());
    register(&mut orchestrator, ScriptedAgent::new("a", Arc::clone(&log)), &[], 0);
    register(&mut orchestrator, ScriptedAgent::new("b", log), &["a"], 0);

    let initial = test_state();
    let before = initial.updated_at;
    let state = orchestrator.run(initial).await.unwrap();
    assert!(state.updated_at >= before);
}

#[tokio::test]
async fn test_rerun_on_completed_state_is_noop() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut orchestrator = WorkflowOrchestrator::new(ServiceRegistry::new());
    let agent_a = ScriptedAgent::new("a", Arc::clone(&log));
    let executions_a = agent_a.executions();
    register(&mut orchestrator, agent_a, &[], 0);
    register(&mut orchestrator, ScriptedAgent::new("b", log), &["a"], 0);

    let first = orchestrator.run(test_state()).await.unwrap();
    assert_eq!(executions_a.load(Ordering::SeqCst), 1);
    let history_len = first.history.len();

    let second = orchestrator.run(first).await.unwrap();
    assert_eq!(executions_a.load(Ordering::SeqCst), 1);
    assert_eq!(second.history.len(), history_len);
}

// ============================================================================
// Retry
// ============================================================================

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut orchestrator = WorkflowOrchestrator::new(ServiceRegistry::new());
    let agent = ScriptedAgent::new("flaky", Arc::clone(&log)).failing_first(1);
    let executions = agent.executions();
    register(&mut orchestrator, agent, &[], 0);

    let mut config = OrchestratorConfig::default();
    config.retry_policy = RetryPolicy {
        max_retries: 2,
        backoff_ms: 1,
    };
    orchestrator.configure(config);

    let state = orchestrator.run(test_state()).await.unwrap();

    assert_eq!(executions.load(Ordering::SeqCst), 2);
    assert!(state.is_completed("flaky"));
    assert_eq!(state.case_meta.status, CaseStatus::Completed);
}

#[tokio::test]
async fn test_retries_exhausted_fails_stage() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut orchestrator = WorkflowOrchestrator::new(ServiceRegistry::new());
    let agent = ScriptedAgent::new("flaky", Arc::clone(&log)).failing_first(5);
    let executions = agent.executions();
    register(&mut orchestrator, agent, &[], 0);

    let mut config = OrchestratorConfig::default();
    config.retry_policy = RetryPolicy {
        max_retries: 1,
        backoff_ms: 1,
    };
    orchestrator.configure(config);

    let state = orchestrator.run(test_state()).await.unwrap();

    assert_eq!(executions.load(Ordering::SeqCst), 2);
    assert!(!state.is_completed("flaky"));
    assert!(!state.errors.is_empty());
}

#[tokio::test]
async fn test_critical_failure_is_never_retried() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut orchestrator = WorkflowOrchestrator::new(ServiceRegistry::new());
    let agent = ScriptedAgent::new("broken", Arc::clone(&log))
        .failing_first(3)
        .with_failure_severity(Severity::Critical);
    let executions = agent.executions();
    register(&mut orchestrator, agent, &[], 0);

    let mut config = OrchestratorConfig::default();
    config.retry_policy = RetryPolicy {
        max_retries: 3,
        backoff_ms: 1,
    };
    orchestrator.configure(config);

    let state = orchestrator.run(test_state()).await.unwrap();

    assert_eq!(executions.load(Ordering::SeqCst), 1);
    assert_eq!(state.case_meta.status, CaseStatus::Error);
}

#[tokio::test]
async fn test_timeout_counts_as_failure_and_retries() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut orchestrator = WorkflowOrchestrator::new(ServiceRegistry::new());
    let agent = ScriptedAgent::new("slow", Arc::clone(&log)).with_delay(Duration::from_secs(10));
    let executions = agent.executions();
    orchestrator
        .register(
            StageRegistration::new("slow", Arc::new(agent))
                .with_timeout(Duration::from_millis(20)),
        )
        .unwrap();

    let mut config = OrchestratorConfig::default();
    config.retry_policy = RetryPolicy {
        max_retries: 1,
        backoff_ms: 1,
    };
    orchestrator.configure(config);

    let state = orchestrator.run(test_state()).await.unwrap();

    // Original attempt plus one retry, both timing out
    assert_eq!(executions.load(Ordering::SeqCst), 2);
    assert!(!state.is_completed("slow"));
    assert!(state
        .errors
        .iter()
        .any(|e| e.kind == ErrorKind::Timeout));
}

// ============================================================================
// Error policies
// ============================================================================

#[tokio::test]
async fn test_continue_skips_dependents_keeps_independents() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut orchestrator = WorkflowOrchestrator::new(ServiceRegistry::new());
    register(
        &mut orchestrator,
        ScriptedAgent::new("doomed", Arc::clone(&log)).failing_first(10),
        &[],
        0,
    );
    register(
        &mut orchestrator,
        ScriptedAgent::new("dependent", Arc::clone(&log)),
        &["doomed"],
        0,
    );
    register(
        &mut orchestrator,
        ScriptedAgent::new("grandchild", Arc::clone(&log)),
        &["dependent"],
        0,
    );
    let independent = ScriptedAgent::new("independent", Arc::clone(&log));
    let independent_runs = independent.executions();
    register(&mut orchestrator, independent, &[], 0);

    let mut config = OrchestratorConfig::default();
    config.retry_policy = RetryPolicy {
        max_retries: 0,
        backoff_ms: 1,
    };
    orchestrator.configure(config);

    let state = orchestrator.run(test_state()).await.unwrap();

    assert_eq!(independent_runs.load(Ordering::SeqCst), 1);
    assert!(state.is_completed("independent"));
    assert!(!state.is_completed("dependent"));

    let skipped: Vec<&str> = state
        .history
        .iter()
        .filter(|h| h.status == HistoryStatus::Skipped)
        .map(|h| h.agent.as_str())
        .collect();
    assert!(skipped.contains(&"dependent"));
    assert!(skipped.contains(&"grandchild"));
}

#[tokio::test]
async fn test_optional_stage_failure_does_not_block_dependents() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut orchestrator = WorkflowOrchestrator::new(ServiceRegistry::new());
    orchestrator
        .register(
            StageRegistration::new(
                "advisory",
                Arc::new(ScriptedAgent::new("advisory", Arc::clone(&log)).failing_first(10)),
            )
            .optional(),
        )
        .unwrap();
    register(
        &mut orchestrator,
        ScriptedAgent::new("dependent", Arc::clone(&log)),
        &["advisory"],
        0,
    );

    let mut config = OrchestratorConfig::default();
    config.retry_policy = RetryPolicy {
        max_retries: 0,
        backoff_ms: 1,
    };
    orchestrator.configure(config);

    let state = orchestrator.run(test_state()).await.unwrap();
    assert!(state.is_completed("dependent"));
}

#[tokio::test]
async fn test_fail_fast_cancels_in_flight_stages() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut orchestrator = WorkflowOrchestrator::new(ServiceRegistry::new());

    // X fails critically almost immediately; Y and Z are long-running
    // siblings that must be cancelled without merging.
    register(
        &mut orchestrator,
        ScriptedAgent::new("x", Arc::clone(&log))
            .failing_first(1)
            .with_failure_severity(Severity::Critical),
        &[],
        10,
    );
    register(
        &mut orchestrator,
        ScriptedAgent::new("y", Arc::clone(&log)).with_delay(Duration::from_secs(30)),
        &[],
        5,
    );
    register(
        &mut orchestrator,
        ScriptedAgent::new("z", Arc::clone(&log)).with_delay(Duration::from_secs(30)),
        &[],
        5,
    );

    let mut config = OrchestratorConfig::default();
    config.max_concurrent_jobs = 3;
    config.error_policy = ErrorPolicy::FailFast;
    config.retry_policy = RetryPolicy {
        max_retries: 0,
        backoff_ms: 1,
    };
    orchestrator.configure(config);

    let started = std::time::Instant::now();
    let state = orchestrator.run(test_state()).await.unwrap();

    // Cancellation must unwind promptly, well before the 30s sleeps
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(state.case_meta.status, CaseStatus::Error);
    assert!(state.errors.iter().any(|e| e.source == "x"));

    // Cancelled stages leave no history entries
    assert!(!state.history.iter().any(|h| h.agent == "y"));
    assert!(!state.history.iter().any(|h| h.agent == "z"));
}

#[tokio::test]
async fn test_concurrency_ceiling_respected() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut orchestrator = WorkflowOrchestrator::new(ServiceRegistry::new());

    // Four parallel stages with measurable overlap
    for name in ["a", "b", "c", "d"] {
        register(
            &mut orchestrator,
            ScriptedAgent::new(name, Arc::clone(&log)).with_delay(Duration::from_millis(50)),
            &[],
            0,
        );
    }

    let mut config = OrchestratorConfig::default();
    config.max_concurrent_jobs = 2;
    orchestrator.configure(config);

    let started = std::time::Instant::now();
    let state = orchestrator.run(test_state()).await.unwrap();

    // Two batches of two: at least ~100ms total
    assert!(started.elapsed() >= Duration::from_millis(95));
    assert_eq!(state.completed_steps.len(), 4);
}
