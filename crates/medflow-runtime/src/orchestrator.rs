//! Workflow orchestrator
//!
//! Drives the stage DAG for one case: dependency-aware ready-set
//! scheduling under a concurrency ceiling, per-stage deadlines, retries
//! for non-critical failures, and the continue/fail-fast error policies.
//! All state mutation happens here through the merge protocol, one merge
//! at a time in completion order.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use medflow_core::{
    cancel_pair, run_agent, Agent, AgentContext, AgentResult, CancelSignal, CaseStatus,
    MedflowError, MedflowResult, ProcessingError, ServiceRegistry, Severity, WorkflowLogger,
    WorkflowState,
};

use crate::config::{
    default_retry_condition, ErrorPolicy, OrchestratorConfig, RetryCondition, RetryPolicy,
};

/// Events emitted during a workflow run
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    Started {
        case_id: String,
    },
    StageStarted {
        stage: String,
    },
    StageCompleted {
        stage: String,
        duration_ms: u64,
    },
    StageFailed {
        stage: String,
        error: String,
    },
    StageSkipped {
        stage: String,
        reason: String,
    },
    Completed {
        case_id: String,
        status: CaseStatus,
    },
}

/// One registered stage
pub struct StageRegistration {
    pub step: String,
    pub agent: Arc<dyn Agent>,
    pub deps: Vec<String>,
    pub priority: i32,
    pub timeout: Option<Duration>,
    pub optional: bool,
}

impl StageRegistration {
    pub fn new(step: impl Into<String>, agent: Arc<dyn Agent>) -> Self {
        Self {
            step: step.into(),
            agent,
            deps: Vec::new(),
            priority: 0,
            timeout: None,
            optional: false,
        }
    }

    pub fn with_deps<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deps = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Mark the stage optional: its failure does not make dependents
    /// unreachable under the continue policy.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// The per-case workflow driver
pub struct WorkflowOrchestrator {
    services: ServiceRegistry,
    config: OrchestratorConfig,
    retry_condition: RetryCondition,
    stages: Vec<StageRegistration>,
    event_tx: Option<mpsc::Sender<WorkflowEvent>>,
    logger: Option<WorkflowLogger>,
}

impl WorkflowOrchestrator {
    pub fn new(services: ServiceRegistry) -> Self {
        Self {
            services,
            config: OrchestratorConfig::default(),
            retry_condition: default_retry_condition(),
            stages: Vec::new(),
            event_tx: None,
            logger: None,
        }
    }

    /// Register a stage. Step names must be unique.
    pub fn register(&mut self, registration: StageRegistration) -> MedflowResult<()> {
        if self.stages.iter().any(|s| s.step == registration.step) {
            return Err(MedflowError::config(format!(
                "stage '{}' is already registered",
                registration.step
            )));
        }
        self.stages.push(registration);
        Ok(())
    }

    /// Apply orchestrator configuration
    pub fn configure(&mut self, config: OrchestratorConfig) {
        self.config = config;
    }

    /// Override the retry-eligibility predicate
    pub fn with_retry_condition(mut self, condition: RetryCondition) -> Self {
        self.retry_condition = condition;
        self
    }

    /// Stream workflow events over a channel
    pub fn with_event_channel(mut self, tx: mpsc::Sender<WorkflowEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Use an externally constructed per-case logger
    pub fn with_logger(mut self, logger: WorkflowLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn registered_steps(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.step.as_str()).collect()
    }

    async fn emit(&self, event: WorkflowEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }

    /// Validate the DAG: every dependency must be registered and the
    /// graph must be acyclic.
    fn validate_dag(&self) -> MedflowResult<()> {
        let names: HashSet<&str> = self.stages.iter().map(|s| s.step.as_str()).collect();
        for stage in &self.stages {
            for dep in &stage.deps {
                if !names.contains(dep.as_str()) {
                    return Err(MedflowError::config(format!(
                        "stage '{}' depends on unregistered stage '{}'",
                        stage.step, dep
                    )));
                }
            }
        }

        // Kahn's algorithm for cycle detection
        let mut in_degree: HashMap<&str, usize> = self
            .stages
            .iter()
            .map(|s| (s.step.as_str(), s.deps.len()))
            .collect();
        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(name, _)| *name)
            .collect();
        let mut visited = 0usize;

        while let Some(name) = queue.pop_front() {
            visited += 1;
            for stage in self.stages.iter().filter(|s| s.deps.iter().any(|d| d == name)) {
                let degree = in_degree.get_mut(stage.step.as_str()).expect("registered");
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(stage.step.as_str());
                }
            }
        }

        if visited != self.stages.len() {
            return Err(MedflowError::config("stage dependencies contain a cycle"));
        }
        Ok(())
    }

    /// Drive the DAG to completion and return the final state.
    ///
    /// Fatal errors (configuration, cyclic DAG) surface as `Err`; stage
    /// failures are folded into the returned state per the error policy.
    pub async fn run(&self, mut state: WorkflowState) -> MedflowResult<WorkflowState> {
        self.validate_dag()?;

        let case_id = state.case_meta.case_id.clone();
        let run_id = Uuid::new_v4().to_string();
        let logger = self
            .logger
            .clone()
            .unwrap_or_else(|| WorkflowLogger::new(&case_id));

        state.case_meta.status = CaseStatus::Processing;
        info!(
            case_id = %case_id,
            run_id = %run_id,
            stages = self.stages.len(),
            "workflow run started"
        );
        self.emit(WorkflowEvent::Started {
            case_id: case_id.clone(),
        })
        .await;

        let (cancel_handle, cancel_signal) = cancel_pair();
        let optional: HashMap<&str, bool> = self
            .stages
            .iter()
            .map(|s| (s.step.as_str(), s.optional))
            .collect();

        // Steps already completed in a prior run are not re-ready.
        let mut completed: HashSet<String> = self
            .stages
            .iter()
            .filter(|s| state.is_completed(&s.step))
            .map(|s| s.step.clone())
            .collect();
        let mut launched: HashSet<String> = completed.clone();
        let mut failed: HashSet<String> = HashSet::new();
        let mut skipped: HashSet<String> = HashSet::new();
        let mut aborted = false;

        let mut in_flight: JoinSet<(String, Option<AgentResult>)> = JoinSet::new();

        loop {
            if !aborted {
                let ready = self.ready_stages(&launched, &completed, &failed, &skipped, &optional);
                for index in ready {
                    if in_flight.len() >= self.config.max_concurrent_jobs {
                        break;
                    }
                    let registration = &self.stages[index];
                    launched.insert(registration.step.clone());
                    logger.stage_started(&registration.step);
                    self.emit(WorkflowEvent::StageStarted {
                        stage: registration.step.clone(),
                    })
                    .await;
                    self.launch(
                        registration,
                        &state,
                        &logger,
                        cancel_signal.clone(),
                        &mut in_flight,
                    );
                }
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };

            match joined {
                Ok((step, Some(result))) if result.success => {
                    let duration_ms = result.metadata.execution_time_ms;
                    logger.stage_completed(&step, duration_ms);
                    logger.state_transition(
                        &step,
                        "merge",
                        &format!("{} evidence records", result.evidence.len()),
                    );
                    state.current_step = Some(step.clone());
                    state.merge_result(&step, result);
                    completed.insert(step.clone());
                    self.emit(WorkflowEvent::StageCompleted {
                        stage: step,
                        duration_ms,
                    })
                    .await;
                }
                Ok((step, Some(result))) => {
                    let summary = result
                        .errors
                        .iter()
                        .map(|e| e.message.as_str())
                        .collect::<Vec<_>>()
                        .join("; ");
                    logger.stage_failed(&step, &summary);
                    state.record_failure(&step, &result);
                    failed.insert(step.clone());
                    self.emit(WorkflowEvent::StageFailed {
                        stage: step.clone(),
                        error: summary,
                    })
                    .await;

                    match self.config.error_policy {
                        ErrorPolicy::FailFast => {
                            warn!(stage = %step, "fail-fast: cancelling in-flight stages");
                            aborted = true;
                            cancel_handle.cancel();
                        }
                        ErrorPolicy::Continue => {
                            if !optional.get(step.as_str()).copied().unwrap_or(false) {
                                self.skip_dependents(&step, &launched, &mut skipped, &mut state)
                                    .await;
                            }
                        }
                    }
                }
                Ok((step, None)) => {
                    // Cancelled before completing: partial work is
                    // discarded, no merge and no history entry.
                    debug!(stage = %step, "stage cancelled, result discarded");
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        error!(error = %join_error, "stage task panicked");
                        state.errors.push(ProcessingError::new(
                            "orchestrator",
                            format!("stage task panicked: {}", join_error),
                            Severity::Critical,
                        ));
                        if self.config.error_policy == ErrorPolicy::FailFast {
                            aborted = true;
                            cancel_handle.cancel();
                        }
                    }
                }
            }
        }

        // Stages that never became ready (dead dependencies) are skipped
        // explicitly so the run accounts for every registered step.
        if !aborted {
            for stage in &self.stages {
                if !launched.contains(&stage.step) && !skipped.contains(&stage.step) {
                    state.record_skipped(&stage.step, "dependencies did not complete");
                    self.emit(WorkflowEvent::StageSkipped {
                        stage: stage.step.clone(),
                        reason: "dependencies did not complete".to_string(),
                    })
                    .await;
                }
            }
        }

        let critical = state
            .max_error_severity()
            .map(|s| s >= Severity::Critical)
            .unwrap_or(false);
        state.case_meta.status = if critical || (aborted && self.config.error_policy == ErrorPolicy::FailFast)
        {
            CaseStatus::Error
        } else {
            CaseStatus::Completed
        };

        info!(
            case_id = %case_id,
            run_id = %run_id,
            status = ?state.case_meta.status,
            completed = completed.len(),
            failed = failed.len(),
            "workflow run finished"
        );
        self.emit(WorkflowEvent::Completed {
            case_id,
            status: state.case_meta.status,
        })
        .await;

        Ok(state)
    }

    /// Indices of stages ready to launch, in descending priority with
    /// ties broken by registration order. A dependency is satisfied when
    /// it completed, or when it failed or was skipped but is optional.
    fn ready_stages(
        &self,
        launched: &HashSet<String>,
        completed: &HashSet<String>,
        failed: &HashSet<String>,
        skipped: &HashSet<String>,
        optional: &HashMap<&str, bool>,
    ) -> Vec<usize> {
        let mut ready: Vec<usize> = self
            .stages
            .iter()
            .enumerate()
            .filter(|(_, stage)| !launched.contains(&stage.step) && !skipped.contains(&stage.step))
            .filter(|(_, stage)| {
                stage.deps.iter().all(|dep| {
                    completed.contains(dep)
                        || ((failed.contains(dep) || skipped.contains(dep))
                            && optional.get(dep.as_str()).copied().unwrap_or(false))
                })
            })
            .map(|(index, _)| index)
            .collect();
        ready.sort_by(|a, b| {
            self.stages[*b]
                .priority
                .cmp(&self.stages[*a].priority)
                .then(a.cmp(b))
        });
        ready
    }

    /// Spawn one stage as an isolated task with its own deadline and
    /// retry loop. Each attempt gets a fresh context and a fresh
    /// deadline; the result (or `None` on cancellation) flows back
    /// through the join set.
    fn launch(
        &self,
        registration: &StageRegistration,
        state: &WorkflowState,
        logger: &WorkflowLogger,
        cancel: CancelSignal,
        in_flight: &mut JoinSet<(String, Option<AgentResult>)>,
    ) {
        let step = registration.step.clone();
        let agent = Arc::clone(&registration.agent);
        let services = self.services.clone();
        let logger = logger.clone();
        let timeout = registration
            .timeout
            .unwrap_or(Duration::from_millis(self.config.default_timeout_ms));
        let retry: RetryPolicy = self.config.retry_policy.clone();
        let retry_condition = Arc::clone(&self.retry_condition);

        // Parallel siblings observe the state snapshot taken at their
        // dispatch instant.
        let snapshot = Arc::new(state.clone());

        in_flight.spawn(async move {
            let mut attempt: u32 = 0;
            loop {
                let ctx = AgentContext::new(
                    Arc::clone(&snapshot),
                    services.clone(),
                    logger.clone(),
                    cancel.clone(),
                );

                let outcome = tokio::select! {
                    attempt_result = tokio::time::timeout(timeout, run_agent(agent.as_ref(), &ctx)) => {
                        match attempt_result {
                            Ok(result) => result,
                            Err(_) => AgentResult::timed_out(&step, timeout.as_millis() as u64),
                        }
                    }
                    _ = cancel.cancelled() => return (step, None),
                };

                if outcome.success {
                    return (step, Some(outcome));
                }

                // Criticals never retry; otherwise the predicate decides
                // on the highest-severity error of the attempt.
                let primary = outcome.errors.iter().max_by_key(|e| e.severity);
                let retryable = outcome.max_severity() < Severity::Critical
                    && attempt < retry.max_retries
                    && primary.map(|e| retry_condition(e)).unwrap_or(false);
                if !retryable {
                    return (step, Some(outcome));
                }

                attempt += 1;
                // Small jitter keeps sibling retries from landing on the
                // backend in lockstep.
                let jitter = rand::thread_rng().gen_range(0..=retry.backoff_ms / 4);
                debug!(stage = %step, attempt, "retrying after backoff");
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(retry.backoff_ms + jitter)) => {}
                    _ = cancel.cancelled() => return (step, None),
                }
            }
        });
    }

    /// Transitively skip every stage reachable through non-optional dead
    /// dependencies. An optional dead dependency does not block its
    /// dependents.
    async fn skip_dependents(
        &self,
        root: &str,
        launched: &HashSet<String>,
        skipped: &mut HashSet<String>,
        state: &mut WorkflowState,
    ) {
        let is_optional = |step: &str| {
            self.stages
                .iter()
                .find(|s| s.step == step)
                .map(|s| s.optional)
                .unwrap_or(false)
        };

        // Only non-optional dead steps propagate.
        let mut queue: VecDeque<String> = VecDeque::from([root.to_string()]);
        while let Some(current) = queue.pop_front() {
            for stage in &self.stages {
                if launched.contains(&stage.step) || skipped.contains(&stage.step) {
                    continue;
                }
                if stage.deps.iter().any(|dep| *dep == current) {
                    let reason = format!("dependency '{}' did not complete", current);
                    warn!(stage = %stage.step, %reason, "skipping stage");
                    skipped.insert(stage.step.clone());
                    state.record_skipped(&stage.step, &reason);
                    self.emit(WorkflowEvent::StageSkipped {
                        stage: stage.step.clone(),
                        reason,
                    })
                    .await;
                    if !is_optional(&stage.step) {
                        queue.push_back(stage.step.clone());
                    }
                }
            }
        }
    }
}
