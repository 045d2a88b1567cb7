use crate::config::CoordinatorConfig;
use crate::discovery::{self, DiscoveryProbe};
use crate::gate::{self, AgentOutputs};
use crate::handler::{CapabilityHandler, StepOutcome};
use crate::monitor::{summarize_agents, summarize_recent, HistoryLog, SystemStatus};
use crate::planner::{build_plan, PlanStep};
use crate::registry::{AgentMessage, AgentRegistry};
use crate::resolver::{dependency_state, DependencyState};
use crate::routing::{default_quality_gates, resolve_required_agents};
use crate::selector::assign_agents;
use crate::task_queue::TaskQueue;
use crate::types::{
    AgentDescriptor, AgentType, CoordinationResult, Task, TaskPriority, TaskStatus, TaskType,
    WorkflowTemplate,
};
use crate::workflow::{self, WorkflowRun, WorkflowStatus};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use quorum_core::{Payload, QuorumError, QuorumResult};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Notify, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Names used in `failed_gates` when a coordination ends before or outside
/// gate evaluation.
pub const DEPENDENCY_CHECK: &str = "dependencies_satisfied";
pub const STAFFING_CHECK: &str = "agents_staffed";
pub const EXECUTION_CHECK: &str = "plan_completed";
pub const DISPATCH_CHECK: &str = "task_dispatchable";
pub const CANCELLATION_CHECK: &str = "not_cancelled";

/// Grace period after forced cancellation before the dispatcher is aborted.
const CANCEL_GRACE: Duration = Duration::from_secs(1);

/// Parameters for [`Coordinator::create_task`]. Omitted agents and gates are
/// derived from the task type.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub task_type: TaskType,
    pub title: String,
    pub description: String,
    pub input: Payload,
    pub priority: TaskPriority,
    pub required_agents: Option<Vec<AgentType>>,
    pub dependencies: Vec<Uuid>,
    pub deadline: Option<DateTime<Utc>>,
    pub quality_gates: Option<Vec<String>>,
    pub context: Payload,
}

impl NewTask {
    pub fn new(task_type: TaskType, title: impl Into<String>) -> Self {
        Self {
            task_type,
            title: title.into(),
            description: String::new(),
            input: Payload::new(),
            priority: TaskPriority::default(),
            required_agents: None,
            dependencies: Vec::new(),
            deadline: None,
            quality_gates: None,
            context: Payload::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn input(mut self, input: Payload) -> Self {
        self.input = input;
        self
    }

    pub fn priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn required_agents(mut self, agents: Vec<AgentType>) -> Self {
        self.required_agents = Some(agents);
        self
    }

    pub fn dependencies(mut self, deps: Vec<Uuid>) -> Self {
        self.dependencies = deps;
        self
    }

    pub fn deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn quality_gates(mut self, gates: Vec<String>) -> Self {
        self.quality_gates = Some(gates);
        self
    }

    pub fn context(mut self, context: Payload) -> Self {
        self.context = context;
        self
    }

    fn into_task(self) -> Task {
        let required_agents = self
            .required_agents
            .unwrap_or_else(|| resolve_required_agents(self.task_type, &self.input));
        let mut quality_gates = self
            .quality_gates
            .unwrap_or_else(|| default_quality_gates(self.task_type));
        let mut seen = HashSet::new();
        quality_gates.retain(|g| seen.insert(g.clone()));

        let mut task = Task::new(self.task_type, self.title)
            .with_priority(self.priority)
            .with_input(self.input)
            .with_dependencies(self.dependencies);
        task.description = self.description;
        task.required_agents = required_agents;
        task.quality_gates = quality_gates;
        task.deadline = self.deadline;
        task.context = self.context;
        task
    }
}

struct Inner {
    config: CoordinatorConfig,
    registry: AgentRegistry,
    handler: Arc<dyn CapabilityHandler>,
    tasks: Mutex<TaskQueue>,
    templates: RwLock<HashMap<String, WorkflowTemplate>>,
    workflows: RwLock<HashMap<Uuid, WorkflowRun>>,
    history: Mutex<HistoryLog>,
    /// Cancellation tokens of coordinations currently running.
    running: Mutex<HashMap<Uuid, CancellationToken>>,
    /// Stops the dispatcher from taking new work.
    stop: CancellationToken,
    /// Parent of every coordination's token; cancelled when the drain times out.
    work: CancellationToken,
    active: AtomicUsize,
    idle: Notify,
    shutting_down: AtomicBool,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

/// Counts one in-flight coordination for the shutdown drain.
struct ActiveGuard<'a> {
    inner: &'a Inner,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        if self.inner.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

/// Removes a coordination's token from the running set.
struct RunningGuard<'a> {
    inner: &'a Inner,
    task_id: Uuid,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.inner.running.lock().remove(&self.task_id);
    }
}

/// How a run of plan steps ended.
struct PlanRun {
    shared: Payload,
    outputs: AgentOutputs,
    aborted: Option<QuorumError>,
}

/// The coordination engine: agent registry, task store, dispatcher and history
/// behind one cheaply cloneable handle.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    /// Create a coordinator with the built-in workflow templates registered.
    pub fn new(
        config: CoordinatorConfig,
        handler: Arc<dyn CapabilityHandler>,
    ) -> QuorumResult<Self> {
        config.validate()?;
        let templates = workflow::builtin_templates()
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect();

        Ok(Self {
            inner: Arc::new(Inner {
                registry: AgentRegistry::new(config.load_delta),
                history: Mutex::new(HistoryLog::new(config.history_capacity)),
                config,
                handler,
                tasks: Mutex::new(TaskQueue::new()),
                templates: RwLock::new(templates),
                workflows: RwLock::new(HashMap::new()),
                running: Mutex::new(HashMap::new()),
                stop: CancellationToken::new(),
                work: CancellationToken::new(),
                active: AtomicUsize::new(0),
                idle: Notify::new(),
                shutting_down: AtomicBool::new(false),
                dispatcher: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.inner.registry
    }

    // --- Agents ---

    pub fn register_agent(&self, descriptor: AgentDescriptor) -> QuorumResult<bool> {
        self.inner.registry.register(descriptor)
    }

    pub fn discover_agents(&self, probe: &dyn DiscoveryProbe) -> BTreeMap<AgentType, Vec<String>> {
        discovery::discover(&self.inner.registry, probe)
    }

    // --- Tasks and workflows ---

    /// Validate and enqueue a task. Explicit dependencies must name known tasks.
    pub fn create_task(&self, new_task: NewTask) -> QuorumResult<Uuid> {
        if new_task.title.trim().is_empty() {
            return Err(QuorumError::Configuration("task title is empty".into()));
        }
        let task = new_task.into_task();

        let mut tasks = self.inner.tasks.lock();
        if let Some(missing) = task.dependencies.iter().find(|d| !tasks.contains(**d)) {
            return Err(QuorumError::Configuration(format!(
                "task '{}' depends on unknown task {missing}",
                task.title
            )));
        }
        info!(
            task_id = %task.id,
            task_type = %task.task_type,
            priority = ?task.priority,
            agents = task.required_agents.len(),
            gates = task.quality_gates.len(),
            "Task created"
        );
        Ok(tasks.add(task))
    }

    /// Add or replace a workflow template.
    pub fn register_template(&self, template: WorkflowTemplate) -> QuorumResult<()> {
        if template.id.trim().is_empty() {
            return Err(QuorumError::Configuration("template id is empty".into()));
        }
        if template.steps.is_empty() {
            return Err(QuorumError::Configuration(format!(
                "template '{}' has no steps",
                template.id
            )));
        }
        for criterion in &template.success_criteria {
            gate::parse(criterion).map_err(|e| {
                QuorumError::Configuration(format!("template '{}': {e}", template.id))
            })?;
        }
        info!(template = %template.id, steps = template.steps.len(), "Workflow template registered");
        self.inner
            .templates
            .write()
            .insert(template.id.clone(), template);
        Ok(())
    }

    /// Register every template in a JSON file. Stops at the first invalid one.
    pub fn register_templates_from(&self, path: &Path) -> QuorumResult<usize> {
        let templates = workflow::load_templates(path)?;
        let count = templates.len();
        for template in templates {
            self.register_template(template)?;
        }
        Ok(count)
    }

    /// Templates sorted by id.
    pub fn templates(&self) -> Vec<WorkflowTemplate> {
        let mut templates: Vec<WorkflowTemplate> =
            self.inner.templates.read().values().cloned().collect();
        templates.sort_by(|a, b| a.id.cmp(&b.id));
        templates
    }

    /// Expand a template into a chain of step tasks and enqueue them.
    pub fn execute_workflow(
        &self,
        template_id: &str,
        input: Payload,
        context: Payload,
    ) -> QuorumResult<Uuid> {
        let template = self
            .inner
            .templates
            .read()
            .get(template_id)
            .cloned()
            .ok_or_else(|| {
                QuorumError::Configuration(format!("unknown workflow template '{template_id}'"))
            })?;

        let workflow_id = Uuid::new_v4();
        let steps = workflow::expand(&template, workflow_id, &input, &context);
        let run = WorkflowRun {
            id: workflow_id,
            template_id: template.id.clone(),
            task_ids: steps.iter().map(|t| t.id).collect(),
            success_criteria: template.success_criteria.clone(),
            created_at: Utc::now(),
        };

        {
            let mut tasks = self.inner.tasks.lock();
            for task in steps {
                tasks.add(task);
            }
        }
        info!(
            workflow_id = %workflow_id,
            template = %template.id,
            steps = run.task_ids.len(),
            "Workflow started"
        );
        self.inner.workflows.write().insert(workflow_id, run);
        Ok(workflow_id)
    }

    pub fn workflow(&self, workflow_id: Uuid) -> Option<WorkflowRun> {
        self.inner.workflows.read().get(&workflow_id).cloned()
    }

    /// Progress of a workflow; success criteria are evaluated once every step is terminal.
    pub fn workflow_status(&self, workflow_id: Uuid) -> QuorumResult<WorkflowStatus> {
        let run = self.workflow(workflow_id).ok_or_else(|| {
            QuorumError::Configuration(format!("unknown workflow {workflow_id}"))
        })?;
        let tasks = self.inner.tasks.lock();
        let steps: Vec<&Task> = run.task_ids.iter().filter_map(|id| tasks.get(*id)).collect();
        Ok(workflow::evaluate_run(&run, &steps))
    }

    pub fn task(&self, task_id: Uuid) -> Option<Task> {
        self.inner.tasks.lock().get(task_id).cloned()
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.inner
            .tasks
            .lock()
            .all_tasks()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Cancel a task. A running coordination is interrupted at its current step.
    /// Returns `false` when the task had already finished.
    pub fn cancel_task(&self, task_id: Uuid) -> QuorumResult<bool> {
        let cancelled = {
            let mut tasks = self.inner.tasks.lock();
            if !tasks.contains(task_id) {
                return Err(QuorumError::TaskNotFound(task_id));
            }
            tasks.mark_cancelled(task_id)
        };
        if let Some(token) = self.inner.running.lock().get(&task_id) {
            token.cancel();
        }
        if cancelled {
            info!(task_id = %task_id, "Task cancelled");
        }
        Ok(cancelled)
    }

    /// Most recent recorded result for a task.
    pub fn result_for(&self, task_id: Uuid) -> Option<CoordinationResult> {
        self.inner.history.lock().latest_for(task_id).cloned()
    }

    pub fn system_status(&self) -> SystemStatus {
        let agents = self.inner.registry.all();
        let tasks_by_status = self.inner.tasks.lock().status_counts();
        let history = self.inner.history.lock();
        let (recent, health) = summarize_recent(&history, self.inner.config.status_window);
        SystemStatus {
            agents_by_type: summarize_agents(&agents),
            tasks_by_status,
            recent,
            health,
            history_len: history.len(),
        }
    }

    // --- Coordination ---

    /// Run one task end to end and return its result.
    ///
    /// Only an unknown task id is an error. Unmet dependencies park the task
    /// in WaitingDependency and return an unsuccessful result that is not
    /// recorded in history; every other outcome is recorded.
    pub async fn coordinate(&self, task_id: Uuid) -> QuorumResult<CoordinationResult> {
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        let _active = ActiveGuard { inner: &self.inner };
        let started = Instant::now();

        let (task, dependency_results, token) = match self.claim(task_id)? {
            Claim::Ready(task, deps, token) => (task, deps, token),
            Claim::Waiting(pending) => {
                debug!(task_id = %task_id, waiting_on = pending, "Dependencies not satisfied");
                return Ok(CoordinationResult::failure(
                    task_id,
                    DEPENDENCY_CHECK,
                    format!("waiting on {pending} dependencies"),
                    elapsed_ms(started),
                ));
            }
            Claim::Blocked(reason) => {
                warn!(task_id = %task_id, reason = %reason, "Task blocked by dependency");
                let result = CoordinationResult::failure(
                    task_id,
                    DEPENDENCY_CHECK,
                    reason,
                    elapsed_ms(started),
                );
                self.record(result.clone());
                return Ok(result);
            }
            Claim::NotDispatchable(status) => {
                debug!(task_id = %task_id, status = %status, "Task not dispatchable");
                return Ok(CoordinationResult::failure(
                    task_id,
                    DISPATCH_CHECK,
                    format!("task is {status}"),
                    elapsed_ms(started),
                ));
            }
        };

        let _running = RunningGuard {
            inner: &self.inner,
            task_id,
        };
        if let Some(deadline) = task.deadline {
            spawn_deadline_watch(token.clone(), deadline);
        }
        // Ends the deadline watch once this coordination returns.
        let _token_guard = token.clone().drop_guard();

        let result = match self.execute(&task, &dependency_results, &token, started).await {
            Ok(result) => result,
            Err(e) => {
                error!(task_id = %task_id, error = %e, "Coordination failed");
                let result = CoordinationResult::failure(
                    task_id,
                    EXECUTION_CHECK,
                    e.to_string(),
                    elapsed_ms(started),
                );
                self.inner
                    .tasks
                    .lock()
                    .mark_failed(task_id, e.to_string(), Payload::new());
                result
            }
        };

        self.record(result.clone());
        Ok(result)
    }

    fn record(&self, result: CoordinationResult) {
        self.inner.history.lock().push(result);
    }

    /// Check dependencies and move a dispatchable task to Assigned, under one
    /// lock. A claimed task's token is registered before the lock is released,
    /// so `cancel_task` always reaches it.
    fn claim(&self, task_id: Uuid) -> QuorumResult<Claim> {
        let mut tasks = self.inner.tasks.lock();
        let task = tasks
            .get(task_id)
            .cloned()
            .ok_or(QuorumError::TaskNotFound(task_id))?;

        if !matches!(task.status, TaskStatus::Pending | TaskStatus::WaitingDependency) {
            return Ok(Claim::NotDispatchable(task.status));
        }

        match dependency_state(&task, &tasks) {
            DependencyState::Satisfied => {}
            DependencyState::Waiting(pending) => {
                tasks.mark_waiting(task_id);
                return Ok(Claim::Waiting(pending.len()));
            }
            DependencyState::Blocked { dependency, status } => {
                let reason = format!("dependency {dependency} is {status}");
                tasks.mark_failed(task_id, reason.clone(), Payload::new());
                return Ok(Claim::Blocked(reason));
            }
        }

        let mut dependency_results = Payload::new();
        for dep in &task.dependencies {
            if let Some(done) = tasks.get(*dep) {
                dependency_results.insert(dep.to_string(), Value::Object(done.output.clone()));
            }
        }
        tasks.mark_assigned(task_id, Vec::new());
        let token = self.inner.work.child_token();
        self.inner.running.lock().insert(task_id, token.clone());
        Ok(Claim::Ready(task, dependency_results, token))
    }

    async fn execute(
        &self,
        task: &Task,
        dependency_results: &Payload,
        token: &CancellationToken,
        started: Instant,
    ) -> QuorumResult<CoordinationResult> {
        let config = &self.inner.config;

        let assignment = assign_agents(task, &self.inner.registry, config.load_threshold);
        if !assignment.is_complete() {
            let missing: Vec<String> = if assignment.unstaffed.is_empty() {
                vec!["any".to_string()]
            } else {
                assignment.unstaffed.iter().map(ToString::to_string).collect()
            };
            let err = QuorumError::NoAgentAvailable(missing.join(", "));
            warn!(task_id = %task.id, error = %err, "Task could not be staffed");
            self.inner
                .tasks
                .lock()
                .mark_failed(task.id, err.to_string(), Payload::new());
            return Ok(CoordinationResult::failure(
                task.id,
                STAFFING_CHECK,
                err.to_string(),
                elapsed_ms(started),
            ));
        }

        {
            let mut tasks = self.inner.tasks.lock();
            tasks.mark_assigned(task.id, assignment.agent_ids());
            tasks.mark_in_progress(task.id);
        }

        let plan = build_plan(
            task,
            &assignment.agents,
            dependency_results,
            config.step_timeout(),
            config.pattern,
        );
        info!(task_id = %task.id, steps = plan.steps.len(), "Executing plan");

        let run = self.run_plan(task.id, &plan.steps, token).await?;

        self.inner.tasks.lock().mark_validation(task.id);
        let report = gate::evaluate_all(&task.quality_gates, &run.outputs);
        let mut failed_gates = report.failed_gates();
        let cancelled = matches!(run.aborted, Some(QuorumError::Cancelled(_)));
        if run.aborted.is_some() {
            failed_gates.push(if cancelled {
                CANCELLATION_CHECK.to_string()
            } else {
                EXECUTION_CHECK.to_string()
            });
        }

        let mut error = run.aborted.as_ref().map(ToString::to_string);
        {
            let mut tasks = self.inner.tasks.lock();
            let already_cancelled = tasks
                .get(task.id)
                .is_some_and(|t| t.status == TaskStatus::Cancelled);

            if cancelled || already_cancelled {
                if !failed_gates.iter().any(|g| g == CANCELLATION_CHECK) {
                    failed_gates.push(CANCELLATION_CHECK.to_string());
                }
                error.get_or_insert_with(|| "task cancelled".to_string());
                tasks.mark_cancelled(task.id);
                if let Some(t) = tasks.get_mut(task.id) {
                    t.output = run.shared.clone();
                    t.error = error.clone();
                }
            } else if failed_gates.is_empty() {
                tasks.mark_completed(task.id, run.shared.clone());
            } else {
                let reason = error.get_or_insert_with(|| {
                    QuorumError::QualityGate(failed_gates.join(", ")).to_string()
                });
                tasks.mark_failed(task.id, reason.clone(), run.shared.clone());
            }
        }

        let (recommendations, next_actions) = extract_recommendations(&run.outputs);
        let success = failed_gates.is_empty();
        let result = CoordinationResult {
            task_id: task.id,
            success,
            agent_outputs: run.outputs,
            execution_time_ms: elapsed_ms(started),
            quality_scores: report.scores(),
            recommendations,
            next_actions,
            confidence_score: report.confidence,
            validation_results: report.results,
            failed_gates,
            error,
            completed_at: Utc::now(),
        };

        if success {
            info!(
                task_id = %task.id,
                duration_ms = result.execution_time_ms,
                confidence = result.confidence_score,
                "Task completed"
            );
        } else {
            warn!(
                task_id = %task.id,
                failed_gates = ?result.failed_gates,
                "Task failed"
            );
        }
        Ok(result)
    }

    /// Run steps strictly in order. The first step error stops the plan; the
    /// outputs gathered so far are kept.
    ///
    /// An agent that disappeared from the registry mid-plan is an internal
    /// error and is returned as such.
    async fn run_plan(
        &self,
        task_id: Uuid,
        steps: &[PlanStep],
        token: &CancellationToken,
    ) -> QuorumResult<PlanRun> {
        let mut run = PlanRun {
            shared: Payload::new(),
            outputs: AgentOutputs::new(),
            aborted: None,
        };

        for step in steps {
            match self.run_step(task_id, step, &run.shared, token).await {
                Ok(output) => {
                    run.shared
                        .insert(step.agent_id.clone(), Value::Object(output.clone()));
                    run.outputs.insert(step.agent_id.clone(), output);
                }
                Err(e @ QuorumError::AgentNotFound(_)) => return Err(e),
                Err(e) => {
                    warn!(
                        task_id = %task_id,
                        step = step.index,
                        agent = %step.agent_id,
                        error = %e,
                        "Step failed, skipping remaining steps"
                    );
                    run.aborted = Some(e);
                    break;
                }
            }
        }
        Ok(run)
    }

    /// Invoke one agent under the step timeout and the task's token. The
    /// handler runs in its own task so a panic there fails only this step.
    async fn run_step(
        &self,
        task_id: Uuid,
        step: &PlanStep,
        shared: &Payload,
        token: &CancellationToken,
    ) -> QuorumResult<Payload> {
        let registry = &self.inner.registry;
        let _load = registry.acquire(&step.agent_id)?;

        let handler = Arc::clone(&self.inner.handler);
        let agent_type = step.agent_type;
        let inputs = step.inputs_with_shared(shared);
        let started = Instant::now();
        debug!(task_id = %task_id, step = step.index, agent = %step.agent_id, "Invoking agent");

        let mut call = tokio::spawn(async move { handler.invoke(agent_type, inputs).await });
        let outcome = tokio::select! {
            biased;
            () = token.cancelled() => {
                call.abort();
                Err(QuorumError::Cancelled(format!(
                    "task {task_id} cancelled during step {}",
                    step.index
                )))
            }
            joined = tokio::time::timeout(step.timeout, &mut call) => match joined {
                Ok(Ok(result)) => result,
                Ok(Err(join_err)) => Err(join_failure(&step.agent_id, &join_err)),
                Err(_) => {
                    call.abort();
                    Err(QuorumError::StepTimeout {
                        agent_id: step.agent_id.clone(),
                        secs: step.timeout.as_secs(),
                    })
                }
            },
        };

        let elapsed = started.elapsed().as_secs_f64();
        let (success, output) = match &outcome {
            Ok(output) => {
                let o = StepOutcome::from_payload(output, elapsed);
                if let Err(e) =
                    registry.record_outcome(&step.agent_id, o.confidence, o.processing_time, o.success)
                {
                    warn!(agent = %step.agent_id, error = %e, "Could not record agent metrics");
                }
                (o.success, output.clone())
            }
            Err(_) => {
                if let Err(e) = registry.record_outcome(&step.agent_id, 0.0, elapsed, false) {
                    warn!(agent = %step.agent_id, error = %e, "Could not record agent metrics");
                }
                (false, Payload::new())
            }
        };

        registry.publish(AgentMessage {
            agent_id: step.agent_id.clone(),
            task_id,
            step_index: step.index,
            success,
            output,
            timestamp: Utc::now(),
        });
        outcome
    }

    // --- Dispatcher ---

    /// Spawn the dispatcher loop. Calling it again while it runs is a no-op.
    pub fn start(&self) {
        let mut dispatcher = self.inner.dispatcher.lock();
        if dispatcher.is_some() || self.inner.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        let coordinator = self.clone();
        *dispatcher = Some(tokio::spawn(async move { coordinator.dispatch_loop().await }));
    }

    pub fn is_running(&self) -> bool {
        self.inner.dispatcher.lock().is_some() && !self.inner.stop.is_cancelled()
    }

    async fn dispatch_loop(self) {
        let config = &self.inner.config;
        let semaphore = Arc::new(Semaphore::new(config.max_concurrency));
        let mut workers: JoinSet<(Uuid, QuorumResult<CoordinationResult>)> = JoinSet::new();
        info!(max_concurrency = config.max_concurrency, "Dispatcher started");

        loop {
            while let Some(joined) = workers.try_join_next() {
                self.reap(joined);
            }
            if self.inner.stop.is_cancelled() {
                break;
            }

            self.requeue_unblocked();
            let next = self.inner.tasks.lock().pop_ready();
            let Some(task_id) = next else {
                tokio::select! {
                    () = tokio::time::sleep(config.poll_interval()) => {}
                    () = self.inner.stop.cancelled() => {}
                }
                continue;
            };

            let permit = tokio::select! {
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                () = self.inner.stop.cancelled() => {
                    self.inner.tasks.lock().requeue(task_id);
                    break;
                }
            };

            debug!(task_id = %task_id, in_flight = workers.len() + 1, "Dispatching task");
            let coordinator = self.clone();
            workers.spawn(async move {
                let _permit = permit;
                (task_id, coordinator.coordinate(task_id).await)
            });
        }

        while let Some(joined) = workers.join_next().await {
            self.reap(joined);
        }
        info!("Dispatcher stopped");
    }

    /// Put waiting tasks whose dependencies resolved (or can no longer
    /// resolve) back on the ready queue.
    fn requeue_unblocked(&self) {
        let mut tasks = self.inner.tasks.lock();
        for id in tasks.waiting() {
            let unblocked = tasks
                .get(id)
                .is_some_and(|t| !matches!(dependency_state(t, &tasks), DependencyState::Waiting(_)));
            if unblocked {
                debug!(task_id = %id, "Dependencies resolved, requeueing");
                tasks.requeue(id);
            }
        }
    }

    fn reap(&self, joined: Result<(Uuid, QuorumResult<CoordinationResult>), JoinError>) {
        match joined {
            Ok((task_id, Ok(result))) => {
                debug!(task_id = %task_id, success = result.success, "Coordination reaped");
            }
            Ok((task_id, Err(e))) => {
                warn!(task_id = %task_id, error = %e, "Dispatched task vanished");
            }
            Err(e) if e.is_panic() => {
                error!(error = %e, "Coordination panicked");
            }
            Err(e) => {
                debug!(error = %e, "Coordination aborted");
            }
        }
    }

    /// Stop dispatching and drain in-flight coordinations, including direct
    /// `coordinate()` calls, for up to the configured timeout. Stragglers are
    /// then cancelled; their tasks are logged, not rolled back.
    pub async fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            debug!("Shutdown already initiated");
            return;
        }
        let timeout = self.inner.config.shutdown_timeout();
        info!(
            active = self.inner.active.load(Ordering::SeqCst),
            timeout_secs = timeout.as_secs(),
            "Coordinator shutting down"
        );
        self.inner.stop.cancel();

        if !self.wait_idle(timeout).await {
            let stragglers: Vec<Uuid> = self.inner.running.lock().keys().copied().collect();
            warn!(
                active = self.inner.active.load(Ordering::SeqCst),
                tasks = ?stragglers,
                "Shutdown timeout exceeded, cancelling in-flight coordinations"
            );
            self.inner.work.cancel();
            self.wait_idle(CANCEL_GRACE).await;
        }

        let handle = self.inner.dispatcher.lock().take();
        if let Some(handle) = handle {
            if self.inner.active.load(Ordering::SeqCst) > 0 {
                handle.abort();
            }
            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!(error = %e, "Dispatcher panicked");
                }
            }
        }
        info!("Coordinator shut down");
    }

    /// Wait until no coordination is in flight. Returns `false` on timeout.
    async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.inner.idle.notified();
            if self.inner.active.load(Ordering::SeqCst) == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.inner.active.load(Ordering::SeqCst) == 0;
            }
        }
    }
}

enum Claim {
    Ready(Task, Payload, CancellationToken),
    Waiting(usize),
    Blocked(String),
    NotDispatchable(TaskStatus),
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn join_failure(agent_id: &str, err: &JoinError) -> QuorumError {
    let message = if err.is_panic() {
        "handler panicked".to_string()
    } else {
        format!("handler task ended: {err}")
    };
    QuorumError::AgentExecution {
        agent_id: agent_id.to_string(),
        message,
    }
}

/// Cancel `token` when `deadline` passes, unless it is cancelled first.
fn spawn_deadline_watch(token: CancellationToken, deadline: DateTime<Utc>) {
    let remaining = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    if remaining.is_zero() {
        warn!(deadline = %deadline, "Task deadline already passed");
        token.cancel();
        return;
    }
    tokio::spawn(async move {
        tokio::select! {
            () = tokio::time::sleep(remaining) => {
                warn!(deadline = %deadline, "Task deadline passed, cancelling coordination");
                token.cancel();
            }
            () = token.cancelled() => {}
        }
    });
}

/// Collect `recommendations` and `next_actions`/`action_items` from every
/// agent output. Entries may be strings or objects with a `title`,
/// `action` or `description` field.
pub fn extract_recommendations(outputs: &AgentOutputs) -> (Vec<String>, Vec<String>) {
    let mut recommendations = Vec::new();
    let mut next_actions = Vec::new();
    for output in outputs.values() {
        collect_items(output.get("recommendations"), &mut recommendations);
        collect_items(output.get("next_actions"), &mut next_actions);
        collect_items(output.get("action_items"), &mut next_actions);
    }
    (recommendations, next_actions)
}

fn collect_items(value: Option<&Value>, into: &mut Vec<String>) {
    let items: Vec<&Value> = match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(other) => vec![other],
        None => return,
    };
    for item in items {
        let text = match item {
            Value::String(s) => Some(s.clone()),
            Value::Object(map) => ["title", "action", "description"]
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_str))
                .map(str::to_string),
            _ => None,
        };
        if let Some(text) = text {
            if !text.is_empty() && !into.contains(&text) {
                into.push(text);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::ScriptedHandler;
    use serde_json::json;

    fn payload(v: Value) -> Payload {
        v.as_object().cloned().unwrap()
    }

    fn coordinator(handler: ScriptedHandler) -> Coordinator {
        Coordinator::new(CoordinatorConfig::default(), Arc::new(handler)).unwrap()
    }

    #[test]
    fn test_new_task_derives_defaults() {
        let task = NewTask::new(TaskType::FeaturePrioritization, "Rank Q3 features").into_task();
        assert_eq!(
            task.required_agents,
            vec![AgentType::PrioritizationExpert, AgentType::ProductStrategist]
        );
        assert_eq!(task.quality_gates, default_quality_gates(TaskType::FeaturePrioritization));
        assert_eq!(task.priority, TaskPriority::Medium);
    }

    #[test]
    fn test_new_task_drops_repeated_gates() {
        let task = NewTask::new(TaskType::RiskAssessment, "t")
            .quality_gates(vec![
                "no_blocking_issues".into(),
                "risk_score >= 0.5".into(),
                "no_blocking_issues".into(),
            ])
            .into_task();
        assert_eq!(task.quality_gates, vec!["no_blocking_issues", "risk_score >= 0.5"]);
    }

    #[test]
    fn test_create_task_rejects_unknown_dependency() {
        let c = coordinator(ScriptedHandler::succeed_all());
        let err = c
            .create_task(
                NewTask::new(TaskType::RiskAssessment, "t").dependencies(vec![Uuid::new_v4()]),
            )
            .unwrap_err();
        assert!(matches!(err, QuorumError::Configuration(_)));
        assert!(c.tasks().is_empty());
    }

    #[test]
    fn test_unknown_template() {
        let c = coordinator(ScriptedHandler::succeed_all());
        let err = c
            .execute_workflow("nope", Payload::new(), Payload::new())
            .unwrap_err();
        assert!(matches!(err, QuorumError::Configuration(_)));
    }

    #[test]
    fn test_register_template_validates_criteria() {
        let c = coordinator(ScriptedHandler::succeed_all());
        let mut template = c.templates()[0].clone();
        template.id = "custom".into();
        template.success_criteria = vec!["not a gate".into()];
        assert!(c.register_template(template.clone()).is_err());
        template.success_criteria = vec!["score > 1".into()];
        c.register_template(template).unwrap();
        assert!(c.templates().iter().any(|t| t.id == "custom"));
    }

    #[test]
    fn test_huge_template_time_limit_runs_without_deadline() {
        let c = coordinator(ScriptedHandler::succeed_all());
        let mut template = c
            .templates()
            .into_iter()
            .find(|t| t.id == "api_integration_assessment")
            .unwrap();
        template.id = "long".into();
        template.max_execution_time_secs = Some(u64::MAX / 2);
        c.register_template(template).unwrap();

        let workflow_id = c
            .execute_workflow("long", Payload::new(), Payload::new())
            .unwrap();
        let run = c.workflow(workflow_id).unwrap();
        assert!(!run.task_ids.is_empty());
        for id in run.task_ids {
            assert!(c.task(id).unwrap().deadline.is_none());
        }
    }

    #[tokio::test]
    async fn test_unknown_task_is_error() {
        let c = coordinator(ScriptedHandler::succeed_all());
        let err = c.coordinate(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, QuorumError::TaskNotFound(_)));
    }

    #[tokio::test]
    async fn test_successful_coordination() {
        let handler = ScriptedHandler::new().with_response(
            AgentType::RiskAssessor,
            payload(json!({
                "success": true,
                "confidence": 0.9,
                "risks": [{"level": "LOW"}],
                "recommendations": ["Stage the rollout"],
                "action_items": [{"title": "Write runbook"}]
            })),
        );
        let c = coordinator(handler);
        c.register_agent(AgentDescriptor::new("risk-1", AgentType::RiskAssessor))
            .unwrap();
        let id = c
            .create_task(NewTask::new(TaskType::RiskAssessment, "Assess launch"))
            .unwrap();

        let result = c.coordinate(id).await.unwrap();
        assert!(result.success, "{:?}", result.failed_gates);
        assert!(result.failed_gates.is_empty());
        assert_eq!(result.recommendations, vec!["Stage the rollout"]);
        assert_eq!(result.next_actions, vec!["Write runbook"]);
        assert!((result.confidence_score - 0.81).abs() < 1e-9);

        let task = c.task(id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.assigned_agents, vec!["risk-1"]);
        assert!(task.output.contains_key("risk-1"));
        assert_eq!(c.result_for(id).unwrap().task_id, id);
    }

    #[tokio::test]
    async fn test_failed_gate_is_reported_as_quality_gate_error() {
        let handler = ScriptedHandler::new().with_response(
            AgentType::RiskAssessor,
            payload(json!({"success": true, "score": 1})),
        );
        let c = coordinator(handler);
        c.register_agent(AgentDescriptor::new("risk-1", AgentType::RiskAssessor))
            .unwrap();
        let id = c
            .create_task(
                NewTask::new(TaskType::RiskAssessment, "t")
                    .quality_gates(vec!["score > 5".into(), "no_blocking_issues".into()]),
            )
            .unwrap();

        let result = c.coordinate(id).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.failed_gates, vec!["score > 5"]);
        let expected = QuorumError::QualityGate("score > 5".into()).to_string();
        assert_eq!(result.error.as_deref(), Some(expected.as_str()));
        let task = c.task(id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some(expected.as_str()));
    }

    #[tokio::test]
    async fn test_recoordinating_finished_task_is_not_rerun() {
        let c = coordinator(ScriptedHandler::succeed_all());
        c.register_agent(AgentDescriptor::new("risk-1", AgentType::RiskAssessor))
            .unwrap();
        let id = c
            .create_task(
                NewTask::new(TaskType::RiskAssessment, "t")
                    .quality_gates(vec!["no_blocking_issues".into()]),
            )
            .unwrap();
        assert!(c.coordinate(id).await.unwrap().success);
        let again = c.coordinate(id).await.unwrap();
        assert!(!again.success);
        assert_eq!(again.failed_gates, vec![DISPATCH_CHECK]);
        assert_eq!(c.system_status().history_len, 1);
    }

    #[tokio::test]
    async fn test_cancel_pending_task() {
        let c = coordinator(ScriptedHandler::succeed_all());
        let id = c
            .create_task(NewTask::new(TaskType::MarketAnalysis, "t"))
            .unwrap();
        assert!(c.cancel_task(id).unwrap());
        assert!(!c.cancel_task(id).unwrap());
        assert_eq!(c.task(id).unwrap().status, TaskStatus::Cancelled);
        assert!(c.cancel_task(Uuid::new_v4()).is_err());
    }

    #[test]
    fn test_extract_recommendations_dedupes() {
        let mut outputs = AgentOutputs::new();
        outputs.insert(
            "a".into(),
            payload(json!({"recommendations": ["Ship", "Ship"], "next_actions": "Review"})),
        );
        outputs.insert(
            "b".into(),
            payload(json!({"recommendations": [{"description": "Measure"}, 3]})),
        );
        let (recs, actions) = extract_recommendations(&outputs);
        assert_eq!(recs, vec!["Ship", "Measure"]);
        assert_eq!(actions, vec!["Review"]);
    }
}
