//! Multi-agent task coordination with dependency tracking and quality gates.
//!
//! A [`Coordinator`] owns a registry of capability-bearing agents, a
//! priority/dependency-aware task store and a bounded dispatcher. Each task
//! is staffed with one agent per required type, executed as a sequential
//! plan of handler calls, and judged by quality-gate expressions over the
//! collected outputs. Workflow templates expand into chains of dependent
//! tasks.
//!
//! # Main types
//!
//! - [`Coordinator`]: Engine handle: task creation, coordination, dispatch and shutdown.
//! - [`AgentRegistry`]: Agents with per-agent locking and RAII step load.
//! - [`TaskQueue`]: Task store plus a `(priority, id)` ready queue.
//! - [`CapabilityHandler`]: The business logic behind an agent type.
//! - [`CoordinatorConfig`]: Tunables loaded from `quorum.toml`.
//! - [`SystemStatus`]: Agent, task and recent-performance snapshot.

/// Coordinator configuration.
pub mod config;
/// Agent discovery via pluggable probes.
pub mod discovery;
/// Coordination engine and dispatcher.
pub mod engine;
/// Quality-gate parsing and evaluation.
pub mod gate;
/// Capability handler trait and a scripted implementation.
pub mod handler;
/// Result history and system status.
pub mod monitor;
/// Per-task execution plans.
pub mod planner;
/// Static capability catalog per agent type.
pub mod profiles;
/// Agent registry.
pub mod registry;
/// Dependency checks.
pub mod resolver;
/// Default agents and quality gates per task type.
pub mod routing;
/// Agent selection.
pub mod selector;
/// Task store and ready queue.
pub mod task_queue;
/// Shared types (Task, AgentDescriptor, CoordinationResult, etc.).
pub mod types;
/// Workflow templates and expansion.
pub mod workflow;

pub use config::CoordinatorConfig;
pub use discovery::{DiscoveryProbe, StaticProbe};
pub use engine::{Coordinator, NewTask};
pub use gate::{GateReport, GateResult};
pub use handler::{CapabilityHandler, ScriptedHandler, StepOutcome};
pub use monitor::{HealthLabel, HistoryLog, SystemStatus};
pub use planner::{CoordinationPattern, ExecutionPlan, PlanStep};
pub use registry::{AgentMessage, AgentRegistry, LoadGuard};
pub use task_queue::TaskQueue;
pub use types::{
    AgentDescriptor, AgentMetrics, AgentStatus, AgentType, Capability, CoordinationResult, Task,
    TaskPriority, TaskStatus, TaskType, WorkflowStep, WorkflowTemplate,
};
pub use workflow::{WorkflowRun, WorkflowState, WorkflowStatus};
