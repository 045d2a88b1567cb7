use crate::types::{AgentDescriptor, AgentStatus, AgentType};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use quorum_core::{Payload, QuorumError, QuorumResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 64;

/// A step output published on an agent's channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub agent_id: String,
    pub task_id: Uuid,
    pub step_index: usize,
    pub success: bool,
    pub output: Payload,
    pub timestamp: DateTime<Utc>,
}

struct AgentState {
    /// `current_load` here is the agent's own reported load; step load is
    /// tracked separately in `in_flight`.
    descriptor: AgentDescriptor,
    in_flight: u32,
}

struct AgentSlot {
    state: Mutex<AgentState>,
    channel: broadcast::Sender<AgentMessage>,
}

impl AgentSlot {
    fn snapshot(&self, load_delta: f64) -> AgentDescriptor {
        let state = self.state.lock();
        let mut descriptor = state.descriptor.clone();
        descriptor.current_load =
            (descriptor.current_load + f64::from(state.in_flight) * load_delta).min(1.0);
        if descriptor.status == AgentStatus::Available
            && state.in_flight >= descriptor.max_concurrent_tasks
        {
            descriptor.status = AgentStatus::Busy;
        }
        descriptor
    }
}

/// Holds one unit of step load on an agent. Dropping it releases the load,
/// so the agent's load returns to its prior value on every exit path.
pub struct LoadGuard {
    slot: Arc<AgentSlot>,
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        let mut state = self.slot.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
    }
}

/// Central registry for all known agents.
///
/// Each agent's mutable state sits behind its own lock, so concurrent
/// coordinations using the same agent serialize their load and metric
/// updates instead of racing.
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Arc<AgentSlot>>>,
    load_delta: f64,
}

impl AgentRegistry {
    pub fn new(load_delta: f64) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            load_delta,
        }
    }

    /// Insert or overwrite an agent. Returns `true` when the id was new.
    ///
    /// Re-registration keeps the agent's output channel and any step load
    /// currently held on it.
    pub fn register(&self, descriptor: AgentDescriptor) -> QuorumResult<bool> {
        if descriptor.id.trim().is_empty() {
            return Err(QuorumError::InvalidAgent("agent id is empty".into()));
        }
        if !(0.0..=1.0).contains(&descriptor.current_load) {
            return Err(QuorumError::InvalidAgent(format!(
                "agent '{}' load {} outside 0.0..=1.0",
                descriptor.id, descriptor.current_load
            )));
        }

        let id = descriptor.id.clone();
        let agent_type = descriptor.agent_type;
        let mut agents = self.agents.write();
        if let Some(slot) = agents.get(&id) {
            slot.state.lock().descriptor = descriptor;
            info!(agent = %id, agent_type = %agent_type, "Re-registered agent");
            return Ok(false);
        }

        let (channel, _) = broadcast::channel(CHANNEL_CAPACITY);
        agents.insert(
            id.clone(),
            Arc::new(AgentSlot {
                state: Mutex::new(AgentState {
                    descriptor,
                    in_flight: 0,
                }),
                channel,
            }),
        );
        info!(agent = %id, agent_type = %agent_type, "Registered agent");
        Ok(true)
    }

    pub fn unregister(&self, id: &str) -> bool {
        self.agents.write().remove(id).is_some()
    }

    fn slot(&self, id: &str) -> QuorumResult<Arc<AgentSlot>> {
        self.agents
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| QuorumError::AgentNotFound(id.to_string()))
    }

    /// Snapshot of one agent, with step load folded into `current_load`.
    pub fn get(&self, id: &str) -> Option<AgentDescriptor> {
        self.slot(id).ok().map(|s| s.snapshot(self.load_delta))
    }

    /// Snapshots of every agent, sorted by id.
    pub fn all(&self) -> Vec<AgentDescriptor> {
        let mut agents: Vec<AgentDescriptor> = self
            .agents
            .read()
            .values()
            .map(|s| s.snapshot(self.load_delta))
            .collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    pub fn by_type(&self) -> BTreeMap<AgentType, Vec<AgentDescriptor>> {
        let mut grouped: BTreeMap<AgentType, Vec<AgentDescriptor>> = BTreeMap::new();
        for agent in self.all() {
            grouped.entry(agent.agent_type).or_default().push(agent);
        }
        grouped
    }

    /// Agents of `agent_type` that are Available with load below `threshold`.
    pub fn eligible(&self, agent_type: AgentType, threshold: f64) -> Vec<AgentDescriptor> {
        self.all()
            .into_iter()
            .filter(|a| {
                a.agent_type == agent_type
                    && a.status == AgentStatus::Available
                    && a.current_load < threshold
            })
            .collect()
    }

    pub fn set_status(&self, id: &str, status: AgentStatus) -> QuorumResult<()> {
        let slot = self.slot(id)?;
        slot.state.lock().descriptor.status = status;
        debug!(agent = %id, status = ?status, "Agent status changed");
        Ok(())
    }

    /// Refresh the heartbeat, optionally with a newly reported load.
    pub fn heartbeat(&self, id: &str, reported_load: Option<f64>) -> QuorumResult<()> {
        let slot = self.slot(id)?;
        let mut state = slot.state.lock();
        state.descriptor.last_heartbeat = Utc::now();
        if let Some(load) = reported_load {
            state.descriptor.current_load = load.clamp(0.0, 1.0);
        }
        Ok(())
    }

    /// Put one step's worth of load on the agent until the guard drops.
    pub fn acquire(&self, id: &str) -> QuorumResult<LoadGuard> {
        let slot = self.slot(id)?;
        slot.state.lock().in_flight += 1;
        Ok(LoadGuard { slot })
    }

    /// Fold a step outcome into the agent's rolling metrics.
    pub fn record_outcome(
        &self,
        id: &str,
        confidence: f64,
        processing_time: f64,
        success: bool,
    ) -> QuorumResult<()> {
        let slot = self.slot(id)?;
        let mut state = slot.state.lock();
        state
            .descriptor
            .metrics
            .record(confidence, processing_time, success);
        if success && state.descriptor.status == AgentStatus::Error {
            state.descriptor.status = AgentStatus::Available;
        }
        Ok(())
    }

    /// Publish a step output to the agent's subscribers. Having none is fine.
    pub fn publish(&self, message: AgentMessage) {
        if let Ok(slot) = self.slot(&message.agent_id) {
            let _ = slot.channel.send(message);
        }
    }

    pub fn subscribe(&self, id: &str) -> QuorumResult<broadcast::Receiver<AgentMessage>> {
        Ok(self.slot(id)?.channel.subscribe())
    }

    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new(0.1)
    }
}
