use crate::profiles::{default_descriptor, locator};
use crate::registry::AgentRegistry;
use crate::types::AgentType;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

/// Answers whether an implementation for an agent type is present and loadable.
pub trait DiscoveryProbe: Send + Sync {
    fn is_available(&self, agent_type: AgentType, locator: &str) -> bool;
}

impl<F> DiscoveryProbe for F
where
    F: Fn(AgentType, &str) -> bool + Send + Sync,
{
    fn is_available(&self, agent_type: AgentType, locator: &str) -> bool {
        self(agent_type, locator)
    }
}

/// A probe backed by a fixed set of installed agent types.
#[derive(Debug, Clone, Default)]
pub struct StaticProbe {
    installed: HashSet<AgentType>,
}

impl StaticProbe {
    pub fn new(installed: impl IntoIterator<Item = AgentType>) -> Self {
        Self {
            installed: installed.into_iter().collect(),
        }
    }

    /// Every known agent type is installed.
    pub fn all() -> Self {
        Self::new(AgentType::ALL)
    }
}

impl DiscoveryProbe for StaticProbe {
    fn is_available(&self, agent_type: AgentType, _locator: &str) -> bool {
        self.installed.contains(&agent_type)
    }
}

/// Probe every known agent type and register a default descriptor for each
/// one whose implementation is present. Returns the registered ids per type.
pub fn discover(
    registry: &AgentRegistry,
    probe: &dyn DiscoveryProbe,
) -> BTreeMap<AgentType, Vec<String>> {
    let mut found: BTreeMap<AgentType, Vec<String>> = BTreeMap::new();

    for agent_type in AgentType::ALL {
        let module = locator(agent_type);
        if !probe.is_available(agent_type, module) {
            debug!(agent_type = %agent_type, locator = module, "Agent implementation not present");
            continue;
        }

        let descriptor = default_descriptor(agent_type);
        let id = descriptor.id.clone();
        match registry.register(descriptor) {
            Ok(_) => found.entry(agent_type).or_default().push(id),
            Err(e) => warn!(agent_type = %agent_type, error = %e, "Discovered agent rejected"),
        }
    }

    info!(
        types = found.len(),
        agents = found.values().map(Vec::len).sum::<usize>(),
        "Agent discovery complete"
    );
    found
}
