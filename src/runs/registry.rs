use std::collections::BTreeMap;

use super::types::AgentKind;
use crate::board::{BoardLayout, ColumnId};
use crate::config::{AgentKindConfig, ConfigError};

/// Validated per-kind behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentProfile {
    pub kind: AgentKind,
    pub start_column: Option<ColumnId>,
    pub completion_column: ColumnId,
    pub creates_follow_ups: bool,
    pub repository: Option<String>,
    pub prompt_lead: String,
}

/// Agent kind -> profile, resolved against the board once at startup.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    profiles: BTreeMap<AgentKind, AgentProfile>,
}

impl AgentRegistry {
    pub fn from_config(agents: &[AgentKindConfig], layout: &BoardLayout) -> Result<Self, ConfigError> {
        let mut profiles = BTreeMap::new();
        for agent in agents {
            let context = format!("agent kind '{}'", agent.kind);
            let start_column = agent
                .start_column
                .as_deref()
                .map(|c| layout.require(c, &context))
                .transpose()?;
            let profile = AgentProfile {
                kind: agent.kind,
                start_column,
                completion_column: layout.require(&agent.completion_column, &context)?,
                creates_follow_ups: agent.creates_follow_ups,
                repository: agent.repository.clone(),
                prompt_lead: agent.prompt_lead.clone(),
            };
            if profiles.insert(agent.kind, profile).is_some() {
                return Err(ConfigError::DuplicateAgentKind(agent.kind));
            }
        }
        Ok(Self { profiles })
    }

    pub fn get(&self, kind: AgentKind) -> Option<&AgentProfile> {
        self.profiles.get(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = AgentKind> + '_ {
        self.profiles.keys().copied()
    }
}
