use crate::board::WorkItem;
use crate::config::ServiceConfig;
use crate::errors::OrchestratorError;
use crate::runs::AgentProfile;

/// Everything submitted to the execution service for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskBrief {
    pub prompt: String,
    pub repository: String,
    pub git_ref: String,
}

impl TaskBrief {
    pub fn build(
        profile: &AgentProfile,
        item: &WorkItem,
        instruction: &str,
        service: &ServiceConfig,
    ) -> Result<Self, OrchestratorError> {
        let repository = profile
            .repository
            .clone()
            .or_else(|| service.default_repository.clone())
            .filter(|r| !r.trim().is_empty())
            .ok_or_else(|| {
                OrchestratorError::NotConfigured(format!(
                    "no target repository for agent kind '{}'; set service.default_repository",
                    profile.kind
                ))
            })?;

        let mut prompt = format!(
            "{}\n\nTicket {}: {}\n",
            profile.prompt_lead, item.display_id, item.title
        );
        if !item.body.trim().is_empty() {
            prompt.push('\n');
            prompt.push_str(item.body.trim());
            prompt.push('\n');
        }
        if !instruction.trim().is_empty() {
            prompt.push_str("\nAdditional instruction:\n");
            prompt.push_str(instruction.trim());
            prompt.push('\n');
        }

        Ok(Self {
            prompt,
            repository,
            git_ref: service.default_ref.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{BoardLayout, ColumnId, ItemId, NewWorkItem};
    use crate::config::{default_agents, LanekeeperConfig};
    use crate::runs::{AgentKind, AgentRegistry};
    use chrono::Utc;

    #[test]
    fn test_brief_requires_repository() {
        let config = LanekeeperConfig::default();
        let layout = BoardLayout::standard().unwrap();
        let registry = AgentRegistry::from_config(&default_agents(), &layout).unwrap();
        let profile = registry.get(AgentKind::Implementation).unwrap();
        let item = NewWorkItem::new("Add export", "CSV export for reports", ColumnId::from("ToDo"))
            .into_item(ItemId::from("0004"), "LK", Utc::now());

        let err = TaskBrief::build(profile, &item, "", &config.service).unwrap_err();
        assert!(matches!(err, OrchestratorError::NotConfigured(_)));

        let mut service = config.service.clone();
        service.default_repository = Some("acme/reports".to_string());
        let brief = TaskBrief::build(profile, &item, "keep it small", &service).unwrap();
        assert_eq!(brief.repository, "acme/reports");
        assert!(brief.prompt.contains("LK-0004: Add export"));
        assert!(brief.prompt.contains("CSV export for reports"));
        assert!(brief.prompt.ends_with("keep it small\n"));
    }
}
