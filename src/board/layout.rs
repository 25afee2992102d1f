use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::types::{ColumnId, Trigger};
use crate::config::{BoardConfig, ConfigError};

const ANY_COLUMN: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub id: ColumnId,
    pub label: String,
    /// trigger -> columns an item may be moved from
    pub rules: BTreeMap<Trigger, BTreeSet<ColumnId>>,
}

/// The registered columns and their transition rules. Built once from
/// configuration and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct BoardLayout {
    columns: Vec<Column>,
    index: HashMap<ColumnId, usize>,
}

impl BoardLayout {
    pub fn from_config(config: &BoardConfig) -> Result<Self, ConfigError> {
        let mut index = HashMap::new();
        for (position, column) in config.columns.iter().enumerate() {
            let id = ColumnId::new(column.id.clone());
            if index.insert(id, position).is_some() {
                return Err(ConfigError::DuplicateColumn(column.id.clone()));
            }
        }

        let all: BTreeSet<ColumnId> = index.keys().cloned().collect();
        let mut columns = Vec::with_capacity(config.columns.len());
        for column in &config.columns {
            let mut rules: BTreeMap<Trigger, BTreeSet<ColumnId>> = BTreeMap::new();
            for rule in &column.rules {
                let sources = rules.entry(rule.trigger).or_default();
                for source in &rule.from {
                    if source == ANY_COLUMN {
                        sources.extend(all.iter().cloned());
                        continue;
                    }
                    let source_id = ColumnId::new(source.clone());
                    if !index.contains_key(&source_id) {
                        return Err(ConfigError::UnknownColumn {
                            column: source.clone(),
                            context: format!("rule '{}' of column '{}'", rule.trigger, column.id),
                        });
                    }
                    sources.insert(source_id);
                }
            }
            columns.push(Column {
                id: ColumnId::new(column.id.clone()),
                label: column.label.clone(),
                rules,
            });
        }

        Ok(Self { columns, index })
    }

    pub fn column(&self, id: &ColumnId) -> Option<&Column> {
        self.index.get(id).map(|&i| &self.columns[i])
    }

    pub fn contains(&self, id: &ColumnId) -> bool {
        self.index.contains_key(id)
    }

    /// Columns in pipeline order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Columns from which `trigger` may move an item into `target`.
    pub fn allowed_sources(&self, target: &ColumnId, trigger: Trigger) -> Option<&BTreeSet<ColumnId>> {
        self.column(target).and_then(|c| c.rules.get(&trigger))
    }

    pub fn permits(&self, from: &ColumnId, target: &ColumnId, trigger: Trigger) -> bool {
        self.allowed_sources(target, trigger)
            .map(|sources| sources.contains(from))
            .unwrap_or(false)
    }

    /// Resolve a configured column name, failing with the given context.
    pub fn require(&self, raw: &str, context: &str) -> Result<ColumnId, ConfigError> {
        let id = ColumnId::new(raw);
        if self.contains(&id) {
            Ok(id)
        } else {
            Err(ConfigError::UnknownColumn {
                column: raw.to_string(),
                context: context.to_string(),
            })
        }
    }

    pub fn first_column(&self) -> Option<&ColumnId> {
        self.columns.first().map(|c| &c.id)
    }

    /// Layout of the built-in ToDo -> Doing -> QA -> Review -> Done board.
    pub fn standard() -> Result<Self, ConfigError> {
        Self::from_config(&BoardConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ColumnConfig, TransitionRuleConfig};

    #[test]
    fn test_default_layout_rules() {
        let layout = BoardLayout::standard().unwrap();
        let todo = ColumnId::from("ToDo");
        let doing = ColumnId::from("Doing");
        let qa = ColumnId::from("QA");

        assert!(layout.permits(&todo, &doing, Trigger::AgentStart));
        assert!(layout.permits(&doing, &qa, Trigger::AgentComplete));
        assert!(!layout.permits(&todo, &qa, Trigger::AgentComplete));
        assert!(!layout.permits(&qa, &qa, Trigger::AgentComplete));
        // wildcard manual rule covers every column
        assert!(layout.permits(&qa, &todo, Trigger::Manual));
    }

    #[test]
    fn test_rejects_rule_with_unknown_source() {
        let config = BoardConfig {
            columns: vec![ColumnConfig {
                id: "A".to_string(),
                label: "A".to_string(),
                rules: vec![TransitionRuleConfig {
                    trigger: Trigger::AgentStart,
                    from: vec!["Nowhere".to_string()],
                }],
            }],
        };
        let err = BoardLayout::from_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownColumn { .. }));
    }

    #[test]
    fn test_rejects_duplicate_columns() {
        let dup = ColumnConfig {
            id: "A".to_string(),
            label: "A".to_string(),
            rules: vec![],
        };
        let config = BoardConfig {
            columns: vec![dup.clone(), dup],
        };
        assert!(matches!(
            BoardLayout::from_config(&config),
            Err(ConfigError::DuplicateColumn(_))
        ));
    }
}
