use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default width of a zero-padded work item id ("0010").
pub const DEFAULT_ID_WIDTH: usize = 4;

/// Sequential, zero-padded work item identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn from_number(number: u64, width: usize) -> Self {
        Self(format!("{number:0width$}"))
    }

    /// Numeric value of the id, if it is purely numeric.
    pub fn number(&self) -> Option<u64> {
        self.0.trim().parse::<u64>().ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnId(String);

impl ColumnId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ColumnId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// What caused a column move. The set is closed; rules are keyed on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Trigger {
    AgentStart,
    AgentComplete,
    Manual,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::AgentStart => "agent-start",
            Trigger::AgentComplete => "agent-complete",
            Trigger::Manual => "manual",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Trigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agent-start" => Ok(Trigger::AgentStart),
            "agent-complete" => Ok(Trigger::AgentComplete),
            "manual" => Ok(Trigger::Manual),
            other => Err(format!("unknown trigger '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: ItemId,
    pub display_id: String,
    pub title: String,
    pub body: String,
    pub column: ColumnId,
    /// Only meaningful relative to other items in the same column.
    pub position: u32,
    pub moved_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Provenance key for generated tickets; unique when present.
    pub origin: Option<String>,
    /// Link into an outside tracker, e.g. `github#123`.
    pub external_ref: Option<String>,
}

/// Fields a caller supplies when creating a work item. The id, display id and
/// position are assigned at insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewWorkItem {
    pub title: String,
    pub body: String,
    pub column: ColumnId,
    pub origin: Option<String>,
    pub external_ref: Option<String>,
}

impl NewWorkItem {
    pub fn new(title: impl Into<String>, body: impl Into<String>, column: ColumnId) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            column,
            origin: None,
            external_ref: None,
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_external_ref(mut self, external_ref: impl Into<String>) -> Self {
        self.external_ref = Some(external_ref.into());
        self
    }

    pub fn into_item(self, id: ItemId, display_prefix: &str, now: DateTime<Utc>) -> WorkItem {
        let display_id = if display_prefix.is_empty() {
            id.to_string()
        } else {
            format!("{display_prefix}-{id}")
        };
        WorkItem {
            id,
            display_id,
            title: self.title,
            body: self.body,
            column: self.column,
            position: 0,
            moved_at: now,
            created_at: now,
            origin: self.origin,
            external_ref: self.external_ref,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_id_padding_and_parsing() {
        let id = ItemId::from_number(10, DEFAULT_ID_WIDTH);
        assert_eq!(id.as_str(), "0010");
        assert_eq!(id.number(), Some(10));
        assert_eq!(ItemId::new("HAL-3").number(), None);
    }

    #[test]
    fn test_trigger_wire_names() {
        assert_eq!(
            serde_json::to_string(&Trigger::AgentComplete).unwrap(),
            "\"agent-complete\""
        );
        assert_eq!("agent-start".parse::<Trigger>().unwrap(), Trigger::AgentStart);
        assert!("teleport".parse::<Trigger>().is_err());
    }

    #[test]
    fn test_display_id_uses_prefix() {
        let item = NewWorkItem::new("t", "b", ColumnId::from("ToDo")).into_item(
            ItemId::from_number(7, 4),
            "LK",
            Utc::now(),
        );
        assert_eq!(item.display_id, "LK-0007");
    }

    #[test]
    fn test_new_item_carries_origin_and_external_ref() {
        let item = NewWorkItem::new("t", "b", ColumnId::from("ToDo"))
            .with_origin("suggestion:0001:add paging")
            .with_external_ref("github#12")
            .into_item(ItemId::from_number(2, 4), "", Utc::now());
        assert_eq!(item.display_id, "0002");
        assert_eq!(item.column, ColumnId::from("ToDo"));
        assert_eq!(item.origin.as_deref(), Some("suggestion:0001:add paging"));
        assert_eq!(item.external_ref.as_deref(), Some("github#12"));
    }
}
