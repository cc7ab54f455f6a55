//! Trigger sources
//!
//! Who or what started a batch. Propagated unchanged into results and
//! notifications.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerKind {
    /// Cron-style schedule
    EventbridgeScheduled,
    /// Direct invocation by an operator
    ManualInvoke,
    /// Chat command relayed by a bot
    ChatBot,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EventbridgeScheduled => "eventbridge-scheduled",
            Self::ManualInvoke => "manual-invoke",
            Self::ChatBot => "chat-bot",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TriggerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eventbridge-scheduled" | "schedule" => Ok(Self::EventbridgeScheduled),
            "manual-invoke" | "manual" => Ok(Self::ManualInvoke),
            "chat-bot" | "chat" => Ok(Self::ChatBot),
            other => Err(format!("unknown trigger kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSource {
    pub kind: TriggerKind,
    /// Schedule rule name, operator ARN, or chat user id
    pub identity: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl TriggerSource {
    pub fn new(kind: TriggerKind, identity: impl Into<String>) -> Self {
        Self {
            kind,
            identity: identity.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Operator invocation from this process
    pub fn manual(identity: impl Into<String>) -> Self {
        Self::new(TriggerKind::ManualInvoke, identity)
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.kind, self.identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_wire_names() {
        let json = serde_json::to_string(&TriggerKind::EventbridgeScheduled).unwrap();
        assert_eq!(json, "\"eventbridge-scheduled\"");
        assert_eq!("chat".parse::<TriggerKind>().unwrap(), TriggerKind::ChatBot);
        assert!("cron".parse::<TriggerKind>().is_err());
    }

    #[test]
    fn test_metadata_roundtrips_unchanged() {
        let trigger = TriggerSource::new(TriggerKind::ChatBot, "U123")
            .with_metadata("channel", "#ops")
            .with_metadata("command", "/lights-out stop");
        let value = serde_json::to_value(&trigger).unwrap();
        assert_eq!(value["kind"], "chat-bot");
        let back: TriggerSource = serde_json::from_value(value).unwrap();
        assert_eq!(back, trigger);
        assert_eq!(trigger.to_string(), "chat-bot (U123)");
    }
}
