//! Simulation scenarios loaded from TOML.
//!
//! ```toml
//! workers = 3
//! processing_delay_ms = 2
//!
//! [[messages]]
//! key = "account-1"
//! id = "deposit-1"
//! payload = { amount = 10 }
//!
//! [generate]
//! keys = 8
//! per_key = 25
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::Message;

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Worker count. None = take it from [`crate::config::Config`].
    #[serde(default)]
    pub workers: Option<usize>,
    /// Idle poll interval. None = take it from [`crate::config::Config`].
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    /// Simulated handler work per message.
    #[serde(default)]
    pub processing_delay_ms: u64,
    /// Give up waiting for the queue to drain after this long.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub messages: Vec<ScenarioMessage>,
    #[serde(default)]
    pub generate: Option<Generate>,
}

/// One explicitly listed message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioMessage {
    pub key: String,
    /// Random UUID when omitted.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

/// Synthetic load: `per_key` messages for each of `keys` keys, interleaved
/// round-robin so every key competes for workers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Generate {
    pub keys: usize,
    pub per_key: usize,
}

impl Scenario {
    /// A purely synthetic scenario.
    pub fn generated(keys: usize, per_key: usize) -> Self {
        Self {
            generate: Some(Generate { keys, per_key }),
            ..Self::default()
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Scenario(format!("bad scenario: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Scenario(format!("bad scenario {}: {e}", path.display())))
    }

    /// All messages in enqueue order: listed ones first, then generated ones.
    pub fn messages(&self) -> Vec<Message> {
        let mut messages: Vec<Message> = self
            .messages
            .iter()
            .map(|entry| {
                let mut message = Message::new(entry.key.clone());
                if let Some(ref id) = entry.id {
                    message = message.id(id.as_str());
                }
                if let Some(ref payload) = entry.payload {
                    message = message.payload(payload.clone());
                }
                message
            })
            .collect();

        if let Some(generate) = self.generate {
            for seq in 0..generate.per_key {
                for k in 0..generate.keys {
                    let key = format!("key-{k}");
                    let id = format!("{key}-{seq}");
                    messages.push(
                        Message::new(key)
                            .id(id)
                            .payload(serde_json::json!({ "seq": seq })),
                    );
                }
            }
        }

        messages
    }

    /// Reject scenarios the queue cannot track correctly.
    pub fn validate(&self) -> Result<()> {
        if self.workers == Some(0) {
            return Err(Error::Scenario("workers must be at least 1".to_string()));
        }

        let mut seen = HashSet::new();
        for message in self.messages() {
            if message.key.is_empty() {
                return Err(Error::Scenario(format!(
                    "message {} has an empty key",
                    message.id
                )));
            }
            if !seen.insert(message.id.clone()) {
                return Err(Error::Scenario(format!(
                    "duplicate message id {}",
                    message.id
                )));
            }
        }
        Ok(())
    }
}
