use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{QueueError, Result};

/// Remote control message: `{"command": "...", "args": [...], "campaign": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReceivedCommand {
    pub envelope: CommandEnvelope,
    /// Opaque handle passed back to `ack`.
    pub ack_token: String,
}

/// Parse a message body. Besides the JSON envelope, a bare JSON array of
/// words and a plain whitespace-separated string are accepted.
pub fn parse_command_body(body: &str) -> Result<CommandEnvelope> {
    let trimmed = body.trim();
    if let Ok(envelope) = serde_json::from_str::<CommandEnvelope>(trimmed) {
        return Ok(envelope);
    }
    let words: Vec<String> = match serde_json::from_str::<Vec<String>>(trimmed) {
        Ok(words) => words,
        Err(_) if trimmed.starts_with('{') || trimmed.starts_with('[') => {
            return Err(QueueError::Command(format!("malformed command body: {trimmed}")))
        }
        Err(_) => trimmed.split_whitespace().map(String::from).collect(),
    };
    let mut words = words.into_iter();
    let command = words
        .next()
        .ok_or_else(|| QueueError::Command("empty command body".into()))?;
    Ok(CommandEnvelope {
        command,
        args: words.collect(),
        campaign: None,
    })
}

#[async_trait]
pub trait CommandQueue: Send + Sync {
    /// Receive up to `max` commands. May wait (long poll).
    async fn poll(&self, max: usize) -> Result<Vec<ReceivedCommand>>;

    /// Remove a handled command. Unacked commands are redelivered.
    async fn ack(&self, command: &ReceivedCommand) -> Result<()>;

    async fn send(&self, envelope: &CommandEnvelope) -> Result<()>;
}

/// In-process command queue for tests and single-node runs.
#[derive(Default)]
pub struct MemoryCommandQueue {
    inner: Mutex<MemoryCommands>,
}

#[derive(Default)]
struct MemoryCommands {
    ready: VecDeque<(String, CommandEnvelope)>,
    in_flight: HashMap<String, CommandEnvelope>,
    acked: usize,
}

impl MemoryCommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every unacked command visible again.
    pub fn redeliver(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            let pending: Vec<_> = inner.in_flight.drain().collect();
            inner.ready.extend(pending);
        }
    }

    pub fn acked(&self) -> usize {
        self.inner.lock().map(|i| i.acked).unwrap_or(0)
    }

    pub fn in_flight(&self) -> usize {
        self.inner.lock().map(|i| i.in_flight.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryCommands>> {
        self.inner
            .lock()
            .map_err(|_| QueueError::Command("command queue lock poisoned".into()))
    }
}

#[async_trait]
impl CommandQueue for MemoryCommandQueue {
    async fn poll(&self, max: usize) -> Result<Vec<ReceivedCommand>> {
        let mut inner = self.lock()?;
        let mut out = Vec::new();
        while out.len() < max {
            let Some((token, envelope)) = inner.ready.pop_front() else {
                break;
            };
            inner.in_flight.insert(token.clone(), envelope.clone());
            out.push(ReceivedCommand {
                envelope,
                ack_token: token,
            });
        }
        Ok(out)
    }

    async fn ack(&self, command: &ReceivedCommand) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.in_flight.remove(&command.ack_token).is_some() {
            inner.acked += 1;
        }
        Ok(())
    }

    async fn send(&self, envelope: &CommandEnvelope) -> Result<()> {
        self.lock()?
            .ready
            .push_back((Uuid::new_v4().to_string(), envelope.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_envelope() {
        let env = parse_command_body(
            r#"{"command":"add-exclude","args":["acme"],"campaign":"mpls"}"#,
        )
        .unwrap();
        assert_eq!(env.command, "add-exclude");
        assert_eq!(env.args, vec!["acme"]);
        assert_eq!(env.campaign.as_deref(), Some("mpls"));
    }

    #[test]
    fn parses_word_list_and_plain_text() {
        let env = parse_command_body(r#"["remove-exclude", "acme"]"#).unwrap();
        assert_eq!(env.command, "remove-exclude");
        assert_eq!(env.args, vec!["acme"]);

        let env = parse_command_body("add-exclude acme.com").unwrap();
        assert_eq!(env.command, "add-exclude");
        assert_eq!(env.args, vec!["acme.com"]);
    }

    #[test]
    fn rejects_malformed_and_empty_bodies() {
        assert!(parse_command_body(r#"{"args": 3}"#).is_err());
        assert!(parse_command_body("   ").is_err());
        assert!(parse_command_body("[]").is_err());
    }

    #[tokio::test]
    async fn unacked_commands_are_redelivered() {
        let queue = MemoryCommandQueue::new();
        for cmd in ["a", "b"] {
            queue
                .send(&CommandEnvelope {
                    command: cmd.to_string(),
                    args: vec![],
                    campaign: None,
                })
                .await
                .unwrap();
        }

        let first = queue.poll(10).await.unwrap();
        assert_eq!(first.len(), 2);
        queue.ack(&first[0]).await.unwrap();
        assert!(queue.poll(10).await.unwrap().is_empty());

        queue.redeliver();
        let again = queue.poll(10).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].envelope.command, "b");
        assert_eq!(queue.acked(), 1);
    }
}
