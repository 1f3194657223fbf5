use async_trait::async_trait;
use rusoto_core::Region;
use rusoto_sqs::{
    DeleteMessageRequest, ReceiveMessageRequest, SendMessageRequest, Sqs, SqsClient,
};
use tracing::warn;

use crate::commands::{parse_command_body, CommandEnvelope, CommandQueue, ReceivedCommand};
use crate::error::{QueueError, Result};

/// Long-poll wait, the SQS maximum.
const WAIT_TIME_SECONDS: i64 = 20;
/// SQS returns at most ten messages per receive.
const MAX_MESSAGES: usize = 10;

/// Command channel on an SQS-compatible queue. The receipt handle is the
/// ack token.
pub struct SqsCommandQueue {
    client: SqsClient,
    queue_url: String,
}

impl SqsCommandQueue {
    pub fn new(queue_url: &str, region: &str) -> Result<Self> {
        let region = region
            .parse::<Region>()
            .map_err(|e| QueueError::Command(format!("invalid region {region}: {e}")))?;
        Ok(Self {
            client: SqsClient::new(region),
            queue_url: queue_url.to_string(),
        })
    }

    async fn delete(&self, receipt_handle: String) -> Result<()> {
        self.client
            .delete_message(DeleteMessageRequest {
                queue_url: self.queue_url.clone(),
                receipt_handle,
            })
            .await
            .map_err(|e| QueueError::Command(format!("delete message: {e}")))
    }
}

#[async_trait]
impl CommandQueue for SqsCommandQueue {
    async fn poll(&self, max: usize) -> Result<Vec<ReceivedCommand>> {
        let req = ReceiveMessageRequest {
            queue_url: self.queue_url.clone(),
            max_number_of_messages: Some(max.clamp(1, MAX_MESSAGES) as i64),
            wait_time_seconds: Some(WAIT_TIME_SECONDS),
            ..Default::default()
        };
        let result = self
            .client
            .receive_message(req)
            .await
            .map_err(|e| QueueError::Command(format!("receive message: {e}")))?;

        let mut out = Vec::new();
        for message in result.messages.unwrap_or_default() {
            let Some(receipt_handle) = message.receipt_handle else {
                continue;
            };
            let body = message.body.unwrap_or_default();
            match parse_command_body(&body) {
                Ok(envelope) => out.push(ReceivedCommand {
                    envelope,
                    ack_token: receipt_handle,
                }),
                Err(e) => {
                    // Poison message: drop it so it is not redelivered forever.
                    warn!(error = %e, "Discarding malformed command");
                    if let Err(e) = self.delete(receipt_handle).await {
                        warn!(error = %e, "Failed to discard malformed command");
                    }
                }
            }
        }
        Ok(out)
    }

    async fn ack(&self, command: &ReceivedCommand) -> Result<()> {
        self.delete(command.ack_token.clone()).await
    }

    async fn send(&self, envelope: &CommandEnvelope) -> Result<()> {
        let req = SendMessageRequest {
            queue_url: self.queue_url.clone(),
            message_body: serde_json::to_string(envelope)?,
            ..Default::default()
        };
        self.client
            .send_message(req)
            .await
            .map_err(|e| QueueError::Command(format!("send message: {e}")))?;
        Ok(())
    }
}
