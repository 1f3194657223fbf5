use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use prospector_common::QueueName;

use crate::error::{QueueError, Result};

/// Time-bounded claim on a task, stored next to it as `lease.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub token: String,
    pub worker_id: String,
    pub created_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(worker_id: &str, duration: Duration) -> Self {
        let now = Utc::now();
        Self {
            token: Uuid::new_v4().to_string(),
            worker_id: worker_id.to_string(),
            created_at: now,
            heartbeat_at: now,
            expires_at: now + to_chrono(duration),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Same lease, extended from now.
    pub fn renewed(&self, duration: Duration) -> Self {
        let now = Utc::now();
        Self {
            heartbeat_at: now,
            expires_at: now + to_chrono(duration),
            ..self.clone()
        }
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

/// Lease duration, heartbeat cadence and per-queue execute timeouts.
#[derive(Debug, Clone)]
pub struct LeaseTimings {
    pub lease_duration: Duration,
    pub heartbeat_interval: Duration,
    pub list_timeout: Duration,
    pub details_timeout: Duration,
    pub enrichment_timeout: Duration,
}

impl Default for LeaseTimings {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(15 * 60),
            heartbeat_interval: Duration::from_secs(60),
            list_timeout: Duration::from_secs(900),
            details_timeout: Duration::from_secs(300),
            enrichment_timeout: Duration::from_secs(300),
        }
    }
}

impl LeaseTimings {
    pub fn execute_timeout(&self, queue: QueueName) -> Duration {
        match queue {
            QueueName::GmList => self.list_timeout,
            QueueName::GmDetails => self.details_timeout,
            QueueName::Enrichment => self.enrichment_timeout,
        }
    }

    /// The heartbeat must fire several times within both the lease and every
    /// execute timeout, or a slow but healthy task loses its lease.
    pub fn validate(&self) -> Result<()> {
        let limit = self.heartbeat_interval * 3;
        if self.heartbeat_interval.is_zero() {
            return Err(QueueError::Timings("heartbeat interval must be positive".into()));
        }
        if limit > self.lease_duration {
            return Err(QueueError::Timings(format!(
                "heartbeat interval {:?} is too long for lease duration {:?}",
                self.heartbeat_interval, self.lease_duration
            )));
        }
        for queue in QueueName::ALL {
            let timeout = self.execute_timeout(queue);
            if limit > timeout {
                return Err(QueueError::Timings(format!(
                    "heartbeat interval {:?} is too long for {queue} timeout {timeout:?}",
                    self.heartbeat_interval
                )));
            }
        }
        Ok(())
    }
}
