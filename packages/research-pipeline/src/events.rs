//! In-process event bus for job progress.
//!
//! Each job has a broadcast channel for live subscribers plus a bounded
//! backlog so late subscribers and pollers can catch up. Sequence numbers
//! are assigned under the job's channel lock, so the backlog and the live
//! stream never overlap or leave a gap.
//!
//! Channels are opened when a job is created and removed when the registry
//! evicts the job. Events for a job without a channel are dropped.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex, RwLock};

use crate::types::event::{EventKind, JobEvent};
use crate::types::job::JobId;

const DEFAULT_CAPACITY: usize = 256;
const DEFAULT_BACKLOG: usize = 512;

struct JobChannel {
    next_seq: u64,
    backlog: VecDeque<JobEvent>,
    tx: broadcast::Sender<JobEvent>,
}

/// Job-keyed pub/sub with replay.
#[derive(Clone)]
pub struct EventBus {
    channels: Arc<RwLock<HashMap<JobId, Arc<Mutex<JobChannel>>>>>,
    capacity: usize,
    backlog: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_CAPACITY, DEFAULT_BACKLOG)
    }

    /// `capacity` bounds each live channel, `backlog` the replay buffer.
    pub fn with_limits(capacity: usize, backlog: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
            backlog: backlog.max(1),
        }
    }

    /// Open the channel for a new job. No-op if it already exists.
    pub async fn open(&self, job_id: JobId) {
        let mut channels = self.channels.write().await;
        channels.entry(job_id).or_insert_with(|| {
            Arc::new(Mutex::new(JobChannel {
                next_seq: 1,
                backlog: VecDeque::new(),
                tx: broadcast::channel(self.capacity).0,
            }))
        });
    }

    /// Drop a job's channel and backlog. Live receivers see the stream close.
    pub async fn remove(&self, job_id: JobId) -> bool {
        self.channels.write().await.remove(&job_id).is_some()
    }

    async fn channel(&self, job_id: JobId) -> Option<Arc<Mutex<JobChannel>>> {
        self.channels.read().await.get(&job_id).cloned()
    }

    /// Stamp and publish an event.
    ///
    /// Returns the stamped event, or `None` if the job has no open channel.
    pub async fn publish(&self, job_id: JobId, kind: EventKind) -> Option<JobEvent> {
        let channel = self.channel(job_id).await?;
        let mut channel = channel.lock().await;
        let event = JobEvent {
            seq: channel.next_seq,
            ts: Utc::now(),
            kind,
        };
        channel.next_seq += 1;
        if channel.backlog.len() == self.backlog {
            channel.backlog.pop_front();
        }
        channel.backlog.push_back(event.clone());
        // No receivers is fine
        let _ = channel.tx.send(event.clone());
        Some(event)
    }

    /// Backlog snapshot plus a receiver for everything after it.
    ///
    /// An unknown job yields an empty backlog and an already closed receiver.
    pub async fn subscribe(&self, job_id: JobId) -> (Vec<JobEvent>, broadcast::Receiver<JobEvent>) {
        let Some(channel) = self.channel(job_id).await else {
            return (Vec::new(), broadcast::channel(1).1);
        };
        let channel = channel.lock().await;
        let backlog = channel.backlog.iter().cloned().collect();
        (backlog, channel.tx.subscribe())
    }

    /// Buffered events with `seq > since`.
    pub async fn since(&self, job_id: JobId, since: u64) -> Vec<JobEvent> {
        let Some(channel) = self.channel(job_id).await else {
            return Vec::new();
        };
        let channel = channel.lock().await;
        channel
            .backlog
            .iter()
            .filter(|e| e.seq > since)
            .cloned()
            .collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::event::LogLevel;
    use uuid::Uuid;

    fn log(message: &str) -> EventKind {
        EventKind::Log {
            level: LogLevel::Info,
            message: message.to_string(),
        }
    }

    async fn opened(bus: &EventBus) -> JobId {
        let job = Uuid::now_v7();
        bus.open(job).await;
        job
    }

    #[tokio::test]
    async fn test_sequence_numbers_start_at_one() {
        let bus = EventBus::new();
        let job = opened(&bus).await;
        let other = opened(&bus).await;
        assert_eq!(bus.publish(job, log("a")).await.unwrap().seq, 1);
        assert_eq!(bus.publish(job, log("b")).await.unwrap().seq, 2);
        assert_eq!(bus.publish(other, log("other")).await.unwrap().seq, 1);
    }

    #[tokio::test]
    async fn test_unopened_job_drops_events() {
        let bus = EventBus::new();
        let job = Uuid::now_v7();
        assert!(bus.publish(job, log("lost")).await.is_none());
        assert!(bus.since(job, 0).await.is_empty());

        let (backlog, mut rx) = bus.subscribe(job).await;
        assert!(backlog.is_empty());
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_remove_closes_live_receivers() {
        let bus = EventBus::new();
        let job = opened(&bus).await;
        bus.publish(job, log("a")).await;
        let (_, mut rx) = bus.subscribe(job).await;

        assert!(bus.remove(job).await);
        assert!(!bus.remove(job).await);
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
        assert!(bus.since(job, 0).await.is_empty());
        assert!(bus.publish(job, log("late")).await.is_none());
    }

    #[tokio::test]
    async fn test_subscribe_replays_then_streams() {
        let bus = EventBus::new();
        let job = opened(&bus).await;
        bus.publish(job, log("before")).await;

        let (backlog, mut rx) = bus.subscribe(job).await;
        assert_eq!(backlog.len(), 1);

        bus.publish(job, log("after")).await;
        let live = rx.recv().await.unwrap();
        assert_eq!(live.seq, 2);
    }

    #[tokio::test]
    async fn test_since_filters() {
        let bus = EventBus::new();
        let job = opened(&bus).await;
        for i in 0..5 {
            bus.publish(job, log(&i.to_string())).await;
        }
        let seqs: Vec<u64> = bus.since(job, 3).await.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![4, 5]);
        assert!(bus.since(Uuid::now_v7(), 0).await.is_empty());
    }

    #[tokio::test]
    async fn test_backlog_is_bounded() {
        let bus = EventBus::with_limits(16, 3);
        let job = opened(&bus).await;
        for i in 0..10 {
            bus.publish(job, log(&i.to_string())).await;
        }
        let seqs: Vec<u64> = bus.since(job, 0).await.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![8, 9, 10]);
    }
}
