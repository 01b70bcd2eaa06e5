use chrono::{DateTime, Utc};
use crossbeam_queue::ArrayQueue;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Wire shape of an inbound queue message. The true event time is not known
/// at this point; the projector synthesizes a provisional timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicMessage {
    pub uuid: Uuid,
    pub event_type: String,
    #[serde(default)]
    pub properties: Option<String>,
    pub team_id: i64,
    pub subject_id: String,
    #[serde(default)]
    pub written_at: Option<DateTime<Utc>>,
}

/// Errors raised by the publish side of the in-memory topic.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PublishError {
    #[error("topic at capacity; message {0} rejected")]
    TopicFull(Uuid),
}

/// Consumption side of a message-queue topic.
///
/// `poll` returns the current in-flight message and keeps returning it until
/// `ack` is called: the consumer never advances past an unacknowledged
/// message, which is what gives the projector at-least-once delivery into
/// storage.
pub trait TopicConsumer {
    fn poll(&mut self) -> Option<TopicMessage>;
    fn ack(&mut self);
}

/// Bounded in-memory topic used by tests and embedded deployments. The
/// bounded queue provides natural backpressure to producers.
#[derive(Debug, Clone)]
pub struct InMemoryTopic {
    queue: Arc<ArrayQueue<TopicMessage>>,
}

impl InMemoryTopic {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: Arc::new(ArrayQueue::new(capacity.max(1))),
        }
    }

    pub fn producer(&self) -> TopicProducer {
        TopicProducer {
            queue: Arc::clone(&self.queue),
        }
    }

    pub fn consumer(&self) -> InMemoryConsumer {
        InMemoryConsumer {
            queue: Arc::clone(&self.queue),
            in_flight: None,
        }
    }

    pub fn depth(&self) -> usize {
        self.queue.len()
    }
}

/// Publish handle for the in-memory topic.
#[derive(Debug, Clone)]
pub struct TopicProducer {
    queue: Arc<ArrayQueue<TopicMessage>>,
}

impl TopicProducer {
    pub fn publish(&self, message: TopicMessage) -> Result<(), PublishError> {
        self.queue
            .push(message)
            .map_err(|rejected| PublishError::TopicFull(rejected.uuid))
    }
}

/// Consumer over the in-memory topic with explicit acknowledgment.
#[derive(Debug)]
pub struct InMemoryConsumer {
    queue: Arc<ArrayQueue<TopicMessage>>,
    in_flight: Option<TopicMessage>,
}

impl TopicConsumer for InMemoryConsumer {
    fn poll(&mut self) -> Option<TopicMessage> {
        if self.in_flight.is_none() {
            self.in_flight = self.queue.pop();
        }
        self.in_flight.clone()
    }

    fn ack(&mut self) {
        self.in_flight = None;
    }
}
