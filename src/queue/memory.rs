//! In-memory batch queue
//!
//! Backs unit tests and the integration scenarios; behaves like the SQLite
//! queue minus durability.

use crate::queue::{BatchQueue, QueueError, QueueMessage, QueueResult};
use std::collections::HashMap;
use std::sync::Mutex;

struct Entry {
    id: u64,
    body: String,
    in_flight: bool,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    queues: HashMap<String, Vec<Entry>>,
}

/// In-memory queue; all queues share one instance
#[derive(Default)]
pub struct MemoryQueue {
    inner: Mutex<Inner>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BatchQueue for MemoryQueue {
    fn send(&self, queue: &str, body: &str) -> QueueResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.queues.entry(queue.to_string()).or_default().push(Entry {
            id,
            body: body.to_string(),
            in_flight: false,
        });
        Ok(())
    }

    fn receive(&self, queue: &str, max: usize) -> QueueResult<Vec<QueueMessage>> {
        let mut inner = self.inner.lock().unwrap();
        let entries = inner.queues.entry(queue.to_string()).or_default();

        let mut messages = Vec::new();
        for entry in entries.iter_mut() {
            if messages.len() == max {
                break;
            }
            if !entry.in_flight {
                entry.in_flight = true;
                messages.push(QueueMessage {
                    id: entry.id.to_string(),
                    body: entry.body.clone(),
                });
            }
        }
        Ok(messages)
    }

    fn delete(&self, queue: &str, message_id: &str) -> QueueResult<()> {
        let id = parse_id(message_id)?;
        let mut inner = self.inner.lock().unwrap();
        let entries = inner.queues.entry(queue.to_string()).or_default();

        let before = entries.len();
        entries.retain(|e| e.id != id);
        if entries.len() == before {
            return Err(QueueError::UnknownMessage(message_id.to_string()));
        }
        Ok(())
    }

    fn release(&self, queue: &str, message_id: &str) -> QueueResult<()> {
        let id = parse_id(message_id)?;
        let mut inner = self.inner.lock().unwrap();
        let entries = inner.queues.entry(queue.to_string()).or_default();

        match entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                entry.in_flight = false;
                Ok(())
            }
            None => Err(QueueError::UnknownMessage(message_id.to_string())),
        }
    }

    fn depth(&self, queue: &str) -> QueueResult<usize> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .queues
            .get(queue)
            .map(|entries| entries.iter().filter(|e| !e.in_flight).count())
            .unwrap_or(0))
    }
}

fn parse_id(message_id: &str) -> QueueResult<u64> {
    message_id
        .parse::<u64>()
        .map_err(|_| QueueError::MalformedId(message_id.to_string()))
}
