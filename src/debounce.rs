//! Flood prevention for review-event bursts.
//!
//! Review submissions arrive as one webhook per comment, so a single
//! review of a pull request can mean dozens of deliveries within a second.
//! The debouncer batches events by (repo, PR number): the first event of a
//! batch opens a fixed window, everything arriving inside it joins the
//! batch, and when the window closes exactly one consolidated event is
//! sent downstream. The window is never extended by later arrivals.
//!
//! The consolidated event is the first of the batch with a
//! `coalesced_count` field recording the batch size, so reports can
//! mention the suppressed events.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::webhooks::Event;

type BatchKey = (String, u64);

/// Default coalescing window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(10);

/// Coalesces bursts of events for the same pull request.
#[derive(Clone)]
pub struct FloodDebouncer {
    window: Duration,
    batches: Arc<Mutex<HashMap<BatchKey, Vec<Event>>>>,
    tx: mpsc::Sender<Event>,
}

impl FloodDebouncer {
    /// Creates a debouncer and the receiver for consolidated events.
    pub fn new(window: Duration) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(64);
        (
            FloodDebouncer {
                window,
                batches: Arc::new(Mutex::new(HashMap::new())),
                tx,
            },
            rx,
        )
    }

    fn lock_batches(&self) -> MutexGuard<'_, HashMap<BatchKey, Vec<Event>>> {
        self.batches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds an event to its batch, opening a new window if none is active
    /// for its (repo, PR) key.
    pub fn submit(&self, event: Event, pr_number: u64) {
        let key = (event.repo.clone(), pr_number);
        {
            let mut batches = self.lock_batches();
            if let Some(batch) = batches.get_mut(&key) {
                batch.push(event);
                return;
            }
            debug!(repo = %key.0, pr = key.1, "opening debounce window");
            batches.insert(key.clone(), vec![event]);
        }

        let debouncer = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(debouncer.window).await;
            let batch = debouncer.lock_batches().remove(&key);
            let Some(batch) = batch else { return };
            debug!(repo = %key.0, pr = key.1, size = batch.len(), "closing debounce window");
            if let Some(event) = consolidate(batch) {
                // Receiver gone means shutdown; nothing left to do.
                let _ = debouncer.tx.send(event).await;
            }
        });
    }
}

/// Reduces a batch to its first event, annotated with the batch size.
fn consolidate(batch: Vec<Event>) -> Option<Event> {
    let count = batch.len();
    let mut event = batch.into_iter().next()?;
    if count > 1 {
        if let Value::Object(map) = &mut event.fields {
            map.insert("coalesced_count".into(), Value::from(count as u64));
        }
    }
    Some(event)
}
