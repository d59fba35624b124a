//! Network-idle detection over a stream of request lifecycle events
//!
//! A page is idle once no request has been in flight for a full quiescence window. The
//! consumer is generic over the request key so it can be driven by CDP `Network` events in
//! production and by plain iterators in tests.

use futures::{Stream, StreamExt};
use std::collections::HashSet;
use std::hash::Hash;
use std::time::Duration;
use tracing::trace;

/// Lifecycle of a single network request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkActivity<K> {
    Started(K),
    Finished(K),
}

/// How [`wait_for_idle`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleOutcome {
    /// No request was in flight for the whole window
    Idle,
    /// The event source closed before the page went quiet
    StreamEnded,
}

/// Tracks requests that have started but not yet finished or failed.
///
/// Start and finish events may arrive from independent sources in either order, so a finish
/// seen before its start is remembered and cancels that start when it shows up.
#[derive(Debug)]
pub struct InFlightRequests<K> {
    pending: HashSet<K>,
    finished_early: HashSet<K>,
}

impl<K: Eq + Hash> InFlightRequests<K> {
    pub fn new() -> Self {
        Self {
            pending: HashSet::new(),
            finished_early: HashSet::new(),
        }
    }

    pub fn apply(&mut self, activity: NetworkActivity<K>) {
        match activity {
            NetworkActivity::Started(key) => {
                if !self.finished_early.remove(&key) {
                    self.pending.insert(key);
                }
            }
            NetworkActivity::Finished(key) => {
                if !self.pending.remove(&key) {
                    self.finished_early.insert(key);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<K: Eq + Hash> Default for InFlightRequests<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Consumes `events` until no request has been in flight for `quiet`.
///
/// No timeout is applied here; callers bound the wait themselves.
pub async fn wait_for_idle<S, K>(
    events: &mut S,
    in_flight: &mut InFlightRequests<K>,
    quiet: Duration,
) -> IdleOutcome
where
    S: Stream<Item = NetworkActivity<K>> + Unpin,
    K: Eq + Hash,
{
    loop {
        if in_flight.is_empty() {
            match tokio::time::timeout(quiet, events.next()).await {
                Err(_) => return IdleOutcome::Idle,
                Ok(Some(activity)) => in_flight.apply(activity),
                Ok(None) => return IdleOutcome::StreamEnded,
            }
        } else {
            match events.next().await {
                Some(activity) => in_flight.apply(activity),
                None => return IdleOutcome::StreamEnded,
            }
        }
        trace!("{} request(s) in flight", in_flight.len());
    }
}
