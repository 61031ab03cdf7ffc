//! Append-only sequence of human-readable status entries.
//!
//! One writer (the coordinator) appends; any number of observers read a
//! snapshot or follow new entries through a [`LogSubscription`]. Entries are
//! built completely before they are published, so an observer never sees a
//! half-written one.
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;

const EVENTS_TARGET: &str = "ble_peripheral_coordinator::events";
const SUBSCRIBER_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub seq: u64,
    pub text: String,
    pub detail: Option<String>,
    pub severity: Severity,
    pub enhanced: bool,
}

impl LogEntry {
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {}", self.text, detail),
            None => f.write_str(&self.text),
        }
    }
}

/// Entry under construction. Nothing is visible until [`EventLog::append`].
#[derive(Debug, Clone)]
pub struct NewEntry {
    text: String,
    detail: Option<String>,
    severity: Severity,
    enhanced: bool,
}

impl NewEntry {
    pub fn info(text: impl Into<String>) -> Self {
        NewEntry {
            text: text.into(),
            detail: None,
            severity: Severity::Info,
            enhanced: false,
        }
    }

    pub fn warning(text: impl Into<String>) -> Self {
        NewEntry {
            severity: Severity::Warning,
            ..NewEntry::info(text)
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        NewEntry {
            severity: Severity::Error,
            ..NewEntry::info(text)
        }
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn enhanced(mut self) -> Self {
        self.enhanced = true;
        self
    }
}

#[derive(Debug)]
struct Inner {
    entries: VecDeque<LogEntry>,
    capacity: Option<usize>,
    next_seq: u64,
}

#[derive(Debug, Clone)]
pub struct EventLog {
    inner: Arc<RwLock<Inner>>,
    broadcast_tx: broadcast::Sender<LogEntry>,
}

impl EventLog {
    pub fn unbounded() -> Self {
        EventLog::with_capacity(None)
    }

    pub fn bounded(capacity: usize) -> Self {
        EventLog::with_capacity(Some(capacity))
    }

    /// `None` keeps every entry; `Some(n)` retains the newest `n`.
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        let (broadcast_tx, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        EventLog {
            inner: Arc::new(RwLock::new(Inner {
                entries: VecDeque::new(),
                capacity,
                next_seq: 0,
            })),
            broadcast_tx,
        }
    }

    pub(crate) fn append(&self, entry: NewEntry) -> LogEntry {
        let entry = {
            let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            let entry = LogEntry {
                seq: inner.next_seq,
                text: entry.text,
                detail: entry.detail,
                severity: entry.severity,
                enhanced: entry.enhanced,
            };
            inner.next_seq += 1;
            if let Some(capacity) = inner.capacity {
                while inner.entries.len() >= capacity.max(1) {
                    inner.entries.pop_front();
                }
            }
            inner.entries.push_back(entry.clone());
            // Publish under the lock so subscribers see append order.
            let _ = self.broadcast_tx.send(entry.clone());
            entry
        };
        match entry.severity {
            Severity::Info => log::info!(target: EVENTS_TARGET, "{}", entry),
            Severity::Warning => log::warn!(target: EVENTS_TARGET, "{}", entry),
            Severity::Error => log::error!(target: EVENTS_TARGET, "{}", entry),
        }
        entry
    }

    pub fn snapshot(&self) -> Vec<LogEntry> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .clear();
    }

    /// Follow entries appended from now on. Dropping the subscription unsubscribes.
    pub fn subscribe(&self) -> LogSubscription {
        LogSubscription {
            receiver: self.broadcast_tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.broadcast_tx.receiver_count()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        EventLog::unbounded()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogUpdate {
    /// The subscriber fell behind and this many entries were skipped.
    Lagged(u64),
}

#[derive(Debug)]
pub struct LogSubscription {
    receiver: broadcast::Receiver<LogEntry>,
}

impl LogSubscription {
    /// Next appended entry, or `None` once the log is gone.
    pub async fn next(&mut self) -> Option<Result<LogEntry, LogUpdate>> {
        match self.receiver.recv().await {
            Ok(entry) => Some(Ok(entry)),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                Some(Err(LogUpdate::Lagged(skipped)))
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    pub fn try_next(&mut self) -> Option<Result<LogEntry, LogUpdate>> {
        match self.receiver.try_recv() {
            Ok(entry) => Some(Ok(entry)),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                Some(Err(LogUpdate::Lagged(skipped)))
            }
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_text_and_detail() {
        let log = EventLog::unbounded();
        let plain = log.append(NewEntry::info("Stopped"));
        let detailed = log.append(NewEntry::info("Connected").detail("Pixel"));
        assert_eq!(plain.to_string(), "Stopped");
        assert_eq!(detailed.to_string(), "Connected: Pixel");
    }

    #[test]
    fn sequence_numbers_follow_append_order() {
        let log = EventLog::unbounded();
        log.append(NewEntry::info("a"));
        log.append(NewEntry::warning("b"));
        log.append(NewEntry::error("c").enhanced());
        let seqs: Vec<u64> = log.snapshot().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        let last = log.snapshot().pop().unwrap();
        assert!(last.is_error() && last.enhanced);
    }

    #[test]
    fn bounded_log_keeps_newest() {
        let log = EventLog::bounded(2);
        for text in ["a", "b", "c"] {
            log.append(NewEntry::info(text));
        }
        let texts: Vec<String> = log.snapshot().into_iter().map(|e| e.text).collect();
        assert_eq!(texts, vec!["b", "c"]);
    }

    #[test]
    fn clear_keeps_sequence_running() {
        let log = EventLog::unbounded();
        log.append(NewEntry::info("a"));
        log.clear();
        assert!(log.is_empty());
        assert_eq!(log.append(NewEntry::info("b")).seq, 1);
    }

    #[tokio::test]
    async fn subscription_follows_and_unsubscribes_on_drop() {
        let log = EventLog::unbounded();
        log.append(NewEntry::info("before"));
        let mut sub = log.subscribe();
        assert_eq!(log.subscriber_count(), 1);
        log.append(NewEntry::info("after"));
        let entry = sub.next().await.unwrap().unwrap();
        assert_eq!(entry.text, "after");
        assert!(sub.try_next().is_none());
        drop(sub);
        assert_eq!(log.subscriber_count(), 0);
    }

    #[test]
    fn slow_subscriber_is_told_it_lagged() {
        let log = EventLog::unbounded();
        let mut sub = log.subscribe();
        for i in 0..(SUBSCRIBER_BUFFER + 3) {
            log.append(NewEntry::info(format!("{i}")));
        }
        assert_eq!(sub.try_next(), Some(Err(LogUpdate::Lagged(3))));
        assert_eq!(sub.try_next().unwrap().unwrap().text, "3");
    }
}
