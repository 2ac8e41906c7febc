//! Isolated half of the timer proxy: id minting and the callback table

use std::collections::HashMap;

use crate::engine::{TimerKind, Value};

#[derive(Debug)]
struct Pending {
    kind: TimerKind,
    callback: Value,
}

/// Callbacks waiting for the host to report that their timer fired
#[derive(Debug)]
pub struct TimerProxy {
    next_timeout: u64,
    next_interval: u64,
    max_intervals: usize,
    pending: HashMap<String, Pending>,
}

impl TimerProxy {
    pub fn new(max_intervals: usize) -> Self {
        Self {
            next_timeout: 0,
            next_interval: 0,
            max_intervals,
            pending: HashMap::new(),
        }
    }

    pub fn max_intervals(&self) -> usize {
        self.max_intervals
    }

    pub fn live_intervals(&self) -> usize {
        self.pending
            .values()
            .filter(|p| p.kind == TimerKind::Interval)
            .count()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Record a callback and mint its id; `None` once the interval cap is reached
    pub fn schedule(&mut self, kind: TimerKind, callback: Value) -> Option<String> {
        let counter = match kind {
            TimerKind::Interval if self.live_intervals() >= self.max_intervals => return None,
            TimerKind::Interval => &mut self.next_interval,
            TimerKind::Timeout => &mut self.next_timeout,
        };
        let id = format!("{}-{}", kind.prefix(), counter);
        *counter += 1;

        self.pending.insert(id.clone(), Pending { kind, callback });
        Some(id)
    }

    /// Forget a callback; unknown ids are ignored
    pub fn clear(&mut self, id: &str) -> bool {
        self.pending.remove(id).is_some()
    }

    /// Callback to run for a fired timer. Timeouts fire once and are forgotten.
    pub fn fire(&mut self, id: &str) -> Option<Value> {
        let kind = self.pending.get(id)?.kind;
        match kind {
            TimerKind::Timeout => self.pending.remove(id).map(|p| p.callback),
            TimerKind::Interval => self.pending.get(id).map(|p| p.callback.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_per_kind_and_never_reused() {
        let mut timers = TimerProxy::new(10);
        assert_eq!(timers.schedule(TimerKind::Timeout, Value::Null).unwrap(), "timeout-0");
        assert_eq!(timers.schedule(TimerKind::Interval, Value::Null).unwrap(), "interval-0");
        assert!(timers.clear("timeout-0"));
        assert_eq!(timers.schedule(TimerKind::Timeout, Value::Null).unwrap(), "timeout-1");
    }

    #[test]
    fn test_interval_cap() {
        let mut timers = TimerProxy::new(10);
        for _ in 0..10 {
            assert!(timers.schedule(TimerKind::Interval, Value::Null).is_some());
        }
        assert!(timers.schedule(TimerKind::Interval, Value::Null).is_none());
        assert!(timers.schedule(TimerKind::Timeout, Value::Null).is_some());
        assert_eq!(timers.live_intervals(), 10);

        timers.clear("interval-3");
        assert_eq!(timers.schedule(TimerKind::Interval, Value::Null).unwrap(), "interval-10");
    }

    #[test]
    fn test_fire_semantics() {
        let mut timers = TimerProxy::new(10);
        let timeout = timers.schedule(TimerKind::Timeout, Value::Null).unwrap();
        let interval = timers.schedule(TimerKind::Interval, Value::Null).unwrap();

        assert!(timers.fire(&timeout).is_some());
        assert!(timers.fire(&timeout).is_none());
        assert!(timers.fire(&interval).is_some());
        assert!(timers.fire(&interval).is_some());
        assert!(timers.fire("timeout-99").is_none());
        assert_eq!(timers.len(), 1);
    }

    #[test]
    fn test_clear_unknown_is_noop() {
        let mut timers = TimerProxy::new(10);
        assert!(!timers.clear("interval-4"));
        assert!(timers.is_empty());
    }
}
