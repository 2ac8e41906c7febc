//! Host half of the timer proxy: the real timers live here

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

use super::controller::HostEvent;
use crate::engine::TimerKind;
use crate::protocol::MAX_TIMER_DELAY_MS;

/// Shortest period an interval may tick with
const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalCapReached {
    pub max: usize,
}

impl std::fmt::Display for IntervalCapReached {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Maximum number of intervals ({}) reached", self.max)
    }
}

struct Armed {
    kind: TimerKind,
    task: JoinHandle<()>,
}

/// Live timers keyed by the id the isolated context minted
pub struct HostTimers {
    armed: HashMap<String, Armed>,
    max_intervals: usize,
}

impl HostTimers {
    pub fn new(max_intervals: usize) -> Self {
        Self {
            armed: HashMap::new(),
            max_intervals,
        }
    }

    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }

    pub fn live_intervals(&self) -> usize {
        self.armed
            .values()
            .filter(|a| a.kind == TimerKind::Interval)
            .count()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.armed.contains_key(id)
    }

    /// Arm a timer that reports each expiry as a `TimerFired` event
    pub fn start(
        &mut self,
        kind: TimerKind,
        id: String,
        delay_ms: f64,
        args: Vec<serde_json::Value>,
        generation: u64,
        events: UnboundedSender<HostEvent>,
    ) -> Result<(), IntervalCapReached> {
        if kind == TimerKind::Interval
            && !self.armed.contains_key(&id)
            && self.live_intervals() >= self.max_intervals
        {
            return Err(IntervalCapReached {
                max: self.max_intervals,
            });
        }

        let delay = Duration::try_from_secs_f64(delay_ms.clamp(0.0, MAX_TIMER_DELAY_MS) / 1000.0)
            .unwrap_or(Duration::ZERO);
        let fired_id = id.clone();
        let task = match kind {
            TimerKind::Timeout => tokio::spawn(async move {
                sleep(delay).await;
                let _ = events.send(HostEvent::TimerFired {
                    generation,
                    id: fired_id,
                    args,
                });
            }),
            TimerKind::Interval => tokio::spawn(async move {
                let period = delay.max(MIN_INTERVAL);
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    let event = HostEvent::TimerFired {
                        generation,
                        id: fired_id.clone(),
                        args: args.clone(),
                    };
                    if events.send(event).is_err() {
                        break;
                    }
                }
            }),
        };

        tracing::debug!(%id, ?kind, delay_ms, "timer armed");
        if let Some(previous) = self.armed.insert(id, Armed { kind, task }) {
            previous.task.abort();
        }
        Ok(())
    }

    /// Cancel a timer; unknown ids are a no-op
    pub fn cancel(&mut self, id: &str) -> bool {
        match self.armed.remove(id) {
            Some(armed) => {
                armed.task.abort();
                tracing::debug!(%id, "timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Account for an expiry. `None` means the timer was cancelled meanwhile.
    pub fn fired(&mut self, id: &str) -> Option<TimerKind> {
        let kind = self.armed.get(id)?.kind;
        if kind == TimerKind::Timeout {
            self.armed.remove(id);
        }
        Some(kind)
    }

    /// Abort every timer
    pub fn clear(&mut self) {
        for (_, armed) in self.armed.drain() {
            armed.task.abort();
        }
    }
}

impl Drop for HostTimers {
    fn drop(&mut self) {
        self.clear();
    }
}
