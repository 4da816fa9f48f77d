//! Named countdown timers.
//!
//! Each key has at most one live timer. Arming a key aborts whatever was
//! running under it first, so repeated phase transitions never stack
//! countdowns. Ticks arrive once per second on the registry's channel.

use crate::reconciler::{TimerCommand, TimerKey};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerEvent {
    pub key: TimerKey,
    pub label: String,
    pub remaining: Duration,
    generation: u64,
}

impl TimerEvent {
    pub fn expired(&self) -> bool {
        self.remaining.is_zero()
    }
}

struct Entry {
    generation: u64,
    handle: JoinHandle<()>,
}

pub struct TimerRegistry {
    entries: HashMap<TimerKey, Entry>,
    tx: mpsc::UnboundedSender<TimerEvent>,
    next_generation: u64,
}

impl TimerRegistry {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = Self {
            entries: HashMap::new(),
            tx,
            next_generation: 0,
        };
        (registry, rx)
    }

    /// Arm `key`, replacing any timer already running under it. Must be
    /// called inside a tokio runtime.
    pub fn replace(&mut self, key: TimerKey, remaining: Duration, label: impl Into<String>) {
        self.clear(key);
        self.next_generation += 1;
        let generation = self.next_generation;
        let label = label.into();
        let tx = self.tx.clone();
        let deadline = Instant::now() + remaining;

        let handle = tokio::spawn(async move {
            loop {
                let left = deadline.saturating_duration_since(Instant::now());
                let event = TimerEvent {
                    key,
                    label: label.clone(),
                    remaining: left,
                    generation,
                };
                if tx.send(event).is_err() || left.is_zero() {
                    break;
                }
                tokio::time::sleep(left.min(Duration::from_secs(1))).await;
            }
        });
        trace!(timer = key.name(), ?remaining, "timer armed");
        self.entries.insert(key, Entry { generation, handle });
    }

    pub fn clear(&mut self, key: TimerKey) -> bool {
        match self.entries.remove(&key) {
            Some(entry) => {
                entry.handle.abort();
                trace!(timer = key.name(), "timer cleared");
                true
            }
            None => false,
        }
    }

    pub fn clear_all(&mut self) {
        for (_, entry) in self.entries.drain() {
            entry.handle.abort();
        }
    }

    pub fn apply(&mut self, command: &TimerCommand) {
        match command {
            TimerCommand::Arm { key, remaining, label } => self.replace(*key, *remaining, label.clone()),
            TimerCommand::Clear(key) => {
                self.clear(*key);
            }
            TimerCommand::ClearAll => self.clear_all(),
        }
    }

    pub fn is_active(&self, key: TimerKey) -> bool {
        self.entries.get(&key).is_some_and(|e| !e.handle.is_finished())
    }

    /// Ticks already queued by a timer that has since been replaced or
    /// cleared are stale and should be ignored.
    pub fn is_current(&self, event: &TimerEvent) -> bool {
        self.entries.get(&event.key).is_some_and(|e| e.generation == event.generation)
    }

    pub fn active(&self) -> usize {
        self.entries.values().filter(|e| !e.handle.is_finished()).count()
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        self.clear_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ticks_every_second_until_zero() {
        let (mut timers, mut rx) = TimerRegistry::new();
        timers.replace(TimerKey::Countdown, Duration::from_millis(2500), "Betting closes");

        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            assert!(timers.is_current(&event));
            seen.push(event.remaining.as_millis());
            if event.expired() {
                break;
            }
        }
        assert_eq!(seen, vec![2500, 1500, 500, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn replace_aborts_the_previous_timer() {
        let (mut timers, mut rx) = TimerRegistry::new();
        timers.replace(TimerKey::Turn, Duration::from_secs(30), "ann to act");
        let first = rx.recv().await.unwrap();

        timers.replace(TimerKey::Turn, Duration::from_secs(5), "bob to act");
        assert!(!timers.is_current(&first));
        assert_eq!(timers.active(), 1);

        let next = rx.recv().await.unwrap();
        assert_eq!(next.label, "bob to act");
        assert!(timers.is_current(&next));
    }

    #[tokio::test(start_paused = true)]
    async fn clear_all_stops_everything() {
        let (mut timers, _rx) = TimerRegistry::new();
        timers.apply(&TimerCommand::Arm {
            key: TimerKey::Ready,
            remaining: Duration::from_secs(10),
            label: "Round starts".into(),
        });
        timers.replace(TimerKey::Turn, Duration::from_secs(10), "x");
        assert!(timers.is_active(TimerKey::Ready));
        timers.apply(&TimerCommand::ClearAll);
        assert_eq!(timers.active(), 0);
        assert!(!timers.clear(TimerKey::Turn));
    }
}
