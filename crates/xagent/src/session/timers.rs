//! Session timers
//!
//! Every timer runs as a task that posts [`TimerFired`] into the session
//! queue. At most one timer per [`TimerKind`] is live; re-arming or
//! cancelling bumps the generation so a firing already in the queue is
//! recognised as stale and dropped.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    Heartbeat,
    RegisterRetry,
    Reconnect,
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TimerKind::Heartbeat => "heartbeat",
            TimerKind::RegisterRetry => "register-retry",
            TimerKind::Reconnect => "reconnect",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub kind: TimerKind,
    pub generation: u64,
}

struct LiveTimer {
    generation: u64,
    repeating: bool,
    task: JoinHandle<()>,
}

pub struct Timers {
    tx: mpsc::UnboundedSender<TimerFired>,
    live: HashMap<TimerKind, LiveTimer>,
    generation: u64,
}

impl Timers {
    pub fn new(tx: mpsc::UnboundedSender<TimerFired>) -> Self {
        Self {
            tx,
            live: HashMap::new(),
            generation: 0,
        }
    }

    /// Fire once after `delay`, replacing any live timer of this kind
    pub fn once(&mut self, kind: TimerKind, delay: Duration) {
        let fired = self.arm(kind);
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            sleep(delay).await;
            let _ = tx.send(fired);
        });
        self.live.insert(
            kind,
            LiveTimer {
                generation: fired.generation,
                repeating: false,
                task,
            },
        );
    }

    /// Fire every `period`, first after one period
    pub fn repeating(&mut self, kind: TimerKind, period: Duration) {
        let fired = self.arm(kind);
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tx.send(fired).is_err() {
                    return;
                }
            }
        });
        self.live.insert(
            kind,
            LiveTimer {
                generation: fired.generation,
                repeating: true,
                task,
            },
        );
    }

    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        match self.live.remove(&kind) {
            Some(timer) => {
                timer.task.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, timer) in self.live.drain() {
            timer.task.abort();
        }
    }

    /// Whether a firing belongs to a live timer. A one-shot timer stops
    /// being live once its firing is accepted.
    pub fn accept(&mut self, fired: &TimerFired) -> bool {
        let current = match self.live.get(&fired.kind) {
            Some(timer) if timer.generation == fired.generation => timer.repeating,
            _ => return false,
        };
        if !current {
            self.live.remove(&fired.kind);
        }
        true
    }

    pub fn is_live(&self, kind: TimerKind) -> bool {
        self.live.contains_key(&kind)
    }

    /// Live timer kinds, sorted
    pub fn live(&self) -> Vec<TimerKind> {
        let mut kinds: Vec<TimerKind> = self.live.keys().copied().collect();
        kinds.sort();
        kinds
    }

    fn arm(&mut self, kind: TimerKind) -> TimerFired {
        self.cancel(kind);
        self.generation += 1;
        TimerFired {
            kind,
            generation: self.generation,
        }
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
