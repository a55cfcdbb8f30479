//! Timers feeding [`TimerEvent`]s back into the runtime loop.
//!
//! Reconnect is single-shot and re-arming replaces the previous timer, so
//! there is never more than one outstanding. Refresh repeats until cancelled.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at, sleep};

use crate::engine::TimerEvent;

#[derive(Debug)]
pub struct Scheduler {
    events: mpsc::UnboundedSender<TimerEvent>,
    reconnect_delay: Duration,
    refresh_interval: Duration,
    decay_delay: Duration,
    reconnect: Option<JoinHandle<()>>,
    refresh: Option<JoinHandle<()>>,
    decays: HashMap<String, JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(
        events: mpsc::UnboundedSender<TimerEvent>,
        reconnect_delay: Duration,
        refresh_interval: Duration,
        decay_delay: Duration,
    ) -> Self {
        Self {
            events,
            reconnect_delay,
            refresh_interval,
            decay_delay,
            reconnect: None,
            refresh: None,
            decays: HashMap::new(),
        }
    }

    pub fn arm_reconnect(&mut self) {
        self.cancel_reconnect();
        let events = self.events.clone();
        let delay = self.reconnect_delay;
        self.reconnect = Some(tokio::spawn(async move {
            sleep(delay).await;
            let _ = events.send(TimerEvent::Reconnect);
        }));
    }

    pub fn cancel_reconnect(&mut self) {
        if let Some(task) = self.reconnect.take() {
            task.abort();
        }
    }

    pub fn reconnect_armed(&self) -> bool {
        self.reconnect
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub fn arm_refresh(&mut self) {
        self.cancel_refresh();
        let events = self.events.clone();
        let period = self.refresh_interval;
        self.refresh = Some(tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            loop {
                ticks.tick().await;
                if events.send(TimerEvent::Refresh).is_err() {
                    break;
                }
            }
        }));
    }

    pub fn cancel_refresh(&mut self) {
        if let Some(task) = self.refresh.take() {
            task.abort();
        }
    }

    /// One decay per thread; a newer request replaces an older one.
    pub fn schedule_decay(&mut self, thread_id: String, generation: u64) {
        self.decays.retain(|_, task| !task.is_finished());
        let events = self.events.clone();
        let delay = self.decay_delay;
        let event = TimerEvent::Decay {
            thread_id: thread_id.clone(),
            generation,
        };
        let task = tokio::spawn(async move {
            sleep(delay).await;
            let _ = events.send(event);
        });
        if let Some(previous) = self.decays.insert(thread_id, task) {
            previous.abort();
        }
    }

    pub fn shutdown(&mut self) {
        self.cancel_reconnect();
        self.cancel_refresh();
        for (_, task) in self.decays.drain() {
            task.abort();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
