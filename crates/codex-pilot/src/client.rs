//! Actor runtime.
//!
//! One tokio task owns the [`PilotCore`], the socket handle and the timers.
//! Intents arrive over a channel, snapshots leave over a `watch` channel;
//! nothing else touches session state.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::PilotConfig;
use crate::engine::{Effect, Intent, PilotCore, TimerEvent};
use crate::error::{PilotError, Result};
use crate::model::Snapshot;
use crate::persona::{HashNamer, PersonaNamer};
use crate::scheduler::Scheduler;
use crate::transport::{Endpoint, TransportEvent, TransportEventKind, TransportHandle};
use crate::wire_log::{WireDirection, WireLog};

enum Control {
    Apply(Intent),
    Shutdown,
}

/// Handle to a running session. Dropping it aborts the runtime task.
pub struct PilotClient {
    control: mpsc::UnboundedSender<Control>,
    snapshots: watch::Receiver<Snapshot>,
    task: Option<JoinHandle<()>>,
}

impl PilotClient {
    /// Start the runtime with the default persona namer. Does not connect.
    pub fn spawn(config: PilotConfig) -> Result<Self> {
        Self::spawn_with_namer(config, Box::new(HashNamer))
    }

    pub fn spawn_with_namer(config: PilotConfig, namer: Box<dyn PersonaNamer>) -> Result<Self> {
        let endpoint = config.endpoint()?;
        let core = PilotCore::new(&config, namer);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(core.snapshot());

        let runtime = Runtime {
            core,
            endpoint,
            scheduler: Scheduler::new(
                timer_tx,
                config.reconnect_delay(),
                config.refresh_interval(),
                config.done_decay(),
            ),
            transport: None,
            transport_tx,
            wire_log: config.wire_log.clone().map(WireLog::open),
            snapshots: snapshot_tx,
        };
        let task = tokio::spawn(runtime.run(control_rx, transport_rx, timer_rx));

        Ok(Self {
            control: control_tx,
            snapshots: snapshot_rx,
            task: Some(task),
        })
    }

    fn dispatch(&self, intent: Intent) -> Result<()> {
        self.control
            .send(Control::Apply(intent))
            .map_err(|_| PilotError::ChannelClosed)
    }

    pub fn connect(&self) -> Result<()> {
        self.dispatch(Intent::Connect)
    }

    pub fn disconnect(&self) -> Result<()> {
        self.dispatch(Intent::Disconnect)
    }

    pub fn refresh(&self) -> Result<()> {
        self.dispatch(Intent::Refresh)
    }

    pub fn select_thread(&self, thread_id: impl Into<String>) -> Result<()> {
        self.dispatch(Intent::SelectThread(thread_id.into()))
    }

    pub fn deselect_thread(&self) -> Result<()> {
        self.dispatch(Intent::DeselectThread)
    }

    pub fn send_prompt(&self, text: impl Into<String>) -> Result<()> {
        self.dispatch(Intent::SendPrompt(text.into()))
    }

    pub fn archive_thread(&self, thread_id: impl Into<String>) -> Result<()> {
        self.dispatch(Intent::ArchiveThread(thread_id.into()))
    }

    pub fn unarchive_thread(&self, thread_id: impl Into<String>) -> Result<()> {
        self.dispatch(Intent::UnarchiveThread(thread_id.into()))
    }

    pub fn rename_thread(&self, thread_id: impl Into<String>, name: impl Into<String>) -> Result<()> {
        self.dispatch(Intent::RenameThread {
            thread_id: thread_id.into(),
            name: name.into(),
        })
    }

    pub fn interrupt_thread(&self, thread_id: impl Into<String>) -> Result<()> {
        self.dispatch(Intent::InterruptThread(thread_id.into()))
    }

    pub fn create_new_thread(&self) -> Result<()> {
        self.dispatch(Intent::CreateNewThread)
    }

    pub fn summon_fairy(&self, prompt: impl Into<String>) -> Result<()> {
        self.dispatch(Intent::SummonFairy(prompt.into()))
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    /// Wait until a published snapshot satisfies `predicate`.
    pub async fn wait_for<F>(&self, predicate: F) -> Result<Snapshot>
    where
        F: FnMut(&Snapshot) -> bool,
    {
        let mut snapshots = self.snapshots.clone();
        let snapshot = snapshots
            .wait_for(predicate)
            .await
            .map_err(|_| PilotError::ChannelClosed)?;
        Ok(snapshot.clone())
    }

    /// Disconnect, stop the timers and wait for the runtime to finish.
    pub async fn shutdown(mut self) {
        let _ = self.control.send(Control::Shutdown);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PilotClient {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct Runtime {
    core: PilotCore,
    endpoint: Endpoint,
    scheduler: Scheduler,
    transport: Option<TransportHandle>,
    transport_tx: mpsc::UnboundedSender<TransportEvent>,
    wire_log: Option<WireLog>,
    snapshots: watch::Sender<Snapshot>,
}

impl Runtime {
    async fn run(
        mut self,
        mut control: mpsc::UnboundedReceiver<Control>,
        mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        mut timers: mpsc::UnboundedReceiver<TimerEvent>,
    ) {
        loop {
            tokio::select! {
                command = control.recv() => match command {
                    Some(Control::Apply(intent)) => {
                        debug!(?intent, "intent");
                        self.core.apply(intent);
                    }
                    Some(Control::Shutdown) | None => break,
                },
                Some(event) = transport_events.recv() => {
                    if let (Some(log), TransportEventKind::Message(text)) = (&self.wire_log, &event.kind) {
                        log.record(WireDirection::In, text);
                    }
                    self.core.handle_transport(event);
                }
                Some(timer) = timers.recv() => self.core.handle_timer(timer),
            }
            self.execute_effects();
            self.publish();
        }

        info!("pilot runtime shutting down");
        self.core.apply(Intent::Disconnect);
        self.execute_effects();
        self.scheduler.shutdown();
        self.publish();
    }

    fn execute_effects(&mut self) {
        for effect in self.core.take_effects() {
            match effect {
                Effect::OpenTransport { epoch } => {
                    // Dropping the previous handle aborts its socket task.
                    self.transport = Some(TransportHandle::open(
                        self.endpoint.clone(),
                        epoch,
                        self.transport_tx.clone(),
                    ));
                }
                Effect::CloseTransport => {
                    if let Some(transport) = self.transport.take() {
                        transport.close();
                    }
                }
                Effect::Send(text) => {
                    if let Some(log) = &self.wire_log {
                        log.record(WireDirection::Out, &text);
                    }
                    match &self.transport {
                        Some(transport) => transport.send(text),
                        None => debug!("no socket, dropping outbound message"),
                    }
                }
                Effect::ArmReconnect => self.scheduler.arm_reconnect(),
                Effect::CancelReconnect => self.scheduler.cancel_reconnect(),
                Effect::ArmRefresh => self.scheduler.arm_refresh(),
                Effect::CancelRefresh => self.scheduler.cancel_refresh(),
                Effect::ScheduleDecay {
                    thread_id,
                    generation,
                } => self.scheduler.schedule_decay(thread_id, generation),
            }
        }
    }

    fn publish(&self) {
        let next = self.core.snapshot();
        self.snapshots.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}
