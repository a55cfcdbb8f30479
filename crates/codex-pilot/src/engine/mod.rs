//! Single-owner session core.
//!
//! `PilotCore` holds every piece of mutable session state and never touches
//! IO. Intents, transport events and timer firings go in; [`Effect`]s come
//! out and are executed by the runtime in [`crate::client`].

mod notifications;
mod responses;

use std::collections::HashMap;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::config::PilotConfig;
use crate::model::{ConnectionStatus, ContentMode, DetailState, DisplayItem, ItemKind, Snapshot};
use crate::persona::PersonaNamer;
use crate::rpc::{ClientMethod, Inbound, RpcSession};
use crate::state::PilotState;
use crate::transport::{TransportEvent, TransportEventKind};

/// Operations the presentation layer can invoke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Connect,
    Disconnect,
    Refresh,
    SelectThread(String),
    DeselectThread,
    SendPrompt(String),
    ArchiveThread(String),
    UnarchiveThread(String),
    RenameThread { thread_id: String, name: String },
    InterruptThread(String),
    CreateNewThread,
    SummonFairy(String),
}

/// Side effects requested by the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    OpenTransport { epoch: u64 },
    CloseTransport,
    Send(String),
    ArmReconnect,
    CancelReconnect,
    ArmRefresh,
    CancelRefresh,
    ScheduleDecay { thread_id: String, generation: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    Reconnect,
    Refresh,
    Decay { thread_id: String, generation: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingSummon {
    prompt: String,
    /// Id of the in-flight `thread/start`, if one has been sent on this connection.
    request_id: Option<i64>,
}

#[derive(Debug, Clone)]
struct CoreSettings {
    client_name: String,
    client_version: String,
    show_archived: bool,
    thread_cwd: Option<String>,
}

#[derive(Debug)]
pub struct PilotCore {
    settings: CoreSettings,
    state: PilotState,
    rpc: RpcSession,
    /// Thread each in-flight thread-scoped request refers to.
    request_threads: HashMap<i64, String>,
    summon: Option<PendingSummon>,
    epoch: u64,
    transport_open: bool,
    wants_connection: bool,
    local_items: u64,
    effects: Vec<Effect>,
}

impl PilotCore {
    pub fn new(config: &PilotConfig, namer: Box<dyn PersonaNamer>) -> Self {
        Self {
            settings: CoreSettings {
                client_name: config.client_name.clone(),
                client_version: config.client_version.clone(),
                show_archived: config.show_archived,
                thread_cwd: config.thread_cwd.clone(),
            },
            state: PilotState::new(namer, config.preview_limit, config.event_log_limit),
            rpc: RpcSession::new(),
            request_threads: HashMap::new(),
            summon: None,
            epoch: 0,
            transport_open: false,
            wants_connection: false,
            local_items: 0,
            effects: Vec::new(),
        }
    }

    pub fn state(&self) -> &PilotState {
        &self.state
    }

    pub fn snapshot(&self) -> Snapshot {
        self.state.snapshot()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn pending_requests(&self) -> usize {
        self.rpc.pending_len()
    }

    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    pub fn apply(&mut self, intent: Intent) {
        match intent {
            Intent::Connect => {
                self.wants_connection = true;
                self.connect();
            }
            Intent::Disconnect => self.disconnect(),
            Intent::Refresh => self.refresh(),
            Intent::SelectThread(thread_id) => self.select_thread(thread_id),
            Intent::DeselectThread => self.state.detail = DetailState::default(),
            Intent::SendPrompt(text) => self.send_prompt(text),
            Intent::ArchiveThread(thread_id) => self.archive_thread(thread_id),
            Intent::UnarchiveThread(thread_id) => {
                if self.require_connected("unarchive") {
                    self.thread_request(
                        ClientMethod::ThreadUnarchive,
                        &thread_id,
                        json!({ "threadId": thread_id }),
                    );
                }
            }
            Intent::RenameThread { thread_id, name } => {
                let name = name.trim();
                if name.is_empty() || !self.require_connected("rename") {
                    return;
                }
                self.thread_request(
                    ClientMethod::ThreadNameSet,
                    &thread_id,
                    json!({ "threadId": thread_id, "name": name }),
                );
            }
            Intent::InterruptThread(thread_id) => self.interrupt_thread(thread_id),
            Intent::CreateNewThread => {
                if self.require_connected("create thread") {
                    let params = self.thread_start_params();
                    self.request(ClientMethod::ThreadStart, Some(params));
                }
            }
            Intent::SummonFairy(prompt) => self.summon(prompt),
        }
    }

    pub fn handle_transport(&mut self, event: TransportEvent) {
        if event.epoch != self.epoch {
            debug!(
                event_epoch = event.epoch,
                current = self.epoch,
                "ignoring event from superseded socket"
            );
            return;
        }
        match event.kind {
            TransportEventKind::Opened => self.on_transport_open(),
            TransportEventKind::Message(text) => self.on_message(&text),
            TransportEventKind::Disconnected { reason }
            | TransportEventKind::ConnectFailed { reason } => self.on_connection_lost(reason),
        }
    }

    pub fn handle_timer(&mut self, timer: TimerEvent) {
        match timer {
            TimerEvent::Reconnect => {
                if self.wants_connection && self.state.status == ConnectionStatus::Disconnected {
                    info!("reconnecting to app-server");
                    self.connect();
                }
            }
            TimerEvent::Refresh => self.refresh(),
            TimerEvent::Decay {
                thread_id,
                generation,
            } => {
                if self.state.personas.decay(&thread_id, generation) {
                    debug!(%thread_id, "persona decayed to idle");
                }
            }
        }
    }

    fn connect(&mut self) {
        if self.state.status != ConnectionStatus::Disconnected {
            debug!(status = ?self.state.status, "connect ignored");
            return;
        }
        self.epoch += 1;
        self.transport_open = false;
        self.rpc.clear_pending();
        self.request_threads.clear();
        self.state.status = ConnectionStatus::Connecting;
        self.state.last_error = None;
        self.effects.push(Effect::CancelReconnect);
        self.effects.push(Effect::OpenTransport { epoch: self.epoch });
    }

    fn disconnect(&mut self) {
        self.wants_connection = false;
        self.epoch += 1;
        self.transport_open = false;
        self.rpc.clear_pending();
        self.request_threads.clear();
        self.summon = None;
        self.state.summoning = false;
        self.state.status = ConnectionStatus::Disconnected;
        self.state.clear_session();
        self.state.events.push("disconnect", "Disconnected by client");
        self.effects.push(Effect::CancelReconnect);
        self.effects.push(Effect::CancelRefresh);
        self.effects.push(Effect::CloseTransport);
    }

    fn on_transport_open(&mut self) {
        info!(epoch = self.epoch, "app-server socket open, initializing");
        self.transport_open = true;
        let params = json!({
            "clientInfo": {
                "name": self.settings.client_name,
                "title": "Codex Pilot",
                "version": self.settings.client_version,
            }
        });
        self.request(ClientMethod::Initialize, Some(params));
    }

    fn on_connection_lost(&mut self, reason: String) {
        warn!(%reason, "app-server connection lost");
        let dropped = self.rpc.clear_pending();
        if dropped > 0 {
            debug!(dropped, "discarding in-flight requests");
        }
        self.request_threads.clear();
        self.transport_open = false;
        if let Some(summon) = self.summon.as_mut() {
            summon.request_id = None;
        }
        self.state.status = ConnectionStatus::Disconnected;
        self.state.clear_session();
        self.state.events.push("disconnect", reason.clone());
        self.state.last_error = Some(reason);
        self.effects.push(Effect::CancelRefresh);
        if self.wants_connection {
            self.effects.push(Effect::ArmReconnect);
        }
    }

    fn on_message(&mut self, text: &str) {
        match self.rpc.classify(text) {
            Some(Inbound::Response { id, method, result }) => {
                let thread_id = self.request_threads.remove(&id);
                self.handle_response(id, method, thread_id, result);
            }
            Some(Inbound::Failure { id, method, error }) => {
                let thread_id = self.request_threads.remove(&id);
                self.handle_failure(id, method, thread_id, error);
            }
            Some(Inbound::ServerRequest {
                id,
                method,
                name,
                params,
            }) => self.handle_server_request(id, method, &name, params),
            Some(Inbound::Notification {
                method,
                name,
                params,
            }) => self.handle_notification(method, &name, params),
            None => {}
        }
    }

    /// Serialize and queue a request. `None` when the socket is not open or
    /// serialization failed.
    fn request(&mut self, method: ClientMethod, params: Option<Value>) -> Option<i64> {
        if !self.transport_open {
            debug!(method = method.as_str(), "not connected, request skipped");
            return None;
        }
        match self.rpc.call(method, params) {
            Ok(outgoing) => {
                self.effects.push(Effect::Send(outgoing.text));
                Some(outgoing.id)
            }
            Err(err) => {
                warn!(method = method.as_str(), error = %err, "failed to encode request");
                None
            }
        }
    }

    fn thread_request(&mut self, method: ClientMethod, thread_id: &str, params: Value) -> Option<i64> {
        let id = self.request(method, Some(params))?;
        self.request_threads.insert(id, thread_id.to_string());
        Some(id)
    }

    fn require_connected(&self, operation: &str) -> bool {
        if self.state.status.is_connected() {
            return true;
        }
        debug!(operation, "ignored while not connected");
        false
    }

    fn refresh(&mut self) {
        if !self.state.status.is_connected() {
            return;
        }
        self.request_thread_list();
        self.request(ClientMethod::ThreadLoadedList, Some(json!({})));
        self.request(ClientMethod::AccountRateLimitsRead, None);
    }

    fn request_thread_list(&mut self) {
        let params = json!({ "showArchived": self.settings.show_archived });
        self.request(ClientMethod::ThreadList, Some(params));
    }

    fn thread_start_params(&self) -> Value {
        match &self.settings.thread_cwd {
            Some(cwd) => json!({ "cwd": cwd }),
            None => json!({}),
        }
    }

    fn select_thread(&mut self, thread_id: String) {
        if !self.require_connected("select thread") {
            return;
        }
        let turn_active = self
            .state
            .thread(&thread_id)
            .is_some_and(|thread| thread.has_active_turn);
        self.state.detail = DetailState {
            thread_id: Some(thread_id.clone()),
            items: Vec::new(),
            loading: true,
            turn_active,
            streaming_item_id: None,
            mode: ContentMode::Thread,
        };
        self.thread_request(
            ClientMethod::ThreadResume,
            &thread_id,
            json!({ "threadId": thread_id }),
        );
    }

    fn send_prompt(&mut self, text: String) {
        let Some(thread_id) = self.state.detail.thread_id.clone() else {
            debug!("prompt ignored without a selected thread");
            return;
        };
        if text.trim().is_empty() || !self.require_connected("send prompt") {
            return;
        }

        self.local_items += 1;
        let turn_id = self
            .state
            .thread(&thread_id)
            .and_then(|thread| thread.active_turn_id.clone())
            .unwrap_or_default();
        let mut item = DisplayItem::new(
            format!("local-{}", self.local_items),
            turn_id,
            ItemKind::UserMessage,
        );
        item.text = text.clone();
        self.state.detail.items.push(item);
        self.state.detail.turn_active = true;

        self.thread_request(
            ClientMethod::TurnStart,
            &thread_id,
            json!({
                "threadId": thread_id,
                "input": [{ "type": "text", "text": text }],
            }),
        );
    }

    fn archive_thread(&mut self, thread_id: String) {
        if !self.require_connected("archive") {
            return;
        }
        self.mark_archived(&thread_id);
        if self
            .thread_request(
                ClientMethod::ThreadArchive,
                &thread_id,
                json!({ "threadId": thread_id }),
            )
            .is_some()
        {
            self.state.pending_archive.insert(thread_id);
        }
    }

    fn interrupt_thread(&mut self, thread_id: String) {
        if !self.require_connected("interrupt") {
            return;
        }
        let mut params = json!({ "threadId": thread_id });
        if let Some(turn_id) = self
            .state
            .thread(&thread_id)
            .and_then(|thread| thread.active_turn_id.clone())
        {
            params["turnId"] = Value::String(turn_id);
        }
        self.thread_request(ClientMethod::TurnInterrupt, &thread_id, params);
    }

    fn summon(&mut self, prompt: String) {
        let prompt = prompt.trim().to_string();
        if prompt.is_empty() {
            return;
        }
        if self.summon.is_some() {
            debug!("summon already pending");
            return;
        }
        self.summon = Some(PendingSummon {
            prompt,
            request_id: None,
        });
        self.state.summoning = true;
        self.issue_summon_start();
    }

    /// Send `thread/start` for a remembered summon, if connected and not
    /// already in flight.
    fn issue_summon_start(&mut self) {
        if !self.state.status.is_connected() {
            return;
        }
        if self
            .summon
            .as_ref()
            .is_none_or(|summon| summon.request_id.is_some())
        {
            return;
        }
        let params = self.thread_start_params();
        let request_id = self.request(ClientMethod::ThreadStart, Some(params));
        if let Some(summon) = self.summon.as_mut() {
            summon.request_id = request_id;
        }
    }

    /// Archive locally: flag, drop the persona, close the detail view.
    fn mark_archived(&mut self, thread_id: &str) {
        self.state.archived.insert(thread_id.to_string());
        if let Some(thread) = self.state.thread_mut(thread_id) {
            thread.archived = true;
        }
        self.state.personas.remove(thread_id);
        if self.state.detail.is_selected(thread_id) {
            self.state.detail = DetailState::default();
        }
    }

    fn schedule_decay(&mut self, thread_id: &str, generation: u64) {
        self.effects.push(Effect::ScheduleDecay {
            thread_id: thread_id.to_string(),
            generation,
        });
    }

    fn now() -> chrono::DateTime<Utc> {
        Utc::now()
    }
}
