use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::PilotCore;
use crate::model::{ConnectionStatus, ContentMode, DetailState, Persona, PersonaMood};
use crate::parse::{
    self, ParseError, ResumedThread, parse_account, parse_loaded_ids, parse_rate_limits,
    parse_resumed_thread, parse_started_thread, parse_thread_list,
};
use crate::rpc::{ClientMethod, RpcFailure};

impl PilotCore {
    pub(super) fn handle_response(
        &mut self,
        id: i64,
        method: ClientMethod,
        thread_id: Option<String>,
        result: Value,
    ) {
        debug!(id, method = method.as_str(), "response");
        let outcome = match method {
            ClientMethod::Initialize => {
                self.on_initialized();
                Ok(())
            }
            ClientMethod::ThreadList => parse_thread_list(result).map(|threads| {
                self.state.replace_threads(threads);
            }),
            ClientMethod::ThreadLoadedList => parse_loaded_ids(result).map(|ids| {
                for thread in &mut self.state.threads {
                    thread.loaded = ids.contains(&thread.id);
                }
            }),
            ClientMethod::ThreadStart => self.on_thread_started(id, result),
            ClientMethod::ThreadResume => parse_resumed_thread(result).map(|resumed| {
                self.on_thread_resumed(resumed);
            }),
            ClientMethod::ThreadArchive => {
                if let Some(thread_id) = thread_id {
                    self.state.pending_archive.remove(&thread_id);
                    self.state
                        .events
                        .push(method.as_str(), format!("Archived {thread_id}"));
                }
                self.request_thread_list();
                Ok(())
            }
            ClientMethod::ThreadUnarchive => {
                let restored = result
                    .get("thread")
                    .cloned()
                    .map(parse::parse_thread)
                    .transpose();
                restored.map(|thread| {
                    let thread_id = thread
                        .as_ref()
                        .map(|thread| thread.id.clone())
                        .or(thread_id);
                    if let Some(thread_id) = thread_id {
                        self.state.archived.remove(&thread_id);
                        self.state
                            .events
                            .push(method.as_str(), format!("Unarchived {thread_id}"));
                    }
                    self.request_thread_list();
                })
            }
            ClientMethod::TurnStart => {
                let turn_id = result
                    .pointer("/turn/id")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                if let (Some(thread_id), Some(turn_id)) = (thread_id, turn_id) {
                    if let Some(thread) = self.state.thread_mut(&thread_id) {
                        thread.active_turn_id = Some(turn_id);
                    }
                }
                Ok(())
            }
            ClientMethod::ThreadNameSet | ClientMethod::TurnInterrupt => Ok(()),
            ClientMethod::AccountRead => parse_account(result).map(|account| {
                self.state.account = Some(account);
            }),
            ClientMethod::AccountRateLimitsRead => parse_rate_limits(result).map(|limits| {
                self.state.rate_limits = Some(limits);
            }),
        };

        if let Err(err) = outcome {
            debug!(method = method.as_str(), error = %err, "ignoring malformed response");
        }
    }

    pub(super) fn handle_failure(
        &mut self,
        id: i64,
        method: ClientMethod,
        thread_id: Option<String>,
        error: RpcFailure,
    ) {
        warn!(
            id,
            method = method.as_str(),
            code = error.code,
            message = %error.message,
            "app-server request failed"
        );
        let summary = format!("{}: {}", method.as_str(), error.message);
        self.state.events.push(method.as_str(), summary.clone());
        self.state.last_error = Some(summary);

        match method {
            ClientMethod::Initialize => self.abandon_handshake(),
            ClientMethod::ThreadResume => {
                if thread_id
                    .as_deref()
                    .is_some_and(|thread_id| self.state.detail.is_selected(thread_id))
                {
                    self.state.detail.loading = false;
                }
            }
            ClientMethod::TurnStart => {
                if let Some(thread_id) = thread_id.as_deref() {
                    if self.state.detail.is_selected(thread_id) {
                        self.state.detail.turn_active = false;
                    }
                    if let Some(thread) = self.state.thread_mut(thread_id) {
                        thread.has_active_turn = false;
                    }
                }
            }
            ClientMethod::ThreadStart => {
                if self
                    .summon
                    .as_ref()
                    .is_some_and(|summon| summon.request_id == Some(id))
                {
                    self.summon = None;
                    self.state.summoning = false;
                }
            }
            ClientMethod::ThreadArchive => {
                if let Some(thread_id) = thread_id {
                    self.state.pending_archive.remove(&thread_id);
                    self.state.archived.remove(&thread_id);
                    if let Some(thread) = self.state.thread_mut(&thread_id) {
                        thread.archived = false;
                    }
                    self.request_thread_list();
                }
            }
            _ => {}
        }
    }

    /// Rejected `initialize`: drop the socket and stay disconnected. The
    /// bumped epoch silences whatever the old socket still delivers, so no
    /// reconnect is armed until the next explicit connect.
    fn abandon_handshake(&mut self) {
        self.epoch += 1;
        self.transport_open = false;
        self.rpc.clear_pending();
        self.request_threads.clear();
        self.state.status = ConnectionStatus::Disconnected;
        self.state.clear_session();
        self.effects.push(super::Effect::CloseTransport);
    }

    fn on_initialized(&mut self) {
        info!("app-server session initialized");
        self.state.status = ConnectionStatus::Connected;
        self.state.last_error = None;
        self.state.events.push("initialize", "Connected");

        self.request_thread_list();
        self.request(ClientMethod::ThreadLoadedList, Some(json!({})));
        self.request(ClientMethod::AccountRead, None);
        self.request(ClientMethod::AccountRateLimitsRead, None);
        self.effects.push(super::Effect::ArmRefresh);

        self.issue_summon_start();
    }

    fn on_thread_started(&mut self, id: i64, result: Value) -> Result<(), ParseError> {
        let started = parse_started_thread(result)?;
        let thread = started.thread;
        let thread_id = thread.id.clone();
        self.state.insert_thread(thread);

        let summon = match self.summon.take() {
            Some(summon) if summon.request_id == Some(id) => summon,
            other => {
                self.summon = other;
                self.select_thread(thread_id);
                return Ok(());
            }
        };
        self.state.summoning = false;

        let now = Self::now();
        let identity = self.state.personas.identity(&thread_id);
        let name = identity.name.clone();
        let model = self.state.thread(&thread_id).and_then(|thread| thread.model.clone());
        self.state.personas.insert(Persona {
            thread_id: thread_id.clone(),
            identity,
            thread_name: name.clone(),
            mood: PersonaMood::Thinking,
            preview: String::new(),
            last_activity: now,
            token_count: None,
            summoned: true,
            model,
            generation: 0,
        });
        if let Some(thread) = self.state.thread_mut(&thread_id) {
            thread.name = Some(name.clone());
            thread.has_active_turn = true;
        }
        self.state
            .events
            .push("thread/start", format!("Summoned {name}"));

        self.thread_request(
            ClientMethod::ThreadNameSet,
            &thread_id,
            json!({ "threadId": thread_id, "name": name }),
        );
        self.thread_request(
            ClientMethod::TurnStart,
            &thread_id,
            json!({
                "threadId": thread_id,
                "input": [{ "type": "text", "text": summon.prompt }],
                "effort": "low",
            }),
        );
        Ok(())
    }

    fn on_thread_resumed(&mut self, resumed: ResumedThread) {
        if !self.state.detail.is_selected(&resumed.thread_id) {
            debug!(thread_id = %resumed.thread_id, "resume for a thread no longer selected");
            return;
        }
        let turn_active = self.state.detail.turn_active;
        self.state.detail = DetailState {
            thread_id: Some(resumed.thread_id.clone()),
            items: resumed.items,
            loading: false,
            turn_active,
            streaming_item_id: None,
            mode: ContentMode::Thread,
        };
        if let Some(thread) = self.state.thread_mut(&resumed.thread_id) {
            thread.loaded = true;
            if thread.name.is_none() {
                thread.name = resumed.name;
            }
        }
    }
}
