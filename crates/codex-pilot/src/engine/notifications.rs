use serde_json::Value;
use tracing::{debug, warn};

use super::PilotCore;
use crate::model::{DisplayItem, PersonaMood};
use crate::parse::{
    self, ParseResult, parse_approval, parse_delta, parse_error_notice, parse_item_event,
    parse_name_updated, parse_rate_limits, parse_started_thread, parse_status_changed,
    parse_token_usage, parse_turn_event,
};
use crate::persona::mood_for_status;
use crate::rpc::{RequestId, ServerMethod, auto_reply};

impl PilotCore {
    pub(super) fn handle_server_request(
        &mut self,
        id: RequestId,
        method: ServerMethod,
        name: &str,
        params: Option<Value>,
    ) {
        let reply = auto_reply(&method, params.as_ref());
        match self.rpc.reply(&id, &reply) {
            Ok(text) if self.transport_open => self.effects.push(super::Effect::Send(text)),
            Ok(_) => debug!(method = name, "socket closed before auto-reply"),
            Err(err) => warn!(method = name, error = %err, "failed to encode auto-reply"),
        }

        let request = parse_approval(params.as_ref());
        let summary = match (&method, request.detail.as_deref()) {
            (ServerMethod::UserInputRequest, _) => "Auto-answered user input".to_string(),
            (_, Some(detail)) if method.is_approval() => format!("Auto-approved: {detail}"),
            _ if method.is_approval() => "Auto-approved".to_string(),
            _ => format!("Auto-replied to {name}"),
        };
        self.state.events.push(name, summary);

        if method.is_approval() {
            if let Some(thread_id) = request.thread_id.as_deref() {
                self.state
                    .personas
                    .set_mood(thread_id, PersonaMood::Waiting, Self::now());
            }
        }
    }

    pub(super) fn handle_notification(
        &mut self,
        method: ServerMethod,
        name: &str,
        params: Option<Value>,
    ) {
        if !matches!(
            method,
            ServerMethod::AgentMessageDelta
                | ServerMethod::CommandOutputDelta
                | ServerMethod::ReasoningDelta
        ) {
            self.state.events.push(name, summarize(&method, params.as_ref()));
        }

        let outcome = match method {
            ServerMethod::ThreadStarted => self.on_thread_started_notice(params),
            ServerMethod::ThreadStatusChanged => self.on_status_changed(params),
            ServerMethod::ThreadNameUpdated => parse_name_updated(params).map(|update| {
                let name = update.name.clone();
                if let Some(thread) = self.state.thread_mut(&update.thread_id) {
                    thread.name = name;
                }
                let display = self.state.thread_name(&update.thread_id);
                self.state.personas.update(&update.thread_id, |persona| {
                    persona.thread_name = display;
                });
            }),
            ServerMethod::ThreadTokenUsageUpdated => parse_token_usage(params).map(|usage| {
                if let Some(thread) = self.state.thread_mut(&usage.thread_id) {
                    thread.token_count = Some(usage.total_tokens);
                }
                self.state.personas.update(&usage.thread_id, |persona| {
                    persona.token_count = Some(usage.total_tokens);
                });
            }),
            ServerMethod::ThreadArchived => self.on_archive_notice(params, true),
            ServerMethod::ThreadUnarchived => self.on_archive_notice(params, false),
            ServerMethod::TurnStarted => self.on_turn_started(params),
            ServerMethod::TurnCompleted => self.on_turn_completed(params),
            ServerMethod::ItemStarted => self.on_item(params, true),
            ServerMethod::ItemCompleted => self.on_item(params, false),
            ServerMethod::AgentMessageDelta | ServerMethod::CommandOutputDelta => {
                self.on_delta(params, PersonaMood::Working, true)
            }
            ServerMethod::ReasoningDelta => self.on_delta(params, PersonaMood::Thinking, false),
            ServerMethod::CommandApproval
            | ServerMethod::FileChangeApproval
            | ServerMethod::UserInputRequest => {
                // Without an id there is nothing to reply to.
                if let Some(thread_id) = parse_approval(params.as_ref()).thread_id {
                    self.state
                        .personas
                        .set_mood(&thread_id, PersonaMood::Waiting, Self::now());
                }
                Ok(())
            }
            ServerMethod::RateLimitsUpdated => parse_rate_limits(params.unwrap_or(Value::Null))
                .map(|limits| {
                    self.state.rate_limits = Some(limits);
                }),
            ServerMethod::Error => parse_error_notice(params).map(|notice| {
                warn!(message = %notice.message, "app-server error notification");
                if let Some(thread_id) = notice.thread_id.as_deref() {
                    self.state
                        .personas
                        .set_mood(thread_id, PersonaMood::Error, Self::now());
                }
                self.state.last_error = Some(notice.message);
            }),
            ServerMethod::Unknown(_) => Ok(()),
        };

        if let Err(err) = outcome {
            debug!(method = name, error = %err, "ignoring malformed notification");
        }
    }

    /// Persona for a thread that is referenced by a live event, created on
    /// first sight. Never for archived threads.
    fn touch_persona(&mut self, thread_id: &str) -> bool {
        if self.state.is_archived(thread_id) {
            return false;
        }
        let name = self.state.thread_name(thread_id);
        self.state.personas.ensure(thread_id, &name, Self::now());
        true
    }

    fn on_thread_started_notice(&mut self, params: Option<Value>) -> ParseResult<()> {
        let started = parse_started_thread(params.unwrap_or(Value::Null))?;
        let thread_id = started.thread.id.clone();
        let archived = started.thread.archived;
        self.state.insert_thread(started.thread);
        if !archived {
            self.touch_persona(&thread_id);
        }
        Ok(())
    }

    fn on_status_changed(&mut self, params: Option<Value>) -> ParseResult<()> {
        let change = parse_status_changed(params)?;
        if let Some(thread) = self.state.thread_mut(&change.thread_id) {
            thread.status.clone_from(&change.status);
        }
        if self.touch_persona(&change.thread_id) {
            self.state.personas.set_mood(
                &change.thread_id,
                mood_for_status(&change.status),
                Self::now(),
            );
        }
        Ok(())
    }

    fn on_archive_notice(&mut self, params: Option<Value>, archived: bool) -> ParseResult<()> {
        let thread_id = params
            .as_ref()
            .and_then(parse::thread_id_of)
            .ok_or(parse::ParseError::MissingField("threadId"))?;
        let known = self.state.is_archived(&thread_id);
        if archived {
            self.mark_archived(&thread_id);
        } else {
            self.state.archived.remove(&thread_id);
            if let Some(thread) = self.state.thread_mut(&thread_id) {
                thread.archived = false;
            }
        }
        if known != archived {
            self.request_thread_list();
        }
        Ok(())
    }

    fn on_turn_started(&mut self, params: Option<Value>) -> ParseResult<()> {
        let turn = parse_turn_event(params)?;
        if let Some(thread) = self.state.thread_mut(&turn.thread_id) {
            thread.has_active_turn = true;
            if turn.turn_id.is_some() {
                thread.active_turn_id.clone_from(&turn.turn_id);
            }
        }
        if self.state.detail.is_selected(&turn.thread_id) {
            self.state.detail.turn_active = true;
        }
        if self.touch_persona(&turn.thread_id) {
            self.state
                .personas
                .set_mood(&turn.thread_id, PersonaMood::Thinking, Self::now());
        }
        Ok(())
    }

    fn on_turn_completed(&mut self, params: Option<Value>) -> ParseResult<()> {
        let turn = parse_turn_event(params)?;
        if let Some(thread) = self.state.thread_mut(&turn.thread_id) {
            thread.has_active_turn = false;
            thread.active_turn_id = None;
        }
        if self.state.detail.is_selected(&turn.thread_id) {
            self.state.detail.turn_active = false;
            self.state.detail.streaming_item_id = None;
        }
        if self.touch_persona(&turn.thread_id) {
            if let Some(generation) =
                self.state
                    .personas
                    .set_mood(&turn.thread_id, PersonaMood::Done, Self::now())
            {
                self.schedule_decay(&turn.thread_id, generation);
            }
        }
        Ok(())
    }

    fn on_item(&mut self, params: Option<Value>, started: bool) -> ParseResult<()> {
        let event = parse_item_event(params)?;
        if !self.state.detail.is_selected(&event.thread_id) {
            return Ok(());
        }
        let item_id = event.item.id.clone();
        upsert_item(&mut self.state.detail.items, event.item);
        let detail = &mut self.state.detail;
        if started {
            detail.streaming_item_id = Some(item_id);
        } else if detail.streaming_item_id.as_deref() == Some(item_id.as_str()) {
            detail.streaming_item_id = None;
        }
        Ok(())
    }

    fn on_delta(
        &mut self,
        params: Option<Value>,
        mood: PersonaMood,
        preview: bool,
    ) -> ParseResult<()> {
        let delta = parse_delta(params)?;
        if self.state.detail.is_selected(&delta.thread_id) {
            if let Some(item) = self.state.detail.item_mut(&delta.item_id) {
                item.text.push_str(&delta.delta);
            }
        }
        if self.touch_persona(&delta.thread_id) {
            let now = Self::now();
            if preview {
                self.state
                    .personas
                    .append_preview(&delta.thread_id, &delta.delta, now);
            }
            self.state.personas.set_mood(&delta.thread_id, mood, now);
        }
        Ok(())
    }
}

/// Replace by id, or append.
fn upsert_item(items: &mut Vec<DisplayItem>, item: DisplayItem) {
    match items.iter_mut().find(|existing| existing.id == item.id) {
        Some(existing) => *existing = item,
        None => items.push(item),
    }
}

fn summarize(method: &ServerMethod, params: Option<&Value>) -> String {
    let thread_id = params.and_then(parse::thread_id_of);
    let thread = thread_id.as_deref().unwrap_or("-");
    match method {
        ServerMethod::ThreadStatusChanged => {
            let status = params
                .and_then(|params| params.get("status"))
                .and_then(|status| status.get("type").or(Some(status)))
                .and_then(Value::as_str)
                .unwrap_or("?");
            format!("{thread} is {status}")
        }
        ServerMethod::ThreadNameUpdated => {
            let name = params
                .and_then(|params| params.get("threadName"))
                .and_then(Value::as_str)
                .unwrap_or("");
            format!("{thread} renamed to {name}")
        }
        ServerMethod::ItemStarted | ServerMethod::ItemCompleted => {
            let kind = params
                .and_then(|params| params.pointer("/item/type"))
                .and_then(Value::as_str)
                .unwrap_or("item");
            format!("{thread}: {kind}")
        }
        ServerMethod::RateLimitsUpdated => {
            let used = params
                .and_then(|params| params.pointer("/rateLimits/primary/usedPercent"))
                .and_then(Value::as_f64)
                .map(|used| format!("{used:.0}% used"))
                .unwrap_or_else(|| "updated".to_string());
            format!("Rate limits {used}")
        }
        ServerMethod::Error => params
            .and_then(|params| params.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("error")
            .to_string(),
        ServerMethod::Unknown(_) => params
            .map(Value::to_string)
            .unwrap_or_default(),
        _ => thread.to_string(),
    }
}
