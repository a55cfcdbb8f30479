//! Per-message parsing. Each function turns one response result or
//! notification params object into a typed value, or a [`ParseError`] that
//! the caller logs and drops.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::model::{AccountSnapshot, DisplayItem, ItemKind, RateLimitSnapshot, Thread};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("message has no params")]
    MissingParams,

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("unexpected shape: {0}")]
    Shape(#[from] serde_json::Error),
}

pub type ParseResult<T> = std::result::Result<T, ParseError>;

#[derive(Deserialize)]
#[serde(untagged)]
enum WireStatus {
    Tagged {
        #[serde(rename = "type")]
        kind: String,
    },
    Plain(String),
}

impl WireStatus {
    fn into_tag(self) -> String {
        match self {
            Self::Tagged { kind } | Self::Plain(kind) => kind,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireThread {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    preview: Option<String>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    archived: Option<bool>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    model_provider: Option<String>,
    #[serde(default)]
    created_at: Option<i64>,
    #[serde(default)]
    status: Option<WireStatus>,
}

impl From<WireThread> for Thread {
    fn from(wire: WireThread) -> Self {
        let mut thread = Thread::new(wire.id);
        thread.name = wire.name.filter(|name| !name.trim().is_empty());
        thread.preview = wire.preview.unwrap_or_default();
        thread.cwd = wire.cwd;
        thread.archived = wire.archived.unwrap_or(false);
        thread.model = wire.model.or(wire.model_provider);
        thread.created_at = wire.created_at.and_then(timestamp);
        if let Some(status) = wire.status {
            thread.status = status.into_tag();
        }
        thread
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireItem {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    content: Option<Vec<Value>>,
    #[serde(default)]
    command: Option<Value>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    exit_code: Option<i64>,
    #[serde(default)]
    aggregated_output: Option<String>,
    #[serde(default)]
    changes: Option<Vec<Value>>,
    #[serde(default)]
    summary: Option<Vec<Value>>,
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    query: Option<String>,
}

impl WireItem {
    fn into_item(self, turn_id: &str) -> DisplayItem {
        let kind = ItemKind::from_tag(&self.kind);
        let mut item = DisplayItem::new(self.id, turn_id, kind);
        item.status = self.status;
        item.exit_code = self.exit_code;
        item.command = self.command.as_ref().and_then(command_text);
        item.files = self
            .changes
            .unwrap_or_default()
            .iter()
            .filter_map(|change| change.get("path").and_then(Value::as_str))
            .map(str::to_string)
            .collect();

        item.text = match &item.kind {
            ItemKind::UserMessage => {
                let joined = join_text(self.content.as_deref().unwrap_or_default());
                if joined.is_empty() {
                    self.text.unwrap_or_default()
                } else {
                    joined
                }
            }
            ItemKind::CommandExecution => self.aggregated_output.or(self.text).unwrap_or_default(),
            ItemKind::Reasoning => {
                let joined = join_text(self.summary.as_deref().unwrap_or_default());
                if joined.is_empty() {
                    self.text.unwrap_or_default()
                } else {
                    joined
                }
            }
            ItemKind::ToolCall => self.text.or(self.tool).or(self.query).unwrap_or_default(),
            _ => self.text.unwrap_or_default(),
        };
        item
    }
}

/// Text fragments as plain strings or `{type:"text", text}` objects, one per line.
fn join_text(parts: &[Value]) -> String {
    parts
        .iter()
        .filter_map(|part| match part {
            Value::String(text) => Some(text.as_str()),
            Value::Object(_) => part.get("text").and_then(Value::as_str),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn command_text(value: &Value) -> Option<String> {
    match value {
        Value::String(command) => Some(command.clone()),
        Value::Array(parts) => Some(
            parts
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(" "),
        ),
        Value::Object(_) => value.get("command").and_then(command_text),
        _ => None,
    }
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

fn require(params: Option<Value>) -> ParseResult<Value> {
    params.ok_or(ParseError::MissingParams)
}

fn string_field(value: &Value, field: &'static str) -> ParseResult<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(ParseError::MissingField(field))
}

/// `threadId`, `thread_id`, or `thread.id`.
pub fn thread_id_of(params: &Value) -> Option<String> {
    params
        .get("threadId")
        .or_else(|| params.get("thread_id"))
        .or_else(|| params.get("thread").and_then(|thread| thread.get("id")))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn required_thread_id(params: &Value) -> ParseResult<String> {
    thread_id_of(params).ok_or(ParseError::MissingField("threadId"))
}

pub fn parse_thread(value: Value) -> ParseResult<Thread> {
    let wire: WireThread = serde_json::from_value(value)?;
    Ok(wire.into())
}

/// `thread/list` result: `{data: [thread], nextCursor}`. Entries that fail to
/// parse are skipped.
pub fn parse_thread_list(result: Value) -> ParseResult<Vec<Thread>> {
    let Some(Value::Array(entries)) = result.get("data").cloned() else {
        return Err(ParseError::MissingField("data"));
    };
    Ok(entries
        .into_iter()
        .filter_map(|entry| match parse_thread(entry) {
            Ok(thread) => Some(thread),
            Err(err) => {
                tracing::debug!(error = %err, "skipping malformed thread entry");
                None
            }
        })
        .collect())
}

/// `thread/loaded/list` result: `{data: [{id}]}` or `{data: ["id"]}`.
pub fn parse_loaded_ids(result: Value) -> ParseResult<Vec<String>> {
    let Some(Value::Array(entries)) = result.get("data") else {
        return Err(ParseError::MissingField("data"));
    };
    Ok(entries
        .iter()
        .filter_map(|entry| match entry {
            Value::String(id) => Some(id.clone()),
            _ => entry.get("id").and_then(Value::as_str).map(str::to_string),
        })
        .collect())
}

pub fn parse_item(value: Value, turn_id: &str) -> ParseResult<DisplayItem> {
    let wire: WireItem = serde_json::from_value(value)?;
    Ok(wire.into_item(turn_id))
}

#[derive(Debug, Clone, PartialEq)]
pub struct StartedThread {
    pub thread: Thread,
}

/// `thread/start` result `{thread, model}` or `thread/started` params `{thread}`.
pub fn parse_started_thread(value: Value) -> ParseResult<StartedThread> {
    let model = value.get("model").and_then(Value::as_str).map(str::to_string);
    let raw = value
        .get("thread")
        .cloned()
        .ok_or(ParseError::MissingField("thread"))?;
    let mut thread = parse_thread(raw)?;
    if model.is_some() {
        thread.model = model;
    }
    Ok(StartedThread { thread })
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResumedThread {
    pub thread_id: String,
    pub name: Option<String>,
    pub items: Vec<DisplayItem>,
}

/// `thread/resume` result: every turn's items flattened in server order.
pub fn parse_resumed_thread(result: Value) -> ParseResult<ResumedThread> {
    let thread = result
        .get("thread")
        .ok_or(ParseError::MissingField("thread"))?;
    let thread_id = string_field(thread, "id")?;
    let name = thread
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string);

    let mut items = Vec::new();
    for turn in thread
        .get("turns")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
    {
        let turn_id = turn.get("id").and_then(Value::as_str).unwrap_or_default();
        for raw in turn
            .get("items")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
        {
            match parse_item(raw.clone(), turn_id) {
                Ok(item) => items.push(item),
                Err(err) => tracing::debug!(error = %err, "skipping malformed item"),
            }
        }
    }

    Ok(ResumedThread {
        thread_id,
        name,
        items,
    })
}

pub fn parse_account(result: Value) -> ParseResult<AccountSnapshot> {
    let account = result
        .get("account")
        .filter(|account| account.is_object())
        .ok_or(ParseError::MissingField("account"))?;
    let field = |name: &str| account.get(name).and_then(Value::as_str).map(str::to_string);
    Ok(AccountSnapshot {
        account_type: field("type"),
        email: field("email"),
        plan_type: field("planType"),
    })
}

/// `{rateLimits: {...}}`, from either the read response or the update notification.
pub fn parse_rate_limits(value: Value) -> ParseResult<RateLimitSnapshot> {
    let limits = value
        .get("rateLimits")
        .filter(|limits| limits.is_object())
        .ok_or(ParseError::MissingField("rateLimits"))?;
    let primary = limits.get("primary");
    let text = |value: Option<&Value>, name: &str| {
        value
            .and_then(|value| value.get(name))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    Ok(RateLimitSnapshot {
        limit_name: text(Some(limits), "limitName"),
        plan_type: text(Some(limits), "planType"),
        used_percent: primary
            .and_then(|primary| primary.get("usedPercent"))
            .and_then(Value::as_f64),
        window_duration_mins: primary
            .and_then(|primary| primary.get("windowDurationMins"))
            .and_then(Value::as_u64),
        resets_at: primary
            .and_then(|primary| primary.get("resetsAt"))
            .and_then(Value::as_i64)
            .and_then(timestamp),
        credits_balance: limits
            .get("credits")
            .and_then(|credits| credits.get("balance"))
            .and_then(|balance| match balance {
                Value::String(text) => Some(text.clone()),
                Value::Number(number) => Some(number.to_string()),
                _ => None,
            }),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub thread_id: String,
    pub status: String,
}

pub fn parse_status_changed(params: Option<Value>) -> ParseResult<StatusChange> {
    let params = require(params)?;
    let thread_id = required_thread_id(&params)?;
    let status = params
        .get("status")
        .cloned()
        .ok_or(ParseError::MissingField("status"))?;
    let status: WireStatus = serde_json::from_value(status)?;
    Ok(StatusChange {
        thread_id,
        status: status.into_tag(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameUpdate {
    pub thread_id: String,
    pub name: Option<String>,
}

pub fn parse_name_updated(params: Option<Value>) -> ParseResult<NameUpdate> {
    let params = require(params)?;
    let thread_id = required_thread_id(&params)?;
    let name = params
        .get("threadName")
        .or_else(|| params.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(NameUpdate { thread_id, name })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenUsage {
    pub thread_id: String,
    pub total_tokens: u64,
}

pub fn parse_token_usage(params: Option<Value>) -> ParseResult<TokenUsage> {
    let params = require(params)?;
    let thread_id = required_thread_id(&params)?;
    let total_tokens = params
        .pointer("/tokenUsage/total/totalTokens")
        .or_else(|| params.pointer("/tokenUsage/totalTokens"))
        .and_then(Value::as_u64)
        .ok_or(ParseError::MissingField("tokenUsage"))?;
    Ok(TokenUsage {
        thread_id,
        total_tokens,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnEvent {
    pub thread_id: String,
    pub turn_id: Option<String>,
}

pub fn parse_turn_event(params: Option<Value>) -> ParseResult<TurnEvent> {
    let params = require(params)?;
    let thread_id = required_thread_id(&params)?;
    let turn_id = params
        .pointer("/turn/id")
        .or_else(|| params.get("turnId"))
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(TurnEvent { thread_id, turn_id })
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemEvent {
    pub thread_id: String,
    pub item: DisplayItem,
}

/// `item/started` and `item/completed` params `{threadId, turnId, item}`.
pub fn parse_item_event(params: Option<Value>) -> ParseResult<ItemEvent> {
    let mut params = require(params)?;
    let thread_id = required_thread_id(&params)?;
    let turn_id = params
        .get("turnId")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let raw = params
        .get_mut("item")
        .map(Value::take)
        .ok_or(ParseError::MissingField("item"))?;
    let item = parse_item(raw, &turn_id)?;
    Ok(ItemEvent { thread_id, item })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    pub thread_id: String,
    pub item_id: String,
    pub delta: String,
}

pub fn parse_delta(params: Option<Value>) -> ParseResult<Delta> {
    let params = require(params)?;
    Ok(Delta {
        thread_id: required_thread_id(&params)?,
        item_id: string_field(&params, "itemId")?,
        delta: string_field(&params, "delta")?,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRequest {
    pub thread_id: Option<String>,
    pub detail: Option<String>,
}

/// Params of a server-initiated approval or user-input request. Both fields
/// are optional so a reply is always sent.
pub fn parse_approval(params: Option<&Value>) -> ApprovalRequest {
    let Some(params) = params else {
        return ApprovalRequest {
            thread_id: None,
            detail: None,
        };
    };
    let detail = params
        .get("command")
        .and_then(command_text)
        .or_else(|| {
            params
                .get("changes")
                .and_then(Value::as_array)
                .map(|changes| format!("{} file(s)", changes.len()))
        })
        .or_else(|| params.get("reason").and_then(Value::as_str).map(str::to_string));
    ApprovalRequest {
        thread_id: thread_id_of(params),
        detail,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorNotice {
    pub thread_id: Option<String>,
    pub message: String,
}

pub fn parse_error_notice(params: Option<Value>) -> ParseResult<ErrorNotice> {
    let params = require(params)?;
    let message = params
        .get("message")
        .or_else(|| params.pointer("/error/message"))
        .and_then(Value::as_str)
        .ok_or(ParseError::MissingField("message"))?
        .to_string();
    Ok(ErrorNotice {
        thread_id: thread_id_of(&params),
        message,
    })
}
