//! Client-side projection types. Everything here is plain data; mutation
//! happens in [`crate::engine`].

use chrono::{DateTime, Utc};
use serde::Serialize;

pub const DEFAULT_THREAD_NAME: &str = "New thread";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionStatus {
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }

    pub fn is_connecting(self) -> bool {
        self == Self::Connecting
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: String,
    pub name: Option<String>,
    pub preview: String,
    /// Raw server status tag (`idle`, `active`, `notLoaded`, ...).
    pub status: String,
    pub archived: bool,
    pub model: Option<String>,
    pub token_count: Option<u64>,
    pub cwd: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub has_active_turn: bool,
    pub active_turn_id: Option<String>,
    pub loaded: bool,
}

impl Thread {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            preview: String::new(),
            status: "idle".to_string(),
            archived: false,
            model: None,
            token_count: None,
            cwd: None,
            created_at: None,
            has_active_turn: false,
            active_turn_id: None,
            loaded: false,
        }
    }

    /// Name, else preview, else a placeholder.
    pub fn display_name(&self) -> &str {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ if !self.preview.trim().is_empty() => self.preview.trim(),
            _ => DEFAULT_THREAD_NAME,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemKind {
    UserMessage,
    AgentMessage,
    CommandExecution,
    FileChange,
    Reasoning,
    Plan,
    ToolCall,
    ContextCompaction,
    /// Unrecognized type tag, kept for a generic rendering.
    Other(String),
}

impl ItemKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "userMessage" => Self::UserMessage,
            "agentMessage" => Self::AgentMessage,
            "commandExecution" => Self::CommandExecution,
            "fileChange" => Self::FileChange,
            "reasoning" => Self::Reasoning,
            "plan" => Self::Plan,
            "mcpToolCall" | "toolCall" | "dynamicToolCall" | "webSearch" => Self::ToolCall,
            "contextCompaction" => Self::ContextCompaction,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::UserMessage => "user",
            Self::AgentMessage => "agent",
            Self::CommandExecution => "command",
            Self::FileChange => "files",
            Self::Reasoning => "reasoning",
            Self::Plan => "plan",
            Self::ToolCall => "tool",
            Self::ContextCompaction => "compaction",
            Self::Other(tag) => tag,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayItem {
    pub id: String,
    pub turn_id: String,
    pub kind: ItemKind,
    pub text: String,
    pub status: Option<String>,
    pub command: Option<String>,
    pub files: Vec<String>,
    pub exit_code: Option<i64>,
}

impl DisplayItem {
    pub fn new(id: impl Into<String>, turn_id: impl Into<String>, kind: ItemKind) -> Self {
        Self {
            id: id.into(),
            turn_id: turn_id.into(),
            kind,
            text: String::new(),
            status: None,
            command: None,
            files: Vec::new(),
            exit_code: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PersonaMood {
    Sleeping,
    #[default]
    Idle,
    Thinking,
    Working,
    Waiting,
    Done,
    Error,
}

impl PersonaMood {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sleeping => "sleeping",
            Self::Idle => "idle",
            Self::Thinking => "thinking",
            Self::Working => "working",
            Self::Waiting => "waiting",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    pub fn is_busy(self) -> bool {
        matches!(self, Self::Thinking | Self::Working | Self::Waiting)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersonaIdentity {
    pub name: String,
    pub icon: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    pub thread_id: String,
    pub identity: PersonaIdentity,
    pub thread_name: String,
    pub mood: PersonaMood,
    pub preview: String,
    pub last_activity: DateTime<Utc>,
    pub token_count: Option<u64>,
    pub summoned: bool,
    pub model: Option<String>,
    /// Bumped on every mood change; a pending decay only applies if it still matches.
    #[serde(skip)]
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerEvent {
    pub at: DateTime<Utc>,
    pub method: String,
    pub summary: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitSnapshot {
    pub limit_name: Option<String>,
    pub plan_type: Option<String>,
    pub used_percent: Option<f64>,
    pub window_duration_mins: Option<u64>,
    pub resets_at: Option<DateTime<Utc>>,
    pub credits_balance: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSnapshot {
    pub account_type: Option<String>,
    pub email: Option<String>,
    pub plan_type: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentMode {
    #[default]
    Empty,
    Thread,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailState {
    pub thread_id: Option<String>,
    pub items: Vec<DisplayItem>,
    pub loading: bool,
    pub turn_active: bool,
    pub streaming_item_id: Option<String>,
    pub mode: ContentMode,
}

/// Items of one turn, borrowed from [`DetailState::items`].
#[derive(Debug, PartialEq)]
pub struct TurnGroup<'a> {
    pub turn_id: &'a str,
    pub items: Vec<&'a DisplayItem>,
}

impl DetailState {
    pub fn is_selected(&self, thread_id: &str) -> bool {
        self.thread_id.as_deref() == Some(thread_id)
    }

    pub fn item_mut(&mut self, item_id: &str) -> Option<&mut DisplayItem> {
        self.items.iter_mut().find(|item| item.id == item_id)
    }

    /// Group items by turn id, turns ordered by first appearance.
    pub fn turns(&self) -> Vec<TurnGroup<'_>> {
        let mut groups: Vec<TurnGroup<'_>> = Vec::new();
        for item in &self.items {
            match groups.iter_mut().find(|group| group.turn_id == item.turn_id) {
                Some(group) => group.items.push(item),
                None => groups.push(TurnGroup {
                    turn_id: &item.turn_id,
                    items: vec![item],
                }),
            }
        }
        groups
    }
}

/// Read-only view handed to the presentation layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub status: ConnectionStatus,
    pub last_error: Option<String>,
    pub threads: Vec<Thread>,
    pub detail: DetailState,
    pub personas: Vec<Persona>,
    pub events: Vec<ServerEvent>,
    pub rate_limits: Option<RateLimitSnapshot>,
    pub account: Option<AccountSnapshot>,
    pub summoning: bool,
}

impl Snapshot {
    pub fn thread(&self, thread_id: &str) -> Option<&Thread> {
        self.threads.iter().find(|thread| thread.id == thread_id)
    }

    pub fn persona(&self, thread_id: &str) -> Option<&Persona> {
        self.personas
            .iter()
            .find(|persona| persona.thread_id == thread_id)
    }
}
