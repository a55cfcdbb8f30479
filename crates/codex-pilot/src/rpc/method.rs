//! Method names spoken on the app-server wire.

/// Requests this client issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientMethod {
    Initialize,
    ThreadList,
    ThreadLoadedList,
    ThreadStart,
    ThreadResume,
    ThreadArchive,
    ThreadUnarchive,
    ThreadNameSet,
    TurnStart,
    TurnInterrupt,
    AccountRead,
    AccountRateLimitsRead,
}

impl ClientMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::ThreadList => "thread/list",
            Self::ThreadLoadedList => "thread/loaded/list",
            Self::ThreadStart => "thread/start",
            Self::ThreadResume => "thread/resume",
            Self::ThreadArchive => "thread/archive",
            Self::ThreadUnarchive => "thread/unarchive",
            Self::ThreadNameSet => "thread/name/set",
            Self::TurnStart => "turn/start",
            Self::TurnInterrupt => "turn/interrupt",
            Self::AccountRead => "account/read",
            Self::AccountRateLimitsRead => "account/rateLimits/read",
        }
    }
}

/// Methods the server sends, either as notifications or as server-initiated
/// requests. Unrecognized names are kept verbatim so they can still be logged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ServerMethod {
    ThreadStarted,
    ThreadStatusChanged,
    ThreadNameUpdated,
    ThreadTokenUsageUpdated,
    ThreadArchived,
    ThreadUnarchived,
    TurnStarted,
    TurnCompleted,
    ItemStarted,
    ItemCompleted,
    AgentMessageDelta,
    CommandOutputDelta,
    ReasoningDelta,
    CommandApproval,
    FileChangeApproval,
    UserInputRequest,
    RateLimitsUpdated,
    Error,
    Unknown(String),
}

impl ServerMethod {
    pub fn parse(method: &str) -> Self {
        match method {
            "thread/started" => Self::ThreadStarted,
            "thread/status/changed" => Self::ThreadStatusChanged,
            "thread/name/updated" => Self::ThreadNameUpdated,
            "thread/tokenUsage/updated" => Self::ThreadTokenUsageUpdated,
            "thread/archived" => Self::ThreadArchived,
            "thread/unarchived" => Self::ThreadUnarchived,
            "turn/started" => Self::TurnStarted,
            "turn/completed" => Self::TurnCompleted,
            "item/started" => Self::ItemStarted,
            "item/completed" => Self::ItemCompleted,
            "item/agentMessage/delta" => Self::AgentMessageDelta,
            "item/commandExecution/outputDelta" => Self::CommandOutputDelta,
            "item/reasoning/summaryTextDelta" | "item/reasoning/textDelta" => Self::ReasoningDelta,
            "item/commandExecution/requestApproval" | "commandExecution/requestApproval" => {
                Self::CommandApproval
            }
            "item/fileChange/requestApproval" | "fileChange/requestApproval" => {
                Self::FileChangeApproval
            }
            "item/tool/requestUserInput" | "tool/requestUserInput" => Self::UserInputRequest,
            "account/rateLimits/updated" => Self::RateLimitsUpdated,
            "error" => Self::Error,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn is_approval(&self) -> bool {
        matches!(
            self,
            Self::CommandApproval | Self::FileChangeApproval | Self::UserInputRequest
        )
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approval_methods_accept_both_prefixes() {
        assert_eq!(
            ServerMethod::parse("commandExecution/requestApproval"),
            ServerMethod::CommandApproval
        );
        assert_eq!(
            ServerMethod::parse("item/commandExecution/requestApproval"),
            ServerMethod::CommandApproval
        );
        assert_eq!(
            ServerMethod::parse("tool/requestUserInput"),
            ServerMethod::UserInputRequest
        );
        assert!(ServerMethod::parse("fileChange/requestApproval").is_approval());
    }

    #[test]
    fn unknown_methods_are_kept_verbatim() {
        let method = ServerMethod::parse("thread/compacted");
        assert_eq!(method, ServerMethod::Unknown("thread/compacted".to_string()));
        assert!(!method.is_recognized());
    }
}
