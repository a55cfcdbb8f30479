//! JSON-RPC session over the frame transport.
//!
//! Owns id allocation and the pending table, and sorts every inbound message
//! into a response, a server-initiated request or a notification.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use super::method::{ClientMethod, ServerMethod};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Integer(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcFailure {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Success response to one of our requests.
    Response {
        id: i64,
        method: ClientMethod,
        result: Value,
    },
    /// Error response to one of our requests.
    Failure {
        id: i64,
        method: ClientMethod,
        error: RpcFailure,
    },
    /// Server-initiated request; exactly one reply is owed.
    ServerRequest {
        id: RequestId,
        method: ServerMethod,
        name: String,
        params: Option<Value>,
    },
    Notification {
        method: ServerMethod,
        name: String,
        params: Option<Value>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingRequest {
    pub id: i64,
    pub text: String,
}

#[derive(Debug)]
pub struct RpcSession {
    next_id: i64,
    pending: HashMap<i64, ClientMethod>,
}

impl Default for RpcSession {
    fn default() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
        }
    }
}

impl RpcSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id, record it as pending and serialize the request.
    /// The id is in the pending table before the caller can send the text.
    pub fn call(&mut self, method: ClientMethod, params: Option<Value>) -> Result<OutgoingRequest> {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert(id, method);

        let mut request = Map::new();
        request.insert("id".to_string(), Value::from(id));
        request.insert("method".to_string(), Value::from(method.as_str()));
        if let Some(params) = params {
            request.insert("params".to_string(), params);
        }

        match serde_json::to_string(&Value::Object(request)) {
            Ok(text) => Ok(OutgoingRequest { id, text }),
            Err(err) => {
                self.pending.remove(&id);
                Err(err.into())
            }
        }
    }

    pub fn reply(&self, id: &RequestId, result: &Value) -> Result<String> {
        let response = json!({
            "id": id,
            "result": result,
        });
        Ok(serde_json::to_string(&response)?)
    }

    pub fn classify(&mut self, raw: &str) -> Option<Inbound> {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(err) => {
                debug!(error = %err, "dropping unparseable app-server message");
                return None;
            }
        };
        let Value::Object(mut object) = value else {
            debug!("dropping non-object app-server message");
            return None;
        };

        let params = object.remove("params");
        let id_value = object.remove("id").filter(|id| !id.is_null());

        if let Some(name) = object.get("method").and_then(Value::as_str) {
            let name = name.to_string();
            let method = ServerMethod::parse(&name);
            return match id_value {
                Some(id_value) => match serde_json::from_value::<RequestId>(id_value) {
                    Ok(id) => Some(Inbound::ServerRequest {
                        id,
                        method,
                        name,
                        params,
                    }),
                    Err(err) => {
                        debug!(error = %err, method = %name, "server request id parse failed");
                        None
                    }
                },
                None => Some(Inbound::Notification {
                    method,
                    name,
                    params,
                }),
            };
        }

        let Some(id) = id_value.as_ref().and_then(Value::as_i64) else {
            debug!("dropping app-server message without method or integer id");
            return None;
        };
        let Some(method) = self.pending.remove(&id) else {
            debug!(id, "app-server response without pending request");
            return None;
        };

        if let Some(error) = object.get("error") {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(-1);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Unknown error")
                .to_string();
            return Some(Inbound::Failure {
                id,
                method,
                error: RpcFailure { code, message },
            });
        }

        Some(Inbound::Response {
            id,
            method,
            result: object.remove("result").unwrap_or(Value::Null),
        })
    }

    pub fn pending_method(&self, id: i64) -> Option<ClientMethod> {
        self.pending.get(&id).copied()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Forget every in-flight request. Ids keep increasing afterwards.
    pub fn clear_pending(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }
}

/// Acceptance payload for a server-initiated request. Approvals are always
/// accepted; there is no confirmation path.
pub fn auto_reply(method: &ServerMethod, params: Option<&Value>) -> Value {
    match method {
        ServerMethod::CommandApproval | ServerMethod::FileChangeApproval => {
            json!({ "decision": "accept" })
        }
        ServerMethod::UserInputRequest => user_input_reply(params),
        _ => json!({}),
    }
}

fn user_input_reply(params: Option<&Value>) -> Value {
    let mut answers = Map::new();
    let questions = params
        .and_then(|params| params.get("questions"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    for question in questions {
        let Some(id) = question.get("id").and_then(Value::as_str) else {
            continue;
        };
        let answer = question
            .get("options")
            .and_then(Value::as_array)
            .and_then(|options| options.first())
            .and_then(|option| option.get("id"))
            .and_then(Value::as_str)
            .unwrap_or("yes");
        answers.insert(id.to_string(), json!({ "answers": [answer] }));
    }

    json!({ "answers": answers })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn ids_start_at_one_and_strictly_increase() {
        let mut session = RpcSession::new();
        let first = session.call(ClientMethod::Initialize, Some(json!({}))).expect("call");
        let second = session.call(ClientMethod::ThreadList, None).expect("call");
        let third = session.call(ClientMethod::AccountRead, None).expect("call");

        assert_eq!((first.id, second.id, third.id), (1, 2, 3));
        assert_eq!(session.pending_len(), 3);
        assert_eq!(session.pending_method(2), Some(ClientMethod::ThreadList));

        let wire: Value = serde_json::from_str(&first.text).expect("json");
        assert_eq!(wire, json!({"id": 1, "method": "initialize", "params": {}}));
        let wire: Value = serde_json::from_str(&second.text).expect("json");
        assert_eq!(wire, json!({"id": 2, "method": "thread/list"}));
    }

    #[test]
    fn response_resolves_pending_method_once() {
        let mut session = RpcSession::new();
        session.call(ClientMethod::ThreadList, None).expect("call");

        let inbound = session.classify(r#"{"id":1,"result":{"data":[]}}"#);
        assert_eq!(
            inbound,
            Some(Inbound::Response {
                id: 1,
                method: ClientMethod::ThreadList,
                result: json!({"data": []}),
            })
        );
        assert_eq!(session.pending_len(), 0);
        assert_eq!(session.classify(r#"{"id":1,"result":{}}"#), None);
    }

    #[test]
    fn error_response_still_removes_pending_entry() {
        let mut session = RpcSession::new();
        session.call(ClientMethod::ThreadResume, None).expect("call");

        let inbound = session.classify(r#"{"id":1,"error":{"code":-32600,"message":"no such thread"}}"#);
        assert_eq!(
            inbound,
            Some(Inbound::Failure {
                id: 1,
                method: ClientMethod::ThreadResume,
                error: RpcFailure {
                    code: -32600,
                    message: "no such thread".to_string(),
                },
            })
        );
        assert_eq!(session.pending_len(), 0);
    }

    #[test]
    fn method_with_id_is_a_server_request() {
        let mut session = RpcSession::new();
        let inbound = session.classify(
            r#"{"id":4242,"method":"commandExecution/requestApproval","params":{"threadId":"t1"}}"#,
        );
        assert_eq!(
            inbound,
            Some(Inbound::ServerRequest {
                id: RequestId::Integer(4242),
                method: ServerMethod::CommandApproval,
                name: "commandExecution/requestApproval".to_string(),
                params: Some(json!({"threadId": "t1"})),
            })
        );
    }

    #[test]
    fn method_without_id_is_a_notification() {
        let mut session = RpcSession::new();
        let inbound = session.classify(r#"{"method":"turn/completed","params":{"threadId":"t1"}}"#);
        assert!(matches!(
            inbound,
            Some(Inbound::Notification {
                method: ServerMethod::TurnCompleted,
                ..
            })
        ));
    }

    #[test]
    fn garbage_and_unmatched_ids_are_dropped() {
        let mut session = RpcSession::new();
        assert_eq!(session.classify("not json"), None);
        assert_eq!(session.classify("[1,2,3]"), None);
        assert_eq!(session.classify(r#"{"id":99,"result":{}}"#), None);
        assert_eq!(session.classify(r#"{"result":{}}"#), None);
    }

    #[test]
    fn clearing_pending_does_not_reuse_ids() {
        let mut session = RpcSession::new();
        session.call(ClientMethod::Initialize, None).expect("call");
        assert_eq!(session.clear_pending(), 1);
        let next = session.call(ClientMethod::Initialize, None).expect("call");
        assert_eq!(next.id, 2);
    }

    #[test]
    fn reply_echoes_request_id() {
        let session = RpcSession::new();
        let text = session
            .reply(&RequestId::String("req-1".to_string()), &json!({"decision": "accept"}))
            .expect("reply");
        let wire: Value = serde_json::from_str(&text).expect("json");
        assert_eq!(wire, json!({"id": "req-1", "result": {"decision": "accept"}}));
    }

    #[test]
    fn auto_replies_accept_approvals_and_answer_questions() {
        assert_eq!(
            auto_reply(&ServerMethod::FileChangeApproval, None),
            json!({"decision": "accept"})
        );
        let params = json!({
            "questions": [
                {"id": "q1", "options": [{"id": "opt-a"}, {"id": "opt-b"}]},
                {"id": "q2"}
            ]
        });
        assert_eq!(
            auto_reply(&ServerMethod::UserInputRequest, Some(&params)),
            json!({"answers": {"q1": {"answers": ["opt-a"]}, "q2": {"answers": ["yes"]}}})
        );
        assert_eq!(
            auto_reply(&ServerMethod::Unknown("x/y".to_string()), None),
            json!({})
        );
    }
}
