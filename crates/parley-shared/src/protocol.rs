//! WebSocket wire protocol.
//!
//! Every text frame is a JSON object `{"event": "<name>", "data": <payload>}`.
//! Inbound frames decode into [`ClientEvent`], outbound frames are encoded
//! from [`ServerEvent`].

use serde::{Deserialize, Serialize};

use crate::constants::{EVENT_CONVERSATION, EVENT_MESSAGE, EVENT_MESSAGE_USER, EVENT_ONLINE_USER};
use crate::error::ProtocolError;
use crate::models::{ConversationSummary, Message, MessageBody, PresenceProfile};
use crate::types::UserId;

/// Events sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Open a conversation page with the given counterpart
    #[serde(rename = "message-page")]
    MessagePage(UserId),

    /// Send a message
    #[serde(rename = "new-message", alias = "new message")]
    NewMessage(NewMessage),

    /// Request the sidebar of the given viewer
    #[serde(rename = "sidebar")]
    Sidebar(UserId),

    /// Mark everything the counterpart sent as read
    #[serde(rename = "seen")]
    Seen(UserId),

    /// Client is going away
    #[serde(rename = "disconnect")]
    Disconnect,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub sender: UserId,
    pub receiver: UserId,
    #[serde(flatten)]
    pub body: MessageBody,
    pub msg_by_user_id: UserId,
}

impl ClientEvent {
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Event name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::MessagePage(_) => "message-page",
            ClientEvent::NewMessage(_) => "new-message",
            ClientEvent::Sidebar(_) => "sidebar",
            ClientEvent::Seen(_) => "seen",
            ClientEvent::Disconnect => "disconnect",
        }
    }

    /// Structural checks that do not depend on who sent the event.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            ClientEvent::NewMessage(msg) => {
                if msg.sender == msg.receiver {
                    return Err(ProtocolError::Invalid(
                        "sender and receiver must differ".into(),
                    ));
                }
                if msg.msg_by_user_id != msg.sender {
                    return Err(ProtocolError::Invalid(
                        "msgByUserId must match sender".into(),
                    ));
                }
                msg.body.validate().map_err(ProtocolError::Invalid)
            }
            _ => Ok(()),
        }
    }
}

/// Events sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Full presence snapshot
    #[serde(rename = "onlineUser")]
    OnlineUser(Vec<UserId>),

    /// Counterpart profile for the open conversation page
    #[serde(rename = "message-user")]
    MessageUser(PresenceProfile),

    /// Full message list of a conversation, chronological
    #[serde(rename = "message")]
    Message(Vec<Message>),

    /// Sidebar of the receiving user
    #[serde(rename = "conversation")]
    Conversation(Vec<ConversationSummary>),
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::OnlineUser(_) => EVENT_ONLINE_USER,
            ServerEvent::MessageUser(_) => EVENT_MESSAGE_USER,
            ServerEvent::Message(_) => EVENT_MESSAGE,
            ServerEvent::Conversation(_) => EVENT_CONVERSATION,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_message_page() {
        let id = UserId::new();
        let text = format!(r#"{{"event":"message-page","data":"{id}"}}"#);
        assert_eq!(ClientEvent::from_json(&text).unwrap(), ClientEvent::MessagePage(id));
    }

    #[test]
    fn test_decode_new_message_with_legacy_name() {
        let a = UserId::new();
        let b = UserId::new();
        let text = format!(
            r#"{{"event":"new message","data":{{"sender":"{a}","receiver":"{b}","text":"hi","msgByUserId":"{a}"}}}}"#
        );

        let event = ClientEvent::from_json(&text).unwrap();
        let ClientEvent::NewMessage(msg) = &event else {
            panic!("expected new-message, got {event:?}");
        };
        assert_eq!(msg.body.text.as_deref(), Some("hi"));
        assert!(msg.body.image_url.is_none());
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_decode_disconnect_without_data() {
        let event = ClientEvent::from_json(r#"{"event":"disconnect"}"#).unwrap();
        assert_eq!(event, ClientEvent::Disconnect);
    }

    #[test]
    fn test_reject_unknown_and_malformed() {
        assert!(ClientEvent::from_json(r#"{"event":"typing","data":"x"}"#).is_err());
        assert!(ClientEvent::from_json(r#"{"event":"seen","data":"not-a-uuid"}"#).is_err());
        assert!(ClientEvent::from_json("garbage").is_err());
    }

    #[test]
    fn test_validate_new_message() {
        let a = UserId::new();
        let b = UserId::new();
        let mut msg = NewMessage {
            sender: a,
            receiver: b,
            body: MessageBody::text("hello"),
            msg_by_user_id: a,
        };
        assert!(ClientEvent::NewMessage(msg.clone()).validate().is_ok());

        msg.msg_by_user_id = b;
        assert!(ClientEvent::NewMessage(msg.clone()).validate().is_err());

        msg.msg_by_user_id = a;
        msg.receiver = a;
        assert!(ClientEvent::NewMessage(msg.clone()).validate().is_err());

        msg.receiver = b;
        msg.body = MessageBody::default();
        assert!(ClientEvent::NewMessage(msg).validate().is_err());
    }

    #[test]
    fn test_encode_online_user() {
        let id = UserId::new();
        let json = ServerEvent::OnlineUser(vec![id]).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["event"], "onlineUser");
        assert_eq!(value["data"][0], id.to_string());
    }
}
