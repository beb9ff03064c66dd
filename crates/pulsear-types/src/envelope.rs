use serde::{Deserialize, Serialize};

use crate::content_id::ContentId;
use crate::error::ProtocolDecodeError;
use crate::models::{ClientRef, FileResponse, FileSendable, HeartBeat, TransferRequest};

/// Envelope exchanged over the control channel (JSON text frames).
///
/// Enums use serde's external tagging: unit variants encode as the bare tag
/// string, data variants as a single-key object `{"Tag": content}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub sender: Sender,
    pub msg: MessageClass,
    pub policy: DispatchPolicy,
}

impl Envelope {
    pub fn new(sender: Sender, msg: MessageClass, policy: DispatchPolicy) -> Self {
        Self { sender, msg, policy }
    }

    /// A message from `me` for the server itself.
    pub fn to_server(me: &ClientRef, msg: MessageClass) -> Self {
        Self::new(Sender::User(me.clone()), msg, DispatchPolicy::Server)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolDecodeError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Who produced an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sender {
    Server,
    User(ClientRef),
    Manager(ClientRef),
}

/// Payload of an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageClass {
    /// First session greeting; the server answers with the session identity.
    Establish,
    /// Greeting after a dropped control connection was re-opened.
    Reconnect,
    /// Logout. Terminal when received from the server.
    Leave,
    HeartBeat(HeartBeat),
    FileRequest(TransferRequest),
    FileSendable(FileSendable),
    FileResponse(FileResponse),
    /// Server pull signal for a transfer's pending slices.
    PleaseSend(ContentId),
    /// Worker connection announcement, echoed by the server on acceptance.
    #[serde(rename = "CreateWsWorker")]
    CreateWorker(u64),
    Text(String),
    Notify(String),
    /// The peer could not parse one of our messages.
    #[serde(rename = "Errjson")]
    Error(String),
}

impl MessageClass {
    /// Wire tag of this variant.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Establish => "Establish",
            Self::Reconnect => "Reconnect",
            Self::Leave => "Leave",
            Self::HeartBeat(_) => "HeartBeat",
            Self::FileRequest(_) => "FileRequest",
            Self::FileSendable(_) => "FileSendable",
            Self::FileResponse(_) => "FileResponse",
            Self::PleaseSend(_) => "PleaseSend",
            Self::CreateWorker(_) => "CreateWsWorker",
            Self::Text(_) => "Text",
            Self::Notify(_) => "Notify",
            Self::Error(_) => "Errjson",
        }
    }
}

/// How the server should route an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchPolicy {
    Broadcast,
    BroadcastExceptMe,
    BroadcastSameUser,
    BroadcastSameUserExceptMe,
    Server,
    Targets(Vec<ClientRef>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::models::{
        DashboardInfo, FileListElem, FileResponseStatus, SliceRange, UserConfig,
    };

    fn alice() -> ClientRef {
        ClientRef::new("alice", "42")
    }

    fn request() -> TransferRequest {
        TransferRequest {
            owner: "alice".into(),
            name: "notes.txt".into(),
            size: 100_000,
            slice_size: 40960,
            modified_time: 1_700_000_000_000,
            content_id: ContentId::from_bytes([7; 32]),
        }
    }

    #[test]
    fn test_unit_variant_is_bare_tag() {
        let env = Envelope::to_server(&alice(), MessageClass::Establish);
        let value: serde_json::Value = serde_json::from_str(&env.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "sender": { "User": { "username": "alice", "user_ctx_hash": "42" } },
                "msg": "Establish",
                "policy": "Server",
            })
        );
    }

    #[test]
    fn test_data_variant_is_single_key_object() {
        let env = Envelope::new(
            Sender::Server,
            MessageClass::CreateWorker(3),
            DispatchPolicy::Targets(vec![alice()]),
        );
        let value: serde_json::Value = serde_json::from_str(&env.encode().unwrap()).unwrap();
        assert_eq!(value["msg"], json!({ "CreateWsWorker": 3 }));
        assert_eq!(
            value["policy"],
            json!({ "Targets": [{ "username": "alice", "user_ctx_hash": "42" }] })
        );
    }

    #[test]
    fn test_roundtrip_every_variant() {
        let id = ContentId::from_bytes([9; 32]);
        let msgs = vec![
            MessageClass::Establish,
            MessageClass::Reconnect,
            MessageClass::Leave,
            MessageClass::HeartBeat(HeartBeat {
                config: UserConfig::default(),
                dashboard: Some(DashboardInfo {
                    online_user: 2,
                    online_client: 3,
                    left_storage: 1024,
                    user_max_storage: 4096,
                }),
            }),
            MessageClass::FileRequest(request()),
            MessageClass::FileSendable(FileSendable {
                file_elem: Some(FileListElem::from_request(&request())),
                req: Some(request()),
                hashval: id,
                user_ctx_hash: "42".into(),
            }),
            MessageClass::FileResponse(FileResponse {
                name: "notes.txt".into(),
                file_hash: id,
                status: FileResponseStatus::Resend,
                range: SliceRange::new(1, 3),
            }),
            MessageClass::PleaseSend(id),
            MessageClass::CreateWorker(1),
            MessageClass::Text("hello".into()),
            MessageClass::Notify("your account login at another place!".into()),
            MessageClass::Error("expected value".into()),
        ];
        let policies = [
            DispatchPolicy::Broadcast,
            DispatchPolicy::BroadcastExceptMe,
            DispatchPolicy::BroadcastSameUser,
            DispatchPolicy::BroadcastSameUserExceptMe,
            DispatchPolicy::Server,
            DispatchPolicy::Targets(vec![alice(), ClientRef::new("bob", "7")]),
        ];
        let senders = [Sender::Server, Sender::User(alice()), Sender::Manager(alice())];

        for (i, msg) in msgs.into_iter().enumerate() {
            let env = Envelope::new(
                senders[i % senders.len()].clone(),
                msg,
                policies[i % policies.len()].clone(),
            );
            let decoded = Envelope::decode(&env.encode().unwrap()).unwrap();
            assert_eq!(decoded, env, "variant {}", env.msg.tag());
        }
    }

    #[test]
    fn test_unknown_tag_is_decode_error() {
        let raw = r#"{"sender":"Server","msg":"Teleport","policy":"Server"}"#;
        assert!(matches!(
            Envelope::decode(raw),
            Err(ProtocolDecodeError::Json(_))
        ));
    }

    #[test]
    fn test_missing_nested_field_is_decode_error() {
        let raw = r#"{"sender":"Server","msg":{"FileResponse":{"name":"x","status":"Ok"}},"policy":"Server"}"#;
        assert!(Envelope::decode(raw).is_err());
    }

    #[test]
    fn test_denied_sendable_decodes() {
        let raw = format!(
            r#"{{"sender":"Server","msg":{{"FileSendable":{{"file_elem":null,"hashval":"{}","user_ctx_hash":"42"}}}},"policy":"BroadcastSameUser"}}"#,
            "00".repeat(32)
        );
        let env = Envelope::decode(&raw).unwrap();
        match env.msg {
            MessageClass::FileSendable(s) => {
                assert!(!s.granted());
                assert!(s.req.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
