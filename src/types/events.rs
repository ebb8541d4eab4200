use crate::binary::Node;
use crate::proto;
use crate::types::jid::{Jid, MessageId};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Everything the client emits to the host, fanned out through the
/// registered handlers in registration order.
#[derive(Debug, Clone)]
pub enum Event {
    /// Pairing QR refs are available for rendering.
    Qr(Qr),
    /// The companion device was linked.
    PairSuccess(PairSuccess),
    /// Authentication completed; the stream is live.
    Connected(Connected),
    /// The session ended (server close, transport death or keep-alive
    /// failure). Not emitted for a host-requested disconnect.
    Disconnected(Disconnected),
    StreamError(StreamError),
    ConnectFailure(ConnectFailure),
    /// An inbound chat message envelope. Payload decryption is the host's
    /// E2EE layer's job; the raw node is included for it.
    Message(Message),
    Receipt(Receipt),
    /// Raw app-state mutation (index + action), emitted alongside the typed
    /// events below.
    AppState(AppState),
    /// A full sync of the named collection finished.
    AppStateSyncComplete(AppStateSyncComplete),
    /// A sync needs keys the key store doesn't have; the host should fetch
    /// them over the E2EE channel and retry.
    AppStateKeyRequest(AppStateKeyRequest),
    Mute(Mute),
    Pin(Pin),
    Archive(Archive),
    Contact(Contact),
    Star(Star),
    DeleteForMe(DeleteForMe),
    PushNameSetting(PushNameSetting),
    UnarchiveChatsSetting(UnarchiveChatsSetting),
}

#[derive(Debug, Clone)]
pub struct Qr {
    pub codes: Vec<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct PairSuccess {
    pub id: Jid,
    pub business_name: String,
    pub platform: String,
}

#[derive(Debug, Clone, Default)]
pub struct Connected;

#[derive(Debug, Clone, Default)]
pub struct Disconnected;

#[derive(Debug, Clone)]
pub struct StreamError {
    pub code: String,
    pub raw: Option<Node>,
}

#[derive(Debug, Clone)]
pub struct ConnectFailure {
    pub reason: u16,
    pub message: String,
}

/// Envelope metadata of an inbound message node.
#[derive(Debug, Clone)]
pub struct MessageInfo {
    pub id: MessageId,
    pub chat: Jid,
    pub sender: Jid,
    pub push_name: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub info: MessageInfo,
    pub raw: Node,
}

#[derive(Debug, Clone)]
pub struct Receipt {
    pub message_ids: Vec<MessageId>,
    pub source: Jid,
    pub timestamp: DateTime<Utc>,
    /// Empty string is a plain delivery receipt.
    pub receipt_type: String,
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub index: Vec<String>,
    pub value: proto::SyncActionValue,
}

#[derive(Debug, Clone)]
pub struct AppStateSyncComplete {
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct AppStateKeyRequest {
    pub key_ids: Vec<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct Mute {
    pub jid: Jid,
    pub timestamp: DateTime<Utc>,
    pub action: proto::MuteAction,
}

#[derive(Debug, Clone)]
pub struct Pin {
    pub jid: Jid,
    pub timestamp: DateTime<Utc>,
    pub action: proto::PinAction,
}

#[derive(Debug, Clone)]
pub struct Archive {
    pub jid: Jid,
    pub timestamp: DateTime<Utc>,
    pub action: proto::ArchiveChatAction,
}

#[derive(Debug, Clone)]
pub struct Contact {
    pub jid: Jid,
    pub timestamp: DateTime<Utc>,
    pub action: proto::ContactAction,
}

#[derive(Debug, Clone)]
pub struct Star {
    pub chat_jid: Jid,
    pub sender_jid: Option<Jid>,
    pub is_from_me: bool,
    pub message_id: MessageId,
    pub timestamp: DateTime<Utc>,
    pub action: proto::StarAction,
}

#[derive(Debug, Clone)]
pub struct DeleteForMe {
    pub chat_jid: Jid,
    pub sender_jid: Option<Jid>,
    pub is_from_me: bool,
    pub message_id: MessageId,
    pub timestamp: DateTime<Utc>,
    pub action: proto::DeleteMessageForMeAction,
}

#[derive(Debug, Clone)]
pub struct PushNameSetting {
    pub timestamp: DateTime<Utc>,
    pub action: proto::PushNameSetting,
}

#[derive(Debug, Clone)]
pub struct UnarchiveChatsSetting {
    pub timestamp: DateTime<Utc>,
    pub action: proto::UnarchiveChatsSetting,
}
