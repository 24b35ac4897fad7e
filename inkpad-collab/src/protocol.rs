//! Binary protocol for document sessions.
//!
//! Every WebSocket frame carries one bincode-encoded message:
//! ```text
//! client ──► server   ClientMessage::{Join, Leave, ContentChange, Request}
//! server ──► client   ServerMessage::{Joined, Event, Response, Rejected}
//! ```
//!
//! `ChangeEvent` is the shape relayed on a document channel. Requests are
//! correlated with their responses by a client-chosen `request_id`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CollabError, ErrorBody};
use crate::model::{Contribution, Document, Invitation, Permission, Version};

/// Event relayed to the participants of one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChangeEvent {
    ContentChange {
        document_id: Uuid,
        user_id: Uuid,
        username: String,
        content: String,
        timestamp: u64,
        /// Set when the content comes from a revert to this version.
        reverted_from: Option<Uuid>,
    },
    UserJoined {
        document_id: Uuid,
        user_id: Uuid,
        username: String,
        permission: Permission,
    },
    UserLeft {
        document_id: Uuid,
        user_id: Uuid,
        username: String,
    },
}

impl ChangeEvent {
    pub fn document_id(&self) -> Uuid {
        match self {
            ChangeEvent::ContentChange { document_id, .. }
            | ChangeEvent::UserJoined { document_id, .. }
            | ChangeEvent::UserLeft { document_id, .. } => *document_id,
        }
    }

    /// Originating user.
    pub fn user_id(&self) -> Uuid {
        match self {
            ChangeEvent::ContentChange { user_id, .. }
            | ChangeEvent::UserJoined { user_id, .. }
            | ChangeEvent::UserLeft { user_id, .. } => *user_id,
        }
    }

    pub fn is_revert(&self) -> bool {
        matches!(
            self,
            ChangeEvent::ContentChange { reverted_from: Some(_), .. }
        )
    }
}

/// A connected participant as seen by other participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub username: String,
    pub permission: Permission,
    pub connected_at: u64,
}

/// Request/response operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    CreateDocument { title: String, content: String },
    GetDocument { document_id: Uuid },
    ListDocuments,
    RenameDocument { document_id: Uuid, title: String },
    SaveDocument { document_id: Uuid, content: String },
    DeleteDocument { document_id: Uuid },
    CreateVersion { document_id: Uuid, content: String, description: String },
    ListHistory { document_id: Uuid },
    GetVersion { document_id: Uuid, version_id: Uuid },
    RevertToVersion { document_id: Uuid, version_id: Uuid },
    ListContributions { document_id: Uuid },
    Invite { document_id: Uuid, email: String, permission: Permission },
    AcceptInvitation { invitation_id: Uuid, email: String },
    DeclineInvitation { invitation_id: Uuid, email: String },
    CancelInvitation { invitation_id: Uuid },
    PendingInvitations { email: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponsePayload {
    Empty,
    Document(Document),
    Documents(Vec<Document>),
    Version(Version),
    History(Vec<Version>),
    Contributions(Vec<Contribution>),
    Invitation(Invitation),
    Invitations(Vec<Invitation>),
}

/// Outcome of a request: a success flag plus either a payload or an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub payload: Option<ResponsePayload>,
    pub error: Option<ErrorBody>,
}

impl ApiResponse {
    pub fn ok(payload: ResponsePayload) -> Self {
        Self {
            success: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn err(error: &CollabError) -> Self {
        Self {
            success: false,
            payload: None,
            error: Some(error.into()),
        }
    }

    pub fn from_result(result: Result<ResponsePayload, CollabError>) -> Self {
        match result {
            Ok(payload) => Self::ok(payload),
            Err(e) => Self::err(&e),
        }
    }

    /// Convert back into a `Result`, rebuilding the engine error on failure.
    pub fn into_result(self) -> Result<ResponsePayload, CollabError> {
        match (self.success, self.payload, self.error) {
            (true, Some(payload), _) => Ok(payload),
            (true, None, _) => Ok(ResponsePayload::Empty),
            (false, _, Some(body)) => Err(body.into()),
            (false, _, None) => Err(CollabError::TransientIo(
                "request failed without an error description".into(),
            )),
        }
    }
}

/// Client → server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// The server resolves the permission; clients never claim one.
    Join {
        document_id: Uuid,
        user_id: Uuid,
        username: String,
    },
    Leave {
        document_id: Uuid,
        user_id: Uuid,
        username: String,
    },
    ContentChange {
        document_id: Uuid,
        user_id: Uuid,
        username: String,
        content: String,
        timestamp: u64,
    },
    Request {
        request_id: u64,
        user_id: Uuid,
        request: Request,
    },
}

/// Server → client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    Joined {
        session_id: Uuid,
        document_id: Uuid,
        permission: Permission,
        title: String,
        content: String,
        participants: Vec<ParticipantInfo>,
    },
    Event(ChangeEvent),
    Response {
        request_id: u64,
        response: ApiResponse,
    },
    /// A join, leave or content change was refused.
    Rejected { error: ErrorBody },
}

impl ClientMessage {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode(bytes)
    }
}

impl ServerMessage {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode(bytes)
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| ProtocolError::Serialization(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
    Ok(msg)
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("not joined to a document")]
    NotJoined,
    #[error("request timed out")]
    Timeout,
}

impl From<ProtocolError> for CollabError {
    fn from(e: ProtocolError) -> Self {
        CollabError::TransientIo(e.to_string())
    }
}
