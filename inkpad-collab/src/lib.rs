//! # inkpad-collab: real-time collaborative document engine
//!
//! Multi-user editing of rich-text documents over WebSocket, with
//! last-writer-wins content relay, explicit versions and email invitations.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket       ┌─────────────┐
//! │ SyncClient  │ ◄─────────────────► │ SyncServer  │
//! │ (per user)  │     Binary Proto    │ (central)   │
//! └──────┬──────┘                     └──────┬──────┘
//!        │                                   │
//!        ▼                                   ▼
//! ┌─────────────┐                     ┌──────────────┐
//! │ Persistence │                     │ CollabService│
//! │ Scheduler   │                     └──────┬───────┘
//! └─────────────┘            ┌───────────────┼────────────────┐
//!                            ▼               ▼                ▼
//!                     ┌────────────┐  ┌─────────────┐  ┌──────────────┐
//!                     │ Presence / │  │ Version     │  │ Invitation   │
//!                     │ Relay      │  │ Engine      │  │ Gate         │
//!                     └─────┬──────┘  └──────┬──────┘  └──────┬───────┘
//!                           ▼                └───────┬────────┘
//!                     ┌────────────┐          ┌──────▼──────┐
//!                     │ Broadcast  │          │ Repository  │
//!                     │ Hub        │          │ (RocksDB)   │
//!                     └────────────┘          └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`model`]: documents, versions, invitations, contributions
//! - [`permission`]: per-request access resolution
//! - [`session`] and [`presence`]: who is connected to which document
//! - [`channel`] and [`relay`]: per-document fan-out of change events
//! - [`scheduler`]: client-side broadcast and autosave debouncing
//! - [`version`]: append-only history, diff stats, revert
//! - [`invitation`]: invite, accept, decline, cancel
//! - [`storage`]: repository trait with RocksDB and in-memory backends
//! - [`service`], [`server`], [`client`]: the request surface and transport

pub mod channel;
pub mod client;
pub mod error;
pub mod invitation;
pub mod model;
pub mod permission;
pub mod presence;
pub mod protocol;
pub mod relay;
pub mod scheduler;
pub mod server;
pub mod service;
pub mod session;
pub mod storage;
pub mod version;

// Re-exports for convenience
pub use channel::{BroadcastHub, Channel, HubStats, PublishReport};
pub use client::{ClientEditSink, ConnectionState, SyncClient, SyncEvent};
pub use error::{CollabError, ErrorBody, ErrorKind, ResourceKind};
pub use invitation::{InvitationConfig, InvitationGate, Invitee};
pub use model::{
    ChangeStats, Collaborator, Contribution, Document, Invitation, InvitationStatus, Permission,
    Version,
};
pub use permission::Access;
pub use protocol::{
    ApiResponse, ChangeEvent, ClientMessage, ParticipantInfo, ProtocolError, Request,
    ResponsePayload, ServerMessage,
};
pub use scheduler::{EditSink, PersistenceScheduler, SchedulerConfig};
pub use server::{ServerConfig, ServerStats, SyncServer};
pub use service::{CollabService, ServiceConfig};
pub use session::{SessionHandle, SessionRegistry};
pub use storage::{DocumentLocks, MemoryStore, Repository, RocksStore, StoreConfig, StoreError};
pub use version::VersionEngine;
