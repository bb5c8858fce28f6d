//! # classgraph-collab — real-time sync for collaborative class diagrams
//!
//! Keeps a client's [`GraphState`](classgraph_core::GraphState) consistent
//! with a server-mediated shared diagram without echo loops, duplicate
//! removal notifications, or races between local edits, remote edits and
//! bulk loads.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  LocalAction   ┌────────────────────────────────────┐
//! │ SyncHandle   │ ─────────────► │ runtime worker                     │
//! │ (UI / CLI)   │ ◄───────────── │  DiagramSync                       │
//! └──────────────┘  SyncView      │   ├─ LocalMutationDispatcher ──┐   │
//!        ▲                        │   ├─ RemoteEventApplier        │   │
//!        │ Subscription           │   ├─ SyncSession ◄─────────────┘   │
//! ┌──────┴───────┐                │   ├─ DeletionDebouncer             │
//! │ MessageBus   │ ◄───────────── │   └─ ConnectionLifecycle           │
//! └──────────────┘   inbound      └──────────────┬─────────────────────┘
//!                                                │ JSON frames
//!                                         ┌──────┴──────┐
//!                                         │ SyncClient  │ ◄──► server
//!                                         └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — event names, payloads, JSON envelope
//! - [`bus`] — typed fan-out of inbound events
//! - [`session`] — joined flag, bulk-load depth, settle-window suppression
//! - [`debounce`] — one removal notification per id per window
//! - [`interaction`] — selection and in-progress drag
//! - [`dispatcher`] — local gestures → graph + outbound events
//! - [`applier`] — inbound events → graph, never outbound
//! - [`lifecycle`] — connect/join sequencing
//! - [`generation`] — AI generation requests and their timeout
//! - [`image_prep`] — downscale and JPEG-encode images for generation
//! - [`engine`] — [`DiagramSync`], the synchronous core
//! - [`client`] — WebSocket transport
//! - [`runtime`] — async worker and [`SyncHandle`]
//! - [`api`] — REST backend client
//! - [`config`] — [`ClientConfig`]

pub mod api;
pub mod applier;
pub mod bus;
pub mod client;
pub mod config;
pub mod debounce;
pub mod dispatcher;
pub mod engine;
pub mod generation;
pub mod image_prep;
pub mod interaction;
pub mod lifecycle;
pub mod protocol;
pub mod runtime;
pub mod session;

// Re-exports for convenience
pub use api::{ApiError, ArtifactTarget, BackendClient, DiagramRecord, UserRecord};
pub use applier::{LoadSummary, RemoteEventApplier};
pub use bus::{BusStats, MessageBus, Subscription};
pub use client::{ChannelEvent, SyncClient};
pub use config::ClientConfig;
pub use debounce::DeletionDebouncer;
pub use dispatcher::LocalMutationDispatcher;
pub use engine::{DiagramSync, LocalAction, SyncContext};
pub use generation::{GenerationError, GenerationFailure, GenerationTracker, RequestKind};
pub use image_prep::{prepare_image, ImageError, PreparedImage};
pub use interaction::{Interaction, Selection};
pub use lifecycle::{ConnectionLifecycle, ConnectionState};
pub use protocol::{
    DiagramContent, DiagramId, DiagramSnapshot, EventKind, GenerationMode, InboundEvent,
    OutboundEvent, ProtocolError,
};
pub use runtime::{Command, RuntimeError, SyncHandle, SyncRuntime, SyncView};
pub use session::{BulkLoadCoordinator, SyncSession};
