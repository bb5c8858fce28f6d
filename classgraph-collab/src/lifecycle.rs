//! Connect/join sequencing.
//!
//! ```text
//! Disconnected ──connect──► Connecting ──open──► Connected ──surface ready──► Joined
//!      ▲                                                                        │
//!      └───────────────────────────── channel lost ─────────────────────────────┘
//! ```
//!
//! The join is sent exactly once per connection, as soon as both the channel
//! is open and the rendering surface reported ready, whichever comes last.
//! The server answers every join with a full snapshot.

use crate::protocol::{DiagramId, JoinDiagram, OutboundEvent};

/// Connection state of one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Joined,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Joined => "joined",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub struct ConnectionLifecycle {
    diagram_id: DiagramId,
    state: ConnectionState,
    surface_ready: bool,
    joins: u64,
}

impl ConnectionLifecycle {
    pub fn new(diagram_id: DiagramId) -> Self {
        Self {
            diagram_id,
            state: ConnectionState::Disconnected,
            surface_ready: false,
            joins: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_joined(&self) -> bool {
        self.state == ConnectionState::Joined
    }

    /// Number of joins sent so far (one per successful connection).
    pub fn join_count(&self) -> u64 {
        self.joins
    }

    pub fn connecting(&mut self) {
        if self.state == ConnectionState::Disconnected {
            self.state = ConnectionState::Connecting;
        }
    }

    /// Channel opened. Returns the join to send if the surface is ready.
    pub fn connected(&mut self) -> Option<OutboundEvent> {
        if self.state == ConnectionState::Joined {
            return None;
        }
        self.state = ConnectionState::Connected;
        self.try_join()
    }

    /// Rendering surface initialised. Returns the join to send if the
    /// channel is already open.
    pub fn surface_ready(&mut self) -> Option<OutboundEvent> {
        self.surface_ready = true;
        self.try_join()
    }

    /// Channel lost. The surface stays ready.
    pub fn disconnected(&mut self) {
        self.state = ConnectionState::Disconnected;
    }

    fn try_join(&mut self) -> Option<OutboundEvent> {
        if self.state != ConnectionState::Connected || !self.surface_ready {
            return None;
        }
        self.state = ConnectionState::Joined;
        self.joins += 1;
        log::info!("Joining diagram {}", self.diagram_id);
        Some(OutboundEvent::Join(JoinDiagram {
            diagram_id: self.diagram_id,
        }))
    }
}
