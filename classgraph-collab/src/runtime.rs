//! Async driver around [`DiagramSync`].
//!
//! One spawned task owns the engine and the transport; everything else
//! talks to it through a [`SyncHandle`]:
//!
//! ```text
//!  SyncHandle ──Command──► ┌────────────────────┐ ──OutboundEvent──► SyncClient
//!                          │ worker (select!)   │
//!  watch<SyncView> ◄────── │  DiagramSync       │ ◄──ChannelEvent─── SyncClient
//!  MessageBus      ◄────── └────────────────────┘
//!                                   ▲
//!                                 ticker (outbound release, timeouts, reconnect)
//! ```

use std::time::Instant;

use classgraph_core::{GraphError, GraphState};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::bus::{MessageBus, Subscription};
use crate::client::{ChannelEvent, SyncClient};
use crate::config::ClientConfig;
use crate::engine::{DiagramSync, LocalAction};
use crate::generation::{GenerationError, GenerationFailure};
use crate::image_prep::{prepare_image, ImageError};
use crate::interaction::Selection;
use crate::lifecycle::ConnectionState;
use crate::protocol::{DiagramId, EventKind, GenerationMode};

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("sync runtime has stopped")]
    Stopped,
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
}

type Reply<T> = oneshot::Sender<Result<T, RuntimeError>>;

/// Requests accepted by the worker.
#[derive(Debug)]
pub enum Command {
    Local {
        action: LocalAction,
        reply: Reply<bool>,
    },
    SurfaceReady,
    GenerateFromPrompt {
        prompt: String,
        mode: GenerationMode,
        reply: Reply<()>,
    },
    GenerateFromImage {
        bytes: Vec<u8>,
        context: Option<String>,
        mode: GenerationMode,
        reply: Reply<()>,
    },
    Shutdown,
}

/// What a renderer needs to draw the current state.
#[derive(Debug, Clone)]
pub struct SyncView {
    pub graph: GraphState,
    pub connection: ConnectionState,
    pub selection: Option<Selection>,
    pub generating: bool,
    pub last_failure: Option<GenerationFailure>,
    /// Generations applied since the runtime started.
    pub completed_generations: u64,
    pub joins: u64,
    /// Bumped on every published change.
    pub revision: u64,
}

impl SyncView {
    fn of(engine: &DiagramSync, revision: u64) -> Self {
        Self {
            graph: engine.graph().clone(),
            connection: engine.connection_state(),
            selection: engine.interaction().selection().cloned(),
            generating: engine.generation().is_generating(),
            last_failure: engine.generation().last_failure().cloned(),
            completed_generations: engine.generation().completed_count(),
            joins: engine.join_count(),
            revision,
        }
    }

    fn same_status(&self, engine: &DiagramSync) -> bool {
        self.connection == engine.connection_state()
            && self.selection.as_ref() == engine.interaction().selection()
            && self.generating == engine.generation().is_generating()
            && self.last_failure.as_ref() == engine.generation().last_failure()
            && self.completed_generations == engine.generation().completed_count()
            && self.joins == engine.join_count()
    }
}

/// Handle to a running sync worker.
pub struct SyncHandle {
    diagram_id: DiagramId,
    commands: mpsc::Sender<Command>,
    bus: MessageBus,
    view: watch::Receiver<SyncView>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    pub fn diagram_id(&self) -> DiagramId {
        self.diagram_id
    }

    /// Latest published view.
    pub fn view(&self) -> SyncView {
        self.view.borrow().clone()
    }

    /// A receiver that wakes on every published change.
    pub fn watch(&self) -> watch::Receiver<SyncView> {
        self.view.clone()
    }

    /// Inbound events of the given kinds, after they were applied.
    pub fn subscribe(&self, kinds: &[EventKind]) -> Subscription {
        self.bus.subscribe(kinds)
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Signal that the rendering surface is initialised. The join is sent
    /// once both this and the connection are in place.
    pub async fn surface_ready(&self) -> Result<(), RuntimeError> {
        self.commands
            .send(Command::SurfaceReady)
            .await
            .map_err(|_| RuntimeError::Stopped)
    }

    pub async fn perform(&self, action: LocalAction) -> Result<bool, RuntimeError> {
        self.request(|reply| Command::Local { action, reply }).await
    }

    pub async fn generate(&self, prompt: &str, mode: GenerationMode) -> Result<(), RuntimeError> {
        let prompt = prompt.to_string();
        self.request(|reply| Command::GenerateFromPrompt {
            prompt,
            mode,
            reply,
        })
        .await
    }

    /// Prepare `bytes` and request image generation. Empty bytes count as
    /// no image selected.
    pub async fn generate_from_image(
        &self,
        bytes: Vec<u8>,
        context: Option<String>,
        mode: GenerationMode,
    ) -> Result<(), RuntimeError> {
        self.request(|reply| Command::GenerateFromImage {
            bytes,
            context,
            mode,
            reply,
        })
        .await
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| RuntimeError::Stopped)?;
        rx.await.map_err(|_| RuntimeError::Stopped)?
    }

    /// Stop the worker and close the connection.
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown).await;
        let _ = self.task.await;
    }
}

pub struct SyncRuntime;

impl SyncRuntime {
    /// Spawn the worker for `diagram_id` and start connecting.
    pub fn spawn(config: ClientConfig, diagram_id: DiagramId) -> SyncHandle {
        let (commands_tx, commands_rx) = mpsc::channel(64);
        let bus = MessageBus::new();
        let engine = DiagramSync::new(diagram_id, &config);
        let (view_tx, view_rx) = watch::channel(SyncView::of(&engine, 0));

        let mut client = SyncClient::new(config.ws_url.clone(), config.token.clone());
        let events = client
            .take_event_rx()
            .unwrap_or_else(|| mpsc::channel(1).1);

        let worker = Worker {
            config,
            engine,
            client,
            events,
            commands: commands_rx,
            bus: bus.clone(),
            view_tx,
            revision: 0,
            reconnect_at: None,
        };
        let task = tokio::spawn(worker.run());

        SyncHandle {
            diagram_id,
            commands: commands_tx,
            bus,
            view: view_rx,
            task,
        }
    }
}

struct Worker {
    config: ClientConfig,
    engine: DiagramSync,
    client: SyncClient,
    events: mpsc::Receiver<ChannelEvent>,
    commands: mpsc::Receiver<Command>,
    bus: MessageBus,
    view_tx: watch::Sender<SyncView>,
    revision: u64,
    reconnect_at: Option<Instant>,
}

impl Worker {
    async fn run(mut self) {
        self.try_connect().await;
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(event) = self.events.recv() => self.on_channel(event),
                command = self.commands.recv() => match command {
                    None | Some(Command::Shutdown) => break,
                    Some(command) => self.on_command(command).await,
                },
                _ = ticker.tick() => self.on_tick().await,
            }
            self.flush().await;
            self.publish_view();
        }

        self.client.disconnect();
        log::info!("Sync runtime for diagram {} stopped", self.engine.diagram_id());
    }

    async fn try_connect(&mut self) {
        self.reconnect_at = None;
        self.engine.connecting();
        if let Err(e) = self.client.connect().await {
            log::warn!("Connect to {} failed: {e}", self.client.url());
            self.engine.disconnected();
            self.reconnect_at = Some(Instant::now() + self.config.reconnect_delay);
        }
    }

    fn on_channel(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected => self.engine.connected(),
            ChannelEvent::Disconnected => {
                self.engine.disconnected();
                self.reconnect_at = Some(Instant::now() + self.config.reconnect_delay);
            }
            ChannelEvent::Inbound(event) => {
                let published = event.clone();
                self.engine.apply(event, Instant::now());
                self.bus.publish(&published);
            }
        }
    }

    async fn on_command(&mut self, command: Command) {
        let now = Instant::now();
        match command {
            Command::Local { action, reply } => {
                let result = self.engine.perform(action, now).map_err(RuntimeError::from);
                let _ = reply.send(result);
            }
            Command::SurfaceReady => self.engine.surface_ready(),
            Command::GenerateFromPrompt {
                prompt,
                mode,
                reply,
            } => {
                let result = self
                    .engine
                    .request_generation(&prompt, mode, now)
                    .map_err(RuntimeError::from);
                let _ = reply.send(result);
            }
            Command::GenerateFromImage {
                bytes,
                context,
                mode,
                reply,
            } => {
                let result = self.generate_from_image(bytes, context, mode).await;
                let _ = reply.send(result);
            }
            Command::Shutdown => {}
        }
    }

    async fn generate_from_image(
        &mut self,
        bytes: Vec<u8>,
        context: Option<String>,
        mode: GenerationMode,
    ) -> Result<(), RuntimeError> {
        let image = if bytes.is_empty() {
            None
        } else {
            let max = self.config.max_image_dimension;
            let quality = self.config.jpeg_quality;
            let prepared = tokio::task::spawn_blocking(move || prepare_image(&bytes, max, quality))
                .await
                .map_err(|e| GenerationError::Image(ImageError::Encode(e.to_string())))?
                .map_err(GenerationError::from)?;
            Some(prepared)
        };
        self.engine
            .request_image_generation(image, context.as_deref(), mode, Instant::now())
            .map_err(RuntimeError::from)
    }

    async fn on_tick(&mut self) {
        let now = Instant::now();
        self.engine.tick(now);
        if self.reconnect_at.is_some_and(|at| now >= at) {
            log::info!("Reconnecting to {}", self.client.url());
            self.try_connect().await;
        }
    }

    /// Send everything the session released. On the first failure the rest
    /// of the batch is dropped; the next snapshot is authoritative.
    async fn flush(&mut self) -> usize {
        let pending = self.engine.drain_outbound(Instant::now());
        let total = pending.len();
        for (sent, event) in pending.iter().enumerate() {
            if let Err(e) = self.client.send(event).await {
                let dropped = total - sent;
                log::warn!(
                    "Failed to send {}: {e}; dropped {dropped} of {total} outbound events",
                    event.kind()
                );
                return dropped;
            }
        }
        0
    }

    fn publish_view(&mut self) {
        let changes = self.engine.drain_changes();
        if changes.is_empty() && self.view_tx.borrow().same_status(&self.engine) {
            return;
        }
        log::trace!("Publishing view after {} graph changes", changes.len());
        self.revision += 1;
        self.view_tx.send_replace(SyncView::of(&self.engine, self.revision));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn unreachable_config() -> ClientConfig {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        ClientConfig {
            ws_url: format!("ws://127.0.0.1:{port}"),
            reconnect_delay: Duration::from_secs(60),
            ..ClientConfig::default()
        }
    }

    #[tokio::test]
    async fn test_offline_runtime_applies_locally() {
        let handle = SyncRuntime::spawn(unreachable_config(), DiagramId(1));
        assert_eq!(handle.diagram_id(), DiagramId(1));

        let changed = handle
            .perform(LocalAction::CreateClass {
                name: Some("Order".into()),
                position: classgraph_core::Point::new(10.0, 10.0),
                attributes: vec![],
            })
            .await
            .unwrap();
        assert!(changed);

        let mut watch = handle.watch();
        let view = tokio::time::timeout(
            Duration::from_secs(2),
            watch.wait_for(|view| view.graph.node_count() == 1),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        assert_eq!(view.connection, ConnectionState::Disconnected);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_generation_requires_join() {
        let handle = SyncRuntime::spawn(unreachable_config(), DiagramId(1));
        let err = handle
            .generate("a library", GenerationMode::Merge)
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Generation(GenerationError::NotJoined)));

        let err = handle
            .generate("   ", GenerationMode::Merge)
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Generation(GenerationError::EmptyPrompt)));

        let err = handle
            .generate_from_image(Vec::new(), None, GenerationMode::Merge)
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Generation(GenerationError::MissingImage)));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_flush_reports_dropped_batch() {
        let config = unreachable_config();
        let mut engine = DiagramSync::new(DiagramId(1), &config);
        engine.surface_ready();
        engine.connecting();
        engine.connected();
        engine
            .perform(
                LocalAction::CreateClass {
                    name: Some("Order".into()),
                    position: classgraph_core::Point::new(0.0, 0.0),
                    attributes: vec![],
                },
                Instant::now(),
            )
            .unwrap();

        let mut client = SyncClient::new(config.ws_url.clone(), None);
        let events = client.take_event_rx().unwrap();
        let (_commands_tx, commands) = mpsc::channel(1);
        let (view_tx, _view_rx) = watch::channel(SyncView::of(&engine, 0));
        let mut worker = Worker {
            config,
            engine,
            client,
            events,
            commands,
            bus: MessageBus::new(),
            view_tx,
            revision: 0,
            reconnect_at: None,
        };

        // Join plus the class add, neither of which can go out.
        assert_eq!(worker.flush().await, 2);
        assert_eq!(worker.flush().await, 0);
    }

    #[tokio::test]
    async fn test_graph_errors_are_returned() {
        let handle = SyncRuntime::spawn(unreachable_config(), DiagramId(1));
        let err = handle
            .perform(LocalAction::Rename {
                id: "missing".into(),
                name: "X".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Graph(GraphError::UnknownElement(_))));
        handle.shutdown().await;
    }
}
