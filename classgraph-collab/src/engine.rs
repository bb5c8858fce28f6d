//! The per-diagram sync engine.
//!
//! ```text
//!  local gesture ──► LocalMutationDispatcher ──┐
//!                                              ├──► GraphState ──► canvas
//!  inbound event ──► RemoteEventApplier ───────┘        │
//!                                                       │
//!  SyncSession (held / ready) ◄── dispatcher only ──────┘
//!        │
//!        └──► drain_outbound() ──► channel
//! ```
//!
//! [`DiagramSync`] is plain synchronous state. Time is passed in by the
//! caller, so the whole engine can be driven deterministically in tests and
//! by the async [`runtime`](crate::runtime) in production.

use std::time::Instant;

use classgraph_core::{
    Attribute, AttributePatch, ClassPatch, ElementId, GraphChange, GraphError, GraphState, Point,
    RelationKind,
};

use crate::applier::RemoteEventApplier;
use crate::config::ClientConfig;
use crate::debounce::DeletionDebouncer;
use crate::dispatcher::LocalMutationDispatcher;
use crate::generation::{validate_prompt, GenerationError, GenerationTracker, RequestKind};
use crate::image_prep::PreparedImage;
use crate::interaction::{Interaction, Selection};
use crate::lifecycle::{ConnectionLifecycle, ConnectionState};
use crate::protocol::{
    DiagramId, GenerationMode, ImageRequest, InboundEvent, OutboundEvent, PromptRequest,
};
use crate::session::SyncSession;

/// State shared by the dispatcher and the applier.
#[derive(Debug)]
pub struct SyncContext {
    pub diagram_id: DiagramId,
    pub graph: GraphState,
    pub session: SyncSession,
    pub debouncer: DeletionDebouncer,
    pub interaction: Interaction,
    pub generation: GenerationTracker,
}

impl SyncContext {
    pub fn new(diagram_id: DiagramId, config: &ClientConfig) -> Self {
        Self {
            diagram_id,
            graph: GraphState::new(),
            session: SyncSession::new(config.settle_window),
            debouncer: DeletionDebouncer::new(config.debounce_window),
            interaction: Interaction::new(),
            generation: GenerationTracker::new(config.prompt_timeout, config.image_timeout),
        }
    }
}

/// A user gesture, as a value. Lets the runtime accept gestures over a
/// channel.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalAction {
    CreateClass {
        name: Option<String>,
        position: Point,
        attributes: Vec<Attribute>,
    },
    Rename {
        id: ElementId,
        name: String,
    },
    UpdateClass {
        id: ElementId,
        patch: ClassPatch,
    },
    AddAttribute {
        id: ElementId,
        attribute: Option<Attribute>,
    },
    UpdateAttribute {
        id: ElementId,
        index: usize,
        patch: AttributePatch,
    },
    RemoveAttribute {
        id: ElementId,
        index: usize,
    },
    Connect {
        from: ElementId,
        to: ElementId,
        kind: RelationKind,
    },
    ChangeRelationKind {
        id: String,
        kind: RelationKind,
    },
    Rewire {
        id: String,
        from: ElementId,
        to: ElementId,
    },
    MoveWaypoints {
        id: String,
        vertices: Vec<Point>,
    },
    ReleaseWaypoints {
        id: String,
        vertices: Vec<Point>,
    },
    Drag {
        id: ElementId,
        position: Point,
    },
    Drop {
        id: ElementId,
        position: Point,
    },
    Select(Selection),
    ClearSelection,
    Delete {
        id: String,
    },
    DeleteSelected,
}

/// One client's view of one diagram.
#[derive(Debug)]
pub struct DiagramSync {
    ctx: SyncContext,
    lifecycle: ConnectionLifecycle,
}

impl DiagramSync {
    pub fn new(diagram_id: DiagramId, config: &ClientConfig) -> Self {
        Self {
            ctx: SyncContext::new(diagram_id, config),
            lifecycle: ConnectionLifecycle::new(diagram_id),
        }
    }

    pub fn diagram_id(&self) -> DiagramId {
        self.ctx.diagram_id
    }

    pub fn graph(&self) -> &GraphState {
        &self.ctx.graph
    }

    pub fn interaction(&self) -> &Interaction {
        &self.ctx.interaction
    }

    pub fn generation(&self) -> &GenerationTracker {
        &self.ctx.generation
    }

    pub fn session(&self) -> &SyncSession {
        &self.ctx.session
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.lifecycle.state()
    }

    /// Joins sent so far; more than one means the channel was re-established.
    pub fn join_count(&self) -> u64 {
        self.lifecycle.join_count()
    }

    /// Changes the canvas has not consumed yet.
    pub fn drain_changes(&mut self) -> Vec<GraphChange> {
        self.ctx.graph.drain_changes()
    }

    // ─── Connection ──────────────────────────────────────────────

    pub fn connecting(&mut self) {
        self.lifecycle.connecting();
    }

    pub fn connected(&mut self) {
        if let Some(join) = self.lifecycle.connected() {
            self.join(join);
        }
    }

    pub fn surface_ready(&mut self) {
        if let Some(join) = self.lifecycle.surface_ready() {
            self.join(join);
        }
    }

    fn join(&mut self, join: OutboundEvent) {
        self.ctx.session.set_joined(true);
        self.ctx.session.send_control(join);
    }

    /// Channel lost. Local state is kept until the next snapshot replaces it.
    pub fn disconnected(&mut self) {
        if self.lifecycle.state() != ConnectionState::Disconnected {
            log::warn!("Lost connection to diagram {}", self.ctx.diagram_id);
        }
        self.lifecycle.disconnected();
        self.ctx.session.set_joined(false);
        self.ctx.interaction.end_drag();
        self.ctx.interaction.end_reshape();
    }

    // ─── Local and remote mutations ──────────────────────────────

    pub fn local(&mut self, now: Instant) -> LocalMutationDispatcher<'_> {
        LocalMutationDispatcher::new(&mut self.ctx, now)
    }

    /// Apply an inbound event. Never produces outbound events.
    pub fn apply(&mut self, event: InboundEvent, now: Instant) -> bool {
        RemoteEventApplier::new(&mut self.ctx, now).apply(event)
    }

    /// Run a gesture. Returns whether the graph (or selection) changed.
    pub fn perform(&mut self, action: LocalAction, now: Instant) -> Result<bool, GraphError> {
        let action = match action {
            LocalAction::Select(selection) => {
                self.ctx.interaction.select(selection);
                return Ok(true);
            }
            LocalAction::ClearSelection => {
                self.ctx.interaction.clear_selection();
                return Ok(true);
            }
            other => other,
        };

        let mut local = self.local(now);
        match action {
            LocalAction::CreateClass {
                name,
                position,
                attributes,
            } => {
                let name = name.unwrap_or_else(|| classgraph_core::DEFAULT_CLASS_NAME.to_string());
                local.create_class(&name, position, attributes);
                Ok(true)
            }
            LocalAction::Rename { id, name } => local.rename_class(&id, &name),
            LocalAction::UpdateClass { id, patch } => local.update_class(&id, patch),
            LocalAction::AddAttribute { id, attribute } => {
                local.add_attribute(&id, attribute.unwrap_or_else(Attribute::placeholder))?;
                Ok(true)
            }
            LocalAction::UpdateAttribute { id, index, patch } => {
                local.update_attribute(&id, index, patch)
            }
            LocalAction::RemoveAttribute { id, index } => {
                local.remove_attribute(&id, index)?;
                Ok(true)
            }
            LocalAction::Connect { from, to, kind } => {
                local.connect(&from, &to, kind)?;
                Ok(true)
            }
            LocalAction::ChangeRelationKind { id, kind } => local.change_relation_kind(&id, kind),
            LocalAction::Rewire { id, from, to } => local.rewire_relation(&id, &from, &to),
            LocalAction::MoveWaypoints { id, vertices } => local.move_waypoints(&id, vertices),
            LocalAction::ReleaseWaypoints { id, vertices } => {
                local.release_waypoints(&id, vertices)?;
                Ok(true)
            }
            LocalAction::Drag { id, position } => local.drag_node(&id, position),
            LocalAction::Drop { id, position } => {
                local.drop_node(&id, position)?;
                Ok(true)
            }
            LocalAction::Delete { id } => Ok(local.delete(&id).is_some()),
            LocalAction::DeleteSelected => Ok(local.delete_selected().is_some()),
            LocalAction::Select(_) | LocalAction::ClearSelection => Ok(false),
        }
    }

    // ─── Generation ──────────────────────────────────────────────

    pub fn request_generation(
        &mut self,
        prompt: &str,
        mode: GenerationMode,
        now: Instant,
    ) -> Result<(), GenerationError> {
        let prompt = validate_prompt(prompt)?;
        if !self.lifecycle.is_joined() {
            return Err(GenerationError::NotJoined);
        }
        self.ctx.generation.begin(RequestKind::Prompt, now)?;
        log::info!("Requesting {mode} generation from prompt");
        self.ctx
            .session
            .send_control(OutboundEvent::GenerateFromPrompt(PromptRequest {
                diagram_id: self.ctx.diagram_id,
                prompt,
                mode,
            }));
        Ok(())
    }

    pub fn request_image_generation(
        &mut self,
        image: Option<PreparedImage>,
        context: Option<&str>,
        mode: GenerationMode,
        now: Instant,
    ) -> Result<(), GenerationError> {
        let image = image.ok_or(GenerationError::MissingImage)?;
        if !self.lifecycle.is_joined() {
            return Err(GenerationError::NotJoined);
        }
        self.ctx.generation.begin(RequestKind::Image, now)?;
        log::info!(
            "Requesting {mode} generation from a {}x{} image",
            image.width,
            image.height
        );
        self.ctx
            .session
            .send_control(OutboundEvent::GenerateFromImage(ImageRequest {
                diagram_id: self.ctx.diagram_id,
                image_data: image.data,
                mime_type: image.mime_type.to_string(),
                additional_prompt: context.map(str::trim).unwrap_or_default().to_string(),
                mode,
            }));
        Ok(())
    }

    // ─── Housekeeping ────────────────────────────────────────────

    /// Advance time-based state. Returns `true` when a generation request
    /// just timed out.
    pub fn tick(&mut self, now: Instant) -> bool {
        self.ctx.generation.tick(now)
    }

    /// Outbound events ready to be sent, in order.
    pub fn drain_outbound(&mut self, now: Instant) -> Vec<OutboundEvent> {
        self.ctx.session.drain_outbound(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        ClassAdd, ClassData, ClassUpdate, DiagramContent, DiagramSnapshot, EventKind,
        GeneratedContent, JoinDiagram, RelationAdd, RelationData, RelationUpdate,
    };
    use classgraph_core::{ClassNode, Relation};
    use std::time::Duration;

    fn joined_engine(now: Instant) -> DiagramSync {
        let mut engine = DiagramSync::new(DiagramId(9), &ClientConfig::default());
        engine.connecting();
        engine.connected();
        engine.surface_ready();
        let sent = engine.drain_outbound(now);
        assert_eq!(
            sent,
            vec![OutboundEvent::Join(JoinDiagram {
                diagram_id: DiagramId(9)
            })]
        );
        engine
    }

    fn snapshot(content: DiagramContent) -> InboundEvent {
        InboundEvent::Snapshot(DiagramSnapshot { content })
    }

    fn content_with(nodes: &[(&str, &str)], relations: &[(&str, &str, &str)]) -> DiagramContent {
        let mut content = DiagramContent::default();
        for (id, name) in nodes {
            let node = ClassNode::new(*id, *name, Point::new(10.0, 10.0));
            content
                .elements
                .insert(id.to_string(), ClassData::from_node(&node));
        }
        for (id, from, to) in relations {
            let relation = Relation::new(*id, *from, *to, RelationKind::OneToMany);
            content
                .relations
                .insert(id.to_string(), RelationData::from_relation(&relation));
        }
        content
    }

    #[test]
    fn test_local_add_then_remote_rename() {
        let now = Instant::now();
        let mut engine = joined_engine(now);

        let node = ClassNode::new("class_1", "Class", Point::new(120.0, 80.0));
        assert!(engine.local(now).add_class(node.clone()));
        assert!(!engine.local(now).add_class(node.clone()));
        assert_eq!(
            engine.drain_outbound(now),
            vec![OutboundEvent::ClassAdd(ClassAdd {
                diagram_id: Some(DiagramId(9)),
                class_id: "class_1".into(),
                class_data: ClassData::from_node(&node),
            })]
        );

        let rename = InboundEvent::ClassUpdated(ClassUpdate {
            diagram_id: Some(DiagramId(9)),
            class_id: "class_1".into(),
            new_data: ClassPatch::rename("Account"),
        });
        assert!(engine.apply(rename, now));
        assert_eq!(engine.graph().node("class_1").unwrap().name, "Account");
        assert!(engine.drain_outbound(now + Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn test_relation_kind_change_payload() {
        let now = Instant::now();
        let mut engine = joined_engine(now);
        engine.apply(snapshot(content_with(&[("a", "A"), ("b", "B")], &[])), now);
        engine.apply(
            InboundEvent::RelationAdded(RelationAdd {
                diagram_id: None,
                relation_id: "r1".into(),
                data: RelationData::from_relation(&Relation::new(
                    "r1",
                    "a",
                    "b",
                    RelationKind::OneToMany,
                )),
            }),
            now,
        );

        let later = now + Duration::from_secs(1);
        let changed = engine
            .perform(
                LocalAction::ChangeRelationKind {
                    id: "r1".into(),
                    kind: RelationKind::Composition,
                },
                later,
            )
            .unwrap();
        assert!(changed);

        let sent = engine.drain_outbound(later);
        assert_eq!(sent.len(), 1);
        let OutboundEvent::RelationUpdate(RelationUpdate {
            relation_id, data, ..
        }) = &sent[0]
        else {
            panic!("expected relation update, got {:?}", sent[0]);
        };
        assert_eq!(relation_id, "r1");
        assert_eq!(data.kind, Some(RelationKind::Composition));
        assert_eq!(data.attrs, Some(RelationKind::Composition.style()));
        assert_eq!(engine.graph().relation("r1").unwrap().label, "Composition");
    }

    #[test]
    fn test_snapshot_then_immediate_edit_is_held() {
        let now = Instant::now();
        let mut engine = joined_engine(now);
        engine.apply(snapshot(content_with(&[("a", "A")], &[])), now);

        engine
            .perform(
                LocalAction::Rename {
                    id: "a".into(),
                    name: "Account".into(),
                },
                now + Duration::from_millis(20),
            )
            .unwrap();
        assert!(engine
            .drain_outbound(now + Duration::from_millis(50))
            .is_empty());

        let released = engine.drain_outbound(now + Duration::from_millis(100));
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].kind(), EventKind::ClassUpdate);
    }

    #[test]
    fn test_reconnect_resnapshot_converges() {
        let now = Instant::now();
        let mut engine = joined_engine(now);
        engine.apply(snapshot(content_with(&[("a", "A"), ("b", "B")], &[("r1", "a", "b")])), now);

        engine.disconnected();
        assert_eq!(engine.connection_state(), ConnectionState::Disconnected);
        let offline = now + Duration::from_secs(1);
        engine
            .perform(LocalAction::Delete { id: "b".into() }, offline)
            .unwrap();
        assert!(engine.drain_outbound(offline).is_empty());

        engine.connecting();
        engine.connected();
        let rejoin = engine.drain_outbound(offline);
        assert_eq!(rejoin.len(), 1);
        assert_eq!(rejoin[0].kind(), EventKind::JoinDiagram);

        let server = content_with(&[("a", "Account"), ("b", "B"), ("c", "C")], &[("r1", "a", "b")]);
        engine.apply(snapshot(server.clone()), offline);
        assert_eq!(DiagramContent::from_graph(engine.graph()), server);
    }

    #[test]
    fn test_generated_merge_never_deletes() {
        let now = Instant::now();
        let mut engine = joined_engine(now);
        engine.apply(snapshot(content_with(&[("a", "A"), ("b", "B")], &[("r1", "a", "b")])), now);

        let mut generated = content_with(&[("c", "C")], &[("r2", "a", "c")]);
        generated.elements.insert(
            "a".into(),
            ClassData {
                name: Some("Account".into()),
                position: None,
                attributes: None,
            },
        );
        engine.apply(
            InboundEvent::Generated(GeneratedContent {
                content: generated,
                mode: GenerationMode::Merge,
            }),
            now,
        );

        let graph = engine.graph();
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.relation_count(), 2);
        let a = graph.node("a").unwrap();
        assert_eq!(a.name, "Account");
        assert_eq!(a.position, Point::new(10.0, 10.0));
        assert!(engine.drain_outbound(now + Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn test_generation_requires_join_and_prompt() {
        let now = Instant::now();
        let mut offline = DiagramSync::new(DiagramId(1), &ClientConfig::default());
        assert_eq!(
            offline.request_generation("a shop", GenerationMode::Merge, now),
            Err(GenerationError::NotJoined)
        );

        let mut engine = joined_engine(now);
        assert_eq!(
            engine.request_generation("  ", GenerationMode::Merge, now),
            Err(GenerationError::EmptyPrompt)
        );
        assert_eq!(
            engine.request_image_generation(None, None, GenerationMode::Replace, now),
            Err(GenerationError::MissingImage)
        );
        engine
            .request_generation("a shop with orders", GenerationMode::Replace, now)
            .unwrap();
        assert!(engine.generation().is_generating());
        let sent = engine.drain_outbound(now);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind(), EventKind::GenerateFromPrompt);

        engine.tick(now + Duration::from_secs(31));
        assert!(!engine.generation().is_generating());
    }

    #[test]
    fn test_image_request_payload() {
        let now = Instant::now();
        let mut engine = joined_engine(now);
        let image = PreparedImage {
            data: "QUJD".into(),
            mime_type: "image/jpeg",
            width: 10,
            height: 10,
        };
        engine
            .request_image_generation(Some(image), Some(" hospital "), GenerationMode::Merge, now)
            .unwrap();
        let sent = engine.drain_outbound(now);
        let OutboundEvent::GenerateFromImage(request) = &sent[0] else {
            panic!("expected image request");
        };
        assert_eq!(request.additional_prompt, "hospital");
        assert_eq!(request.mime_type, "image/jpeg");
        assert_eq!(request.image_data, "QUJD");
    }

    #[test]
    fn test_select_and_delete_selected() {
        let now = Instant::now();
        let mut engine = joined_engine(now);
        engine.apply(snapshot(content_with(&[("a", "A"), ("b", "B")], &[("r1", "a", "b")])), now);
        let later = now + Duration::from_secs(1);
        engine
            .perform(LocalAction::Select(Selection::Relation("r1".into())), later)
            .unwrap();
        assert!(engine.perform(LocalAction::DeleteSelected, later).unwrap());
        assert!(engine.interaction().selection().is_none());
        assert_eq!(engine.graph().relation_count(), 0);
        let sent = engine.drain_outbound(later);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind(), EventKind::RelationRemove);
    }
}
