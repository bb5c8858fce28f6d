//! Local user actions: mutate the graph, then queue the matching event.
//!
//! Every operation applies to [`GraphState`](classgraph_core::GraphState)
//! synchronously and optimistically. Nothing is rolled back if the server
//! later disagrees; the next snapshot wins. Operations that change nothing
//! send nothing.

use std::time::Instant;

use classgraph_core::{
    new_element_id, new_relation_id, Attribute, AttributePatch, ClassNode, ClassPatch, ElementId,
    Entity, GraphError, Point, Relation, RelationId, RelationKind, RelationPatch, Removal,
    DEFAULT_CLASS_NAME,
};

use crate::engine::SyncContext;
use crate::protocol::{
    AttributeAdd, AttributeRemove, AttributeUpdate, ClassAdd, ClassData, ClassRemove, ClassUpdate,
    DiagramId, OutboundEvent, PositionUpdate, RelationAdd, RelationChanges, RelationData,
    RelationRemove, RelationUpdate,
};

pub struct LocalMutationDispatcher<'a> {
    ctx: &'a mut SyncContext,
    now: Instant,
}

impl<'a> LocalMutationDispatcher<'a> {
    pub fn new(ctx: &'a mut SyncContext, now: Instant) -> Self {
        Self { ctx, now }
    }

    fn diagram_id(&self) -> Option<DiagramId> {
        Some(self.ctx.diagram_id)
    }

    fn emit(&mut self, event: OutboundEvent) {
        self.ctx.session.emit(event, self.now);
    }

    /// Removal notifications go out at most once per id per debounce window.
    fn emit_removal(&mut self, event: OutboundEvent) {
        let Some(id) = event.removed_id() else {
            return;
        };
        if self.ctx.debouncer.should_notify(id, self.now) {
            self.emit(event);
        }
    }

    // ─── Classes ─────────────────────────────────────────────────

    /// New default class at `position`.
    pub fn create_class_at(&mut self, position: Point) -> ElementId {
        self.create_class(DEFAULT_CLASS_NAME, position, Vec::new())
    }

    pub fn create_class(
        &mut self,
        name: &str,
        position: Point,
        attributes: Vec<Attribute>,
    ) -> ElementId {
        let node = ClassNode::new(new_element_id(), name, position).with_attributes(attributes);
        let id = node.id.clone();
        if !self.add_class(node) {
            log::warn!("Generated element id {id} already exists");
        }
        id
    }

    /// Insert a fully specified class. `false` (and nothing sent) if the id
    /// is taken.
    pub fn add_class(&mut self, node: ClassNode) -> bool {
        let id = node.id.clone();
        let class_data = ClassData::from_node(&node);
        if !self.ctx.graph.add_node(node) {
            return false;
        }
        self.emit(OutboundEvent::ClassAdd(ClassAdd {
            diagram_id: self.diagram_id(),
            class_id: id,
            class_data,
        }));
        true
    }

    pub fn rename_class(&mut self, id: &str, name: &str) -> Result<bool, GraphError> {
        self.update_class(id, ClassPatch::rename(name))
    }

    pub fn update_class(&mut self, id: &str, patch: ClassPatch) -> Result<bool, GraphError> {
        if !self.ctx.graph.update_node(id, &patch)? {
            return Ok(false);
        }
        self.emit(OutboundEvent::ClassUpdate(ClassUpdate {
            diagram_id: self.diagram_id(),
            class_id: id.to_string(),
            new_data: patch,
        }));
        Ok(true)
    }

    // ─── Attributes ──────────────────────────────────────────────

    /// Append the default `attribute: String` row.
    pub fn add_placeholder_attribute(&mut self, id: &str) -> Result<usize, GraphError> {
        self.add_attribute(id, Attribute::placeholder())
    }

    pub fn add_attribute(&mut self, id: &str, attribute: Attribute) -> Result<usize, GraphError> {
        let index = self.ctx.graph.add_attribute(id, attribute.clone())?;
        self.emit(OutboundEvent::AttributeAdd(AttributeAdd {
            diagram_id: self.diagram_id(),
            class_id: id.to_string(),
            attribute,
        }));
        Ok(index)
    }

    pub fn update_attribute(
        &mut self,
        id: &str,
        index: usize,
        patch: AttributePatch,
    ) -> Result<bool, GraphError> {
        if !self.ctx.graph.update_attribute(id, index, &patch)? {
            return Ok(false);
        }
        self.emit(OutboundEvent::AttributeUpdate(AttributeUpdate {
            diagram_id: self.diagram_id(),
            class_id: id.to_string(),
            attr_index: index,
            new_data: patch,
        }));
        Ok(true)
    }

    pub fn remove_attribute(&mut self, id: &str, index: usize) -> Result<Attribute, GraphError> {
        let removed = self.ctx.graph.remove_attribute(id, index)?;
        self.emit(OutboundEvent::AttributeRemove(AttributeRemove {
            diagram_id: self.diagram_id(),
            class_id: id.to_string(),
            attr_index: index,
        }));
        Ok(removed)
    }

    // ─── Relations ───────────────────────────────────────────────

    /// Connect two distinct classes.
    pub fn connect(
        &mut self,
        from: &str,
        to: &str,
        kind: RelationKind,
    ) -> Result<RelationId, GraphError> {
        if from == to {
            return Err(GraphError::SelfRelation(from.to_string()));
        }
        let relation = Relation::new(new_relation_id(), from, to, kind);
        let id = relation.id.clone();
        let data = RelationData::from_relation(&relation);
        self.ctx.graph.add_relation(relation)?;
        self.emit(OutboundEvent::RelationAdd(RelationAdd {
            diagram_id: self.diagram_id(),
            relation_id: id.clone(),
            data,
        }));
        Ok(id)
    }

    pub fn change_relation_kind(&mut self, id: &str, kind: RelationKind) -> Result<bool, GraphError> {
        if !self.ctx.graph.update_relation(id, &RelationPatch::kind(kind))? {
            return Ok(false);
        }
        self.emit_relation_update(id, RelationChanges::kind(kind));
        Ok(true)
    }

    /// Point an existing relation at different classes.
    pub fn rewire_relation(&mut self, id: &str, from: &str, to: &str) -> Result<bool, GraphError> {
        if from == to {
            return Err(GraphError::SelfRelation(from.to_string()));
        }
        let patch = RelationPatch {
            endpoints: Some((from.to_string(), to.to_string())),
            ..RelationPatch::default()
        };
        if !self.ctx.graph.update_relation(id, &patch)? {
            return Ok(false);
        }
        self.emit_relation_update(
            id,
            RelationChanges {
                from: Some(from.to_string()),
                to: Some(to.to_string()),
                ..RelationChanges::default()
            },
        );
        Ok(true)
    }

    /// Intermediate waypoint drag. Marks the relation as being reshaped, so
    /// remote waypoint updates leave it alone until
    /// [`release_waypoints`](Self::release_waypoints).
    pub fn move_waypoints(&mut self, id: &str, vertices: Vec<Point>) -> Result<bool, GraphError> {
        if !self
            .ctx
            .graph
            .update_relation(id, &RelationPatch::vertices(vertices.clone()))?
        {
            return Ok(false);
        }
        self.ctx.interaction.begin_reshape(id);
        self.emit_relation_update(id, RelationChanges::vertices(vertices));
        Ok(true)
    }

    /// Final waypoints of a drag. Always announced.
    pub fn release_waypoints(&mut self, id: &str, vertices: Vec<Point>) -> Result<(), GraphError> {
        self.ctx
            .graph
            .update_relation(id, &RelationPatch::vertices(vertices.clone()))?;
        self.ctx.interaction.end_reshape();
        self.emit_relation_update(id, RelationChanges::vertices(vertices));
        Ok(())
    }

    fn emit_relation_update(&mut self, id: &str, data: RelationChanges) {
        self.emit(OutboundEvent::RelationUpdate(RelationUpdate {
            diagram_id: self.diagram_id(),
            relation_id: id.to_string(),
            data,
        }));
    }

    // ─── Movement ────────────────────────────────────────────────

    /// Intermediate drag position. Marks `id` as being dragged, so remote
    /// position updates leave it alone until [`drop_node`](Self::drop_node).
    pub fn drag_node(&mut self, id: &str, position: Point) -> Result<bool, GraphError> {
        let moved = self.ctx.graph.move_node(id, position)?;
        self.ctx.interaction.begin_drag(id);
        if moved {
            log::trace!("Dragging {id} to ({}, {})", position.x, position.y);
            self.emit(OutboundEvent::ElementMoving(PositionUpdate {
                diagram_id: self.diagram_id(),
                element_id: id.to_string(),
                position,
            }));
        }
        Ok(moved)
    }

    /// Final position of a drag. Always announced.
    pub fn drop_node(&mut self, id: &str, position: Point) -> Result<(), GraphError> {
        self.ctx.graph.move_node(id, position)?;
        self.ctx.interaction.end_drag();
        self.emit(OutboundEvent::ElementMoved(PositionUpdate {
            diagram_id: self.diagram_id(),
            element_id: id.to_string(),
            position,
        }));
        Ok(())
    }

    // ─── Removal ─────────────────────────────────────────────────

    /// Delete a class or relation. Deleting a class also deletes every
    /// relation attached to it; each removed relation is announced once,
    /// followed by the class itself.
    pub fn delete(&mut self, id: &str) -> Option<Removal> {
        let Some(removal) = self.ctx.graph.remove(id) else {
            log::debug!("Delete of unknown id {id} ignored");
            return None;
        };

        for relation in &removal.cascaded {
            self.ctx.interaction.forget(&relation.id);
            self.emit_removal(OutboundEvent::RelationRemove(RelationRemove {
                diagram_id: self.diagram_id(),
                relation_id: relation.id.clone(),
            }));
        }

        let event = match &removal.entity {
            Entity::Node(node) => OutboundEvent::ClassRemove(ClassRemove {
                diagram_id: self.diagram_id(),
                class_id: node.id.clone(),
            }),
            Entity::Edge(relation) => OutboundEvent::RelationRemove(RelationRemove {
                diagram_id: self.diagram_id(),
                relation_id: relation.id.clone(),
            }),
        };
        self.emit_removal(event);
        self.ctx.interaction.forget(id);
        Some(removal)
    }

    /// Delete whatever is selected.
    pub fn delete_selected(&mut self) -> Option<Removal> {
        let id = self.ctx.interaction.selection()?.id().to_string();
        self.delete(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::protocol::EventKind;
    use classgraph_core::DataType;
    use std::time::Duration;

    fn joined_context() -> SyncContext {
        let mut ctx = SyncContext::new(DiagramId(1), &ClientConfig::default());
        ctx.session.set_joined(true);
        ctx
    }

    fn drain(ctx: &mut SyncContext, now: Instant) -> Vec<OutboundEvent> {
        ctx.session.drain_outbound(now)
    }

    #[test]
    fn test_create_class_emits_add() {
        let mut ctx = joined_context();
        let now = Instant::now();
        let id = LocalMutationDispatcher::new(&mut ctx, now).create_class_at(Point::new(30.0, 40.0));

        let node = ctx.graph.node(&id).unwrap();
        assert_eq!(node.name, "Class");
        let sent = drain(&mut ctx, now);
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            OutboundEvent::ClassAdd(add) => {
                assert_eq!(add.class_id, id);
                assert_eq!(add.diagram_id, Some(DiagramId(1)));
                assert_eq!(add.class_data.position, Some(Point::new(30.0, 40.0)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_rename_to_same_name_is_silent() {
        let mut ctx = joined_context();
        let now = Instant::now();
        let mut local = LocalMutationDispatcher::new(&mut ctx, now);
        let id = local.create_class_at(Point::default());
        assert_eq!(local.rename_class(&id, "Account"), Ok(true));
        assert_eq!(local.rename_class(&id, "Account"), Ok(false));
        assert_eq!(drain(&mut ctx, now).len(), 2);
    }

    #[test]
    fn test_attribute_round() {
        let mut ctx = joined_context();
        let now = Instant::now();
        let mut local = LocalMutationDispatcher::new(&mut ctx, now);
        let id = local.create_class_at(Point::default());
        assert_eq!(local.add_placeholder_attribute(&id), Ok(0));
        let patch = AttributePatch {
            name: Some("price".into()),
            data_type: Some(DataType::BigDecimal),
        };
        assert_eq!(local.update_attribute(&id, 0, patch), Ok(true));
        assert!(local.remove_attribute(&id, 3).is_err());
        let removed = local.remove_attribute(&id, 0).unwrap();
        assert_eq!(removed, Attribute::new("price", DataType::BigDecimal));

        let kinds: Vec<_> = drain(&mut ctx, now).iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::ClassAdd,
                EventKind::AttributeAdd,
                EventKind::AttributeUpdate,
                EventKind::AttributeRemove
            ]
        );
    }

    #[test]
    fn test_connect_rejects_self_and_missing() {
        let mut ctx = joined_context();
        let now = Instant::now();
        let mut local = LocalMutationDispatcher::new(&mut ctx, now);
        let a = local.create_class_at(Point::default());
        assert_eq!(
            local.connect(&a, &a, RelationKind::OneToOne),
            Err(GraphError::SelfRelation(a.clone()))
        );
        assert!(matches!(
            local.connect(&a, "ghost", RelationKind::OneToOne),
            Err(GraphError::MissingEndpoint { .. })
        ));
        assert_eq!(ctx.graph.relation_count(), 0);
        assert_eq!(drain(&mut ctx, now).len(), 1);
    }

    #[test]
    fn test_delete_class_cascade_notifies_each_once() {
        let mut ctx = joined_context();
        let now = Instant::now();
        let mut local = LocalMutationDispatcher::new(&mut ctx, now);
        let a = local.create_class_at(Point::default());
        let b = local.create_class_at(Point::default());
        let c = local.create_class_at(Point::default());
        local.connect(&a, &b, RelationKind::OneToMany).unwrap();
        local.connect(&c, &a, RelationKind::Inheritance).unwrap();
        local.connect(&b, &c, RelationKind::OneToOne).unwrap();
        drain(&mut ctx, now);

        let mut local = LocalMutationDispatcher::new(&mut ctx, now);
        let removal = local.delete(&a).unwrap();
        assert_eq!(removal.cascaded.len(), 2);
        // The canvas reporting the same removals again changes nothing.
        assert!(local.delete(&a).is_none());
        for relation in &removal.cascaded {
            assert!(local.delete(&relation.id).is_none());
        }

        let sent = drain(&mut ctx, now);
        let relation_removals = sent
            .iter()
            .filter(|e| matches!(e, OutboundEvent::RelationRemove(_)))
            .count();
        let class_removals = sent
            .iter()
            .filter(|e| matches!(e, OutboundEvent::ClassRemove(_)))
            .count();
        assert_eq!(relation_removals, 2);
        assert_eq!(class_removals, 1);
        assert!(matches!(sent.last(), Some(OutboundEvent::ClassRemove(_))));
        assert_eq!(ctx.graph.relation_count(), 1);
    }

    #[test]
    fn test_readded_id_removed_again_within_window_is_debounced() {
        let mut ctx = joined_context();
        let now = Instant::now();
        ctx.graph.add_node(ClassNode::new("c1", "A", Point::default()));
        LocalMutationDispatcher::new(&mut ctx, now).delete("c1");
        ctx.graph.add_node(ClassNode::new("c1", "A", Point::default()));
        LocalMutationDispatcher::new(&mut ctx, now + Duration::from_millis(10)).delete("c1");
        assert_eq!(drain(&mut ctx, now + Duration::from_millis(10)).len(), 1);

        ctx.graph.add_node(ClassNode::new("c1", "A", Point::default()));
        let later = now + Duration::from_secs(2);
        LocalMutationDispatcher::new(&mut ctx, later).delete("c1");
        assert_eq!(drain(&mut ctx, later).len(), 1);
    }

    #[test]
    fn test_drag_then_drop() {
        let mut ctx = joined_context();
        let now = Instant::now();
        let mut local = LocalMutationDispatcher::new(&mut ctx, now);
        let id = local.create_class_at(Point::default());
        assert_eq!(local.drag_node(&id, Point::new(5.0, 5.0)), Ok(true));
        assert_eq!(local.drag_node(&id, Point::new(5.0, 5.0)), Ok(false));
        local.drop_node(&id, Point::new(5.0, 5.0)).unwrap();
        assert!(ctx.interaction.dragging().is_none());

        let kinds: Vec<_> = drain(&mut ctx, now).iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec![EventKind::ClassAdd, EventKind::ElementMoving, EventKind::ElementMoved]
        );
    }

    #[test]
    fn test_waypoints_and_rewire() {
        let mut ctx = joined_context();
        let now = Instant::now();
        let mut local = LocalMutationDispatcher::new(&mut ctx, now);
        let a = local.create_class_at(Point::default());
        let b = local.create_class_at(Point::default());
        let c = local.create_class_at(Point::default());
        let r = local.connect(&a, &b, RelationKind::OneToMany).unwrap();
        assert_eq!(local.move_waypoints(&r, vec![Point::new(1.0, 1.0)]), Ok(true));
        assert_eq!(local.rewire_relation(&r, &c, &b), Ok(true));
        assert!(local.rewire_relation(&r, &c, &c).is_err());

        let sent = drain(&mut ctx, now);
        let OutboundEvent::RelationUpdate(update) = &sent[sent.len() - 1] else {
            panic!("expected relation update");
        };
        assert_eq!(update.data.from.as_deref(), Some(c.as_str()));
        assert!(update.data.kind.is_none());
        assert_eq!(ctx.graph.relation(&r).unwrap().vertices, vec![Point::new(1.0, 1.0)]);
    }

    #[test]
    fn test_waypoint_drag_marks_relation_until_release() {
        let mut ctx = joined_context();
        let now = Instant::now();
        let mut local = LocalMutationDispatcher::new(&mut ctx, now);
        let a = local.create_class_at(Point::default());
        let b = local.create_class_at(Point::default());
        let r = local.connect(&a, &b, RelationKind::OneToMany).unwrap();
        assert_eq!(local.move_waypoints(&r, vec![Point::new(2.0, 3.0)]), Ok(true));
        assert!(ctx.interaction.is_reshaping(&r));

        let mut local = LocalMutationDispatcher::new(&mut ctx, now);
        local.release_waypoints(&r, vec![Point::new(2.0, 3.0)]).unwrap();
        assert!(ctx.interaction.reshaping().is_none());

        let kinds: Vec<_> = drain(&mut ctx, now).iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds[kinds.len() - 2..],
            [EventKind::RelationUpdate, EventKind::RelationUpdate]
        );
    }

    #[test]
    fn test_offline_actions_apply_locally_only() {
        let mut ctx = SyncContext::new(DiagramId(1), &ClientConfig::default());
        let now = Instant::now();
        let id = LocalMutationDispatcher::new(&mut ctx, now).create_class_at(Point::default());
        assert!(ctx.graph.node(&id).is_some());
        assert!(drain(&mut ctx, now).is_empty());
        assert_eq!(ctx.session.dropped(), 1);
    }
}
