//! Mirror inbound events onto the local graph.
//!
//! The applier has no access to the outbound queue: nothing it does can
//! produce an event on the wire. Bulk loads (snapshot, generated content)
//! additionally run under [`BulkLoadCoordinator`] so that local actions
//! taken right after a rebuild are held until the canvas settles.
//!
//! Events that reference ids we don't have are logged and skipped. The
//! server is the authority; the next snapshot repairs any drift.

use std::time::Instant;

use classgraph_core::{GraphError, GraphState, RelationPatch};

use crate::engine::SyncContext;
use crate::protocol::{
    DiagramContent, DiagramId, EventKind, GenerationMode, InboundEvent, PositionUpdate,
};
use crate::session::BulkLoadCoordinator;

/// Counts from one bulk load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
}

pub struct RemoteEventApplier<'a> {
    ctx: &'a mut SyncContext,
    now: Instant,
}

impl<'a> RemoteEventApplier<'a> {
    pub fn new(ctx: &'a mut SyncContext, now: Instant) -> Self {
        Self { ctx, now }
    }

    /// Apply one event. Returns whether the graph changed.
    pub fn apply(&mut self, event: InboundEvent) -> bool {
        let kind = event.kind();
        match event {
            InboundEvent::Snapshot(snapshot) => {
                let summary = self.replace_all(snapshot.content);
                log::info!(
                    "Diagram {} loaded: {} classes, {} relations ({} skipped)",
                    self.ctx.diagram_id,
                    self.ctx.graph.node_count(),
                    self.ctx.graph.relation_count(),
                    summary.skipped
                );
                true
            }

            InboundEvent::ClassAdded(add) => {
                if self.foreign(add.diagram_id) {
                    return false;
                }
                let added = self.ctx.graph.add_node(add.class_data.into_node(add.class_id.clone()));
                if !added {
                    log::debug!("{kind}: {} already present", add.class_id);
                }
                added
            }

            InboundEvent::ClassUpdated(update) => {
                if self.foreign(update.diagram_id) {
                    return false;
                }
                let mut patch = update.new_data;
                if patch.position.is_some() && self.ctx.interaction.is_dragging(&update.class_id) {
                    patch.position = None;
                }
                let result = self.ctx.graph.update_node(&update.class_id, &patch);
                if result.is_ok() && self.ctx.interaction.is_selected(&update.class_id) {
                    self.ctx.interaction.clear_selection();
                }
                settle(kind, result)
            }

            InboundEvent::ClassRemoved(remove) => {
                if self.foreign(remove.diagram_id) {
                    return false;
                }
                let Some(removal) = self.ctx.graph.remove_node(&remove.class_id) else {
                    log::debug!("{kind}: {} not present", remove.class_id);
                    return false;
                };
                for relation in &removal.cascaded {
                    self.ctx.debouncer.mark(&relation.id, self.now);
                    self.ctx.interaction.forget(&relation.id);
                }
                self.ctx.debouncer.mark(&remove.class_id, self.now);
                self.ctx.interaction.forget(&remove.class_id);
                true
            }

            InboundEvent::AttributeAdded(add) => {
                if self.foreign(add.diagram_id) {
                    return false;
                }
                let result = self
                    .ctx
                    .graph
                    .add_attribute(&add.class_id, add.attribute)
                    .map(|_| true);
                settle(kind, result)
            }

            InboundEvent::AttributeUpdated(update) => {
                if self.foreign(update.diagram_id) {
                    return false;
                }
                let result = self.ctx.graph.update_attribute(
                    &update.class_id,
                    update.attr_index,
                    &update.new_data,
                );
                settle(kind, result)
            }

            InboundEvent::AttributeRemoved(remove) => {
                if self.foreign(remove.diagram_id) {
                    return false;
                }
                let result = self
                    .ctx
                    .graph
                    .remove_attribute(&remove.class_id, remove.attr_index)
                    .map(|_| true);
                settle(kind, result)
            }

            InboundEvent::RelationAdded(add) => {
                if self.foreign(add.diagram_id) {
                    return false;
                }
                let result = self
                    .ctx
                    .graph
                    .add_relation(add.data.into_relation(add.relation_id));
                settle(kind, result)
            }

            InboundEvent::RelationUpdated(update) => {
                if self.foreign(update.diagram_id) {
                    return false;
                }
                let mut patch = update.data.to_patch();
                let reshaping = self.ctx.interaction.is_reshaping(&update.relation_id);
                if reshaping && patch.vertices.is_some() {
                    if patch.is_vertices_only() {
                        log::trace!("{kind}: {} is being reshaped", update.relation_id);
                        return false;
                    }
                    patch.vertices = None;
                }
                let result = self.ctx.graph.update_relation(&update.relation_id, &patch);
                settle(kind, result)
            }

            InboundEvent::RelationRemoved(remove) => {
                if self.foreign(remove.diagram_id) {
                    return false;
                }
                if self.ctx.graph.remove_relation(&remove.relation_id).is_none() {
                    log::debug!("{kind}: {} not present", remove.relation_id);
                    return false;
                }
                self.ctx.debouncer.mark(&remove.relation_id, self.now);
                self.ctx.interaction.forget(&remove.relation_id);
                true
            }

            InboundEvent::ElementMoving(update) | InboundEvent::ElementMoved(update) => {
                self.apply_position(update)
            }

            InboundEvent::GenerationStarted(started) => {
                if !self.foreign(started.diagram_id) {
                    self.ctx.generation.started(self.now);
                }
                false
            }

            InboundEvent::Generated(generated) => {
                self.ctx.generation.completed();
                self.ctx.interaction.clear_selection();
                let summary = match generated.mode {
                    GenerationMode::Replace => self.replace_all(generated.content),
                    GenerationMode::Merge => self.merge(generated.content),
                };
                log::info!(
                    "Applied {} generation: {} created, {} updated, {} skipped",
                    generated.mode,
                    summary.created,
                    summary.updated,
                    summary.skipped
                );
                true
            }

            InboundEvent::GenerationFailed(failed) => {
                let failure = self.ctx.generation.failed(&failed.error);
                log::warn!("Generation failed: {}", failure.message());
                false
            }
        }
    }

    /// Payloads addressed to another diagram are ignored.
    fn foreign(&self, diagram_id: Option<DiagramId>) -> bool {
        match diagram_id {
            Some(id) if id != self.ctx.diagram_id => {
                log::debug!("Ignoring event for diagram {id}");
                true
            }
            _ => false,
        }
    }

    fn apply_position(&mut self, update: PositionUpdate) -> bool {
        if self.foreign(update.diagram_id) {
            return false;
        }
        if self.ctx.interaction.is_dragging(&update.element_id) {
            log::trace!("Ignoring remote position for {} while dragging it", update.element_id);
            return false;
        }
        match self.ctx.graph.move_node(&update.element_id, update.position) {
            Ok(moved) => moved,
            Err(err) => {
                log::debug!("Position update ignored: {err}");
                false
            }
        }
    }

    /// Clear the graph and rebuild it from `content`.
    fn replace_all(&mut self, content: DiagramContent) -> LoadSummary {
        let ctx = &mut *self.ctx;
        ctx.interaction.reset();
        BulkLoadCoordinator::run(&mut ctx.session, self.now, || {
            ctx.graph.clear();
            populate(&mut ctx.graph, content)
        })
    }

    /// Update known ids in place and create the rest. Never deletes.
    fn merge(&mut self, content: DiagramContent) -> LoadSummary {
        let ctx = &mut *self.ctx;
        let dragging = ctx.interaction.dragging().map(str::to_string);
        BulkLoadCoordinator::run(&mut ctx.session, self.now, || {
            merge_into(&mut ctx.graph, content, dragging.as_deref())
        })
    }
}

fn settle(kind: EventKind, result: Result<bool, GraphError>) -> bool {
    match result {
        Ok(changed) => changed,
        Err(err @ GraphError::AttributeIndex { .. }) => {
            log::warn!("{kind}: {err}; positional edit raced a concurrent change");
            false
        }
        Err(err) => {
            log::debug!("{kind} ignored: {err}");
            false
        }
    }
}

fn populate(graph: &mut GraphState, content: DiagramContent) -> LoadSummary {
    let mut summary = LoadSummary::default();
    for (id, data) in content.elements {
        if graph.add_node(data.into_node(id)) {
            summary.created += 1;
        } else {
            summary.skipped += 1;
        }
    }
    for (id, data) in content.relations {
        match graph.add_relation(data.into_relation(id)) {
            Ok(true) => summary.created += 1,
            Ok(false) => summary.skipped += 1,
            Err(err) => {
                log::warn!("Skipping relation: {err}");
                summary.skipped += 1;
            }
        }
    }
    summary
}

fn merge_into(graph: &mut GraphState, content: DiagramContent, dragging: Option<&str>) -> LoadSummary {
    let mut summary = LoadSummary::default();

    for (id, data) in content.elements {
        if graph.node(&id).is_some() {
            let mut patch = data.as_merge_patch();
            if dragging == Some(id.as_str()) {
                patch.position = None;
            }
            match graph.update_node(&id, &patch) {
                Ok(true) => summary.updated += 1,
                Ok(false) => {}
                Err(err) => log::warn!("Merge skipped {id}: {err}"),
            }
        } else if graph.add_node(data.into_node(id.clone())) {
            summary.created += 1;
        } else {
            log::warn!("Merge skipped {id}: id belongs to a relation");
            summary.skipped += 1;
        }
    }

    for (id, data) in content.relations {
        if graph.relation(&id).is_some() {
            let relation = data.into_relation(id.clone());
            let patch = RelationPatch {
                kind: Some(relation.kind),
                vertices: Some(relation.vertices),
                label: Some(relation.label),
                endpoints: Some((relation.from, relation.to)),
            };
            match graph.update_relation(&id, &patch) {
                Ok(true) => summary.updated += 1,
                Ok(false) => {}
                Err(err) => {
                    log::warn!("Merge skipped relation {id}: {err}");
                    summary.skipped += 1;
                }
            }
        } else {
            match graph.add_relation(data.into_relation(id.clone())) {
                Ok(true) => summary.created += 1,
                Ok(false) => {
                    log::warn!("Merge skipped relation {id}: id belongs to a class");
                    summary.skipped += 1;
                }
                Err(err) => {
                    log::warn!("Merge skipped relation {id}: {err}");
                    summary.skipped += 1;
                }
            }
        }
    }

    summary
}
