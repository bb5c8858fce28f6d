//! In-memory diagram graph with identity and structural invariants.
//!
//! ```text
//!   add / update / remove ──► GraphState ──► change journal ──► canvas
//!                                 │
//!                                 └── cascade: removing a class removes
//!                                     every relation touching it
//! ```
//!
//! Adds are no-ops when the id already exists and removes are no-ops when it
//! does not, so replaying an inbound event is harmless. Every mutation
//! finishes before its changes reach the journal; observers never see a
//! half-applied operation.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::model::{
    Attribute, AttributePatch, ClassNode, ClassPatch, ElementId, Entity, Point, Relation,
    RelationId, RelationPatch,
};

/// Structural errors raised by [`GraphState`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("unknown element {0}")]
    UnknownElement(ElementId),
    #[error("unknown relation {0}")]
    UnknownRelation(RelationId),
    #[error("relation {relation} references missing element {element}")]
    MissingEndpoint { relation: RelationId, element: ElementId },
    #[error("cannot relate element {0} to itself")]
    SelfRelation(ElementId),
    #[error("attribute index {index} out of range for {element} ({len} attributes)")]
    AttributeIndex {
        element: ElementId,
        index: usize,
        len: usize,
    },
}

/// What the rendering layer needs to redraw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphChange {
    NodeAdded(ElementId),
    NodeUpdated(ElementId),
    NodeMoved(ElementId),
    NodeRemoved(ElementId),
    RelationAdded(RelationId),
    RelationUpdated(RelationId),
    RelationRemoved(RelationId),
    Cleared,
}

/// Result of removing one entity, including cascaded relations.
#[derive(Debug, Clone, PartialEq)]
pub struct Removal {
    pub entity: Entity,
    /// Relations removed because they touched the removed class.
    pub cascaded: Vec<Relation>,
}

/// The diagram as seen by one client.
#[derive(Debug, Clone, Default)]
pub struct GraphState {
    nodes: BTreeMap<ElementId, ClassNode>,
    relations: BTreeMap<RelationId, Relation>,
    changes: Vec<GraphChange>,
}

impl PartialEq for GraphState {
    fn eq(&self, other: &Self) -> bool {
        self.nodes == other.nodes && self.relations == other.relations
    }
}

impl GraphState {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Reads ────────────────────────────────────────────────────

    pub fn node(&self, id: &str) -> Option<&ClassNode> {
        self.nodes.get(id)
    }

    pub fn relation(&self, id: &str) -> Option<&Relation> {
        self.relations.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ClassNode> {
        self.nodes.values()
    }

    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.values()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id) || self.relations.contains_key(id)
    }

    /// Look an id up in either map.
    pub fn entity(&self, id: &str) -> Option<Entity> {
        if let Some(node) = self.nodes.get(id) {
            return Some(Entity::Node(node.clone()));
        }
        self.relations.get(id).cloned().map(Entity::Edge)
    }

    /// Relations with `element` as either endpoint.
    pub fn relations_of(&self, element: &str) -> Vec<&Relation> {
        self.relations
            .values()
            .filter(|r| r.touches(element))
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.relations.is_empty()
    }

    /// Take the changes recorded since the last call.
    pub fn drain_changes(&mut self) -> Vec<GraphChange> {
        std::mem::take(&mut self.changes)
    }

    // ── Nodes ────────────────────────────────────────────────────

    /// Insert a class. Returns `false` (and changes nothing) if the id exists.
    pub fn add_node(&mut self, node: ClassNode) -> bool {
        if self.contains(&node.id) {
            return false;
        }
        let id = node.id.clone();
        self.nodes.insert(id.clone(), node);
        self.changes.push(GraphChange::NodeAdded(id));
        true
    }

    /// Apply a partial update. `Ok(false)` when every field already matched.
    pub fn update_node(&mut self, id: &str, patch: &ClassPatch) -> Result<bool, GraphError> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::UnknownElement(id.to_string()))?;

        let mut changed = false;
        if let Some(name) = &patch.name {
            if node.name != *name {
                node.name = name.clone();
                changed = true;
            }
        }
        if let Some(attributes) = &patch.attributes {
            if node.attributes != *attributes {
                node.attributes = attributes.clone();
                changed = true;
            }
        }
        let moved = match patch.position {
            Some(position) if node.position != position => {
                node.position = position;
                true
            }
            _ => false,
        };

        if changed {
            self.changes.push(GraphChange::NodeUpdated(id.to_string()));
        }
        if moved {
            self.changes.push(GraphChange::NodeMoved(id.to_string()));
        }
        Ok(changed || moved)
    }

    pub fn move_node(&mut self, id: &str, position: Point) -> Result<bool, GraphError> {
        self.update_node(
            id,
            &ClassPatch {
                position: Some(position),
                ..ClassPatch::default()
            },
        )
    }

    /// Remove a class and, in the same operation, every relation touching it.
    pub fn remove_node(&mut self, id: &str) -> Option<Removal> {
        let node = self.nodes.remove(id)?;

        let attached: Vec<RelationId> = self
            .relations
            .values()
            .filter(|r| r.touches(id))
            .map(|r| r.id.clone())
            .collect();

        let mut cascaded = Vec::with_capacity(attached.len());
        for rid in attached {
            if let Some(relation) = self.relations.remove(&rid) {
                self.changes.push(GraphChange::RelationRemoved(rid));
                cascaded.push(relation);
            }
        }
        self.changes.push(GraphChange::NodeRemoved(id.to_string()));

        Some(Removal {
            entity: Entity::Node(node),
            cascaded,
        })
    }

    // ── Attributes ───────────────────────────────────────────────

    /// Append an attribute; returns its index.
    pub fn add_attribute(&mut self, id: &str, attribute: Attribute) -> Result<usize, GraphError> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::UnknownElement(id.to_string()))?;
        node.attributes.push(attribute);
        self.changes.push(GraphChange::NodeUpdated(id.to_string()));
        Ok(node.attributes.len() - 1)
    }

    pub fn update_attribute(
        &mut self,
        id: &str,
        index: usize,
        patch: &AttributePatch,
    ) -> Result<bool, GraphError> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::UnknownElement(id.to_string()))?;
        let len = node.attributes.len();
        let attr = node
            .attributes
            .get_mut(index)
            .ok_or_else(|| GraphError::AttributeIndex {
                element: id.to_string(),
                index,
                len,
            })?;

        let mut changed = false;
        if let Some(name) = &patch.name {
            if attr.name != *name {
                attr.name = name.clone();
                changed = true;
            }
        }
        if let Some(data_type) = patch.data_type {
            if attr.data_type != data_type {
                attr.data_type = data_type;
                changed = true;
            }
        }
        if changed {
            self.changes.push(GraphChange::NodeUpdated(id.to_string()));
        }
        Ok(changed)
    }

    pub fn remove_attribute(&mut self, id: &str, index: usize) -> Result<Attribute, GraphError> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::UnknownElement(id.to_string()))?;
        if index >= node.attributes.len() {
            return Err(GraphError::AttributeIndex {
                element: id.to_string(),
                index,
                len: node.attributes.len(),
            });
        }
        let removed = node.attributes.remove(index);
        self.changes.push(GraphChange::NodeUpdated(id.to_string()));
        Ok(removed)
    }

    // ── Relations ────────────────────────────────────────────────

    /// Insert a relation. `Ok(false)` if the id exists; an error if either
    /// endpoint is missing.
    pub fn add_relation(&mut self, relation: Relation) -> Result<bool, GraphError> {
        if self.contains(&relation.id) {
            return Ok(false);
        }
        self.check_endpoints(&relation.id, &relation.from, &relation.to)?;

        let id = relation.id.clone();
        self.relations.insert(id.clone(), relation);
        self.changes.push(GraphChange::RelationAdded(id));
        Ok(true)
    }

    pub fn update_relation(&mut self, id: &str, patch: &RelationPatch) -> Result<bool, GraphError> {
        if !self.relations.contains_key(id) {
            return Err(GraphError::UnknownRelation(id.to_string()));
        }
        if let Some((from, to)) = &patch.endpoints {
            self.check_endpoints(id, from, to)?;
        }
        let relation = self
            .relations
            .get_mut(id)
            .ok_or_else(|| GraphError::UnknownRelation(id.to_string()))?;

        let mut changed = false;
        if let Some(kind) = patch.kind {
            if relation.kind != kind {
                relation.kind = kind;
                changed = true;
            }
        }
        if let Some(vertices) = &patch.vertices {
            if relation.vertices != *vertices {
                relation.vertices = vertices.clone();
                changed = true;
            }
        }
        if let Some(label) = &patch.label {
            if relation.label != *label {
                relation.label = label.clone();
                changed = true;
            }
        }
        if let Some((from, to)) = &patch.endpoints {
            if relation.from != *from || relation.to != *to {
                relation.from = from.clone();
                relation.to = to.clone();
                changed = true;
            }
        }

        if changed {
            self.changes.push(GraphChange::RelationUpdated(id.to_string()));
        }
        Ok(changed)
    }

    pub fn remove_relation(&mut self, id: &str) -> Option<Relation> {
        let relation = self.relations.remove(id)?;
        self.changes.push(GraphChange::RelationRemoved(id.to_string()));
        Some(relation)
    }

    /// Remove whatever entity `id` names.
    pub fn remove(&mut self, id: &str) -> Option<Removal> {
        if self.nodes.contains_key(id) {
            return self.remove_node(id);
        }
        self.remove_relation(id).map(|relation| Removal {
            entity: Entity::Edge(relation),
            cascaded: Vec::new(),
        })
    }

    /// Drop everything. Returns `(nodes, relations)` removed.
    pub fn clear(&mut self) -> (usize, usize) {
        let counts = (self.nodes.len(), self.relations.len());
        self.nodes.clear();
        self.relations.clear();
        self.changes.push(GraphChange::Cleared);
        counts
    }

    fn check_endpoints(&self, relation: &str, from: &str, to: &str) -> Result<(), GraphError> {
        for endpoint in [from, to] {
            if !self.nodes.contains_key(endpoint) {
                return Err(GraphError::MissingEndpoint {
                    relation: relation.to_string(),
                    element: endpoint.to_string(),
                });
            }
        }
        Ok(())
    }
}
