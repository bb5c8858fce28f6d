//! Local user focus: the current selection, the node being dragged and
//! the relation whose waypoints are being dragged.

use classgraph_core::{ElementId, RelationId};

/// What the local user has selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Element(ElementId),
    Relation(RelationId),
}

impl Selection {
    pub fn id(&self) -> &str {
        match self {
            Selection::Element(id) | Selection::Relation(id) => id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Interaction {
    selection: Option<Selection>,
    dragging: Option<ElementId>,
    reshaping: Option<RelationId>,
}

impl Interaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn select(&mut self, selection: Selection) {
        self.selection = Some(selection);
    }

    pub fn clear_selection(&mut self) {
        self.selection = None;
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.selection.as_ref().is_some_and(|s| s.id() == id)
    }

    pub fn dragging(&self) -> Option<&str> {
        self.dragging.as_deref()
    }

    pub fn is_dragging(&self, id: &str) -> bool {
        self.dragging.as_deref() == Some(id)
    }

    pub fn begin_drag(&mut self, id: &str) {
        if !self.is_dragging(id) {
            self.dragging = Some(id.to_string());
        }
    }

    pub fn end_drag(&mut self) {
        self.dragging = None;
    }

    /// Relation whose waypoints are under the pointer.
    pub fn reshaping(&self) -> Option<&str> {
        self.reshaping.as_deref()
    }

    pub fn is_reshaping(&self, id: &str) -> bool {
        self.reshaping.as_deref() == Some(id)
    }

    pub fn begin_reshape(&mut self, id: &str) {
        if !self.is_reshaping(id) {
            self.reshaping = Some(id.to_string());
        }
    }

    pub fn end_reshape(&mut self) {
        self.reshaping = None;
    }

    /// Drop any focus on `id`, which no longer exists. Returns whether
    /// anything was cleared.
    pub fn forget(&mut self, id: &str) -> bool {
        let mut cleared = false;
        if self.is_selected(id) {
            self.selection = None;
            cleared = true;
        }
        if self.is_dragging(id) {
            self.dragging = None;
            cleared = true;
        }
        if self.is_reshaping(id) {
            self.reshaping = None;
            cleared = true;
        }
        cleared
    }

    pub fn reset(&mut self) {
        self.selection = None;
        self.dragging = None;
        self.reshaping = None;
    }
}
