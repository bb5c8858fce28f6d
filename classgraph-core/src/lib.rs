//! # classgraph-core — class-diagram model and graph state
//!
//! ```text
//! ┌──────────────┐   kind    ┌──────────────────────┐
//! │ Relation     │ ────────► │ RelationStyleResolver│
//! └──────┬───────┘           └──────────────────────┘
//!        │ from / to
//!        ▼
//! ┌──────────────┐  owns     ┌──────────────┐
//! │ ClassNode    │ ◄──────── │ GraphState   │ ──► GraphChange journal
//! └──────────────┘           └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`model`] — classes, attributes, relations, patches, `Entity`
//! - [`style`] — relation kinds and their line/marker style
//! - [`graph`] — the mutable graph with cascade removal

pub mod graph;
pub mod model;
pub mod style;

pub use graph::{GraphChange, GraphError, GraphState, Removal};
pub use model::{
    new_element_id, new_relation_id, Attribute, AttributePatch, ClassNode, ClassPatch, DataType,
    ElementId, Entity, Point, Relation, RelationId, RelationPatch, DEFAULT_CLASS_NAME,
    DEFAULT_POSITION,
};
pub use style::{LineStyle, Marker, RelationKind, RelationStyle, RelationStyleResolver};
