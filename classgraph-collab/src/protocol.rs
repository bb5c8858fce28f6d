//! JSON event protocol between a diagram client and the backend.
//!
//! Wire format (one WebSocket text frame per event):
//! ```text
//! { "event": "class:update",
//!   "data":  { "diagramId": 7, "classId": "class_1", "newData": { "name": "Account" } } }
//! ```
//!
//! Inbound and outbound events are separate enums so that the type system
//! keeps "things we apply" apart from "things we send". Both share the
//! payload structs below.

use std::collections::BTreeMap;

use classgraph_core::{
    Attribute, AttributePatch, ClassNode, ClassPatch, ElementId, Point, Relation, RelationId,
    RelationKind, RelationPatch, RelationStyle, DEFAULT_CLASS_NAME, DEFAULT_POSITION,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Backend identifier of a diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiagramId(pub i64);

impl std::fmt::Display for DiagramId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl std::str::FromStr for DiagramId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(DiagramId)
    }
}

/// Every event name on the wire, in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    JoinDiagram,
    DiagramInit,
    ClassAdd,
    ClassUpdate,
    ClassRemove,
    AttributeAdd,
    AttributeUpdate,
    AttributeRemove,
    RelationAdd,
    RelationUpdate,
    RelationRemove,
    ElementMoving,
    ElementMoved,
    GenerationStarted,
    GenerationCompleted,
    GenerationFailed,
    GenerateFromPrompt,
    GenerateFromImage,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::JoinDiagram => "joinDiagram",
            EventKind::DiagramInit => "diagram:init",
            EventKind::ClassAdd => "class:add",
            EventKind::ClassUpdate => "class:update",
            EventKind::ClassRemove => "class:remove",
            EventKind::AttributeAdd => "attribute:add",
            EventKind::AttributeUpdate => "attribute:update",
            EventKind::AttributeRemove => "attribute:remove",
            EventKind::RelationAdd => "relation:add",
            EventKind::RelationUpdate => "relation:update",
            EventKind::RelationRemove => "relation:remove",
            EventKind::ElementMoving => "element:moving",
            EventKind::ElementMoved => "element:moved",
            EventKind::GenerationStarted => "diagram:generating",
            EventKind::GenerationCompleted => "diagram:generated",
            EventKind::GenerationFailed => "diagram:generateError",
            EventKind::GenerateFromPrompt => "diagram:generateFromPrompt",
            EventKind::GenerateFromImage => "diagram:generateFromImage",
        }
    }

    /// Kinds that report on a generation request.
    pub const GENERATION: [EventKind; 3] = [
        EventKind::GenerationStarted,
        EventKind::GenerationCompleted,
        EventKind::GenerationFailed,
    ];
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Deserialize into `Option<T>`, mapping shapes we don't understand to `None`.
///
/// Canvas-specific blobs (`attrs`, `router`, ...) come back from the server
/// in whatever form another client produced; we never fail a whole event
/// over them.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

fn half() -> f64 {
    0.5
}

// ───────────────────────────────────────────────────────────────────
// Class payloads
// ───────────────────────────────────────────────────────────────────

/// Class fields as they travel on the wire. Every field may be missing in
/// inbound data; see [`ClassData::into_node`] for the defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Point>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Vec<Attribute>>,
}

impl ClassData {
    pub fn from_node(node: &ClassNode) -> Self {
        Self {
            name: Some(node.name.clone()),
            position: Some(node.position),
            attributes: Some(node.attributes.clone()),
        }
    }

    pub fn into_node(self, id: impl Into<ElementId>) -> ClassNode {
        ClassNode {
            id: id.into(),
            name: self.name.unwrap_or_else(|| DEFAULT_CLASS_NAME.to_string()),
            position: self.position.unwrap_or(DEFAULT_POSITION),
            attributes: self.attributes.unwrap_or_default(),
        }
    }

    /// Fields to overwrite on an existing class during a merge. An empty
    /// name keeps the current one.
    pub fn as_merge_patch(&self) -> ClassPatch {
        ClassPatch {
            name: self.name.clone().filter(|name| !name.is_empty()),
            attributes: self.attributes.clone(),
            position: self.position,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassAdd {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagram_id: Option<DiagramId>,
    pub class_id: ElementId,
    #[serde(default)]
    pub class_data: ClassData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagram_id: Option<DiagramId>,
    pub class_id: ElementId,
    #[serde(default)]
    pub new_data: ClassPatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRemove {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagram_id: Option<DiagramId>,
    pub class_id: ElementId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeAdd {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagram_id: Option<DiagramId>,
    pub class_id: ElementId,
    pub attribute: Attribute,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagram_id: Option<DiagramId>,
    pub class_id: ElementId,
    pub attr_index: usize,
    pub new_data: AttributePatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeRemove {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagram_id: Option<DiagramId>,
    pub class_id: ElementId,
    pub attr_index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagram_id: Option<DiagramId>,
    pub element_id: ElementId,
    pub position: Point,
}

// ───────────────────────────────────────────────────────────────────
// Relation payloads
// ───────────────────────────────────────────────────────────────────

/// A relation label. Inbound labels may use either the flat form
/// (`{position, text}`) or the canvas form (`{position, attrs:{text:{text}}}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelData {
    #[serde(default = "half")]
    pub position: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attrs: Option<Value>,
}

impl LabelData {
    pub fn centered(text: impl Into<String>) -> Self {
        Self {
            position: 0.5,
            text: Some(text.into()),
            attrs: None,
        }
    }

    pub fn resolved_text(&self) -> Option<String> {
        if let Some(text) = &self.text {
            return Some(text.clone());
        }
        self.attrs
            .as_ref()
            .and_then(|attrs| attrs.pointer("/text/text"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// `{ "name": "manhattan" }` style canvas hints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Named {
    pub name: String,
}

impl Named {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

/// Full relation description on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationData {
    pub from: ElementId,
    pub to: ElementId,
    #[serde(rename = "type", default)]
    pub kind: RelationKind,
    #[serde(default)]
    pub vertices: Vec<Point>,
    #[serde(default)]
    pub labels: Vec<LabelData>,
    /// Style is derived from `kind`; inbound values are ignored.
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub attrs: Option<RelationStyle>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub router: Option<Named>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub connector: Option<Named>,
}

impl RelationData {
    pub fn from_relation(relation: &Relation) -> Self {
        Self {
            from: relation.from.clone(),
            to: relation.to.clone(),
            kind: relation.kind,
            vertices: relation.vertices.clone(),
            labels: vec![LabelData::centered(relation.label.clone())],
            attrs: Some(relation.kind.style()),
            router: Some(Named::new("manhattan")),
            connector: Some(Named::new("rounded")),
        }
    }

    pub fn into_relation(self, id: impl Into<RelationId>) -> Relation {
        let label = self
            .labels
            .first()
            .and_then(LabelData::resolved_text)
            .unwrap_or_else(|| self.kind.as_str().to_string());
        Relation {
            id: id.into(),
            from: self.from,
            to: self.to,
            kind: self.kind,
            vertices: self.vertices,
            label,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationAdd {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagram_id: Option<DiagramId>,
    pub relation_id: RelationId,
    pub data: RelationData,
}

/// Partial relation description; absent fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationChanges {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<RelationKind>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub attrs: Option<RelationStyle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<LabelData>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertices: Option<Vec<Point>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<ElementId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<ElementId>,
}

impl RelationChanges {
    /// Kind change, with its resolved style and label.
    pub fn kind(kind: RelationKind) -> Self {
        Self {
            kind: Some(kind),
            attrs: Some(kind.style()),
            labels: Some(vec![LabelData::centered(kind.as_str())]),
            ..Self::default()
        }
    }

    pub fn vertices(vertices: Vec<Point>) -> Self {
        Self {
            vertices: Some(vertices),
            ..Self::default()
        }
    }

    /// Graph-level patch. A kind change relabels the relation with the
    /// kind name, as the canvas does.
    pub fn to_patch(&self) -> RelationPatch {
        let label = match self.kind {
            Some(kind) => Some(kind.as_str().to_string()),
            None => self
                .labels
                .as_ref()
                .and_then(|labels| labels.first())
                .and_then(LabelData::resolved_text),
        };
        let endpoints = match (&self.from, &self.to) {
            (Some(from), Some(to)) => Some((from.clone(), to.clone())),
            _ => None,
        };
        RelationPatch {
            kind: self.kind,
            vertices: self.vertices.clone(),
            label,
            endpoints,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagram_id: Option<DiagramId>,
    pub relation_id: RelationId,
    #[serde(default)]
    pub data: RelationChanges,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationRemove {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagram_id: Option<DiagramId>,
    pub relation_id: RelationId,
}

// ───────────────────────────────────────────────────────────────────
// Whole-diagram payloads
// ───────────────────────────────────────────────────────────────────

/// Element and relation maps of a diagram (snapshot or generated content).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiagramContent {
    #[serde(default)]
    pub elements: BTreeMap<ElementId, ClassData>,
    #[serde(default)]
    pub relations: BTreeMap<RelationId, RelationData>,
}

impl DiagramContent {
    pub fn from_graph(graph: &classgraph_core::GraphState) -> Self {
        Self {
            elements: graph
                .nodes()
                .map(|n| (n.id.clone(), ClassData::from_node(n)))
                .collect(),
            relations: graph
                .relations()
                .map(|r| (r.id.clone(), RelationData::from_relation(r)))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
enum SnapshotShape {
    Wrapped { diagram: DiagramContent },
    Bare(DiagramContent),
}

/// `diagram:init` payload. Accepted bare or wrapped in `{"diagram": ...}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "SnapshotShape", into = "SnapshotShape")]
pub struct DiagramSnapshot {
    pub content: DiagramContent,
}

impl From<SnapshotShape> for DiagramSnapshot {
    fn from(shape: SnapshotShape) -> Self {
        match shape {
            SnapshotShape::Wrapped { diagram } => Self { content: diagram },
            SnapshotShape::Bare(content) => Self { content },
        }
    }
}

impl From<DiagramSnapshot> for SnapshotShape {
    fn from(snapshot: DiagramSnapshot) -> Self {
        SnapshotShape::Wrapped {
            diagram: snapshot.content,
        }
    }
}

/// How generated content is applied to the current graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    Replace,
    #[default]
    Merge,
}

impl std::fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationMode::Replace => f.write_str("replace"),
            GenerationMode::Merge => f.write_str("merge"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationStarted {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagram_id: Option<DiagramId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedContent {
    #[serde(default)]
    pub content: DiagramContent,
    #[serde(default)]
    pub mode: GenerationMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationFailed {
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinDiagram {
    pub diagram_id: DiagramId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptRequest {
    pub diagram_id: DiagramId,
    pub prompt: String,
    pub mode: GenerationMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRequest {
    pub diagram_id: DiagramId,
    /// Base64 image bytes, without a data-URL prefix.
    pub image_data: String,
    pub mime_type: String,
    pub additional_prompt: String,
    pub mode: GenerationMode,
}

// ───────────────────────────────────────────────────────────────────
// Events
// ───────────────────────────────────────────────────────────────────

/// Server → client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum InboundEvent {
    #[serde(rename = "diagram:init")]
    Snapshot(DiagramSnapshot),
    #[serde(rename = "class:add")]
    ClassAdded(ClassAdd),
    #[serde(rename = "class:update")]
    ClassUpdated(ClassUpdate),
    #[serde(rename = "class:remove")]
    ClassRemoved(ClassRemove),
    #[serde(rename = "attribute:add")]
    AttributeAdded(AttributeAdd),
    #[serde(rename = "attribute:update")]
    AttributeUpdated(AttributeUpdate),
    #[serde(rename = "attribute:remove")]
    AttributeRemoved(AttributeRemove),
    #[serde(rename = "relation:add")]
    RelationAdded(RelationAdd),
    #[serde(rename = "relation:update")]
    RelationUpdated(RelationUpdate),
    #[serde(rename = "relation:remove")]
    RelationRemoved(RelationRemove),
    #[serde(rename = "element:moving")]
    ElementMoving(PositionUpdate),
    #[serde(rename = "element:moved")]
    ElementMoved(PositionUpdate),
    #[serde(rename = "diagram:generating")]
    GenerationStarted(GenerationStarted),
    #[serde(rename = "diagram:generated")]
    Generated(GeneratedContent),
    #[serde(rename = "diagram:generateError")]
    GenerationFailed(GenerationFailed),
}

impl InboundEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            InboundEvent::Snapshot(_) => EventKind::DiagramInit,
            InboundEvent::ClassAdded(_) => EventKind::ClassAdd,
            InboundEvent::ClassUpdated(_) => EventKind::ClassUpdate,
            InboundEvent::ClassRemoved(_) => EventKind::ClassRemove,
            InboundEvent::AttributeAdded(_) => EventKind::AttributeAdd,
            InboundEvent::AttributeUpdated(_) => EventKind::AttributeUpdate,
            InboundEvent::AttributeRemoved(_) => EventKind::AttributeRemove,
            InboundEvent::RelationAdded(_) => EventKind::RelationAdd,
            InboundEvent::RelationUpdated(_) => EventKind::RelationUpdate,
            InboundEvent::RelationRemoved(_) => EventKind::RelationRemove,
            InboundEvent::ElementMoving(_) => EventKind::ElementMoving,
            InboundEvent::ElementMoved(_) => EventKind::ElementMoved,
            InboundEvent::GenerationStarted(_) => EventKind::GenerationStarted,
            InboundEvent::Generated(_) => EventKind::GenerationCompleted,
            InboundEvent::GenerationFailed(_) => EventKind::GenerationFailed,
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

/// Client → server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum OutboundEvent {
    #[serde(rename = "joinDiagram")]
    Join(JoinDiagram),
    #[serde(rename = "class:add")]
    ClassAdd(ClassAdd),
    #[serde(rename = "class:update")]
    ClassUpdate(ClassUpdate),
    #[serde(rename = "class:remove")]
    ClassRemove(ClassRemove),
    #[serde(rename = "attribute:add")]
    AttributeAdd(AttributeAdd),
    #[serde(rename = "attribute:update")]
    AttributeUpdate(AttributeUpdate),
    #[serde(rename = "attribute:remove")]
    AttributeRemove(AttributeRemove),
    #[serde(rename = "relation:add")]
    RelationAdd(RelationAdd),
    #[serde(rename = "relation:update")]
    RelationUpdate(RelationUpdate),
    #[serde(rename = "relation:remove")]
    RelationRemove(RelationRemove),
    #[serde(rename = "element:moving")]
    ElementMoving(PositionUpdate),
    #[serde(rename = "element:moved")]
    ElementMoved(PositionUpdate),
    #[serde(rename = "diagram:generateFromPrompt")]
    GenerateFromPrompt(PromptRequest),
    #[serde(rename = "diagram:generateFromImage")]
    GenerateFromImage(ImageRequest),
}

impl OutboundEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            OutboundEvent::Join(_) => EventKind::JoinDiagram,
            OutboundEvent::ClassAdd(_) => EventKind::ClassAdd,
            OutboundEvent::ClassUpdate(_) => EventKind::ClassUpdate,
            OutboundEvent::ClassRemove(_) => EventKind::ClassRemove,
            OutboundEvent::AttributeAdd(_) => EventKind::AttributeAdd,
            OutboundEvent::AttributeUpdate(_) => EventKind::AttributeUpdate,
            OutboundEvent::AttributeRemove(_) => EventKind::AttributeRemove,
            OutboundEvent::RelationAdd(_) => EventKind::RelationAdd,
            OutboundEvent::RelationUpdate(_) => EventKind::RelationUpdate,
            OutboundEvent::RelationRemove(_) => EventKind::RelationRemove,
            OutboundEvent::ElementMoving(_) => EventKind::ElementMoving,
            OutboundEvent::ElementMoved(_) => EventKind::ElementMoved,
            OutboundEvent::GenerateFromPrompt(_) => EventKind::GenerateFromPrompt,
            OutboundEvent::GenerateFromImage(_) => EventKind::GenerateFromImage,
        }
    }

    /// Removal notifications go through the deletion debouncer.
    pub fn removed_id(&self) -> Option<&str> {
        match self {
            OutboundEvent::ClassRemove(p) => Some(&p.class_id),
            OutboundEvent::RelationRemove(p) => Some(&p.relation_id),
            _ => None,
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

/// Protocol and channel errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Unexpected frame: {0}")]
    UnexpectedFrame(String),
    #[error("Connection failed: {0}")]
    ConnectFailed(String),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Connection timeout")]
    Timeout,
}
