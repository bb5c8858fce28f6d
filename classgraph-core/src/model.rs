//! Class-diagram data model: classes, attributes, relations.
//!
//! Every type here is plain data. Structural rules (unique ids, cascade
//! removal, endpoint existence) live in [`crate::graph::GraphState`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::style::RelationKind;

/// Identifier of a class element within a diagram.
pub type ElementId = String;

/// Identifier of a relation within a diagram.
pub type RelationId = String;

/// Fresh id for a locally created class (`class_<uuid>`).
pub fn new_element_id() -> ElementId {
    format!("class_{}", Uuid::new_v4().simple())
}

/// Fresh id for a locally created relation.
pub fn new_relation_id() -> RelationId {
    Uuid::new_v4().to_string()
}

/// Position on the canvas, in diagram coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Where classes land when a payload omits the position.
pub const DEFAULT_POSITION: Point = Point::new(50.0, 50.0);

/// Name given to classes that arrive without one, and to new local classes.
pub const DEFAULT_CLASS_NAME: &str = "Class";

/// Primitive data kinds an attribute can carry.
///
/// Wire names follow the Java-flavoured vocabulary the backend generates
/// code from. Parsing is lenient: common aliases are accepted and unknown
/// names degrade to [`DataType::String`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DataType {
    #[default]
    String,
    Integer,
    Long,
    Double,
    BigDecimal,
    Boolean,
    LocalDate,
    LocalDateTime,
    Byte,
    Short,
    Character,
}

impl DataType {
    pub const ALL: [DataType; 11] = [
        DataType::String,
        DataType::Integer,
        DataType::Long,
        DataType::Double,
        DataType::BigDecimal,
        DataType::Boolean,
        DataType::LocalDate,
        DataType::LocalDateTime,
        DataType::Byte,
        DataType::Short,
        DataType::Character,
    ];

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::String => "String",
            DataType::Integer => "Integer",
            DataType::Long => "Long",
            DataType::Double => "Double",
            DataType::BigDecimal => "BigDecimal",
            DataType::Boolean => "Boolean",
            DataType::LocalDate => "LocalDate",
            DataType::LocalDateTime => "LocalDateTime",
            DataType::Byte => "Byte",
            DataType::Short => "Short",
            DataType::Character => "Character",
        }
    }

    /// Parse a wire name or a known alias.
    pub fn parse(name: &str) -> Option<Self> {
        let lowered = name.trim().to_ascii_lowercase();
        let kind = match lowered.as_str() {
            "string" | "str" | "text" => DataType::String,
            "integer" | "int" => DataType::Integer,
            "long" => DataType::Long,
            "double" | "float" => DataType::Double,
            "bigdecimal" | "decimal" => DataType::BigDecimal,
            "boolean" | "bool" => DataType::Boolean,
            "localdate" | "date" => DataType::LocalDate,
            "localdatetime" | "datetime" | "date-time" | "timestamp" => DataType::LocalDateTime,
            "byte" => DataType::Byte,
            "short" => DataType::Short,
            "character" | "char" => DataType::Character,
            _ => return None,
        };
        Some(kind)
    }
}

impl From<String> for DataType {
    fn from(name: String) -> Self {
        DataType::parse(&name).unwrap_or_else(|| {
            log::warn!("Unknown attribute type {name:?}, treating as String");
            DataType::String
        })
    }
}

impl From<DataType> for String {
    fn from(kind: DataType) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attribute row of a class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    #[serde(rename = "type", default)]
    pub data_type: DataType,
}

impl Attribute {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }

    /// The row a freshly added local attribute starts as.
    pub fn placeholder() -> Self {
        Self::new("attribute", DataType::String)
    }
}

/// Partial attribute update: absent fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<DataType>,
}

impl From<Attribute> for AttributePatch {
    fn from(attr: Attribute) -> Self {
        Self {
            name: Some(attr.name),
            data_type: Some(attr.data_type),
        }
    }
}

/// A class node of the diagram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassNode {
    pub id: ElementId,
    pub name: String,
    pub position: Point,
    pub attributes: Vec<Attribute>,
}

impl ClassNode {
    pub fn new(id: impl Into<ElementId>, name: impl Into<String>, position: Point) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            position,
            attributes: Vec::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: Vec<Attribute>) -> Self {
        self.attributes = attributes;
        self
    }

    /// Multi-line label the canvas draws: name, then `name: Type` rows.
    pub fn label_text(&self) -> String {
        let mut text = self.name.clone();
        for attr in &self.attributes {
            text.push('\n');
            text.push_str(&attr.name);
            text.push_str(": ");
            text.push_str(attr.data_type.as_str());
        }
        text
    }
}

/// Partial class update (rename, attribute list replacement, move).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Vec<Attribute>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Point>,
}

impl ClassPatch {
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.attributes.is_none() && self.position.is_none()
    }
}

/// A typed edge between two classes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub id: RelationId,
    pub from: ElementId,
    pub to: ElementId,
    pub kind: RelationKind,
    pub vertices: Vec<Point>,
    pub label: String,
}

impl Relation {
    /// New relation with no waypoints, labelled with its kind.
    pub fn new(
        id: impl Into<RelationId>,
        from: impl Into<ElementId>,
        to: impl Into<ElementId>,
        kind: RelationKind,
    ) -> Self {
        Self {
            id: id.into(),
            from: from.into(),
            to: to.into(),
            kind,
            vertices: Vec::new(),
            label: kind.as_str().to_string(),
        }
    }

    /// Whether `element` is one of this relation's endpoints.
    pub fn touches(&self, element: &str) -> bool {
        self.from == element || self.to == element
    }
}

/// Partial relation update. `from` and `to` rewire the relation only when
/// both are present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationPatch {
    pub kind: Option<RelationKind>,
    pub vertices: Option<Vec<Point>>,
    pub label: Option<String>,
    pub endpoints: Option<(ElementId, ElementId)>,
}

impl RelationPatch {
    pub fn kind(kind: RelationKind) -> Self {
        Self {
            kind: Some(kind),
            label: Some(kind.as_str().to_string()),
            ..Self::default()
        }
    }

    pub fn vertices(vertices: Vec<Point>) -> Self {
        Self {
            vertices: Some(vertices),
            ..Self::default()
        }
    }

    /// Only the waypoints change; used to tell position echoes apart.
    pub fn is_vertices_only(&self) -> bool {
        self.vertices.is_some()
            && self.kind.is_none()
            && self.label.is_none()
            && self.endpoints.is_none()
    }
}

/// Either kind of graph entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Node(ClassNode),
    Edge(Relation),
}

impl Entity {
    pub fn id(&self) -> &str {
        match self {
            Entity::Node(node) => &node.id,
            Entity::Edge(relation) => &relation.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_aliases() {
        assert_eq!(DataType::parse("int"), Some(DataType::Integer));
        assert_eq!(DataType::parse("Decimal"), Some(DataType::BigDecimal));
        assert_eq!(DataType::parse("date-time"), Some(DataType::LocalDateTime));
        assert_eq!(DataType::parse("char"), Some(DataType::Character));
        assert_eq!(DataType::parse("Blob"), None);
    }

    #[test]
    fn test_data_type_wire_names() {
        for kind in DataType::ALL {
            assert_eq!(DataType::parse(kind.as_str()), Some(kind));
        }
        let json = serde_json::to_string(&DataType::LocalDate).unwrap();
        assert_eq!(json, "\"LocalDate\"");
    }

    #[test]
    fn test_unknown_data_type_falls_back_to_string() {
        let attr: Attribute = serde_json::from_str(r#"{"name":"blob","type":"Blob"}"#).unwrap();
        assert_eq!(attr.data_type, DataType::String);
    }

    #[test]
    fn test_attribute_without_type() {
        let attr: Attribute = serde_json::from_str(r#"{"name":"id"}"#).unwrap();
        assert_eq!(attr, Attribute::new("id", DataType::String));
    }

    #[test]
    fn test_label_text() {
        let node = ClassNode::new("c1", "User", DEFAULT_POSITION).with_attributes(vec![
            Attribute::new("id", DataType::Long),
            Attribute::new("email", DataType::String),
            Attribute::new("born", DataType::LocalDate),
        ]);
        assert_eq!(node.label_text(), "User\nid: Long\nemail: String\nborn: LocalDate");
        assert_eq!(ClassNode::new("c2", "Empty", DEFAULT_POSITION).label_text(), "Empty");
    }

    #[test]
    fn test_new_ids_are_distinct() {
        let a = new_element_id();
        let b = new_element_id();
        assert!(a.starts_with("class_"));
        assert_ne!(a, b);
        assert_ne!(new_relation_id(), new_relation_id());
    }

    #[test]
    fn test_relation_patch_vertices_only() {
        assert!(RelationPatch::vertices(vec![Point::new(1.0, 2.0)]).is_vertices_only());
        assert!(!RelationPatch::kind(RelationKind::Composition).is_vertices_only());
    }

    #[test]
    fn test_entity_id() {
        let node = Entity::Node(ClassNode::new("c1", "A", Point::default()));
        let edge = Entity::Edge(Relation::new("r1", "c1", "c2", RelationKind::OneToOne));
        assert_eq!(node.id(), "c1");
        assert_eq!(edge.id(), "r1");
    }
}
