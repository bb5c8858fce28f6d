//! Relation kinds and their visual style.
//!
//! The style of a relation is a pure function of its kind. Relations store
//! only the kind; the canvas (and the outbound wire payload) gets the style
//! from [`RelationStyleResolver`].

use serde::{Deserialize, Serialize};

/// Semantic kind of a relation between two classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RelationKind {
    OneToOne,
    #[default]
    OneToMany,
    ManyToOne,
    ManyToMany,
    Inheritance,
    Composition,
    Aggregation,
}

impl RelationKind {
    pub const ALL: [RelationKind; 7] = [
        RelationKind::OneToOne,
        RelationKind::OneToMany,
        RelationKind::ManyToOne,
        RelationKind::ManyToMany,
        RelationKind::Inheritance,
        RelationKind::Composition,
        RelationKind::Aggregation,
    ];

    /// Wire name, also the default label text.
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::OneToOne => "OneToOne",
            RelationKind::OneToMany => "OneToMany",
            RelationKind::ManyToOne => "ManyToOne",
            RelationKind::ManyToMany => "ManyToMany",
            RelationKind::Inheritance => "Inheritance",
            RelationKind::Composition => "Composition",
            RelationKind::Aggregation => "Aggregation",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    /// Human-readable name for pickers.
    pub fn display_name(&self) -> &'static str {
        match self {
            RelationKind::OneToOne => "One to One (1:1)",
            RelationKind::OneToMany => "One to Many (1:N)",
            RelationKind::ManyToOne => "Many to One (N:1)",
            RelationKind::ManyToMany => "Many to Many (N:N)",
            RelationKind::Inheritance => "Inheritance",
            RelationKind::Composition => "Composition",
            RelationKind::Aggregation => "Aggregation",
        }
    }

    pub fn style(&self) -> RelationStyle {
        RelationStyleResolver::resolve(*self)
    }
}

impl From<String> for RelationKind {
    fn from(name: String) -> Self {
        RelationKind::parse(&name).unwrap_or_else(|| {
            log::warn!("Unknown relation type {name:?}, using OneToMany");
            RelationKind::OneToMany
        })
    }
}

impl From<RelationKind> for String {
    fn from(kind: RelationKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SVG path markers used at relation ends.
const NO_MARKER: &str = "M 0 0";
const ARROW: &str = "M 10 0 L 0 5 L 10 10 z";
const CROWS_FOOT: &str = "M 10 0 L 0 5 L 10 10 L 15 5 L 10 0";
const HOLLOW_TRIANGLE: &str = "M 0 0 L 10 5 L 0 10 z";
const DIAMOND: &str = "M 0 5 L 5 0 L 10 5 L 5 10 z";

/// One end marker of a relation line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Marker {
    #[serde(rename = "type")]
    pub marker_type: String,
    pub d: String,
    pub fill: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_width: Option<u32>,
}

impl Marker {
    fn path(d: &str, fill: &str) -> Self {
        Self {
            marker_type: "path".to_string(),
            d: d.to_string(),
            fill: fill.to_string(),
            stroke: None,
            stroke_width: None,
        }
    }

    fn outlined(d: &str, fill: &str, stroke: &str) -> Self {
        Self {
            stroke: Some(stroke.to_string()),
            stroke_width: Some(2),
            ..Self::path(d, fill)
        }
    }

    fn none() -> Self {
        Self::path(NO_MARKER, "none")
    }
}

/// Line attributes of a relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineStyle {
    pub stroke: String,
    pub stroke_width: u32,
    pub stroke_dasharray: String,
    pub source_marker: Marker,
    pub target_marker: Marker,
}

/// Full visual style of a relation, shaped as the canvas expects
/// (`{ "line": { ... } }`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationStyle {
    pub line: LineStyle,
}

/// Stateless kind → style mapping.
pub struct RelationStyleResolver;

impl RelationStyleResolver {
    pub fn stroke(kind: RelationKind) -> &'static str {
        match kind {
            RelationKind::OneToOne => "#2563eb",
            RelationKind::OneToMany => "#dc2626",
            RelationKind::ManyToOne => "#ea580c",
            RelationKind::ManyToMany => "#7c3aed",
            RelationKind::Inheritance => "#059669",
            RelationKind::Composition => "#0891b2",
            RelationKind::Aggregation => "#65a30d",
        }
    }

    pub fn resolve(kind: RelationKind) -> RelationStyle {
        let stroke = Self::stroke(kind);
        let (source_marker, target_marker) = match kind {
            RelationKind::OneToOne => (Marker::none(), Marker::path(ARROW, stroke)),
            RelationKind::OneToMany => (Marker::none(), Marker::path(CROWS_FOOT, stroke)),
            RelationKind::ManyToOne => {
                (Marker::path(CROWS_FOOT, stroke), Marker::path(ARROW, stroke))
            }
            RelationKind::ManyToMany => {
                (Marker::path(CROWS_FOOT, stroke), Marker::path(CROWS_FOOT, stroke))
            }
            RelationKind::Inheritance => (
                Marker::none(),
                Marker::outlined(HOLLOW_TRIANGLE, "white", stroke),
            ),
            RelationKind::Composition => {
                (Marker::path(DIAMOND, stroke), Marker::path(ARROW, stroke))
            }
            RelationKind::Aggregation => (
                Marker::outlined(DIAMOND, "white", stroke),
                Marker::path(ARROW, stroke),
            ),
        };

        RelationStyle {
            line: LineStyle {
                stroke: stroke.to_string(),
                stroke_width: 2,
                stroke_dasharray: "none".to_string(),
                source_marker,
                target_marker,
            },
        }
    }

    /// Resolve a raw kind name; unknown names get the OneToMany style.
    pub fn resolve_name(name: &str) -> RelationStyle {
        Self::resolve(RelationKind::parse(name).unwrap_or_default())
    }
}
