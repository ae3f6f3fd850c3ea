//! Core domain types for the medical knowledge graph.

use serde::{Deserialize, Serialize};

use crate::error::{MedGraphError, Result};

// ---------------------------------------------------------------------------
// Label
// ---------------------------------------------------------------------------

/// Whether nodes of a label carry a `name` or a `desc` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelKind {
    /// Short entity names (diseases, drugs, symptoms, ...).
    Named,
    /// Free-text descriptions (causes, prevention advice, ...).
    Described,
}

/// The closed set of node categories in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Label {
    Disease,
    Department,
    Symptom,
    Drug,
    Food,
    Check,
    Treat,
    Cause,
    Way,
    PreventWay,
    People,
    Duration,
}

impl Label {
    /// Every label, named categories first.
    pub const ALL: [Label; 12] = [
        Self::Disease,
        Self::Department,
        Self::Symptom,
        Self::Drug,
        Self::Food,
        Self::Check,
        Self::Treat,
        Self::Cause,
        Self::Way,
        Self::PreventWay,
        Self::People,
        Self::Duration,
    ];

    /// The label as written in the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disease => "Disease",
            Self::Department => "Department",
            Self::Symptom => "Symptom",
            Self::Drug => "Drug",
            Self::Food => "Food",
            Self::Check => "Check",
            Self::Treat => "Treat",
            Self::Cause => "Cause",
            Self::Way => "Way",
            Self::PreventWay => "PreventWay",
            Self::People => "People",
            Self::Duration => "Duration",
        }
    }

    pub fn kind(&self) -> LabelKind {
        match self {
            Self::Disease
            | Self::Department
            | Self::Symptom
            | Self::Drug
            | Self::Food
            | Self::Check
            | Self::Treat => LabelKind::Named,
            Self::Cause | Self::Way | Self::PreventWay | Self::People | Self::Duration => {
                LabelKind::Described
            }
        }
    }

    /// Prefix used when deriving node ids (`disease`, `preventway`, ...).
    pub fn id_prefix(&self) -> String {
        self.as_str().to_lowercase()
    }

    /// Name of the attribute holding the node text.
    pub fn text_attribute(&self) -> &'static str {
        match self.kind() {
            LabelKind::Named => "name",
            LabelKind::Described => "description",
        }
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Label {
    type Err = MedGraphError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|l| l.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| MedGraphError::validation(format!("unknown label '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// RelationKind
// ---------------------------------------------------------------------------

/// The closed set of directed relation types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationKind {
    Accompany,
    Belong,
    Have,
    LeadTo,
    CommonUse,
    Eat,
    NoEat,
    Transmit,
    Prevent,
    ToCheck,
    ToTreat,
    CommonOn,
    TreatDuration,
}

impl RelationKind {
    pub const ALL: [RelationKind; 13] = [
        Self::Accompany,
        Self::Belong,
        Self::Have,
        Self::LeadTo,
        Self::CommonUse,
        Self::Eat,
        Self::NoEat,
        Self::Transmit,
        Self::Prevent,
        Self::ToCheck,
        Self::ToTreat,
        Self::CommonOn,
        Self::TreatDuration,
    ];

    /// The relation type as written in the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accompany => "ACCOMPANY",
            Self::Belong => "BELONG",
            Self::Have => "HAVE",
            Self::LeadTo => "LEAD_TO",
            Self::CommonUse => "COMMON_USE",
            Self::Eat => "EAT",
            Self::NoEat => "NO_EAT",
            Self::Transmit => "TRANSMIT",
            Self::Prevent => "PREVENT",
            Self::ToCheck => "TO_CHECK",
            Self::ToTreat => "TO_TREAT",
            Self::CommonOn => "COMMON_ON",
            Self::TreatDuration => "TREAT_DURATION",
        }
    }

    /// The fixed `(start, end)` labels of this relation type.
    pub fn endpoints(&self) -> (Label, Label) {
        match self {
            Self::Accompany => (Label::Disease, Label::Disease),
            Self::Belong => (Label::Disease, Label::Department),
            Self::Have => (Label::Disease, Label::Symptom),
            Self::LeadTo => (Label::Cause, Label::Disease),
            Self::CommonUse => (Label::Disease, Label::Drug),
            Self::Eat => (Label::Disease, Label::Food),
            Self::NoEat => (Label::Disease, Label::Food),
            Self::Transmit => (Label::Disease, Label::Way),
            Self::Prevent => (Label::PreventWay, Label::Disease),
            Self::ToCheck => (Label::Check, Label::Disease),
            Self::ToTreat => (Label::Treat, Label::Disease),
            Self::CommonOn => (Label::Disease, Label::People),
            Self::TreatDuration => (Label::Disease, Label::Duration),
        }
    }
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RelationKind {
    type Err = MedGraphError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| MedGraphError::validation(format!("unknown relation type '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Nodes and relations
// ---------------------------------------------------------------------------

/// Identifier of a node, unique within its label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A Disease node: the only category carrying both a name and a description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiseaseNode {
    pub id: NodeId,
    pub name: String,
    /// Empty for diseases only known as an accompanying disease.
    pub desc: String,
}

/// The text attribute of a non-disease node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "attr", content = "value", rename_all = "snake_case")]
pub enum NodeAttr {
    Name(String),
    Desc(String),
}

impl NodeAttr {
    pub fn text(&self) -> &str {
        match self {
            Self::Name(s) | Self::Desc(s) => s,
        }
    }
}

/// A node of any category other than Disease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub label: Label,
    pub id: NodeId,
    pub attr: NodeAttr,
}

impl GraphNode {
    /// Build a node of a "named" category.
    pub fn named(label: Label, id: NodeId, name: impl Into<String>) -> Result<Self> {
        if label.kind() != LabelKind::Named {
            return Err(MedGraphError::validation(format!(
                "{label} nodes carry a description, not a name"
            )));
        }
        Ok(Self {
            label,
            id,
            attr: NodeAttr::Name(name.into()),
        })
    }

    /// Build a node of a "described" category.
    pub fn described(label: Label, id: NodeId, desc: impl Into<String>) -> Result<Self> {
        if label.kind() != LabelKind::Described {
            return Err(MedGraphError::validation(format!(
                "{label} nodes carry a name, not a description"
            )));
        }
        Ok(Self {
            label,
            id,
            attr: NodeAttr::Desc(desc.into()),
        })
    }
}

/// The two endpoint ids of a relation whose type and labels are implied by its batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationPair {
    pub start_id: NodeId,
    pub end_id: NodeId,
}

// ---------------------------------------------------------------------------
// Ingestion input
// ---------------------------------------------------------------------------

/// One disease record of the ingestion dataset. Every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MedicalRecord {
    pub name: Option<String>,
    pub desc: Option<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub accompany: Vec<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub department: Vec<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub symptom: Vec<String>,
    pub cause: Option<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub drug: Vec<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub eat: Vec<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub not_eat: Vec<String>,
    pub way: Option<String>,
    pub prevent: Option<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub check: Vec<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub treat: Vec<String>,
    pub people: Option<String>,
    pub duration: Option<String>,
}

/// Datasets exported from dataframes write `null` for empty lists.
fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

// ---------------------------------------------------------------------------
// Serving API messages
// ---------------------------------------------------------------------------

/// Incoming question of the serving API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub message: String,
}

/// Reply of the serving API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub message: String,
}
