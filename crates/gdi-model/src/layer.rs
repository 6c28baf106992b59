//! The layer tree: `Group` and `Data` layers sharing a common record.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::resource::ResourceId;

/// An `ows_layer` row together with its variant payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub id: ResourceId,
    pub name: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub legend: Option<LegendImage>,
    /// Free-form JSON blob (abstract, keywords, contact info ...)
    pub ows_metadata: Option<String>,
    /// Comma separated
    pub synonyms: Option<String>,
    /// Comma separated
    pub keywords: Option<String>,
    pub kind: LayerKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LayerKind {
    Group(GroupLayer),
    Data(DataLayer),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupLayer {
    pub facade: bool,
    /// Child edges sorted by `order`.
    pub children: Vec<ChildEdge>,
}

/// A `group_layer` row placing a child layer inside its parent group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildEdge {
    pub child_id: ResourceId,
    pub active: bool,
    pub order: i32,
    /// Transparency of this placement in percent (0..=100).
    pub transparency: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataLayer {
    pub view_id: ResourceId,
    pub info_template: Option<ResourceId>,
    pub report_template: Option<ResourceId>,
    /// QML document used for server side rendering.
    pub qgs_style: Option<String>,
    /// QML document used by clients, falls back to `qgs_style`.
    pub client_qgs_style: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegendImage {
    pub data: Vec<u8>,
    pub filename: Option<String>,
}

impl Layer {
    pub fn group(id: ResourceId, name: impl Into<String>, group: GroupLayer) -> Self {
        Self::with_kind(id, name, LayerKind::Group(group))
    }

    pub fn data(id: ResourceId, name: impl Into<String>, data: DataLayer) -> Self {
        Self::with_kind(id, name, LayerKind::Data(data))
    }

    fn with_kind(id: ResourceId, name: impl Into<String>, kind: LayerKind) -> Self {
        Self {
            id,
            name: name.into(),
            title: None,
            description: None,
            legend: None,
            ows_metadata: None,
            synonyms: None,
            keywords: None,
            kind,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_ows_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.ows_metadata = Some(metadata.into());
        self
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, LayerKind::Group(_))
    }

    pub fn as_group(&self) -> Option<&GroupLayer> {
        match &self.kind {
            LayerKind::Group(group) => Some(group),
            LayerKind::Data(_) => None,
        }
    }

    pub fn as_data(&self) -> Option<&DataLayer> {
        match &self.kind {
            LayerKind::Data(data) => Some(data),
            LayerKind::Group(_) => None,
        }
    }

    pub fn is_facade(&self) -> bool {
        self.as_group().is_some_and(|group| group.facade)
    }

    /// Title if set and non-empty, else the name.
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .filter(|title| !title.is_empty())
            .unwrap_or(&self.name)
    }

    /// Parsed `ows_metadata`; `Ok(empty)` when unset.
    pub fn metadata(&self) -> Result<Map<String, Value>, serde_json::Error> {
        match self.ows_metadata.as_deref() {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw),
            _ => Ok(Map::new()),
        }
    }
}

impl GroupLayer {
    pub fn new(facade: bool) -> Self {
        Self {
            facade,
            children: Vec::new(),
        }
    }

    /// Appends a child edge and keeps the edge list ordered.
    pub fn with_child(mut self, edge: ChildEdge) -> Self {
        self.children.push(edge);
        self.children.sort_by_key(|edge| edge.order);
        self
    }
}

impl ChildEdge {
    pub fn new(child_id: ResourceId, order: i32) -> Self {
        Self {
            child_id,
            active: true,
            order,
            transparency: 0,
        }
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn with_transparency(mut self, transparency: i32) -> Self {
        self.transparency = transparency;
        self
    }

    /// Opacity in 0..=255 for map viewers.
    pub fn opacity_255(&self) -> i64 {
        opacity_255(self.transparency)
    }
}

impl DataLayer {
    pub fn new(view_id: ResourceId) -> Self {
        Self {
            view_id,
            info_template: None,
            report_template: None,
            qgs_style: None,
            client_qgs_style: None,
        }
    }
}

/// Converts a transparency percentage into a 0..=255 opacity.
pub fn opacity_255(transparency: i32) -> i64 {
    ((100.0 - f64::from(transparency)) / 100.0 * 255.0).round() as i64
}

/// Splits a comma separated column value into trimmed entries.
pub fn split_values(value: Option<&str>) -> Vec<String> {
    match value {
        Some(value) if !value.is_empty() => value.split(',').map(|s| s.trim().to_string()).collect(),
        _ => Vec::new(),
    }
}
