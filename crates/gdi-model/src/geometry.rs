//! Geometry type handling for editing and default styles.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Geometry types supported by the editing clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EditGeometry {
    Point,
    LineString,
    Polygon,
}

impl EditGeometry {
    pub fn as_str(self) -> &'static str {
        match self {
            EditGeometry::Point => "Point",
            EditGeometry::LineString => "LineString",
            EditGeometry::Polygon => "Polygon",
        }
    }
}

impl fmt::Display for EditGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Collapses a PostGIS geometry type onto its editable single type.
pub fn edit_geometry(geometry_type: &str) -> Option<EditGeometry> {
    match geometry_type.to_ascii_uppercase().as_str() {
        "POINT" | "MULTIPOINT" => Some(EditGeometry::Point),
        "LINESTRING" | "MULTILINESTRING" => Some(EditGeometry::LineString),
        "POLYGON" | "MULTIPOLYGON" => Some(EditGeometry::Polygon),
        _ => None,
    }
}

/// Built-in default style families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StyleKind {
    Point,
    LineString,
    Polygon,
    Raster,
}

impl StyleKind {
    /// File stem of the bundled default QML.
    pub fn file_stem(self) -> &'static str {
        match self {
            StyleKind::Point => "point",
            StyleKind::LineString => "linestring",
            StyleKind::Polygon => "polygon",
            StyleKind::Raster => "raster",
        }
    }
}

/// Default style family for a vector geometry type, `None` if unknown.
pub fn style_kind(geometry_type: &str) -> Option<StyleKind> {
    let lower = geometry_type.to_ascii_lowercase();
    match lower.strip_prefix("multi").unwrap_or(&lower) {
        "point" => Some(StyleKind::Point),
        "linestring" => Some(StyleKind::LineString),
        "polygon" => Some(StyleKind::Polygon),
        _ => None,
    }
}
