//! OWS services, background layers, edit datasets and map themes.

use serde::{Deserialize, Serialize};

use crate::resource::ResourceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OwsType {
    Wms,
    Wfs,
}

impl OwsType {
    pub fn from_code(code: &str) -> Option<Self> {
        match code.to_ascii_uppercase().as_str() {
            "WMS" => Some(OwsType::Wms),
            "WFS" => Some(OwsType::Wfs),
            _ => None,
        }
    }
}

/// A `wms_wfs` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwsService {
    pub id: ResourceId,
    pub name: String,
    pub ows_type: OwsType,
    pub root_layer_id: ResourceId,
    pub ows_metadata: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundLayer {
    pub id: ResourceId,
    pub name: String,
    pub qgis_datasource: Option<String>,
    pub qwc2_bg_layer_name: Option<String>,
    /// QWC2 background layer definition as JSON
    pub qwc2_bg_layer_config: Option<String>,
    pub thumbnail_image: Option<String>,
}

/// An editable dataset: a named `data_set_edit` wrapping a view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSetEdit {
    pub id: ResourceId,
    pub name: String,
    pub view_id: ResourceId,
}

/// A `map` row with its ordered `map_layer` placements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapTheme {
    pub id: ResourceId,
    pub name: String,
    pub title: Option<String>,
    /// `xmin,ymin,xmax,ymax`
    pub initial_extent: Option<String>,
    pub map_order: i32,
    pub thumbnail_image: Option<String>,
    pub service_id: Option<ResourceId>,
    pub background_layer_id: Option<ResourceId>,
    pub layers: Vec<MapLayerRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapLayerRef {
    pub layer_id: ResourceId,
    pub active: bool,
    pub order: i32,
    pub transparency: i32,
}

impl MapTheme {
    /// Parsed initial extent, `None` if unset or malformed.
    pub fn initial_bounds(&self) -> Option<Vec<f64>> {
        let raw = self.initial_extent.as_deref()?;
        raw.split(',')
            .map(|coord| coord.trim().parse::<f64>().ok())
            .collect()
    }
}
