//! Permissionable GDI resources and their kinds.
//!
//! Every grant in `iam.resource_permission` targets a row of the
//! `gdi_knoten.gdi_resource` view. The view carries the physical table name
//! of the entity; `ResourceKind` is the closed set of table names this crate
//! understands.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Stable integer id (`gdi_oid`) shared by all GDI resources.
pub type ResourceId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    WmsWfs,
    OwsLayer,
    DataSetView,
    DataSet,
    DataSource,
    #[serde(rename = "data_set_view_attributes")]
    Attribute,
    DataSetEdit,
    BackgroundLayer,
    Template,
    Map,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 10] = [
        ResourceKind::WmsWfs,
        ResourceKind::OwsLayer,
        ResourceKind::DataSetView,
        ResourceKind::DataSet,
        ResourceKind::DataSource,
        ResourceKind::Attribute,
        ResourceKind::DataSetEdit,
        ResourceKind::BackgroundLayer,
        ResourceKind::Template,
        ResourceKind::Map,
    ];

    /// Table name as stored in `gdi_resource.table_name`.
    pub fn table_name(self) -> &'static str {
        match self {
            ResourceKind::WmsWfs => "wms_wfs",
            ResourceKind::OwsLayer => "ows_layer",
            ResourceKind::DataSetView => "data_set_view",
            ResourceKind::DataSet => "data_set",
            ResourceKind::DataSource => "data_source",
            ResourceKind::Attribute => "data_set_view_attributes",
            ResourceKind::DataSetEdit => "data_set_edit",
            ResourceKind::BackgroundLayer => "background_layer",
            ResourceKind::Template => "template",
            ResourceKind::Map => "map",
        }
    }

    pub fn from_table_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.table_name() == name)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_table_name(s).ok_or_else(|| format!("unknown GDI resource table '{s}'"))
    }
}

/// A row of the `gdi_resource` view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GdiResource {
    pub id: ResourceId,
    pub kind: ResourceKind,
    pub name: String,
    pub description: Option<String>,
}
