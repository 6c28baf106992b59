//! Project document rendering.

use handlebars::Handlebars;
use serde::{Deserialize, Serialize};

use crate::error::SynthesisError;
use crate::run_log::RunLog;

use super::style::xml_escape;

const SERVICE_TEMPLATE: &str = include_str!("../../templates/qgs/service.qgs.hbs");
const LAYER_TREE_PARTIAL: &str = include_str!("../../templates/qgs/layer_tree.hbs");

pub(crate) const SERVICE: &str = "service";

/// Node of a project layer tree.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum QgsNode {
    Group(QgsGroup),
    Layer(QgsLayer),
}

#[derive(Debug, Clone, Serialize)]
pub struct QgsGroup {
    pub is_group: bool,
    pub name: String,
    pub title: String,
    pub items: Vec<QgsNode>,
}

impl QgsGroup {
    pub fn new(name: impl Into<String>, title: impl Into<String>, items: Vec<QgsNode>) -> Self {
        Self {
            is_group: true,
            name: name.into(),
            title: title.into(),
            items,
        }
    }
}

/// A `<maplayer>` entry.
#[derive(Debug, Clone, Serialize)]
pub struct QgsLayer {
    pub name: String,
    pub title: String,
    pub id: String,
    pub layertype: &'static str,
    /// Pre-escaped attributes of the `<maplayer>` element.
    pub attributes: String,
    pub provider: &'static str,
    pub datasource: String,
    pub primary_key: Option<String>,
    /// QML children, inserted verbatim.
    pub style: String,
    pub map_tip: String,
    pub extent: Option<[f64; 4]>,
}

impl QgsNode {
    /// Map layers of the subtree in tree order.
    pub fn map_layers<'a>(&'a self, out: &mut Vec<&'a QgsLayer>) {
        match self {
            QgsNode::Layer(layer) => out.push(layer),
            QgsNode::Group(group) => {
                for item in &group.items {
                    item.map_layers(out);
                }
            }
        }
    }
}

/// Template binding of one project document.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProjectBinding {
    pub wms_service_title: String,
    pub wms_service_abstract: String,
    pub wms_keywords: Option<Vec<String>>,
    pub wms_url: String,
    pub wms_contact_person: String,
    pub wms_contact_organization: String,
    pub wms_contact_position: String,
    pub wms_contact_phone: String,
    pub wms_contact_mail: String,
    pub wms_fees: String,
    pub wms_access_constraints: String,
    pub wms_root_name: String,
    pub wms_root_title: String,
    pub wms_crs_list: Vec<String>,
    pub wms_extent: Option<Vec<f64>>,
    pub items: Vec<QgsNode>,
    pub map_layers: Vec<QgsLayer>,
    pub composers: Vec<String>,
    pub wfs_layers: Vec<String>,
    pub wfs_url: String,
    pub selection_color: [u8; 4],
    pub default_extent: [f64; 4],
}

impl ProjectBinding {
    pub fn with_items(mut self, items: Vec<QgsNode>) -> Self {
        let mut layers = Vec::new();
        for item in &items {
            item.map_layers(&mut layers);
        }
        self.map_layers = layers.into_iter().cloned().collect();
        self.items = items;
        self
    }

    /// Service level metadata shared by the WMS and WFS projects.
    pub fn with_metadata(mut self, metadata: &ServiceMetadata) -> Self {
        self.wms_service_title = metadata.service_title.clone();
        self.wms_service_abstract = metadata.service_abstract.clone();
        self.wms_keywords = metadata.keywords.clone();
        self.wms_fees = metadata.fees.clone();
        self.wms_access_constraints = metadata.access_constraints.clone();
        self
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawServiceMetadata {
    service_title: Option<String>,
    service_abstract: Option<String>,
    keywords: Option<String>,
    contact_person: Option<String>,
    contact_organization: Option<String>,
    contact_position: Option<String>,
    contact_phone: Option<String>,
    contact_mail: Option<String>,
    fees: Option<String>,
    access_constraints: Option<String>,
    wms_root_title: Option<String>,
    crs_list: Option<String>,
    wms_extent: Option<String>,
}

/// WMS capabilities metadata from `wms_wfs.ows_metadata`.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceMetadata {
    pub service_title: String,
    pub service_abstract: String,
    pub keywords: Option<Vec<String>>,
    pub contact_person: String,
    pub contact_organization: String,
    pub contact_position: String,
    pub contact_phone: String,
    pub contact_mail: String,
    pub fees: String,
    pub access_constraints: String,
    pub root_title: String,
    pub crs_list: Vec<String>,
    pub extent: Option<Vec<f64>>,
}

fn comma_list(raw: Option<&str>) -> Option<Vec<String>> {
    raw.filter(|raw| !raw.is_empty())
        .map(|raw| raw.split(',').map(|item| item.trim().to_string()).collect())
}

impl ServiceMetadata {
    /// Parses the metadata blob; invalid JSON is logged and treated as empty.
    pub fn parse(ows_metadata: Option<&str>, log: &RunLog) -> Self {
        let raw = match ows_metadata.filter(|raw| !raw.trim().is_empty()) {
            None => RawServiceMetadata::default(),
            Some(raw) => serde_json::from_str(raw).unwrap_or_else(|e| {
                log.error(format!("Invalid JSON in wms_wfs.ows_metadata: {}", e));
                RawServiceMetadata::default()
            }),
        };

        let extent = raw.wms_extent.as_deref().filter(|raw| !raw.is_empty()).and_then(|extent| {
            extent
                .split(',')
                .map(|coord| coord.trim().parse::<f64>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| log.warning(format!("Invalid wms_extent '{}': {}", extent, e)))
                .ok()
        });

        Self {
            service_title: raw.service_title.unwrap_or_default(),
            service_abstract: raw.service_abstract.unwrap_or_default(),
            keywords: comma_list(raw.keywords.as_deref()),
            contact_person: raw.contact_person.unwrap_or_default(),
            contact_organization: raw.contact_organization.unwrap_or_default(),
            contact_position: raw.contact_position.unwrap_or_default(),
            contact_phone: raw.contact_phone.unwrap_or_default(),
            contact_mail: raw.contact_mail.unwrap_or_default(),
            fees: raw.fees.unwrap_or_default(),
            access_constraints: raw.access_constraints.unwrap_or_default(),
            root_title: raw.wms_root_title.unwrap_or_default(),
            crs_list: comma_list(raw.crs_list.as_deref())
                .unwrap_or_else(|| vec!["EPSG:2056".to_string()]),
            extent,
        }
    }
}

/// Handlebars registry with the project template and XML escaping.
pub fn templates() -> Result<Handlebars<'static>, SynthesisError> {
    let mut handlebars = Handlebars::new();
    handlebars.register_escape_fn(xml_escape);
    handlebars
        .register_template_string(SERVICE, SERVICE_TEMPLATE)
        .map_err(|e| SynthesisError::Template {
            name: SERVICE.to_string(),
            message: e.to_string(),
        })?;
    handlebars
        .register_partial("layer_tree", LAYER_TREE_PARTIAL)
        .map_err(|e| SynthesisError::Template {
            name: "layer_tree".to_string(),
            message: e.to_string(),
        })?;
    Ok(handlebars)
}
