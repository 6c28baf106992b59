//! Per-service config and permission assemblers.
//!
//! Every service the generator knows implements [`ServiceAssembler`]:
//! - `config` builds `<service_name>Config.json` from the session and the
//!   service block of the run settings
//! - `permissions` builds the per-role fragment merged into
//!   `permissions.json`
//!
//! Documents are `serde_json::Map`s, which keep insertion order with the
//! `preserve_order` feature, so key order is the order of construction.

pub mod data;
pub mod dataproduct;
pub mod document;
pub mod feature_info;
pub mod generic;
pub mod legend;
pub mod map_viewer;
pub mod ogc;
pub mod print;
pub mod search;

use async_trait::async_trait;
use gdi_model::{Catalog, GrantIndex, ModelError};
use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::database::{PrecacheScope, Session};
use crate::introspection::SpatialIntrospector;
use crate::run_log::RunLog;
use crate::settings::{RunSettings, ServiceSettings};

/// An ordered JSON object.
pub type Document = Map<String, Value>;

/// Everything an assembler reads while building one document.
pub struct AssemblyContext<'a> {
    pub session: &'a Session,
    pub introspector: &'a dyn SpatialIntrospector,
    pub settings: &'a RunSettings,
    pub log: &'a RunLog,
}

impl<'a> AssemblyContext<'a> {
    pub fn catalog(&self) -> &'a Catalog {
        &self.session.catalog
    }

    pub fn grants(&self) -> &'a GrantIndex {
        &self.session.grants
    }

    /// Records traversal faults in the run log.
    pub fn report_faults(&self, faults: &[ModelError]) {
        for fault in faults {
            match fault {
                ModelError::Cycle { .. } => self.log.error(fault.to_string()),
                _ => self.log.warning(fault.to_string()),
            }
        }
    }
}

#[async_trait]
pub trait ServiceAssembler: Send + Sync {
    /// Name used in the `services` list of the run settings.
    fn name(&self) -> &'static str;

    /// Prefix of the output file `<service_name>Config.json`.
    fn service_name(&self) -> &'static str {
        self.name()
    }

    /// Value of the `service` key in the config document.
    fn service_id(&self) -> &'static str {
        self.name()
    }

    fn schema_url(&self) -> &'static str;

    /// Relationship chains the assembler reads from a session.
    fn precache(&self) -> PrecacheScope;

    async fn config(&self, service: &ServiceSettings, ctx: &AssemblyContext<'_>) -> Document;

    fn permissions(&self, role: &str, ctx: &AssemblyContext<'_>) -> Document;

    /// `$schema` and `service` keys shared by every config document.
    fn base_document(&self) -> Document {
        let mut document = Map::new();
        document.insert("$schema".into(), Value::from(self.schema_url()));
        document.insert("service".into(), Value::from(self.service_id()));
        document
    }
}

/// All known assemblers keyed by settings name, in generation order.
pub fn registry() -> IndexMap<&'static str, Box<dyn ServiceAssembler>> {
    let mut assemblers: Vec<Box<dyn ServiceAssembler>> = vec![
        Box::new(ogc::OgcService),
        Box::new(feature_info::FeatureInfoService),
        Box::new(legend::LegendService),
        Box::new(map_viewer::MapViewerService),
        Box::new(dataproduct::DataproductService),
        Box::new(print::PrintService),
        Box::new(search::SearchService),
        Box::new(data::DataService),
        Box::new(document::DocumentService),
    ];
    assemblers.extend(generic::GenericService::all().map(|service| Box::new(service) as _));

    assemblers
        .into_iter()
        .map(|assembler| (assembler.name(), assembler))
        .collect()
}

/// Copies `config` from the service settings and fills in the default QGIS
/// server URL when the block does not set one.
pub(crate) fn config_with_server_url(
    service: &ServiceSettings,
    settings: &RunSettings,
) -> Document {
    let mut config = service.config.clone();
    let url = match config.get("default_qgis_server_url").and_then(Value::as_str) {
        Some(url) => crate::settings::with_trailing_slash(url),
        None => settings.qgis_server_url(),
    };
    config.insert("default_qgis_server_url".into(), Value::from(url));
    config
}

/// Resolves `path` against `base` the way a browser resolves a relative
/// link; falls back to plain concatenation for unparsable bases.
pub(crate) fn url_join(base: &str, path: &str) -> String {
    match url::Url::parse(base).and_then(|base| base.join(path)) {
        Ok(joined) => joined.to_string(),
        Err(_) => match base.rfind('/') {
            Some(pos) => format!("{}{}", &base[..=pos], path),
            None => path.to_string(),
        },
    }
}

#[cfg(test)]
pub(crate) mod fixtures;
