//! QGIS project synthesis
//!
//! For every WMS service three projects are written to the project output
//! directory:
//! - `<wms>.qgs` for serving the WMS
//! - `<wms>_print.qgs` with the background layers and all print layouts
//! - `<wms>_wfs.qgs` with the layers of the first WFS and their keys
//!
//! Each data layer is resolved on its own. A layer whose source cannot be
//! introspected is logged and left out while its siblings are still written.

pub mod datasource;
pub mod project;
pub mod style;

use std::path::PathBuf;

use gdi_model::{
    style_kind, Attribute, Catalog, ConnectionKind, DataChain, DataLayer, GroupLayer, Layer,
    LayerVisitor, OwsService, OwsType, ResourceId, StyleKind, TableRef, WalkContext,
};
use handlebars::Handlebars;
use tracing::info;
use uuid::Uuid;

use crate::database::{is_postgres_url, mask_database_url, PrecacheScope, Session};
use crate::error::SynthesisError;
use crate::introspection::SpatialIntrospector;
use crate::run_log::RunLog;
use crate::settings::QgsWriterSettings;

use datasource::{db_connection, postgres_datasource, raster_datasource};
use project::{ProjectBinding, QgsGroup, QgsLayer, QgsNode, ServiceMetadata, SERVICE};
use style::{default_style, parse_qml_style, ParsedStyle};

/// A rendered project document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectFile {
    pub file_name: String,
    pub content: String,
}

pub struct QgsWriter {
    settings: QgsWriterSettings,
    handlebars: Handlebars<'static>,
}

// ── Layer tree plan ─────────────────────────────────────────────────

/// Shape of a service tree before its data layers are resolved.
enum PlanNode {
    Group {
        layer_id: ResourceId,
        children: Vec<PlanNode>,
    },
    Data {
        layer_id: ResourceId,
    },
}

impl PlanNode {
    fn data_layer_ids(&self, out: &mut Vec<ResourceId>) {
        match self {
            PlanNode::Data { layer_id } => out.push(*layer_id),
            PlanNode::Group { children, .. } => {
                for child in children {
                    child.data_layer_ids(out);
                }
            }
        }
    }
}

struct Plan;

impl LayerVisitor for Plan {
    type Output = PlanNode;

    fn data(
        &mut self,
        _catalog: &Catalog,
        layer: &Layer,
        _data: &DataLayer,
        _ctx: &WalkContext<'_>,
    ) -> Option<PlanNode> {
        Some(PlanNode::Data { layer_id: layer.id })
    }

    fn group(
        &mut self,
        _catalog: &Catalog,
        layer: &Layer,
        _group: &GroupLayer,
        _ctx: &WalkContext<'_>,
        children: Vec<PlanNode>,
    ) -> Option<PlanNode> {
        Some(PlanNode::Group {
            layer_id: layer.id,
            children,
        })
    }
}

/// Resolved tree of one service.
struct ServiceTree {
    root_name: String,
    items: Vec<QgsNode>,
    vector_layer_ids: Vec<String>,
}

impl QgsWriter {
    pub fn new(settings: QgsWriterSettings) -> Result<Self, SynthesisError> {
        Ok(Self {
            settings,
            handlebars: project::templates()?,
        })
    }

    /// Relationship chains read while writing projects.
    pub fn precache() -> PrecacheScope {
        PrecacheScope {
            layers: true,
            datasets: true,
            templates: true,
            services: true,
            background_layers: true,
            ..PrecacheScope::NONE
        }
    }

    /// Renders the projects of every WMS service.
    pub async fn render_projects(
        &self,
        session: &Session,
        introspector: &dyn SpatialIntrospector,
        log: &RunLog,
    ) -> Vec<ProjectFile> {
        let catalog = &session.catalog;
        let wms_services: Vec<&OwsService> = catalog.services(OwsType::Wms).collect();
        if wms_services.is_empty() {
            log.error("WMS Service does not exist");
            return Vec::new();
        }
        let Some(wfs) = catalog.first_service(OwsType::Wfs) else {
            log.error("WFS Service does not exist");
            return Vec::new();
        };

        let wfs_tree = self
            .service_tree(catalog, wfs, false, introspector, log)
            .await;
        let composers: Vec<String> = catalog
            .project_templates()
            .filter_map(|(_, template)| template.print_layout.clone())
            .collect();
        let background = self.background_group(catalog);

        let mut files = Vec::new();
        for wms in wms_services {
            let wms_tree = self
                .service_tree(catalog, wms, true, introspector, log)
                .await;
            let metadata = ServiceMetadata::parse(wms.ows_metadata.as_deref(), log);

            let serving = ProjectBinding {
                wms_url: self.settings.wms_service_url.clone(),
                wms_contact_person: metadata.contact_person.clone(),
                wms_contact_organization: metadata.contact_organization.clone(),
                wms_contact_position: metadata.contact_position.clone(),
                wms_contact_phone: metadata.contact_phone.clone(),
                wms_contact_mail: metadata.contact_mail.clone(),
                wms_root_name: wms_tree.root_name.clone(),
                wms_root_title: metadata.root_title.clone(),
                wms_crs_list: metadata.crs_list.clone(),
                wms_extent: metadata.extent.clone(),
                ..self.base_binding()
            }
            .with_metadata(&metadata)
            .with_items(wms_tree.items.clone());

            let mut print_items = wms_tree.items;
            print_items.push(background.clone());
            let print = ProjectBinding {
                wms_service_abstract: wms.description.clone().unwrap_or_default(),
                wms_url: self.settings.wms_service_url.clone(),
                wms_root_name: wms_tree.root_name,
                composers: composers.clone(),
                ..self.base_binding()
            }
            .with_items(print_items);

            let features = ProjectBinding {
                wfs_layers: wfs_tree.vector_layer_ids.clone(),
                wfs_url: self.settings.wfs_service_url.clone(),
                ..self.base_binding()
            }
            .with_metadata(&metadata)
            .with_items(wfs_tree.items.clone());

            for (file_name, binding) in [
                (format!("{}.qgs", wms.name), serving),
                (format!("{}_print.qgs", wms.name), print),
                (format!("{}_wfs.qgs", wms.name), features),
            ] {
                match self.handlebars.render(SERVICE, &binding) {
                    Ok(content) => files.push(ProjectFile { file_name, content }),
                    Err(e) => log.error(format!("Could not render project '{}': {}", file_name, e)),
                }
            }
        }
        files
    }

    /// Renders and writes all projects into `project_output_dir`.
    pub async fn write_projects(
        &self,
        session: &Session,
        introspector: &dyn SpatialIntrospector,
        log: &RunLog,
    ) -> Vec<PathBuf> {
        let files = self.render_projects(session, introspector, log).await;
        let output_dir = &self.settings.project_output_dir;
        if let Err(e) = tokio::fs::create_dir_all(output_dir).await {
            log.error(format!(
                "Could not create project output dir '{}': {}",
                output_dir.display(),
                e
            ));
            return Vec::new();
        }

        let mut written = Vec::new();
        for file in files {
            let path = output_dir.join(&file.file_name);
            match tokio::fs::write(&path, file.content).await {
                Ok(()) => {
                    log.debug(format!("Wrote {}", path.display()));
                    written.push(path);
                }
                Err(e) => log.error(format!("Could not write '{}': {}", path.display(), e)),
            }
        }
        info!(count = written.len(), "QGIS projects written");
        written
    }

    fn base_binding(&self) -> ProjectBinding {
        ProjectBinding {
            selection_color: self.settings.selection_color,
            default_extent: self.settings.default_extent,
            ..ProjectBinding::default()
        }
    }

    // ── Layer trees ─────────────────────────────────────────────────

    async fn service_tree(
        &self,
        catalog: &Catalog,
        service: &OwsService,
        is_wms: bool,
        introspector: &dyn SpatialIntrospector,
        log: &RunLog,
    ) -> ServiceTree {
        let walk = catalog.walk(service.root_layer_id, &mut Plan);
        for fault in &walk.faults {
            log.error(format!("{}: {}", service.name, fault));
        }
        let Some(plan) = walk.root else {
            log.warning(format!("Service '{}' has no layers", service.name));
            return ServiceTree {
                root_name: service.name.clone(),
                items: Vec::new(),
                vector_layer_ids: Vec::new(),
            };
        };

        // resolve every data layer occurrence in tree order
        let mut layer_ids = Vec::new();
        plan.data_layer_ids(&mut layer_ids);
        let mut resolved = Vec::with_capacity(layer_ids.len());
        let mut vector_layer_ids = Vec::new();
        for layer_id in layer_ids {
            let layer = catalog
                .layer(layer_id)
                .and_then(|layer| layer.as_data().map(|data| (layer, data)));
            let qgs_layer = match layer {
                Some((layer, data)) => {
                    self.collect_layer(catalog, layer, data, is_wms, introspector, log)
                        .await
                }
                None => None,
            };
            if let Some(qgs_layer) = &qgs_layer {
                if qgs_layer.layertype == "vector" {
                    vector_layer_ids.push(qgs_layer.id.clone());
                }
            }
            resolved.push(qgs_layer);
        }

        let mut resolved = resolved.into_iter();
        let root_name = catalog
            .layer(service_root_id(&plan))
            .map(|layer| layer.name.clone())
            .unwrap_or_else(|| service.name.clone());
        let items = match build_node(catalog, plan, &mut resolved) {
            Some(QgsNode::Group(group)) => group.items,
            Some(layer) => vec![layer],
            None => Vec::new(),
        };
        ServiceTree {
            root_name,
            items,
            vector_layer_ids,
        }
    }

    fn background_group(&self, catalog: &Catalog) -> QgsNode {
        let raster = self.raster_default_style();
        let items = catalog
            .background_layers()
            .iter()
            .map(|background| {
                QgsNode::Layer(QgsLayer {
                    name: background.name.clone(),
                    title: background.name.clone(),
                    id: Uuid::new_v4().to_string(),
                    layertype: "raster",
                    attributes: raster.attributes.clone(),
                    provider: "wms",
                    datasource: background.qgis_datasource.clone().unwrap_or_default(),
                    primary_key: None,
                    style: raster.style.clone(),
                    map_tip: String::new(),
                    extent: Some(self.settings.default_extent),
                })
            })
            .collect();
        QgsNode::Group(QgsGroup::new("background_layers", "", items))
    }

    fn raster_default_style(&self) -> ParsedStyle {
        // the bundled raster style is covered by tests
        parse_qml_style(default_style(StyleKind::Raster), &[], &RunLog::new()).unwrap_or_default()
    }

    // ── Data layers ─────────────────────────────────────────────────

    async fn collect_layer(
        &self,
        catalog: &Catalog,
        layer: &Layer,
        data: &DataLayer,
        is_wms: bool,
        introspector: &dyn SpatialIntrospector,
        log: &RunLog,
    ) -> Option<QgsLayer> {
        let chain = match catalog.data_chain(layer, data) {
            Ok(chain) => chain,
            Err(e) => {
                log.warning(e.to_string());
                return None;
            }
        };

        match &chain.source.kind {
            ConnectionKind::Database => {
                self.vector_layer(layer, data, &chain, is_wms, introspector, log)
                    .await
            }
            ConnectionKind::Directory => Some(self.raster_layer(layer, data, &chain, is_wms, log)),
            ConnectionKind::Other(kind) => {
                log.warning(format!(
                    "Unsupported data source type '{}' for {}, skipping",
                    kind, layer.name
                ));
                None
            }
        }
    }

    async fn vector_layer(
        &self,
        layer: &Layer,
        data: &DataLayer,
        chain: &DataChain<'_>,
        is_wms: bool,
        introspector: &dyn SpatialIntrospector,
        log: &RunLog,
    ) -> Option<QgsLayer> {
        let connection = chain.source.connection.as_str();
        if !is_postgres_url(connection) {
            log.error(format!(
                "Unsupported DB provider for {}: {}",
                layer.name,
                mask_database_url(connection)
            ));
            return None;
        }

        let table = chain.data_set.table();
        let metadata = match introspector
            .table_metadata(connection, &table, chain.view.geometry_column.as_deref())
            .await
        {
            Ok(metadata) => metadata,
            Err(e) => {
                log.error(format!(
                    "DB connection failed for {}: {}\n{}",
                    layer.name,
                    mask_database_url(connection),
                    e
                ));
                return None;
            }
        };
        let Some(geometry) = metadata.geometry else {
            log.error(format!(
                "Unable to determine geometry properties for {}",
                layer.name
            ));
            return None;
        };
        let Some(primary_key) = chain.data_set.primary_key.clone().or(metadata.primary_key) else {
            log.error(format!(
                "Unable to determine primary_key of table {} for {}",
                table, layer.name
            ));
            return None;
        };
        let Some(kind) = style_kind(&geometry.geometry_type) else {
            log.error(format!(
                "Unsupported geometry type {} for {}",
                geometry.geometry_type, layer.name
            ));
            return None;
        };

        let connection_descriptor = match db_connection(connection, &self.settings.service_aliases)
        {
            Ok(descriptor) => descriptor,
            Err(e) => {
                log.error(format!("{} for {}", e, layer.name));
                return None;
            }
        };
        let datasource = postgres_datasource(
            &connection_descriptor,
            &primary_key,
            geometry.srid,
            &geometry.geometry_type,
            &table,
            &geometry.column,
        );
        let extent = self
            .vector_extent(introspector, connection, &table, &geometry.column, layer, log)
            .await;
        let style = self.layer_style(
            layer,
            data,
            &chain.view.attributes,
            kind,
            is_wms,
            log,
        )?;

        Some(QgsLayer {
            name: layer.name.clone(),
            title: layer.display_title().to_string(),
            id: Uuid::new_v4().to_string(),
            layertype: "vector",
            attributes: format!("geometry=\"{}\" {}", geometry.geometry_type, style.attributes),
            provider: "postgres",
            datasource,
            primary_key: Some(primary_key),
            style: style.style,
            map_tip: String::new(),
            extent: Some(extent),
        })
    }

    /// Table extent, with missing bounds taken from the default extent.
    async fn vector_extent(
        &self,
        introspector: &dyn SpatialIntrospector,
        connection: &str,
        table: &TableRef,
        geometry_column: &str,
        layer: &Layer,
        log: &RunLog,
    ) -> [f64; 4] {
        let default = self.settings.default_extent;
        match introspector.extent(connection, table, geometry_column).await {
            Ok(bounds) => [0, 1, 2, 3].map(|i| bounds[i].unwrap_or(default[i])),
            Err(e) => {
                log.warning(format!(
                    "Unable to determine extent of table {} for {}, using default extent:\n{}",
                    table, layer.name, e
                ));
                default
            }
        }
    }

    fn raster_layer(
        &self,
        layer: &Layer,
        data: &DataLayer,
        chain: &DataChain<'_>,
        is_wms: bool,
        log: &RunLog,
    ) -> QgsLayer {
        let style = self
            .layer_style(layer, data, &[], StyleKind::Raster, is_wms, log)
            .unwrap_or_default();
        QgsLayer {
            name: layer.name.clone(),
            title: layer.display_title().to_string(),
            id: Uuid::new_v4().to_string(),
            layertype: "raster",
            attributes: style.attributes,
            provider: "gdal",
            datasource: raster_datasource(&chain.source.connection, &chain.data_set.data_set_name),
            primary_key: None,
            style: style.style,
            map_tip: String::new(),
            // computed by QGIS Server when unset
            extent: self.settings.default_raster_extent,
        }
    }

    /// The layer's own style, else the bundled style of `kind`.
    fn layer_style(
        &self,
        layer: &Layer,
        data: &DataLayer,
        attributes: &[Attribute],
        kind: StyleKind,
        is_wms: bool,
        log: &RunLog,
    ) -> Option<ParsedStyle> {
        let own = data
            .qgs_style
            .as_deref()
            .filter(|qml| !qml.trim().is_empty())
            .map(|qml| parse_qml_style(qml, attributes, log));
        match own {
            Some(Ok(style)) => return Some(style),
            Some(Err(e)) => log.debug(format!("Invalid style of {}: {}", layer.name, e)),
            None => {}
        }

        if is_wms {
            let msg = format!("Falling back to default style for {}", layer.name);
            match kind {
                StyleKind::Raster => log.debug(msg),
                _ => log.warning(msg),
            }
        }
        match parse_qml_style(default_style(kind), attributes, log) {
            Ok(style) => Some(style),
            Err(e) => {
                log.error(format!(
                    "Could not load default {} style for {}: {}",
                    kind.file_stem(),
                    layer.name,
                    e
                ));
                None
            }
        }
    }
}

fn service_root_id(plan: &PlanNode) -> ResourceId {
    match plan {
        PlanNode::Group { layer_id, .. } | PlanNode::Data { layer_id } => *layer_id,
    }
}

/// Rebuilds the plan with resolved data layers; unresolved ones are dropped.
fn build_node(
    catalog: &Catalog,
    plan: PlanNode,
    resolved: &mut impl Iterator<Item = Option<QgsLayer>>,
) -> Option<QgsNode> {
    match plan {
        PlanNode::Data { .. } => resolved.next().flatten().map(QgsNode::Layer),
        PlanNode::Group { layer_id, children } => {
            let layer = catalog.layer(layer_id)?;
            let items = children
                .into_iter()
                .filter_map(|child| build_node(catalog, child, resolved))
                .collect();
            Some(QgsNode::Group(QgsGroup::new(
                layer.name.clone(),
                layer.display_title(),
                items,
            )))
        }
    }
}
