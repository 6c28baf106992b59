//! OGC service: WMS/WFS layer trees and their permissions.
//!
//! - WMS: the nested layer tree of each service, print URL, print templates
//!   and the internal print layers used for background maps
//! - WFS: the flat list of vector layers including primary keys
//! - permissions: exclusive ids per role, groups included bottom-up

use async_trait::async_trait;
use gdi_model::{
    Catalog, DataChain, DataLayer, DataSetView, GroupLayer, Layer, LayerVisitor, ModelError, OwsType,
    PermissionScope, ResourceId, ResourceKind, WalkContext,
};
use serde_json::{Map, Value};

use crate::database::PrecacheScope;
use crate::introspection::postgis_metadata;
use crate::settings::ServiceSettings;

use super::{config_with_server_url, url_join, AssemblyContext, Document, ServiceAssembler};

const WMS_KINDS: [ResourceKind; 8] = [
    ResourceKind::WmsWfs,
    ResourceKind::OwsLayer,
    ResourceKind::DataSetView,
    ResourceKind::DataSet,
    ResourceKind::DataSource,
    ResourceKind::Attribute,
    ResourceKind::BackgroundLayer,
    ResourceKind::Template,
];

const WFS_KINDS: [ResourceKind; 6] = [
    ResourceKind::WmsWfs,
    ResourceKind::OwsLayer,
    ResourceKind::DataSetView,
    ResourceKind::DataSet,
    ResourceKind::DataSource,
    ResourceKind::Attribute,
];

pub struct OgcService;

#[async_trait]
impl ServiceAssembler for OgcService {
    fn name(&self) -> &'static str {
        "ogc"
    }

    fn schema_url(&self) -> &'static str {
        "https://github.com/qwc-services/qwc-ogc-service/raw/master/schemas/qwc-ogc-service.json"
    }

    fn precache(&self) -> PrecacheScope {
        PrecacheScope {
            layers: true,
            datasets: true,
            templates: true,
            services: true,
            background_layers: true,
            grants: true,
            ..PrecacheScope::NONE
        }
    }

    async fn config(&self, service: &ServiceSettings, ctx: &AssemblyContext<'_>) -> Document {
        let mut document = self.base_document();

        let config = config_with_server_url(service, ctx.settings);
        let server_url = config
            .get("default_qgis_server_url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| ctx.settings.qgis_server_url());
        document.insert("config".into(), Value::Object(config));

        let mut resources = Map::new();
        resources.insert(
            "wms_services".into(),
            Value::Array(wms_services(service, &server_url, ctx)),
        );
        resources.insert(
            "wfs_services".into(),
            Value::Array(wfs_services(service, ctx).await),
        );
        document.insert("resources".into(), Value::Object(resources));
        document
    }

    fn permissions(&self, role: &str, ctx: &AssemblyContext<'_>) -> Document {
        let mut permissions = Map::new();
        permissions.insert(
            "wms_services".into(),
            Value::Array(wms_permissions(role, ctx)),
        );
        permissions.insert(
            "wfs_services".into(),
            Value::Array(wfs_permissions(role, ctx)),
        );
        permissions
    }
}

/// Settings block of the named service in `resources.<section>`.
fn service_block<'a>(service: &'a ServiceSettings, section: &str, name: &str) -> Option<&'a Map<String, Value>> {
    service
        .resources
        .get(section)
        .and_then(Value::as_array)?
        .iter()
        .filter_map(Value::as_object)
        .find(|block| block.get("name").and_then(Value::as_str) == Some(name))
}

fn insert_title(node: &mut Document, layer: &Layer) {
    if let Some(title) = layer.title.as_deref().filter(|title| !title.is_empty()) {
        node.insert("title".into(), Value::from(title));
    }
}

fn attribute_names<'a>(
    view: &'a DataSetView,
    mut keep: impl FnMut(ResourceId) -> bool + 'a,
) -> impl Iterator<Item = Value> + 'a {
    view.attributes
        .iter()
        .filter(move |attribute| keep(attribute.id))
        .map(|attribute| Value::from(attribute.name.as_str()))
}

// ── WMS ─────────────────────────────────────────────────────────────

fn wms_services(service: &ServiceSettings, server_url: &str, ctx: &AssemblyContext<'_>) -> Vec<Value> {
    let catalog = ctx.catalog();

    let print_templates: Vec<Value> = catalog
        .project_templates()
        .map(|(template, _)| Value::from(template.name.as_str()))
        .collect();
    let print_layers: Vec<Value> = catalog
        .background_layers()
        .iter()
        .map(|layer| Value::from(layer.name.as_str()))
        .collect();

    catalog
        .services(OwsType::Wms)
        .map(|wms| {
            let online_resources = service_block(service, "wms_services", &wms.name)
                .and_then(|block| block.get("online_resources"))
                .cloned()
                .unwrap_or_else(|| Value::Object(Map::new()));

            let mut visitor = WmsLayerTree::default();
            let walk = catalog.walk(wms.root_layer_id, &mut visitor);
            ctx.report_faults(&walk.faults);
            ctx.report_faults(&visitor.faults);

            let mut node = Map::new();
            node.insert("name".into(), Value::from(wms.name.as_str()));
            node.insert("online_resources".into(), online_resources);
            node.insert(
                "root_layer".into(),
                walk.root.map(Value::Object).unwrap_or(Value::Null),
            );
            node.insert(
                "print_url".into(),
                Value::from(url_join(server_url, &format!("{}_print", wms.name))),
            );
            node.insert("print_templates".into(), Value::Array(print_templates.clone()));
            node.insert("internal_print_layers".into(), Value::Array(print_layers.clone()));
            Value::Object(node)
        })
        .collect()
}

/// Nested WMS layers with attribute lists and facade opacities.
#[derive(Default)]
struct WmsLayerTree {
    faults: Vec<ModelError>,
}

impl LayerVisitor for WmsLayerTree {
    type Output = Document;

    fn data(
        &mut self,
        catalog: &Catalog,
        layer: &Layer,
        data: &DataLayer,
        ctx: &WalkContext<'_>,
    ) -> Option<Document> {
        let chain = match catalog.data_chain(layer, data) {
            Ok(chain) => chain,
            Err(e) => {
                self.faults.push(e);
                return None;
            }
        };

        let mut node = Map::new();
        node.insert("name".into(), Value::from(layer.name.as_str()));
        node.insert("type".into(), Value::from("layer"));
        insert_title(&mut node, layer);

        if chain.source.kind.is_database() {
            let mut attributes: Vec<Value> = attribute_names(chain.view, |_| true).collect();
            attributes.push(Value::from("geometry"));
            node.insert("attributes".into(), Value::Array(attributes));
        }
        // vector layers always carry the geometry, rasters are queryable
        node.insert("queryable".into(), Value::Bool(true));

        if ctx.in_facade && ctx.transparency() != 0 {
            node.insert("opacity".into(), Value::from(100 - ctx.transparency()));
        }
        Some(node)
    }

    fn group(
        &mut self,
        _catalog: &Catalog,
        layer: &Layer,
        group: &GroupLayer,
        _ctx: &WalkContext<'_>,
        children: Vec<Document>,
    ) -> Option<Document> {
        let mut node = Map::new();
        node.insert("name".into(), Value::from(layer.name.as_str()));
        node.insert("type".into(), Value::from("layergroup"));
        insert_title(&mut node, layer);
        node.insert(
            "layers".into(),
            Value::Array(children.into_iter().map(Value::Object).collect()),
        );
        if group.facade {
            node.insert("hide_sublayers".into(), Value::Bool(true));
        }
        Some(node)
    }
}

// ── WFS ─────────────────────────────────────────────────────────────

async fn wfs_services(service: &ServiceSettings, ctx: &AssemblyContext<'_>) -> Vec<Value> {
    let catalog = ctx.catalog();
    let mut services = Vec::new();

    for wfs in catalog.services(OwsType::Wfs) {
        let online_resource = service_block(service, "wfs_services", &wfs.name)
            .and_then(|block| block.get("online_resource"))
            .cloned()
            .unwrap_or(Value::Null);

        let mut layers = Vec::new();
        for (layer, chain) in vector_layers(wfs.root_layer_id, ctx) {
            let mut attributes = Vec::new();
            match primary_key(&chain, ctx).await {
                Some(pk) => attributes.push(Value::from(pk)),
                None => ctx.log.warning(format!(
                    "Could not find primary key for layer '{}'",
                    layer.name
                )),
            }
            attributes.extend(attribute_names(chain.view, |_| true));
            attributes.push(Value::from("geometry"));

            let mut node = Map::new();
            node.insert("name".into(), Value::from(layer.name.as_str()));
            node.insert("attributes".into(), Value::Array(attributes));
            layers.push(Value::Object(node));
        }

        let mut node = Map::new();
        node.insert("name".into(), Value::from(wfs.name.as_str()));
        node.insert("online_resource".into(), online_resource);
        node.insert("layers".into(), Value::Array(layers));
        services.push(Value::Object(node));
    }
    services
}

/// Database backed data layers below `root_id` with their resolved chains.
fn vector_layers<'a>(root_id: ResourceId, ctx: &AssemblyContext<'a>) -> Vec<(&'a Layer, DataChain<'a>)> {
    let catalog = ctx.catalog();
    let walk = catalog.flatten(root_id, |layer, _data, _ctx| Some(layer.id));
    ctx.report_faults(&walk.faults);

    let mut layers = Vec::new();
    for id in walk.root.unwrap_or_default() {
        let Some(layer) = catalog.layer(id) else {
            continue;
        };
        let Some(data) = layer.as_data() else {
            continue;
        };
        match catalog.data_chain(layer, data) {
            Ok(chain) if chain.source.kind.is_database() => layers.push((layer, chain)),
            Ok(_) => {}
            Err(e) => ctx.report_faults(&[e]),
        }
    }
    layers
}

/// Primary key of the dataset, introspected unless configured.
async fn primary_key(chain: &DataChain<'_>, ctx: &AssemblyContext<'_>) -> Option<String> {
    if let Some(pk) = chain
        .data_set
        .primary_key
        .as_deref()
        .filter(|pk| !pk.is_empty())
    {
        return Some(pk.to_string());
    }
    postgis_metadata(
        ctx.introspector,
        &chain.source.connection,
        &chain.data_set.table(),
        chain.view.geometry_column.as_deref(),
        ctx.log,
    )
    .await
    .primary_key
}

// ── Permissions ─────────────────────────────────────────────────────

fn wms_permissions(role: &str, ctx: &AssemblyContext<'_>) -> Vec<Value> {
    let catalog = ctx.catalog();
    let scope = ctx.grants().scope(&WMS_KINDS, role);
    let mut permissions = Vec::new();

    for wms in catalog.services(OwsType::Wms) {
        if !scope.in_combined(wms.id) {
            continue;
        }

        let mut visitor = WmsLayerPermissions {
            scope: &scope,
            faults: Vec::new(),
        };
        let walk = catalog.walk(wms.root_layer_id, &mut visitor);
        ctx.report_faults(&walk.faults);
        ctx.report_faults(&visitor.faults);

        let mut layers: Vec<Value> = walk
            .root
            .unwrap_or_default()
            .into_iter()
            .map(Value::Object)
            .collect();
        layers.extend(
            catalog
                .background_layers()
                .iter()
                .filter(|layer| scope.permits(layer.id))
                .map(|layer| named(&layer.name)),
        );

        let print_templates: Vec<Value> = catalog
            .project_templates()
            .filter(|(template, _)| scope.permits(template.id))
            .map(|(template, _)| Value::from(template.name.as_str()))
            .collect();

        if layers.is_empty() && print_templates.is_empty() {
            continue;
        }

        let mut node = Map::new();
        node.insert("name".into(), Value::from(wms.name.as_str()));
        node.insert("layers".into(), Value::Array(layers));
        if !print_templates.is_empty() {
            node.insert("print_templates".into(), Value::Array(print_templates));
        }
        permissions.push(Value::Object(node));
    }
    permissions
}

fn named(name: &str) -> Value {
    let mut node = Map::new();
    node.insert("name".into(), Value::from(name));
    Value::Object(node)
}

/// Flat list of permitted layers; a group precedes its permitted children
/// and is dropped when it has none.
struct WmsLayerPermissions<'s> {
    scope: &'s PermissionScope,
    faults: Vec<ModelError>,
}

impl LayerVisitor for WmsLayerPermissions<'_> {
    type Output = Vec<Document>;

    fn data(
        &mut self,
        catalog: &Catalog,
        layer: &Layer,
        data: &DataLayer,
        _ctx: &WalkContext<'_>,
    ) -> Option<Vec<Document>> {
        let chain = match catalog.data_chain(layer, data) {
            Ok(chain) => chain,
            Err(e) => {
                self.faults.push(e);
                return None;
            }
        };
        let scope = self.scope;
        let [view_id, data_set_id, source_id] = chain.ids();

        let mut node = Map::new();
        node.insert("name".into(), Value::from(layer.name.as_str()));

        if scope.permits_all(&[layer.id, view_id, data_set_id]) && scope.permits_source(source_id) {
            if chain.source.kind.is_database() {
                let mut attributes: Vec<Value> =
                    attribute_names(chain.view, |id| scope.permits(id)).collect();
                attributes.push(Value::from("geometry"));
                node.insert("attributes".into(), Value::Array(attributes));
            }
            if let Some(template_id) = data.info_template {
                node.insert(
                    "info_template".into(),
                    Value::Bool(scope.permits(template_id)),
                );
            }
            return Some(vec![node]);
        }

        // public layer whose info template is restricted to this role
        let public_chain = [layer.id, view_id, data_set_id, source_id]
            .iter()
            .all(|id| scope.in_public(*id));
        match data.info_template {
            Some(template_id) if public_chain && scope.permits(template_id) => {
                node.insert("info_template".into(), Value::Bool(true));
                Some(vec![node])
            }
            _ => None,
        }
    }

    fn group(
        &mut self,
        _catalog: &Catalog,
        layer: &Layer,
        _group: &GroupLayer,
        _ctx: &WalkContext<'_>,
        children: Vec<Vec<Document>>,
    ) -> Option<Vec<Document>> {
        let children: Vec<Document> = children.into_iter().flatten().collect();
        if children.is_empty() {
            return None;
        }
        let mut node = Map::new();
        node.insert("name".into(), Value::from(layer.name.as_str()));
        let mut layers = vec![node];
        layers.extend(children);
        Some(layers)
    }
}

fn wfs_permissions(role: &str, ctx: &AssemblyContext<'_>) -> Vec<Value> {
    let catalog = ctx.catalog();
    let scope = ctx.grants().scope(&WFS_KINDS, role);
    let mut permissions = Vec::new();

    for wfs in catalog.services(OwsType::Wfs) {
        if !scope.in_combined(wfs.id) {
            continue;
        }

        let layers: Vec<Value> = vector_layers(wfs.root_layer_id, ctx)
            .into_iter()
            .filter(|(layer, chain)| {
                let [view_id, data_set_id, source_id] = chain.ids();
                scope.permits_all(&[layer.id, view_id, data_set_id])
                    && scope.permits_source(source_id)
            })
            .map(|(layer, chain)| {
                let mut attributes: Vec<Value> =
                    attribute_names(chain.view, |id| scope.permits(id)).collect();
                attributes.push(Value::from("geometry"));

                let mut node = Map::new();
                node.insert("name".into(), Value::from(layer.name.as_str()));
                node.insert("attributes".into(), Value::Array(attributes));
                Value::Object(node)
            })
            .collect();

        if !layers.is_empty() {
            let mut node = Map::new();
            node.insert("name".into(), Value::from(wfs.name.as_str()));
            node.insert("layers".into(), Value::Array(layers));
            permissions.push(Value::Object(node));
        }
    }
    permissions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::fixtures::{World, EDITOR};
    use gdi_model::PUBLIC_ROLE;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn wms_tree_marks_facades_and_sublayer_opacity() {
        let world = World::new();
        let service = ServiceSettings::new("ogc").with_resource(
            "wms_services",
            json!([{"name": "somap", "online_resources": {"service": "https://geo/ows/somap"}}]),
        );
        let document = OgcService.config(&service, &world.ctx()).await;

        assert_eq!(
            document["resources"]["wms_services"],
            json!([{
                "name": "somap",
                "online_resources": {"service": "https://geo/ows/somap"},
                "root_layer": {
                    "name": "somap",
                    "type": "layergroup",
                    "title": "SO Map",
                    "layers": [
                        {
                            "name": "cadastre",
                            "type": "layergroup",
                            "title": "Cadastre",
                            "layers": [{
                                "name": "parcels",
                                "type": "layer",
                                "title": "Parcels",
                                "attributes": ["number", "area", "geometry"],
                                "queryable": true,
                                "opacity": 80
                            }],
                            "hide_sublayers": true
                        },
                        {
                            "name": "ortho",
                            "type": "layer",
                            "title": "Orthophoto",
                            "queryable": true
                        }
                    ]
                },
                "print_url": "http://localhost:8001/ows/somap_print",
                "print_templates": ["A4"],
                "internal_print_layers": ["bg_ortho"]
            }])
        );
    }

    #[tokio::test]
    async fn wfs_layers_lead_with_the_primary_key() {
        let world = World::new();
        let document = OgcService.config(&ServiceSettings::new("ogc"), &world.ctx()).await;

        assert_eq!(
            document["resources"]["wfs_services"],
            json!([{
                "name": "somap_wfs",
                "online_resource": null,
                "layers": [{
                    "name": "parcels",
                    "attributes": ["ogc_fid", "number", "area", "geometry"]
                }]
            }])
        );
        let keys: Vec<_> = document.keys().cloned().collect();
        assert_eq!(keys, ["$schema", "service", "config", "resources"]);
    }

    #[test]
    fn editor_sees_only_what_public_does_not() {
        let world = World::new();
        let permissions = OgcService.permissions(EDITOR, &world.ctx());

        assert_eq!(
            Value::Object(permissions),
            json!({
                "wms_services": [{
                    "name": "somap",
                    "layers": [
                        {"name": "somap"},
                        {"name": "cadastre"},
                        {
                            "name": "parcels",
                            "attributes": ["number", "area", "geometry"],
                            "info_template": true
                        }
                    ],
                    "print_templates": ["A4"]
                }],
                "wfs_services": [{
                    "name": "somap_wfs",
                    "layers": [{"name": "parcels", "attributes": ["number", "area", "geometry"]}]
                }]
            })
        );
    }

    #[test]
    fn public_role_gets_public_chain_and_print_layers() {
        let world = World::new();
        let permissions = OgcService.permissions(PUBLIC_ROLE, &world.ctx());

        assert_eq!(
            permissions["wms_services"],
            json!([{
                "name": "somap",
                "layers": [{"name": "somap"}, {"name": "ortho"}, {"name": "bg_ortho"}]
            }])
        );
        assert_eq!(permissions["wfs_services"], json!([]));
    }

    #[test]
    fn public_layer_with_restricted_info_template() {
        let mut world = World::new();
        world.session.grants = {
            let mut grants: Vec<_> = Vec::new();
            let base = crate::services::fixtures::grants();
            // make the parcels chain public, keep the info template restricted
            for (id, kind) in [
                (20, ResourceKind::WmsWfs),
                (3, ResourceKind::OwsLayer),
                (300, ResourceKind::DataSetView),
                (200, ResourceKind::DataSet),
                (500, ResourceKind::Template),
            ] {
                grants.push(gdi_model::Grant {
                    id: 1000 + id,
                    role: if id == 500 { EDITOR } else { PUBLIC_ROLE }.into(),
                    resource_id: id,
                    kind,
                    resource_name: id.to_string(),
                    read: true,
                    write: false,
                    priority: 0,
                });
            }
            grants.push(gdi_model::Grant {
                id: 2000,
                role: PUBLIC_ROLE.into(),
                resource_id: 100,
                kind: ResourceKind::DataSource,
                resource_name: "geodb".into(),
                read: true,
                write: false,
                priority: 0,
            });
            gdi_model::GrantIndex::new(base.roles().to_vec(), grants)
        };

        let permissions = OgcService.permissions(EDITOR, &world.ctx());
        assert_eq!(
            permissions["wms_services"][0]["layers"],
            json!([
                {"name": "somap"},
                {"name": "cadastre"},
                {"name": "parcels", "info_template": true}
            ])
        );
    }

    #[tokio::test]
    async fn layer_cycles_are_reported_without_aborting() {
        let mut world = World::new();
        world.session.catalog.insert_layer(gdi_model::Layer::group(
            2,
            "cadastre",
            GroupLayer::new(true)
                .with_child(gdi_model::ChildEdge::new(3, 1))
                .with_child(gdi_model::ChildEdge::new(1, 2)),
        ));
        let document = OgcService.config(&ServiceSettings::new("ogc"), &world.ctx()).await;

        let cadastre = &document["resources"]["wms_services"][0]["root_layer"]["layers"][0];
        assert_eq!(cadastre["layers"].as_array().map(Vec::len), Some(1));
        assert!(world.log.has_errors());
    }
}
