//! Map viewer service: QWC2 application config and themes.
//!
//! - `qwc2_config`: the viewer's `config.json` without the service URLs the
//!   gateway injects, plus a few overrides from the settings
//! - `qwc2_themes`: one theme item per map with layer tree, background
//!   layers, print layouts, search providers and the edit config
//! - permissions: the background layers a role may use

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use gdi_model::{
    edit_field_type, edit_geometry, opacity_255, Catalog, DataLayer, GroupLayer, Layer,
    LayerVisitor, MapTheme, ModelError, ResourceKind, Searchable, WalkContext,
};
use serde_json::{json, Map, Value};

use crate::database::PrecacheScope;
use crate::introspection::{attribute_metadata, postgis_metadata};
use crate::schema::MAP_VIEWER_SERVICE;
use crate::settings::ServiceSettings;

use super::{url_join, AssemblyContext, Document, ServiceAssembler};

const DEFAULT_CRS: &str = "EPSG:2056";

/// Service URLs configured by the gateway, never taken from `config.json`.
const SERVICE_URL_KEYS: [&str; 12] = [
    "permalinkServiceUrl",
    "elevationServiceUrl",
    "editServiceUrl",
    "dataproductServiceUrl",
    "searchServiceUrl",
    "searchDataServiceUrl",
    "authServiceUrl",
    "mapInfoService",
    "featureReportService",
    "landRegisterService",
    "cccConfigService",
    "plotInfoService",
];

pub struct MapViewerService;

#[async_trait]
impl ServiceAssembler for MapViewerService {
    fn name(&self) -> &'static str {
        "mapViewer"
    }

    fn service_id(&self) -> &'static str {
        MAP_VIEWER_SERVICE
    }

    fn schema_url(&self) -> &'static str {
        "https://github.com/qwc-services/qwc-map-viewer/raw/master/schemas/qwc-map-viewer.json"
    }

    fn precache(&self) -> PrecacheScope {
        PrecacheScope {
            layers: true,
            datasets: true,
            templates: true,
            services: true,
            maps: true,
            background_layers: true,
            dataset_edits: true,
            grants: true,
            ..PrecacheScope::NONE
        }
    }

    async fn config(&self, service: &ServiceSettings, ctx: &AssemblyContext<'_>) -> Document {
        let mut document = self.base_document();
        document.insert("config".into(), Value::Object(service.config.clone()));

        let mut resources = Map::new();
        resources.insert("qwc2_config".into(), Value::Object(qwc2_config(service, ctx).await));
        resources.insert("qwc2_themes".into(), Value::Object(qwc2_themes(service, ctx).await));
        document.insert("resources".into(), Value::Object(resources));
        document
    }

    fn permissions(&self, role: &str, ctx: &AssemblyContext<'_>) -> Document {
        let permitted = ctx
            .grants()
            .exclusive_resource_ids(&[ResourceKind::BackgroundLayer], role);
        let background_layers: Vec<Value> = ctx
            .catalog()
            .background_layers()
            .iter()
            .filter(|layer| permitted.contains(&layer.id))
            .map(|layer| layer.qwc2_bg_layer_name.clone().into())
            .collect();

        let mut permissions = Map::new();
        permissions.insert("wms_services".into(), Value::Array(Vec::new()));
        permissions.insert("background_layers".into(), Value::Array(background_layers));
        permissions.insert("data_datasets".into(), Value::Array(Vec::new()));
        permissions
    }
}

/// `resources.<section>.<key>` of the service settings, or `default`.
fn setting(service: &ServiceSettings, section: &str, key: &str, default: Value) -> Value {
    service
        .resource_section(section)
        .and_then(|section| section.get(key))
        .cloned()
        .unwrap_or(default)
}

// ── qwc2_config ─────────────────────────────────────────────────────

async fn read_config_file(path: &Path) -> Result<Document, String> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| e.to_string())?;
    serde_json::from_str(&raw).map_err(|e| e.to_string())
}

async fn qwc2_config(service: &ServiceSettings, ctx: &AssemblyContext<'_>) -> Document {
    let cfg = service.resource_section("qwc2_config");
    let config_file = cfg
        .and_then(|cfg| cfg.get("qwc2_config_file"))
        .and_then(Value::as_str)
        .unwrap_or("config.json");

    let mut config = match read_config_file(Path::new(config_file)).await {
        Ok(config) => config,
        Err(e) => {
            ctx.log.error(format!("Could not load QWC2 config.json:\n{}", e));
            let mut config = Map::new();
            config.insert("ERROR".into(), Value::from(e));
            config
        }
    };

    for key in SERVICE_URL_KEYS {
        config.remove(key);
    }
    for key in ["wmsDpi", "minResultsExanded"] {
        if let Some(value) = cfg.and_then(|cfg| cfg.get(key)) {
            config.insert(key.into(), value.clone());
        }
    }

    let mut qwc2_config = Map::new();
    qwc2_config.insert("config".into(), Value::Object(config));
    qwc2_config
}

// ── qwc2_themes ─────────────────────────────────────────────────────

async fn qwc2_themes(service: &ServiceSettings, ctx: &AssemblyContext<'_>) -> Document {
    let section = "qwc2_themes";

    let mut themes = Map::new();
    themes.insert("title".into(), Value::from("root"));
    themes.insert("items".into(), Value::Array(theme_items(service, ctx).await));
    themes.insert("subdirs".into(), Value::Array(Vec::new()));
    themes.insert(
        "defaultTheme".into(),
        setting(service, section, "default_theme", Value::Null),
    );
    themes.insert(
        "backgroundLayers".into(),
        Value::Array(background_layers(ctx)),
    );
    themes.insert(
        "defaultScales".into(),
        setting(
            service,
            section,
            "default_scales",
            json!([
                4000000, 2000000, 1000000, 400000, 200000, 80000, 40000, 20000, 10000, 8000,
                6000, 4000, 2000, 1000, 500, 250, 100
            ]),
        ),
    );
    themes.insert(
        "defaultWMSVersion".into(),
        setting(service, section, "default_wms_version", json!("1.3.0")),
    );
    themes.insert(
        "defaultPrintResolutions".into(),
        setting(service, section, "default_print_resolutions", json!([300])),
    );
    themes.insert(
        "defaultPrintGrid".into(),
        setting(
            service,
            section,
            "default_print_grid",
            json!([
                {"s": 10000, "x": 1000, "y": 1000},
                {"s": 1000, "x": 100, "y": 100},
                {"s": 100, "x": 10, "y": 10}
            ]),
        ),
    );

    let mut qwc2_themes = Map::new();
    qwc2_themes.insert("themes".into(), Value::Object(themes));
    qwc2_themes
}

/// Theme level background layer definitions.
fn background_layers(ctx: &AssemblyContext<'_>) -> Vec<Value> {
    let mut layers = Vec::new();
    for layer in ctx.catalog().background_layers() {
        let parsed = layer
            .qwc2_bg_layer_config
            .as_deref()
            .ok_or_else(|| "no QWC2 background layer config".to_string())
            .and_then(|raw| serde_json::from_str::<Document>(raw).map_err(|e| e.to_string()));
        match parsed {
            Ok(mut config) => {
                if let Some(thumbnail) = layer.thumbnail_image.as_deref() {
                    config.insert(
                        "thumbnail".into(),
                        Value::from(format!("img/custommapthumbs/{}", thumbnail)),
                    );
                }
                layers.push(Value::Object(config));
            }
            Err(e) => ctx.log.warning(format!(
                "Could not load background layer '{}':\n{}",
                layer.name, e
            )),
        }
    }
    layers
}

/// Values shared by every theme item.
struct ItemDefaults {
    ogc_service_url: String,
    crs: Value,
    item_bounds: Value,
    layer_bbox: Value,
    attribution: Value,
    image_formats: Value,
    print: Vec<Value>,
    print_label_config: Value,
    search_providers: Value,
    edit_config: Value,
}

async fn theme_items(service: &ServiceSettings, ctx: &AssemblyContext<'_>) -> Vec<Value> {
    let catalog = ctx.catalog();
    let section = "qwc2_themes";
    let default_bounds = json!([2590000, 1210000, 2650000, 1270000]);
    let crs = setting(service, section, "default_crs", json!(DEFAULT_CRS));

    let default_print_layout = setting(service, section, "default_print_layout", Value::Null);
    let (print, print_label_config) = print_layouts(catalog, default_print_layout.as_str());

    let mut attribution = Map::new();
    attribution.insert(
        "Title".into(),
        setting(service, section, "default_theme_attribution_title", json!("")),
    );
    attribution.insert(
        "OnlineResource".into(),
        setting(
            service,
            section,
            "default_theme_attribution_online_resource",
            json!(""),
        ),
    );

    let mut layer_bbox = Map::new();
    layer_bbox.insert("crs".into(), crs.clone());
    layer_bbox.insert(
        "bounds".into(),
        setting(service, section, "default_layer_bounds", default_bounds.clone()),
    );

    let defaults = ItemDefaults {
        ogc_service_url: service
            .config_str("ogc_service_url")
            .unwrap_or("/ows/")
            .to_string(),
        item_bounds: setting(service, section, "default_theme_item_bounds", default_bounds),
        crs,
        layer_bbox: Value::Object(layer_bbox),
        attribution: Value::Object(attribution),
        image_formats: setting(
            service,
            section,
            "default_image_formats",
            json!(["image/jpeg", "image/png"]),
        ),
        print,
        print_label_config,
        search_providers: json!(["coordinates", solr_search_provider(catalog)]),
        edit_config: edit_config(ctx).await,
    };

    let mut seen = HashSet::new();
    let mut items: Vec<(i32, Option<String>, Document)> = Vec::new();
    for map in catalog.maps() {
        if !seen.insert(map.name.as_str()) {
            continue;
        }
        if let Some(item) = theme_item(map, &defaults, ctx) {
            items.push((map.map_order, map.title.clone(), item));
        }
    }

    items.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));
    items
        .into_iter()
        .map(|(_, _, item)| Value::Object(item))
        .collect()
}

fn bbox(crs: &Value, bounds: Value) -> Value {
    let mut bbox = Map::new();
    bbox.insert("crs".into(), crs.clone());
    bbox.insert("bounds".into(), bounds);
    Value::Object(bbox)
}

fn theme_item(map: &MapTheme, defaults: &ItemDefaults, ctx: &AssemblyContext<'_>) -> Option<Document> {
    let catalog = ctx.catalog();
    let Some(wms) = map.service_id.and_then(|id| catalog.service(id)) else {
        ctx.log.warning(format!("Map '{}' has no WMS service, skipping", map.name));
        return None;
    };

    let initial_bounds = match map.initial_bounds() {
        Some(bounds) => json!(bounds),
        None => {
            ctx.log.warning(format!(
                "Invalid initial extent of map '{}': {:?}",
                map.name, map.initial_extent
            ));
            defaults.item_bounds.clone()
        }
    };

    let (sublayers, drawing_order) = map_layers(map, &defaults.layer_bbox, ctx);

    let default_background = map
        .background_layer_id
        .and_then(|id| catalog.background_layer(id))
        .and_then(|layer| layer.qwc2_bg_layer_name.as_deref());
    let mut default_marked = false;
    let background_layers: Vec<Value> = catalog
        .background_layers()
        .iter()
        .map(|layer| {
            let mut node = Map::new();
            node.insert("name".into(), layer.qwc2_bg_layer_name.clone().into());
            node.insert("printLayer".into(), Value::from(layer.name.as_str()));
            if !default_marked && default_background.is_some()
                && layer.qwc2_bg_layer_name.as_deref() == default_background
            {
                node.insert("visibility".into(), Value::Bool(true));
                default_marked = true;
            }
            Value::Object(node)
        })
        .collect();

    let thumbnail = match map.thumbnail_image.as_deref() {
        Some(image) => format!("img/custommapthumbs/{}", image),
        None => "img/mapthumbs/default.jpg".to_string(),
    };

    let mut item = Map::new();
    item.insert("id".into(), Value::from(map.name.as_str()));
    item.insert("name".into(), Value::from(map.name.as_str()));
    item.insert("title".into(), map.title.clone().into());
    item.insert("wms_name".into(), Value::from(wms.name.as_str()));
    item.insert(
        "url".into(),
        Value::from(url_join(&defaults.ogc_service_url, &wms.name)),
    );
    item.insert("attribution".into(), defaults.attribution.clone());
    item.insert("keywords".into(), Value::from(""));
    item.insert("mapCrs".into(), Value::from(DEFAULT_CRS));
    item.insert("bbox".into(), bbox(&defaults.crs, defaults.item_bounds.clone()));
    item.insert("initialBbox".into(), bbox(&defaults.crs, initial_bounds));
    item.insert("sublayers".into(), Value::Array(sublayers));
    item.insert("expanded".into(), Value::Bool(true));
    item.insert(
        "drawingOrder".into(),
        Value::Array(drawing_order.into_iter().map(Value::from).collect()),
    );
    item.insert("backgroundLayers".into(), Value::Array(background_layers));
    item.insert("print".into(), Value::Array(defaults.print.clone()));
    item.insert("printLabelConfig".into(), defaults.print_label_config.clone());
    item.insert("searchProviders".into(), defaults.search_providers.clone());
    item.insert("editConfig".into(), defaults.edit_config.clone());
    item.insert("additionalMouseCrs".into(), json!(["EPSG:21781", "EPSG:2056"]));
    item.insert("tiled".into(), Value::Bool(false));
    item.insert("availableFormats".into(), defaults.image_formats.clone());
    item.insert("skipEmptyFeatureAttributes".into(), Value::Bool(true));
    item.insert(
        "infoFormats".into(),
        json!([
            "text/plain",
            "text/html",
            "text/xml",
            "application/vnd.ogc.gml",
            "application/vnd.ogc.gml/3.1.1"
        ]),
    );
    item.insert("thumbnail".into(), Value::from(thumbnail));
    Some(item)
}

fn print_layouts(catalog: &Catalog, default_layout: Option<&str>) -> (Vec<Value>, Value) {
    let mut layouts = Vec::new();
    let mut label_config = Map::new();

    for (template, project) in catalog.project_templates() {
        let mut layout = Map::new();
        layout.insert("name".into(), Value::from(template.name.as_str()));

        let mut map = Map::new();
        map.insert("name".into(), Value::from("map0"));
        map.insert("width".into(), project.map_width.into());
        map.insert("height".into(), project.map_height.into());
        layout.insert("map".into(), Value::Object(map));

        let labels = project.labels();
        if !labels.is_empty() {
            for label in &labels {
                label_config.insert(label.clone(), json!({"rows": 1, "maxLength": 128}));
            }
            layout.insert(
                "labels".into(),
                Value::Array(labels.into_iter().map(Value::from).collect()),
            );
        }
        layout.insert(
            "default".into(),
            Value::Bool(Some(template.name.as_str()) == default_layout),
        );
        layouts.push(Value::Object(layout));
    }
    (layouts, Value::Object(label_config))
}

/// Solr provider searching the foreground plus always searchable facets.
fn solr_search_provider(catalog: &Catalog) -> Value {
    let mut facets: Vec<&str> = catalog
        .dataset_edits()
        .iter()
        .filter_map(|edit| catalog.view(edit.view_id))
        .filter(|view| view.searchable == Searchable::Always)
        .filter_map(|view| view.facet.as_deref())
        .collect();
    facets.sort_unstable();

    let mut searches = vec![Value::from("foreground")];
    searches.extend(facets.into_iter().map(Value::from));

    let mut provider = Map::new();
    provider.insert("provider".into(), Value::from("solr"));
    provider.insert("default".into(), Value::Array(searches));
    Value::Object(provider)
}

// ── Theme layers ────────────────────────────────────────────────────

fn map_layers(map: &MapTheme, layer_bbox: &Value, ctx: &AssemblyContext<'_>) -> (Vec<Value>, Vec<String>) {
    let catalog = ctx.catalog();
    let mut sublayers = Vec::new();
    let mut drawing_order = Vec::new();

    for map_layer in &map.layers {
        let mut visitor = ThemeLayers {
            opacity: opacity_255(map_layer.transparency),
            visibility: map_layer.active,
            bbox: layer_bbox,
            faults: Vec::new(),
            warnings: Vec::new(),
        };
        let walk = catalog.walk(map_layer.layer_id, &mut visitor);
        ctx.report_faults(&walk.faults);
        ctx.report_faults(&visitor.faults);
        for warning in visitor.warnings {
            ctx.log.warning(warning);
        }

        if let Some(node) = walk.root {
            sublayers.push(Value::Object(node.layer));
            drawing_order.extend(node.drawing_order);
        }
    }

    drawing_order.reverse();
    (sublayers, drawing_order)
}

struct ThemeNode {
    layer: Document,
    drawing_order: Vec<String>,
    queryable: bool,
}

/// Theme sublayers of one map layer; facade groups are leaves.
struct ThemeLayers<'b> {
    opacity: i64,
    visibility: bool,
    bbox: &'b Value,
    faults: Vec<ModelError>,
    warnings: Vec<String>,
}

impl ThemeLayers<'_> {
    fn node(layer: &Layer) -> Document {
        let mut node = Map::new();
        node.insert("name".into(), Value::from(layer.name.as_str()));
        if let Some(title) = layer.title.as_deref().filter(|title| !title.is_empty()) {
            node.insert("title".into(), Value::from(title));
        }
        node
    }

    fn leaf(&mut self, layer: &Layer, queryable: bool, display_field: Option<String>) -> ThemeNode {
        let mut node = Self::node(layer);
        match layer.metadata() {
            Ok(metadata) => {
                if let Some(summary) = metadata.get("abstract") {
                    node.insert("abstract".into(), summary.clone());
                }
            }
            Err(e) => self.warnings.push(format!(
                "Invalid JSON in ows_metadata of layer '{}':\n{}",
                layer.name, e
            )),
        }
        node.insert("visibility".into(), Value::Bool(self.visibility));
        node.insert("queryable".into(), Value::Bool(queryable));
        if let Some(display_field) = display_field {
            node.insert("displayField".into(), Value::from(display_field));
        }
        node.insert("opacity".into(), Value::from(self.opacity));
        node.insert("bbox".into(), self.bbox.clone());

        ThemeNode {
            layer: node,
            drawing_order: vec![layer.name.clone()],
            queryable,
        }
    }
}

impl LayerVisitor for ThemeLayers<'_> {
    type Output = ThemeNode;

    fn data(
        &mut self,
        catalog: &Catalog,
        layer: &Layer,
        data: &DataLayer,
        _ctx: &WalkContext<'_>,
    ) -> Option<ThemeNode> {
        let chain = match catalog.data_chain(layer, data) {
            Ok(chain) => chain,
            Err(e) => {
                self.faults.push(e);
                return None;
            }
        };

        let (queryable, display_field) = if chain.source.kind.is_database() {
            let display_field = chain
                .view
                .attributes
                .iter()
                .find(|attribute| attribute.display_field)
                .map(|attribute| {
                    attribute
                        .alias
                        .clone()
                        .filter(|alias| !alias.is_empty())
                        .unwrap_or_else(|| attribute.name.clone())
                });
            (!chain.view.attributes.is_empty(), display_field)
        } else {
            (true, None)
        };
        Some(self.leaf(layer, queryable, display_field))
    }

    fn group(
        &mut self,
        _catalog: &Catalog,
        layer: &Layer,
        group: &GroupLayer,
        _ctx: &WalkContext<'_>,
        children: Vec<ThemeNode>,
    ) -> Option<ThemeNode> {
        let queryable = children.iter().any(|child| child.queryable);
        if group.facade {
            return Some(self.leaf(layer, queryable, None));
        }

        let mut node = Self::node(layer);
        let mut drawing_order = Vec::new();
        let mut sublayers = Vec::new();
        for child in children {
            sublayers.push(Value::Object(child.layer));
            drawing_order.extend(child.drawing_order);
        }
        node.insert("sublayers".into(), Value::Array(sublayers));
        node.insert("expanded".into(), Value::Bool(true));

        Some(ThemeNode {
            layer: node,
            drawing_order,
            queryable,
        })
    }
}

// ── Edit config ─────────────────────────────────────────────────────

/// Edit datasets writable by any role, or `null` if there are none.
async fn edit_config(ctx: &AssemblyContext<'_>) -> Value {
    let catalog = ctx.catalog();
    let writable = ctx.grants().writable_resources(ResourceKind::DataSetEdit);
    let mut config = Map::new();

    for edit in catalog.dataset_edits() {
        if !writable.contains(&edit.id) {
            continue;
        }
        let chain = match catalog
            .view(edit.view_id)
            .ok_or_else(|| ModelError::Dangling {
                kind: ResourceKind::DataSetView,
                id: edit.view_id,
                referrer: edit.name.clone(),
            })
            .and_then(|view| catalog.view_chain(view))
        {
            Ok(chain) => chain,
            Err(e) => {
                ctx.report_faults(&[e]);
                continue;
            }
        };
        if !chain.source.kind.is_database() {
            ctx.log.debug(format!("Edit dataset '{}' is not a database table", edit.name));
            continue;
        }

        let title = catalog
            .layers_for_view(chain.view.id)
            .first()
            .map(|layer| layer.display_title().to_string())
            .unwrap_or_else(|| edit.name.clone());
        let connection = chain.source.connection.as_str();
        let table = chain.data_set.table();

        let mut fields = Vec::new();
        for attribute in &chain.view.attributes {
            let meta = attribute_metadata(ctx.introspector, connection, &table, &attribute.name, ctx.log).await;
            let mut field = Map::new();
            field.insert("id".into(), Value::from(attribute.name.as_str()));
            field.insert(
                "name".into(),
                Value::from(
                    attribute
                        .alias
                        .as_deref()
                        .filter(|alias| !alias.is_empty())
                        .unwrap_or(&attribute.name),
                ),
            );
            field.insert("type".into(), Value::from(edit_field_type(&meta.data_type)));
            if !meta.constraints.is_empty() {
                if let Ok(constraints) = serde_json::to_value(&meta.constraints) {
                    field.insert("constraints".into(), constraints);
                }
            }
            fields.push(Value::Object(field));
        }

        let metadata = postgis_metadata(
            ctx.introspector,
            connection,
            &table,
            chain.view.geometry_column.as_deref(),
            ctx.log,
        )
        .await;
        let geometry_type = match metadata.geometry {
            Some(geometry) => {
                let collapsed = edit_geometry(&geometry.geometry_type);
                if collapsed.is_none() {
                    ctx.log.warning(format!(
                        "Unsupported geometry type {} for editing {}",
                        geometry.geometry_type, table
                    ));
                }
                collapsed
            }
            None => None,
        };

        if let (false, Some(geometry_type)) = (fields.is_empty(), geometry_type) {
            let mut dataset = Map::new();
            dataset.insert("editDataset".into(), Value::from(edit.name.as_str()));
            dataset.insert("layerName".into(), Value::from(title));
            dataset.insert("fields".into(), Value::Array(fields));
            dataset.insert("geomType".into(), Value::from(geometry_type.as_str()));
            config.insert(edit.name.clone(), Value::Object(dataset));
        }
    }

    if config.is_empty() {
        Value::Null
    } else {
        Value::Object(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspection::TableFixture;
    use crate::services::fixtures::{World, EDITOR};
    use gdi_model::{TableRef, PUBLIC_ROLE};
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn viewer_settings(config_file: &Path) -> ServiceSettings {
        ServiceSettings::new("mapViewer")
            .with_resource(
                "qwc2_config",
                json!({"qwc2_config_file": config_file, "wmsDpi": 96}),
            )
            .with_resource("qwc2_themes", json!({"default_print_layout": "A4"}))
    }

    #[tokio::test]
    async fn qwc2_config_drops_service_urls() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"searchServiceUrl": "/search/", "wmsDpi": 90, "identifyTool": "Identify"}}"#
        )
        .unwrap();
        let world = World::new();

        let document = MapViewerService
            .config(&viewer_settings(file.path()), &world.ctx())
            .await;

        assert_eq!(document["service"], json!("map-viewer"));
        assert_eq!(
            document["resources"]["qwc2_config"],
            json!({"config": {"wmsDpi": 96, "identifyTool": "Identify"}})
        );
    }

    #[tokio::test]
    async fn missing_config_file_is_reported_in_the_document() {
        let dir = tempfile::tempdir().unwrap();
        let world = World::new();

        let document = MapViewerService
            .config(&viewer_settings(&dir.path().join("nope.json")), &world.ctx())
            .await;

        assert!(document["resources"]["qwc2_config"]["config"]["ERROR"].is_string());
        assert!(world.log.has_errors());
    }

    #[tokio::test]
    async fn theme_item_from_map() {
        let dir = tempfile::tempdir().unwrap();
        let world = World::new();
        let document = MapViewerService
            .config(&viewer_settings(&dir.path().join("config.json")), &world.ctx())
            .await;

        let themes = &document["resources"]["qwc2_themes"]["themes"];
        assert_eq!(
            themes["backgroundLayers"],
            json!([{"name": "ortho", "type": "wmts", "thumbnail": "img/custommapthumbs/ortho.png"}])
        );

        let item = &themes["items"][0];
        assert_eq!(item["url"], json!("/ows/somap"));
        assert_eq!(item["initialBbox"]["bounds"], json!([2590000.0, 1210000.0, 2650000.0, 1260000.0]));
        let bbox = json!({"crs": "EPSG:2056", "bounds": [2590000, 1210000, 2650000, 1270000]});
        assert_eq!(
            item["sublayers"],
            json!([
                {
                    "name": "cadastre",
                    "title": "Cadastre",
                    "visibility": true,
                    "queryable": true,
                    "opacity": 255,
                    "bbox": bbox
                },
                {
                    "name": "ortho",
                    "title": "Orthophoto",
                    "visibility": false,
                    "queryable": true,
                    "opacity": 153,
                    "bbox": bbox
                }
            ])
        );
        assert_eq!(item["drawingOrder"], json!(["ortho", "cadastre"]));
        assert_eq!(
            item["backgroundLayers"],
            json!([{"name": "ortho", "printLayer": "bg_ortho", "visibility": true}])
        );
        assert_eq!(
            item["print"],
            json!([{
                "name": "A4",
                "map": {"name": "map0", "width": 200, "height": 150},
                "labels": ["title", "subtitle"],
                "default": true
            }])
        );
        assert_eq!(
            item["searchProviders"],
            json!(["coordinates", {"provider": "solr", "default": ["foreground", "parcels"]}])
        );
        assert_eq!(
            item["editConfig"],
            json!({
                "parcels_edit": {
                    "editDataset": "parcels_edit",
                    "layerName": "Parcels",
                    "fields": [
                        {"id": "number", "name": "Number", "type": "text"},
                        {
                            "id": "area",
                            "name": "area",
                            "type": "number",
                            "constraints": {"pattern": gdi_model::constraints::FLOAT_PATTERN}
                        }
                    ],
                    "geomType": "Polygon"
                }
            })
        );
        assert_eq!(item["thumbnail"], json!("img/mapthumbs/default.jpg"));
    }

    #[tokio::test]
    async fn unsupported_geometries_are_not_editable() {
        let dir = tempfile::tempdir().unwrap();
        let mut world = World::new();
        world.introspector = world.introspector.with_table(
            TableRef::new("agi", "parcels"),
            TableFixture::default()
                .with_primary_key("ogc_fid")
                .with_geometry("geom", "GEOMETRYCOLLECTION", 2056),
        );

        let document = MapViewerService
            .config(&viewer_settings(&dir.path().join("config.json")), &world.ctx())
            .await;

        let item = &document["resources"]["qwc2_themes"]["themes"]["items"][0];
        assert_eq!(item["editConfig"], Value::Null);
        assert!(world
            .log
            .entries()
            .iter()
            .any(|entry| entry.msg.starts_with("Unsupported geometry type GEOMETRYCOLLECTION")));
    }

    #[test]
    fn background_layer_permissions_are_exclusive() {
        let world = World::new();
        assert_eq!(
            Value::Object(MapViewerService.permissions(PUBLIC_ROLE, &world.ctx())),
            json!({"wms_services": [], "background_layers": ["ortho"], "data_datasets": []})
        );
        assert_eq!(
            MapViewerService.permissions(EDITOR, &world.ctx())["background_layers"],
            json!([])
        );
    }
}
