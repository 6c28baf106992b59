//! Dataproduct service config.
//!
//! Every layer (except the WFS root) and every basic dataset view becomes a
//! dataproduct with its metadata, contacts and data source. Client QML
//! styles get their SVG and raster fill symbols embedded as base64.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use async_trait::async_trait;
use base64::Engine;
use gdi_model::{
    opacity_255, split_values, Catalog, Contact, ContactKind, DataChain, DataSetView, Layer,
    LayerKind, OwsType, ResourceId, ResourceKind,
};
use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::database::PrecacheScope;
use crate::settings::ServiceSettings;

use super::{AssemblyContext, Document, ServiceAssembler};

const DEFAULT_SRID: i32 = 2056;

/// Symbol layer classes and the property holding their symbol path.
const SYMBOL_PROPS: [(&str, &str); 3] = [
    ("SvgMarker", "name"),
    ("SVGFill", "svgFile"),
    ("RasterFill", "imageFile"),
];

pub struct DataproductService;

#[async_trait]
impl ServiceAssembler for DataproductService {
    fn name(&self) -> &'static str {
        "dataproduct"
    }

    fn schema_url(&self) -> &'static str {
        "https://github.com/qwc-services/sogis-dataproduct-service/raw/master/schemas/sogis-dataproduct-service.json"
    }

    fn precache(&self) -> PrecacheScope {
        PrecacheScope {
            layers: true,
            datasets: true,
            services: true,
            contacts: true,
            grants: true,
            ..PrecacheScope::NONE
        }
    }

    async fn config(&self, service: &ServiceSettings, ctx: &AssemblyContext<'_>) -> Document {
        let mut document = self.base_document();
        document.insert("config".into(), Value::Object(Map::new()));

        let mut resources = Map::new();
        resources.insert(
            "dataproducts".into(),
            Value::Array(dataproducts(service, ctx).await),
        );
        document.insert("resources".into(), Value::Object(resources));
        document
    }

    fn permissions(&self, role: &str, ctx: &AssemblyContext<'_>) -> Document {
        let catalog = ctx.catalog();
        let permitted = ctx.grants().resource_ids(
            &[
                ResourceKind::OwsLayer,
                ResourceKind::DataSetView,
                ResourceKind::DataSet,
                ResourceKind::DataSource,
            ],
            role,
        );

        let mut names = BTreeSet::new();
        for layer in catalog.layers_by_name() {
            // groups carry no grants of their own
            let walk = catalog.filter_tree(layer.id, |layer, _| permitted.contains(&layer.id));
            ctx.report_faults(&walk.faults);
            if let Some(tree) = walk.root {
                names.extend(
                    tree.ids()
                        .into_iter()
                        .filter_map(|id| catalog.layer(id))
                        .map(|layer| layer.name.clone()),
                );
            }
        }
        names.extend(
            catalog
                .views_without_layers()
                .into_iter()
                .filter(|view| permitted.contains(&view.id))
                .map(|view| view.name.clone()),
        );

        let mut names: Vec<String> = names.into_iter().collect();
        names.sort_by_key(|name| name.to_lowercase());

        let mut permissions = Map::new();
        permissions.insert(
            "dataproducts".into(),
            Value::Array(names.into_iter().map(Value::from).collect()),
        );
        permissions
    }
}

/// Service settings read while building dataproducts.
struct ProductSettings<'s> {
    default_extent: Option<&'s Value>,
    wms_service_url: Option<&'s Value>,
    raster_pattern: Option<Regex>,
    raster_replacement: &'s str,
    qgs_resources_dir: &'s str,
}

impl<'s> ProductSettings<'s> {
    fn new(service: &'s ServiceSettings, ctx: &AssemblyContext<'_>) -> Self {
        let pattern = service.config_str("raster_datasource_pattern").unwrap_or("");
        let raster_pattern = match Regex::new(pattern) {
            Ok(regex) => Some(regex),
            Err(e) => {
                ctx.log.error(format!(
                    "Invalid raster_datasource_pattern '{}':\n{}",
                    pattern, e
                ));
                None
            }
        };
        Self {
            default_extent: service.config.get("default_extent"),
            wms_service_url: service.config.get("wms_service_url"),
            raster_pattern,
            raster_replacement: service.config_str("raster_datasource_repl").unwrap_or(""),
            qgs_resources_dir: service.config_str("qgs_resources_dir").unwrap_or(""),
        }
    }

    /// Raster data source directory with the configured rewrite applied.
    fn raster_connection(&self, connection: &str) -> String {
        match &self.raster_pattern {
            Some(pattern) if !pattern.as_str().is_empty() => pattern
                .replace_all(connection, self.raster_replacement)
                .into_owned(),
            _ => connection.to_string(),
        }
    }
}

async fn dataproducts(service: &ServiceSettings, ctx: &AssemblyContext<'_>) -> Vec<Value> {
    let catalog = ctx.catalog();
    let settings = ProductSettings::new(service, ctx);
    let wfs_root = catalog
        .first_service(OwsType::Wfs)
        .map(|wfs| wfs.root_layer_id);

    let mut products = Vec::new();
    for layer in catalog.layers_by_name() {
        if Some(layer.id) == wfs_root {
            continue;
        }
        if let Some(product) = layer_product(layer, &settings, ctx).await {
            products.push(Value::Object(product));
        }
    }
    for view in catalog.views_without_layers() {
        match catalog.view_chain(view) {
            Ok(chain) => products.push(Value::Object(basic_dataset(&chain, catalog))),
            Err(e) => ctx.report_faults(&[e]),
        }
    }
    products
}

async fn layer_product(
    layer: &Layer,
    settings: &ProductSettings<'_>,
    ctx: &AssemblyContext<'_>,
) -> Option<Document> {
    let catalog = ctx.catalog();

    let (product_type, sublayers, chain) = match &layer.kind {
        LayerKind::Group(group) => {
            let sublayers: Vec<Value> = group
                .children
                .iter()
                .filter_map(|edge| catalog.layer(edge.child_id))
                .map(|child| Value::from(child.name.as_str()))
                .collect();
            if sublayers.is_empty() {
                ctx.log.warning(format!(
                    "Skipping ProductSet {} with empty sublayers",
                    layer.name
                ));
                return None;
            }
            let product_type = if group.facade { "facadelayer" } else { "layergroup" };
            (product_type, Some(sublayers), None)
        }
        LayerKind::Data(data) => match catalog.data_chain(layer, data) {
            Ok(chain) => ("datasetview", None, Some(chain)),
            Err(e) => {
                ctx.report_faults(&[e]);
                return None;
            }
        },
    };

    let mut contact_ids = vec![layer.id];
    if let Some(chain) = &chain {
        contact_ids.push(chain.source.id);
    }

    let description = match layer.metadata() {
        Ok(metadata) => metadata.get("abstract").cloned(),
        Err(e) => {
            ctx.log.warning(format!(
                "Invalid JSON in ows_metadata of layer {}: {}",
                layer.name, e
            ));
            None
        }
    };

    let qml = match layer.as_data() {
        Some(data) => match data.client_qgs_style.as_deref().or(data.qgs_style.as_deref()) {
            Some(qml) if !qml.is_empty() => {
                Some(embed_qml_symbols(&layer.name, qml, settings.qgs_resources_dir, ctx).await)
            }
            other => other.map(str::to_string),
        },
        None => None,
    };

    let wms_datasource = wms_datasource(layer, settings, catalog);

    let mut product = Map::new();
    product.insert("identifier".into(), Value::from(layer.name.as_str()));
    product.insert("display".into(), layer.title.clone().into());
    product.insert("type".into(), Value::from(product_type));
    product.insert("synonyms".into(), json!(split_values(layer.synonyms.as_deref())));
    product.insert("keywords".into(), json!(split_values(layer.keywords.as_deref())));
    product.insert(
        "description".into(),
        description
            .filter(|description| !description.is_null())
            .unwrap_or_else(|| Value::from("")),
    );
    product.insert(
        "contacts".into(),
        Value::Array(contacts(catalog, &contact_ids)),
    );
    product.insert("wms_datasource".into(), wms_datasource.clone().unwrap_or(Value::Null));
    product.insert("qml".into(), qml.into());
    product.insert("sublayers".into(), sublayers.map_or(Value::Null, Value::Array));

    if let Some(facet) = chain.as_ref().and_then(|chain| chain.view.facet.as_deref()) {
        product.insert("searchterms".into(), json!([facet]));
    }
    if wms_datasource.is_some() {
        product.extend(display_infos(layer, chain.as_ref(), catalog));
    }
    product.extend(datasource(chain.as_ref(), settings, ctx).await);

    product.retain(|_, value| !value.is_null());
    Some(product)
}

fn wms_datasource(layer: &Layer, settings: &ProductSettings<'_>, catalog: &Catalog) -> Option<Value> {
    let root = catalog.first_service(OwsType::Wms)?.root_layer_id;
    if !catalog.is_descendant_of(layer.id, root) {
        return None;
    }
    let mut datasource = Map::new();
    datasource.insert(
        "service_url".into(),
        settings.wms_service_url.cloned().unwrap_or(Value::Null),
    );
    datasource.insert("name".into(), Value::from(layer.name.as_str()));
    Some(Value::Object(datasource))
}

/// Theme style layer infos taken from one placement of the layer.
///
/// A layer placed in several groups uses the edge of the group with the
/// lowest id (then the lowest order), independent of load order.
fn display_infos(layer: &Layer, chain: Option<&DataChain<'_>>, catalog: &Catalog) -> Document {
    let placement = catalog
        .parents(layer.id)
        .iter()
        .min_by_key(|parent| (parent.group_id, parent.edge.order))
        .map(|parent| &parent.edge);
    let visible = placement.map_or(true, |edge| edge.active);
    let transparency = placement.map_or(0, |edge| edge.transparency);

    let (queryable, display_field) = match chain {
        Some(chain) if chain.source.kind.is_database() => (
            !chain.view.attributes.is_empty(),
            chain
                .view
                .attributes
                .iter()
                .find(|attribute| attribute.display_field)
                .map(|attribute| attribute.name.clone()),
        ),
        Some(_) => (true, None),
        None => (false, None),
    };

    let mut infos = Map::new();
    infos.insert("visibility".into(), Value::Bool(visible));
    infos.insert("queryable".into(), Value::Bool(queryable));
    infos.insert("displayField".into(), display_field.into());
    infos.insert("opacity".into(), Value::from(opacity_255(transparency)));
    infos
}

async fn datasource(
    chain: Option<&DataChain<'_>>,
    settings: &ProductSettings<'_>,
    ctx: &AssemblyContext<'_>,
) -> Document {
    let mut metadata = Map::new();
    let extent = settings.default_extent.cloned().unwrap_or(Value::Null);

    let Some(chain) = chain else {
        metadata.insert("bbox".into(), extent);
        metadata.insert("crs".into(), Value::from("EPSG:2056"));
        return metadata;
    };

    if !chain.source.kind.is_database() {
        let mut raster = Map::new();
        raster.insert(
            "datasource".into(),
            Value::from(format!(
                "{}{}",
                settings.raster_connection(&chain.source.connection),
                chain.data_set.data_set_name
            )),
        );
        raster.insert("srid".into(), Value::from(DEFAULT_SRID));
        metadata.insert("datatype".into(), Value::from("raster"));
        metadata.insert("raster_datasource".into(), Value::Object(raster));
        return metadata;
    }

    let table = chain.data_set.table();
    let postgis = match ctx
        .introspector
        .table_metadata(
            &chain.source.connection,
            &table,
            chain.view.geometry_column.as_deref(),
        )
        .await
    {
        Ok(table_metadata) => {
            let geometry = table_metadata.geometry;
            let mut postgis = Map::new();
            postgis.insert("dbconnection".into(), Value::from(chain.source.connection.as_str()));
            postgis.insert("data_set_name".into(), Value::from(table.to_string()));
            postgis.insert(
                "primary_key".into(),
                table_metadata
                    .primary_key
                    .or_else(|| chain.data_set.primary_key.clone())
                    .into(),
            );
            postgis.insert(
                "geometry_field".into(),
                geometry.as_ref().map(|g| g.column.clone()).into(),
            );
            postgis.insert(
                "geometry_type".into(),
                geometry.as_ref().map(|g| g.geometry_type.clone()).into(),
            );
            postgis.insert("srid".into(), geometry.map(|g| g.srid).into());
            postgis
        }
        Err(e) => {
            ctx.log.error(e.to_string());
            let mut postgis = Map::new();
            postgis.insert("error".into(), Value::from(e.to_string()));
            postgis
        }
    };

    metadata.insert("bbox".into(), extent);
    metadata.insert("crs".into(), Value::from("EPSG:2056"));
    metadata.insert("datatype".into(), Value::from("vector"));
    metadata.insert("postgis_datasource".into(), Value::Object(postgis));
    metadata
}

fn basic_dataset(chain: &DataChain<'_>, catalog: &Catalog) -> Document {
    let view: &DataSetView = chain.view;
    let mut product = Map::new();
    product.insert("identifier".into(), Value::from(view.name.as_str()));
    product.insert("display".into(), Value::from(chain.data_set.data_set_name.as_str()));
    product.insert("type".into(), Value::from("datasetview"));
    product.insert("description".into(), view.description.clone().into());
    product.insert(
        "contacts".into(),
        Value::Array(contacts(catalog, &[view.id, chain.source.id])),
    );
    product.insert("datatype".into(), Value::from("table"));
    if let Some(facet) = view.facet.as_deref() {
        product.insert("searchterms".into(), json!([facet]));
    }
    product
}

// ── Contacts ────────────────────────────────────────────────────────

fn contacts(catalog: &Catalog, resource_ids: &[ResourceId]) -> Vec<Value> {
    catalog
        .contacts_for(resource_ids)
        .into_iter()
        .map(|person| {
            let organisation = person
                .organisation_id
                .and_then(|id| catalog.contact(id))
                .map(organisation_entry)
                .unwrap_or(Value::Null);
            json!({"person": person_entry(person), "organisation": organisation})
        })
        .collect()
}

fn person_entry(person: &Contact) -> Value {
    let (function, email, phone) = match &person.kind {
        ContactKind::Person {
            function,
            email,
            phone,
        } => (function.clone(), email.clone(), phone.clone()),
        ContactKind::Organisation { .. } => (None, None, None),
    };

    let mut entry = Map::new();
    entry.insert("id".into(), Value::from(person.id));
    entry.insert("name".into(), person.name.clone().into());
    entry.insert("function".into(), function.into());
    entry.insert("email".into(), email.into());
    entry.insert("phone".into(), phone.into());
    insert_address(&mut entry, person);
    Value::Object(entry)
}

fn organisation_entry(organisation: &Contact) -> Value {
    let (unit, abbreviation) = match &organisation.kind {
        ContactKind::Organisation { unit, abbreviation } => (unit.clone(), abbreviation.clone()),
        ContactKind::Person { .. } => (None, None),
    };

    let mut entry = Map::new();
    entry.insert("id".into(), Value::from(organisation.id));
    entry.insert("name".into(), organisation.name.clone().into());
    entry.insert("unit".into(), unit.into());
    entry.insert("abbreviation".into(), abbreviation.into());
    insert_address(&mut entry, organisation);
    entry.retain(|_, value| !value.is_null());
    Value::Object(entry)
}

fn insert_address(entry: &mut Document, contact: &Contact) {
    entry.insert("street".into(), contact.street.clone().into());
    entry.insert("house_no".into(), contact.house_no.clone().into());
    entry.insert("zip".into(), contact.zip.clone().into());
    entry.insert("city".into(), contact.city.clone().into());
    entry.insert("country_code".into(), contact.country_code.clone().into());
}

// ── QML symbols ─────────────────────────────────────────────────────

/// Embeds symbol files found below `resources_dir` into the QML.
///
/// Symbols without a file are assumed to be QGIS default symbols and stay
/// untouched. On parse errors the QML is returned unchanged.
async fn embed_qml_symbols(
    identifier: &str,
    qml: &str,
    resources_dir: &str,
    ctx: &AssemblyContext<'_>,
) -> String {
    let result = async {
        let mut symbols = HashMap::new();
        for symbol_path in symbol_paths(qml)? {
            let path = Path::new(resources_dir).join(&symbol_path);
            if let Ok(data) = tokio::fs::read(&path).await {
                ctx.log.info(format!("Embed symbol in QML: {}", symbol_path));
                symbols.insert(
                    symbol_path,
                    format!("base64:{}", base64::engine::general_purpose::STANDARD.encode(data)),
                );
            }
        }
        if symbols.is_empty() {
            return Ok(qml.to_string());
        }
        rewrite_symbols(qml, |path| symbols.get(path).cloned())
    }
    .await;

    match result {
        Ok(qml) => qml,
        Err(e) => {
            ctx.log.warning(format!(
                "Could not embed QML symbols for dataproduct '{}':\n{}",
                identifier, e
            ));
            qml.to_string()
        }
    }
}

fn symbol_paths(qml: &str) -> Result<Vec<String>, String> {
    let mut paths = Vec::new();
    rewrite_symbols(qml, |path| {
        paths.push(path.to_string());
        None
    })?;
    Ok(paths)
}

/// Streams the QML, replacing the `v` attribute of symbol path props where
/// `replace` returns a value.
fn rewrite_symbols(
    qml: &str,
    mut replace: impl FnMut(&str) -> Option<String>,
) -> Result<String, String> {
    let mut reader = Reader::from_str(qml);
    let mut writer = Writer::new(Vec::new());
    // symbol prop key of each open element, if it is a symbol layer
    let mut open: Vec<Option<&'static str>> = Vec::new();

    loop {
        let event = reader.read_event().map_err(|e| e.to_string())?;
        let event = match event {
            Event::Eof => break,
            Event::Start(element) => {
                let rewritten = rewrite_prop(&element, open.last().copied().flatten(), &mut replace)?;
                open.push(symbol_key(&element)?);
                Event::Start(rewritten.unwrap_or(element))
            }
            Event::Empty(element) => {
                let rewritten = rewrite_prop(&element, open.last().copied().flatten(), &mut replace)?;
                Event::Empty(rewritten.unwrap_or(element))
            }
            Event::End(element) => {
                open.pop();
                Event::End(element)
            }
            other => other,
        };
        writer.write_event(event).map_err(|e| e.to_string())?;
    }

    String::from_utf8(writer.into_inner()).map_err(|e| e.to_string())
}

fn attribute(element: &BytesStart<'_>, key: &str) -> Result<Option<String>, String> {
    for attr in element.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        if attr.key.as_ref() == key.as_bytes() {
            let value = attr.unescape_value().map_err(|e| e.to_string())?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn symbol_key(element: &BytesStart<'_>) -> Result<Option<&'static str>, String> {
    if element.name().as_ref() != b"layer" {
        return Ok(None);
    }
    let class = attribute(element, "class")?;
    Ok(SYMBOL_PROPS
        .iter()
        .find(|(layer_class, _)| class.as_deref() == Some(*layer_class))
        .map(|(_, key)| *key))
}

fn rewrite_prop<'a>(
    element: &BytesStart<'_>,
    parent_key: Option<&str>,
    replace: &mut impl FnMut(&str) -> Option<String>,
) -> Result<Option<BytesStart<'a>>, String> {
    let Some(parent_key) = parent_key else {
        return Ok(None);
    };
    if element.name().as_ref() != b"prop" || attribute(element, "k")?.as_deref() != Some(parent_key) {
        return Ok(None);
    }
    let Some(value) = attribute(element, "v")?.and_then(|path| replace(&path)) else {
        return Ok(None);
    };

    let mut rewritten = BytesStart::new("prop");
    for attr in element.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        if attr.key.as_ref() == b"v" {
            rewritten.push_attribute(("v", value.as_str()));
        } else {
            rewritten.push_attribute(attr);
        }
    }
    Ok(Some(rewritten))
}
