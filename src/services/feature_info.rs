//! FeatureInfo service config.
//!
//! Nested WMS layers with per-attribute aliases and formats, the layer's
//! info template and its feature report. Permissions are placeholders; the
//! entries themselves come from the `ogc` and `document` services.

use async_trait::async_trait;
use gdi_model::dataset::display_alias;
use gdi_model::{
    parse_alias, Attribute, Catalog, DataChain, DataLayer, GroupLayer, InfoType, Layer,
    LayerVisitor, ModelError, OwsType, WalkContext,
};
use serde_json::{Map, Value};

use crate::database::PrecacheScope;
use crate::settings::ServiceSettings;

use super::{config_with_server_url, AssemblyContext, Document, ServiceAssembler};

pub struct FeatureInfoService;

#[async_trait]
impl ServiceAssembler for FeatureInfoService {
    fn name(&self) -> &'static str {
        "featureInfo"
    }

    fn service_id(&self) -> &'static str {
        "feature-info"
    }

    fn schema_url(&self) -> &'static str {
        "https://github.com/qwc-services/qwc-feature-info-service/raw/master/schemas/qwc-feature-info-service.json"
    }

    fn precache(&self) -> PrecacheScope {
        PrecacheScope {
            layers: true,
            datasets: true,
            templates: true,
            services: true,
            ..PrecacheScope::NONE
        }
    }

    async fn config(&self, service: &ServiceSettings, ctx: &AssemblyContext<'_>) -> Document {
        let catalog = ctx.catalog();
        let mut document = self.base_document();

        let mut config = config_with_server_url(service, ctx.settings);
        if !config.contains_key("default_info_template") {
            if let Some(template) = catalog
                .info_template_named("default")
                .and_then(|info| info.template.as_deref())
            {
                config.insert("default_info_template".into(), Value::from(template));
            }
        }
        document.insert("config".into(), Value::Object(config));

        let mut wms_services = Vec::new();
        for wms in catalog.services(OwsType::Wms) {
            let mut visitor = InfoLayerTree::default();
            let walk = catalog.walk(wms.root_layer_id, &mut visitor);
            ctx.report_faults(&walk.faults);
            ctx.report_faults(&visitor.faults);
            for warning in visitor.warnings {
                ctx.log.warning(warning);
            }

            let mut node = Map::new();
            node.insert("name".into(), Value::from(wms.name.as_str()));
            node.insert(
                "root_layer".into(),
                walk.root.map(Value::Object).unwrap_or(Value::Null),
            );
            wms_services.push(Value::Object(node));
        }

        let mut resources = Map::new();
        resources.insert("wms_services".into(), Value::Array(wms_services));
        document.insert("resources".into(), Value::Object(resources));
        document
    }

    fn permissions(&self, _role: &str, _ctx: &AssemblyContext<'_>) -> Document {
        let mut permissions = Map::new();
        permissions.insert("wms_services".into(), Value::Array(Vec::new()));
        permissions.insert("document_templates".into(), Value::Array(Vec::new()));
        permissions
    }
}

#[derive(Default)]
struct InfoLayerTree {
    faults: Vec<ModelError>,
    warnings: Vec<String>,
}

impl InfoLayerTree {
    fn attribute(&mut self, layer: &Layer, attribute: &Attribute) -> Value {
        let mut node = Map::new();
        node.insert("name".into(), Value::from(attribute.name.as_str()));

        if let Some(raw) = attribute.alias.as_deref().filter(|alias| !alias.is_empty()) {
            match parse_alias(raw) {
                Ok(parsed) => {
                    node.insert(
                        "alias".into(),
                        Value::from(display_alias(attribute, &parsed)),
                    );
                    let json_aliases: Vec<Value> = parsed
                        .json_attrs
                        .iter()
                        .map(|json_attr| {
                            let mut alias = Map::new();
                            alias.insert("name".into(), json_attr.name.clone().into());
                            alias.insert(
                                "alias".into(),
                                json_attr
                                    .alias
                                    .clone()
                                    .filter(|alias| !alias.is_empty())
                                    .or_else(|| json_attr.name.clone())
                                    .into(),
                            );
                            Value::Object(alias)
                        })
                        .collect();
                    if !json_aliases.is_empty() {
                        node.insert("json_attribute_aliases".into(), Value::Array(json_aliases));
                    }
                }
                Err(e) => {
                    self.warnings.push(format!(
                        "Could not parse '{}' value in layer '{}' as JSON: '{}'\n{}",
                        attribute.name, layer.name, raw, e
                    ));
                    node.insert("alias".into(), Value::from(raw));
                }
            }
        }

        if let Some(format) = attribute.format.as_deref().filter(|format| !format.is_empty()) {
            node.insert("format".into(), Value::from(format));
        }
        Value::Object(node)
    }

    fn info_template(catalog: &Catalog, data: &DataLayer, chain: &DataChain<'_>) -> Option<Value> {
        let (_, info) = catalog.info_template(data.info_template?)?;

        let mut node = Map::new();
        node.insert("type".into(), Value::from(info.info_type.as_str()));
        match info.info_type {
            // always queried through the default QGIS server
            InfoType::Wms => {}
            InfoType::Sql => {
                if chain.source.kind.is_database() {
                    node.insert("db_url".into(), Value::from(chain.source.connection.as_str()));
                }
                node.insert("sql".into(), info.sql.clone().into());
            }
            InfoType::Module => {
                node.insert("module".into(), info.module.clone().into());
            }
        }
        node.insert("template".into(), info.template.clone().into());
        Some(Value::Object(node))
    }
}

impl LayerVisitor for InfoLayerTree {
    type Output = Document;

    fn data(
        &mut self,
        catalog: &Catalog,
        layer: &Layer,
        data: &DataLayer,
        _ctx: &WalkContext<'_>,
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
        if let Some(title) = layer.title.as_deref().filter(|title| !title.is_empty()) {
            node.insert("title".into(), Value::from(title));
        }

        let mut attributes: Vec<Value> = chain
            .view
            .attributes
            .iter()
            .map(|attribute| self.attribute(layer, attribute))
            .collect();
        if chain.source.kind.is_database() {
            let mut geometry = Map::new();
            geometry.insert("name".into(), Value::from("geometry"));
            attributes.push(Value::Object(geometry));
        }
        node.insert("attributes".into(), Value::Array(attributes));

        if let Some(template) = Self::info_template(catalog, data, &chain) {
            node.insert("info_template".into(), template);
        }

        // the last flagged attribute wins
        if let Some(display_field) = chain
            .view
            .attributes
            .iter()
            .rev()
            .find(|attribute| attribute.display_field)
        {
            node.insert(
                "display_field".into(),
                Value::from(display_field.name.as_str()),
            );
        }

        if let Some((template, report)) = data
            .report_template
            .and_then(|id| catalog.template(id))
            .and_then(|template| template.as_report().map(|report| (template, report)))
        {
            let format = report
                .default_format
                .as_deref()
                .filter(|format| !format.is_empty())
                .unwrap_or("pdf");
            node.insert(
                "feature_report".into(),
                Value::from(format!("{}.{}", template.name, format)),
            );
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
        if let Some(title) = layer.title.as_deref().filter(|title| !title.is_empty()) {
            node.insert("title".into(), Value::from(title));
        }
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
