//! Legend service config.
//!
//! Nested WMS layers; facade groups and data layers with a custom legend
//! image reference a file that is written to `legend_images_path`.

use std::path::Path;

use async_trait::async_trait;
use gdi_model::{Catalog, DataLayer, GroupLayer, Layer, LayerVisitor, OwsType, WalkContext};
use serde_json::{Map, Value};

use crate::database::PrecacheScope;
use crate::settings::ServiceSettings;

use super::{config_with_server_url, AssemblyContext, Document, ServiceAssembler};

pub struct LegendService;

#[async_trait]
impl ServiceAssembler for LegendService {
    fn name(&self) -> &'static str {
        "legend"
    }

    fn schema_url(&self) -> &'static str {
        "https://github.com/qwc-services/qwc-legend-service/raw/master/schemas/qwc-legend-service.json"
    }

    fn precache(&self) -> PrecacheScope {
        PrecacheScope {
            layers: true,
            services: true,
            ..PrecacheScope::NONE
        }
    }

    async fn config(&self, service: &ServiceSettings, ctx: &AssemblyContext<'_>) -> Document {
        let catalog = ctx.catalog();
        let mut document = self.base_document();
        document.insert(
            "config".into(),
            Value::Object(config_with_server_url(service, ctx.settings)),
        );

        let mut visitor = LegendLayerTree::default();
        let mut wms_services = Vec::new();
        for wms in catalog.services(OwsType::Wms) {
            let walk = catalog.walk(wms.root_layer_id, &mut visitor);
            ctx.report_faults(&walk.faults);

            let mut node = Map::new();
            node.insert("name".into(), Value::from(wms.name.as_str()));
            node.insert(
                "root_layer".into(),
                walk.root.map(Value::Object).unwrap_or(Value::Null),
            );
            wms_services.push(Value::Object(node));
        }

        let output_dir = &ctx.settings.config.legend_images_path;
        for image in &visitor.images {
            save_legend_image(output_dir, image, ctx).await;
        }

        let mut resources = Map::new();
        resources.insert("wms_services".into(), Value::Array(wms_services));
        document.insert("resources".into(), Value::Object(resources));
        document
    }

    fn permissions(&self, _role: &str, _ctx: &AssemblyContext<'_>) -> Document {
        let mut permissions = Map::new();
        permissions.insert("wms_services".into(), Value::Array(Vec::new()));
        permissions
    }
}

/// A legend image scheduled for writing.
struct PendingImage {
    layer: String,
    filename: String,
    data: Vec<u8>,
}

async fn save_legend_image(output_dir: &Path, image: &PendingImage, ctx: &AssemblyContext<'_>) {
    let path = output_dir.join(&image.filename);
    ctx.log.info(format!(
        "Saving custom legend image '{}' for layer '{}'",
        path.display(),
        image.layer
    ));
    if let Err(e) = tokio::fs::write(&path, &image.data).await {
        ctx.log.warning(format!(
            "Could not write legend image for layer '{}':\n{}",
            image.layer, e
        ));
    }
}

#[derive(Default)]
struct LegendLayerTree {
    images: Vec<PendingImage>,
}

impl LegendLayerTree {
    /// File name of the layer's custom legend image, if it has one.
    fn legend_image(&mut self, layer: &Layer) -> Option<Value> {
        let legend = layer.legend.as_ref().filter(|legend| !legend.data.is_empty())?;
        // file names are assumed to be unique
        let filename = legend
            .filename
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| format!("{}.png", layer.name));
        self.images.push(PendingImage {
            layer: layer.name.clone(),
            filename: filename.clone(),
            data: legend.data.clone(),
        });
        Some(Value::from(filename))
    }
}

impl LayerVisitor for LegendLayerTree {
    type Output = Document;

    fn data(
        &mut self,
        _catalog: &Catalog,
        layer: &Layer,
        _data: &DataLayer,
        _ctx: &WalkContext<'_>,
    ) -> Option<Document> {
        let mut node = Map::new();
        node.insert("name".into(), Value::from(layer.name.as_str()));
        node.insert("type".into(), Value::from("layer"));
        if let Some(image) = self.legend_image(layer) {
            node.insert("legend_image".into(), image);
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
        node.insert(
            "layers".into(),
            Value::Array(children.into_iter().map(Value::Object).collect()),
        );
        if group.facade {
            node.insert("hide_sublayers".into(), Value::Bool(true));
            if let Some(image) = self.legend_image(layer) {
                node.insert("legend_image".into(), image);
            }
        }
        Some(node)
    }
}
