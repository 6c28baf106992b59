//! Document service config: report templates.

use async_trait::async_trait;
use gdi_model::ResourceKind;
use serde_json::{Map, Value};

use crate::database::PrecacheScope;
use crate::settings::ServiceSettings;

use super::{AssemblyContext, Document, ServiceAssembler};

pub struct DocumentService;

#[async_trait]
impl ServiceAssembler for DocumentService {
    fn name(&self) -> &'static str {
        "document"
    }

    fn schema_url(&self) -> &'static str {
        "https://github.com/qwc-services/qwc-document-service/raw/master/schemas/qwc-document-service.json"
    }

    fn precache(&self) -> PrecacheScope {
        PrecacheScope {
            templates: true,
            grants: true,
            ..PrecacheScope::NONE
        }
    }

    async fn config(&self, service: &ServiceSettings, ctx: &AssemblyContext<'_>) -> Document {
        let mut document = self.base_document();
        document.insert("config".into(), Value::Object(service.config.clone()));

        let templates: Vec<Value> = ctx
            .catalog()
            .report_templates()
            .map(|(template, report)| {
                let mut entry = Map::new();
                entry.insert("template".into(), Value::from(template.name.as_str()));
                entry.insert(
                    "report_filename".into(),
                    report.report_stem().map(str::to_string).into(),
                );
                Value::Object(entry)
            })
            .collect();

        let mut resources = Map::new();
        resources.insert("document_templates".into(), Value::Array(templates));
        document.insert("resources".into(), Value::Object(resources));
        document
    }

    fn permissions(&self, role: &str, ctx: &AssemblyContext<'_>) -> Document {
        let permitted = ctx.grants().resource_ids(&[ResourceKind::Template], role);
        let templates: Vec<Value> = ctx
            .catalog()
            .report_templates()
            .filter(|(template, _)| permitted.contains(&template.id))
            .map(|(template, _)| Value::from(template.name.as_str()))
            .collect();

        let mut permissions = Map::new();
        permissions.insert("document_templates".into(), Value::Array(templates));
        permissions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::fixtures::{World, EDITOR};
    use gdi_model::PUBLIC_ROLE;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn report_file_names_lose_their_extension() {
        let world = World::new();
        let document = DocumentService
            .config(&ServiceSettings::new("document"), &world.ctx())
            .await;
        assert_eq!(
            document["resources"]["document_templates"],
            json!([{"template": "parcel_report", "report_filename": "reports/parcel"}])
        );
    }

    #[test]
    fn permitted_report_templates() {
        let world = World::new();
        assert_eq!(
            Value::Object(DocumentService.permissions(EDITOR, &world.ctx())),
            json!({"document_templates": ["parcel_report"]})
        );
        assert_eq!(
            DocumentService.permissions(PUBLIC_ROLE, &world.ctx())["document_templates"],
            json!([])
        );
    }
}
