//! Print service config: the QGIS print templates.

use async_trait::async_trait;
use gdi_model::ResourceKind;
use serde_json::{json, Map, Value};

use crate::database::PrecacheScope;
use crate::settings::ServiceSettings;

use super::{AssemblyContext, Document, ServiceAssembler};

pub struct PrintService;

#[async_trait]
impl ServiceAssembler for PrintService {
    fn name(&self) -> &'static str {
        "print"
    }

    fn schema_url(&self) -> &'static str {
        "https://github.com/qwc-services/qwc-print-service/raw/master/schemas/qwc-print-service.json"
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
            .project_templates()
            .map(|(template, _)| json!({"template": template.name}))
            .collect();

        let mut resources = Map::new();
        resources.insert("print_templates".into(), Value::Array(templates));
        document.insert("resources".into(), Value::Object(resources));
        document
    }

    fn permissions(&self, role: &str, ctx: &AssemblyContext<'_>) -> Document {
        let permitted = ctx.grants().resource_ids(&[ResourceKind::Template], role);
        let templates: Vec<Value> = ctx
            .catalog()
            .project_templates()
            .filter(|(template, _)| permitted.contains(&template.id))
            .map(|(template, _)| Value::from(template.name.as_str()))
            .collect();

        let mut permissions = Map::new();
        permissions.insert("print_templates".into(), Value::Array(templates));
        permissions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::fixtures::{World, EDITOR};
    use gdi_model::PUBLIC_ROLE;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn lists_project_templates_only() {
        let world = World::new();
        let document = PrintService
            .config(&ServiceSettings::new("print"), &world.ctx())
            .await;
        assert_eq!(
            Value::Object(document),
            json!({
                "$schema": "https://github.com/qwc-services/qwc-print-service/raw/master/schemas/qwc-print-service.json",
                "service": "print",
                "config": {},
                "resources": {"print_templates": [{"template": "A4"}]}
            })
        );
    }

    #[test]
    fn permitted_templates() {
        let world = World::new();
        assert_eq!(
            PrintService.permissions(EDITOR, &world.ctx())["print_templates"],
            json!(["A4"])
        );
        assert_eq!(
            PrintService.permissions(PUBLIC_ROLE, &world.ctx())["print_templates"],
            json!([])
        );
    }
}
