//! Services whose config is taken from the run settings as is.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::database::PrecacheScope;
use crate::settings::ServiceSettings;

use super::{AssemblyContext, Document, ServiceAssembler};

/// A pass-through service: `config` and `resources` are copied from its
/// settings block, permissions are empty.
#[derive(Debug, Clone, Copy)]
pub struct GenericService {
    name: &'static str,
    service_name: &'static str,
    schema_url: &'static str,
}

const GENERIC_SERVICES: [GenericService; 8] = [
    GenericService::new(
        "agdi",
        "https://github.com/qwc-services/sogis-agdi/raw/master/schemas/sogis-agdi.json",
    ),
    GenericService::new(
        "saml-auth",
        "https://github.com/qwc-services/sogis-config-generator/raw/master/schemas/qwc-saml-auth.json",
    )
    .with_service_name("samlAuth"),
    GenericService::new(
        "ccc",
        "https://github.com/qwc-services/sogis-ccc-config/raw/master/schemas/sogis-ccc-config.json",
    ),
    GenericService::new(
        "elevation",
        "https://github.com/qwc-services/qwc-elevation-service/raw/master/schemas/qwc-elevation-service.json",
    ),
    GenericService::new(
        "landreg",
        "https://github.com/qwc-services/sogis-landreg-service/raw/master/schemas/sogis-landreg-service.json",
    ),
    GenericService::new(
        "mapinfo",
        "https://github.com/qwc-services/qwc-mapinfo-service/raw/master/schemas/qwc-mapinfo-service.json",
    ),
    GenericService::new(
        "permalink",
        "https://github.com/qwc-services/qwc-permalink-service/raw/master/schemas/qwc-permalink-service.json",
    ),
    GenericService::new(
        "plotinfo",
        "https://github.com/qwc-services/sogis-plotinfo-service/raw/master/schemas/sogis-plotinfo-service.json",
    ),
];

impl GenericService {
    const fn new(name: &'static str, schema_url: &'static str) -> Self {
        Self {
            name,
            service_name: name,
            schema_url,
        }
    }

    const fn with_service_name(mut self, service_name: &'static str) -> Self {
        self.service_name = service_name;
        self
    }

    pub fn all() -> impl Iterator<Item = GenericService> {
        GENERIC_SERVICES.into_iter()
    }
}

#[async_trait]
impl ServiceAssembler for GenericService {
    fn name(&self) -> &'static str {
        self.name
    }

    fn service_name(&self) -> &'static str {
        self.service_name
    }

    fn schema_url(&self) -> &'static str {
        self.schema_url
    }

    fn precache(&self) -> PrecacheScope {
        PrecacheScope::NONE
    }

    async fn config(&self, service: &ServiceSettings, _ctx: &AssemblyContext<'_>) -> Document {
        let mut document = self.base_document();
        document.insert("config".into(), Value::Object(service.config.clone()));
        document.insert("resources".into(), Value::Object(service.resources.clone()));
        document
    }

    fn permissions(&self, _role: &str, _ctx: &AssemblyContext<'_>) -> Document {
        Map::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::fixtures::World;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn settings_pass_through() {
        let world = World::new();
        let permalink = GenericService::all()
            .find(|service| service.name() == "permalink")
            .unwrap();
        let settings = ServiceSettings::new("permalink")
            .with_config("db_url", json!("postgresql:///?service=qwc_configdb"))
            .with_resource("ttl", json!(3600));

        let document = permalink.config(&settings, &world.ctx()).await;
        assert_eq!(
            Value::Object(document),
            json!({
                "$schema": "https://github.com/qwc-services/qwc-permalink-service/raw/master/schemas/qwc-permalink-service.json",
                "service": "permalink",
                "config": {"db_url": "postgresql:///?service=qwc_configdb"},
                "resources": {"ttl": 3600}
            })
        );
        assert!(permalink.permissions("public", &world.ctx()).is_empty());
    }

    #[test]
    fn eight_generic_services() {
        let names: Vec<&str> = GenericService::all().map(|service| service.name).collect();
        assert_eq!(
            names,
            vec!["agdi", "saml-auth", "ccc", "elevation", "landreg", "mapinfo", "permalink", "plotinfo"]
        );
    }
}
