//! The run driver.
//!
//! `ConfigGenerator` ties the pieces together for one settings document:
//! - `write_configs`: one `<Service>Config.json` per configured service
//! - `write_permissions`: `permissions.json` for all roles
//! - `write_qgs`: the QGIS projects of every WMS
//!
//! Each entry point opens its own session scoped to the relations it needs
//! and returns the collected `RunLog`. Only a failing session is an `Err`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{info, instrument};

use crate::database::{
    mask_database_url, ConnectionRegistry, EntityStore, PgConfigStore, PrecacheScope, Session,
};
use crate::error::{GeneratorError, Result};
use crate::introspection::{PgIntrospector, SpatialIntrospector};
use crate::permissions::{permissions_document, PERMISSIONS_SCHEMA_URL};
use crate::qgs::QgsWriter;
use crate::run_log::RunLog;
use crate::schema::SchemaValidator;
use crate::services::{registry, AssemblyContext, Document, ServiceAssembler};
use crate::settings::{RunSettings, ServiceSettings};

pub const PERMISSIONS_FILE: &str = "permissions.json";

pub struct ConfigGenerator {
    settings: RunSettings,
    store: Arc<dyn EntityStore>,
    introspector: Arc<dyn SpatialIntrospector>,
    validator: SchemaValidator,
    assemblers: IndexMap<&'static str, Box<dyn ServiceAssembler>>,
    qgs_writer: QgsWriter,
}

impl ConfigGenerator {
    /// Fails when the ConfigDB is unreachable or the project templates are
    /// broken; nothing later in a run is fatal.
    pub async fn new(
        settings: RunSettings,
        store: Arc<dyn EntityStore>,
        introspector: Arc<dyn SpatialIntrospector>,
        validator: SchemaValidator,
    ) -> Result<Self> {
        store.ping().await?;
        let qgs_writer = QgsWriter::new(settings.qgs_writer.clone())?;
        Ok(Self {
            settings,
            store,
            introspector,
            validator,
            assemblers: registry(),
            qgs_writer,
        })
    }

    /// Generator backed by PostgreSQL: the ConfigDB from the settings and a
    /// shared connection registry for the ConfigDB and the data sources.
    pub async fn connect(settings: RunSettings) -> Result<Self> {
        let registry = Arc::new(ConnectionRegistry::new());
        let url = settings.config_db_url();
        info!("Connecting to ConfigDB at {}", mask_database_url(&url));
        let store = PgConfigStore::connect(&registry, &url).await?;
        let introspector = PgIntrospector::new(Arc::clone(&registry));
        Self::new(
            settings,
            Arc::new(store),
            Arc::new(introspector),
            SchemaValidator::new(),
        )
        .await
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Configured services with a known assembler, in settings order.
    fn configured_services(&self, log: &RunLog) -> Vec<(&ServiceSettings, &dyn ServiceAssembler)> {
        self.settings
            .services
            .iter()
            .filter_map(|service| match self.assemblers.get(service.name.as_str()) {
                Some(assembler) => Some((service, assembler.as_ref())),
                None => {
                    log.warning(format!("Service '{}' not found", service.name));
                    None
                }
            })
            .collect()
    }

    /// Opens a session; a failed grant load is recorded as a run error.
    async fn open_session(&self, scope: PrecacheScope, log: &RunLog) -> Result<Session> {
        let session = self.store.open_session(scope).await?;
        if let Some(error) = &session.grants_error {
            log.error(error.clone());
        }
        Ok(session)
    }

    fn context<'a>(&'a self, session: &'a Session, log: &'a RunLog) -> AssemblyContext<'a> {
        AssemblyContext {
            session,
            introspector: self.introspector.as_ref(),
            settings: &self.settings,
            log,
        }
    }

    // ── Service configs ─────────────────────────────────────────────

    /// Builds the config documents of all configured services.
    pub async fn service_configs(&self, log: &RunLog) -> Result<Vec<(String, Document)>> {
        let services = self.configured_services(log);
        let scope = services
            .iter()
            .fold(PrecacheScope::NONE, |scope, (_, assembler)| {
                scope.union(assembler.precache())
            });
        let session = self.open_session(scope, log).await?;
        let ctx = self.context(&session, log);

        let mut documents = Vec::with_capacity(services.len());
        for (service, assembler) in services {
            let document = assembler.config(service, &ctx).await;
            documents.push((format!("{}Config.json", assembler.service_name()), document));
        }
        Ok(documents)
    }

    #[instrument(skip(self))]
    pub async fn write_configs(&self) -> Result<RunLog> {
        let log = RunLog::new();
        let tenant_path = self.settings.tenant_path();
        if !tenant_path.is_dir() {
            log.info("Creating default tenant dir");
            if let Err(e) = tokio::fs::create_dir_all(&tenant_path).await {
                log.error(format!(
                    "Could not create tenant dir '{}': {}",
                    tenant_path.display(),
                    e
                ));
                return Ok(log);
            }
        }

        for (file_name, document) in self.service_configs(&log).await? {
            let document = Value::Object(document);
            let schema_url = document
                .get("$schema")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            self.validate(&document, &schema_url, &file_name, &log).await;
            write_json(&tenant_path.join(&file_name), &document, &log).await;
        }
        Ok(log)
    }

    // ── Permissions ─────────────────────────────────────────────────

    /// The permissions document, or `None` when the grants could not be
    /// loaded and the document would wrongly deny everything.
    pub async fn permissions(&self, log: &RunLog) -> Result<Option<Document>> {
        let services = self.configured_services(log);
        let mut scope = PrecacheScope {
            grants: true,
            ..PrecacheScope::NONE
        };
        for (_, assembler) in &services {
            scope = scope.union(assembler.precache());
        }
        let session = self.open_session(scope, log).await?;
        if session.grants_error.is_some() {
            return Ok(None);
        }
        let ctx = self.context(&session, log);
        let assemblers: Vec<&dyn ServiceAssembler> =
            services.into_iter().map(|(_, assembler)| assembler).collect();
        Ok(Some(permissions_document(&assemblers, &ctx)))
    }

    #[instrument(skip(self))]
    pub async fn write_permissions(&self) -> Result<RunLog> {
        let log = RunLog::new();
        let Some(document) = self.permissions(&log).await? else {
            log.warning(format!("Skipped writing {}", PERMISSIONS_FILE));
            return Ok(log);
        };
        let document = Value::Object(document);
        self.validate(&document, PERMISSIONS_SCHEMA_URL, PERMISSIONS_FILE, &log)
            .await;

        let tenant_path = self.settings.tenant_path();
        if let Err(e) = tokio::fs::create_dir_all(&tenant_path).await {
            log.error(format!(
                "Could not create tenant dir '{}': {}",
                tenant_path.display(),
                e
            ));
            return Ok(log);
        }
        write_json(&tenant_path.join(PERMISSIONS_FILE), &document, &log).await;
        Ok(log)
    }

    // ── QGIS projects ───────────────────────────────────────────────

    #[instrument(skip(self))]
    pub async fn write_qgs(&self) -> Result<RunLog> {
        let log = RunLog::new();
        let session = self.open_session(QgsWriter::precache(), &log).await?;
        let written = self
            .qgs_writer
            .write_projects(&session, self.introspector.as_ref(), &log)
            .await;
        if !written.is_empty() {
            log.info(format!(
                "Wrote {} QGIS projects to '{}'",
                written.len(),
                self.settings.qgs_writer.project_output_dir.display()
            ));
        }
        Ok(log)
    }

    /// Service configs followed by permissions.
    pub async fn write_all(&self) -> Result<RunLog> {
        let log = self.write_configs().await?;
        log.absorb(self.write_permissions().await?);
        Ok(log)
    }

    async fn validate(&self, document: &Value, schema_url: &str, file_name: &str, log: &RunLog) {
        if schema_url.is_empty() {
            log.warning(format!("No JSON schema for {}", file_name));
            return;
        }
        if !self.validator.validate(document, schema_url, log).await {
            log.warning(format!("{} failed schema validation", file_name));
        }
    }
}

/// Writes a JSON document pretty-printed with two-space indentation.
///
/// Failures are logged and the file is skipped.
pub async fn write_json(path: &Path, document: &Value, log: &RunLog) -> Option<PathBuf> {
    let json = match serde_json::to_string_pretty(document) {
        Ok(json) => json,
        Err(e) => {
            log.error(format!("Could not serialize '{}': {}", path.display(), e));
            return None;
        }
    };
    match tokio::fs::write(path, json).await {
        Ok(()) => {
            log.info(format!("Wrote '{}'", path.display()));
            Some(path.to_path_buf())
        }
        Err(e) => {
            log.error(
                GeneratorError::Io {
                    path: path.to_path_buf(),
                    source: e,
                }
                .to_string(),
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryStore;
    use crate::run_log::LogLevel;
    use crate::services::fixtures;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn generator(config_path: &Path, services: Value) -> ConfigGenerator {
        let mut settings = RunSettings::from_value(json!({ "services": services })).unwrap();
        settings.config.config_path = config_path.to_path_buf();
        settings.qgs_writer.project_output_dir = config_path.join("qgs");
        ConfigGenerator::new(
            settings,
            Arc::new(MemoryStore::new(fixtures::catalog(), fixtures::grants())),
            Arc::new(fixtures::introspector()),
            SchemaValidator::disabled(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn unknown_services_are_warned_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let generator = generator(
            dir.path(),
            json!([{"name": "print"}, {"name": "teleport"}, {"name": "saml-auth"}]),
        )
        .await;

        let log = generator.write_configs().await.unwrap();
        let entries = log.entries();
        assert_eq!(entries[0].msg, "Creating default tenant dir");
        assert!(entries
            .iter()
            .any(|entry| entry.msg == "Service 'teleport' not found"
                && entry.level == LogLevel::Warning));

        let mut files: Vec<_> = std::fs::read_dir(dir.path().join("default"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        files.sort();
        assert_eq!(files, vec!["printConfig.json", "samlAuthConfig.json"]);
    }

    #[tokio::test]
    async fn configs_are_pretty_printed_in_construction_order() {
        let dir = tempfile::tempdir().unwrap();
        let generator = generator(dir.path(), json!([{"name": "print"}])).await;
        generator.write_configs().await.unwrap();

        let written = std::fs::read_to_string(dir.path().join("default/printConfig.json")).unwrap();
        assert_eq!(
            written,
            r#"{
  "$schema": "https://github.com/qwc-services/qwc-print-service/raw/master/schemas/qwc-print-service.json",
  "service": "print",
  "config": {},
  "resources": {
    "print_templates": [
      {
        "template": "A4"
      }
    ]
  }
}"#
        );
    }

    #[tokio::test]
    async fn permissions_cover_all_roles() {
        let dir = tempfile::tempdir().unwrap();
        let generator = generator(dir.path(), json!([{"name": "print"}, {"name": "document"}])).await;
        let log = generator.write_permissions().await.unwrap();
        assert!(!log.has_errors());

        let written: Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("default/permissions.json")).unwrap(),
        )
        .unwrap();
        let roles: Vec<_> = written["roles"]
            .as_array()
            .unwrap()
            .iter()
            .map(|role| role["role"].clone())
            .collect();
        assert_eq!(roles, vec![json!("editor"), json!("public")]);
        assert_eq!(
            written["roles"][0]["permissions"],
            json!({"print_templates": ["A4"], "document_templates": ["parcel_report"]})
        );
    }

    /// Store whose grant tables cannot be read.
    struct GrantlessStore;

    #[async_trait::async_trait]
    impl EntityStore for GrantlessStore {
        async fn ping(&self) -> std::result::Result<(), crate::error::StoreError> {
            Ok(())
        }

        async fn open_session(
            &self,
            _scope: PrecacheScope,
        ) -> std::result::Result<Session, crate::error::StoreError> {
            Ok(Session::without_grants(
                fixtures::catalog(),
                "Could not load permissions: relation \"role\" does not exist",
            ))
        }
    }

    #[tokio::test]
    async fn failed_grant_load_skips_permissions_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = RunSettings::from_value(json!({"services": [{"name": "print"}]})).unwrap();
        settings.config.config_path = dir.path().to_path_buf();
        settings.qgs_writer.project_output_dir = dir.path().join("qgs");
        let generator = ConfigGenerator::new(
            settings,
            Arc::new(GrantlessStore),
            Arc::new(fixtures::introspector()),
            SchemaValidator::disabled(),
        )
        .await
        .unwrap();

        let log = generator.write_permissions().await.unwrap();
        assert!(log.has_errors());
        assert!(log.entries().iter().any(|entry| entry.level == LogLevel::Error
            && entry.msg.starts_with("Could not load permissions")));
        assert!(!dir.path().join("default/permissions.json").exists());

        assert!(generator.permissions(&RunLog::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn qgs_projects_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let generator = generator(dir.path(), json!([])).await;
        let log = generator.write_qgs().await.unwrap();
        assert!(dir.path().join("qgs/somap.qgs").is_file());
        assert!(log
            .entries()
            .iter()
            .any(|entry| entry.msg.starts_with("Wrote 3 QGIS projects")));
    }
}
