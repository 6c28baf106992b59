//! Generator settings (`configGeneratorConfig.json`).
//!
//! The document has three sections: `config` for the generator itself,
//! `services` with one block per service to generate, and `qgs_writer` for
//! project synthesis. All maps keep their document order.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SettingsError;

pub const DEFAULT_CONFIG_DB_URL: &str = "postgresql:///?service=qwc_configdb";
pub const DEFAULT_QGIS_SERVER_URL: &str = "http://localhost:8001/ows/";
pub const DEFAULT_EXTENT: [f64; 4] = [2590983.0, 1212806.0, 2646267.0, 1262755.0];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSettings {
    #[serde(default)]
    pub config: GeneratorSettings,
    #[serde(default)]
    pub services: Vec<ServiceSettings>,
    #[serde(default)]
    pub qgs_writer: QgsWriterSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorSettings {
    #[serde(default)]
    pub config_db_url: Option<String>,
    #[serde(default = "default_output_dir")]
    pub config_path: PathBuf,
    #[serde(default = "default_qgis_server_url")]
    pub default_qgis_server_url: String,
    #[serde(default = "default_legend_images_path")]
    pub legend_images_path: PathBuf,
}

/// One entry of `services`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceSettings {
    pub name: String,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub resources: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QgsWriterSettings {
    #[serde(default = "default_output_dir")]
    pub project_output_dir: PathBuf,
    #[serde(default = "default_extent")]
    pub default_extent: [f64; 4],
    #[serde(default)]
    pub default_raster_extent: Option<[f64; 4]>,
    #[serde(default = "default_selection_color")]
    pub selection_color: [u8; 4],
    #[serde(default)]
    pub wms_service_url: String,
    #[serde(default)]
    pub wfs_service_url: String,
    /// Connection service name -> service name written into projects
    #[serde(default)]
    pub service_aliases: IndexMap<String, String>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("/tmp/")
}

fn default_qgis_server_url() -> String {
    DEFAULT_QGIS_SERVER_URL.to_string()
}

fn default_legend_images_path() -> PathBuf {
    PathBuf::from("/tmp")
}

fn default_extent() -> [f64; 4] {
    DEFAULT_EXTENT
}

fn default_selection_color() -> [u8; 4] {
    [255, 255, 0, 255]
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            config_db_url: None,
            config_path: default_output_dir(),
            default_qgis_server_url: default_qgis_server_url(),
            legend_images_path: default_legend_images_path(),
        }
    }
}

impl Default for QgsWriterSettings {
    fn default() -> Self {
        Self {
            project_output_dir: default_output_dir(),
            default_extent: default_extent(),
            default_raster_extent: None,
            selection_color: default_selection_color(),
            wms_service_url: String::new(),
            wfs_service_url: String::new(),
            service_aliases: IndexMap::new(),
        }
    }
}

impl RunSettings {
    /// Reads and parses a settings file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_value(value: Value) -> Result<Self, SettingsError> {
        Ok(serde_json::from_value(value)?)
    }

    /// ConfigDB URL from the settings, then `CONFIG_DB_URL` / `DATABASE_URL`.
    pub fn config_db_url(&self) -> String {
        self.config
            .config_db_url
            .clone()
            .or_else(|| std::env::var("CONFIG_DB_URL").ok())
            .or_else(|| std::env::var("DATABASE_URL").ok())
            .unwrap_or_else(|| DEFAULT_CONFIG_DB_URL.to_string())
    }

    /// Default QGIS server URL, always ending with one `/`.
    pub fn qgis_server_url(&self) -> String {
        with_trailing_slash(&self.config.default_qgis_server_url)
    }

    /// Output directory of the default tenant.
    pub fn tenant_path(&self) -> PathBuf {
        self.config.config_path.join("default")
    }

    pub fn service(&self, name: &str) -> Option<&ServiceSettings> {
        self.services.iter().find(|service| service.name == name)
    }
}

impl ServiceSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_config(mut self, key: &str, value: Value) -> Self {
        self.config.insert(key.to_string(), value);
        self
    }

    pub fn with_resource(mut self, key: &str, value: Value) -> Self {
        self.resources.insert(key.to_string(), value);
        self
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    /// Looks up `resources.<section>` as an object.
    pub fn resource_section(&self, section: &str) -> Option<&Map<String, Value>> {
        self.resources.get(section).and_then(Value::as_object)
    }
}

/// Strips trailing slashes and appends exactly one.
pub fn with_trailing_slash(url: &str) -> String {
    format!("{}/", url.trim_end_matches('/'))
}
