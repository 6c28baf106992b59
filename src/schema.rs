//! JSON schema validation of generated documents.
//!
//! Schemas are downloaded once per validator and cached. Validation is
//! advisory: failures are logged with their location and a first-level
//! summary of the offending value, the document is written anyway.

use std::collections::HashMap;

use serde_json::{json, Map, Value};
use tokio::sync::Mutex;

use crate::error::SchemaError;
use crate::run_log::RunLog;

pub const MAP_VIEWER_SERVICE: &str = "map-viewer";

pub struct SchemaValidator {
    client: Option<reqwest::Client>,
    cache: Mutex<HashMap<String, Value>>,
}

impl Default for SchemaValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaValidator {
    pub fn new() -> Self {
        Self {
            client: Some(reqwest::Client::new()),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// A validator that accepts every document without downloading schemas.
    pub fn disabled() -> Self {
        Self {
            client: None,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Validator with preloaded schemas; unknown URLs are downloaded.
    pub fn with_schema(mut self, url: &str, schema: Value) -> Self {
        self.cache.get_mut().insert(url.to_string(), schema);
        self
    }

    async fn schema(&self, url: &str) -> Result<Option<Value>, SchemaError> {
        let mut cache = self.cache.lock().await;
        if let Some(schema) = cache.get(url) {
            return Ok(Some(schema.clone()));
        }
        let Some(client) = &self.client else {
            return Ok(None);
        };

        let download_failed = |message: String| SchemaError::Download {
            url: url.to_string(),
            message,
        };
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| download_failed(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(download_failed(format!("{}\n{}", status, body)));
        }
        let schema: Value = response.json().await.map_err(|source| SchemaError::Parse {
            url: url.to_string(),
            source,
        })?;
        cache.insert(url.to_string(), schema.clone());
        Ok(Some(schema))
    }

    /// Validates `document`, logging every error. Returns `true` when valid.
    pub async fn validate(&self, document: &Value, schema_url: &str, log: &RunLog) -> bool {
        let mut schema = match self.schema(schema_url).await {
            Ok(Some(schema)) => schema,
            Ok(None) => {
                log.debug(format!("Schema validation disabled, skipping {}", schema_url));
                return true;
            }
            Err(e) => {
                log.error(e.to_string());
                return false;
            }
        };

        if document.get("service").and_then(Value::as_str) == Some(MAP_VIEWER_SERVICE) {
            log.warning("Removing external QWC2 schema refs from MapViewer JSON schema");
            relax_map_viewer_schema(&mut schema);
        }

        let validator = match jsonschema::validator_for(&schema) {
            Ok(validator) => validator,
            Err(e) => {
                log.error(
                    SchemaError::Compile {
                        url: schema_url.to_string(),
                        message: e.to_string(),
                    }
                    .to_string(),
                );
                return false;
            }
        };

        let mut valid = true;
        for error in validator.iter_errors(document) {
            valid = false;
            log.error(format!("Validation error: {}", error));
            log.warning(format!(
                "Location: {}",
                instance_path(&error.instance_path.to_string())
            ));
            let summary = summarize_instance(&error.instance);
            log.warning(format!(
                "Value: {}",
                serde_json::to_string_pretty(&summary).unwrap_or_default()
            ));
        }
        valid
    }
}

/// Replaces the QWC2 sub-schemas of the map viewer schema with plain objects.
pub fn relax_map_viewer_schema(schema: &mut Value) {
    let Some(resources) = schema
        .pointer_mut("/properties/resources/properties")
        .and_then(Value::as_object_mut)
    else {
        return;
    };
    if let Some(qwc2_config) = resources
        .get_mut("qwc2_config")
        .and_then(|config| config.get_mut("properties"))
        .and_then(Value::as_object_mut)
    {
        qwc2_config.insert("config".to_string(), json!({"type": "object"}));
    }
    resources.insert(
        "qwc2_themes".to_string(),
        json!({
            "type": "object",
            "properties": {"themes": {"type": "object"}},
            "required": ["themes"]
        }),
    );
}

/// JSON pointer to dotted path: `/resources/wms_services/0` becomes
/// `.resources.wms_services[0]`.
pub fn instance_path(pointer: &str) -> String {
    pointer
        .split('/')
        .skip(1)
        .map(|segment| segment.replace("~1", "/").replace("~0", "~"))
        .map(|segment| match segment.parse::<usize>() {
            Ok(index) => format!("[{}]", index),
            Err(_) => format!(".{}", segment),
        })
        .collect()
}

/// First level of an object, nested objects and lists abbreviated.
pub fn summarize_instance(value: &Value) -> Value {
    let Value::Object(object) = value else {
        return value.clone();
    };
    let summary: Map<String, Value> = object
        .iter()
        .map(|(key, value)| {
            let short = match value {
                Value::Object(nested) => match nested.keys().next() {
                    Some(first) => json!({ first.clone(): "..." }),
                    None => value.clone(),
                },
                Value::Array(_) => json!(["..."]),
                other => other.clone(),
            };
            (key.clone(), short)
        })
        .collect();
    Value::Object(summary)
}
