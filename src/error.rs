//! Error types for the config generator
//!
//! Only setup failures travel up as `Err`: an unreadable settings file or an
//! unreachable ConfigDB. Everything below that (introspection, style parsing,
//! single file writes) is logged into the `RunLog` and skipped.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error of a generator run.
#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("ConfigDB error: {0}")]
    Store(#[from] StoreError),

    #[error("Project synthesis error: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("Could not write '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors loading the generator settings document.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Could not read settings file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not parse settings file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid settings: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// Errors of the ConfigDB entity store and the connection registry.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid connection string '{connection}': {message}")]
    InvalidConnection { connection: String, message: String },

    #[error("Connection service '{0}' not found in any pg_service.conf")]
    UnknownService(String),

    #[error("Could not read connection service file '{path}': {source}")]
    ServiceFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not connect to ConfigDB at '{url}': {source}")]
    Connect {
        url: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Query on {relation} failed: {source}")]
    Query {
        relation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("Invalid {relation} row {id}: {message}")]
    InvalidRow {
        relation: &'static str,
        id: i64,
        message: String,
    },
}

/// Errors of spatial database introspection.
#[derive(Error, Debug)]
pub enum IntrospectionError {
    #[error("Unsupported connection '{0}', expected a postgresql:// URL")]
    UnsupportedConnection(String),

    #[error(transparent)]
    Connection(#[from] StoreError),

    #[error("Introspection query on {table} failed: {source}")]
    Query {
        table: String,
        #[source]
        source: sqlx::Error,
    },
}

/// Errors fetching or compiling JSON schemas.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Could not download JSON schema from {url}: {message}")]
    Download { url: String, message: String },

    #[error("Could not parse JSON schema from {url}: {source}")]
    Parse {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Invalid JSON schema {url}: {message}")]
    Compile { url: String, message: String },
}

/// Errors rendering QGIS projects.
#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("Could not register project template '{name}': {message}")]
    Template { name: String, message: String },

    #[error("Could not render project '{name}': {source}")]
    Render {
        name: String,
        #[source]
        source: handlebars::RenderError,
    },

    #[error("Invalid style document: {0}")]
    Style(String),

    #[error("Invalid data source connection '{connection}': {message}")]
    Connection { connection: String, message: String },
}

pub type Result<T> = std::result::Result<T, GeneratorError>;
