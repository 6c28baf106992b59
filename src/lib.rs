//! GDI config generator
//!
//! Reads the ConfigDB and writes:
//! - one `<Service>Config.json` per configured service
//! - `permissions.json` with the per-role permissions of those services
//! - three QGIS projects per WMS (serving, print, WFS)
//!
//! The domain model and its traversals live in the `gdi-model` crate.

pub mod database;
pub mod error;
pub mod generator;
pub mod introspection;
pub mod permissions;
pub mod qgs;
pub mod run_log;
pub mod schema;
pub mod services;
pub mod settings;

#[cfg(feature = "server")]
pub mod server;

pub use error::{GeneratorError, Result};
pub use generator::ConfigGenerator;
