//! Shared world for the integration tests: a small city map.
//!
//! ```text
//! WMS city (20) -> city (1)
//!   ├── roads (2) -> roads_view -> public.roads (gis)
//!   └── zones (3) -> zones_view -> public.zones (gis, no extent)
//! WFS city_wfs (21) -> city_wfs (10) -> roads (2)
//! ```
//!
//! Everything is readable by `public`; `planner` may edit the roads.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use config_generator::database::{EntityStore, MemoryStore, PrecacheScope, Session};
use config_generator::error::StoreError;
use config_generator::introspection::{StaticIntrospector, TableFixture};
use config_generator::schema::SchemaValidator;
use config_generator::settings::RunSettings;
use config_generator::ConfigGenerator;
use gdi_model::{
    Attribute, Catalog, ChildEdge, ColumnInfo, ConnectionKind, DataLayer, DataSet, DataSetEdit,
    DataSetView, DataSource, Grant, GrantIndex, GroupLayer, Layer, OwsService, OwsType,
    ResourceId, ResourceKind as K, Role, Searchable, TableRef, PUBLIC_ROLE,
};
use serde_json::Value;

pub const GIS: &str = "postgresql://gis:secret@db:5432/gis";
pub const PLANNER: &str = "planner";

fn view(id: ResourceId, name: &str, data_set_id: ResourceId, attributes: Vec<Attribute>) -> DataSetView {
    DataSetView {
        id,
        name: name.into(),
        description: None,
        data_set_id,
        geometry_column: None,
        searchable: Searchable::Never,
        facet: None,
        filter_word: None,
        attributes,
    }
}

fn data_set(id: ResourceId, name: &str) -> DataSet {
    DataSet {
        id,
        data_set_name: name.into(),
        primary_key: None,
        data_source_id: 100,
        description: None,
    }
}

pub fn city_catalog() -> Catalog {
    let mut catalog = Catalog::new();
    catalog.insert_layer(
        Layer::group(
            1,
            "city",
            GroupLayer::new(false)
                .with_child(ChildEdge::new(2, 1))
                .with_child(ChildEdge::new(3, 2)),
        )
        .with_title("City"),
    );
    catalog.insert_layer(Layer::data(2, "roads", DataLayer::new(300)).with_title("Roads"));
    catalog.insert_layer(Layer::data(3, "zones", DataLayer::new(301)).with_title("Zones"));
    catalog.insert_layer(Layer::group(
        10,
        "city_wfs",
        GroupLayer::new(false).with_child(ChildEdge::new(2, 1)),
    ));

    catalog.insert_data_source(DataSource {
        id: 100,
        connection: GIS.into(),
        kind: ConnectionKind::Database,
    });
    catalog.insert_data_set(data_set(200, "public.roads"));
    catalog.insert_data_set(data_set(201, "public.zones"));
    catalog.insert_view(view(
        300,
        "roads_view",
        200,
        vec![
            Attribute::new(310, "name").with_alias(r#"{"alias": "Street"}"#),
            Attribute::new(311, "lanes"),
        ],
    ));
    catalog.insert_view(view(301, "zones_view", 201, vec![Attribute::new(320, "zone")]));

    catalog.insert_service(OwsService {
        id: 20,
        name: "city".into(),
        ows_type: OwsType::Wms,
        root_layer_id: 1,
        ows_metadata: Some(r#"{"service_title": "City map", "keywords": "roads, zones"}"#.into()),
        description: None,
    });
    catalog.insert_service(OwsService {
        id: 21,
        name: "city_wfs".into(),
        ows_type: OwsType::Wfs,
        root_layer_id: 10,
        ows_metadata: None,
        description: None,
    });
    catalog.insert_dataset_edit(DataSetEdit {
        id: 700,
        name: "roads_edit".into(),
        view_id: 300,
    });
    catalog
}

pub fn city_grants() -> GrantIndex {
    let public = [
        (20, K::WmsWfs, "city"),
        (21, K::WmsWfs, "city_wfs"),
        (2, K::OwsLayer, "roads"),
        (3, K::OwsLayer, "zones"),
        (300, K::DataSetView, "roads_view"),
        (301, K::DataSetView, "zones_view"),
        (200, K::DataSet, "public.roads"),
        (201, K::DataSet, "public.zones"),
        (100, K::DataSource, "gis"),
        (310, K::Attribute, "name"),
        (311, K::Attribute, "lanes"),
        (320, K::Attribute, "zone"),
    ];
    let mut grants: Vec<Grant> = public
        .iter()
        .enumerate()
        .map(|(i, (resource_id, kind, name))| Grant {
            id: i as i64 + 1,
            role: PUBLIC_ROLE.into(),
            resource_id: *resource_id,
            kind: *kind,
            resource_name: (*name).into(),
            read: true,
            write: false,
            priority: 0,
        })
        .collect();
    grants.push(Grant {
        id: 100,
        role: PLANNER.into(),
        resource_id: 700,
        kind: K::DataSetEdit,
        resource_name: "roads_edit".into(),
        read: true,
        write: true,
        priority: 0,
    });

    GrantIndex::new(
        vec![
            Role {
                id: 1,
                name: PUBLIC_ROLE.into(),
            },
            Role {
                id: 2,
                name: PLANNER.into(),
            },
        ],
        grants,
    )
}

pub fn city_introspector() -> StaticIntrospector {
    StaticIntrospector::new()
        .with_table(
            TableRef::new("public", "roads"),
            TableFixture::default()
                .with_primary_key("id")
                .with_geometry("geom", "MULTILINESTRING", 2056)
                .with_column("name", ColumnInfo::new("character varying"))
                .with_column("lanes", ColumnInfo::new("smallint"))
                .with_extent([2600000.0, 1200000.0, 2601000.0, 1201000.0]),
        )
        .with_table(
            TableRef::new("public", "zones"),
            TableFixture::default()
                .with_primary_key("id")
                .with_geometry("geom", "POLYGON", 2056)
                .with_column("zone", ColumnInfo::new("text")),
        )
}

pub fn settings(dir: &Path, services: Value) -> RunSettings {
    let mut settings = RunSettings::from_value(serde_json::json!({
        "config": {"default_qgis_server_url": "http://qgis/ows"},
        "services": services
    }))
    .expect("valid settings");
    settings.config.config_path = dir.to_path_buf();
    settings.qgs_writer.project_output_dir = dir.join("projects");
    settings
}

pub async fn city_generator(dir: &Path, services: Value) -> ConfigGenerator {
    ConfigGenerator::new(
        settings(dir, services),
        Arc::new(MemoryStore::new(city_catalog(), city_grants())),
        Arc::new(city_introspector()),
        SchemaValidator::disabled(),
    )
    .await
    .expect("generator")
}

pub fn read_json(path: &Path) -> Value {
    let raw = std::fs::read_to_string(path).unwrap_or_else(|e| panic!("{}: {}", path.display(), e));
    serde_json::from_str(&raw).expect("valid JSON")
}

/// Store whose ConfigDB is never reachable.
pub struct DownStore;

#[async_trait]
impl EntityStore for DownStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Err(StoreError::InvalidConnection {
            connection: "postgresql:///?service=down".into(),
            message: "connection refused".into(),
        })
    }

    async fn open_session(&self, _scope: PrecacheScope) -> Result<Session, StoreError> {
        Err(StoreError::InvalidConnection {
            connection: "postgresql:///?service=down".into(),
            message: "connection refused".into(),
        })
    }
}
