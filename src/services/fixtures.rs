//! Small ConfigDB used by the assembler tests.
//!
//! ```text
//! WMS somap (20) -> somap (1)
//!   ├── cadastre (2, facade)
//!   │     └── parcels (3, transparency 20) -> parcels_view -> agi.parcels (geodb)
//!   └── ortho (4) -> ortho_view -> ortho.tif (raster dir)
//! WFS somap_wfs (21) -> wfs_root (10) -> parcels (3)
//! buildings_view (302) is a basic dataset without layers
//! ```
//!
//! `public` can see the ortho chain, both services and the background
//! layer; `editor` adds the parcels chain, its attributes, templates and a
//! write grant on the parcels edit.

use gdi_model::{
    Attribute, Catalog, ChildEdge, ConnectionKind, DataLayer, DataSet, DataSetEdit, DataSetView,
    DataSource, Grant, GrantIndex, GroupLayer, InfoTemplate, InfoType, Layer, MapLayerRef,
    MapTheme, OwsService, OwsType, ProjectTemplate, ReportTemplate, ResourceId,
    ResourceKind as K, Role, Searchable, TableRef, Template, TemplateKind, PUBLIC_ROLE,
};
use gdi_model::BackgroundLayer;

use crate::database::Session;
use crate::introspection::{StaticIntrospector, TableFixture};
use crate::run_log::RunLog;
use crate::settings::RunSettings;

use super::AssemblyContext;

pub const GEODB: &str = "postgresql:///?service=geodb";
pub const EDITOR: &str = "editor";

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

fn data_set(id: ResourceId, name: &str, source: ResourceId, primary_key: Option<&str>) -> DataSet {
    DataSet {
        id,
        data_set_name: name.into(),
        primary_key: primary_key.map(str::to_string),
        data_source_id: source,
        description: None,
    }
}

fn template(id: ResourceId, name: &str, kind: TemplateKind) -> Template {
    Template {
        id,
        name: name.into(),
        description: None,
        kind,
    }
}

pub fn catalog() -> Catalog {
    let mut catalog = Catalog::new();

    catalog.insert_layer(
        Layer::group(
            1,
            "somap",
            GroupLayer::new(false)
                .with_child(ChildEdge::new(2, 1))
                .with_child(ChildEdge::new(4, 2)),
        )
        .with_title("SO Map"),
    );
    catalog.insert_layer(
        Layer::group(
            2,
            "cadastre",
            GroupLayer::new(true).with_child(ChildEdge::new(3, 1).with_transparency(20)),
        )
        .with_title("Cadastre"),
    );
    let mut parcels = DataLayer::new(300);
    parcels.info_template = Some(500);
    parcels.report_template = Some(503);
    catalog.insert_layer(Layer::data(3, "parcels", parcels).with_title("Parcels"));
    catalog.insert_layer(Layer::data(4, "ortho", DataLayer::new(301)).with_title("Orthophoto"));
    catalog.insert_layer(Layer::group(
        10,
        "wfs_root",
        GroupLayer::new(false).with_child(ChildEdge::new(3, 1)),
    ));

    catalog.insert_data_source(DataSource {
        id: 100,
        connection: GEODB.into(),
        kind: ConnectionKind::Database,
    });
    catalog.insert_data_source(DataSource {
        id: 101,
        connection: "/data/raster/".into(),
        kind: ConnectionKind::Directory,
    });
    catalog.insert_data_set(data_set(200, "agi.parcels", 100, None));
    catalog.insert_data_set(data_set(201, "ortho.tif", 101, None));
    catalog.insert_data_set(data_set(202, "agi.buildings", 100, Some("fid")));

    let mut parcels_view = view(
        300,
        "parcels_view",
        200,
        vec![
            Attribute::new(310, "number").with_alias("Number").display_field(),
            Attribute::new(311, "area"),
        ],
    );
    parcels_view.searchable = Searchable::Always;
    parcels_view.facet = Some("parcels".into());
    parcels_view.filter_word = Some("Parcel".into());
    catalog.insert_view(parcels_view);
    catalog.insert_view(view(301, "ortho_view", 201, Vec::new()));
    catalog.insert_view(view(302, "buildings_view", 202, vec![Attribute::new(320, "egid")]));

    catalog.insert_template(template(
        500,
        "parcel_info",
        TemplateKind::Info(InfoTemplate {
            info_type: InfoType::Wms,
            template: Some("<b>{{ number }}</b>".into()),
            sql: None,
            module: None,
        }),
    ));
    catalog.insert_template(template(
        501,
        "default",
        TemplateKind::Info(InfoTemplate {
            info_type: InfoType::Wms,
            template: Some("default.html".into()),
            sql: None,
            module: None,
        }),
    ));
    catalog.insert_template(template(
        502,
        "A4",
        TemplateKind::Project(ProjectTemplate {
            print_layout: Some("<Layout name=\"A4\"/>".into()),
            map_width: Some(200),
            map_height: Some(150),
            print_labels: Some("title,subtitle".into()),
        }),
    ));
    catalog.insert_template(template(
        503,
        "parcel_report",
        TemplateKind::Report(ReportTemplate {
            report_filename: Some("reports/parcel.jrxml".into()),
            default_format: Some("xlsx".into()),
        }),
    ));

    catalog.insert_service(OwsService {
        id: 20,
        name: "somap".into(),
        ows_type: OwsType::Wms,
        root_layer_id: 1,
        ows_metadata: None,
        description: Some("Map of the canton".into()),
    });
    catalog.insert_service(OwsService {
        id: 21,
        name: "somap_wfs".into(),
        ows_type: OwsType::Wfs,
        root_layer_id: 10,
        ows_metadata: None,
        description: None,
    });

    catalog.insert_background_layer(BackgroundLayer {
        id: 600,
        name: "bg_ortho".into(),
        qgis_datasource: Some(
            "contextualWMSLegend=0&crs=EPSG:2056&format=image/jpeg&layers=ortho&url=http://geo/wms"
                .into(),
        ),
        qwc2_bg_layer_name: Some("ortho".into()),
        qwc2_bg_layer_config: Some(r#"{"name": "ortho", "type": "wmts"}"#.into()),
        thumbnail_image: Some("ortho.png".into()),
    });

    catalog.insert_dataset_edit(DataSetEdit {
        id: 700,
        name: "parcels_edit".into(),
        view_id: 300,
    });

    catalog.insert_map(MapTheme {
        id: 800,
        name: "somap".into(),
        title: Some("SO Map".into()),
        initial_extent: Some("2590000,1210000,2650000,1260000".into()),
        map_order: 1,
        thumbnail_image: None,
        service_id: Some(20),
        background_layer_id: Some(600),
        layers: vec![
            MapLayerRef {
                layer_id: 2,
                active: true,
                order: 1,
                transparency: 0,
            },
            MapLayerRef {
                layer_id: 4,
                active: false,
                order: 2,
                transparency: 40,
            },
        ],
    });

    catalog
}

pub fn grants() -> GrantIndex {
    let mut next_id = 0;
    let mut grant = |role: &str, resource_id: ResourceId, kind: K, name: &str, write: bool| {
        next_id += 1;
        Grant {
            id: next_id,
            role: role.into(),
            resource_id,
            kind,
            resource_name: name.into(),
            read: true,
            write,
            priority: 0,
        }
    };

    let grants = vec![
        grant(PUBLIC_ROLE, 20, K::WmsWfs, "somap", false),
        grant(PUBLIC_ROLE, 21, K::WmsWfs, "somap_wfs", false),
        grant(PUBLIC_ROLE, 4, K::OwsLayer, "ortho", false),
        grant(PUBLIC_ROLE, 301, K::DataSetView, "ortho_view", false),
        grant(PUBLIC_ROLE, 201, K::DataSet, "ortho.tif", false),
        grant(PUBLIC_ROLE, 100, K::DataSource, "geodb", false),
        grant(PUBLIC_ROLE, 101, K::DataSource, "raster", false),
        grant(PUBLIC_ROLE, 600, K::BackgroundLayer, "bg_ortho", false),
        grant(EDITOR, 3, K::OwsLayer, "parcels", false),
        grant(EDITOR, 300, K::DataSetView, "parcels_view", false),
        grant(EDITOR, 200, K::DataSet, "agi.parcels", false),
        grant(EDITOR, 310, K::Attribute, "number", false),
        grant(EDITOR, 311, K::Attribute, "area", false),
        grant(EDITOR, 500, K::Template, "parcel_info", false),
        grant(EDITOR, 502, K::Template, "A4", false),
        grant(EDITOR, 503, K::Template, "parcel_report", false),
        grant(EDITOR, 700, K::DataSetEdit, "parcels_edit", true),
    ];

    GrantIndex::new(
        vec![
            Role {
                id: 2,
                name: EDITOR.into(),
            },
            Role {
                id: 1,
                name: PUBLIC_ROLE.into(),
            },
        ],
        grants,
    )
}

pub fn session() -> Session {
    Session::new(catalog(), grants())
}

pub fn introspector() -> StaticIntrospector {
    StaticIntrospector::new()
        .with_table(
            TableRef::new("agi", "parcels"),
            TableFixture::default()
                .with_primary_key("ogc_fid")
                .with_geometry("geom", "MULTIPOLYGON", 2056)
                .with_column("number", gdi_model::ColumnInfo::new("character varying"))
                .with_column("area", gdi_model::ColumnInfo::new("double precision"))
                .with_extent([2600000.0, 1220000.0, 2610000.0, 1230000.0]),
        )
        .with_table(
            TableRef::new("agi", "buildings"),
            TableFixture::default()
                .with_primary_key("fid")
                .with_geometry("geom", "POINT", 2056)
                .with_column("egid", gdi_model::ColumnInfo::new("integer")),
        )
}

/// Owned pieces an `AssemblyContext` borrows from.
pub struct World {
    pub session: Session,
    pub introspector: StaticIntrospector,
    pub settings: RunSettings,
    pub log: RunLog,
}

impl World {
    pub fn new() -> Self {
        Self {
            session: session(),
            introspector: introspector(),
            settings: RunSettings::default(),
            log: RunLog::new(),
        }
    }

    /// Adds a grant on top of the fixture grants.
    pub fn add_grant(&mut self, role: &str, resource_id: ResourceId, kind: K, name: &str, write: bool) {
        let index = &self.session.grants;
        let mut grants = index.grants().to_vec();
        grants.push(Grant {
            id: grants.len() as i64 + 100,
            role: role.into(),
            resource_id,
            kind,
            resource_name: name.into(),
            read: true,
            write,
            priority: 0,
        });
        self.session.grants = GrantIndex::new(index.roles().to_vec(), grants);
    }

    pub fn ctx(&self) -> AssemblyContext<'_> {
        AssemblyContext {
            session: &self.session,
            introspector: &self.introspector,
            settings: &self.settings,
            log: &self.log,
        }
    }
}
