//! ConfigDB entity store.
//!
//! A session is one bulk query per requested relation, assembled into a
//! `Catalog` arena plus a `GrantIndex`. Nothing is queried per node while a
//! service walks the layer tree.

use std::collections::HashMap;

use async_trait::async_trait;
use gdi_model::{
    Attribute, BackgroundLayer, Catalog, ChildEdge, ConnectionKind, Contact, ContactKind,
    DataLayer, DataSet, DataSetEdit, DataSetView, DataSource, Grant, GrantIndex, GroupLayer,
    InfoTemplate, InfoType, Layer, LayerKind, LegendImage, MapLayerRef, MapTheme, OwsService,
    OwsType, ProjectTemplate, ReportTemplate, ResourceContact, ResourceKind, Role, Searchable,
    Template, TemplateKind,
};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool};
use tracing::{debug, error, info, warn};

use super::{mask_database_url, ConnectionRegistry};
use crate::error::StoreError;

// ============================================================================
// Sessions
// ============================================================================

/// Relationship chains a session materializes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrecacheScope {
    /// Layers, group edges and template links
    pub layers: bool,
    /// Views with attributes, datasets and data sources
    pub datasets: bool,
    pub templates: bool,
    pub services: bool,
    /// Maps with their layer placements
    pub maps: bool,
    pub background_layers: bool,
    pub dataset_edits: bool,
    pub contacts: bool,
    /// Roles and permission grants
    pub grants: bool,
}

impl PrecacheScope {
    pub const NONE: Self = Self {
        layers: false,
        datasets: false,
        templates: false,
        services: false,
        maps: false,
        background_layers: false,
        dataset_edits: false,
        contacts: false,
        grants: false,
    };

    pub const ALL: Self = Self {
        layers: true,
        datasets: true,
        templates: true,
        services: true,
        maps: true,
        background_layers: true,
        dataset_edits: true,
        contacts: true,
        grants: true,
    };

    pub fn union(self, other: Self) -> Self {
        Self {
            layers: self.layers || other.layers,
            datasets: self.datasets || other.datasets,
            templates: self.templates || other.templates,
            services: self.services || other.services,
            maps: self.maps || other.maps,
            background_layers: self.background_layers || other.background_layers,
            dataset_edits: self.dataset_edits || other.dataset_edits,
            contacts: self.contacts || other.contacts,
            grants: self.grants || other.grants,
        }
    }
}

/// Materialized entities for one artifact-generation call.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub catalog: Catalog,
    pub grants: GrantIndex,
    /// Set when the grants could not be loaded; `grants` is empty then.
    pub grants_error: Option<String>,
}

impl Session {
    pub fn new(catalog: Catalog, grants: GrantIndex) -> Self {
        Self {
            catalog,
            grants,
            grants_error: None,
        }
    }

    /// Session whose permission queries degrade to empty results.
    pub fn without_grants(catalog: Catalog, error: impl Into<String>) -> Self {
        Self {
            catalog,
            grants: GrantIndex::default(),
            grants_error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Checks that the ConfigDB is reachable.
    async fn ping(&self) -> Result<(), StoreError>;

    async fn open_session(&self, scope: PrecacheScope) -> Result<Session, StoreError>;
}

// ============================================================================
// In-memory store
// ============================================================================

/// Store serving a fixed catalog, used by tests and offline tooling.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    session: Session,
}

impl MemoryStore {
    pub fn new(catalog: Catalog, grants: GrantIndex) -> Self {
        Self {
            session: Session::new(catalog, grants),
        }
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn open_session(&self, _scope: PrecacheScope) -> Result<Session, StoreError> {
        Ok(self.session.clone())
    }
}

// ============================================================================
// PostgreSQL store
// ============================================================================

#[derive(Debug, Clone)]
pub struct PgConfigStore {
    pool: PgPool,
    url: String,
}

impl PgConfigStore {
    /// Opens the ConfigDB pool and verifies the connection.
    pub async fn connect(registry: &ConnectionRegistry, url: &str) -> Result<Self, StoreError> {
        let store = Self {
            pool: registry.pool(url)?,
            url: url.to_string(),
        };
        store.ping().await?;
        info!("Connected to ConfigDB at {}", mask_database_url(url));
        Ok(store)
    }

    async fn fetch<T>(&self, relation: &'static str, sql: &str) -> Result<Vec<T>, StoreError>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        let rows = sqlx::query_as::<_, T>(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|source| StoreError::Query { relation, source })?;
        debug!("Loaded {} rows from {}", rows.len(), relation);
        Ok(rows)
    }

    async fn load_layers(&self, catalog: &mut Catalog) -> Result<(), StoreError> {
        let layers: Vec<LayerRow> = self.fetch("gdi_knoten.ows_layer", LAYERS_SQL).await?;
        let edges: Vec<EdgeRow> = self.fetch("gdi_knoten.group_layer", EDGES_SQL).await?;
        let links: Vec<TemplateLinkRow> = self
            .fetch("gdi_knoten.template_ows_layer", TEMPLATE_LINKS_SQL)
            .await?;
        for layer in assemble_layers(layers, edges, links) {
            catalog.insert_layer(layer);
        }
        Ok(())
    }

    async fn load_datasets(&self, catalog: &mut Catalog) -> Result<(), StoreError> {
        let views: Vec<ViewRow> = self.fetch("gdi_knoten.data_set_view", VIEWS_SQL).await?;
        let attributes: Vec<AttributeRow> = self
            .fetch("gdi_knoten.data_set_view_attributes", ATTRIBUTES_SQL)
            .await?;
        for view in assemble_views(views, attributes) {
            catalog.insert_view(view);
        }

        let data_sets: Vec<DataSetRow> = self.fetch("gdi_knoten.data_set", DATA_SETS_SQL).await?;
        for row in data_sets {
            catalog.insert_data_set(DataSet {
                id: row.gdi_oid,
                data_set_name: row.data_set_name,
                primary_key: row.primary_key.filter(|pk| !pk.is_empty()),
                data_source_id: row.gdi_oid_data_source,
                description: row.description,
            });
        }

        let sources: Vec<DataSourceRow> =
            self.fetch("gdi_knoten.data_source", DATA_SOURCES_SQL).await?;
        for row in sources {
            catalog.insert_data_source(DataSource {
                id: row.gdi_oid,
                connection: row.connection.unwrap_or_default(),
                kind: ConnectionKind::from_code(row.connection_type.as_deref().unwrap_or("")),
            });
        }
        Ok(())
    }

    async fn load_templates(&self, catalog: &mut Catalog) -> Result<(), StoreError> {
        let rows: Vec<TemplateRow> = self.fetch("gdi_knoten.template", TEMPLATES_SQL).await?;
        for row in rows {
            match row.into_template() {
                Some(template) => catalog.insert_template(template),
                None => warn!("Skipping template with unknown type"),
            }
        }
        Ok(())
    }

    async fn load_services(&self, catalog: &mut Catalog) -> Result<(), StoreError> {
        let rows: Vec<ServiceRow> = self.fetch("gdi_knoten.wms_wfs", SERVICES_SQL).await?;
        for row in rows {
            let Some(ows_type) = OwsType::from_code(&row.ows_type) else {
                warn!("Skipping OWS service '{}' of type '{}'", row.name, row.ows_type);
                continue;
            };
            catalog.insert_service(OwsService {
                id: row.gdi_oid,
                name: row.name,
                ows_type,
                root_layer_id: row.gdi_oid_root_layer,
                ows_metadata: row.ows_metadata,
                description: row.description,
            });
        }
        Ok(())
    }

    async fn load_maps(&self, catalog: &mut Catalog) -> Result<(), StoreError> {
        let maps: Vec<MapRow> = self.fetch("gdi_knoten.map", MAPS_SQL).await?;
        let layers: Vec<MapLayerRow> = self.fetch("gdi_knoten.map_layer", MAP_LAYERS_SQL).await?;
        let mut placements: HashMap<i64, Vec<MapLayerRef>> = HashMap::new();
        for row in layers {
            placements.entry(row.gdi_oid_map).or_default().push(MapLayerRef {
                layer_id: row.gdi_oid_ows_layer,
                active: row.layer_active.unwrap_or(true),
                order: row.layer_order.unwrap_or(0),
                transparency: row.layer_transparency.unwrap_or(0),
            });
        }
        for row in maps {
            catalog.insert_map(MapTheme {
                id: row.gdi_oid,
                layers: placements.remove(&row.gdi_oid).unwrap_or_default(),
                name: row.name,
                title: row.title,
                initial_extent: row.initial_extent,
                map_order: row.map_order.unwrap_or(0),
                thumbnail_image: row.thumbnail_image,
                service_id: row.gdi_oid_wms_wfs,
                background_layer_id: row.gdi_oid_background_layer,
            });
        }
        Ok(())
    }

    async fn load_background_layers(&self, catalog: &mut Catalog) -> Result<(), StoreError> {
        let rows: Vec<BackgroundLayerRow> = self
            .fetch("gdi_knoten.background_layer", BACKGROUND_LAYERS_SQL)
            .await?;
        for row in rows {
            catalog.insert_background_layer(BackgroundLayer {
                id: row.gdi_oid,
                name: row.name,
                qgis_datasource: row.qgis_datasource,
                qwc2_bg_layer_name: row.qwc2_bg_layer_name,
                qwc2_bg_layer_config: row.qwc2_bg_layer_config,
                thumbnail_image: row.thumbnail_image,
            });
        }
        Ok(())
    }

    async fn load_dataset_edits(&self, catalog: &mut Catalog) -> Result<(), StoreError> {
        let rows: Vec<DataSetEditRow> = self
            .fetch("gdi_knoten.data_set_edit", DATA_SET_EDITS_SQL)
            .await?;
        for row in rows {
            catalog.insert_dataset_edit(DataSetEdit {
                id: row.gdi_oid,
                name: row.name,
                view_id: row.gdi_oid_data_set_view,
            });
        }
        Ok(())
    }

    async fn load_contacts(&self, catalog: &mut Catalog) -> Result<(), StoreError> {
        let contacts: Vec<ContactRow> = self.fetch("contacts.contact", CONTACTS_SQL).await?;
        for row in contacts {
            catalog.insert_contact(row.into_contact());
        }
        let links: Vec<ResourceContactRow> = self
            .fetch("contacts.resource_contact", RESOURCE_CONTACTS_SQL)
            .await?;
        for row in links {
            catalog.insert_resource_contact(ResourceContact {
                resource_id: row.gdi_oid_resource,
                contact_role_id: row.id_contact_role,
                contact_id: row.id_contact,
            });
        }
        Ok(())
    }

    async fn load_grants(&self) -> Result<GrantIndex, StoreError> {
        let roles: Vec<RoleRow> = self.fetch("iam.role", ROLES_SQL).await?;
        let grants: Vec<GrantRow> = self.fetch("iam.resource_permission", GRANTS_SQL).await?;
        let roles = roles
            .into_iter()
            .map(|row| Role {
                id: row.id,
                name: row.name,
            })
            .collect();
        let grants = grants.into_iter().filter_map(GrantRow::into_grant).collect();
        Ok(GrantIndex::new(roles, grants))
    }
}

#[async_trait]
impl EntityStore for PgConfigStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|source| StoreError::Connect {
                url: mask_database_url(&self.url),
                source,
            })?;
        Ok(())
    }

    async fn open_session(&self, scope: PrecacheScope) -> Result<Session, StoreError> {
        let mut catalog = Catalog::new();
        if scope.layers {
            self.load_layers(&mut catalog).await?;
        }
        if scope.datasets {
            self.load_datasets(&mut catalog).await?;
        }
        if scope.templates {
            self.load_templates(&mut catalog).await?;
        }
        if scope.services {
            self.load_services(&mut catalog).await?;
        }
        if scope.maps {
            self.load_maps(&mut catalog).await?;
        }
        if scope.background_layers {
            self.load_background_layers(&mut catalog).await?;
        }
        if scope.dataset_edits {
            self.load_dataset_edits(&mut catalog).await?;
        }
        if scope.contacts {
            self.load_contacts(&mut catalog).await?;
        }

        debug!("Opened session with {} layers", catalog.layer_count());
        if !scope.grants {
            return Ok(Session::new(catalog, GrantIndex::default()));
        }
        match self.load_grants().await {
            Ok(grants) => Ok(Session::new(catalog, grants)),
            Err(e) => {
                error!("Could not load permissions: {}", e);
                Ok(Session::without_grants(
                    catalog,
                    format!("Could not load permissions: {}", e),
                ))
            }
        }
    }
}

// ============================================================================
// Queries
// ============================================================================

const LAYERS_SQL: &str = r#"
    SELECT l.gdi_oid::bigint AS gdi_oid, l.name, l.title, l.description,
        l.legend_image, l.legend_filename, l.ows_metadata::text AS ows_metadata,
        l.synonyms, l.keywords, g.facade,
        d.gdi_oid_data_set_view::bigint AS gdi_oid_data_set_view,
        d.qgs_style, d.client_qgs_style
    FROM gdi_knoten.ows_layer l
        LEFT JOIN gdi_knoten.ows_layer_group g ON g.gdi_oid = l.gdi_oid
        LEFT JOIN gdi_knoten.ows_layer_data d ON d.gdi_oid = l.gdi_oid
    ORDER BY l.gdi_oid
"#;

const EDGES_SQL: &str = r#"
    SELECT gdi_oid_group_layer::bigint AS gdi_oid_group_layer,
        gdi_oid_sub_layer::bigint AS gdi_oid_sub_layer,
        layer_active, layer_order::int AS layer_order,
        layer_transparency::int AS layer_transparency
    FROM gdi_knoten.group_layer
    ORDER BY gdi_oid_group_layer, layer_order, gdi_oid_sub_layer
"#;

const TEMPLATE_LINKS_SQL: &str = r#"
    SELECT tl.gdi_oid_ows_layer::bigint AS gdi_oid_ows_layer,
        tl.gdi_oid_template::bigint AS gdi_oid_template,
        t.type::text AS template_type
    FROM gdi_knoten.template_ows_layer tl
        JOIN gdi_knoten.template t ON t.gdi_oid = tl.gdi_oid_template
    ORDER BY tl.gdi_oid_ows_layer, tl.gdi_oid_template
"#;

const VIEWS_SQL: &str = r#"
    SELECT gdi_oid::bigint AS gdi_oid, name, description,
        gdi_oid_data_set::bigint AS gdi_oid_data_set, geometry_column,
        searchable::int AS searchable, facet, filter_word
    FROM gdi_knoten.data_set_view
    ORDER BY name, gdi_oid
"#;

const ATTRIBUTES_SQL: &str = r#"
    SELECT gdi_oid::bigint AS gdi_oid,
        gdi_oid_data_set_view::bigint AS gdi_oid_data_set_view,
        name, alias, format, displayfield, attribute_order::int AS attribute_order
    FROM gdi_knoten.data_set_view_attributes
    ORDER BY gdi_oid_data_set_view, attribute_order, gdi_oid
"#;

const DATA_SETS_SQL: &str = r#"
    SELECT gdi_oid::bigint AS gdi_oid, data_set_name, primary_key,
        gdi_oid_data_source::bigint AS gdi_oid_data_source, description
    FROM gdi_knoten.data_set
"#;

const DATA_SOURCES_SQL: &str = r#"
    SELECT gdi_oid::bigint AS gdi_oid, connection, connection_type::text AS connection_type
    FROM gdi_knoten.data_source
"#;

const TEMPLATES_SQL: &str = r#"
    SELECT t.gdi_oid::bigint AS gdi_oid, t.name, t.type::text AS template_type, t.description,
        j.report_filename, j.default_format,
        q.qgs_print_layout, q.map_width::int AS map_width, q.map_height::int AS map_height,
        q.print_labels,
        i.info_type::text AS info_type, i.info_template, i.info_sql, i.info_module
    FROM gdi_knoten.template t
        LEFT JOIN gdi_knoten.template_jasper j ON j.gdi_oid = t.gdi_oid
        LEFT JOIN gdi_knoten.template_qgis q ON q.gdi_oid = t.gdi_oid
        LEFT JOIN gdi_knoten.template_info i ON i.gdi_oid = t.gdi_oid
    ORDER BY t.name, t.gdi_oid
"#;

const SERVICES_SQL: &str = r#"
    SELECT gdi_oid::bigint AS gdi_oid, name, ows_type::text AS ows_type,
        gdi_oid_root_layer::bigint AS gdi_oid_root_layer,
        ows_metadata::text AS ows_metadata, description
    FROM gdi_knoten.wms_wfs
    ORDER BY gdi_oid
"#;

const MAPS_SQL: &str = r#"
    SELECT gdi_oid::bigint AS gdi_oid, name, title, initial_extent,
        map_order::int AS map_order, thumbnail_image,
        gdi_oid_wms_wfs::bigint AS gdi_oid_wms_wfs,
        gdi_oid_background_layer::bigint AS gdi_oid_background_layer
    FROM gdi_knoten.map
    ORDER BY name, gdi_oid
"#;

const MAP_LAYERS_SQL: &str = r#"
    SELECT gdi_oid_map::bigint AS gdi_oid_map,
        gdi_oid_ows_layer::bigint AS gdi_oid_ows_layer,
        layer_active, layer_order::int AS layer_order,
        layer_transparency::int AS layer_transparency
    FROM gdi_knoten.map_layer
    ORDER BY gdi_oid_map, layer_order
"#;

const BACKGROUND_LAYERS_SQL: &str = r#"
    SELECT gdi_oid::bigint AS gdi_oid, name, qgis_datasource, qwc2_bg_layer_name,
        qwc2_bg_layer_config::text AS qwc2_bg_layer_config, thumbnail_image
    FROM gdi_knoten.background_layer
    ORDER BY name, gdi_oid
"#;

const DATA_SET_EDITS_SQL: &str = r#"
    SELECT gdi_oid::bigint AS gdi_oid, name,
        gdi_oid_data_set_view::bigint AS gdi_oid_data_set_view
    FROM gdi_knoten.data_set_edit
    ORDER BY name, gdi_oid
"#;

const CONTACTS_SQL: &str = r#"
    SELECT c.id::bigint AS id, c.type::text AS contact_type,
        c.id_organisation::bigint AS id_organisation,
        c.name, c.street, c.house_no, c.zip, c.city, c.country_code,
        p.function, p.email, p.phone, o.unit, o.abbreviation
    FROM contacts.contact c
        LEFT JOIN contacts.person p ON p.id = c.id
        LEFT JOIN contacts.organisation o ON o.id = c.id
"#;

const RESOURCE_CONTACTS_SQL: &str = r#"
    SELECT id_contact_role::bigint AS id_contact_role, id_contact::bigint AS id_contact,
        gdi_oid_resource::bigint AS gdi_oid_resource
    FROM contacts.resource_contact
    ORDER BY id_contact_role, id_contact
"#;

const ROLES_SQL: &str = "SELECT id::bigint AS id, name FROM iam.role ORDER BY name";

const GRANTS_SQL: &str = r#"
    SELECT p.id::bigint AS id, r.name AS role,
        p.gdi_oid_resource::bigint AS gdi_oid_resource,
        res.table_name, res.name AS resource_name,
        p.read, p.write, p.priority::int AS priority
    FROM iam.resource_permission p
        JOIN iam.role r ON r.id = p.id_role
        JOIN gdi_knoten.gdi_resource res ON res.gdi_oid = p.gdi_oid_resource
    ORDER BY p.id
"#;

// ============================================================================
// Row structs
// ============================================================================

#[derive(Debug, Clone, FromRow)]
struct LayerRow {
    gdi_oid: i64,
    name: String,
    title: Option<String>,
    description: Option<String>,
    legend_image: Option<Vec<u8>>,
    legend_filename: Option<String>,
    ows_metadata: Option<String>,
    synonyms: Option<String>,
    keywords: Option<String>,
    facade: Option<bool>,
    gdi_oid_data_set_view: Option<i64>,
    qgs_style: Option<String>,
    client_qgs_style: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
struct EdgeRow {
    gdi_oid_group_layer: i64,
    gdi_oid_sub_layer: i64,
    layer_active: Option<bool>,
    layer_order: Option<i32>,
    layer_transparency: Option<i32>,
}

#[derive(Debug, Clone, FromRow)]
struct TemplateLinkRow {
    gdi_oid_ows_layer: i64,
    gdi_oid_template: i64,
    template_type: String,
}

#[derive(Debug, Clone, FromRow)]
struct ViewRow {
    gdi_oid: i64,
    name: String,
    description: Option<String>,
    gdi_oid_data_set: i64,
    geometry_column: Option<String>,
    searchable: Option<i32>,
    facet: Option<String>,
    filter_word: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
struct AttributeRow {
    gdi_oid: i64,
    gdi_oid_data_set_view: i64,
    name: String,
    alias: Option<String>,
    format: Option<String>,
    displayfield: Option<bool>,
    attribute_order: Option<i32>,
}

#[derive(Debug, Clone, FromRow)]
struct DataSetRow {
    gdi_oid: i64,
    data_set_name: String,
    primary_key: Option<String>,
    gdi_oid_data_source: i64,
    description: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
struct DataSourceRow {
    gdi_oid: i64,
    connection: Option<String>,
    connection_type: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
struct TemplateRow {
    gdi_oid: i64,
    name: String,
    template_type: String,
    description: Option<String>,
    report_filename: Option<String>,
    default_format: Option<String>,
    qgs_print_layout: Option<String>,
    map_width: Option<i32>,
    map_height: Option<i32>,
    print_labels: Option<String>,
    info_type: Option<String>,
    info_template: Option<String>,
    info_sql: Option<String>,
    info_module: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
struct ServiceRow {
    gdi_oid: i64,
    name: String,
    ows_type: String,
    gdi_oid_root_layer: i64,
    ows_metadata: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
struct MapRow {
    gdi_oid: i64,
    name: String,
    title: Option<String>,
    initial_extent: Option<String>,
    map_order: Option<i32>,
    thumbnail_image: Option<String>,
    gdi_oid_wms_wfs: Option<i64>,
    gdi_oid_background_layer: Option<i64>,
}

#[derive(Debug, Clone, FromRow)]
struct MapLayerRow {
    gdi_oid_map: i64,
    gdi_oid_ows_layer: i64,
    layer_active: Option<bool>,
    layer_order: Option<i32>,
    layer_transparency: Option<i32>,
}

#[derive(Debug, Clone, FromRow)]
struct BackgroundLayerRow {
    gdi_oid: i64,
    name: String,
    qgis_datasource: Option<String>,
    qwc2_bg_layer_name: Option<String>,
    qwc2_bg_layer_config: Option<String>,
    thumbnail_image: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
struct DataSetEditRow {
    gdi_oid: i64,
    name: String,
    gdi_oid_data_set_view: i64,
}

#[derive(Debug, Clone, FromRow)]
struct ContactRow {
    id: i64,
    contact_type: String,
    id_organisation: Option<i64>,
    name: Option<String>,
    street: Option<String>,
    house_no: Option<String>,
    zip: Option<String>,
    city: Option<String>,
    country_code: Option<String>,
    function: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    unit: Option<String>,
    abbreviation: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
struct ResourceContactRow {
    id_contact_role: Option<i64>,
    id_contact: i64,
    gdi_oid_resource: i64,
}

#[derive(Debug, Clone, FromRow)]
struct RoleRow {
    id: i64,
    name: String,
}

#[derive(Debug, Clone, FromRow)]
struct GrantRow {
    id: i64,
    role: String,
    gdi_oid_resource: i64,
    table_name: String,
    resource_name: String,
    read: Option<bool>,
    write: Option<bool>,
    priority: Option<i32>,
}

// ============================================================================
// Assembly
// ============================================================================

fn assemble_layers(
    rows: Vec<LayerRow>,
    edges: Vec<EdgeRow>,
    links: Vec<TemplateLinkRow>,
) -> Vec<Layer> {
    let mut children: HashMap<i64, Vec<ChildEdge>> = HashMap::new();
    for edge in edges {
        children
            .entry(edge.gdi_oid_group_layer)
            .or_default()
            .push(ChildEdge {
                child_id: edge.gdi_oid_sub_layer,
                active: edge.layer_active.unwrap_or(true),
                order: edge.layer_order.unwrap_or(0),
                transparency: edge.layer_transparency.unwrap_or(0),
            });
    }

    let mut templates: HashMap<i64, Vec<TemplateLinkRow>> = HashMap::new();
    for link in links {
        templates.entry(link.gdi_oid_ows_layer).or_default().push(link);
    }

    let mut layers = Vec::with_capacity(rows.len());
    for row in rows {
        let kind = match (row.gdi_oid_data_set_view, row.facade) {
            (Some(view_id), _) => {
                let mut data = DataLayer::new(view_id);
                data.qgs_style = row.qgs_style.clone();
                data.client_qgs_style = row.client_qgs_style.clone();
                for link in templates.remove(&row.gdi_oid).unwrap_or_default() {
                    match link.template_type.as_str() {
                        "info" => data.info_template = Some(link.gdi_oid_template),
                        "jasper" => data.report_template = Some(link.gdi_oid_template),
                        other => debug!("Ignoring '{}' template link of '{}'", other, row.name),
                    }
                }
                LayerKind::Data(data)
            }
            (None, Some(facade)) => {
                let mut group = GroupLayer::new(facade);
                group.children = children.remove(&row.gdi_oid).unwrap_or_default();
                group.children.sort_by_key(|edge| edge.order);
                LayerKind::Group(group)
            }
            (None, None) => {
                warn!("Layer '{}' is neither a group nor a data layer", row.name);
                continue;
            }
        };

        layers.push(Layer {
            id: row.gdi_oid,
            name: row.name,
            title: row.title,
            description: row.description,
            legend: row.legend_image.map(|data| LegendImage {
                data,
                filename: row.legend_filename,
            }),
            ows_metadata: row.ows_metadata,
            synonyms: row.synonyms,
            keywords: row.keywords,
            kind,
        });
    }
    layers
}

fn assemble_views(rows: Vec<ViewRow>, attributes: Vec<AttributeRow>) -> Vec<DataSetView> {
    let mut by_view: HashMap<i64, Vec<Attribute>> = HashMap::new();
    for row in attributes {
        by_view
            .entry(row.gdi_oid_data_set_view)
            .or_default()
            .push(Attribute {
                id: row.gdi_oid,
                name: row.name,
                alias: row.alias.filter(|alias| !alias.is_empty()),
                format: row.format.filter(|format| !format.is_empty()),
                display_field: row.displayfield.unwrap_or(false),
                order: row.attribute_order.unwrap_or(0),
            });
    }

    rows.into_iter()
        .map(|row| DataSetView {
            attributes: by_view.remove(&row.gdi_oid).unwrap_or_default(),
            id: row.gdi_oid,
            name: row.name,
            description: row.description,
            data_set_id: row.gdi_oid_data_set,
            geometry_column: row.geometry_column.filter(|column| !column.is_empty()),
            searchable: Searchable::from_code(row.searchable),
            facet: row.facet,
            filter_word: row.filter_word,
        })
        .collect()
}

impl TemplateRow {
    fn into_template(self) -> Option<Template> {
        let kind = match self.template_type.as_str() {
            "jasper" => TemplateKind::Report(ReportTemplate {
                report_filename: self.report_filename,
                default_format: self.default_format,
            }),
            "qgis" => TemplateKind::Project(ProjectTemplate {
                print_layout: self.qgs_print_layout,
                map_width: self.map_width,
                map_height: self.map_height,
                print_labels: self.print_labels,
            }),
            "info" => TemplateKind::Info(InfoTemplate {
                info_type: self
                    .info_type
                    .as_deref()
                    .and_then(InfoType::from_code)
                    .unwrap_or(InfoType::Wms),
                template: self.info_template,
                sql: self.info_sql,
                module: self.info_module,
            }),
            _ => return None,
        };
        Some(Template {
            id: self.gdi_oid,
            name: self.name,
            description: self.description,
            kind,
        })
    }
}

impl ContactRow {
    fn into_contact(self) -> Contact {
        let kind = if self.contact_type == "organisation" {
            ContactKind::Organisation {
                unit: self.unit,
                abbreviation: self.abbreviation,
            }
        } else {
            ContactKind::Person {
                function: self.function,
                email: self.email,
                phone: self.phone,
            }
        };
        Contact {
            id: self.id,
            name: self.name,
            street: self.street,
            house_no: self.house_no,
            zip: self.zip,
            city: self.city,
            country_code: self.country_code,
            organisation_id: self.id_organisation,
            kind,
        }
    }
}

impl GrantRow {
    fn into_grant(self) -> Option<Grant> {
        let Some(kind) = ResourceKind::from_table_name(&self.table_name) else {
            debug!("Ignoring grant {} on '{}' resource", self.id, self.table_name);
            return None;
        };
        Some(Grant {
            id: self.id,
            role: self.role,
            resource_id: self.gdi_oid_resource,
            kind,
            resource_name: self.resource_name,
            read: self.read.unwrap_or(true),
            write: self.write.unwrap_or(false),
            priority: self.priority.unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn layer_row(id: i64, name: &str) -> LayerRow {
        LayerRow {
            gdi_oid: id,
            name: name.into(),
            title: None,
            description: None,
            legend_image: None,
            legend_filename: None,
            ows_metadata: None,
            synonyms: None,
            keywords: None,
            facade: None,
            gdi_oid_data_set_view: None,
            qgs_style: None,
            client_qgs_style: None,
        }
    }

    #[test]
    fn layers_are_assembled_into_the_tagged_union() {
        let group = LayerRow {
            facade: Some(true),
            ..layer_row(1, "group")
        };
        let data = LayerRow {
            gdi_oid_data_set_view: Some(10),
            legend_image: Some(vec![1, 2]),
            ..layer_row(2, "data")
        };
        let orphan = layer_row(3, "orphan");
        let edges = vec![EdgeRow {
            gdi_oid_group_layer: 1,
            gdi_oid_sub_layer: 2,
            layer_active: None,
            layer_order: Some(3),
            layer_transparency: Some(20),
        }];
        let links = vec![
            TemplateLinkRow {
                gdi_oid_ows_layer: 2,
                gdi_oid_template: 7,
                template_type: "info".into(),
            },
            TemplateLinkRow {
                gdi_oid_ows_layer: 2,
                gdi_oid_template: 8,
                template_type: "jasper".into(),
            },
        ];

        let layers = assemble_layers(vec![group, data, orphan], edges, links);
        assert_eq!(layers.len(), 2);

        let group = layers[0].as_group().unwrap();
        assert!(group.facade);
        assert_eq!(
            group.children,
            vec![ChildEdge::new(2, 3).with_transparency(20)]
        );

        let data = layers[1].as_data().unwrap();
        assert_eq!(data.view_id, 10);
        assert_eq!(data.info_template, Some(7));
        assert_eq!(data.report_template, Some(8));
        assert_eq!(layers[1].legend.as_ref().map(|l| l.data.len()), Some(2));
    }

    #[test]
    fn attributes_are_attached_to_their_views() {
        let views = vec![ViewRow {
            gdi_oid: 10,
            name: "v".into(),
            description: None,
            gdi_oid_data_set: 20,
            geometry_column: Some(String::new()),
            searchable: Some(2),
            facet: Some("f".into()),
            filter_word: None,
        }];
        let attributes = vec![AttributeRow {
            gdi_oid: 11,
            gdi_oid_data_set_view: 10,
            name: "name".into(),
            alias: Some(String::new()),
            format: None,
            displayfield: Some(true),
            attribute_order: Some(1),
        }];

        let views = assemble_views(views, attributes);
        assert_eq!(views[0].searchable, Searchable::Always);
        assert_eq!(views[0].geometry_column, None);
        assert_eq!(views[0].attributes[0].alias, None);
        assert!(views[0].attributes[0].display_field);
    }

    #[test]
    fn grants_on_unknown_tables_are_dropped() {
        let row = GrantRow {
            id: 1,
            role: "public".into(),
            gdi_oid_resource: 5,
            table_name: "module".into(),
            resource_name: "m".into(),
            read: None,
            write: None,
            priority: None,
        };
        assert!(row.clone().into_grant().is_none());

        let grant = GrantRow {
            table_name: "data_set_edit".into(),
            write: Some(true),
            ..row
        }
        .into_grant()
        .unwrap();
        assert_eq!(grant.kind, ResourceKind::DataSetEdit);
        assert!(grant.write);
    }

    #[test]
    fn precache_scopes_combine() {
        let layers = PrecacheScope {
            layers: true,
            ..PrecacheScope::NONE
        };
        let grants = PrecacheScope {
            grants: true,
            ..PrecacheScope::NONE
        };
        let both = layers.union(grants);
        assert!(both.layers && both.grants && !both.maps);
        assert_eq!(PrecacheScope::NONE.union(PrecacheScope::ALL), PrecacheScope::ALL);
    }
}
