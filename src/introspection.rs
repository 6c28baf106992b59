//! Schema and geometry introspection of PostGIS data sources.
//!
//! `SpatialIntrospector` is the seam: `PgIntrospector` queries the catalogs
//! through the shared `ConnectionRegistry`, `StaticIntrospector` answers
//! from fixtures. The free functions at the bottom apply the failure policy
//! (log and continue with empty metadata).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use gdi_model::{constraints_for, ColumnInfo, FieldConstraints, TableRef};
use indexmap::IndexMap;
use sqlx::{FromRow, PgPool};
use tracing::debug;

use crate::database::{is_postgres_url, mask_database_url, ConnectionRegistry};
use crate::error::IntrospectionError;
use crate::run_log::RunLog;

/// A `geometry_columns` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeometryColumn {
    pub column: String,
    pub geometry_type: String,
    pub srid: i32,
}

/// Primary key and geometry of a table; empty when nothing was found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableMetadata {
    pub primary_key: Option<String>,
    pub geometry: Option<GeometryColumn>,
}

impl TableMetadata {
    pub fn is_empty(&self) -> bool {
        self.primary_key.is_none() && self.geometry.is_none()
    }
}

/// Bounds `[xmin, ymin, xmax, ymax]`, each `None` if the aggregate was null.
pub type ExtentBounds = [Option<f64>; 4];

#[async_trait]
pub trait SpatialIntrospector: Send + Sync {
    /// Primary key and geometry column of `table`.
    ///
    /// With a configured `geometry_column` only that column is considered,
    /// otherwise the first registered geometry column is used.
    async fn table_metadata(
        &self,
        connection: &str,
        table: &TableRef,
        geometry_column: Option<&str>,
    ) -> Result<TableMetadata, IntrospectionError>;

    async fn column_info(
        &self,
        connection: &str,
        table: &TableRef,
        column: &str,
    ) -> Result<Option<ColumnInfo>, IntrospectionError>;

    async fn extent(
        &self,
        connection: &str,
        table: &TableRef,
        geometry_column: &str,
    ) -> Result<ExtentBounds, IntrospectionError>;
}

/// Picks the configured geometry column, or the first one.
pub fn select_geometry(
    mut columns: Vec<GeometryColumn>,
    configured: Option<&str>,
) -> Option<GeometryColumn> {
    match configured {
        Some(name) => columns.into_iter().find(|column| column.column == name),
        None => {
            if columns.len() > 1 {
                debug!(
                    "{} geometry columns found, using '{}'",
                    columns.len(),
                    columns[0].column
                );
            }
            (!columns.is_empty()).then(|| columns.remove(0))
        }
    }
}

// ── PostGIS ─────────────────────────────────────────────────────────

pub struct PgIntrospector {
    registry: Arc<ConnectionRegistry>,
}

#[derive(Debug, FromRow)]
struct GeometryRow {
    f_geometry_column: String,
    srid: i32,
    geometry_type: String,
}

#[derive(Debug, FromRow)]
struct ColumnRow {
    data_type: String,
    character_maximum_length: Option<i32>,
    numeric_precision: Option<i32>,
    numeric_scale: Option<i32>,
}

#[derive(Debug, FromRow)]
struct ExtentRow {
    xmin: Option<f64>,
    ymin: Option<f64>,
    xmax: Option<f64>,
    ymax: Option<f64>,
}

impl PgIntrospector {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    fn pool(&self, connection: &str) -> Result<PgPool, IntrospectionError> {
        if !is_postgres_url(connection) {
            return Err(IntrospectionError::UnsupportedConnection(
                mask_database_url(connection),
            ));
        }
        Ok(self.registry.pool(connection)?)
    }
}

#[async_trait]
impl SpatialIntrospector for PgIntrospector {
    async fn table_metadata(
        &self,
        connection: &str,
        table: &TableRef,
        geometry_column: Option<&str>,
    ) -> Result<TableMetadata, IntrospectionError> {
        let pool = self.pool(connection)?;
        let query_failed = |source| IntrospectionError::Query {
            table: table.to_string(),
            source,
        };

        let primary_key: Option<String> = sqlx::query_scalar(
            r#"
            SELECT a.attname::text
            FROM pg_index i
                JOIN pg_attribute a ON a.attrelid = i.indrelid
                    AND a.attnum = ANY(i.indkey)
            WHERE i.indrelid = to_regclass($1) AND i.indisprimary
            ORDER BY a.attnum
            LIMIT 1
            "#,
        )
        .bind(table.quoted())
        .fetch_optional(&pool)
        .await
        .map_err(query_failed)?;

        let rows = sqlx::query_as::<_, GeometryRow>(
            r#"
            SELECT f_geometry_column::text AS f_geometry_column, srid,
                type::text AS geometry_type
            FROM geometry_columns
            WHERE f_table_schema = $1 AND f_table_name = $2
                AND ($3::text IS NULL OR f_geometry_column = $3)
            ORDER BY f_geometry_column
            "#,
        )
        .bind(&table.schema)
        .bind(&table.table)
        .bind(geometry_column)
        .fetch_all(&pool)
        .await
        .map_err(query_failed)?;

        let columns = rows
            .into_iter()
            .map(|row| GeometryColumn {
                column: row.f_geometry_column,
                geometry_type: row.geometry_type,
                srid: row.srid,
            })
            .collect();

        Ok(TableMetadata {
            primary_key,
            geometry: select_geometry(columns, geometry_column),
        })
    }

    async fn column_info(
        &self,
        connection: &str,
        table: &TableRef,
        column: &str,
    ) -> Result<Option<ColumnInfo>, IntrospectionError> {
        let pool = self.pool(connection)?;
        let row = sqlx::query_as::<_, ColumnRow>(
            r#"
            SELECT data_type::text AS data_type,
                character_maximum_length::int AS character_maximum_length,
                numeric_precision::int AS numeric_precision,
                numeric_scale::int AS numeric_scale
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2 AND column_name = $3
            ORDER BY ordinal_position
            LIMIT 1
            "#,
        )
        .bind(&table.schema)
        .bind(&table.table)
        .bind(column)
        .fetch_optional(&pool)
        .await
        .map_err(|source| IntrospectionError::Query {
            table: table.to_string(),
            source,
        })?;

        Ok(row.map(|row| ColumnInfo {
            data_type: row.data_type,
            character_maximum_length: row.character_maximum_length,
            numeric_precision: row.numeric_precision,
            numeric_scale: row.numeric_scale,
        }))
    }

    async fn extent(
        &self,
        connection: &str,
        table: &TableRef,
        geometry_column: &str,
    ) -> Result<ExtentBounds, IntrospectionError> {
        let pool = self.pool(connection)?;
        let sql = format!(
            r#"
            WITH extent AS (
                SELECT ST_Extent({geom}) AS bbox FROM {table}
            )
            SELECT ST_XMin(bbox) AS xmin, ST_YMin(bbox) AS ymin,
                ST_XMax(bbox) AS xmax, ST_YMax(bbox) AS ymax
            FROM extent
            "#,
            geom = gdi_model::dataset::quote_ident(geometry_column),
            table = table.quoted(),
        );
        let row = sqlx::query_as::<_, ExtentRow>(&sql)
            .fetch_one(&pool)
            .await
            .map_err(|source| IntrospectionError::Query {
                table: table.to_string(),
                source,
            })?;
        Ok([row.xmin, row.ymin, row.xmax, row.ymax])
    }
}

// ── Fixtures ────────────────────────────────────────────────────────

/// Introspection answers for one table.
#[derive(Debug, Clone, Default)]
pub struct TableFixture {
    pub primary_key: Option<String>,
    pub geometries: Vec<GeometryColumn>,
    pub columns: IndexMap<String, ColumnInfo>,
    pub extent: Option<[f64; 4]>,
}

impl TableFixture {
    pub fn with_primary_key(mut self, column: &str) -> Self {
        self.primary_key = Some(column.to_string());
        self
    }

    pub fn with_geometry(mut self, column: &str, geometry_type: &str, srid: i32) -> Self {
        self.geometries.push(GeometryColumn {
            column: column.to_string(),
            geometry_type: geometry_type.to_string(),
            srid,
        });
        self
    }

    pub fn with_column(mut self, name: &str, info: ColumnInfo) -> Self {
        self.columns.insert(name.to_string(), info);
        self
    }

    pub fn with_extent(mut self, extent: [f64; 4]) -> Self {
        self.extent = Some(extent);
        self
    }
}

/// Introspector answering from in-memory fixtures.
#[derive(Debug, Clone, Default)]
pub struct StaticIntrospector {
    tables: HashMap<TableRef, TableFixture>,
    unreachable: HashSet<String>,
}

impl StaticIntrospector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: TableRef, fixture: TableFixture) -> Self {
        self.tables.insert(table, fixture);
        self
    }

    /// Every query against `connection` fails.
    pub fn with_unreachable(mut self, connection: &str) -> Self {
        self.unreachable.insert(connection.to_string());
        self
    }

    fn fixture(
        &self,
        connection: &str,
        table: &TableRef,
    ) -> Result<Option<&TableFixture>, IntrospectionError> {
        if !is_postgres_url(connection) {
            return Err(IntrospectionError::UnsupportedConnection(connection.to_string()));
        }
        if self.unreachable.contains(connection) {
            return Err(IntrospectionError::Query {
                table: table.to_string(),
                source: sqlx::Error::PoolTimedOut,
            });
        }
        Ok(self.tables.get(table))
    }
}

#[async_trait]
impl SpatialIntrospector for StaticIntrospector {
    async fn table_metadata(
        &self,
        connection: &str,
        table: &TableRef,
        geometry_column: Option<&str>,
    ) -> Result<TableMetadata, IntrospectionError> {
        Ok(self
            .fixture(connection, table)?
            .map(|fixture| TableMetadata {
                primary_key: fixture.primary_key.clone(),
                geometry: select_geometry(fixture.geometries.clone(), geometry_column),
            })
            .unwrap_or_default())
    }

    async fn column_info(
        &self,
        connection: &str,
        table: &TableRef,
        column: &str,
    ) -> Result<Option<ColumnInfo>, IntrospectionError> {
        Ok(self
            .fixture(connection, table)?
            .and_then(|fixture| fixture.columns.get(column).cloned()))
    }

    async fn extent(
        &self,
        connection: &str,
        table: &TableRef,
        _geometry_column: &str,
    ) -> Result<ExtentBounds, IntrospectionError> {
        Ok(self
            .fixture(connection, table)?
            .and_then(|fixture| fixture.extent)
            .map(|extent| extent.map(Some))
            .unwrap_or([None; 4]))
    }
}

// ── Failure policy ──────────────────────────────────────────────────

/// Table metadata, or empty metadata after logging the failure.
pub async fn postgis_metadata(
    introspector: &dyn SpatialIntrospector,
    connection: &str,
    table: &TableRef,
    geometry_column: Option<&str>,
    log: &RunLog,
) -> TableMetadata {
    match introspector
        .table_metadata(connection, table, geometry_column)
        .await
    {
        Ok(metadata) => metadata,
        Err(e) => {
            log.error(format!(
                "Could not get PostGIS metadata for table '{}':\n{}",
                table, e
            ));
            TableMetadata::default()
        }
    }
}

/// Data type and edit constraints of one column.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeMetadata {
    pub data_type: String,
    pub constraints: FieldConstraints,
}

/// Column metadata, falling back to `text` without constraints.
pub async fn attribute_metadata(
    introspector: &dyn SpatialIntrospector,
    connection: &str,
    table: &TableRef,
    column: &str,
    log: &RunLog,
) -> AttributeMetadata {
    let fallback = AttributeMetadata {
        data_type: "text".to_string(),
        constraints: FieldConstraints::default(),
    };
    match introspector.column_info(connection, table, column).await {
        Ok(Some(info)) => AttributeMetadata {
            constraints: constraints_for(&info),
            data_type: info.data_type,
        },
        Ok(None) => {
            log.warning(format!(
                "Could not find data type of column '{}' of table '{}'",
                column, table
            ));
            fallback
        }
        Err(e) => {
            log.error(format!(
                "Could not get data type of column '{}' of table '{}':\n{}",
                column, table, e
            ));
            fallback
        }
    }
}
