//! Data source strings of QGIS map layers.

use std::path::Path;

use gdi_model::TableRef;
use indexmap::IndexMap;
use url::Url;

use crate::database::mask_database_url;
use crate::error::SynthesisError;

/// PostgreSQL connection part of a postgres provider URI.
///
/// `?service=` URLs become `service='name'`, with `aliases` mapping a
/// connection service onto the one the map server should use. Full URLs
/// become `dbname host port` plus credentials when a user is set.
pub fn db_connection(
    connection: &str,
    aliases: &IndexMap<String, String>,
) -> Result<String, SynthesisError> {
    let url = Url::parse(connection).map_err(|e| SynthesisError::Connection {
        connection: mask_database_url(connection),
        message: e.to_string(),
    })?;

    if let Some((_, service)) = url.query_pairs().find(|(key, _)| key == "service") {
        let service = aliases
            .get(service.as_ref())
            .map(String::as_str)
            .unwrap_or(service.as_ref());
        return Ok(format!("service='{}'", service));
    }

    let mut descriptor = format!(
        "dbname='{}' host={} port={}",
        url.path().trim_start_matches('/'),
        url.host_str().unwrap_or("localhost"),
        url.port().unwrap_or(5432)
    );
    if !url.username().is_empty() {
        descriptor.push_str(&format!(
            " user='{}' password='{}'",
            url.username(),
            url.password().unwrap_or_default()
        ));
    }
    Ok(descriptor)
}

/// Postgres provider data source of a vector layer.
pub fn postgres_datasource(
    db_connection: &str,
    primary_key: &str,
    srid: i32,
    geometry_type: &str,
    table: &TableRef,
    geometry_column: &str,
) -> String {
    format!(
        "{db_connection} sslmode=disable key='{primary_key}' srid={srid} type={geometry_type} \
         table=\"{schema}\".\"{table}\" ({geometry_column}) sql=",
        schema = table.schema,
        table = table.table,
    )
}

/// GDAL data source of a raster file inside a directory source.
pub fn raster_datasource(directory: &str, data_set_name: &str) -> String {
    Path::new(directory)
        .join(data_set_name)
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn service_urls_use_aliases() {
        let mut aliases = IndexMap::new();
        aliases.insert("sogis_services".to_string(), "sogis_webmapping".to_string());

        assert_eq!(
            db_connection("postgresql:///?service=sogis_services", &aliases).unwrap(),
            "service='sogis_webmapping'"
        );
        assert_eq!(
            db_connection("postgresql:///?service=geodb", &aliases).unwrap(),
            "service='geodb'"
        );
    }

    #[test]
    fn full_urls_are_spelled_out() {
        let aliases = IndexMap::new();
        assert_eq!(
            db_connection("postgresql://gis:secret@db:5433/geodata", &aliases).unwrap(),
            "dbname='geodata' host=db port=5433 user='gis' password='secret'"
        );
        assert_eq!(
            db_connection("postgresql://db/geodata", &aliases).unwrap(),
            "dbname='geodata' host=db port=5432"
        );
        assert!(db_connection("not a url", &aliases).is_err());
    }

    #[test]
    fn datasource_strings() {
        assert_eq!(
            postgres_datasource(
                "service='geodb'",
                "ogc_fid",
                2056,
                "MULTIPOLYGON",
                &TableRef::new("agi", "parcels"),
                "geom"
            ),
            r#"service='geodb' sslmode=disable key='ogc_fid' srid=2056 type=MULTIPOLYGON table="agi"."parcels" (geom) sql="#
        );
        assert_eq!(
            raster_datasource("/data/raster/", "ortho.tif"),
            "/data/raster/ortho.tif"
        );
        assert_eq!(raster_datasource("/data/raster", "ortho.tif"), "/data/raster/ortho.tif");
    }
}
