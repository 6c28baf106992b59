//! Data service config: editable datasets and their CRUD permissions.

use async_trait::async_trait;
use gdi_model::{resolve_write_access, ResourceKind};
use serde_json::{Map, Value};

use crate::database::PrecacheScope;
use crate::introspection::{attribute_metadata, postgis_metadata};
use crate::settings::ServiceSettings;

use super::{AssemblyContext, Document, ServiceAssembler};

/// Resource kinds an edit dataset depends on.
const EDIT_KINDS: [ResourceKind; 5] = [
    ResourceKind::DataSetEdit,
    ResourceKind::DataSetView,
    ResourceKind::DataSet,
    ResourceKind::DataSource,
    ResourceKind::Attribute,
];

pub struct DataService;

#[async_trait]
impl ServiceAssembler for DataService {
    fn name(&self) -> &'static str {
        "data"
    }

    fn schema_url(&self) -> &'static str {
        "https://github.com/qwc-services/qwc-data-service/raw/master/schemas/qwc-data-service.json"
    }

    fn precache(&self) -> PrecacheScope {
        PrecacheScope {
            datasets: true,
            dataset_edits: true,
            grants: true,
            ..PrecacheScope::NONE
        }
    }

    async fn config(&self, service: &ServiceSettings, ctx: &AssemblyContext<'_>) -> Document {
        let mut document = self.base_document();
        document.insert("config".into(), Value::Object(service.config.clone()));

        let mut resources = Map::new();
        resources.insert("datasets".into(), Value::Array(datasets(ctx).await));
        document.insert("resources".into(), Value::Object(resources));
        document
    }

    fn permissions(&self, role: &str, ctx: &AssemblyContext<'_>) -> Document {
        let catalog = ctx.catalog();
        let grants = ctx.grants();
        let scope = grants.scope(&EDIT_KINDS, role);
        let writable =
            resolve_write_access(grants.prioritized_grants(ResourceKind::DataSetEdit, None, role));

        let mut datasets = Vec::new();
        for edit in catalog.dataset_edits() {
            let Some(chain) = catalog
                .view(edit.view_id)
                .and_then(|view| catalog.view_chain(view).ok())
            else {
                continue;
            };
            let required = [edit.id, chain.view.id, chain.data_set.id, chain.source.id];
            if !required.iter().all(|id| scope.in_combined(*id)) {
                continue;
            }

            let attributes: Vec<Value> = chain
                .view
                .attributes
                .iter()
                .filter(|attribute| scope.permits(attribute.id))
                .map(|attribute| Value::from(attribute.name.as_str()))
                .collect();
            let writable = writable.get(&edit.name).copied().unwrap_or(false);
            if attributes.is_empty() && !writable {
                // nothing beyond the public baseline
                continue;
            }

            let mut dataset = Map::new();
            dataset.insert("name".into(), Value::from(edit.name.as_str()));
            dataset.insert("attributes".into(), Value::Array(attributes));
            dataset.insert("writable".into(), Value::Bool(writable));
            dataset.insert("creatable".into(), Value::Bool(writable));
            dataset.insert("readable".into(), Value::Bool(true));
            dataset.insert("updatable".into(), Value::Bool(writable));
            dataset.insert("deletable".into(), Value::Bool(writable));
            datasets.push(Value::Object(dataset));
        }

        let mut permissions = Map::new();
        permissions.insert("data_datasets".into(), Value::Array(datasets));
        permissions
    }
}

async fn datasets(ctx: &AssemblyContext<'_>) -> Vec<Value> {
    let catalog = ctx.catalog();
    let mut datasets = Vec::new();

    for edit in catalog.dataset_edits() {
        let chain = match catalog
            .view(edit.view_id)
            .ok_or_else(|| gdi_model::ModelError::Dangling {
                kind: ResourceKind::DataSetView,
                id: edit.view_id,
                referrer: edit.name.clone(),
            })
            .and_then(|view| catalog.view_chain(view))
        {
            Ok(chain) => chain,
            Err(e) => {
                ctx.report_faults(&[e]);
                continue;
            }
        };

        let connection = chain.source.connection.as_str();
        let table = chain.data_set.table();
        let metadata = postgis_metadata(
            ctx.introspector,
            connection,
            &table,
            chain.view.geometry_column.as_deref(),
            ctx.log,
        )
        .await;
        if metadata.is_empty() {
            ctx.log.warning(format!(
                "No PostGIS metadata for edit dataset '{}', skipping",
                edit.name
            ));
            continue;
        }

        let mut fields = Vec::new();
        for attribute in &chain.view.attributes {
            let meta =
                attribute_metadata(ctx.introspector, connection, &table, &attribute.name, ctx.log)
                    .await;
            let mut field = Map::new();
            field.insert("name".into(), Value::from(attribute.name.as_str()));
            field.insert("data_type".into(), Value::from(meta.data_type));
            if !meta.constraints.is_empty() {
                if let Ok(constraints) = serde_json::to_value(&meta.constraints) {
                    field.insert("constraints".into(), constraints);
                }
            }
            fields.push(Value::Object(field));
        }

        let mut dataset = Map::new();
        dataset.insert("name".into(), Value::from(edit.name.as_str()));
        dataset.insert("db_url".into(), Value::from(connection));
        dataset.insert("schema".into(), Value::from(table.schema.as_str()));
        dataset.insert("table_name".into(), Value::from(table.table.as_str()));
        dataset.insert(
            "primary_key".into(),
            chain
                .data_set
                .primary_key
                .clone()
                .or(metadata.primary_key)
                .into(),
        );
        dataset.insert("fields".into(), Value::Array(fields));
        if let Some(geometry) = metadata.geometry {
            let mut geom = Map::new();
            geom.insert("geometry_column".into(), Value::from(geometry.column));
            geom.insert("geometry_type".into(), Value::from(geometry.geometry_type));
            geom.insert("srid".into(), Value::from(geometry.srid));
            dataset.insert("geometry".into(), Value::Object(geom));
        }
        datasets.push(Value::Object(dataset));
    }
    datasets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::fixtures::{World, EDITOR, GEODB};
    use gdi_model::constraints::FLOAT_PATTERN;
    use gdi_model::{DataSetEdit, PUBLIC_ROLE};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    #[tokio::test]
    async fn edit_datasets_with_fields_and_geometry() {
        let mut world = World::new();
        // no metadata for the raster view
        world.session.catalog.insert_dataset_edit(DataSetEdit {
            id: 701,
            name: "ortho_edit".into(),
            view_id: 301,
        });

        let document = DataService
            .config(&ServiceSettings::new("data"), &world.ctx())
            .await;
        assert_eq!(
            document["resources"]["datasets"],
            json!([{
                "name": "parcels_edit",
                "db_url": GEODB,
                "schema": "agi",
                "table_name": "parcels",
                "primary_key": "ogc_fid",
                "fields": [
                    {"name": "number", "data_type": "character varying"},
                    {"name": "area", "data_type": "double precision", "constraints": {"pattern": FLOAT_PATTERN}}
                ],
                "geometry": {"geometry_column": "geom", "geometry_type": "MULTIPOLYGON", "srid": 2056}
            }])
        );
    }

    #[test]
    fn editor_gets_attributes_and_write_access() {
        let world = World::new();
        assert_eq!(
            DataService.permissions(EDITOR, &world.ctx())["data_datasets"],
            json!([{
                "name": "parcels_edit",
                "attributes": ["number", "area"],
                "writable": true,
                "creatable": true,
                "readable": true,
                "updatable": true,
                "deletable": true
            }])
        );
        assert_eq!(
            DataService.permissions(PUBLIC_ROLE, &world.ctx())["data_datasets"],
            json!([])
        );
    }

    #[test]
    fn higher_priority_read_only_grant_wins() {
        let mut world = World::new();
        world.add_grant(EDITOR, 700, ResourceKind::DataSetEdit, "parcels_edit", false);
        let grants = world.session.grants.grants().to_vec();
        let roles = world.session.grants.roles().to_vec();
        let grants = grants
            .into_iter()
            .map(|mut grant| {
                if grant.resource_id == 700 && !grant.write {
                    grant.priority = 10;
                }
                grant
            })
            .collect();
        world.session.grants = gdi_model::GrantIndex::new(roles, grants);

        let permissions = DataService.permissions(EDITOR, &world.ctx());
        assert_eq!(permissions["data_datasets"][0]["writable"], json!(false));
        assert_eq!(permissions["data_datasets"][0]["attributes"], json!(["number", "area"]));
    }

    proptest! {
        #[test]
        fn crud_flags_follow_writable(write in any::<bool>(), priority in -5i32..5) {
            let mut world = World::new();
            world.add_grant(EDITOR, 700, ResourceKind::DataSetEdit, "parcels_edit", write);
            let roles = world.session.grants.roles().to_vec();
            let grants = world
                .session
                .grants
                .grants()
                .iter()
                .cloned()
                .map(|mut grant| {
                    if grant.resource_id == 700 && grant.write == write {
                        grant.priority = priority;
                    }
                    grant
                })
                .collect();
            world.session.grants = gdi_model::GrantIndex::new(roles, grants);

            let permissions = DataService.permissions(EDITOR, &world.ctx());
            let dataset = &permissions["data_datasets"][0];
            let writable = dataset["writable"].clone();
            for flag in ["creatable", "updatable", "deletable"] {
                prop_assert_eq!(&dataset[flag], &writable);
            }
            prop_assert_eq!(&dataset["readable"], &json!(true));
        }
    }
}
