//! Search service config: Solr facets of searchable edit datasets.

use std::collections::HashSet;

use async_trait::async_trait;
use gdi_model::{ResourceKind, Searchable, PUBLIC_ROLE};
use serde_json::{Map, Value};

use crate::database::PrecacheScope;
use crate::settings::ServiceSettings;

use super::{AssemblyContext, Document, ServiceAssembler};

pub struct SearchService;

fn facet(name: Option<&str>, filter_word: Option<&str>, default: bool) -> Value {
    let mut facet = Map::new();
    facet.insert("name".into(), name.into());
    facet.insert("filter_word".into(), filter_word.into());
    facet.insert("default".into(), Value::Bool(default));
    Value::Object(facet)
}

#[async_trait]
impl ServiceAssembler for SearchService {
    fn name(&self) -> &'static str {
        "search"
    }

    fn schema_url(&self) -> &'static str {
        "https://github.com/qwc-services/sogis-search-service/raw/master/schemas/sogis-search-service.json"
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
        let catalog = ctx.catalog();
        let mut document = self.base_document();
        document.insert("config".into(), Value::Object(service.config.clone()));

        let mut facets = vec![
            facet(Some("foreground"), Some("Karte"), true),
            facet(Some("background"), Some("Hintergrundkarte"), false),
        ];

        let granted = ctx.grants().all_resource_ids(&[ResourceKind::DataSetEdit]);
        let mut seen = HashSet::new();
        for edit in catalog.dataset_edits() {
            if !granted.contains(&edit.id) {
                continue;
            }
            let Some(view) = catalog.view(edit.view_id) else {
                ctx.log.warning(format!(
                    "Missing view {} of edit dataset '{}'",
                    edit.view_id, edit.name
                ));
                continue;
            };
            if !view.searchable.is_searchable() {
                continue;
            }
            // one entry per facet and filter word
            if seen.insert((view.facet.as_deref(), view.filter_word.as_deref())) {
                facets.push(facet(
                    view.facet.as_deref(),
                    view.filter_word.as_deref(),
                    view.searchable == Searchable::Always,
                ));
            }
        }

        let mut resources = Map::new();
        resources.insert("facets".into(), Value::Array(facets));
        document.insert("resources".into(), Value::Object(resources));
        document
    }

    fn permissions(&self, role: &str, ctx: &AssemblyContext<'_>) -> Document {
        let catalog = ctx.catalog();
        let mut facets = Vec::new();
        if role == PUBLIC_ROLE {
            facets.push(Value::from("foreground"));
            facets.push(Value::from("background"));
        }

        let permitted = ctx.grants().resource_ids(&[ResourceKind::DataSetEdit], role);
        facets.extend(
            catalog
                .dataset_edits()
                .iter()
                .filter(|edit| permitted.contains(&edit.id))
                .filter_map(|edit| catalog.view(edit.view_id))
                .filter(|view| view.searchable.is_searchable())
                .map(|view| Value::from(view.facet.clone())),
        );

        let mut permissions = Map::new();
        permissions.insert("solr_facets".into(), Value::Array(facets));
        permissions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::fixtures::{World, EDITOR};
    use gdi_model::{DataSetEdit, DataSetView};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn facets_are_deduplicated_by_filter_word() {
        let mut world = World::new();
        // a second edit on the same view adds no facet
        world.session.catalog.insert_dataset_edit(DataSetEdit {
            id: 701,
            name: "parcels_edit_2".into(),
            view_id: 300,
        });
        world.add_grant(EDITOR, 701, ResourceKind::DataSetEdit, "parcels_edit_2", false);

        let document = SearchService
            .config(&ServiceSettings::new("search"), &world.ctx())
            .await;
        assert_eq!(
            document["resources"]["facets"],
            json!([
                {"name": "foreground", "filter_word": "Karte", "default": true},
                {"name": "background", "filter_word": "Hintergrundkarte", "default": false},
                {"name": "parcels", "filter_word": "Parcel", "default": true}
            ])
        );
    }

    #[tokio::test]
    async fn one_facet_with_two_filter_words_yields_two_entries() {
        let mut world = World::new();
        for (id, filter_word, searchable) in [
            (310, "x", Searchable::Always),
            (311, "y", Searchable::OnDemand),
        ] {
            world.session.catalog.insert_view(DataSetView {
                id,
                name: format!("addresses_{}", filter_word),
                description: None,
                data_set_id: 400,
                geometry_column: None,
                searchable,
                facet: Some("addresses".into()),
                filter_word: Some(filter_word.into()),
                attributes: Vec::new(),
            });
            let name = format!("addresses_{}_edit", filter_word);
            world.session.catalog.insert_dataset_edit(DataSetEdit {
                id: id + 400,
                name: name.clone(),
                view_id: id,
            });
            world.add_grant(EDITOR, id + 400, ResourceKind::DataSetEdit, &name, false);
        }

        let document = SearchService
            .config(&ServiceSettings::new("search"), &world.ctx())
            .await;
        assert_eq!(
            document["resources"]["facets"],
            json!([
                {"name": "foreground", "filter_word": "Karte", "default": true},
                {"name": "background", "filter_word": "Hintergrundkarte", "default": false},
                {"name": "addresses", "filter_word": "x", "default": true},
                {"name": "addresses", "filter_word": "y", "default": false},
                {"name": "parcels", "filter_word": "Parcel", "default": true}
            ])
        );
    }

    #[test]
    fn public_gets_the_baseline_facets() {
        let world = World::new();
        assert_eq!(
            SearchService.permissions(PUBLIC_ROLE, &world.ctx())["solr_facets"],
            json!(["foreground", "background"])
        );
        assert_eq!(
            SearchService.permissions(EDITOR, &world.ctx())["solr_facets"],
            json!(["parcels"])
        );
    }
}
