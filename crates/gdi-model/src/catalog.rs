//! Request-scoped arena of ConfigDB entities.
//!
//! A `Catalog` is filled by a handful of bulk queries when a session opens
//! and is dropped with the session. All relationship navigation (layer ->
//! view -> dataset -> source, child -> parent edges, template links) is a
//! map lookup instead of a per-row query.

use std::collections::{HashMap, HashSet};

use crate::contact::{Contact, ResourceContact};
use crate::dataset::{DataSet, DataSetView, DataSource};
use crate::error::{ModelError, Result};
use crate::layer::{ChildEdge, DataLayer, Layer, LayerKind};
use crate::resource::{ResourceId, ResourceKind};
use crate::service::{BackgroundLayer, DataSetEdit, MapTheme, OwsService, OwsType};
use crate::template::{InfoTemplate, ProjectTemplate, ReportTemplate, Template};

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    layers: HashMap<ResourceId, Layer>,
    parents: HashMap<ResourceId, Vec<ParentEdge>>,
    views: HashMap<ResourceId, DataSetView>,
    data_sets: HashMap<ResourceId, DataSet>,
    data_sources: HashMap<ResourceId, DataSource>,
    templates: Vec<Template>,
    services: Vec<OwsService>,
    background_layers: Vec<BackgroundLayer>,
    dataset_edits: Vec<DataSetEdit>,
    maps: Vec<MapTheme>,
    contacts: HashMap<i64, Contact>,
    resource_contacts: Vec<ResourceContact>,
}

/// Edge from a group to one of its children, seen from the child.
#[derive(Debug, Clone, PartialEq)]
pub struct ParentEdge {
    pub group_id: ResourceId,
    pub edge: ChildEdge,
}

/// The resolved view -> dataset -> source chain of a data layer.
#[derive(Debug, Clone, Copy)]
pub struct DataChain<'a> {
    pub view: &'a DataSetView,
    pub data_set: &'a DataSet,
    pub source: &'a DataSource,
}

impl DataChain<'_> {
    /// Ids of view, dataset and source.
    pub fn ids(&self) -> [ResourceId; 3] {
        [self.view.id, self.data_set.id, self.source.id]
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Population ──────────────────────────────────────────────

    pub fn insert_layer(&mut self, layer: Layer) {
        if let Some(previous) = self.layers.remove(&layer.id) {
            self.unlink_children(&previous);
        }
        if let LayerKind::Group(group) = &layer.kind {
            for edge in &group.children {
                self.parents.entry(edge.child_id).or_default().push(ParentEdge {
                    group_id: layer.id,
                    edge: edge.clone(),
                });
            }
        }
        self.layers.insert(layer.id, layer);
    }

    fn unlink_children(&mut self, previous: &Layer) {
        if let LayerKind::Group(group) = &previous.kind {
            for edge in &group.children {
                if let Some(parents) = self.parents.get_mut(&edge.child_id) {
                    parents.retain(|parent| parent.group_id != previous.id);
                }
            }
        }
    }

    pub fn insert_view(&mut self, mut view: DataSetView) {
        view.attributes.sort_by_key(|attribute| attribute.order);
        self.views.insert(view.id, view);
    }

    pub fn insert_data_set(&mut self, data_set: DataSet) {
        self.data_sets.insert(data_set.id, data_set);
    }

    pub fn insert_data_source(&mut self, source: DataSource) {
        self.data_sources.insert(source.id, source);
    }

    pub fn insert_template(&mut self, template: Template) {
        insert_by_name(&mut self.templates, template, |t| (t.name.as_str(), t.id));
    }

    pub fn insert_service(&mut self, service: OwsService) {
        self.services.retain(|s| s.id != service.id);
        self.services.push(service);
    }

    pub fn insert_background_layer(&mut self, layer: BackgroundLayer) {
        insert_by_name(&mut self.background_layers, layer, |l| (l.name.as_str(), l.id));
    }

    pub fn insert_dataset_edit(&mut self, edit: DataSetEdit) {
        insert_by_name(&mut self.dataset_edits, edit, |e| (e.name.as_str(), e.id));
    }

    pub fn insert_map(&mut self, mut map: MapTheme) {
        map.layers.sort_by_key(|layer| layer.order);
        self.maps.retain(|m| m.id != map.id);
        self.maps.push(map);
    }

    pub fn insert_contact(&mut self, contact: Contact) {
        self.contacts.insert(contact.id, contact);
    }

    pub fn insert_resource_contact(&mut self, link: ResourceContact) {
        self.resource_contacts.push(link);
    }

    // ── Layers ──────────────────────────────────────────────────

    pub fn layer(&self, id: ResourceId) -> Option<&Layer> {
        self.layers.get(&id)
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// All layers ordered by name.
    pub fn layers_by_name(&self) -> Vec<&Layer> {
        let mut layers: Vec<&Layer> = self.layers.values().collect();
        layers.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        layers
    }

    pub fn parents(&self, id: ResourceId) -> &[ParentEdge] {
        self.parents.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether `ancestor_id` is reachable from `layer_id` via parent edges.
    pub fn is_descendant_of(&self, layer_id: ResourceId, ancestor_id: ResourceId) -> bool {
        let mut visited = HashSet::new();
        let mut pending = vec![layer_id];
        while let Some(id) = pending.pop() {
            for parent in self.parents(id) {
                if parent.group_id == ancestor_id {
                    return true;
                }
                if visited.insert(parent.group_id) {
                    pending.push(parent.group_id);
                }
            }
        }
        false
    }

    /// Data layers rendering a view, ordered by id.
    pub fn layers_for_view(&self, view_id: ResourceId) -> Vec<&Layer> {
        let mut layers: Vec<&Layer> = self
            .layers
            .values()
            .filter(|layer| layer.as_data().is_some_and(|data| data.view_id == view_id))
            .collect();
        layers.sort_by_key(|layer| layer.id);
        layers
    }

    // ── Dataset chain ───────────────────────────────────────────

    pub fn view(&self, id: ResourceId) -> Option<&DataSetView> {
        self.views.get(&id)
    }

    pub fn view_by_name(&self, name: &str) -> Option<&DataSetView> {
        self.views_by_name().into_iter().find(|view| view.name == name)
    }

    pub fn views_by_name(&self) -> Vec<&DataSetView> {
        let mut views: Vec<&DataSetView> = self.views.values().collect();
        views.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        views
    }

    /// Views not rendered by any layer ("basic datasets"), ordered by name.
    pub fn views_without_layers(&self) -> Vec<&DataSetView> {
        let rendered: HashSet<ResourceId> = self
            .layers
            .values()
            .filter_map(|layer| layer.as_data().map(|data| data.view_id))
            .collect();
        self.views_by_name()
            .into_iter()
            .filter(|view| !rendered.contains(&view.id))
            .collect()
    }

    pub fn data_set(&self, id: ResourceId) -> Option<&DataSet> {
        self.data_sets.get(&id)
    }

    pub fn data_source(&self, id: ResourceId) -> Option<&DataSource> {
        self.data_sources.get(&id)
    }

    /// Resolves view, dataset and source of a data layer.
    pub fn data_chain(&self, layer: &Layer, data: &DataLayer) -> Result<DataChain<'_>> {
        let view = self.view(data.view_id).ok_or_else(|| ModelError::Dangling {
            kind: ResourceKind::DataSetView,
            id: data.view_id,
            referrer: layer.name.clone(),
        })?;
        self.view_chain(view)
    }

    /// Resolves dataset and source of a view.
    pub fn view_chain<'a>(&'a self, view: &'a DataSetView) -> Result<DataChain<'a>> {
        let data_set = self
            .data_set(view.data_set_id)
            .ok_or_else(|| ModelError::Dangling {
                kind: ResourceKind::DataSet,
                id: view.data_set_id,
                referrer: view.name.clone(),
            })?;
        let source = self
            .data_source(data_set.data_source_id)
            .ok_or_else(|| ModelError::Dangling {
                kind: ResourceKind::DataSource,
                id: data_set.data_source_id,
                referrer: data_set.data_set_name.clone(),
            })?;
        Ok(DataChain {
            view,
            data_set,
            source,
        })
    }

    // ── Templates ───────────────────────────────────────────────

    /// All templates ordered by name.
    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    pub fn template(&self, id: ResourceId) -> Option<&Template> {
        self.templates.iter().find(|template| template.id == id)
    }

    pub fn project_templates(&self) -> impl Iterator<Item = (&Template, &ProjectTemplate)> {
        self.templates
            .iter()
            .filter_map(|template| template.as_project().map(|project| (template, project)))
    }

    pub fn report_templates(&self) -> impl Iterator<Item = (&Template, &ReportTemplate)> {
        self.templates
            .iter()
            .filter_map(|template| template.as_report().map(|report| (template, report)))
    }

    pub fn info_template(&self, id: ResourceId) -> Option<(&Template, &InfoTemplate)> {
        self.template(id)
            .and_then(|template| template.as_info().map(|info| (template, info)))
    }

    pub fn info_template_named(&self, name: &str) -> Option<&InfoTemplate> {
        self.templates
            .iter()
            .filter(|template| template.name == name)
            .find_map(Template::as_info)
    }

    // ── Services, maps, edits ───────────────────────────────────

    pub fn services(&self, ows_type: OwsType) -> impl Iterator<Item = &OwsService> {
        self.services
            .iter()
            .filter(move |service| service.ows_type == ows_type)
    }

    pub fn service(&self, id: ResourceId) -> Option<&OwsService> {
        self.services.iter().find(|service| service.id == id)
    }

    pub fn first_service(&self, ows_type: OwsType) -> Option<&OwsService> {
        self.services(ows_type).next()
    }

    /// Background layers ordered by name.
    pub fn background_layers(&self) -> &[BackgroundLayer] {
        &self.background_layers
    }

    pub fn background_layer(&self, id: ResourceId) -> Option<&BackgroundLayer> {
        self.background_layers.iter().find(|layer| layer.id == id)
    }

    /// Edit datasets ordered by name.
    pub fn dataset_edits(&self) -> &[DataSetEdit] {
        &self.dataset_edits
    }

    pub fn maps(&self) -> &[MapTheme] {
        &self.maps
    }

    // ── Contacts ────────────────────────────────────────────────

    pub fn contact(&self, id: i64) -> Option<&Contact> {
        self.contacts.get(&id)
    }

    /// Contacts attached to any of the resources, ordered by contact role.
    pub fn contacts_for(&self, resource_ids: &[ResourceId]) -> Vec<&Contact> {
        let mut links: Vec<&ResourceContact> = self
            .resource_contacts
            .iter()
            .filter(|link| resource_ids.contains(&link.resource_id))
            .collect();
        links.sort_by_key(|link| link.contact_role_id);
        links
            .into_iter()
            .filter_map(|link| self.contact(link.contact_id))
            .collect()
    }
}

/// Inserts into a list kept sorted by `(name, id)`, replacing the entry
/// with the same id.
fn insert_by_name<T>(items: &mut Vec<T>, item: T, key: fn(&T) -> (&str, ResourceId)) {
    let (_, id) = key(&item);
    if let Some(existing) = items.iter().position(|existing| key(existing).1 == id) {
        items.remove(existing);
    }
    let position = items.partition_point(|existing| key(existing) < key(&item));
    items.insert(position, item);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{ConnectionKind, Searchable};
    use crate::layer::GroupLayer;

    fn view(id: ResourceId, name: &str, data_set_id: ResourceId) -> DataSetView {
        DataSetView {
            id,
            name: name.into(),
            description: None,
            data_set_id,
            geometry_column: None,
            searchable: Searchable::Never,
            facet: None,
            filter_word: None,
            attributes: Vec::new(),
        }
    }

    #[test]
    fn parent_edges_follow_group_children() {
        let mut catalog = Catalog::new();
        catalog.insert_layer(Layer::group(
            1,
            "root",
            GroupLayer::new(false).with_child(ChildEdge::new(2, 1)),
        ));
        catalog.insert_layer(Layer::group(
            2,
            "g",
            GroupLayer::new(false).with_child(ChildEdge::new(3, 1)),
        ));
        catalog.insert_layer(Layer::data(3, "d", DataLayer::new(10)));

        assert_eq!(catalog.parents(3)[0].group_id, 2);
        assert!(catalog.is_descendant_of(3, 1));
        assert!(!catalog.is_descendant_of(1, 3));

        // replacing a group drops its old edges
        catalog.insert_layer(Layer::group(2, "g", GroupLayer::new(false)));
        assert!(catalog.parents(3).is_empty());
    }

    #[test]
    fn named_lists_stay_sorted_across_inserts_and_replacements() {
        let mut catalog = Catalog::new();
        for (id, name) in [(3, "roads"), (1, "parcels"), (4, "addresses"), (2, "parcels")] {
            catalog.insert_dataset_edit(DataSetEdit {
                id,
                name: name.into(),
                view_id: 10,
            });
        }
        // renaming 3 moves it to the front
        catalog.insert_dataset_edit(DataSetEdit {
            id: 3,
            name: "aerial".into(),
            view_id: 11,
        });

        let order: Vec<_> = catalog
            .dataset_edits()
            .iter()
            .map(|edit| (edit.id, edit.name.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![(4, "addresses"), (3, "aerial"), (1, "parcels"), (2, "parcels")]
        );
        assert_eq!(catalog.dataset_edits()[1].view_id, 11);
    }

    #[test]
    fn ancestry_check_terminates_on_cycles() {
        let mut catalog = Catalog::new();
        catalog.insert_layer(Layer::group(
            1,
            "a",
            GroupLayer::new(false).with_child(ChildEdge::new(2, 1)),
        ));
        catalog.insert_layer(Layer::group(
            2,
            "b",
            GroupLayer::new(false).with_child(ChildEdge::new(1, 1)),
        ));
        assert!(!catalog.is_descendant_of(1, 99));
    }

    #[test]
    fn data_chain_reports_dangling_references() {
        let mut catalog = Catalog::new();
        let layer = Layer::data(3, "d", DataLayer::new(10));
        catalog.insert_view(view(10, "v", 20));

        let err = catalog
            .data_chain(&layer, layer.as_data().unwrap())
            .unwrap_err();
        assert_eq!(
            err,
            ModelError::Dangling {
                kind: ResourceKind::DataSet,
                id: 20,
                referrer: "v".into()
            }
        );

        catalog.insert_data_set(DataSet {
            id: 20,
            data_set_name: "s.t".into(),
            primary_key: None,
            data_source_id: 30,
            description: None,
        });
        catalog.insert_data_source(DataSource {
            id: 30,
            connection: "postgresql:///?service=geo".into(),
            kind: ConnectionKind::Database,
        });
        let chain = catalog
            .data_chain(&layer, layer.as_data().unwrap())
            .unwrap();
        assert_eq!(chain.ids(), [10, 20, 30]);
    }

    #[test]
    fn basic_datasets_are_views_without_layers() {
        let mut catalog = Catalog::new();
        catalog.insert_view(view(10, "b_view", 20));
        catalog.insert_view(view(11, "a_view", 20));
        catalog.insert_layer(Layer::data(3, "d", DataLayer::new(10)));

        let names: Vec<_> = catalog
            .views_without_layers()
            .into_iter()
            .map(|v| v.name.as_str())
            .collect();
        assert_eq!(names, vec!["a_view"]);
    }
}
