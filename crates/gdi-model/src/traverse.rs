//! Layer tree walks over a `Catalog`.
//!
//! - structural walk: post-order visitor producing nested output
//! - flattening walk: data layers only, in edge order
//! - permission-filtered walk: bottom-up group inclusion
//!
//! Every walk tracks the ids on the current path. Re-entering an ancestor is
//! a `ModelError::Cycle` for that subtree; the subtree yields nothing and the
//! fault is reported in `Walk::faults` while siblings continue.

use std::marker::PhantomData;

use tracing::{error, warn};

use crate::catalog::Catalog;
use crate::error::ModelError;
use crate::layer::{ChildEdge, DataLayer, GroupLayer, Layer, LayerKind};
use crate::resource::ResourceId;

/// Position of a node in the walk.
#[derive(Debug, Clone, Copy, Default)]
pub struct WalkContext<'a> {
    /// Edge from the parent group; `None` at the walk root.
    pub edge: Option<&'a ChildEdge>,
    /// Set when any ancestor is a facade group.
    pub in_facade: bool,
    pub depth: usize,
}

impl WalkContext<'_> {
    pub fn active(&self) -> bool {
        self.edge.map_or(true, |edge| edge.active)
    }

    pub fn transparency(&self) -> i32 {
        self.edge.map_or(0, |edge| edge.transparency)
    }
}

/// Maps layers to service specific nodes.
///
/// Groups are visited after their children; returning `None` drops the node.
pub trait LayerVisitor {
    type Output;

    fn data(
        &mut self,
        catalog: &Catalog,
        layer: &Layer,
        data: &DataLayer,
        ctx: &WalkContext<'_>,
    ) -> Option<Self::Output>;

    fn group(
        &mut self,
        catalog: &Catalog,
        layer: &Layer,
        group: &GroupLayer,
        ctx: &WalkContext<'_>,
        children: Vec<Self::Output>,
    ) -> Option<Self::Output>;

    /// Whether the children of `group` are walked at all.
    fn descend(&self, _layer: &Layer, _group: &GroupLayer, _ctx: &WalkContext<'_>) -> bool {
        true
    }
}

/// Result of a walk plus the faults hit on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct Walk<T> {
    pub root: Option<T>,
    pub faults: Vec<ModelError>,
}

impl<T> Walk<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Walk<U> {
        Walk {
            root: self.root.map(f),
            faults: self.faults,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.faults.is_empty()
    }
}

/// Node of a permission-filtered tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilteredNode {
    pub layer_id: ResourceId,
    pub children: Vec<FilteredNode>,
}

impl FilteredNode {
    /// Ids of this node and all descendants, pre-order.
    pub fn ids(&self) -> Vec<ResourceId> {
        let mut ids = vec![self.layer_id];
        for child in &self.children {
            ids.extend(child.ids());
        }
        ids
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.layer_id == id || self.children.iter().any(|child| child.contains(id))
    }
}

impl Catalog {
    /// Structural walk from `root_id`.
    pub fn walk<V: LayerVisitor>(&self, root_id: ResourceId, visitor: &mut V) -> Walk<V::Output> {
        let mut faults = Vec::new();
        let mut path = Vec::new();
        let root = self.visit(
            root_id,
            WalkContext::default(),
            &mut path,
            visitor,
            &mut faults,
        );
        Walk { root, faults }
    }

    fn visit<'a, V: LayerVisitor>(
        &'a self,
        id: ResourceId,
        ctx: WalkContext<'a>,
        path: &mut Vec<ResourceId>,
        visitor: &mut V,
        faults: &mut Vec<ModelError>,
    ) -> Option<V::Output> {
        if path.contains(&id) {
            let name = self
                .layer(id)
                .map(|layer| layer.name.clone())
                .unwrap_or_default();
            let mut cycle = path.clone();
            cycle.push(id);
            error!(layer = %name, layer_id = id, path = ?cycle, "Layer cycle detected, skipping subtree");
            faults.push(ModelError::Cycle {
                layer_id: id,
                name,
                path: cycle,
            });
            return None;
        }

        let Some(layer) = self.layer(id) else {
            warn!(layer_id = id, "Layer not found, skipping");
            faults.push(ModelError::UnknownLayer(id));
            return None;
        };

        match &layer.kind {
            LayerKind::Data(data) => visitor.data(self, layer, data, &ctx),
            LayerKind::Group(group) => {
                let mut children = Vec::new();
                if visitor.descend(layer, group, &ctx) {
                    path.push(id);
                    for edge in &group.children {
                        let child_ctx = WalkContext {
                            edge: Some(edge),
                            in_facade: ctx.in_facade || group.facade,
                            depth: ctx.depth + 1,
                        };
                        if let Some(child) =
                            self.visit(edge.child_id, child_ctx, path, visitor, faults)
                        {
                            children.push(child);
                        }
                    }
                    path.pop();
                }
                visitor.group(self, layer, group, &ctx, children)
            }
        }
    }

    /// Flattening walk: the mapped data layers below `root_id` in edge order.
    pub fn flatten<T, F>(&self, root_id: ResourceId, map: F) -> Walk<Vec<T>>
    where
        F: FnMut(&Layer, &DataLayer, &WalkContext<'_>) -> Option<T>,
    {
        let mut visitor = Flatten {
            map,
            item: PhantomData,
        };
        let walk = self.walk(root_id, &mut visitor);
        Walk {
            root: Some(walk.root.unwrap_or_default()),
            faults: walk.faults,
        }
    }

    /// Permission-filtered walk.
    ///
    /// A data layer is kept when `permitted` accepts it, a group when at
    /// least one of its filtered children is kept.
    pub fn filter_tree<F>(&self, root_id: ResourceId, permitted: F) -> Walk<FilteredNode>
    where
        F: FnMut(&Layer, &DataLayer) -> bool,
    {
        let mut visitor = Filter { permitted };
        self.walk(root_id, &mut visitor)
    }
}

struct Flatten<F, T> {
    map: F,
    item: PhantomData<T>,
}

impl<T, F> LayerVisitor for Flatten<F, T>
where
    F: FnMut(&Layer, &DataLayer, &WalkContext<'_>) -> Option<T>,
{
    type Output = Vec<T>;

    fn data(
        &mut self,
        _catalog: &Catalog,
        layer: &Layer,
        data: &DataLayer,
        ctx: &WalkContext<'_>,
    ) -> Option<Vec<T>> {
        (self.map)(layer, data, ctx).map(|item| vec![item])
    }

    fn group(
        &mut self,
        _catalog: &Catalog,
        _layer: &Layer,
        _group: &GroupLayer,
        _ctx: &WalkContext<'_>,
        children: Vec<Vec<T>>,
    ) -> Option<Vec<T>> {
        Some(children.into_iter().flatten().collect())
    }
}

struct Filter<F> {
    permitted: F,
}

impl<F> LayerVisitor for Filter<F>
where
    F: FnMut(&Layer, &DataLayer) -> bool,
{
    type Output = FilteredNode;

    fn data(
        &mut self,
        _catalog: &Catalog,
        layer: &Layer,
        data: &DataLayer,
        _ctx: &WalkContext<'_>,
    ) -> Option<FilteredNode> {
        (self.permitted)(layer, data).then(|| FilteredNode {
            layer_id: layer.id,
            children: Vec::new(),
        })
    }

    fn group(
        &mut self,
        _catalog: &Catalog,
        layer: &Layer,
        _group: &GroupLayer,
        _ctx: &WalkContext<'_>,
        children: Vec<FilteredNode>,
    ) -> Option<FilteredNode> {
        (!children.is_empty()).then(|| FilteredNode {
            layer_id: layer.id,
            children,
        })
    }
}
