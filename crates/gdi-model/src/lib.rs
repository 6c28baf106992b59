//! gdi-model: the GDI resource graph as read from the ConfigDB
//!
//! This crate contains the pure model logic with NO database dependencies:
//! - Resource kinds and the permissionable resource record
//! - The layer tree as a tagged union of group and data layers
//! - The dataset chain (view -> dataset -> data source) and templates
//! - A request-scoped `Catalog` arena populated by bulk queries
//! - Grant indexing, exclusive grants and write-access resolution
//! - Structural, flattening and permission-filtered tree walks
//! - Column type constraints and geometry type collapsing
//!
//! Database access, introspection and document assembly live in the
//! `config-generator` crate.

pub mod catalog;
pub mod constraints;
pub mod contact;
pub mod dataset;
pub mod error;
pub mod geometry;
pub mod grants;
pub mod layer;
pub mod resource;
pub mod service;
pub mod template;
pub mod traverse;

// Re-export commonly used types
pub use catalog::{Catalog, DataChain, ParentEdge};
pub use constraints::{constraints_for, edit_field_type, Bound, ColumnInfo, FieldConstraints};
pub use contact::{Contact, ContactKind, ResourceContact};
pub use dataset::{
    parse_alias, Attribute, AttributeAlias, ConnectionKind, DataSet, DataSetView, DataSource,
    JsonAttributeAlias, Searchable, TableRef,
};
pub use error::ModelError;
pub use geometry::{edit_geometry, style_kind, EditGeometry, StyleKind};
pub use grants::{resolve_write_access, Grant, GrantIndex, PermissionScope, Role, PUBLIC_ROLE};
pub use layer::{
    opacity_255, split_values, ChildEdge, DataLayer, GroupLayer, Layer, LayerKind, LegendImage,
};
pub use resource::{GdiResource, ResourceId, ResourceKind};
pub use service::{BackgroundLayer, DataSetEdit, MapLayerRef, MapTheme, OwsService, OwsType};
pub use template::{InfoTemplate, InfoType, ProjectTemplate, ReportTemplate, Template, TemplateKind};
pub use traverse::{FilteredNode, LayerVisitor, Walk, WalkContext};
