//! Errors raised while resolving references inside a `Catalog`.

use thiserror::Error;

use crate::resource::{ResourceId, ResourceKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("layer {0} not found")]
    UnknownLayer(ResourceId),

    #[error("{kind} {id} referenced by '{referrer}' not found")]
    Dangling {
        kind: ResourceKind,
        id: ResourceId,
        referrer: String,
    },

    #[error("layer cycle: '{name}' ({layer_id}) is its own ancestor via {path:?}")]
    Cycle {
        layer_id: ResourceId,
        name: String,
        path: Vec<ResourceId>,
    },
}

pub type Result<T> = std::result::Result<T, ModelError>;
