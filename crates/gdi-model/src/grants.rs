//! Permission grants and the queries the assemblers run against them.
//!
//! - `resource_ids` / `exclusive_resource_ids` for id-set membership tests
//! - `prioritized_grants` + `resolve_write_access` for single-winner decisions
//! - `PermissionScope` bundling the sets one role evaluation needs

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::resource::{ResourceId, ResourceKind};

/// Baseline role whose grants apply to every role.
pub const PUBLIC_ROLE: &str = "public";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: i64,
    pub name: String,
}

/// One `resource_permission` row joined with its role and resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub id: i64,
    pub role: String,
    pub resource_id: ResourceId,
    pub kind: ResourceKind,
    pub resource_name: String,
    pub read: bool,
    pub write: bool,
    pub priority: i32,
}

/// All roles and grants of one session.
#[derive(Debug, Clone, Default)]
pub struct GrantIndex {
    roles: Vec<Role>,
    grants: Vec<Grant>,
}

impl GrantIndex {
    pub fn new(mut roles: Vec<Role>, grants: Vec<Grant>) -> Self {
        roles.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Self { roles, grants }
    }

    /// Roles in name order.
    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    pub fn grants(&self) -> &[Grant] {
        &self.grants
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }

    fn matching<'a: 'b, 'b>(
        &'a self,
        kinds: &'b [ResourceKind],
        role: Option<&'b str>,
    ) -> impl Iterator<Item = &'a Grant> + 'b {
        self.grants.iter().filter(move |grant| {
            kinds.contains(&grant.kind) && role.map_or(true, |role| grant.role == role)
        })
    }

    /// Ids of resources of the given kinds that `role` holds any grant on.
    pub fn resource_ids(&self, kinds: &[ResourceKind], role: &str) -> BTreeSet<ResourceId> {
        self.matching(kinds, Some(role))
            .map(|grant| grant.resource_id)
            .collect()
    }

    /// `resource_ids(role)` minus `resource_ids(public)`; for the public
    /// role itself this is its full set.
    pub fn exclusive_resource_ids(
        &self,
        kinds: &[ResourceKind],
        role: &str,
    ) -> BTreeSet<ResourceId> {
        let own = self.resource_ids(kinds, role);
        if role == PUBLIC_ROLE {
            return own;
        }
        let public = self.resource_ids(kinds, PUBLIC_ROLE);
        own.difference(&public).copied().collect()
    }

    /// Ids granted to any role.
    pub fn all_resource_ids(&self, kinds: &[ResourceKind]) -> BTreeSet<ResourceId> {
        self.matching(kinds, None)
            .map(|grant| grant.resource_id)
            .collect()
    }

    /// Grants of `role` on resources of `kind`, optionally restricted to one
    /// resource name, highest priority first. Ties are ordered by resource
    /// id, then grant id.
    pub fn prioritized_grants(
        &self,
        kind: ResourceKind,
        resource_name: Option<&str>,
        role: &str,
    ) -> Vec<&Grant> {
        let kinds = [kind];
        let mut grants: Vec<&Grant> = self
            .matching(&kinds, Some(role))
            .filter(|grant| resource_name.map_or(true, |name| grant.resource_name == name))
            .collect();
        grants.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.resource_id.cmp(&b.resource_id))
                .then(a.id.cmp(&b.id))
        });
        grants
    }

    /// Ids of resources of `kind` with a write grant from any role.
    pub fn writable_resources(&self, kind: ResourceKind) -> BTreeSet<ResourceId> {
        let kinds = [kind];
        self.matching(&kinds, None)
            .filter(|grant| grant.write)
            .map(|grant| grant.resource_id)
            .collect()
    }

    /// Membership sets for one role over the given kinds.
    pub fn scope(&self, kinds: &[ResourceKind], role: &str) -> PermissionScope {
        let public = self.resource_ids(kinds, PUBLIC_ROLE);
        let own = self.resource_ids(kinds, role);
        let granted = if role == PUBLIC_ROLE {
            own.clone()
        } else {
            own.difference(&public).copied().collect()
        };
        let combined = own.union(&public).copied().collect();
        PermissionScope {
            role: role.to_string(),
            granted,
            public,
            combined,
        }
    }
}

/// Id sets for evaluating one role.
///
/// `granted` holds what the role adds beyond the public baseline (the full
/// public set when the role is public itself), `combined` is role ∪ public.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionScope {
    pub role: String,
    pub granted: BTreeSet<ResourceId>,
    pub public: BTreeSet<ResourceId>,
    pub combined: BTreeSet<ResourceId>,
}

impl PermissionScope {
    pub fn permits(&self, id: ResourceId) -> bool {
        self.granted.contains(&id)
    }

    pub fn permits_all(&self, ids: &[ResourceId]) -> bool {
        ids.iter().all(|id| self.permits(*id))
    }

    /// Data sources may be covered by public grants alone.
    pub fn permits_source(&self, id: ResourceId) -> bool {
        self.granted.contains(&id) || self.public.contains(&id)
    }

    pub fn in_public(&self, id: ResourceId) -> bool {
        self.public.contains(&id)
    }

    pub fn in_combined(&self, id: ResourceId) -> bool {
        self.combined.contains(&id)
    }

    pub fn is_public_role(&self) -> bool {
        self.role == PUBLIC_ROLE
    }
}

/// Reduces prioritized grants to one write decision per resource name.
///
/// Expects the ordering of `GrantIndex::prioritized_grants`; the first grant
/// seen for a name wins.
pub fn resolve_write_access<'a>(
    grants: impl IntoIterator<Item = &'a Grant>,
) -> BTreeMap<String, bool> {
    let mut decisions = BTreeMap::new();
    for grant in grants {
        decisions
            .entry(grant.resource_name.clone())
            .or_insert(grant.write);
    }
    decisions
}
