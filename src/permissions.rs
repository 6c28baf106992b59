//! `permissions.json`: one entry per role with the merged permission
//! fragments of every configured service.

use serde_json::{Map, Value};

use crate::services::{AssemblyContext, Document, ServiceAssembler};

pub const PERMISSIONS_SCHEMA_URL: &str =
    "https://github.com/qwc-services/qwc-services-core/raw/master/schemas/qwc-services-permissions.json";

/// Merges a service fragment into a role's permissions.
///
/// A list under a key that already holds a list is appended, anything else
/// is inserted or replaces the previous value.
pub fn merge_permissions(target: &mut Document, fragment: Document) {
    for (key, value) in fragment {
        match (target.get_mut(&key), value) {
            (Some(Value::Array(existing)), Value::Array(items)) => existing.extend(items),
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

/// Builds the permissions document for all roles, ordered by role name.
pub fn permissions_document(
    assemblers: &[&dyn ServiceAssembler],
    ctx: &AssemblyContext<'_>,
) -> Document {
    let roles: Vec<Value> = ctx
        .grants()
        .roles()
        .iter()
        .map(|role| {
            let mut permissions = Map::new();
            for assembler in assemblers {
                merge_permissions(&mut permissions, assembler.permissions(&role.name, ctx));
            }
            let mut entry = Map::new();
            entry.insert("role".into(), Value::from(role.name.as_str()));
            entry.insert("permissions".into(), Value::Object(permissions));
            Value::Object(entry)
        })
        .collect();

    let mut document = Map::new();
    document.insert("$schema".into(), Value::from(PERMISSIONS_SCHEMA_URL));
    document.insert("roles".into(), Value::Array(roles));
    document
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::document::DocumentService;
    use crate::services::feature_info::FeatureInfoService;
    use crate::services::fixtures::World;
    use crate::services::print::PrintService;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    fn document(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn lists_are_appended_other_values_replaced() {
        let mut target = document(json!({"wms_services": [1], "flag": true, "name": "a"}));
        merge_permissions(
            &mut target,
            document(json!({"wms_services": [2, 3], "flag": false, "name": ["b"], "new": {}})),
        );
        assert_eq!(
            Value::Object(target),
            json!({"wms_services": [1, 2, 3], "flag": false, "name": ["b"], "new": {}})
        );
    }

    #[test]
    fn roles_in_name_order_with_merged_fragments() {
        let world = World::new();
        let assemblers: [&dyn ServiceAssembler; 3] =
            [&FeatureInfoService, &PrintService, &DocumentService];
        let permissions = permissions_document(&assemblers, &world.ctx());

        assert_eq!(
            Value::Object(permissions),
            json!({
                "$schema": PERMISSIONS_SCHEMA_URL,
                "roles": [
                    {
                        "role": "editor",
                        "permissions": {
                            "wms_services": [],
                            "document_templates": ["parcel_report"],
                            "print_templates": ["A4"]
                        }
                    },
                    {
                        "role": "public",
                        "permissions": {
                            "wms_services": [],
                            "document_templates": [],
                            "print_templates": []
                        }
                    }
                ]
            })
        );
    }

    proptest! {
        #[test]
        fn merged_lists_keep_every_item(left in prop::collection::vec(0i64..100, 0..8),
                                        right in prop::collection::vec(0i64..100, 0..8)) {
            let mut target = document(json!({"items": left.clone()}));
            merge_permissions(&mut target, document(json!({"items": right.clone()})));
            let expected: Vec<i64> = left.into_iter().chain(right).collect();
            prop_assert_eq!(target["items"].clone(), json!(expected));
        }
    }
}
