//! Contacts attached to GDI resources.

use serde::{Deserialize, Serialize};

use crate::resource::ResourceId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: i64,
    pub name: Option<String>,
    pub street: Option<String>,
    pub house_no: Option<String>,
    pub zip: Option<String>,
    pub city: Option<String>,
    pub country_code: Option<String>,
    pub organisation_id: Option<i64>,
    pub kind: ContactKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContactKind {
    Person {
        function: Option<String>,
        email: Option<String>,
        phone: Option<String>,
    },
    Organisation {
        unit: Option<String>,
        abbreviation: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceContact {
    pub resource_id: ResourceId,
    pub contact_role_id: Option<i64>,
    pub contact_id: i64,
}
