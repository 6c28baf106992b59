//! The data description chain: `DataSetView` -> `DataSet` -> `DataSource`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::resource::ResourceId;

/// Schema assumed for data set names without a schema prefix.
pub const DEFAULT_SCHEMA: &str = "public";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSetView {
    pub id: ResourceId,
    pub name: String,
    pub description: Option<String>,
    pub data_set_id: ResourceId,
    /// Geometry column to use when the table has more than one.
    pub geometry_column: Option<String>,
    pub searchable: Searchable,
    pub facet: Option<String>,
    pub filter_word: Option<String>,
    /// Attributes in their configured order.
    pub attributes: Vec<Attribute>,
}

/// `data_set_view.searchable`: 0 never, 1 on demand, 2 always.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Searchable {
    #[default]
    Never,
    OnDemand,
    Always,
}

impl Searchable {
    pub fn from_code(code: Option<i32>) -> Self {
        match code {
            None | Some(0) => Searchable::Never,
            Some(2) => Searchable::Always,
            Some(_) => Searchable::OnDemand,
        }
    }

    pub fn is_searchable(self) -> bool {
        self != Searchable::Never
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub id: ResourceId,
    pub name: String,
    /// Plain alias or a JSON document `{"alias": .., "json_attrs": [..]}`.
    pub alias: Option<String>,
    pub format: Option<String>,
    pub display_field: bool,
    pub order: i32,
}

impl Attribute {
    pub fn new(id: ResourceId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            alias: None,
            format: None,
            display_field: false,
            order: 0,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn display_field(mut self) -> Self {
        self.display_field = true;
        self
    }
}

/// Alias of an attribute after unwrapping one level of JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeAlias {
    pub alias: Option<String>,
    pub json_attrs: Vec<JsonAttributeAlias>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonAttributeAlias {
    pub name: Option<String>,
    pub alias: Option<String>,
}

#[derive(Deserialize)]
struct AliasDocument {
    alias: Option<String>,
    #[serde(default)]
    json_attrs: Vec<JsonAttributeAlias>,
}

/// Parses an alias column value.
///
/// Values starting with `{` are JSON documents carrying the alias plus
/// per-key aliases of a JSON valued attribute; everything else is taken
/// verbatim.
pub fn parse_alias(raw: &str) -> Result<AttributeAlias, serde_json::Error> {
    if !raw.starts_with('{') {
        return Ok(AttributeAlias {
            alias: Some(raw.to_string()),
            json_attrs: Vec::new(),
        });
    }
    let doc: AliasDocument = serde_json::from_str(raw)?;
    Ok(AttributeAlias {
        alias: doc.alias,
        json_attrs: doc.json_attrs,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSet {
    pub id: ResourceId,
    /// `<schema>.<table>` for database sources, a file name for directories.
    pub data_set_name: String,
    /// Explicit primary key, required for views.
    pub primary_key: Option<String>,
    pub data_source_id: ResourceId,
    pub description: Option<String>,
}

impl DataSet {
    pub fn table(&self) -> TableRef {
        TableRef::parse(&self.data_set_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSource {
    pub id: ResourceId,
    pub connection: String,
    pub kind: ConnectionKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionKind {
    Database,
    Directory,
    Other(String),
}

impl ConnectionKind {
    pub fn from_code(code: &str) -> Self {
        match code {
            "database" => ConnectionKind::Database,
            "directory" => ConnectionKind::Directory,
            other => ConnectionKind::Other(other.to_string()),
        }
    }

    pub fn is_database(&self) -> bool {
        matches!(self, ConnectionKind::Database)
    }
}

/// Schema qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub table: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Splits `schema.table`, defaulting to the `public` schema.
    pub fn parse(data_set_name: &str) -> Self {
        match data_set_name.split_once('.') {
            Some((schema, table)) => Self::new(schema, table.split('.').next().unwrap_or(table)),
            None => Self::new(DEFAULT_SCHEMA, data_set_name),
        }
    }

    /// `"schema"."table"` with embedded quotes doubled.
    pub fn quoted(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Quotes a PostgreSQL identifier.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Feature info style alias: JSON alias or the attribute name when empty.
pub fn display_alias(attribute: &Attribute, parsed: &AttributeAlias) -> String {
    parsed
        .alias
        .clone()
        .filter(|alias| !alias.is_empty())
        .unwrap_or_else(|| attribute.name.clone())
}

/// Best effort JSON value of an optional string column.
pub fn json_or_null(raw: Option<&str>) -> Value {
    raw.and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn table_ref_defaults_to_public_schema() {
        assert_eq!(TableRef::parse("roads"), TableRef::new("public", "roads"));
        assert_eq!(
            TableRef::parse("agi.roads"),
            TableRef::new("agi", "roads")
        );
        assert_eq!(TableRef::parse("agi.roads").to_string(), "agi.roads");
    }

    #[test]
    fn quoted_table_escapes_quotes() {
        assert_eq!(
            TableRef::new("a\"b", "c").quoted(),
            "\"a\"\"b\".\"c\""
        );
    }

    #[test]
    fn plain_alias_is_taken_verbatim() {
        let alias = parse_alias("Strasse").unwrap();
        assert_eq!(alias.alias.as_deref(), Some("Strasse"));
        assert!(alias.json_attrs.is_empty());
    }

    #[test]
    fn json_alias_unwraps_one_level() {
        let alias = parse_alias(
            r#"{"alias": "Details", "json_attrs": [{"name": "a", "alias": "A"}, {"name": "b"}]}"#,
        )
        .unwrap();
        assert_eq!(alias.alias.as_deref(), Some("Details"));
        assert_eq!(alias.json_attrs.len(), 2);
        assert_eq!(alias.json_attrs[1].alias, None);
    }

    #[test]
    fn broken_json_alias_is_an_error() {
        assert!(parse_alias("{alias").is_err());
    }

    #[test]
    fn searchable_codes() {
        assert_eq!(Searchable::from_code(None), Searchable::Never);
        assert_eq!(Searchable::from_code(Some(1)), Searchable::OnDemand);
        assert_eq!(Searchable::from_code(Some(2)), Searchable::Always);
        assert!(!Searchable::Never.is_searchable());
    }
}
