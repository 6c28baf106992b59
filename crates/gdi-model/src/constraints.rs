//! Column type to edit-field constraint lookup.

use serde::{Deserialize, Serialize};

/// Permissive pattern for floating point input.
pub const FLOAT_PATTERN: &str = r"[0-9]+([\.,][0-9]+)?";

/// `information_schema.columns` facts for one column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub data_type: String,
    pub character_maximum_length: Option<i32>,
    pub numeric_precision: Option<i32>,
    pub numeric_scale: Option<i32>,
}

impl ColumnInfo {
    pub fn new(data_type: impl Into<String>) -> Self {
        Self {
            data_type: data_type.into(),
            ..Self::default()
        }
    }
}

/// Numeric bound; integers stay integers in the JSON output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Bound {
    Int(i64),
    Float(f64),
}

impl Bound {
    pub fn negated(self) -> Self {
        match self {
            Bound::Int(value) => Bound::Int(-value),
            Bound::Float(value) => Bound::Float(-value),
        }
    }
}

/// Field constraints in output key order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldConstraints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maxlength: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numeric_precision: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numeric_scale: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<Bound>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<Bound>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<Bound>,
}

impl FieldConstraints {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    fn range(min: i64, max: i64) -> Self {
        Self {
            min: Some(Bound::Int(min)),
            max: Some(Bound::Int(max)),
            ..Self::default()
        }
    }
}

/// Derives edit constraints from a column's data type.
///
/// `bigint` bounds exceed the exact integer range of JSON consumers that
/// parse numbers as doubles.
pub fn constraints_for(column: &ColumnInfo) -> FieldConstraints {
    match column.data_type.as_str() {
        "character" | "character varying" => FieldConstraints {
            maxlength: column.character_maximum_length,
            ..FieldConstraints::default()
        },
        "double precision" | "real" => FieldConstraints {
            pattern: Some(FLOAT_PATTERN.to_string()),
            ..FieldConstraints::default()
        },
        "numeric" => match column.numeric_precision {
            Some(precision) => numeric(precision, column.numeric_scale.unwrap_or(0)),
            None => FieldConstraints::default(),
        },
        "smallint" => FieldConstraints::range(i64::from(i16::MIN), i64::from(i16::MAX)),
        "integer" => FieldConstraints::range(i64::from(i32::MIN), i64::from(i32::MAX)),
        "bigint" => FieldConstraints::range(i64::MIN, i64::MAX),
        _ => FieldConstraints::default(),
    }
}

/// Range of `numeric(precision, scale)`. Bounds that do not fit the JSON
/// number types are left out.
fn numeric(precision: i32, scale: i32) -> FieldConstraints {
    let (max, step) = if scale <= 0 {
        // negative scales round to 10^-scale
        let step = 10_i64.checked_pow(scale.unsigned_abs());
        let max = step.and_then(|step| {
            10_i64
                .checked_pow(precision.max(0) as u32)
                .and_then(|limit| (limit - 1).checked_mul(step))
        });
        (max.map(Bound::Int), step.map(Bound::Int))
    } else {
        // (10^p - 1) / 10^s rounds to the nearest double of the decimal bound
        let denominator = 10_f64.powi(scale);
        let max = (10_f64.powi(precision) - 1.0) / denominator;
        let step = 1.0 / denominator;
        (
            max.is_finite().then_some(Bound::Float(max)),
            (step.is_finite() && step > 0.0).then_some(Bound::Float(step)),
        )
    };
    FieldConstraints {
        numeric_precision: Some(precision),
        numeric_scale: Some(scale),
        min: max.map(Bound::negated),
        max,
        step,
        ..FieldConstraints::default()
    }
}

/// Edit field widget type for a column data type; `text` when unknown.
pub fn edit_field_type(data_type: &str) -> &'static str {
    match data_type {
        "bigint" | "double precision" | "integer" | "numeric" | "real" | "smallint" => "number",
        "boolean" => "boolean",
        "date" | "timestamp with time zone" | "timestamp without time zone" => "date",
        _ => "text",
    }
}
