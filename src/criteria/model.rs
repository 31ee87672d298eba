use std::collections::HashMap;

use crate::parser::model::{Direction, Operator};

/// A value already reduced to the handful of shapes DynamoDB itself
/// understands, independent of any SDK type (§4.C). `marshal` produces
/// these from Rust values; `expression` lowers them into
/// `aws_sdk_dynamodb::types::AttributeValue`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum WireValue {
    S(String),
    N(String),
    Bool(bool),
    B(Vec<u8>),
    Ss(Vec<String>),
    Ns(Vec<String>),
    Bs(Vec<Vec<u8>>),
    Null,
}

/// A single resolved condition against one property, with its operator's
/// arguments already marshalled to wire values. Distinct from
/// [`crate::parser::model::QueryPart`], which names the operator but not
/// yet its operands.
#[derive(Debug, Clone)]
pub struct Condition {
    pub property: &'static str,
    pub attribute: &'static str,
    pub operator: Operator,
    pub values: Vec<WireValue>,
}

/// Read consistency requested for a Query/Get/Scan (§4.C, §4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Consistency {
    #[default]
    Eventual,
    Strong,
}

/// Options that arrive from a separate annotation on the method, not from
/// parsing the method name itself (§4.C "Options"). Built with `bon`'s
/// builder derive, the same way `ListItemsRequest` is built.
#[derive(Debug, Clone, Default, bon::Builder)]
pub struct QueryOptions {
    pub consistency: Consistency,
    pub limit: Option<i32>,
    pub projection: Vec<&'static str>,
    pub raw_filter: Option<String>,
    pub filter_name_map: HashMap<String, String>,
    pub filter_value_map: HashMap<String, WireValue>,
    pub sort: Vec<(&'static str, Direction)>,
}

/// The assembled, validated input to index selection and expression
/// synthesis (§4.C `Criteria`). Produced by `criteria::build` from a
/// [`crate::parser::model::PartTree`] plus the caller's bound argument values.
#[derive(Debug, Clone)]
pub struct Criteria {
    pub entity: &'static str,
    pub conditions: Vec<Condition>,
    pub sort: Vec<(&'static str, Direction)>,
    pub options: QueryOptions,
}

impl Criteria {
    pub fn condition_properties(&self) -> std::collections::HashSet<&str> {
        self.conditions.iter().map(|c| c.property).collect()
    }

    pub fn condition_for(&self, property: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.property == property)
    }
}

/// A caller-supplied value in its natural Rust shape, before marshalling
/// tags it for the wire (§4.C). `Other` is handed to the property's
/// [`crate::metadata::ValueConverter`] rather than marshalled directly.
#[derive(Debug, Clone)]
pub enum RawValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Instant(chrono::DateTime<chrono::Utc>),
    Date(chrono::DateTime<chrono::Utc>),
    Bytes(Vec<u8>),
    Other(std::sync::Arc<dyn std::any::Any + Send + Sync>),
}

/// Argument bundle passed by the caller alongside a parsed method name:
/// one [`RawValue`] list per `QueryPart`, in declaration order. `Between`
/// and `In` consume more than one value; every other operator consumes
/// exactly one, except `IsNull`/`IsNotNull`/`True`/`False`, which consume
/// none.
pub type BoundArguments = Vec<Vec<RawValue>>;

pub type AttributeMap = HashMap<&'static str, WireValue>;
