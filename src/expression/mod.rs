pub mod model;

pub use model::{GetRequest, QueryRequest, ScanRequest, WireRequest};

use std::collections::HashMap;

use aws_sdk_dynamodb::types::AttributeValue;

use crate::criteria::{Condition, Criteria, WireValue};
use crate::error::DynaQueryError;
use crate::index::Plan;
use crate::metadata::EntityDescriptor;
use crate::parser::model::{Direction, Operator};

pub fn to_attribute_value(value: &WireValue) -> AttributeValue {
    match value {
        WireValue::S(s) => AttributeValue::S(s.clone()),
        WireValue::N(n) => AttributeValue::N(n.clone()),
        WireValue::Bool(b) => AttributeValue::Bool(*b),
        WireValue::B(b) => AttributeValue::B(aws_sdk_dynamodb::primitives::Blob::new(b.clone())),
        WireValue::Ss(values) => AttributeValue::Ss(values.clone()),
        WireValue::Ns(values) => AttributeValue::Ns(values.clone()),
        WireValue::Bs(values) => AttributeValue::Bs(
            values
                .iter()
                .map(|b| aws_sdk_dynamodb::primitives::Blob::new(b.clone()))
                .collect(),
        ),
        WireValue::Null => AttributeValue::Null(true),
    }
}

/// Inverse of [`to_attribute_value`], used to decode a page's
/// `last_evaluated_key` back into [`WireValue`]s for [`crate::dispatcher::page::PageKey`].
/// DynamoDB key attributes are always `S`/`N`/`B`; `M`, `L`, and `NULL`
/// never appear there, but are decoded rather than rejected so the
/// conversion stays total for any `AttributeValue` a caller hands in.
pub fn from_attribute_value(value: &AttributeValue) -> WireValue {
    match value {
        AttributeValue::S(s) => WireValue::S(s.clone()),
        AttributeValue::N(n) => WireValue::N(n.clone()),
        AttributeValue::Bool(b) => WireValue::Bool(*b),
        AttributeValue::B(b) => WireValue::B(b.clone().into_inner()),
        AttributeValue::Ss(values) => WireValue::Ss(values.clone()),
        AttributeValue::Ns(values) => WireValue::Ns(values.clone()),
        AttributeValue::Bs(values) => WireValue::Bs(values.iter().map(|b| b.clone().into_inner()).collect()),
        _ => WireValue::Null,
    }
}

/// Monotonic `#nN`/`:vN` placeholder allocation, scoped to one request
/// (§4.E "Counters" — plural: names and values each advance independently).
#[derive(Default)]
struct Placeholders {
    names: HashMap<String, String>,
    values: HashMap<String, AttributeValue>,
    next_name: u32,
    next_value: u32,
}

impl Placeholders {
    fn name(&mut self, attribute: &str) -> String {
        let placeholder = format!("#n{}", self.next_name);
        self.next_name += 1;
        self.names.insert(placeholder.clone(), attribute.to_string());
        placeholder
    }

    fn value(&mut self, value: &WireValue) -> String {
        let placeholder = format!(":v{}", self.next_value);
        self.next_value += 1;
        self.values.insert(placeholder.clone(), to_attribute_value(value));
        placeholder
    }
}

fn filter_fragment(condition: &Condition, placeholders: &mut Placeholders) -> Result<String, DynaQueryError> {
    let name = placeholders.name(condition.attribute);
    Ok(match condition.operator {
        Operator::Eq => format!("{name} = {}", placeholders.value(&condition.values[0])),
        Operator::Ne => format!("{name} <> {}", placeholders.value(&condition.values[0])),
        Operator::Lt => format!("{name} < {}", placeholders.value(&condition.values[0])),
        Operator::Le => format!("{name} <= {}", placeholders.value(&condition.values[0])),
        Operator::Gt => format!("{name} > {}", placeholders.value(&condition.values[0])),
        Operator::Ge => format!("{name} >= {}", placeholders.value(&condition.values[0])),
        Operator::Between => {
            let lo = placeholders.value(&condition.values[0]);
            let hi = placeholders.value(&condition.values[1]);
            format!("{name} BETWEEN {lo} AND {hi}")
        }
        Operator::In => {
            let values: Vec<String> = condition.values.iter().map(|v| placeholders.value(v)).collect();
            format!("{name} IN ({})", values.join(", "))
        }
        Operator::BeginsWith => format!("begins_with({name}, {})", placeholders.value(&condition.values[0])),
        Operator::Contains => format!("contains({name}, {})", placeholders.value(&condition.values[0])),
        Operator::NotContains => format!("NOT contains({name}, {})", placeholders.value(&condition.values[0])),
        Operator::IsNull => format!("attribute_not_exists({name})"),
        Operator::IsNotNull => format!("attribute_exists({name})"),
        Operator::True | Operator::False => {
            return Err(DynaQueryError::UnsupportedOperator {
                operation: "expression",
                message: "True/False must resolve to EQ before expression synthesis".to_string(),
            })
        }
    })
}

fn key_condition_fragment(condition: &Condition, placeholders: &mut Placeholders) -> Result<String, DynaQueryError> {
    match condition.operator {
        Operator::Eq | Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge | Operator::Between | Operator::BeginsWith => {
            filter_fragment(condition, placeholders)
        }
        other => Err(DynaQueryError::UnsupportedOperator {
            operation: "expression",
            message: format!("{other:?} is not a key-condition-safe operator"),
        }),
    }
}

fn merge_raw_filter(
    synthesized: Option<String>,
    criteria: &Criteria,
    placeholders: &mut Placeholders,
) -> Option<String> {
    for (name, attribute) in &criteria.options.filter_name_map {
        placeholders.names.insert(name.clone(), attribute.clone());
    }
    for (key, value) in &criteria.options.filter_value_map {
        placeholders.values.insert(key.clone(), to_attribute_value(value));
    }
    match (synthesized, &criteria.options.raw_filter) {
        (Some(s), Some(raw)) => Some(format!("({s}) AND ({raw})")),
        (Some(s), None) => Some(s),
        (None, Some(raw)) => Some(raw.clone()),
        (None, None) => None,
    }
}

fn projection_expression(criteria: &Criteria, placeholders: &mut Placeholders) -> Option<String> {
    if criteria.options.projection.is_empty() {
        return None;
    }
    Some(
        criteria
            .options
            .projection
            .iter()
            .map(|attribute| placeholders.name(attribute))
            .collect::<Vec<_>>()
            .join(", "),
    )
}

fn consistent_read(criteria: &Criteria) -> Option<bool> {
    match criteria.options.consistency {
        crate::criteria::Consistency::Strong => Some(true),
        crate::criteria::Consistency::Eventual => None,
    }
}

/// Emits a [`WireRequest`] for `plan` from already-validated `criteria`
/// (§4.E). `criteria` is consumed because its conditions are partitioned
/// between key-condition and filter roles and are not reused afterward.
pub fn synthesize(
    plan: &Plan,
    criteria: Criteria,
    descriptor: &EntityDescriptor,
) -> Result<WireRequest, DynaQueryError> {
    let table = descriptor.table_name().to_string();

    match plan {
        Plan::Get => {
            let mut key = HashMap::new();
            let pk = criteria.condition_for(descriptor.partition_key.property).ok_or_else(|| {
                DynaQueryError::UnsupportedOperator {
                    operation: "expression",
                    message: "GET requires a fixed partition key".to_string(),
                }
            })?;
            key.insert(descriptor.partition_key.attribute.to_string(), to_attribute_value(&pk.values[0]));
            if let Some(sk) = descriptor.sort_key {
                if let Some(condition) = criteria.condition_for(sk.property) {
                    key.insert(sk.attribute.to_string(), to_attribute_value(&condition.values[0]));
                }
            }
            Ok(WireRequest::Get(GetRequest { table, key }))
        }

        Plan::QueryMain | Plan::QueryGsi(_) | Plan::QueryLsi(_) => {
            if criteria.sort.len() > 1 {
                return Err(DynaQueryError::UnsupportedOperator {
                    operation: "expression",
                    message: "multiple sort columns in one request".to_string(),
                });
            }

            let index_name = match plan {
                Plan::QueryGsi(name) | Plan::QueryLsi(name) => Some(name.clone()),
                _ => None,
            };

            let hash_property = match &index_name {
                Some(name) => descriptor.hash_key_of(name).unwrap_or(descriptor.partition_key.property),
                None => descriptor.partition_key.property,
            };
            let range_property = match &index_name {
                Some(name) => descriptor.range_key_of(name),
                None => descriptor.sort_key.map(|sk| sk.property),
            };

            let mut placeholders = Placeholders::default();

            let hash_condition = criteria.condition_for(hash_property).ok_or_else(|| {
                DynaQueryError::UnsupportedOperator {
                    operation: "expression",
                    message: "query requires a fixed hash key".to_string(),
                }
            })?;
            let mut key_condition = key_condition_fragment(hash_condition, &mut placeholders)?;

            let mut consumed = vec![hash_condition.property];
            if let Some(range_property) = range_property {
                if let Some(range_condition) = criteria.condition_for(range_property) {
                    key_condition = format!(
                        "{key_condition} AND {}",
                        key_condition_fragment(range_condition, &mut placeholders)?
                    );
                    consumed.push(range_property);
                }
            }

            if let Some((sort_property, _)) = criteria.sort.first() {
                if Some(*sort_property) != range_property {
                    return Err(DynaQueryError::UnsupportedOperator {
                        operation: "expression",
                        message: "sorting is only permitted on the active sort key".to_string(),
                    });
                }
            }

            let remaining: Vec<&Condition> = criteria
                .conditions
                .iter()
                .filter(|c| !consumed.contains(&c.property))
                .collect();
            let mut synthesized_filter: Option<String> = None;
            for condition in &remaining {
                let fragment = filter_fragment(condition, &mut placeholders)?;
                synthesized_filter = Some(match synthesized_filter {
                    Some(existing) => format!("{existing} AND {fragment}"),
                    None => fragment,
                });
            }

            let select_all_projected = index_name.is_some() && criteria.options.projection.is_empty();
            let projection = projection_expression(&criteria, &mut placeholders);
            let scan_index_forward = criteria.sort.first().map(|(_, dir)| *dir == Direction::Asc);
            let consistent_read = consistent_read(&criteria);
            let limit = criteria.options.limit;
            let filter_expression = merge_raw_filter(synthesized_filter, &criteria, &mut placeholders);

            Ok(WireRequest::Query(QueryRequest {
                table,
                index_name,
                key_condition_expression: key_condition,
                filter_expression,
                expression_attribute_names: placeholders.names,
                expression_attribute_values: placeholders.values,
                projection_expression: projection,
                select_all_projected,
                scan_index_forward,
                consistent_read,
                limit,
                count_only: false,
                exclusive_start_key: None,
            }))
        }

        Plan::Scan => {
            if !criteria.sort.is_empty() {
                return Err(DynaQueryError::UnsupportedOperator {
                    operation: "expression",
                    message: "sorting is not permitted on a scan".to_string(),
                });
            }

            let mut placeholders = Placeholders::default();
            let mut synthesized_filter: Option<String> = None;
            for condition in &criteria.conditions {
                let fragment = filter_fragment(condition, &mut placeholders)?;
                synthesized_filter = Some(match synthesized_filter {
                    Some(existing) => format!("{existing} AND {fragment}"),
                    None => fragment,
                });
            }
            let filter_expression = merge_raw_filter(synthesized_filter, &criteria, &mut placeholders);
            let limit = criteria.options.limit;

            Ok(WireRequest::Scan(ScanRequest {
                table,
                index_name: None,
                filter_expression,
                expression_attribute_names: placeholders.names,
                expression_attribute_values: placeholders.values,
                limit,
                count_only: false,
                exclusive_start_key: None,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criteria::QueryOptions;
    use crate::metadata::{LogicalType, PropertyRef};
    use std::collections::HashMap as Map;

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor {
            name: "Order",
            table_name: None,
            partition_key: PropertyRef { property: "customer_id", attribute: "customer_id", logical_type: LogicalType::String },
            sort_key: Some(PropertyRef { property: "order_date", attribute: "order_date", logical_type: LogicalType::String }),
            properties: vec![
                PropertyRef { property: "customer_id", attribute: "customer_id", logical_type: LogicalType::String },
                PropertyRef { property: "order_date", attribute: "order_date", logical_type: LogicalType::String },
            ],
            attribute_name_by_property: Map::new(),
            converter_by_property: Map::new(),
            indexes_by_property: Map::new(),
            index_hash_key_properties: Default::default(),
            index_range_key_properties: Default::default(),
            version_property: None,
            composite_id: None,
        }
    }

    fn condition(property: &'static str, attribute: &'static str, operator: Operator, values: Vec<WireValue>) -> Condition {
        Condition { property, attribute, operator, values }
    }

    #[test]
    fn get_plan_produces_key_map() {
        let descriptor = descriptor();
        let criteria = Criteria {
            entity: "Order",
            conditions: vec![condition("customer_id", "customer_id", Operator::Eq, vec![WireValue::S("c1".into())])],
            sort: Vec::new(),
            options: QueryOptions::default(),
        };
        let request = synthesize(&Plan::Get, criteria, &descriptor).unwrap();
        match request {
            WireRequest::Get(get) => {
                assert_eq!(get.table, "Order");
                assert!(get.key.contains_key("customer_id"));
            }
            _ => panic!("expected Get"),
        }
    }

    #[test]
    fn main_query_between_on_sort_key() {
        let descriptor = descriptor();
        let criteria = Criteria {
            entity: "Order",
            conditions: vec![
                condition("customer_id", "customer_id", Operator::Eq, vec![WireValue::S("c1".into())]),
                condition(
                    "order_date",
                    "order_date",
                    Operator::Between,
                    vec![WireValue::S("2024-01-01".into()), WireValue::S("2024-02-01".into())],
                ),
            ],
            sort: Vec::new(),
            options: QueryOptions::default(),
        };
        let request = synthesize(&Plan::QueryMain, criteria, &descriptor).unwrap();
        match request {
            WireRequest::Query(query) => {
                assert!(query.key_condition_expression.contains("BETWEEN"));
                assert!(query.filter_expression.is_none());
            }
            _ => panic!("expected Query"),
        }
    }

    #[test]
    fn name_and_value_placeholders_count_independently() {
        let descriptor = descriptor();
        let criteria = Criteria {
            entity: "Order",
            conditions: vec![
                condition("customer_id", "customer_id", Operator::Eq, vec![WireValue::S("c1".into())]),
                condition(
                    "order_date",
                    "order_date",
                    Operator::Between,
                    vec![WireValue::S("2024-01-01".into()), WireValue::S("2024-02-01".into())],
                ),
            ],
            sort: Vec::new(),
            options: QueryOptions::default(),
        };
        let request = synthesize(&Plan::QueryMain, criteria, &descriptor).unwrap();
        match request {
            WireRequest::Query(query) => {
                assert_eq!(query.key_condition_expression, "#n0 = :v0 AND #n1 BETWEEN :v1 AND :v2");
                assert_eq!(query.expression_attribute_names.get("#n0").map(String::as_str), Some("customer_id"));
                assert_eq!(query.expression_attribute_names.get("#n1").map(String::as_str), Some("order_date"));
                assert_eq!(query.expression_attribute_values.len(), 3);
            }
            _ => panic!("expected Query"),
        }
    }

    #[test]
    fn sort_on_non_range_key_is_rejected() {
        let descriptor = descriptor();
        let criteria = Criteria {
            entity: "Order",
            conditions: vec![condition("customer_id", "customer_id", Operator::Eq, vec![WireValue::S("c1".into())])],
            sort: vec![("customer_id", Direction::Asc)],
            options: QueryOptions::default(),
        };
        let result = synthesize(&Plan::QueryMain, criteria, &descriptor);
        assert!(matches!(result, Err(DynaQueryError::UnsupportedOperator { .. })));
    }
}
