//! Index selection (§4.D): decide whether accumulated criteria can be
//! served by a point get, a main-table query, a secondary-index query, or
//! must fall back to a full scan.

use std::collections::HashSet;

use crate::criteria::Criteria;
use crate::error::DynaQueryError;
use crate::metadata::EntityDescriptor;
use crate::parser::model::Operator;

/// The key-condition-safe operator set a sort key may use in a Query
/// without falling back to a filter expression.
const KEY_SAFE_OPERATORS: &[Operator] = &[
    Operator::Eq,
    Operator::Lt,
    Operator::Le,
    Operator::Gt,
    Operator::Ge,
    Operator::Between,
    Operator::BeginsWith,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    Get,
    QueryMain,
    QueryGsi(String),
    QueryLsi(String),
    Scan,
}

fn is_key_safe(operator: Operator) -> bool {
    KEY_SAFE_OPERATORS.contains(&operator)
}

/// Chooses an execution [`Plan`] for `criteria` against `descriptor`,
/// per the five-step decision procedure (§4.D). `scan_enabled` is the
/// caller's static permission for falling back to a full scan.
pub fn choose(
    criteria: &Criteria,
    descriptor: &EntityDescriptor,
    scan_enabled: bool,
) -> Result<Plan, DynaQueryError> {
    let partition_fixed = criteria
        .condition_for(descriptor.partition_key.property)
        .map(|c| c.operator == Operator::Eq)
        .unwrap_or(false);

    let sort_fixed = descriptor
        .sort_key
        .map(|sk| {
            criteria
                .condition_for(sk.property)
                .map(|c| c.operator == Operator::Eq)
                .unwrap_or(false)
        })
        .unwrap_or(true);

    let non_key_conditions: Vec<_> = criteria
        .conditions
        .iter()
        .filter(|c| {
            !descriptor.is_partition_key(c.property)
                && !descriptor.is_sort_key(c.property)
        })
        .collect();

    // Step 1: point get.
    if non_key_conditions.is_empty() && partition_fixed && sort_fixed {
        return Ok(Plan::Get);
    }

    // Step 2: main-table query.
    let sort_condition = descriptor
        .sort_key
        .and_then(|sk| criteria.condition_for(sk.property));
    let sort_operator_safe = sort_condition.map(|c| is_key_safe(c.operator)).unwrap_or(true);
    if partition_fixed && non_key_conditions.is_empty() && sort_operator_safe {
        return Ok(Plan::QueryMain);
    }

    // Step 3: candidate index selection. Per §3's data model, partition/sort
    // key values live outside `attributeConditions`; only the non-key
    // conditions participate in index key-set matching.
    let condition_properties: HashSet<&str> = non_key_conditions.iter().map(|c| c.property).collect();
    let needs_index_selection = !condition_properties.is_empty()
        || criteria
            .sort
            .first()
            .map(|(property, _)| descriptor.index_range_key_properties.contains(property) && partition_fixed)
            .unwrap_or(false);

    if needs_index_selection {
        let exact = descriptor.indexes_matching_exactly(&condition_properties);
        let partial = descriptor.indexes_matching_partially(&condition_properties);

        let sort_property = criteria.sort.first().map(|(p, _)| *p);
        let sort_compatible = |index: &str| -> bool {
            sort_property
                .map(|p| descriptor.range_key_of(index) == Some(p))
                .unwrap_or(true)
        };

        let sort_compatible_exact: Vec<&str> = exact.iter().copied().filter(|i| sort_compatible(i)).collect();
        let sort_compatible_partial: Vec<&str> = partial.iter().copied().filter(|i| sort_compatible(i)).collect();

        let chosen = if !sort_compatible_exact.is_empty() {
            if sort_compatible_exact.len() > 1 {
                return Err(DynaQueryError::AmbiguousIndex {
                    entity: descriptor.name,
                    candidates: sort_compatible_exact.iter().map(|s| s.to_string()).collect(),
                });
            }
            Some(sort_compatible_exact[0])
        } else if !sort_compatible_partial.is_empty() {
            // Tie-break by declaration order.
            descriptor
                .all_index_names()
                .into_iter()
                .find(|i| sort_compatible_partial.contains(i))
        } else if exact.len() == 1 {
            Some(exact[0])
        } else if exact.len() > 1 {
            return Err(DynaQueryError::AmbiguousIndex {
                entity: descriptor.name,
                candidates: exact.iter().map(|s| s.to_string()).collect(),
            });
        } else if !partial.is_empty() {
            descriptor.all_index_names().into_iter().find(|i| partial.contains(i))
        } else {
            None
        };

        if let Some(index) = chosen {
            if descriptor.is_local_index(index) {
                let index_range_key = descriptor.range_key_of(index);
                let main_sort_key = descriptor.sort_key.map(|sk| sk.property);
                let both_range_keys_conditioned = index_range_key != main_sort_key
                    && index_range_key.map(|k| criteria.condition_for(k).is_some()).unwrap_or(false)
                    && main_sort_key.map(|k| criteria.condition_for(k).is_some()).unwrap_or(false);
                if both_range_keys_conditioned {
                    return Err(DynaQueryError::UnsupportedOperator {
                        operation: "index-selection",
                        message: "cannot apply conditions on both the main table's sort key and an LSI range key in one query".to_string(),
                    });
                }
                return Ok(Plan::QueryLsi(index.to_string()));
            }
            return Ok(Plan::QueryGsi(index.to_string()));
        }

        // No single index covers every conditioned property. If at least one
        // of them is an index key property, the criteria spans more than one
        // index — a Query can only ever target one, so this is an error
        // rather than a silent Scan fallback.
        let spans_multiple_indexes = condition_properties
            .iter()
            .any(|p| descriptor.indexes_by_property.contains_key(*p));
        if spans_multiple_indexes {
            return Err(DynaQueryError::UnsupportedOperator {
                operation: "index-selection",
                message: "criteria spans more than one index with no common index covering all conditions".to_string(),
            });
        }
    }

    // Step 5: fallback.
    if !scan_enabled {
        return Err(DynaQueryError::ScanNotPermitted { operation: "index-selection" });
    }
    Ok(Plan::Scan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criteria::{Condition, QueryOptions};
    use crate::metadata::{EntityDescriptor, LogicalType, PropertyRef};
    use crate::parser::model::Direction;
    use std::collections::HashMap;

    fn order_descriptor() -> EntityDescriptor {
        EntityDescriptor {
            name: "Order",
            table_name: None,
            partition_key: PropertyRef { property: "customer_id", attribute: "customer_id", logical_type: LogicalType::String },
            sort_key: Some(PropertyRef { property: "order_date", attribute: "order_date", logical_type: LogicalType::String }),
            properties: vec![
                PropertyRef { property: "customer_id", attribute: "customer_id", logical_type: LogicalType::String },
                PropertyRef { property: "order_date", attribute: "order_date", logical_type: LogicalType::String },
                PropertyRef { property: "status", attribute: "status", logical_type: LogicalType::String },
                PropertyRef { property: "created_date", attribute: "created_date", logical_type: LogicalType::String },
                PropertyRef { property: "amount", attribute: "amount", logical_type: LogicalType::Floating },
            ],
            attribute_name_by_property: HashMap::new(),
            converter_by_property: HashMap::new(),
            indexes_by_property: HashMap::from([
                ("status", vec!["status-date-index"]),
                ("created_date", vec!["status-date-index"]),
            ]),
            index_hash_key_properties: std::collections::HashSet::from(["status"]),
            index_range_key_properties: std::collections::HashSet::from(["created_date"]),
            version_property: None,
            composite_id: None,
        }
    }

    fn eq_condition(property: &'static str, attribute: &'static str) -> Condition {
        Condition {
            property,
            attribute,
            operator: Operator::Eq,
            values: vec![crate::criteria::WireValue::S("x".to_string())],
        }
    }

    #[test]
    fn point_get_when_only_keys_fixed() {
        let descriptor = order_descriptor();
        let criteria = Criteria {
            entity: "Order",
            conditions: vec![eq_condition("customer_id", "customer_id"), eq_condition("order_date", "order_date")],
            sort: Vec::new(),
            options: QueryOptions::default(),
        };
        assert_eq!(choose(&criteria, &descriptor, false).unwrap(), Plan::Get);
    }

    #[test]
    fn main_query_when_partition_fixed_and_no_extra_conditions() {
        let descriptor = order_descriptor();
        let criteria = Criteria {
            entity: "Order",
            conditions: vec![eq_condition("customer_id", "customer_id")],
            sort: Vec::new(),
            options: QueryOptions::default(),
        };
        assert_eq!(choose(&criteria, &descriptor, false).unwrap(), Plan::QueryMain);
    }

    #[test]
    fn gsi_query_when_index_properties_conditioned() {
        let descriptor = order_descriptor();
        let criteria = Criteria {
            entity: "Order",
            conditions: vec![eq_condition("status", "status")],
            sort: vec![("created_date", Direction::Desc)],
            options: QueryOptions::default(),
        };
        assert_eq!(
            choose(&criteria, &descriptor, false).unwrap(),
            Plan::QueryGsi("status-date-index".to_string())
        );
    }

    #[test]
    fn scan_rejected_without_permission() {
        let descriptor = order_descriptor();
        let criteria = Criteria {
            entity: "Order",
            conditions: vec![eq_condition("amount", "amount")],
            sort: Vec::new(),
            options: QueryOptions::default(),
        };
        let result = choose(&criteria, &descriptor, false);
        assert!(matches!(result, Err(DynaQueryError::ScanNotPermitted { .. })));
    }

    #[test]
    fn scan_allowed_with_permission() {
        let descriptor = order_descriptor();
        let criteria = Criteria {
            entity: "Order",
            conditions: vec![eq_condition("amount", "amount")],
            sort: Vec::new(),
            options: QueryOptions::default(),
        };
        assert_eq!(choose(&criteria, &descriptor, true).unwrap(), Plan::Scan);
    }

    #[test]
    fn gsi_query_when_partition_key_also_conditioned() {
        // customer_id (main PK) and status (GSI hash key) are both
        // conditioned; the index match must be decided from status alone,
        // leaving customer_id to ride along as a filter.
        let descriptor = order_descriptor();
        let criteria = Criteria {
            entity: "Order",
            conditions: vec![eq_condition("customer_id", "customer_id"), eq_condition("status", "status")],
            sort: Vec::new(),
            options: QueryOptions::default(),
        };
        assert_eq!(
            choose(&criteria, &descriptor, false).unwrap(),
            Plan::QueryGsi("status-date-index".to_string())
        );
    }

    fn two_gsi_descriptor() -> EntityDescriptor {
        let mut descriptor = order_descriptor();
        descriptor.properties.push(PropertyRef {
            property: "region",
            attribute: "region",
            logical_type: LogicalType::String,
        });
        descriptor.indexes_by_property.insert("region", vec!["region-index"]);
        descriptor.index_hash_key_properties.insert("region");
        descriptor
    }

    #[test]
    fn spanning_two_indexes_with_no_common_index_is_unsupported() {
        let descriptor = two_gsi_descriptor();
        let criteria = Criteria {
            entity: "Order",
            conditions: vec![eq_condition("status", "status"), eq_condition("region", "region")],
            sort: Vec::new(),
            options: QueryOptions::default(),
        };
        let result = choose(&criteria, &descriptor, true);
        assert!(matches!(result, Err(DynaQueryError::UnsupportedOperator { .. })));
    }
}
