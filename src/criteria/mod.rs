pub mod marshal;
pub mod model;

pub use model::{AttributeMap, BoundArguments, Condition, Consistency, Criteria, QueryOptions, RawValue, WireValue};

use std::collections::HashSet;

use crate::error::DynaQueryError;
use crate::metadata::EntityDescriptor;
use crate::parser::model::{Operator, PartTree};
use marshal::{marshal_collection, marshal_scalar, MarshalConfig};

/// How many values `operator` consumes, or a `ParseError` for the two
/// value-arity violations spec §8 classifies as parse failures rather than
/// unsupported operators: `IN` with an empty collection, and `BETWEEN`
/// with anything but exactly two values.
fn values_needed(entity: &'static str, operator: Operator, segment_len: usize) -> Result<usize, DynaQueryError> {
    match operator {
        Operator::IsNull | Operator::IsNotNull | Operator::True | Operator::False => Ok(0),
        Operator::Between => {
            if segment_len != 2 {
                return Err(DynaQueryError::Parse {
                    method_name: entity.to_string(),
                    message: format!("BETWEEN requires exactly two values, found {segment_len}"),
                });
            }
            Ok(2)
        }
        Operator::In => {
            if segment_len == 0 {
                return Err(DynaQueryError::Parse {
                    method_name: entity.to_string(),
                    message: "IN requires at least one value".to_string(),
                });
            }
            Ok(segment_len)
        }
        _ => Ok(1),
    }
}

/// Builds a [`Criteria`] from a parsed [`PartTree`] and the caller's bound
/// arguments (§4.C). `arguments[i]` supplies the values consumed by
/// `tree.parts[i]`, in declaration order; for `IN` the caller may supply any
/// nonzero number of values.
pub fn build(
    tree: &PartTree,
    arguments: BoundArguments,
    descriptor: &EntityDescriptor,
    config: MarshalConfig,
    options: QueryOptions,
) -> Result<Criteria, DynaQueryError> {
    if arguments.len() != tree.parts.len() {
        return Err(DynaQueryError::Parse {
            method_name: descriptor.name.to_string(),
            message: format!(
                "expected {} argument groups, found {}",
                tree.parts.len(),
                arguments.len()
            ),
        });
    }

    let mut conditions = Vec::new();

    for (part, values) in tree.parts.iter().zip(arguments.into_iter()) {
        if part.ignore_case_requested {
            return Err(DynaQueryError::UnsupportedOperator {
                operation: "criteria",
                message: format!("IgnoreCase is not supported (property {:?})", part.property),
            });
        }

        if let Some(composite) = descriptor.composite_id {
            if composite.property == part.property {
                if part.operator != Operator::Eq {
                    return Err(DynaQueryError::UnsupportedOperator {
                        operation: "criteria",
                        message: "composite id only supports EQ".to_string(),
                    });
                }
                let id = match values.into_iter().next() {
                    Some(RawValue::Other(id)) => id,
                    _ => {
                        return Err(DynaQueryError::Metadata {
                            entity: descriptor.name,
                            message: "composite id property requires an Other-typed argument".to_string(),
                        })
                    }
                };
                let key = (composite.factory)();
                let id_any: &dyn std::any::Any = id.as_ref();
                conditions.push(Condition {
                    property: descriptor.partition_key.property,
                    attribute: descriptor.partition_key.attribute,
                    operator: Operator::Eq,
                    values: vec![key.hash_of(id_any)],
                });
                if let Some(sort_key) = descriptor.sort_key {
                    conditions.push(Condition {
                        property: sort_key.property,
                        attribute: sort_key.attribute,
                        operator: Operator::Eq,
                        values: vec![key.range_of(id_any)],
                    });
                }
                continue;
            }
        }

        let property = descriptor.property(part.property).ok_or_else(|| {
            DynaQueryError::Metadata {
                entity: descriptor.name,
                message: format!("property {:?} not found on descriptor", part.property),
            }
        })?;

        let needed = values_needed(descriptor.name, part.operator, values.len())?;
        if part.operator != Operator::In && part.operator != Operator::Between && values.len() != needed {
            return Err(DynaQueryError::UnsupportedOperator {
                operation: "criteria",
                message: format!(
                    "{:?} on {:?} expects {needed} value(s), found {}",
                    part.operator,
                    part.property,
                    values.len()
                ),
            });
        }

        let (resolved_operator, wire_values) = match part.operator {
            Operator::True => (Operator::Eq, vec![marshal_scalar(property, config, &RawValue::Bool(true))?]),
            Operator::False => (Operator::Eq, vec![marshal_scalar(property, config, &RawValue::Bool(false))?]),
            Operator::IsNull | Operator::IsNotNull => (part.operator, Vec::new()),
            Operator::In | Operator::Between => {
                (part.operator, marshal_collection(property, config, &values)?)
            }
            other => (other, vec![marshal_scalar(property, config, &values[0])?]),
        };

        if descriptor.is_partition_key(part.property) && resolved_operator != Operator::Eq {
            return Err(DynaQueryError::UnsupportedOperator {
                operation: "criteria",
                message: format!(
                    "partition key {:?} only supports EQ, found {resolved_operator:?}",
                    part.property
                ),
            });
        }

        conditions.push(Condition {
            property: property.property,
            attribute: property.attribute,
            operator: resolved_operator,
            values: wire_values,
        });
    }

    let mut seen_properties = HashSet::new();
    for c in &conditions {
        if !seen_properties.insert(c.property) {
            return Err(DynaQueryError::UnsupportedOperator {
                operation: "criteria",
                message: format!("property {:?} appears in more than one condition", c.property),
            });
        }
    }

    let sort = if !tree.sort.is_empty() {
        tree.sort.clone()
    } else {
        options.sort.clone()
    };
    if sort.len() > 1 {
        return Err(DynaQueryError::UnsupportedOperator {
            operation: "criteria",
            message: "sorting by more than one property is not supported".to_string(),
        });
    }

    Ok(Criteria {
        entity: descriptor.name,
        conditions,
        sort,
        options,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{EntityDescriptor, LogicalType, PropertyRef};
    use crate::parser::model::{Direction, QueryPart, Subject};
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
            ],
            attribute_name_by_property: HashMap::new(),
            converter_by_property: HashMap::new(),
            indexes_by_property: HashMap::new(),
            index_hash_key_properties: Default::default(),
            index_range_key_properties: Default::default(),
            version_property: None,
            composite_id: None,
        }
    }

    #[test]
    fn builds_eq_and_between_criteria() {
        let descriptor = order_descriptor();
        let tree = PartTree {
            subject: Subject::Find,
            parts: vec![
                QueryPart { property: "customer_id", operator: Operator::Eq, ignore_case_requested: false },
                QueryPart { property: "order_date", operator: Operator::Between, ignore_case_requested: false },
            ],
            sort: Vec::new(),
        };
        let arguments = vec![
            vec![RawValue::Str("cust-1".to_string())],
            vec![RawValue::Str("2024-01-01".to_string()), RawValue::Str("2024-02-01".to_string())],
        ];
        let criteria = build(&tree, arguments, &descriptor, MarshalConfig::default(), QueryOptions::default()).unwrap();
        assert_eq!(criteria.conditions.len(), 2);
        assert_eq!(criteria.condition_for("customer_id").unwrap().operator, Operator::Eq);
        assert_eq!(criteria.condition_for("order_date").unwrap().values.len(), 2);
    }

    #[test]
    fn rejects_ignore_case() {
        let descriptor = order_descriptor();
        let tree = PartTree {
            subject: Subject::Find,
            parts: vec![QueryPart { property: "status", operator: Operator::Eq, ignore_case_requested: true }],
            sort: Vec::new(),
        };
        let arguments = vec![vec![RawValue::Str("SHIPPED".to_string())]];
        let result = build(&tree, arguments, &descriptor, MarshalConfig::default(), QueryOptions::default());
        assert!(matches!(result, Err(DynaQueryError::UnsupportedOperator { .. })));
    }

    #[test]
    fn rejects_non_eq_on_partition_key() {
        let descriptor = order_descriptor();
        let tree = PartTree {
            subject: Subject::Find,
            parts: vec![QueryPart { property: "customer_id", operator: Operator::Contains, ignore_case_requested: false }],
            sort: Vec::new(),
        };
        let arguments = vec![vec![RawValue::Str("cust".to_string())]];
        let result = build(&tree, arguments, &descriptor, MarshalConfig::default(), QueryOptions::default());
        assert!(matches!(result, Err(DynaQueryError::UnsupportedOperator { .. })));
    }

    #[test]
    fn empty_in_is_a_parse_error() {
        let descriptor = order_descriptor();
        let tree = PartTree {
            subject: Subject::Find,
            parts: vec![QueryPart { property: "status", operator: Operator::In, ignore_case_requested: false }],
            sort: Vec::new(),
        };
        let result = build(&tree, vec![Vec::new()], &descriptor, MarshalConfig::default(), QueryOptions::default());
        assert!(matches!(result, Err(DynaQueryError::Parse { .. })));
    }

    #[test]
    fn between_with_wrong_value_count_is_a_parse_error() {
        let descriptor = order_descriptor();
        let tree = PartTree {
            subject: Subject::Find,
            parts: vec![QueryPart { property: "order_date", operator: Operator::Between, ignore_case_requested: false }],
            sort: Vec::new(),
        };
        let arguments = vec![vec![RawValue::Str("2024-01-01".to_string())]];
        let result = build(&tree, arguments, &descriptor, MarshalConfig::default(), QueryOptions::default());
        assert!(matches!(result, Err(DynaQueryError::Parse { .. })));
    }

    #[test]
    fn rejects_multiple_sort_columns() {
        let descriptor = order_descriptor();
        let tree = PartTree {
            subject: Subject::Find,
            parts: vec![QueryPart { property: "status", operator: Operator::Eq, ignore_case_requested: false }],
            sort: vec![("order_date", Direction::Asc), ("status", Direction::Desc)],
        };
        let arguments = vec![vec![RawValue::Str("SHIPPED".to_string())]];
        let result = build(&tree, arguments, &descriptor, MarshalConfig::default(), QueryOptions::default());
        assert!(matches!(result, Err(DynaQueryError::UnsupportedOperator { .. })));
    }
}
