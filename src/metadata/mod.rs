pub mod model;

pub use model::{
    CompositeIdSpec, CompositeKey, ConverterHandle, Entity, EntityDescriptor, LogicalType,
    PropertyRef, ValueConverter, validate,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor {
            name: "Order",
            table_name: None,
            partition_key: PropertyRef {
                property: "customer_id",
                attribute: "customer_id",
                logical_type: LogicalType::String,
            },
            sort_key: Some(PropertyRef {
                property: "order_date",
                attribute: "order_date",
                logical_type: LogicalType::String,
            }),
            properties: vec![
                PropertyRef {
                    property: "customer_id",
                    attribute: "customer_id",
                    logical_type: LogicalType::String,
                },
                PropertyRef {
                    property: "order_date",
                    attribute: "order_date",
                    logical_type: LogicalType::String,
                },
                PropertyRef {
                    property: "status",
                    attribute: "status",
                    logical_type: LogicalType::String,
                },
                PropertyRef {
                    property: "created_date",
                    attribute: "created_date",
                    logical_type: LogicalType::String,
                },
            ],
            attribute_name_by_property: HashMap::new(),
            converter_by_property: HashMap::new(),
            indexes_by_property: HashMap::from([
                ("status", vec!["status-date-index"]),
                ("created_date", vec!["status-date-index"]),
            ]),
            index_hash_key_properties: HashSet::from(["status"]),
            index_range_key_properties: HashSet::from(["created_date"]),
            version_property: None,
            composite_id: None,
        }
    }

    #[test]
    fn exact_match_finds_single_index() {
        let d = descriptor();
        let props: HashSet<&str> = HashSet::from(["status", "created_date"]);
        assert_eq!(d.indexes_matching_exactly(&props), vec!["status-date-index"]);
    }

    #[test]
    fn exact_match_empty_when_conditioned_set_is_a_strict_subset() {
        let d = descriptor();
        let props: HashSet<&str> = HashSet::from(["status"]);
        assert!(d.indexes_matching_exactly(&props).is_empty());
    }

    #[test]
    fn gsi_detection_by_partition_key_mismatch() {
        let d = descriptor();
        assert!(!d.is_local_index("status-date-index"));
    }

    #[test]
    fn validate_rejects_duplicate_attribute_in_one_index() {
        let mut d = descriptor();
        d.attribute_name_by_property
            .insert("created_date", "status");
        assert!(validate(&d).is_err());
    }

    #[test]
    fn validate_accepts_well_formed_descriptor() {
        assert!(validate(&descriptor()).is_ok());
    }
}
