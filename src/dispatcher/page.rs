//! Opaque pagination tokens handed back to the caller (§4.F, §9 "Lazy
//! sequences ... should be restartable only if the backend's continuation
//! token is preserved"). Grounded on `persistence/model.rs::PageKey`,
//! generalized from string-only key attributes to any [`WireValue`] since
//! a composite or numeric sort key is just as valid a continuation key as
//! a string one.

use std::collections::HashMap;

use aws_sdk_dynamodb::types::AttributeValue;

use crate::criteria::WireValue;
use crate::error::DynaQueryError;
use crate::expression::{from_attribute_value, to_attribute_value};
use crate::transport::Item;

/// A backend `last_evaluated_key`, round-tripped through JSON so callers
/// can hand it back opaquely across process boundaries (an HTTP `next`
/// cursor, a CLI flag, ...).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageKey {
    attributes: HashMap<String, WireValue>,
}

impl PageKey {
    pub fn from_item(item: Item) -> Self {
        Self {
            attributes: item.iter().map(|(k, v)| (k.clone(), from_attribute_value(v))).collect(),
        }
    }

    pub fn to_item(&self) -> Item {
        self.attributes
            .iter()
            .map(|(k, v)| (k.clone(), to_attribute_value(v)))
            .collect()
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(&self.attributes).expect("WireValue map always serializes")
    }

    pub fn decode(token: &str) -> Result<Self, DynaQueryError> {
        let attributes = serde_json::from_str(token).map_err(|e| DynaQueryError::UnsupportedOperator {
            operation: "page-key",
            message: format!("malformed pagination token: {e}"),
        })?;
        Ok(Self { attributes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_its_string_encoding() {
        let mut item = Item::new();
        item.insert("customer_id".to_string(), AttributeValue::S("c1".to_string()));
        item.insert("order_date".to_string(), AttributeValue::N("20240101".to_string()));
        let key = PageKey::from_item(item);
        let decoded = PageKey::decode(&key.encode()).unwrap();
        assert_eq!(key, decoded);
    }
}
