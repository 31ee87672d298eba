//! An in-process fake [`Transport`] (§8 "driven against
//! `dynaquery::testing::InMemoryTransport`"), standing in for the real AWS
//! transport so the query-derivation pipeline's end-to-end behavior can be
//! exercised without network access. Follows the same `#[cfg(test)] mod
//! tests` pattern of calling `Repository::new().await` against a live-ish
//! facade; this fake interprets the exact subset of key-condition/filter-
//! expression grammar `expression::synthesize` emits.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;

use crate::error::TransportError;
use crate::expression::model::{QueryRequest, ScanRequest};
use crate::transport::{
    BatchGetRequest, BatchGetResult, BatchWriteRequest, BatchWriteResult, ConditionSpec, Item, Page, Transport,
};

/// A single DynamoDB-like table: an unordered bag of items. Real tables
/// are sorted within a partition by sort key; this fake sorts on read
/// instead of on write, which is observably the same for every operation
/// the pipeline performs (it never relies on insertion order).
#[derive(Default)]
struct FakeTable {
    items: Vec<Item>,
}

/// An in-memory stand-in for `aws_sdk_dynamodb::Client`. One instance is
/// one "account": tables are created on first use, keyed by name.
#[derive(Default)]
pub struct InMemoryTransport {
    tables: Mutex<HashMap<String, FakeTable>>,
    /// When `Some(n)`, the next `n` `batch_write_item` items (across all
    /// calls) are reported as unprocessed instead of written, simulating
    /// DynamoDB's partial-batch-failure behavior for retry tests.
    unprocessed_budget: Mutex<usize>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the next `n` batch-write items to come back unprocessed,
    /// one call's worth at a time, draining the budget as calls are made —
    /// used to reproduce scenario 6 (10 unprocessed, then 3, then 0).
    pub fn fail_next_unprocessed(&self, n: usize) {
        *self.unprocessed_budget.lock().unwrap() = n;
    }

    pub fn seed(&self, table: &str, item: Item) {
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .items
            .push(item);
    }

    pub fn all_items(&self, table: &str) -> Vec<Item> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map(|t| t.items.clone())
            .unwrap_or_default()
    }
}

fn resolve_name<'a>(token: &str, names: &'a HashMap<String, String>) -> &'a str {
    names.get(token).map(String::as_str).unwrap_or(token)
}

fn resolve_value<'a>(token: &str, values: &'a HashMap<String, AttributeValue>) -> Option<&'a AttributeValue> {
    values.get(token)
}

fn attribute_value_string(value: &AttributeValue) -> Option<&str> {
    value.as_s().ok().map(String::as_str)
}

fn attribute_value_number(value: &AttributeValue) -> Option<f64> {
    value.as_n().ok().and_then(|n| n.parse().ok())
}

fn compare(item_value: &AttributeValue, op: &str, rhs: &AttributeValue) -> bool {
    if let (Some(a), Some(b)) = (attribute_value_number(item_value), attribute_value_number(rhs)) {
        return match op {
            "=" => a == b,
            "<>" => a != b,
            "<" => a < b,
            "<=" => a <= b,
            ">" => a > b,
            ">=" => a >= b,
            _ => false,
        };
    }
    if let (Some(a), Some(b)) = (attribute_value_string(item_value), attribute_value_string(rhs)) {
        return match op {
            "=" => a == b,
            "<>" => a != b,
            "<" => a < b,
            "<=" => a <= b,
            ">" => a > b,
            ">=" => a >= b,
            _ => false,
        };
    }
    false
}

/// Evaluates one AND-joined boolean fragment of the grammar
/// `expression::synthesize` emits (§4.E's filter-fragment table) against
/// `item`. Good enough to drive this crate's own tests; not a general
/// DynamoDB expression evaluator.
fn eval_fragment(fragment: &str, item: &Item, names: &HashMap<String, String>, values: &HashMap<String, AttributeValue>) -> bool {
    let fragment = fragment.trim();

    if let Some(rest) = fragment.strip_prefix("attribute_not_exists(").and_then(|r| r.strip_suffix(')')) {
        let attribute = resolve_name(rest.trim(), names);
        return !item.contains_key(attribute);
    }
    if let Some(rest) = fragment.strip_prefix("attribute_exists(").and_then(|r| r.strip_suffix(')')) {
        let attribute = resolve_name(rest.trim(), names);
        return item.contains_key(attribute);
    }
    if let Some(rest) = fragment.strip_prefix("NOT contains(").and_then(|r| r.strip_suffix(')')) {
        return !eval_contains(rest, item, names, values);
    }
    if let Some(rest) = fragment.strip_prefix("contains(").and_then(|r| r.strip_suffix(')')) {
        return eval_contains(rest, item, names, values);
    }
    if let Some(rest) = fragment.strip_prefix("begins_with(").and_then(|r| r.strip_suffix(')')) {
        let mut parts = rest.splitn(2, ',');
        let attribute = resolve_name(parts.next().unwrap_or_default().trim(), names);
        let value_token = parts.next().unwrap_or_default().trim();
        let prefix = resolve_value(value_token, values).and_then(attribute_value_string).unwrap_or_default();
        return item
            .get(attribute)
            .and_then(attribute_value_string)
            .map(|s| s.starts_with(prefix))
            .unwrap_or(false);
    }
    if fragment.contains(" BETWEEN ") {
        let mut head = fragment.splitn(2, " BETWEEN ");
        let attribute = resolve_name(head.next().unwrap_or_default().trim(), names);
        let bounds = head.next().unwrap_or_default();
        let mut bounds = bounds.splitn(2, " AND ");
        let lo = resolve_value(bounds.next().unwrap_or_default().trim(), values);
        let hi = resolve_value(bounds.next().unwrap_or_default().trim(), values);
        return match (item.get(attribute), lo, hi) {
            (Some(v), Some(lo), Some(hi)) => compare(v, ">=", lo) && compare(v, "<=", hi),
            _ => false,
        };
    }
    if fragment.contains(" IN (") {
        let mut head = fragment.splitn(2, " IN (");
        let attribute = resolve_name(head.next().unwrap_or_default().trim(), names);
        let list = head.next().unwrap_or_default().trim_end_matches(')');
        return match item.get(attribute) {
            Some(v) => list.split(',').any(|token| {
                resolve_value(token.trim(), values).map(|rhs| compare(v, "=", rhs)).unwrap_or(false)
            }),
            None => false,
        };
    }
    for op in ["<>", "<=", ">=", "=", "<", ">"] {
        if let Some(pos) = fragment.find(op) {
            let attribute = resolve_name(fragment[..pos].trim(), names);
            let value_token = fragment[pos + op.len()..].trim();
            let rhs = resolve_value(value_token, values);
            return match (item.get(attribute), rhs) {
                (Some(v), Some(rhs)) => compare(v, op, rhs),
                _ => false,
            };
        }
    }
    false
}

fn eval_contains(rest: &str, item: &Item, names: &HashMap<String, String>, values: &HashMap<String, AttributeValue>) -> bool {
    let mut parts = rest.splitn(2, ',');
    let attribute = resolve_name(parts.next().unwrap_or_default().trim(), names);
    let value_token = parts.next().unwrap_or_default().trim();
    let needle = resolve_value(value_token, values).and_then(attribute_value_string).unwrap_or_default();
    item.get(attribute)
        .and_then(attribute_value_string)
        .map(|s| s.contains(needle))
        .unwrap_or(false)
}

fn eval_expression(expression: &str, item: &Item, names: &HashMap<String, String>, values: &HashMap<String, AttributeValue>) -> bool {
    split_top_level_and(expression)
        .iter()
        .all(|fragment| eval_fragment(fragment, item, names, values))
}

/// Splits on top-level `" AND "` only — the grammar this module evaluates
/// never nests parentheses inside a single fragment except for function
/// calls, which don't themselves contain the literal word `AND`.
fn split_top_level_and(expression: &str) -> Vec<&str> {
    let mut depth = 0i32;
    let mut parts = Vec::new();
    let mut start = 0usize;
    let bytes = expression.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => depth -= 1,
            _ => {}
        }
        if depth == 0 && expression[i..].starts_with(" AND ") {
            parts.push(expression[start..i].trim());
            i += 5;
            start = i;
            continue;
        }
        i += 1;
    }
    parts.push(expression[start..].trim());
    parts
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn get_item(&self, table: &str, key: Item, _consistent_read: bool) -> Result<Option<Item>, TransportError> {
        let tables = self.tables.lock().unwrap();
        let found = tables.get(table).and_then(|t| {
            t.items
                .iter()
                .find(|item| key.iter().all(|(k, v)| item.get(k) == Some(v)))
                .cloned()
        });
        Ok(found)
    }

    async fn put_item(&self, table: &str, item: Item, condition: Option<ConditionSpec>) -> Result<(), TransportError> {
        let mut tables = self.tables.lock().unwrap();
        let fake_table = tables.entry(table.to_string()).or_default();
        let existing_index = fake_table.items.iter().position(|existing| is_same_key(existing, &item));

        if let Some(condition) = &condition {
            let satisfied = match existing_index {
                Some(idx) => eval_expression(
                    &condition.expression,
                    &fake_table.items[idx],
                    &condition.expression_attribute_names,
                    &condition.expression_attribute_values,
                ),
                None => condition.expression.contains("attribute_not_exists"),
            };
            if !satisfied {
                return Err(TransportError::ConditionFailed { operation: "put_item" });
            }
        }

        match existing_index {
            Some(idx) => fake_table.items[idx] = item,
            None => fake_table.items.push(item),
        }
        Ok(())
    }

    async fn delete_item(&self, table: &str, key: Item, condition: Option<ConditionSpec>) -> Result<(), TransportError> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(fake_table) = tables.get_mut(table) {
            if let Some(condition) = &condition {
                let target = fake_table.items.iter().find(|item| key.iter().all(|(k, v)| item.get(k) == Some(v)));
                let satisfied = target
                    .map(|item| eval_expression(&condition.expression, item, &condition.expression_attribute_names, &condition.expression_attribute_values))
                    .unwrap_or(false);
                if !satisfied {
                    return Err(TransportError::ConditionFailed { operation: "delete_item" });
                }
            }
            fake_table.items.retain(|item| !key.iter().all(|(k, v)| item.get(k) == Some(v)));
        }
        Ok(())
    }

    async fn query(&self, request: QueryRequest) -> Result<Page, TransportError> {
        let tables = self.tables.lock().unwrap();
        let mut items: Vec<Item> = tables
            .get(&request.table)
            .map(|t| t.items.clone())
            .unwrap_or_default()
            .into_iter()
            .filter(|item| {
                eval_expression(
                    &request.key_condition_expression,
                    item,
                    &request.expression_attribute_names,
                    &request.expression_attribute_values,
                )
            })
            .collect();

        if let Some(filter) = &request.filter_expression {
            items.retain(|item| eval_expression(filter, item, &request.expression_attribute_names, &request.expression_attribute_values));
        }

        if request.scan_index_forward == Some(false) {
            items.reverse();
        }
        if let Some(limit) = request.limit {
            items.truncate(limit as usize);
        }

        let count = items.len() as i32;
        Ok(Page {
            items: if request.count_only { Vec::new() } else { items },
            count,
            last_evaluated_key: None,
        })
    }

    async fn scan(&self, request: ScanRequest) -> Result<Page, TransportError> {
        let tables = self.tables.lock().unwrap();
        let mut items: Vec<Item> = tables.get(&request.table).map(|t| t.items.clone()).unwrap_or_default();

        if let Some(filter) = &request.filter_expression {
            items.retain(|item| eval_expression(filter, item, &request.expression_attribute_names, &request.expression_attribute_values));
        }
        if let Some(limit) = request.limit {
            items.truncate(limit as usize);
        }

        let count = items.len() as i32;
        Ok(Page {
            items: if request.count_only { Vec::new() } else { items },
            count,
            last_evaluated_key: None,
        })
    }

    async fn batch_get_item(&self, request: BatchGetRequest) -> Result<BatchGetResult, TransportError> {
        let tables = self.tables.lock().unwrap();
        let table_items = tables.get(&request.table).map(|t| t.items.clone()).unwrap_or_default();
        let items = request
            .keys
            .iter()
            .filter_map(|key| table_items.iter().find(|item| key.iter().all(|(k, v)| item.get(k) == Some(v))).cloned())
            .collect();
        Ok(BatchGetResult { items, unprocessed_keys: Vec::new() })
    }

    async fn batch_write_item(&self, request: BatchWriteRequest) -> Result<BatchWriteResult, TransportError> {
        let mut budget = self.unprocessed_budget.lock().unwrap();
        let mut tables = self.tables.lock().unwrap();
        let fake_table = tables.entry(request.table.clone()).or_default();

        let mut unprocessed_puts = Vec::new();
        for item in request.puts {
            if *budget > 0 {
                *budget -= 1;
                unprocessed_puts.push(item);
                continue;
            }
            fake_table.items.retain(|existing| !is_same_key(existing, &item));
            fake_table.items.push(item);
        }

        let mut unprocessed_deletes = Vec::new();
        for key in request.deletes {
            if *budget > 0 {
                *budget -= 1;
                unprocessed_deletes.push(key);
                continue;
            }
            fake_table.items.retain(|item| !key.iter().all(|(k, v)| item.get(k) == Some(v)));
        }

        Ok(BatchWriteResult { unprocessed_puts, unprocessed_deletes })
    }
}

fn is_same_key(a: &Item, b: &Item) -> bool {
    // Two rows are "the same row" for replace-on-put purposes when every
    // attribute they have in common agrees and at least one attribute is
    // shared; callers always put full items, so in practice this reduces
    // to "all of a's attributes that b also has match".
    let shared: Vec<_> = a.keys().filter(|k| b.contains_key(*k)).collect();
    !shared.is_empty() && shared.iter().all(|k| a.get(*k) == b.get(*k))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let transport = InMemoryTransport::new();
        let mut item = Item::new();
        item.insert("id".to_string(), AttributeValue::S("u1".to_string()));
        item.insert("name".to_string(), AttributeValue::S("bob".to_string()));
        transport.put_item("users", item.clone(), None).await.unwrap();

        let mut key = Item::new();
        key.insert("id".to_string(), AttributeValue::S("u1".to_string()));
        let fetched = transport.get_item("users", key, false).await.unwrap();
        assert_eq!(fetched, Some(item));
    }

    #[tokio::test]
    async fn scan_filter_matches_only_one_row() {
        let transport = InMemoryTransport::new();
        for (id, name) in [("u1", "bob"), ("u2", "alice")] {
            let mut item = Item::new();
            item.insert("id".to_string(), AttributeValue::S(id.to_string()));
            item.insert("name".to_string(), AttributeValue::S(name.to_string()));
            transport.seed("users", item);
        }

        let mut names = HashMap::new();
        names.insert("#n0".to_string(), "name".to_string());
        let mut values = HashMap::new();
        values.insert(":v0".to_string(), AttributeValue::S("bob".to_string()));

        let request = ScanRequest {
            table: "users".to_string(),
            index_name: None,
            filter_expression: Some("#n0 = :v0".to_string()),
            expression_attribute_names: names,
            expression_attribute_values: values,
            limit: None,
            count_only: false,
            exclusive_start_key: None,
        };
        let page = transport.scan(request).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].get("id"), Some(&AttributeValue::S("u1".to_string())));
    }
}
