//! The transport collaborator interface (§6): the network call is treated
//! as a black box that accepts the request structs `expression` emits.
//! Grounded on `persistence/repo.rs`'s `Table` trait, which talks to
//! `aws_sdk_dynamodb::Client` through the same handful of operations —
//! generalized here into a trait so the pipeline can be driven by an
//! in-memory fake in tests (`dynaquery::testing::InMemoryTransport`)
//! without touching the network.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;

use crate::error::TransportError;
use crate::expression::model::{QueryRequest, ScanRequest};

/// A DynamoDB item, keyed by wire attribute name.
pub type Item = HashMap<String, AttributeValue>;

/// A `ConditionExpression` bundle for a conditional `put`/`delete` (used by
/// the dispatcher's optimistic-locking write in §4.F).
#[derive(Debug, Clone, Default)]
pub struct ConditionSpec {
    pub expression: String,
    pub expression_attribute_names: HashMap<String, String>,
    pub expression_attribute_values: HashMap<String, AttributeValue>,
}

/// One page of a Query or Scan response: the items (empty when
/// `count_only` was requested), the count, and a continuation key, if any
/// more pages remain.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<Item>,
    pub count: i32,
    pub last_evaluated_key: Option<Item>,
}

#[derive(Debug, Clone)]
pub struct BatchGetRequest {
    pub table: String,
    pub keys: Vec<Item>,
    pub consistent_read: bool,
}

#[derive(Debug, Clone, Default)]
pub struct BatchGetResult {
    pub items: Vec<Item>,
    pub unprocessed_keys: Vec<Item>,
}

#[derive(Debug, Clone)]
pub struct BatchWriteRequest {
    pub table: String,
    pub puts: Vec<Item>,
    pub deletes: Vec<Item>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchWriteResult {
    pub unprocessed_puts: Vec<Item>,
    pub unprocessed_deletes: Vec<Item>,
}

/// The black-box network collaborator of §1/§6. One production
/// implementation, [`DynamoDbTransport`], and one in-memory fake for tests
/// (`dynaquery::testing::InMemoryTransport`) implement this trait.
///
/// `async_trait` is used (rather than native AFIT) because `Registry` and
/// `Dispatcher` need to hold `Arc<dyn Transport>` as well as `Arc<T:
/// Transport>` in tests that swap in the in-memory fake, and native AFIT
/// is not yet object-safe.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get_item(&self, table: &str, key: Item, consistent_read: bool) -> Result<Option<Item>, TransportError>;
    async fn put_item(&self, table: &str, item: Item, condition: Option<ConditionSpec>) -> Result<(), TransportError>;
    async fn delete_item(&self, table: &str, key: Item, condition: Option<ConditionSpec>) -> Result<(), TransportError>;
    async fn query(&self, request: QueryRequest) -> Result<Page, TransportError>;
    async fn scan(&self, request: ScanRequest) -> Result<Page, TransportError>;
    async fn batch_get_item(&self, request: BatchGetRequest) -> Result<BatchGetResult, TransportError>;
    async fn batch_write_item(&self, request: BatchWriteRequest) -> Result<BatchWriteResult, TransportError>;
}

/// The real implementation, wrapping `aws_sdk_dynamodb::Client` exactly
/// the way `persistence/repo.rs`'s `Table` trait methods do.
#[derive(Clone)]
pub struct DynamoDbTransport {
    client: aws_sdk_dynamodb::Client,
}

impl DynamoDbTransport {
    pub fn new(client: aws_sdk_dynamodb::Client) -> Self {
        Self { client }
    }

    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(aws_sdk_dynamodb::Client::new(&config))
    }
}

fn apply_condition(
    names: &mut HashMap<String, String>,
    values: &mut HashMap<String, AttributeValue>,
    condition: &Option<ConditionSpec>,
) -> Option<String> {
    condition.as_ref().map(|c| {
        names.extend(c.expression_attribute_names.clone());
        values.extend(c.expression_attribute_values.clone());
        c.expression.clone()
    })
}

#[async_trait]
impl Transport for DynamoDbTransport {
    async fn get_item(&self, table: &str, key: Item, consistent_read: bool) -> Result<Option<Item>, TransportError> {
        let result = self
            .client
            .get_item()
            .table_name(table)
            .set_key(Some(key))
            .consistent_read(consistent_read)
            .send()
            .await
            .map_err(|e| TransportError::from_sdk_error("get_item", e))?;
        Ok(result.item)
    }

    async fn put_item(&self, table: &str, item: Item, condition: Option<ConditionSpec>) -> Result<(), TransportError> {
        let mut names = HashMap::new();
        let mut values = HashMap::new();
        let expr = apply_condition(&mut names, &mut values, &condition);
        self.client
            .put_item()
            .table_name(table)
            .set_item(Some(item))
            .set_condition_expression(expr)
            .set_expression_attribute_names(if names.is_empty() { None } else { Some(names) })
            .set_expression_attribute_values(if values.is_empty() { None } else { Some(values) })
            .send()
            .await
            .map_err(|e| TransportError::from_sdk_error("put_item", e))?;
        Ok(())
    }

    async fn delete_item(&self, table: &str, key: Item, condition: Option<ConditionSpec>) -> Result<(), TransportError> {
        let mut names = HashMap::new();
        let mut values = HashMap::new();
        let expr = apply_condition(&mut names, &mut values, &condition);
        self.client
            .delete_item()
            .table_name(table)
            .set_key(Some(key))
            .set_condition_expression(expr)
            .set_expression_attribute_names(if names.is_empty() { None } else { Some(names) })
            .set_expression_attribute_values(if values.is_empty() { None } else { Some(values) })
            .send()
            .await
            .map_err(|e| TransportError::from_sdk_error("delete_item", e))?;
        Ok(())
    }

    async fn query(&self, request: QueryRequest) -> Result<Page, TransportError> {
        let select = if request.count_only {
            Some(aws_sdk_dynamodb::types::Select::Count)
        } else if request.select_all_projected {
            Some(aws_sdk_dynamodb::types::Select::AllProjectedAttributes)
        } else {
            None
        };
        let output = self
            .client
            .query()
            .table_name(&request.table)
            .set_index_name(request.index_name.clone())
            .key_condition_expression(&request.key_condition_expression)
            .set_filter_expression(request.filter_expression.clone())
            .set_projection_expression(request.projection_expression.clone())
            .set_select(select)
            .set_expression_attribute_names(Some(request.expression_attribute_names.clone()))
            .set_expression_attribute_values(Some(request.expression_attribute_values.clone()))
            .set_scan_index_forward(request.scan_index_forward)
            .set_consistent_read(request.consistent_read)
            .set_limit(request.limit)
            .set_exclusive_start_key(request.exclusive_start_key.clone())
            .send()
            .await
            .map_err(|e| TransportError::from_sdk_error("query", e))?;
        Ok(Page {
            items: output.items.unwrap_or_default(),
            count: output.count,
            last_evaluated_key: output.last_evaluated_key,
        })
    }

    async fn scan(&self, request: ScanRequest) -> Result<Page, TransportError> {
        let select = if request.count_only {
            Some(aws_sdk_dynamodb::types::Select::Count)
        } else {
            None
        };
        let output = self
            .client
            .scan()
            .table_name(&request.table)
            .set_index_name(request.index_name.clone())
            .set_filter_expression(request.filter_expression.clone())
            .set_select(select)
            .set_expression_attribute_names(Some(request.expression_attribute_names.clone()))
            .set_expression_attribute_values(Some(request.expression_attribute_values.clone()))
            .set_limit(request.limit)
            .set_exclusive_start_key(request.exclusive_start_key.clone())
            .send()
            .await
            .map_err(|e| TransportError::from_sdk_error("scan", e))?;
        Ok(Page {
            items: output.items.unwrap_or_default(),
            count: output.count,
            last_evaluated_key: output.last_evaluated_key,
        })
    }

    async fn batch_get_item(&self, request: BatchGetRequest) -> Result<BatchGetResult, TransportError> {
        if request.keys.is_empty() {
            return Ok(BatchGetResult::default());
        }
        let keys_and_attributes = aws_sdk_dynamodb::types::KeysAndAttributes::builder()
            .set_keys(Some(request.keys))
            .consistent_read(request.consistent_read)
            .build()
            .map_err(|e| TransportError::Service { operation: "batch_get_item", message: e.to_string() })?;
        let output = self
            .client
            .batch_get_item()
            .request_items(&request.table, keys_and_attributes)
            .send()
            .await
            .map_err(|e| TransportError::from_sdk_error("batch_get_item", e))?;
        let items = output
            .responses
            .as_ref()
            .and_then(|by_table| by_table.get(&request.table))
            .cloned()
            .unwrap_or_default();
        let unprocessed_keys = output
            .unprocessed_keys
            .and_then(|mut by_table| by_table.remove(&request.table))
            .and_then(|k| k.keys)
            .unwrap_or_default();
        Ok(BatchGetResult { items, unprocessed_keys })
    }

    async fn batch_write_item(&self, request: BatchWriteRequest) -> Result<BatchWriteResult, TransportError> {
        if request.puts.is_empty() && request.deletes.is_empty() {
            return Ok(BatchWriteResult::default());
        }
        let mut write_requests = Vec::new();
        for item in request.puts {
            let put = aws_sdk_dynamodb::types::PutRequest::builder()
                .set_item(Some(item))
                .build()
                .map_err(|e| TransportError::Service { operation: "batch_write_item", message: e.to_string() })?;
            write_requests.push(aws_sdk_dynamodb::types::WriteRequest::builder().put_request(put).build());
        }
        for key in request.deletes {
            let delete = aws_sdk_dynamodb::types::DeleteRequest::builder()
                .set_key(Some(key))
                .build()
                .map_err(|e| TransportError::Service { operation: "batch_write_item", message: e.to_string() })?;
            write_requests.push(aws_sdk_dynamodb::types::WriteRequest::builder().delete_request(delete).build());
        }
        let output = self
            .client
            .batch_write_item()
            .request_items(&request.table, write_requests)
            .send()
            .await
            .map_err(|e| TransportError::from_sdk_error("batch_write_item", e))?;
        let unprocessed = output
            .unprocessed_items
            .and_then(|mut by_table| by_table.remove(&request.table))
            .unwrap_or_default();
        let mut unprocessed_puts = Vec::new();
        let mut unprocessed_deletes = Vec::new();
        for write in unprocessed {
            if let Some(put) = write.put_request {
                if let Some(item) = put.item {
                    unprocessed_puts.push(item);
                }
            }
            if let Some(delete) = write.delete_request {
                if let Some(key) = delete.key {
                    unprocessed_deletes.push(key);
                }
            }
        }
        Ok(BatchWriteResult { unprocessed_puts, unprocessed_deletes })
    }
}
