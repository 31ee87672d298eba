//! The request dispatcher (§4.F): wraps the [`Transport`] collaborator and
//! the entity's cached descriptor, executes the plan `expression` emits,
//! and decodes results back into the user's type. Grounded on
//! `persistence/repo.rs`'s `Table` trait (`get_item`/`put_item`/
//! `delete_item`/`list_items`/`batch_put_item`/`batch_delete_items`),
//! generalized from one table per hand-written `impl Table<T>` to any
//! `Entity`-derived type driven through the query-derivation pipeline.

pub mod backoff;
pub mod page;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use aws_sdk_dynamodb::types::AttributeValue;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::criteria::marshal::MarshalConfig;
use crate::criteria::{BoundArguments, QueryOptions, WireValue};
use crate::error::{DynaQueryError, TransportError};
use crate::expression::{synthesize, to_attribute_value, WireRequest};
use crate::index;
use crate::metadata::EntityDescriptor;
use crate::parser;
use crate::transport::{BatchGetRequest, BatchWriteRequest, ConditionSpec, Item, Transport};
use tracing::{debug, info};

use backoff::{delay_for_attempt, RetryConfig};
use page::PageKey;

/// One backend round trip's worth of results from [`Dispatcher::find_page`],
/// plus a [`PageKey`] continuation token when the backend reports more
/// items remain.
#[derive(Debug)]
pub struct ResultPage<E> {
    pub items: Vec<E>,
    pub next_page_key: Option<PageKey>,
}

/// The partition (and, if the entity has one, sort) key value identifying
/// a single item — the argument to `get`/`delete`/`batch_get`.
#[derive(Debug, Clone)]
pub struct Key {
    pub partition: WireValue,
    pub sort: Option<WireValue>,
}

impl Key {
    pub fn new(partition: WireValue) -> Self {
        Self { partition, sort: None }
    }

    pub fn with_sort(partition: WireValue, sort: WireValue) -> Self {
        Self { partition, sort: Some(sort) }
    }

    fn to_item(&self, descriptor: &EntityDescriptor) -> Item {
        let mut item = HashMap::new();
        item.insert(descriptor.partition_key.attribute.to_string(), to_attribute_value(&self.partition));
        if let (Some(sort_key), Some(sort_value)) = (descriptor.sort_key, &self.sort) {
            item.insert(sort_key.attribute.to_string(), to_attribute_value(sort_value));
        }
        item
    }
}

/// Cooperative cancellation for in-flight batch retries (§5 "Cancellation
/// is propagated by a deadline/cancel token"). Cheap to clone; cancels
/// every clone's wait at once.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Returned alongside [`DynaQueryError::BatchWriteFailed`] by
/// [`Dispatcher::batch_write`]: the caller's unwritten items, typed, per
/// §7/§9 ("retrieve the unprocessed items typed by class").
#[derive(Debug)]
pub struct BatchWriteOutcome<E> {
    pub unprocessed_puts: Vec<E>,
    pub unprocessed_delete_keys: Vec<Key>,
    pub attempts: u32,
    pub cause: Option<DynaQueryError>,
}

fn decode_item<E: DeserializeOwned>(item: Item) -> Result<E, DynaQueryError> {
    serde_dynamo::from_item(item).map_err(|e| DynaQueryError::Transport {
        operation: "decode",
        source: TransportError::Service { operation: "decode", message: e.to_string() },
    })
}

fn wrap_transport(operation: &'static str, source: TransportError) -> DynaQueryError {
    DynaQueryError::Transport { operation, source }
}

/// `dynaquery::dispatcher::Dispatcher<T: Transport>` (§4.F):
/// generalizes a `Repository { client: Arc<Client> }` facade to one
/// instance per entity type, produced by [`crate::registry::Registry::dispatcher`].
pub struct Dispatcher<T: Transport> {
    transport: Arc<T>,
    descriptor: Arc<EntityDescriptor>,
    marshal_config: MarshalConfig,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(transport: Arc<T>, descriptor: Arc<EntityDescriptor>, marshal_config: MarshalConfig) -> Self {
        Self { transport, descriptor, marshal_config }
    }

    pub fn descriptor(&self) -> &EntityDescriptor {
        &self.descriptor
    }

    /// `get(type, key)` (§4.F).
    pub async fn get<E: DeserializeOwned>(&self, key: Key) -> Result<Option<E>, DynaQueryError> {
        let table = self.descriptor.table_name().to_string();
        debug!("{table}: get {:?}|{:?}", key.partition, key.sort);
        let item = self
            .transport
            .get_item(&table, key.to_item(&self.descriptor), true)
            .await
            .map_err(|source| wrap_transport("get", source))?;
        item.map(decode_item).transpose()
    }

    /// `save(entity)` (§4.F): writes the version attribute atomically via
    /// the optimistic-concurrency extension when the descriptor names one.
    pub async fn save<E: Serialize>(&self, entity: &E) -> Result<(), DynaQueryError> {
        let mut item: Item = serde_dynamo::to_item(entity).map_err(|e| DynaQueryError::Metadata {
            entity: self.descriptor.name,
            message: format!("failed to encode entity: {e}"),
        })?;
        let table = self.descriptor.table_name().to_string();
        let condition = self.version_condition(&mut item);

        info!("{table}: will save entity of type {}", self.descriptor.name);
        self.transport.put_item(&table, item, condition).await.map_err(|source| match source {
            TransportError::ConditionFailed { .. } => {
                info!("{table}: optimistic lock failed on {}", self.descriptor.name);
                DynaQueryError::OptimisticLockFailure {
                    entity: self.descriptor.name,
                    key: self.descriptor.partition_key.property.to_string(),
                }
            }
            other => wrap_transport("save", other),
        })
    }

    fn version_condition(&self, item: &mut Item) -> Option<ConditionSpec> {
        let version_property = self.descriptor.version_property?;
        let attribute = version_property.attribute;
        let current = item.get(attribute).and_then(|v| v.as_n().ok()).and_then(|n| n.parse::<i64>().ok());

        let mut names = HashMap::new();
        names.insert("#v".to_string(), attribute.to_string());
        let mut values = HashMap::new();
        let expression = match current {
            None => "attribute_not_exists(#v)".to_string(),
            Some(previous) => {
                values.insert(":prev".to_string(), AttributeValue::N(previous.to_string()));
                "#v = :prev".to_string()
            }
        };

        item.insert(attribute.to_string(), AttributeValue::N((current.unwrap_or(0) + 1).to_string()));
        Some(ConditionSpec { expression, expression_attribute_names: names, expression_attribute_values: values })
    }

    /// `delete(entity)` (§4.F), identified by key rather than by a full
    /// entity value — the dispatcher only ever needs the key to issue a
    /// `DeleteItem`.
    pub async fn delete(&self, key: Key) -> Result<(), DynaQueryError> {
        let table = self.descriptor.table_name().to_string();
        info!("{table}: will delete {:?}|{:?}", key.partition, key.sort);
        self.transport
            .delete_item(&table, key.to_item(&self.descriptor), None)
            .await
            .map_err(|source| wrap_transport("delete", source))
    }

    /// Parses `method_name`, builds criteria from `arguments`, chooses a
    /// plan, synthesizes the request, and executes it, paging through the
    /// backend's continuation token until exhausted or `options.limit`
    /// items have been collected (§4.F `query`/`scan`, §9 "lazy ...
    /// restartable" sequences collapsed here into one eager `Vec`, since
    /// most finder methods want the whole result set).
    pub async fn find<E: DeserializeOwned>(
        &self,
        method_name: &str,
        arguments: BoundArguments,
        options: QueryOptions,
        scan_enabled: bool,
    ) -> Result<Vec<E>, DynaQueryError> {
        debug!("{}: find via {method_name}", self.descriptor.name);
        let tree = parser::parse(method_name, &self.descriptor)?;
        let criteria = crate::criteria::build(&tree, arguments, &self.descriptor, self.marshal_config, options)?;
        let plan = index::choose(&criteria, &self.descriptor, scan_enabled)?;
        let request = synthesize(&plan, criteria, &self.descriptor)?;
        self.execute(request).await
    }

    /// `query`/`scan` (§4.F), one backend round trip rather than `find`'s
    /// eager drain: resumes from `page_key` when given one, and hands back
    /// the next one so a caller can restart the sequence later (§9 "lazy,
    /// restartable" — the form `find` deliberately collapses).
    pub async fn find_page<E: DeserializeOwned>(
        &self,
        method_name: &str,
        arguments: BoundArguments,
        options: QueryOptions,
        scan_enabled: bool,
        page_key: Option<PageKey>,
    ) -> Result<ResultPage<E>, DynaQueryError> {
        let tree = parser::parse(method_name, &self.descriptor)?;
        let criteria = crate::criteria::build(&tree, arguments, &self.descriptor, self.marshal_config, options)?;
        let plan = index::choose(&criteria, &self.descriptor, scan_enabled)?;
        let request = synthesize(&plan, criteria, &self.descriptor)?;

        match request {
            WireRequest::Get(get) => {
                let item = self.transport.get_item(&get.table, get.key, false).await.map_err(|source| wrap_transport("get", source))?;
                let items: Vec<E> = item.map(decode_item).transpose()?.into_iter().collect();
                Ok(ResultPage { items, next_page_key: None })
            }
            WireRequest::Query(mut query) => {
                if let Some(key) = page_key {
                    query.exclusive_start_key = Some(key.to_item());
                }
                let page = self.transport.query(query).await.map_err(|source| wrap_transport("query", source))?;
                let items = page.items.into_iter().map(decode_item).collect::<Result<Vec<E>, _>>()?;
                Ok(ResultPage { items, next_page_key: page.last_evaluated_key.map(PageKey::from_item) })
            }
            WireRequest::Scan(mut scan) => {
                if let Some(key) = page_key {
                    scan.exclusive_start_key = Some(key.to_item());
                }
                let page = self.transport.scan(scan).await.map_err(|source| wrap_transport("scan", source))?;
                let items = page.items.into_iter().map(decode_item).collect::<Result<Vec<E>, _>>()?;
                Ok(ResultPage { items, next_page_key: page.last_evaluated_key.map(PageKey::from_item) })
            }
        }
    }

    async fn execute<E: DeserializeOwned>(&self, request: WireRequest) -> Result<Vec<E>, DynaQueryError> {
        match request {
            WireRequest::Get(get) => {
                let item = self.transport.get_item(&get.table, get.key, false).await.map_err(|source| wrap_transport("get", source))?;
                item.map(decode_item).transpose().map(|item| item.into_iter().collect())
            }
            WireRequest::Query(mut query) => {
                let target = query.limit;
                let mut collected = Vec::new();
                loop {
                    let page = self.transport.query(query.clone()).await.map_err(|source| wrap_transport("query", source))?;
                    for item in page.items {
                        collected.push(decode_item(item)?);
                    }
                    if let Some(limit) = target {
                        if collected.len() as i32 >= limit {
                            collected.truncate(limit as usize);
                            break;
                        }
                    }
                    match page.last_evaluated_key {
                        Some(key) => query.exclusive_start_key = Some(key),
                        None => break,
                    }
                }
                Ok(collected)
            }
            WireRequest::Scan(mut scan) => {
                let target = scan.limit;
                let mut collected = Vec::new();
                loop {
                    let page = self.transport.scan(scan.clone()).await.map_err(|source| wrap_transport("scan", source))?;
                    for item in page.items {
                        collected.push(decode_item(item)?);
                    }
                    if let Some(limit) = target {
                        if collected.len() as i32 >= limit {
                            collected.truncate(limit as usize);
                            break;
                        }
                    }
                    match page.last_evaluated_key {
                        Some(key) => scan.exclusive_start_key = Some(key),
                        None => break,
                    }
                }
                Ok(collected)
            }
        }
    }

    /// `count(plan, request)` (§4.F): the same derived request with
    /// `Select=COUNT`, summed across pages.
    pub async fn count(
        &self,
        method_name: &str,
        arguments: BoundArguments,
        options: QueryOptions,
        scan_enabled: bool,
    ) -> Result<i64, DynaQueryError> {
        let tree = parser::parse(method_name, &self.descriptor)?;
        let criteria = crate::criteria::build(&tree, arguments, &self.descriptor, self.marshal_config, options)?;
        let plan = index::choose(&criteria, &self.descriptor, scan_enabled)?;
        let request = synthesize(&plan, criteria, &self.descriptor)?;

        match request {
            WireRequest::Get(get) => {
                let item = self.transport.get_item(&get.table, get.key, false).await.map_err(|source| wrap_transport("count", source))?;
                Ok(if item.is_some() { 1 } else { 0 })
            }
            WireRequest::Query(mut query) => {
                query.count_only = true;
                let mut total = 0i64;
                loop {
                    let page = self.transport.query(query.clone()).await.map_err(|source| wrap_transport("count", source))?;
                    total += page.count as i64;
                    match page.last_evaluated_key {
                        Some(key) => query.exclusive_start_key = Some(key),
                        None => break,
                    }
                }
                Ok(total)
            }
            WireRequest::Scan(mut scan) => {
                scan.count_only = true;
                let mut total = 0i64;
                loop {
                    let page = self.transport.scan(scan.clone()).await.map_err(|source| wrap_transport("count", source))?;
                    total += page.count as i64;
                    match page.last_evaluated_key {
                        Some(key) => scan.exclusive_start_key = Some(key),
                        None => break,
                    }
                }
                Ok(total)
            }
        }
    }

    /// `exists(plan, request)`: convenience built on the same plan used by
    /// `find`/`count`, short-circuiting on the first match.
    pub async fn exists<E: DeserializeOwned>(
        &self,
        method_name: &str,
        arguments: BoundArguments,
        options: QueryOptions,
        scan_enabled: bool,
    ) -> Result<bool, DynaQueryError> {
        let mut limited_options = options;
        limited_options.limit = Some(1);
        let items: Vec<E> = self.find(method_name, arguments, limited_options, scan_enabled).await?;
        Ok(!items.is_empty())
    }

    /// `batchGet(keys)` (§4.F): partitions into groups of ≤100 keys per
    /// backend call; unprocessed keys are reissued until none remain or
    /// `deadline` elapses.
    pub async fn batch_get<E: DeserializeOwned>(&self, keys: Vec<Key>, deadline: Option<Duration>) -> Result<Vec<E>, DynaQueryError> {
        let table = self.descriptor.table_name().to_string();
        let started = Instant::now();
        let mut results = Vec::new();

        for chunk in keys.chunks(100) {
            let mut pending: Vec<Item> = chunk.iter().map(|k| k.to_item(&self.descriptor)).collect();
            loop {
                if pending.is_empty() {
                    break;
                }
                if let Some(deadline) = deadline {
                    if started.elapsed() > deadline {
                        break;
                    }
                }
                let request = BatchGetRequest { table: table.clone(), keys: pending.clone(), consistent_read: true };
                let result = self.transport.batch_get_item(request).await.map_err(|source| wrap_transport("batch_get", source))?;
                for item in result.items {
                    results.push(decode_item(item)?);
                }
                pending = result.unprocessed_keys;
            }
        }

        Ok(results)
    }

    /// `batchWrite(puts, deletes)` (§4.F): partitions into groups of ≤25
    /// items; exponential backoff with jitter on unprocessed items per
    /// `RetryConfig`. Returns `Err(BatchWriteOutcome)` when retries are
    /// exhausted or `cancel` fires mid-retry.
    pub async fn batch_write<E>(
        &self,
        puts: Vec<E>,
        delete_keys: Vec<Key>,
        retry: RetryConfig,
        cancel: CancelToken,
    ) -> Result<(), BatchWriteOutcome<E>>
    where
        E: Serialize,
    {
        let table = self.descriptor.table_name().to_string();

        let put_items: Vec<(Item, E)> = puts
            .into_iter()
            .map(|entity| {
                let item = serde_dynamo::to_item(&entity).unwrap_or_default();
                (item, entity)
            })
            .collect();
        let delete_items: Vec<(Item, Key)> = delete_keys.into_iter().map(|key| (key.to_item(&self.descriptor), key)).collect();

        let mut pending_puts = put_items;
        let mut pending_deletes = delete_items;
        let mut attempts = 0u32;

        loop {
            if pending_puts.is_empty() && pending_deletes.is_empty() {
                info!("{table}: batch_write_item ok after {attempts} attempt(s)");
                return Ok(());
            }
            if cancel.is_canceled() {
                return Err(BatchWriteOutcome {
                    unprocessed_puts: pending_puts.into_iter().map(|(_, e)| e).collect(),
                    unprocessed_delete_keys: pending_deletes.into_iter().map(|(_, k)| k).collect(),
                    attempts,
                    cause: Some(DynaQueryError::BatchWriteFailed { attempts, cause: Some("canceled".to_string()) }),
                });
            }
            if attempts >= retry.max_attempts {
                return Err(BatchWriteOutcome {
                    unprocessed_puts: pending_puts.into_iter().map(|(_, e)| e).collect(),
                    unprocessed_delete_keys: pending_deletes.into_iter().map(|(_, k)| k).collect(),
                    attempts,
                    cause: Some(DynaQueryError::BatchWriteFailed { attempts, cause: None }),
                });
            }

            if attempts > 0 {
                let delay = delay_for_attempt(&retry, attempts - 1);
                let canceled = tokio::select! {
                    _ = tokio::time::sleep(delay) => false,
                    _ = wait_for_cancel(&cancel) => true,
                };
                if canceled {
                    return Err(BatchWriteOutcome {
                        unprocessed_puts: pending_puts.into_iter().map(|(_, e)| e).collect(),
                        unprocessed_delete_keys: pending_deletes.into_iter().map(|(_, k)| k).collect(),
                        attempts,
                        cause: Some(DynaQueryError::BatchWriteFailed { attempts, cause: Some("canceled".to_string()) }),
                    });
                }
            }

            let mut next_puts = Vec::new();
            let mut next_deletes = Vec::new();

            while !pending_puts.is_empty() {
                let chunk = take_chunk(&mut pending_puts, 25);
                let items: Vec<Item> = chunk.iter().map(|(item, _)| item.clone()).collect();
                let request = BatchWriteRequest { table: table.clone(), puts: items, deletes: Vec::new() };
                match self.transport.batch_write_item(request).await {
                    Ok(result) => {
                        for (item, entity) in chunk {
                            if result.unprocessed_puts.iter().any(|u| u == &item) {
                                next_puts.push((item, entity));
                            }
                        }
                    }
                    Err(_) => next_puts.extend(chunk),
                }
            }

            while !pending_deletes.is_empty() {
                let chunk = take_chunk(&mut pending_deletes, 25);
                let keys: Vec<Item> = chunk.iter().map(|(item, _)| item.clone()).collect();
                let request = BatchWriteRequest { table: table.clone(), puts: Vec::new(), deletes: keys };
                match self.transport.batch_write_item(request).await {
                    Ok(result) => {
                        for (item, key) in chunk {
                            if result.unprocessed_deletes.iter().any(|u| u == &item) {
                                next_deletes.push((item, key));
                            }
                        }
                    }
                    Err(_) => next_deletes.extend(chunk),
                }
            }

            pending_puts = next_puts;
            pending_deletes = next_deletes;
            attempts += 1;
        }
    }
}

fn take_chunk<T>(items: &mut Vec<T>, size: usize) -> Vec<T> {
    let n = items.len().min(size);
    items.drain(0..n).collect()
}

async fn wait_for_cancel(token: &CancelToken) {
    loop {
        if token.is_canceled() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
