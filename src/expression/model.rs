use std::collections::HashMap;

use aws_sdk_dynamodb::types::AttributeValue;

#[derive(Debug, Clone)]
pub struct GetRequest {
    pub table: String,
    pub key: HashMap<String, AttributeValue>,
}

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub table: String,
    pub index_name: Option<String>,
    pub key_condition_expression: String,
    pub filter_expression: Option<String>,
    pub expression_attribute_names: HashMap<String, String>,
    pub expression_attribute_values: HashMap<String, AttributeValue>,
    pub projection_expression: Option<String>,
    pub select_all_projected: bool,
    pub scan_index_forward: Option<bool>,
    pub consistent_read: Option<bool>,
    pub limit: Option<i32>,
    /// Set by `dispatcher::count` to request `Select=COUNT` instead of
    /// returning items (§4.F). Never set by `expression::synthesize`.
    pub count_only: bool,
    pub exclusive_start_key: Option<HashMap<String, AttributeValue>>,
}

#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub table: String,
    pub index_name: Option<String>,
    pub filter_expression: Option<String>,
    pub expression_attribute_names: HashMap<String, String>,
    pub expression_attribute_values: HashMap<String, AttributeValue>,
    pub limit: Option<i32>,
    pub count_only: bool,
    pub exclusive_start_key: Option<HashMap<String, AttributeValue>>,
}

/// The synthesized request (§4.E): one of `Get`/`Query`/`Scan`, holding
/// `AttributeValue` maps directly so the dispatcher hands them straight to
/// the SDK without an intermediate DTO layer.
#[derive(Debug, Clone)]
pub enum WireRequest {
    Get(GetRequest),
    Query(QueryRequest),
    Scan(ScanRequest),
}
