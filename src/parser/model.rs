/// The atomic comparison operators a `QueryPart` may carry (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Between,
    In,
    BeginsWith,
    Contains,
    NotContains,
    IsNull,
    IsNotNull,
    True,
    False,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// The subject of a finder method — what kind of operation it describes.
/// Only `Find`/`FindAll` translate into a result set today; the others are
/// parsed so the index selector can still reason about their criteria, but
/// dispatch for them lives in `dispatcher` rather than in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject {
    Find,
    FindAll,
    Count,
    Exists,
    Delete,
    Query,
}

/// One `And`-segment of a parsed method name (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPart {
    pub property: &'static str,
    pub operator: Operator,
    pub ignore_case_requested: bool,
}

/// The fully parsed structure of a finder method name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartTree {
    pub subject: Subject,
    pub parts: Vec<QueryPart>,
    pub sort: Vec<(&'static str, Direction)>,
}
