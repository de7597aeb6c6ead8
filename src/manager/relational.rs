//! Query-builder contract for backends that compose queries before running them.

use crate::error::ApiError;
use crate::filters::{Condition, Sort};
use crate::pagination::Pagination;
use crate::Item;
use async_trait::async_trait;
use serde_json::Value;

pub use crate::sql::SqlExpr;

/// The steps a query-composing manager is built from: start a query, narrow it
/// with expressions, order it, then run it in one of four shapes.
///
/// `instances`, `first`, `read` and `paginated_instances` of such a manager are
/// thin compositions of these steps (see [`QueryBuilder::query_for`]).
#[async_trait]
pub trait QueryBuilder: Send + Sync {
    type Query: Send + Sync;
    type Expression: Send;

    /// Unfiltered, unordered query over the resource's collection.
    fn query(&self) -> Self::Query;

    fn query_filter(&self, query: Self::Query, expression: Self::Expression) -> Self::Query;

    /// Applies sort terms, then the id as final tiebreaker.
    fn query_order_by(&self, query: Self::Query, sort: &[Sort]) -> Result<Self::Query, ApiError>;

    fn query_filter_by_id(&self, query: Self::Query, id: &Value) -> Result<Self::Query, ApiError>;

    fn expression_for_condition(&self, condition: &Condition) -> Result<Self::Expression, ApiError>;

    fn expression_for_ids(&self, ids: &[Value]) -> Result<Self::Expression, ApiError>;

    /// Conjunction; an empty list is true.
    fn and_expression(&self, expressions: Vec<Self::Expression>) -> Self::Expression;

    /// Disjunction; an empty list is false.
    fn or_expression(&self, expressions: Vec<Self::Expression>) -> Self::Expression;

    async fn query_get_all(&self, query: Self::Query) -> Result<Vec<Item>, ApiError>;

    async fn query_get_first(&self, query: Self::Query) -> Result<Option<Item>, ApiError>;

    async fn query_get_paginated_items(
        &self,
        query: Self::Query,
        page: u64,
        per_page: u64,
    ) -> Result<Pagination, ApiError>;

    /// `where` conditions AND-combined, then `sort`.
    fn query_for(&self, where_: &[Condition], sort: &[Sort]) -> Result<Self::Query, ApiError> {
        let mut query = self.query();
        if !where_.is_empty() {
            let expressions = where_
                .iter()
                .map(|condition| self.expression_for_condition(condition))
                .collect::<Result<Vec<_>, _>>()?;
            query = self.query_filter(query, self.and_expression(expressions));
        }
        self.query_order_by(query, sort)
    }
}
