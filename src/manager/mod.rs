//! Storage contract shared by every backend.

mod discovery;
mod memory;
mod postgres;
mod relational;

pub use discovery::discover_fields;
pub use memory::{MemoryBackend, MemoryManager};
pub use postgres::{PostgresBackend, PostgresManager};
pub use relational::{QueryBuilder, SqlExpr};

use crate::config::{ModelDefinition, ResourceConfig};
use crate::error::{ApiError, ConfigError};
use crate::fields::Field;
use crate::filters::{Condition, FilterTable, Sort};
use crate::pagination::Pagination;
use crate::schema::FieldSet;
use crate::signals::Signals;
use crate::Item;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// What a manager knows about the resource it serves.
#[derive(Clone, Debug)]
pub struct ManagerContext {
    pub resource: String,
    pub id_attribute: String,
    pub signals: Arc<Signals>,
}

/// CRUD, query and relation operations of one resource against its store.
///
/// `create`/`update` take a `commit` flag; with `false` the write is buffered
/// (or kept in the open transaction) until `commit()`. Buffers and transactions
/// belong to one session, see [`Manager::session`].
#[async_trait]
pub trait Manager: Send + Sync {
    fn context(&self) -> &ManagerContext;

    /// A handle over the same store with its own pending writes and transaction.
    /// Each request works through its own session.
    fn session(self: Arc<Self>) -> Arc<dyn Manager>;

    fn resource_name(&self) -> &str {
        &self.context().resource
    }

    fn id_attribute(&self) -> &str {
        &self.context().id_attribute
    }

    fn filter_table(&self) -> FilterTable {
        FilterTable::standard()
    }

    fn is_sortable_field(&self, field: &Field) -> bool {
        field.is_scalar()
    }

    async fn instances(&self, where_: &[Condition], sort: &[Sort]) -> Result<Vec<Item>, ApiError>;

    async fn paginated_instances(
        &self,
        page: u64,
        per_page: u64,
        where_: &[Condition],
        sort: &[Sort],
    ) -> Result<Pagination, ApiError> {
        let items = self.instances(where_, sort).await?;
        Ok(Pagination::from_list(items, page, per_page))
    }

    async fn first(&self, where_: &[Condition], sort: &[Sort]) -> Result<Item, ApiError> {
        self.instances(where_, sort)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::not_found_where(self.resource_name(), where_json(where_)))
    }

    async fn read(&self, id: &Value) -> Result<Item, ApiError>;

    async fn create(&self, properties: Item, commit: bool) -> Result<Item, ApiError>;

    async fn update(&self, item: &Item, changes: Item, commit: bool) -> Result<Item, ApiError>;

    async fn delete(&self, item: &Item) -> Result<(), ApiError>;

    async fn delete_by_id(&self, id: &Value) -> Result<(), ApiError> {
        let item = self.read(id).await?;
        self.delete(&item).await
    }

    async fn relation_instances(
        &self,
        item: &Item,
        attribute: &str,
        target: &dyn Manager,
        page: u64,
        per_page: u64,
    ) -> Result<Pagination, ApiError>;

    async fn relation_add(
        &self,
        item: &Item,
        attribute: &str,
        target: &dyn Manager,
        target_item: &Item,
    ) -> Result<(), ApiError>;

    /// Removing an item that is not a member is a no-op.
    async fn relation_remove(
        &self,
        item: &Item,
        attribute: &str,
        target: &dyn Manager,
        target_item: &Item,
    ) -> Result<(), ApiError>;

    async fn begin(&self) -> Result<(), ApiError> {
        Ok(())
    }

    async fn commit(&self) -> Result<(), ApiError>;
}

/// Builds the manager of one resource; selected per resource by configuration.
pub trait ManagerFactory: Send + Sync {
    /// Backend model whose columns are discovered as fields.
    fn model(&self) -> Option<&ModelDefinition> {
        None
    }

    /// Fields derived from the backend model, merged under the explicit declarations.
    fn discover(&self, config: &ResourceConfig, explicit: &FieldSet) -> Result<FieldSet, ConfigError> {
        match self.model() {
            Some(model) => discover_fields(model, config, explicit),
            None => Ok(explicit.clone()),
        }
    }

    fn build(&self, context: ManagerContext) -> Result<Arc<dyn Manager>, ConfigError>;
}

/// `where` clause echoed in not-found errors: `{attribute: value}` or `{attribute: {"$op": value}}`.
pub fn where_json(conditions: &[Condition]) -> Value {
    let mut out = Map::new();
    for condition in conditions {
        let value = match &condition.filter.name {
            None => condition.value.clone(),
            Some(name) => json!({ format!("${}", name): condition.value }),
        };
        out.insert(condition.attribute.clone(), value);
    }
    Value::Object(out)
}
