//! PostgreSQL store over sqlx: one table per resource; to-many relations through
//! join tables or foreign keys on the target table.

use super::relational::QueryBuilder;
use super::{Manager, ManagerContext, ManagerFactory};
use crate::config::{qualified, quote_ident, resolve_table, ModelDefinition, RelationshipConfig, TableInfo};
use crate::error::{ApiError, ConfigError};
use crate::fields::{Field, FieldKind};
use crate::filters::{Condition, Filter, FilterOp, Sort};
use crate::pagination::Pagination;
use crate::schema::validator::json_eq;
use crate::signals::{SignalEvent, SignalKind};
use crate::sql::{self, column_ref, column_value, PgBindValue, QueryBuf, SelectQuery, SqlExpr};
use crate::Item;
use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::postgres::{PgDatabaseError, PgRow};
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Factory for [`PostgresManager`]s over one declared table.
#[derive(Clone, Debug)]
pub struct PostgresBackend {
    pool: PgPool,
    model: Arc<ModelDefinition>,
    table: Arc<TableInfo>,
}

impl PostgresBackend {
    pub fn new(pool: PgPool, model: ModelDefinition) -> Result<Self, ConfigError> {
        let table = resolve_table(&model)?;
        Ok(PostgresBackend { pool, model: Arc::new(model), table: Arc::new(table) })
    }

    pub fn manager(&self, context: ManagerContext) -> PostgresManager {
        PostgresManager {
            context,
            pool: self.pool.clone(),
            model: Arc::clone(&self.model),
            table: Arc::clone(&self.table),
            tx: Mutex::new(None),
        }
    }
}

impl ManagerFactory for PostgresBackend {
    fn model(&self) -> Option<&ModelDefinition> {
        Some(self.model.as_ref())
    }

    fn build(&self, context: ManagerContext) -> Result<Arc<dyn Manager>, ConfigError> {
        Ok(Arc::new(self.manager(context)))
    }
}

type Tx = Option<Transaction<'static, Postgres>>;

/// One session on a table. Sessions of a resource share the pool and table
/// layout; each keeps its own transaction.
pub struct PostgresManager {
    context: ManagerContext,
    pool: PgPool,
    model: Arc<ModelDefinition>,
    table: Arc<TableInfo>,
    /// Open transaction of this session, kept across `commit=false` writes until `commit()`.
    tx: Mutex<Tx>,
}

impl PostgresManager {
    /// A new session on the same table with no transaction open.
    pub fn fork(&self) -> PostgresManager {
        PostgresManager {
            context: self.context.clone(),
            pool: self.pool.clone(),
            model: Arc::clone(&self.model),
            table: Arc::clone(&self.table),
            tx: Mutex::new(None),
        }
    }

    fn signal(&self, kind: SignalKind, event: SignalEvent<'_>) -> Result<(), ApiError> {
        self.context.signals.send(&self.context.resource, kind, &event)
    }

    fn pk_cast(&self) -> &str {
        self.table.column(&self.table.pk).map(|c| c.sql_type.as_str()).unwrap_or("text")
    }

    fn id_of(&self, item: &Item) -> Result<Value, ApiError> {
        match item.get(&self.table.pk) {
            Some(id) if !id.is_null() => Ok(id.clone()),
            _ => Err(ApiError::Internal(format!("{} item has no id", self.context.resource))),
        }
    }

    fn relationship(&self, attribute: &str) -> Result<&RelationshipConfig, ApiError> {
        self.model
            .relationship(attribute)
            .ok_or_else(|| ApiError::Internal(format!("{} has no relation '{}'", self.context.resource, attribute)))
    }

    fn select(&self, query: &SelectQuery, limit: Option<u64>, offset: Option<u64>) -> QueryBuf {
        sql::select(&self.table, &self.model.relationships, query, limit, offset)
    }

    /// Runs a read on the open transaction when there is one, else on a pooled connection.
    async fn fetch(&self, q: &QueryBuf) -> Result<Vec<PgRow>, ApiError> {
        let mut slot = self.tx.lock().await;
        if let Some(conn) = slot.as_deref_mut() {
            return fetch_rows(conn, q).await;
        }
        drop(slot);
        let mut conn = self.pool.acquire().await?;
        fetch_rows(&mut conn, q).await
    }

    async fn open<'s>(&self, slot: &'s mut Tx) -> Result<&'s mut PgConnection, ApiError> {
        if slot.is_none() {
            *slot = Some(self.pool.begin().await?);
        }
        slot.as_deref_mut()
            .ok_or_else(|| ApiError::Internal("transaction unavailable".into()))
    }

    /// Commits on success when asked to; rolls back on any error.
    async fn finish<T>(&self, slot: &mut Tx, result: Result<T, ApiError>, commit: bool) -> Result<T, ApiError> {
        match result {
            Ok(value) => {
                if commit {
                    if let Some(tx) = slot.take() {
                        tx.commit().await?;
                    }
                }
                Ok(value)
            }
            Err(error) => {
                if let Some(tx) = slot.take() {
                    if let Err(e) = tx.rollback().await {
                        tracing::warn!(resource = %self.context.resource, error = %e, "rollback failed");
                    }
                }
                Err(error)
            }
        }
    }

    async fn read_in(&self, conn: &mut PgConnection, id: &Value) -> Result<Item, ApiError> {
        let query = self.query_filter_by_id(self.query(), id)?;
        let rows = fetch_rows(conn, &self.select(&query, Some(1), None)).await?;
        rows.first()
            .map(row_to_item)
            .ok_or_else(|| ApiError::not_found_id(&self.context.resource, id.clone()))
    }

    async fn set_members(
        &self,
        conn: &mut PgConnection,
        owner: &Value,
        attribute: &str,
        current: &[Value],
        wanted: &[Value],
    ) -> Result<(), ApiError> {
        let relation = self.relationship(attribute)?;
        for member in current.iter().filter(|m| !wanted.iter().any(|w| json_eq(w, m))) {
            execute(conn, &sql::remove_member(&self.table, relation, owner, member)).await?;
        }
        for member in wanted.iter().filter(|w| !current.iter().any(|m| json_eq(w, m))) {
            execute(conn, &sql::add_member(&self.table, relation, owner, member)).await?;
        }
        Ok(())
    }

    /// Splits properties into column values and relation member lists.
    fn split(&self, properties: Item) -> (Item, Vec<(String, Vec<Value>)>) {
        let mut columns = Item::new();
        let mut relations = Vec::new();
        for (key, value) in properties {
            if self.model.relationship(&key).is_some() {
                relations.push((key, value.as_array().cloned().unwrap_or_default()));
            } else {
                columns.insert(key, value);
            }
        }
        (columns, relations)
    }

    async fn create_in(&self, conn: &mut PgConnection, properties: Item) -> Result<Item, ApiError> {
        self.signal(SignalKind::BeforeCreate, SignalEvent::Create { item: &properties })?;
        let (columns, relations) = self.split(properties);
        let rows = fetch_rows(conn, &sql::insert(&self.table, &columns)).await?;
        let id = rows
            .first()
            .and_then(|row| row_to_item(row).remove(&self.table.pk))
            .ok_or_else(|| ApiError::Internal(format!("{} insert returned no key", self.context.resource)))?;
        for (attribute, members) in &relations {
            self.set_members(conn, &id, attribute, &[], members).await?;
        }
        let item = self.read_in(conn, &id).await?;
        self.signal(SignalKind::AfterCreate, SignalEvent::Create { item: &item })?;
        Ok(item)
    }

    async fn update_in(&self, conn: &mut PgConnection, item: &Item, changes: Item) -> Result<Item, ApiError> {
        let id = self.id_of(item)?;
        let actual_changes: Item = changes
            .iter()
            .filter(|(k, v)| item.get(*k).map(|c| !json_eq(c, v)).unwrap_or(true))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        self.signal(SignalKind::BeforeUpdate, SignalEvent::Update { item, changes: &actual_changes })?;

        let (columns, relations) = self.split(changes);
        if let Some(q) = sql::update(&self.table, &id, &columns) {
            if fetch_rows(conn, &q).await?.is_empty() {
                return Err(ApiError::not_found_id(&self.context.resource, id));
            }
        }
        for (attribute, wanted) in &relations {
            let current = item.get(attribute).and_then(Value::as_array).cloned().unwrap_or_default();
            self.set_members(conn, &id, attribute, &current, wanted).await?;
        }
        let updated = self.read_in(conn, &id).await?;
        self.signal(SignalKind::AfterUpdate, SignalEvent::Update { item: &updated, changes: &actual_changes })?;
        Ok(updated)
    }

    async fn delete_in(&self, conn: &mut PgConnection, item: &Item) -> Result<(), ApiError> {
        let id = self.id_of(item)?;
        self.signal(SignalKind::BeforeDelete, SignalEvent::Delete { item })?;
        if fetch_rows(conn, &sql::delete(&self.table, &id)).await?.is_empty() {
            return Err(ApiError::not_found_id(&self.context.resource, id));
        }
        self.signal(SignalKind::AfterDelete, SignalEvent::Delete { item })?;
        Ok(())
    }

    async fn relation_in(
        &self,
        conn: &mut PgConnection,
        item: &Item,
        attribute: &str,
        child: &Item,
        member: &Value,
        add: bool,
    ) -> Result<(), ApiError> {
        let relation = self.relationship(attribute)?;
        let owner = self.id_of(item)?;
        let event = SignalEvent::Relation { item, attribute, child };
        let (before, after, q) = if add {
            (
                SignalKind::BeforeAddToRelation,
                SignalKind::AfterAddToRelation,
                sql::add_member(&self.table, relation, &owner, member),
            )
        } else {
            (
                SignalKind::BeforeRemoveFromRelation,
                SignalKind::AfterRemoveFromRelation,
                sql::remove_member(&self.table, relation, &owner, member),
            )
        };
        self.signal(before, event)?;
        execute(conn, &q).await?;
        self.signal(after, event)
    }

    fn unsupported(&self, condition: &Condition) -> ApiError {
        ApiError::Internal(format!(
            "{} cannot filter '{}' with {:?}",
            self.context.resource, condition.attribute, condition.filter.op
        ))
    }
}

#[async_trait]
impl QueryBuilder for PostgresManager {
    type Query = SelectQuery;
    type Expression = SqlExpr;

    fn query(&self) -> SelectQuery {
        SelectQuery::default()
    }

    fn query_filter(&self, mut query: SelectQuery, expression: SqlExpr) -> SelectQuery {
        query.filters.push(expression);
        query
    }

    fn query_order_by(&self, mut query: SelectQuery, sort: &[Sort]) -> Result<SelectQuery, ApiError> {
        for term in sort {
            let column = self.table.column(&term.attribute).ok_or_else(|| {
                ApiError::Internal(format!("{} cannot sort by '{}'", self.context.resource, term.attribute))
            })?;
            let foreign_key = self.model.column(&column.name).and_then(|c| c.foreign_key.as_ref());
            let expr = match foreign_key.and_then(|fk| fk.sort_column.as_ref().map(|s| (fk, s))) {
                Some((fk, sort_column)) => format!(
                    "(SELECT t.{} FROM {} t WHERE t.{} = {})",
                    quote_ident(sort_column),
                    qualified(fk.schema.as_deref().unwrap_or(&self.table.schema), &fk.table),
                    quote_ident(&fk.column),
                    column_ref(&column.name)
                ),
                None => column_ref(&column.name),
            };
            let direction = if term.descending { "DESC NULLS LAST" } else { "ASC NULLS FIRST" };
            query.order.push(SqlExpr::raw(format!("{} {}", expr, direction)));
        }
        if !sort.iter().any(|t| t.attribute == self.table.pk) {
            query.order.push(SqlExpr::raw(format!("{} ASC", column_ref(&self.table.pk))));
        }
        Ok(query)
    }

    fn query_filter_by_id(&self, query: SelectQuery, id: &Value) -> Result<SelectQuery, ApiError> {
        let expression = SqlExpr::new(
            format!("{} = ?::{}", column_ref(&self.table.pk), self.pk_cast()),
            vec![id.clone()],
        );
        Ok(self.query_filter(query, expression))
    }

    fn expression_for_condition(&self, condition: &Condition) -> Result<SqlExpr, ApiError> {
        use FilterOp::*;
        if let Some(relation) = self.model.relationship(&condition.attribute) {
            return match condition.filter.op {
                Contains => Ok(sql::relation_contains(&self.table, relation, &condition.value)),
                _ => Err(self.unsupported(condition)),
            };
        }
        let column = self.table.column(&condition.attribute).ok_or_else(|| self.unsupported(condition))?;
        let col = column_ref(&column.name);
        let value = &condition.value;
        let typed = |v: &Value| (format!("?::{}", column.sql_type), column_value(column, v));
        let compared = |op: &str| {
            // Numeric operands compare as numeric whatever the column's integer width.
            let cast = if value.is_number() { "numeric" } else { column.sql_type.as_str() };
            SqlExpr::new(format!("{} {} ?::{}", col, op, cast), vec![value.clone()])
        };
        let like = |pattern: String, op: &str| SqlExpr::new(format!("{}::text {} ?", col, op), vec![json!(pattern)]);
        let text = value.as_str().map(escape_like).unwrap_or_default();

        Ok(match condition.filter.op {
            Equal if value.is_null() => SqlExpr::raw(format!("{} IS NULL", col)),
            NotEqual if value.is_null() => SqlExpr::raw(format!("{} IS NOT NULL", col)),
            Equal => {
                let (placeholder, bound) = typed(value);
                SqlExpr::new(format!("{} = {}", col, placeholder), vec![bound])
            }
            NotEqual => {
                let (placeholder, bound) = typed(value);
                SqlExpr::new(format!("{} IS DISTINCT FROM {}", col, placeholder), vec![bound])
            }
            LessThan => compared("<"),
            LessThanEqual => compared("<="),
            GreaterThan => compared(">"),
            GreaterThanEqual => compared(">="),
            In => match value.as_array() {
                Some(values) if !values.is_empty() => {
                    let (placeholders, bound): (Vec<String>, Vec<Value>) = values.iter().map(typed).unzip();
                    SqlExpr::new(format!("{} IN ({})", col, placeholders.join(", ")), bound)
                }
                _ => SqlExpr::raw("FALSE"),
            },
            Contains if column.is_array() => {
                let element = column.sql_type.trim_end_matches("[]");
                SqlExpr::new(format!("?::{} = ANY({})", element, col), vec![value.clone()])
            }
            Contains => return Err(self.unsupported(condition)),
            StringContains => like(format!("%{}%", text), "LIKE"),
            StringIContains => like(format!("%{}%", text), "ILIKE"),
            StartsWith => like(format!("{}%", text), "LIKE"),
            IStartsWith => like(format!("{}%", text), "ILIKE"),
            EndsWith => like(format!("%{}", text), "LIKE"),
            IEndsWith => like(format!("%{}", text), "ILIKE"),
            Between => match value.as_array().map(Vec::as_slice) {
                Some([low, high]) => SqlExpr::new(
                    format!("{} BETWEEN ?::{} AND ?::{}", col, column.sql_type, column.sql_type),
                    vec![low.clone(), high.clone()],
                ),
                _ => return Err(self.unsupported(condition)),
            },
        })
    }

    fn expression_for_ids(&self, ids: &[Value]) -> Result<SqlExpr, ApiError> {
        if ids.is_empty() {
            return Ok(SqlExpr::raw("FALSE"));
        }
        let placeholders = vec![format!("?::{}", self.pk_cast()); ids.len()];
        Ok(SqlExpr::new(
            format!("{} IN ({})", column_ref(&self.table.pk), placeholders.join(", ")),
            ids.to_vec(),
        ))
    }

    fn and_expression(&self, expressions: Vec<SqlExpr>) -> SqlExpr {
        SqlExpr::join(expressions, "AND", "TRUE")
    }

    fn or_expression(&self, expressions: Vec<SqlExpr>) -> SqlExpr {
        SqlExpr::join(expressions, "OR", "FALSE")
    }

    async fn query_get_all(&self, query: SelectQuery) -> Result<Vec<Item>, ApiError> {
        let rows = self.fetch(&self.select(&query, None, None)).await?;
        Ok(rows.iter().map(row_to_item).collect())
    }

    async fn query_get_first(&self, query: SelectQuery) -> Result<Option<Item>, ApiError> {
        let rows = self.fetch(&self.select(&query, Some(1), None)).await?;
        Ok(rows.first().map(row_to_item))
    }

    async fn query_get_paginated_items(&self, query: SelectQuery, page: u64, per_page: u64) -> Result<Pagination, ApiError> {
        let count = self.fetch(&sql::count(&self.table, &query)).await?;
        let total = count
            .first()
            .map(|row| row.try_get::<i64, _>("total"))
            .transpose()?
            .unwrap_or(0);
        let offset = page.saturating_sub(1).saturating_mul(per_page);
        let rows = self.fetch(&self.select(&query, Some(per_page), Some(offset))).await?;
        let items = rows.iter().map(row_to_item).collect();
        Ok(Pagination::new(items, page, per_page, total.max(0) as u64))
    }
}

#[async_trait]
impl Manager for PostgresManager {
    fn context(&self) -> &ManagerContext {
        &self.context
    }

    fn session(self: Arc<Self>) -> Arc<dyn Manager> {
        Arc::new(self.fork())
    }

    fn is_sortable_field(&self, field: &Field) -> bool {
        field.is_scalar() || matches!(field.kind, FieldKind::ToOne(_))
    }

    async fn instances(&self, where_: &[Condition], sort: &[Sort]) -> Result<Vec<Item>, ApiError> {
        let query = self.query_for(where_, sort)?;
        self.query_get_all(query).await
    }

    async fn paginated_instances(
        &self,
        page: u64,
        per_page: u64,
        where_: &[Condition],
        sort: &[Sort],
    ) -> Result<Pagination, ApiError> {
        let query = self.query_for(where_, sort)?;
        self.query_get_paginated_items(query, page, per_page).await
    }

    async fn first(&self, where_: &[Condition], sort: &[Sort]) -> Result<Item, ApiError> {
        let query = self.query_for(where_, sort)?;
        self.query_get_first(query)
            .await?
            .ok_or_else(|| ApiError::not_found_where(&self.context.resource, super::where_json(where_)))
    }

    async fn read(&self, id: &Value) -> Result<Item, ApiError> {
        let query = self.query_filter_by_id(self.query(), id)?;
        self.query_get_first(query)
            .await?
            .ok_or_else(|| ApiError::not_found_id(&self.context.resource, id.clone()))
    }

    async fn create(&self, properties: Item, commit: bool) -> Result<Item, ApiError> {
        let mut slot = self.tx.lock().await;
        let result = match self.open(&mut slot).await {
            Ok(conn) => self.create_in(conn, properties).await,
            Err(e) => Err(e),
        };
        self.finish(&mut slot, result, commit).await
    }

    async fn update(&self, item: &Item, changes: Item, commit: bool) -> Result<Item, ApiError> {
        let mut slot = self.tx.lock().await;
        let result = match self.open(&mut slot).await {
            Ok(conn) => self.update_in(conn, item, changes).await,
            Err(e) => Err(e),
        };
        self.finish(&mut slot, result, commit).await
    }

    async fn delete(&self, item: &Item) -> Result<(), ApiError> {
        let mut slot = self.tx.lock().await;
        let result = match self.open(&mut slot).await {
            Ok(conn) => self.delete_in(conn, item).await,
            Err(e) => Err(e),
        };
        self.finish(&mut slot, result, true).await
    }

    async fn relation_instances(
        &self,
        item: &Item,
        attribute: &str,
        target: &dyn Manager,
        page: u64,
        per_page: u64,
    ) -> Result<Pagination, ApiError> {
        self.relationship(attribute)?;
        let current = self.read(&self.id_of(item)?).await?;
        let members = current.get(attribute).cloned().unwrap_or_else(|| json!([]));
        let condition = Condition {
            attribute: target.id_attribute().to_string(),
            filter: Filter::new(Some("in"), FilterOp::In, Field::any(), target.id_attribute()),
            value: members,
        };
        target.paginated_instances(page, per_page, &[condition], &[]).await
    }

    async fn relation_add(
        &self,
        item: &Item,
        attribute: &str,
        target: &dyn Manager,
        target_item: &Item,
    ) -> Result<(), ApiError> {
        let member = target_item.get(target.id_attribute()).cloned().unwrap_or(Value::Null);
        let mut slot = self.tx.lock().await;
        let result = match self.open(&mut slot).await {
            Ok(conn) => self.relation_in(conn, item, attribute, target_item, &member, true).await,
            Err(e) => Err(e),
        };
        self.finish(&mut slot, result, true).await
    }

    async fn relation_remove(
        &self,
        item: &Item,
        attribute: &str,
        target: &dyn Manager,
        target_item: &Item,
    ) -> Result<(), ApiError> {
        self.relationship(attribute)?;
        let member = target_item.get(target.id_attribute()).cloned().unwrap_or(Value::Null);
        let current = self.read(&self.id_of(item)?).await?;
        let is_member = current
            .get(attribute)
            .and_then(Value::as_array)
            .map(|members| members.iter().any(|m| json_eq(m, &member)))
            .unwrap_or(false);
        if !is_member {
            return Ok(());
        }
        let mut slot = self.tx.lock().await;
        let result = match self.open(&mut slot).await {
            Ok(conn) => self.relation_in(conn, &current, attribute, target_item, &member, false).await,
            Err(e) => Err(e),
        };
        self.finish(&mut slot, result, true).await
    }

    async fn begin(&self) -> Result<(), ApiError> {
        let mut slot = self.tx.lock().await;
        self.open(&mut slot).await.map(|_| ())
    }

    async fn commit(&self) -> Result<(), ApiError> {
        if let Some(tx) = self.tx.lock().await.take() {
            tx.commit().await?;
        }
        Ok(())
    }
}

/// `\`, `%` and `_` taken literally inside a LIKE pattern.
fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn bind(q: &QueryBuf) -> sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let mut query = sqlx::query(&q.sql);
    for p in &q.params {
        query = query.bind(PgBindValue::from_json(p));
    }
    query
}

async fn fetch_rows(conn: &mut PgConnection, q: &QueryBuf) -> Result<Vec<PgRow>, ApiError> {
    bind(q).fetch_all(conn).await.map_err(|e| db_error(q, e))
}

async fn execute(conn: &mut PgConnection, q: &QueryBuf) -> Result<u64, ApiError> {
    bind(q)
        .execute(conn)
        .await
        .map(|done| done.rows_affected())
        .map_err(|e| db_error(q, e))
}

/// Integrity violations: `23505` is a duplicate key, any other `23xxx` a conflict.
fn db_error(q: &QueryBuf, error: sqlx::Error) -> ApiError {
    if let sqlx::Error::Database(db) = &error {
        let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
        if code == "23505" {
            let detail = db.try_downcast_ref::<PgDatabaseError>().and_then(|pg| pg.detail()).map(str::to_string);
            return ApiError::DuplicateKey { detail };
        }
        if code.starts_with("23") {
            return ApiError::BackendConflict {
                debug_info: Some(json!({"statement": q.sql, "message": db.message(), "code": code})),
            };
        }
    }
    ApiError::Db(error)
}

/// Decodes every column of a row to JSON, trying the native types in turn.
fn row_to_item(row: &PgRow) -> Item {
    use sqlx::Column;
    let mut map = Item::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    map
}

fn cell_to_value(row: &PgRow, name: &str) -> Value {
    macro_rules! try_as {
        ($ty:ty, $map:expr) => {
            if let Ok(v) = row.try_get::<Option<$ty>, _>(name) {
                return v.map($map).unwrap_or(Value::Null);
            }
        };
    }
    try_as!(i16, Value::from);
    try_as!(i32, Value::from);
    try_as!(i64, Value::from);
    try_as!(f32, |n: f32| json!(f64::from(n)));
    try_as!(f64, |n: f64| json!(n));
    try_as!(bool, Value::Bool);
    try_as!(uuid::Uuid, |u: uuid::Uuid| Value::String(u.to_string()));
    try_as!(chrono::DateTime<chrono::Utc>, |d: chrono::DateTime<chrono::Utc>| Value::String(
        d.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    ));
    try_as!(chrono::NaiveDateTime, |d: chrono::NaiveDateTime| Value::String(
        d.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
    ));
    try_as!(chrono::NaiveDate, |d: chrono::NaiveDate| Value::String(d.format("%Y-%m-%d").to_string()));
    try_as!(String, Value::String);
    try_as!(Value, |j: Value| j);
    try_as!(Vec<String>, |v: Vec<String>| json!(v));
    try_as!(Vec<i32>, |v: Vec<i32>| json!(v));
    try_as!(Vec<i64>, |v: Vec<i64>| json!(v));
    try_as!(Vec<f64>, |v: Vec<f64>| json!(v));
    try_as!(Vec<bool>, |v: Vec<bool>| json!(v));
    Value::Null
}
