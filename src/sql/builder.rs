//! Builds parameterized SELECT, INSERT, UPDATE, DELETE and membership statements from table info.

use crate::config::{qualified, quote_ident, ColumnInfo, RelationshipConfig, TableInfo};
use crate::sql::params::pg_array_literal;
use crate::Item;
use serde_json::Value;

/// Alias of the resource table in every SELECT.
pub const MAIN_ALIAS: &str = "main";

/// A statement with `$n` placeholders and the values bound to them, in order.
#[derive(Clone, Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    pub fn new() -> Self {
        QueryBuf::default()
    }

    fn push_param(&mut self, v: Value) -> usize {
        self.params.push(v);
        self.params.len()
    }

    /// Appends `expr`, renumbering its `?` placeholders after the params already bound.
    pub fn push_expr(&mut self, expr: &SqlExpr) {
        let mut params = expr.params.iter();
        for c in expr.sql.chars() {
            if c == '?' {
                let value = params.next().cloned().unwrap_or(Value::Null);
                let n = self.push_param(value);
                self.sql.push('$');
                self.sql.push_str(&n.to_string());
            } else {
                self.sql.push(c);
            }
        }
    }
}

/// A boolean or ordering fragment with `?` placeholders; composable before numbering.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SqlExpr {
    pub sql: String,
    pub params: Vec<Value>,
}

impl SqlExpr {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        SqlExpr { sql: sql.into(), params }
    }

    pub fn raw(sql: impl Into<String>) -> Self {
        SqlExpr::new(sql, Vec::new())
    }

    /// Parenthesized operands joined by `op`; `empty` stands in for an empty list.
    pub fn join(exprs: Vec<SqlExpr>, op: &str, empty: &str) -> SqlExpr {
        if exprs.is_empty() {
            return SqlExpr::raw(empty);
        }
        let mut sql = Vec::with_capacity(exprs.len());
        let mut params = Vec::new();
        for expr in exprs {
            sql.push(format!("({})", expr.sql));
            params.extend(expr.params);
        }
        SqlExpr::new(sql.join(&format!(" {} ", op)), params)
    }
}

/// Filters and ordering of one SELECT, before it is rendered.
#[derive(Clone, Debug, Default)]
pub struct SelectQuery {
    pub filters: Vec<SqlExpr>,
    pub order: Vec<SqlExpr>,
}

/// `main."column"`
pub fn column_ref(name: &str) -> String {
    format!("{}.{}", MAIN_ALIAS, quote_ident(name))
}

/// Placeholder cast to the column type, so text-bound values land typed.
pub fn cast_placeholder(column: &ColumnInfo) -> String {
    format!("?::{}", column.sql_type)
}

/// Value as bound for `column`: JSON arrays become PostgreSQL array literals.
pub fn column_value(column: &ColumnInfo, value: &Value) -> Value {
    match value {
        Value::Array(items) if column.is_array() => Value::String(pg_array_literal(items)),
        other => other.clone(),
    }
}

fn select_column(column: &ColumnInfo) -> String {
    let q = quote_ident(&column.name);
    let expr = if column.is_custom_type() {
        format!("{}::text", column_ref(&column.name))
    } else if column.numeric {
        format!("{}::float8", column_ref(&column.name))
    } else {
        column_ref(&column.name)
    };
    format!("{} AS {}", expr, q)
}

/// Id array of one to-many relation, aggregated per row.
fn relation_column(table: &TableInfo, relation: &RelationshipConfig) -> String {
    let (from, key, member) = relation_parts(table, relation);
    format!(
        "(SELECT COALESCE(json_agg(r.{member} ORDER BY r.{member}), '[]'::json) FROM {from} r WHERE r.{key} = {owner}) AS {attr}",
        member = member,
        from = from,
        key = key,
        owner = column_ref(&table.pk),
        attr = quote_ident(relation.attribute()),
    )
}

/// `(table, owner key column, member id column)` of a relation, quoted.
fn relation_parts(table: &TableInfo, relation: &RelationshipConfig) -> (String, String, String) {
    match relation {
        RelationshipConfig::ManyToMany { join_table, source_column, target_column, .. } => (
            qualified(&table.schema, join_table),
            quote_ident(source_column),
            quote_ident(target_column),
        ),
        RelationshipConfig::OneToMany { target_table, target_primary_key, foreign_key, .. } => (
            qualified(&table.schema, target_table),
            quote_ident(foreign_key),
            quote_ident(target_primary_key),
        ),
    }
}

fn select_list(table: &TableInfo, relations: &[RelationshipConfig]) -> String {
    table
        .columns
        .iter()
        .map(select_column)
        .chain(relations.iter().map(|r| relation_column(table, r)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn push_where(q: &mut QueryBuf, filters: &[SqlExpr]) {
    if filters.is_empty() {
        return;
    }
    q.sql.push_str(" WHERE ");
    q.push_expr(&SqlExpr::join(filters.to_vec(), "AND", "TRUE"));
}

/// SELECT with relation id arrays, filters, ordering and optional LIMIT/OFFSET.
pub fn select(
    table: &TableInfo,
    relations: &[RelationshipConfig],
    query: &SelectQuery,
    limit: Option<u64>,
    offset: Option<u64>,
) -> QueryBuf {
    let mut q = QueryBuf::new();
    q.sql = format!("SELECT {} FROM {} {}", select_list(table, relations), table.qualified(), MAIN_ALIAS);
    push_where(&mut q, &query.filters);
    if !query.order.is_empty() {
        q.sql.push_str(" ORDER BY ");
        for (i, term) in query.order.iter().enumerate() {
            if i > 0 {
                q.sql.push_str(", ");
            }
            q.push_expr(term);
        }
    }
    if let Some(n) = limit {
        q.sql.push_str(&format!(" LIMIT {}", n));
    }
    if let Some(n) = offset {
        q.sql.push_str(&format!(" OFFSET {}", n));
    }
    q
}

/// `SELECT COUNT(*)` over the same filters.
pub fn count(table: &TableInfo, query: &SelectQuery) -> QueryBuf {
    let mut q = QueryBuf::new();
    q.sql = format!("SELECT COUNT(*) AS total FROM {} {}", table.qualified(), MAIN_ALIAS);
    push_where(&mut q, &query.filters);
    q
}

/// INSERT of the columns present in `values`; columns left out take their DB default.
/// Returns the new primary key.
pub fn insert(table: &TableInfo, values: &Item) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for column in &table.columns {
        let Some(value) = values.get(&column.name) else { continue };
        let n = q.push_param(column_value(column, value));
        cols.push(quote_ident(&column.name));
        placeholders.push(format!("${}::{}", n, column.sql_type));
    }
    q.sql = if cols.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", table.qualified(), quote_ident(&table.pk))
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            table.qualified(),
            cols.join(", "),
            placeholders.join(", "),
            quote_ident(&table.pk)
        )
    };
    q
}

fn pk_match(table: &TableInfo, q: &mut QueryBuf, id: &Value) -> String {
    let n = q.push_param(id.clone());
    format!("{} = ${}::{}", quote_ident(&table.pk), n, owner_cast(table))
}

/// UPDATE by id of the columns present in `changes`; `None` when no column changes.
pub fn update(table: &TableInfo, id: &Value, changes: &Item) -> Option<QueryBuf> {
    let mut q = QueryBuf::new();
    let mut sets = Vec::new();
    for column in &table.columns {
        if column.name == table.pk {
            continue;
        }
        let Some(value) = changes.get(&column.name) else { continue };
        let n = q.push_param(column_value(column, value));
        sets.push(format!("{} = ${}::{}", quote_ident(&column.name), n, column.sql_type));
    }
    if sets.is_empty() {
        return None;
    }
    let condition = pk_match(table, &mut q, id);
    q.sql = format!(
        "UPDATE {} SET {} WHERE {} RETURNING {}",
        table.qualified(),
        sets.join(", "),
        condition,
        quote_ident(&table.pk)
    );
    Some(q)
}

/// DELETE by id, returning the deleted key.
pub fn delete(table: &TableInfo, id: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let condition = pk_match(table, &mut q, id);
    q.sql = format!("DELETE FROM {} WHERE {} RETURNING {}", table.qualified(), condition, quote_ident(&table.pk));
    q
}

fn owner_cast(table: &TableInfo) -> String {
    table.column(&table.pk).map(|c| c.sql_type.clone()).unwrap_or_else(|| "text".into())
}

/// Adds `member` to the relation of `owner`; adding an existing member changes nothing.
pub fn add_member(table: &TableInfo, relation: &RelationshipConfig, owner: &Value, member: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    q.params = vec![owner.clone(), member.clone()];
    q.sql = match relation {
        RelationshipConfig::ManyToMany { join_table, source_column, target_column, target_type, .. } => {
            let from = qualified(&table.schema, join_table);
            let (source, target) = (quote_ident(source_column), quote_ident(target_column));
            format!(
                "INSERT INTO {from} ({source}, {target}) SELECT $1::{owner_type}, $2::{target_type} \
                 WHERE NOT EXISTS (SELECT 1 FROM {from} WHERE {source}::text = $1 AND {target}::text = $2)",
                from = from,
                source = source,
                target = target,
                owner_type = owner_cast(table),
                target_type = target_type,
            )
        }
        RelationshipConfig::OneToMany { target_table, target_primary_key, foreign_key, .. } => format!(
            "UPDATE {} SET {} = $1::{} WHERE {}::text = $2",
            qualified(&table.schema, target_table),
            quote_ident(foreign_key),
            owner_cast(table),
            quote_ident(target_primary_key)
        ),
    };
    q
}

/// Removes `member` from the relation of `owner`; a non-member is left alone.
pub fn remove_member(table: &TableInfo, relation: &RelationshipConfig, owner: &Value, member: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    q.params = vec![owner.clone(), member.clone()];
    q.sql = match relation {
        RelationshipConfig::ManyToMany { join_table, source_column, target_column, .. } => format!(
            "DELETE FROM {} WHERE {}::text = $1 AND {}::text = $2",
            qualified(&table.schema, join_table),
            quote_ident(source_column),
            quote_ident(target_column)
        ),
        RelationshipConfig::OneToMany { target_table, target_primary_key, foreign_key, .. } => format!(
            "UPDATE {} SET {fk} = NULL WHERE {fk}::text = $1 AND {}::text = $2",
            qualified(&table.schema, target_table),
            quote_ident(target_primary_key),
            fk = quote_ident(foreign_key)
        ),
    };
    q
}

/// Rows of `main` whose relation contains `member`.
pub fn relation_contains(table: &TableInfo, relation: &RelationshipConfig, member: &Value) -> SqlExpr {
    let (from, key, member_col) = relation_parts(table, relation);
    SqlExpr::new(
        format!(
            "EXISTS (SELECT 1 FROM {} r WHERE r.{} = {} AND r.{}::text = ?)",
            from,
            key,
            column_ref(&table.pk),
            member_col
        ),
        vec![member.clone()],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve_table, ModelDefinition};
    use serde_json::json;

    fn book() -> (TableInfo, Vec<RelationshipConfig>) {
        let model: ModelDefinition = serde_json::from_value(json!({
            "table": "book",
            "columns": [
                {"name": "id", "type": "serial", "nullable": false},
                {"name": "title", "type": "text", "nullable": false},
                {"name": "price", "type": "numeric"},
                {"name": "labels", "type": "text[]"}
            ],
            "relationships": [
                {"kind": "many_to_many", "attribute": "tags", "join_table": "book_tag",
                 "source_column": "book_id", "target_column": "tag_id"}
            ]
        }))
        .unwrap();
        let table = resolve_table(&model).unwrap();
        (table, model.relationships)
    }

    #[test]
    fn expressions_renumber_into_the_buffer() {
        let mut q = QueryBuf::new();
        q.sql.push_str("SELECT 1 WHERE ");
        let expr = SqlExpr::join(
            vec![SqlExpr::new("a = ?::integer", vec![json!(1)]), SqlExpr::new("b = ?", vec![json!("x")])],
            "AND",
            "TRUE",
        );
        q.push_expr(&expr);
        assert_eq!(q.sql, "SELECT 1 WHERE (a = $1::integer) AND (b = $2)");
        assert_eq!(q.params, vec![json!(1), json!("x")]);
        assert_eq!(SqlExpr::join(vec![], "OR", "FALSE").sql, "FALSE");
    }

    #[test]
    fn select_lists_columns_and_relations() {
        let (table, relations) = book();
        let query = SelectQuery {
            filters: vec![SqlExpr::new("main.\"title\" = ?::text", vec![json!("Foo")])],
            order: vec![SqlExpr::raw("main.\"id\" ASC")],
        };
        let q = select(&table, &relations, &query, Some(20), Some(40));
        assert!(q.sql.starts_with("SELECT main.\"id\" AS \"id\", main.\"title\" AS \"title\", main.\"price\"::float8 AS \"price\""));
        assert!(q.sql.contains("json_agg(r.\"tag_id\" ORDER BY r.\"tag_id\")"));
        assert!(q.sql.contains("FROM \"public\".\"book_tag\" r WHERE r.\"book_id\" = main.\"id\") AS \"tags\""));
        assert!(q.sql.ends_with("FROM \"public\".\"book\" main WHERE (main.\"title\" = $1::text) ORDER BY main.\"id\" ASC LIMIT 20 OFFSET 40"));
        assert_eq!(q.params, vec![json!("Foo")]);
    }

    #[test]
    fn insert_binds_provided_columns_with_casts() {
        let (table, _) = book();
        let values: Item = json!({"title": "Foo", "labels": ["a", "b"]}).as_object().cloned().unwrap();
        let q = insert(&table, &values);
        assert_eq!(
            q.sql,
            "INSERT INTO \"public\".\"book\" (\"title\", \"labels\") VALUES ($1::text, $2::text[]) RETURNING \"id\""
        );
        assert_eq!(q.params, vec![json!("Foo"), json!("{\"a\",\"b\"}")]);
    }

    #[test]
    fn update_skips_unknown_and_empty_changes() {
        let (table, _) = book();
        let changes: Item = json!({"title": "Bar", "nope": 1}).as_object().cloned().unwrap();
        let q = update(&table, &json!(3), &changes).unwrap();
        assert_eq!(
            q.sql,
            "UPDATE \"public\".\"book\" SET \"title\" = $1::text WHERE \"id\" = $2::integer RETURNING \"id\""
        );
        assert!(update(&table, &json!(3), &Item::new()).is_none());
    }

    #[test]
    fn membership_statements() {
        let (table, relations) = book();
        let add = add_member(&table, &relations[0], &json!(1), &json!(2));
        assert!(add.sql.starts_with("INSERT INTO \"public\".\"book_tag\" (\"book_id\", \"tag_id\") SELECT $1::integer, $2::integer"));
        let remove = remove_member(&table, &relations[0], &json!(1), &json!(2));
        assert_eq!(
            remove.sql,
            "DELETE FROM \"public\".\"book_tag\" WHERE \"book_id\"::text = $1 AND \"tag_id\"::text = $2"
        );
        let contains = relation_contains(&table, &relations[0], &json!(2));
        assert!(contains.sql.starts_with("EXISTS (SELECT 1 FROM \"public\".\"book_tag\" r"));
    }
}
