//! Runs one route of one resource: item lookup, body parsing, manager call,
//! response formatting.

use crate::error::ApiError;
use crate::extractors::Identity;
use crate::fields::id_segment;
use crate::natural_keys::{resolve_reference, to_one_request_schema};
use crate::pagination::Pagination;
use crate::resource::{parse_page, Resource};
use crate::response;
use crate::routes::{Route, RouteKind, RouteRequest};
use crate::schema::{ConvertMode, Context};
use crate::state::ApiState;
use crate::Item;
use axum::{
    body::Bytes,
    http::{header, HeaderMap, HeaderValue, Method},
    response::Response,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Which route a generated axum handler serves.
#[derive(Clone, Debug)]
pub(crate) struct RouteTarget {
    pub resource: String,
    pub index: usize,
}

/// Request parts the dispatcher needs, as extracted by axum.
pub(crate) struct Incoming {
    pub identity: Identity,
    pub params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

pub(crate) async fn dispatch(state: ApiState, target: RouteTarget, incoming: Incoming) -> Response {
    let registry = Arc::clone(&state.registry);
    let debug = registry.config().debug;
    let Some(resource) = registry.resource(&target.resource).cloned() else {
        return ApiError::Internal(format!("resource '{}' is not registered", target.resource)).into_response_with(debug);
    };
    let Some(route) = resource.routes.get(target.index) else {
        return ApiError::Internal(format!("{} has no route #{}", resource.name, target.index)).into_response_with(debug);
    };
    tracing::debug!(
        resource = %resource.name,
        rel = %route.rel,
        method = %route.method,
        user = ?incoming.identity.user_id,
        "dispatch"
    );
    match run(&state, &resource, route, incoming).await {
        Ok(response) => response,
        Err(e) => e.into_response_with(debug),
    }
}

fn parse_body(method: &Method, headers: &HeaderMap, body: &Bytes) -> Result<Value, ApiError> {
    if matches!(*method, Method::GET | Method::DELETE) || body.is_empty() {
        return Ok(Value::Null);
    }
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| {
            let mime = ct.split(';').next().unwrap_or("").trim();
            mime == "application/json" || mime.ends_with("+json")
        })
        .unwrap_or(false);
    if !is_json {
        return Err(ApiError::RequestMustBeJson);
    }
    serde_json::from_slice(body).map_err(|e| ApiError::InvalidJson(e.to_string()))
}

fn path_param<'a>(params: &'a HashMap<String, String>, name: &str) -> Result<&'a str, ApiError> {
    params
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| ApiError::Internal(format!("missing path parameter '{}'", name)))
}

/// Formats a page of items and attaches `Link` and `X-Total-Count` headers.
fn paginated(items: Vec<Value>, pagination: &Pagination, path: &str, debug: bool) -> Response {
    let mut out = response::ok(&Value::Array(items), debug);
    let headers = out.headers_mut();
    if let Ok(link) = HeaderValue::from_str(&pagination.link_header(path)) {
        headers.insert(header::LINK, link);
    }
    headers.insert("X-Total-Count", HeaderValue::from(pagination.total));
    out
}

fn item_ref(ctx: Context<'_>, resource: &str, id: &Value) -> Value {
    json!({"$ref": format!("{}/{}", ctx.route_prefix(resource), id_segment(id))})
}

fn item_id(resource: &Resource, item: &Item) -> Value {
    item.get(resource.id_attribute()).cloned().unwrap_or(Value::Null)
}

async fn run(state: &ApiState, resource: &Arc<Resource>, route: &Route, incoming: Incoming) -> Result<Response, ApiError> {
    let registry = &state.registry;
    let api = registry.config();
    let debug = api.debug;
    let ctx = Context::new(registry);
    let Incoming { identity, params, query, headers, body } = incoming;
    let manager = resource.manager_for(&identity);

    let body = parse_body(&route.method, &headers, &body)?;
    let item = if route.is_item_route() {
        let id = resource.parse_id(path_param(&params, "id")?)?;
        Some(manager.read(&id).await?)
    } else {
        None
    };

    match (&route.kind, item) {
        (RouteKind::DescribedBy, _) => Ok(response::schema(&resource.described_by(ctx, api), debug)),
        (RouteKind::Instances, _) => {
            let q = resource.parse_instances(&query, ctx, api).await?;
            let page = manager
                .paginated_instances(q.page, q.per_page, &q.where_, &q.sort)
                .await?
                .ensure_exists()?;
            let items = page.items.iter().map(|i| resource.schema.format(i, ctx)).collect();
            Ok(paginated(items, &page, &ctx.route_prefix(&resource.name), debug))
        }
        (RouteKind::Create, _) => {
            let properties = resource.schema.convert(&body, ConvertMode::Create, ctx).await?;
            let created = manager.create(properties, true).await?;
            Ok(response::ok(&resource.schema.format(&created, ctx), debug))
        }
        (RouteKind::Read, Some(item)) => Ok(response::ok(&resource.schema.format(&item, ctx), debug)),
        (RouteKind::Update, Some(item)) => {
            let changes = resource.schema.convert(&body, ConvertMode::Patch, ctx).await?;
            let updated = manager.update(&item, changes, true).await?;
            Ok(response::ok(&resource.schema.format(&updated, ctx), debug))
        }
        (RouteKind::Destroy, Some(item)) => {
            manager.delete(&item).await?;
            Ok(response::no_content())
        }
        (RouteKind::RelationInstances { attribute, target }, Some(item)) => {
            let target_resource = ctx.resource(target)?;
            let target_manager = target_resource.manager_for(&identity);
            let (page, per_page) = parse_page(&query, ctx, api)?;
            let page = manager
                .relation_instances(&item, attribute, target_manager.as_ref(), page, per_page)
                .await?
                .ensure_exists()?;
            let refs = page
                .items
                .iter()
                .map(|child| item_ref(ctx, target, &item_id(target_resource, child)))
                .collect();
            let path = format!(
                "{}/{}/{}",
                ctx.route_prefix(&resource.name),
                id_segment(&item_id(resource, &item)),
                attribute
            );
            Ok(paginated(refs, &page, &path, debug))
        }
        (RouteKind::RelationAdd { attribute, target }, Some(item)) => {
            let target_resource = ctx.resource(target)?;
            let target_manager = target_resource.manager_for(&identity);
            ctx.validate(&body, &to_one_request_schema(target, ctx))?;
            let child_id = resolve_reference(target, &body, ctx).await?;
            let child = target_manager.read(&child_id).await?;
            manager.begin().await?;
            manager.relation_add(&item, attribute, target_manager.as_ref(), &child).await?;
            manager.commit().await?;
            Ok(response::ok(&item_ref(ctx, target, &child_id), debug))
        }
        (RouteKind::RelationRemove { attribute, target }, Some(item)) => {
            let target_resource = ctx.resource(target)?;
            let target_manager = target_resource.manager_for(&identity);
            let child_id = target_resource.parse_id(path_param(&params, "target_id")?)?;
            let child = target_manager.read(&child_id).await?;
            manager.begin().await?;
            manager.relation_remove(&item, attribute, target_manager.as_ref(), &child).await?;
            manager.commit().await?;
            Ok(response::no_content())
        }
        (RouteKind::AttributeRead { key, field }, Some(item)) => Ok(response::ok(&field.output(key, &item, ctx), debug)),
        (RouteKind::AttributeWrite { key, field }, Some(item)) => {
            let value = field.convert(&body, ctx).await.map_err(|e| e.prefixed(json!(key)))?;
            let mut changes = Item::new();
            changes.insert(field.attribute_or(key).to_string(), value);
            let updated = manager.update(&item, changes, true).await?;
            Ok(response::ok(&field.output(key, &updated, ctx), debug))
        }
        (RouteKind::Custom(handler), item) => {
            if let Some(schema) = &route.schema {
                ctx.validate(&body, schema)?;
            }
            let request = RouteRequest {
                registry: Arc::clone(registry),
                resource: Arc::clone(resource),
                manager,
                identity,
                item,
                body,
                query,
            };
            let value = handler(request).await?;
            if value.is_null() && route.method == Method::DELETE {
                Ok(response::no_content())
            } else {
                Ok(response::ok(&value, debug))
            }
        }
        (_, None) => Err(ApiError::Internal(format!("{} route '{}' needs an item", resource.name, route.rel))),
    }
}

/// `GET {prefix}/schema`: one `$ref` per resource, by name.
pub(crate) async fn root_schema(state: ApiState) -> Response {
    let registry = &state.registry;
    response::schema(&registry.root_schema(), registry.config().debug)
}

/// Unknown paths.
pub(crate) async fn not_found(state: ApiState) -> Response {
    ApiError::PageNotFound.into_response_with(state.registry.config().debug)
}

/// Known paths with a method none of their routes accept.
pub(crate) async fn method_not_allowed(state: ApiState) -> Response {
    ApiError::MethodNotAllowed.into_response_with(state.registry.config().debug)
}
