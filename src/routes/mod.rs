//! Routes and their hypermedia links.
//!
//! A route is one HTTP method on a URL pattern below a resource root, with a
//! `rel` name and optional request/response schemas. Collection routes live
//! at `/{resource}/...`, item routes at `/{resource}/{id}/...`.

mod relation;

pub use relation::{ItemAttributeRoute, Relation};

use crate::api::Registry;
use crate::case::to_camel_case;
use crate::config::ApiConfig;
use crate::error::{ApiError, ConfigError};
use crate::extractors::Identity;
use crate::fields::Field;
use crate::manager::Manager;
use crate::natural_keys::{ref_schema, to_one_request_schema};
use crate::resource::{pagination_schema, Resource};
use crate::schema::Context;
use crate::Item;
use axum::http::Method;
use futures::future::BoxFuture;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Everything a custom route handler gets to work with.
pub struct RouteRequest {
    pub registry: Arc<Registry>,
    pub resource: Arc<Resource>,
    /// The resource's manager as seen by the requesting identity.
    pub manager: Arc<dyn Manager>,
    pub identity: Identity,
    /// The item of an item route, already read through `manager`.
    pub item: Option<Item>,
    pub body: Value,
    pub query: HashMap<String, String>,
}

impl RouteRequest {
    pub fn context(&self) -> Context<'_> {
        Context::new(&self.registry)
    }
}

/// Custom route handler. A `Null` result of a DELETE route renders as 204.
pub type RouteHandler = Arc<dyn Fn(RouteRequest) -> BoxFuture<'static, Result<Value, ApiError>> + Send + Sync>;

#[derive(Clone)]
pub(crate) enum RouteKind {
    DescribedBy,
    Instances,
    Create,
    Read,
    Update,
    Destroy,
    RelationInstances { attribute: String, target: String },
    RelationAdd { attribute: String, target: String },
    RelationRemove { attribute: String, target: String },
    AttributeRead { key: String, field: Field },
    AttributeWrite { key: String, field: Field },
    Custom(RouteHandler),
}

impl std::fmt::Debug for RouteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RouteKind::DescribedBy => "DescribedBy",
            RouteKind::Instances => "Instances",
            RouteKind::Create => "Create",
            RouteKind::Read => "Read",
            RouteKind::Update => "Update",
            RouteKind::Destroy => "Destroy",
            RouteKind::RelationInstances { .. } => "RelationInstances",
            RouteKind::RelationAdd { .. } => "RelationAdd",
            RouteKind::RelationRemove { .. } => "RelationRemove",
            RouteKind::AttributeRead { .. } => "AttributeRead",
            RouteKind::AttributeWrite { .. } => "AttributeWrite",
            RouteKind::Custom(_) => "Custom",
        };
        f.write_str(name)
    }
}

fn verb(method: &Method) -> &'static str {
    match *method {
        Method::POST => "create",
        Method::PATCH | Method::PUT => "update",
        Method::DELETE => "destroy",
        _ => "read",
    }
}

#[derive(Clone, Debug)]
pub struct Route {
    pub method: Method,
    pub rel: String,
    pub title: Option<String>,
    pub description: Option<String>,
    /// Request schema of a custom route, validated before the handler runs.
    pub schema: Option<Value>,
    pub target_schema: Option<Value>,
    attribute: String,
    item: bool,
    /// Path segments below the resource root (or below the item id).
    segments: Vec<String>,
    pub(crate) kind: RouteKind,
}

impl Route {
    fn with_kind(method: Method, attribute: &str, rel: &str, item: bool, segments: &[&str], kind: RouteKind) -> Self {
        Route {
            method,
            rel: rel.to_string(),
            title: None,
            description: None,
            schema: None,
            target_schema: None,
            attribute: attribute.to_string(),
            item,
            segments: segments.iter().map(|s| s.to_string()).collect(),
            kind,
        }
    }

    /// A collection route at `/{resource}/{attribute}`; rel defaults to
    /// camelCase `verb_attribute` (GET `rating` is `readRating`).
    pub fn new<F, Fut>(method: Method, attribute: &str, handler: F) -> Self
    where
        F: Fn(RouteRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ApiError>> + Send + 'static,
    {
        let rel = to_camel_case(&format!("{}_{}", verb(&method), attribute));
        let handler: RouteHandler = Arc::new(move |request| Box::pin(handler(request)));
        Route::with_kind(method, attribute, &rel, false, &[attribute], RouteKind::Custom(handler))
    }

    pub fn get<F, Fut>(attribute: &str, handler: F) -> Self
    where
        F: Fn(RouteRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ApiError>> + Send + 'static,
    {
        Route::new(Method::GET, attribute, handler)
    }

    pub fn post<F, Fut>(attribute: &str, handler: F) -> Self
    where
        F: Fn(RouteRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ApiError>> + Send + 'static,
    {
        Route::new(Method::POST, attribute, handler)
    }

    pub fn patch<F, Fut>(attribute: &str, handler: F) -> Self
    where
        F: Fn(RouteRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ApiError>> + Send + 'static,
    {
        Route::new(Method::PATCH, attribute, handler)
    }

    pub fn delete<F, Fut>(attribute: &str, handler: F) -> Self
    where
        F: Fn(RouteRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ApiError>> + Send + 'static,
    {
        Route::new(Method::DELETE, attribute, handler)
    }

    /// Moves the route below the item id; the handler receives the read item.
    pub fn item(mut self) -> Self {
        self.item = true;
        self
    }

    pub fn rel(mut self, rel: &str) -> Self {
        self.rel = rel.to_string();
        self
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn target_schema(mut self, schema: Value) -> Self {
        self.target_schema = Some(schema);
        self
    }

    /// Schema, instances, create, self, update and destroy.
    pub(crate) fn builtin() -> Vec<Route> {
        vec![
            Route::with_kind(Method::GET, "schema", "describedBy", false, &["schema"], RouteKind::DescribedBy),
            Route::with_kind(Method::GET, "instances", "instances", false, &[], RouteKind::Instances),
            Route::with_kind(Method::POST, "create", "create", false, &[], RouteKind::Create),
            Route::with_kind(Method::GET, "self", "self", true, &[], RouteKind::Read),
            Route::with_kind(Method::PATCH, "update", "update", true, &[], RouteKind::Update),
            Route::with_kind(Method::DELETE, "destroy", "destroy", true, &[], RouteKind::Destroy),
        ]
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    pub fn is_item_route(&self) -> bool {
        self.item
    }

    /// URL pattern relative to the resource root, `{}`-style parameters.
    pub fn pattern(&self) -> String {
        let mut out = String::new();
        if self.item {
            out.push_str("/{id}");
        }
        for segment in &self.segments {
            out.push('/');
            out.push_str(segment);
        }
        out
    }

    /// Path for the axum router under `route_prefix`.
    pub(crate) fn axum_path(&self, route_prefix: &str) -> String {
        let pattern = self
            .pattern()
            .split('/')
            .map(|segment| match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(name) => format!(":{}", name),
                None => segment.to_string(),
            })
            .collect::<Vec<_>>()
            .join("/");
        format!("{}{}", route_prefix, pattern)
    }

    /// Resource a relation route points at.
    pub(crate) fn target(&self) -> Option<&str> {
        match &self.kind {
            RouteKind::RelationInstances { target, .. }
            | RouteKind::RelationAdd { target, .. }
            | RouteKind::RelationRemove { target, .. } => Some(target),
            _ => None,
        }
    }

    pub(crate) fn bind(&mut self, owner: &str) {
        if let RouteKind::AttributeRead { field, .. } | RouteKind::AttributeWrite { field, .. } = &mut self.kind {
            field.bind(owner);
        }
    }

    pub(crate) fn resolve(&mut self, is_registered: &dyn Fn(&str) -> bool) -> Result<(), ConfigError> {
        if let RouteKind::AttributeRead { field, .. } | RouteKind::AttributeWrite { field, .. } = &mut self.kind {
            return field.resolve(is_registered);
        }
        match self.target() {
            Some(target) if !is_registered(target) => Err(ConfigError::UnresolvedReference(target.to_string())),
            _ => Ok(()),
        }
    }

    fn schemas(&self, resource: &Resource, ctx: Context<'_>, api: &ApiConfig) -> (Option<Value>, Option<Value>) {
        let this = || json!({"$ref": "#"});
        match &self.kind {
            RouteKind::DescribedBy => (None, None),
            RouteKind::Instances => (
                Some(resource.instances_schema(ctx, api)),
                Some(json!({"type": "array", "items": this()})),
            ),
            RouteKind::Create => (Some(resource.schema.create_schema(ctx)), Some(this())),
            RouteKind::Read => (None, Some(this())),
            RouteKind::Update => (Some(resource.schema.update_schema(ctx)), Some(this())),
            RouteKind::Destroy => (None, None),
            RouteKind::RelationInstances { target, .. } => (
                Some(pagination_schema(api)),
                Some(json!({"type": "array", "items": ref_schema(&ctx.route_prefix(target))})),
            ),
            RouteKind::RelationAdd { target, .. } => (
                Some(to_one_request_schema(target, ctx)),
                Some(ref_schema(&ctx.route_prefix(target))),
            ),
            RouteKind::RelationRemove { .. } => (None, None),
            RouteKind::AttributeRead { field, .. } => (None, Some(field.response(ctx))),
            RouteKind::AttributeWrite { field, .. } => (Some(field.request(ctx)), Some(field.response(ctx))),
            RouteKind::Custom(_) => (self.schema.clone(), self.target_schema.clone()),
        }
    }

    /// The link object of this route in the resource's hyper-schema.
    pub fn link(&self, resource: &Resource, ctx: Context<'_>, api: &ApiConfig) -> Value {
        let mut link = Map::new();
        link.insert("rel".into(), json!(self.rel));
        link.insert("href".into(), json!(format!("{}{}", ctx.route_prefix(&resource.name), self.pattern())));
        link.insert("method".into(), json!(self.method.as_str()));
        if let Some(title) = &self.title {
            link.insert("title".into(), json!(title));
        }
        if let Some(description) = &self.description {
            link.insert("description".into(), json!(description));
        }
        let (schema, target_schema) = self.schemas(resource, ctx, api);
        if let Some(schema) = schema {
            link.insert("schema".into(), schema);
        }
        if let Some(target_schema) = target_schema {
            link.insert("targetSchema".into(), target_schema);
        }
        Value::Object(link)
    }
}
