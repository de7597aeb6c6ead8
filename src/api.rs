//! The api: registers resources, resolves references between them and serves
//! everything through one axum router.

use crate::config::{validate_api_config, ApiConfig};
use crate::error::ConfigError;
use crate::extractors::Identity;
use crate::handlers::{dispatch, method_not_allowed, not_found, root_schema, Incoming, RouteTarget};
use crate::resource::{Resource, ResourceDefinition};
use crate::schema::{Context, Draft4Validator, SchemaValidator};
use crate::state::ApiState;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, Method},
    routing::{get, MethodFilter, MethodRouter},
    Router,
};
use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

/// Router transform applied to the finished api router (authentication, CORS, ...).
pub type Decorator = Arc<dyn Fn(Router) -> Router + Send + Sync>;

/// Collects resources until the router is built.
pub struct Api {
    config: ApiConfig,
    resources: IndexMap<String, Arc<Resource>>,
    decorators: Vec<Decorator>,
    validator: Arc<dyn SchemaValidator>,
}

impl Api {
    pub fn new(config: ApiConfig) -> Self {
        Api {
            config,
            resources: IndexMap::new(),
            decorators: Vec::new(),
            validator: Arc::new(Draft4Validator),
        }
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn with_validator(mut self, validator: impl SchemaValidator + 'static) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    pub fn decorator<F>(mut self, decorator: F) -> Self
    where
        F: Fn(Router) -> Router + Send + Sync + 'static,
    {
        self.decorators.push(Arc::new(decorator));
        self
    }

    /// Adding the same resource twice is a no-op; a different resource under a
    /// taken name is rejected.
    pub fn add_resource(&mut self, resource: Arc<Resource>) -> Result<(), ConfigError> {
        if let Some(existing) = self.resources.get(&resource.name) {
            if Arc::ptr_eq(existing, &resource) {
                return Ok(());
            }
            return Err(ConfigError::DuplicateResource(resource.name.clone()));
        }
        tracing::info!(resource = %resource.name, routes = resource.routes.len(), "resource registered");
        self.resources.insert(resource.name.clone(), resource);
        Ok(())
    }

    /// Builds `definition` and registers the result.
    pub fn add(&mut self, definition: ResourceDefinition) -> Result<Arc<Resource>, ConfigError> {
        let resource = definition.build()?;
        self.add_resource(Arc::clone(&resource))?;
        Ok(resource)
    }

    pub fn resource(&self, name: &str) -> Option<&Arc<Resource>> {
        self.resources.get(name)
    }

    /// Resolves every reference against the registered names and freezes the registry.
    pub fn build(&self) -> Result<Registry, ConfigError> {
        validate_api_config(&self.config)?;
        let is_registered = |name: &str| self.resources.contains_key(name);
        let mut resources = BTreeMap::new();
        for (name, resource) in &self.resources {
            resources.insert(name.clone(), Arc::new(resource.resolved(&is_registered)?));
        }
        Ok(Registry {
            resources,
            config: self.config.clone(),
            validator: Arc::clone(&self.validator),
        })
    }

    /// Builds the registry and mounts every route, the api schema and the body limit.
    pub fn into_router(self) -> Result<Router, ConfigError> {
        let registry = Arc::new(self.build()?);
        let state = ApiState { registry: Arc::clone(&registry) };
        let ctx = Context::new(&registry);

        let mut paths: IndexMap<String, MethodRouter<ApiState>> = IndexMap::new();
        paths.insert(
            format!("{}/schema", registry.prefix()),
            get(|State(state): State<ApiState>| root_schema(state)),
        );
        for resource in registry.resources.values() {
            let route_prefix = ctx.route_prefix(&resource.name);
            for (index, route) in resource.routes.iter().enumerate() {
                let filter = method_filter(&route.method).ok_or_else(|| {
                    ConfigError::Validation(format!("{}: unsupported method {}", resource.name, route.method))
                })?;
                let target = RouteTarget { resource: resource.name.clone(), index };
                let handler = move |State(state): State<ApiState>,
                                    identity: Identity,
                                    params: Option<Path<HashMap<String, String>>>,
                                    Query(query): Query<HashMap<String, String>>,
                                    headers: HeaderMap,
                                    body: Bytes| {
                    let target = target.clone();
                    let params = params.map(|Path(p)| p).unwrap_or_default();
                    async move { dispatch(state, target, Incoming { identity, params, query, headers, body }).await }
                };
                let path = route.axum_path(&route_prefix);
                let methods = paths.shift_remove(&path).unwrap_or_else(MethodRouter::new);
                paths.insert(path, methods.on(filter, handler));
            }
        }

        let mut router: Router<ApiState> = Router::new();
        for (path, methods) in paths {
            tracing::debug!(path = %path, "route mounted");
            router = router.route(
                &path,
                methods.fallback(|State(state): State<ApiState>| method_not_allowed(state)),
            );
        }
        let mut router = router
            .fallback(|State(state): State<ApiState>| not_found(state))
            .layer(DefaultBodyLimit::disable())
            .layer(RequestBodyLimitLayer::new(registry.config.max_body_bytes))
            .with_state(state);
        for decorator in &self.decorators {
            router = decorator(router);
        }
        tracing::info!(
            prefix = %registry.prefix(),
            resources = registry.resources.len(),
            "api router ready"
        );
        Ok(router)
    }
}

fn method_filter(method: &Method) -> Option<MethodFilter> {
    match *method {
        Method::GET => Some(MethodFilter::GET),
        Method::POST => Some(MethodFilter::POST),
        Method::PATCH => Some(MethodFilter::PATCH),
        Method::PUT => Some(MethodFilter::PUT),
        Method::DELETE => Some(MethodFilter::DELETE),
        _ => None,
    }
}

/// Resolved resources by name, shared by every request.
pub struct Registry {
    resources: BTreeMap<String, Arc<Resource>>,
    config: ApiConfig,
    validator: Arc<dyn SchemaValidator>,
}

impl Registry {
    pub fn resource(&self, name: &str) -> Option<&Arc<Resource>> {
        self.resources.get(name)
    }

    /// Resources in name order.
    pub fn resources(&self) -> impl Iterator<Item = &Arc<Resource>> {
        self.resources.values()
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn prefix(&self) -> &str {
        &self.config.prefix
    }

    pub fn validator(&self) -> &dyn SchemaValidator {
        self.validator.as_ref()
    }

    pub fn context(&self) -> Context<'_> {
        Context::new(self)
    }

    /// Api hyper-schema: one `$ref` per resource schema, sorted by name.
    pub fn root_schema(&self) -> Value {
        let mut schema = Map::new();
        schema.insert("$schema".into(), json!("http://json-schema.org/draft-04/hyper-schema#"));
        if let Some(title) = &self.config.title {
            schema.insert("title".into(), json!(title));
        }
        if let Some(description) = &self.config.description {
            schema.insert("description".into(), json!(description));
        }
        let properties: Map<String, Value> = self
            .resources
            .keys()
            .map(|name| (name.clone(), json!({"$ref": format!("{}/{}/schema#", self.config.prefix, name)})))
            .collect();
        schema.insert("properties".into(), Value::Object(properties));
        Value::Object(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::Field;

    #[test]
    fn registration_is_idempotent_per_resource() {
        let mut api = Api::new(ApiConfig::default());
        let book = ResourceDefinition::named("book").build().unwrap();
        api.add_resource(Arc::clone(&book)).unwrap();
        api.add_resource(Arc::clone(&book)).unwrap();
        let other = ResourceDefinition::named("book").build().unwrap();
        assert!(matches!(api.add_resource(other), Err(ConfigError::DuplicateResource(name)) if name == "book"));
    }

    #[test]
    fn references_resolve_only_against_registered_resources() {
        let mut api = Api::new(ApiConfig::default());
        api.add(ResourceDefinition::named("book").field("author", Field::to_one("author")))
            .unwrap();
        assert!(matches!(api.build(), Err(ConfigError::UnresolvedReference(name)) if name == "author"));
        api.add(ResourceDefinition::named("author").field("name", Field::string())).unwrap();
        let registry = api.build().unwrap();
        let names: Vec<&str> = registry.resources().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["author", "book"]);
    }

    #[test]
    fn root_schema_lists_resources_by_name() {
        let mut api = Api::new(ApiConfig { prefix: "/api".into(), title: Some("Library".into()), ..Default::default() });
        api.add(ResourceDefinition::named("zebra")).unwrap();
        api.add(ResourceDefinition::named("apple")).unwrap();
        let schema = api.build().unwrap().root_schema();
        assert_eq!(schema["title"], json!("Library"));
        let keys: Vec<&String> = schema["properties"].as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["apple", "zebra"]);
        assert_eq!(schema["properties"]["apple"], json!({"$ref": "/api/apple/schema#"}));
    }
}
