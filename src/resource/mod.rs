//! Resources: a named field set bound to a manager, with its routes.
//!
//! A [`ResourceDefinition`] collects declarations; `build` freezes them into a
//! [`Resource`] whose references are resolved later, once the api knows every
//! resource name.

mod instances;

pub use instances::{pagination_schema, parse_page, InstancesQuery};

use crate::config::{validate_resource_config, ApiConfig, IdFieldKind, ResourceConfig};
use crate::error::{ApiError, ConfigError};
use crate::extractors::Identity;
use crate::fields::{Field, Io};
use crate::filters::{filters_for_fields, FieldFilters};
use crate::manager::{Manager, ManagerContext, ManagerFactory, MemoryBackend};
use crate::natural_keys::KeyResolver;
use crate::permissions::{PermissionCheckingManager, Permissions};
use crate::routes::{ItemAttributeRoute, Relation, Route};
use crate::schema::{Context, FieldSet};
use crate::signals::{Observer, SignalEvent, SignalKind, Signals};
use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

/// Declarations of one resource, consumed by [`ResourceDefinition::build`].
pub struct ResourceDefinition {
    config: ResourceConfig,
    fields: FieldSet,
    factory: Arc<dyn ManagerFactory>,
    routes: Vec<Route>,
    observers: Vec<(SignalKind, Observer)>,
}

impl ResourceDefinition {
    /// Starts a definition backed by an in-memory store.
    pub fn new(config: ResourceConfig) -> Self {
        ResourceDefinition {
            config,
            fields: FieldSet::new(),
            factory: Arc::new(MemoryBackend::new()),
            routes: Vec::new(),
            observers: Vec::new(),
        }
    }

    pub fn named(name: &str) -> Self {
        ResourceDefinition::new(ResourceConfig::named(name))
    }

    pub fn field(mut self, key: &str, field: Field) -> Self {
        self.fields.insert(key, field);
        self
    }

    pub fn require(mut self, key: &str) -> Self {
        self.fields.set_required(key);
        self
    }

    /// Adds every field of `fields`; same-named declarations are replaced.
    pub fn schema(mut self, fields: FieldSet) -> Self {
        self.fields.extend(&fields);
        self
    }

    pub fn manager(mut self, factory: impl ManagerFactory + 'static) -> Self {
        self.factory = Arc::new(factory);
        self
    }

    pub fn route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    pub fn relation(mut self, relation: Relation) -> Self {
        self.routes.extend(relation.routes());
        self
    }

    pub fn item_attribute(mut self, route: ItemAttributeRoute) -> Self {
        self.routes.extend(route.routes());
        self
    }

    /// Connects a lifecycle observer to the resource's signals.
    pub fn on<F>(mut self, kind: SignalKind, observer: F) -> Self
    where
        F: Fn(&str, SignalKind, &SignalEvent<'_>) -> Result<(), ApiError> + Send + Sync + 'static,
    {
        self.observers.push((kind, Arc::new(observer)));
        self
    }

    /// Discovers backend fields, applies the meta options, attaches the manager
    /// and lays out the routes. References to other resources stay unresolved.
    pub fn build(self) -> Result<Arc<Resource>, ConfigError> {
        let ResourceDefinition { mut config, fields, factory, routes, observers } = self;
        if config.name.is_empty() || config.name.contains('/') {
            return Err(ConfigError::Validation(format!("invalid resource name '{}'", config.name)));
        }
        let name = config.name.clone();

        let mut fields = factory.discover(&config, &fields)?;
        validate_resource_config(&config, &fields)?;
        for key in &config.read_only_fields {
            if let Some(field) = fields.get_mut(key) {
                field.io = Io::READ;
            }
        }
        for key in &config.write_only_fields {
            if let Some(field) = fields.get_mut(key) {
                field.io = Io::WRITE;
            }
        }
        for key in &config.required_fields {
            fields.set_required(key);
        }

        let id_attribute = match (&config.id_attribute, factory.model()) {
            (Some(attribute), _) => attribute.clone(),
            (None, Some(model)) => model.primary_key.clone(),
            (None, None) => "id".to_string(),
        };
        config.id_attribute = Some(id_attribute.clone());
        let id_field = id_field(config.id_field).attribute(&id_attribute).io(Io::READ);

        let mut schema = FieldSet::new();
        if config.include_id {
            schema.insert("$id", id_field.clone());
        } else {
            schema.insert("$uri", Field::item_uri("self").attribute(&id_attribute).io(Io::READ));
        }
        if config.include_type {
            schema.insert("$type", Field::item_type("self").io(Io::READ));
        }
        schema.extend(&fields);
        schema.bind(&name);

        let signals = Arc::new(Signals::new());
        for (kind, observer) in observers {
            signals.connect(kind, observer);
        }
        let manager = factory.build(ManagerContext {
            resource: name.clone(),
            id_attribute: id_attribute.clone(),
            signals: Arc::clone(&signals),
        })?;

        let permissions = match &config.permissions {
            Some(needs) => Some(Arc::new(Permissions::from_config(&name, &id_attribute, needs, &schema)?)),
            None => None,
        };

        let mut key_resolvers = vec![KeyResolver::Ref, KeyResolver::Id];
        key_resolvers.extend(config.natural_keys.iter().map(KeyResolver::from_config));

        let mut all_routes: Vec<Route> = Route::builtin()
            .into_iter()
            .filter(|route| !config.exclude_routes.iter().any(|r| r == route.attribute()))
            .collect();
        all_routes.extend(routes);
        for route in &mut all_routes {
            route.bind(&name);
        }
        check_routes(&name, &all_routes)?;

        let mut resource = Resource {
            name,
            config,
            schema,
            id_field,
            manager,
            signals,
            filters: IndexMap::new(),
            sort_fields: IndexMap::new(),
            routes: all_routes,
            key_resolvers,
            permissions,
        };
        resource.derive_filters()?;
        tracing::debug!(
            resource = %resource.name,
            fields = resource.schema.fields.len(),
            routes = resource.routes.len(),
            "resource built"
        );
        Ok(Arc::new(resource))
    }
}

fn id_field(kind: IdFieldKind) -> Field {
    match kind {
        IdFieldKind::Integer => Field::integer(),
        IdFieldKind::PositiveInteger => Field::positive_integer(),
        IdFieldKind::String => Field::string(),
        IdFieldKind::Uuid => Field::uuid(),
    }
}

fn check_routes(resource: &str, routes: &[Route]) -> Result<(), ConfigError> {
    let mut patterns = HashSet::new();
    let mut rels = HashSet::new();
    for route in routes {
        if !patterns.insert((route.method.clone(), route.pattern())) {
            return Err(ConfigError::Validation(format!(
                "{}: route {} {} is declared twice",
                resource,
                route.method,
                route.pattern()
            )));
        }
        if !rels.insert(route.rel.as_str()) {
            return Err(ConfigError::Validation(format!("{}: duplicate link rel '{}'", resource, route.rel)));
        }
    }
    Ok(())
}

/// A frozen resource: schema, manager, filters and routes.
#[derive(Clone)]
pub struct Resource {
    pub name: String,
    pub config: ResourceConfig,
    /// Every field, including the `$uri`/`$id`/`$type` meta fields.
    pub schema: FieldSet,
    /// Converts URL segments and bare ids.
    pub id_field: Field,
    pub manager: Arc<dyn Manager>,
    pub signals: Arc<Signals>,
    /// Filters per field key, as allowed by `allowed_filters`.
    pub filters: IndexMap<String, FieldFilters>,
    pub sort_fields: IndexMap<String, Field>,
    pub routes: Vec<Route>,
    pub key_resolvers: Vec<KeyResolver>,
    pub permissions: Option<Arc<Permissions>>,
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("name", &self.name)
            .field("fields", &self.schema.fields.keys().collect::<Vec<_>>())
            .field("routes", &self.routes.len())
            .finish()
    }
}

impl Resource {
    pub fn id_attribute(&self) -> &str {
        self.config.id_attribute()
    }

    fn derive_filters(&mut self) -> Result<(), ConfigError> {
        self.filters = filters_for_fields(&self.schema, &self.config.allowed_filters, &self.manager.filter_table())?;
        self.sort_fields = self
            .schema
            .readable()
            .filter(|(key, field)| self.filters.contains_key(*key) && self.manager.is_sortable_field(field))
            .map(|(key, field)| (key.clone(), field.clone()))
            .collect();
        Ok(())
    }

    /// Second build phase: resolves every reference against the registered names.
    pub(crate) fn resolved(&self, is_registered: &dyn Fn(&str) -> bool) -> Result<Resource, ConfigError> {
        let mut resource = self.clone();
        resource.schema.resolve(is_registered)?;
        resource.id_field.resolve(is_registered)?;
        for route in &mut resource.routes {
            route.resolve(is_registered)?;
        }
        resource.derive_filters()?;
        Ok(resource)
    }

    /// Converts a URL path segment into an id.
    pub fn parse_id(&self, segment: &str) -> Result<Value, ApiError> {
        let raw = match self.config.id_field {
            IdFieldKind::Integer | IdFieldKind::PositiveInteger => match segment.parse::<i64>() {
                Ok(n) => json!(n),
                Err(_) => return Err(ApiError::not_found_id(&self.name, json!(segment))),
            },
            IdFieldKind::String => json!(segment),
            IdFieldKind::Uuid => match uuid::Uuid::parse_str(segment) {
                Ok(u) => json!(u.hyphenated().to_string()),
                Err(_) => return Err(ApiError::not_found_id(&self.name, json!(segment))),
            },
        };
        if let IdFieldKind::PositiveInteger = self.config.id_field {
            if raw.as_i64().unwrap_or(0) < 1 {
                return Err(ApiError::not_found_id(&self.name, raw));
            }
        }
        Ok(raw)
    }

    /// A fresh manager session for one request of `identity`, permission-checked
    /// when the resource declares permissions.
    pub fn manager_for(&self, identity: &Identity) -> Arc<dyn Manager> {
        let session = Arc::clone(&self.manager).session();
        match &self.permissions {
            Some(permissions) => Arc::new(PermissionCheckingManager::new(
                session,
                Arc::clone(permissions),
                identity.clone(),
            )),
            None => session,
        }
    }

    pub fn route_prefix(&self, ctx: Context<'_>) -> String {
        ctx.route_prefix(&self.name)
    }

    /// Per-resource hyper-schema with its links sorted by rel.
    pub fn described_by(&self, ctx: Context<'_>, api: &ApiConfig) -> Value {
        let mut schema = Map::new();
        schema.insert("$schema".into(), json!("http://json-schema.org/draft-04/hyper-schema#"));
        if let Some(title) = &self.config.title {
            schema.insert("title".into(), json!(title));
        }
        if let Some(description) = &self.config.description {
            schema.insert("description".into(), json!(description));
        }
        if let Value::Object(response) = self.schema.response(ctx) {
            schema.extend(response);
        }
        let mut links: Vec<&Route> = self.routes.iter().collect();
        links.sort_by(|a, b| a.rel.cmp(&b.rel));
        schema.insert(
            "links".into(),
            Value::Array(links.into_iter().map(|route| route.link(self, ctx, api)).collect()),
        );
        Value::Object(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NeedsConfig;

    #[test]
    fn meta_fields_and_overrides_are_applied() {
        let mut config = ResourceConfig::named("book");
        config.include_type = true;
        config.read_only_fields = vec!["rating".into()];
        config.required_fields = vec!["rating".into(), "subtitle".into()];
        let resource = ResourceDefinition::new(config)
            .field("title", Field::string())
            .field("subtitle", Field::string().nullable())
            .field("rating", Field::integer())
            .build()
            .unwrap();
        let keys: Vec<&str> = resource.schema.fields.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["$uri", "$type", "title", "subtitle", "rating"]);
        assert!(resource.schema.get("rating").unwrap().io.is_read_only());
        let required: Vec<String> = resource.schema.required().into_iter().collect();
        assert_eq!(required, vec!["title", "subtitle"]);
        assert_eq!(resource.id_attribute(), "id");
        assert!(resource.sort_fields.contains_key("title"));
        assert!(!resource.sort_fields.contains_key("$uri"));
    }

    #[test]
    fn ids_parse_by_id_field_kind() {
        let resource = ResourceDefinition::named("book").build().unwrap();
        assert_eq!(resource.parse_id("12").unwrap(), json!(12));
        assert!(matches!(resource.parse_id("x"), Err(ApiError::ItemNotFound { .. })));

        let mut config = ResourceConfig::named("tag");
        config.id_field = IdFieldKind::String;
        config.id_attribute = Some("slug".into());
        let resource = ResourceDefinition::new(config).build().unwrap();
        assert_eq!(resource.parse_id("rust").unwrap(), json!("rust"));
        assert_eq!(resource.id_attribute(), "slug");
    }

    #[test]
    fn excluded_routes_are_skipped_and_permissions_parsed() {
        let mut config = ResourceConfig::named("note");
        config.exclude_routes = vec!["destroy".into()];
        config.permissions = Some(IndexMap::from([("create".to_string(), NeedsConfig::One("yes".into()))]));
        let resource = ResourceDefinition::new(config).build().unwrap();
        assert!(resource.routes.iter().all(|r| r.rel != "destroy"));
        assert!(resource.routes.iter().any(|r| r.rel == "self"));
        assert!(resource.permissions.is_some());
    }

    #[test]
    fn unknown_option_fields_are_rejected() {
        let mut config = ResourceConfig::named("book");
        config.write_only_fields = vec!["password".into()];
        assert!(matches!(
            ResourceDefinition::new(config).build(),
            Err(ConfigError::MissingReference { kind: "write-only field", .. })
        ));
        assert!(ResourceDefinition::named("a/b").build().is_err());
    }
}
