//! Per-operation permission needs and the manager wrapper that enforces them.

use crate::config::NeedsConfig;
use crate::error::{ApiError, ConfigError};
use crate::extractors::Identity;
use crate::fields::{id_segment, Field, FieldKind};
use crate::filters::{Condition, Sort};
use crate::manager::{Manager, ManagerContext};
use crate::pagination::Pagination;
use crate::schema::FieldSet;
use crate::Item;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;

pub const METHODS: [&str; 4] = ["read", "create", "update", "delete"];

const DEFAULTS: [(&str, &str); 4] = [("read", "yes"), ("create", "no"), ("update", "create"), ("delete", "update")];

/// One way of satisfying a permission.
#[derive(Clone, Debug, PartialEq)]
pub enum Need {
    Everyone,
    Nobody,
    Role(String),
    /// The identity's user id equals the item's `attribute` (a to-one key).
    User { attribute: String },
    /// The identity holds an item need for this method on this very item.
    Item { method: String },
}

impl Need {
    fn depends_on_item(&self) -> bool {
        matches!(self, Need::User { .. } | Need::Item { .. })
    }
}

/// Needs per method; a method is allowed when any one of its needs is met.
#[derive(Clone, Debug)]
pub struct Permissions {
    resource: String,
    id_attribute: String,
    needs: IndexMap<String, Vec<Need>>,
}

impl Permissions {
    /// Resolves configured needs over the defaults. Method names used as needs
    /// alias that method's needs; alias cycles are rejected.
    pub fn from_config(
        resource: &str,
        id_attribute: &str,
        config: &IndexMap<String, NeedsConfig>,
        schema: &FieldSet,
    ) -> Result<Self, ConfigError> {
        let mut raw: IndexMap<String, Vec<String>> = DEFAULTS
            .iter()
            .map(|(method, need)| (method.to_string(), vec![need.to_string()]))
            .collect();
        for (method, needs) in config {
            if !METHODS.contains(&method.as_str()) {
                return Err(ConfigError::MissingReference { kind: "permission method", id: method.clone() });
            }
            raw.insert(method.clone(), needs.expressions().into_iter().map(str::to_string).collect());
        }

        let mut needs = IndexMap::new();
        for method in METHODS {
            let mut path = Vec::new();
            let resolved = resolve(resource, method, &raw, schema, &mut path)?;
            needs.insert(method.to_string(), resolved);
        }
        Ok(Permissions {
            resource: resource.to_string(),
            id_attribute: id_attribute.to_string(),
            needs,
        })
    }

    pub fn needs(&self, method: &str) -> &[Need] {
        self.needs.get(method).map(Vec::as_slice).unwrap_or(&[])
    }

    fn is_met(&self, need: &Need, identity: &Identity, item: Option<&Item>) -> bool {
        match need {
            Need::Everyone => true,
            Need::Nobody => false,
            Need::Role(role) => identity.has_role(role),
            Need::User { attribute } => match (item.and_then(|i| i.get(attribute)), &identity.user_id) {
                (Some(owner), Some(user)) if !owner.is_null() => id_segment(owner) == id_segment(user),
                _ => false,
            },
            Need::Item { method } => match item.and_then(|i| i.get(&self.id_attribute)) {
                Some(id) => identity.item_needs.iter().any(|need| {
                    need.method == *method && need.resource == self.resource && id_segment(&need.id) == id_segment(id)
                }),
                None => false,
            },
        }
    }

    /// Whether `identity` may perform `method`; item-dependent needs check `item`.
    pub fn can(&self, method: &str, identity: &Identity, item: Option<&Item>) -> bool {
        self.needs(method).iter().any(|need| self.is_met(need, identity, item))
    }

    /// How reads are narrowed for `identity`.
    fn read_scope(&self, identity: &Identity) -> ReadScope {
        let needs = self.needs("read");
        if needs.iter().any(|n| !n.depends_on_item() && self.is_met(n, identity, None)) {
            return ReadScope::All;
        }
        let per_item: Vec<&Need> = needs.iter().filter(|n| n.depends_on_item()).collect();
        match per_item.as_slice() {
            [] => {
                if needs.iter().all(|n| matches!(n, Need::Role(_))) {
                    ReadScope::Forbidden
                } else {
                    ReadScope::Nothing
                }
            }
            [Need::User { attribute }] => match &identity.user_id {
                Some(user) => ReadScope::Where(Condition::equal(attribute, Field::any(), user.clone())),
                None => ReadScope::Nothing,
            },
            _ => ReadScope::PerItem,
        }
    }
}

fn resolve(
    resource: &str,
    method: &str,
    raw: &IndexMap<String, Vec<String>>,
    schema: &FieldSet,
    path: &mut Vec<String>,
) -> Result<Vec<Need>, ConfigError> {
    path.push(method.to_string());
    let mut needs = Vec::new();
    for expression in raw.get(method).map(Vec::as_slice).unwrap_or(&[]) {
        let expression = expression.as_str();
        match expression {
            "yes" | "everybody" | "anybody" | "everyone" | "anyone" => return Ok(vec![Need::Everyone]),
            "no" | "nobody" | "noone" => needs.push(Need::Nobody),
            own if own == method => needs.push(Need::Item { method: method.to_string() }),
            alias if METHODS.contains(&alias) => {
                if path.iter().any(|p| p == alias) {
                    path.push(alias.to_string());
                    return Err(ConfigError::CircularPermissions {
                        resource: resource.to_string(),
                        path: path.join(" -> "),
                    });
                }
                let aliased = resolve(resource, alias, raw, schema, path)?;
                if aliased.contains(&Need::Everyone) {
                    return Ok(vec![Need::Everyone]);
                }
                needs.extend(aliased);
            }
            qualified if qualified.contains(':') => {
                let (kind, value) = qualified.split_once(':').unwrap_or((qualified, ""));
                match kind {
                    "role" => needs.push(Need::Role(value.to_string())),
                    "user" => {
                        let field = schema
                            .get(value)
                            .filter(|f| matches!(f.kind, FieldKind::ToOne(_)))
                            .ok_or_else(|| ConfigError::MissingReference {
                                kind: "to-one permission field",
                                id: format!("{}.{}", resource, value),
                            })?;
                        needs.push(Need::User { attribute: field.attribute_or(value).to_string() });
                    }
                    _ => {
                        return Err(ConfigError::InvalidField(format!(
                            "unsupported permission need '{}' in {}",
                            qualified, resource
                        )))
                    }
                }
            }
            role => needs.push(Need::Role(role.to_string())),
        }
    }
    path.pop();
    Ok(needs)
}

enum ReadScope {
    All,
    Nothing,
    /// Nothing is readable and only roles could change that.
    Forbidden,
    Where(Condition),
    PerItem,
}

/// Wraps any manager, checking the identity's permissions before delegating.
///
/// Unreadable items are reported as not found; disallowed writes are `Forbidden`.
pub struct PermissionCheckingManager {
    inner: Arc<dyn Manager>,
    permissions: Arc<Permissions>,
    identity: Identity,
}

impl PermissionCheckingManager {
    pub fn new(inner: Arc<dyn Manager>, permissions: Arc<Permissions>, identity: Identity) -> Self {
        PermissionCheckingManager { inner, permissions, identity }
    }

    fn require(&self, method: &str, item: &Item) -> Result<(), ApiError> {
        if self.permissions.can(method, &self.identity, Some(item)) {
            Ok(())
        } else {
            tracing::warn!(
                resource = %self.inner.resource_name(),
                method,
                user = ?self.identity.user_id,
                "permission denied"
            );
            Err(ApiError::Forbidden)
        }
    }

    fn readable(&self, item: &Item) -> bool {
        self.permissions.can("read", &self.identity, Some(item))
    }

    async fn filtered(&self, where_: &[Condition], sort: &[Sort]) -> Result<Vec<Item>, ApiError> {
        let items = self.inner.instances(where_, sort).await?;
        Ok(items.into_iter().filter(|item| self.readable(item)).collect())
    }
}

fn with_condition(where_: &[Condition], condition: Condition) -> Vec<Condition> {
    let mut all = where_.to_vec();
    all.push(condition);
    all
}

#[async_trait]
impl Manager for PermissionCheckingManager {
    fn context(&self) -> &ManagerContext {
        self.inner.context()
    }

    fn session(self: Arc<Self>) -> Arc<dyn Manager> {
        Arc::new(PermissionCheckingManager {
            inner: Arc::clone(&self.inner).session(),
            permissions: Arc::clone(&self.permissions),
            identity: self.identity.clone(),
        })
    }

    fn filter_table(&self) -> crate::filters::FilterTable {
        self.inner.filter_table()
    }

    fn is_sortable_field(&self, field: &Field) -> bool {
        self.inner.is_sortable_field(field)
    }

    async fn instances(&self, where_: &[Condition], sort: &[Sort]) -> Result<Vec<Item>, ApiError> {
        match self.permissions.read_scope(&self.identity) {
            ReadScope::All => self.inner.instances(where_, sort).await,
            ReadScope::Nothing => Ok(Vec::new()),
            ReadScope::Forbidden => Err(ApiError::Forbidden),
            ReadScope::Where(condition) => self.inner.instances(&with_condition(where_, condition), sort).await,
            ReadScope::PerItem => self.filtered(where_, sort).await,
        }
    }

    async fn paginated_instances(
        &self,
        page: u64,
        per_page: u64,
        where_: &[Condition],
        sort: &[Sort],
    ) -> Result<Pagination, ApiError> {
        match self.permissions.read_scope(&self.identity) {
            ReadScope::All => self.inner.paginated_instances(page, per_page, where_, sort).await,
            ReadScope::Nothing => Ok(Pagination::new(Vec::new(), page, per_page, 0)),
            ReadScope::Forbidden => Err(ApiError::Forbidden),
            ReadScope::Where(condition) => {
                self.inner
                    .paginated_instances(page, per_page, &with_condition(where_, condition), sort)
                    .await
            }
            ReadScope::PerItem => Ok(Pagination::from_list(self.filtered(where_, sort).await?, page, per_page)),
        }
    }

    async fn first(&self, where_: &[Condition], sort: &[Sort]) -> Result<Item, ApiError> {
        self.instances(where_, sort)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::not_found_where(self.resource_name(), crate::manager::where_json(where_)))
    }

    async fn read(&self, id: &Value) -> Result<Item, ApiError> {
        let item = self.inner.read(id).await?;
        if self.readable(&item) {
            Ok(item)
        } else {
            Err(ApiError::not_found_id(self.resource_name(), id.clone()))
        }
    }

    async fn create(&self, properties: Item, commit: bool) -> Result<Item, ApiError> {
        self.require("create", &properties)?;
        self.inner.create(properties, commit).await
    }

    async fn update(&self, item: &Item, changes: Item, commit: bool) -> Result<Item, ApiError> {
        self.require("update", item)?;
        self.inner.update(item, changes, commit).await
    }

    async fn delete(&self, item: &Item) -> Result<(), ApiError> {
        self.require("delete", item)?;
        self.inner.delete(item).await
    }

    async fn relation_instances(
        &self,
        item: &Item,
        attribute: &str,
        target: &dyn Manager,
        page: u64,
        per_page: u64,
    ) -> Result<Pagination, ApiError> {
        self.inner.relation_instances(item, attribute, target, page, per_page).await
    }

    async fn relation_add(&self, item: &Item, attribute: &str, target: &dyn Manager, target_item: &Item) -> Result<(), ApiError> {
        self.require("update", item)?;
        self.inner.relation_add(item, attribute, target, target_item).await
    }

    async fn relation_remove(
        &self,
        item: &Item,
        attribute: &str,
        target: &dyn Manager,
        target_item: &Item,
    ) -> Result<(), ApiError> {
        self.require("update", item)?;
        self.inner.relation_remove(item, attribute, target, target_item).await
    }

    async fn begin(&self) -> Result<(), ApiError> {
        self.inner.begin().await
    }

    async fn commit(&self) -> Result<(), ApiError> {
        self.inner.commit().await
    }
}
