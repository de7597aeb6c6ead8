//! Extract the requesting identity from the request extensions.
//!
//! Authentication layers insert an [`Identity`]; requests without one are
//! anonymous. [`trust_identity_headers`] is an opt-in decorator that builds the
//! identity from `X-User-Id`/`X-Roles`, for deployments behind a proxy that
//! sets those headers itself.

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request},
    http::{request::Parts, HeaderMap},
    middleware::{self, Next},
    response::Response,
    Router,
};
use serde_json::{json, Value};

pub const USER_ID_HEADER: &str = "X-User-Id";
pub const ROLES_HEADER: &str = "X-Roles";

/// Permission on one specific item, granted to an identity by the host application.
#[derive(Clone, Debug, PartialEq)]
pub struct ItemNeed {
    pub method: String,
    pub resource: String,
    pub id: Value,
}

/// Who is asking. Anonymous when nothing identifies the caller.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Identity {
    pub user_id: Option<Value>,
    pub roles: Vec<String>,
    pub item_needs: Vec<ItemNeed>,
}

impl Identity {
    pub fn anonymous() -> Self {
        Identity::default()
    }

    pub fn user(id: Value) -> Self {
        Identity { user_id: Some(id), ..Default::default() }
    }

    pub fn with_role(mut self, role: &str) -> Self {
        self.roles.push(role.to_string());
        self
    }

    pub fn with_item_need(mut self, method: &str, resource: &str, id: Value) -> Self {
        self.item_needs.push(ItemNeed {
            method: method.to_string(),
            resource: resource.to_string(),
            id,
        });
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Numeric user ids become JSON numbers so they compare equal to integer keys.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let user_id = header(USER_ID_HEADER).map(|s| match s.parse::<i64>() {
            Ok(n) => json!(n),
            Err(_) => Value::String(s),
        });
        let roles = header(ROLES_HEADER)
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Identity { user_id, roles, item_needs: Vec::new() }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<Identity>().cloned().unwrap_or_default())
    }
}

async fn identity_from_headers(mut request: Request, next: Next) -> Response {
    if request.extensions().get::<Identity>().is_none() {
        let identity = Identity::from_headers(request.headers());
        request.extensions_mut().insert(identity);
    }
    next.run(request).await
}

/// Router decorator that identifies callers by their `X-User-Id`/`X-Roles`
/// headers. Identities already set by an inner layer are kept.
///
/// ```ignore
/// let api = Api::new(config).decorator(trust_identity_headers);
/// ```
pub fn trust_identity_headers(router: Router) -> Router {
    router.layer(middleware::from_fn(identity_from_headers))
}
