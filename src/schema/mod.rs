//! JSON-Schema emission, validation and field sets.

mod fieldset;
mod nullable;
pub mod validator;

pub use fieldset::{ConvertMode, FieldSet};
pub use nullable::make_nullable;
pub use validator::{Draft4Validator, SchemaValidator};

use crate::api::Registry;
use crate::error::ApiError;
use crate::resource::Resource;
use serde_json::Value;
use std::sync::Arc;

static DRAFT4: Draft4Validator = Draft4Validator;

/// What schema emission and value conversion may consult: the live registry
/// (for cross-resource references), the validator and the URL prefix.
#[derive(Clone, Copy)]
pub struct Context<'a> {
    registry: Option<&'a Registry>,
    validator: &'a dyn SchemaValidator,
    prefix: &'a str,
}

impl<'a> Context<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Context {
            registry: Some(registry),
            validator: registry.validator(),
            prefix: registry.prefix(),
        }
    }

    /// A context with no registry: reference fields render bare `$ref` schemas
    /// and cannot be converted.
    pub fn detached() -> Context<'static> {
        Context {
            registry: None,
            validator: &DRAFT4,
            prefix: "",
        }
    }

    pub fn route_prefix(&self, resource: &str) -> String {
        format!("{}/{}", self.prefix, resource)
    }

    pub fn registry(&self) -> Option<&'a Registry> {
        self.registry
    }

    pub fn resource(&self, name: &str) -> Result<&'a Arc<Resource>, ApiError> {
        self.registry
            .and_then(|r| r.resource(name))
            .ok_or_else(|| ApiError::Internal(format!("resource '{}' is not available", name)))
    }

    pub fn validator(&self) -> &'a dyn SchemaValidator {
        self.validator
    }

    pub fn validate(&self, instance: &Value, schema: &Value) -> Result<(), ApiError> {
        self.validator.validate(instance, schema)
    }
}
