//! Late-bound references from a field to a resource.

use crate::error::{ApiError, ConfigError};

/// Names a target resource by its registered name or `"self"`.
///
/// Declared unresolved; `bind` attaches the owning resource (which resolves
/// `"self"`) and `resolve` checks the name against the populated registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceRef {
    target: String,
    owner: Option<String>,
    resolved: Option<String>,
}

impl ResourceRef {
    pub fn new(target: impl Into<String>) -> Self {
        ResourceRef {
            target: target.into(),
            owner: None,
            resolved: None,
        }
    }

    pub fn declared(&self) -> &str {
        &self.target
    }

    pub fn bind(&mut self, owner: &str) {
        self.owner = Some(owner.to_string());
        if self.target == "self" {
            self.resolved = Some(owner.to_string());
        }
    }

    pub fn resolve(&mut self, is_registered: &dyn Fn(&str) -> bool) -> Result<(), ConfigError> {
        if self.resolved.is_some() {
            return Ok(());
        }
        if is_registered(&self.target) {
            self.resolved = Some(self.target.clone());
            Ok(())
        } else {
            Err(ConfigError::UnresolvedReference(self.target.clone()))
        }
    }

    pub fn name(&self) -> Result<&str, ApiError> {
        self.resolved
            .as_deref()
            .ok_or_else(|| ApiError::Internal(format!("reference to '{}' was never resolved", self.target)))
    }

    /// Target name, whether or not resolution ran yet.
    pub fn target_name(&self) -> &str {
        self.resolved.as_deref().unwrap_or(&self.target)
    }

    /// True when the reference points back at the resource that owns it.
    pub fn is_self(&self) -> bool {
        match (&self.owner, &self.resolved) {
            (Some(owner), Some(resolved)) => owner == resolved,
            _ => self.target == "self",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_reference_resolves_on_bind() {
        let mut r = ResourceRef::new("self");
        assert!(r.name().is_err());
        r.bind("book");
        assert_eq!(r.name().unwrap(), "book");
        assert!(r.is_self());
    }

    #[test]
    fn named_reference_needs_registration() {
        let mut r = ResourceRef::new("author");
        r.bind("book");
        assert!(matches!(
            r.resolve(&|name| name == "book"),
            Err(ConfigError::UnresolvedReference(name)) if name == "author"
        ));
        r.resolve(&|name| name == "author").unwrap();
        assert_eq!(r.name().unwrap(), "author");
        assert!(!r.is_self());
    }
}
