//! Shared state of every generated route.

use crate::api::Registry;
use std::sync::Arc;

#[derive(Clone)]
pub struct ApiState {
    /// Frozen once the router is built.
    pub registry: Arc<Registry>,
}
