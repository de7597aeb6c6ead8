//! Lifecycle signals owned by each resource.
//!
//! Observers run synchronously inside the manager call that emits them;
//! an observer error aborts the operation and propagates to the caller.

use crate::error::ApiError;
use crate::Item;
use std::sync::{Arc, RwLock};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SignalKind {
    BeforeCreate,
    AfterCreate,
    BeforeUpdate,
    AfterUpdate,
    BeforeDelete,
    AfterDelete,
    BeforeAddToRelation,
    AfterAddToRelation,
    BeforeRemoveFromRelation,
    AfterRemoveFromRelation,
}

/// Payload passed to observers.
#[derive(Clone, Copy, Debug)]
pub enum SignalEvent<'a> {
    Create { item: &'a Item },
    /// `changes` holds only the keys whose value actually differs.
    Update { item: &'a Item, changes: &'a Item },
    Delete { item: &'a Item },
    Relation { item: &'a Item, attribute: &'a str, child: &'a Item },
}

pub type Observer = Arc<dyn Fn(&str, SignalKind, &SignalEvent<'_>) -> Result<(), ApiError> + Send + Sync>;

#[derive(Default)]
pub struct Signals {
    observers: RwLock<Vec<(SignalKind, Observer)>>,
}

impl Signals {
    pub fn new() -> Self {
        Signals::default()
    }

    pub fn connect(&self, kind: SignalKind, observer: Observer) {
        if let Ok(mut observers) = self.observers.write() {
            observers.push((kind, observer));
        }
    }

    /// Runs every observer of `kind` in connection order. `sender` is the resource name.
    pub fn send(&self, sender: &str, kind: SignalKind, event: &SignalEvent<'_>) -> Result<(), ApiError> {
        let observers: Vec<Observer> = match self.observers.read() {
            Ok(observers) => observers
                .iter()
                .filter(|(k, _)| *k == kind)
                .map(|(_, o)| Arc::clone(o))
                .collect(),
            Err(_) => return Err(ApiError::Internal("signal observers lock poisoned".into())),
        };
        for observer in observers {
            observer(sender, kind, event)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Signals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.observers.read().map(|o| o.len()).unwrap_or(0);
        f.debug_struct("Signals").field("observers", &count).finish()
    }
}
