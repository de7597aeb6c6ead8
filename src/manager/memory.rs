//! In-process store: items kept in insertion order, integer ids.

use super::{Manager, ManagerContext, ManagerFactory};
use crate::config::ModelDefinition;
use crate::error::{ApiError, ConfigError};
use crate::fields::id_segment;
use crate::filters::{cmp_items, Condition, Sort};
use crate::pagination::Pagination;
use crate::schema::validator::json_eq;
use crate::signals::{SignalEvent, SignalKind};
use crate::Item;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard};

/// Factory for [`MemoryManager`]s.
#[derive(Clone, Debug, Default)]
pub struct MemoryBackend {
    unique: Vec<String>,
    model: Option<ModelDefinition>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend::default()
    }

    /// Declares a backend attribute whose non-null values must be unique.
    pub fn unique(mut self, attribute: &str) -> Self {
        self.unique.push(attribute.to_string());
        self
    }

    /// Discovers fields from a model declaration; unique columns carry over.
    pub fn with_model(mut self, model: ModelDefinition) -> Self {
        for column in model.columns.iter().filter(|c| c.unique) {
            self.unique.push(column.name.clone());
        }
        for set in model.unique.iter().filter(|s| s.len() == 1) {
            self.unique.extend(set.iter().cloned());
        }
        self.model = Some(model);
        self
    }
}

impl ManagerFactory for MemoryBackend {
    fn model(&self) -> Option<&ModelDefinition> {
        self.model.as_ref()
    }

    fn build(&self, context: ManagerContext) -> Result<Arc<dyn Manager>, ConfigError> {
        Ok(Arc::new(MemoryManager::new(context, self.unique.clone())))
    }
}

enum Pending {
    Put(String, Item),
    Remove(String),
}

#[derive(Default)]
struct Store {
    items: IndexMap<String, Item>,
    next_id: i64,
}

impl Store {
    fn apply(&mut self, op: Pending) {
        match op {
            Pending::Put(key, item) => {
                self.items.insert(key, item);
            }
            Pending::Remove(key) => {
                self.items.shift_remove(&key);
            }
        }
    }
}

/// Committed items followed by the puts still pending in a session, keyed by id segment.
fn visible<'a>(store: &'a Store, pending: &'a [Pending]) -> impl Iterator<Item = (&'a String, &'a Item)> + Clone {
    let puts = pending.iter().filter_map(|op| match op {
        Pending::Put(key, item) => Some((key, item)),
        Pending::Remove(_) => None,
    });
    store.items.iter().chain(puts)
}

/// One session over a shared in-process store.
///
/// Writes made with `commit=false` stay in this session until `commit()`,
/// which re-checks them against the store and applies all or none.
pub struct MemoryManager {
    context: ManagerContext,
    unique: Vec<String>,
    store: Arc<Mutex<Store>>,
    pending: Mutex<Vec<Pending>>,
}

impl MemoryManager {
    pub fn new(context: ManagerContext, unique: Vec<String>) -> Self {
        MemoryManager {
            context,
            unique,
            store: Arc::new(Mutex::new(Store { next_id: 1, ..Default::default() })),
            pending: Mutex::new(Vec::new()),
        }
    }

    fn poisoned(&self) -> ApiError {
        ApiError::Internal(format!("{} store lock poisoned", self.context.resource))
    }

    /// Lock order: the store, then the session's pending writes.
    fn store(&self) -> Result<MutexGuard<'_, Store>, ApiError> {
        self.store.lock().map_err(|_| self.poisoned())
    }

    fn pending(&self) -> Result<MutexGuard<'_, Vec<Pending>>, ApiError> {
        self.pending.lock().map_err(|_| self.poisoned())
    }

    fn signal(&self, kind: SignalKind, event: SignalEvent<'_>) -> Result<(), ApiError> {
        self.context.signals.send(&self.context.resource, kind, &event)
    }

    fn id_of(&self, item: &Item) -> Result<Value, ApiError> {
        match item.get(&self.context.id_attribute) {
            Some(id) if !id.is_null() => Ok(id.clone()),
            _ => Err(ApiError::Internal(format!("{} item has no id", self.context.resource))),
        }
    }

    fn check_unique<'a>(
        &self,
        others: impl Iterator<Item = (&'a String, &'a Item)> + Clone,
        key: &str,
        item: &Item,
    ) -> Result<(), ApiError> {
        for attribute in &self.unique {
            let Some(value) = item.get(attribute).filter(|v| !v.is_null()) else {
                continue;
            };
            let clash = others
                .clone()
                .filter(|(k, _)| k.as_str() != key)
                .any(|(_, other)| other.get(attribute).map(|v| json_eq(v, value)).unwrap_or(false));
            if clash {
                return Err(ApiError::DuplicateKey {
                    detail: Some(format!("Key ({})=({}) already exists.", attribute, id_segment(value))),
                });
            }
        }
        Ok(())
    }

    fn check_free_id<'a>(&self, mut others: impl Iterator<Item = (&'a String, &'a Item)>, key: &str) -> Result<(), ApiError> {
        if others.any(|(k, _)| k.as_str() == key) {
            return Err(ApiError::DuplicateKey {
                detail: Some(format!("Key ({})=({}) already exists.", self.context.id_attribute, key)),
            });
        }
        Ok(())
    }

    /// Checks and stores `item` under one lock. Observers run outside it, so
    /// checks made before a `before_*` signal are repeated here.
    fn put(&self, key: String, item: Item, fresh: bool, commit: bool) -> Result<(), ApiError> {
        let mut store = self.store()?;
        let mut pending = self.pending()?;
        if fresh {
            self.check_free_id(visible(&store, &pending), &key)?;
        }
        self.check_unique(visible(&store, &pending), &key, &item)?;
        let op = Pending::Put(key, item);
        if commit {
            store.apply(op);
        } else {
            pending.push(op);
        }
        Ok(())
    }

    fn members(item: &Item, attribute: &str) -> Vec<Value> {
        item.get(attribute).and_then(Value::as_array).cloned().unwrap_or_default()
    }

    fn set_members(&self, item: &Item, attribute: &str, members: Vec<Value>) -> Result<(), ApiError> {
        let key = id_segment(&self.id_of(item)?);
        let mut store = self.store()?;
        let stored = store
            .items
            .get_mut(&key)
            .ok_or_else(|| ApiError::not_found_id(&self.context.resource, self.id_of(item).unwrap_or(Value::Null)))?;
        stored.insert(attribute.to_string(), Value::Array(members));
        Ok(())
    }
}

#[async_trait]
impl Manager for MemoryManager {
    fn context(&self) -> &ManagerContext {
        &self.context
    }

    fn session(self: Arc<Self>) -> Arc<dyn Manager> {
        Arc::new(MemoryManager {
            context: self.context.clone(),
            unique: self.unique.clone(),
            store: Arc::clone(&self.store),
            pending: Mutex::new(Vec::new()),
        })
    }

    async fn instances(&self, where_: &[Condition], sort: &[Sort]) -> Result<Vec<Item>, ApiError> {
        let mut items: Vec<Item> = self
            .store()?
            .items
            .values()
            .filter(|item| where_.iter().all(|c| c.matches(item)))
            .cloned()
            .collect();
        if !sort.is_empty() {
            items.sort_by(|a, b| cmp_items(a, b, sort));
        }
        Ok(items)
    }

    async fn read(&self, id: &Value) -> Result<Item, ApiError> {
        self.store()?
            .items
            .get(&id_segment(id))
            .cloned()
            .ok_or_else(|| ApiError::not_found_id(&self.context.resource, id.clone()))
    }

    async fn create(&self, properties: Item, commit: bool) -> Result<Item, ApiError> {
        let mut item = properties;
        let key = {
            let mut store = self.store()?;
            let pending = self.pending()?;
            let id = match item.get(&self.context.id_attribute) {
                Some(id) if !id.is_null() => id.clone(),
                _ => {
                    let id = json!(store.next_id);
                    store.next_id += 1;
                    id
                }
            };
            let key = id_segment(&id);
            self.check_free_id(visible(&store, &pending), &key)?;
            item.insert(self.context.id_attribute.clone(), id);
            self.check_unique(visible(&store, &pending), &key, &item)?;
            key
        };

        self.signal(SignalKind::BeforeCreate, SignalEvent::Create { item: &item })?;
        self.put(key, item.clone(), true, commit)?;
        self.signal(SignalKind::AfterCreate, SignalEvent::Create { item: &item })?;
        Ok(item)
    }

    async fn update(&self, item: &Item, changes: Item, commit: bool) -> Result<Item, ApiError> {
        let id = self.id_of(item)?;
        let key = id_segment(&id);
        let current = self.read(&id).await?;
        let actual_changes: Item = changes
            .iter()
            .filter(|(k, v)| current.get(*k).map(|c| !json_eq(c, v)).unwrap_or(true))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut updated = current.clone();
        for (k, v) in changes {
            updated.insert(k, v);
        }
        {
            let store = self.store()?;
            let pending = self.pending()?;
            self.check_unique(visible(&store, &pending), &key, &updated)?;
        }

        self.signal(SignalKind::BeforeUpdate, SignalEvent::Update { item: &current, changes: &actual_changes })?;
        self.put(key, updated.clone(), false, commit)?;
        self.signal(SignalKind::AfterUpdate, SignalEvent::Update { item: &updated, changes: &actual_changes })?;
        Ok(updated)
    }

    async fn delete(&self, item: &Item) -> Result<(), ApiError> {
        let id = self.id_of(item)?;
        let key = id_segment(&id);
        if !self.store()?.items.contains_key(&key) {
            return Err(ApiError::not_found_id(&self.context.resource, id));
        }
        self.signal(SignalKind::BeforeDelete, SignalEvent::Delete { item })?;
        self.store()?.apply(Pending::Remove(key));
        self.signal(SignalKind::AfterDelete, SignalEvent::Delete { item })?;
        Ok(())
    }

    async fn relation_instances(
        &self,
        item: &Item,
        attribute: &str,
        target: &dyn Manager,
        page: u64,
        per_page: u64,
    ) -> Result<Pagination, ApiError> {
        let current = self.read(&self.id_of(item)?).await?;
        let mut related = Vec::new();
        for id in Self::members(&current, attribute) {
            match target.read(&id).await {
                Ok(child) => related.push(child),
                Err(ApiError::ItemNotFound { .. }) => {
                    tracing::warn!(
                        resource = %self.context.resource,
                        attribute,
                        id = %id,
                        "skipping dangling relation member"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Pagination::from_list(related, page, per_page))
    }

    async fn relation_add(
        &self,
        item: &Item,
        attribute: &str,
        target: &dyn Manager,
        target_item: &Item,
    ) -> Result<(), ApiError> {
        let current = self.read(&self.id_of(item)?).await?;
        let child_id = target_item
            .get(target.id_attribute())
            .cloned()
            .ok_or_else(|| ApiError::Internal(format!("{} item has no id", target.resource_name())))?;
        let event = SignalEvent::Relation { item: &current, attribute, child: target_item };
        self.signal(SignalKind::BeforeAddToRelation, event)?;
        let mut members = Self::members(&current, attribute);
        if !members.iter().any(|m| json_eq(m, &child_id)) {
            members.push(child_id);
            self.set_members(&current, attribute, members)?;
        }
        self.signal(SignalKind::AfterAddToRelation, event)?;
        Ok(())
    }

    async fn relation_remove(
        &self,
        item: &Item,
        attribute: &str,
        target: &dyn Manager,
        target_item: &Item,
    ) -> Result<(), ApiError> {
        let current = self.read(&self.id_of(item)?).await?;
        let Some(child_id) = target_item.get(target.id_attribute()) else {
            return Ok(());
        };
        let members = Self::members(&current, attribute);
        if !members.iter().any(|m| json_eq(m, child_id)) {
            return Ok(());
        }
        let event = SignalEvent::Relation { item: &current, attribute, child: target_item };
        self.signal(SignalKind::BeforeRemoveFromRelation, event)?;
        let remaining = members.into_iter().filter(|m| !json_eq(m, child_id)).collect();
        self.set_members(&current, attribute, remaining)?;
        self.signal(SignalKind::AfterRemoveFromRelation, event)?;
        Ok(())
    }

    async fn commit(&self) -> Result<(), ApiError> {
        let mut store = self.store()?;
        let ops: Vec<Pending> = self.pending()?.drain(..).collect();
        let mut staged = Store { items: store.items.clone(), next_id: store.next_id };
        for op in ops {
            if let Pending::Put(key, item) = &op {
                self.check_unique(staged.items.iter(), key, item)?;
            }
            staged.apply(op);
        }
        store.items = staged.items;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::Field;
    use crate::filters::{Filter, FilterOp};
    use crate::signals::Signals;
    use std::sync::Mutex as StdMutex;

    fn manager(name: &str) -> MemoryManager {
        MemoryManager::new(
            ManagerContext { resource: name.into(), id_attribute: "id".into(), signals: Arc::new(Signals::new()) },
            vec!["isbn".into()],
        )
    }

    fn props(value: Value) -> Item {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn create_assigns_increasing_ids() {
        let m = manager("book");
        let a = m.create(props(json!({"title": "A"})), true).await.unwrap();
        let b = m.create(props(json!({"title": "B"})), true).await.unwrap();
        assert_eq!(a["id"], json!(1));
        assert_eq!(b["id"], json!(2));
        assert_eq!(m.read(&json!(2)).await.unwrap()["title"], json!("B"));
        assert!(matches!(m.read(&json!(3)).await, Err(ApiError::ItemNotFound { .. })));
    }

    #[tokio::test]
    async fn unique_attribute_conflicts() {
        let m = manager("book");
        m.create(props(json!({"isbn": "1"})), true).await.unwrap();
        assert!(matches!(
            m.create(props(json!({"isbn": "1"})), true).await,
            Err(ApiError::DuplicateKey { .. })
        ));
        let other = m.create(props(json!({"isbn": "2"})), true).await.unwrap();
        assert!(matches!(
            m.update(&other, props(json!({"isbn": "1"})), true).await,
            Err(ApiError::DuplicateKey { .. })
        ));
    }

    #[tokio::test]
    async fn filters_and_sorting() {
        let m = manager("book");
        for (title, year) in [("A", 1990), ("B", 2001), ("C", 1995)] {
            m.create(props(json!({"title": title, "year": year})), true).await.unwrap();
        }
        let cond = Condition {
            attribute: "year".into(),
            filter: Filter::new(Some("gte"), FilterOp::GreaterThanEqual, Field::integer(), "year"),
            value: json!(1995),
        };
        let sort = Sort { attribute: "year".into(), field: Field::integer(), descending: true };
        let items = m.instances(&[cond], &[sort]).await.unwrap();
        let titles: Vec<&Value> = items.iter().map(|i| &i["title"]).collect();
        assert_eq!(titles, vec![&json!("B"), &json!("C")]);
    }

    #[tokio::test]
    async fn update_reports_actual_changes() {
        let m = manager("book");
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        m.context.signals.connect(
            SignalKind::BeforeUpdate,
            Arc::new(move |_, _, event| {
                if let SignalEvent::Update { changes, .. } = event {
                    sink.lock().unwrap().push(changes.keys().cloned().collect::<Vec<_>>());
                }
                Ok(())
            }),
        );
        let item = m.create(props(json!({"title": "A", "year": 1990})), true).await.unwrap();
        let updated = m.update(&item, props(json!({"title": "A", "year": 1991})), true).await.unwrap();
        assert_eq!(updated["year"], json!(1991));
        assert_eq!(*seen.lock().unwrap(), vec![vec!["year".to_string()]]);
    }

    #[tokio::test]
    async fn uncommitted_writes_wait_for_commit() {
        let m = manager("book");
        let item = m.create(props(json!({"title": "A"})), false).await.unwrap();
        assert!(m.read(&item["id"]).await.is_err());
        m.commit().await.unwrap();
        assert!(m.read(&item["id"]).await.is_ok());
    }

    #[tokio::test]
    async fn delete_twice_is_not_found() {
        let m = manager("book");
        let item = m.create(props(json!({"title": "A"})), true).await.unwrap();
        m.delete(&item).await.unwrap();
        assert!(matches!(m.delete(&item).await, Err(ApiError::ItemNotFound { .. })));
    }

    #[tokio::test]
    async fn relations_add_remove_and_skip_dangling() {
        let authors = manager("author");
        let books = manager("book");
        let author = authors.create(props(json!({"name": "X"})), true).await.unwrap();
        let book = books.create(props(json!({"title": "A"})), true).await.unwrap();
        let gone = books.create(props(json!({"title": "B"})), true).await.unwrap();

        authors.relation_add(&author, "books", &books, &book).await.unwrap();
        authors.relation_add(&author, "books", &books, &book).await.unwrap();
        authors.relation_add(&author, "books", &books, &gone).await.unwrap();
        books.delete(&gone).await.unwrap();

        let page = authors.relation_instances(&author, "books", &books, 1, 20).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0]["title"], json!("A"));

        authors.relation_remove(&author, "books", &books, &book).await.unwrap();
        authors.relation_remove(&author, "books", &books, &book).await.unwrap();
        let stored = authors.read(&json!(1)).await.unwrap();
        assert_eq!(stored["books"], json!([2]));
    }

    #[tokio::test]
    async fn uncommitted_values_count_for_uniqueness() {
        let m = manager("book");
        m.create(props(json!({"isbn": "1"})), false).await.unwrap();
        assert!(matches!(
            m.create(props(json!({"isbn": "1"})), true).await,
            Err(ApiError::DuplicateKey { .. })
        ));
        m.commit().await.unwrap();
        assert_eq!(m.instances(&[], &[]).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_creates_keep_values_unique() {
        let m = Arc::new(manager("book"));
        m.context.signals.connect(
            SignalKind::BeforeCreate,
            Arc::new(|_, _, _| {
                std::thread::sleep(std::time::Duration::from_millis(50));
                Ok(())
            }),
        );
        let tasks: Vec<_> = (0..2)
            .map(|_| {
                let m = Arc::clone(&m);
                tokio::spawn(async move { m.create(props(json!({"isbn": "x"})), true).await })
            })
            .collect();
        let mut created = 0;
        let mut conflicts = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => created += 1,
                Err(ApiError::DuplicateKey { .. }) => conflicts += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!((created, conflicts), (1, 1));
        assert_eq!(m.instances(&[], &[]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn signals_bracket_each_mutation() {
        use SignalKind::*;
        let books = Arc::new(manager("book"));
        let authors = manager("author");
        let log = Arc::new(StdMutex::new(Vec::new()));
        let weak = Arc::downgrade(&books);
        for kind in [
            BeforeCreate,
            AfterCreate,
            BeforeDelete,
            AfterDelete,
            BeforeAddToRelation,
            AfterAddToRelation,
            BeforeRemoveFromRelation,
            AfterRemoveFromRelation,
        ] {
            let sink = Arc::clone(&log);
            let weak = weak.clone();
            books.context.signals.connect(
                kind,
                Arc::new(move |_, kind, _| {
                    let stored = match weak.upgrade() {
                        Some(m) => futures::executor::block_on(m.instances(&[], &[]))?,
                        None => Vec::new(),
                    };
                    let members = stored.first().and_then(|b| b.get("authors")).cloned().unwrap_or(Value::Null);
                    sink.lock().unwrap().push((kind, stored.len(), members));
                    Ok(())
                }),
            );
        }

        let author = authors.create(props(json!({"name": "X"})), true).await.unwrap();
        let book = books.create(props(json!({"title": "A"})), true).await.unwrap();
        books.relation_add(&book, "authors", &authors, &author).await.unwrap();
        books.relation_remove(&book, "authors", &authors, &author).await.unwrap();
        books.delete(&book).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                (BeforeCreate, 0, Value::Null),
                (AfterCreate, 1, Value::Null),
                (BeforeAddToRelation, 1, Value::Null),
                (AfterAddToRelation, 1, json!([1])),
                (BeforeRemoveFromRelation, 1, json!([1])),
                (AfterRemoveFromRelation, 1, json!([])),
                (BeforeDelete, 1, json!([])),
                (AfterDelete, 0, Value::Null),
            ]
        );
    }

    #[tokio::test]
    async fn sessions_keep_pending_writes_apart() {
        let shared = Arc::new(manager("book"));
        let first = Arc::clone(&shared).session();
        let second = Arc::clone(&shared).session();

        let draft = first.create(props(json!({"title": "draft", "isbn": "1"})), false).await.unwrap();
        second.create(props(json!({"title": "other"})), false).await.unwrap();
        second.commit().await.unwrap();
        assert!(matches!(shared.read(&draft["id"]).await, Err(ApiError::ItemNotFound { .. })));
        assert_eq!(shared.instances(&[], &[]).await.unwrap().len(), 1);

        first.commit().await.unwrap();
        assert_eq!(shared.read(&draft["id"]).await.unwrap()["title"], json!("draft"));
    }

    #[tokio::test]
    async fn commit_rechecks_uniqueness() {
        let shared = Arc::new(manager("book"));
        let first = Arc::clone(&shared).session();
        let second = Arc::clone(&shared).session();

        first.create(props(json!({"title": "A", "isbn": "1"})), false).await.unwrap();
        first.create(props(json!({"title": "B", "isbn": "2"})), false).await.unwrap();
        second.create(props(json!({"title": "C", "isbn": "1"})), true).await.unwrap();

        assert!(matches!(first.commit().await, Err(ApiError::DuplicateKey { .. })));
        let titles: Vec<Value> = shared.instances(&[], &[]).await.unwrap().iter().map(|i| i["title"].clone()).collect();
        assert_eq!(titles, vec![json!("C")]);
        first.commit().await.unwrap();
    }
}
