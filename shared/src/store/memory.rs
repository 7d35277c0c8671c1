use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;

use super::{Condition, Document, Key, Page, Store, StoreError, Update, GSI1PK};

/// In-process [`Store`] with the table's key ordering and condition checks.
/// Used by tests and by local runs without DynamoDB.
#[derive(Default)]
pub struct MemoryStore {
    items: Mutex<BTreeMap<Key, Document>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> Result<MutexGuard<'_, BTreeMap<Key, Document>>, StoreError> {
        self.items
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }

    pub fn len(&self) -> usize {
        self.items.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn check(table: &BTreeMap<Key, Document>, key: &Key, condition: Condition) -> Result<(), StoreError> {
    let exists = table.contains_key(key);
    match condition {
        Condition::NotExists if exists => Err(StoreError::ConditionFailed),
        Condition::Exists if !exists => Err(StoreError::ConditionFailed),
        _ => Ok(()),
    }
}

fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn set_path(doc: &mut Document, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    let (last, parents) = match segments.split_last() {
        Some(split) => split,
        None => return,
    };

    let mut current = doc;
    for segment in parents {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Document::new()));
        if !entry.is_object() {
            *entry = Value::Object(Document::new());
        }
        current = match entry.as_object_mut() {
            Some(map) => map,
            None => return,
        };
    }
    current.insert(last.to_string(), value);
}

fn remove_path(doc: &mut Document, path: &str) {
    let segments: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };

    let mut current = doc;
    for segment in parents {
        current = match current.get_mut(*segment).and_then(Value::as_object_mut) {
            Some(map) => map,
            None => return,
        };
    }
    current.remove(*last);
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &Key) -> Result<Option<Document>, StoreError> {
        Ok(self.table()?.get(key).cloned())
    }

    async fn put(&self, item: Document, condition: Condition) -> Result<(), StoreError> {
        let key = Key::of(&item)?;
        let mut table = self.table()?;
        check(&table, &key, condition)?;
        table.insert(key, item);
        Ok(())
    }

    async fn put_all(&self, items: Vec<(Document, Condition)>) -> Result<(), StoreError> {
        let mut table = self.table()?;
        let mut keyed = Vec::with_capacity(items.len());
        for (doc, condition) in items {
            let key = Key::of(&doc)?;
            check(&table, &key, condition)?;
            keyed.push((key, doc));
        }
        for (key, doc) in keyed {
            table.insert(key, doc);
        }
        Ok(())
    }

    async fn query(&self, pk: &str, sk_prefix: Option<&str>) -> Result<Vec<Document>, StoreError> {
        let table = self.table()?;
        Ok(table
            .iter()
            .filter(|(key, _)| key.pk == pk)
            .filter(|(key, _)| sk_prefix.map_or(true, |prefix| key.sk.starts_with(prefix)))
            .map(|(_, doc)| doc.clone())
            .collect())
    }

    async fn query_index(&self, value: &str) -> Result<Vec<Document>, StoreError> {
        let table = self.table()?;
        Ok(table
            .values()
            .filter(|doc| doc.get(GSI1PK).and_then(Value::as_str) == Some(value))
            .cloned()
            .collect())
    }

    async fn scan(
        &self,
        pk_prefix: &str,
        limit: i32,
        start: Option<Key>,
    ) -> Result<Page, StoreError> {
        let table = self.table()?;
        let lower = match &start {
            Some(key) => Bound::Excluded(key.clone()),
            None => Bound::Unbounded,
        };

        let limit = limit.max(1) as usize;
        let mut evaluated = table.range((lower, Bound::Unbounded));
        let mut page = Page::default();
        let mut last = None;

        for (key, doc) in evaluated.by_ref().take(limit) {
            if key.pk.starts_with(pk_prefix) {
                page.items.push(doc.clone());
            }
            last = Some(key.clone());
        }

        if evaluated.next().is_some() {
            page.last_key = last;
        }
        Ok(page)
    }

    async fn update(&self, update: Update) -> Result<Document, StoreError> {
        let mut table = self.table()?;
        check(&table, &update.key, update.condition)?;

        let mut doc = table.get(&update.key).cloned().unwrap_or_else(|| {
            let mut fresh = Document::new();
            fresh.insert("PK".to_string(), Value::String(update.key.pk.clone()));
            fresh.insert("SK".to_string(), Value::String(update.key.sk.clone()));
            fresh
        });

        for (path, value) in update.sets {
            set_path(&mut doc, &path, value);
        }
        for (path, delta) in update.increments {
            let current = get_path(&doc, &path).and_then(Value::as_i64).unwrap_or(0);
            set_path(&mut doc, &path, Value::from(current + delta));
        }
        for path in update.removes {
            remove_path(&mut doc, &path);
        }

        table.insert(update.key, doc.clone());
        Ok(doc)
    }

    async fn delete(&self, key: &Key, condition: Condition) -> Result<(), StoreError> {
        let mut table = self.table()?;
        check(&table, key, condition)?;
        table.remove(key);
        Ok(())
    }
}
