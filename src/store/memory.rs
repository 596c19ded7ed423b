use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use super::{DocumentStore, Mutation};
use crate::error::{CountsError, CountsResult};

type Collection = DashMap<String, Value>;

/// In-process document store.
///
/// Collections are independent `DashMap`s, so writes to documents that land on
/// different map shards proceed in parallel. `update` holds the document's
/// entry lock for the duration of the closure, which gives the per-document
/// atomicity the counting layer needs.
#[derive(Default)]
pub struct MemoryStore {
    collections: DashMap<String, Arc<Collection>>,
}

/// On-disk form of a [`MemoryStore`].
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    collections: BTreeMap<String, BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot file, or start empty if the file does not exist yet.
    pub fn open(path: &Path) -> CountsResult<Self> {
        if !path.exists() {
            info!(path = %path.display(), "No snapshot found, starting with an empty store");
            return Ok(Self::new());
        }

        let content = std::fs::read_to_string(path)?;
        let snapshot: Snapshot = serde_json::from_str(&content)?;

        let store = Self::new();
        let mut documents = 0usize;
        for (name, docs) in snapshot.collections {
            let collection = store.collection(&name);
            for (id, value) in docs {
                collection.insert(id, value);
                documents += 1;
            }
        }

        info!(
            operation = "snapshot_load",
            path = %path.display(),
            collections = store.collections.len(),
            documents = documents,
        );
        Ok(store)
    }

    /// Write the whole store to `path`, replacing it atomically.
    pub fn save(&self, path: &Path) -> CountsResult<()> {
        let mut snapshot = Snapshot::default();
        for item in self.collections.iter() {
            let docs = item
                .value()
                .iter()
                .map(|d| (d.key().clone(), d.value().clone()))
                .collect();
            snapshot.collections.insert(item.key().clone(), docs);
        }

        let content = serde_json::to_string_pretty(&snapshot)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;

        info!(
            operation = "snapshot_save",
            path = %path.display(),
            collections = snapshot.collections.len(),
        );
        Ok(())
    }

    /// Number of documents in a collection.
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .get(collection)
            .map(|c| c.len())
            .unwrap_or(0)
    }

    /// Names of every collection that has been written to, sorted.
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.iter().map(|c| c.key().clone()).collect();
        names.sort();
        names
    }

    fn collection(&self, name: &str) -> Arc<Collection> {
        if let Some(existing) = self.collections.get(name) {
            return Arc::clone(existing.value());
        }
        Arc::clone(self.collections.entry(name.to_string()).or_default().value())
    }
}

impl DocumentStore for MemoryStore {
    fn get(&self, collection: &str, id: &str) -> CountsResult<Option<Value>> {
        let Some(coll) = self.collections.get(collection).map(|c| Arc::clone(c.value())) else {
            return Ok(None);
        };
        let value = coll.get(id).map(|v| v.value().clone());
        Ok(value)
    }

    fn update(
        &self,
        collection: &str,
        id: &str,
        f: &mut dyn FnMut(Option<&Value>) -> CountsResult<Mutation>,
    ) -> CountsResult<Option<Value>> {
        if id.is_empty() {
            return Err(CountsError::InvalidArgument(format!(
                "empty document id in collection {}",
                collection
            )));
        }

        let coll = self.collection(collection);
        let previous = match coll.entry(id.to_string()) {
            Entry::Occupied(mut occupied) => {
                let previous = occupied.get().clone();
                match f(Some(&previous))? {
                    Mutation::Keep => {}
                    Mutation::Put(value) => {
                        occupied.insert(value);
                    }
                    Mutation::Remove => {
                        occupied.remove();
                    }
                }
                Some(previous)
            }
            Entry::Vacant(vacant) => {
                if let Mutation::Put(value) = f(None)? {
                    vacant.insert(value);
                }
                None
            }
        };
        Ok(previous)
    }

    fn scan(&self, collection: &str) -> CountsResult<Vec<(String, Value)>> {
        let Some(coll) = self.collections.get(collection).map(|c| Arc::clone(c.value())) else {
            return Ok(Vec::new());
        };
        let mut docs: Vec<(String, Value)> = coll
            .iter()
            .map(|d| (d.key().clone(), d.value().clone()))
            .collect();
        docs.sort_by(|a, b| a.0.cmp(&b.0));
        debug!(collection = collection, documents = docs.len(), "Scanned collection");
        Ok(docs)
    }
}
