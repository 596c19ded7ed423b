//! Document store abstraction used by the counting layer.
//!
//! The only guarantee the counting layer relies on is single-document
//! atomicity: [`DocumentStore::update`] runs its closure while the document
//! is locked against concurrent writers. Nothing here spans documents.

pub mod memory;

pub use memory::MemoryStore;

use crate::error::{CountsError, CountsResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// What an [`DocumentStore::update`] closure wants done with the document.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Leave the document as it is
    Keep,
    /// Write this value
    Put(Value),
    /// Delete the document
    Remove,
}

/// Per-document atomic storage, grouped into named collections.
pub trait DocumentStore: Send + Sync {
    /// Read one document.
    fn get(&self, collection: &str, id: &str) -> CountsResult<Option<Value>>;

    /// Atomic read-modify-write of one document.
    ///
    /// `f` sees the current value (or `None`) and decides what to write. If `f`
    /// returns an error nothing is written. Returns the previous value.
    /// `f` must not call back into the store.
    fn update(
        &self,
        collection: &str,
        id: &str,
        f: &mut dyn FnMut(Option<&Value>) -> CountsResult<Mutation>,
    ) -> CountsResult<Option<Value>>;

    /// List every document in a collection as `(id, value)`, ordered by id.
    fn scan(&self, collection: &str) -> CountsResult<Vec<(String, Value)>>;

    /// Unconditionally write one document.
    fn put(&self, collection: &str, id: &str, value: Value) -> CountsResult<()> {
        let mut value = Some(value);
        self.update(collection, id, &mut |_| {
            Ok(value.take().map(Mutation::Put).unwrap_or(Mutation::Keep))
        })?;
        Ok(())
    }

    /// Delete one document, returning what was there.
    fn delete(&self, collection: &str, id: &str) -> CountsResult<Option<Value>> {
        self.update(collection, id, &mut |_| Ok(Mutation::Remove))
    }
}

/// Encode a typed document.
pub fn to_document<T: Serialize>(value: &T) -> CountsResult<Value> {
    serde_json::to_value(value).map_err(CountsError::from)
}

/// Decode a typed document.
pub fn from_document<T: DeserializeOwned>(value: &Value) -> CountsResult<T> {
    T::deserialize(value).map_err(CountsError::from)
}

/// Read and decode one document.
pub fn get_typed<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: &str,
    id: &str,
) -> CountsResult<Option<T>> {
    store
        .get(collection, id)?
        .map(|v| from_document(&v))
        .transpose()
}

/// Encode and write one document.
pub fn put_typed<T: Serialize>(
    store: &dyn DocumentStore,
    collection: &str,
    id: &str,
    value: &T,
) -> CountsResult<()> {
    store.put(collection, id, to_document(value)?)
}

/// Read and decode a whole collection.
pub fn scan_typed<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: &str,
) -> CountsResult<Vec<T>> {
    store
        .scan(collection)?
        .iter()
        .map(|(_, v)| from_document(v))
        .collect()
}
