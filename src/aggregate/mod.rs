//! Aggregate index: namespaced, ordered entries with range counts.
//!
//! Two collections back each aggregate:
//! - `aggregate.{name}.entries`: one document per entity id recording where
//!   its entry lives (namespace and sort key). Delete and replace go through
//!   this secondary index, never through a key supplied by the caller.
//! - `aggregate.{name}.partitions`: one document per namespace holding the
//!   sorted entries of that namespace.
//!
//! Every operation writes the location document first and the partition
//! second, then re-reads the location and settles the partitions on it. The
//! two writes are not atomic together; a crash between them is repaired by
//! [`AggregateIndex::reconcile`] and [`AggregateIndex::sweep`] during backfill.

mod partition;
pub mod table;

pub use table::TableAggregate;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{CountsError, CountsResult};
use crate::metrics::AggregateMetrics;
use crate::store::{from_document, to_document, DocumentStore, Mutation};
use partition::Partition;

/// Partition id used when an aggregate has no namespace.
pub const GLOBAL_PARTITION: &str = "$global";

/// Value used to order entries inside a namespace.
///
/// `Null` sorts before every number. Numbers use IEEE total ordering.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SortKey {
    Null,
    Number(f64),
}

impl SortKey {
    pub fn is_finite(&self) -> bool {
        match self {
            SortKey::Null => true,
            SortKey::Number(n) => n.is_finite(),
        }
    }
}

impl From<f64> for SortKey {
    fn from(n: f64) -> Self {
        SortKey::Number(n)
    }
}

impl From<i64> for SortKey {
    fn from(n: i64) -> Self {
        SortKey::Number(n as f64)
    }
}

impl From<u32> for SortKey {
    fn from(n: u32) -> Self {
        SortKey::Number(n as f64)
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SortKey::Null, SortKey::Null) => Ordering::Equal,
            (SortKey::Null, SortKey::Number(_)) => Ordering::Less,
            (SortKey::Number(_), SortKey::Null) => Ordering::Greater,
            (SortKey::Number(a), SortKey::Number(b)) => a.total_cmp(b),
        }
    }
}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SortKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortKey {}

/// One end of a range query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bound {
    pub key: SortKey,
    pub inclusive: bool,
}

/// Range over sort keys. `None` on either side is open-ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bounds {
    pub lower: Option<Bound>,
    pub upper: Option<Bound>,
}

impl Bounds {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn at_least(key: impl Into<SortKey>) -> Self {
        Self::all().with_lower(key, true)
    }

    pub fn after(key: impl Into<SortKey>) -> Self {
        Self::all().with_lower(key, false)
    }

    pub fn at_most(key: impl Into<SortKey>) -> Self {
        Self::all().with_upper(key, true)
    }

    pub fn below(key: impl Into<SortKey>) -> Self {
        Self::all().with_upper(key, false)
    }

    /// Inclusive on both ends.
    pub fn between(lower: impl Into<SortKey>, upper: impl Into<SortKey>) -> Self {
        Self::at_least(lower).with_upper(upper, true)
    }

    pub fn exactly(key: impl Into<SortKey>) -> Self {
        let key = key.into();
        Self::between(key, key)
    }

    pub fn with_lower(mut self, key: impl Into<SortKey>, inclusive: bool) -> Self {
        self.lower = Some(Bound {
            key: key.into(),
            inclusive,
        });
        self
    }

    pub fn with_upper(mut self, key: impl Into<SortKey>, inclusive: bool) -> Self {
        self.upper = Some(Bound {
            key: key.into(),
            inclusive,
        });
        self
    }
}

/// Where an entity's entry currently lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryLocation {
    pub namespace: Option<String>,
    pub key: SortKey,
}

/// Outcome of [`AggregateIndex::reconcile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    Unchanged,
    Inserted,
    Moved,
    /// The location was right but its partition had lost the entry.
    Healed,
}

/// Partition entries removed by [`AggregateIndex::sweep`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Swept {
    /// Entries whose id has no location
    pub orphaned: usize,
    /// Entries left at a position their id no longer occupies
    pub misplaced: usize,
}

/// Passes `settle` makes before leaving a moving location to backfill.
const SETTLE_ROUNDS: usize = 64;

/// Untyped aggregate over entity ids.
pub struct AggregateIndex {
    name: String,
    store: Arc<dyn DocumentStore>,
    entries_collection: String,
    partitions_collection: String,
    metrics: Arc<AggregateMetrics>,
}

fn partition_id(namespace: Option<&str>) -> &str {
    namespace.unwrap_or(GLOBAL_PARTITION)
}

impl AggregateIndex {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn DocumentStore>,
        metrics: Arc<AggregateMetrics>,
    ) -> Self {
        let name = name.into();
        Self {
            entries_collection: format!("aggregate.{}.entries", name),
            partitions_collection: format!("aggregate.{}.partitions", name),
            name,
            store,
            metrics,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn missing(&self, id: &str) -> CountsError {
        CountsError::MissingEntry {
            aggregate: self.name.clone(),
            id: id.to_string(),
        }
    }

    fn check(&self, id: &str, namespace: Option<&str>, key: SortKey) -> CountsResult<()> {
        if id.is_empty() {
            return Err(CountsError::InvalidArgument(format!(
                "{}: entity id cannot be empty",
                self.name
            )));
        }
        if let Some(ns) = namespace {
            if ns.is_empty() || ns == GLOBAL_PARTITION {
                return Err(CountsError::InvalidArgument(format!(
                    "{}: invalid namespace '{}'",
                    self.name, ns
                )));
            }
        }
        if !key.is_finite() {
            return Err(CountsError::InvalidArgument(format!(
                "{}: sort key for {} is not finite",
                self.name, id
            )));
        }
        Ok(())
    }

    /// Add an entry for `id`. A second insert for the same id fails with
    /// `AlreadyExists`.
    pub fn insert(&self, id: &str, namespace: Option<&str>, key: SortKey) -> CountsResult<()> {
        self.check(id, namespace, key)?;
        let location = EntryLocation {
            namespace: namespace.map(str::to_string),
            key,
        };
        let mut doc = Some(to_document(&location)?);

        self.store
            .update(&self.entries_collection, id, &mut |current| match current {
                Some(_) => Err(CountsError::AlreadyExists(format!(
                    "{} entry for {}",
                    self.name, id
                ))),
                None => Ok(doc.take().map(Mutation::Put).unwrap_or(Mutation::Keep)),
            })?;

        if let Err(e) = self.settle(id, vec![location]) {
            // Undo the location so a retry starts clean.
            if let Err(undo) = self.store.delete(&self.entries_collection, id) {
                warn!(
                    aggregate = %self.name,
                    id = id,
                    error = %undo,
                    "Failed to undo entry location, backfill will repair it"
                );
            }
            return Err(e);
        }

        self.metrics.record_insert(&self.name);
        Ok(())
    }

    /// Add an entry unless one exists for `id`. Returns whether an entry was
    /// created. When the entry exists its partition is checked and healed if
    /// an earlier insert stopped half way.
    pub fn insert_if_not_exists(
        &self,
        id: &str,
        namespace: Option<&str>,
        key: SortKey,
    ) -> CountsResult<bool> {
        self.check(id, namespace, key)?;
        let location = EntryLocation {
            namespace: namespace.map(str::to_string),
            key,
        };
        let mut doc = Some(to_document(&location)?);

        let previous = self
            .store
            .update(&self.entries_collection, id, &mut |current| {
                Ok(match current {
                    Some(_) => Mutation::Keep,
                    None => doc.take().map(Mutation::Put).unwrap_or(Mutation::Keep),
                })
            })?;

        match previous {
            Some(existing) => {
                self.heal(id, from_document(&existing)?)?;
                self.metrics.record_insert_skip(&self.name);
                Ok(false)
            }
            None => {
                self.settle(id, vec![location])?;
                self.metrics.record_insert(&self.name);
                Ok(true)
            }
        }
    }

    /// Remove the entry for `id`, wherever it lives. Fails with
    /// `MissingEntry` if there is none.
    pub fn delete(&self, id: &str) -> CountsResult<EntryLocation> {
        let previous = self
            .store
            .update(&self.entries_collection, id, &mut |current| match current {
                Some(_) => Ok(Mutation::Remove),
                None => Err(self.missing(id)),
            })?
            .ok_or_else(|| self.missing(id))?;
        let location: EntryLocation = from_document(&previous)?;

        self.settle(id, vec![location.clone()])?;

        self.metrics.record_delete(&self.name);
        Ok(location)
    }

    /// Move the entry for `id` to a new namespace/key. Returns whether it
    /// moved. Fails with `MissingEntry` if there is no entry.
    pub fn replace(&self, id: &str, namespace: Option<&str>, key: SortKey) -> CountsResult<bool> {
        self.check(id, namespace, key)?;
        let target = EntryLocation {
            namespace: namespace.map(str::to_string),
            key,
        };
        let doc = to_document(&target)?;

        let previous = self
            .store
            .update(&self.entries_collection, id, &mut |current| {
                let Some(current) = current else {
                    return Err(self.missing(id));
                };
                if from_document::<EntryLocation>(current)? == target {
                    Ok(Mutation::Keep)
                } else {
                    Ok(Mutation::Put(doc.clone()))
                }
            })?
            .ok_or_else(|| self.missing(id))?;
        let old: EntryLocation = from_document(&previous)?;

        if old == target {
            return Ok(false);
        }

        self.settle(id, vec![old, target])?;

        self.metrics.record_replace(&self.name);
        debug!(aggregate = %self.name, id = id, "Entry moved");
        Ok(true)
    }

    /// Make the entry for `id` match the given location, inserting or moving
    /// it as needed.
    pub fn reconcile(
        &self,
        id: &str,
        namespace: Option<&str>,
        key: SortKey,
    ) -> CountsResult<Reconciled> {
        match self.entry(id)? {
            Some(current)
                if current.namespace.as_deref() != namespace || current.key != key =>
            {
                self.replace(id, namespace, key)?;
                Ok(Reconciled::Moved)
            }
            Some(current) => {
                if self.heal(id, current)? {
                    Ok(Reconciled::Healed)
                } else {
                    Ok(Reconciled::Unchanged)
                }
            }
            None => {
                if self.insert_if_not_exists(id, namespace, key)? {
                    Ok(Reconciled::Inserted)
                } else {
                    Ok(Reconciled::Unchanged)
                }
            }
        }
    }

    /// Put an existing entry back into its partition if it is missing there.
    fn heal(&self, id: &str, location: EntryLocation) -> CountsResult<bool> {
        let healed = self.settle(id, vec![location])?;
        if healed {
            self.metrics.record_partition_heal();
            warn!(
                aggregate = %self.name,
                id = id,
                "Restored entry missing from its partition"
            );
        }
        Ok(healed)
    }

    /// Bring the partitions in line with the stored location of `id`.
    ///
    /// `touched` holds the partition positions the caller wrote or left
    /// behind. Each of them other than the stored location is removed and the
    /// stored location is added. The location is then read again; if another
    /// writer moved it meanwhile the pass repeats with its position included,
    /// so concurrent writers to one id converge on a single entry.
    ///
    /// Returns whether the stored location had to be added to its partition.
    fn settle(&self, id: &str, mut touched: Vec<EntryLocation>) -> CountsResult<bool> {
        let mut current = self.entry(id)?;
        let mut added = false;

        for _ in 0..SETTLE_ROUNDS {
            for stale in touched.iter().filter(|t| current.as_ref() != Some(*t)) {
                self.partition_remove(stale.namespace.as_deref(), stale.key, id)?;
            }
            if let Some(location) = &current {
                added |= self.partition_add(location.namespace.as_deref(), location.key, id)?;
                if !touched.contains(location) {
                    touched.push(location.clone());
                }
            }

            let latest = self.entry(id)?;
            if latest == current {
                return Ok(added);
            }
            current = latest;
        }

        warn!(
            aggregate = %self.name,
            id = id,
            "Entry location kept moving, backfill will repair its partitions"
        );
        Ok(added)
    }

    /// Current location of the entry for `id`.
    pub fn entry(&self, id: &str) -> CountsResult<Option<EntryLocation>> {
        self.store
            .get(&self.entries_collection, id)?
            .map(|doc| from_document(&doc))
            .transpose()
    }

    /// Every entity id with an entry, sorted.
    pub fn entry_ids(&self) -> CountsResult<Vec<String>> {
        Ok(self
            .store
            .scan(&self.entries_collection)?
            .into_iter()
            .map(|(id, _)| id)
            .collect())
    }

    /// Number of entries in `namespace` (every namespace when `None`) whose
    /// key lies in `bounds`. Unknown namespaces count 0.
    pub fn count(&self, namespace: Option<&str>, bounds: &Bounds) -> CountsResult<usize> {
        self.metrics.record_count();
        match namespace {
            Some(ns) => Ok(self
                .partition(ns)?
                .map(|p| p.count(bounds))
                .unwrap_or(0)),
            None => {
                let mut total = 0;
                for (_, doc) in self.store.scan(&self.partitions_collection)? {
                    total += from_document::<Partition>(&doc)?.count(bounds);
                }
                Ok(total)
            }
        }
    }

    /// Ids in `namespace` whose key lies in `bounds`, in key order.
    pub fn ids_in_range(&self, namespace: &str, bounds: &Bounds) -> CountsResult<Vec<String>> {
        Ok(self
            .partition(namespace)?
            .map(|p| p.range(bounds).iter().map(|(_, id)| id.clone()).collect())
            .unwrap_or_default())
    }

    fn partition(&self, namespace: &str) -> CountsResult<Option<Partition>> {
        self.store
            .get(&self.partitions_collection, namespace)?
            .map(|doc| from_document(&doc))
            .transpose()
    }

    /// Returns whether the entry was added (false if already present).
    fn partition_add(&self, namespace: Option<&str>, key: SortKey, id: &str) -> CountsResult<bool> {
        let mut added = false;
        self.store.update(
            &self.partitions_collection,
            partition_id(namespace),
            &mut |current| {
                let mut partition = match current {
                    Some(doc) => from_document::<Partition>(doc)?,
                    None => Partition::new(namespace),
                };
                added = partition.insert(key, id);
                if !added {
                    return Ok(Mutation::Keep);
                }
                Ok(Mutation::Put(to_document(&partition)?))
            },
        )?;
        Ok(added)
    }

    /// Returns whether the entry was present. Empty partitions are deleted.
    fn partition_remove(
        &self,
        namespace: Option<&str>,
        key: SortKey,
        id: &str,
    ) -> CountsResult<bool> {
        let mut removed = false;
        self.store.update(
            &self.partitions_collection,
            partition_id(namespace),
            &mut |current| {
                let Some(doc) = current else {
                    return Ok(Mutation::Keep);
                };
                let mut partition: Partition = from_document(doc)?;
                removed = partition.remove(key, id);
                if !removed {
                    Ok(Mutation::Keep)
                } else if partition.is_empty() {
                    Ok(Mutation::Remove)
                } else {
                    Ok(Mutation::Put(to_document(&partition)?))
                }
            },
        )?;
        Ok(removed)
    }

    /// Whether the partition recorded by the entry for `id` contains it.
    pub fn is_consistent(&self, id: &str) -> CountsResult<bool> {
        let Some(location) = self.entry(id)? else {
            return Ok(true);
        };
        Ok(self
            .partition(partition_id(location.namespace.as_deref()))?
            .map(|p| p.contains(location.key, id))
            .unwrap_or(false))
    }

    /// Remove partition entries that disagree with the stored locations.
    ///
    /// An entry whose id has no location is orphaned. An entry sitting
    /// anywhere other than its id's location is misplaced. Both are left
    /// behind when a writer stops between the location write and the
    /// partition write.
    pub fn sweep(&self) -> CountsResult<Swept> {
        let mut swept = Swept::default();

        for (_, doc) in self.store.scan(&self.partitions_collection)? {
            let partition: Partition = from_document(&doc)?;
            let namespace = partition.namespace.as_deref();

            for (key, id) in &partition.entries {
                let here = EntryLocation {
                    namespace: partition.namespace.clone(),
                    key: *key,
                };
                match self.entry(id)? {
                    Some(location) if location == here => continue,
                    Some(_) => {
                        if self.partition_remove(namespace, *key, id)? {
                            swept.misplaced += 1;
                        }
                    }
                    None => {
                        if self.partition_remove(namespace, *key, id)? {
                            swept.orphaned += 1;
                        }
                    }
                }
                warn!(
                    aggregate = %self.name,
                    id = id.as_str(),
                    partition = partition_id(namespace),
                    "Removed partition entry that does not match its location"
                );
            }
        }

        Ok(swept)
    }
}
