// Snapshot store: the single owner of one app's document

use crate::document::{Document, Holds, OnDelete};
use crate::error::{Refusal, Result, ValidationError};
use crate::record::{Record, new_id};
use crate::storage::Storage;
use chrono::Utc;
use eyre::Context;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Pre-delete predicate: returns a refusal to block the removal
pub type Guard<D, T> = dyn Fn(&D, &T) -> Option<Refusal>;

/// Pre-insert predicate: compares the candidate against the existing collection
pub type Check<T> = dyn Fn(&T, &[T]) -> Option<Refusal>;

/// Result of a successful removal
#[derive(Debug, Clone)]
pub struct Removal<T> {
    /// The record that was removed
    pub record: T,
    /// Child collections purged by cascade, with the number of records removed
    pub cascaded: Vec<(&'static str, usize)>,
}

/// Persistent store holding one document in memory and in storage.
///
/// Every mutating operation builds the next document on a copy and writes
/// the full snapshot to storage. The copy becomes the current document only
/// once the write succeeds, so a failed write leaves both sides as they were.
pub struct Store<D: Document> {
    storage: Box<dyn Storage>,
    doc: D,
}

impl<D: Document> Store<D> {
    /// Open a store over `storage`, loading the persisted snapshot.
    ///
    /// When no usable snapshot exists the seed document is loaded and
    /// written back, so the key is always populated afterwards.
    pub fn open<S: Storage + 'static>(storage: S) -> Result<Self> {
        let storage: Box<dyn Storage> = Box::new(storage);

        let store = match read_snapshot::<D>(storage.as_ref()) {
            Some(doc) => Self { storage, doc },
            None => {
                let mut store = Self { storage, doc: D::seed() };
                store.save()?;
                store
            }
        };

        debug!(key = D::storage_key(), "Store opened");
        Ok(store)
    }

    /// Read the document persisted in `storage`, falling back to the seed.
    ///
    /// Never fails: unreadable, unparsable or structurally invalid snapshots
    /// all yield the seed document.
    pub fn load(storage: &dyn Storage) -> D {
        read_snapshot::<D>(storage).unwrap_or_else(D::seed)
    }

    /// The current document
    pub fn document(&self) -> &D {
        &self.doc
    }

    /// The storage backend this store writes to
    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    /// Persist the current document under its storage key
    pub fn save(&mut self) -> Result<()> {
        write_snapshot(self.storage.as_mut(), &self.doc)
    }

    /// Persist `next` and make it the current document
    fn commit(&mut self, next: D) -> Result<()> {
        write_snapshot(self.storage.as_mut(), &next)?;
        self.doc = next;
        Ok(())
    }

    /// Apply several edits as a single change.
    ///
    /// `edit` works on a copy of the document. The copy is persisted and
    /// adopted only when `edit` returns `Ok` and the write succeeds;
    /// otherwise it is discarded.
    pub fn transact<R>(&mut self, edit: impl FnOnce(&mut D) -> Result<R>) -> Result<R> {
        let mut next = self.doc.clone();
        let out = edit(&mut next)?;
        self.commit(next)?;
        Ok(out)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// All records of a collection, in stored order
    pub fn list<T: Record>(&self) -> &[T]
    where
        D: Holds<T>,
    {
        self.doc.records()
    }

    /// Get a record by ID
    pub fn get<T: Record>(&self, id: &str) -> Option<&T>
    where
        D: Holds<T>,
    {
        self.doc.records().iter().find(|r| r.id() == id)
    }

    /// First record matching a predicate
    pub fn find<T: Record>(&self, pred: impl Fn(&T) -> bool) -> Option<&T>
    where
        D: Holds<T>,
    {
        self.doc.records().iter().find(|r| pred(*r))
    }

    /// Number of records in a collection
    pub fn len<T: Record>(&self) -> usize
    where
        D: Holds<T>,
    {
        <D as Holds<T>>::records(&self.doc).len()
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Insert a record with a freshly generated ID and creation timestamp.
    ///
    /// Whatever identity the caller set on `record` is replaced.
    pub fn insert<T: Record>(&mut self, record: T) -> Result<T>
    where
        D: Holds<T>,
    {
        self.insert_inner(record, None)
    }

    /// Insert after running a duplicate/conflict check against the collection
    pub fn insert_checked<T: Record>(&mut self, record: T, check: &Check<T>) -> Result<T>
    where
        D: Holds<T>,
    {
        self.insert_inner(record, Some(check))
    }

    fn insert_inner<T: Record>(&mut self, record: T, check: Option<&Check<T>>) -> Result<T>
    where
        D: Holds<T>,
    {
        let collection = T::collection_name();

        if let Some(check) = check
            && let Some(refusal) = check(&record, self.doc.records().as_slice())
        {
            debug!(collection, %refusal, "Insert refused");
            return Err(refusal.into());
        }

        let mut next = self.doc.clone();
        let record = place(&mut next, record);
        self.commit(next)?;

        debug!(collection, id = record.id(), "Record inserted");
        Ok(record)
    }

    /// Merge `patch` (a JSON object) into the record with `id`.
    ///
    /// `id` and `created_at` in the patch are ignored. Returns `Ok(None)`
    /// when no record has that ID; nothing is written in that case.
    pub fn update<T: Record>(&mut self, id: &str, patch: Value) -> Result<Option<T>>
    where
        D: Holds<T>,
    {
        let collection = T::collection_name();
        let bad_patch = |reason: String| ValidationError::BadPatch {
            collection: collection.to_string(),
            id: id.to_string(),
            reason,
        };

        let Value::Object(patch) = patch else {
            return Err(bad_patch("patch must be a JSON object".to_string()).into());
        };

        let records: &[T] = self.doc.records();
        let Some(index) = records.iter().position(|r| r.id() == id) else {
            debug!(collection, id, "Update skipped, record not found");
            return Ok(None);
        };

        let existing = &records[index];
        let created_at = existing.created_at();
        let mut merged = serde_json::to_value(existing)?;
        if let Value::Object(fields) = &mut merged {
            for (key, value) in patch {
                if key == "id" || key == "created_at" {
                    continue;
                }
                fields.insert(key, value);
            }
        }

        let mut updated: T = serde_json::from_value(merged).map_err(|e| bad_patch(e.to_string()))?;
        updated.assign_identity(id.to_string(), created_at);

        let mut next = self.doc.clone();
        <D as Holds<T>>::records_mut(&mut next)[index] = updated.clone();
        self.commit(next)?;

        debug!(collection, id, "Record updated");
        Ok(Some(updated))
    }

    /// Apply a typed edit to the record with `id`, preserving its identity.
    ///
    /// Returns `Ok(None)` when no record has that ID.
    pub fn update_with<T: Record>(&mut self, id: &str, edit: impl FnOnce(&mut T)) -> Result<Option<T>>
    where
        D: Holds<T>,
    {
        let mut next = self.doc.clone();
        let records = <D as Holds<T>>::records_mut(&mut next);
        let Some(record) = records.iter_mut().find(|r| r.id() == id) else {
            return Ok(None);
        };

        let created_at = record.created_at();
        edit(record);
        record.assign_identity(id.to_string(), created_at);
        let updated = record.clone();

        self.commit(next)?;
        debug!(collection = T::collection_name(), id, "Record edited");
        Ok(Some(updated))
    }

    /// Replace the record whose ID matches `record`, or insert it when the ID
    /// is empty or unknown. Replacement keeps the stored creation timestamp.
    pub fn upsert<T: Record>(&mut self, mut record: T) -> Result<T>
    where
        D: Holds<T>,
    {
        let records: &[T] = self.doc.records();
        let index = records.iter().position(|r| !record.id().is_empty() && r.id() == record.id());

        match index {
            Some(index) => {
                let id = record.id().to_string();
                record.assign_identity(id, records[index].created_at());

                let mut next = self.doc.clone();
                <D as Holds<T>>::records_mut(&mut next)[index] = record.clone();
                self.commit(next)?;
                Ok(record)
            }
            None => self.insert(record),
        }
    }

    /// Delete the record with `id`.
    ///
    /// The guard, if any, runs first; then every relation whose parent is
    /// this collection is consulted. `Restrict` relations with live children
    /// refuse the removal, `Cascade` relations purge their children, and
    /// `Keep` relations leave dangling references behind. Returns
    /// `Ok(None)` when no record has that ID.
    pub fn remove<T: Record>(&mut self, id: &str, guard: Option<&Guard<D, T>>) -> Result<Option<Removal<T>>>
    where
        D: Holds<T>,
    {
        let collection = T::collection_name();

        let Some(index) = self.doc.records().iter().position(|r: &T| r.id() == id) else {
            debug!(collection, id, "Remove skipped, record not found");
            return Ok(None);
        };

        if let Some(guard) = guard
            && let Some(refusal) = guard(&self.doc, &self.doc.records()[index])
        {
            debug!(collection, id, %refusal, "Remove refused by guard");
            return Err(refusal.into());
        }

        let relations: Vec<_> = D::relations().into_iter().filter(|r| r.parent == collection).collect();

        for relation in relations.iter().filter(|r| r.on_delete == OnDelete::Restrict) {
            let count = relation.references(&self.doc, id);
            if count > 0 {
                let refusal = Refusal::InUse {
                    collection: collection.to_string(),
                    id: id.to_string(),
                    reason: format!("referenced by {} {} record(s)", count, relation.child),
                };
                debug!(collection, id, %refusal, "Remove refused by relation");
                return Err(refusal.into());
            }
        }

        let mut next = self.doc.clone();
        let record = <D as Holds<T>>::records_mut(&mut next).remove(index);

        let mut cascaded = Vec::new();
        for relation in &relations {
            match relation.on_delete {
                OnDelete::Cascade => {
                    let purged = relation.purge(&mut next, id);
                    cascaded.push((relation.child, purged));
                }
                OnDelete::Keep => {
                    let dangling = relation.references(&next, id);
                    if dangling > 0 {
                        debug!(collection, id, child = relation.child, dangling, "Leaving dangling references");
                    }
                }
                OnDelete::Restrict => {}
            }
        }

        self.commit(next)?;
        debug!(collection, id, ?cascaded, "Record removed");
        Ok(Some(Removal { record, cascaded }))
    }

    /// Replace the document with a fresh seed and persist it
    pub fn reset(&mut self) -> Result<()> {
        info!(key = D::storage_key(), "Resetting document to seed");
        self.commit(D::seed())
    }

    // ========================================================================
    // Import / export
    // ========================================================================

    /// Serialize the current document for export
    pub fn export_blob(&self) -> Result<String> {
        export_blob(&self.doc)
    }

    /// Replace the whole document with an imported blob.
    ///
    /// On any validation or write failure the current document is left
    /// untouched.
    pub fn import_blob(&mut self, text: &str) -> Result<()> {
        let doc = parse_blob::<D>(text)?;
        self.commit(doc)?;
        info!(key = D::storage_key(), "Imported document");
        Ok(())
    }

    /// Write the export blob to a file
    pub fn export_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let blob = self.export_blob()?;
        fs::write(path, blob).with_context(|| format!("Failed to write export to {:?}", path))?;
        Ok(())
    }

    /// Import a previously exported file
    pub fn import_from<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).with_context(|| format!("Failed to read import file {:?}", path))?;
        self.import_blob(&text)
    }
}

/// Give `record` a fresh ID and creation timestamp and add it to its
/// collection in `doc`, at the front or the back as the record type asks
pub fn place<D: Holds<T>, T: Record>(doc: &mut D, mut record: T) -> T {
    let records = doc.records_mut();
    let mut id = new_id();
    while records.iter().any(|r| r.id() == id) {
        id = new_id();
    }
    record.assign_identity(id, Utc::now());

    if T::prepend() {
        records.insert(0, record.clone());
    } else {
        records.push(record.clone());
    }
    record
}

fn write_snapshot<D: Document>(storage: &mut dyn Storage, doc: &D) -> Result<()> {
    let blob = serde_json::to_string(doc)?;
    storage
        .set(D::storage_key(), &blob)
        .context("Failed to persist snapshot")?;
    debug!(key = D::storage_key(), bytes = blob.len(), "Snapshot saved");
    Ok(())
}

/// Serialize a document to the portable export format (pretty JSON)
pub fn export_blob<D: Document>(doc: &D) -> Result<String> {
    Ok(serde_json::to_string_pretty(doc)?)
}

/// Parse and validate an import blob.
///
/// Every expected collection key must be present and hold an array, the
/// records must deserialize, and the document's anchor check must pass.
pub fn parse_blob<D: Document>(text: &str) -> std::result::Result<D, ValidationError> {
    let raw: Value = serde_json::from_str(text).map_err(|e| ValidationError::NotJson(e.to_string()))?;
    let Value::Object(fields) = &raw else {
        return Err(ValidationError::NotAnObject);
    };

    for key in D::collections() {
        match fields.get(*key) {
            None => return Err(ValidationError::MissingCollection(key.to_string())),
            Some(Value::Array(_)) => {}
            Some(_) => return Err(ValidationError::NotACollection(key.to_string())),
        }
    }

    let doc: D = serde_json::from_value(raw).map_err(|e| ValidationError::Malformed(e.to_string()))?;
    doc.validate()?;
    Ok(doc)
}

/// Lenient parse used at load time: missing collections are backfilled
/// empty, but present ones must be arrays and the anchor must be valid.
fn parse_snapshot<D: Document>(text: &str) -> std::result::Result<D, ValidationError> {
    let raw: Value = serde_json::from_str(text).map_err(|e| ValidationError::NotJson(e.to_string()))?;
    let Value::Object(fields) = &raw else {
        return Err(ValidationError::NotAnObject);
    };

    for key in D::collections() {
        if let Some(value) = fields.get(*key)
            && !value.is_array()
        {
            return Err(ValidationError::NotACollection(key.to_string()));
        }
    }

    let doc: D = serde_json::from_value(raw).map_err(|e| ValidationError::Malformed(e.to_string()))?;
    doc.validate()?;
    Ok(doc)
}

fn read_snapshot<D: Document>(storage: &dyn Storage) -> Option<D> {
    let key = D::storage_key();

    let text = match storage.get(key) {
        Ok(Some(text)) => text,
        Ok(None) => {
            info!(key, "No snapshot found, using seed document");
            return None;
        }
        Err(e) => {
            warn!(key, error = ?e, "Failed to read snapshot, using seed document");
            return None;
        }
    };

    match parse_snapshot::<D>(&text) {
        Ok(doc) => {
            debug!(key, "Loaded snapshot");
            Some(doc)
        }
        Err(e) => {
            warn!(key, error = %e, "Snapshot failed validation, using seed document");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Relation;
    use crate::error::Error;
    use crate::record::Amount;
    use crate::storage::MemoryStorage;
    use chrono::DateTime;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Owner {
        #[serde(default)]
        id: String,
        #[serde(default)]
        created_at: DateTime<Utc>,
        name: String,
    }
    crate::impl_record!(Owner, "owners");

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Pet {
        #[serde(default)]
        id: String,
        #[serde(default)]
        created_at: DateTime<Utc>,
        owner_id: String,
        name: String,
        #[serde(default)]
        weight: Amount,
    }
    crate::impl_record!(Pet, "pets", append);

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Visit {
        #[serde(default)]
        id: String,
        #[serde(default)]
        created_at: DateTime<Utc>,
        pet_id: String,
    }
    crate::impl_record!(Visit, "visits");

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct TestDoc {
        #[serde(default)]
        owners: Vec<Owner>,
        #[serde(default)]
        pets: Vec<Pet>,
        #[serde(default)]
        visits: Vec<Visit>,
    }

    impl Document for TestDoc {
        fn storage_key() -> &'static str {
            "test_doc"
        }

        fn collections() -> &'static [&'static str] {
            &["owners", "pets", "visits"]
        }

        fn seed() -> Self {
            TestDoc {
                owners: vec![Owner {
                    id: "seed-owner".to_string(),
                    created_at: Utc::now(),
                    name: "Seed".to_string(),
                }],
                pets: Vec::new(),
                visits: Vec::new(),
            }
        }

        fn relations() -> Vec<Relation<Self>> {
            vec![
                Relation::new::<Owner, Pet>(OnDelete::Cascade, |p| p.owner_id.as_str()),
                Relation::new::<Pet, Visit>(OnDelete::Keep, |v| v.pet_id.as_str()),
            ]
        }
    }

    crate::impl_holds!(TestDoc { Owner => owners, Pet => pets, Visit => visits });

    fn owner(name: &str) -> Owner {
        Owner {
            id: String::new(),
            created_at: DateTime::<Utc>::default(),
            name: name.to_string(),
        }
    }

    fn pet(owner_id: &str, name: &str) -> Pet {
        Pet {
            id: String::new(),
            created_at: DateTime::<Utc>::default(),
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            weight: Amount::from(4.5),
        }
    }

    fn open() -> Store<TestDoc> {
        Store::open(MemoryStorage::new()).unwrap()
    }

    /// Memory storage whose writes fail while `broken` is set
    struct BrittleStorage {
        inner: MemoryStorage,
        broken: Arc<AtomicBool>,
    }

    impl Storage for BrittleStorage {
        fn get(&self, key: &str) -> eyre::Result<Option<String>> {
            self.inner.get(key)
        }

        fn set(&mut self, key: &str, value: &str) -> eyre::Result<()> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(eyre::eyre!("disk full"));
            }
            self.inner.set(key, value)
        }
    }

    fn open_brittle() -> (Store<TestDoc>, Arc<AtomicBool>) {
        let broken = Arc::new(AtomicBool::new(false));
        let storage = BrittleStorage {
            inner: MemoryStorage::new(),
            broken: Arc::clone(&broken),
        };
        (Store::open(storage).unwrap(), broken)
    }

    #[test]
    fn test_open_seeds_and_persists() {
        let store = open();
        assert_eq!(store.list::<Owner>().len(), 1);
        assert!(store.storage().get("test_doc").unwrap().is_some());
    }

    #[test]
    fn test_load_unparsable_falls_back_to_seed() {
        let storage = MemoryStorage::new().with("test_doc", "{not json");
        let doc = Store::<TestDoc>::load(&storage);
        assert_eq!(doc.owners[0].id, "seed-owner");
    }

    #[test]
    fn test_load_non_array_collection_falls_back_to_seed() {
        let storage = MemoryStorage::new().with("test_doc", r#"{"owners":{},"pets":[],"visits":[]}"#);
        let doc = Store::<TestDoc>::load(&storage);
        assert_eq!(doc.owners[0].id, "seed-owner");
    }

    #[test]
    fn test_load_backfills_missing_collections() {
        let storage = MemoryStorage::new().with("test_doc", r#"{"owners":[{"id":"o1","name":"Ann"}]}"#);
        let doc = Store::<TestDoc>::load(&storage);
        assert_eq!(doc.owners.len(), 1);
        assert_eq!(doc.owners[0].id, "o1");
        assert!(doc.pets.is_empty());
        assert!(doc.visits.is_empty());
    }

    #[test]
    fn test_insert_assigns_identity() {
        let mut store = open();
        let mut candidate = owner("Ann");
        candidate.id = "caller-chosen".to_string();

        let stored = store.insert(candidate).unwrap();
        assert_ne!(stored.id, "caller-chosen");
        assert!(!stored.id.is_empty());
        assert!(stored.created_at > DateTime::<Utc>::default());
        assert_eq!(store.get::<Owner>(&stored.id), Some(&stored));
    }

    #[test]
    fn test_insert_order_convention() {
        let mut store = open();
        let first = store.insert(owner("First")).unwrap();
        let second = store.insert(owner("Second")).unwrap();
        // owners prepend
        assert_eq!(store.list::<Owner>()[0].id, second.id);
        assert_eq!(store.list::<Owner>()[1].id, first.id);

        let a = store.insert(pet(&first.id, "A")).unwrap();
        let b = store.insert(pet(&first.id, "B")).unwrap();
        // pets append
        assert_eq!(store.list::<Pet>()[0].id, a.id);
        assert_eq!(store.list::<Pet>()[1].id, b.id);
    }

    #[test]
    fn test_insert_checked_refusal_does_not_mutate() {
        let mut store = open();
        let before = store.len::<Owner>();

        let check: &Check<Owner> = &|candidate, existing| {
            existing.iter().find(|o| o.name == candidate.name).map(|o| Refusal::Duplicate {
                collection: "owners".to_string(),
                key: candidate.name.clone(),
                existing_id: o.id.clone(),
            })
        };

        let err = store.insert_checked(owner("Seed"), check).unwrap_err();
        assert!(matches!(err, Error::Refused(Refusal::Duplicate { .. })));
        assert_eq!(store.len::<Owner>(), before);

        store.insert_checked(owner("Other"), check).unwrap();
        assert_eq!(store.len::<Owner>(), before + 1);
    }

    #[test]
    fn test_update_preserves_identity() {
        let mut store = open();
        let stored = store.insert(owner("Ann")).unwrap();

        let updated: Owner = store
            .update(
                &stored.id,
                json!({"name": "Annie", "id": "hijack", "created_at": "2000-01-01T00:00:00Z"}),
            )
            .unwrap()
            .unwrap();

        assert_eq!(updated.id, stored.id);
        assert_eq!(updated.created_at, stored.created_at);
        assert_eq!(updated.name, "Annie");
        assert_eq!(store.get::<Owner>(&stored.id).unwrap().name, "Annie");
    }

    #[test]
    fn test_update_missing_is_noop() {
        let mut store = open();
        let result: Option<Owner> = store.update("missing", json!({"name": "X"})).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_update_bad_patch_rejected() {
        let mut store = open();
        let stored = store.insert(owner("Ann")).unwrap();

        let err = store.update::<Owner>(&stored.id, json!({"name": 42})).unwrap_err();
        assert!(matches!(err, Error::Invalid(ValidationError::BadPatch { .. })));
        assert_eq!(store.get::<Owner>(&stored.id).unwrap().name, "Ann");

        let err = store.update::<Owner>(&stored.id, json!(["not", "an", "object"])).unwrap_err();
        assert!(matches!(err, Error::Invalid(ValidationError::BadPatch { .. })));
    }

    #[test]
    fn test_update_with_preserves_identity() {
        let mut store = open();
        let stored = store.insert(owner("Ann")).unwrap();

        let edited = store
            .update_with::<Owner>(&stored.id, |o| {
                o.name = "Edited".to_string();
                o.id = "changed".to_string();
            })
            .unwrap()
            .unwrap();
        assert_eq!(edited.id, stored.id);
        assert_eq!(edited.name, "Edited");
        assert!(store.update_with::<Owner>("missing", |_| {}).unwrap().is_none());
    }

    #[test]
    fn test_upsert_replaces_or_inserts() {
        let mut store = open();
        let stored = store.insert(owner("Ann")).unwrap();

        let mut replacement = owner("Replaced");
        replacement.id = stored.id.clone();
        let replaced = store.upsert(replacement).unwrap();
        assert_eq!(replaced.created_at, stored.created_at);
        assert_eq!(store.get::<Owner>(&stored.id).unwrap().name, "Replaced");

        let before = store.len::<Owner>();
        store.upsert(owner("Fresh")).unwrap();
        assert_eq!(store.len::<Owner>(), before + 1);
    }

    #[test]
    fn test_remove_guard_refusal_keeps_collection() {
        let mut store = open();
        let stored = store.insert(owner("Ann")).unwrap();
        let before = store.len::<Owner>();

        let guard: &Guard<TestDoc, Owner> = &|_, o| {
            Some(Refusal::InUse {
                collection: "owners".to_string(),
                id: o.id.clone(),
                reason: "always".to_string(),
            })
        };

        let err = store.remove::<Owner>(&stored.id, Some(guard)).unwrap_err();
        assert!(err.is_refusal());
        assert_eq!(store.len::<Owner>(), before);
    }

    #[test]
    fn test_remove_cascades_and_keeps() {
        let mut store = open();
        let ann = store.insert(owner("Ann")).unwrap();
        let rex = store.insert(pet(&ann.id, "Rex")).unwrap();
        let bob = store.insert(owner("Bob")).unwrap();
        store.insert(pet(&bob.id, "Fido")).unwrap();
        store
            .insert(Visit {
                id: String::new(),
                created_at: Utc::now(),
                pet_id: rex.id.clone(),
            })
            .unwrap();

        let removal = store.remove::<Owner>(&ann.id, None).unwrap().unwrap();
        assert_eq!(removal.record.id, ann.id);
        assert_eq!(removal.cascaded, vec![("pets", 1)]);
        assert_eq!(store.len::<Pet>(), 1);

        // visits of the removed pet stay behind
        assert_eq!(store.len::<Visit>(), 1);
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let mut store = open();
        assert!(store.remove::<Owner>("missing", None).unwrap().is_none());
    }

    #[test]
    fn test_reset_restores_seed() {
        let mut store = open();
        store.insert(owner("Ann")).unwrap();
        store.reset().unwrap();
        assert_eq!(store.len::<Owner>(), 1);
        assert_eq!(store.list::<Owner>()[0].id, "seed-owner");
    }

    #[test]
    fn test_save_load_roundtrip() {
        let mut store = open();
        let ann = store.insert(owner("Ann")).unwrap();
        store.insert(pet(&ann.id, "Rex")).unwrap();

        let reloaded = Store::<TestDoc>::load(store.storage());
        assert_eq!(&reloaded, store.document());
    }

    #[test]
    fn test_import_rejects_missing_collection() {
        let mut store = open();
        let ann = store.insert(owner("Ann")).unwrap();
        let before = store.document().clone();

        let err = store.import_blob(r#"{"owners":[],"pets":[]}"#).unwrap_err();
        assert!(matches!(err, Error::Invalid(ValidationError::MissingCollection(ref k)) if k == "visits"));
        assert_eq!(store.document(), &before);
        assert!(store.get::<Owner>(&ann.id).is_some());
    }

    #[test]
    fn test_import_rejects_garbage() {
        let mut store = open();
        assert!(matches!(
            store.import_blob("nope").unwrap_err(),
            Error::Invalid(ValidationError::NotJson(_))
        ));
        assert!(matches!(
            store.import_blob("[1,2]").unwrap_err(),
            Error::Invalid(ValidationError::NotAnObject)
        ));
        assert!(matches!(
            store.import_blob(r#"{"owners":[],"pets":5,"visits":[]}"#).unwrap_err(),
            Error::Invalid(ValidationError::NotACollection(_))
        ));
        assert!(matches!(
            store.import_blob(r#"{"owners":[{"name":7}],"pets":[],"visits":[]}"#).unwrap_err(),
            Error::Invalid(ValidationError::Malformed(_))
        ));
    }

    #[test]
    fn test_failed_write_leaves_document_unchanged() {
        let (mut store, broken) = open_brittle();
        let ann = store.insert(owner("Ann")).unwrap();
        store.insert(pet(&ann.id, "Rex")).unwrap();
        let before = store.document().clone();

        broken.store(true, Ordering::SeqCst);
        assert!(matches!(store.insert(owner("Bob")).unwrap_err(), Error::Storage(_)));
        assert!(store.update::<Owner>(&ann.id, json!({"name": "Annie"})).is_err());
        assert!(store.update_with::<Owner>(&ann.id, |o| o.name = "Edited".to_string()).is_err());
        let mut replacement = owner("Replaced");
        replacement.id = ann.id.clone();
        assert!(store.upsert(replacement).is_err());
        assert!(store.remove::<Owner>(&ann.id, None).is_err());
        assert!(store.reset().is_err());

        assert_eq!(store.document(), &before);
        assert_eq!(Store::<TestDoc>::load(store.storage()), before);

        broken.store(false, Ordering::SeqCst);
        store.insert(owner("Bob")).unwrap();
        assert_eq!(store.len::<Owner>(), before.owners.len() + 1);
    }

    #[test]
    fn test_failed_import_write_keeps_document() {
        let (mut store, broken) = open_brittle();
        let ann = store.insert(owner("Ann")).unwrap();

        broken.store(true, Ordering::SeqCst);
        let err = store
            .import_blob(r#"{"owners":[{"id":"o9","name":"Eve"}],"pets":[],"visits":[]}"#)
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert!(store.get::<Owner>(&ann.id).is_some());
        assert!(store.get::<Owner>("o9").is_none());
    }

    #[test]
    fn test_transact_applies_edits_together() {
        let mut store = open();

        let (ann, rex) = store
            .transact(|doc| {
                let ann = place(doc, owner("Ann"));
                let rex = place(doc, pet(&ann.id, "Rex"));
                Ok((ann, rex))
            })
            .unwrap();
        assert_eq!(store.get::<Pet>(&rex.id).unwrap().owner_id, ann.id);
        assert_eq!(&Store::<TestDoc>::load(store.storage()), store.document());

        let before = store.document().clone();
        let err = store
            .transact(|doc| {
                place(doc, owner("Bob"));
                Err::<(), _>(Refusal::InUse {
                    collection: "owners".to_string(),
                    id: ann.id.clone(),
                    reason: "busy".to_string(),
                }
                .into())
            })
            .unwrap_err();
        assert!(err.is_refusal());
        assert_eq!(store.document(), &before);
    }

    #[test]
    fn test_export_import_roundtrip() {
        let mut source = open();
        let ann = source.insert(owner("Ann")).unwrap();
        source.insert(pet(&ann.id, "Rex")).unwrap();
        let blob = source.export_blob().unwrap();
        assert!(blob.contains("\n  \"owners\""));

        let mut target = open();
        target.import_blob(&blob).unwrap();
        assert_eq!(target.document(), source.document());

        let persisted = Store::<TestDoc>::load(target.storage());
        assert_eq!(&persisted, source.document());
    }

    #[test]
    fn test_export_to_and_import_from_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("export.json");

        let mut source = open();
        source.insert(owner("Ann")).unwrap();
        source.export_to(&path).unwrap();

        let mut target = open();
        target.import_from(&path).unwrap();
        assert_eq!(target.document(), source.document());

        assert!(matches!(
            target.import_from(temp.path().join("missing.json")).unwrap_err(),
            Error::Storage(_)
        ));
    }
}
