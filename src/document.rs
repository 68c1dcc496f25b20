// Document schema: the whole persisted unit for one app

use crate::error::ValidationError;
use crate::record::Record;
use serde::{Serialize, de::DeserializeOwned};

/// The complete dataset of one app, persisted under a single storage key.
///
/// Implementors are plain structs with one `Vec<T>` field per collection.
/// Collection fields should carry `#[serde(default)]` so that a snapshot
/// missing a collection loads with that collection empty.
pub trait Document: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Fixed key this document is persisted under
    fn storage_key() -> &'static str;

    /// Every collection key the app expects. Imports missing any of these
    /// are rejected.
    fn collections() -> &'static [&'static str];

    /// Document used on first run, after reset, and when the persisted
    /// snapshot is unusable
    fn seed() -> Self;

    /// Check the anchor record(s) the app cannot work without
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }

    /// Delete policies between collections
    fn relations() -> Vec<Relation<Self>> {
        Vec::new()
    }
}

/// Typed access to one collection of a document
pub trait Holds<T: Record>: Document {
    fn records(&self) -> &Vec<T>;
    fn records_mut(&mut self) -> &mut Vec<T>;
}

/// Implements [`Holds`] for each `Type => field` pair of a document.
#[macro_export]
macro_rules! impl_holds {
    ($doc:ty { $($rec:ty => $field:ident),+ $(,)? }) => {
        $(
            impl $crate::document::Holds<$rec> for $doc {
                fn records(&self) -> &Vec<$rec> {
                    &self.$field
                }

                fn records_mut(&mut self) -> &mut Vec<$rec> {
                    &mut self.$field
                }
            }
        )+
    };
}

/// What happens to child records when their parent is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDelete {
    /// Delete the children along with the parent
    Cascade,
    /// Refuse to delete the parent while children reference it
    Restrict,
    /// Leave the children; their reference dangles and resolves to a placeholder
    Keep,
}

type CountFn<D> = Box<dyn Fn(&D, &str) -> usize + Send + Sync>;
type PurgeFn<D> = Box<dyn Fn(&mut D, &str) -> usize + Send + Sync>;

/// A foreign-key relationship from a child collection to a parent collection
pub struct Relation<D> {
    pub parent: &'static str,
    pub child: &'static str,
    pub on_delete: OnDelete,
    count: CountFn<D>,
    purge: PurgeFn<D>,
}

impl<D: Document> Relation<D> {
    /// Declare that records of `C` reference records of `P` through `foreign_key`
    pub fn new<P, C>(on_delete: OnDelete, foreign_key: fn(&C) -> &str) -> Self
    where
        P: Record,
        C: Record,
        D: Holds<C>,
    {
        Relation {
            parent: P::collection_name(),
            child: C::collection_name(),
            on_delete,
            count: Box::new(move |doc: &D, id: &str| {
                <D as Holds<C>>::records(doc)
                    .iter()
                    .filter(|c| foreign_key(*c) == id)
                    .count()
            }),
            purge: Box::new(move |doc: &mut D, id: &str| {
                let children = <D as Holds<C>>::records_mut(doc);
                let before = children.len();
                children.retain(|c| foreign_key(c) != id);
                before - children.len()
            }),
        }
    }

    /// Number of child records referencing `parent_id`
    pub fn references(&self, doc: &D, parent_id: &str) -> usize {
        (self.count)(doc, parent_id)
    }

    /// Remove child records referencing `parent_id`, returning how many went
    pub fn purge(&self, doc: &mut D, parent_id: &str) -> usize {
        (self.purge)(doc, parent_id)
    }
}

impl<D> std::fmt::Debug for Relation<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relation")
            .field("parent", &self.parent)
            .field("child", &self.child)
            .field("on_delete", &self.on_delete)
            .finish()
    }
}
