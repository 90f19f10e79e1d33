//! In-memory tree collaborator.
//!
//! The write path only needs a narrow view of the tree: apply a write, mark
//! and roll back to a position, age the current generation, and push
//! everything to durable storage. [`TreeStore`] is that view and
//! [`MemTree`] the default implementation.

use crate::error::CoreResult;
use crate::types::Generation;
use std::collections::BTreeMap;

/// Position in a tree's transaction history, captured by
/// [`TreeStore::mark`]. Only meaningful to the tree that produced it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeMark {
    /// Implementation-defined position.
    pub position: u64,
    /// Tree size at the mark.
    pub size: u64,
}

/// Tree operations used by the write path.
pub trait TreeStore: Send {
    /// Inserts or overwrites a key.
    fn insert(&mut self, key: &[u8], value: &[u8]) -> CoreResult<()>;

    /// Deletes a key.
    fn delete(&mut self, key: &[u8]) -> CoreResult<()>;

    /// Looks up a key across the current, old and durable generations.
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Returns the approximate byte size of the current generation.
    fn size(&self) -> u64;

    /// Returns the current generation number.
    fn generation(&self) -> Generation;

    /// Captures the current position of the open transaction.
    fn mark(&self) -> TreeMark;

    /// Undoes every change made after `mark`.
    fn rollback(&mut self, mark: &TreeMark);

    /// Ends the open transaction. Rolled-back changes must already have been
    /// undone with [`rollback`](Self::rollback).
    fn end_transaction(&mut self, commit: bool);

    /// Returns true if an old generation exists.
    fn has_old(&self) -> bool;

    /// Ages the current generation into the old slot. Does nothing while an
    /// old generation still exists.
    fn make_old(&mut self);

    /// Drops the old generation.
    fn discard_old(&mut self);

    /// Writes the old and current generations to durable storage.
    fn flush_to_disk(&mut self) -> CoreResult<()>;
}

type Entries = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

#[derive(Debug)]
struct UndoEntry {
    key: Vec<u8>,
    previous: Option<Option<Vec<u8>>>,
}

/// Default [`TreeStore`]: sorted maps for the current and old generations
/// and a sorted run standing in for on-disk storage.
///
/// Deletes are kept as tombstones until flushed.
#[derive(Debug, Default)]
pub struct MemTree {
    current: Entries,
    current_size: u64,
    old: Option<Entries>,
    durable: BTreeMap<Vec<u8>, Vec<u8>>,
    undo: Vec<UndoEntry>,
    generation: Generation,
    flushes: u64,
}

impl MemTree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries in durable storage.
    #[must_use]
    pub fn durable_len(&self) -> usize {
        self.durable.len()
    }

    /// Returns how many times the tree was flushed.
    #[must_use]
    pub fn flush_count(&self) -> u64 {
        self.flushes
    }

    fn apply(&mut self, key: &[u8], value: Option<Vec<u8>>) {
        self.current_size += (key.len() + value.as_ref().map_or(0, Vec::len)) as u64;
        let previous = self.current.insert(key.to_vec(), value);
        self.undo.push(UndoEntry {
            key: key.to_vec(),
            previous,
        });
    }
}

fn lookup(generation: &Entries, key: &[u8]) -> Option<Option<Vec<u8>>> {
    generation.get(key).cloned()
}

impl TreeStore for MemTree {
    fn insert(&mut self, key: &[u8], value: &[u8]) -> CoreResult<()> {
        self.apply(key, Some(value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> CoreResult<()> {
        self.apply(key, None);
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        if let Some(found) = lookup(&self.current, key) {
            return found;
        }
        if let Some(found) = self.old.as_ref().and_then(|old| lookup(old, key)) {
            return found;
        }
        self.durable.get(key).cloned()
    }

    fn size(&self) -> u64 {
        self.current_size
    }

    fn generation(&self) -> Generation {
        self.generation
    }

    fn mark(&self) -> TreeMark {
        TreeMark {
            position: self.undo.len() as u64,
            size: self.current_size,
        }
    }

    fn rollback(&mut self, mark: &TreeMark) {
        let keep = usize::try_from(mark.position).unwrap_or(usize::MAX);
        while self.undo.len() > keep {
            let Some(entry) = self.undo.pop() else { break };
            match entry.previous {
                Some(previous) => {
                    self.current.insert(entry.key, previous);
                }
                None => {
                    self.current.remove(&entry.key);
                }
            }
        }
        self.current_size = mark.size;
    }

    fn end_transaction(&mut self, _commit: bool) {
        self.undo.clear();
    }

    fn has_old(&self) -> bool {
        self.old.is_some()
    }

    fn make_old(&mut self) {
        if self.old.is_some() {
            return;
        }
        self.old = Some(std::mem::take(&mut self.current));
        self.current_size = 0;
        self.undo.clear();
        self.generation = self.generation.next();
    }

    fn discard_old(&mut self) {
        self.old = None;
    }

    fn flush_to_disk(&mut self) -> CoreResult<()> {
        let generations = self.old.iter().chain(std::iter::once(&self.current));
        for generation in generations {
            for (key, value) in generation {
                match value {
                    Some(value) => {
                        self.durable.insert(key.clone(), value.clone());
                    }
                    None => {
                        self.durable.remove(key);
                    }
                }
            }
        }
        self.flushes += 1;
        Ok(())
    }
}
