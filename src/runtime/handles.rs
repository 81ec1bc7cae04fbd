//! Handle table: strong roots and dependent (conditional) handles.

use std::num::NonZeroUsize;

use parking_lot::Mutex;

use crate::runtime::heap::ObjectRef;

/// A strong handle keeping a managed object reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectHandle(NonZeroUsize);

/// A dependent handle: its target stays reachable while its source is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DependentHandle(NonZeroUsize);

fn slot_index(raw: NonZeroUsize) -> usize {
    raw.get() - 1
}

fn slot_handle(index: usize) -> NonZeroUsize {
    match NonZeroUsize::new(index + 1) {
        Some(raw) => raw,
        None => unreachable!("handle table overflow"),
    }
}

struct StrongEntry {
    target: ObjectRef,
    /// Whether the handle acts as a collection root. The tracker runtime
    /// clears this for wrappers whose only native references come from
    /// tracked objects.
    roots: bool,
}

#[derive(Default, Clone, Copy)]
struct DependentEntry {
    source: Option<ObjectRef>,
    target: Option<ObjectRef>,
}

/// Table of strong and dependent handles over the managed heap.
///
/// Freed strong slots are reused, so a destroyed handle value may later refer
/// to a different object; holders must not use handles after destroying them.
pub struct HandleTable {
    strong: Mutex<Vec<Option<StrongEntry>>>,
    dependent: Mutex<Vec<Option<DependentEntry>>>,
}

impl HandleTable {
    pub(crate) fn new() -> Self {
        Self {
            strong: Mutex::new(Vec::new()),
            dependent: Mutex::new(Vec::new()),
        }
    }

    /// Allocate a strong, rooting handle to `target`.
    pub fn create_strong(&self, target: ObjectRef) -> ObjectHandle {
        let mut strong = self.strong.lock();
        let entry = StrongEntry { target, roots: true };
        if let Some(index) = strong.iter().position(Option::is_none) {
            strong[index] = Some(entry);
            ObjectHandle(slot_handle(index))
        } else {
            strong.push(Some(entry));
            ObjectHandle(slot_handle(strong.len() - 1))
        }
    }

    /// Free a strong handle.
    pub fn destroy(&self, handle: ObjectHandle) {
        let mut strong = self.strong.lock();
        if let Some(slot) = strong.get_mut(slot_index(handle.0)) {
            *slot = None;
        }
    }

    /// The object behind a strong handle.
    pub fn resolve(&self, handle: ObjectHandle) -> Option<ObjectRef> {
        let strong = self.strong.lock();
        strong
            .get(slot_index(handle.0))
            .and_then(|slot| slot.as_ref())
            .map(|entry| entry.target)
    }

    /// Toggle whether a strong handle roots its target.
    pub fn set_rooting(&self, handle: ObjectHandle, roots: bool) {
        let mut strong = self.strong.lock();
        if let Some(Some(entry)) = strong.get_mut(slot_index(handle.0)) {
            entry.roots = roots;
        }
    }

    pub fn is_rooting(&self, handle: ObjectHandle) -> bool {
        let strong = self.strong.lock();
        strong
            .get(slot_index(handle.0))
            .and_then(|slot| slot.as_ref())
            .is_some_and(|entry| entry.roots)
    }

    /// Every object currently rooted through a strong handle.
    pub(crate) fn rooted_objects(&self) -> Vec<ObjectRef> {
        let strong = self.strong.lock();
        strong
            .iter()
            .flatten()
            .filter(|entry| entry.roots)
            .map(|entry| entry.target)
            .collect()
    }

    /// Allocate an empty dependent handle.
    pub(crate) fn create_dependent(&self) -> DependentHandle {
        let mut dependent = self.dependent.lock();
        dependent.push(Some(DependentEntry::default()));
        DependentHandle(slot_handle(dependent.len() - 1))
    }

    /// Point a dependent handle at a source/target pair; `None` clears it.
    pub(crate) fn set_dependent(
        &self,
        handle: DependentHandle,
        source: Option<ObjectRef>,
        target: Option<ObjectRef>,
    ) {
        let mut dependent = self.dependent.lock();
        if let Some(Some(entry)) = dependent.get_mut(slot_index(handle.0)) {
            entry.source = source;
            entry.target = target;
        }
    }

    /// Free a dependent handle.
    pub(crate) fn destroy_dependent(&self, handle: DependentHandle) {
        let mut dependent = self.dependent.lock();
        if let Some(slot) = dependent.get_mut(slot_index(handle.0)) {
            *slot = None;
        }
    }

    /// Every populated dependent edge.
    pub(crate) fn dependent_edges(&self) -> Vec<(ObjectRef, ObjectRef)> {
        let dependent = self.dependent.lock();
        dependent
            .iter()
            .flatten()
            .filter_map(|entry| Some((entry.source?, entry.target?)))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn dependent_capacity(&self) -> usize {
        self.dependent.lock().iter().flatten().count()
    }
}
