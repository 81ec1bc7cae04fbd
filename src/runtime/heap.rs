//! Managed object table and the stop-the-world collection driver.

use std::collections::HashSet;
use std::num::NonZeroU32;

use parking_lot::Mutex;

use crate::bridge::ComWrappers;
use crate::runtime::sync_table::SyncBlockIndex;
use crate::runtime::HostRuntime;

/// Reference to a managed object in the host heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef(NonZeroU32);

impl ObjectRef {
    fn index(self) -> usize {
        self.0.get() as usize - 1
    }

    fn from_index(index: usize) -> Self {
        match NonZeroU32::new(index as u32 + 1) {
            Some(raw) => ObjectRef(raw),
            None => unreachable!("object table overflow"),
        }
    }
}

struct ObjectData {
    references: Vec<ObjectRef>,
    sync_block: Option<SyncBlockIndex>,
}

/// Table of managed objects with their outgoing references.
///
/// Slots of reclaimed objects are never reused, so a stale [`ObjectRef`]
/// resolves to "dead" rather than to a different object.
pub struct ObjectHeap {
    objects: Mutex<Vec<Option<ObjectData>>>,
}

impl ObjectHeap {
    pub(crate) fn new() -> Self {
        Self {
            objects: Mutex::new(Vec::new()),
        }
    }

    /// Allocate a managed object with no references.
    pub fn alloc(&self) -> ObjectRef {
        let mut objects = self.objects.lock();
        objects.push(Some(ObjectData {
            references: Vec::new(),
            sync_block: None,
        }));
        ObjectRef::from_index(objects.len() - 1)
    }

    /// Record a reference from `from` to `to`.
    pub fn add_reference(&self, from: ObjectRef, to: ObjectRef) {
        let mut objects = self.objects.lock();
        if let Some(Some(data)) = objects.get_mut(from.index()) {
            data.references.push(to);
        }
    }

    /// Drop every outgoing reference of `from`.
    pub fn clear_references(&self, from: ObjectRef) {
        let mut objects = self.objects.lock();
        if let Some(Some(data)) = objects.get_mut(from.index()) {
            data.references.clear();
        }
    }

    pub fn is_alive(&self, obj: ObjectRef) -> bool {
        let objects = self.objects.lock();
        matches!(objects.get(obj.index()), Some(Some(_)))
    }

    pub(crate) fn references_of(&self, obj: ObjectRef) -> Vec<ObjectRef> {
        let objects = self.objects.lock();
        match objects.get(obj.index()) {
            Some(Some(data)) => data.references.clone(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn sync_block_of(&self, obj: ObjectRef) -> Option<SyncBlockIndex> {
        let objects = self.objects.lock();
        objects
            .get(obj.index())
            .and_then(|slot| slot.as_ref())
            .and_then(|data| data.sync_block)
    }

    /// Assign a sync block to `obj` unless one is already assigned; the loser
    /// gets the winning index back.
    pub(crate) fn try_set_sync_block(
        &self,
        obj: ObjectRef,
        index: SyncBlockIndex,
    ) -> Result<(), SyncBlockIndex> {
        let mut objects = self.objects.lock();
        match objects.get_mut(obj.index()) {
            Some(Some(data)) => match data.sync_block {
                Some(existing) => Err(existing),
                None => {
                    data.sync_block = Some(index);
                    Ok(())
                }
            },
            _ => unreachable!("sync block assignment on a dead object"),
        }
    }

    pub(crate) fn live_objects(&self) -> Vec<ObjectRef> {
        let objects = self.objects.lock();
        objects
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(index, _)| ObjectRef::from_index(index))
            .collect()
    }

    pub(crate) fn free(&self, obj: ObjectRef) {
        let mut objects = self.objects.lock();
        if let Some(slot) = objects.get_mut(obj.index()) {
            *slot = None;
        }
    }
}

impl HostRuntime {
    /// Run a stop-the-world collection of the host heap.
    ///
    /// Generation 2 and above also runs the external reference-tracking
    /// window through the ComWrappers hooks, so cross-heap cycles reported by
    /// the tracker runtime are expressed as dependent links before marking.
    pub fn collect(&self, com: &ComWrappers, condemned_generation: i32) {
        self.begin_suspension();
        com.on_gc_started(condemned_generation);

        let marked = self.mark();
        self.sweep(com, &marked);

        com.on_gc_finished(condemned_generation);
        self.end_suspension();
    }

    fn trace_from(&self, start: ObjectRef, marked: &mut HashSet<ObjectRef>) {
        let mut stack = vec![start];
        while let Some(obj) = stack.pop() {
            if !self.heap.is_alive(obj) || !marked.insert(obj) {
                continue;
            }
            stack.extend(self.heap.references_of(obj));
        }
    }

    fn mark(&self) -> HashSet<ObjectRef> {
        let mut marked = HashSet::new();
        for root in self.handles.rooted_objects() {
            self.trace_from(root, &mut marked);
        }

        // Dependent links chain through each other, so iterate to a fixed
        // point: each pass may make new sources reachable.
        loop {
            let mut changed = false;
            for (source, target) in self.handles.dependent_edges() {
                if marked.contains(&source) && !marked.contains(&target) && self.heap.is_alive(target)
                {
                    self.trace_from(target, &mut marked);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        marked
    }

    fn sweep(&self, com: &ComWrappers, marked: &HashSet<ObjectRef>) {
        for obj in self.heap.live_objects() {
            if marked.contains(&obj) {
                continue;
            }
            if let Some(index) = self.heap.sync_block_of(obj) {
                if let Some(info) = self.sync_table.interop_info(index) {
                    if let Some(context) = info.external_object_context() {
                        if context.is_active() {
                            com.mark_external_com_object_context_collected(context);
                        }
                    }
                    if let Some(wrapper) = info.managed_object_wrapper() {
                        com.destroy_managed_object_wrapper(wrapper);
                    }
                }
                self.sync_table.free(index);
            }
            self.heap.free(obj);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_refs_stay_dead() {
        let heap = ObjectHeap::new();
        let a = heap.alloc();
        let b = heap.alloc();
        heap.add_reference(a, b);

        assert!(heap.is_alive(a));
        assert_eq!(heap.references_of(a), vec![b]);

        heap.free(b);
        assert!(!heap.is_alive(b));
        // The slot is not reused, so the stale reference resolves to nothing.
        let c = heap.alloc();
        assert_ne!(b, c);
    }
}
