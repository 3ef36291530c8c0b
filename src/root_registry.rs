// Copyright (c) 2026-present, arbtrie contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The top-root registry (spec §4.H): a fixed array of named roots, each
//! independently versioned and mutex-guarded so publishing a new root for
//! one slot never blocks readers of another, or of the arena itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::arena::Arena;
use crate::error::{Error, Result};
use crate::id_allocator::ObjectId;

struct Slot {
    root: Mutex<ObjectId>,
    /// Whether `create_root` has handed this slot out. Distinct from the
    /// root being [`ObjectId::NONE`], since an allocated-but-still-empty
    /// tree is also `NONE` until its first insert.
    claimed: AtomicBool,
}

/// `num_top_roots` independently published tree roots.
pub struct RootRegistry {
    slots: Vec<Slot>,
}

impl RootRegistry {
    /// Builds an all-empty, all-unclaimed registry with `count` slots.
    pub(crate) fn new(count: u16) -> Self {
        let slots = (0..count).map(|_| Slot { root: Mutex::new(ObjectId::NONE), claimed: AtomicBool::new(false) }).collect();
        Self { slots }
    }

    /// Claims the first unclaimed slot (spec §6 `create_root`).
    pub fn create_root(&self) -> Result<u16> {
        self.slots
            .iter()
            .position(|slot| slot.claimed.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok())
            .map(|i| i as u16)
            .ok_or(Error::TopRootsExhausted)
    }

    /// Directly installs `id` and `claimed` into `slot`, bypassing
    /// retain/release bookkeeping. Used only while loading the persisted
    /// header on open, before the arena's refcounts have been reconstructed.
    pub(crate) fn restore_slot(&self, slot: u16, claimed: bool, id: ObjectId) {
        *self.slots[slot as usize].root.lock().expect("root registry lock poisoned") = id;
        self.slots[slot as usize].claimed.store(claimed, Ordering::Release);
    }

    /// Every slot's current root, for recovery's reachability walk.
    pub(crate) fn all_roots(&self) -> Vec<ObjectId> {
        self.slots.iter().map(|s| *s.root.lock().expect("root registry lock poisoned")).collect()
    }

    /// Every slot's `(claimed, root)` pair, for persisting the header file.
    pub(crate) fn snapshot(&self) -> Vec<(bool, ObjectId)> {
        self.slots
            .iter()
            .map(|s| (s.claimed.load(Ordering::Acquire), *s.root.lock().expect("root registry lock poisoned")))
            .collect()
    }

    /// Number of slots in this registry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Loads `slot`'s current root, retaining it so the caller holds its own
    /// reference independent of concurrent `set_root` calls (spec §4.H
    /// `get_root`).
    pub fn get_root(&self, arena: &Arena, slot: u16) -> Result<ObjectId> {
        let guard = self.slots[slot as usize].root.lock().expect("root registry lock poisoned");
        let id = *guard;
        arena.retain(id)?;
        Ok(id)
    }

    /// Publishes `new_root` into `slot`, releasing whatever root it replaces
    /// (spec §4.H `set_root`). The caller's own reference to `new_root` is
    /// transferred into the registry; it is not retained again here.
    pub fn set_root(&self, arena: &Arena, slot: u16, new_root: ObjectId) {
        let mut guard = self.slots[slot as usize].root.lock().expect("root registry lock poisoned");
        let previous = *guard;
        *guard = new_root;
        drop(guard);
        arena.release(previous);
    }
}
