// Copyright 2017 The Australian National University
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::RwLock;

use utils::*;
use heap::pinning::PinQueue;

pub const CEMENT_HASH_SHIFT: usize = 6;
pub const CEMENT_HASH_SIZE: usize = 1 << CEMENT_HASH_SHIFT;
/// pin count at which an object becomes cemented
pub const CEMENT_THRESHOLD: u32 = 1000;

#[inline(always)]
fn cement_hash(obj: Address) -> usize {
    let hv = obj.as_usize() >> LOG_POINTER_SIZE;
    (hv ^ (hv >> CEMENT_HASH_SHIFT)) & (CEMENT_HASH_SIZE - 1)
}

/// Receives cementing events.
pub trait CementListener: Send + Sync {
    /// `obj` reached the threshold
    fn object_cemented(&self, obj: Address, count: u32);
    /// a cemented object was staged in the pin queue
    fn cemented_object_staged(&self, _obj: Address) {}
    /// the committed table was emptied
    fn cement_reset(&self) {}
}

/// writes cementing events to the log
pub struct LogCementListener;

impl CementListener for LogCementListener {
    fn object_cemented(&self, obj: Address, count: u32) {
        debug!("cement {} (count {})", obj, count);
    }

    fn cemented_object_staged(&self, obj: Address) {
        trace!("cement stage {}", obj);
    }

    fn cement_reset(&self) {
        debug!("cement reset");
    }
}

/// one bucket: zero `obj` means unclaimed
struct CementEntry {
    obj: AtomicUsize,
    count: AtomicU32,
    forced: AtomicBool
}

impl CementEntry {
    fn new() -> CementEntry {
        CementEntry {
            obj: AtomicUsize::new(0),
            count: AtomicU32::new(0),
            forced: AtomicBool::new(false)
        }
    }

    fn clear(&self) {
        self.obj.store(0, Ordering::Relaxed);
        self.count.store(0, Ordering::Relaxed);
        self.forced.store(false, Ordering::Relaxed);
    }

    fn holds(&self, obj: Address) -> bool {
        self.obj.load(Ordering::Acquire) == obj.as_usize()
    }

    fn is_cemented(&self) -> bool {
        self.count.load(Ordering::Acquire) >= CEMENT_THRESHOLD
    }
}

struct CementHash {
    entries: Vec<CementEntry>
}

impl CementHash {
    fn new() -> Box<CementHash> {
        Box::new(CementHash {
            entries: (0..CEMENT_HASH_SIZE).map(|_| CementEntry::new()).collect()
        })
    }

    #[inline(always)]
    fn entry(&self, obj: Address) -> &CementEntry {
        &self.entries[cement_hash(obj)]
    }
}

/// Objects that were pinned many times in a row.
///
/// Once an object is cemented every minor collection pins it up front, so its
/// remembered set entries need not be scanned again. One address per bucket, a
/// colliding address is simply never cemented.
///
/// While a concurrent major collection runs, registrations go to a shadow table.
/// Finishing the concurrent collection replaces the committed table with the
/// shadow table in one step.
pub struct CementTable {
    enabled: bool,
    committed: RwLock<Box<CementHash>>,
    shadow: RwLock<Option<Box<CementHash>>>,
    listener: Box<dyn CementListener>
}

impl CementTable {
    pub fn new(enabled: bool) -> CementTable {
        CementTable::with_listener(enabled, Box::new(LogCementListener))
    }

    pub fn with_listener(enabled: bool, listener: Box<dyn CementListener>) -> CementTable {
        CementTable {
            enabled: enabled,
            committed: RwLock::new(CementHash::new()),
            shadow: RwLock::new(None),
            listener: listener
        }
    }

    #[inline(always)]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_concurrent(&self) -> bool {
        self.shadow.read().unwrap().is_some()
    }

    /// is `obj` cemented in the committed table
    pub fn lookup(&self, obj: Address) -> bool {
        if !self.enabled {
            return false;
        }
        let committed = self.committed.read().unwrap();
        let entry = committed.entry(obj);
        entry.holds(obj) && entry.is_cemented()
    }

    /// Counts one more pin of `obj`. Returns true if `obj` was already cemented
    /// before this call.
    pub fn lookup_or_register(&self, obj: Address) -> bool {
        if !self.enabled {
            return false;
        }

        let shadow = self.shadow.read().unwrap();
        match *shadow {
            Some(ref hash) => self.register(hash, obj),
            None => {
                let committed = self.committed.read().unwrap();
                self.register(&committed, obj)
            }
        }
    }

    fn register(&self, hash: &CementHash, obj: Address) -> bool {
        debug_assert!(!obj.is_zero());
        let entry = hash.entry(obj);

        let current = entry.obj.load(Ordering::Acquire);
        if current == 0 {
            match entry.obj.compare_exchange(
                0,
                obj.as_usize(),
                Ordering::AcqRel,
                Ordering::Acquire
            ) {
                Ok(_) => {}
                Err(other) => {
                    if other != obj.as_usize() {
                        return false;
                    }
                }
            }
        } else if current != obj.as_usize() {
            return false;
        }

        let mut count = entry.count.load(Ordering::Acquire);
        loop {
            if count >= CEMENT_THRESHOLD {
                return true;
            }
            match entry.count.compare_exchange_weak(
                count,
                count + 1,
                Ordering::AcqRel,
                Ordering::Acquire
            ) {
                Ok(_) => {
                    if count + 1 == CEMENT_THRESHOLD {
                        self.listener.object_cemented(obj, count + 1);
                    }
                    return false;
                }
                Err(actual) => count = actual
            }
        }
    }

    /// Starts recording into a shadow table. Every object cemented at this point
    /// is forced: it stays pinned until the concurrent collection finishes.
    pub fn concurrent_start(&self) {
        {
            let mut shadow = self.shadow.write().unwrap();
            assert!(shadow.is_none(), "concurrent cementing cannot be started twice");
            *shadow = Some(CementHash::new());
        }
        self.force_pinned();
    }

    /// Stages the forced objects in `pin_queue`, then commits the shadow table.
    pub fn concurrent_finish(&self, pin_queue: &mut PinQueue) {
        let mut shadow = self.shadow.write().unwrap();
        let hash = match shadow.take() {
            Some(hash) => hash,
            None => panic!("concurrent cementing must be active to finish it")
        };
        let mut committed = self.committed.write().unwrap();
        for entry in committed.entries.iter() {
            if entry.forced.swap(false, Ordering::AcqRel) {
                let obj = Address::from_usize(entry.obj.load(Ordering::Acquire));
                pin_queue.stage(obj);
                self.listener.cemented_object_staged(obj);
            }
        }
        *committed = hash;
    }

    /// Stages every cemented object so this cycle pins it. With a concurrent
    /// collection running, every object registered in the shadow table is
    /// staged as well.
    pub fn pin_cemented_objects(&self, pin_queue: &mut PinQueue) {
        if !self.enabled {
            return;
        }

        {
            let committed = self.committed.read().unwrap();
            for entry in committed.entries.iter() {
                let obj = entry.obj.load(Ordering::Acquire);
                if obj != 0 && entry.is_cemented() {
                    let obj = Address::from_usize(obj);
                    pin_queue.stage(obj);
                    self.listener.cemented_object_staged(obj);
                }
            }
        }

        let shadow = self.shadow.read().unwrap();
        if let Some(ref hash) = *shadow {
            for entry in hash.entries.iter() {
                let obj = entry.obj.load(Ordering::Acquire);
                if obj != 0 {
                    let obj = Address::from_usize(obj);
                    pin_queue.stage(obj);
                    self.listener.cemented_object_staged(obj);
                }
            }
        }
    }

    /// drops the committed entries that have not reached the threshold
    pub fn clear_below_threshold(&self) {
        let committed = self.committed.read().unwrap();
        for entry in committed.entries.iter() {
            if !entry.is_cemented() {
                entry.clear();
            }
        }
    }

    /// empties the committed table
    pub fn reset(&self) {
        {
            let committed = self.committed.read().unwrap();
            for entry in committed.entries.iter() {
                entry.clear();
            }
        }
        self.listener.cement_reset();
    }

    fn force_pinned(&self) {
        let committed = self.committed.read().unwrap();
        for entry in committed.entries.iter() {
            if entry.obj.load(Ordering::Acquire) != 0 && entry.is_cemented() {
                entry.forced.store(true, Ordering::Release);
            }
        }
    }

    pub fn is_forced(&self, obj: Address) -> bool {
        let committed = self.committed.read().unwrap();
        let entry = committed.entry(obj);
        entry.holds(obj) && entry.forced.load(Ordering::Acquire)
    }

    /// number of cemented objects in the committed table
    pub fn cemented_count(&self) -> usize {
        let committed = self.committed.read().unwrap();
        committed
            .entries
            .iter()
            .filter(|e| e.obj.load(Ordering::Acquire) != 0 && e.is_cemented())
            .count()
    }
}
