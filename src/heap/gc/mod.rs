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


use std::cmp;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;

use crossbeam;

use utils::*;
use common::AddressBitmap;
use heap::*;
use heap::nursery::*;
use heap::pinning::*;

/// what happened to an object handed to `evacuate()`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Evacuation {
    /// in the pin queue, stays in place
    Pinned,
    /// already copied this cycle
    InToSpace,
    /// copied to the given address
    Copied(Address),
    /// nowhere to copy to, pinned in place for this cycle
    LatePinned
}

/// a nursery object to evacuate: start, size and whether it has references
pub type EvacuationRequest = (Address, ByteSize, bool);

/// One minor collection, from the point the roots have been staged to the
/// rebuilt nursery.
///
/// Holds the pin queue, the nursery and the to-space bitmap for its lifetime.
/// The caller scans roots and objects, calls `evacuate()` (or `par_evacuate()`
/// from several workers) for every nursery object it reaches, installs
/// forwarding for copied objects and ends the cycle with `finish()`. Dropping
/// it without `finish()` panics.
pub struct MinorCollection<'a> {
    pin_queue: MutexGuard<'a, PinQueue>,
    nursery: MutexGuard<'a, SplitNursery>,
    to_space: MutexGuard<'a, AddressBitmap>,
    cement: &'a CementTable,
    gc_count: &'a AtomicUsize,
    collecting: &'a AtomicBool,
    n_gcthreads: usize,

    section: HeapSection,
    pin_slots: usize,
    late_pins: Mutex<Vec<Address>>,
    copied: AtomicUsize,
    finished: bool
}

impl<'a> MinorCollection<'a> {
    /// Pins the cemented objects, binds the staged pins to the nursery and
    /// resolves each of them to the object it points into, then turns the
    /// collector pool into to-space. `find_object_start` maps an address to the
    /// start of the nursery object containing it, None if it is in no object.
    pub fn start<F>(
        mut pin_queue: MutexGuard<'a, PinQueue>,
        mut nursery: MutexGuard<'a, SplitNursery>,
        mut to_space: MutexGuard<'a, AddressBitmap>,
        cement: &'a CementTable,
        gc_count: &'a AtomicUsize,
        collecting: &'a AtomicBool,
        n_gcthreads: usize,
        find_object_start: F
    ) -> MinorCollection<'a>
    where
        F: Fn(Address) -> Option<Address>
    {
        let was_collecting = collecting.swap(true, Ordering::SeqCst);
        debug_assert!(!was_collecting);

        let cycle = gc_count.load(Ordering::SeqCst);
        trace!("minor collection {}: start", cycle);

        cement.pin_cemented_objects(&mut pin_queue);
        pin_queue.optimize();

        let mut section = HeapSection::new(nursery.start(), nursery.end());
        pin_queue.section_bind(&mut section);
        let pin_slots = pin_queue.pinned_count();
        let staged = section.pin_queue_num_entries();
        let pinned = pin_queue.resolve_section(&mut section, find_object_start);
        debug!(
            "minor collection {}: {} pins in nursery, {} pinned objects",
            cycle,
            staged,
            pinned
        );

        nursery.prepare_to_space(&mut to_space);

        MinorCollection {
            pin_queue: pin_queue,
            nursery: nursery,
            to_space: to_space,
            cement: cement,
            gc_count: gc_count,
            collecting: collecting,
            n_gcthreads: cmp::max(1, n_gcthreads),
            section: section,
            pin_slots: pin_slots,
            late_pins: Mutex::new(vec![]),
            copied: AtomicUsize::new(0),
            finished: false
        }
    }

    pub fn section(&self) -> &HeapSection {
        &self.section
    }

    pub fn nursery(&self) -> &SplitNursery {
        &self.nursery
    }

    pub fn pin_queue(&self) -> &PinQueue {
        &self.pin_queue
    }

    /// is the object starting at `obj` pinned this cycle
    pub fn is_pinned(&self, obj: Address) -> bool {
        self.pin_queue.section_contains(&self.section, obj)
    }

    pub fn is_to_space(&self, addr: Address) -> bool {
        self.nursery.is_to_space(&self.to_space, addr)
    }

    /// Decides where the nursery object `obj` of `size` bytes survives, copying it
    /// if it has to move.
    pub fn evacuate(
        &mut self,
        obj: Address,
        size: ByteSize,
        has_refs: bool,
        major: &dyn MajorHeap
    ) -> Evacuation {
        if let Some(done) = self.evacuate_in_place(obj) {
            return done;
        }
        let size = math::align_up(size, POINTER_SIZE);
        let dest = self.nursery.alloc_for_promotion(obj, size, has_refs, major);
        self.copy_or_late_pin(obj, size, dest)
    }

    /// `evacuate()` for parallel workers
    pub fn par_evacuate(
        &self,
        obj: Address,
        size: ByteSize,
        has_refs: bool,
        major: &dyn MajorHeap
    ) -> Evacuation {
        if let Some(done) = self.evacuate_in_place(obj) {
            return done;
        }
        let size = math::align_up(size, POINTER_SIZE);
        let dest = self.nursery.par_alloc_for_promotion(obj, size, has_refs, major);
        self.copy_or_late_pin(obj, size, dest)
    }

    /// Evacuates `objects` with the configured number of gc threads. The results
    /// are in the order of `objects`.
    pub fn evacuate_all(
        &self,
        objects: &[EvacuationRequest],
        major: &dyn MajorHeap
    ) -> Vec<Evacuation> {
        if self.n_gcthreads == 1 || objects.len() < 2 {
            return objects
                .iter()
                .map(|&(obj, size, has_refs)| self.par_evacuate(obj, size, has_refs, major))
                .collect();
        }

        let chunk_size = (objects.len() + self.n_gcthreads - 1) / self.n_gcthreads;
        let results = crossbeam::scope(|scope| {
            let workers: Vec<_> = objects
                .chunks(chunk_size)
                .map(|chunk| {
                    scope.spawn(move |_| {
                        chunk
                            .iter()
                            .map(|&(obj, size, has_refs)| {
                                self.par_evacuate(obj, size, has_refs, major)
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            workers
                .into_iter()
                .flat_map(|worker| match worker.join() {
                    Ok(done) => done,
                    Err(_) => panic!("evacuation worker panicked")
                })
                .collect::<Vec<_>>()
        });

        match results {
            Ok(results) => results,
            Err(_) => panic!("evacuation worker panicked")
        }
    }

    fn evacuate_in_place(&self, obj: Address) -> Option<Evacuation> {
        assert!(
            self.nursery.ptr_in_nursery(obj),
            "evacuating {} which is not in the nursery",
            obj
        );
        if self.is_pinned(obj) {
            self.cement.lookup_or_register(obj);
            Some(Evacuation::Pinned)
        } else if self.is_to_space(obj) {
            Some(Evacuation::InToSpace)
        } else {
            None
        }
    }

    fn copy_or_late_pin(&self, obj: Address, size: ByteSize, dest: Option<Address>) -> Evacuation {
        match dest {
            Some(dest) => {
                unsafe {
                    mem::memcpy(dest, obj, size);
                }
                self.copied.fetch_add(1, Ordering::Relaxed);
                Evacuation::Copied(dest)
            }
            None => {
                warn!("late pinning {} ({} bytes)", obj, size);
                self.late_pins.lock().unwrap().push(obj);
                Evacuation::LatePinned
            }
        }
    }

    pub fn copied_count(&self) -> usize {
        self.copied.load(Ordering::Relaxed)
    }

    /// Ends the cycle. `object_size` gives the size of a pinned object, the nursery
    /// keeps those ranges out of its free lists.
    pub fn finish<F>(mut self, object_size: F)
    where
        F: Fn(Address) -> ByteSize
    {
        let late_pins = ::std::mem::replace(self.late_pins.get_mut().unwrap(), vec![]);
        if !late_pins.is_empty() {
            self.pin_queue.clear_discarded(&self.section, self.pin_slots);
            for obj in late_pins.iter() {
                self.pin_queue.stage(*obj);
            }
            self.pin_queue.optimize();
            self.pin_queue.section_bind(&mut self.section);
        }

        let pinned: Vec<(Address, ByteSize)> = self.pin_queue.entries()
            [self.section.pin_queue_first_entry..self.section.pin_queue_last_entry]
            .iter()
            .map(|&obj| (obj, object_size(obj)))
            .collect();
        self.nursery.rebuild_fragments(&pinned);
        self.cement.clear_below_threshold();

        let cycle = self.gc_count.fetch_add(1, Ordering::SeqCst);
        info!(
            "minor collection {}: {} copied, {} pinned ({} late)",
            cycle,
            self.copied_count(),
            pinned.len(),
            late_pins.len()
        );
        self.pin_queue.dump();
        self.pin_queue.finish();
        self.pin_queue.init();
        self.finished = true;
    }
}

impl<'a> Drop for MinorCollection<'a> {
    fn drop(&mut self) {
        self.collecting.store(false, Ordering::SeqCst);
        if !self.finished && !thread::panicking() {
            panic!(
                "minor collection dropped without finish(), nursery left in {:?}",
                self.nursery.state()
            );
        }
    }
}
