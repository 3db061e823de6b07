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

use std::ops::Range;

use utils::*;
use common::PointerQueue;
use heap::HeapSection;

pub const PIN_HASH_SIZE: usize = 1024;
const PIN_HASH_MULTIPLIER: usize = 1737350767;

const TRACE_PIN: bool = false;

#[inline(always)]
fn pin_hash(ptr: Address) -> usize {
    ptr.as_usize().wrapping_mul(PIN_HASH_MULTIPLIER) & (PIN_HASH_SIZE - 1)
}

/// Addresses that must not move during the current collection.
///
/// Roots scanning stages addresses in any order. The hash filter only drops
/// repeats of the same address landing in the same slot; `optimize()` is what
/// makes the queue sorted and unique, and every range query requires it.
pub struct PinQueue {
    queue: PointerQueue,
    hash_filter: Vec<Address>,
    optimized: bool,
    last_num_pinned: usize
}

impl PinQueue {
    pub fn new() -> PinQueue {
        PinQueue {
            queue: PointerQueue::new(),
            hash_filter: vec![unsafe { Address::zero() }; PIN_HASH_SIZE],
            optimized: false,
            last_num_pinned: 0
        }
    }

    /// starts a collection cycle
    pub fn init(&mut self) {
        for slot in self.hash_filter.iter_mut() {
            *slot = unsafe { Address::zero() };
        }
        self.optimized = false;
    }

    pub fn stage(&mut self, ptr: Address) {
        let hash = pin_hash(ptr);
        if self.hash_filter[hash] == ptr {
            return;
        }
        self.hash_filter[hash] = ptr;

        trace_if!(TRACE_PIN, "stage pin {}", ptr);
        self.queue.add(ptr);
        self.optimized = false;
    }

    /// sorts the queue and removes duplicates
    pub fn optimize(&mut self) {
        self.queue.sort_uniq();
        self.optimized = true;
    }

    #[inline(always)]
    pub fn is_optimized(&self) -> bool {
        self.optimized
    }

    /// indices of the entries within [start, end), empty if there are none
    pub fn find_range(&self, start: Address, end: Address) -> Range<usize> {
        assert!(self.optimized, "pin queue must be optimized before range queries");
        let first = self.queue.search(start);
        let last = self.queue.search(end);
        first..last
    }

    /// is `addr` itself in the queue
    pub fn contains(&self, addr: Address) -> bool {
        assert!(self.optimized, "pin queue must be optimized before lookups");
        let index = self.queue.search(addr);
        index < self.queue.len() && self.queue.get(index) == addr
    }

    /// records the entries that fall into `section`
    pub fn section_bind(&self, section: &mut HeapSection) {
        let range = self.find_range(section.start, section.end);
        section.pin_queue_first_entry = range.start;
        section.pin_queue_last_entry = range.end;
    }

    /// Rewrites the entries bound to `section` to the starts of the objects they
    /// point into, in place at the front of the section's entries. Entries that
    /// are inside no object are dropped and entries into the same object collapse
    /// to one. Returns the number of pinned objects. The slots given up keep
    /// their old values until `clear_discarded()`.
    pub fn resolve_section<F>(&mut self, section: &mut HeapSection, find_object_start: F) -> usize
    where
        F: Fn(Address) -> Option<Address>
    {
        assert!(self.optimized, "pin queue must be optimized before resolving pins");
        let mut write = section.pin_queue_first_entry;
        let mut last_obj = None;
        for index in section.pin_queue_first_entry..section.pin_queue_last_entry {
            let addr = self.queue.get(index);
            if let Some(obj) = find_object_start(addr) {
                debug_assert!(obj <= addr && section.contains(obj));
                if last_obj != Some(obj) {
                    trace_if!(TRACE_PIN, "pin {} resolves to {}", addr, obj);
                    self.queue.set(write, obj);
                    write += 1;
                    last_obj = Some(obj);
                }
            }
        }
        section.pin_queue_last_entry = write;
        section.pin_queue_num_entries()
    }

    /// is `obj` one of the entries bound to `section`
    pub fn section_contains(&self, section: &HeapSection, obj: Address) -> bool {
        self.queue.as_slice()[section.pin_queue_first_entry..section.pin_queue_last_entry]
            .binary_search(&obj)
            .is_ok()
    }

    /// binds the whole queue to `section`
    pub fn setup_section(&self, section: &mut HeapSection) {
        section.pin_queue_first_entry = 0;
        section.pin_queue_last_entry = self.queue.len();
    }

    /// drops every entry past the ones bound to `section`
    pub fn trim_queue_to_section(&mut self, section: &HeapSection) {
        assert_eq!(section.pin_queue_first_entry, 0);
        self.queue.truncate(section.pin_queue_last_entry);
    }

    /// Zeroes the stale entries between the end of `section`'s entries and
    /// `max_pin_slot`. Those were left behind when the section's pins were
    /// compacted and must not be mistaken for pins once late pins are staged.
    pub fn clear_discarded(&mut self, section: &HeapSection, max_pin_slot: usize) {
        let max_pin_slot = ::std::cmp::min(max_pin_slot, self.queue.len());
        let mut index = section.pin_queue_last_entry;
        while index < max_pin_slot {
            let addr = self.queue.get(index);
            if addr < section.start || addr > section.end {
                break;
            }
            self.queue.set(index, unsafe { Address::zero() });
            index += 1;
        }
    }

    pub fn pinned_count(&self) -> usize {
        self.queue.len()
    }

    pub fn last_num_pinned(&self) -> usize {
        self.last_num_pinned
    }

    pub fn entry(&self, index: usize) -> Address {
        self.queue.get(index)
    }

    pub fn entries(&self) -> &[Address] {
        self.queue.as_slice()
    }

    pub fn dump(&self) {
        debug!("pin queue: {} entries", self.queue.len());
        for (i, addr) in self.queue.as_slice().iter().enumerate() {
            debug!("  pin[{}] = {}", i, addr);
        }
    }

    /// ends a collection cycle
    pub fn finish(&mut self) {
        self.last_num_pinned = self.queue.len();
        self.queue.clear();
        self.optimized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(x: usize) -> Address {
        Address::from_usize(x)
    }

    #[test]
    fn test_filter_drops_repeats() {
        let mut queue = PinQueue::new();
        queue.init();
        queue.stage(addr(0x1000));
        queue.stage(addr(0x1000));
        assert_eq!(queue.pinned_count(), 1);
    }

    #[test]
    fn test_optimize() {
        let mut queue = PinQueue::new();
        queue.init();
        for &x in [0x3000, 0x1000, 0x2000, 0x1000, 0x3000].iter() {
            queue.stage(addr(x));
            // defeat the filter
            queue.stage(addr(x + 0x10_0000));
        }
        queue.optimize();
        assert!(queue.is_optimized());

        let entries: Vec<usize> = queue.entries().iter().map(|a| a.as_usize()).collect();
        assert_eq!(
            entries,
            vec![0x1000, 0x2000, 0x3000, 0x10_1000, 0x10_2000, 0x10_3000]
        );
        assert!(queue.contains(addr(0x2000)));
        assert!(!queue.contains(addr(0x2008)));
    }

    #[test]
    fn test_find_range() {
        let mut queue = PinQueue::new();
        queue.init();
        for &x in [0x10, 0x20, 0x30, 0x40].iter() {
            queue.stage(addr(x));
        }
        queue.optimize();

        assert_eq!(queue.find_range(addr(0x20), addr(0x40)), 1..3);
        assert_eq!(queue.find_range(addr(0), addr(0x10)), 0..0);
        assert_eq!(queue.find_range(addr(0x41), addr(0x100)), 4..4);
        assert_eq!(queue.find_range(addr(0), addr(0x100)), 0..4);
    }

    #[test]
    #[should_panic]
    fn test_find_range_unoptimized() {
        let mut queue = PinQueue::new();
        queue.stage(addr(0x10));
        queue.find_range(addr(0), addr(0x100));
    }

    #[test]
    fn test_sections() {
        let mut queue = PinQueue::new();
        queue.init();
        for &x in [0x10, 0x110, 0x120, 0x210].iter() {
            queue.stage(addr(x));
        }
        queue.optimize();

        let mut section = HeapSection::new(addr(0x100), addr(0x200));
        queue.section_bind(&mut section);
        assert_eq!(
            (section.pin_queue_first_entry, section.pin_queue_last_entry),
            (1, 3)
        );

        let mut whole = HeapSection::new(addr(0), addr(0x1000));
        queue.setup_section(&mut whole);
        assert_eq!(whole.pin_queue_num_entries(), 4);
        whole.pin_queue_last_entry = 2;
        queue.trim_queue_to_section(&whole);
        assert_eq!(queue.pinned_count(), 2);
    }

    #[test]
    fn test_clear_discarded() {
        let mut queue = PinQueue::new();
        queue.init();
        for &x in [0x110, 0x120, 0x130, 0x140, 0x300].iter() {
            queue.stage(addr(x));
        }
        queue.optimize();

        // pretend the section kept only its first entry after compaction
        let mut section = HeapSection::new(addr(0x100), addr(0x200));
        section.pin_queue_first_entry = 0;
        section.pin_queue_last_entry = 1;
        queue.clear_discarded(&section, 5);

        let entries: Vec<usize> = queue.entries().iter().map(|a| a.as_usize()).collect();
        assert_eq!(entries, vec![0x110, 0, 0, 0, 0x300]);
    }

    #[test]
    fn test_resolve_section() {
        let mut queue = PinQueue::new();
        queue.init();
        // two pointers into the object at 0x140, one at a start, one into free space
        for &x in [0x158, 0x110, 0x140, 0x1f0, 0x300].iter() {
            queue.stage(addr(x));
        }
        queue.optimize();

        let objects = [(0x110, 0x20), (0x140, 0x40)];
        let find_start = |a: Address| {
            objects
                .iter()
                .find(|&&(start, size)| a.as_usize() >= start && a.as_usize() < start + size)
                .map(|&(start, _)| addr(start))
        };

        let mut section = HeapSection::new(addr(0x100), addr(0x200));
        queue.section_bind(&mut section);
        assert_eq!(section.pin_queue_num_entries(), 4);
        let slots = queue.pinned_count();

        assert_eq!(queue.resolve_section(&mut section, find_start), 2);
        assert_eq!(&queue.entries()[..2], &[addr(0x110), addr(0x140)]);
        assert!(queue.section_contains(&section, addr(0x140)));
        assert!(!queue.section_contains(&section, addr(0x158)));
        assert!(!queue.section_contains(&section, addr(0x300)));

        queue.clear_discarded(&section, slots);
        let entries: Vec<usize> = queue.entries().iter().map(|a| a.as_usize()).collect();
        assert_eq!(entries, vec![0x110, 0x140, 0, 0, 0x300]);
    }

    #[test]
    fn test_finish() {
        let mut queue = PinQueue::new();
        queue.init();
        queue.stage(addr(0x10));
        queue.stage(addr(0x20));
        queue.optimize();
        queue.dump();
        queue.finish();

        assert_eq!(queue.pinned_count(), 0);
        assert_eq!(queue.last_num_pinned(), 2);
        assert!(!queue.is_optimized());
    }
}
