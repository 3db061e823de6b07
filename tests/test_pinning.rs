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

extern crate crossbeam;
extern crate nursery_gc;
extern crate utils;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use self::nursery_gc::heap::HeapSection;
use self::nursery_gc::heap::pinning::*;
use self::utils::*;

fn start_logging() {
    nursery_gc::start_logging_trace();
}

/// deterministic pseudo random addresses, word aligned
fn addresses(seed: usize, n: usize, range: usize) -> Vec<Address> {
    let mut x = seed;
    (0..n)
        .map(|_| {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            Address::from_usize(0x10_0000 + ((x >> 33) % range) * 8)
        })
        .collect()
}

#[test]
fn test_optimize_sorted_unique() {
    start_logging();
    for seed in 1..20 {
        let staged = addresses(seed, 2000, 500);

        let mut queue = PinQueue::new();
        queue.init();
        for addr in staged.iter() {
            queue.stage(*addr);
        }
        queue.optimize();

        let entries = queue.entries();
        assert!(entries.windows(2).all(|w| w[0] < w[1]));

        let expected: BTreeSet<Address> = staged.iter().cloned().collect();
        let actual: BTreeSet<Address> = entries.iter().cloned().collect();
        assert_eq!(actual, expected);
        assert_eq!(entries.len(), expected.len());
    }
}

#[test]
fn test_find_range_matches_filter() {
    let staged = addresses(42, 300, 1000);
    let mut queue = PinQueue::new();
    queue.init();
    for addr in staged.iter() {
        queue.stage(*addr);
    }
    queue.optimize();

    for (i, &start) in addresses(7, 50, 1000).iter().enumerate() {
        let end = start + (i * 0x40);
        let range = queue.find_range(start, end);
        let inside: Vec<Address> = queue
            .entries()
            .iter()
            .cloned()
            .filter(|a| *a >= start && *a < end)
            .collect();

        assert_eq!(&queue.entries()[range.clone()], &inside[..]);
        assert_eq!(range.start < range.end, !inside.is_empty());
    }
}

#[test]
fn test_late_pins_after_discard() {
    let mut queue = PinQueue::new();
    queue.init();
    let base = Address::from_usize(0x10_0000);
    for i in 0..6 {
        queue.stage(base + i * 0x100);
    }
    queue.stage(base + 0x10_0000);
    queue.optimize();

    let mut section = HeapSection::new(base, base + 0x1000);
    queue.section_bind(&mut section);
    assert_eq!(section.pin_queue_num_entries(), 6);
    let max_slot = queue.pinned_count();

    // only the first two turned out to be objects
    section.pin_queue_last_entry = 2;
    queue.clear_discarded(&section, max_slot);
    assert_eq!(queue.entry(2), unsafe { Address::zero() });
    assert_eq!(queue.entry(5), unsafe { Address::zero() });
    assert_eq!(queue.entry(6), base + 0x10_0000);

    // a late pin and a re-optimize
    queue.stage(base + 0x800);
    queue.optimize();
    queue.section_bind(&mut section);
    assert_eq!(
        &queue.entries()[section.pin_queue_first_entry..section.pin_queue_last_entry],
        &[base, base + 0x100, base + 0x800]
    );
}

struct CountingListener {
    cemented: Arc<AtomicUsize>,
    staged: Arc<AtomicUsize>
}

impl CementListener for CountingListener {
    fn object_cemented(&self, _obj: Address, count: u32) {
        assert_eq!(count, CEMENT_THRESHOLD);
        self.cemented.fetch_add(1, Ordering::SeqCst);
    }

    fn cemented_object_staged(&self, _obj: Address) {
        self.staged.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_cement_parallel_registration() {
    let cemented = Arc::new(AtomicUsize::new(0));
    let staged = Arc::new(AtomicUsize::new(0));
    let table = CementTable::with_listener(
        true,
        Box::new(CountingListener {
            cemented: cemented.clone(),
            staged: staged.clone()
        })
    );
    let obj = Address::from_usize(0x20_0000);
    let per_thread = CEMENT_THRESHOLD as usize / 4;

    let already = AtomicUsize::new(0);
    crossbeam::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|_| {
                for _ in 0..per_thread {
                    if table.lookup_or_register(obj) {
                        already.fetch_add(1, Ordering::SeqCst);
                    }
                }
            });
        }
    }).unwrap();

    // exactly T registrations: cemented once, never reported as already cemented
    assert_eq!(cemented.load(Ordering::SeqCst), 1);
    assert_eq!(already.load(Ordering::SeqCst), 0);
    assert!(table.lookup(obj));

    let mut queue = PinQueue::new();
    queue.init();
    table.pin_cemented_objects(&mut queue);
    assert_eq!(queue.entries(), &[obj]);
    assert_eq!(staged.load(Ordering::SeqCst), 1);
}

#[test]
fn test_cement_survives_cycles_until_reset() {
    let table = CementTable::new(true);
    let hot = Address::from_usize(0x20_0000);
    let cold = Address::from_usize(0x30_0008);

    for _ in 0..CEMENT_THRESHOLD {
        table.lookup_or_register(hot);
    }
    table.lookup_or_register(cold);

    for _ in 0..3 {
        table.clear_below_threshold();
        let mut queue = PinQueue::new();
        queue.init();
        table.pin_cemented_objects(&mut queue);
        queue.optimize();
        assert_eq!(queue.entries(), &[hot]);
    }

    table.reset();
    assert_eq!(table.cemented_count(), 0);
}
