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

use std::fmt;
use std::mem as std_mem;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam::utils::Backoff;

use utils::*;
use heap::clear_range;
use heap::nursery::MAX_NURSERY_WASTE;

const TRACE_ALLOC: bool = false;

/// A free range of the nursery with a bump pointer: [start, next) is handed
/// out, [next, end) is free.
pub struct Fragment {
    start: Address,
    next: AtomicUsize,
    end: Address,
    retired: AtomicBool
}

impl Fragment {
    pub fn new(start: Address, end: Address) -> Fragment {
        Fragment::with_next(start, start, end)
    }

    pub fn with_next(start: Address, next: Address, end: Address) -> Fragment {
        debug_assert!(start <= next && next <= end);
        Fragment {
            start: start,
            next: AtomicUsize::new(next.as_usize()),
            end: end,
            retired: AtomicBool::new(false)
        }
    }

    #[inline(always)]
    pub fn start(&self) -> Address {
        self.start
    }

    #[inline(always)]
    pub fn next(&self) -> Address {
        Address::from_usize(self.next.load(Ordering::Acquire))
    }

    #[inline(always)]
    pub fn end(&self) -> Address {
        self.end
    }

    pub fn remaining(&self) -> ByteSize {
        self.end - self.next()
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Claims the tail [from, end) if nobody bumped past `from`, zeroes it and
    /// stops allocation from this fragment.
    fn retire(&self, from: Address) {
        if self
            .next
            .compare_exchange(
                from.as_usize(),
                self.end.as_usize(),
                Ordering::AcqRel,
                Ordering::Acquire
            )
            .is_ok()
        {
            clear_range(from, self.end);
            self.retired.store(true, Ordering::Release);
            trace_if!(TRACE_ALLOC, "retire fragment {}-{}", self.start, self.end);
        }
    }
}

impl fmt::Debug for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Fragment({}, next={}, {}{})",
            self.start,
            self.next(),
            self.end,
            if self.is_retired() { ", retired" } else { "" }
        )
    }
}

/// Fragments in address order, allocated first fit from `alloc_head`.
pub struct FragmentAllocator {
    fragments: Vec<Fragment>,
    alloc_head: AtomicUsize
}

impl FragmentAllocator {
    pub fn new() -> FragmentAllocator {
        FragmentAllocator {
            fragments: vec![],
            alloc_head: AtomicUsize::new(0)
        }
    }

    pub fn add(&mut self, start: Address, end: Address) {
        self.add_fragment(Fragment::new(start, end));
    }

    pub fn add_fragment(&mut self, frag: Fragment) {
        debug_assert!(
            self.fragments.last().map_or(true, |last| last.end <= frag.start),
            "fragments must be added in address order"
        );
        trace_if!(TRACE_ALLOC, "add {:?}", frag);
        self.fragments.push(frag);
    }

    /// removes all fragments and hands them to the caller
    pub fn take_fragments(&mut self) -> Vec<Fragment> {
        self.alloc_head.store(0, Ordering::Relaxed);
        std_mem::replace(&mut self.fragments, vec![])
    }

    /// forgets all fragments
    pub fn release(&mut self) {
        self.fragments.clear();
        self.alloc_head.store(0, Ordering::Relaxed);
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn total_free(&self) -> ByteSize {
        self.fragments
            .iter()
            .filter(|f| !f.is_retired())
            .map(|f| f.remaining())
            .sum()
    }

    /// Single threaded first fit bump allocation.
    pub fn serial_alloc(&mut self, size: ByteSize) -> Option<Address> {
        debug_assert!(size > 0 && size % POINTER_SIZE == 0);
        let head = *self.alloc_head.get_mut();

        for i in head..self.fragments.len() {
            let frag = &mut self.fragments[i];
            if *frag.retired.get_mut() {
                continue;
            }

            let next = Address::from_usize(*frag.next.get_mut());
            if frag.end - next < size {
                continue;
            }
            let new_next = next + size;
            *frag.next.get_mut() = new_next.as_usize();
            trace_if!(TRACE_ALLOC, "serial alloc {} bytes at {}", size, next);

            if frag.end - new_next < MAX_NURSERY_WASTE {
                frag.retire(new_next);
                if i == head {
                    *self.alloc_head.get_mut() = i + 1;
                }
            }
            return Some(next);
        }
        None
    }

    /// Bump allocation that may race with other `par_alloc` calls.
    pub fn par_alloc(&self, size: ByteSize) -> Option<Address> {
        debug_assert!(size > 0 && size % POINTER_SIZE == 0);
        let head = self.alloc_head.load(Ordering::Acquire);

        for i in head..self.fragments.len() {
            let frag = &self.fragments[i];
            let backoff = Backoff::new();

            loop {
                if frag.is_retired() {
                    break;
                }
                let next = frag.next.load(Ordering::Acquire);
                let new_next = next + size;
                if new_next > frag.end.as_usize() {
                    break;
                }

                if frag
                    .next
                    .compare_exchange_weak(next, new_next, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    let new_next = Address::from_usize(new_next);
                    trace_if!(TRACE_ALLOC, "par alloc {} bytes at 0x{:x}", size, next);

                    if frag.end - new_next < MAX_NURSERY_WASTE {
                        frag.retire(new_next);
                        let _ = self.alloc_head.compare_exchange(
                            i,
                            i + 1,
                            Ordering::AcqRel,
                            Ordering::Acquire
                        );
                    }
                    return Some(Address::from_usize(next));
                }
                backoff.spin();
            }
        }
        None
    }
}

impl fmt::Debug for FragmentAllocator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list().entries(self.fragments.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use crossbeam;

    fn buffer(size: ByteSize) -> (memmap::MmapMut, Address) {
        let mut mmap = mem::mmap_anon(size);
        let start = Address::from_mut_ptr(mmap.as_mut_ptr());
        (mmap, start)
    }

    #[test]
    fn test_first_fit() {
        let (_mmap, start) = buffer(0x4000);
        let mut alloc = FragmentAllocator::new();
        alloc.add(start, start + 0x400);
        alloc.add(start + 0x1000, start + 0x2000);

        assert_eq!(alloc.serial_alloc(0x100), Some(start));
        // does not fit the first fragment
        assert_eq!(alloc.serial_alloc(0x800), Some(start + 0x1000));
        assert_eq!(alloc.serial_alloc(0x10), Some(start + 0x100));
        assert_eq!(alloc.serial_alloc(0x1000), None);
    }

    #[test]
    fn test_retire_small_tail() {
        let (_mmap, start) = buffer(0x4000);
        unsafe {
            start.memset(0xab, 0x1000);
        }
        let mut alloc = FragmentAllocator::new();
        alloc.add(start, start + 0x1000);

        // leaves 0x100 bytes, less than the allowed waste
        assert_eq!(alloc.serial_alloc(0xf00), Some(start));
        let frag = &alloc.fragments()[0];
        assert!(frag.is_retired());
        assert_eq!(frag.next(), start + 0x1000);
        assert_eq!(alloc.total_free(), 0);
        unsafe {
            assert_eq!((start + 0xf00).load::<u64>(), 0);
            assert_eq!((start + 0xff8).load::<u64>(), 0);
            assert_eq!((start + 0xef8).load::<u8>(), 0xab);
        }
        assert_eq!(alloc.serial_alloc(8), None);
    }

    #[test]
    fn test_par_alloc_disjoint() {
        let (_mmap, start) = buffer(0x10000);
        let mut alloc = FragmentAllocator::new();
        alloc.add(start, start + 0x8000);
        alloc.add(start + 0x8000, start + 0x10000);

        let results = Mutex::new(vec![]);
        crossbeam::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|_| {
                    let mut mine = vec![];
                    while let Some(addr) = alloc.par_alloc(0x40) {
                        mine.push(addr);
                    }
                    results.lock().unwrap().extend(mine);
                });
            }
        }).unwrap();

        let results = results.into_inner().unwrap();
        let unique: HashSet<Address> = results.iter().cloned().collect();
        assert_eq!(unique.len(), results.len());
        for addr in results.iter() {
            assert!(addr.is_in_range(start, start + 0x10000));
            assert!(addr.is_aligned_to(0x40));
        }
        // every fragment ends retired once its tail is too small
        assert!(alloc.fragments().iter().all(|f| f.is_retired()));
    }

    #[test]
    fn test_take_and_release() {
        let mut alloc = FragmentAllocator::new();
        let start = Address::from_usize(0x10000);
        alloc.add(start, start + 0x1000);
        let taken = alloc.take_fragments();
        assert_eq!(taken.len(), 1);
        assert!(alloc.is_empty());

        alloc.add_fragment(Fragment::with_next(start, start + 0x10, start + 0x1000));
        assert_eq!(alloc.total_free(), 0x1000 - 0x10);
        alloc.release();
        assert!(alloc.is_empty());
    }
}
