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

use utils::*;
use common::AddressBitmap;
use heap::MajorHeap;
use heap::clear_range;
use heap::nursery::*;

/// where the nursery is in its collection cycle
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NurseryState {
    Idle,
    FragmentsBuilt,
    MutatorAllocating,
    CollectionTriggered,
    Evacuating,
    FragmentsRebuilt
}

/// A nursery split at the promotion barrier.
///
/// The mutator allocates below the barrier. Above it lie last cycle's
/// survivors (from-space) and the collector's fragment pool (to-space). An
/// object below the barrier that survives is copied into to-space once; an
/// object at or above the barrier that survives again goes to the major heap.
pub struct SplitNursery {
    start: Address,
    end: Address,
    promotion_barrier: Address,

    mutator: FragmentAllocator,
    collector: FragmentAllocator,

    state: NurseryState
}

impl SplitNursery {
    pub fn new(start: Address, end: Address) -> SplitNursery {
        assert!(start < end);
        assert!(
            start.is_aligned_to(TO_SPACE_GRANULE_IN_BYTES) &&
                end.is_aligned_to(TO_SPACE_GRANULE_IN_BYTES),
            "nursery {}-{} is not aligned to to-space granules",
            start,
            end
        );
        SplitNursery {
            start: start,
            end: end,
            promotion_barrier: start,
            mutator: FragmentAllocator::new(),
            collector: FragmentAllocator::new(),
            state: NurseryState::Idle
        }
    }

    /// Splits the nursery at its midpoint: the mutator gets the lower half, the
    /// collector the upper half.
    pub fn init_nursery(&mut self) {
        self.transition(&[NurseryState::Idle], NurseryState::FragmentsBuilt);

        let half = (self.end - self.start) / 2;
        self.promotion_barrier = (self.start + half).align_down(TO_SPACE_GRANULE_IN_BYTES);

        self.mutator.release();
        self.collector.release();
        self.mutator.add(self.start, self.end);
        self.fragment_list_split();

        debug!(
            "split nursery {}-{}, promotion barrier {}",
            self.start,
            self.end,
            self.promotion_barrier
        );
    }

    fn transition(&mut self, from: &[NurseryState], to: NurseryState) {
        assert!(
            from.contains(&self.state),
            "nursery cannot go from {:?} to {:?}",
            self.state,
            to
        );
        self.state = to;
    }

    #[inline(always)]
    pub fn start(&self) -> Address {
        self.start
    }

    #[inline(always)]
    pub fn end(&self) -> Address {
        self.end
    }

    #[inline(always)]
    pub fn promotion_barrier(&self) -> Address {
        self.promotion_barrier
    }

    #[inline(always)]
    pub fn ptr_in_nursery(&self, addr: Address) -> bool {
        addr.is_in_range(self.start, self.end)
    }

    pub fn state(&self) -> NurseryState {
        self.state
    }

    pub fn mutator_allocator(&self) -> &FragmentAllocator {
        &self.mutator
    }

    pub fn collector_allocator(&self) -> &FragmentAllocator {
        &self.collector
    }

    /// allocation for the mutator (below the barrier)
    pub fn mutator_alloc(&mut self, size: ByteSize) -> Option<Address> {
        if self.state != NurseryState::MutatorAllocating {
            self.transition(
                &[NurseryState::FragmentsBuilt, NurseryState::FragmentsRebuilt],
                NurseryState::MutatorAllocating
            );
        }
        self.mutator.serial_alloc(math::align_up(size, POINTER_SIZE))
    }

    /// is `addr` in a to-space granule of this cycle
    #[inline(always)]
    pub fn is_to_space(&self, to_space_bitmap: &AddressBitmap, addr: Address) -> bool {
        to_space_bitmap.test_bit(addr)
    }

    /// Memory for a surviving object: young objects (below the barrier) get one more
    /// round in to-space if it has room, everything else goes to the major heap.
    /// None means the object has to stay where it is.
    pub fn alloc_for_promotion(
        &mut self,
        obj: Address,
        size: ByteSize,
        has_refs: bool,
        major: &dyn MajorHeap
    ) -> Option<Address> {
        debug_assert_eq!(self.state, NurseryState::Evacuating);
        if obj.is_in_range(self.start, self.promotion_barrier) {
            if let Some(addr) = self.collector.serial_alloc(size) {
                return Some(addr);
            }
        }
        major.alloc_object(size, has_refs)
    }

    /// `alloc_for_promotion()` for parallel evacuation workers
    pub fn par_alloc_for_promotion(
        &self,
        obj: Address,
        size: ByteSize,
        has_refs: bool,
        major: &dyn MajorHeap
    ) -> Option<Address> {
        debug_assert_eq!(self.state, NurseryState::Evacuating);
        if obj.is_in_range(self.start, self.promotion_barrier) {
            if let Some(addr) = self.collector.par_alloc(size) {
                return Some(addr);
            }
        }
        major.par_alloc_object(size, has_refs)
    }

    /// Moves the portions of the mutator fragments at or above the barrier into the
    /// collector pool. A fragment crossing the barrier is cut exactly there.
    pub fn fragment_list_split(&mut self) {
        let barrier = self.promotion_barrier;
        for frag in self.mutator.take_fragments() {
            let (start, next, end) = (frag.start(), frag.next(), frag.end());
            if end <= barrier {
                self.mutator.add_fragment(frag);
            } else if start >= barrier {
                self.collector.add_fragment(frag);
            } else {
                self.mutator
                    .add_fragment(Fragment::with_next(start, cmp::min(next, barrier), barrier));
                self.collector
                    .add_fragment(Fragment::with_next(barrier, cmp::max(next, barrier), end));
            }
        }
    }

    /// Turns the collector pool into this cycle's to-space: every fragment is shrunk
    /// to whole granules (or dropped if too little is left) and its granules are
    /// marked in `to_space_bitmap`.
    pub fn prepare_to_space(&mut self, to_space_bitmap: &mut AddressBitmap) {
        self.transition(
            &[
                NurseryState::FragmentsBuilt,
                NurseryState::MutatorAllocating,
                NurseryState::FragmentsRebuilt
            ],
            NurseryState::CollectionTriggered
        );
        to_space_bitmap.clear_all();

        for frag in self.collector.take_fragments() {
            let next = frag.next();
            let end = frag.end();
            let rounded_start = next.align_up(TO_SPACE_GRANULE_IN_BYTES);
            let rounded_end = end.align_down(TO_SPACE_GRANULE_IN_BYTES);

            if rounded_end <= rounded_start || rounded_end - rounded_start < MAX_NURSERY_WASTE {
                clear_range(next, end);
                continue;
            }

            clear_range(next, rounded_start);
            clear_range(rounded_end, end);
            to_space_bitmap.set_range(rounded_start, rounded_end);
            self.collector.add(rounded_start, rounded_end);
        }

        debug!(
            "to-space: {} fragments, {} bytes",
            self.collector.fragments().len(),
            self.collector.total_free()
        );
        self.state = NurseryState::Evacuating;
    }

    /// ranges of to-space that hold survivors copied this cycle
    pub fn build_fragments_get_exclude_head(&self) -> Vec<(Address, Address)> {
        self.collector
            .fragments()
            .iter()
            .filter(|f| f.next() > f.start())
            .map(|f| (f.start(), f.next()))
            .collect()
    }

    /// releases the collector pool
    pub fn clear_fragments(&mut self) {
        self.collector.release();
    }

    /// Rebuilds the free lists after evacuation. Free is whatever is neither a pinned
    /// object (`pinned` holds start and size) nor a survivor in to-space. Free
    /// ranges are zeroed.
    pub fn rebuild_fragments(&mut self, pinned: &[(Address, ByteSize)]) {
        self.transition(&[NurseryState::Evacuating], NurseryState::FragmentsRebuilt);

        let mut exclude: Vec<(Address, Address)> = pinned
            .iter()
            .filter(|&&(obj, _)| self.ptr_in_nursery(obj))
            .map(|&(obj, size)| (obj, cmp::min(obj + size, self.end)))
            .collect();
        exclude.extend(self.build_fragments_get_exclude_head());
        exclude.sort();

        self.mutator.release();
        self.clear_fragments();

        let mut cursor = self.start;
        for (start, end) in exclude {
            if start > cursor {
                self.add_nursery_frag(cursor, start);
            }
            cursor = cmp::max(cursor, end);
        }
        if cursor < self.end {
            let end = self.end;
            self.add_nursery_frag(cursor, end);
        }

        self.fragment_list_split();

        debug!(
            "nursery rebuilt: mutator {} bytes in {} fragments, collector {} bytes in {} fragments",
            self.mutator.total_free(),
            self.mutator.fragments().len(),
            self.collector.total_free(),
            self.collector.fragments().len()
        );
    }

    fn add_nursery_frag(&mut self, start: Address, end: Address) {
        clear_range(start, end);
        if end - start >= MAX_NURSERY_WASTE {
            self.mutator.add(start, end);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIZE: ByteSize = 1 << 20;

    fn nursery() -> (memmap::MmapMut, SplitNursery) {
        let mut mmap = mem::mmap_anon(SIZE + TO_SPACE_GRANULE_IN_BYTES);
        let start = Address::from_mut_ptr(mmap.as_mut_ptr()).align_up(TO_SPACE_GRANULE_IN_BYTES);
        (mmap, SplitNursery::new(start, start + SIZE))
    }

    fn ranges(alloc: &FragmentAllocator) -> Vec<(Address, Address)> {
        alloc.fragments().iter().map(|f| (f.start(), f.end())).collect()
    }

    #[test]
    fn test_init_midpoint() {
        let (_mmap, mut nursery) = nursery();
        nursery.init_nursery();
        let start = nursery.start();
        let mid = start + SIZE / 2;

        assert_eq!(nursery.state(), NurseryState::FragmentsBuilt);
        assert_eq!(nursery.promotion_barrier(), mid);
        assert_eq!(ranges(nursery.mutator_allocator()), vec![(start, mid)]);
        assert_eq!(ranges(nursery.collector_allocator()), vec![(mid, nursery.end())]);
    }

    #[test]
    fn test_split_straddling() {
        let (_mmap, mut nursery) = nursery();
        nursery.init_nursery();
        let start = nursery.start();
        let mid = nursery.promotion_barrier();

        nursery.clear_fragments();
        nursery.mutator.release();
        nursery.mutator.add(start, start + 0x1000);
        nursery.mutator.add(mid - 0x800, mid + 0x800);
        nursery.mutator.add(mid + 0x4000, mid + 0x8000);
        nursery.fragment_list_split();

        assert_eq!(
            ranges(nursery.mutator_allocator()),
            vec![(start, start + 0x1000), (mid - 0x800, mid)]
        );
        assert_eq!(
            ranges(nursery.collector_allocator()),
            vec![(mid, mid + 0x800), (mid + 0x4000, mid + 0x8000)]
        );
    }

    #[test]
    fn test_prepare_to_space_rounds_inward() {
        let (_mmap, mut nursery) = nursery();
        nursery.init_nursery();
        let mid = nursery.promotion_barrier();

        nursery.clear_fragments();
        let a = mid + 0x1000 + 0x48;
        let a_end = mid + 0x2000 - 0x10;
        // too small once rounded
        let b = mid + 0x3000 + 0x8;
        let b_end = mid + 0x3000 + 0x3f8;
        nursery.collector.add(a, a_end);
        nursery.collector.add(b, b_end);
        unsafe {
            (a - 0x48).memset(0xcd, 0x3000);
        }

        let mut bitmap = AddressBitmap::new(nursery.start(), nursery.end(), TO_SPACE_GRANULE_BITS);
        bitmap.set_bit(nursery.start());
        nursery.prepare_to_space(&mut bitmap);
        assert_eq!(nursery.state(), NurseryState::Evacuating);

        let rounded = (mid + 0x1200, mid + 0x1e00);
        assert_eq!(ranges(nursery.collector_allocator()), vec![rounded]);
        assert_eq!(bitmap.count_set(), (0x1e00 - 0x1200) / TO_SPACE_GRANULE_IN_BYTES);
        assert!(!nursery.is_to_space(&bitmap, rounded.0 - 8));
        assert!(nursery.is_to_space(&bitmap, rounded.0));
        assert!(nursery.is_to_space(&bitmap, rounded.1 - 8));
        assert!(!nursery.is_to_space(&bitmap, rounded.1));
        assert!(!nursery.is_to_space(&bitmap, nursery.start()));

        unsafe {
            // both slack ranges zeroed, the range itself and outside left alone
            assert_eq!(a.load::<u64>(), 0);
            assert_eq!((rounded.0 - 8).load::<u64>(), 0);
            assert_eq!(rounded.0.load::<u8>(), 0xcd);
            assert_eq!(rounded.1.load::<u64>(), 0);
            assert_eq!((a_end - 8).load::<u64>(), 0);
            assert_eq!(a_end.load::<u8>(), 0xcd);
            // dropped fragment zeroed
            assert_eq!(b.load::<u64>(), 0);
            assert_eq!((b_end - 8).load::<u64>(), 0);
        }
    }

    #[test]
    #[should_panic]
    fn test_prepare_twice() {
        let (_mmap, mut nursery) = nursery();
        nursery.init_nursery();
        let mut bitmap = AddressBitmap::new(nursery.start(), nursery.end(), TO_SPACE_GRANULE_BITS);
        nursery.prepare_to_space(&mut bitmap);
        nursery.prepare_to_space(&mut bitmap);
    }

    #[test]
    fn test_rebuild_excludes_pins_and_survivors() {
        let (_mmap, mut nursery) = nursery();
        nursery.init_nursery();
        let start = nursery.start();
        let mid = nursery.promotion_barrier();
        let end = nursery.end();

        let pinned = nursery.mutator_alloc(0x1000).unwrap();
        let mut bitmap = AddressBitmap::new(start, end, TO_SPACE_GRANULE_BITS);
        nursery.prepare_to_space(&mut bitmap);

        struct NoMajor;
        impl MajorHeap for NoMajor {
            fn alloc_object(&self, _: ByteSize, _: bool) -> Option<Address> {
                None
            }
        }
        let copy = nursery.alloc_for_promotion(start + 0x2000, 0x100, true, &NoMajor);
        assert_eq!(copy, Some(mid));
        assert_eq!(nursery.build_fragments_get_exclude_head(), vec![(mid, mid + 0x100)]);

        nursery.rebuild_fragments(&[(pinned, 0x1000)]);
        assert_eq!(nursery.state(), NurseryState::FragmentsRebuilt);
        assert_eq!(ranges(nursery.mutator_allocator()), vec![(start + 0x1000, mid)]);
        assert_eq!(ranges(nursery.collector_allocator()), vec![(mid + 0x100, end)]);
    }
}
