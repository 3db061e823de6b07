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

use utils::*;

pub mod pinning;
pub mod nursery;
pub mod gc;

/// The old generation, as seen from the nursery: survivors that cannot stay in the
/// nursery are copied into memory handed out here.
pub trait MajorHeap: Send + Sync {
    /// allocates `size` bytes, None if the heap is exhausted
    fn alloc_object(&self, size: ByteSize, has_refs: bool) -> Option<Address>;

    /// allocation path for parallel evacuation workers
    fn par_alloc_object(&self, size: ByteSize, has_refs: bool) -> Option<Address> {
        self.alloc_object(size, has_refs)
    }
}

/// A contiguous heap range plus the part of the optimized pin queue that falls
/// into it
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HeapSection {
    pub start: Address,
    pub end: Address,
    pub pin_queue_first_entry: usize,
    pub pin_queue_last_entry: usize
}

impl HeapSection {
    pub fn new(start: Address, end: Address) -> HeapSection {
        debug_assert!(start <= end);
        HeapSection {
            start: start,
            end: end,
            pin_queue_first_entry: 0,
            pin_queue_last_entry: 0
        }
    }

    #[inline(always)]
    pub fn contains(&self, addr: Address) -> bool {
        addr.is_in_range(self.start, self.end)
    }

    #[inline(always)]
    pub fn size(&self) -> ByteSize {
        self.end - self.start
    }

    pub fn pin_queue_num_entries(&self) -> usize {
        self.pin_queue_last_entry - self.pin_queue_first_entry
    }
}

/// zeroes [start, end)
#[inline(always)]
pub fn clear_range(start: Address, end: Address) {
    debug_assert!(start <= end);
    if end > start {
        unsafe {
            mem::memzero(start, end - start);
        }
    }
}
