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

use utils::Address;

const TRACE_QUEUE: bool = false;
const INITIAL_CAPACITY: usize = 64;

/// A growable queue of addresses with capacity doubling.
///
/// Entries are appended unordered; `sort_uniq()` turns the queue into a strictly increasing
/// sequence, which is the only state `search()` is valid on. Growth failure aborts the process.
#[derive(Clone, Default)]
pub struct PointerQueue {
    data: Vec<Address>
}

impl PointerQueue {
    pub fn new() -> PointerQueue {
        PointerQueue { data: vec![] }
    }

    #[inline(always)]
    pub fn add(&mut self, ptr: Address) {
        if self.data.len() == self.data.capacity() {
            self.grow();
        }
        self.data.push(ptr);
    }

    #[inline(never)]
    fn grow(&mut self) {
        let old_capacity = self.data.capacity();
        let additional = if old_capacity == 0 { INITIAL_CAPACITY } else { old_capacity };
        self.data.reserve_exact(additional);
        trace_if!(
            TRACE_QUEUE,
            "pointer queue grows from {} to {} entries",
            old_capacity,
            self.data.capacity()
        );
    }

    /// sorts the queue ascending and removes duplicates
    pub fn sort_uniq(&mut self) {
        self.data.sort_unstable();
        self.data.dedup();
    }

    /// index of the first entry that is >= addr (len() if there is none).
    /// Only valid after sort_uniq()
    pub fn search(&self, addr: Address) -> usize {
        debug_assert!(self.is_sorted_uniq());

        let mut first = 0;
        let mut last = self.data.len();
        while first < last {
            let middle = first + ((last - first) >> 1);
            if self.data[middle] < addr {
                first = middle + 1;
            } else {
                last = middle;
            }
        }
        first
    }

    pub fn is_sorted_uniq(&self) -> bool {
        self.data.windows(2).all(|w| w[0] < w[1])
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline(always)]
    pub fn get(&self, index: usize) -> Address {
        self.data[index]
    }

    #[inline(always)]
    pub fn set(&mut self, index: usize, value: Address) {
        self.data[index] = value;
    }

    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn as_slice(&self) -> &[Address] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(x: usize) -> Address {
        Address::from_usize(x)
    }

    #[test]
    fn test_grow_and_sort_uniq() {
        let mut queue = PointerQueue::new();
        for i in 0..1000 {
            queue.add(addr(((i * 7919) % 300) * 8 + 0x1000));
        }
        assert_eq!(queue.len(), 1000);

        queue.sort_uniq();
        assert_eq!(queue.len(), 300);
        assert!(queue.is_sorted_uniq());
        assert_eq!(queue.get(0), addr(0x1000));
    }

    #[test]
    fn test_search() {
        let mut queue = PointerQueue::new();
        for &x in [0x40, 0x10, 0x30, 0x20, 0x30].iter() {
            queue.add(addr(x));
        }
        queue.sort_uniq();

        assert_eq!(queue.search(addr(0x0)), 0);
        assert_eq!(queue.search(addr(0x10)), 0);
        assert_eq!(queue.search(addr(0x11)), 1);
        assert_eq!(queue.search(addr(0x40)), 3);
        assert_eq!(queue.search(addr(0x41)), 4);
    }
}
