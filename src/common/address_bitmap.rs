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
use utils::ByteSize;
use common::bitmap::Bitmap;

/// A bitmap over an address range at a fixed power-of-two granule.
///
/// The nursery uses one of these as the to-space bitmap: an address belongs to to-space
/// iff the bit of its granule is set. Ranges marked in it must be granule aligned at both
/// ends, otherwise the membership test would be ambiguous for the edge granules.
#[derive(Clone)]
pub struct AddressBitmap {
    start: Address,
    end: Address,
    log_granule: usize,

    bitmap: Bitmap
}

impl AddressBitmap {
    pub fn new(start: Address, end: Address, log_granule: usize) -> AddressBitmap {
        let granule = 1 << log_granule;
        assert!(start.is_aligned_to(granule) && end.is_aligned_to(granule));

        let bitmap_len = (end - start) >> log_granule;
        let bitmap = Bitmap::new(bitmap_len);

        AddressBitmap {
            start: start,
            end: end,
            log_granule: log_granule,
            bitmap: bitmap
        }
    }

    #[inline(always)]
    fn index(&self, addr: Address) -> usize {
        (addr - self.start) >> self.log_granule
    }

    #[inline(always)]
    pub fn granule(&self) -> ByteSize {
        1 << self.log_granule
    }

    #[inline(always)]
    pub fn set_bit(&mut self, addr: Address) {
        debug_assert!(addr.is_in_range(self.start, self.end));
        let index = self.index(addr);
        self.bitmap.set_bit(index);
    }

    /// addresses outside the covered range are never set
    #[inline(always)]
    pub fn test_bit(&self, addr: Address) -> bool {
        if !addr.is_in_range(self.start, self.end) {
            return false;
        }
        self.bitmap.test_bit(self.index(addr))
    }

    /// marks every granule of [start, end); both ends must be granule aligned
    pub fn set_range(&mut self, start: Address, end: Address) {
        assert!(
            start.is_aligned_to(self.granule()) && end.is_aligned_to(self.granule()),
            "range {}-{} is not aligned to {} bytes granule",
            start,
            end,
            self.granule()
        );
        debug_assert!(start >= self.start && end <= self.end && start <= end);

        let from = self.index(start);
        let to = self.index(end);
        self.bitmap.set_range(from, to);
    }

    pub fn clear_all(&mut self) {
        self.bitmap.clear_all();
    }

    pub fn count_set(&self) -> usize {
        self.bitmap.count_set()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_granule_range() {
        let start = Address::from_usize(0x10000);
        let end = start + 0x4000;
        let mut bitmap = AddressBitmap::new(start, end, 9);

        bitmap.set_range(start + 0x400, start + 0x1000);
        assert!(!bitmap.test_bit(start + 0x3ff));
        assert!(bitmap.test_bit(start + 0x400));
        assert!(bitmap.test_bit(start + 0x5ff));
        assert!(bitmap.test_bit(start + 0xfff));
        assert!(!bitmap.test_bit(start + 0x1000));
        assert!(!bitmap.test_bit(end));
        assert_eq!(bitmap.count_set(), 6);
    }

    #[test]
    #[should_panic]
    fn test_unaligned_range() {
        let start = Address::from_usize(0x10000);
        let mut bitmap = AddressBitmap::new(start, start + 0x4000, 9);
        bitmap.set_range(start + 0x10, start + 0x400);
    }
}
