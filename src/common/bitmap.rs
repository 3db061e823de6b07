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

use utils::Word;
use utils::{BITS_IN_WORD, LOG_BITS_IN_WORD};
use utils::bit_utils;

/// a plain growable-once bitmap over words
#[derive(Clone)]
pub struct Bitmap {
    bitmap: Vec<Word>,
    bitmap_len: usize
}

impl Bitmap {
    pub fn new(length: usize) -> Bitmap {
        Bitmap {
            bitmap: vec![0; bit_utils::words_for_bits(length)],
            bitmap_len: length
        }
    }

    #[inline(always)]
    pub fn set_bit(&mut self, index: usize) {
        debug_assert!(index < self.bitmap_len);
        bit_utils::set_bit_in_words(&mut self.bitmap, index);
    }

    #[inline(always)]
    pub fn test_bit(&self, index: usize) -> bool {
        debug_assert!(index < self.bitmap_len);
        bit_utils::test_bit_in_words(&self.bitmap, index)
    }

    /// sets bits [from, to)
    pub fn set_range(&mut self, from: usize, to: usize) {
        debug_assert!(from <= to && to <= self.bitmap_len);
        let mut i = from;
        // leading partial word
        while i < to && (i & (BITS_IN_WORD - 1)) != 0 {
            self.set_bit(i);
            i += 1;
        }
        // whole words
        while i + BITS_IN_WORD <= to {
            self.bitmap[i >> LOG_BITS_IN_WORD] = !0;
            i += BITS_IN_WORD;
        }
        while i < to {
            self.set_bit(i);
            i += 1;
        }
    }

    pub fn clear_all(&mut self) {
        for w in self.bitmap.iter_mut() {
            *w = 0;
        }
    }

    pub fn count_set(&self) -> usize {
        self.bitmap.iter().map(|w| w.count_ones() as usize).sum()
    }
}
