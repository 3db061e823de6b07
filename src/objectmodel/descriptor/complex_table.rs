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

/// Side table for layouts that do not fit inline in a descriptor.
///
/// One entry is `[nwords, bitmap_0, .., bitmap_{nwords - 2}]`, its index is the
/// position of `nwords` in `words`. Entries never change once added, and adding a
/// bitmap that is already present returns the existing index.
pub struct ComplexDescriptorTable {
    words: Vec<Word>,
    n_entries: usize
}

impl ComplexDescriptorTable {
    pub fn new() -> ComplexDescriptorTable {
        ComplexDescriptorTable {
            words: vec![],
            n_entries: 0
        }
    }

    /// index of the entry for the first `numbits` bits of `bitmap`
    pub fn alloc(&mut self, bitmap: &[Word], numbits: usize) -> usize {
        let nwords = bit_utils::words_for_bits(numbits) + 1;

        let mut content = Vec::with_capacity(nwords - 1);
        for i in 0..(nwords - 1) {
            let mut word = bitmap.get(i).cloned().unwrap_or(0);
            let bits_left = numbits - i * BITS_IN_WORD;
            if bits_left < BITS_IN_WORD {
                word &= (1 << bits_left) - 1;
            }
            content.push(word);
        }

        let mut index = 0;
        while index < self.words.len() {
            let count = self.words[index];
            if count == nwords && self.words[index + 1..index + count] == content[..] {
                return index;
            }
            index += count;
        }

        let index = self.words.len();
        self.words.push(nwords);
        self.words.extend_from_slice(&content);
        self.n_entries += 1;

        debug!(
            "complex descriptor {}, words: {} (table words: {})",
            index,
            nwords,
            self.words.len()
        );
        index
    }

    /// bitmap words of the entry at `index`
    pub fn bitmap(&self, index: usize) -> &[Word] {
        assert!(
            index < self.words.len() && self.words[index] > 0,
            "invalid complex descriptor index {}",
            index
        );
        let count = self.words[index];
        &self.words[index + 1..index + count]
    }

    pub fn len_words(&self) -> usize {
        self.words.len()
    }

    pub fn n_entries(&self) -> usize {
        self.n_entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_layout() {
        let mut table = ComplexDescriptorTable::new();
        let a = table.alloc(&[0b101, 1], 65);
        assert_eq!(a, 0);
        assert_eq!(table.len_words(), 3);
        assert_eq!(table.bitmap(a), &[0b101, 1]);

        let b = table.alloc(&[1 << 63], 64);
        assert_eq!(b, 3);
        assert_eq!(table.bitmap(b), &[1 << 63]);
        assert_eq!(table.n_entries(), 2);
    }

    #[test]
    fn test_dedup() {
        let mut table = ComplexDescriptorTable::new();
        let a = table.alloc(&[7, 9], 100);
        let b = table.alloc(&[3], 70);
        let words = table.len_words();

        assert_eq!(table.alloc(&[7, 9], 100), a);
        assert_eq!(table.alloc(&[3, 0], 70), b);
        assert_eq!(table.len_words(), words);

        // same words, different length
        let c = table.alloc(&[7, 9, 0], 130);
        assert!(c != a);
        assert_eq!(table.bitmap(c), &[7, 9, 0]);
    }

    #[test]
    fn test_bits_past_numbits_ignored() {
        let mut table = ComplexDescriptorTable::new();
        let a = table.alloc(&[1, 0b11], 65);
        let b = table.alloc(&[1, 0b01], 65);
        assert_eq!(a, b);
        assert_eq!(table.bitmap(a), &[1, 1]);
    }

    #[test]
    #[should_panic]
    fn test_bad_index() {
        let table = ComplexDescriptorTable::new();
        table.bitmap(0);
    }
}
