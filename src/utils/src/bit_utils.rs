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

use Word;
use BITS_IN_WORD;
use LOG_BITS_IN_WORD;

/// tests bit `index` of a bitmap stored as a word slice (bit i lives in word i / 64).
/// Bits past the end of the slice read as zero
#[inline(always)]
pub fn test_bit_in_words(words: &[Word], index: usize) -> bool {
    match words.get(index >> LOG_BITS_IN_WORD) {
        Some(w) => (w >> (index & (BITS_IN_WORD - 1))) & 1 == 1,
        None => false
    }
}

/// sets bit `index` of a bitmap stored as a word slice
#[inline(always)]
pub fn set_bit_in_words(words: &mut [Word], index: usize) {
    words[index >> LOG_BITS_IN_WORD] |= 1 << (index & (BITS_IN_WORD - 1));
}

/// number of words needed to hold `numbits` bits
#[inline(always)]
pub fn words_for_bits(numbits: usize) -> usize {
    (numbits + BITS_IN_WORD - 1) >> LOG_BITS_IN_WORD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn test_word_slice_bits() {
        let mut words = vec![0usize; 2];
        set_bit_in_words(&mut words, 3);
        set_bit_in_words(&mut words, 70);

        assert_eq!(words[0], 0b1000);
        assert_eq!(words[1], 0b100_0000);
        assert!(test_bit_in_words(&words, 70));
        assert!(!test_bit_in_words(&words, 71));
        assert!(!test_bit_in_words(&words, 500));

        assert_eq!(words_for_bits(0), 0);
        assert_eq!(words_for_bits(64), 1);
        assert_eq!(words_for_bits(65), 2);
    }
}
