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

use utils::*;
use objectmodel::descriptor::*;

/// An encoded object descriptor word
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Descriptor(Word);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VectorKind {
    /// single dimension, zero based
    Vector = 0,
    /// anything else
    Array = 1
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VectorLayout {
    PtrFree,
    /// every word of an element is a reference
    Refs,
    /// reference words of one element
    Bitmap { bits: Word }
}

/// decoded form of a descriptor
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DescriptorKind {
    /// `count` reference words starting from word `offset`
    RunLength { offset: u8, count: u8, size: ByteSize },
    /// bit i is word (i + OBJECT_HEADER_WORDS)
    SmallBitmap { size: ByteSize, bits: Word },
    /// bit i is word (i + OBJECT_HEADER_WORDS)
    LargeBitmap { bits: Word },
    Complex { index: usize },
    ComplexPtrFree,
    String,
    Vector { kind: VectorKind, elem_size: ByteSize, layout: VectorLayout },
    ComplexArray { index: usize }
}

impl Descriptor {
    #[inline(always)]
    pub fn from_raw(raw: Word) -> Descriptor {
        Descriptor(raw)
    }

    #[inline(always)]
    pub fn raw(self) -> Word {
        self.0
    }

    #[inline(always)]
    pub fn tag(self) -> Word {
        self.0 & DESC_TYPE_MASK
    }

    /// decodes the word, panics on a word no encoder can produce
    pub fn kind(self) -> DescriptorKind {
        let d = self.0;
        match self.tag() {
            DESC_TYPE_RUN_LENGTH => DescriptorKind::RunLength {
                offset: ((d >> RUN_LEN_OFFSET_SHIFT) & RUN_LEN_FIELD_MASK) as u8,
                count: ((d >> RUN_LEN_COUNT_SHIFT) & RUN_LEN_FIELD_MASK) as u8,
                size: (d & SIZE_MASK) >> SIZE_SHIFT
            },
            DESC_TYPE_SMALL_BITMAP => DescriptorKind::SmallBitmap {
                size: (d & SIZE_MASK) >> SIZE_SHIFT,
                bits: d >> SMALL_BITMAP_SHIFT
            },
            DESC_TYPE_COMPLEX => DescriptorKind::Complex {
                index: d >> LOW_TYPE_BITS
            },
            DESC_TYPE_VECTOR => {
                let kind = if (d >> VECTOR_KIND_SHIFT) & 1 == 0 {
                    VectorKind::Vector
                } else {
                    VectorKind::Array
                };
                let layout = match (d >> VECTOR_INFO_SHIFT) & VECTOR_INFO_MASK {
                    DESC_TYPE_V_PTRFREE => VectorLayout::PtrFree,
                    DESC_TYPE_V_REFS => VectorLayout::Refs,
                    DESC_TYPE_V_BITMAP => VectorLayout::Bitmap {
                        bits: d >> VECTOR_BITMAP_SHIFT
                    },
                    other => panic!("unsupported vector subtype {} in {:#x}", other, d)
                };
                DescriptorKind::Vector {
                    kind: kind,
                    elem_size: (d >> VECTOR_ELSIZE_SHIFT) & MAX_ELEMENT_SIZE,
                    layout: layout
                }
            }
            DESC_TYPE_LARGE_BITMAP => DescriptorKind::LargeBitmap {
                bits: d >> LOW_TYPE_BITS
            },
            DESC_TYPE_COMPLEX_ARR => DescriptorKind::ComplexArray {
                index: d >> LOW_TYPE_BITS
            },
            DESC_TYPE_COMPLEX_PTRFREE => {
                if d & DESC_STRING_BIT != 0 {
                    DescriptorKind::String
                } else {
                    DescriptorKind::ComplexPtrFree
                }
            }
            _ => panic!("unknown descriptor tag in {:#x}", d)
        }
    }

    /// object size carried by run length and small bitmap descriptors
    pub fn object_size(self) -> Option<ByteSize> {
        match self.kind() {
            DescriptorKind::RunLength { size, .. } | DescriptorKind::SmallBitmap { size, .. } => {
                Some(size)
            }
            _ => None
        }
    }

    pub fn has_references(self) -> bool {
        match self.kind() {
            DescriptorKind::RunLength { count, .. } => count != 0,
            DescriptorKind::SmallBitmap { bits, .. } | DescriptorKind::LargeBitmap { bits } => {
                bits != 0
            }
            DescriptorKind::ComplexPtrFree | DescriptorKind::String => false,
            DescriptorKind::Vector { layout, .. } => layout != VectorLayout::PtrFree,
            DescriptorKind::Complex { .. } | DescriptorKind::ComplexArray { .. } => true
        }
    }
}

impl DescriptorKind {
    pub fn encode(self) -> Descriptor {
        let raw = match self {
            DescriptorKind::RunLength { offset, count, size } => {
                debug_assert!(size <= MAX_RUN_LEN_SIZE && size % ALLOC_ALIGN == 0);
                DESC_TYPE_RUN_LENGTH | (size << SIZE_SHIFT) |
                    ((offset as Word) << RUN_LEN_OFFSET_SHIFT) |
                    ((count as Word) << RUN_LEN_COUNT_SHIFT)
            }
            DescriptorKind::SmallBitmap { size, bits } => {
                debug_assert!(size <= MAX_RUN_LEN_SIZE && size % ALLOC_ALIGN == 0);
                debug_assert!(bits >> SMALL_BITMAP_SIZE == 0);
                DESC_TYPE_SMALL_BITMAP | (size << SIZE_SHIFT) | (bits << SMALL_BITMAP_SHIFT)
            }
            DescriptorKind::LargeBitmap { bits } => {
                debug_assert!(bits >> LARGE_BITMAP_SIZE == 0);
                DESC_TYPE_LARGE_BITMAP | (bits << LOW_TYPE_BITS)
            }
            DescriptorKind::Complex { index } => DESC_TYPE_COMPLEX | (index << LOW_TYPE_BITS),
            DescriptorKind::ComplexPtrFree => DESC_TYPE_COMPLEX_PTRFREE,
            DescriptorKind::String => DESC_TYPE_COMPLEX_PTRFREE | DESC_STRING_BIT,
            DescriptorKind::Vector { kind, elem_size, layout } => {
                debug_assert!(elem_size <= MAX_ELEMENT_SIZE);
                let (info, bitmap) = match layout {
                    VectorLayout::PtrFree => (DESC_TYPE_V_PTRFREE, 0),
                    // all bitmap bits set, scanning never looks at them
                    VectorLayout::Refs => (DESC_TYPE_V_REFS, !0 >> VECTOR_BITMAP_SHIFT),
                    VectorLayout::Bitmap { bits } => {
                        debug_assert!(bits >> VECTOR_BITMAP_SIZE == 0);
                        (DESC_TYPE_V_BITMAP, bits)
                    }
                };
                DESC_TYPE_VECTOR | (elem_size << VECTOR_ELSIZE_SHIFT) |
                    ((kind as Word) << VECTOR_KIND_SHIFT) |
                    (info << VECTOR_INFO_SHIFT) | (bitmap << VECTOR_BITMAP_SHIFT)
            }
            DescriptorKind::ComplexArray { index } => {
                DESC_TYPE_COMPLEX_ARR | (index << LOW_TYPE_BITS)
            }
        };
        Descriptor(raw)
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x} ({:?})", self.0, self.kind())
    }
}

/// first set bit, last set bit and number of set bits among the first numbits
struct BitmapShape {
    first_set: Option<usize>,
    last_set: usize,
    num_set: usize
}

impl BitmapShape {
    fn of(bitmap: &[Word], numbits: usize) -> BitmapShape {
        let mut shape = BitmapShape {
            first_set: None,
            last_set: 0,
            num_set: 0
        };
        for i in 0..numbits {
            if bit_utils::test_bit_in_words(bitmap, i) {
                if shape.first_set.is_none() {
                    shape.first_set = Some(i);
                }
                shape.last_set = i;
                shape.num_set += 1;
            }
        }
        shape
    }

    fn is_contiguous(&self, first: usize) -> bool {
        first + self.num_set == self.last_set + 1
    }
}

/// Encodes the layout of an object. `alloc_complex` is called with the bitmap and
/// the number of bits to store when no inline encoding fits, and returns the index
/// of the complex descriptor entry.
pub fn encode_object<F>(
    bitmap: &[Word],
    numbits: usize,
    obj_size: ByteSize,
    mut alloc_complex: F
) -> Descriptor
where
    F: FnMut(&[Word], usize) -> usize
{
    let stored_size = math::align_up(obj_size, ALLOC_ALIGN);
    let shape = BitmapShape::of(bitmap, numbits);

    let first = match shape.first_set {
        Some(first) => first,
        None => {
            return if stored_size <= MAX_RUN_LEN_SIZE {
                DescriptorKind::RunLength {
                    offset: 0,
                    count: 0,
                    size: stored_size
                }.encode()
            } else {
                DescriptorKind::ComplexPtrFree.encode()
            };
        }
    };

    if stored_size <= MAX_RUN_LEN_SIZE {
        if shape.is_contiguous(first) && first < 256 && shape.num_set < 256 {
            return DescriptorKind::RunLength {
                offset: first as u8,
                count: shape.num_set as u8,
                size: stored_size
            }.encode();
        }

        // the inline bitmaps skip the header words
        if first >= OBJECT_HEADER_WORDS && shape.last_set < SMALL_BITMAP_SIZE + OBJECT_HEADER_WORDS {
            return DescriptorKind::SmallBitmap {
                size: stored_size,
                bits: low_word(bitmap, numbits) >> OBJECT_HEADER_WORDS
            }.encode();
        }
    }

    if first >= OBJECT_HEADER_WORDS && shape.last_set < LARGE_BITMAP_SIZE + OBJECT_HEADER_WORDS {
        return DescriptorKind::LargeBitmap {
            bits: low_word(bitmap, numbits) >> OBJECT_HEADER_WORDS
        }.encode();
    }

    let index = alloc_complex(bitmap, shape.last_set + 1);
    DescriptorKind::Complex { index: index }.encode()
}

/// Encodes the layout of an array with `elem_size` byte elements whose reference
/// words are set in `elem_bitmap`.
pub fn encode_array<F>(
    vector: bool,
    elem_bitmap: &[Word],
    numbits: usize,
    elem_size: ByteSize,
    mut alloc_complex: F
) -> Descriptor
where
    F: FnMut(&[Word], usize) -> usize
{
    let kind = if vector {
        VectorKind::Vector
    } else {
        VectorKind::Array
    };
    let shape = BitmapShape::of(elem_bitmap, numbits);

    let first = match shape.first_set {
        Some(first) => first,
        None => {
            return if elem_size <= MAX_ELEMENT_SIZE {
                DescriptorKind::Vector {
                    kind: kind,
                    elem_size: elem_size,
                    layout: VectorLayout::PtrFree
                }.encode()
            } else {
                DescriptorKind::ComplexPtrFree.encode()
            };
        }
    };

    if elem_size <= MAX_ELEMENT_SIZE {
        if first == 0 && shape.is_contiguous(first) && shape.num_set * POINTER_SIZE == elem_size {
            return DescriptorKind::Vector {
                kind: kind,
                elem_size: elem_size,
                layout: VectorLayout::Refs
            }.encode();
        }
        if shape.last_set < VECTOR_BITMAP_SIZE {
            return DescriptorKind::Vector {
                kind: kind,
                elem_size: elem_size,
                layout: VectorLayout::Bitmap {
                    bits: low_word(elem_bitmap, numbits)
                }
            }.encode();
        }
    }

    let index = alloc_complex(elem_bitmap, shape.last_set + 1);
    DescriptorKind::ComplexArray { index: index }.encode()
}

/// first word of a bitmap with the bits past numbits cleared
fn low_word(bitmap: &[Word], numbits: usize) -> Word {
    if numbits >= BITS_IN_WORD {
        bitmap[0]
    } else {
        bitmap[0] & ((1 << numbits) - 1)
    }
}

/// Decodes the inline descriptor kinds into a bitmap and bit count. Complex kinds
/// need the side table and decode to an empty bitmap here.
pub fn decode_inline(kind: DescriptorKind) -> (Vec<Word>, usize) {
    match kind {
        DescriptorKind::RunLength { offset, count, .. } => {
            let numbits = offset as usize + count as usize;
            let mut bitmap = vec![0 as Word; bit_utils::words_for_bits(numbits)];
            for i in offset as usize..numbits {
                bit_utils::set_bit_in_words(&mut bitmap, i);
            }
            (bitmap, numbits)
        }
        DescriptorKind::SmallBitmap { bits, .. } | DescriptorKind::LargeBitmap { bits } => {
            header_shifted(bits)
        }
        DescriptorKind::Vector { elem_size, layout, .. } => match layout {
            VectorLayout::PtrFree => (vec![], 0),
            VectorLayout::Refs => {
                let numbits = elem_size >> LOG_POINTER_SIZE;
                let mut bitmap = vec![0 as Word; bit_utils::words_for_bits(numbits)];
                for i in 0..numbits {
                    bit_utils::set_bit_in_words(&mut bitmap, i);
                }
                (bitmap, numbits)
            }
            VectorLayout::Bitmap { bits } => (vec![bits], highest_bit(bits)),
        },
        DescriptorKind::ComplexPtrFree |
        DescriptorKind::String |
        DescriptorKind::Complex { .. } |
        DescriptorKind::ComplexArray { .. } => (vec![], 0)
    }
}

fn header_shifted(bits: Word) -> (Vec<Word>, usize) {
    let shifted = bits << OBJECT_HEADER_WORDS;
    (vec![shifted], highest_bit(shifted))
}

/// index of the highest set bit plus one
fn highest_bit(word: Word) -> usize {
    BITS_IN_WORD - word.leading_zeros() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_complex(_: &[Word], _: usize) -> usize {
        panic!("unexpected complex descriptor")
    }

    #[test]
    fn test_ptr_free_object() {
        let desc = encode_object(&[0], 10, 40, no_complex);
        assert_eq!(
            desc.kind(),
            DescriptorKind::RunLength {
                offset: 0,
                count: 0,
                size: 40
            }
        );
        assert!(!desc.has_references());
        assert_eq!(desc.object_size(), Some(40));

        let big = encode_object(&[0], 10, MAX_RUN_LEN_SIZE + 8, no_complex);
        assert_eq!(big.kind(), DescriptorKind::ComplexPtrFree);
    }

    #[test]
    fn test_run_length_object() {
        // words 2, 3, 4
        let desc = encode_object(&[0b11100], 5, 37, no_complex);
        assert_eq!(
            desc.kind(),
            DescriptorKind::RunLength {
                offset: 2,
                count: 3,
                size: 40
            }
        );
        assert_eq!(desc.raw() & DESC_TYPE_MASK, DESC_TYPE_RUN_LENGTH);
        assert_eq!((desc.raw() & SIZE_MASK) >> SIZE_SHIFT, 40);
    }

    #[test]
    fn test_small_bitmap_object() {
        let bitmap = [(1 << 2) | (1 << 5) | (1 << 49)];
        let desc = encode_object(&bitmap, 50, 400, no_complex);
        match desc.kind() {
            DescriptorKind::SmallBitmap { size, bits } => {
                assert_eq!(size, 400);
                assert_eq!(bits, (1 << 0) | (1 << 3) | (1 << 47));
            }
            other => panic!("expected a small bitmap, got {:?}", other)
        }
        assert_eq!(decode_inline(desc.kind()), (vec![bitmap[0]], 50));
    }

    #[test]
    fn test_large_bitmap_object() {
        let bitmap = [(1 << 2) | (1 << 62)];
        // too large for the run length and small bitmap size field
        let desc = encode_object(&bitmap, 63, 9000, no_complex);
        assert_eq!(
            desc.kind(),
            DescriptorKind::LargeBitmap {
                bits: 1 | (1 << 60)
            }
        );
        assert_eq!(desc.object_size(), None);
        assert_eq!(decode_inline(desc.kind()), (vec![bitmap[0]], 63));
    }

    #[test]
    fn test_complex_object() {
        let bitmap = [1 << 4, 1 << 3];
        let mut requested = None;
        let desc = encode_object(&bitmap, 128, 1024, |bits, n| {
            requested = Some((bits.to_vec(), n));
            7
        });
        assert_eq!(desc.kind(), DescriptorKind::Complex { index: 7 });
        assert_eq!(requested, Some((bitmap.to_vec(), 68)));
    }

    #[test]
    fn test_header_refs_need_complex() {
        // word 0 and word 5: not contiguous, and inline bitmaps drop the header
        let desc = encode_object(&[1 | (1 << 5)], 6, 48, |_, _| 0);
        assert_eq!(desc.kind(), DescriptorKind::Complex { index: 0 });
    }

    #[test]
    fn test_arrays() {
        let ptr_free = encode_array(true, &[0], 2, 16, no_complex);
        assert_eq!(
            ptr_free.kind(),
            DescriptorKind::Vector {
                kind: VectorKind::Vector,
                elem_size: 16,
                layout: VectorLayout::PtrFree
            }
        );

        let refs = encode_array(false, &[0b11], 2, 16, no_complex);
        assert_eq!(
            refs.kind(),
            DescriptorKind::Vector {
                kind: VectorKind::Array,
                elem_size: 16,
                layout: VectorLayout::Refs
            }
        );

        let bitmap = encode_array(true, &[0b101], 3, 24, no_complex);
        assert_eq!(
            bitmap.kind(),
            DescriptorKind::Vector {
                kind: VectorKind::Vector,
                elem_size: 24,
                layout: VectorLayout::Bitmap { bits: 0b101 }
            }
        );

        let big = encode_array(true, &[0, 1], 65, 1040, |_, n| {
            assert_eq!(n, 65);
            3
        });
        assert_eq!(big.kind(), DescriptorKind::ComplexArray { index: 3 });

        let big_free = encode_array(true, &[0], 1, 2048, no_complex);
        assert_eq!(big_free.kind(), DescriptorKind::ComplexPtrFree);
    }

    #[test]
    fn test_string() {
        let desc = DescriptorKind::String.encode();
        assert_eq!(desc.raw(), 0xf);
        assert_eq!(desc.kind(), DescriptorKind::String);
        assert!(!desc.has_references());
    }

    #[test]
    #[should_panic]
    fn test_unknown_tag() {
        Descriptor::from_raw(0x10).kind();
    }
}
