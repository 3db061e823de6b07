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

//! # Descriptor Encoding
//!
//! Terminology
//!
//! * Descriptor
//!   a single word describing where the references of an object (or of the
//!   elements of an array) live, so the collector can scan an object without
//!   consulting type metadata
//! * Root descriptor
//!   the same idea for a registered root range; it reuses the tag space with
//!   a different shift and adds user mark callbacks
//! * Complex descriptor
//!   a side-table entry holding a bitmap that is too large for any inline
//!   encoding. The descriptor word then carries the table index
//!
//! Descriptor word (64 bits), low 3 bits are the tag
//!
//! * run length - tag 1
//!   |count(8)|offset(8)|size << 1 (12, bits 4-15)|0|tag|
//!   `count` reference words starting at word `offset`; size is the 8-aligned
//!   object size (at most 8000 bytes)
//! * small bitmap - tag 2
//!   |bitmap(48)|size << 1 (12)|0|tag|
//!   the bitmap starts after the 2 header words
//! * complex - tag 3
//!   |index(61)|tag|
//! * vector - tag 4
//!   |bitmap(48)|subtype(2)|kind(1)|element size(10)|tag|
//!   subtype: 0 - pointer free, 1 - all refs, 3 - bitmap of one element
//!   kind: 0 - vector (single dimension, zero based), 1 - general array
//! * large bitmap - tag 5
//!   |bitmap(61)|tag|
//!   the bitmap starts after the 2 header words
//! * complex array - tag 6
//!   |index(61)|tag|
//! * complex pointer free - tag 7
//!   no references; bit 3 marks strings
//!
//! Root descriptor word, low 3 bits are the tag
//!
//! * conservative - 0
//! * bitmap       - 1, |bitmap(61)|tag|
//! * run length   - 2 (reserved)
//! * complex      - 3, |index(61)|tag|
//! * user         - 4, |index(61)|tag| into a table of 16 mark functions

use std::fmt;
use std::sync::Mutex;

use utils::*;

mod complex_table;
mod object_encode;
mod root_encode;

pub use objectmodel::descriptor::complex_table::ComplexDescriptorTable;
pub use objectmodel::descriptor::object_encode::*;
pub use objectmodel::descriptor::root_encode::*;

/// number of tag bits in a descriptor word
pub const LOW_TYPE_BITS: usize = 3;
pub const DESC_TYPE_MASK: Word = (1 << LOW_TYPE_BITS) - 1;

/// words at the start of every object that never hold references
pub const OBJECT_HEADER_WORDS: usize = 2;
/// object sizes are rounded up to this before they are stored
pub const ALLOC_ALIGN: ByteSize = 8;
/// largest object size a run length or small bitmap descriptor can carry
pub const MAX_RUN_LEN_SIZE: ByteSize = 8000;

pub const DESC_TYPE_RUN_LENGTH: Word = 1;
pub const DESC_TYPE_SMALL_BITMAP: Word = 2;
pub const DESC_TYPE_COMPLEX: Word = 3;
pub const DESC_TYPE_VECTOR: Word = 4;
pub const DESC_TYPE_LARGE_BITMAP: Word = 5;
pub const DESC_TYPE_COMPLEX_ARR: Word = 6;
pub const DESC_TYPE_COMPLEX_PTRFREE: Word = 7;

// size field shared by run length and small bitmap
pub const SIZE_SHIFT: usize = 1;
pub const SIZE_MASK: Word = 0xfff8;

pub const RUN_LEN_OFFSET_SHIFT: usize = 16;
pub const RUN_LEN_COUNT_SHIFT: usize = 24;
pub const RUN_LEN_FIELD_MASK: Word = 0xff;

pub const SMALL_BITMAP_SHIFT: usize = 16;
pub const SMALL_BITMAP_SIZE: usize = BITS_IN_WORD - SMALL_BITMAP_SHIFT;
pub const LARGE_BITMAP_SIZE: usize = BITS_IN_WORD - LOW_TYPE_BITS;

pub const VECTOR_ELSIZE_SHIFT: usize = 3;
pub const VECTOR_KIND_SHIFT: usize = 13;
pub const VECTOR_INFO_SHIFT: usize = 14;
pub const VECTOR_INFO_MASK: Word = 0b11;
pub const VECTOR_BITMAP_SHIFT: usize = 16;
pub const VECTOR_BITMAP_SIZE: usize = BITS_IN_WORD - VECTOR_BITMAP_SHIFT;
pub const MAX_ELEMENT_SIZE: ByteSize = 0x3ff;

pub const DESC_TYPE_V_PTRFREE: Word = 0;
pub const DESC_TYPE_V_REFS: Word = 1;
pub const DESC_TYPE_V_RUN_LEN: Word = 2;
pub const DESC_TYPE_V_BITMAP: Word = 3;

/// marks the pointer free descriptor of strings
pub const DESC_STRING_BIT: Word = 1 << LOW_TYPE_BITS;

/// a root mark function: called with the root address and a callback that
/// must be invoked for every object reference found there
pub type RootMarkFunc = fn(Address, &mut dyn FnMut(ObjectReference));

/// the tables behind descriptor creation, guarded by one lock
struct DescriptorTables {
    complex: ComplexDescriptorTable,
    user_markers: Vec<RootMarkFunc>,
    all_ref_roots: [Option<RootDescriptor>; 32]
}

/// Creates descriptors for one heap.
///
/// Types can be loaded on several threads at once, so every creation goes through
/// `gc_lock`. Creation is deterministic on content: the same bitmap always maps to
/// the same complex index, which bounds the side table under repeated type loading.
pub struct DescriptorBuilder {
    gc_lock: Mutex<DescriptorTables>
}

impl DescriptorBuilder {
    pub fn new() -> DescriptorBuilder {
        DescriptorBuilder {
            gc_lock: Mutex::new(DescriptorTables {
                complex: ComplexDescriptorTable::new(),
                user_markers: Vec::with_capacity(MAX_USER_DESCRIPTORS),
                all_ref_roots: [None; 32]
            })
        }
    }

    /// descriptor for an object of `obj_size` bytes whose reference words are set
    /// in the first `numbits` bits of `bitmap`
    pub fn make_descr_for_object(
        &self,
        bitmap: &[Word],
        numbits: usize,
        obj_size: ByteSize
    ) -> Descriptor {
        let mut tables = self.gc_lock.lock().unwrap();
        encode_object(bitmap, numbits, obj_size, |bits, n| {
            tables.complex.alloc(bits, n)
        })
    }

    /// descriptor for an array whose elements are `elem_size` bytes, with the
    /// reference words of one element in `elem_bitmap`
    pub fn make_descr_for_array(
        &self,
        vector: bool,
        elem_bitmap: &[Word],
        numbits: usize,
        elem_size: ByteSize
    ) -> Descriptor {
        let mut tables = self.gc_lock.lock().unwrap();
        encode_array(vector, elem_bitmap, numbits, elem_size, |bits, n| {
            tables.complex.alloc(bits, n)
        })
    }

    pub fn make_descr_for_string(&self) -> Descriptor {
        DescriptorKind::String.encode()
    }

    /// root descriptor for a root range with reference words in `bitmap`
    pub fn make_root_descr_from_bitmap(&self, bitmap: &[Word], numbits: usize) -> RootDescriptor {
        let mut tables = self.gc_lock.lock().unwrap();
        encode_root_bitmap(bitmap, numbits, |bits, n| tables.complex.alloc(bits, n))
    }

    /// root descriptor for a range of `numbits` words that are all references
    pub fn make_root_descr_all_refs(&self, numbits: usize) -> RootDescriptor {
        let mut tables = self.gc_lock.lock().unwrap();
        if numbits < 32 {
            if let Some(desc) = tables.all_ref_roots[numbits] {
                return desc;
            }
        }

        let mut bitmap = vec![0 as Word; bit_utils::words_for_bits(numbits)];
        for i in 0..numbits {
            bit_utils::set_bit_in_words(&mut bitmap, i);
        }
        let desc = encode_root_bitmap(&bitmap, numbits, |bits, n| tables.complex.alloc(bits, n));

        if numbits < 32 {
            tables.all_ref_roots[numbits] = Some(desc);
        }
        desc
    }

    /// registers a user mark function; at most MAX_USER_DESCRIPTORS can exist
    pub fn make_root_descr_user(&self, marker: RootMarkFunc) -> RootDescriptor {
        let mut tables = self.gc_lock.lock().unwrap();
        let index = tables.user_markers.len();
        assert!(
            index < MAX_USER_DESCRIPTORS,
            "too many user root descriptors (max {})",
            MAX_USER_DESCRIPTORS
        );
        tables.user_markers.push(marker);
        debug!("user root descriptor {} registered", index);

        RootDescriptorKind::User { index: index }.encode()
    }

    pub fn user_root_marker(&self, index: usize) -> Option<RootMarkFunc> {
        let tables = self.gc_lock.lock().unwrap();
        tables.user_markers.get(index).cloned()
    }

    /// bitmap words of a complex descriptor entry. This is the authoritative source
    /// for complex layouts
    pub fn complex_bitmap(&self, index: usize) -> Vec<Word> {
        let tables = self.gc_lock.lock().unwrap();
        tables.complex.bitmap(index).to_vec()
    }

    /// number of words used by the complex descriptor table
    pub fn complex_table_words(&self) -> usize {
        self.gc_lock.lock().unwrap().complex.len_words()
    }

    /// Turns a descriptor back into a reference bitmap (bit i = word i of the object,
    /// or of one element for arrays) and its bit count.
    ///
    /// Meant for diagnostics. Run length and small bitmap descriptors round trip; for
    /// large bitmaps the bit count is derived from the highest set bit.
    pub fn decode_to_bitmap(&self, desc: Descriptor) -> (Vec<Word>, usize) {
        match desc.kind() {
            DescriptorKind::Complex { index } | DescriptorKind::ComplexArray { index } => {
                let bitmap = self.complex_bitmap(index);
                let numbits = bitmap.len() * BITS_IN_WORD;
                (bitmap, numbits)
            }
            kind => decode_inline(kind)
        }
    }

    /// Calls `f` with the word index of every reference slot of an object.
    pub fn visit_object_ref_slots<F: FnMut(usize)>(
        &self,
        desc: Descriptor,
        object_size: ByteSize,
        mut f: F
    ) {
        let n_words = object_size >> LOG_POINTER_SIZE;
        match desc.kind() {
            DescriptorKind::RunLength { offset, count, .. } => {
                for i in offset as usize..(offset as usize + count as usize) {
                    f(i);
                }
            }
            DescriptorKind::SmallBitmap { bits, .. } | DescriptorKind::LargeBitmap { bits } => {
                visit_bits(&[bits], OBJECT_HEADER_WORDS, n_words, &mut f);
            }
            DescriptorKind::Complex { index } => {
                let bitmap = self.complex_bitmap(index);
                visit_bits(&bitmap, 0, n_words, &mut f);
            }
            DescriptorKind::ComplexPtrFree | DescriptorKind::String => {}
            kind @ DescriptorKind::Vector { .. } | kind @ DescriptorKind::ComplexArray { .. } => {
                panic!("array descriptor {:?} used to scan a plain object", kind)
            }
        }
    }

    /// Calls `f` with the word index (from the array start) of every reference slot of
    /// an array of `len` elements whose data starts at word `data_offset`.
    /// `elem_size` is only consulted for complex arrays, which do not encode it.
    pub fn visit_array_ref_slots<F: FnMut(usize)>(
        &self,
        desc: Descriptor,
        data_offset: usize,
        elem_size: ByteSize,
        len: usize,
        mut f: F
    ) {
        match desc.kind() {
            DescriptorKind::Vector { elem_size, layout, .. } => {
                let elem_words = elem_size >> LOG_POINTER_SIZE;
                match layout {
                    VectorLayout::PtrFree => {}
                    VectorLayout::Refs => {
                        for i in 0..len * elem_words {
                            f(data_offset + i);
                        }
                    }
                    VectorLayout::Bitmap { bits } => {
                        for e in 0..len {
                            visit_bits(&[bits], data_offset + e * elem_words, usize::max_value(), &mut f);
                        }
                    }
                }
            }
            DescriptorKind::ComplexArray { index } => {
                let bitmap = self.complex_bitmap(index);
                let elem_words = elem_size >> LOG_POINTER_SIZE;
                for e in 0..len {
                    visit_bits(&bitmap, data_offset + e * elem_words, usize::max_value(), &mut f);
                }
            }
            DescriptorKind::ComplexPtrFree | DescriptorKind::String => {}
            kind => panic!("object descriptor {:?} used to scan an array", kind)
        }
    }

    /// Calls `f` with the word index of every reference slot of a precisely described
    /// root range. Conservative and user roots are not described by a bitmap and are
    /// left to the caller (pin staging and `user_root_marker()` respectively).
    pub fn visit_root_ref_slots<F: FnMut(usize)>(&self, desc: RootDescriptor, mut f: F) {
        match desc.kind() {
            RootDescriptorKind::Bitmap { bits } => {
                visit_bits(&[bits], 0, usize::max_value(), &mut f);
            }
            RootDescriptorKind::Complex { index } => {
                let bitmap = self.complex_bitmap(index);
                visit_bits(&bitmap, 0, usize::max_value(), &mut f);
            }
            RootDescriptorKind::Conservative | RootDescriptorKind::User { .. } => {}
        }
    }
}

/// calls f(base + i) for every set bit i of `bitmap` with base + i < limit
fn visit_bits<F: FnMut(usize)>(bitmap: &[Word], base: usize, limit: usize, f: &mut F) {
    for (w, &word) in bitmap.iter().enumerate() {
        let mut bits = word;
        while bits != 0 {
            let bit = bits.trailing_zeros() as usize;
            let slot = base + w * BITS_IN_WORD + bit;
            if slot >= limit {
                return;
            }
            f(slot);
            bits &= bits - 1;
        }
    }
}

impl fmt::Debug for DescriptorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let tables = self.gc_lock.lock().unwrap();
        write!(
            f,
            "DescriptorBuilder {{ complex words: {}, user markers: {} }}",
            tables.complex.len_words(),
            tables.user_markers.len()
        )
    }
}
