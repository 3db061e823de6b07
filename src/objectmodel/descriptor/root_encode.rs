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

pub const ROOT_DESC_TYPE_SHIFT: usize = 3;
pub const ROOT_DESC_TYPE_MASK: Word = (1 << ROOT_DESC_TYPE_SHIFT) - 1;

pub const ROOT_DESC_CONSERVATIVE: Word = 0;
pub const ROOT_DESC_BITMAP: Word = 1;
pub const ROOT_DESC_RUN_LEN: Word = 2;
pub const ROOT_DESC_COMPLEX: Word = 3;
pub const ROOT_DESC_USER: Word = 4;

/// bits of a bitmap root descriptor
pub const ROOT_BITMAP_SIZE: usize = BITS_IN_WORD - ROOT_DESC_TYPE_SHIFT;
pub const MAX_USER_DESCRIPTORS: usize = 16;

/// An encoded root descriptor word
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct RootDescriptor(Word);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RootDescriptorKind {
    /// the range is scanned conservatively
    Conservative,
    /// bit i is word i of the root range
    Bitmap { bits: Word },
    Complex { index: usize },
    /// index into the user mark function table
    User { index: usize }
}

impl RootDescriptor {
    #[inline(always)]
    pub fn from_raw(raw: Word) -> RootDescriptor {
        RootDescriptor(raw)
    }

    #[inline(always)]
    pub fn raw(self) -> Word {
        self.0
    }

    pub fn conservative() -> RootDescriptor {
        RootDescriptor(ROOT_DESC_CONSERVATIVE)
    }

    pub fn kind(self) -> RootDescriptorKind {
        let payload = self.0 >> ROOT_DESC_TYPE_SHIFT;
        match self.0 & ROOT_DESC_TYPE_MASK {
            ROOT_DESC_CONSERVATIVE => RootDescriptorKind::Conservative,
            ROOT_DESC_BITMAP => RootDescriptorKind::Bitmap { bits: payload },
            ROOT_DESC_COMPLEX => RootDescriptorKind::Complex { index: payload },
            ROOT_DESC_USER => RootDescriptorKind::User { index: payload },
            ROOT_DESC_RUN_LEN => panic!("run length root descriptors are not produced"),
            _ => panic!("unknown root descriptor tag in {:#x}", self.0)
        }
    }
}

impl RootDescriptorKind {
    pub fn encode(self) -> RootDescriptor {
        let raw = match self {
            RootDescriptorKind::Conservative => ROOT_DESC_CONSERVATIVE,
            RootDescriptorKind::Bitmap { bits } => {
                debug_assert!(bits >> ROOT_BITMAP_SIZE == 0);
                ROOT_DESC_BITMAP | (bits << ROOT_DESC_TYPE_SHIFT)
            }
            RootDescriptorKind::Complex { index } => {
                ROOT_DESC_COMPLEX | (index << ROOT_DESC_TYPE_SHIFT)
            }
            RootDescriptorKind::User { index } => {
                debug_assert!(index < MAX_USER_DESCRIPTORS);
                ROOT_DESC_USER | (index << ROOT_DESC_TYPE_SHIFT)
            }
        };
        RootDescriptor(raw)
    }
}

impl fmt::Debug for RootDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x} ({:?})", self.0, self.kind())
    }
}

/// Bitmap roots that fit one descriptor word stay inline, longer ones go to the
/// complex table through `alloc_complex`.
pub fn encode_root_bitmap<F>(bitmap: &[Word], numbits: usize, mut alloc_complex: F) -> RootDescriptor
where
    F: FnMut(&[Word], usize) -> usize
{
    if numbits == 0 {
        return RootDescriptorKind::Bitmap { bits: 0 }.encode();
    }

    if numbits < ROOT_BITMAP_SIZE {
        let bits = bitmap[0] & ((1 << numbits) - 1);
        return RootDescriptorKind::Bitmap { bits: bits }.encode();
    }

    let index = alloc_complex(bitmap, numbits);
    RootDescriptorKind::Complex { index: index }.encode()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_root_bitmap() {
        let desc = encode_root_bitmap(&[0b1011], 4, |_, _| panic!("no complex"));
        assert_eq!(desc.raw(), ROOT_DESC_BITMAP | (0b1011 << 3));
        assert_eq!(desc.kind(), RootDescriptorKind::Bitmap { bits: 0b1011 });

        let empty = encode_root_bitmap(&[], 0, |_, _| panic!("no complex"));
        assert_eq!(empty.kind(), RootDescriptorKind::Bitmap { bits: 0 });
    }

    #[test]
    fn test_stray_bits_dropped() {
        let desc = encode_root_bitmap(&[0b1111_0001], 4, |_, _| panic!("no complex"));
        assert_eq!(desc.kind(), RootDescriptorKind::Bitmap { bits: 1 });
    }

    #[test]
    fn test_complex_root() {
        let bitmap = [!0, 1];
        let desc = encode_root_bitmap(&bitmap, 65, |bits, n| {
            assert_eq!(bits, &bitmap[..]);
            assert_eq!(n, 65);
            12
        });
        assert_eq!(desc.kind(), RootDescriptorKind::Complex { index: 12 });
    }

    #[test]
    fn test_user_and_conservative() {
        let user = RootDescriptorKind::User { index: 5 }.encode();
        assert_eq!(user.raw(), (5 << 3) | ROOT_DESC_USER);
        assert_eq!(user.kind(), RootDescriptorKind::User { index: 5 });
        assert_eq!(RootDescriptor::conservative().kind(), RootDescriptorKind::Conservative);
    }

    #[test]
    #[should_panic]
    fn test_bad_root_tag() {
        RootDescriptor::from_raw(ROOT_DESC_RUN_LEN).kind();
    }
}
