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

use std::cmp::Ordering;
use std::fmt;
use std::ops::*;

use ByteSize;

/// Address represents an arbitrary address. This is designed to represent
/// address and do address arithmetic mostly in a safe way, and to allow
/// mark some operations as unsafe. This type needs to be zero overhead
/// (memory wise and time wise). The idea is from the paper
/// High-level Low-level Programming (VEE09) and JikesRVM.
#[repr(C)]
#[derive(Copy, Clone, Eq, Hash)]
pub struct Address(usize);

/// Address + ByteSize (positive)
impl Add<ByteSize> for Address {
    type Output = Address;
    #[inline(always)]
    fn add(self, offset: ByteSize) -> Address {
        Address(self.0 + offset)
    }
}

/// Address += ByteSize (positive)
impl AddAssign<ByteSize> for Address {
    #[inline(always)]
    fn add_assign(&mut self, offset: ByteSize) {
        self.0 += offset;
    }
}

/// Address - Address (the first address must be higher)
impl Sub<Address> for Address {
    type Output = ByteSize;
    #[inline(always)]
    fn sub(self, other: Address) -> ByteSize {
        debug_assert!(
            self.0 >= other.0,
            "for (addr_a - addr_b), a({}) needs to be larger than b({})",
            self,
            other
        );
        self.0 - other.0
    }
}

/// Address - ByteSize (positive)
impl Sub<ByteSize> for Address {
    type Output = Address;
    #[inline(always)]
    fn sub(self, offset: ByteSize) -> Address {
        Address(self.0 - offset)
    }
}

impl PartialOrd for Address {
    #[inline(always)]
    fn partial_cmp(&self, other: &Address) -> Option<Ordering> {
        Some(self.0.cmp(&other.0))
    }
}

impl Ord for Address {
    #[inline(always)]
    fn cmp(&self, other: &Address) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialEq for Address {
    #[inline(always)]
    fn eq(&self, other: &Address) -> bool {
        self.0 == other.0
    }
}

impl Address {
    /// creates Address from a mutable pointer
    #[inline(always)]
    pub fn from_mut_ptr<T>(ptr: *mut T) -> Address {
        Address(ptr as usize)
    }
    /// creates Address from a raw usize. Address values come from conservative
    /// scans and descriptor tables, so any usize is accepted
    #[inline(always)]
    pub fn from_usize(raw: usize) -> Address {
        Address(raw)
    }
    /// creates a null Address
    /// It is unsafe and the user needs to be aware that they are creating an invalid address.
    /// The zero address should only be used as unininitialized or sentinel values.
    #[inline(always)]
    pub unsafe fn zero() -> Address {
        Address(0)
    }
    /// is this address zero?
    #[inline(always)]
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
    /// aligns up the address to the given alignment
    #[inline(always)]
    pub fn align_up(self, align: ByteSize) -> Address {
        Address((self.0 + align - 1) & !(align - 1))
    }
    /// aligns down the address to the given alignment
    #[inline(always)]
    pub fn align_down(self, align: ByteSize) -> Address {
        Address(self.0 & !(align - 1))
    }
    /// is this address aligned to the given alignment
    #[inline(always)]
    pub fn is_aligned_to(self, align: ByteSize) -> bool {
        self.0 % align == 0
    }
    /// converts the Address to a pointer
    #[inline(always)]
    pub fn to_ptr<T>(self) -> *const T {
        self.0 as *const T
    }
    /// converts the Address to a mutable pointer
    #[inline(always)]
    pub fn to_ptr_mut<T>(self) -> *mut T {
        self.0 as *mut T
    }
    /// converts the Address to a usize
    #[inline(always)]
    pub fn as_usize(self) -> usize {
        self.0
    }
    /// loads a value of type T from the address
    #[inline(always)]
    pub unsafe fn load<T: Copy>(self) -> T {
        *(self.0 as *mut T)
    }
    /// stores a value of type T to the address
    #[inline(always)]
    pub unsafe fn store<T>(self, value: T) {
        *(self.0 as *mut T) = value;
    }
    /// fills the memory from this address with the given byte value
    #[inline(always)]
    pub unsafe fn memset(self, char: u8, length: usize) {
        let p = self.to_ptr_mut::<u8>();
        ::std::ptr::write_bytes(p, char, length);
    }
    /// is this address within [start, end)
    #[inline(always)]
    pub fn is_in_range(self, start: Address, end: Address) -> bool {
        self >= start && self < end
    }
    /// converts the Address to an ObjectReference
    /// This is unsafe as the address may not point to an object.
    #[inline(always)]
    pub unsafe fn to_object_reference(self) -> ObjectReference {
        ObjectReference(self.0)
    }
}

impl fmt::UpperHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:X}", self.0)
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// ObjectReference represents address for an object. Its value
/// is the start of the object in this collector (no header offset).
#[repr(C)]
#[derive(Copy, Clone, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct ObjectReference(usize);

impl ObjectReference {
    /// converts ObjectReference to an Address
    #[inline(always)]
    pub fn to_address(self) -> Address {
        Address(self.0)
    }
    /// gets the raw value of the ObjectReference
    #[inline(always)]
    pub fn value(self) -> usize {
        self.0
    }
}

impl fmt::UpperHex for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:X}", self.0)
    }
}

impl fmt::LowerHex for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl fmt::Debug for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align() {
        let a = Address::from_usize(0x1001);
        assert_eq!(a.align_up(8), Address::from_usize(0x1008));
        assert_eq!(a.align_down(8), Address::from_usize(0x1000));
        assert_eq!(a.align_up(512), Address::from_usize(0x1200));
        assert!(Address::from_usize(0x1200).is_aligned_to(512));
    }

    #[test]
    fn test_arith() {
        let a = Address::from_usize(0x1000);
        let b = a + 0x20;
        assert_eq!(b - a, 0x20);
        assert!(b.is_in_range(a, a + 0x40));
        assert!(!(a + 0x40).is_in_range(a, a + 0x40));
    }
}
