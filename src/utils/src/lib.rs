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

//! # Utility crate that serves the nursery collector
//!
//! It includes:
//!
//! * Address/ObjectReference type
//! * size and word type aliases
//! * utility functions for
//!   * memory
//!   * mathematics (alignment)
//!   * bit operations on words and word slices
//! * conditional logging macros

pub extern crate memmap;
pub extern crate memsec;

// these type aliases make source code easier to read

/// size in bits
pub type BitSize    = usize;
/// size in bytes
pub type ByteSize   = usize;
/// word value
pub type Word       = usize;

/// We only support 64 bits architecture. Descriptor layouts (bit widths and shifts)
/// are defined for 64-bit words.
#[cfg(target_pointer_width = "64")]
pub const LOG_POINTER_SIZE : usize = 3;

/// pointer size in byte
pub const POINTER_SIZE     : ByteSize = 1 << LOG_POINTER_SIZE;
/// word size in byte
pub const WORD_SIZE        : ByteSize = 1 << LOG_POINTER_SIZE;
/// bits in a word
pub const BITS_IN_WORD     : BitSize  = WORD_SIZE * 8;
/// log2 of bits in a word
pub const LOG_BITS_IN_WORD : usize    = LOG_POINTER_SIZE + 3;

/// mem module:
/// * zeroing and copying raw memory
/// * re-export memmap and memsec crate
pub mod mem;

/// mathematics utilities
pub mod math;

mod address;
/// Address represents an arbitrary memory address (valid or not)
pub use address::Address;
/// ObjectReference is a reference to an object (the address is guaranteed to be valid with an object)
pub use address::ObjectReference;

/// bit operations
pub mod bit_utils;

/// print trace!() log if condition is true (the condition should be a constant boolean)
#[macro_export]
macro_rules! trace_if {
    ($cond: expr, $($arg:tt)*) => {
        if $cond {
            trace!($($arg)*)
        }
    }
}
