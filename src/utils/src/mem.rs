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

use memmap;
use memsec;

use Address;
use ByteSize;

/// zeroes `size` bytes from `start`
pub unsafe fn memzero(start: Address, size: ByteSize) {
    if size != 0 {
        memsec::memzero(start.to_ptr_mut::<u8>(), size);
    }
}

/// copies `size` bytes from `from` to `to`; the two ranges must not overlap
pub unsafe fn memcpy(to: Address, from: Address, size: ByteSize) {
    ::std::ptr::copy_nonoverlapping(from.to_ptr::<u8>(), to.to_ptr_mut::<u8>(), size);
}

/// maps `size` bytes of zeroed anonymous memory
pub fn mmap_anon(size: ByteSize) -> memmap::MmapMut {
    match memmap::MmapMut::map_anon(size) {
        Ok(m) => m,
        Err(e) => panic!("failed to mmap {} bytes: {}", size, e)
    }
}
