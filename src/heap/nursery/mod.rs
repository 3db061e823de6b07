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

mod fragment;
mod split_nursery;

pub use heap::nursery::fragment::*;
pub use heap::nursery::split_nursery::*;

/// to-space membership is tracked per granule
pub const TO_SPACE_GRANULE_BITS: usize = 9;
pub const TO_SPACE_GRANULE_IN_BYTES: ByteSize = 1 << TO_SPACE_GRANULE_BITS;

/// free ranges smaller than this are not worth a fragment
pub const MAX_NURSERY_WASTE: ByteSize = 512;
