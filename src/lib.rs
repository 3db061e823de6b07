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

//! # A generational nursery collector
//!
//! This crate implements the young generation of a moving collector:
//!
//! * descriptors: one word (or a side table entry) telling the collector where
//!   the references of an object, array or root range are
//! * pinning: the queue of addresses that must not move in a collection, and
//!   cementing of objects that get pinned over and over
//! * a split nursery: the mutator allocates below a promotion barrier, survivors
//!   are copied once above it and promoted to the major heap on their next
//!   survival
//!
//! The major heap, root enumeration and object forwarding belong to the
//! embedding runtime, which drives a cycle through `NurseryGC`.

#[macro_use]
extern crate utils;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;
extern crate crossbeam;
extern crate stderrlog;

use std::error;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use utils::*;

pub mod common;
pub mod objectmodel;
pub mod heap;

use common::AddressBitmap;
use common::SIZE_1KB;
use common::SIZE_1MB;
use objectmodel::descriptor::DescriptorBuilder;
use heap::gc::MinorCollection;
use heap::nursery::*;
use heap::pinning::*;

pub use heap::MajorHeap;
pub use heap::gc::{Evacuation, EvacuationRequest};

pub const DEFAULT_NURSERY_SIZE: ByteSize = 4 * SIZE_1MB;
pub const MIN_NURSERY_SIZE: ByteSize = 64 * SIZE_1KB;

/// Parameters of a nursery collector
#[derive(Clone, Debug, PartialEq)]
pub struct GCConfig {
    pub nursery_size: ByteSize,
    pub cement_enabled: bool,
    /// number of workers `MinorCollection::evacuate_all()` spreads evacuation over
    pub n_gcthreads: usize
}

impl Default for GCConfig {
    fn default() -> GCConfig {
        GCConfig {
            nursery_size: DEFAULT_NURSERY_SIZE,
            cement_enabled: true,
            n_gcthreads: 1
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ConfigError {
    UnknownOption(String),
    InvalidSize(String),
    InvalidThreads(String),
    NurseryTooSmall(ByteSize)
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ConfigError::UnknownOption(ref opt) => write!(f, "unknown gc option '{}'", opt),
            ConfigError::InvalidSize(ref s) => write!(f, "'{}' is not a valid size", s),
            ConfigError::InvalidThreads(ref s) => {
                write!(f, "'{}' is not a valid number of gc threads", s)
            }
            ConfigError::NurseryTooSmall(size) => write!(
                f,
                "nursery size {} is below the minimum of {} bytes",
                size,
                MIN_NURSERY_SIZE
            )
        }
    }
}

impl error::Error for ConfigError {}

impl GCConfig {
    /// Parses a comma separated option string such as
    /// `nursery-size=1m,no-cementing,gc-threads=4`. Options not given keep their
    /// default.
    pub fn parse_params(params: &str) -> Result<GCConfig, ConfigError> {
        let mut config = GCConfig::default();

        for opt in params.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()) {
            if opt == "cementing" {
                config.cement_enabled = true;
            } else if opt == "no-cementing" {
                config.cement_enabled = false;
            } else if opt.starts_with("nursery-size=") {
                let value = &opt["nursery-size=".len()..];
                let size = parse_size(value)?;
                if size < MIN_NURSERY_SIZE {
                    return Err(ConfigError::NurseryTooSmall(size));
                }
                config.nursery_size = size;
            } else if opt.starts_with("gc-threads=") {
                let value = &opt["gc-threads=".len()..];
                config.n_gcthreads = match value.parse::<usize>() {
                    Ok(n) if n > 0 => n,
                    _ => return Err(ConfigError::InvalidThreads(value.to_string()))
                };
            } else {
                return Err(ConfigError::UnknownOption(opt.to_string()));
            }
        }

        Ok(config)
    }

    /// nursery size rounded up to whole to-space granules
    pub fn nursery_size_in_granules(&self) -> ByteSize {
        math::align_up(self.nursery_size, TO_SPACE_GRANULE_IN_BYTES)
    }
}

/// a number with an optional k, m or g suffix
fn parse_size(s: &str) -> Result<ByteSize, ConfigError> {
    let invalid = || ConfigError::InvalidSize(s.to_string());

    let (digits, shift) = match s.chars().last() {
        Some('k') | Some('K') => (&s[..s.len() - 1], 10),
        Some('m') | Some('M') => (&s[..s.len() - 1], 20),
        Some('g') | Some('G') => (&s[..s.len() - 1], 30),
        Some(_) => (s, 0),
        None => return Err(invalid())
    };
    let n = digits.parse::<ByteSize>().map_err(|_| invalid())?;
    n.checked_mul(1 << shift).ok_or_else(invalid)
}

/// One nursery and the state that outlives its collection cycles.
///
/// The nursery bounds can be queried at any time. `alloc()`, `stage_pin()` and
/// the concurrent cementing hooks belong to the mutator side and panic while a
/// `MinorCollection` is alive.
pub struct NurseryGC {
    config: GCConfig,
    nursery_mem: memmap::MmapMut,
    start: Address,
    end: Address,
    promotion_barrier: Address,

    descriptors: DescriptorBuilder,
    pin_queue: Mutex<PinQueue>,
    cement: CementTable,
    nursery: Mutex<SplitNursery>,
    to_space: Mutex<AddressBitmap>,

    gc_count: AtomicUsize,
    collecting: AtomicBool
}

impl NurseryGC {
    pub fn new(config: GCConfig) -> NurseryGC {
        let cement = CementTable::new(config.cement_enabled);
        NurseryGC::with_cement_table(config, cement)
    }

    pub fn with_cement_listener(config: GCConfig, listener: Box<dyn CementListener>) -> NurseryGC {
        let cement = CementTable::with_listener(config.cement_enabled, listener);
        NurseryGC::with_cement_table(config, cement)
    }

    fn with_cement_table(config: GCConfig, cement: CementTable) -> NurseryGC {
        let size = config.nursery_size_in_granules();
        assert!(
            size >= MIN_NURSERY_SIZE,
            "nursery size {} is below the minimum of {} bytes",
            size,
            MIN_NURSERY_SIZE
        );

        // one extra granule so the nursery can start on a granule boundary
        let mut nursery_mem = mem::mmap_anon(size + TO_SPACE_GRANULE_IN_BYTES);
        let start = Address::from_mut_ptr(nursery_mem.as_mut_ptr()).align_up(TO_SPACE_GRANULE_IN_BYTES);
        let end = start + size;

        let mut nursery = SplitNursery::new(start, end);
        nursery.init_nursery();
        let promotion_barrier = nursery.promotion_barrier();

        let mut pin_queue = PinQueue::new();
        pin_queue.init();

        info!(
            "nursery {}-{} ({} bytes), cementing {}, {} gc threads",
            start,
            end,
            size,
            if config.cement_enabled { "on" } else { "off" },
            config.n_gcthreads
        );

        NurseryGC {
            config: config,
            nursery_mem: nursery_mem,
            start: start,
            end: end,
            promotion_barrier: promotion_barrier,
            descriptors: DescriptorBuilder::new(),
            pin_queue: Mutex::new(pin_queue),
            cement: cement,
            nursery: Mutex::new(nursery),
            to_space: Mutex::new(AddressBitmap::new(start, end, TO_SPACE_GRANULE_BITS)),
            gc_count: AtomicUsize::new(0),
            collecting: AtomicBool::new(false)
        }
    }

    pub fn config(&self) -> &GCConfig {
        &self.config
    }

    pub fn descriptors(&self) -> &DescriptorBuilder {
        &self.descriptors
    }

    pub fn cement(&self) -> &CementTable {
        &self.cement
    }

    #[inline(always)]
    pub fn nursery_start(&self) -> Address {
        self.start
    }

    #[inline(always)]
    pub fn nursery_end(&self) -> Address {
        self.end
    }

    #[inline(always)]
    pub fn promotion_barrier(&self) -> Address {
        self.promotion_barrier
    }

    #[inline(always)]
    pub fn ptr_in_nursery(&self, addr: Address) -> bool {
        addr.is_in_range(self.start, self.end)
    }

    /// is a minor collection in progress
    pub fn is_collecting(&self) -> bool {
        self.collecting.load(Ordering::SeqCst)
    }

    fn assert_not_collecting(&self, what: &str) {
        assert!(!self.is_collecting(), "{} during a minor collection", what);
    }

    /// allocates `size` bytes of zeroed memory below the promotion barrier
    pub fn alloc(&self, size: ByteSize) -> Option<Address> {
        self.assert_not_collecting("alloc()");
        self.nursery.lock().unwrap().mutator_alloc(size)
    }

    /// stages an address found by root scanning
    pub fn stage_pin(&self, addr: Address) {
        self.assert_not_collecting("stage_pin()");
        self.pin_queue.lock().unwrap().stage(addr);
    }

    /// Starts a minor collection with the pins staged so far. `find_object_start`
    /// resolves a staged address to the start of the nursery object it points into.
    pub fn start_minor_collection<'a, F>(&'a self, find_object_start: F) -> MinorCollection<'a>
    where
        F: Fn(Address) -> Option<Address>
    {
        self.assert_not_collecting("start_minor_collection()");
        MinorCollection::start(
            self.pin_queue.lock().unwrap(),
            self.nursery.lock().unwrap(),
            self.to_space.lock().unwrap(),
            &self.cement,
            &self.gc_count,
            &self.collecting,
            self.config.n_gcthreads,
            find_object_start
        )
    }

    /// a concurrent major collection starts: cemented objects stay pinned until it finishes
    pub fn concurrent_major_start(&self) {
        self.assert_not_collecting("concurrent_major_start()");
        self.cement.concurrent_start();
    }

    /// Commits the cementing recorded during the concurrent major collection. The
    /// objects that were cemented when it started are staged for the next minor
    /// collection.
    pub fn concurrent_major_finish(&self) {
        self.assert_not_collecting("concurrent_major_finish()");
        let mut pin_queue = self.pin_queue.lock().unwrap();
        self.cement.concurrent_finish(&mut pin_queue);
    }

    /// number of finished minor collections
    pub fn gc_count(&self) -> usize {
        self.gc_count.load(Ordering::SeqCst)
    }

    pub fn last_num_pinned(&self) -> usize {
        self.assert_not_collecting("last_num_pinned()");
        self.pin_queue.lock().unwrap().last_num_pinned()
    }
}

impl fmt::Debug for NurseryGC {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "NurseryGC")?;
        writeln!(
            f,
            "nursery: {}-{} ({} bytes mapped), barrier {}",
            self.start,
            self.end,
            self.nursery_mem.len(),
            self.promotion_barrier
        )?;
        match self.nursery.try_lock() {
            Ok(nursery) => writeln!(
                f,
                "state {:?}, free: {} bytes mutator, {} bytes collector",
                nursery.state(),
                nursery.mutator_allocator().total_free(),
                nursery.collector_allocator().total_free()
            )?,
            Err(_) => writeln!(f, "nursery is being collected")?
        }
        writeln!(
            f,
            "{} collections, {} cemented objects",
            self.gc_count(),
            self.cement.cemented_count()
        )?;
        write!(f, "{:?}", self.descriptors)
    }
}

lazy_static! {
    pub static ref MY_GC: RwLock<Option<NurseryGC>> = RwLock::new(None);
}

/// creates the process wide collector
pub fn gc_init(config: GCConfig) {
    let gc = NurseryGC::new(config);
    *MY_GC.write().unwrap() = Some(gc);
}

/// drops the process wide collector
pub fn gc_destroy() {
    *MY_GC.write().unwrap() = None;
}

pub fn gc_stats() {
    match *MY_GC.read().unwrap() {
        Some(ref gc) => info!("{:?}", gc),
        None => warn!("gc_stats() called before gc_init()")
    }
}

pub fn start_logging(level: log::Level) {
    let verbosity = match level {
        log::Level::Error => 0,
        log::Level::Warn => 1,
        log::Level::Info => 2,
        log::Level::Debug => 3,
        log::Level::Trace => 4
    };

    match stderrlog::new().verbosity(verbosity).init() {
        Ok(()) => info!("logger initialized"),
        Err(e) => debug!("failed to init logger, probably already initialized: {:?}", e)
    }
}

pub fn start_logging_trace() {
    start_logging(log::Level::Trace)
}
