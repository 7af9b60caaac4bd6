//! A fixed-arena binary-buddy allocator.
//!
//! A [`BuddyPool`] owns a region of `2^MAX_ORDER` bytes, divided into pages of
//! `2^MIN_ORDER` bytes. Requests are rounded up to the nearest power-of-two
//! block size (never smaller than one page) and served from per-order free
//! lists. Larger blocks are split on demand and freed blocks are coalesced
//! with their buddies as soon as both halves are free.
//!
//! Allocator metadata lives in a page table allocated alongside the arena;
//! the allocator never reads or writes the bytes it hands out.
//!
//! ## Characteristics
//!
//! #### Time complexity
//!
//! | Operation                | Best-case | Worst-case                 |
//! |--------------------------|-----------|----------------------------|
//! | Allocate                 | O(1)      | O(MAX_ORDER - MIN_ORDER)   |
//! | Free                     | O(1)      | O(MAX_ORDER - MIN_ORDER)   |
//! | Dump                     | O(levels) | O(levels)                  |
//!
//! #### Fragmentation
//!
//! Buddy allocators exhibit limited external fragmentation, but suffer up to
//! 50% internal fragmentation because all allocatable blocks have a size that
//! is a power of two.
//!
//! ## Example
//!
//! ```
//! use buddy_pool::{AllocError, DefaultBuddyPool};
//!
//! // A 1 MiB arena with 4 KiB pages.
//! let mut pool = DefaultBuddyPool::try_new().unwrap();
//!
//! let block = pool.allocate(80 * 1024).unwrap();
//! assert_eq!(block.len(), 128 * 1024);
//!
//! pool.free(block.cast()).unwrap();
//! assert_eq!(
//!     pool.free(block.cast()),
//!     Err(AllocError::DoubleFreeOrInvalidAddress)
//! );
//!
//! // Everything coalesced back into one arena-sized block.
//! assert_eq!(pool.dump().free_blocks(20), Some(1));
//! ```

#![doc(html_root_url = "https://docs.rs/buddy_pool/0.1.0")]
#![warn(missing_debug_implementations)]
#![warn(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]
#![cfg_attr(not(feature = "std"), no_std)]
#![cfg_attr(docs_rs, feature(doc_cfg))]

extern crate alloc;

// Without the `log` feature, logging statements compile to nothing.
#[cfg(not(feature = "log"))]
macro_rules! warn {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
macro_rules! debug {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
macro_rules! trace {
    ($($arg:tt)*) => {};
}

mod base;
pub mod buddy;
pub mod dump;
mod free_list;
mod page;
mod polyfill;


use core::{alloc::Layout, fmt, ptr::NonNull};

#[cfg(feature = "std")]
pub use crate::buddy::MutexBuddyPool;
pub use crate::{
    buddy::{BuddyPool, DefaultBuddyPool, DEFAULT_MAX_ORDER, DEFAULT_MIN_ORDER},
    dump::{OrderStat, PoolDump},
};

/// The error type for pool operations.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AllocError {
    /// The requested size was zero.
    InvalidSize,

    /// The requested size exceeds the capacity of the arena.
    OutOfRange,

    /// No free block is large enough to satisfy the request.
    ///
    /// This condition is transient: the same request may succeed once other
    /// blocks have been freed.
    OutOfMemory,

    /// The freed address does not denote a currently allocated block.
    ///
    /// This covers addresses outside the arena, addresses that do not start a
    /// block, and blocks which have already been freed.
    DoubleFreeOrInvalidAddress,
}

impl AllocError {
    /// Returns `true` if retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, AllocError::OutOfMemory)
    }
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            AllocError::InvalidSize => "allocation size must be nonzero",
            AllocError::OutOfRange => "allocation size exceeds the arena capacity",
            AllocError::OutOfMemory => "no free block large enough for the allocation",
            AllocError::DoubleFreeOrInvalidAddress => {
                "freed address is not a currently allocated block"
            }
        };

        f.write_str(msg)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for AllocError {}

/// The error type for pool constructors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AllocInitError {
    /// A necessary allocation failed.
    ///
    /// This variant is returned when a constructor attempts to allocate the
    /// managed region, but the underlying allocator fails.
    ///
    /// The variant contains the [`Layout`] that could not be allocated.
    AllocFailed(Layout),

    /// The configuration of the pool is invalid.
    ///
    /// This variant is returned when `MIN_ORDER > MAX_ORDER`, when the arena
    /// size cannot be described by a [`Layout`], or when a raw region is not
    /// aligned to the page size.
    InvalidConfig,

    /// The location of the region is invalid.
    ///
    /// This variant is returned when the end of the managed region would
    /// overflow the address space.
    InvalidLocation,
}

impl fmt::Display for AllocInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocInitError::AllocFailed(layout) => write!(
                f,
                "failed to allocate region of {} bytes aligned to {}",
                layout.size(),
                layout.align()
            ),
            AllocInitError::InvalidConfig => f.write_str("invalid pool configuration"),
            AllocInitError::InvalidLocation => {
                f.write_str("region end overflows the address space")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for AllocInitError {}

/// Types which provide memory which backs a pool.
///
/// This trait is sealed, and is implemented by the following types:
/// - The `Raw` marker type indicates that a pool is not backed by another
///   allocator. This is the case when constructing the pool from a raw
///   pointer. The region can be reclaimed with `.into_raw_parts()`.
/// - The `Global` marker type indicates that a pool is backed by the global
///   allocator. The pool will free its arena on drop.
pub trait BackingAllocator: Sealed {
    /// Deallocates the memory referenced by `ptr`.
    ///
    /// # Safety
    ///
    /// * `ptr` must denote a block of memory currently allocated via this
    ///   allocator, and
    /// * `layout` must fit that block of memory.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// A marker type indicating that a pool is backed by a raw region.
#[derive(Clone, Debug)]
pub struct Raw;
impl Sealed for Raw {}
impl BackingAllocator for Raw {
    unsafe fn deallocate(&self, _: NonNull<u8>, _: Layout) {}
}

/// The global memory allocator.
#[derive(Clone, Debug)]
pub struct Global;
impl Sealed for Global {}
impl BackingAllocator for Global {
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { alloc::alloc::dealloc(ptr.as_ptr(), layout) };
    }
}

#[doc(hidden)]
mod private {
    pub trait Sealed {}
}
use private::Sealed;
