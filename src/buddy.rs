//! A binary-buddy pool allocator.
//!
//! The arena is tracked one page at a time: each page of the arena has a
//! descriptor in a page table, and the free blocks of each order are threaded
//! through those descriptors by index. Splitting and coalescing are iterative
//! and touch at most `MAX_ORDER - MIN_ORDER + 1` orders.

use alloc::{vec, vec::Vec};
use core::{alloc::Layout, cmp, fmt, ptr::NonNull};

#[cfg(feature = "std")]
use std::sync::{Mutex, MutexGuard, PoisonError};

#[cfg(feature = "log")]
use log::{debug, trace, warn};

use crate::{
    base::BasePtr,
    dump::{OrderStat, PoolDump},
    free_list::FreeList,
    page::{PageState, PageTable},
    polyfill::{NonNullStrict, UsizeExt},
    AllocError, AllocInitError, BackingAllocator, Global, Raw,
};

/// The default page order: 4 KiB pages.
pub const DEFAULT_MIN_ORDER: u32 = 12;

/// The default arena order: a 1 MiB arena.
pub const DEFAULT_MAX_ORDER: u32 = 20;

/// A pool with a 1 MiB arena and 4 KiB pages, backed by the global allocator.
pub type DefaultBuddyPool = BuddyPool<DEFAULT_MIN_ORDER, DEFAULT_MAX_ORDER, Global>;

/// A binary-buddy allocator over a fixed arena.
///
/// This takes two const parameters:
/// - `MIN_ORDER` is the base-2 logarithm of the page size, the smallest block
///   the pool hands out.
/// - `MAX_ORDER` is the base-2 logarithm of the arena size, which is also the
///   largest block the pool hands out.
///
/// These parameters are subject to the following invariants:
/// - `MIN_ORDER <= MAX_ORDER`.
/// - `MAX_ORDER < usize::BITS - 1`.
///
/// Constructing a `BuddyPool` whose const parameters violate these
/// invariants fails with [`AllocInitError::InvalidConfig`].
///
/// For example, the type of a pool managing 64 KiB in blocks of 256 bytes to
/// 64 KiB would be:
///
/// ```
/// use buddy_pool::{BuddyPool, Global};
///
/// //   page size == 1 << 8  == 256
/// // arena size  == 1 << 16 == 65536
/// type SmallPool = BuddyPool<8, 16, Global>;
/// # fn main() {
/// # let pool = SmallPool::try_new().unwrap();
/// # assert_eq!(pool.num_pages(), 256);
/// # }
/// ```
pub struct BuddyPool<const MIN_ORDER: u32, const MAX_ORDER: u32, A: BackingAllocator> {
    /// Pointer to the arena managed by this pool.
    base: BasePtr,
    /// The layout of the arena, as passed to the backing allocator.
    layout: Layout,
    /// One descriptor per page of the arena.
    pages: PageTable,
    /// Free lists indexed by `order - MIN_ORDER`.
    free_lists: Vec<FreeList>,
    backing_allocator: A,
}

impl<const MIN_ORDER: u32, const MAX_ORDER: u32> BuddyPool<MIN_ORDER, MAX_ORDER, Raw> {
    /// Constructs a new `BuddyPool` managing the region at `region`.
    ///
    /// # Errors
    ///
    /// Returns an error if the const parameters are invalid, if `region` is
    /// not aligned to the page size, or if the region would extend past the
    /// end of the address space.
    ///
    /// # Safety
    ///
    /// `region` must be a pointer to a region that satisfies the [`Layout`]
    /// returned by [`Self::region_layout()`], and it must be valid for reads
    /// and writes for the entire size indicated by that `Layout`. The region
    /// must not be accessed except through blocks allocated from the pool
    /// until the pool is dropped or decomposed with
    /// [`into_raw_parts()`](Self::into_raw_parts).
    pub unsafe fn new_raw(
        region: NonNull<u8>,
    ) -> Result<BuddyPool<MIN_ORDER, MAX_ORDER, Raw>, AllocInitError> {
        let layout = Self::region_layout()?;

        if NonNullStrict::addr(region).get() & (layout.align() - 1) != 0 {
            return Err(AllocInitError::InvalidConfig);
        }

        RawBuddyPool::<MIN_ORDER, MAX_ORDER>::try_new(region, layout)
            .map(|p| p.with_backing_allocator(Raw))
    }

    /// Decomposes the pool, returning the region it managed.
    ///
    /// Any blocks still allocated from the pool are left for the caller to
    /// reclaim along with the rest of the region.
    pub fn into_raw_parts(self) -> NonNull<u8> {
        self.base.ptr()
    }
}

impl<const MIN_ORDER: u32, const MAX_ORDER: u32> BuddyPool<MIN_ORDER, MAX_ORDER, Global> {
    /// Attempts to construct a new `BuddyPool` backed by the global allocator.
    ///
    /// The arena is allocated according to [`Self::region_layout()`] and is
    /// seeded as a single free block of order `MAX_ORDER`.
    ///
    /// # Errors
    ///
    /// Returns an error if the const parameters are invalid or if the arena
    /// could not be allocated.
    pub fn try_new() -> Result<BuddyPool<MIN_ORDER, MAX_ORDER, Global>, AllocInitError> {
        let layout = Self::region_layout()?;

        // SAFETY: `region_layout()` never returns a zero-sized layout.
        let raw = unsafe { alloc::alloc::alloc(layout) };
        let region = NonNull::new(raw).ok_or(AllocInitError::AllocFailed(layout))?;

        match RawBuddyPool::<MIN_ORDER, MAX_ORDER>::try_new(region, layout) {
            Ok(p) => Ok(p.with_backing_allocator(Global)),
            Err(e) => {
                // SAFETY: `region` was just allocated with `layout`.
                unsafe { alloc::alloc::dealloc(region.as_ptr(), layout) };
                Err(e)
            }
        }
    }
}

impl<const MIN_ORDER: u32, const MAX_ORDER: u32, A: BackingAllocator>
    BuddyPool<MIN_ORDER, MAX_ORDER, A>
{
    fn check_config() -> Result<(), AllocInitError> {
        if MIN_ORDER > MAX_ORDER || MAX_ORDER >= usize::BITS - 1 {
            return Err(AllocInitError::InvalidConfig);
        }

        Ok(())
    }

    /// Returns the layout requirements of the arena managed by a pool of this
    /// type.
    ///
    /// The arena is `2^MAX_ORDER` bytes, aligned to the page size.
    ///
    /// # Errors
    ///
    /// Returns an error if the const parameters are invalid.
    pub fn region_layout() -> Result<Layout, AllocInitError> {
        Self::check_config()?;

        Layout::from_size_align(1 << MAX_ORDER, 1 << MIN_ORDER)
            .map_err(|_| AllocInitError::InvalidConfig)
    }

    /// Returns the size of the arena in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        1 << MAX_ORDER
    }

    /// Returns the size of a page, the smallest block the pool hands out.
    #[inline]
    pub fn page_size(&self) -> usize {
        1 << MIN_ORDER
    }

    /// Returns the number of pages in the arena.
    #[inline]
    pub fn num_pages(&self) -> usize {
        self.pages.len()
    }

    #[inline]
    fn level(order: u32) -> usize {
        (order - MIN_ORDER) as usize
    }

    /// Reinitializes the pool to a single free block spanning the arena.
    ///
    /// # Safety
    ///
    /// Every block previously allocated from the pool is invalidated. The
    /// caller must ensure that:
    /// - No references to memory allocated by this pool exist when the method
    ///   is called.
    /// - Pointers to blocks allocated before the reset are no longer
    ///   dereferenced or passed to [`free()`](Self::free).
    pub unsafe fn reset(&mut self) {
        self.init();
    }

    fn init(&mut self) {
        self.pages.reset();
        for list in self.free_lists.iter_mut() {
            list.clear();
        }

        self.push_free(0, MAX_ORDER);
    }

    /// Returns the order of the smallest block that can hold `size` bytes.
    ///
    /// Requests smaller than a page are rounded up to a full page.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::InvalidSize`] if `size` is zero, or
    /// [`AllocError::OutOfRange`] if `size` exceeds the arena capacity.
    pub fn order_for(&self, size: usize) -> Result<u32, AllocError> {
        if size == 0 {
            return Err(AllocError::InvalidSize);
        }

        if size > self.capacity() {
            return Err(AllocError::OutOfRange);
        }

        // `size <= 2^MAX_ORDER`, so rounding up cannot overflow.
        Ok(cmp::max(size.next_power_of_two().log2(), MIN_ORDER))
    }

    /// Returns the smallest order no less than `order` that has a free block.
    fn find_fit(&self, order: u32) -> Option<u32> {
        (order..=MAX_ORDER).find(|&o| !self.free_lists[Self::level(o)].is_empty())
    }

    /// Marks the page at `index` as heading a free block of `order` and
    /// appends it to that order's free list.
    fn push_free(&mut self, index: usize, order: u32) {
        let level = Self::level(order);
        self.pages.set_state(index, PageState::Free(order));
        self.free_lists[level].push_back(&mut self.pages, index);
    }

    /// Attempts to allocate a block of at least `size` bytes.
    ///
    /// On success, returns a [`NonNull<[u8]>`] covering the entire block, whose
    /// length is the block size `2^order_for(size)`. The block is aligned to
    /// its own size relative to the start of the arena.
    ///
    /// The contents of the block are uninitialized.
    ///
    /// # Errors
    ///
    /// - [`AllocError::InvalidSize`] if `size` is zero.
    /// - [`AllocError::OutOfRange`] if `size` exceeds the arena capacity.
    /// - [`AllocError::OutOfMemory`] if no free block is large enough. The
    ///   pool is left unchanged.
    ///
    /// [`NonNull<[u8]>`]: NonNull
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<[u8]>, AllocError> {
        let target = self.order_for(size)?;

        // Find the fit before touching any list, so failure leaves no block
        // half split.
        let Some(fit) = self.find_fit(target) else {
            debug!(
                "buddy pool: no free block for {} bytes (order {})",
                size, target
            );
            return Err(AllocError::OutOfMemory);
        };

        let index = self.free_lists[Self::level(fit)]
            .pop_front(&mut self.pages)
            .ok_or(AllocError::OutOfMemory)?;

        // Split the block repeatedly to obtain a suitably sized block. The
        // lower half is kept, the upper half is freed one order down.
        for order in (target..fit).rev() {
            let upper = index + self.pages.pages_in(order);
            trace!(
                "buddy pool: split order-{} block at page {}, freeing page {}",
                order + 1,
                index,
                upper
            );
            self.push_free(upper, order);
        }

        self.pages.set_state(index, PageState::Allocated(target));

        let offset = self.pages.index_to_offset(index);
        Ok(self.base.with_offset_and_size(offset, 1 << target))
    }

    /// Returns the page index and order of the allocated block at `ptr`.
    fn allocated_block(&self, ptr: NonNull<u8>) -> Option<(usize, u32)> {
        let offset = self.base.offset_to(NonNullStrict::addr(ptr))?;
        let index = self.pages.offset_to_index(offset)?;

        match self.pages.state(index) {
            PageState::Allocated(order) => Some((index, order)),
            _ => None,
        }
    }

    /// Returns the order of the block at `ptr` if it is currently allocated.
    pub fn order_of(&self, ptr: NonNull<u8>) -> Option<u32> {
        self.allocated_block(ptr).map(|(_, order)| order)
    }

    /// Frees the block at `ptr`, coalescing it with its buddy for as long as
    /// the buddy is free.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::DoubleFreeOrInvalidAddress`] if `ptr` does not
    /// denote the start of a block currently allocated from this pool. The
    /// pool is left unchanged.
    pub fn free(&mut self, ptr: NonNull<u8>) -> Result<(), AllocError> {
        let Some((mut index, mut order)) = self.allocated_block(ptr) else {
            warn!(
                "buddy pool: rejected free of {:p}: not an allocated block",
                ptr.as_ptr()
            );
            return Err(AllocError::DoubleFreeOrInvalidAddress);
        };

        self.pages.set_state(index, PageState::Interior);

        while order < MAX_ORDER {
            let buddy = self.pages.buddy_index(index, order);
            if self.pages.state(buddy) != PageState::Free(order) {
                break;
            }

            trace!(
                "buddy pool: merge order-{} pages {} and {}",
                order,
                index,
                buddy
            );

            self.free_lists[Self::level(order)].remove(&mut self.pages, buddy);
            self.pages.set_state(buddy, PageState::Interior);

            index = cmp::min(index, buddy);
            order += 1;
        }

        self.push_free(index, order);

        Ok(())
    }

    /// Returns the number of free blocks at every order, smallest first.
    pub fn dump(&self) -> PoolDump {
        let orders = (MIN_ORDER..=MAX_ORDER)
            .map(|order| OrderStat {
                order,
                block_size: 1 << order,
                free_blocks: self.free_lists[Self::level(order)].len(),
            })
            .collect();

        PoolDump::new(orders)
    }

    /// Returns the total size in bytes of all free blocks.
    pub fn available_bytes(&self) -> usize {
        (MIN_ORDER..=MAX_ORDER)
            .map(|order| self.free_lists[Self::level(order)].len() << order)
            .sum()
    }

    /// Returns the total size in bytes of all allocated blocks.
    pub fn used_bytes(&self) -> usize {
        self.capacity() - self.available_bytes()
    }

    /// Checks that the free and allocated blocks tile the arena, that every
    /// free block is listed exactly once, and that no two free buddies of the
    /// same order remain unmerged.
    #[cfg(test)]
    pub(crate) fn is_consistent(&self) -> bool {
        let mut index = 0;
        let mut free_heads = 0;

        while index < self.pages.len() {
            let order = match self.pages.state(index) {
                PageState::Free(order) => {
                    free_heads += 1;

                    if order < MAX_ORDER {
                        let buddy = self.pages.buddy_index(index, order);
                        if self.pages.state(buddy) == PageState::Free(order) {
                            return false;
                        }
                    }

                    order
                }
                PageState::Allocated(order) => order,
                PageState::Interior => return false,
            };

            if !(MIN_ORDER..=MAX_ORDER).contains(&order) {
                return false;
            }

            let span = self.pages.pages_in(order);
            if index % span != 0 || index + span > self.pages.len() {
                return false;
            }

            if (index + 1..index + span).any(|i| self.pages.state(i) != PageState::Interior) {
                return false;
            }

            index += span;
        }

        let mut listed = 0;
        for order in MIN_ORDER..=MAX_ORDER {
            let list = &self.free_lists[Self::level(order)];
            let mut count = 0;

            for i in list.iter(&self.pages) {
                if self.pages.state(i) != PageState::Free(order) {
                    return false;
                }
                count += 1;
            }

            if count != list.len() {
                return false;
            }
            listed += count;
        }

        listed == free_heads
    }
}

impl<const MIN_ORDER: u32, const MAX_ORDER: u32, A: BackingAllocator> Drop
    for BuddyPool<MIN_ORDER, MAX_ORDER, A>
{
    fn drop(&mut self) {
        // SAFETY: `base` and `layout` describe the region handed to the pool
        // at construction, which came from `backing_allocator`.
        unsafe {
            self.backing_allocator
                .deallocate(self.base.ptr(), self.layout)
        };
    }
}

impl<const MIN_ORDER: u32, const MAX_ORDER: u32, A: BackingAllocator> fmt::Debug
    for BuddyPool<MIN_ORDER, MAX_ORDER, A>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuddyPool")
            .field("base", &self.base)
            .field("min_order", &MIN_ORDER)
            .field("max_order", &MAX_ORDER)
            .field("free", &self.dump())
            .finish()
    }
}

// SAFETY: The pool holds the only pointer to its arena that is not handed out
// as an allocated block, and the page table is owned. Moving the pool to
// another thread moves that ownership with it.
unsafe impl<const MIN_ORDER: u32, const MAX_ORDER: u32, A: BackingAllocator + Send> Send
    for BuddyPool<MIN_ORDER, MAX_ORDER, A>
{
}

/// Like a `BuddyPool`, but without a `Drop` impl or a backing allocator.
///
/// This assists in tacking on the allocator type parameter because this
/// struct can be moved out of, while `BuddyPool` itself cannot.
struct RawBuddyPool<const MIN_ORDER: u32, const MAX_ORDER: u32> {
    base: BasePtr,
    layout: Layout,
    pages: PageTable,
    free_lists: Vec<FreeList>,
}

impl<const MIN_ORDER: u32, const MAX_ORDER: u32> RawBuddyPool<MIN_ORDER, MAX_ORDER> {
    fn try_new(
        region: NonNull<u8>,
        layout: Layout,
    ) -> Result<RawBuddyPool<MIN_ORDER, MAX_ORDER>, AllocInitError> {
        let base = BasePtr::new(region, layout.size())?;
        let levels = (MAX_ORDER - MIN_ORDER + 1) as usize;

        Ok(RawBuddyPool {
            base,
            layout,
            pages: PageTable::new(MIN_ORDER, MAX_ORDER),
            free_lists: vec![FreeList::new(); levels],
        })
    }

    fn with_backing_allocator<A: BackingAllocator>(
        self,
        backing_allocator: A,
    ) -> BuddyPool<MIN_ORDER, MAX_ORDER, A> {
        let RawBuddyPool {
            base,
            layout,
            pages,
            free_lists,
        } = self;

        let mut pool = BuddyPool {
            base,
            layout,
            pages,
            free_lists,
            backing_allocator,
        };

        pool.init();
        pool
    }
}

/// A `BuddyPool` guarded by a [`Mutex`].
///
/// Each operation holds the lock for its entire duration, so the multi-step
/// updates to the free lists and page table are never observed half done.
#[cfg(feature = "std")]
#[cfg_attr(docs_rs, doc(cfg(feature = "std")))]
pub struct MutexBuddyPool<const MIN_ORDER: u32, const MAX_ORDER: u32, A: BackingAllocator> {
    inner: Mutex<BuddyPool<MIN_ORDER, MAX_ORDER, A>>,
}

#[cfg(feature = "std")]
impl<const MIN_ORDER: u32, const MAX_ORDER: u32, A: BackingAllocator>
    MutexBuddyPool<MIN_ORDER, MAX_ORDER, A>
{
    /// Wraps `pool` in a mutex.
    pub fn new(pool: BuddyPool<MIN_ORDER, MAX_ORDER, A>) -> Self {
        MutexBuddyPool {
            inner: Mutex::new(pool),
        }
    }

    /// Consumes the wrapper, returning the inner pool.
    pub fn into_inner(self) -> BuddyPool<MIN_ORDER, MAX_ORDER, A> {
        self.inner
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // Pool operations never leave the pool inconsistent when they panic, so a
    // poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, BuddyPool<MIN_ORDER, MAX_ORDER, A>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocates a block. See [`BuddyPool::allocate`].
    pub fn allocate(&self, size: usize) -> Result<NonNull<[u8]>, AllocError> {
        self.lock().allocate(size)
    }

    /// Frees a block. See [`BuddyPool::free`].
    pub fn free(&self, ptr: NonNull<u8>) -> Result<(), AllocError> {
        self.lock().free(ptr)
    }

    /// Returns free block counts. See [`BuddyPool::dump`].
    pub fn dump(&self) -> PoolDump {
        self.lock().dump()
    }
}

#[cfg(feature = "std")]
impl<const MIN_ORDER: u32, const MAX_ORDER: u32, A: BackingAllocator> fmt::Debug
    for MutexBuddyPool<MIN_ORDER, MAX_ORDER, A>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutexBuddyPool")
            .field("inner", &self.inner)
            .finish()
    }
}
