use core::{
    num::NonZeroUsize,
    ptr::{self, NonNull},
};

use crate::{polyfill::NonNullStrict, AllocInitError};

/// A pointer to the base of the arena managed by a pool.
///
/// All pointers handed out by a pool are derived from this pointer, so they
/// carry the provenance of the original region.
#[derive(Copy, Clone, Debug)]
pub struct BasePtr {
    ptr: NonNull<u8>,
    extent: usize,
}

impl BasePtr {
    /// Creates a `BasePtr` from `ptr`, managing `extent` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the end of the region overflows `usize`.
    #[inline]
    pub fn new(ptr: NonNull<u8>, extent: usize) -> Result<BasePtr, AllocInitError> {
        NonNullStrict::addr(ptr)
            .get()
            .checked_add(extent)
            .ok_or(AllocInitError::InvalidLocation)?;

        Ok(BasePtr { ptr, extent })
    }

    /// Returns the base pointer as a `NonNull<u8>`.
    #[inline]
    pub fn ptr(self) -> NonNull<u8> {
        self.ptr
    }

    /// Returns the address of the base pointer.
    #[inline]
    pub fn addr(self) -> NonZeroUsize {
        NonNullStrict::addr(self.ptr)
    }

    /// Calculates the offset from `self` to `addr`.
    ///
    /// Returns `None` if `addr` is outside the managed region.
    #[inline]
    pub fn offset_to(self, addr: NonZeroUsize) -> Option<usize> {
        addr.get()
            .checked_sub(self.addr().get())
            .filter(|&ofs| ofs < self.extent)
    }

    /// Creates a new pointer `offset` bytes past the base.
    ///
    /// The returned pointer has the provenance of this pointer.
    #[inline]
    pub fn with_offset(self, offset: usize) -> NonNull<u8> {
        debug_assert!(offset < self.extent);

        // The constructor checked that `base + extent` does not overflow, and
        // a nonzero base plus any offset is nonzero.
        let addr = self.addr().saturating_add(offset);
        NonNullStrict::with_addr(self.ptr, addr)
    }

    /// Creates a slice pointer of `len` bytes starting `offset` bytes past the
    /// base.
    #[inline]
    pub fn with_offset_and_size(self, offset: usize, len: usize) -> NonNull<[u8]> {
        debug_assert!(offset + len <= self.extent);

        let raw_slice = ptr::slice_from_raw_parts_mut(self.with_offset(offset).as_ptr(), len);

        // SAFETY: `raw_slice` was derived from a non-null pointer.
        unsafe { NonNull::new_unchecked(raw_slice) }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::vec::Vec;

    use super::*;

    fn base_of(buf: &mut [u8]) -> BasePtr {
        let ptr = NonNull::new(buf.as_mut_ptr()).unwrap();
        BasePtr::new(ptr, buf.len()).unwrap()
    }

    #[test]
    fn offsets_inside_region() {
        let mut buf: Vec<u8> = std::vec![0; 64];
        let base = base_of(&mut buf);

        for ofs in [0, 1, 32, 63] {
            let ptr = base.with_offset(ofs);
            assert_eq!(base.offset_to(NonNullStrict::addr(ptr)), Some(ofs));
        }
    }

    #[test]
    fn offsets_outside_region() {
        let mut buf: Vec<u8> = std::vec![0; 64];
        let base = base_of(&mut buf);

        let end = NonZeroUsize::new(base.addr().get() + 64).unwrap();
        assert_eq!(base.offset_to(end), None);

        if let Some(before) = NonZeroUsize::new(base.addr().get() - 1) {
            assert_eq!(base.offset_to(before), None);
        }
    }

    #[test]
    fn slice_has_requested_length() {
        let mut buf: Vec<u8> = std::vec![0; 64];
        let base = base_of(&mut buf);

        let slice = base.with_offset_and_size(16, 16);
        assert_eq!(slice.len(), 16);
        assert_eq!(slice.cast::<u8>(), base.with_offset(16));
    }

    #[test]
    fn overflowing_extent_is_rejected() {
        let mut buf: Vec<u8> = std::vec![0; 64];
        let ptr = NonNull::new(buf.as_mut_ptr()).unwrap();

        assert_eq!(
            BasePtr::new(ptr, usize::MAX).unwrap_err(),
            AllocInitError::InvalidLocation
        );
    }
}
