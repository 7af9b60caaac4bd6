//! Stable polyfills for strict-provenance pointer operations and integer
//! logarithms.

use core::{num::NonZeroUsize, ptr::NonNull};

use sptr::Strict;

pub trait NonNullStrict<T> {
    fn addr(self) -> NonZeroUsize
    where
        T: Sized;

    fn with_addr(self, addr: NonZeroUsize) -> Self
    where
        T: Sized;
}

impl<T> NonNullStrict<T> for NonNull<T> {
    fn addr(self) -> NonZeroUsize
    where
        T: Sized,
    {
        // SAFETY: The pointer is guaranteed by the type to be non-null,
        // meaning that the address will be non-zero.
        unsafe { NonZeroUsize::new_unchecked(Strict::addr(self.as_ptr())) }
    }

    fn with_addr(self, addr: NonZeroUsize) -> Self
    where
        T: Sized,
    {
        // SAFETY: The result of `with_addr` is non-null because `addr` is
        // guaranteed to be non-zero.
        unsafe { NonNull::new_unchecked(Strict::with_addr(self.as_ptr(), addr.get())) }
    }
}

pub trait UsizeExt {
    fn log2(self) -> u32;
}

impl UsizeExt for usize {
    #[inline]
    fn log2(self) -> u32 {
        Self::BITS - 1 - self.leading_zeros()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log2_of_powers_of_two() {
        for exp in 0..usize::BITS {
            assert_eq!((1_usize << exp).log2(), exp);
        }
    }

    #[test]
    fn log2_rounds_down() {
        assert_eq!(3_usize.log2(), 1);
        assert_eq!(4095_usize.log2(), 11);
        assert_eq!(4097_usize.log2(), 12);
    }
}
