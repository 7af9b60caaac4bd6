//! Pool diagnostics.
//!
//! A [`PoolDump`] is a snapshot of how many free blocks a pool holds at each
//! order. It is produced by [`BuddyPool::dump`] and is never consulted by the
//! allocator itself.
//!
//! [`BuddyPool::dump`]: crate::BuddyPool::dump

use alloc::vec::Vec;
use core::{fmt, slice};

/// The number of free blocks of a single order.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OrderStat {
    /// The block order.
    pub order: u32,
    /// The size in bytes of a block of this order.
    pub block_size: usize,
    /// The number of free blocks of this order.
    pub free_blocks: usize,
}

/// Free block counts for every order of a pool, smallest order first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolDump {
    orders: Vec<OrderStat>,
}

impl PoolDump {
    pub(crate) fn new(orders: Vec<OrderStat>) -> PoolDump {
        PoolDump { orders }
    }

    /// Returns an iterator over the per-order statistics, smallest order first.
    pub fn iter(&self) -> slice::Iter<'_, OrderStat> {
        self.orders.iter()
    }

    /// Returns an iterator of `(order, free_blocks)` pairs.
    pub fn free_counts(&self) -> impl Iterator<Item = (u32, usize)> + '_ {
        self.orders.iter().map(|s| (s.order, s.free_blocks))
    }

    /// Returns the number of free blocks of `order`, or `None` if the pool
    /// has no such order.
    pub fn free_blocks(&self, order: u32) -> Option<usize> {
        self.orders
            .iter()
            .find(|s| s.order == order)
            .map(|s| s.free_blocks)
    }

    /// Returns the total size in bytes of all free blocks.
    pub fn free_bytes(&self) -> usize {
        self.orders.iter().map(|s| s.free_blocks * s.block_size).sum()
    }
}

impl<'a> IntoIterator for &'a PoolDump {
    type Item = &'a OrderStat;
    type IntoIter = slice::Iter<'a, OrderStat>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Formats the dump on one line as `count:size` pairs, e.g.
/// `0:4K 1:8K 0:16K`.
///
/// Block sizes of at least 1 KiB are printed in KiB; smaller sizes are
/// printed in bytes.
impl fmt::Display for PoolDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stat) in self.orders.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }

            if stat.block_size >= 1024 {
                write!(f, "{}:{}K", stat.free_blocks, stat.block_size / 1024)?;
            } else {
                write!(f, "{}:{}B", stat.free_blocks, stat.block_size)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::string::ToString;

    use super::*;

    fn sample() -> PoolDump {
        PoolDump::new(
            (9..=12)
                .map(|order| OrderStat {
                    order,
                    block_size: 1 << order,
                    free_blocks: (order as usize) % 3,
                })
                .collect(),
        )
    }

    #[test]
    fn lookups() {
        let dump = sample();

        assert_eq!(dump.free_blocks(10), Some(1));
        assert_eq!(dump.free_blocks(12), Some(0));
        assert_eq!(dump.free_blocks(13), None);
        assert_eq!(dump.free_bytes(), 1024 + 2 * 2048);

        let counts: Vec<_> = dump.free_counts().collect();
        assert_eq!(counts, [(9, 0), (10, 1), (11, 2), (12, 0)]);
        assert_eq!((&dump).into_iter().count(), 4);
    }

    #[test]
    fn display_mixes_units() {
        assert_eq!(sample().to_string(), "0:512B 1:1K 2:2K 0:4K");
    }
}
