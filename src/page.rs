//! The page table.
//!
//! Every page of the arena has a descriptor recording its role in the current
//! tiling of the arena, plus the links used to thread it onto a free list.
//! Descriptors are addressed by page index; conversions between page indices
//! and byte offsets are defined here and nowhere else.

use alloc::{vec, vec::Vec};

/// The role of a page in the current tiling of the arena.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PageState {
    /// The page is not the first page of any block.
    Interior,
    /// The page heads a free block of the given order, and is linked into
    /// that order's free list.
    Free(u32),
    /// The page heads an allocated block of the given order.
    Allocated(u32),
}

/// Index links threading a page onto a free list.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PageLink {
    pub prev: Option<usize>,
    pub next: Option<usize>,
}

#[derive(Copy, Clone, Debug)]
struct Page {
    state: PageState,
    link: PageLink,
}

impl Page {
    const UNASSIGNED: Page = Page {
        state: PageState::Interior,
        link: PageLink {
            prev: None,
            next: None,
        },
    };
}

pub struct PageTable {
    min_order: u32,
    pages: Vec<Page>,
}

impl PageTable {
    /// Creates a table for an arena of `2^max_order` bytes split into pages of
    /// `2^min_order` bytes. All pages start out unassigned.
    pub fn new(min_order: u32, max_order: u32) -> PageTable {
        assert!(min_order <= max_order);

        let num_pages = 1_usize << (max_order - min_order);

        PageTable {
            min_order,
            pages: vec![Page::UNASSIGNED; num_pages],
        }
    }

    /// Marks every page unassigned and unlinked.
    pub fn reset(&mut self) {
        self.pages.fill(Page::UNASSIGNED);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    #[inline]
    pub fn page_size(&self) -> usize {
        1 << self.min_order
    }

    /// Returns the byte offset of the page at `index`.
    #[inline]
    pub fn index_to_offset(&self, index: usize) -> usize {
        debug_assert!(index < self.len());
        index << self.min_order
    }

    /// Returns the index of the page starting `offset` bytes into the arena.
    ///
    /// Returns `None` if `offset` is not page aligned or lies past the last
    /// page.
    #[inline]
    pub fn offset_to_index(&self, offset: usize) -> Option<usize> {
        if offset & (self.page_size() - 1) != 0 {
            return None;
        }

        Some(offset >> self.min_order).filter(|&index| index < self.len())
    }

    /// Returns the number of pages spanned by a block of the given order.
    #[inline]
    pub fn pages_in(&self, order: u32) -> usize {
        debug_assert!(order >= self.min_order);
        1 << (order - self.min_order)
    }

    /// Returns the index of the buddy of the order-`order` block headed by
    /// `index`.
    ///
    /// A block whose index is an even multiple of its span is the lower half
    /// of its parent and its buddy follows it; otherwise the buddy precedes
    /// it.
    #[inline]
    pub fn buddy_index(&self, index: usize, order: u32) -> usize {
        let span = self.pages_in(order);
        debug_assert_eq!(index % span, 0, "block is misaligned for its order");

        if (index / span) % 2 == 0 {
            index + span
        } else {
            index - span
        }
    }

    #[inline]
    pub fn state(&self, index: usize) -> PageState {
        self.pages[index].state
    }

    #[inline]
    pub fn set_state(&mut self, index: usize, state: PageState) {
        self.pages[index].state = state;
    }

    #[inline]
    pub fn link(&self, index: usize) -> PageLink {
        self.pages[index].link
    }

    #[inline]
    pub fn link_mut(&mut self, index: usize) -> &mut PageLink {
        &mut self.pages[index].link
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_covers_arena() {
        let table = PageTable::new(12, 20);
        assert_eq!(table.len(), 256);
        assert_eq!(table.page_size(), 4096);

        let single = PageTable::new(7, 7);
        assert_eq!(single.len(), 1);
    }

    #[test]
    fn index_offset_conversions_agree() {
        let table = PageTable::new(12, 20);

        for index in 0..table.len() {
            let ofs = table.index_to_offset(index);
            assert_eq!(ofs, index * 4096);
            assert_eq!(table.offset_to_index(ofs), Some(index));
        }
    }

    #[test]
    fn unaligned_or_distant_offsets_have_no_page() {
        let table = PageTable::new(12, 20);

        assert_eq!(table.offset_to_index(1), None);
        assert_eq!(table.offset_to_index(4095), None);
        assert_eq!(table.offset_to_index(4096 + 8), None);
        assert_eq!(table.offset_to_index(1 << 20), None);
    }

    #[test]
    fn buddy_index_matches_offset_toggle() {
        let table = PageTable::new(12, 20);

        for order in 12..20 {
            let span = table.pages_in(order);
            for index in (0..table.len()).step_by(span) {
                let buddy = table.buddy_index(index, order);

                // Toggling bit `order` of the byte offset names the same block.
                let toggled = table.index_to_offset(index) ^ (1 << order);
                assert_eq!(table.offset_to_index(toggled), Some(buddy));

                // The relation is symmetric.
                assert_eq!(table.buddy_index(buddy, order), index);
            }
        }
    }

    #[test]
    fn buddies_of_known_blocks() {
        let table = PageTable::new(12, 20);

        // Order-17 blocks span 32 pages.
        assert_eq!(table.buddy_index(0, 17), 32);
        assert_eq!(table.buddy_index(32, 17), 0);
        assert_eq!(table.buddy_index(64, 17), 96);

        // Order-19 blocks are the two halves of the arena.
        assert_eq!(table.buddy_index(0, 19), 128);
        assert_eq!(table.buddy_index(128, 19), 0);
    }

    #[test]
    fn reset_clears_states_and_links() {
        let mut table = PageTable::new(4, 8);

        table.set_state(0, PageState::Allocated(6));
        table.set_state(4, PageState::Free(6));
        table.link_mut(4).next = Some(8);

        table.reset();

        for index in 0..table.len() {
            assert_eq!(table.state(index), PageState::Interior);
            assert_eq!(table.link(index), PageLink::default());
        }
    }
}
