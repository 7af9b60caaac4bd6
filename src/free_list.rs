use crate::page::{PageLink, PageTable};

/// A doubly-linked list of free blocks of a single order.
///
/// The links live in the page table rather than in the list, forming an
/// intrusive list keyed by page index. A page may be linked into at most one
/// list at a time.
#[derive(Copy, Clone, Debug, Default)]
pub struct FreeList {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl FreeList {
    pub const fn new() -> FreeList {
        FreeList {
            head: None,
            tail: None,
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Appends the page at `index` to the tail of the list.
    pub fn push_back(&mut self, pages: &mut PageTable, index: usize) {
        debug_assert_eq!(pages.link(index), PageLink::default());

        let old_tail = self.tail;

        if let Some(t) = old_tail {
            // `old_tail` points forward to the new tail.
            pages.link_mut(t).next = Some(index);
        } else {
            self.head = Some(index);
        }

        // The new tail points back to `old_tail`.
        *pages.link_mut(index) = PageLink {
            prev: old_tail,
            next: None,
        };

        self.tail = Some(index);
        self.len += 1;
    }

    /// Removes and returns the page at the head of the list.
    pub fn pop_front(&mut self, pages: &mut PageTable) -> Option<usize> {
        let head = self.head?;
        self.remove(pages, head);
        Some(head)
    }

    /// Removes the page at `index` from the list.
    ///
    /// The page must be an element of this list.
    pub fn remove(&mut self, pages: &mut PageTable, index: usize) {
        let removed = pages.link(index);

        match removed.prev {
            // Link `prev` forward to `next`.
            Some(p) => pages.link_mut(p).next = removed.next,

            // If there's no previous page, then `removed` is the head of the
            // list.
            None => {
                debug_assert_eq!(self.head, Some(index), "page is not in this list");
                self.head = removed.next;
            }
        }

        match removed.next {
            // Link `next` back to `prev`.
            Some(n) => pages.link_mut(n).prev = removed.prev,

            None => {
                debug_assert_eq!(self.tail, Some(index), "page is not in this list");
                self.tail = removed.prev;
            }
        }

        *pages.link_mut(index) = PageLink::default();
        self.len -= 1;
    }

    /// Forgets every element of the list without touching the page table.
    pub fn clear(&mut self) {
        *self = FreeList::new();
    }

    /// Returns an iterator over the page indices in the list, head first.
    #[cfg(test)]
    pub fn iter<'a>(&self, pages: &'a PageTable) -> Iter<'a> {
        Iter {
            pages,
            current: self.head,
        }
    }
}

#[cfg(test)]
pub struct Iter<'a> {
    pages: &'a PageTable,
    current: Option<usize>,
}

#[cfg(test)]
impl Iterator for Iter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let index = self.current?;
        self.current = self.pages.link(index).next;
        Some(index)
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::vec::Vec;

    use super::*;

    fn contents(list: &FreeList, pages: &PageTable) -> Vec<usize> {
        list.iter(pages).collect()
    }

    #[test]
    fn pushes_are_fifo() {
        let mut pages = PageTable::new(4, 8);
        let mut list = FreeList::new();

        for index in [3, 1, 7] {
            list.push_back(&mut pages, index);
        }

        assert_eq!(list.len(), 3);
        assert_eq!(contents(&list, &pages), [3, 1, 7]);

        assert_eq!(list.pop_front(&mut pages), Some(3));
        assert_eq!(list.pop_front(&mut pages), Some(1));
        assert_eq!(list.pop_front(&mut pages), Some(7));
        assert_eq!(list.pop_front(&mut pages), None);
        assert!(list.is_empty());
    }

    #[test]
    fn remove_from_each_position() {
        let mut pages = PageTable::new(4, 8);
        let mut list = FreeList::new();

        for index in 0..5 {
            list.push_back(&mut pages, index);
        }

        // Middle, head, tail.
        list.remove(&mut pages, 2);
        assert_eq!(contents(&list, &pages), [0, 1, 3, 4]);
        list.remove(&mut pages, 0);
        assert_eq!(contents(&list, &pages), [1, 3, 4]);
        list.remove(&mut pages, 4);
        assert_eq!(contents(&list, &pages), [1, 3]);

        assert_eq!(list.len(), 2);

        // Removed pages are unlinked and may join another list.
        let mut other = FreeList::new();
        other.push_back(&mut pages, 2);
        other.push_back(&mut pages, 4);
        assert_eq!(contents(&other, &pages), [2, 4]);
        assert_eq!(contents(&list, &pages), [1, 3]);
    }

    #[test]
    fn remove_only_element() {
        let mut pages = PageTable::new(4, 8);
        let mut list = FreeList::new();

        list.push_back(&mut pages, 9);
        list.remove(&mut pages, 9);

        assert!(list.is_empty());
        assert_eq!(list.len(), 0);
        assert!(contents(&list, &pages).is_empty());

        list.push_back(&mut pages, 9);
        assert_eq!(contents(&list, &pages), [9]);
    }
}
