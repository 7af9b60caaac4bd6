//! A small library for ~~hating on~~ evaluating the correctness of buddy pools.
#![deny(unsafe_op_in_unsafe_fn)]

use core::{mem::MaybeUninit, ptr::NonNull, slice};

use arbitrary::{Arbitrary, Unstructured};
use buddy_pool::{AllocInitError, BuddyPool, Global};

/// Largest request size generated by [`ArbSize`], in bits.
///
/// This is past the default arena order, so some requests are out of range.
const SIZE_LIMIT_BITS: u8 = 24;

/// A request size which implements `Arbitrary`.
///
/// Sizes are spread evenly across powers of two rather than across the whole
/// range of `usize`.
#[derive(Copy, Clone, Debug)]
pub struct ArbSize(pub usize);

impl Arbitrary<'_> for ArbSize {
    fn arbitrary(u: &mut Unstructured<'_>) -> arbitrary::Result<Self> {
        // Select a random bit index and shift to obtain an upper bound.
        let shift = u8::arbitrary(u)? % SIZE_LIMIT_BITS;
        let size = usize::arbitrary(u)? % (1 << shift);

        Ok(ArbSize(size))
    }
}

#[derive(Arbitrary)]
enum PoolOpTag {
    Alloc,
    Free,
}

#[derive(Clone, Debug)]
pub enum PoolOp {
    /// Allocate at least this many bytes.
    Alloc(usize),
    /// Free an outstanding block, selected modulo the number of blocks.
    Free(usize),
}

impl Arbitrary<'_> for PoolOp {
    fn arbitrary(u: &mut Unstructured<'_>) -> arbitrary::Result<Self> {
        let op = match PoolOpTag::arbitrary(u)? {
            PoolOpTag::Alloc => PoolOp::Alloc(ArbSize::arbitrary(u)?.0),
            PoolOpTag::Free => PoolOp::Free(usize::arbitrary(u)?),
        };

        Ok(op)
    }
}

pub trait Subject {
    type Error;

    /// Allocates a block of at least `size` bytes.
    fn allocate(&mut self, size: usize) -> Result<NonNull<[u8]>, Self::Error>;

    /// Returns the block pointed to by `ptr` to the subject.
    fn free(&mut self, ptr: NonNull<u8>) -> Result<(), Self::Error>;

    /// Returns `true` if the subject holds no outstanding allocations.
    fn all_freed(&self) -> bool {
        true
    }
}

/// A list of allocated blocks.
#[derive(Default)]
pub struct Blocks {
    blocks: Vec<Block>,
}

impl Blocks {
    pub fn new() -> Blocks {
        Blocks { blocks: Vec::new() }
    }

    pub fn push(&mut self, block: Block) {
        self.blocks.push(block);
    }

    pub fn remove_modulo(&mut self, idx: usize) -> Option<Block> {
        let len = self.blocks.len();
        (len != 0).then(|| self.blocks.swap_remove(idx % len))
    }
}

impl IntoIterator for Blocks {
    type Item = Block;

    type IntoIter = std::vec::IntoIter<Block>;

    fn into_iter(self) -> Self::IntoIter {
        self.blocks.into_iter()
    }
}

/// An allocated block of memory.
pub struct Block {
    ptr: NonNull<[u8]>,
    // The unique ID of the operation that allocated this block.
    id: u64,
}

impl Block {
    /// Creates a block from `ptr` and paints it according to `id`.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes for `ptr.len()` bytes, and no
    /// other references to that memory may exist while the `Block` is alive.
    pub unsafe fn init(ptr: NonNull<[u8]>, id: u64) -> Block {
        let mut b = Block { ptr, id };
        b.paint();
        b
    }

    fn as_uninit_slice_mut(&mut self) -> &mut [MaybeUninit<u8>] {
        // SAFETY: self is mutably borrowed, so no other references to the
        // slice can exist
        unsafe { slice::from_raw_parts_mut(self.ptr.cast().as_ptr(), self.ptr.len()) }
    }

    /// Fills the block with the bytes of its ID.
    fn paint(&mut self) {
        let id_bytes = self.id.to_le_bytes().into_iter().cycle();

        for (byte, value) in self.as_uninit_slice_mut().iter_mut().zip(id_bytes) {
            byte.write(value);
        }
    }

    /// Verifies that the memory contained by `self` has not been overwritten.
    pub fn verify(&self) -> bool {
        // SAFETY: the block was fully painted on creation.
        let slice: &[u8] = unsafe { self.ptr.as_ref() };
        let id_bytes = self.id.to_le_bytes().into_iter().cycle();

        slice.iter().zip(id_bytes).all(|(byte, value)| *byte == value)
    }

    pub fn ptr(&self) -> NonNull<[u8]> {
        self.ptr
    }
}

/// Why an evaluation failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Failure {
    /// A block was overwritten while it was allocated.
    Corrupted,
    /// A block returned by the subject was shorter than requested.
    TooShort,
    /// The subject rejected a block it had handed out.
    FreeRejected,
    /// The subject still held allocations after every block was freed.
    Leaked,
}

#[derive(Clone, Debug)]
pub struct Failed {
    pub completed: Vec<PoolOp>,
    pub failed_op: Option<PoolOp>,
    pub failure: Failure,
}

pub struct Evaluator<S: Subject> {
    subject: S,
}

impl<S: Subject> Evaluator<S> {
    pub fn new(subject: S) -> Evaluator<S> {
        Evaluator { subject }
    }

    pub fn into_subject(self) -> S {
        self.subject
    }

    pub fn evaluate<I>(&mut self, ops: I) -> Result<(), Failed>
    where
        I: IntoIterator<Item = PoolOp>,
    {
        let mut completed = Vec::new();
        let mut blocks = Blocks::new();

        for (op_id, op) in ops.into_iter().enumerate() {
            let op_id = op_id as u64;

            let outcome = match op {
                PoolOp::Alloc(size) => match self.subject.allocate(size) {
                    Ok(p) if p.len() < size => Err(Failure::TooShort),
                    Ok(p) => {
                        blocks.push(unsafe { Block::init(p, op_id) });
                        Ok(())
                    }
                    Err(_) => Ok(()),
                },

                PoolOp::Free(raw_idx) => match blocks.remove_modulo(raw_idx) {
                    Some(block) => self.release(block),
                    None => Ok(()),
                },
            };

            if let Err(failure) = outcome {
                return Err(Failed {
                    completed,
                    failed_op: Some(op),
                    failure,
                });
            }

            completed.push(op);
        }

        for block in blocks {
            if let Err(failure) = self.release(block) {
                return Err(Failed {
                    completed,
                    failed_op: None,
                    failure,
                });
            }
        }

        if !self.subject.all_freed() {
            return Err(Failed {
                completed,
                failed_op: None,
                failure: Failure::Leaked,
            });
        }

        Ok(())
    }

    fn release(&mut self, block: Block) -> Result<(), Failure> {
        if !block.verify() {
            return Err(Failure::Corrupted);
        }

        self.subject
            .free(block.ptr().cast())
            .map_err(|_| Failure::FreeRejected)
    }
}

/// A [`BuddyPool`] under evaluation.
pub struct PoolSubject<const MIN_ORDER: u32, const MAX_ORDER: u32>(
    BuddyPool<MIN_ORDER, MAX_ORDER, Global>,
);

impl<const MIN_ORDER: u32, const MAX_ORDER: u32> PoolSubject<MIN_ORDER, MAX_ORDER> {
    pub fn new() -> Result<Self, AllocInitError> {
        let p = BuddyPool::try_new()?;
        Ok(PoolSubject(p))
    }

    pub fn pool(&self) -> &BuddyPool<MIN_ORDER, MAX_ORDER, Global> {
        &self.0
    }
}

impl<const MIN_ORDER: u32, const MAX_ORDER: u32> Subject for PoolSubject<MIN_ORDER, MAX_ORDER> {
    type Error = buddy_pool::AllocError;

    fn allocate(&mut self, size: usize) -> Result<NonNull<[u8]>, Self::Error> {
        self.0.allocate(size)
    }

    fn free(&mut self, ptr: NonNull<u8>) -> Result<(), Self::Error> {
        self.0.free(ptr)
    }

    fn all_freed(&self) -> bool {
        self.0.used_bytes() == 0 && self.0.dump().free_blocks(MAX_ORDER) == Some(1)
    }
}
