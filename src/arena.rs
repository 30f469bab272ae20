use core::ops::Range;
use crate::error::{Error, Result};




/// Default alignment, in bytes, of allocations made from an `Arena`.
pub const DEFAULT_ALIGNMENT: usize = 8;




/**
 * A region handed out by an `Arena`: a byte range within its buffer.
 */
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Allocation {
    range: Range<usize>,
}

impl Allocation {
    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}




/**
 * A fixed-capacity bump allocator for message buffers. Allocations are
 * carved sequentially from a single buffer; individual frees are no-ops and
 * all memory is released together when the arena is dropped. Requesting more
 * than the remaining capacity is an error, never a reallocation.
 */
pub struct Arena {
    buffer: Vec<u8>,
    used: usize,
    alignment: usize,
}




// ============================================================================
impl Arena {


    pub fn new(capacity: usize) -> Self {
        Self::with_alignment(capacity, DEFAULT_ALIGNMENT)
    }


    /**
     * Create an arena whose allocations start on multiples of `alignment`
     * bytes. An alignment of zero is treated as one.
     */
    pub fn with_alignment(capacity: usize, alignment: usize) -> Self {
        Self {
            buffer: vec![0; capacity],
            used: 0,
            alignment: alignment.max(1),
        }
    }


    /**
     * Return the capacity needed to hold allocations of the given sizes, in
     * order, including alignment padding.
     */
    pub fn required_capacity<I: IntoIterator<Item = usize>>(sizes: I, alignment: usize) -> usize {
        let alignment = alignment.max(1);
        sizes.into_iter().fold(0, |used, size| align_up(used, alignment) + size)
    }


    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }


    pub fn used(&self) -> usize {
        self.used
    }


    pub fn remaining(&self) -> usize {
        self.capacity() - self.used
    }


    /**
     * Reserve `bytes` bytes. Fails with `Error::ArenaExhaustion` if the
     * request (plus any alignment padding) does not fit in the remaining
     * capacity; the arena is unchanged in that case.
     */
    pub fn allocate(&mut self, bytes: usize) -> Result<Allocation> {
        let start = align_up(self.used, self.alignment);
        let end = start.checked_add(bytes).filter(|&end| end <= self.capacity());

        match end {
            Some(end) => {
                self.used = end;
                Ok(Allocation { range: start..end })
            }
            None => Err(Error::ArenaExhaustion {
                requested: bytes,
                remaining: self.remaining(),
                capacity: self.capacity(),
            }),
        }
    }


    /**
     * Release an allocation. This is a no-op: memory is reclaimed only when
     * the arena itself is dropped.
     */
    pub fn free(&mut self, _allocation: Allocation) {
    }


    pub fn get(&self, allocation: &Allocation) -> &[u8] {
        &self.buffer[allocation.range.clone()]
    }


    pub fn get_mut(&mut self, allocation: &Allocation) -> &mut [u8] {
        &mut self.buffer[allocation.range.clone()]
    }


    /**
     * Borrow several allocations mutably at once, so that they can be
     * filled in parallel. The allocations must be given in the order they
     * were made.
     */
    pub fn split_mut(&mut self, allocations: &[Allocation]) -> Result<Vec<&mut [u8]>> {
        let mut rest: &mut [u8] = &mut self.buffer[..];
        let mut consumed = 0;
        let mut slices = Vec::with_capacity(allocations.len());

        for allocation in allocations {
            if allocation.range.start < consumed {
                return Err(Error::Protocol("arena allocations split out of order".to_string()))
            }
            let (_, tail) = core::mem::take(&mut rest).split_at_mut(allocation.range.start - consumed);
            let (head, tail) = tail.split_at_mut(allocation.len());
            slices.push(head);
            rest = tail;
            consumed = allocation.range.end;
        }
        Ok(slices)
    }
}




fn align_up(offset: usize, alignment: usize) -> usize {
    (offset + alignment - 1) / alignment * alignment
}
