use core::ops::Range;
use serde::{Deserialize, Serialize};
use crate::int_vector::{self, IntVector};




/**
 * Represents a rectangular region in a discrete D-dimensional index space.
 * Bounds are closed on every axis: the region contains each index `i` with
 * `lower[d] <= i[d] <= upper[d]`. A region with `upper[d] < lower[d]` on any
 * axis is empty; operations that produce an empty region return the
 * canonical empty value, so empty regions compare equal to each other.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexSpace<const D: usize> {
    #[serde(with = "int_vector::array")]
    lower: [i64; D],
    #[serde(with = "int_vector::array")]
    upper: [i64; D],
}




/// An ordered sequence of index spaces. The order is significant: it drives
/// the order in which overlaps are decomposed and data is packed.
pub type BoxList<const D: usize> = Vec<IndexSpace<D>>;




// ============================================================================
impl<const D: usize> IndexSpace<D> {


    /**
     * Create an index space from closed lower and upper bounds.
     */
    pub fn new(lower: [i64; D], upper: [i64; D]) -> Self {
        Self { lower, upper }.normalized()
    }


    /**
     * Return the canonical empty index space.
     */
    pub fn empty() -> Self {
        Self { lower: [0; D], upper: [-1; D] }
    }


    /**
     * Create an index space from half-open ranges, one per axis.
     */
    pub fn from_ranges(ranges: [Range<i64>; D]) -> Self {
        let mut lower = [0; D];
        let mut upper = [0; D];
        for d in 0..D {
            lower[d] = ranges[d].start;
            upper[d] = ranges[d].end - 1;
        }
        Self::new(lower, upper)
    }


    pub fn lower(&self) -> IntVector<D> {
        IntVector(self.lower)
    }


    pub fn upper(&self) -> IntVector<D> {
        IntVector(self.upper)
    }


    pub fn is_empty(&self) -> bool {
        (0..D).any(|d| self.upper[d] < self.lower[d])
    }


    /**
     * Return the number of indexes on each axis.
     */
    pub fn dim(&self) -> [usize; D] {
        let mut dim = [0; D];
        if !self.is_empty() {
            for d in 0..D {
                dim[d] = (self.upper[d] - self.lower[d] + 1) as usize
            }
        }
        dim
    }


    /**
     * Return the number of indexes in this index space.
     */
    pub fn len(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            self.dim().iter().product()
        }
    }


    /**
     * Determine whether this index space contains the given index.
     */
    pub fn contains(&self, index: [i64; D]) -> bool {
        (0..D).all(|d| self.lower[d] <= index[d] && index[d] <= self.upper[d])
    }


    /**
     * Determine whether another index space is a subset of this one. The
     * empty space is a subset of every space.
     */
    pub fn contains_space(&self, other: &Self) -> bool {
        other.is_empty() || (!self.is_empty() &&
            (0..D).all(|d| self.lower[d] <= other.lower[d] && other.upper[d] <= self.upper[d]))
    }


    /**
     * Return the intersection of two index spaces, which may be empty.
     */
    pub fn intersect(&self, other: &Self) -> Self {
        let mut result = *self;
        for d in 0..D {
            result.lower[d] = self.lower[d].max(other.lower[d]);
            result.upper[d] = self.upper[d].min(other.upper[d]);
        }
        result.normalized()
    }


    pub fn intersects(&self, other: &Self) -> bool {
        !self.intersect(other).is_empty()
    }


    /**
     * Return this index space translated by the given offset.
     */
    pub fn shift(&self, offset: IntVector<D>) -> Self {
        if self.is_empty() {
            return *self
        }
        let mut result = *self;
        for d in 0..D {
            result.lower[d] += offset[d];
            result.upper[d] += offset[d];
        }
        result
    }


    /**
     * Expand this index space by the given width on both ends of each axis.
     * Negative widths trim instead, and may yield the empty space.
     */
    pub fn grow(&self, width: IntVector<D>) -> Self {
        if self.is_empty() {
            return *self
        }
        let mut result = *self;
        for d in 0..D {
            result.lower[d] -= width[d];
            result.upper[d] += width[d];
        }
        result.normalized()
    }


    /**
     * Coarsen this index space by the given ratio: both bounds are divided by
     * the ratio and rounded toward negative infinity.
     */
    pub fn coarsen(&self, ratio: IntVector<D>) -> Self {
        if self.is_empty() {
            return *self
        }
        let mut result = *self;
        for d in 0..D {
            result.lower[d] = self.lower[d].div_euclid(ratio[d]);
            result.upper[d] = self.upper[d].div_euclid(ratio[d]);
        }
        result
    }


    /**
     * Refine this index space by the given ratio: each index becomes a block
     * of `ratio` indexes.
     */
    pub fn refine(&self, ratio: IntVector<D>) -> Self {
        if self.is_empty() {
            return *self
        }
        let mut result = *self;
        for d in 0..D {
            result.lower[d] = self.lower[d] * ratio[d];
            result.upper[d] = (self.upper[d] + 1) * ratio[d] - 1;
        }
        result
    }


    /**
     * Interpret this index space as a set of node indexes on a fine level,
     * and return the node indexes on the level coarser by `ratio` which
     * coincide with one of them.
     */
    pub fn coarsen_nodes(&self, ratio: IntVector<D>) -> Self {
        if self.is_empty() {
            return *self
        }
        let mut result = *self;
        for d in 0..D {
            result.lower[d] = -(-self.lower[d]).div_euclid(ratio[d]);
            result.upper[d] = self.upper[d].div_euclid(ratio[d]);
        }
        result.normalized()
    }


    /**
     * Return the smallest index space containing both this one and another.
     */
    pub fn bounding_box(&self, other: &Self) -> Self {
        if self.is_empty() {
            return *other
        }
        if other.is_empty() {
            return *self
        }
        let mut result = *self;
        for d in 0..D {
            result.lower[d] = self.lower[d].min(other.lower[d]);
            result.upper[d] = self.upper[d].max(other.upper[d]);
        }
        result
    }


    /**
     * Convert a box of cells into the box of nodes at their corners.
     */
    pub fn to_nodes(&self) -> Self {
        self.extend_upper(IntVector::one())
    }


    /**
     * Convert a box of cells into the box of sides normal to the given axis.
     */
    pub fn to_sides(&self, axis: usize) -> Self {
        self.extend_upper(IntVector::unit(axis))
    }


    /**
     * Convert a box of cells into the box of edges parallel to the given
     * axis: cell-like along the axis, node-like across it.
     */
    pub fn to_edges(&self, axis: usize) -> Self {
        self.extend_upper(IntVector::one() - IntVector::unit(axis))
    }


    /**
     * Return this index space with the upper bound extended by `delta`.
     */
    pub fn extend_upper(&self, delta: IntVector<D>) -> Self {
        if self.is_empty() {
            return *self
        }
        let mut result = *self;
        for d in 0..D {
            result.upper[d] += delta[d]
        }
        result.normalized()
    }


    /**
     * Cyclically permute the axes so that the given axis comes first.
     */
    pub fn permuted(&self, axis: usize) -> Self {
        Self {
            lower: self.lower().permuted(axis).0,
            upper: self.upper().permuted(axis).0,
        }
    }


    /**
     * Return the one-index-thick slab of this space at the given position on
     * the given axis.
     */
    pub fn slab(&self, axis: usize, at: i64) -> Self {
        let mut result = *self;
        result.lower[axis] = at;
        result.upper[axis] = at;
        result.intersect(self)
    }


    /**
     * Return the linear offset for the given index, in a memory buffer
     * aligned with the start of this index space, where axis 0 varies
     * fastest.
     */
    pub fn offset_of(&self, index: [i64; D]) -> usize {
        let dim = self.dim();
        let mut offset = 0;
        for d in (0..D).rev() {
            offset = offset * dim[d] + (index[d] - self.lower[d]) as usize
        }
        offset
    }


    /**
     * Return an iterator over the contiguous runs (along axis 0) which this
     * index space occupies in the buffer allocated for `parent`. Runs are
     * visited in the same order as `Self::iter`. This space must be a subset
     * of the parent.
     */
    pub fn rows_in<'a>(&'a self, parent: &'a Self) -> impl Iterator<Item = Range<usize>> + 'a {
        debug_assert!(parent.contains_space(self));
        let run = self.dim().first().copied().unwrap_or(1);
        let mut lower_face = *self;
        if D > 0 && !self.is_empty() {
            lower_face.upper[0] = lower_face.lower[0];
        }
        lower_face.iter().map(move |index| {
            let start = parent.offset_of(index);
            start..start + run
        })
    }


    /**
     * Return an iterator which traverses the index space with axis 0
     * increasing fastest (Fortran-like order).
     */
    pub fn iter(&self) -> IndexIter<D> {
        IndexIter {
            space: *self,
            next: if self.is_empty() { None } else { Some(self.lower) },
        }
    }


    fn normalized(self) -> Self {
        if self.is_empty() {
            Self::empty()
        } else {
            self
        }
    }
}




// ============================================================================
impl<const D: usize> Default for IndexSpace<D> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<const D: usize> IntoIterator for &IndexSpace<D> {
    type Item = [i64; D];
    type IntoIter = IndexIter<D>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}




/**
 * Iterator over the indexes of an `IndexSpace`, axis 0 fastest.
 */
pub struct IndexIter<const D: usize> {
    space: IndexSpace<D>,
    next: Option<[i64; D]>,
}

impl<const D: usize> Iterator for IndexIter<D> {
    type Item = [i64; D];

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        let mut index = current;
        let mut d = 0;

        loop {
            if d == D {
                self.next = None;
                break
            }
            if index[d] < self.space.upper[d] {
                index[d] += 1;
                self.next = Some(index);
                break
            }
            index[d] = self.space.lower[d];
            d += 1;
        }
        Some(current)
    }
}




/**
 * Return the smallest index space containing every member of the list.
 */
pub fn bounding_box<const D: usize>(boxes: &[IndexSpace<D>]) -> IndexSpace<D> {
    boxes.iter().fold(IndexSpace::empty(), |a, b| a.bounding_box(b))
}




/**
 * Return the total number of indexes in a list of boxes (shared indexes are
 * counted once per box).
 */
pub fn total_len<const D: usize>(boxes: &[IndexSpace<D>]) -> usize {
    boxes.iter().map(IndexSpace::len).sum()
}




/**
 * Less imposing factory function to construct a 2D index space from
 * half-open ranges.
 */
pub fn range2d(di: Range<i64>, dj: Range<i64>) -> IndexSpace<2> {
    IndexSpace::from_ranges([di, dj])
}




// ============================================================================
#[cfg(test)]
mod test {

    use proptest::prelude::*;
    use crate::int_vector::IntVector;
    use super::{IndexSpace, range2d};

    fn space_strategy() -> impl Strategy<Value = IndexSpace<2>> {
        (-20i64..20, -20i64..20, 0i64..12, 0i64..12).prop_map(|(i, j, l, m)| {
            IndexSpace::new([i, j], [i + l - 1, j + m - 1])
        })
    }

    #[test]
    fn iteration_is_fastest_varying_first() {
        let space = range2d(0..2, 0..2);
        let indexes: Vec<_> = space.iter().collect();
        assert_eq!(indexes, vec![[0, 0], [1, 0], [0, 1], [1, 1]]);
        assert_eq!(space.iter().count(), space.len());
    }

    #[test]
    fn offsets_agree_with_iteration_order() {
        let space = IndexSpace::new([-2, 3, 1], [1, 5, 2]);
        for (n, index) in space.iter().enumerate() {
            assert_eq!(space.offset_of(index), n);
        }
    }

    #[test]
    fn rows_cover_a_sub_space() {
        let parent = range2d(0..10, 0..4);
        let child = range2d(2..5, 1..3);
        let rows: Vec<_> = child.rows_in(&parent).collect();
        assert_eq!(rows, vec![12..15, 22..25]);
    }

    #[test]
    fn empty_spaces_are_canonical() {
        let a = range2d(0..4, 0..4);
        let b = range2d(5..8, 0..4);
        assert!(a.intersect(&b).is_empty());
        assert_eq!(a.intersect(&b), IndexSpace::empty());
        assert_eq!(a.grow(IntVector::uniform(-3)), IndexSpace::empty());
        assert_eq!(IndexSpace::<2>::empty().len(), 0);
        assert_eq!(IndexSpace::<2>::empty().iter().count(), 0);
    }

    #[test]
    fn coarsen_rounds_toward_negative_infinity() {
        let b = IndexSpace::new([-3, 1], [5, 6]);
        assert_eq!(b.coarsen(IntVector::uniform(2)), IndexSpace::new([-2, 0], [2, 3]));
    }

    #[test]
    fn coincident_nodes_are_found_on_coarse_level() {
        let fine_nodes = IndexSpace::new([1], [9]);
        assert_eq!(fine_nodes.coarsen_nodes(IntVector::uniform(2)), IndexSpace::new([1], [4]));
        let fine_nodes = IndexSpace::new([-3], [-1]);
        assert_eq!(fine_nodes.coarsen_nodes(IntVector::uniform(2)), IndexSpace::new([-1], [-1]));
    }

    #[test]
    fn centering_conversions() {
        let b = range2d(0..4, 0..2);
        assert_eq!(b.to_nodes(), IndexSpace::new([0, 0], [4, 2]));
        assert_eq!(b.to_sides(1), IndexSpace::new([0, 0], [3, 2]));
        assert_eq!(b.to_edges(0), IndexSpace::new([0, 0], [3, 2]));
        assert_eq!(b.to_edges(1), IndexSpace::new([0, 0], [4, 1]));
        assert_eq!(b.permuted(1), IndexSpace::new([0, 0], [1, 3]));
    }

    proptest! {
        #[test]
        fn intersection_is_commutative(a in space_strategy(), b in space_strategy()) {
            prop_assert_eq!(a.intersect(&b), b.intersect(&a));
            prop_assert!(a.intersect(&IndexSpace::empty()).is_empty());
        }

        #[test]
        fn refine_undoes_aligned_coarsen(a in space_strategy(), r in 1i64..5) {
            let ratio = IntVector::uniform(r);
            let aligned = a.refine(ratio);
            prop_assert_eq!(aligned.coarsen(ratio).refine(ratio), aligned);
        }

        #[test]
        fn shift_commutes_with_intersection(a in space_strategy(), b in space_strategy(), o in (-5i64..5, -5i64..5)) {
            let offset = IntVector::new([o.0, o.1]);
            prop_assert_eq!(a.intersect(&b).shift(offset), a.shift(offset).intersect(&b.shift(offset)));
        }
    }
}
