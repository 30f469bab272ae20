use crate::centering::Centering;
use crate::error::{Error, Result};
use crate::index_space::{IndexSpace, total_len};
use crate::int_vector::IntVector;




/**
 * One piece of an overlap: a region of destination indexes belonging to a
 * single destination component, filled from a single source component.
 */
#[derive(Clone, Debug, PartialEq)]
pub struct OverlapBox<const D: usize> {
    pub dst_component: usize,
    pub src_component: usize,
    pub space: IndexSpace<D>,
}




/**
 * Describes which destination indexes a transfer between two patches touches,
 * expressed in the destination's index space, along with the offset (and
 * possibly a coarsening ratio) mapping them back to source indexes. The
 * pieces are disjoint within each destination component, and their order is
 * the order in which data is packed.
 */
#[derive(Clone, Debug, PartialEq)]
pub struct BoxOverlap<const D: usize> {
    dst_centering: Centering,
    src_centering: Centering,
    boxes: Vec<OverlapBox<D>>,
    offset: IntVector<D>,
    ratio: IntVector<D>,
}




// ============================================================================
impl<const D: usize> BoxOverlap<D> {


    /**
     * Return an overlap with no pieces.
     */
    pub fn empty(centering: Centering) -> Self {
        Self {
            dst_centering: centering,
            src_centering: centering,
            boxes: Vec::new(),
            offset: IntVector::zero(),
            ratio: IntVector::one(),
        }
    }


    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }


    pub fn boxes(&self) -> &[OverlapBox<D>] {
        &self.boxes
    }


    /**
     * Return the destination regions, without their component tags.
     */
    pub fn dst_spaces(&self) -> Vec<IndexSpace<D>> {
        self.boxes.iter().map(|b| b.space).collect()
    }


    /**
     * Return the total number of destination indexes in the overlap.
     */
    pub fn len(&self) -> usize {
        total_len(&self.dst_spaces())
    }


    /**
     * The offset from the source to the destination, in cell index space.
     */
    pub fn source_offset(&self) -> IntVector<D> {
        self.offset
    }


    pub fn ratio(&self) -> IntVector<D> {
        self.ratio
    }


    pub fn dst_centering(&self) -> Centering {
        self.dst_centering
    }


    pub fn src_centering(&self) -> Centering {
        self.src_centering
    }


    /**
     * Map a destination index in one of the overlap pieces to the source
     * index it is read from.
     */
    pub fn source_index(&self, piece: &OverlapBox<D>, index: [i64; D]) -> [i64; D] {
        let offset = self.dst_centering.component_offset(piece.dst_component, self.offset);
        let ratio = self.dst_centering.component_offset(piece.dst_component, self.ratio);
        let mut result = index;
        for d in 0..D {
            result[d] = (index[d] - offset[d]) * ratio[d];
        }
        result
    }


    /**
     * Return a copy of this overlap, limited to the given region of
     * destination cells.
     */
    pub fn restricted(&self, cells: &IndexSpace<D>) -> Self {
        let family = self.dst_centering.family();
        let boxes = self.boxes.iter().filter_map(|piece| {
            let limit = family.space(cells, self.dst_centering.family_component(piece.dst_component));
            let space = piece.space.intersect(&limit);
            if space.is_empty() {
                None
            } else {
                Some(OverlapBox { space, ..*piece })
            }
        }).collect();
        Self { boxes, ..self.clone() }
    }
}




/**
 * Describes a request to compute the overlap between a source and a
 * destination patch. Built with `OverlapRequest::new` and adjusted with the
 * chained setters; `calculate` does the work.
 */
#[derive(Clone, Debug)]
pub struct OverlapRequest<const D: usize> {
    src_box: IndexSpace<D>,
    dst_box: IndexSpace<D>,
    src_centering: Centering,
    dst_centering: Centering,
    ghost_width: IntVector<D>,
    offset: IntVector<D>,
    ratio: IntVector<D>,
    restrict: Option<IndexSpace<D>>,
}




// ============================================================================
impl<const D: usize> OverlapRequest<D> {


    pub fn new(src_box: IndexSpace<D>, dst_box: IndexSpace<D>, centering: Centering) -> Self {
        Self {
            src_box,
            dst_box,
            src_centering: centering,
            dst_centering: centering,
            ghost_width: IntVector::zero(),
            offset: IntVector::zero(),
            ratio: IntVector::one(),
            restrict: None,
        }
    }

    pub fn source_centering(mut self, centering: Centering) -> Self {
        self.src_centering = centering;
        self
    }

    pub fn ghost_width(mut self, ghost_width: IntVector<D>) -> Self {
        self.ghost_width = ghost_width;
        self
    }

    pub fn offset(mut self, offset: IntVector<D>) -> Self {
        self.offset = offset;
        self
    }

    pub fn ratio(mut self, ratio: IntVector<D>) -> Self {
        self.ratio = ratio;
        self
    }

    pub fn restrict(mut self, restrict: Option<IndexSpace<D>>) -> Self {
        self.restrict = restrict;
        self
    }


    /**
     * Compute the overlap. The destination fill region is the destination
     * box grown by the ghost width (or the boundary slabs of the box, for
     * outer centerings), clipped to the restriction region if one is given.
     * Source data is read from the interior of the source box only. A
     * non-unit ratio maps fine source nodes onto the coincident destination
     * nodes, and is only meaningful for node-family data.
     */
    pub fn calculate(&self) -> Result<BoxOverlap<D>> {
        let family = self.dst_centering.family();

        if self.src_centering.family() != family {
            return Err(Error::Geometry(format!(
                "cannot transfer {:?} data into {:?} data",
                self.src_centering, self.dst_centering)))
        }
        if !self.ratio.is_positive() {
            return Err(Error::Geometry(format!("invalid ratio {:?}", self.ratio)))
        }
        if !self.ratio.is_one() && family != crate::centering::Family::Node {
            return Err(Error::Geometry(format!(
                "a ratio of {:?} is only supported for node data, not {:?}",
                self.ratio, self.src_centering)))
        }
        if !self.ghost_width.is_non_negative() {
            return Err(Error::Geometry(format!("negative ghost width {:?}", self.ghost_width)))
        }

        let src_spaces: Vec<_> = (0..self.src_centering.num_components(D))
            .map(|k| {
                let space = self.src_centering.component_space(&self.src_box, IntVector::zero(), k);
                let space = if self.ratio.is_one() { space } else { space.coarsen_nodes(self.ratio) };
                space.shift(self.src_centering.component_offset(k, self.offset))
            })
            .collect();

        let mut boxes = Vec::new();

        for k in 0..self.dst_centering.num_components(D) {
            let family_component = self.dst_centering.family_component(k);
            let mut fill = self.dst_centering.component_space(&self.dst_box, self.ghost_width, k);

            if let Some(restrict) = &self.restrict {
                fill = fill.intersect(&family.space(restrict, family_component))
            }
            if fill.is_empty() {
                continue
            }
            for (j, src) in src_spaces.iter().enumerate() {
                if self.src_centering.family_component(j) != family_component {
                    continue
                }
                let space = fill.intersect(src);

                if !space.is_empty() {
                    boxes.push(OverlapBox { dst_component: k, src_component: j, space })
                }
            }
        }

        Ok(BoxOverlap {
            dst_centering: self.dst_centering,
            src_centering: self.src_centering,
            boxes,
            offset: self.offset,
            ratio: self.ratio,
        })
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use proptest::prelude::*;
    use crate::centering::Centering;
    use crate::error::Error;
    use crate::index_space::{IndexSpace, range2d};
    use crate::int_vector::IntVector;
    use super::OverlapRequest;

    fn space_strategy() -> impl Strategy<Value = IndexSpace<2>> {
        (-10i64..10, -10i64..10, 1i64..8, 1i64..8).prop_map(|(i, j, l, m)| {
            IndexSpace::new([i, j], [i + l - 1, j + m - 1])
        })
    }

    #[test]
    fn cell_overlap_with_ghosts() {
        let src = range2d(0..4, 0..4);
        let dst = range2d(4..8, 0..4);
        let overlap = OverlapRequest::new(src, dst, Centering::Cell)
            .ghost_width(IntVector::uniform(1))
            .calculate()
            .unwrap();
        assert_eq!(overlap.dst_spaces(), vec![IndexSpace::new([3, 0], [3, 3])]);
    }

    #[test]
    fn adjacent_node_boxes_share_a_plane() {
        let src = range2d(0..4, 0..4);
        let dst = range2d(4..8, 0..4);
        let overlap = OverlapRequest::new(src, dst, Centering::Node).calculate().unwrap();
        assert_eq!(overlap.dst_spaces(), vec![IndexSpace::new([4, 0], [4, 4])]);
    }

    #[test]
    fn outernode_overlap_is_decomposed_by_slab() {
        let src = IndexSpace::new([0], [3]);
        let dst = IndexSpace::new([4], [7]);
        let overlap = OverlapRequest::new(src, dst, Centering::Outernode).calculate().unwrap();
        assert_eq!(overlap.boxes().len(), 1);
        let piece = &overlap.boxes()[0];
        assert_eq!((piece.dst_component, piece.src_component), (0, 1));
        assert_eq!(piece.space, IndexSpace::new([4], [4]));
    }

    #[test]
    fn node_overlap_with_ratio_selects_coincident_nodes() {
        let fine = IndexSpace::new([0], [7]);
        let coarse = IndexSpace::new([0], [7]);
        let overlap = OverlapRequest::new(fine, coarse, Centering::Outernode)
            .source_centering(Centering::Outernode)
            .ratio(IntVector::uniform(2))
            .calculate();
        // Fine boundary nodes 0 and 8 land on coarse nodes 0 and 4, but only
        // coarse node 0 is on the boundary of the coarse box.
        let overlap = overlap.unwrap();
        assert_eq!(overlap.dst_spaces(), vec![IndexSpace::new([0], [0])]);

        let overlap = OverlapRequest::new(fine, coarse, Centering::Node)
            .source_centering(Centering::Outernode)
            .ratio(IntVector::uniform(2))
            .calculate()
            .unwrap();
        assert_eq!(overlap.dst_spaces(), vec![IndexSpace::new([0], [0]), IndexSpace::new([4], [4])]);
        assert_eq!(overlap.source_index(&overlap.boxes()[1], [4]), [8]);
    }

    #[test]
    fn incompatible_requests_are_rejected() {
        let b = range2d(0..4, 0..4);
        let result = OverlapRequest::new(b, b, Centering::Cell).source_centering(Centering::Node).calculate();
        assert!(matches!(result, Err(Error::Geometry(_))));
        let result = OverlapRequest::new(b, b, Centering::Cell).ratio(IntVector::uniform(2)).calculate();
        assert!(matches!(result, Err(Error::Geometry(_))));
    }

    #[test]
    fn face_offsets_are_permuted() {
        let src = range2d(0..4, 0..4);
        let dst = range2d(0..4, 10..14);
        let offset = IntVector::new([0, 10]);
        let overlap = OverlapRequest::new(src, dst, Centering::Face).offset(offset).calculate().unwrap();
        let piece = overlap.boxes().iter().find(|p| p.dst_component == 1).unwrap();
        let index = piece.space.iter().next().unwrap();
        let source = overlap.source_index(piece, index);
        assert_eq!(source, [index[0] - 10, index[1]]);
    }

    #[test]
    fn restriction_limits_the_fill() {
        let src = range2d(0..8, 0..8);
        let dst = range2d(0..8, 0..8);
        let restrict = range2d(2..4, 2..4);
        let overlap = OverlapRequest::new(src, dst, Centering::Cell).restrict(Some(restrict)).calculate().unwrap();
        assert_eq!(overlap.dst_spaces(), vec![restrict]);
        assert!(overlap.restricted(&range2d(20..22, 0..2)).is_empty());
    }

    proptest! {
        #[test]
        fn shifted_overlap_matches_shifted_intersection(a in space_strategy(), b in space_strategy(), o in (-6i64..6, -6i64..6)) {
            let offset = IntVector::new([o.0, o.1]);
            let overlap = OverlapRequest::new(a, b, Centering::Cell).offset(offset).calculate().unwrap();
            let expected = a.shift(offset).intersect(&b);
            let found: Vec<_> = overlap.dst_spaces();

            if expected.is_empty() {
                prop_assert!(overlap.is_empty());
            } else {
                prop_assert_eq!(found.clone(), vec![expected]);
                prop_assert_eq!(found[0].shift(-offset), a.intersect(&b.shift(-offset)));
            }
        }
    }
}
