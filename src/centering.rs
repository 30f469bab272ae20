//! Where values sit relative to the cells of a patch, and the index spaces
//! that each kind of centering stores.

use serde::{Deserialize, Serialize};
use crate::index_space::IndexSpace;
use crate::int_vector::IntVector;




/// Location of array values within the cells of a patch. Outer centerings
/// store only the values on the patch boundary and carry no ghost data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Centering {
    Cell,
    Node,
    Face,
    Edge,
    Side,
    Outernode,
    Outerside,
}




/// The index space family of a centering. Two centerings can exchange data
/// only if they belong to the same family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Family {
    Cell,
    Node,
    Side,
    Face,
    Edge,
}




impl Centering {
    /// Return the number of separately stored arrays (components) for data
    /// with this centering in `D` dimensions.
    pub fn num_components(self, dim: usize) -> usize {
        match self {
            Self::Cell | Self::Node => 1,
            Self::Face | Self::Edge | Self::Side => dim,
            Self::Outernode | Self::Outerside => 2 * dim,
        }
    }

    pub fn family(self) -> Family {
        match self {
            Self::Cell => Family::Cell,
            Self::Node | Self::Outernode => Family::Node,
            Self::Side | Self::Outerside => Family::Side,
            Self::Face => Family::Face,
            Self::Edge => Family::Edge,
        }
    }

    pub fn is_outer(self) -> bool {
        matches!(self, Self::Outernode | Self::Outerside)
    }

    /// Return the axis associated with a component, if the centering has
    /// per-axis components. For outer centerings, components `2d` and `2d+1`
    /// are the lower and upper boundary normal to axis `d`.
    pub fn component_axis(self, component: usize) -> Option<usize> {
        match self {
            Self::Cell | Self::Node => None,
            Self::Face | Self::Edge | Self::Side => Some(component),
            Self::Outernode | Self::Outerside => Some(component / 2),
        }
    }

    /// Return the index of the family-level space that a component lives
    /// in; components with the same family component are comparable.
    pub fn family_component(self, component: usize) -> usize {
        match self {
            Self::Cell | Self::Node | Self::Outernode => 0,
            Self::Face | Self::Edge | Self::Side => component,
            Self::Outerside => component / 2,
        }
    }

    /// Return the index space stored by one component of patch data with
    /// this centering, for a patch with the given cell box and ghost width.
    /// The ghost width is ignored for outer centerings.
    pub fn component_space<const D: usize>(
        self,
        cells: &IndexSpace<D>,
        ghost: IntVector<D>,
        component: usize,
    ) -> IndexSpace<D> {
        match self {
            Self::Outernode => outernode_slab(cells, component),
            Self::Outerside => {
                let axis = component / 2;
                let sides = cells.to_sides(axis);
                let at = if component % 2 == 0 { sides.lower()[axis] } else { sides.upper()[axis] };
                sides.slab(axis, at)
            }
            _ => self.family().space(&cells.grow(ghost), self.family_component(component)),
        }
    }

    /// Map an offset given in cell index space into the index order of a
    /// component: face components permute their axes.
    pub fn component_offset<const D: usize>(self, component: usize, offset: IntVector<D>) -> IntVector<D> {
        match self {
            Self::Face => offset.permuted(component),
            _ => offset,
        }
    }
}




impl Family {
    /// Return the family-level index space of the given cell region for one
    /// family component (an axis, for per-axis families).
    pub fn space<const D: usize>(self, cells: &IndexSpace<D>, component: usize) -> IndexSpace<D> {
        match self {
            Self::Cell => *cells,
            Self::Node => cells.to_nodes(),
            Self::Side => cells.to_sides(component),
            Self::Face => cells.to_sides(component).permuted(component),
            Self::Edge => cells.to_edges(component),
        }
    }
}




/// The boundary nodes of a cell box, split into disjoint slabs. Slab `2d`
/// (`2d+1`) is the lower (upper) node plane normal to axis `d`, trimmed by
/// one node at both ends along every axis before `d`, so that each boundary
/// node appears in exactly one slab.
fn outernode_slab<const D: usize>(cells: &IndexSpace<D>, component: usize) -> IndexSpace<D> {
    let axis = component / 2;
    let nodes = cells.to_nodes();
    if nodes.is_empty() {
        return nodes
    }
    let at = if component % 2 == 0 { nodes.lower()[axis] } else { nodes.upper()[axis] };
    let mut lower = nodes.lower();
    let mut upper = nodes.upper();
    for d in 0..axis {
        lower[d] += 1;
        upper[d] -= 1;
    }
    lower[axis] = at;
    upper[axis] = at;
    IndexSpace::new(lower.0, upper.0)
}




// ============================================================================
#[cfg(test)]
mod test {

    use crate::index_space::{IndexSpace, range2d, total_len};
    use crate::int_vector::IntVector;
    use super::Centering;

    fn components(centering: Centering, cells: &IndexSpace<2>) -> Vec<IndexSpace<2>> {
        (0..centering.num_components(2))
            .map(|k| centering.component_space(cells, IntVector::zero(), k))
            .collect()
    }

    #[test]
    fn outernode_slabs_partition_the_boundary() {
        let cells = range2d(0..4, 0..3);
        let slabs = components(Centering::Outernode, &cells);
        let nodes = cells.to_nodes();
        let interior = nodes.grow(IntVector::uniform(-1));

        assert_eq!(total_len(&slabs), nodes.len() - interior.len());

        for index in nodes.iter() {
            let count = slabs.iter().filter(|s| s.contains(index)).count();
            let expected = if interior.contains(index) { 0 } else { 1 };
            assert_eq!(count, expected, "node {:?}", index);
        }
    }

    #[test]
    fn outernode_in_one_dimension_is_the_two_end_nodes() {
        let cells = IndexSpace::new([0], [3]);
        let slabs: Vec<_> = (0..2).map(|k| Centering::Outernode.component_space(&cells, IntVector::zero(), k)).collect();
        assert_eq!(slabs, vec![IndexSpace::new([0], [0]), IndexSpace::new([4], [4])]);
    }

    #[test]
    fn outerside_components_are_side_planes() {
        let cells = range2d(0..4, 0..3);
        let sides = components(Centering::Outerside, &cells);
        assert_eq!(sides[0], IndexSpace::new([0, 0], [0, 2]));
        assert_eq!(sides[1], IndexSpace::new([4, 0], [4, 2]));
        assert_eq!(sides[2], IndexSpace::new([0, 0], [3, 0]));
        assert_eq!(sides[3], IndexSpace::new([0, 3], [3, 3]));
    }

    #[test]
    fn ghosts_apply_to_interior_centerings() {
        let cells = range2d(0..4, 0..3);
        let g = IntVector::uniform(1);
        assert_eq!(Centering::Cell.component_space(&cells, g, 0), IndexSpace::new([-1, -1], [4, 3]));
        assert_eq!(Centering::Node.component_space(&cells, g, 0), IndexSpace::new([-1, -1], [5, 4]));
        assert_eq!(Centering::Face.component_space(&cells, g, 1), IndexSpace::new([-1, -1], [4, 4]).permuted(1));
        assert_eq!(Centering::Outernode.component_space(&cells, g, 0), IndexSpace::new([0, 0], [0, 3]));
    }
}
