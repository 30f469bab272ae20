use std::collections::BTreeMap;
use crate::centering::Centering;
use crate::error::{Error, Result};
use crate::index_space::IndexSpace;
use crate::int_vector::IntVector;
use crate::variable::{Variable, VariableId};




/// Identifies a patch by its position in the box level it belongs to.
pub type PatchId = usize;




/**
 * A rectangular array of `f64` values over an index space, with `depth`
 * values per index. Axis 0 varies fastest and the depth index slowest.
 */
#[derive(Clone, Debug, PartialEq)]
pub struct ArrayData<const D: usize> {
    space: IndexSpace<D>,
    depth: usize,
    values: Vec<f64>,
}




// ============================================================================
impl<const D: usize> ArrayData<D> {




    /**
     * Create zero-filled data over the given index space.
     */
    pub fn new(space: IndexSpace<D>, depth: usize) -> Self {
        Self {
            space,
            depth,
            values: vec![0.0; space.len() * depth],
        }
    }




    /**
     * Generate data over the given index space, with values defined from a
     * closure of the index and the depth.
     */
    pub fn from_function<F>(space: IndexSpace<D>, depth: usize, f: F) -> Self
    where
        F: Fn([i64; D], usize) -> f64
    {
        let values = (0..depth)
            .flat_map(|d| space.iter().map(move |index| (index, d)))
            .map(|(index, d)| f(index, d))
            .collect();
        Self { space, depth, values }
    }




    pub fn space(&self) -> &IndexSpace<D> {
        &self.space
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }




    /**
     * Return the value at the given index and depth, or `None` if the index
     * is outside this array.
     */
    pub fn get(&self, index: [i64; D], depth: usize) -> Option<f64> {
        self.linear(index, depth).map(|n| self.values[n])
    }




    pub fn get_mut(&mut self, index: [i64; D], depth: usize) -> Option<&mut f64> {
        match self.linear(index, depth) {
            Some(n) => Some(&mut self.values[n]),
            None => None,
        }
    }




    /**
     * Fill the whole array, or only the part inside `region`, with a value.
     */
    pub fn fill(&mut self, value: f64, region: Option<&IndexSpace<D>>) {
        match region {
            None => self.values.iter_mut().for_each(|x| *x = value),
            Some(region) => {
                let region = region.intersect(&self.space);
                for d in 0..self.depth {
                    for index in &region {
                        if let Some(x) = self.get_mut(index, d) {
                            *x = value
                        }
                    }
                }
            }
        }
    }




    fn linear(&self, index: [i64; D], depth: usize) -> Option<usize> {
        if depth < self.depth && self.space.contains(index) {
            Some(depth * self.space.len() + self.space.offset_of(index))
        } else {
            None
        }
    }
}




/**
 * The data of one variable on one patch: one array per centering component,
 * each covering the component's index space (ghosts included), and the
 * simulation time the data represents.
 */
#[derive(Clone, Debug, PartialEq)]
pub struct PatchData<const D: usize> {
    centering: Centering,
    cells: IndexSpace<D>,
    ghost_width: IntVector<D>,
    time: f64,
    arrays: Vec<ArrayData<D>>,
}




// ============================================================================
impl<const D: usize> PatchData<D> {


    pub fn new(cells: IndexSpace<D>, variable: &Variable<D>, time: f64) -> Self {
        let centering = variable.centering;
        let arrays = (0..centering.num_components(D))
            .map(|k| ArrayData::new(centering.component_space(&cells, variable.ghost_width, k), variable.depth))
            .collect();
        Self {
            centering,
            cells,
            ghost_width: variable.ghost_width,
            time,
            arrays,
        }
    }


    pub fn centering(&self) -> Centering {
        self.centering
    }


    pub fn cells(&self) -> &IndexSpace<D> {
        &self.cells
    }


    pub fn ghost_width(&self) -> IntVector<D> {
        self.ghost_width
    }


    pub fn depth(&self) -> usize {
        self.arrays.first().map_or(0, ArrayData::depth)
    }


    pub fn time(&self) -> f64 {
        self.time
    }


    pub fn set_time(&mut self, time: f64) {
        self.time = time
    }


    pub fn num_components(&self) -> usize {
        self.arrays.len()
    }


    pub fn array(&self, component: usize) -> Result<&ArrayData<D>> {
        let centering = self.centering;
        self.arrays
            .get(component)
            .ok_or_else(|| Error::Protocol(format!("{:?} data has no component {}", centering, component)))
    }


    pub fn array_mut(&mut self, component: usize) -> Result<&mut ArrayData<D>> {
        let centering = self.centering;
        self.arrays
            .get_mut(component)
            .ok_or_else(|| Error::Protocol(format!("{:?} data has no component {}", centering, component)))
    }


    /**
     * Return the value at an index, looking through the components in order
     * and taking the first that contains it. Meant for centerings whose
     * components share one index space, such as outernode data.
     */
    pub fn value_at(&self, index: [i64; D], depth: usize) -> Option<f64> {
        self.arrays.iter().find_map(|a| a.get(index, depth))
    }


    pub fn fill(&mut self, value: f64) {
        for array in &mut self.arrays {
            array.fill(value, None)
        }
    }
}




/**
 * A patch: a box of cells owned by one process, holding the data of every
 * variable allocated on it.
 */
#[derive(Clone, Debug)]
pub struct Patch<const D: usize> {
    id: PatchId,
    cells: IndexSpace<D>,
    owner: usize,
    data: BTreeMap<VariableId, PatchData<D>>,
}




// ============================================================================
impl<const D: usize> Patch<D> {


    pub fn new(id: PatchId, cells: IndexSpace<D>, owner: usize) -> Self {
        Self { id, cells, owner, data: BTreeMap::new() }
    }


    pub fn id(&self) -> PatchId {
        self.id
    }


    pub fn cells(&self) -> &IndexSpace<D> {
        &self.cells
    }


    pub fn owner(&self) -> usize {
        self.owner
    }


    /**
     * Allocate zero-filled data for a variable, replacing any existing data.
     */
    pub fn allocate(&mut self, id: VariableId, variable: &Variable<D>, time: f64) {
        self.data.insert(id, PatchData::new(self.cells, variable, time));
    }


    pub fn deallocate(&mut self, id: VariableId) {
        self.data.remove(&id);
    }


    pub fn is_allocated(&self, id: VariableId) -> bool {
        self.data.contains_key(&id)
    }


    pub fn data(&self, id: VariableId) -> Result<&PatchData<D>> {
        let patch = self.id;
        self.data
            .get(&id)
            .ok_or_else(|| Error::Protocol(format!("{} is not allocated on patch {}", id, patch)))
    }


    pub fn data_mut(&mut self, id: VariableId) -> Result<&mut PatchData<D>> {
        let patch = self.id;
        self.data
            .get_mut(&id)
            .ok_or_else(|| Error::Protocol(format!("{} is not allocated on patch {}", id, patch)))
    }


    /**
     * Borrow the data of two different variables, the first immutably and
     * the second mutably.
     */
    pub fn data_pair_mut(&mut self, src: VariableId, dst: VariableId) -> Result<(&PatchData<D>, &mut PatchData<D>)> {
        if src == dst {
            return Err(Error::Configuration(format!("cannot borrow {} as both source and destination", src)))
        }
        let patch = self.id;
        let missing = |id: VariableId| Error::Protocol(format!("{} is not allocated on patch {}", id, patch));

        let mut src_data = None;
        let mut dst_data = None;

        for (id, data) in self.data.iter_mut() {
            if *id == src {
                src_data = Some(&*data)
            } else if *id == dst {
                dst_data = Some(data)
            }
        }
        Ok((src_data.ok_or_else(|| missing(src))?, dst_data.ok_or_else(|| missing(dst))?))
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use crate::centering::Centering;
    use crate::index_space::{IndexSpace, range2d};
    use crate::int_vector::IntVector;
    use crate::variable::{Variable, VariableId};
    use super::{ArrayData, Patch, PatchData};

    fn variable(centering: Centering, depth: usize, ghost: i64) -> Variable<2> {
        Variable { name: "q".to_string(), centering, depth, ghost_width: IntVector::uniform(ghost) }
    }

    #[test]
    fn depth_is_the_slowest_index() {
        let a = ArrayData::from_function(range2d(0..2, 0..2), 2, |i, d| (i[0] + 10 * i[1] + 100 * d as i64) as f64);
        assert_eq!(a.values(), &[0.0, 1.0, 10.0, 11.0, 100.0, 101.0, 110.0, 111.0]);
        assert_eq!(a.get([1, 1], 1), Some(111.0));
        assert_eq!(a.get([2, 0], 0), None);
        assert_eq!(a.get([0, 0], 2), None);
    }

    #[test]
    fn fill_a_region() {
        let mut a = ArrayData::new(range2d(0..4, 0..4), 1);
        a.fill(1.0, Some(&range2d(3..6, 3..6)));
        assert_eq!(a.values().iter().sum::<f64>(), 1.0);
        assert_eq!(a.get([3, 3], 0), Some(1.0));
    }

    #[test]
    fn patch_data_has_one_array_per_component() {
        let cells = range2d(0..4, 0..4);
        let node = PatchData::new(cells, &variable(Centering::Node, 1, 1), 0.0);
        assert_eq!(node.num_components(), 1);
        assert_eq!(node.array(0).unwrap().space(), &IndexSpace::new([-1, -1], [5, 5]));

        let outer = PatchData::new(cells, &variable(Centering::Outernode, 2, 0), 0.0);
        assert_eq!(outer.num_components(), 4);
        assert_eq!(outer.depth(), 2);
        assert_eq!(outer.value_at([4, 4], 1), Some(0.0));
        assert_eq!(outer.value_at([2, 2], 0), None);
        assert!(outer.array(4).is_err());
    }

    #[test]
    fn missing_data_is_reported() {
        let mut patch = Patch::new(3, range2d(0..4, 0..4), 0);
        patch.allocate(VariableId(0), &variable(Centering::Cell, 1, 0), 0.0);
        patch.allocate(VariableId(1), &variable(Centering::Cell, 1, 0), 0.0);
        assert!(patch.data(VariableId(0)).is_ok());
        assert!(patch.data(VariableId(2)).is_err());
        assert!(patch.data_pair_mut(VariableId(0), VariableId(1)).is_ok());
        assert!(patch.data_pair_mut(VariableId(0), VariableId(0)).is_err());
        patch.deallocate(VariableId(0));
        assert!(!patch.is_allocated(VariableId(0)));
    }
}
