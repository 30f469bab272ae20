use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use crate::error::{Error, Result};
use crate::index_space::IndexSpace;
use crate::int_vector::IntVector;
use crate::patch::{Patch, PatchId};
use crate::spatial_index::BoxTree;
use crate::variable::{Variable, VariableId};




/**
 * The global box metadata of a level: every box, with its owning process.
 * A box's id is its position in the list, so processes that build the same
 * list agree on every id.
 */
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoxLevel<const D: usize> {
    boxes: Vec<IndexSpace<D>>,
    owners: Vec<usize>,
}




// ============================================================================
impl<const D: usize> BoxLevel<D> {


    pub fn new(boxes: Vec<(IndexSpace<D>, usize)>) -> Self {
        let (boxes, owners) = boxes.into_iter().unzip();
        Self { boxes, owners }
    }


    pub fn len(&self) -> usize {
        self.boxes.len()
    }


    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }


    pub fn space(&self, id: PatchId) -> Result<&IndexSpace<D>> {
        self.boxes.get(id).ok_or_else(|| Error::Geometry(format!("no box with id {}", id)))
    }


    pub fn owner(&self, id: PatchId) -> Result<usize> {
        self.owners.get(id).copied().ok_or_else(|| Error::Geometry(format!("no box with id {}", id)))
    }


    /**
     * Iterate over `(id, box, owner)` in ascending id order.
     */
    pub fn iter(&self) -> impl Iterator<Item = (PatchId, &IndexSpace<D>, usize)> + '_ {
        self.boxes.iter().zip(&self.owners).enumerate().map(|(id, (b, &owner))| (id, b, owner))
    }


    pub fn local_ids(&self, rank: usize) -> impl Iterator<Item = PatchId> + '_ {
        self.iter().filter(move |&(_, _, owner)| owner == rank).map(|(id, _, _)| id)
    }


    /**
     * Return the same boxes, with the same ids and owners, coarsened by the
     * given ratio.
     */
    pub fn coarsened(&self, ratio: IntVector<D>) -> Self {
        Self {
            boxes: self.boxes.iter().map(|b| b.coarsen(ratio)).collect(),
            owners: self.owners.clone(),
        }
    }


    pub fn refined(&self, ratio: IntVector<D>) -> Self {
        Self {
            boxes: self.boxes.iter().map(|b| b.refine(ratio)).collect(),
            owners: self.owners.clone(),
        }
    }


    /**
     * Build a spatial index over the boxes, for boxes passing the filter.
     */
    pub fn tree<F: Fn(usize) -> bool>(&self, keep_owner: F) -> BoxTree<D, PatchId> {
        self.iter()
            .filter(|&(_, _, owner)| keep_owner(owner))
            .map(|(id, b, _)| (*b, id))
            .collect()
    }
}




/**
 * One level of a patch hierarchy as seen from a single process: the global
 * box metadata, plus the patches this process owns and their data.
 */
#[derive(Clone, Debug)]
pub struct PatchLevel<const D: usize> {
    number: usize,
    ratio: IntVector<D>,
    boxes: BoxLevel<D>,
    rank: usize,
    patches: BTreeMap<PatchId, Patch<D>>,
}




// ============================================================================
impl<const D: usize> PatchLevel<D> {


    /**
     * Create a level. `ratio` is the refinement ratio of this level relative
     * to level zero. Patches are created for the boxes owned by `rank`.
     */
    pub fn new(number: usize, ratio: IntVector<D>, boxes: BoxLevel<D>, rank: usize) -> Self {
        let patches = boxes
            .iter()
            .filter(|&(_, _, owner)| owner == rank)
            .map(|(id, b, owner)| (id, Patch::new(id, *b, owner)))
            .collect();
        Self { number, ratio, boxes, rank, patches }
    }


    /**
     * Return a level with the same patch ids and owners, with every box
     * coarsened by `ratio`, and no data allocated.
     */
    pub fn coarsened(&self, ratio: IntVector<D>) -> Self {
        let mut level_ratio = self.ratio;
        for d in 0..D {
            level_ratio[d] = (level_ratio[d] / ratio[d]).max(1)
        }
        Self::new(self.number, level_ratio, self.boxes.coarsened(ratio), self.rank)
    }


    pub fn number(&self) -> usize {
        self.number
    }


    pub fn ratio_to_level_zero(&self) -> IntVector<D> {
        self.ratio
    }


    pub fn boxes(&self) -> &BoxLevel<D> {
        &self.boxes
    }


    pub fn rank(&self) -> usize {
        self.rank
    }


    pub fn patch(&self, id: PatchId) -> Result<&Patch<D>> {
        let number = self.number;
        self.patches
            .get(&id)
            .ok_or_else(|| Error::Protocol(format!("patch {} is not local to level {}", id, number)))
    }


    pub fn patch_mut(&mut self, id: PatchId) -> Result<&mut Patch<D>> {
        let number = self.number;
        self.patches
            .get_mut(&id)
            .ok_or_else(|| Error::Protocol(format!("patch {} is not local to level {}", id, number)))
    }


    pub fn patches(&self) -> impl Iterator<Item = &Patch<D>> {
        self.patches.values()
    }


    pub fn patches_mut(&mut self) -> impl Iterator<Item = &mut Patch<D>> {
        self.patches.values_mut()
    }


    pub fn allocate(&mut self, id: VariableId, variable: &Variable<D>, time: f64) {
        for patch in self.patches.values_mut() {
            patch.allocate(id, variable, time)
        }
    }


    pub fn deallocate(&mut self, id: VariableId) {
        for patch in self.patches.values_mut() {
            patch.deallocate(id)
        }
    }
}




/**
 * An ordered stack of levels, coarsest first. Each level's ratio to level
 * zero must be an integer multiple of the coarser level's.
 */
#[derive(Clone, Debug)]
pub struct PatchHierarchy<const D: usize> {
    levels: Vec<PatchLevel<D>>,
}




// ============================================================================
impl<const D: usize> PatchHierarchy<D> {


    pub fn new(levels: Vec<PatchLevel<D>>) -> Result<Self> {
        if let Some(level) = levels.iter().find(|level| !level.ratio.is_positive()) {
            return Err(Error::Configuration(format!(
                "level {} has non-positive ratio {:?}",
                level.number, level.ratio)))
        }
        for pair in levels.windows(2) {
            let (coarse, fine) = (pair[0].ratio, pair[1].ratio);
            if (0..D).any(|d| fine[d] % coarse[d] != 0 || fine[d] < coarse[d]) {
                return Err(Error::Configuration(format!(
                    "level {} ratio {:?} is not a refinement of {:?}",
                    pair[1].number, fine, coarse)))
            }
        }
        Ok(Self { levels })
    }


    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }


    pub fn level(&self, number: usize) -> Result<&PatchLevel<D>> {
        self.levels.get(number).ok_or_else(|| Error::Configuration(format!("no level {}", number)))
    }


    pub fn level_mut(&mut self, number: usize) -> Result<&mut PatchLevel<D>> {
        self.levels.get_mut(number).ok_or_else(|| Error::Configuration(format!("no level {}", number)))
    }


    /**
     * Return the refinement ratio between level `number` and the next
     * coarser level.
     */
    pub fn ratio_to_coarser(&self, number: usize) -> Result<IntVector<D>> {
        if number == 0 {
            return Err(Error::Configuration("level 0 has no coarser level".to_string()))
        }
        let fine = self.level(number)?.ratio;
        let coarse = self.level(number - 1)?.ratio;
        let mut ratio = fine;
        for d in 0..D {
            ratio[d] = fine[d] / coarse[d]
        }
        Ok(ratio)
    }


    /**
     * Borrow a level and the next finer one mutably at the same time.
     */
    pub fn coarse_fine_mut(&mut self, fine: usize) -> Result<(&mut PatchLevel<D>, &mut PatchLevel<D>)> {
        if fine == 0 || fine >= self.levels.len() {
            return Err(Error::Configuration(format!("no coarse-fine pair ending at level {}", fine)))
        }
        let (head, tail) = self.levels.split_at_mut(fine);
        Ok((&mut head[fine - 1], &mut tail[0]))
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use crate::error::Error;
    use crate::index_space::range2d;
    use crate::int_vector::IntVector;
    use super::{BoxLevel, PatchHierarchy, PatchLevel};

    fn boxes() -> BoxLevel<2> {
        BoxLevel::new(vec![
            (range2d(0..4, 0..4), 0),
            (range2d(4..8, 0..4), 1),
            (range2d(0..8, 4..8), 0),
        ])
    }

    #[test]
    fn levels_create_only_local_patches() {
        let level = PatchLevel::new(0, IntVector::one(), boxes(), 0);
        let ids: Vec<_> = level.patches().map(|p| p.id()).collect();
        assert_eq!(ids, vec![0, 2]);
        assert!(level.patch(1).is_err());
        assert_eq!(level.boxes().local_ids(1).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn coarsened_level_keeps_ids_and_owners() {
        let level = PatchLevel::new(1, IntVector::uniform(2), boxes(), 1);
        let coarse = level.coarsened(IntVector::uniform(2));
        assert_eq!(coarse.boxes().space(1).unwrap(), &range2d(2..4, 0..2));
        assert_eq!(coarse.boxes().owner(1).unwrap(), 1);
        assert_eq!(coarse.ratio_to_level_zero(), IntVector::one());
    }

    #[test]
    fn hierarchy_ratios() {
        let l0 = PatchLevel::new(0, IntVector::one(), boxes(), 0);
        let l1 = PatchLevel::new(1, IntVector::uniform(2), boxes().refined(IntVector::uniform(2)), 0);
        let l2 = PatchLevel::new(2, IntVector::uniform(3), boxes(), 0);
        let mut hierarchy = PatchHierarchy::new(vec![l0.clone(), l1.clone()]).unwrap();
        assert_eq!(hierarchy.ratio_to_coarser(1).unwrap(), IntVector::uniform(2));
        assert!(hierarchy.coarse_fine_mut(1).is_ok());
        assert!(hierarchy.coarse_fine_mut(2).is_err());
        assert!(PatchHierarchy::new(vec![l0, l1, l2]).is_err());
    }

    #[test]
    fn zero_ratio_is_a_configuration_error() {
        let l0 = PatchLevel::new(0, IntVector::new([1, 0]), boxes(), 0);
        let l1 = PatchLevel::new(1, IntVector::uniform(2), boxes(), 0);
        assert!(matches!(PatchHierarchy::new(vec![l0.clone(), l1.clone()]), Err(Error::Configuration(_))));

        let l1 = PatchLevel::new(1, IntVector::new([2, 0]), boxes(), 0);
        let l0 = PatchLevel::new(0, IntVector::one(), boxes(), 0);
        assert!(matches!(PatchHierarchy::new(vec![l0, l1]), Err(Error::Configuration(_))));
    }

    #[test]
    fn tree_filters_by_owner() {
        let tree = boxes().tree(|owner| owner == 0);
        assert_eq!(tree.len(), 2);
        let region = range2d(3..5, 0..2);
        let mut found: Vec<_> = tree.query(&region).map(|(_, &id)| id).collect();
        found.sort_unstable();
        assert_eq!(found, vec![0]);
    }
}
