//! Summation of node-centered data at patch boundaries, within a level and
//! across the coarse-fine boundaries of a hierarchy.
//!
//! Each process contributes a partial value at every node of its patches.
//! After the sum, every copy of a node shared by several patches holds the
//! total of all contributions. Boundary values are moved through outernode
//! shadow variables, which hold exactly the boundary nodes of each patch.

use std::collections::BTreeSet;
use log::{debug, info};
use crate::centering::Centering;
use crate::config::ExchangeConfig;
use crate::error::{Error, Result};
use crate::index_space::IndexSpace;
use crate::int_vector::IntVector;
use crate::level::{PatchHierarchy, PatchLevel};
use crate::message::{Communicator, Tag};
use crate::patch::PatchId;
use crate::schedule::{Schedule, ScheduleBuilder};
use crate::spatial_index::BoxTree;
use crate::transaction::{TransactionFactory, TransferItem};
use crate::variable::{ComponentSelector, Variable, VariableDatabase, VariableId};




#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum ShadowKind {
    Source,
    Destination,
    Scratch,
}




/**
 * Find or register the outernode shadow variable for a summed variable. A
 * shadow is identified by its kind, depth, and the ordinal of the summed
 * variable among those of the same depth in one node sum, so every node sum
 * on a database shares the same few shadows.
 */
fn outernode_shadow<const D: usize>(
    db: &mut VariableDatabase<D>,
    kind: ShadowKind,
    depth: usize,
    ordinal: usize,
) -> Result<(VariableId, Variable<D>)> {
    let name = format!("outernode-sum::{:?}::depth{}::{}", kind, depth, ordinal);

    let id = match db.find(&name) {
        Some(id) => id,
        None => db.register(&name, Centering::Outernode, depth, IntVector::zero())?,
    };
    let variable = db.get(id)?;

    if variable.centering != Centering::Outernode || variable.depth != depth {
        return Err(Error::Configuration(format!(
            "{} is registered as a {:?} variable of depth {}",
            name, variable.centering, variable.depth)))
    }
    Ok((id, variable.clone()))
}




struct SummedVariable<const D: usize> {
    node: VariableId,
    src: (VariableId, Variable<D>),
    dst: (VariableId, Variable<D>),
    scratch: (VariableId, Variable<D>),
    active: Option<BTreeSet<PatchId>>,
}

impl<const D: usize> SummedVariable<D> {
    fn is_active(&self, patch: PatchId) -> bool {
        self.active.as_ref().map_or(true, |active| active.contains(&patch))
    }
}




struct LevelPlan<const D: usize> {
    level_number: usize,
    schedule: Schedule<D>,
}




/// The boundary nodes of one local fine patch that lie on the coarse-fine
/// boundary, split by whether they coincide with a coarse node.
struct BoundaryNodes<const D: usize> {
    patch: PatchId,
    coincident: Vec<[i64; D]>,
    hanging: Vec<[i64; D]>,
}




struct InterfacePlan<const D: usize> {
    fine: usize,
    ratio: IntVector<D>,
    copy_down: Schedule<D>,
    inject: Schedule<D>,
    boundary: Vec<BoundaryNodes<D>>,
}




enum Setup<const D: usize> {
    None,
    Level(LevelPlan<D>),
    Hierarchy {
        levels: Vec<LevelPlan<D>>,
        interfaces: Vec<InterfacePlan<D>>,
    },
}




/**
 * What a sum is computed over: the level or the hierarchy it was set up
 * for.
 */
pub enum SumTarget<'a, const D: usize> {
    Level(&'a mut PatchLevel<D>),
    Hierarchy(&'a mut PatchHierarchy<D>),
}




/**
 * Sums node-centered data at shared patch boundary nodes.
 *
 * Usage: register every node variable to sum, set up once for either a
 * single level or a range of hierarchy levels, then compute the sum as often
 * as needed. Registering after setup, setting up twice, or computing before
 * setup are configuration errors.
 *
 * Over a range of levels, each level is first summed on its own. Then,
 * finest first, the coarse values at nodes where a fine level meets the
 * coarser one are added into the coincident fine nodes, and the fine totals
 * are injected back into the coarse nodes. A final coarse-to-fine sweep
 * refreshes the coincident fine nodes, and optionally sets the fine nodes
 * with no coarse counterpart (hanging nodes) by linear interpolation from
 * their neighbours along the boundary.
 */
pub struct PatchBoundaryNodeSum<const D: usize> {
    name: String,
    config: ExchangeConfig,
    sums: Vec<SummedVariable<D>>,
    setup: Setup<D>,
    next_tag: Tag,
}




// ============================================================================
impl<const D: usize> PatchBoundaryNodeSum<D> {


    pub fn new(name: &str) -> Self {
        Self::with_config(name, ExchangeConfig::default())
    }


    /**
     * Create a node sum whose schedules use the given settings. The message
     * tags of its schedules are handed out from `config.base_tag` upward, so
     * concurrent node sums on the same communicator need disjoint tag
     * ranges.
     */
    pub fn with_config(name: &str, config: ExchangeConfig) -> Self {
        Self {
            name: name.to_string(),
            next_tag: config.base_tag,
            config,
            sums: Vec::new(),
            setup: Setup::None,
        }
    }


    pub fn name(&self) -> &str {
        &self.name
    }


    pub fn is_setup(&self) -> bool {
        !matches!(self.setup, Setup::None)
    }


    pub fn num_registered(&self) -> usize {
        self.sums.len()
    }


    /**
     * Register a node-centered variable to be summed. Its outernode shadow
     * variables are registered in `db` on first use.
     */
    pub fn register_sum(&mut self, db: &mut VariableDatabase<D>, node: VariableId) -> Result<()> {
        self.register(db, node, None)
    }


    /**
     * Register a node-centered variable that lives only on the given patches
     * of the level to be summed. Nodes are summed among those patches alone,
     * and the variable need not be allocated anywhere else. Such a sum can
     * only be set up for a single level.
     */
    pub fn register_sum_on<I: IntoIterator<Item = PatchId>>(&mut self, db: &mut VariableDatabase<D>, node: VariableId, patches: I) -> Result<()> {
        self.register(db, node, Some(patches.into_iter().collect()))
    }


    fn register(&mut self, db: &mut VariableDatabase<D>, node: VariableId, active: Option<BTreeSet<PatchId>>) -> Result<()> {
        if self.is_setup() {
            return Err(Error::Configuration(format!("{}: cannot register variables after setup", self.name)))
        }
        let variable = db.get(node)?;

        if variable.centering != Centering::Node {
            return Err(Error::Configuration(format!(
                "{}: {} is {:?}-centered, not node-centered",
                self.name, variable.name, variable.centering)))
        }
        let depth = variable.depth;
        let ordinal = self.sums.iter().filter(|s| s.src.1.depth == depth).count();

        let src = outernode_shadow(db, ShadowKind::Source, depth, ordinal)?;
        let dst = outernode_shadow(db, ShadowKind::Destination, depth, ordinal)?;
        let scratch = outernode_shadow(db, ShadowKind::Scratch, depth, ordinal)?;

        self.sums.push(SummedVariable { node, src, dst, scratch, active });
        Ok(())
    }


    /**
     * Prepare to sum over a single level.
     */
    pub fn setup_sum_level(&mut self, db: &VariableDatabase<D>, level: &PatchLevel<D>) -> Result<()> {
        self.check_can_setup()?;
        let plan = self.level_plan(db, level)?;
        info!("{}: set up level {} sum of {} variables", self.name, level.number(), self.sums.len());
        self.setup = Setup::Level(plan);
        Ok(())
    }


    /**
     * Prepare to sum over levels `coarsest..=finest` of a hierarchy,
     * including the coarse-fine boundaries between consecutive levels.
     */
    pub fn setup_sum_hierarchy(
        &mut self,
        db: &VariableDatabase<D>,
        hierarchy: &PatchHierarchy<D>,
        coarsest: usize,
        finest: usize,
    ) -> Result<()> {
        self.check_can_setup()?;

        if self.sums.iter().any(|s| s.active.is_some()) {
            return Err(Error::Configuration(format!(
                "{}: variables registered on a subset of patches can only be summed over a level",
                self.name)))
        }
        if coarsest > finest || finest >= hierarchy.num_levels() {
            return Err(Error::Configuration(format!(
                "{}: invalid level range {}..={} for a hierarchy of {} levels",
                self.name, coarsest, finest, hierarchy.num_levels())))
        }
        let levels = (coarsest..=finest)
            .map(|ln| self.level_plan(db, hierarchy.level(ln)?))
            .collect::<Result<Vec<_>>>()?;

        let interfaces = (coarsest + 1..=finest)
            .map(|ln| self.interface_plan(db, hierarchy, ln))
            .collect::<Result<Vec<_>>>()?;

        info!("{}: set up sum of {} variables over levels {}..={}", self.name, self.sums.len(), coarsest, finest);
        self.setup = Setup::Hierarchy { levels, interfaces };
        Ok(())
    }


    /**
     * Compute the sum over the level or hierarchy given at setup. Every
     * process in the communicator must call this together.
     */
    pub fn compute_sum<C: Communicator>(&self, comm: &C, target: SumTarget<D>, fill_hanging_nodes: bool) -> Result<()> {
        match (&self.setup, target) {
            (Setup::None, _) => {
                Err(Error::Configuration(format!("{}: sum computed before setup", self.name)))
            }
            (Setup::Level(plan), SumTarget::Level(level)) => {
                self.sum_level(comm, plan, level)
            }
            (Setup::Hierarchy { levels, interfaces }, SumTarget::Hierarchy(hierarchy)) => {
                self.sum_hierarchy(comm, levels, interfaces, hierarchy, fill_hanging_nodes)
            }
            _ => {
                Err(Error::Configuration(format!("{}: sum target does not match setup", self.name)))
            }
        }
    }


    fn check_can_setup(&self) -> Result<()> {
        if self.is_setup() {
            return Err(Error::Configuration(format!("{}: already set up", self.name)))
        }
        if self.sums.is_empty() {
            return Err(Error::Configuration(format!("{}: no variables registered", self.name)))
        }
        Ok(())
    }


    fn take_tag(&mut self) -> Tag {
        let tag = self.next_tag;
        self.next_tag += 1;
        tag
    }


    fn level_plan(&mut self, db: &VariableDatabase<D>, level: &PatchLevel<D>) -> Result<LevelPlan<D>> {
        let items = self.sums.iter().map(|s| TransferItem::new(s.dst.0, s.src.0)).collect();
        let mut factory = TransactionFactory::sum(db, items)?;

        for (n, s) in self.sums.iter().enumerate() {
            if let Some(active) = &s.active {
                factory = factory.with_active_patches(n, active.iter().copied())?
            }
        }
        let schedule = ScheduleBuilder::new(level.boxes(), level.boxes(), factory)
            .tag(self.take_tag())
            .config(self.config.clone())
            .build(level.rank())?;

        Ok(LevelPlan { level_number: level.number(), schedule })
    }


    fn interface_plan(&mut self, db: &VariableDatabase<D>, hierarchy: &PatchHierarchy<D>, fine: usize) -> Result<InterfacePlan<D>> {
        let ratio = hierarchy.ratio_to_coarser(fine)?;
        let coarse_level = hierarchy.level(fine - 1)?;
        let fine_level = hierarchy.level(fine)?;
        let coarsened = fine_level.boxes().coarsened(ratio);
        let rank = fine_level.rank();

        let down_items = self.sums.iter().map(|s| TransferItem::new(s.scratch.0, s.node)).collect();
        let copy_down = ScheduleBuilder::new(coarse_level.boxes(), &coarsened, TransactionFactory::copy(db, down_items)?)
            .tag(self.take_tag())
            .config(self.config.clone())
            .build(rank)?;

        let up_items = self.sums.iter().map(|s| TransferItem::new(s.node, s.src.0)).collect();
        let inject = ScheduleBuilder::new(fine_level.boxes(), coarse_level.boxes(), TransactionFactory::copy(db, up_items)?)
            .ratio(ratio)
            .tag(self.take_tag())
            .config(self.config.clone())
            .build(rank)?;

        let covered = fine_level.boxes().tree(|_| true);
        let boundary = fine_level
            .patches()
            .map(|patch| coarse_fine_nodes(patch.id(), patch.cells(), &covered, ratio))
            .collect::<Vec<_>>();

        debug!(
            "{}: level {} has {} coincident and {} hanging coarse-fine nodes on rank {}",
            self.name,
            fine,
            boundary.iter().map(|b| b.coincident.len()).sum::<usize>(),
            boundary.iter().map(|b| b.hanging.len()).sum::<usize>(),
            rank);

        Ok(InterfacePlan { fine, ratio, copy_down, inject, boundary })
    }


    fn sum_level<C: Communicator>(&self, comm: &C, plan: &LevelPlan<D>, level: &mut PatchLevel<D>) -> Result<()> {
        if plan.level_number != level.number() {
            return Err(Error::Configuration(format!(
                "{}: set up for level {} but given level {}",
                self.name, plan.level_number, level.number())))
        }
        for s in &self.sums {
            allocate_where_active(level, s, &s.src);
            allocate_where_active(level, s, &s.dst);
        }
        let result = self.sum_level_through_shadows(comm, plan, level);

        for s in &self.sums {
            level.deallocate(s.src.0);
            level.deallocate(s.dst.0);
        }
        result
    }


    fn sum_level_through_shadows<C: Communicator>(&self, comm: &C, plan: &LevelPlan<D>, level: &mut PatchLevel<D>) -> Result<()> {
        for s in &self.sums {
            copy_node_to_outernode(level, s.node, s.src.0, |patch| s.is_active(patch))?;
        }
        let selector: ComponentSelector = self.sums.iter().map(|s| s.dst.0).collect();
        plan.schedule.factory().preprocess_scratch_space(level, 0.0, &selector)?;
        plan.schedule.execute_in_place(comm, level, 0.0)?;

        for s in &self.sums {
            copy_outernode_to_node(level, s.dst.0, s.node, |patch| s.is_active(patch))?;
        }
        Ok(())
    }


    fn sum_hierarchy<C: Communicator>(
        &self,
        comm: &C,
        levels: &[LevelPlan<D>],
        interfaces: &[InterfacePlan<D>],
        hierarchy: &mut PatchHierarchy<D>,
        fill_hanging_nodes: bool,
    ) -> Result<()> {
        for plan in levels {
            self.sum_level(comm, plan, hierarchy.level_mut(plan.level_number)?)?
        }

        for interface in interfaces.iter().rev() {
            let (coarse, fine) = hierarchy.coarse_fine_mut(interface.fine)?;
            let scratch = self.copy_down(comm, interface, coarse, fine)?;
            self.apply_coincident(interface, &scratch, fine, true)?;

            for s in &self.sums {
                fine.allocate(s.src.0, &s.src.1, 0.0)
            }
            let result = self.inject(comm, interface, fine, coarse);

            for s in &self.sums {
                fine.deallocate(s.src.0)
            }
            result?
        }

        for interface in interfaces {
            let (coarse, fine) = hierarchy.coarse_fine_mut(interface.fine)?;
            let scratch = self.copy_down(comm, interface, coarse, fine)?;
            self.apply_coincident(interface, &scratch, fine, false)?;

            if fill_hanging_nodes {
                self.fill_hanging(interface, fine)?
            }
        }
        Ok(())
    }


    /**
     * Overwrite the coarse nodes under the fine boundary with the fine
     * totals, moved through the source shadows.
     */
    fn inject<C: Communicator>(&self, comm: &C, interface: &InterfacePlan<D>, fine: &mut PatchLevel<D>, coarse: &mut PatchLevel<D>) -> Result<()> {
        for s in &self.sums {
            copy_node_to_outernode(fine, s.node, s.src.0, |_| true)?;
        }
        interface.inject.execute(comm, fine, coarse, 0.0)
    }


    /**
     * Copy the coarse node values onto the boundary of a coarsened copy of
     * the fine level, returned with the scratch variables allocated.
     */
    fn copy_down<C: Communicator>(
        &self,
        comm: &C,
        interface: &InterfacePlan<D>,
        coarse: &PatchLevel<D>,
        fine: &PatchLevel<D>,
    ) -> Result<PatchLevel<D>> {
        let mut scratch = fine.coarsened(interface.ratio);

        for s in &self.sums {
            scratch.allocate(s.scratch.0, &s.scratch.1, 0.0)
        }
        interface.copy_down.execute(comm, coarse, &mut scratch, 0.0)?;
        Ok(scratch)
    }


    /**
     * Add (or assign) the coarse values held in the scratch level into the
     * coincident coarse-fine nodes of the fine level.
     */
    fn apply_coincident(&self, interface: &InterfacePlan<D>, scratch: &PatchLevel<D>, fine: &mut PatchLevel<D>, add: bool) -> Result<()> {
        for nodes in &interface.boundary {
            let coarse_patch = scratch.patch(nodes.patch)?;
            let fine_patch = fine.patch_mut(nodes.patch)?;

            for s in &self.sums {
                let coarse_data = coarse_patch.data(s.scratch.0)?;
                let fine_array = fine_patch.data_mut(s.node)?.array_mut(0)?;

                for &node in &nodes.coincident {
                    let mut coarse_node = node;
                    for d in 0..D {
                        coarse_node[d] = node[d].div_euclid(interface.ratio[d])
                    }
                    for depth in 0..fine_array.depth() {
                        if let (Some(value), Some(target)) = (coarse_data.value_at(coarse_node, depth), fine_array.get_mut(node, depth)) {
                            if add {
                                *target += value
                            } else {
                                *target = value
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }


    /**
     * Set each hanging node by multilinear interpolation between the nearest
     * coincident nodes along the axes where it falls between coarse nodes.
     */
    fn fill_hanging(&self, interface: &InterfacePlan<D>, fine: &mut PatchLevel<D>) -> Result<()> {
        for nodes in &interface.boundary {
            let patch = fine.patch_mut(nodes.patch)?;

            for s in &self.sums {
                let array = patch.data_mut(s.node)?.array_mut(0)?;

                for &node in &nodes.hanging {
                    for depth in 0..array.depth() {
                        let corners = interpolation_corners(node, interface.ratio);
                        let value = corners
                            .iter()
                            .map(|(corner, weight)| array.get(*corner, depth).map(|v| v * weight))
                            .sum::<Option<f64>>();

                        if let (Some(value), Some(target)) = (value, array.get_mut(node, depth)) {
                            *target = value
                        }
                    }
                }
            }
        }
        Ok(())
    }
}




fn allocate_where_active<const D: usize>(level: &mut PatchLevel<D>, sum: &SummedVariable<D>, shadow: &(VariableId, Variable<D>)) {
    for patch in level.patches_mut().filter(|patch| sum.is_active(patch.id())) {
        patch.allocate(shadow.0, &shadow.1, 0.0)
    }
}




/**
 * Copy node data onto the boundary nodes held by an outernode variable, on
 * every selected local patch.
 */
fn copy_node_to_outernode<const D: usize, F: Fn(PatchId) -> bool>(level: &mut PatchLevel<D>, node: VariableId, outer: VariableId, selected: F) -> Result<()> {
    for patch in level.patches_mut().filter(|patch| selected(patch.id())) {
        let (node_data, outer_data) = patch.data_pair_mut(node, outer)?;
        let node_array = node_data.array(0)?;

        for k in 0..outer_data.num_components() {
            let array = outer_data.array_mut(k)?;
            let space = *array.space();

            for depth in 0..array.depth() {
                for index in &space {
                    if let (Some(value), Some(target)) = (node_array.get(index, depth), array.get_mut(index, depth)) {
                        *target = value
                    }
                }
            }
        }
    }
    Ok(())
}




/**
 * Copy the boundary values of an outernode variable back into node data, on
 * every selected local patch. Interior nodes are left alone.
 */
fn copy_outernode_to_node<const D: usize, F: Fn(PatchId) -> bool>(level: &mut PatchLevel<D>, outer: VariableId, node: VariableId, selected: F) -> Result<()> {
    for patch in level.patches_mut().filter(|patch| selected(patch.id())) {
        let (outer_data, node_data) = patch.data_pair_mut(outer, node)?;
        let node_array = node_data.array_mut(0)?;

        for k in 0..outer_data.num_components() {
            let array = outer_data.array(k)?;

            for depth in 0..array.depth() {
                for index in array.space() {
                    if let (Some(value), Some(target)) = (array.get(index, depth), node_array.get_mut(index, depth)) {
                        *target = value
                    }
                }
            }
        }
    }
    Ok(())
}




/**
 * Find the boundary nodes of a fine patch which lie on the coarse-fine
 * boundary: nodes with at least one adjacent cell not covered by the fine
 * level.
 */
fn coarse_fine_nodes<const D: usize>(
    patch: PatchId,
    cells: &IndexSpace<D>,
    covered: &BoxTree<D, PatchId>,
    ratio: IntVector<D>,
) -> BoundaryNodes<D> {
    let mut coincident = Vec::new();
    let mut hanging = Vec::new();

    for k in 0..Centering::Outernode.num_components(D) {
        for node in &Centering::Outernode.component_space(cells, IntVector::zero(), k) {
            let uncovered = (0..1usize << D).any(|corner| {
                let mut cell = node;
                for d in 0..D {
                    cell[d] -= ((corner >> d) & 1) as i64
                }
                let cell = IndexSpace::new(cell, cell);
                let none = covered.query(&cell).next().is_none();
                none
            });
            if !uncovered {
                continue
            }
            if (0..D).all(|d| node[d].rem_euclid(ratio[d]) == 0) {
                coincident.push(node)
            } else {
                hanging.push(node)
            }
        }
    }
    BoundaryNodes { patch, coincident, hanging }
}




/**
 * Return the coincident nodes surrounding a hanging node, with their
 * multilinear interpolation weights.
 */
fn interpolation_corners<const D: usize>(node: [i64; D], ratio: IntVector<D>) -> Vec<([i64; D], f64)> {
    let axes: Vec<usize> = (0..D).filter(|&d| node[d].rem_euclid(ratio[d]) != 0).collect();

    (0..1usize << axes.len())
        .map(|corner| {
            let mut index = node;
            let mut weight = 1.0;

            for (bit, &d) in axes.iter().enumerate() {
                let r = ratio[d];
                let lower = node[d] - node[d].rem_euclid(r);
                let t = (node[d] - lower) as f64 / r as f64;

                if (corner >> bit) & 1 == 1 {
                    index[d] = lower + r;
                    weight *= t;
                } else {
                    index[d] = lower;
                    weight *= 1.0 - t;
                }
            }
            (index, weight)
        })
        .collect()
}
