use std::collections::BTreeMap;
use log::debug;
use crate::config::ExchangeConfig;
use crate::error::{Error, Result};
use crate::index_space::IndexSpace;
use crate::int_vector::IntVector;
use crate::level::BoxLevel;
use crate::overlap::OverlapRequest;
use crate::patch::PatchId;
use crate::spatial_index::BoxTree;
use crate::transaction::{Endpoints, Transaction, TransactionFactory};




/**
 * The set of transactions one process takes part in for a transfer from a
 * source level to a destination level. Transactions are grouped into local
 * ones and, per peer, outgoing and incoming ones. Within every group they are
 * ordered by destination patch, source patch, shift, and transfer item, so
 * both ends of a message agree on its layout.
 */
#[derive(Clone, Debug)]
pub struct Schedule<const D: usize> {
    rank: usize,
    tag: u32,
    config: ExchangeConfig,
    factory: TransactionFactory<D>,
    local: Vec<Transaction<D>>,
    outgoing: BTreeMap<usize, Vec<Transaction<D>>>,
    incoming: BTreeMap<usize, Vec<Transaction<D>>>,
}




// ============================================================================
impl<const D: usize> Schedule<D> {


    pub fn rank(&self) -> usize {
        self.rank
    }


    /**
     * The message tag used for every message of this schedule.
     */
    pub fn tag(&self) -> u32 {
        self.tag
    }


    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }


    pub fn factory(&self) -> &TransactionFactory<D> {
        &self.factory
    }


    pub fn local_transactions(&self) -> &[Transaction<D>] {
        &self.local
    }


    /**
     * Transactions this process packs, keyed by the destination owner.
     */
    pub fn outgoing(&self) -> &BTreeMap<usize, Vec<Transaction<D>>> {
        &self.outgoing
    }


    /**
     * Transactions this process unpacks, keyed by the source owner.
     */
    pub fn incoming(&self) -> &BTreeMap<usize, Vec<Transaction<D>>> {
        &self.incoming
    }


    pub fn num_local(&self) -> usize {
        self.local.len()
    }


    pub fn num_outgoing(&self) -> usize {
        self.outgoing.values().map(Vec::len).sum()
    }


    pub fn num_incoming(&self) -> usize {
        self.incoming.values().map(Vec::len).sum()
    }


    pub fn num_transactions(&self) -> usize {
        self.num_local() + self.num_outgoing() + self.num_incoming()
    }


    /**
     * Return the ranks this process exchanges messages with, in ascending
     * order.
     */
    pub fn peers(&self) -> Vec<usize> {
        let mut peers: Vec<usize> = self.outgoing.keys().chain(self.incoming.keys()).copied().collect();
        peers.sort_unstable();
        peers.dedup();
        peers
    }


    /**
     * Return the number of bytes expected from a peer.
     */
    pub fn incoming_bytes(&self, peer: usize) -> usize {
        self.incoming.get(&peer).map_or(0, |ts| ts.iter().map(Transaction::incoming_message_size).sum())
    }


    /**
     * Return the number of bytes to be sent to a peer.
     */
    pub fn outgoing_bytes(&self, peer: usize) -> usize {
        self.outgoing.get(&peer).map_or(0, |ts| ts.iter().map(Transaction::outgoing_message_size).sum())
    }
}




/**
 * Builds a `Schedule` from the box metadata of a source and a destination
 * level. Every process builds its own schedule from the same global
 * metadata; each keeps only the transactions it takes part in.
 */
pub struct ScheduleBuilder<'a, const D: usize> {
    src: &'a BoxLevel<D>,
    dst: &'a BoxLevel<D>,
    factory: TransactionFactory<D>,
    ghost_width: IntVector<D>,
    ratio: IntVector<D>,
    shifts: Vec<IntVector<D>>,
    restrict: Option<IndexSpace<D>>,
    time_interpolate: bool,
    tag: u32,
    config: ExchangeConfig,
}




// ============================================================================
impl<'a, const D: usize> ScheduleBuilder<'a, D> {


    pub fn new(src: &'a BoxLevel<D>, dst: &'a BoxLevel<D>, factory: TransactionFactory<D>) -> Self {
        Self {
            src,
            dst,
            factory,
            ghost_width: IntVector::zero(),
            ratio: IntVector::one(),
            shifts: Vec::new(),
            restrict: None,
            time_interpolate: false,
            tag: 0,
            config: ExchangeConfig::default(),
        }
    }

    /// Fill destination ghosts up to this width (capped by each destination
    /// variable's own ghost width).
    pub fn ghost_width(mut self, ghost_width: IntVector<D>) -> Self {
        self.ghost_width = ghost_width;
        self
    }

    /// Ratio from the destination to the (finer) source level. Only node
    /// data can be transferred across a ratio.
    pub fn ratio(mut self, ratio: IntVector<D>) -> Self {
        self.ratio = ratio;
        self
    }

    /// Offsets at which source boxes are also visible, e.g. periodic images.
    /// The zero offset is always included.
    pub fn periodic_shifts(mut self, shifts: Vec<IntVector<D>>) -> Self {
        self.shifts = shifts;
        self
    }

    /// Only fill destination cells inside this region.
    pub fn restrict(mut self, region: IndexSpace<D>) -> Self {
        self.restrict = Some(region);
        self
    }

    pub fn time_interpolate(mut self, time_interpolate: bool) -> Self {
        self.time_interpolate = time_interpolate;
        self
    }

    pub fn tag(mut self, tag: u32) -> Self {
        self.tag = tag;
        self
    }

    pub fn config(mut self, config: ExchangeConfig) -> Self {
        self.config = config;
        self
    }


    /**
     * Build the schedule as seen by process `rank`. Candidate source boxes
     * are found through spatial indexes: over every source box when the
     * destination is local, and over only the local source boxes otherwise.
     * Pairs whose overlap turns out empty, or where an item is inactive on
     * either patch, produce no transaction.
     */
    pub fn build(self, rank: usize) -> Result<Schedule<D>> {
        if !self.ratio.is_positive() {
            return Err(Error::Configuration(format!("invalid ratio {:?}", self.ratio)))
        }
        if !self.ghost_width.is_non_negative() {
            return Err(Error::Configuration(format!("negative ghost width {:?}", self.ghost_width)))
        }

        let mut shifts = vec![IntVector::zero()];
        shifts.extend(self.shifts.iter().filter(|s| !s.is_zero()).copied());

        let mapped = if self.ratio.is_one() {
            self.src.clone()
        } else {
            self.src.coarsened(self.ratio)
        };
        let all_src: BoxTree<D, PatchId> = mapped.tree(|_| true);
        let local_src: BoxTree<D, PatchId> = mapped.tree(|owner| owner == rank);

        let margin = IntVector::one();
        let mut local = Vec::new();
        let mut outgoing: BTreeMap<usize, Vec<Transaction<D>>> = BTreeMap::new();
        let mut incoming: BTreeMap<usize, Vec<Transaction<D>>> = BTreeMap::new();

        for (dst_id, dst_box, dst_owner) in self.dst.iter() {
            let tree = if dst_owner == rank { &all_src } else { &local_src };

            if tree.is_empty() {
                continue
            }
            let mut region = dst_box.grow(self.ghost_width + margin);

            if let Some(restrict) = &self.restrict {
                region = region.intersect(&restrict.grow(margin))
            }

            let mut candidates: Vec<(PatchId, usize)> = shifts
                .iter()
                .enumerate()
                .flat_map(|(n, shift)| {
                    let query = region.shift(-*shift);
                    tree.query(&query).map(move |(_, &src_id)| (src_id, n)).collect::<Vec<_>>()
                })
                .collect();
            candidates.sort_unstable();

            for (src_id, shift_index) in candidates {
                let src_box = self.src.space(src_id)?;
                let src_owner = self.src.owner(src_id)?;
                let ends = Endpoints { src_patch: src_id, src_owner, dst_patch: dst_id, dst_owner };

                for (item_index, item) in self.factory.items().iter().enumerate() {
                    if !self.factory.is_active_between(item_index, &ends) {
                        continue
                    }
                    let overlap = OverlapRequest::new(*src_box, *dst_box, item.dst_centering)
                        .source_centering(item.src_centering)
                        .ghost_width(self.ghost_width.component_min(&item.dst_ghost_width))
                        .offset(shifts[shift_index])
                        .ratio(self.ratio)
                        .restrict(self.restrict)
                        .calculate()?;

                    if overlap.is_empty() {
                        continue
                    }
                    let transaction = self.factory.allocate(ends, overlap, item_index, None, self.time_interpolate)?;

                    if src_owner == rank && dst_owner == rank {
                        local.push(transaction)
                    } else if src_owner == rank {
                        outgoing.entry(dst_owner).or_default().push(transaction)
                    } else if dst_owner == rank {
                        incoming.entry(src_owner).or_default().push(transaction)
                    }
                }
            }
        }

        let schedule = Schedule {
            rank,
            tag: self.tag,
            config: self.config,
            factory: self.factory,
            local,
            outgoing,
            incoming,
        };
        debug!(
            "rank {} schedule (tag {}): {} local, {} outgoing to {} peers, {} incoming from {} peers",
            rank,
            schedule.tag,
            schedule.num_local(),
            schedule.num_outgoing(),
            schedule.outgoing.len(),
            schedule.num_incoming(),
            schedule.incoming.len());

        Ok(schedule)
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use crate::centering::Centering;
    use crate::index_space::{IndexSpace, range2d};
    use crate::int_vector::IntVector;
    use crate::level::BoxLevel;
    use crate::transaction::{TransactionFactory, TransferItem};
    use crate::variable::{VariableDatabase, VariableId};
    use super::ScheduleBuilder;

    fn cell_factory(ghost: i64) -> (TransactionFactory<2>, VariableId) {
        let mut db = VariableDatabase::new();
        let q = db.register("q", Centering::Cell, 1, IntVector::uniform(ghost)).unwrap();
        (TransactionFactory::copy(&db, vec![TransferItem::new(q, q)]).unwrap(), q)
    }

    fn four_boxes() -> BoxLevel<2> {
        BoxLevel::new(vec![
            (range2d(0..4, 0..4), 0),
            (range2d(4..8, 0..4), 1),
            (range2d(0..4, 4..8), 2),
            (range2d(4..8, 4..8), 0),
        ])
    }

    #[test]
    fn transactions_are_classified_by_owner() {
        let level = four_boxes();
        let (factory, _) = cell_factory(1);
        let schedule = ScheduleBuilder::new(&level, &level, factory).ghost_width(IntVector::one()).build(0).unwrap();

        // Rank 0 owns boxes 0 and 3, which touch each other at a corner.
        let local: Vec<_> = schedule
            .local_transactions()
            .iter()
            .map(|t| (t.endpoints().dst_patch, t.endpoints().src_patch))
            .collect();
        assert_eq!(local, vec![(0, 0), (0, 3), (3, 0), (3, 3)]);
        assert_eq!(schedule.outgoing().keys().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(schedule.incoming().keys().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(schedule.incoming_bytes(1), schedule.outgoing_bytes(1));
        assert_eq!(schedule.peers(), vec![1, 2]);
        assert_eq!(schedule.num_local(), 4);
    }

    #[test]
    fn both_ends_agree_on_message_sizes() {
        let level = four_boxes();
        let schedules: Vec<_> = (0..3)
            .map(|rank| {
                let (factory, _) = cell_factory(2);
                ScheduleBuilder::new(&level, &level, factory).ghost_width(IntVector::uniform(2)).build(rank).unwrap()
            })
            .collect();

        for a in 0..3 {
            for b in 0..3 {
                if a != b {
                    assert_eq!(schedules[a].outgoing_bytes(b), schedules[b].incoming_bytes(a), "{} -> {}", a, b);
                }
            }
        }
    }

    #[test]
    fn periodic_shifts_find_images() {
        let level = BoxLevel::new(vec![(IndexSpace::new([0], [3]), 0), (IndexSpace::new([4], [7]), 0)]);
        let mut db = VariableDatabase::<1>::new();
        let q = db.register("q", Centering::Cell, 1, IntVector::one()).unwrap();
        let factory = TransactionFactory::copy(&db, vec![TransferItem::new(q, q)]).unwrap();

        let schedule = ScheduleBuilder::new(&level, &level, factory)
            .ghost_width(IntVector::one())
            .periodic_shifts(vec![IntVector::new([8]), IntVector::new([-8])])
            .build(0)
            .unwrap();

        let ghost_of_first = schedule
            .local_transactions()
            .iter()
            .find(|t| t.endpoints().dst_patch == 0 && t.overlap().source_offset() == IntVector::new([-8]))
            .unwrap();
        assert_eq!(ghost_of_first.endpoints().src_patch, 1);
        assert_eq!(ghost_of_first.overlap().dst_spaces(), vec![IndexSpace::new([-1], [-1])]);
    }

    #[test]
    fn restriction_drops_distant_pairs() {
        let level = four_boxes();
        let (factory, _) = cell_factory(1);
        let schedule = ScheduleBuilder::new(&level, &level, factory)
            .ghost_width(IntVector::one())
            .restrict(range2d(0..2, 0..2))
            .build(0)
            .unwrap();
        assert_eq!(schedule.num_transactions(), 1);
    }

    #[test]
    fn inactive_patches_are_left_out() {
        let level = four_boxes();
        let (factory, _) = cell_factory(1);
        let factory = factory.with_active_patches(0, vec![0, 1]).unwrap();
        let schedule = ScheduleBuilder::new(&level, &level, factory).ghost_width(IntVector::one()).build(0).unwrap();

        // Box 3 is inactive, so rank 0 keeps only its self-copy on box 0, the
        // exchange with box 1 on rank 1, and nothing with rank 2.
        let local: Vec<_> = schedule
            .local_transactions()
            .iter()
            .map(|t| (t.endpoints().dst_patch, t.endpoints().src_patch))
            .collect();
        assert_eq!(local, vec![(0, 0)]);
        assert_eq!(schedule.peers(), vec![1]);
    }
}
