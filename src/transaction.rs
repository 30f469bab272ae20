//! Transactions move the data of one overlap between two patches, and the
//! factory creates them with a fixed transfer policy.

use std::collections::BTreeSet;
use log::trace;
use crate::centering::Centering;
use crate::error::{Error, Result};
use crate::index_space::IndexSpace;
use crate::int_vector::IntVector;
use crate::level::PatchLevel;
use crate::overlap::BoxOverlap;
use crate::patch::PatchId;
use crate::variable::{ComponentSelector, VariableDatabase, VariableId};




/// Number of bytes each value occupies in a message.
pub const VALUE_BYTES: usize = std::mem::size_of::<f64>();




/// What a transaction does with the values it moves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Policy {
    /// Overwrite destination values with source values.
    Copy,
    /// Add source values into destination values.
    Sum,
    /// Overwrite destination values with a linear interpolation in time
    /// between an old and a new source value.
    TimeInterpolate,
}




/// Which kind of transactions a factory creates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FactoryKind {
    Copy,
    Sum,
}




/**
 * One entry of a transfer: the destination variable, the source variable,
 * and optionally the source variable holding data at an older time, for
 * time interpolation.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferItem {
    pub dst: VariableId,
    pub src: VariableId,
    pub src_old: Option<VariableId>,
}

impl TransferItem {
    pub fn new(dst: VariableId, src: VariableId) -> Self {
        Self { dst, src, src_old: None }
    }

    pub fn with_old(self, src_old: VariableId) -> Self {
        Self { src_old: Some(src_old), ..self }
    }
}




/// A transfer item together with the variable properties a transaction
/// needs, looked up once from the variable database.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResolvedItem<const D: usize> {
    pub item: TransferItem,
    pub depth: usize,
    pub dst_centering: Centering,
    pub src_centering: Centering,
    pub dst_ghost_width: IntVector<D>,
}




/// The two patches a transaction connects, and their owning processes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Endpoints {
    pub src_patch: PatchId,
    pub src_owner: usize,
    pub dst_patch: PatchId,
    pub dst_owner: usize,
}




/**
 * Borrows the source and destination levels of a transfer, which may be the
 * same level.
 */
pub enum LevelPair<'a, const D: usize> {
    Same(&'a mut PatchLevel<D>),
    Distinct {
        src: &'a PatchLevel<D>,
        dst: &'a mut PatchLevel<D>,
    },
}

impl<'a, const D: usize> LevelPair<'a, D> {
    pub fn source(&self) -> &PatchLevel<D> {
        match self {
            Self::Same(level) => level,
            Self::Distinct { src, .. } => src,
        }
    }

    pub fn destination(&mut self) -> &mut PatchLevel<D> {
        match self {
            Self::Same(level) => level,
            Self::Distinct { dst, .. } => dst,
        }
    }
}




/**
 * Sequential writer of `f64` values (little-endian) into a message buffer.
 */
pub struct MessageWriter<'a> {
    buffer: &'a mut [u8],
    position: usize,
}

impl<'a> MessageWriter<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    pub fn write_values(&mut self, values: &[f64]) -> Result<()> {
        let end = self.position + values.len() * VALUE_BYTES;
        if end > self.buffer.len() {
            return Err(Error::Protocol(format!(
                "message buffer of {} bytes cannot hold {} bytes",
                self.buffer.len(), end)))
        }
        for (chunk, value) in self.buffer[self.position..end].chunks_exact_mut(VALUE_BYTES).zip(values) {
            chunk.copy_from_slice(&value.to_le_bytes())
        }
        self.position = end;
        Ok(())
    }

    pub fn position(&self) -> usize {
        self.position
    }
}




/**
 * Sequential reader of `f64` values (little-endian) from a message buffer.
 */
pub struct MessageReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> MessageReader<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    pub fn read_values(&mut self, count: usize) -> Result<Vec<f64>> {
        let end = self.position + count * VALUE_BYTES;
        if end > self.buffer.len() {
            return Err(Error::Protocol(format!(
                "message of {} bytes is too short: needed {} bytes",
                self.buffer.len(), end)))
        }
        let values = self.buffer[self.position..end]
            .chunks_exact(VALUE_BYTES)
            .map(|chunk| {
                let mut bytes = [0; VALUE_BYTES];
                bytes.copy_from_slice(chunk);
                f64::from_le_bytes(bytes)
            })
            .collect();
        self.position = end;
        Ok(values)
    }

    /**
     * Consume the reader, failing if any bytes were left unread.
     */
    pub fn finish(self) -> Result<()> {
        if self.position != self.buffer.len() {
            return Err(Error::Protocol(format!(
                "message has {} unread bytes",
                self.buffer.len() - self.position)))
        }
        Ok(())
    }
}




/**
 * Linear interpolation in time between an old value at `t_old` and a new
 * value at `t_new`. If the two times coincide, the new value is returned
 * when `t` equals that time, and any other `t` is an error.
 */
pub fn time_interpolate(old: f64, t_old: f64, new: f64, t_new: f64, t: f64) -> Result<f64> {
    if t_new == t_old {
        if t == t_new {
            Ok(new)
        } else {
            Err(Error::Domain(format!("cannot interpolate to time {} between equal times {}", t, t_new)))
        }
    } else {
        Ok(old + (new - old) * (t - t_old) / (t_new - t_old))
    }
}




/**
 * A unit of data movement: one transfer item, over one overlap, between two
 * patches. Either end may be remote; the process owning the source packs,
 * the process owning the destination unpacks, and a process owning both
 * runs the transaction locally.
 */
#[derive(Clone, Debug)]
pub struct Transaction<const D: usize> {
    ends: Endpoints,
    overlap: BoxOverlap<D>,
    item: ResolvedItem<D>,
    item_index: usize,
    policy: Policy,
}




// ============================================================================
impl<const D: usize> Transaction<D> {


    pub fn endpoints(&self) -> &Endpoints {
        &self.ends
    }


    pub fn overlap(&self) -> &BoxOverlap<D> {
        &self.overlap
    }


    pub fn item(&self) -> &ResolvedItem<D> {
        &self.item
    }


    pub fn item_index(&self) -> usize {
        self.item_index
    }


    pub fn policy(&self) -> Policy {
        self.policy
    }


    /**
     * Return the number of bytes this transaction contributes to the message
     * from the source owner to the destination owner. Both ends compute the
     * same number from the same metadata.
     */
    pub fn incoming_message_size(&self) -> usize {
        self.overlap.len() * self.item.depth * VALUE_BYTES
    }


    pub fn outgoing_message_size(&self) -> usize {
        self.incoming_message_size()
    }


    /**
     * Write this transaction's values, read from the source patch, into the
     * message stream.
     */
    pub fn pack_stream(&self, src: &PatchLevel<D>, time: f64, stream: &mut MessageWriter) -> Result<()> {
        stream.write_values(&self.gather(src, time)?)
    }


    /**
     * Read this transaction's values from the message stream and apply them
     * to the destination patch.
     */
    pub fn unpack_stream(&self, dst: &mut PatchLevel<D>, stream: &mut MessageReader) -> Result<()> {
        let values = stream.read_values(self.overlap.len() * self.item.depth)?;
        self.scatter(dst, &values)
    }


    /**
     * Move the data directly, when both patches are local. The source values
     * are gathered before any destination value is written, so a transaction
     * whose source and destination regions alias behaves like a remote one.
     */
    pub fn run_locally(&self, levels: &mut LevelPair<D>, time: f64) -> Result<()> {
        let values = self.gather(levels.source(), time)?;
        self.scatter(levels.destination(), &values)
    }


    fn gather(&self, src: &PatchLevel<D>, time: f64) -> Result<Vec<f64>> {
        let patch = src.patch(self.ends.src_patch)?;
        let new = patch.data(self.item.item.src)?;
        let old = match (self.policy, self.item.item.src_old) {
            (Policy::TimeInterpolate, Some(id)) => Some(patch.data(id)?),
            (Policy::TimeInterpolate, None) => {
                return Err(Error::Configuration(format!(
                    "time interpolation into {} has no old source", self.item.item.dst)))
            }
            _ => None,
        };
        let missing = |index: [i64; D]| Error::Protocol(format!(
            "source index {:?} is outside the data of {} on patch {}",
            index, self.item.item.src, self.ends.src_patch));

        let mut values = Vec::with_capacity(self.overlap.len() * self.item.depth);

        for piece in self.overlap.boxes() {
            let new_array = new.array(piece.src_component)?;
            let old_array = match old {
                Some(old) => Some((old.array(piece.src_component)?, old.time())),
                None => None,
            };
            for d in 0..self.item.depth {
                for index in &piece.space {
                    let source = self.overlap.source_index(piece, index);
                    let value = new_array.get(source, d).ok_or_else(|| missing(source))?;

                    values.push(match old_array {
                        Some((old_array, t_old)) => {
                            let old_value = old_array.get(source, d).ok_or_else(|| missing(source))?;
                            time_interpolate(old_value, t_old, value, new.time(), time)?
                        }
                        None => value,
                    });
                }
            }
        }
        Ok(values)
    }


    fn scatter(&self, dst: &mut PatchLevel<D>, values: &[f64]) -> Result<()> {
        let patch_id = self.ends.dst_patch;
        let data = dst.patch_mut(patch_id)?.data_mut(self.item.item.dst)?;
        let mut values = values.iter();

        for piece in self.overlap.boxes() {
            let array = data.array_mut(piece.dst_component)?;

            for d in 0..self.item.depth {
                for index in &piece.space {
                    let value = values
                        .next()
                        .ok_or_else(|| Error::Protocol("ran out of values while unpacking".to_string()))?;
                    let target = array.get_mut(index, d).ok_or_else(|| Error::Protocol(format!(
                        "destination index {:?} is outside the data on patch {}", index, patch_id)))?;

                    match self.policy {
                        Policy::Sum => *target += value,
                        Policy::Copy | Policy::TimeInterpolate => *target = *value,
                    }
                }
            }
        }
        Ok(())
    }
}




/**
 * Creates transactions of one kind (copy or sum) for a fixed list of
 * transfer items.
 *
 * An item may be restricted to a set of active patches, for data that only
 * lives on some patches of a level. Transactions for that item are created
 * only between two active patches.
 */
#[derive(Clone, Debug)]
pub struct TransactionFactory<const D: usize> {
    kind: FactoryKind,
    items: Vec<ResolvedItem<D>>,
    active: Vec<Option<BTreeSet<PatchId>>>,
}




// ============================================================================
impl<const D: usize> TransactionFactory<D> {


    /**
     * Create a factory, checking that each item's source and destination
     * variables can exchange data.
     */
    pub fn new(kind: FactoryKind, db: &VariableDatabase<D>, items: Vec<TransferItem>) -> Result<Self> {
        let items = items
            .into_iter()
            .map(|item| {
                let dst = db.get(item.dst)?;
                let src = db.get(item.src)?;

                if dst.centering.family() != src.centering.family() {
                    return Err(Error::Configuration(format!(
                        "{} ({:?}) cannot be filled from {} ({:?})",
                        dst.name, dst.centering, src.name, src.centering)))
                }
                if dst.depth != src.depth {
                    return Err(Error::Configuration(format!(
                        "{} has depth {} but {} has depth {}",
                        dst.name, dst.depth, src.name, src.depth)))
                }
                if let Some(old) = item.src_old {
                    let old = db.get(old)?;
                    if old.centering != src.centering || old.depth != src.depth {
                        return Err(Error::Configuration(format!(
                            "old source {} does not match {}", old.name, src.name)))
                    }
                }
                Ok(ResolvedItem {
                    item,
                    depth: dst.depth,
                    dst_centering: dst.centering,
                    src_centering: src.centering,
                    dst_ghost_width: dst.ghost_width,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let active = vec![None; items.len()];
        Ok(Self { kind, items, active })
    }


    pub fn copy(db: &VariableDatabase<D>, items: Vec<TransferItem>) -> Result<Self> {
        Self::new(FactoryKind::Copy, db, items)
    }


    pub fn sum(db: &VariableDatabase<D>, items: Vec<TransferItem>) -> Result<Self> {
        Self::new(FactoryKind::Sum, db, items)
    }


    pub fn kind(&self) -> FactoryKind {
        self.kind
    }


    pub fn items(&self) -> &[ResolvedItem<D>] {
        &self.items
    }


    /**
     * Restrict an item to the given patches. Without a restriction, an item
     * is active on every patch.
     */
    pub fn with_active_patches<I: IntoIterator<Item = PatchId>>(mut self, item_index: usize, patches: I) -> Result<Self> {
        let slot = self.active.get_mut(item_index).ok_or_else(|| {
            Error::Configuration(format!("factory has no item {}", item_index))
        })?;
        *slot = Some(patches.into_iter().collect());
        Ok(self)
    }


    pub fn is_active(&self, item_index: usize, patch: PatchId) -> bool {
        match self.active.get(item_index) {
            Some(Some(patches)) => patches.contains(&patch),
            Some(None) => true,
            None => false,
        }
    }


    /**
     * Whether a transaction for this item may connect the two patches.
     */
    pub fn is_active_between(&self, item_index: usize, ends: &Endpoints) -> bool {
        self.is_active(item_index, ends.src_patch) && self.is_active(item_index, ends.dst_patch)
    }


    /// Whether some item writes `id` on the given patch. Variables no item
    /// writes are treated as written everywhere.
    fn writes_on(&self, id: VariableId, patch: PatchId) -> bool {
        let mut writers = (0..self.items.len()).filter(|&n| self.items[n].item.dst == id).peekable();

        if writers.peek().is_none() {
            return true
        }
        writers.any(|n| self.is_active(n, patch))
    }


    /**
     * Create a transaction for one item over one overlap. If `restrict` is
     * given, the overlap is first limited to that region of destination
     * cells. Sum transactions cannot interpolate in time.
     */
    pub fn allocate(
        &self,
        ends: Endpoints,
        overlap: BoxOverlap<D>,
        item_index: usize,
        restrict: Option<&IndexSpace<D>>,
        time_interpolate: bool,
    ) -> Result<Transaction<D>> {
        let item = *self.items.get(item_index).ok_or_else(|| {
            Error::Configuration(format!("factory has no item {}", item_index))
        })?;
        if !self.is_active_between(item_index, &ends) {
            return Err(Error::Configuration(format!(
                "item {} is not active on both patch {} and patch {}",
                item_index, ends.src_patch, ends.dst_patch)))
        }
        let overlap = match restrict {
            Some(cells) => overlap.restricted(cells),
            None => overlap,
        };
        if overlap.is_empty() {
            return Err(Error::Geometry(format!(
                "empty overlap from patch {} to patch {}",
                ends.src_patch, ends.dst_patch)))
        }
        let policy = match (self.kind, time_interpolate) {
            (FactoryKind::Copy, false) => Policy::Copy,
            (FactoryKind::Sum, false) => Policy::Sum,
            (FactoryKind::Copy, true) => {
                if item.item.src_old.is_none() {
                    return Err(Error::Configuration(format!(
                        "time interpolation into {} needs an old source", item.item.dst)))
                }
                Policy::TimeInterpolate
            }
            (FactoryKind::Sum, true) => {
                return Err(Error::Configuration("sum transactions do not interpolate in time".to_string()))
            }
        };
        trace!("{:?} transaction {} -> {} ({} indexes)", policy, ends.src_patch, ends.dst_patch, overlap.len());

        Ok(Transaction { ends, overlap, item, item_index, policy })
    }


    /**
     * Prepare destination data before a transfer. Sums accumulate into the
     * destination, so the selected data on every local patch where it is
     * active is zeroed and stamped with the given time. That data must be
     * allocated. Copies need no preparation.
     */
    pub fn preprocess_scratch_space(&self, level: &mut PatchLevel<D>, time: f64, selector: &ComponentSelector) -> Result<()> {
        if self.kind == FactoryKind::Copy {
            return Ok(())
        }
        for patch in level.patches_mut() {
            let patch_id = patch.id();

            for id in selector.iter().filter(|&id| self.writes_on(id, patch_id)) {
                let data = patch.data_mut(id)?;
                data.fill(0.0);
                data.set_time(time);
            }
        }
        Ok(())
    }
}
