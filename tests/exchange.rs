mod common;

use patchxfer::centering::Centering;
use patchxfer::config::ExchangeConfig;
use patchxfer::index_space::{IndexSpace, range2d};
use patchxfer::int_vector::IntVector;
use patchxfer::job::{JobRelauncher, JobState, RelaunchableJob};
use patchxfer::level::{BoxLevel, PatchLevel};
use patchxfer::message::Communicator;
use patchxfer::schedule::{Schedule, ScheduleBuilder};
use patchxfer::transaction::{LevelPair, TransactionFactory, TransferItem};
use patchxfer::variable::{VariableDatabase, VariableId};
use patchxfer::Error;

use common::run_ranks;

const GHOST: i64 = 2;

fn boxes() -> BoxLevel<2> {
    BoxLevel::new(vec![
        (range2d(0..4, 0..4), 0),
        (range2d(4..8, 0..4), 1),
        (range2d(0..4, 4..8), 2),
        (range2d(4..8, 4..8), 3),
        (range2d(8..12, 0..8), 2),
    ])
}

fn exact(index: [i64; 2], depth: usize) -> f64 {
    (index[0] + 100 * index[1]) as f64 + 1000.0 * depth as f64
}

fn in_domain(index: [i64; 2]) -> bool {
    boxes().iter().any(|(_, b, _)| b.contains(index))
}

/// Interior cells hold the exact values and ghost cells hold -1.
fn setup(rank: usize) -> (VariableDatabase<2>, VariableId, PatchLevel<2>) {
    let mut db = VariableDatabase::new();
    let q = db.register("q", Centering::Cell, 2, IntVector::uniform(GHOST)).unwrap();
    let mut level = PatchLevel::new(0, IntVector::one(), boxes(), rank);
    level.allocate(q, db.get(q).unwrap(), 0.0);

    for patch in level.patches_mut() {
        let cells = *patch.cells();
        let array = patch.data_mut(q).unwrap().array_mut(0).unwrap();
        let space: IndexSpace<2> = *array.space();

        for index in &space {
            for depth in 0..2 {
                *array.get_mut(index, depth).unwrap() = if cells.contains(index) { exact(index, depth) } else { -1.0 };
            }
        }
    }
    (db, q, level)
}

fn schedule(db: &VariableDatabase<2>, q: VariableId, rank: usize, tag: u32) -> Schedule<2> {
    let factory = TransactionFactory::copy(db, vec![TransferItem::new(q, q)]).unwrap();
    ScheduleBuilder::new(&boxes(), &boxes(), factory)
        .ghost_width(IntVector::uniform(GHOST))
        .tag(tag)
        .build(rank)
        .unwrap()
}

/// Return the number of ghost values that differ from the exact solution
/// inside the domain, or from -1 outside it.
fn wrong_ghost_values(level: &PatchLevel<2>, q: VariableId) -> usize {
    let mut wrong = 0;

    for patch in level.patches() {
        let array = patch.data(q).unwrap().array(0).unwrap();

        for index in array.space() {
            for depth in 0..2 {
                let expected = if in_domain(index) { exact(index, depth) } else { -1.0 };
                if array.get(index, depth) != Some(expected) {
                    wrong += 1
                }
            }
        }
    }
    wrong
}

#[test]
fn copy_schedule_fills_every_ghost_cell() {
    let wrong = run_ranks(4, |comm| {
        let (db, q, mut level) = setup(comm.rank());
        schedule(&db, q, comm.rank(), 0).execute_in_place(&comm, &mut level, 0.0).unwrap();
        wrong_ghost_values(&level, q)
    });
    assert_eq!(wrong, vec![0; 4]);
}

#[test]
fn serial_and_parallel_packing_agree() {
    let wrong = run_ranks(4, |comm| {
        let (db, q, mut level) = setup(comm.rank());
        let factory = TransactionFactory::copy(&db, vec![TransferItem::new(q, q)]).unwrap();
        let config = ExchangeConfig { parallel_pack: false, ..ExchangeConfig::default() };
        ScheduleBuilder::new(&boxes(), &boxes(), factory)
            .ghost_width(IntVector::uniform(GHOST))
            .config(config)
            .build(comm.rank())
            .unwrap()
            .execute_in_place(&comm, &mut level, 0.0)
            .unwrap();
        wrong_ghost_values(&level, q)
    });
    assert_eq!(wrong, vec![0; 4]);
}

#[test]
fn job_path_matches_blocking_execution() {
    let same = run_ranks(4, |comm| {
        let rank = comm.rank();
        let (db, q, mut blocking) = setup(rank);
        let mut resumed = blocking.clone();

        schedule(&db, q, rank, 1).execute_in_place(&comm, &mut blocking, 0.0).unwrap();

        let s = schedule(&db, q, rank, 2);
        let mut job = s.job(&comm, LevelPair::Same(&mut resumed), 0.0);
        assert_eq!(job.job_state(), JobState::NoncommunicationWait);

        while job.job_state() != JobState::Completed {
            job.continue_job().unwrap();
        }
        let same = blocking.patches().zip(resumed.patches()).all(|(a, b)| a.data(q).unwrap() == b.data(q).unwrap());
        same
    });
    assert_eq!(same, vec![true; 4]);
}

#[test]
fn relauncher_interleaves_two_schedules() {
    let wrong = run_ranks(4, |comm| {
        let rank = comm.rank();
        let (db, q, mut a) = setup(rank);
        let mut b = a.clone();
        let sa = schedule(&db, q, rank, 10);
        let sb = schedule(&db, q, rank, 11);

        {
            let mut ja = sa.job(&comm, LevelPair::Same(&mut a), 0.0);
            let mut jb = sb.job(&comm, LevelPair::Same(&mut b), 0.0);
            let mut relauncher = JobRelauncher::new();

            // Odd ranks start the second schedule first.
            if rank % 2 == 0 {
                relauncher.push(&mut ja);
                relauncher.push(&mut jb);
            } else {
                relauncher.push(&mut jb);
                relauncher.push(&mut ja);
            }
            relauncher.run().unwrap();
        }
        wrong_ghost_values(&a, q) + wrong_ghost_values(&b, q)
    });
    assert_eq!(wrong, vec![0; 4]);
}

/// Each rank holds old data at time 0 and new data at time 1 on its patch,
/// and fills its ghost cell at time 0.25 from the other rank's patch.
#[test]
fn time_interpolated_ghosts_arrive_from_a_remote_rank() {
    let results = run_ranks(2, |comm| {
        let rank = comm.rank();
        let level = BoxLevel::new(vec![(IndexSpace::new([0], [3]), 0), (IndexSpace::new([4], [7]), 1)]);
        let mut db = VariableDatabase::<1>::new();
        let new = db.register("new", Centering::Cell, 1, IntVector::one()).unwrap();
        let old = db.register("old", Centering::Cell, 1, IntVector::one()).unwrap();
        let dst = db.register("dst", Centering::Cell, 1, IntVector::one()).unwrap();

        let mut patches = PatchLevel::new(0, IntVector::one(), level.clone(), rank);
        let (old_value, new_value) = if rank == 0 { (2.0, 4.0) } else { (6.0, 10.0) };

        for (id, time, value) in vec![(new, 1.0, new_value), (old, 0.0, old_value), (dst, 0.0, -1.0)] {
            patches.allocate(id, db.get(id).unwrap(), time);
            patches.patch_mut(rank).unwrap().data_mut(id).unwrap().fill(value);
        }
        let factory = TransactionFactory::copy(&db, vec![TransferItem::new(dst, new).with_old(old)]).unwrap();
        let s = ScheduleBuilder::new(&level, &level, factory)
            .ghost_width(IntVector::one())
            .time_interpolate(true)
            .tag(6)
            .build(rank)
            .unwrap();
        assert_eq!(s.peers(), vec![1 - rank]);
        s.execute_in_place(&comm, &mut patches, 0.25).unwrap();

        let ghost = if rank == 0 { [4] } else { [3] };
        let interior = if rank == 0 { [0] } else { [7] };
        let array = patches.patch(rank).unwrap().data(dst).unwrap().array(0).unwrap();
        (array.get(ghost, 0).unwrap(), array.get(interior, 0).unwrap())
    });
    assert_eq!(results[0], (7.0, 2.5));
    assert_eq!(results[1], (2.5, 7.0));
}

#[test]
fn truncated_message_is_a_protocol_error() {
    let results = run_ranks(2, |comm| {
        let rank = comm.rank();
        let level = BoxLevel::new(vec![(IndexSpace::new([0], [3]), 0), (IndexSpace::new([4], [7]), 1)]);
        let mut db = VariableDatabase::<1>::new();
        let q = db.register("q", Centering::Cell, 1, IntVector::one()).unwrap();
        let factory = TransactionFactory::copy(&db, vec![TransferItem::new(q, q)]).unwrap();
        let s = ScheduleBuilder::new(&level, &level, factory)
            .ghost_width(IntVector::one())
            .tag(5)
            .build(rank)
            .unwrap();
        let mut patches = PatchLevel::new(0, IntVector::one(), level.clone(), rank);
        patches.allocate(q, db.get(q).unwrap(), 0.0);

        if rank == 0 {
            s.execute_in_place(&comm, &mut patches, 0.0)
        } else {
            comm.send(0, 5, vec![0; 4]).unwrap();
            comm.recv(0, 5).map(|_| ())
        }
    });
    assert!(matches!(results[0], Err(Error::Protocol(_))));
    assert!(results[1].is_ok());
}

#[test]
fn schedule_on_wrong_rank_is_rejected() {
    let results = run_ranks(2, |comm| {
        let (db, q, mut level) = setup(comm.rank());
        schedule(&db, q, 1 - comm.rank(), 0).execute_in_place(&comm, &mut level, 0.0)
    });
    assert!(results.iter().all(|r| matches!(r, Err(Error::Configuration(_)))));
}
