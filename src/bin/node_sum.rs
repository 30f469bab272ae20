use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::thread;

use clap::Parser;
use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;

use patchxfer::centering::Centering;
use patchxfer::index_space::{IndexSpace, range2d};
use patchxfer::int_vector::IntVector;
use patchxfer::level::{BoxLevel, PatchHierarchy, PatchLevel};
use patchxfer::message::channel::ChannelCommunicator;
use patchxfer::message::tcp::TcpCommunicator;
use patchxfer::message::Communicator;
use patchxfer::node_sum::{PatchBoundaryNodeSum, SumTarget};
use patchxfer::variable::{VariableDatabase, VariableId};
use patchxfer::{Error, Result};

/// Sum a node-centered field over a grid of patches spread across ranks,
/// where every patch contributes 1 at each of its nodes, and check that
/// each node ends up holding the number of patches that share it.
#[derive(Clone, Debug, Parser)]
#[clap(version = "0.1", author = "J. Zrake <jzrake@clemson.edu>")]
struct Opts {
    /// Number of ranks, each run on its own thread
    #[clap(short = 'r', long, default_value = "2")]
    ranks: usize,

    /// Number of patches along each axis of the coarse level
    #[clap(short = 'p', long, default_value = "4")]
    patches: usize,

    /// Number of cells along each axis of a coarse patch
    #[clap(short = 'n', long, default_value = "8")]
    cells: i64,

    /// Number of values per node
    #[clap(short = 'd', long, default_value = "1")]
    depth: usize,

    /// Add a level refined by 2 over the lower-left quarter of the domain
    #[clap(long)]
    refine: bool,

    /// Connect the ranks over TCP on localhost instead of channels
    #[clap(long)]
    tcp: bool,

    /// First TCP port; rank r listens on base_port + r
    #[clap(long, default_value = "47400")]
    base_port: u16,

    /// One of off, error, warn, info, debug, trace
    #[clap(long, default_value = "info")]
    log_level: String,
}

fn peer(base_port: u16, rank: usize) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), base_port + rank as u16)
}

/// Split the square `[0, extent)^2` into `split x split` boxes, dealt to the
/// ranks round-robin.
fn grid(extent: i64, split: usize, ranks: usize) -> BoxLevel<2> {
    let step = extent / split as i64;
    let boxes = (0..split * split)
        .map(|n| {
            let (i, j) = ((n % split) as i64, (n / split) as i64);
            let di = i * step..if i as usize == split - 1 { extent } else { (i + 1) * step };
            let dj = j * step..if j as usize == split - 1 { extent } else { (j + 1) * step };
            (range2d(di, dj), n % ranks)
        })
        .collect();
    BoxLevel::new(boxes)
}

/// Number of boxes whose node box contains the given node.
fn sharing(boxes: &BoxLevel<2>, node: [i64; 2]) -> f64 {
    boxes.iter().filter(|(_, b, _)| b.to_nodes().contains(node)).count() as f64
}

struct Layout {
    coarse: BoxLevel<2>,
    fine: Option<BoxLevel<2>>,
    half: i64,
}

impl Layout {
    fn new(opts: &Opts) -> Result<Self> {
        let extent = opts.cells * opts.patches as i64;

        if opts.refine && extent % 2 != 0 {
            return Err(Error::Configuration(format!("refinement needs an even extent, got {}", extent)))
        }
        Ok(Self {
            coarse: grid(extent, opts.patches, opts.ranks),
            fine: if opts.refine { Some(grid(extent, 2, opts.ranks)) } else { None },
            half: extent / 2,
        })
    }

    /// Expected value at a coarse node, or `None` where the fine level
    /// overwrites the coarse value with something not worth predicting.
    fn expected_coarse(&self, node: [i64; 2]) -> Option<f64> {
        let own = sharing(&self.coarse, node);
        let fine = match &self.fine {
            None => return Some(own),
            Some(fine) => fine,
        };
        let inside = node.iter().all(|&x| 0 <= x && x <= self.half);
        let interior = node.iter().all(|&x| 0 < x && x < self.half);

        if !inside {
            Some(own)
        } else if interior {
            None
        } else {
            Some(own + sharing(fine, [node[0] * 2, node[1] * 2]))
        }
    }

    /// Expected value at a fine node, or `None` for hanging nodes, which are
    /// interpolated.
    fn expected_fine(&self, fine: &BoxLevel<2>, node: [i64; 2]) -> Option<f64> {
        let own = sharing(fine, node);
        let extent = self.half * 2;
        let on_boundary = node.iter().any(|&x| x == 0 || x == extent);

        if !on_boundary {
            Some(own)
        } else if node.iter().all(|&x| x % 2 == 0) {
            Some(own + sharing(&self.coarse, [node[0] / 2, node[1] / 2]))
        } else {
            None
        }
    }
}

fn level_with_ones(db: &VariableDatabase<2>, q: VariableId, number: usize, ratio: i64, boxes: BoxLevel<2>, rank: usize) -> Result<PatchLevel<2>> {
    let mut level = PatchLevel::new(number, IntVector::uniform(ratio), boxes, rank);
    level.allocate(q, db.get(q)?, 0.0);

    for patch in level.patches_mut() {
        patch.data_mut(q)?.fill(1.0)
    }
    Ok(level)
}

fn count_mismatches<F: Fn([i64; 2]) -> Option<f64>>(level: &PatchLevel<2>, q: VariableId, expected: F) -> Result<usize> {
    let mut mismatches = 0;

    for patch in level.patches() {
        let array = patch.data(q)?.array(0)?;
        let space: IndexSpace<2> = *array.space();

        for node in &space {
            if let Some(expected) = expected(node) {
                for depth in 0..array.depth() {
                    if array.get(node, depth) != Some(expected) {
                        mismatches += 1
                    }
                }
            }
        }
    }
    Ok(mismatches)
}

fn run_rank<C: Communicator>(comm: C, opts: &Opts) -> Result<usize> {
    let rank = comm.rank();
    let layout = Layout::new(opts)?;
    let mut db = VariableDatabase::new();
    let q = db.register("weight", Centering::Node, opts.depth, IntVector::zero())?;

    let mut sum = PatchBoundaryNodeSum::new("weight-sum");
    sum.register_sum(&mut db, q)?;

    let coarse = level_with_ones(&db, q, 0, 1, layout.coarse.clone(), rank)?;

    match &layout.fine {
        None => {
            let mut level = coarse;
            sum.setup_sum_level(&db, &level)?;
            sum.compute_sum(&comm, SumTarget::Level(&mut level), false)?;
            count_mismatches(&level, q, |node| layout.expected_coarse(node))
        }
        Some(fine_boxes) => {
            let fine = level_with_ones(&db, q, 1, 2, fine_boxes.clone(), rank)?;
            let mut hierarchy = PatchHierarchy::new(vec![coarse, fine])?;
            sum.setup_sum_hierarchy(&db, &hierarchy, 0, 1)?;
            sum.compute_sum(&comm, SumTarget::Hierarchy(&mut hierarchy), true)?;

            let coarse_mismatches = count_mismatches(hierarchy.level(0)?, q, |node| layout.expected_coarse(node))?;
            let fine_mismatches = count_mismatches(hierarchy.level(1)?, q, |node| layout.expected_fine(fine_boxes, node))?;
            Ok(coarse_mismatches + fine_mismatches)
        }
    }
}

fn main() {
    let opts = Opts::parse();
    let level = opts.log_level.parse().unwrap_or(LevelFilter::Info);

    if let Err(e) = SimpleLogger::new().with_level(level).init() {
        eprintln!("could not start logger: {}", e)
    }
    info!("{:?}", opts);

    let procs: Vec<_> = if opts.tcp {
        let peers: Vec<_> = (0..opts.ranks).map(|rank| peer(opts.base_port, rank)).collect();
        (0..opts.ranks)
            .map(|rank| {
                let peers = peers.clone();
                let opts = opts.clone();
                thread::spawn(move || run_rank(TcpCommunicator::connect(rank, peers)?, &opts))
            })
            .collect()
    } else {
        ChannelCommunicator::world(opts.ranks)
            .into_iter()
            .map(|comm| {
                let opts = opts.clone();
                thread::spawn(move || run_rank(comm, &opts))
            })
            .collect()
    };

    let mut failed = false;

    for (rank, process) in procs.into_iter().enumerate() {
        match process.join() {
            Ok(Ok(0)) => info!("rank {}: all node sums correct", rank),
            Ok(Ok(n)) => {
                error!("rank {}: {} node values differ from the expected sums", rank, n);
                failed = true
            }
            Ok(Err(e)) => {
                error!("rank {}: {}", rank, e);
                failed = true
            }
            Err(_) => {
                error!("rank {} panicked", rank);
                failed = true
            }
        }
    }
    if failed {
        std::process::exit(1)
    }
}
