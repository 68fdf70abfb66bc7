//! psort: CLI harness for building, querying and updating a PartitionSort
//! classifier from ClassBench files.

use clap::{Parser, Subcommand};
use partition_sort::classbench;
use partition_sort::{
    sortable_ruleset_partitioning, BruteForce, ClassifierConfig, PacketClassifier, PartitionSet,
    Point, Priority, Rule,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Instant;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "psort")]
#[command(version = "0.1.0")]
#[command(about = "Online packet classification with sortable rule partitions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a classifier and classify a packet trace
    Classify {
        /// ClassBench filter file (.gz accepted)
        #[arg(short, long)]
        rules: PathBuf,

        /// Packet trace; generated from the rules when omitted
        #[arg(short, long)]
        trace: Option<PathBuf>,

        /// YAML classifier configuration
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Bucket the whole ruleset up front instead of inserting rules one by one
        #[arg(long)]
        offline: bool,

        /// Number of packets to generate when no trace is given
        #[arg(long, default_value_t = 10_000)]
        packets: usize,

        /// Seed for trace generation
        #[arg(long, default_value_t = 1)]
        seed: u64,

        /// Check every result against a linear scan
        #[arg(long)]
        validate: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the sortable buckets of a ruleset
    Partition {
        /// ClassBench filter file (.gz accepted)
        #[arg(short, long)]
        rules: PathBuf,

        /// Print the buckets as JSON
        #[arg(long)]
        json: bool,
    },

    /// Apply random deletions and re-insertions
    Update {
        /// ClassBench filter file (.gz accepted)
        #[arg(short, long)]
        rules: PathBuf,

        /// YAML classifier configuration
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of updates to apply
        #[arg(short, long, default_value_t = 1_000)]
        updates: usize,

        /// Seed for update selection and trace generation
        #[arg(long, default_value_t = 1)]
        seed: u64,

        /// Check results against a linear scan after the updates
        #[arg(long)]
        validate: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Classify {
            rules,
            trace,
            config,
            offline,
            packets,
            seed,
            validate,
            json,
        } => classify(ClassifyArgs {
            rules,
            trace,
            config,
            offline,
            packets,
            seed,
            validate,
            json,
        }),
        Commands::Partition { rules, json } => partition(&rules, json),
        Commands::Update {
            rules,
            config,
            updates,
            seed,
            validate,
            json,
        } => update(&rules, config.as_deref(), updates, seed, validate, json),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

struct ClassifyArgs {
    rules: PathBuf,
    trace: Option<PathBuf>,
    config: Option<PathBuf>,
    offline: bool,
    packets: usize,
    seed: u64,
    validate: bool,
    json: bool,
}

#[derive(Serialize)]
struct ClassifyReport {
    classifier: &'static str,
    mode: &'static str,
    rules: usize,
    partitions: usize,
    construction_ms: f64,
    packets: usize,
    classification_ms: f64,
    matched: usize,
    avg_partitions_queried: f64,
    mem_size_bytes: usize,
    memory_access: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    mismatches: Option<usize>,
}

#[derive(Serialize)]
struct BucketReport {
    rules: usize,
    max_priority: Option<Priority>,
    field_order: Vec<usize>,
}

#[derive(Serialize)]
struct UpdateReport {
    rules: usize,
    updates: usize,
    insertions: usize,
    deletions: usize,
    update_ms: f64,
    partitions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    mismatches: Option<usize>,
}

fn load_config(path: Option<&Path>) -> CliResult<ClassifierConfig> {
    match path {
        Some(path) => Ok(ClassifierConfig::from_reader(File::open(path)?)?),
        None => Ok(ClassifierConfig::default()),
    }
}

fn load_rules(path: &Path) -> CliResult<Vec<Rule>> {
    let rules = classbench::load_rules(path)?;
    if rules.is_empty() {
        return Err(format!("no rules in {:?}", path).into());
    }
    Ok(rules)
}

fn millis(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Packets that each fall inside a randomly chosen rule.
fn generate_trace(rules: &[Rule], count: usize, seed: u64) -> Vec<Vec<Point>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let rule = &rules[rng.random_range(0..rules.len())];
            rule.ranges()
                .iter()
                .map(|range| rng.random_range(range.low()..=range.high()))
                .collect()
        })
        .collect()
}

/// Count packets where either lookup path of `classifier` disagrees with
/// a linear scan over `rules`.
fn count_mismatches(classifier: &PartitionSet, rules: &[Rule], packets: &[Vec<Point>]) -> usize {
    let oracle = BruteForce::from_rules(rules);
    packets
        .iter()
        .filter(|packet| {
            let expected = oracle.classify(packet);
            let pruned = classifier.classify(packet);
            let exhaustive = classifier.classify_exhaustive(packet);
            let agrees = pruned == expected && exhaustive == expected;
            if !agrees {
                log::warn!(
                    "Mismatch on {:?}: expected {:?}, pruned {:?}, exhaustive {:?}",
                    packet,
                    expected,
                    pruned,
                    exhaustive
                );
            }
            !agrees
        })
        .count()
}

fn classify(args: ClassifyArgs) -> CliResult<()> {
    let rules = load_rules(&args.rules)?;
    let config = load_config(args.config.as_deref())?.with_query_stats(true);

    let start = Instant::now();
    let set = if args.offline {
        PartitionSet::build_offline(&rules, config)?
    } else {
        PartitionSet::from_rules(&rules, config)?
    };
    let construction_ms = millis(start);
    log::info!(
        "Built {} partitions from {} rules in {:.2} ms",
        set.num_partitions(),
        rules.len(),
        construction_ms
    );

    let dim = rules[0].dim();
    let packets = match &args.trace {
        Some(path) => classbench::load_packets(path, dim)?,
        None => {
            log::info!(
                "Generating {} packets with seed {}",
                args.packets,
                args.seed
            );
            generate_trace(&rules, args.packets, args.seed)
        }
    };

    let start = Instant::now();
    let results: Vec<Option<Priority>> = packets.iter().map(|p| set.classify(p)).collect();
    let classification_ms = millis(start);
    // Taken before validation queries the set again
    let avg_partitions_queried = set.stats().average_partitions();
    let histogram = set.stats().histogram();

    let mismatches = args
        .validate
        .then(|| count_mismatches(&set, &rules, &packets));

    let report = ClassifyReport {
        classifier: set.name(),
        mode: if args.offline { "offline" } else { "online" },
        rules: rules.len(),
        partitions: set.num_partitions(),
        construction_ms,
        packets: packets.len(),
        classification_ms,
        matched: results.iter().filter(|r| r.is_some()).count(),
        avg_partitions_queried,
        mem_size_bytes: set.mem_size_bytes(),
        memory_access: set.memory_access(),
        mismatches,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Classifier:        {} ({})", report.classifier, report.mode);
        println!("Rules:             {}", report.rules);
        println!("Partitions:        {}", report.partitions);
        println!("Construction:      {:.2} ms", report.construction_ms);
        println!(
            "Classification:    {} packets in {:.2} ms ({} matched)",
            report.packets, report.classification_ms, report.matched
        );
        println!("Avg partitions:    {:.2}", report.avg_partitions_queried);
        println!("Memory:            {} bytes", report.mem_size_bytes);
        println!("Worst-case access: {}", report.memory_access);
        for (queried, count) in &histogram {
            println!("  {:>4} partitions queried: {} packets", queried, count);
        }
        if let Some(mismatches) = report.mismatches {
            println!("Mismatches:        {}", mismatches);
        }
    }

    match mismatches {
        Some(n) if n > 0 => Err(format!("{} packets disagree with linear scan", n).into()),
        _ => Ok(()),
    }
}

fn partition(rules_path: &Path, json: bool) -> CliResult<()> {
    let rules = load_rules(rules_path)?;
    let buckets = sortable_ruleset_partitioning(&rules)?;

    let reports: Vec<BucketReport> = buckets
        .iter()
        .map(|bucket| BucketReport {
            rules: bucket.members.len(),
            max_priority: bucket.members.iter().map(|&i| rules[i].priority()).max(),
            field_order: bucket.field_order.as_slice().to_vec(),
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    println!("{} rules in {} buckets", rules.len(), reports.len());
    for (i, report) in reports.iter().enumerate() {
        println!(
            "bucket {:>4}: {:>6} rules  max priority {:>6}  field order {:?}",
            i,
            report.rules,
            report.max_priority.unwrap_or(0),
            report.field_order
        );
    }
    Ok(())
}

fn update(
    rules_path: &Path,
    config_path: Option<&Path>,
    updates: usize,
    seed: u64,
    validate: bool,
    json: bool,
) -> CliResult<()> {
    let rules = load_rules(rules_path)?;
    let config = load_config(config_path)?;
    let mut set = PartitionSet::from_rules(&rules, config)?;

    let mut rng = StdRng::seed_from_u64(seed);
    let mut pool: Vec<Rule> = Vec::new();
    let mut insertions = 0;
    let mut deletions = 0;

    let start = Instant::now();
    for _ in 0..updates {
        let insert = !pool.is_empty() && (set.is_empty() || rng.random_bool(0.5));
        if insert {
            let rule = pool.swap_remove(rng.random_range(0..pool.len()));
            set.insert(rule)?;
            insertions += 1;
        } else if !set.is_empty() {
            let index = rng.random_range(0..set.len());
            if let Some(rule) = set.rules().nth(index).cloned() {
                pool.push(rule);
            }
            set.delete_rule(index);
            deletions += 1;
        }
    }
    let update_ms = millis(start);
    log::info!(
        "Applied {} insertions and {} deletions in {:.2} ms",
        insertions,
        deletions,
        update_ms
    );

    let mismatches = validate.then(|| {
        let live: Vec<Rule> = set.rules().cloned().collect();
        let packets = generate_trace(&rules, 10_000, seed);
        count_mismatches(&set, &live, &packets)
    });

    let report = UpdateReport {
        rules: set.len(),
        updates,
        insertions,
        deletions,
        update_ms,
        partitions: set.num_partitions(),
        mismatches,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Rules:       {}", report.rules);
        println!(
            "Updates:     {} ({} insertions, {} deletions) in {:.2} ms",
            report.updates, report.insertions, report.deletions, report.update_ms
        );
        println!("Partitions:  {}", report.partitions);
        if let Some(mismatches) = report.mismatches {
            println!("Mismatches:  {}", mismatches);
        }
    }

    match mismatches {
        Some(n) if n > 0 => Err(format!("{} packets disagree with linear scan", n).into()),
        _ => Ok(()),
    }
}
