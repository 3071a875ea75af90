// Scenario Runner - Load and execute scenario YAML files
//
// Usage:
//   cargo run --bin scenario_runner scenarios/two_lan_vpn.yaml
//   cargo run --bin scenario_runner scenarios/  (runs all .yaml files in directory)
//   cargo run --bin scenario_runner scenarios/two_lan_vpn.yaml --seed 0x1234...
//   cargo run --bin scenario_runner scenarios/two_lan_vpn.yaml --csv trace.csv --verbose

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use log::LevelFilter;
use simple_logger::SimpleLogger;

use vn_sim::vn_config::{parse_seed_hex, run_scenario, ExitStatus, ScenarioConfig};
use vn_sim::vn_interface::TraceSink;
use vn_sim::vn_trace::{ConsoleTraceSink, CsvTraceSink, MultiSink};

struct Options {
    path: PathBuf,
    seed: Option<[u8; 32]>,
    csv: Option<PathBuf>,
    verbose: bool,
}

fn usage(program: &str) -> ! {
    eprintln!(
        "Usage: {} <scenario.yaml | directory/> [--seed SEED_HEX] [--csv FILE] [--verbose]",
        program
    );
    eprintln!("\nExamples:");
    eprintln!("  {} scenarios/two_lan_vpn.yaml", program);
    eprintln!("  {} scenarios/", program);
    eprintln!("  {} scenarios/two_lan_vpn.yaml --seed 0x123456...", program);
    eprintln!("  {} scenarios/two_lan_vpn.yaml --csv trace.csv", program);
    std::process::exit(ExitStatus::SetupFailure.code());
}

fn parse_args(args: &[String]) -> Options {
    let program = args.first().map(|s| s.as_str()).unwrap_or("scenario_runner");
    if args.len() < 2 {
        usage(program);
    }

    let mut options = Options {
        path: PathBuf::from(&args[1]),
        seed: None,
        csv: None,
        verbose: false,
    };

    let mut rest = args[2..].iter();
    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "--seed" => {
                let hex = rest.next().unwrap_or_else(|| usage(program));
                options.seed = Some(parse_seed_hex(hex).unwrap_or_else(|e| {
                    eprintln!("Invalid hex seed: {}", e);
                    std::process::exit(ExitStatus::SetupFailure.code());
                }));
            }
            "--csv" => {
                let file = rest.next().unwrap_or_else(|| usage(program));
                options.csv = Some(PathBuf::from(file));
            }
            "--verbose" | "-v" => options.verbose = true,
            other => {
                eprintln!("Unknown option: {}", other);
                usage(program);
            }
        }
    }
    options
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let options = parse_args(&args);

    let level = if options.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    if let Err(e) = SimpleLogger::new().with_level(level).init() {
        eprintln!("Failed to install logger: {}", e);
    }

    let path = options.path.as_path();
    let failures = if path.is_file() {
        usize::from(!run_scenario_file(path, &options, options.csv.clone()))
    } else if path.is_dir() {
        run_scenario_directory(path, &options)
    } else {
        eprintln!("Error: Path does not exist: {}", path.display());
        std::process::exit(ExitStatus::SetupFailure.code());
    };

    if failures > 0 {
        std::process::exit(ExitStatus::SetupFailure.code());
    }
}

fn run_scenario_directory(dir: &Path, options: &Options) -> usize {
    let mut scenarios = Vec::new();

    // Find all .yaml files
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) == Some("yaml") ||
               path.extension().and_then(|s| s.to_str()) == Some("yml") {
                scenarios.push(path);
            }
        }
    }

    scenarios.sort();

    if scenarios.is_empty() {
        eprintln!("No .yaml files found in {}", dir.display());
        std::process::exit(ExitStatus::SetupFailure.code());
    }

    println!("\n╔════════════════════════════════════════════════════════╗");
    println!("║  SCENARIO RUNNER - Multiple Scenarios                  ║");
    println!("╚════════════════════════════════════════════════════════╝\n");
    println!("Found {} scenario(s) to run\n", scenarios.len());

    let mut failures = 0;
    for (i, scenario_path) in scenarios.iter().enumerate() {
        println!("\n{}/{} Running: {}\n", i + 1, scenarios.len(), scenario_path.display());

        // one CSV per scenario, next to the requested file
        let csv = options.csv.as_ref().map(|base| {
            let stem = scenario_path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("scenario");
            base.with_file_name(format!("{}.csv", stem))
        });
        if !run_scenario_file(scenario_path, options, csv) {
            failures += 1;
        }
    }

    println!("\n╔════════════════════════════════════════════════════════╗");
    println!("║  All scenarios complete! ({} failed)", failures);
    println!("╚════════════════════════════════════════════════════════╝\n");
    failures
}

/// Returns false when the scenario could not be loaded or set up
fn run_scenario_file(path: &Path, options: &Options, csv: Option<PathBuf>) -> bool {
    println!("Loading scenario from: {}", path.display());

    let config = match ScenarioConfig::from_file(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load {}: {}", path.display(), e);
            return false;
        }
    };

    // Print scenario header
    let title = config.meta.name.clone().unwrap_or_else(|| {
        path.file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("scenario")
            .to_string()
    });
    println!("\n╔════════════════════════════════════════════════════════╗");
    println!("║  {}{}║", title, " ".repeat(54_usize.saturating_sub(title.len())));
    println!("╚════════════════════════════════════════════════════════╝\n");

    if let Some(ref desc) = config.meta.description {
        println!("{}\n", desc);
    }

    println!("Configuration:");
    println!("  Nodes: {}", config.nodes.len());
    println!("  Links: {}", config.links.len());
    println!("  Tunnels: {}", config.tunnels.len());
    println!("  Producers: {}", config.producers.len());
    println!("  Duration: {}s", config.duration);
    println!("\nStarting simulation...\n");

    let mut sinks = MultiSink::new().with(Box::new(ConsoleTraceSink::new(options.verbose)));
    if let Some(csv_path) = csv {
        match CsvTraceSink::new(&csv_path) {
            Ok(sink) => {
                println!("Writing trace to {}", csv_path.display());
                sinks.push(Box::new(sink));
            }
            Err(e) => {
                eprintln!("Failed to create {}: {}", csv_path.display(), e);
                return false;
            }
        }
    }
    let sink: Box<dyn TraceSink> = Box::new(sinks);

    match run_scenario(&config, options.seed, sink) {
        Ok(report) => {
            report.print_summary();
            println!("\n✓ Scenario complete!\n");
            true
        }
        Err(e) => {
            eprintln!("Scenario setup failed: {}", e);
            false
        }
    }
}
