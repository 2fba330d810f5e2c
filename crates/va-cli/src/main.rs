#![forbid(unsafe_code)]

use std::path::PathBuf;

use tracing::info;
use va_pipeline::{RunOptions, run_calculations, run_prep};
use va_store::tables::{PolicyLinkRow, PolicyRow};
use va_store::{DataDirs, PolicyStore, RawTables, policy_file};
use va_validate::{ValidationOptions, validate_partitions};

const USAGE: &str = "\
votealign <command> [options]

commands:
  policies    build the policy tables from authored YAML definitions
  prep        materialize the staging tables from the input tables
  calc        compute per-person distributions and load the sink
  coalesce    merge partition files into the load file
  validate    re-derive distributions slowly and compare
  run         prep, calc, coalesce, and load in one go

options:
  --data-dir DIR     data directory (default: data)
  --incremental      calc: recompute only hash-stale people
  --person-id N      calc/validate: restrict to this person (repeatable)
  --policy-id N      calc/validate: restrict to this policy (repeatable)
  --sample N         validate: check at most N person/party combinations
                     (default: 50; 0 checks all)
  --no-sink          calc/run: skip the SQLite sink load
  --quiet            only warnings and errors
  -h, --help         show this help
";

#[derive(Debug, Default)]
struct CliOptions {
    data_dir: PathBuf,
    incremental: bool,
    person_ids: Vec<i64>,
    policy_ids: Vec<i64>,
    sample: usize,
    no_sink: bool,
    quiet: bool,
}

fn parse_options(
    mut args: impl Iterator<Item = String>,
) -> Result<CliOptions, Box<dyn std::error::Error>> {
    let mut options = CliOptions {
        data_dir: PathBuf::from("data"),
        sample: 50,
        ..CliOptions::default()
    };

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--data-dir" => {
                let value = args.next().ok_or("--data-dir requires a path")?;
                options.data_dir = PathBuf::from(value);
            }
            "--incremental" => options.incremental = true,
            "--person-id" => {
                let value = args.next().ok_or("--person-id requires a value")?;
                options.person_ids.push(value.parse()?);
            }
            "--policy-id" => {
                let value = args.next().ok_or("--policy-id requires a value")?;
                options.policy_ids.push(value.parse()?);
            }
            "--sample" => {
                let value = args.next().ok_or("--sample requires a value")?;
                options.sample = value.parse()?;
            }
            "--no-sink" => options.no_sink = true,
            "--quiet" => options.quiet = true,
            "-h" | "--help" => {
                print!("{USAGE}");
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {other}").into()),
        }
    }
    Ok(options)
}

fn init_tracing(quiet: bool) {
    let default_filter = if quiet { "warn" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_policies(dirs: &DataDirs) -> Result<(), Box<dyn std::error::Error>> {
    let files = policy_file::load_policy_files(&dirs.policy_files_dir())?;
    let divisions = va_store::tables::DivisionRow::read_all(&dirs.divisions_path())?;
    let agreements = va_store::tables::AgreementRow::read_all(&dirs.agreements_path())?;
    let chambers = va_store::tables::ChamberRow::read_all(&dirs.chambers_path())?;
    let chamber_ids = chambers.iter().map(|c| (c.slug, c.id)).collect();

    let set = policy_file::build_policy_tables(&files, &divisions, &agreements, &chamber_ids)?;
    PolicyRow::write_all(&dirs.policies_path(), &set.policies)?;
    PolicyLinkRow::write_all(&dirs.division_links_path(), &set.division_links)?;
    PolicyLinkRow::write_all(&dirs.agreement_links_path(), &set.agreement_links)?;

    info!(
        policies = set.policies.len(),
        division_links = set.division_links.len(),
        agreement_links = set.agreement_links.len(),
        "policy tables written"
    );
    Ok(())
}

fn run_options(options: &CliOptions) -> RunOptions {
    RunOptions {
        incremental: options.incremental,
        person_ids: (!options.person_ids.is_empty()).then(|| options.person_ids.clone()),
        policy_ids: (!options.policy_ids.is_empty()).then(|| options.policy_ids.clone()),
        load_sink: !options.no_sink,
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args();
    let _program = args.next();
    let Some(command) = args.next() else {
        print!("{USAGE}");
        std::process::exit(2);
    };
    if command == "-h" || command == "--help" {
        print!("{USAGE}");
        return Ok(());
    }

    let options = parse_options(args)?;
    init_tracing(options.quiet);
    let dirs = DataDirs::new(&options.data_dir);

    match command.as_str() {
        "policies" => build_policies(&dirs)?,
        "prep" => {
            let raw = RawTables::load(&dirs)?;
            run_prep(&raw, &dirs)?;
        }
        "calc" => {
            let store = PolicyStore::load(&dirs)?;
            let report = run_calculations(&store, &dirs, &run_options(&options))?;
            info!(
                partitions = report.calc.partitions_written,
                rows = report.coalesced_rows,
                "calculated policy distributions"
            );
        }
        "coalesce" => {
            let rows = va_pipeline::coalesce_partitions(&dirs)?;
            info!(rows, "coalesced");
        }
        "validate" => {
            let store = PolicyStore::load(&dirs)?;
            let report = validate_partitions(
                &store,
                &dirs,
                &ValidationOptions {
                    sample: options.sample,
                    person_ids: (!options.person_ids.is_empty())
                        .then(|| options.person_ids.clone()),
                    policy_ids: (!options.policy_ids.is_empty())
                        .then(|| options.policy_ids.clone()),
                },
            )?;
            if !report.passed() {
                for failure in report.failures.iter().take(20) {
                    eprintln!(
                        "person {} policy {} period {} ({}): {} expected {} got {}",
                        failure.person_id,
                        failure.policy_id,
                        failure.period_id,
                        if failure.is_target == 1 {
                            "target"
                        } else {
                            "comparison"
                        },
                        failure.field,
                        failure.expected,
                        failure.actual
                    );
                }
                return Err(format!(
                    "{} of {} rows failed validation",
                    report.failures.len(),
                    report.rows_checked
                )
                .into());
            }
            info!(
                triples = report.triples_checked,
                rows = report.rows_checked,
                "validation passed"
            );
        }
        "run" => {
            let raw = RawTables::load(&dirs)?;
            run_prep(&raw, &dirs)?;
            let store = PolicyStore::load(&dirs)?;
            let report = run_calculations(&store, &dirs, &run_options(&options))?;
            info!(
                partitions = report.calc.partitions_written,
                rows = report.coalesced_rows,
                sink_rows = report.sink_rows,
                "run complete"
            );
        }
        other => {
            eprintln!("unknown command: {other}\n");
            print!("{USAGE}");
            std::process::exit(2);
        }
    }
    Ok(())
}
