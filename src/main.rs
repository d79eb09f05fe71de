use anyhow::{bail, Context, Result};
use seedgraph::{
    cli::{merge_counts, Cli, Commands, Mode},
    logging,
    scheduler::execution_order,
    schema::SchemaDescription,
    session::GenerationSession,
    validate::validate_counts,
};
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

fn load_schema(path: &Path) -> Result<SchemaDescription> {
    SchemaDescription::from_path(path)
        .with_context(|| format!("Failed to read schema description {:?}", path))
}

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    logging::init(cli.verbose);

    match cli.command {
        Commands::Generate {
            config,
            mode,
            counts,
            seed,
            snapshots,
            database,
        } => {
            let start = Instant::now();
            let schema = load_schema(&config)?;
            let counts = merge_counts(&schema.counts, &counts);

            let mut settings = schema.settings.clone();
            settings.seed = seed.or(settings.seed);
            settings.snapshot_root = snapshots.or(settings.snapshot_root);
            settings.database = database.or(settings.database);

            let mut session = GenerationSession::new(schema, settings)
                .context("Failed to set up generation session")?;

            let loaded = session
                .prepare(mode)
                .context("Failed to prepare units")?;
            if mode == Mode::Incremental {
                match loaded {
                    Some(version) => println!("Loaded snapshot {}", version),
                    None => println!("No snapshot found, starting from empty units"),
                }
            }

            let reports = session.generate(&counts).context("Generation failed")?;
            let (version, dir) = session
                .save_snapshot()
                .context("Failed to save snapshot")?;

            println!();
            for (unit, report) in &reports {
                if report.skipped > 0 {
                    println!(
                        "  {:<24} {:>8} rows ({} skipped)",
                        unit, report.written, report.skipped
                    );
                } else {
                    println!("  {:<24} {:>8} rows", unit, report.written);
                }
            }
            println!(
                "\nSaved snapshot {} to {:?} in {:.1}s",
                version,
                dir,
                start.elapsed().as_secs_f64()
            );
        }

        Commands::Validate { config, counts } => {
            let schema = load_schema(&config)?;
            let counts = merge_counts(&schema.counts, &counts);
            let warnings = validate_counts(&schema, &counts, &HashMap::new())
                .context("Row-count request rejected")?;
            for warning in &warnings {
                println!("warning: {}", warning);
            }
            println!("Request is valid ({} units)", counts.len());
        }

        Commands::ListUnits { config } => {
            let schema = load_schema(&config)?;
            let mut graph: Vec<(&str, &[String], &str)> = Vec::new();
            for table in &schema.tables {
                graph.push((table.name.as_str(), table.dependency.as_slice(), "table"));
            }
            for sheet in &schema.sheets {
                graph.push((sheet.name.as_str(), sheet.dependency.as_slice(), "sheet"));
            }

            let pairs: Vec<(&str, &[String])> = graph.iter().map(|(n, d, _)| (*n, *d)).collect();
            let order = execution_order(&pairs)?;
            if order.is_empty() {
                bail!("{:?} declares no units", config);
            }

            println!("Units in execution order:\n");
            for idx in order {
                let (name, deps, kind) = graph[idx];
                if deps.is_empty() {
                    println!("  {:<24} {}", name, kind);
                } else {
                    println!("  {:<24} {} <- {}", name, kind, deps.join(", "));
                }
            }
        }
    }

    Ok(())
}
