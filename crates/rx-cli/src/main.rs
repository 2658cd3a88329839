//! rarexsec CLI

mod columns;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use rx_hub::{FriendLinkOptions, ScoreAttachOptions, attach_scores, link_friends, parse_column_overrides};
use rx_pipeline::{
    BeamPeriodRegistry, RunArguments, SnapshotOptions, SnapshotPipelineBuilder, VariableRegistry, load_catalogue,
    resolve_beam, resolve_periods,
};

#[derive(Parser)]
#[command(name = "rarexsec")]
#[command(about = "rarexsec - event snapshots and hub archives for strangeness cross-section analyses")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RunArgs {
    /// `<config.json> <beam> <periods> [additional-periods...] [selection] [output]`
    #[arg(required = true, num_args = 3.., value_name = "ARGS")]
    args: Vec<String>,

    /// Skip data (beam-on) samples.
    #[arg(long)]
    blind: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an events-only archive
    Snapshot(RunArgs),

    /// Write a hub archive with catalogue and metadata
    SnapshotAnalysis(RunArgs),

    /// Write the training pool
    TrainingPool(RunArgs),

    /// Attach a score table to every hub entry as a friend
    HubAttachFriends {
        /// Hub directory
        #[arg(long)]
        hub: PathBuf,

        /// Parquet file with `event_uid` and the score columns
        #[arg(long)]
        scores: PathBuf,

        /// Tree name of the score table
        #[arg(long)]
        tree: String,

        /// Friend label
        #[arg(long)]
        label: String,

        /// Friend tree name (defaults to the label)
        #[arg(long)]
        friend_tree: Option<String>,

        /// Shard directory (defaults to `<hub>/friends/<label>`)
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Columns to copy, `a,b,c` or `in:out`
        #[arg(long)]
        columns: Option<String>,
    },

    /// Point the entries' friend fields at external friend files
    CnnFriendRegister {
        /// Hub directory
        hub: PathBuf,

        /// One friend file for every entry
        #[arg(long, conflicts_with = "shard_dir", required_unless_present = "shard_dir")]
        single_file: Option<PathBuf>,

        /// Directory with one friend file per entry
        #[arg(long)]
        shard_dir: Option<PathBuf>,

        /// Appended to each friend file stem
        #[arg(long, default_value = "")]
        suffix: String,

        /// Replacement extension of the friend files
        #[arg(long)]
        extension: Option<String>,

        /// Friend tree name
        #[arg(long)]
        tree: Option<String>,

        /// Leave entries without a friend file unchanged
        #[arg(long)]
        allow_missing: bool,

        /// Mirror the dataset directory structure below the shard directory
        #[arg(long)]
        keep_structure: bool,

        /// Store absolute friend paths
        #[arg(long)]
        absolute_paths: bool,
    },
}

/// What a run-style command writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunKind {
    EventsOnly,
    Hub,
    TrainingPool,
}

impl RunKind {
    fn name(self) -> &'static str {
        match self {
            RunKind::EventsOnly => "snapshot",
            RunKind::Hub => "snapshot-analysis",
            RunKind::TrainingPool => "training-pool",
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let (result, prefix) = match cli.command {
        Commands::Snapshot(run) => (cmd_run(RunKind::EventsOnly, &run), "Processing failed"),
        Commands::SnapshotAnalysis(run) => (cmd_run(RunKind::Hub, &run), "Processing failed"),
        Commands::TrainingPool(run) => (cmd_run(RunKind::TrainingPool, &run), "Processing failed"),
        Commands::HubAttachFriends { hub, scores, tree, label, friend_tree, output_dir, columns } => (
            cmd_attach_friends(hub, scores, tree, label, friend_tree, output_dir, columns.as_deref()),
            "hub-attach-friends",
        ),
        Commands::CnnFriendRegister {
            hub,
            single_file,
            shard_dir,
            suffix,
            extension,
            tree,
            allow_missing,
            keep_structure,
            absolute_paths,
        } => (
            cmd_friend_register(FriendLinkOptions {
                hub,
                friend_file: single_file,
                friend_directory: shard_dir,
                filename_suffix: suffix,
                filename_extension: extension,
                friend_tree: tree,
                allow_missing,
                mirror_structure: keep_structure,
                make_relative: !absolute_paths,
            }),
            "cnn-friend-register",
        ),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{prefix}: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_registry(config: &Path) -> Result<(BeamPeriodRegistry, PathBuf)> {
    let mut registry = BeamPeriodRegistry::new();
    load_catalogue(config, &mut registry).context("Failed to load run configuration")?;
    let Some(base) = registry.base_directory().filter(|p| !p.as_os_str().is_empty()) else {
        bail!("No ntuple directory configured in the JSON.");
    };
    let base = base.to_path_buf();
    Ok((registry, base))
}

fn has_hub_suffix(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "hub")
}

fn cmd_run(kind: RunKind, run: &RunArgs) -> Result<()> {
    let args = RunArguments::parse(&run.args)?;
    if kind == RunKind::TrainingPool && args.output.is_none() {
        bail!("An output file must be specified for the training pool.");
    }

    let (registry, base) = load_registry(&args.config)?;
    let beam = resolve_beam(&registry, &args.beam)?;
    let periods = resolve_periods(&registry, &beam, &args.periods)?;

    tracing::info!(command = kind.name(), "enabling implicit multithreading");
    rx_frame::enable_implicit_mt();

    let options = SnapshotOptions { write_catalog: kind != RunKind::EventsOnly, ..SnapshotOptions::default() };
    let builder = SnapshotPipelineBuilder::new(&registry, VariableRegistry::new(), &beam, &periods, base, run.blind)?
        .with_options(options);
    builder.log_sample_distributions();

    let Some(output) = args.output else {
        builder.print_all_branches();
        return Ok(());
    };

    let requested =
        if kind == RunKind::TrainingPool { columns::training_columns() } else { columns::analysis_columns() };
    let payload = columns::available_everywhere(builder.sample_frames(), &requested);
    if payload.is_empty() {
        bail!("None of the requested snapshot columns are available for the selected samples.");
    }

    let selection = match (&args.selection, kind) {
        (Some(s), _) => s.clone(),
        (None, RunKind::TrainingPool) => {
            let frames = builder.sample_frames().values();
            rx_pipeline::catalogue::numu_cc_selection(
                frames.flat_map(|s| std::iter::once(s.nominal()).chain(s.variations().values())),
            )?
        }
        (None, _) => String::new(),
    };

    if kind == RunKind::Hub && !has_hub_suffix(&output) {
        tracing::warn!(output = %output.display(), "hub outputs conventionally use the .hub suffix");
    }

    let summary = builder.snapshot(&selection, &output, &payload)?;
    tracing::info!(
        command = kind.name(),
        datasets = summary.datasets,
        partitions = summary.partitions,
        events = summary.events,
        "snapshot written"
    );
    match kind {
        RunKind::EventsOnly => println!("Snapshot saved to: {}", output.display()),
        RunKind::Hub => println!("Hub snapshot saved to: {}", output.display()),
        RunKind::TrainingPool => println!("Training pool generated at: {}", output.display()),
    }
    Ok(())
}

fn cmd_attach_friends(
    hub: PathBuf,
    scores: PathBuf,
    tree: String,
    label: String,
    friend_tree: Option<String>,
    output_dir: Option<PathBuf>,
    columns: Option<&str>,
) -> Result<()> {
    let columns = match columns {
        Some(list) => parse_column_overrides(list)?,
        None => Vec::new(),
    };
    let report = attach_scores(&ScoreAttachOptions { hub, scores, tree, label, friend_tree, output_dir, columns })?;
    tracing::info!(
        score_rows = report.score_rows,
        unique_events = report.unique_events,
        duplicates = report.duplicates,
        updated_entries = report.updated_entries,
        new_friends = report.new_friends,
        "friends attached"
    );
    println!("Attached columns [{}] to {} entries", report.columns.join(", "), report.updated_entries);
    Ok(())
}

fn cmd_friend_register(opts: FriendLinkOptions) -> Result<()> {
    let report = link_friends(&opts)?;
    println!(
        "Updated {} friend paths and {} friend trees ({} missing, {} unchanged)",
        report.updated_paths, report.updated_trees, report.missing, report.unchanged
    );
    Ok(())
}
