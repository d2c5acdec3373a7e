use std::collections::BTreeSet;
use std::fs;
use std::sync::Arc;

use anyhow::{bail, Context};
use colored::Colorize;
use nas_archive::{ArchiveClient, BatchExecuter, BatchJob, ChecksumJob, ExecuterTicket, FileListJob, LocalArchive};
use nas_bitpreservation::{
    ActiveBitPreservation, BitPreservationUpdater, CategoryState, FileBasedActiveBitPreservation, RepairReport,
    UpdateKind,
};
use nas_index::IndexCaches;
use nas_types::{parse_job_list, JobId, ReplicaId};
use tracing::{info, warn};

use crate::cli::*;
use crate::settings::Settings;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let settings = Settings::load(&cli.config)?;
    dispatch(cli.command, &settings)
}

pub(crate) fn dispatch(command: Command, settings: &Settings) -> anyhow::Result<()> {
    match command {
        Command::Update(args) => cmd_update(settings, args),
        Command::Status => cmd_status(settings),
        Command::Missing(args) => cmd_missing(settings, args),
        Command::Changed(args) => cmd_changed(settings, args),
        Command::Upload(args) => cmd_upload(settings, args),
        Command::FixAdmin(args) => cmd_fix_admin(settings, args),
        Command::Replace(args) => cmd_replace(settings, args),
        Command::Batch(args) => cmd_batch(settings, args),
        Command::CdxIndex(args) => cmd_cdx_index(settings, args),
        Command::DedupIndex(args) => cmd_dedup_index(settings, args),
    }
}

fn archive(settings: &Settings) -> anyhow::Result<Arc<dyn ArchiveClient>> {
    let archive = LocalArchive::from_config(&settings.archive).context("opening archive")?;
    Ok(Arc::new(archive))
}

fn engine(settings: &Settings) -> anyhow::Result<Arc<FileBasedActiveBitPreservation>> {
    Ok(Arc::new(FileBasedActiveBitPreservation::new(
        archive(settings)?,
        &settings.preservation,
    )))
}

fn resolve(engine: &dyn ActiveBitPreservation, replica: &str) -> anyhow::Result<ReplicaId> {
    Ok(engine.replicas().resolve(replica)?.id.clone())
}

fn cmd_update(settings: &Settings, args: UpdateArgs) -> anyhow::Result<()> {
    let engine = engine(settings)?;
    let replica = resolve(engine.as_ref(), &args.replica)?;
    let kind = UpdateKind::from(args.kind);
    BitPreservationUpdater::new(engine).run(&replica, kind)?;
    println!("{} {} update of {} finished", "✓".green().bold(), kind, replica.to_string().yellow());
    Ok(())
}

fn cmd_status(settings: &Settings) -> anyhow::Result<()> {
    let engine = engine(settings)?;
    let updater = BitPreservationUpdater::new(engine.clone());
    let count = |n: Option<u64>| n.map_or_else(|| "-".dimmed().to_string(), |n| n.to_string());
    for replica in engine.replicas().iter() {
        let id = &replica.id;
        println!("{} ({}, {})", id.to_string().yellow().bold(), replica.name, replica.kind);
        println!(
            "  files: {}  missing: {}  changed: {}",
            count(engine.get_number_of_files(id)?),
            count(engine.get_number_of_missing_files(id)?),
            count(engine.get_number_of_changed_files(id)?),
        );
        for (kind, date) in [
            (UpdateKind::MissingFiles, engine.get_date_for_missing_files(id)?),
            (UpdateKind::ChecksumErrors, engine.get_date_for_changed_files(id)?),
        ] {
            let state = match updater.state(id, kind, None)? {
                CategoryState::Stale => "never updated".red(),
                CategoryState::Updating => "updating".cyan(),
                CategoryState::Ready => "ready".green(),
            };
            let when = date.map_or_else(|| "-".to_string(), |d| d.to_rfc3339());
            println!("  {:<9} {state}  {when}", kind.to_string());
        }
    }
    Ok(())
}

fn cmd_missing(settings: &Settings, args: ReplicaArgs) -> anyhow::Result<()> {
    let engine = engine(settings)?;
    let replica = resolve(engine.as_ref(), &args.replica)?;
    print_files(engine.get_missing_files(&replica)?);
    Ok(())
}

fn cmd_changed(settings: &Settings, args: ReplicaArgs) -> anyhow::Result<()> {
    let engine = engine(settings)?;
    let replica = resolve(engine.as_ref(), &args.replica)?;
    print_files(engine.get_changed_files(&replica)?);
    Ok(())
}

fn print_files(files: Vec<String>) {
    if files.is_empty() {
        println!("{}", "No files.".dimmed());
    }
    for file in files {
        println!("{file}");
    }
}

fn cmd_upload(settings: &Settings, args: UploadArgs) -> anyhow::Result<()> {
    let engine = engine(settings)?;
    let replica = resolve(engine.as_ref(), &args.replica)?;
    let report = engine.upload_missing_files(&replica, &args.files)?;
    finish_repair(&report)
}

fn cmd_fix_admin(settings: &Settings, args: FixAdminArgs) -> anyhow::Result<()> {
    let engine = engine(settings)?;
    engine.change_state_for_admin_data(&args.filename)?;
    println!("{} Admin checksum of {} set to the majority checksum", "✓".green().bold(), args.filename.bold());
    Ok(())
}

fn cmd_replace(settings: &Settings, args: ReplaceArgs) -> anyhow::Result<()> {
    let engine = engine(settings)?;
    let replica = resolve(engine.as_ref(), &args.replica)?;
    let report = engine.replace_changed_file(&replica, &args.filename, &args.credentials, &args.checksum)?;
    finish_repair(&report)
}

fn finish_repair(report: &RepairReport) -> anyhow::Result<()> {
    for file in report.repaired_files() {
        println!("{} {}", "✓".green(), file);
    }
    for (file, message) in report.failures() {
        println!("{} {}: {}", "✗".red(), file, message);
    }
    if !report.is_success() {
        bail!("{} on {} left {} file(s) unrepaired", report.op, report.replica, report.failures().count());
    }
    Ok(())
}

fn cmd_batch(settings: &Settings, args: BatchArgs) -> anyhow::Result<()> {
    let client = archive(settings)?;
    let replica = client.replicas().resolve(&args.replica)?.id.clone();
    let job: Arc<dyn BatchJob> = match args.job {
        JobArg::Filelist => Arc::new(FileListJob::new()),
        JobArg::Checksum => Arc::new(ChecksumJob::new()),
    };
    let executer = BatchExecuter::new(client, settings.archive.spool_dir.join("batch"));
    let report = match executer.spawn(job, replica)? {
        ExecuterTicket::Started { outcome, .. } => {
            outcome.recv().context("batch thread ended without a report")??
        }
        ExecuterTicket::AlreadyRunning { run_id } => bail!("batch job is already running as {run_id}"),
    };

    match &report.result_path {
        Some(path) => {
            fs::copy(path, &args.out)
                .with_context(|| format!("copying results to {}", args.out.display()))?;
        }
        None => {
            fs::File::create(&args.out)?;
        }
    }
    info!(job = %report.job, run = %report.run_id, processed = report.processed, failed = report.failed, "batch finished");
    println!(
        "{} {} on {}: {} processed, {} failed -> {}",
        "✓".green().bold(),
        report.job,
        report.replica.to_string().yellow(),
        report.processed,
        report.failed,
        args.out.display(),
    );
    if report.failed > 0 {
        warn!(errors = %report.error_path.display(), "some files failed");
        println!("  failures: {}", report.error_path.display().to_string().red());
    }
    Ok(())
}

fn parse_jobs(args: &JobsArgs) -> anyhow::Result<BTreeSet<JobId>> {
    let jobs: BTreeSet<JobId> = parse_job_list(&args.jobs.join(","))?.into_iter().collect();
    if jobs.is_empty() {
        bail!("no job ids given");
    }
    Ok(jobs)
}

fn index_caches(settings: &Settings) -> anyhow::Result<IndexCaches> {
    Ok(IndexCaches::new(archive(settings)?, &settings.index, &settings.archive.metadata_suffix)?)
}

fn cmd_cdx_index(settings: &Settings, args: JobsArgs) -> anyhow::Result<()> {
    let jobs = parse_jobs(&args)?;
    let index = index_caches(settings)?.cdx_index(&jobs)?;
    report_index("CDX index", &jobs, &index.ids, &index.file);
    Ok(())
}

fn cmd_dedup_index(settings: &Settings, args: JobsArgs) -> anyhow::Result<()> {
    let jobs = parse_jobs(&args)?;
    let index = index_caches(settings)?.dedup_index(&jobs)?;
    report_index("Deduplication index", &jobs, &index.ids, &index.file);
    Ok(())
}

fn report_index(what: &str, requested: &BTreeSet<JobId>, got: &BTreeSet<JobId>, file: &std::path::Path) {
    println!("{} {} at {}", "✓".green().bold(), what, file.display().to_string().bold());
    println!("  jobs: {}", join_ids(got.iter()));
    let left_out: Vec<&JobId> = requested.difference(got).collect();
    if !left_out.is_empty() {
        println!("  {} {}", "left out:".yellow(), join_ids(left_out.into_iter()));
    }
}

fn join_ids<'a>(ids: impl Iterator<Item = &'a JobId>) -> String {
    ids.map(JobId::to_string).collect::<Vec<_>>().join(",")
}
