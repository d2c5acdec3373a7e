use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use nas_bitpreservation::UpdateKind;

#[derive(Parser)]
#[command(
    name = "nas",
    about = "NetarchiveSuite -- bit preservation and job index caches",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Settings file; defaults apply when it does not exist.
    #[arg(short, long, global = true, default_value = "nas.toml")]
    pub config: PathBuf,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a missing-files or checksum update for one replica
    Update(UpdateArgs),
    /// Show counts and update dates per replica
    Status,
    /// List files missing from a replica
    Missing(ReplicaArgs),
    /// List files with a wrong checksum on a replica
    Changed(ReplicaArgs),
    /// Upload missing files to a replica from a good copy
    Upload(UploadArgs),
    /// Set the admin checksum of a file to the majority checksum
    FixAdmin(FixAdminArgs),
    /// Replace a corrupt copy on a replica with a good one
    Replace(ReplaceArgs),
    /// Run a batch job on a replica and save its output
    Batch(BatchArgs),
    /// Build or fetch the combined CDX index of some jobs
    CdxIndex(JobsArgs),
    /// Build or fetch the deduplication index of some jobs
    DedupIndex(JobsArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum KindArg {
    Missing,
    Checksum,
}

impl From<KindArg> for UpdateKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Missing => UpdateKind::MissingFiles,
            KindArg::Checksum => UpdateKind::ChecksumErrors,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum JobArg {
    Filelist,
    Checksum,
}

#[derive(Args)]
pub struct UpdateArgs {
    /// Replica id or name
    #[arg(short, long)]
    pub replica: String,
    #[arg(short, long, value_enum)]
    pub kind: KindArg,
}

#[derive(Args)]
pub struct ReplicaArgs {
    #[arg(short, long)]
    pub replica: String,
}

#[derive(Args)]
pub struct UploadArgs {
    #[arg(short, long)]
    pub replica: String,
    #[arg(required = true)]
    pub files: Vec<String>,
}

#[derive(Args)]
pub struct FixAdminArgs {
    pub filename: String,
}

#[derive(Args)]
pub struct ReplaceArgs {
    #[arg(short, long)]
    pub replica: String,
    #[arg(long)]
    pub credentials: String,
    /// Checksum of the corrupt copy, as found by the last checksum update
    #[arg(long)]
    pub checksum: String,
    pub filename: String,
}

#[derive(Args)]
pub struct BatchArgs {
    #[arg(short, long)]
    pub replica: String,
    #[arg(short, long, value_enum)]
    pub job: JobArg,
    #[arg(short, long)]
    pub out: PathBuf,
}

#[derive(Args)]
pub struct JobsArgs {
    /// Job ids, comma or space separated
    #[arg(required = true)]
    pub jobs: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_update() {
        let cli = Cli::try_parse_from(["nas", "update", "-r", "ONE", "--kind", "checksum"]).unwrap();
        if let Command::Update(args) = cli.command {
            assert_eq!(args.replica, "ONE");
            assert_eq!(UpdateKind::from(args.kind), UpdateKind::ChecksumErrors);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_update_rejects_unknown_kind() {
        assert!(Cli::try_parse_from(["nas", "update", "-r", "ONE", "--kind", "both"]).is_err());
    }

    #[test]
    fn parse_status_with_config() {
        let cli = Cli::try_parse_from(["nas", "--config", "/etc/nas.toml", "status"]).unwrap();
        assert!(matches!(cli.command, Command::Status));
        assert_eq!(cli.config, PathBuf::from("/etc/nas.toml"));
    }

    #[test]
    fn parse_default_config() {
        let cli = Cli::try_parse_from(["nas", "missing", "--replica", "TWO"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("nas.toml"));
    }

    #[test]
    fn parse_upload_needs_files() {
        assert!(Cli::try_parse_from(["nas", "upload", "-r", "ONE"]).is_err());
        let cli = Cli::try_parse_from(["nas", "upload", "-r", "ONE", "a.arc", "b.arc"]).unwrap();
        if let Command::Upload(args) = cli.command {
            assert_eq!(args.files, vec!["a.arc", "b.arc"]);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_replace() {
        let cli = Cli::try_parse_from([
            "nas", "replace", "-r", "TWO", "--credentials", "pw", "--checksum", "abc", "x.arc",
        ])
        .unwrap();
        if let Command::Replace(args) = cli.command {
            assert_eq!(args.credentials, "pw");
            assert_eq!(args.checksum, "abc");
            assert_eq!(args.filename, "x.arc");
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_batch() {
        let cli = Cli::try_parse_from(["nas", "batch", "-r", "ONE", "-j", "filelist", "-o", "out.txt"]).unwrap();
        if let Command::Batch(args) = cli.command {
            assert_eq!(args.job, JobArg::Filelist);
            assert_eq!(args.out, PathBuf::from("out.txt"));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_dedup_index() {
        let cli = Cli::try_parse_from(["nas", "-v", "dedup-index", "1,2", "3"]).unwrap();
        assert!(cli.verbose);
        if let Command::DedupIndex(args) = cli.command {
            assert_eq!(args.jobs, vec!["1,2", "3"]);
        } else { panic!("wrong command"); }
    }
}
