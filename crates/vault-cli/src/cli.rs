use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "vault",
    about = "Chunk Vault: content-addressed, version-controlled object store",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Repository root
    #[arg(long, global = true, default_value = ".")]
    pub repo: PathBuf,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a repository
    Init(InitArgs),
    /// Snapshot a directory as a new commit
    Commit(CommitArgs),
    /// Show branch history
    Log(LogArgs),
    /// List branches and their heads
    Branches(BranchesArgs),
    /// List a directory of the branch head
    Ls(LsArgs),
    /// Print a file from the branch head
    Cat(CatArgs),
    /// Serve the repository to remote peers
    Serve(ServeArgs),
    /// Send local commits to a remote branch
    Push(PushArgs),
    /// Fetch a remote branch and merge it locally
    Pull(PullArgs),
}

#[derive(Args)]
pub struct InitArgs {}

#[derive(Args)]
pub struct CommitArgs {
    /// Directory to snapshot
    pub source: PathBuf,
    #[arg(short, long)]
    pub message: String,
    #[arg(short, long, default_value = "main")]
    pub branch: String,
    /// File holding a hex-encoded Ed25519 secret key to sign with
    #[arg(long)]
    pub key_file: Option<PathBuf>,
}

#[derive(Args)]
pub struct BranchesArgs {}

#[derive(Args)]
pub struct LogArgs {
    #[arg(short, long, default_value = "main")]
    pub branch: String,
    #[arg(short = 'n', long, default_value = "20")]
    pub limit: usize,
}

#[derive(Args)]
pub struct LsArgs {
    /// Directory inside the snapshot; the root if omitted
    #[arg(default_value = "")]
    pub path: String,
    #[arg(short, long, default_value = "main")]
    pub branch: String,
    /// Read an older revision instead of the head
    #[arg(long)]
    pub rev: Option<u64>,
}

#[derive(Args)]
pub struct CatArgs {
    pub path: String,
    #[arg(short, long, default_value = "main")]
    pub branch: String,
    #[arg(long)]
    pub rev: Option<u64>,
}

#[derive(Args)]
pub struct ServeArgs {
    /// Overrides `server.bind_addr`
    #[arg(long)]
    pub bind: Option<String>,
    /// Reject pushes
    #[arg(long)]
    pub read_only: bool,
}

#[derive(Args)]
pub struct PushArgs {
    /// Remote address; `remote.addr` if omitted
    pub remote: Option<String>,
    #[arg(short, long, default_value = "main")]
    pub branch: String,
    /// Remote branch; same as the local one if omitted
    #[arg(long)]
    pub remote_branch: Option<String>,
}

#[derive(Args)]
pub struct PullArgs {
    pub remote: Option<String>,
    #[arg(short, long, default_value = "main")]
    pub branch: String,
    #[arg(long)]
    pub remote_branch: Option<String>,
    /// Take the remote side of conflicting files
    #[arg(long)]
    pub theirs: bool,
    #[arg(long)]
    pub key_file: Option<PathBuf>,
}
