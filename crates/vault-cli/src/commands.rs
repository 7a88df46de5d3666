use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use colored::Colorize;
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use vault_crypto::{CommitSigner, SigningKey};
use vault_diff::{diff_trees, ChangeKind};
use vault_log::{LogEntry, MAX_MESSAGE_LEN};
use vault_merge::{ours_wins, theirs_wins, Resolver};
use vault_object::{empty_tree, CommitRecord, ContentPointer, EntryKind, TreeAccessor};
use vault_store::{ChunkStore, Transaction};
use vault_sync::directory::{BRANCHES_DIR, CHUNKS_DIR};
use vault_sync::{
    pull, push, BranchAccess, CancelFlag, FileBranchDirectory, Initiator, PullOptions, PullOutcome,
    PushStatus, ReadOnly, Responder,
};

use crate::cli::*;
use crate::config::{VaultConfig, CONFIG_FILE};
use crate::snapshot::snapshot_dir;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let Cli {
        command,
        repo,
        format,
        ..
    } = cli;
    match command {
        Command::Init(_) => cmd_init(&repo, format),
        Command::Commit(args) => cmd_commit(&open_repo(&repo)?, args, format).await,
        Command::Log(args) => cmd_log(&open_repo(&repo)?, args, format),
        Command::Branches(_) => cmd_branches(&open_repo(&repo)?, format),
        Command::Ls(args) => cmd_ls(&open_repo(&repo)?, args, format),
        Command::Cat(args) => cmd_cat(&open_repo(&repo)?, args),
        Command::Serve(args) => cmd_serve(open_repo(&repo)?, args).await,
        Command::Push(args) => cmd_push(&open_repo(&repo)?, args, format).await,
        Command::Pull(args) => cmd_pull(&open_repo(&repo)?, args, format).await,
    }
}

struct Repo {
    root: PathBuf,
    config: VaultConfig,
    directory: FileBranchDirectory,
}

fn open_repo(root: &Path) -> anyhow::Result<Repo> {
    if !root.join(BRANCHES_DIR).is_dir() {
        bail!("{} is not a vault repository (run `vault init`)", root.display());
    }
    let config = VaultConfig::load(root)?;
    let directory = FileBranchDirectory::open(root, config.store_config())?;
    Ok(Repo {
        root: root.to_path_buf(),
        config,
        directory,
    })
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_key(path: &Path) -> anyhow::Result<SigningKey> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let bytes: [u8; 32] = hex::decode(text.trim())
        .context("key file is not hex")?
        .try_into()
        .map_err(|_| anyhow::anyhow!("key file must hold 32 bytes"))?;
    Ok(SigningKey::from_bytes(bytes))
}

/// The commit at `rev`, or the head when `rev` is `None`.
fn resolve_entry(branch: &BranchAccess, rev: Option<u64>) -> anyhow::Result<LogEntry> {
    let entry = match rev {
        Some(rev) => branch.log.entry(rev)?,
        None => branch.log.head()?,
    };
    entry.with_context(|| match rev {
        Some(rev) => format!("branch {} has no revision {rev}", branch.name),
        None => format!("branch {} has no commits", branch.name),
    })
}

fn resolve_tree(branch: &BranchAccess, rev: Option<u64>) -> anyhow::Result<ContentPointer> {
    let entry = resolve_entry(branch, rev)?;
    Ok(CommitRecord::read(&*branch.store, &entry.entry_id)?.tree)
}

fn cmd_init(root: &Path, format: OutputFormat) -> anyhow::Result<()> {
    std::fs::create_dir_all(root).with_context(|| format!("creating {}", root.display()))?;
    let config = VaultConfig::load(root)?;
    FileBranchDirectory::open(root, config.store_config())?;
    let wrote_config = config.write_if_missing(root)?;
    info!(root = %root.display(), "initialized repository");
    match format {
        OutputFormat::Json => print_json(&json!({
            "root": root.display().to_string(),
            "config_created": wrote_config,
        })),
        OutputFormat::Text => {
            println!("{} Initialized vault repository in {}", "✓".green().bold(), root.display().to_string().bold());
            Ok(())
        }
    }
}

async fn cmd_commit(repo: &Repo, args: CommitArgs, format: OutputFormat) -> anyhow::Result<()> {
    if args.message.len() > MAX_MESSAGE_LEN {
        bail!(
            "commit message is {} bytes; the limit is {MAX_MESSAGE_LEN}",
            args.message.len()
        );
    }
    let branch = repo.directory.branch(&args.branch)?;
    let chunk_config = repo.config.chunk_config()?;
    let signer = args.key_file.as_deref().map(load_key).transpose()?;
    let root = repo.root.canonicalize()?;
    let skip = vec![root.join(CHUNKS_DIR), root.join(BRANCHES_DIR), root.join(CONFIG_FILE)];

    let _guard = branch.commit_lock.lock().await;
    let head = branch.log.head()?;
    let store: &dyn ChunkStore = &*branch.store;
    let mut tx = Transaction::begin(store);
    let snapshot = snapshot_dir(&mut tx, &args.source, &skip, &chunk_config)?;

    let (parents, parent_tree) = match &head {
        Some(entry) => (
            vec![CommitRecord::pointer(&tx, &entry.entry_id)?],
            CommitRecord::read(&tx, &entry.entry_id)?.tree,
        ),
        None => (Vec::new(), empty_tree()),
    };
    if head.is_some() && parent_tree.id == snapshot.root.id {
        tx.rollback();
        match format {
            OutputFormat::Json => print_json(&json!({ "committed": false }))?,
            OutputFormat::Text => println!("Nothing to commit; {} is unchanged.", args.branch.yellow()),
        }
        return Ok(());
    }

    let mut changes = Vec::new();
    for change in diff_trees(&tx, &parent_tree, &snapshot.root) {
        let change = change?;
        if !change.is_dir_on_both_sides() {
            changes.push(change);
        }
    }

    let mut record = CommitRecord::new(snapshot.root, parents, args.message.as_str());
    if let Some(key) = &signer {
        record.sign(key as &dyn CommitSigner)?;
    }
    let commit = record.write(&mut tx)?;
    let written = tx.commit()?;
    let expected = head.map_or(0, |e| e.revision);
    let entry = branch
        .log
        .compare_and_append(expected, commit.id, args.message.clone().into_bytes())?;
    info!(branch = %args.branch, revision = entry.revision, commit = %commit.id, written, "committed");

    match format {
        OutputFormat::Json => print_json(&json!({
            "committed": true,
            "branch": args.branch,
            "revision": entry.revision,
            "commit": commit.id.to_hex(),
            "files": snapshot.files,
            "bytes": snapshot.bytes,
            "new_chunks": written,
            "changes": changes
                .iter()
                .map(|c| json!({ "kind": c.kind.to_string(), "path": c.path }))
                .collect::<Vec<_>>(),
        })),
        OutputFormat::Text => {
            println!(
                "{} [{} r{}] {} {}",
                "✓".green().bold(),
                args.branch.yellow(),
                entry.revision,
                commit.id.short_hex().dimmed(),
                args.message
            );
            for change in &changes {
                let kind = match change.kind {
                    ChangeKind::Added => change.kind.to_string().green(),
                    ChangeKind::Modified => change.kind.to_string().yellow(),
                    ChangeKind::Removed => change.kind.to_string().red(),
                };
                println!("  {kind} {}", change.path);
            }
            println!(
                "  {} files, {} bytes, {} new chunks",
                snapshot.files, snapshot.bytes, written
            );
            Ok(())
        }
    }
}

fn cmd_log(repo: &Repo, args: LogArgs, format: OutputFormat) -> anyhow::Result<()> {
    let branch = repo.directory.branch(&args.branch)?;
    let entries: Vec<LogEntry> = branch.log.entries()?.into_iter().rev().take(args.limit).collect();

    let mut rows = Vec::with_capacity(entries.len());
    for entry in &entries {
        let record = CommitRecord::read(&*branch.store, &entry.entry_id)?;
        rows.push((entry, record));
    }

    match format {
        OutputFormat::Json => print_json(&json!(rows
            .iter()
            .map(|(entry, record)| json!({
                "revision": entry.revision,
                "commit": entry.entry_id.to_hex(),
                "message": entry.message_lossy(),
                "parents": record.parent_ids().iter().map(|p| p.to_hex()).collect::<Vec<_>>(),
                "signed": record.signature.is_some(),
            }))
            .collect::<Vec<_>>())),
        OutputFormat::Text => {
            if rows.is_empty() {
                println!("Branch {} has no commits.", args.branch.yellow());
            }
            for (entry, record) in &rows {
                let mut tags = Vec::new();
                if record.is_merge() {
                    tags.push("merge".magenta().to_string());
                }
                if record.signature.is_some() {
                    tags.push("signed".green().to_string());
                }
                let tags = if tags.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", tags.join(", "))
                };
                println!(
                    "{} {}{} {}",
                    format!("r{}", entry.revision).yellow().bold(),
                    entry.entry_id.short_hex().dimmed(),
                    tags,
                    entry.message_lossy()
                );
            }
            Ok(())
        }
    }
}

fn cmd_branches(repo: &Repo, format: OutputFormat) -> anyhow::Result<()> {
    let mut rows = Vec::new();
    for name in repo.directory.branch_names()? {
        let head = repo.directory.branch(&name)?.log.head()?;
        rows.push((name, head));
    }
    match format {
        OutputFormat::Json => print_json(&json!(rows
            .iter()
            .map(|(name, head)| json!({
                "name": name,
                "revision": head.as_ref().map_or(0, |h| h.revision),
                "head": head.as_ref().map(|h| h.entry_id.to_hex()),
            }))
            .collect::<Vec<_>>())),
        OutputFormat::Text => {
            for (name, head) in &rows {
                match head {
                    Some(head) => println!(
                        "{:<24} r{:<6} {}",
                        name.yellow(),
                        head.revision,
                        head.entry_id.short_hex().dimmed()
                    ),
                    None => println!("{:<24} {}", name.yellow(), "(empty)".dimmed()),
                }
            }
            Ok(())
        }
    }
}

fn cmd_ls(repo: &Repo, args: LsArgs, format: OutputFormat) -> anyhow::Result<()> {
    let branch = repo.directory.branch(&args.branch)?;
    let root = resolve_tree(&branch, args.rev)?;
    let store = &*branch.store;
    let tree = TreeAccessor::open(store, &root)?;
    let entries = tree.list(store, &args.path)?;

    match format {
        OutputFormat::Json => print_json(&json!(entries
            .iter()
            .map(|(name, entry)| json!({
                "name": name,
                "kind": match entry.kind {
                    EntryKind::File => "file",
                    EntryKind::Directory => "directory",
                },
                "size": entry.pointer.size,
                "id": entry.id().to_hex(),
            }))
            .collect::<Vec<_>>())),
        OutputFormat::Text => {
            for (name, entry) in &entries {
                match entry.kind {
                    EntryKind::Directory => println!("{:>12}  {}", "-", format!("{name}/").blue().bold()),
                    EntryKind::File => println!("{:>12}  {name}", entry.pointer.size),
                }
            }
            Ok(())
        }
    }
}

fn cmd_cat(repo: &Repo, args: CatArgs) -> anyhow::Result<()> {
    use std::io::Write;

    let branch = repo.directory.branch(&args.branch)?;
    let root = resolve_tree(&branch, args.rev)?;
    let store = &*branch.store;
    let data = TreeAccessor::open(store, &root)?.read_file(store, &args.path)?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&data)?;
    stdout.flush()?;
    Ok(())
}

async fn cmd_serve(repo: Repo, args: ServeArgs) -> anyhow::Result<()> {
    let addr = match args.bind {
        Some(bind) => bind.parse().with_context(|| format!("invalid bind address {bind:?}"))?,
        None => repo.config.server.bind_addr,
    };
    let mut directory = repo.directory;
    if args.read_only {
        directory = directory.with_policy(Arc::new(ReadOnly));
    }
    let responder = Responder::new(Arc::new(directory));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    let limit = Arc::new(Semaphore::new(repo.config.server.max_connections));
    info!(%addr, read_only = args.read_only, "serving");
    println!(
        "{} Serving {} on {}",
        "✓".green().bold(),
        repo.root.display(),
        addr.to_string().bold()
    );

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                let permit = limit.clone().acquire_owned().await?;
                let responder = responder.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    let (mut reader, mut writer) = stream.into_split();
                    match responder.serve(&mut reader, &mut writer).await {
                        Ok(requests) => debug!(%peer, requests, "connection closed"),
                        Err(e) => warn!(%peer, error = %e, "connection failed"),
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }
    Ok(())
}

type TcpInitiator = Initiator<tokio::net::tcp::OwnedReadHalf, tokio::net::tcp::OwnedWriteHalf>;

async fn connect(repo: &Repo, remote: Option<String>) -> anyhow::Result<(String, TcpInitiator)> {
    let addr = remote
        .or_else(|| repo.config.remote.addr.clone())
        .context("no remote address: pass one or set remote.addr in vault.toml")?;
    let stream = tokio::time::timeout(repo.config.remote_timeout(), TcpStream::connect(&addr))
        .await
        .with_context(|| format!("connecting to {addr} timed out"))?
        .with_context(|| format!("connecting to {addr}"))?;
    let (reader, writer) = stream.into_split();
    Ok((addr, Initiator::new(reader, writer)))
}

/// A cancel flag that trips on Ctrl-C until the returned guard is dropped.
fn cancel_on_ctrl_c() -> (CancelFlag, tokio::task::JoinHandle<()>) {
    let cancel = CancelFlag::new();
    let flag = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            flag.cancel();
        }
    });
    (cancel, watcher)
}

async fn cmd_push(repo: &Repo, args: PushArgs, format: OutputFormat) -> anyhow::Result<()> {
    let branch = repo.directory.branch(&args.branch)?;
    let remote_branch = args.remote_branch.unwrap_or_else(|| args.branch.clone());
    let (addr, mut initiator) = connect(repo, args.remote).await?;
    let (cancel, watcher) = cancel_on_ctrl_c();
    let result = tokio::time::timeout(
        repo.config.remote_timeout(),
        push(&mut initiator, &branch, &remote_branch, &cancel),
    )
    .await;
    watcher.abort();
    let report = result.context("push timed out")??;

    match format {
        OutputFormat::Json => print_json(&json!({
            "status": report.status.to_string(),
            "revision": report.revision,
            "tip": report.tip.to_hex(),
            "chunks_sent": report.chunks_sent,
            "chunks_skipped": report.chunks_skipped,
            "bytes_sent": report.bytes_sent,
        }))?,
        OutputFormat::Text => match report.status {
            PushStatus::Ok => println!(
                "{} {} -> {}/{} r{} ({} chunks, {} bytes, {} already there)",
                "✓".green().bold(),
                args.branch.yellow(),
                addr,
                remote_branch.yellow(),
                report.revision,
                report.chunks_sent,
                report.bytes_sent,
                report.chunks_skipped
            ),
            PushStatus::UpToDate => println!("{}/{} is {}", addr, remote_branch.yellow(), "up to date".green()),
            PushStatus::PullRequired => {}
        },
    }
    if report.status == PushStatus::PullRequired {
        bail!("{addr}/{remote_branch} has commits that {} lacks; pull first", args.branch);
    }
    Ok(())
}

async fn cmd_pull(repo: &Repo, args: PullArgs, format: OutputFormat) -> anyhow::Result<()> {
    let branch = repo.directory.branch(&args.branch)?;
    let remote_branch = args.remote_branch.unwrap_or_else(|| args.branch.clone());
    let key = args.key_file.as_deref().map(load_key).transpose()?;
    let (addr, mut initiator) = connect(repo, args.remote).await?;

    let resolver: Resolver<'_> = if args.theirs { &theirs_wins } else { &ours_wins };
    let options = PullOptions {
        resolver,
        signer: key.as_ref().map(|k| k as &dyn CommitSigner),
        message: format!("pull {addr} {remote_branch}"),
    };
    let (cancel, watcher) = cancel_on_ctrl_c();
    let result = tokio::time::timeout(
        repo.config.remote_timeout(),
        pull(&mut initiator, &branch, &remote_branch, &options, &cancel),
    )
    .await;
    watcher.abort();
    let report = result.context("pull timed out")??;

    let (outcome, commit) = match report.outcome {
        PullOutcome::UpToDate => ("up-to-date", None),
        PullOutcome::LocalAhead => ("local-ahead", None),
        PullOutcome::FastForward(id) => ("fast-forward", Some(id)),
        PullOutcome::Merged(id) => ("merged", Some(id)),
    };
    match format {
        OutputFormat::Json => print_json(&json!({
            "outcome": outcome,
            "commit": commit.map(|id| id.to_hex()),
            "chunks_fetched": report.chunks_fetched,
            "bytes_fetched": report.bytes_fetched,
        })),
        OutputFormat::Text => {
            match commit {
                Some(id) => println!(
                    "{} {} {} ({} chunks, {} bytes)",
                    "✓".green().bold(),
                    outcome,
                    id.short_hex().dimmed(),
                    report.chunks_fetched,
                    report.bytes_fetched
                ),
                None => println!("{} is {}", args.branch.yellow(), outcome.green()),
            }
            Ok(())
        }
    }
}
