//! kumo: one namespace over local disk and object storage.
//!
//! Usage:
//!   kumo ls /s3/minio/photos/*.jpg
//!   kumo cp -r /local/data /s3/minio/backup/
//!   kumo grep -c error /s3/minio/logs/2024 --parallel --tasks 8
//!   kumo fetch https://example.com/a.json,kubernetes:///api/v1/pods --kind json
//!   kumo url --kind Deployment --api-version apps/v1 -l app=web
//!
//!   # Run as the proxy for a sandboxed peer (JSON lines on stdio)
//!   kumo serve

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use kumo_kernel::fetch::{FetchStream, split_locators};
use kumo_kernel::kube::{KindDescriptor, QueryOptions, UrlFormatter};
use kumo_kernel::vfs::{
    CompressOptions, CopyOptions, GrepOptions, LsOptions, ParallelOptions,
};
use kumo_kernel::{
    ConfigError, ErrorKind, FetchError, FetchKind, FetchOptions, Kernel, KumoConfig, Mode,
    RemoteError, StreamEvent, VfsError, serve_lines,
};
use kumo_types::{FetchedFile, GrepResult};
use tokio::io::{AsyncWriteExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(name = "kumo")]
#[command(about = "Virtual filesystem over local disk and object storage")]
struct Cli {
    /// Config file (default: ~/.config/kumo/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Forward storage and network access to the proxy command
    #[arg(long, global = true)]
    sandboxed: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List files, objects, buckets or mount points
    Ls {
        /// Describe directories themselves instead of their contents
        #[arg(short = 'd', long)]
        directory: bool,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
        #[arg(default_value = "/")]
        paths: Vec<String>,
    },
    /// Copy SOURCES... DEST
    Cp {
        #[arg(short, long)]
        recursive: bool,
        /// Make uploaded objects publicly readable
        #[arg(long)]
        public_read: bool,
        #[arg(required = true, num_args = 2..)]
        paths: Vec<String>,
    },
    /// Remove files, objects, prefixes or buckets
    Rm {
        #[arg(short, long)]
        recursive: bool,
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Describe one path
    Stat {
        path: String,
        /// Print the contents too
        #[arg(long)]
        data: bool,
    },
    Mkdir {
        #[arg(required = true)]
        paths: Vec<String>,
    },
    Rmdir {
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Search file contents
    Grep {
        /// Print only a match count
        #[arg(short = 'c', long)]
        count: bool,
        /// Print only the names of matching files
        #[arg(short = 'l', long)]
        files_with_matches: bool,
        #[arg(short = 'i', long)]
        ignore_case: bool,
        pattern: String,
        #[arg(required = true)]
        paths: Vec<String>,
        #[command(flatten)]
        parallel: ParallelArgs,
    },
    Gzip {
        #[arg(required = true)]
        paths: Vec<String>,
        #[command(flatten)]
        parallel: ParallelArgs,
    },
    Gunzip {
        #[arg(required = true)]
        paths: Vec<String>,
        #[command(flatten)]
        parallel: ParallelArgs,
    },
    /// Fetch URLs or local files; a comma-separated list fetches a batch
    Fetch {
        locators: String,
        #[arg(long, default_value = "text")]
        kind: FetchKind,
        /// In a batch, report failures per slot instead of failing
        #[arg(long)]
        tolerant: bool,
        /// Write the body to stdout as it arrives
        #[arg(long, conflicts_with = "tolerant")]
        stream: bool,
    },
    /// Print a cluster resource URL
    Url(UrlArgs),
    /// Serve a sandboxed peer over stdin/stdout
    Serve,
}

/// Offload options shared by grep, gzip and gunzip.
#[derive(Args, Debug, Default)]
struct ParallelArgs {
    /// Run as a data-parallel job
    #[arg(long)]
    parallel: bool,
    #[arg(long, requires = "parallel")]
    tasks: Option<usize>,
    #[arg(long, requires = "parallel")]
    memory: Option<String>,
    #[arg(long, requires = "parallel")]
    cpu: Option<String>,
    #[arg(long, requires = "parallel")]
    image: Option<String>,
    /// Collect worker logs
    #[arg(long, requires = "parallel")]
    with_logs: bool,
}

impl ParallelArgs {
    fn options(&self) -> Option<ParallelOptions> {
        self.parallel.then(|| ParallelOptions {
            tasks: self.tasks,
            memory: self.memory.clone(),
            cpu: self.cpu.clone(),
            image: self.image.clone(),
            with_logs: self.with_logs,
        })
    }
}

#[derive(Args, Debug)]
struct UrlArgs {
    #[arg(long)]
    kind: String,
    #[arg(long, default_value = "v1")]
    api_version: String,
    #[arg(short, long, default_value = "default")]
    namespace: String,
    #[arg(long)]
    cluster_scoped: bool,
    #[arg(short = 'l', long = "selector")]
    label_selectors: Vec<String>,
    #[arg(long = "field-selector")]
    field_selectors: Vec<String>,
    #[arg(long)]
    limit: Option<u32>,
    #[arg(short = 'A', long)]
    all_namespaces: bool,
    /// Single resource name
    #[arg(long)]
    name: Option<String>,
    /// Stop at the namespace segment
    #[arg(long)]
    no_kind: bool,
    #[arg(long)]
    no_queries: bool,
}

impl UrlArgs {
    fn render(&self) -> String {
        let mut kind = KindDescriptor::new(&self.kind, &self.api_version);
        if self.cluster_scoped {
            kind = kind.cluster_scoped();
        }
        let query = QueryOptions {
            label_selectors: self.label_selectors.clone(),
            field_selectors: self.field_selectors.clone(),
            limit: self.limit,
            all_namespaces: self.all_namespaces,
        };
        UrlFormatter::new(&self.namespace, kind, query).format(
            !self.no_kind,
            !self.no_queries,
            self.name.as_deref(),
        )
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // stdout belongs to command output (and to the protocol under `serve`)
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("kumo: {e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}

/// Map the root cause onto the error taxonomy's exit codes.
fn exit_code(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if let Some(e) = cause.downcast_ref::<VfsError>() {
            return e.exit_code();
        }
        if let Some(e) = cause.downcast_ref::<FetchError>() {
            return e.kind().exit_code();
        }
        if let Some(e) = cause.downcast_ref::<RemoteError>() {
            return e.kind.exit_code();
        }
        if cause.downcast_ref::<ConfigError>().is_some() {
            return ErrorKind::Validation.exit_code();
        }
    }
    1
}

fn load_config(path: Option<&Path>, sandboxed: bool) -> Result<KumoConfig> {
    let mut config = match path {
        Some(path) => KumoConfig::load(path)?,
        None => KumoConfig::load_default()?,
    };
    if sandboxed {
        config.mode = Mode::Sandboxed;
    }
    Ok(config)
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let command = match cli.command {
        Command::Url(args) => {
            println!("{}", args.render());
            return Ok(ExitCode::SUCCESS);
        }
        other => other,
    };

    let mut config = load_config(cli.config.as_deref(), cli.sandboxed)?;
    if matches!(command, Command::Serve) {
        // The proxy itself always runs natively.
        config.mode = Mode::Native;
    }
    let kernel = Kernel::start(&config).await.context("failed to start kernel")?;
    execute(&kernel, command).await
}

async fn execute(kernel: &Kernel, command: Command) -> Result<ExitCode> {
    let vfs = kernel.vfs();
    match command {
        Command::Ls {
            directory,
            json,
            paths,
        } => {
            let entries = vfs.ls(&LsOptions { directory }, &paths).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for e in &entries {
                    let name = if e.display_name.is_empty() { &e.path } else { &e.display_name };
                    println!("{} {:>12} {}", e.dirent.permissions, e.stats.size, name);
                }
            }
        }
        Command::Cp {
            recursive,
            public_read,
            mut paths,
        } => {
            let dst = paths.pop().context("missing destination")?;
            let opts = CopyOptions {
                public_read,
                recursive,
            };
            let outcome = vfs.cp(&opts, &paths, &dst).await?;
            for path in outcome.copied {
                println!("{path}");
            }
        }
        Command::Rm { recursive, paths } => {
            for path in &paths {
                if !vfs.rm(path, recursive).await? {
                    eprintln!("kumo: nothing removed at {path}");
                }
            }
        }
        Command::Stat { path, data } => {
            let stat = vfs
                .fstat(&path, data, false)
                .await?
                .ok_or_else(|| VfsError::not_found(&path))?;
            println!("{}", serde_json::to_string_pretty(&stat)?);
        }
        Command::Mkdir { paths } => {
            for path in &paths {
                vfs.mkdir(path).await?;
            }
        }
        Command::Rmdir { paths } => {
            for path in &paths {
                vfs.rmdir(path).await?;
            }
        }
        Command::Grep {
            count,
            files_with_matches,
            ignore_case,
            pattern,
            paths,
            parallel,
        } => {
            let opts = GrepOptions {
                count_only: count,
                files_only: files_with_matches,
                ignore_case,
                parallel: parallel.options(),
            };
            match vfs.grep(&opts, &pattern, &paths).await {
                Ok(result) => print_grep(&result),
                // grep convention: no matches is exit 1, not an error message
                Err(e) if e.is_no_matches() => return Ok(ExitCode::from(1)),
                Err(e) => return Err(e.into()),
            }
        }
        Command::Gzip { paths, parallel } => {
            let opts = CompressOptions {
                parallel: parallel.options(),
            };
            print_compress(vfs.gzip(&opts, &paths).await?);
        }
        Command::Gunzip { paths, parallel } => {
            let opts = CompressOptions {
                parallel: parallel.options(),
            };
            print_compress(vfs.gunzip(&opts, &paths).await?);
        }
        Command::Fetch {
            locators,
            kind,
            tolerant,
            stream,
        } => {
            let fetch = kernel.fetch();
            if stream {
                let stream = fetch.open_stream(&locators, &FetchOptions::default()).await?;
                copy_stream(stream).await?;
            } else if split_locators(&locators).len() > 1 {
                let files = fetch.fetch_batch(&locators, kind, tolerant).await?;
                println!("{}", serde_json::to_string_pretty(&files)?);
            } else {
                print_fetched(fetch.fetch_file(locators.trim(), kind).await?)?;
            }
        }
        Command::Serve => {
            let dispatcher = kernel.dispatcher();
            tracing::info!("serving on stdio");
            serve_lines(BufReader::new(tokio::io::stdin()), tokio::io::stdout(), &dispatcher).await?;
            tracing::info!("peer closed the channel");
        }
        Command::Url(args) => println!("{}", args.render()),
    }
    Ok(ExitCode::SUCCESS)
}

fn print_grep(result: &GrepResult) {
    match result {
        GrepResult::Count(n) => println!("{n}"),
        GrepResult::Files(files) => {
            for f in files {
                println!("{f}");
            }
        }
        GrepResult::Matches(matches) => {
            for m in matches {
                for line in &m.lines {
                    println!("{}:{line}", m.path);
                }
            }
        }
    }
}

fn print_compress(result: kumo_types::CompressResult) {
    if let Some(job) = result.job_id {
        eprintln!("kumo: job {job}");
    }
    for path in result.outputs {
        println!("{path}");
    }
}

fn print_fetched(file: FetchedFile) -> Result<()> {
    match file {
        FetchedFile::Text(text) => print!("{text}"),
        FetchedFile::Binary(data) => std::io::stdout().write_all(&data)?,
        FetchedFile::Json(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        FetchedFile::Error { message, code } => {
            anyhow::bail!("{message} (status {})", code.map_or("n/a".to_string(), |c| c.to_string()))
        }
    }
    Ok(())
}

async fn copy_stream(mut stream: FetchStream) -> Result<()> {
    let mut out = tokio::io::stdout();
    while let Some(event) = stream.next_event().await {
        match event {
            StreamEvent::Data(chunk) => out.write_all(&chunk).await?,
            StreamEvent::End => break,
            StreamEvent::Error(e) => return Err(e.into()),
            StreamEvent::Aborted => anyhow::bail!("stream aborted"),
        }
    }
    out.flush().await?;
    Ok(())
}
