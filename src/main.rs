// src/main.rs

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use mark_devkit::autogen::AutogenBot;
use mark_devkit::autogen::generators::GeneratorContext;
use mark_devkit::fetcher::{Downloader, FetchOptions, Fetcher, new_fetcher};
use mark_devkit::http::HttpClient;
use mark_devkit::notify::new_notifier;
use mark_devkit::specs::{AutogenSpec, DistfilesSpec, MergeKit};
use mark_devkit::vcs::{GitCli, GithubProvider};
use mark_devkit::{DevkitConfig, MergeBot, MergeOptions};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "mark-devkit")]
#[command(author, version, about = "Kit merge, autogen and distfile mirroring for Gentoo-style kits", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by the commands that write to the target kit
#[derive(Args)]
struct KitFlags {
    /// Push the target branch, or the PR branches with --pr
    #[arg(long)]
    push: bool,

    /// One branch and pull request per change
    #[arg(long)]
    pr: bool,

    /// Log decisions without committing
    #[arg(long)]
    dry_run: bool,

    /// Restrict the run to these packages (name or category/name)
    #[arg(short, long = "atom")]
    atoms: Vec<String>,

    /// Override the configured work directory
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Keep the work directory after the run
    #[arg(long)]
    keep_workdir: bool,

    /// Notifier for run events
    #[arg(long, default_value = "log")]
    notifier: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    Dir,
    S3,
}

impl Backend {
    fn name(self) -> &'static str {
        match self {
            Backend::Dir => "dir",
            Backend::S3 => "s3",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Merge the newest admitted versions into the target kit
    Merge {
        /// Merge kit specfile (YAML)
        #[arg(short, long)]
        specfile: PathBuf,
        #[command(flatten)]
        flags: KitFlags,
    },
    /// Remove old versions from the target kit
    Clean {
        #[arg(short, long)]
        specfile: PathBuf,
        #[command(flatten)]
        flags: KitFlags,
    },
    /// Generate packages from upstream releases and merge them
    Autogen {
        /// Autogen specfile (YAML)
        #[arg(short, long)]
        specfile: PathBuf,
        /// Merge kit specfile of the target kit
        #[arg(short, long)]
        kit_file: PathBuf,
        /// Skip the distfile sync of new atoms
        #[arg(long)]
        no_sync: bool,
        #[arg(long, value_enum, default_value = "dir")]
        backend: Backend,
        #[command(flatten)]
        flags: KitFlags,
    },
    /// Mirror the distfiles of the target kit
    Fetch {
        /// Distfiles specfile (YAML)
        #[arg(short, long)]
        specfile: PathBuf,
        #[arg(long, value_enum, default_value = "dir")]
        backend: Backend,
        #[arg(long)]
        dry_run: bool,
        #[arg(short, long = "atom")]
        atoms: Vec<String>,
        /// Write the run report here (.json or .yml)
        #[arg(long)]
        report: Option<PathBuf>,
        #[arg(long)]
        concurrency: Option<usize>,
    },
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn merge_options(config: &DevkitConfig, flags: &KitFlags) -> MergeOptions {
    let mut opts = config.merge_options();
    opts.push = flags.push;
    opts.pull_request = flags.pr;
    opts.dry_run = flags.dry_run;
    opts.atoms_filter = flags.atoms.clone();
    opts.keep_workdir |= flags.keep_workdir;
    if let Some(dir) = &flags.work_dir {
        opts.work_dir = dir.clone();
    }
    opts
}

fn merge_bot(config: &DevkitConfig, client: &HttpClient, flags: &KitFlags) -> Result<MergeBot> {
    let vcs = Arc::new(GitCli::new(config.git_auth()));
    let scanner = Arc::new(config.scanner()?);
    let mut bot = MergeBot::new(vcs, scanner).with_notifier(Arc::from(new_notifier(&flags.notifier)?));
    if flags.pr {
        let token = config
            .github_token()
            .context("--pr needs a GitHub token (GITHUB_TOKEN or [github].token)")?;
        let review = GithubProvider::new(client.clone(), config.github.api_url.as_deref(), token)?;
        bot = bot.with_review(Arc::new(review));
    }
    Ok(bot)
}

fn fetcher(config: &DevkitConfig, client: &HttpClient, backend: Backend, spec: Option<&DistfilesSpec>) -> Result<Box<dyn Fetcher>> {
    let mut downloader = Downloader::new(client.clone()).with_progress(true);
    if let Some(spec) = spec {
        downloader = downloader
            .with_mirrors(spec.kit.mirrors())
            .with_fallback(spec.fallback_uris());
    }
    Ok(new_fetcher(
        backend.name(),
        &config.general.work_dir,
        downloader,
        config.s3.as_ref(),
    )?)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    let config = DevkitConfig::load_or_default(cli.config.as_deref())?;
    let client = HttpClient::new(&config.http_options())?;

    match cli.command {
        Commands::Merge { specfile, flags } => {
            let spec = MergeKit::load(&specfile)?;
            let opts = merge_options(&config, &flags);
            let summary = merge_bot(&config, &client, &flags)?.run(&spec, &opts)?;
            info!(
                "{} bumped, {} commits, {} pull requests, {} pending",
                summary.bumped.len(),
                summary.commits.len(),
                summary.pull_requests.len(),
                summary.pending.len()
            );
            Ok(())
        }
        Commands::Clean { specfile, flags } => {
            let spec = MergeKit::load(&specfile)?;
            let opts = merge_options(&config, &flags);
            let summary = merge_bot(&config, &client, &flags)?.clean(&spec, &opts)?;
            info!("{} versions removed, {} errors", summary.removed.len(), summary.report.tot_errors);
            if !summary.report.is_success() {
                bail!("{} atoms failed", summary.report.tot_errors);
            }
            Ok(())
        }
        Commands::Autogen {
            specfile,
            kit_file,
            no_sync,
            backend,
            flags,
        } => {
            let spec = AutogenSpec::load(&specfile)?;
            let kit = MergeKit::load(&kit_file)?;
            let mut opts = config.autogen_options();
            opts.merge = merge_options(&config, &flags);
            opts.atoms_filter = flags.atoms.clone();
            opts.sync_distfiles = !no_sync;

            let mut generators = GeneratorContext::new(client.clone(), spec.spec_dir.clone());
            generators.github_token = config.github_token().map(str::to_string);
            if let Some(api) = &config.github.api_url {
                generators.github_api = api.clone();
            }

            let mut bot = AutogenBot::new(merge_bot(&config, &client, &flags)?, generators);
            if opts.sync_distfiles {
                bot = bot.with_fetcher(Arc::from(fetcher(&config, &client, backend, None)?));
            }
            let summary = bot.run(&spec, &kit, &opts)?;
            info!(
                "{} generated, {} already present, {} merged",
                summary.generated.len(),
                summary.skipped.len(),
                summary.merge.bumped.len()
            );
            if let Some(report) = summary.fetch
                && !report.is_success()
            {
                bail!("{} atoms failed the distfile sync", report.tot_errors);
            }
            Ok(())
        }
        Commands::Fetch {
            specfile,
            backend,
            dry_run,
            atoms,
            report,
            concurrency,
        } => {
            let spec = DistfilesSpec::load(&specfile)?;
            let mut target_only = spec.kit.clone();
            target_only.sources.clear();

            let flags = KitFlags {
                push: false,
                pr: false,
                dry_run,
                atoms: atoms.clone(),
                work_dir: None,
                keep_workdir: false,
                notifier: "log".to_string(),
            };
            let bot = merge_bot(&config, &client, &flags)?;
            let merge_opts = merge_options(&config, &flags);
            let ws = bot.prepare(&target_only, &merge_opts)?;

            let fetcher = fetcher(&config, &client, backend, Some(&spec))?;
            let opts = FetchOptions {
                concurrency: concurrency.unwrap_or(config.general.fetch_concurrency),
                dry_run,
                atoms_filter: atoms,
            };
            let result = fetcher.sync(&spec, &ws.target, &opts);
            if !merge_opts.keep_workdir {
                ws.cleanup()?;
            }
            let summary = result?;
            if let Some(path) = report {
                summary.write(&path)?;
                info!("Report written to {}", path.display());
            }
            if !summary.is_success() {
                bail!("{} atoms failed", summary.tot_errors);
            }
            Ok(())
        }
    }
}
