use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use depscan::{
    config::{
        Config, ScanArgs, ARG_CONSIDER_PROJECT_REFERENCES, ARG_INCLUDE_DEV, ARG_INCLUDE_FOLDER,
        ARG_PACKAGE_LOCK_ONLY, ARG_TYPE,
    },
    error::ScanError,
    fs::LocalFileSystem,
    model::{Package, ScanResult},
    output::{
        format_result_to_string, generate_cyclonedx_string, print_result, BomSubject,
        OutputFormat,
    },
    proget::{PackageConsumer, ProGetClient},
    scanner::resolve_dependencies,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod exit_codes {
    pub const SUCCESS: u8 = 0;
    pub const ERROR: u8 = 1;
    pub const INTERRUPTED: u8 = 130;
}

#[derive(Parser)]
#[command(name = "depscan")]
#[command(
    author,
    version,
    about = "Scan NuGet, npm, PyPI and Conda projects for the packages they consume"
)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG overrides this.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the packages consumed by each project
    Report {
        #[command(flatten)]
        scan: ScanOpts,

        /// Output format (table, json, cyclonedx)
        #[arg(short, long)]
        format: Option<String>,

        /// Write output to file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Build a CycloneDX SBOM and upload it to ProGet or write it to a file
    Identify {
        #[command(flatten)]
        scan: ScanOpts,

        /// Name of the component the SBOM describes
        #[arg(long)]
        project_name: String,

        /// Version of the component the SBOM describes
        #[arg(long)]
        version: Option<String>,

        /// CycloneDX component type of the subject
        #[arg(long, default_value = "library")]
        project_type: String,

        /// ProGet base URL
        #[arg(long)]
        proget_url: Option<String>,

        /// ProGet API key
        #[arg(long)]
        api_key: Option<String>,

        /// Write the SBOM here instead of uploading it
        #[arg(long)]
        output_file: Option<PathBuf>,
    },

    /// Record the scanned packages' consumer in ProGet
    Publish {
        #[command(flatten)]
        scan: ScanOpts,

        /// Feed the packages belong to
        #[arg(long, conflicts_with = "package_feeds")]
        package_feed: Option<String>,

        /// Comma-separated feeds the packages belong to
        #[arg(long)]
        package_feeds: Option<String>,

        /// ProGet base URL
        #[arg(long)]
        proget_url: Option<String>,

        /// Feed name or URL of the consuming package
        #[arg(long)]
        consumer_package_source: String,

        /// Consumer name; each project is its own consumer when omitted
        #[arg(long)]
        consumer_package_name: Option<String>,

        #[arg(long)]
        consumer_package_version: Option<String>,

        #[arg(long)]
        consumer_package_group: Option<String>,

        /// ProGet API key
        #[arg(long)]
        api_key: Option<String>,
    },

    /// Show or create config file
    Config {
        /// Generate default config file
        #[arg(long)]
        init: bool,

        /// Show config file path
        #[arg(long)]
        path: bool,
    },
}

/// Options shared by every scanning command.
#[derive(Args)]
struct ScanOpts {
    /// Solution, project, lock file, requirements file or directory to scan
    #[arg(short, long)]
    input: PathBuf,

    /// Scanner type (nuget, npm, pypi, conda, auto)
    #[arg(short = 't', long = "type")]
    scan_type: Option<String>,

    /// Solution folder to include; repeat or separate with '|'
    #[arg(long)]
    include_folder: Vec<String>,

    /// Report NuGet project references as packages
    #[arg(long)]
    consider_project_references: bool,

    /// Include npm dev dependencies
    #[arg(long)]
    include_dev: bool,

    /// Ignore lock files inside node_modules
    #[arg(long)]
    package_lock_only: bool,
}

impl ScanOpts {
    fn to_scan_args(&self) -> ScanArgs {
        let mut args = ScanArgs::new();
        if let Some(scan_type) = &self.scan_type {
            args.insert(ARG_TYPE, scan_type.as_str());
        }
        if !self.include_folder.is_empty() {
            args.insert(ARG_INCLUDE_FOLDER, self.include_folder.join("|"));
        }
        let flags = [
            (ARG_CONSIDER_PROJECT_REFERENCES, self.consider_project_references),
            (ARG_INCLUDE_DEV, self.include_dev),
            (ARG_PACKAGE_LOCK_ONLY, self.package_lock_only),
        ];
        for (name, set) in flags {
            if set {
                args.insert(name, "");
            }
        }
        args
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_tracing(cli.verbose) {
        eprintln!("Warning: {}", e);
    }

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let code = match run(cli, &cancel).await {
        Ok(()) => exit_codes::SUCCESS,
        Err(e) if is_cancelled(&e) || cancel.is_cancelled() => {
            eprintln!("Interrupted.");
            exit_codes::INTERRUPTED
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            exit_codes::ERROR
        }
    };

    ctrl_c.abort();
    ExitCode::from(code)
}

fn init_tracing(verbose: u8) -> Result<()> {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init()
        .map_err(|e| anyhow!("failed to initialize tracing subscriber: {}", e))
}

fn is_cancelled(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<ScanError>()
        .is_some_and(ScanError::is_cancelled)
}

async fn run(cli: Cli, cancel: &CancellationToken) -> Result<()> {
    let config = Config::load().unwrap_or_default();

    match cli.command {
        Commands::Report {
            scan,
            format,
            output,
        } => {
            let format_str = format.unwrap_or_else(|| config.default_format.clone());
            let format = OutputFormat::from_str(&format_str).map_err(|e| anyhow!(e))?;
            let interactive = format == OutputFormat::Table && output.is_none();

            let result = run_scan(&scan, &config, cancel, interactive).await?;
            let subject = BomSubject::new(file_stem(&scan.input));

            match output {
                Some(path) => {
                    let content = format_result_to_string(&result, format, &subject)?;
                    std::fs::write(&path, content)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    eprintln!("Report written to {}", path.display());
                }
                None => print_result(&result, format, &subject)?,
            }
            Ok(())
        }
        Commands::Identify {
            scan,
            project_name,
            version,
            project_type,
            proget_url,
            api_key,
            output_file,
        } => {
            let result = run_scan(&scan, &config, cancel, true).await?;
            if result.projects.is_empty() {
                println!("No projects found.");
                return Ok(());
            }

            let mut subject = BomSubject::new(&project_name).with_type(project_type);
            if let Some(version) = &version {
                subject = subject.with_version(version);
            }
            let bom = generate_cyclonedx_string(&result, &subject)?;

            match output_file {
                Some(path) => {
                    std::fs::write(&path, bom)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("SBOM written to {}", path.display());
                }
                None => {
                    let url = proget_url
                        .or_else(|| config.proget_url.clone())
                        .context("missing --proget-url (or proget_url in config)")?;
                    let client = ProGetClient::new(&url)
                        .with_api_key(api_key.or_else(|| config.api_key.clone()));
                    until_cancelled(cancel, client.publish_sbom(bom)).await?;
                }
            }

            println!(
                "Analyzed {} projects, published SBOM for {} {}.",
                result.projects.len(),
                project_name,
                version.unwrap_or_default()
            );
            Ok(())
        }
        Commands::Publish {
            scan,
            package_feed,
            package_feeds,
            proget_url,
            consumer_package_source,
            consumer_package_name,
            consumer_package_version,
            consumer_package_group,
            api_key,
        } => {
            let feeds: Vec<String> = match (package_feeds, package_feed) {
                (Some(list), _) => list
                    .split(',')
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .map(str::to_string)
                    .collect(),
                (None, Some(feed)) => vec![feed],
                (None, None) => bail!("missing --package-feed or --package-feeds"),
            };
            let url = proget_url
                .or_else(|| config.proget_url.clone())
                .context("missing --proget-url (or proget_url in config)")?;
            let client =
                ProGetClient::new(&url).with_api_key(api_key.or_else(|| config.api_key.clone()));

            let result = run_scan(&scan, &config, cancel, true).await?;

            let consumer_for = |name: &str| {
                PackageConsumer::new(name, &consumer_package_source)
                    .with_version(consumer_package_version.clone())
                    .with_group(consumer_package_group.clone())
            };

            // One consumer for everything, or one per project.
            let batches: Vec<(PackageConsumer, Vec<&Package>)> = match &consumer_package_name {
                Some(name) => vec![(consumer_for(name), result.unique_packages())],
                None => result
                    .projects
                    .iter()
                    .map(|project| {
                        let mut seen = HashSet::new();
                        let packages = project
                            .packages()
                            .iter()
                            .filter(|p| seen.insert(*p))
                            .collect();
                        (consumer_for(project.name()), packages)
                    })
                    .collect(),
            };

            for (consumer, packages) in &batches {
                for package in packages {
                    println!("Publishing consumer data for {}...", package);
                }
                for feed in &feeds {
                    until_cancelled(
                        cancel,
                        client.record_dependents(packages, feed, consumer, None),
                    )
                    .await?;
                }
            }

            println!("Dependencies published!");
            Ok(())
        }
        Commands::Config { init, path } => handle_config(init, path),
    }
}

async fn run_scan(
    scan: &ScanOpts,
    config: &Config,
    cancel: &CancellationToken,
    show_progress: bool,
) -> Result<ScanResult> {
    let mut args = scan.to_scan_args();
    config.apply_defaults(&mut args);

    let progress = if show_progress {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        pb.set_message(format!("Scanning {}...", scan.input.display()));
        Some(pb)
    } else {
        None
    };

    let projects = resolve_dependencies(&scan.input, &args, &LocalFileSystem::new(), cancel).await;

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    let projects = projects.with_context(|| format!("failed to scan {}", scan.input.display()))?;
    Ok(ScanResult::new(projects))
}

async fn until_cancelled<T>(
    cancel: &CancellationToken,
    operation: impl Future<Output = Result<T, ScanError>>,
) -> Result<T> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ScanError::Cancelled.into()),
        result = operation => Ok(result?),
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string())
}

fn handle_config(init: bool, show_path: bool) -> Result<()> {
    let config_path = Config::config_path();

    if show_path {
        println!("{}", config_path.display());
        return Ok(());
    }

    if init {
        if config_path.exists() {
            println!("Config file already exists at: {}", config_path.display());
            return Ok(());
        }

        let config = Config::default();
        config.save()?;
        println!("Created config file at: {}", config_path.display());
        println!();
        println!("Default configuration:");
        println!("{}", Config::generate_default_config());
        return Ok(());
    }

    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)?;
        println!("Config file: {}", config_path.display());
        println!();
        println!("{}", content);
    } else {
        println!("No config file found.");
        println!("Run 'depscan config --init' to create one.");
        println!();
        println!("Config path: {}", config_path.display());
    }

    Ok(())
}
