use chrono::Local;
use env_logger::Builder;
use failure::{Error, ResultExt};
use log::{debug, log_enabled, LevelFilter};
use model_snapshot::{Config, DownloadFailure, Driver, RepoType};
use sec::Secret;
use std::env;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;
use structopt::StructOpt;

fn main() {
    let args = Args::from_args();

    if args.example_config {
        generate_example();
        return;
    }

    if let Err(e) = run(&args) {
        if let Some(download_failure) = e.downcast_ref::<DownloadFailure>() {
            let mut stderr = io::stderr();
            download_failure.display(&mut stderr).ok();
        } else {
            eprintln!("Error: {}", e);

            for cause in e.iter_chain().skip(1) {
                eprintln!("\tCaused By: {}", cause);
            }

            if env::var_os("RUST_BACKTRACE").is_some() {
                eprintln!("{}", e.backtrace());
            }
        }

        process::exit(1);
    }
}

fn generate_example() {
    let example = Config::example();

    println!("{}", example.as_toml());
}

fn run(args: &Args) -> Result<(), Error> {
    initialize_logging(args)?;
    let cfg = args.config()?;

    if log_enabled!(log::Level::Debug) {
        for line in format!("{:#?}", cfg).lines() {
            debug!("{}", line);
        }
    }

    let driver = Driver::with_config(cfg)
        .force(args.force)
        .dry_run(args.dry_run);

    let snapshot = driver.run()?;

    if args.dry_run {
        for filename in &snapshot.planned {
            println!("{}", filename);
        }
    } else {
        println!("{}", snapshot.local_dir.display());
    }

    Ok(())
}

#[derive(Debug, Clone, PartialEq, StructOpt)]
#[structopt(
    name = "model-snapshot",
    about = "Download a filtered snapshot of a model hub repository."
)]
struct Args {
    #[structopt(
        short = "c",
        long = "config",
        help = "A TOML config file to read settings from."
    )]
    config_file: Option<String>,
    #[structopt(long = "repo-id", help = "The repository to download from.")]
    repo_id: Option<String>,
    #[structopt(
        long = "repo-type",
        help = "The kind of repository (model, dataset or space)."
    )]
    repo_type: Option<RepoType>,
    #[structopt(long = "revision", help = "A branch, tag or commit hash.")]
    revision: Option<String>,
    #[structopt(
        short = "d",
        long = "local-dir",
        parse(from_os_str),
        help = "Where to save the downloaded files."
    )]
    local_dir: Option<PathBuf>,
    #[structopt(
        short = "i",
        long = "include",
        number_of_values = 1,
        help = "Only download files matching this pattern (repeatable)."
    )]
    include: Vec<String>,
    #[structopt(
        short = "x",
        long = "exclude",
        number_of_values = 1,
        help = "Skip files matching this pattern (repeatable)."
    )]
    exclude: Vec<String>,
    #[structopt(
        long = "all",
        conflicts_with = "include",
        help = "Download every file in the repository."
    )]
    all: bool,
    #[structopt(long = "token", help = "A hub access token.")]
    token: Option<String>,
    #[structopt(long = "endpoint", help = "The hub to download from.")]
    endpoint: Option<String>,
    #[structopt(long = "force", help = "Download files even if they are up to date.")]
    force: bool,
    #[structopt(long = "dry-run", help = "List the files which would be downloaded.")]
    dry_run: bool,
    #[structopt(
        short = "v",
        long = "verbose",
        parse(from_occurrences),
        help = "Verbose output (repeat for more verbosity)"
    )]
    verbosity: u64,
    #[structopt(
        long = "example-config",
        help = "Generate an example config and immediately exit."
    )]
    example_config: bool,
}

impl Args {
    pub fn config(&self) -> Result<Config, Error> {
        let mut cfg = match self.config_file {
            Some(ref config_file) => {
                let config_file =
                    shellexpand::full(config_file).context("Unable to expand wildcards")?;

                Config::from_file(&*config_file).context("Couldn't load the config")?
            }
            None => Config::default(),
        };

        self.apply_overrides(&mut cfg);
        cfg.apply_env(|key| env::var(key).ok());

        Ok(cfg)
    }

    fn apply_overrides(&self, cfg: &mut Config) {
        if let Some(ref repo_id) = self.repo_id {
            cfg.snapshot.repo_id = repo_id.clone();
        }
        if let Some(repo_type) = self.repo_type {
            cfg.snapshot.repo_type = repo_type;
        }
        if let Some(ref revision) = self.revision {
            cfg.snapshot.revision = revision.clone();
        }
        if let Some(ref local_dir) = self.local_dir {
            cfg.snapshot.local_dir = local_dir.clone();
        }

        if self.all {
            cfg.snapshot.allow_patterns = None;
        } else if !self.include.is_empty() {
            cfg.snapshot.allow_patterns = Some(self.include.clone());
        }
        if !self.exclude.is_empty() {
            cfg.snapshot.ignore_patterns = self.exclude.clone();
        }

        if let Some(ref token) = self.token {
            cfg.hub.token = Some(Secret::new(token.clone()));
        }
        if let Some(ref endpoint) = self.endpoint {
            cfg.hub.endpoint = Some(endpoint.clone());
        }
    }
}

fn initialize_logging(args: &Args) -> Result<(), Error> {
    let mut builder = Builder::new();

    let level = match args.verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    builder.filter(Some("model_snapshot"), level);

    if let Ok(filter) = env::var("RUST_LOG") {
        builder.parse_filters(&filter);
    }

    builder.format(|out, record| match record.line() {
        Some(line) => writeln!(
            out,
            "{} [{:5}] ({}#{}): {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            record.level(),
            record.target(),
            line,
            record.args()
        ),
        None => writeln!(
            out,
            "{} [{:5}] ({}): {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            record.level(),
            record.target(),
            record.args()
        ),
    });

    builder.try_init()?;

    Ok(())
}
