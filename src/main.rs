use std::{
    error::Error,
    path::{Path, PathBuf},
    process,
};

use clap::{command, Parser, Subcommand, ValueHint};
use futures_util::future::join_all;
use log::{debug, error, info, warn, LevelFilter};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use ncmfetch::{
    album::{self, AlbumReport, Assembler},
    catalog::Catalog,
    config::Config,
    credentials::{CredentialProvider, Credentials, FileCredentials},
    error::ErrorKind,
    protocol::Level,
    track::{ResolvedTrack, TrackMetadata},
    util,
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when not built release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, PartialEq, Eq, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Cookie file
    ///
    /// Holds the cookies of a logged in session as `name=value` pairs,
    /// separated by `;` or newlines. Keep this file private: it grants
    /// access to your account. Without it, only standard quality is
    /// available for most tracks.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value_t = String::from("cookie.txt"), env = "NCMFETCH_CREDENTIALS", global = true)]
    credentials: String,

    /// Configuration file
    ///
    /// Optional TOML file overriding the built-in defaults. Command line
    /// arguments take precedence over it.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath, env = "NCMFETCH_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Directory to create album directories in
    #[arg(short, long, value_name = "DIR", value_hint = ValueHint::DirPath, env = "NCMFETCH_OUTPUT", global = true)]
    output: Option<PathBuf>,

    /// Tracks to process concurrently per album
    #[arg(short, long, value_name = "N", global = true)]
    workers: Option<usize>,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING, global = true)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, PartialEq, Eq, Subcommand)]
enum Command {
    /// Resolve a single track and print where to download it
    Resolve {
        /// Track id, share URL or short link
        reference: String,

        /// Quality level to request
        ///
        /// One of standard, exhigh, lossless, hires, sky, jyeffect or
        /// jymaster.
        #[arg(short, long)]
        level: Option<Level>,

        /// Print JSON instead of text
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Download and tag albums
    ///
    /// Every list file holds the tracks of one album in order, one
    /// reference per line. Blank lines and lines starting with `#` are
    /// ignored.
    Album {
        /// Track list files
        #[arg(required = true, value_hint = ValueHint::FilePath)]
        lists: Vec<PathBuf>,

        /// Album name
        ///
        /// Only valid with a single list.
        ///
        /// [default: name of the list file]
        #[arg(short, long)]
        name: Option<String>,

        /// Quality level to request
        #[arg(short, long)]
        level: Option<Level>,
    },
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Note: if you change the default logging level here, then you should
        // probably also change the verbosity levels below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            0 => {
                // Quiet and verbose are mutually exclusive, and `verbose` is 0
                // by default. So this arm means: quiet mode.
                LevelFilter::Warn
            }
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module(module_path!(), level);
    }

    logger.init();
}

/// Builds the configuration from the optional file and the arguments.
fn load_config(args: &Args) -> ncmfetch::error::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    if let Some(output) = &args.output {
        config.output.clone_from(output);
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    match &args.command {
        Command::Resolve { level, .. } | Command::Album { level, .. } => {
            if let Some(level) = level {
                config.level = *level;
            }
        }
    }

    config.validate()?;
    Ok(config)
}

/// Loads the session cookies, continuing anonymously if there are none.
async fn load_credentials(path: &str) -> ncmfetch::error::Result<Credentials> {
    match FileCredentials::new(path).credentials().await {
        Err(e) if e.kind == ErrorKind::NotFound => {
            warn!("{path} not found; continuing without an account");
            Ok(Credentials::anonymous())
        }
        result => result,
    }
}

/// What `resolve --json` prints.
#[derive(Serialize)]
struct Resolution<'a> {
    track: &'a ResolvedTrack,
    metadata: &'a TrackMetadata,
    size: String,
}

async fn resolve(catalog: &Catalog, config: &Config, reference: &str, json: bool) -> Result<(), Box<dyn Error>> {
    let id = catalog.track_id(reference).await?;
    let track = catalog.resolve(id, config.level).await?;
    let metadata = catalog.metadata(id).await?;

    if json {
        let resolution = Resolution {
            track: &track,
            metadata: &metadata,
            size: util::human_size(track.size),
        };
        println!("{}", serde_json::to_string_pretty(&resolution)?);
        return Ok(());
    }

    let or_none = |value: Option<String>| value.unwrap_or_else(|| "-".to_owned());
    println!("Title:       {}", metadata.title);
    println!("Artist:      {}", metadata.artist);
    println!("Album:       {}", metadata.album);
    println!("Cover:       {}", or_none(metadata.cover_url.as_ref().map(ToString::to_string)));
    println!("Level:       {}", track.level);
    println!("Size:        {}", util::human_size(track.size));
    println!("URL:         {}", or_none(track.url.as_ref().map(ToString::to_string)));
    if let Some(lyrics) = &metadata.lyrics {
        println!("\n{lyrics}");
    }
    if let Some(translated) = &metadata.translated_lyrics {
        println!("\n{translated}");
    }

    if track.is_denied() {
        return Err(format!("track {id} is not available to this account").into());
    }
    Ok(())
}

/// Name of the album assembled from `list`: `name` if given, else the file
/// name without extension.
fn album_name(list: &Path, name: Option<&str>) -> String {
    name.map_or_else(
        || {
            list.file_stem()
                .map_or_else(|| "album".to_owned(), |stem| stem.to_string_lossy().into_owned())
        },
        str::to_owned,
    )
}

/// Reads a list file and assembles it as one album.
async fn assemble(
    assembler: &Assembler,
    list: &Path,
    name: String,
    cancel: &CancellationToken,
) -> ncmfetch::error::Result<AlbumReport> {
    let references = album::read_track_list(list).await?;
    let job = assembler.job(name, &references).await?;
    assembler.assemble(&job, cancel).await
}

fn print_report(report: &AlbumReport) {
    println!(
        "{} ({}/{} tagged) in {}",
        report.name,
        report.succeeded,
        report.total,
        report.directory.display()
    );
    for track in &report.tracks {
        let line = format!(
            "  {:02} {:<9} {:>12} {}",
            track.number,
            track.outcome.label(),
            track.id,
            track.title.as_deref().unwrap_or("-")
        );
        match track.outcome.error() {
            Some(e) => println!("{line}: {e}"),
            None => println!("{line}"),
        }
    }
    if let Some(retry_list) = &report.retry_list {
        println!("  retry with: {}", retry_list.display());
    }
}

/// Main application.
///
/// Returns whether everything that was asked for was done.
///
/// # Errors
///
/// Returns an error when the configuration is invalid, or when a command
/// fails as a whole.
async fn run(args: Args, cancel: CancellationToken) -> Result<bool, Box<dyn Error>> {
    let config = load_config(&args)?;
    let credentials = load_credentials(&args.credentials).await?;
    let catalog = Catalog::new(&config, &credentials)?;

    match args.command {
        Command::Resolve {
            reference, json, ..
        } => {
            resolve(&catalog, &config, &reference, json).await?;
            Ok(true)
        }

        Command::Album { lists, name, .. } => {
            if name.is_some() && lists.len() > 1 {
                return Err("--name can only be used with a single list".into());
            }

            let names: Vec<String> = lists
                .iter()
                .map(|list| album_name(list, name.as_deref()))
                .collect();
            album::check_distinct(names.iter().map(String::as_str))?;

            let assembler = Assembler::new(&config, catalog)?;
            let results = join_all(
                lists
                    .iter()
                    .zip(names)
                    .map(|(list, name)| assemble(&assembler, list, name, &cancel)),
            )
            .await;

            let mut complete = true;
            for (list, result) in lists.iter().zip(results) {
                match result {
                    Ok(report) => {
                        print_report(&report);
                        complete &= report.is_complete();
                    }
                    Err(e) if e.is_fatal() => return Err(e.into()),
                    Err(e) => {
                        error!("{}: {e}", list.display());
                        complete = false;
                    }
                }
            }

            Ok(complete)
        }
    }
}

/// Main entry point of the application.
///
/// This function initializes the logger facade, parses the command line
/// arguments, and runs the requested command until it completes or is
/// interrupted.
#[tokio::main]
async fn main() {
    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    // This aids in debugging of whatever comes next.
    debug!("Command {:#?}", args);

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();

    info!("starting {name}/{version}; {BUILD_PROFILE}");

    let cancel = CancellationToken::new();
    let work = run(args, cancel.clone());
    tokio::pin!(work);

    let result = loop {
        tokio::select! {
            // Prioritize shutdown signals.
            biased;

            _ = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => {
                info!("cancelling; downloads in progress finish their current attempt");
                cancel.cancel();
            }

            result = &mut work => break result,
        }
    };

    match result {
        Ok(true) => {}
        Ok(false) => process::exit(2),
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    }
}
