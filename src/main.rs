use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info, warn};

use onsei::providers::AudioProvider;
use onsei::utils::config::load_config;
use onsei::{App, InitResult, SearchOptions};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file. Searched for nearby when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the cache database.
    #[arg(short, long, global = true, default_value = ".")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load every enabled source into the cache.
    Init {
        /// Reconcile even if the source list did not change.
        #[arg(long)]
        force: bool,
    },
    /// Show headword and file counts.
    Stats,
    /// Find audio for a word or sentence.
    Search {
        text: String,
        #[arg(long)]
        split_morphemes: bool,
        #[arg(long)]
        ignore_inflections: bool,
        #[arg(long)]
        stop_if_one_source: bool,
        /// Save the found files to this directory.
        #[arg(long)]
        download: Option<PathBuf>,
    },
    /// Delete sources from the cache.
    Remove {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Delete all cached data.
    Purge,
    /// Import a pitch accent TSV file.
    PitchImport {
        #[arg(long, default_value = "user")]
        provider: String,
        tsv: PathBuf,
    },
    /// Look up pitch accents.
    Pitch {
        word: String,
        #[arg(long)]
        prefer: Option<String>,
    },
    /// Ask forvo.com for pronunciations.
    Forvo {
        word: String,
        /// Use the search page instead of the word page.
        #[arg(long)]
        search: bool,
    },
}

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn report_init(result: &InitResult) {
    if !result.did_run {
        info!("Sources unchanged, {} active", result.sources.len());
        return;
    }
    for source in &result.sources {
        info!("Source ready: {} ({})", source.name, source.url);
    }
    for failure in &result.errors {
        error!("{}", failure);
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let config = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    let app = Arc::new(
        App::new(config, &args.data_dir).context("Failed to prepare the data directory")?,
    );
    info!("Cache: {:?}", app.db_path());

    match args.command {
        Command::Init { force } => {
            let pb = spinner("Reconciling audio sources...");
            let result = app.init_sources_in_background(force)?.wait();
            pb.finish_and_clear();
            report_init(&result?);
        }
        Command::Stats => {
            report_init(&app.init_sources(false)?);
            let stats = app.total_stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Search {
            text,
            split_morphemes,
            ignore_inflections,
            stop_if_one_source,
            download,
        } => {
            report_init(&app.init_sources(false)?);
            let defaults = SearchOptions::from(&app.config().audio_settings);
            let options = SearchOptions {
                split_morphemes: split_morphemes || defaults.split_morphemes,
                ignore_inflections: ignore_inflections || defaults.ignore_inflections,
                stop_if_one_source_has_results: stop_if_one_source
                    || defaults.stop_if_one_source_has_results,
            };
            let hits = app.search_audio(&text, options)?;
            if hits.is_empty() {
                warn!("Nothing found for {}", text);
                return Ok(());
            }
            println!("{}", serde_json::to_string_pretty(&hits)?);

            if let Some(media_dir) = download {
                let pb = spinner(&format!("Downloading {} files...", hits.len()));
                let saved = app.download_in_background(hits, media_dir)?.wait();
                pb.finish_and_clear();
                let saved = saved?;
                for failure in &saved.fails {
                    error!("{}", failure);
                }
                let saved_hits: Vec<_> = saved.successes.into_iter().map(|s| s.file).collect();
                info!("Saved {} files, {} failed", saved_hits.len(), saved.fails.len());
                println!("{}", app.format_tags(&saved_hits));
            }
        }
        Command::Remove { names } => {
            let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
            let selected: HashSet<_> = app
                .cached_sources()?
                .into_iter()
                .filter(|source| wanted.contains(source.name.as_str()))
                .collect();
            if selected.is_empty() {
                bail!("None of {:?} is in the cache", names);
            }
            for removed in app.remove_sources(&selected)? {
                info!("Removed {} ({})", removed.name, removed.url);
            }
        }
        Command::Purge => {
            app.purge_everything()?;
            info!("Cache purged");
        }
        Command::PitchImport { provider, tsv } => {
            let count = app
                .import_pitch_accents(&tsv, &provider)
                .with_context(|| format!("Failed to import {:?}", tsv))?;
            info!("Imported {} rows for {}", count, provider);
        }
        Command::Pitch { word, prefer } => {
            let entries = app.search_pitch_accents(&word, prefer.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        Command::Forvo { word, search } => {
            let forvo = app.forvo();
            let hits = if search { forvo.search(&word)? } else { forvo.word(&word)? };
            println!("{}", serde_json::to_string_pretty(&hits)?);
        }
    }

    Ok(())
}
