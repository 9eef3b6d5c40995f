//! CLI parsing and orchestration. Parses args, merges config, runs download / list / read.
//! Maps errors to exit codes.

use crate::config::{self, Config};
use crate::fetch::{
    DirectClient, Fetcher, RenderConfig, Renderer, DEFAULT_NAVIGATION_TIMEOUT_SECS,
    DEFAULT_SETTLE_SECS, DEFAULT_TIMEOUT_SECS,
};
use crate::pipeline::{
    download_novel, ChapterStatus, DownloadOptions, DownloadReport, PipelineError, ProgressEvent,
    DEFAULT_DELAY_SECS,
};
use crate::reader::{read_chapter, BookmarkStore, ReadOutcome, ReaderError, DEFAULT_LINES_PER_PAGE};
use crate::storage::{ChapterFormat, NovelStore, StorageError, TitleMatch};
use clap::{Parser, Subcommand};
use std::cell::RefCell;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_OUTPUT_DIR: &str = "novels";

/// CLI error carrying exit code and message.
#[derive(Debug, Error)]
pub enum CliRunError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Download(#[from] PipelineError),

    #[error("{0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Reader(#[from] ReaderError),
}

impl CliRunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliRunError::InvalidInput(_) => 1,
            CliRunError::Download(PipelineError::InvalidUrl { .. }) => 1,
            CliRunError::Download(_) => 2,
            CliRunError::Storage(_) | CliRunError::Reader(_) => 3,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "novelfetch")]
#[command(about = "Download web novels chapter by chapter and read them in the terminal")]
#[command(
    after_help = "Config file keys (output_dir, user_agents, request_delay_secs, timeout_secs, render, render_timeout_secs, render_settle_secs, chrome_path, max_chapters, format, title_match, lines_per_page) are read from ./novelfetch.toml or the user config dir. CLI flags override config."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Base directory for downloaded novels (overrides config; default ./novels).
    #[arg(long, global = true)]
    pub output_dir: Option<PathBuf>,

    /// Suppress progress output (warnings and errors only).
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Debug logging and the full error chain.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download every chapter of the novel whose index page is at URL.
    Download(DownloadArgs),
    /// List stored chapters with the numbers `read` accepts.
    List,
    /// Page through a stored chapter, resuming at its bookmark.
    Read {
        /// Chapter number from `list`, or a path to a chapter file. Prompts when omitted.
        chapter: Option<String>,

        /// Lines per page (overrides config; default 20).
        #[arg(long)]
        lines: Option<usize>,
    },
}

#[derive(clap::Args, Debug)]
pub struct DownloadArgs {
    /// Novel index (table of contents) URL.
    pub url: String,

    /// Stop after this many chapters.
    #[arg(long)]
    pub max_chapters: Option<usize>,

    /// Delay before each chapter request in seconds (overrides config; default 2).
    #[arg(long)]
    pub delay: Option<u64>,

    /// Direct request timeout in seconds (overrides config; default 15).
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Never launch the headless browser.
    #[arg(long)]
    pub no_render: bool,

    /// Chapter file format: text or markdown.
    #[arg(long, value_parser = parse_format)]
    pub format: Option<ChapterFormat>,
}

fn parse_format(s: &str) -> Result<ChapterFormat, String> {
    match s.to_lowercase().as_str() {
        "text" | "txt" => Ok(ChapterFormat::Text),
        "markdown" | "md" => Ok(ChapterFormat::Markdown),
        _ => Err(format!(
            "Invalid format value: '{}'. Use text or markdown.",
            s
        )),
    }
}

fn parse_title_match(s: &str) -> Result<TitleMatch, String> {
    match s.to_lowercase().as_str() {
        "exact" => Ok(TitleMatch::Exact),
        "normalized" | "normalised" => Ok(TitleMatch::Normalized),
        _ => Err(format!(
            "Invalid title_match value: '{}'. Use exact or normalized.",
            s
        )),
    }
}

/// Effective settings: CLI flags over config over defaults.
#[derive(Debug, Clone, PartialEq)]
struct Settings {
    output_dir: PathBuf,
    user_agents: Vec<String>,
    delay_secs: u64,
    timeout_secs: u64,
    render: bool,
    render_timeout_secs: u64,
    render_settle_secs: u64,
    chrome_path: Option<PathBuf>,
    max_chapters: Option<usize>,
    format: ChapterFormat,
    title_match: TitleMatch,
    lines_per_page: usize,
}

impl Settings {
    fn resolve(config: Option<&Config>, output_dir: Option<&Path>) -> Result<Self, CliRunError> {
        let format = match config.and_then(|c| c.format.as_deref()) {
            Some(s) => parse_format(s).map_err(CliRunError::InvalidInput)?,
            None => ChapterFormat::default(),
        };
        let title_match = match config.and_then(|c| c.title_match.as_deref()) {
            Some(s) => parse_title_match(s).map_err(CliRunError::InvalidInput)?,
            None => TitleMatch::default(),
        };
        Ok(Self {
            output_dir: output_dir
                .map(Path::to_path_buf)
                .or_else(|| config.and_then(|c| c.output_dir.clone()))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            user_agents: config
                .and_then(|c| c.user_agents.clone())
                .unwrap_or_default(),
            delay_secs: config
                .and_then(|c| c.request_delay_secs)
                .unwrap_or(DEFAULT_DELAY_SECS),
            timeout_secs: config
                .and_then(|c| c.timeout_secs)
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
            render: config.and_then(|c| c.render).unwrap_or(true),
            render_timeout_secs: config
                .and_then(|c| c.render_timeout_secs)
                .unwrap_or(DEFAULT_NAVIGATION_TIMEOUT_SECS),
            render_settle_secs: config
                .and_then(|c| c.render_settle_secs)
                .unwrap_or(DEFAULT_SETTLE_SECS),
            chrome_path: config.and_then(|c| c.chrome_path.clone()),
            max_chapters: config.and_then(|c| c.max_chapters),
            format,
            title_match,
            lines_per_page: config
                .and_then(|c| c.lines_per_page)
                .unwrap_or(DEFAULT_LINES_PER_PAGE),
        })
    }

    fn apply_download_flags(&mut self, args: &DownloadArgs) {
        if let Some(n) = args.max_chapters {
            self.max_chapters = Some(n);
        }
        if let Some(d) = args.delay {
            self.delay_secs = d;
        }
        if let Some(t) = args.timeout {
            self.timeout_secs = t;
        }
        if args.no_render {
            self.render = false;
        }
        if let Some(f) = args.format {
            self.format = f;
        }
    }

    fn store(&self) -> NovelStore {
        NovelStore::new(&self.output_dir).with_title_match(self.title_match)
    }
}

/// Entry point for the CLI. Returns Ok(()) on success; Err with exit code and message on failure.
pub fn run(args: &Args) -> Result<(), CliRunError> {
    let config = config::load_config().map_err(CliRunError::InvalidInput)?;
    let mut settings = Settings::resolve(config.as_ref(), args.output_dir.as_deref())?;
    match &args.command {
        Command::Download(download) => {
            settings.apply_download_flags(download);
            run_download(&download.url, &settings, args.quiet)
        }
        Command::List => run_list(&settings),
        Command::Read { chapter, lines } => {
            if let Some(n) = lines {
                settings.lines_per_page = *n;
            }
            run_read(chapter.as_deref(), &settings)
        }
    }
}

fn build_fetcher(settings: &Settings) -> Result<Fetcher, CliRunError> {
    let direct = DirectClient::builder()
        .user_agents(settings.user_agents.iter().cloned())
        .timeout_secs(settings.timeout_secs)
        .build()
        .map_err(|e| CliRunError::InvalidInput(format!("Failed to create HTTP client: {}", e)))?;
    let renderer = if settings.render {
        let mut render_config = RenderConfig {
            chrome_path: settings.chrome_path.clone(),
            navigation_timeout: Duration::from_secs(settings.render_timeout_secs),
            settle: Duration::from_secs(settings.render_settle_secs),
            ..RenderConfig::default()
        };
        if let Some(ua) = settings.user_agents.first() {
            render_config.user_agent = ua.clone();
        }
        let renderer = Renderer::new(render_config).map_err(|e| {
            CliRunError::InvalidInput(format!("Failed to start the render runtime: {}", e))
        })?;
        Some(renderer)
    } else {
        None
    };
    Ok(Fetcher::new(direct, renderer))
}

/// Mark a Ctrl-C press on `flag` and return the notice to print. The process keeps running so
/// an in-flight render still closes its browser.
fn record_interrupt(flag: &AtomicBool) -> &'static str {
    if flag.swap(true, Ordering::SeqCst) {
        "Still finishing the current chapter; the browser will close when it is done..."
    } else {
        "Stopping after the current chapter..."
    }
}

/// Ctrl-C asks the pipeline to stop after the current chapter. Repeated presses do not kill the
/// process; the render timeout bounds how long the current chapter can take.
fn install_interrupt_handler(flag: Arc<AtomicBool>) {
    let spawned = std::thread::Builder::new()
        .name("novelfetch-ctrlc".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_io()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    tracing::warn!(error = %e, "Ctrl-C handling unavailable");
                    return;
                }
            };
            runtime.block_on(async {
                while tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("\n{}", record_interrupt(&flag));
                }
            });
        });
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "could not spawn Ctrl-C handler");
    }
}

fn progress_bar(total: u64) -> indicatif::ProgressBar {
    let bar = indicatif::ProgressBar::new(total);
    let style = indicatif::ProgressStyle::default_bar()
        .template("{spinner} {msg} [{bar:40}] {pos}/{len} ({elapsed})")
        .map(|s| {
            s.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
                .progress_chars("█▉▊▋▌▍▎▏ ")
        })
        .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar());
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

fn run_download(url: &str, settings: &Settings, quiet: bool) -> Result<(), CliRunError> {
    let mut fetcher = build_fetcher(settings)?;
    let store = settings.store();
    let cancel = Arc::new(AtomicBool::new(false));
    install_interrupt_handler(Arc::clone(&cancel));

    let max_chapters = settings.max_chapters;
    let bar: RefCell<Option<indicatif::ProgressBar>> = RefCell::new(None);
    let on_event = |event: &ProgressEvent<'_>| {
        let mut state = bar.borrow_mut();
        match event {
            ProgressEvent::TocResolved { novel, total, .. } => {
                let planned = max_chapters.map_or(*total, |m| m.min(*total));
                let pb = progress_bar(planned as u64);
                pb.set_message(novel.to_string());
                *state = Some(pb);
            }
            ProgressEvent::Started { index, .. } => {
                if let Some(pb) = state.as_ref() {
                    pb.set_message(format!("Fetching chapter {}", index));
                }
            }
            ProgressEvent::Extracted {
                index,
                title,
                too_short: true,
            } => {
                if let Some(pb) = state.as_ref() {
                    pb.println(format!("Chapter {} ({}) looks too short", index, title));
                }
            }
            ProgressEvent::Saved { .. } => {
                if let Some(pb) = state.as_ref() {
                    pb.inc(1);
                }
            }
            ProgressEvent::Failed { index, error } => {
                if let Some(pb) = state.as_ref() {
                    pb.println(format!("Chapter {} skipped: {}", index, error));
                    pb.inc(1);
                }
            }
            _ => {}
        }
    };
    let progress: Option<&dyn Fn(&ProgressEvent<'_>)> = if quiet { None } else { Some(&on_event) };
    let options = DownloadOptions {
        max_chapters,
        delay: Duration::from_secs(settings.delay_secs),
        format: settings.format,
        progress,
        cancel: Some(&*cancel),
    };
    let result = download_novel(&mut fetcher, &store, url, &options);

    if let Some(pb) = bar.borrow_mut().take() {
        pb.disable_steady_tick();
        pb.finish_and_clear();
    }
    let report = result?;
    if !quiet {
        eprint!("{}", summary(&report));
    }
    Ok(())
}

fn summary(report: &DownloadReport) -> String {
    let mut out = format!(
        "{}: saved {} of {} chapters to {}\n",
        report.novel.title(),
        report.saved_count(),
        report.chapters.len(),
        report.folder.display()
    );
    if report.too_short_count() > 0 {
        out.push_str(&format!(
            "{} chapter(s) looked too short; check them by hand\n",
            report.too_short_count()
        ));
    }
    for outcome in &report.chapters {
        if let ChapterStatus::Failed(error) = &outcome.status {
            out.push_str(&format!(
                "  failed {} ({}): {}\n",
                outcome.chapter.index, outcome.chapter.url, error
            ));
        }
    }
    if report.cancelled {
        out.push_str("Cancelled before all chapters were fetched\n");
    }
    out
}

fn run_list(settings: &Settings) -> Result<(), CliRunError> {
    let chapters = settings.store().list_chapters()?;
    if chapters.is_empty() {
        eprintln!("No chapters found. Download a novel first.");
        return Ok(());
    }
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    write_listing(&mut out, &chapters, &settings.output_dir)
        .map_err(|e| CliRunError::Reader(ReaderError::Terminal(e)))
}

fn write_listing<W: Write>(out: &mut W, chapters: &[PathBuf], base: &Path) -> std::io::Result<()> {
    for (i, path) in chapters.iter().enumerate() {
        let shown = path.strip_prefix(base).unwrap_or(path);
        writeln!(out, "{}. {}", i + 1, shown.display())?;
    }
    Ok(())
}

/// A number from `list` (1-based) or a path to a chapter file.
fn select_chapter(selection: &str, chapters: &[PathBuf]) -> Result<PathBuf, CliRunError> {
    let selection = selection.trim();
    match selection.parse::<usize>() {
        Ok(n) if n >= 1 && n <= chapters.len() => Ok(chapters[n - 1].clone()),
        Ok(n) => Err(CliRunError::InvalidInput(format!(
            "Please select a valid chapter number (1-{}), got {}.",
            chapters.len(),
            n
        ))),
        Err(_) if selection.is_empty() => Err(CliRunError::InvalidInput(
            "Please enter a chapter number.".to_string(),
        )),
        Err(_) => Ok(PathBuf::from(selection)),
    }
}

fn prompt_for_chapter<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    chapters: &[PathBuf],
    base: &Path,
) -> Result<PathBuf, CliRunError> {
    let terminal = |e: std::io::Error| CliRunError::Reader(ReaderError::Terminal(e));
    writeln!(output, "Available chapters:").map_err(terminal)?;
    write_listing(output, chapters, base).map_err(terminal)?;
    write!(output, "\nSelect a chapter: ").map_err(terminal)?;
    output.flush().map_err(terminal)?;
    let mut answer = String::new();
    input.read_line(&mut answer).map_err(terminal)?;
    select_chapter(&answer, chapters)
}

fn run_read(selection: Option<&str>, settings: &Settings) -> Result<(), CliRunError> {
    let chapters = settings.store().list_chapters()?;
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut input = stdin.lock();
    let mut output = stdout.lock();

    let chapter = match selection {
        Some(s) => select_chapter(s, &chapters)?,
        None if chapters.is_empty() => {
            return Err(CliRunError::InvalidInput(
                "No chapters found. Download a novel first.".to_string(),
            ))
        }
        None => prompt_for_chapter(&mut input, &mut output, &chapters, &settings.output_dir)?,
    };

    let mut bookmarks = BookmarkStore::in_dir(&settings.output_dir)?;
    let outcome = read_chapter(
        &chapter,
        settings.lines_per_page,
        &mut bookmarks,
        &mut input,
        &mut output,
    )?;
    bookmarks.save()?;
    if let ReadOutcome::Quit { line } = outcome {
        tracing::debug!(chapter = %chapter.display(), line, "reading paused");
    }
    Ok(())
}
