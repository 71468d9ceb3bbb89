use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::BufReader;
use tracing::info;
use tracing_subscriber::EnvFilter;

use katbot::chat::terminal::{TERMINAL_CHANNEL, TERMINAL_USER, TerminalChat};
use katbot::consts::{
    DEFAULT_PER_PAGE, MIRROR_ATTEMPT_TIMEOUT, PASTE_MIRRORS, SESSION_TIMEOUT, TEXT_PAGE_MAX_SIZE,
};
use katbot::events::EventBus;
use katbot::fetch::http::HttpTransport;
use katbot::fetch::{BoundedFetcher, FetchMode, FetchPolicy, FetchResult};
use katbot::offload::{OffloadConfig, Pool, TaskOffloader};
use katbot::session::{PageStyle, Pages, PagedSession, SessionConfig, SessionEnd, SessionRegistry};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Layout {
    /// Numbered lines, several per page
    List,
    /// Raw text chunks inside a code block
    Text,
}

#[derive(Parser)]
#[command(name = "katbot", version, about = "Paginated chat sessions, bounded fetches and paste mirrors.")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Jobs allowed on the offload pool at once
    #[arg(long, global = true)]
    max_jobs: Option<usize>,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch a URL under a size cap and deadline
    Fetch {
        url: String,

        /// Print only this top-level JSON field
        #[arg(short, long)]
        field: Option<String>,

        /// Deadline in milliseconds
        #[arg(short, long, default_value_t = 2000)]
        timeout_ms: u64,

        /// Largest accepted body in bytes
        #[arg(long, default_value_t = 3_000_000)]
        max_size: u64,

        /// Read bodies without a declared length
        #[arg(long, default_value_t = false)]
        trust_missing_size: bool,
    },
    /// Upload a file to the first paste mirror that answers
    Paste {
        file: PathBuf,

        /// Mirror base URL ending in '/'; may be repeated (default: built-in list)
        #[arg(short, long)]
        mirror: Vec<String>,
    },
    /// Page through a file at the terminal
    Page {
        file: PathBuf,

        #[arg(short, long, value_enum, default_value_t = Layout::List)]
        layout: Layout,

        /// Lines per page for the list layout
        #[arg(short, long, default_value_t = DEFAULT_PER_PAGE)]
        per_page: usize,

        /// Title shown above list pages
        #[arg(long)]
        title: Option<String>,

        /// Seconds without input before the session ends
        #[arg(short, long, default_value_t = SESSION_TIMEOUT.as_secs())]
        timeout: u64,

        /// Delete the pages when stopped instead of leaving the last one
        #[arg(long, default_value_t = false)]
        stop_deletes: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,reqwest=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let offloader = match cli.max_jobs {
        Some(max_in_flight) => TaskOffloader::new(OffloadConfig { max_in_flight }),
        None => TaskOffloader::default(),
    };

    let outcome = match cli.command {
        Command::Fetch {
            url,
            field,
            timeout_ms,
            max_size,
            trust_missing_size,
        } => {
            let policy = FetchPolicy {
                timeout: Duration::from_millis(timeout_ms),
                max_size,
                trust_missing_size,
            };
            handle_fetch(&url, field, policy).await
        }
        Command::Paste { file, mirror } => handle_paste(&offloader, file, mirror).await,
        Command::Page {
            file,
            layout,
            per_page,
            title,
            timeout,
            stop_deletes,
        } => {
            let config = SessionConfig {
                timeout: Duration::from_secs(timeout),
                stop_deletes,
                style: PageStyle {
                    title,
                    ..PageStyle::default()
                },
                ..SessionConfig::default()
            };
            handle_page(&offloader, file, layout, per_page, config).await
        }
    };
    offloader.shutdown();
    outcome
}

async fn handle_fetch(url: &str, field: Option<String>, policy: FetchPolicy) -> anyhow::Result<()> {
    let fetcher = BoundedFetcher::new(Arc::new(HttpTransport::new()?)).with_policy(policy);
    let mode = field.map_or(FetchMode::Bytes, FetchMode::JsonField);

    match fetcher.fetch(url, mode).await? {
        FetchResult::Field(value) => println!("{value}"),
        result => {
            let body = result.into_bytes().unwrap_or_default();
            let mut stdout = std::io::stdout();
            stdout.write_all(&body)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

async fn handle_paste(
    offloader: &TaskOffloader,
    file: PathBuf,
    mirrors: Vec<String>,
) -> anyhow::Result<()> {
    let content = offloader
        .run(move || {
            std::fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))
        })
        .await?;

    let mirrors: Vec<&str> = if mirrors.is_empty() {
        PASTE_MIRRORS.to_vec()
    } else {
        mirrors.iter().map(String::as_str).collect()
    };

    let fetcher = BoundedFetcher::new(Arc::new(HttpTransport::new()?));
    match fetcher
        .post_first_reachable(&mirrors, &content, MIRROR_ATTEMPT_TIMEOUT)
        .await
    {
        Some(url) => {
            println!("{url}");
            Ok(())
        }
        None => anyhow::bail!("no paste mirror accepted the upload"),
    }
}

async fn handle_page(
    offloader: &TaskOffloader,
    file: PathBuf,
    layout: Layout,
    per_page: usize,
    config: SessionConfig,
) -> anyhow::Result<()> {
    // Splitting is CPU-bound.
    let pages = offloader
        .run_on(Pool::Dedicated, move || {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            Ok(match layout {
                Layout::List => Pages::list(text.lines(), per_page),
                Layout::Text => Pages::text(&text, "```", "```", TEXT_PAGE_MAX_SIZE),
            })
        })
        .await?;

    let chat = Arc::new(TerminalChat::new());
    let bus = EventBus::default();
    let registry = Arc::new(SessionRegistry::new());
    let dispatcher = tokio::spawn(Arc::clone(&registry).dispatch(bus.subscribe()));

    let session = PagedSession::new(
        chat.clone(),
        Arc::clone(&registry),
        TERMINAL_USER,
        TERMINAL_CHANNEL,
        pages,
    )
    .with_config(config);

    let input = Arc::clone(&chat);
    let reader = tokio::spawn(async move {
        let stdin = BufReader::new(tokio::io::stdin());
        input.read_input(stdin, &bus).await
    });

    let report = tokio::select! {
        report = session.run() => report?,
        _ = tokio::signal::ctrl_c() => {
            println!();
            dispatcher.abort();
            reader.abort();
            return Ok(());
        }
    };

    dispatcher.abort();
    reader.abort();

    match report.end {
        SessionEnd::Rendered => {}
        end => info!(
            ?end,
            page = report.final_page,
            pages = report.maximum_pages,
            "session finished"
        ),
    }
    Ok(())
}
