use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use vibemonkey::brain::{Brain, ScriptModel};
use vibemonkey::bridge::{PageBridge, PageSource, serve_page_requests};
use vibemonkey::config::{self, EnvOverrides, SettingsStore};
use vibemonkey::face;
use vibemonkey::hands::{self, BrowserSession};
use vibemonkey::presenter;
use vibemonkey::Session;

#[derive(Parser)]
#[command(name = "vibemonkey", about = "Generate userscripts for the page you're looking at")]
struct Cli {
    /// DevTools endpoint of a Chrome started with --remote-debugging-port
    #[arg(long, env = "VIBEMONKEY_CHROME_URL", default_value = "http://127.0.0.1:9222")]
    chrome_url: String,

    /// Settings file (API key, model)
    #[arg(long, env = "VIBEMONKEY_SETTINGS")]
    settings: Option<PathBuf>,

    /// Page to open once the browser is ready
    #[arg(long)]
    start_url: Option<String>,

    /// Panel port; the next nine are tried if it is taken
    #[arg(long, global = true, env = "VIBEMONKEY_PORT", default_value_t = 3000)]
    port: u16,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the web panel (default)
    Serve,
    /// Generate one script for the active tab and print it
    Generate {
        /// What the script should do
        goal: String,

        /// Also save the script into this directory
        #[arg(long)]
        save_dir: Option<PathBuf>,

        /// Save into the download directory
        #[arg(long, conflicts_with = "save_dir")]
        save: bool,

        /// Copy the script to the clipboard
        #[arg(long)]
        copy: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let settings_path = cli.settings.clone().unwrap_or_else(config::default_settings_path);
    let store = SettingsStore::open(settings_path, EnvOverrides::from_env())?;

    let bridge = start_page_worker(&cli.chrome_url, cli.start_url.clone()).await?;
    let session = Session::new(bridge, Brain::new(), store.effective());

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(session, cli.port, store).await,
        Command::Generate {
            goal,
            save_dir,
            save,
            copy,
        } => generate_once(session, &goal, save_dir, save, copy).await,
    }
}

/// Bring up the browser on a blocking thread and hand back the bridge to it.
async fn start_page_worker(chrome_url: &str, start_url: Option<String>) -> Result<PageBridge> {
    let debugger_url = match hands::resolve_debugger_url(chrome_url).await {
        Ok(url) => Some(url),
        Err(e) => {
            warn!("no running Chrome at {} ({:#})", chrome_url, e);
            None
        }
    };

    let session = tokio::task::spawn_blocking(move || {
        BrowserSession::launch(debugger_url, start_url.as_deref())
    })
    .await
    .map_err(|e| anyhow!("Browser launch panicked: {}", e))??;

    let (bridge, rx) = PageBridge::channel();
    tokio::task::spawn_blocking(move || serve_page_requests(rx, session));
    Ok(bridge)
}

async fn generate_once<P: PageSource, M: ScriptModel>(
    mut session: Session<P, M>,
    goal: &str,
    save_dir: Option<PathBuf>,
    save: bool,
    copy: bool,
) -> Result<()> {
    let script = session
        .generate(goal, |stage| info!("{}", stage.message()))
        .await
        .map_err(|e| anyhow!("{}", e))?;

    println!("{}", script.text);

    if copy {
        presenter::copy_to_clipboard(script);
    }
    let dir = match (save_dir, save) {
        (Some(dir), _) => Some(dir),
        (None, true) => Some(presenter::default_save_dir()),
        (None, false) => None,
    };
    if let Some(dir) = dir {
        let path = presenter::save_to_dir(script, &dir)?;
        eprintln!("Saved {}", path.display());
    }
    Ok(())
}

async fn serve<P: PageSource, M: ScriptModel>(
    session: Session<P, M>,
    port: u16,
    store: SettingsStore,
) -> Result<()> {
    let (cmd_rx, event_tx) = face::start_server(port).await?;
    info!("ready, waiting for the panel");
    face::run_session(session, cmd_rx, event_tx, store).await;
    Ok(())
}
