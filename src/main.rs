//! Terminal client for the Hopfield memory service.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use hopgrid::paths::AppPaths;
use hopgrid::render::energy_label;
use hopgrid::{
    GridView, HttpBackend, RenderSurface, Session, SessionConfig, Submission, SweepCamera,
    TextSurface,
};

#[derive(Parser)]
#[command(name = "hopgrid")]
#[command(about = "Draw, train and recall 35x35 patterns against a Hopfield memory service", long_about = None)]
struct Cli {
    /// Memory service base URL (overrides the config file)
    #[arg(long, global = true)]
    server: Option<String>,

    /// Config file (defaults to the per-user data directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show how many patterns the service holds
    Count,

    /// Train the service on a grid
    Memorize {
        /// JSON file with a 35x35 array of -1/1 values
        #[arg(short, long)]
        grid: Option<PathBuf>,

        /// Flip each cell with this probability before training
        #[arg(short, long)]
        noise: Option<f64>,
    },

    /// Probe the service with a grid and show the settled state
    Recall {
        /// JSON file with a 35x35 array of -1/1 values
        #[arg(short, long)]
        grid: Option<PathBuf>,
    },

    /// Probe with the most recently stored pattern
    RecallLast,

    /// Show one stored pattern
    Preview {
        index: usize,
    },

    /// Loop over every stored pattern
    Play {
        /// Milliseconds per pattern
        #[arg(short, long)]
        interval: Option<u64>,

        /// Number of patterns to show before exiting
        #[arg(short, long, default_value_t = 6)]
        ticks: u32,
    },

    /// Erase the service's memory
    Clear,

    /// Sample the synthetic camera into the grid
    Capture {
        /// Milliseconds between frames
        #[arg(short, long)]
        interval: Option<u64>,

        /// Number of frames to sample before exiting
        #[arg(short, long, default_value_t = 5)]
        ticks: u32,

        /// Train on every sampled frame
        #[arg(short, long)]
        auto_train: bool,
    },
}

type Surfaces = RenderSurface<TextSurface, TextSurface>;

fn present(surfaces: &Surfaces, view: &GridView) {
    println!("revision {}", view.revision);
    let cells = surfaces.cells.to_string();
    let values = surfaces.values.to_string();
    for (c, v) in cells.lines().zip(values.lines()) {
        println!("{c}  |{v}|");
    }
    println!("{}", energy_label(view.energy));
}

fn show(view: &GridView) {
    let mut surfaces = RenderSurface::new(TextSurface::cells(), TextSurface::values());
    surfaces.render(view);
    present(&surfaces, view);
}

fn read_grid(path: &Path) -> Result<Vec<Vec<i64>>, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read grid file {:?}: {}", path, e))?;
    Ok(serde_json::from_str(&text)?)
}

/// Print every grid change for `total`, then return.
async fn follow_for(session: &Session<HttpBackend>, total: Duration) {
    let mut surfaces = RenderSurface::new(TextSurface::cells(), TextSurface::values());
    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    let rx = session.grid().subscribe();
    tokio::join!(surfaces.follow(rx, cancel, present), async move {
        tokio::time::sleep(total).await;
        stopper.cancel();
    });
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => AppPaths::new()?.config_file(),
    };
    let mut config = SessionConfig::load_or_default(&config_path);
    if let Some(server) = cli.server {
        config.server_url = server;
    }
    match &cli.command {
        Commands::Memorize { noise: Some(p), .. } => config.noise_probability = *p,
        Commands::Play {
            interval: Some(ms), ..
        } => config.playback_interval_ms = *ms,
        Commands::Capture {
            interval: Some(ms), ..
        } => config.capture_interval_ms = *ms,
        _ => {}
    }

    let backend = HttpBackend::new(&config.server_url, config.request_timeout())?;
    info!(server = backend.base_url(), "connecting");
    let session = Session::open(backend, config).await;

    match cli.command {
        Commands::Count => {
            let index = session.refresh_patterns().await?;
            println!("patterns: {}", index.len());
        }
        Commands::Memorize { grid, noise } => {
            if let Some(path) = grid {
                session.load_grid(&read_grid(&path)?)?;
            }
            if noise.is_some() {
                session.add_noise();
            }
            show(&session.grid().snapshot());
            match session.memorize().await? {
                Submission::Stored => println!("stored; patterns: {}", session.patterns().len()),
                Submission::Dropped => println!("dropped: another memorize is pending"),
            }
        }
        Commands::Recall { grid } => {
            if let Some(path) = grid {
                session.load_grid(&read_grid(&path)?)?;
            }
            session.recall().await?;
            show(&session.grid().snapshot());
        }
        Commands::RecallLast => {
            if session.recall_last().await?.is_some() {
                show(&session.grid().snapshot());
            }
        }
        Commands::Preview { index } => {
            if session.preview(index).await? {
                show(&session.grid().snapshot());
            }
        }
        Commands::Play { ticks, .. } => {
            if session.start_playback().await? {
                let total = session.config().playback_interval() * ticks;
                follow_for(&session, total).await;
            }
        }
        Commands::Clear => {
            session.clear_memory().await?;
            println!("memory cleared");
        }
        Commands::Capture {
            ticks, auto_train, ..
        } => {
            let camera = SweepCamera::new(320, 240);
            let auto_train = auto_train || session.config().auto_train;
            if auto_train {
                session.start_auto_train(camera).await?;
            } else {
                session.start_capture(camera).await?;
            }
            // Half an interval of slack so the last frame lands.
            let interval = session.config().capture_interval();
            let total = interval * ticks + interval / 2;
            follow_for(&session, total).await;
            session.stop_capture().await;
            if auto_train {
                println!("patterns: {}", session.refresh_patterns().await?.len());
            }
        }
    }

    session.shutdown().await;
    Ok(())
}
