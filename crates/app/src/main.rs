use std::{
    io::BufRead,
    path::{Path, PathBuf},
    str::FromStr,
    sync::{mpsc, Arc},
    thread,
};

use bvh_viewer_core::{
    BvhDocument, FrameDriver, FsFetcher, HeadlessContainer, RealtimeDriver, Result, Toolbar,
    ViewerConfig, ViewerError, ViewerSession, WorkerPool,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::View {
            config,
            assets,
            dataset,
            frames,
            width,
            height,
            fps,
        } => run_view(ViewOptions {
            config,
            assets,
            dataset,
            frames,
            width,
            height,
            fps,
        }),
        Commands::List { config } => run_list(config.as_deref()),
        Commands::Inspect { path } => run_inspect(&path),
    }
}

struct ViewOptions {
    config: Option<PathBuf>,
    assets: Option<PathBuf>,
    dataset: Option<String>,
    frames: Option<u64>,
    width: u32,
    height: u32,
    fps: u32,
}

fn run_view(options: ViewOptions) -> Result<()> {
    let config = load_config(options.config.as_deref())?;
    let asset_root = options.assets.unwrap_or_else(|| config.asset_root.clone());
    tracing::info!(root = %asset_root.display(), width = options.width, height = options.height, "starting viewer");

    let toolbar = Toolbar::new(config.registry());
    let fetcher = Arc::new(FsFetcher::new(asset_root));
    let dispatcher = Arc::new(WorkerPool::with_default_size()?);
    let container = HeadlessContainer::new(options.width, options.height);
    let mut session = ViewerSession::initialize(container, config, fetcher, dispatcher)?;

    match options.dataset.as_deref() {
        Some(query) => session.select_dataset(query)?,
        None => session.load_initial_dataset()?,
    }

    let commands = spawn_command_reader();
    let mut driver = RealtimeDriver::new(options.fps, options.frames);
    let mut frames = 0u64;

    'frames: while let Some(delta) = driver.next_frame() {
        for command in commands.try_iter() {
            if !apply_command(&mut session, &toolbar, command) {
                break 'frames;
            }
        }
        session.pump_loads();
        if session.render_frame(delta)?.is_some() {
            frames += 1;
        }
    }

    tracing::info!(frames, "viewer stopped");
    session.teardown();
    Ok(())
}

/// Returns `false` when the viewer should stop.
fn apply_command(session: &mut ViewerSession<HeadlessContainer>, toolbar: &Toolbar, command: Command) -> bool {
    match command {
        Command::Select(query) => {
            let selected = toolbar
                .select(&query)
                .and_then(|event| bvh_viewer_core::ui::forward(session, event));
            if let Err(err) = selected {
                tracing::warn!(%query, error = %err, "selection ignored");
            }
        }
        Command::Resize(width, height) => {
            if !session.on_resize(width, height) {
                tracing::debug!(width, height, "resize deferred");
            }
        }
        Command::List => print!("{}", toolbar.render_for(session)),
        Command::Status => print_status(session),
        Command::Quit => return false,
    }
    true
}

fn print_status(session: &ViewerSession<HeadlessContainer>) {
    println!(
        "dataset: {}{}",
        session.selected_dataset().unwrap_or("-"),
        if session.is_loading() { " (loading)" } else { "" }
    );
    if let Some(subject) = session.subject() {
        println!(
            "clip: {} ({:.2}s, {} tracks)",
            subject.clip.name,
            subject.clip.duration,
            subject.clip.tracks.len()
        );
    }
    if let Some(renderer) = session.renderer() {
        let (width, height) = renderer.size();
        let stats = renderer.last_frame();
        println!("viewport: {width}x{height} @ {}x", renderer.pixel_ratio());
        println!(
            "frame {}: {} nodes, {} meshes, {} triangles, {} lines, {} bones",
            renderer.frames_rendered(),
            stats.nodes_visited,
            stats.meshes,
            stats.triangles,
            stats.line_segments,
            stats.bones
        );
    }
    if session.pending_prop_loads() > 0 {
        println!("props loading: {}", session.pending_prop_loads());
    }
}

fn spawn_command_reader() -> mpsc::Receiver<Command> {
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name("stdin-commands".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<Command>() {
                    Ok(command) => {
                        if tx.send(command).is_err() {
                            break;
                        }
                    }
                    Err(err) => tracing::warn!(error = %err, "unrecognised command"),
                }
            }
        });
    if let Err(err) = spawned {
        tracing::warn!(error = %err, "stdin commands unavailable");
    }
    rx
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Select(String),
    Resize(u32, u32),
    List,
    Status,
    Quit,
}

impl FromStr for Command {
    type Err = ViewerError;

    fn from_str(line: &str) -> Result<Self> {
        let line = line.trim();
        let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();
        match word.to_ascii_lowercase().as_str() {
            "select" if !rest.is_empty() => Ok(Self::Select(rest.to_string())),
            "resize" => {
                let mut dims = rest.split_whitespace().map(str::parse::<u32>);
                match (dims.next(), dims.next(), dims.next()) {
                    (Some(Ok(width)), Some(Ok(height)), None) => Ok(Self::Resize(width, height)),
                    _ => Err(ViewerError::msg("usage: resize <width> <height>")),
                }
            }
            "list" => Ok(Self::List),
            "status" => Ok(Self::Status),
            "quit" | "exit" => Ok(Self::Quit),
            _ => Err(ViewerError::msg(format!("`{line}`; expected select, resize, list, status or quit"))),
        }
    }
}

fn run_list(config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let toolbar = Toolbar::new(config.registry());
    print!("{}", toolbar.render_text(config.initial_dataset().as_deref(), false));
    Ok(())
}

fn run_inspect(path: &Path) -> Result<()> {
    let source = path.display().to_string();
    let text = std::fs::read_to_string(path).map_err(|err| ViewerError::from(err).with_path(&source))?;
    let document = BvhDocument::parse(&text).map_err(|err| err.with_path(&source))?;
    let skeleton = &document.skeleton;

    for (index, joint) in skeleton.joints.iter().enumerate() {
        let indent = "  ".repeat(skeleton.depth(index));
        if joint.end_site {
            println!("{indent}{} (end site)", joint.name);
        } else {
            println!("{indent}{} [{} channels]", joint.name, joint.channels.len());
        }
    }
    println!(
        "{} joints, {} channels, {} frames at {:.4}s, duration {:.2}s",
        skeleton.joints.len(),
        skeleton.channel_count(),
        document.frame_count(),
        document.motion.frame_time,
        document.duration()
    );
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<ViewerConfig> {
    match path {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading configuration");
            ViewerConfig::load(path)
        }
        None => Ok(ViewerConfig::default()),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless BVH motion-capture viewer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the viewer, reading `select`, `resize`, `list`, `status` and `quit` from stdin.
    View {
        /// JSON configuration file; built-in defaults when omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Directory the dataset and prop paths are resolved against.
        #[arg(short, long)]
        assets: Option<PathBuf>,
        /// Dataset to start with: index, label or path.
        #[arg(short, long)]
        dataset: Option<String>,
        /// Stop after this many frames.
        #[arg(long)]
        frames: Option<u64>,
        #[arg(long, default_value_t = 1280)]
        width: u32,
        #[arg(long, default_value_t = 720)]
        height: u32,
        /// Target frame rate of the render loop.
        #[arg(long, default_value_t = 60)]
        fps: u32,
    },
    /// Print the dataset toolbar.
    List {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Parse a BVH file and print its joint tree and motion summary.
    Inspect {
        path: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!("select 2".parse::<Command>().unwrap(), Command::Select("2".to_string()));
        assert_eq!(
            "select Through Legs".parse::<Command>().unwrap(),
            Command::Select("Through Legs".to_string())
        );
        assert_eq!("resize 800 600".parse::<Command>().unwrap(), Command::Resize(800, 600));
        assert_eq!(" QUIT ".parse::<Command>().unwrap(), Command::Quit);
        assert!("resize 800".parse::<Command>().is_err());
        assert!("select".parse::<Command>().is_err());
        assert!("jump".parse::<Command>().is_err());
    }
}
