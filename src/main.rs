use trackplay::cli::Args;
use trackplay::config::{self, AppConfig, PathConfig};
use trackplay::core::player_events::{AlgorithmFaultEvent, NotifyEvent, NotifyLevel};
use trackplay::core::{EventBus, PlaybackController, PlaybackState, Player, TrackingWorker, downcast_event};
use trackplay::entities::{DefaultOpener, export_csv};
use trackplay::plugin::PluginRegistry;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{debug, error, info, warn};
use std::io::{BufWriter, Write};
use std::sync::Arc;
use std::time::Duration;

fn init_logging(args: &Args, path_config: &PathConfig) -> Result<()> {
    // 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt
            .as_ref()
            .cloned()
            .unwrap_or_else(|| config::data_file(config::LOG_FILE, path_config));

        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();

        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Console logging (respects RUST_LOG if set)
        let default_level = match args.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

/// Route queued notifications to the log and stderr.
fn drain_events(bus: &EventBus) {
    for event in bus.poll() {
        if let Some(note) = downcast_event::<NotifyEvent>(&event) {
            match note.level {
                NotifyLevel::Info => info!("{}", note.message),
                NotifyLevel::Warning => warn!("{}", note.message),
                NotifyLevel::Error => error!("{}", note.message),
            }
            if note.level != NotifyLevel::Info {
                eprintln!("{}: {}", note.level, note.message);
            }
        } else if let Some(fault) = downcast_event::<AlgorithmFaultEvent>(&event) {
            debug!("Algorithm fault: {:?}", fault);
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let path_config = PathConfig::from_env_and_cli(args.config_dir.clone());
    if let Err(e) = config::ensure_data_dir(&path_config) {
        eprintln!("Warning: {:#}", e);
    }
    init_logging(&args, &path_config)?;

    info!("trackplay starting...");
    debug!("Command-line args: {:?}", args);

    let mut app_config = AppConfig::load_or_default(&path_config)?;
    if let Some(fps) = args.fps {
        app_config.target_fps = fps;
    }
    if args.no_track {
        app_config.tracking_enabled = false;
    }

    let mut registry = PluginRegistry::with_builtins();
    let found = registry.discover(&app_config.plugin_search_path(&path_config));
    debug!("{} plugin manifest(s) registered", found);

    if args.list_algorithms {
        for name in registry.names() {
            let origin = registry
                .origin(name)
                .map(|o| o.to_string())
                .unwrap_or_default();
            println!("{:<24} {}", name, origin);
        }
        return Ok(());
    }

    let Some(spec) = args.source_spec() else {
        bail!("Nothing to play: pass image files, --pattern, --video or --camera");
    };

    let bus = EventBus::new();
    let worker = Arc::new(TrackingWorker::spawn(&app_config, bus.clone()));
    let opener = Arc::new(DefaultOpener::new(app_config.default_source_fps));
    let player = Player::new(&app_config, bus.clone(), Arc::clone(&worker), opener);
    let controller = PlaybackController::spawn(player);

    let algorithm = args.algorithm.clone().or_else(|| app_config.default_algorithm.clone());
    if let Some(name) = algorithm {
        let plugin = registry.create(&name)?;
        let archive = args.save.clone().or_else(|| args.load.clone());
        controller.activate(plugin, archive);
        info!("Algorithm '{}' active", name);
    }

    if let Some(path) = &args.load {
        let objects = worker
            .load(Some(path.clone()))
            .with_context(|| format!("Failed to load archive: {}", path.display()))?;
        info!("Loaded {} trajectories", objects);
    }

    if !controller.open(spec.clone()) {
        drain_events(&bus);
        bail!("Failed to open {}", spec);
    }

    if controller.play() {
        loop {
            std::thread::sleep(Duration::from_millis(20));
            drain_events(&bus);
            match controller.state() {
                Some(PlaybackState::Play) => continue,
                Some(state) => {
                    debug!("Playback finished in state {}", state);
                    break;
                }
                None => bail!("Playback thread is gone"),
            }
        }
    }
    worker.flush();
    drain_events(&bus);

    let snapshot = controller.snapshot();
    if let Some(snap) = &snapshot {
        info!(
            "Played {} frames at {:.1} fps, skipped {}, {} pacing violations",
            snap.stats.frames_played, snap.stats.measured_fps, snap.stats.frames_skipped, snap.stats.pacing_violations
        );
    }

    if let Some(path) = &args.save {
        let written = worker
            .save(Some(path.clone()))
            .with_context(|| format!("Failed to save archive: {}", path.display()))?;
        println!("Saved trajectories to {}", written.display());
    }

    if let Some(path) = &args.export_csv {
        let range = args
            .export_range()
            .or_else(|| snapshot.and_then(|s| s.markers.range()));
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create CSV: {}", path.display()))?;
        let mut out = BufWriter::new(file);
        let rows = worker.with_store(|store| export_csv(store, range, &mut out))?;
        out.flush()?;
        println!("Exported {} rows to {}", rows, path.display());
    }

    println!("{} trajectories", worker.with_store(|store| store.len()));
    drop(controller);
    Ok(())
}
