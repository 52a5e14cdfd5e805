mod artwork;
mod config;
mod mpv_backend;
mod player_controller;
mod protocol;
mod station_resolver;
mod status_surface;
mod stream_engine;

use std::io::BufRead;
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::broadcast::{self, Sender};

use config::{sanitize_config, Config};
use mpv_backend::MpvBackend;
use player_controller::PlayerController;
use protocol::{ControlMessage, Message, SessionMessage};
use station_resolver::{ResolverWorker, StationResolver};
use status_surface::MediaControlsSurface;
use stream_engine::StreamEngine;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut clog = colog::default_builder();
    clog.filter(None, log::LevelFilter::Debug);
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let config_root = dirs::config_dir().unwrap().join("airtune");
    let config_file = config_root.join("config.toml");

    if let Err(err) = std::fs::create_dir_all(&config_root) {
        return Err(format!(
            "Failed to create config directory {}: {}",
            config_root.display(),
            err
        )
        .into());
    }

    if !config_file.exists() {
        let default_config = Config::default();
        info!(
            "Config file not found. Creating default config. path={}",
            config_file.display()
        );
        std::fs::write(
            config_file.clone(),
            toml::to_string(&default_config).unwrap(),
        )
        .unwrap();
    }

    let config_content = std::fs::read_to_string(config_file).unwrap();
    let config = sanitize_config(toml::from_str::<Config>(&config_content).unwrap_or_default());

    // Bus for communication between components
    let (bus_sender, _) = broadcast::channel(1024);

    // A controller without an engine is useless; failing to spawn the
    // player process is fatal.
    let backend = MpvBackend::spawn(&config.engine)?;
    let engine = StreamEngine::new(Box::new(backend), bus_sender.clone());
    let surface = MediaControlsSurface::new(bus_sender.clone());

    // Setup the playback controller
    let controller_consumer = bus_sender.subscribe();
    let controller_producer = bus_sender.clone();
    let controller_thread = thread::spawn(move || {
        let mut controller =
            PlayerController::new(controller_consumer, controller_producer, engine, Box::new(surface));
        controller.run();
    });

    // Setup the resolver worker
    let resolver = StationResolver::new(
        Duration::from_secs(config.network.connect_timeout_secs),
        Duration::from_secs(config.network.read_timeout_secs),
    );
    let worker_consumer = bus_sender.subscribe();
    let worker_producer = bus_sender.clone();
    thread::spawn(move || {
        let mut worker = ResolverWorker::new(worker_consumer, worker_producer, resolver);
        worker.run();
    });

    spawn_session_listener(&bus_sender);

    // Load the configured station.
    let _ = bus_sender.send(Message::Control(ControlMessage::SetStation {
        title: config.station.title.clone(),
        reference: config.station.url.clone(),
    }));

    // Validate the configured artwork off the main thread; failures fall
    // back silently to no artwork. Loading a station clears the default
    // artwork, so this runs after the startup load is posted.
    if !config.station.artwork_url.is_empty() {
        let artwork_url = config.station.artwork_url.clone();
        let artwork_sender = bus_sender.clone();
        let network = config.network.clone();
        thread::spawn(move || {
            let http_client = ureq::AgentBuilder::new()
                .timeout_connect(Duration::from_secs(network.connect_timeout_secs))
                .timeout_read(Duration::from_secs(network.read_timeout_secs))
                .build();
            if let Some(artwork) = artwork::fetch_artwork(&http_client, &artwork_url) {
                let _ = artwork_sender.send(Message::Control(ControlMessage::SetDefaultArtwork(
                    artwork,
                )));
            }
        });
    }

    run_command_host(&bus_sender);

    let _ = bus_sender.send(Message::Control(ControlMessage::Shutdown));
    if controller_thread.join().is_err() {
        error!("Controller thread terminated abnormally");
    }

    info!("Application exiting");
    Ok(())
}

/// Mirrors outbound session notifications to the hosting side of the
/// process in the remote wire vocabulary.
fn spawn_session_listener(bus_sender: &Sender<Message>) {
    let mut session_consumer = bus_sender.subscribe();
    thread::spawn(move || loop {
        match session_consumer.blocking_recv() {
            Ok(Message::Session(event)) => match event {
                SessionMessage::PlaybackChanged { playing } => {
                    info!("state_changed: state={}", playing);
                }
                SessionMessage::LoadingChanged { loading } => {
                    info!(
                        "loading_data_changed: {}",
                        if loading { "loading" } else { "not loading" }
                    );
                }
                SessionMessage::MetadataChanged(metadata) => {
                    info!("metadata_changed: {:?}", metadata);
                }
                SessionMessage::PlaybackError(err) => {
                    warn!("playback error: {}", err);
                }
            },
            Ok(Message::Control(ControlMessage::Next)) => {
                info!("Queue command NEXT is left to the hosting application");
            }
            Ok(Message::Control(ControlMessage::Previous)) => {
                info!("Queue command PREVIOUS is left to the hosting application");
            }
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Session listener lagged on the bus, skipped {} message(s)", skipped);
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    });
}

/// Reads line commands from stdin until `QUIT` or EOF.
///
/// `PLAY`/`PAUSE`/`NEXT`/`PREVIOUS` are the remote vocabulary; `STOP`,
/// `RESET`, and `LOAD <title>|<url>` are host-side extras. Anything else is
/// dropped silently.
fn run_command_host(bus_sender: &Sender<Message>) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == "QUIT" {
            break;
        }
        match parse_host_command(trimmed) {
            Some(command) => {
                let _ = bus_sender.send(Message::Control(command));
            }
            None => debug!("Dropping unrecognized command '{}'", trimmed),
        }
    }
}

fn parse_host_command(line: &str) -> Option<ControlMessage> {
    if let Some(rest) = line.strip_prefix("LOAD ") {
        let (title, reference) = rest.split_once('|')?;
        return Some(ControlMessage::SetStation {
            title: title.trim().to_string(),
            reference: reference.trim().to_string(),
        });
    }
    match line {
        "STOP" => Some(ControlMessage::Stop),
        "RESET" => Some(ControlMessage::Reset),
        _ => ControlMessage::from_remote_value(line),
    }
}
