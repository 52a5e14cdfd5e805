//! mpv-backed playback engine.
//!
//! Drives a headless `mpv` subprocess over its JSON IPC socket. Command
//! writes happen on the controller thread; a dedicated reader thread folds
//! observed property changes (`idle-active`, `pause`, `paused-for-cache`)
//! into engine-state callbacks. The IPC socket is unix-only, so other
//! platforms get a spawn error instead of a backend.

use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::protocol::EngineState;

type StateCallback = Arc<Mutex<Option<Box<dyn Fn(EngineState) + Send + Sync>>>>;

/// Property values pushed by the player, folded into one observed state.
#[derive(Debug, Default)]
struct ObservedProperties {
    idle_active: bool,
    pause: bool,
    paused_for_cache: bool,
}

impl ObservedProperties {
    /// Applies one IPC event; returns the derived state when the event
    /// affected it.
    fn apply(&mut self, event: &Value) -> Option<EngineState> {
        match event.get("event").and_then(Value::as_str) {
            Some("property-change") => {
                let name = event.get("name").and_then(Value::as_str)?;
                let data = event.get("data").and_then(Value::as_bool).unwrap_or(false);
                match name {
                    "idle-active" => self.idle_active = data,
                    "pause" => self.pause = data,
                    "paused-for-cache" => self.paused_for_cache = data,
                    _ => return None,
                }
                Some(self.derive())
            }
            Some("end-file") => {
                let reason = event.get("reason").and_then(Value::as_str).unwrap_or("");
                if reason != "error" {
                    return None;
                }
                let detail = event
                    .get("file_error")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown playback error");
                Some(EngineState::Error(detail.to_string()))
            }
            _ => None,
        }
    }

    fn derive(&self) -> EngineState {
        if self.idle_active {
            EngineState::Idle
        } else if self.paused_for_cache {
            EngineState::Buffering
        } else {
            EngineState::Ready {
                playing: !self.pause,
            }
        }
    }
}

fn set_callback(slot: &StateCallback, callback: Option<Box<dyn Fn(EngineState) + Send + Sync>>) {
    match slot.lock() {
        Ok(mut current) => *current = callback,
        Err(poisoned) => *poisoned.into_inner() = callback,
    }
}

fn emit_state(slot: &StateCallback, state: EngineState) {
    let callback = match slot.lock() {
        Ok(callback) => callback,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(callback) = callback.as_ref() {
        callback(state);
    }
}

#[cfg(unix)]
pub use unix_backend::MpvBackend;

#[cfg(unix)]
mod unix_backend {
    use std::io::{BufRead, BufReader, Write};
    use std::os::unix::net::UnixStream;
    use std::path::{Path, PathBuf};
    use std::process::{Child, Command, Stdio};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    use log::{debug, info, warn};
    use serde_json::{json, Value};

    use super::{emit_state, set_callback, ObservedProperties, StateCallback};
    use crate::config::EngineConfig;
    use crate::protocol::EngineState;
    use crate::stream_engine::EngineBackend;

    const SOCKET_CONNECT_ATTEMPTS: u32 = 50;
    const SOCKET_CONNECT_DELAY: Duration = Duration::from_millis(100);
    const QUIT_REAP_ATTEMPTS: u32 = 20;
    const QUIT_REAP_DELAY: Duration = Duration::from_millis(100);

    pub struct MpvBackend {
        child: Child,
        socket: UnixStream,
        socket_path: PathBuf,
        on_state: StateCallback,
        shutting_down: Arc<AtomicBool>,
        reader_thread: Option<JoinHandle<()>>,
    }

    impl MpvBackend {
        /// Spawns the player process and connects to its IPC socket.
        pub fn spawn(config: &EngineConfig) -> Result<Self, String> {
            let socket_path = if config.ipc_socket.is_empty() {
                std::env::temp_dir().join(format!("airtune-mpv-{}.sock", std::process::id()))
            } else {
                PathBuf::from(&config.ipc_socket)
            };

            let mut child = Command::new(&config.player_command)
                .arg("--no-video")
                .arg("--idle=yes")
                .arg("--no-terminal")
                .arg(format!("--input-ipc-server={}", socket_path.display()))
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
                .map_err(|error| {
                    format!(
                        "Failed to spawn player '{}': {}",
                        config.player_command, error
                    )
                })?;
            info!(
                "MpvBackend: spawned {} (pid {})",
                config.player_command,
                child.id()
            );

            let socket = match Self::connect(&socket_path) {
                Ok(socket) => socket,
                Err(error) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(error);
                }
            };

            let on_state: StateCallback = Arc::new(std::sync::Mutex::new(None));
            let shutting_down = Arc::new(AtomicBool::new(false));
            let mut backend = Self {
                child,
                socket,
                socket_path,
                on_state: Arc::clone(&on_state),
                shutting_down: Arc::clone(&shutting_down),
                reader_thread: None,
            };

            for (id, property) in [(1, "idle-active"), (2, "pause"), (3, "paused-for-cache")] {
                backend.send_command(&[json!("observe_property"), json!(id), json!(property)]);
            }

            let reader = backend
                .socket
                .try_clone()
                .map_err(|error| format!("Failed to clone player IPC socket: {}", error))?;
            backend.reader_thread = Some(thread::spawn(move || {
                Self::read_events(reader, on_state, shutting_down);
            }));
            Ok(backend)
        }

        fn connect(socket_path: &Path) -> Result<UnixStream, String> {
            for _ in 0..SOCKET_CONNECT_ATTEMPTS {
                if let Ok(socket) = UnixStream::connect(socket_path) {
                    return Ok(socket);
                }
                thread::sleep(SOCKET_CONNECT_DELAY);
            }
            Err(format!(
                "Player IPC socket {} never became connectable",
                socket_path.display()
            ))
        }

        fn send_command(&mut self, command: &[Value]) {
            let mut line = json!({ "command": command }).to_string();
            line.push('\n');
            if let Err(error) = self.socket.write_all(line.as_bytes()) {
                warn!("MpvBackend: failed to send command: {}", error);
            }
        }

        fn read_events(socket: UnixStream, on_state: StateCallback, shutting_down: Arc<AtomicBool>) {
            let mut observed = ObservedProperties::default();
            let mut last_emitted: Option<EngineState> = None;
            let reader = BufReader::new(socket);
            for line in reader.lines() {
                let Ok(line) = line else { break };
                let Ok(event) = serde_json::from_str::<Value>(&line) else {
                    continue;
                };
                let Some(next) = observed.apply(&event) else {
                    continue;
                };
                if shutting_down.load(Ordering::SeqCst) {
                    break;
                }
                if last_emitted.as_ref() == Some(&next) {
                    continue;
                }
                debug!("MpvBackend: engine state {:?}", next);
                emit_state(&on_state, next.clone());
                last_emitted = Some(next);
            }
            if !shutting_down.load(Ordering::SeqCst) {
                warn!("MpvBackend: player IPC connection closed unexpectedly");
                emit_state(
                    &on_state,
                    EngineState::Error("player process terminated".to_string()),
                );
            }
        }

        fn reap_child(&mut self) {
            for _ in 0..QUIT_REAP_ATTEMPTS {
                match self.child.try_wait() {
                    Ok(Some(_)) => return,
                    Ok(None) => thread::sleep(QUIT_REAP_DELAY),
                    Err(error) => {
                        warn!("MpvBackend: failed to reap player process: {}", error);
                        return;
                    }
                }
            }
            warn!("MpvBackend: player ignored quit, killing it");
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }

    impl EngineBackend for MpvBackend {
        fn attach(&mut self, on_state: Box<dyn Fn(EngineState) + Send + Sync>) {
            set_callback(&self.on_state, Some(on_state));
        }

        fn load(&mut self, uris: &[String]) -> Result<(), String> {
            // Loading must not start playback; force pause before replacing
            // the queue.
            self.send_command(&[json!("set_property"), json!("pause"), json!(true)]);
            for (index, uri) in uris.iter().enumerate() {
                let mode = if index == 0 { "replace" } else { "append" };
                self.send_command(&[json!("loadfile"), json!(uri), json!(mode)]);
            }
            Ok(())
        }

        fn prepare(&mut self) {
            // mpv buffers on loadfile; there is no separate prepare step.
            debug!("MpvBackend: prepare requested");
        }

        fn set_playing(&mut self, playing: bool) {
            self.send_command(&[json!("set_property"), json!("pause"), json!(!playing)]);
        }

        fn seek_to_start(&mut self) {
            self.send_command(&[json!("seek"), json!("0"), json!("absolute")]);
        }

        fn stop(&mut self) {
            self.send_command(&[json!("stop")]);
        }

        fn release(&mut self) {
            self.shutting_down.store(true, Ordering::SeqCst);
            set_callback(&self.on_state, None);
            self.send_command(&[json!("quit")]);
            self.reap_child();
            if let Some(reader) = self.reader_thread.take() {
                let _ = reader.join();
            }
            let _ = std::fs::remove_file(&self.socket_path);
            info!("MpvBackend: released");
        }
    }
}

#[cfg(not(unix))]
use crate::config::EngineConfig;
#[cfg(not(unix))]
use crate::stream_engine::EngineBackend;

#[cfg(not(unix))]
pub struct MpvBackend {
    on_state: StateCallback,
}

#[cfg(not(unix))]
impl MpvBackend {
    pub fn spawn(_config: &EngineConfig) -> Result<Self, String> {
        Err("The player IPC backend requires unix sockets; this platform is not wired yet"
            .to_string())
    }
}

#[cfg(not(unix))]
impl EngineBackend for MpvBackend {
    fn attach(&mut self, on_state: Box<dyn Fn(EngineState) + Send + Sync>) {
        set_callback(&self.on_state, Some(on_state));
    }

    fn load(&mut self, _uris: &[String]) -> Result<(), String> {
        Err("no playback engine on this platform".to_string())
    }

    fn prepare(&mut self) {}

    fn set_playing(&mut self, _playing: bool) {}

    fn seek_to_start(&mut self) {}

    fn stop(&mut self) {}

    fn release(&mut self) {
        set_callback(&self.on_state, None);
    }
}
