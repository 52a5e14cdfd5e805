//! Persistent application configuration model and defaults.

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Station loaded at startup before any host command arrives.
    pub station: StationConfig,
    #[serde(default)]
    /// HTTP timeouts for playlist and artwork fetches.
    pub network: NetworkConfig,
    #[serde(default)]
    /// Playback engine process settings.
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct StationConfig {
    #[serde(default = "default_station_title")]
    pub title: String,
    #[serde(default = "default_station_url")]
    pub url: String,
    /// Artwork published with the status surface. Empty disables it.
    #[serde(default)]
    pub artwork_url: String,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            title: default_station_title(),
            url: default_station_url(),
            artwork_url: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NetworkConfig {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct EngineConfig {
    /// Player binary driven over JSON IPC.
    #[serde(default = "default_player_command")]
    pub player_command: String,
    /// Override for the IPC socket path. Empty picks a per-process path in
    /// the temp directory.
    #[serde(default)]
    pub ipc_socket: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            player_command: default_player_command(),
            ipc_socket: String::new(),
        }
    }
}

fn default_station_title() -> String {
    "SomaFM Groove Salad".to_string()
}

fn default_station_url() -> String {
    "https://somafm.com/groovesalad.pls".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_read_timeout_secs() -> u64 {
    7
}

fn default_player_command() -> String {
    "mpv".to_string()
}

/// Clamps loaded values into ranges the runtime can tolerate.
pub fn sanitize_config(config: Config) -> Config {
    let mut config = config;
    config.network.connect_timeout_secs = config.network.connect_timeout_secs.clamp(1, 60);
    config.network.read_timeout_secs = config.network.read_timeout_secs.clamp(1, 120);
    if config.engine.player_command.trim().is_empty() {
        config.engine.player_command = default_player_command();
    }
    config
}
