//! Event-bus protocol shared by all runtime components.
//!
//! This module defines all message payloads exchanged between the command
//! hosts, the playback controller, the stream engine backend, and the
//! station resolver worker.

/// Top-level envelope for all bus traffic.
#[derive(Debug, Clone)]
pub enum Message {
    Control(ControlMessage),
    Engine(EngineMessage),
    Resolver(ResolverMessage),
    Session(SessionMessage),
}

/// Last explicitly requested playback disposition, independent of whether
/// the engine is currently buffering or ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackIntent {
    Playing,
    Paused,
    Stopped,
}

/// Inbound commands from any host: the stdin remote, OS media controls, or
/// an embedding application.
#[derive(Debug, Clone)]
pub enum ControlMessage {
    /// Replaces the current station and kicks off resolution of `reference`.
    SetStation { title: String, reference: String },
    SetDefaultArtwork(ArtworkImage),
    Play,
    Pause,
    Stop,
    /// Queue traversal is owned by the hosting application; the controller
    /// leaves these on the bus for it.
    Next,
    Previous,
    Reset,
    Shutdown,
}

impl ControlMessage {
    /// Parses a remote-control payload value. Values outside the remote
    /// vocabulary yield `None` and are dropped by the caller.
    pub fn from_remote_value(value: &str) -> Option<ControlMessage> {
        match value {
            "PLAY" => Some(ControlMessage::Play),
            "PAUSE" => Some(ControlMessage::Pause),
            "NEXT" => Some(ControlMessage::Next),
            "PREVIOUS" => Some(ControlMessage::Previous),
            _ => None,
        }
    }
}

/// Observed engine activity. Produced only by the engine backend; the
/// controller treats it as authoritative and never synthesizes one.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineState {
    Idle,
    Buffering,
    Ready { playing: bool },
    Error(String),
}

/// Engine-originated notifications.
#[derive(Debug, Clone)]
pub enum EngineMessage {
    StateChanged(EngineState),
}

/// Station resolution requests and their generation-tagged completions.
///
/// The generation is captured when the request is posted; completions
/// carrying a superseded generation are discarded on arrival.
#[derive(Debug, Clone)]
pub enum ResolverMessage {
    Request {
        generation: u64,
        reference: String,
    },
    Resolved {
        generation: u64,
        uris: Vec<String>,
    },
    Failed {
        generation: u64,
        reference: String,
        error: String,
    },
}

/// Outbound notifications to the hosting application.
#[derive(Debug, Clone)]
pub enum SessionMessage {
    /// The playing bit of the playback intent flipped.
    PlaybackChanged { playing: bool },
    /// The engine entered or left its buffering phase.
    LoadingChanged { loading: bool },
    /// Reserved for in-stream metadata (title/artist/artwork URL). Not
    /// emitted today; the engine backend does not surface ICY metadata yet.
    MetadataChanged(Vec<String>),
    /// A soft failure the host may want to display. Playback state is left
    /// as it was.
    PlaybackError(String),
}

/// An artwork reference validated by decoding it once at fetch time.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtworkImage {
    pub url: String,
    pub width: u32,
    pub height: u32,
}

/// Minimal projection of station metadata and engine state that the status
/// surface renders.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub title: String,
    pub playing: bool,
    pub artwork_url: Option<String>,
}
