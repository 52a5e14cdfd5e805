//! Playback engine facade.
//!
//! `EngineBackend` is the seam to the opaque playback engine; `StreamEngine`
//! is the thin facade the controller drives. Backend state callbacks are
//! marshalled onto the bus so they join the controller's serialized event
//! loop instead of touching controller state from a foreign thread.

use log::{debug, warn};
use tokio::sync::broadcast::Sender;

use crate::protocol::{EngineMessage, EngineState, Message};

/// Control surface of the opaque playback engine.
///
/// Implementations deliver observed-state changes exclusively through the
/// callback installed with `attach`, and must stop delivering them once
/// `release` has run.
pub trait EngineBackend: Send {
    fn attach(&mut self, on_state: Box<dyn Fn(EngineState) + Send + Sync>);
    /// Replaces the queued media with `uris`, rewound to the start. Must not
    /// begin playback on its own.
    fn load(&mut self, uris: &[String]) -> Result<(), String>;
    /// Asks the engine to buffer the queued media.
    fn prepare(&mut self);
    fn set_playing(&mut self, playing: bool);
    fn seek_to_start(&mut self);
    fn stop(&mut self);
    /// Detaches callbacks and frees the engine.
    fn release(&mut self);
}

pub struct StreamEngine {
    backend: Box<dyn EngineBackend>,
    released: bool,
}

impl StreamEngine {
    /// Wraps `backend` and wires its state callbacks onto the bus.
    pub fn new(mut backend: Box<dyn EngineBackend>, bus_producer: Sender<Message>) -> Self {
        backend.attach(Box::new(move |state| {
            let _ = bus_producer.send(Message::Engine(EngineMessage::StateChanged(state)));
        }));
        Self {
            backend,
            released: false,
        }
    }

    /// Stops current playback, clears the queue, rewinds, and enqueues
    /// `uris` without starting playback. Empty lists are rejected.
    pub fn load_and_replace(&mut self, uris: &[String]) -> Result<(), String> {
        if uris.is_empty() {
            return Err("Refusing to load an empty stream list".to_string());
        }
        debug!("StreamEngine: loading {} stream(s)", uris.len());
        self.backend.stop();
        self.backend.seek_to_start();
        self.backend.load(uris)
    }

    pub fn set_intent(&mut self, playing: bool) {
        self.backend.set_playing(playing);
    }

    pub fn stop_and_rewind(&mut self) {
        self.backend.seek_to_start();
        self.backend.stop();
    }

    pub fn prepare(&mut self) {
        self.backend.prepare();
    }

    /// Releases the engine. Later calls warn and do nothing so teardown can
    /// be driven from more than one failure path.
    pub fn release(&mut self) {
        if self.released {
            warn!("StreamEngine: release called twice");
            return;
        }
        self.released = true;
        self.backend.release();
    }
}
