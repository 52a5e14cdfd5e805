//! Playback controller state machine.
//!
//! The single serialized owner of playback state. Commands, engine state
//! callbacks, and resolver completions all arrive on the bus and are applied
//! here one at a time, so no two event sources can interleave partial
//! updates. Every transition that changes intent or readiness re-renders
//! the status surface and notifies the session within the same dispatch.

use log::{debug, error, info, warn};
use tokio::sync::broadcast::{Receiver, Sender};

use crate::protocol::{
    ArtworkImage, ControlMessage, EngineMessage, EngineState, Message, PlaybackIntent,
    ResolverMessage, SessionMessage, StatusSnapshot,
};
use crate::status_surface::SurfacePublisher;
use crate::stream_engine::StreamEngine;

/// Metadata for the currently loaded station. Replaced wholesale on every
/// load; stale resolutions of earlier references are discarded by
/// generation.
#[derive(Debug, Clone)]
struct StationMetadata {
    title: String,
    reference: String,
}

pub struct PlayerController {
    bus_consumer: Receiver<Message>,
    bus_producer: Sender<Message>,
    engine: StreamEngine,
    surface: Box<dyn SurfacePublisher>,
    station: Option<StationMetadata>,
    default_artwork: Option<ArtworkImage>,
    intent: PlaybackIntent,
    load_generation: u64,
    loading_published: bool,
    playing_published: bool,
    shut_down: bool,
}

impl PlayerController {
    pub fn new(
        bus_consumer: Receiver<Message>,
        bus_producer: Sender<Message>,
        engine: StreamEngine,
        surface: Box<dyn SurfacePublisher>,
    ) -> Self {
        Self {
            bus_consumer,
            bus_producer,
            engine,
            surface,
            station: None,
            default_artwork: None,
            intent: PlaybackIntent::Stopped,
            load_generation: 0,
            loading_published: false,
            playing_published: false,
            shut_down: false,
        }
    }

    /// Starts the blocking controller loop. Returns after shutdown, at
    /// which point the engine is released and the surface cleared.
    pub fn run(&mut self) {
        info!("PlayerController: started");
        loop {
            match self.bus_consumer.blocking_recv() {
                Ok(message) => {
                    if !self.dispatch(message) {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("PlayerController: bus lagged by {} messages", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
        info!("PlayerController: stopped");
    }

    /// Applies one bus message. Returns `false` once the controller has
    /// shut down and the loop should exit.
    fn dispatch(&mut self, message: Message) -> bool {
        if self.shut_down {
            // Late commands or callbacks racing teardown are dropped here
            // instead of touching released state.
            debug!("PlayerController: ignoring message after shutdown");
            return false;
        }
        match message {
            Message::Control(control) => self.handle_control(control),
            Message::Engine(EngineMessage::StateChanged(state)) => {
                self.handle_engine_state(state);
                true
            }
            Message::Resolver(resolver) => {
                self.handle_resolver(resolver);
                true
            }
            Message::Session(_) => true,
        }
    }

    fn handle_control(&mut self, control: ControlMessage) -> bool {
        match control {
            ControlMessage::SetStation { title, reference } => {
                self.set_station(title, reference);
                true
            }
            ControlMessage::SetDefaultArtwork(artwork) => {
                debug!(
                    "PlayerController: default artwork set to {} ({}x{})",
                    artwork.url, artwork.width, artwork.height
                );
                self.default_artwork = Some(artwork);
                self.render_surface();
                true
            }
            ControlMessage::Play => {
                self.apply_intent(true);
                true
            }
            ControlMessage::Pause => {
                self.apply_intent(false);
                true
            }
            ControlMessage::Stop | ControlMessage::Reset => {
                self.stop_and_rewind();
                true
            }
            ControlMessage::Next | ControlMessage::Previous => {
                // Queue traversal is owned by the hosting application; the
                // command stays on the bus for it.
                debug!("PlayerController: queue command left to the host");
                true
            }
            ControlMessage::Shutdown => {
                self.shutdown();
                false
            }
        }
    }

    fn set_station(&mut self, title: String, reference: String) {
        self.load_generation += 1;
        info!(
            "PlayerController: loading '{}' from {} (generation {})",
            title, reference, self.load_generation
        );
        self.station = Some(StationMetadata {
            title,
            reference: reference.clone(),
        });
        self.default_artwork = None;
        self.render_surface();
        let _ = self.bus_producer.send(Message::Resolver(ResolverMessage::Request {
            generation: self.load_generation,
            reference,
        }));
    }

    fn handle_resolver(&mut self, message: ResolverMessage) {
        match message {
            // Requests are consumed by the resolver worker.
            ResolverMessage::Request { .. } => {}
            ResolverMessage::Resolved { generation, uris } => {
                if generation != self.load_generation {
                    debug!(
                        "PlayerController: discarding stale resolution (generation {}, current {})",
                        generation, self.load_generation
                    );
                    return;
                }
                let reference = self
                    .station
                    .as_ref()
                    .map(|station| station.reference.clone())
                    .unwrap_or_default();
                match self.engine.load_and_replace(&uris) {
                    Ok(()) => debug!(
                        "PlayerController: {} stream(s) queued for {}",
                        uris.len(),
                        reference
                    ),
                    Err(err) => self.surface_soft_error(err),
                }
            }
            ResolverMessage::Failed {
                generation,
                reference,
                error,
            } => {
                if generation != self.load_generation {
                    debug!(
                        "PlayerController: discarding stale resolution failure for {}",
                        reference
                    );
                    return;
                }
                warn!("PlayerController: failed to resolve {}: {}", reference, error);
                self.surface_soft_error(error);
            }
        }
    }

    fn handle_engine_state(&mut self, state: EngineState) {
        debug!("PlayerController: engine state {:?}", state);
        match state {
            EngineState::Idle => {
                self.publish_loading(false);
                self.engine.prepare();
            }
            EngineState::Buffering => self.publish_loading(true),
            EngineState::Ready { playing } => {
                self.publish_loading(false);
                self.intent = if playing {
                    PlaybackIntent::Playing
                } else {
                    PlaybackIntent::Paused
                };
                self.publish_playing(playing);
                self.render_surface();
            }
            EngineState::Error(diagnostic) => {
                // Intent is deliberately left as-is; retry policy belongs to
                // the hosting application.
                error!("PlayerController: engine error: {}", diagnostic);
                self.publish_loading(false);
                self.surface_soft_error(diagnostic);
            }
        }
    }

    fn apply_intent(&mut self, playing: bool) {
        if self.station.is_none() {
            debug!("PlayerController: no station loaded, ignoring transport command");
            return;
        }
        let desired = if playing {
            PlaybackIntent::Playing
        } else {
            PlaybackIntent::Paused
        };
        if self.intent != desired {
            self.engine.set_intent(playing);
            self.intent = desired;
            self.publish_playing(playing);
        }
        self.render_surface();
    }

    fn stop_and_rewind(&mut self) {
        self.engine.set_intent(false);
        self.engine.stop_and_rewind();
        self.intent = PlaybackIntent::Stopped;
        self.publish_playing(false);
        self.render_surface();
    }

    fn shutdown(&mut self) {
        info!("PlayerController: shutting down");
        self.shut_down = true;
        self.engine.release();
        self.surface.clear();
    }

    fn surface_soft_error(&mut self, error: String) {
        let _ = self
            .bus_producer
            .send(Message::Session(SessionMessage::PlaybackError(error)));
    }

    fn publish_loading(&mut self, loading: bool) {
        if self.loading_published == loading {
            return;
        }
        self.loading_published = loading;
        let _ = self
            .bus_producer
            .send(Message::Session(SessionMessage::LoadingChanged { loading }));
    }

    fn publish_playing(&mut self, playing: bool) {
        if self.playing_published == playing {
            return;
        }
        self.playing_published = playing;
        let _ = self
            .bus_producer
            .send(Message::Session(SessionMessage::PlaybackChanged { playing }));
    }

    fn render_surface(&mut self) {
        let snapshot = StatusSnapshot {
            title: self
                .station
                .as_ref()
                .map(|station| station.title.clone())
                .unwrap_or_default(),
            playing: self.intent == PlaybackIntent::Playing,
            artwork_url: self
                .default_artwork
                .as_ref()
                .map(|artwork| artwork.url.clone()),
        };
        self.surface.render(&snapshot);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tokio::sync::broadcast;

    use super::PlayerController;
    use crate::protocol::{
        ControlMessage, EngineMessage, EngineState, Message, PlaybackIntent, ResolverMessage,
        SessionMessage, StatusSnapshot,
    };
    use crate::status_surface::SurfacePublisher;
    use crate::stream_engine::{EngineBackend, StreamEngine};

    #[derive(Debug, Clone, PartialEq)]
    enum BackendOp {
        Load(Vec<String>),
        Prepare,
        SetPlaying(bool),
        SeekToStart,
        Stop,
        Release,
    }

    #[derive(Default)]
    struct ScriptedBackend {
        ops: Arc<Mutex<Vec<BackendOp>>>,
    }

    impl ScriptedBackend {
        fn record(&self, op: BackendOp) {
            self.ops.lock().expect("ops lock").push(op);
        }
    }

    impl EngineBackend for ScriptedBackend {
        fn attach(&mut self, _on_state: Box<dyn Fn(EngineState) + Send + Sync>) {}

        fn load(&mut self, uris: &[String]) -> Result<(), String> {
            self.record(BackendOp::Load(uris.to_vec()));
            Ok(())
        }

        fn prepare(&mut self) {
            self.record(BackendOp::Prepare);
        }

        fn set_playing(&mut self, playing: bool) {
            self.record(BackendOp::SetPlaying(playing));
        }

        fn seek_to_start(&mut self) {
            self.record(BackendOp::SeekToStart);
        }

        fn stop(&mut self) {
            self.record(BackendOp::Stop);
        }

        fn release(&mut self) {
            self.record(BackendOp::Release);
        }
    }

    #[derive(Default)]
    struct RecordingSurface {
        renders: Arc<Mutex<Vec<StatusSnapshot>>>,
        clears: Arc<Mutex<usize>>,
    }

    impl SurfacePublisher for RecordingSurface {
        fn render(&mut self, snapshot: &StatusSnapshot) {
            self.renders.lock().expect("renders lock").push(snapshot.clone());
        }

        fn clear(&mut self) {
            *self.clears.lock().expect("clears lock") += 1;
        }
    }

    struct Fixture {
        bus_sender: broadcast::Sender<Message>,
        controller: PlayerController,
        ops: Arc<Mutex<Vec<BackendOp>>>,
        renders: Arc<Mutex<Vec<StatusSnapshot>>>,
        clears: Arc<Mutex<usize>>,
    }

    fn fixture() -> Fixture {
        let (bus_sender, _) = broadcast::channel(256);
        let backend = ScriptedBackend::default();
        let ops = Arc::clone(&backend.ops);
        let engine = StreamEngine::new(Box::new(backend), bus_sender.clone());
        let surface = RecordingSurface::default();
        let renders = Arc::clone(&surface.renders);
        let clears = Arc::clone(&surface.clears);
        let controller = PlayerController::new(
            bus_sender.subscribe(),
            bus_sender.clone(),
            engine,
            Box::new(surface),
        );
        Fixture {
            bus_sender,
            controller,
            ops,
            renders,
            clears,
        }
    }

    fn set_station(title: &str, reference: &str) -> Message {
        Message::Control(ControlMessage::SetStation {
            title: title.to_string(),
            reference: reference.to_string(),
        })
    }

    fn engine_state(state: EngineState) -> Message {
        Message::Engine(EngineMessage::StateChanged(state))
    }

    /// Queues `messages` plus a final shutdown, runs the controller loop to
    /// completion, and returns the session events it emitted.
    fn run_sequence(fixture: &mut Fixture, messages: Vec<Message>) -> Vec<SessionMessage> {
        let mut session_consumer = fixture.bus_sender.subscribe();
        for message in messages {
            fixture
                .bus_sender
                .send(message)
                .expect("bus send should succeed");
        }
        fixture
            .bus_sender
            .send(Message::Control(ControlMessage::Shutdown))
            .expect("bus send should succeed");
        fixture.controller.run();

        let mut session_events = Vec::new();
        while let Ok(message) = session_consumer.try_recv() {
            if let Message::Session(event) = message {
                session_events.push(event);
            }
        }
        session_events
    }

    fn ops(fixture: &Fixture) -> Vec<BackendOp> {
        fixture.ops.lock().expect("ops lock").clone()
    }

    fn renders(fixture: &Fixture) -> Vec<StatusSnapshot> {
        fixture.renders.lock().expect("renders lock").clone()
    }

    #[test]
    fn test_set_station_posts_resolution_request() {
        let mut fixture = fixture();
        let mut bus_consumer = fixture.bus_sender.subscribe();
        run_sequence(&mut fixture, vec![set_station("Jazz24", "http://x/j.pls")]);

        let mut requested = None;
        while let Ok(message) = bus_consumer.try_recv() {
            if let Message::Resolver(ResolverMessage::Request {
                generation,
                reference,
            }) = message
            {
                requested = Some((generation, reference));
            }
        }
        assert_eq!(requested, Some((1, "http://x/j.pls".to_string())));
        let rendered = renders(&fixture);
        assert_eq!(rendered.len(), 1);
        assert_eq!(rendered[0].title, "Jazz24");
        assert!(!rendered[0].playing);
    }

    #[test]
    fn test_current_resolution_loads_engine() {
        let mut fixture = fixture();
        run_sequence(
            &mut fixture,
            vec![
                set_station("Jazz24", "http://x/j.pls"),
                Message::Resolver(ResolverMessage::Resolved {
                    generation: 1,
                    uris: vec!["http://a.example/s1".to_string()],
                }),
            ],
        );
        assert!(ops(&fixture).contains(&BackendOp::Load(vec!["http://a.example/s1".to_string()])));
    }

    #[test]
    fn test_stale_resolution_is_discarded() {
        let mut fixture = fixture();
        run_sequence(
            &mut fixture,
            vec![
                set_station("A", "http://x/a.pls"),
                set_station("B", "http://x/b.pls"),
                Message::Resolver(ResolverMessage::Resolved {
                    generation: 1,
                    uris: vec!["http://a.example/s1".to_string()],
                }),
                Message::Resolver(ResolverMessage::Resolved {
                    generation: 2,
                    uris: vec!["http://b.example/s2".to_string()],
                }),
            ],
        );
        let loads: Vec<BackendOp> = ops(&fixture)
            .into_iter()
            .filter(|op| matches!(op, BackendOp::Load(_)))
            .collect();
        assert_eq!(
            loads,
            vec![BackendOp::Load(vec!["http://b.example/s2".to_string()])]
        );
    }

    #[test]
    fn test_resolution_failure_is_soft() {
        let mut fixture = fixture();
        let session_events = run_sequence(
            &mut fixture,
            vec![
                set_station("A", "http://x/a.pls"),
                Message::Resolver(ResolverMessage::Failed {
                    generation: 1,
                    reference: "http://x/a.pls".to_string(),
                    error: "unreachable host".to_string(),
                }),
            ],
        );
        assert!(session_events
            .iter()
            .any(|event| matches!(event, SessionMessage::PlaybackError(error) if error == "unreachable host")));
        assert!(!ops(&fixture)
            .iter()
            .any(|op| matches!(op, BackendOp::Load(_))));
    }

    #[test]
    fn test_empty_resolution_is_rejected() {
        let mut fixture = fixture();
        let session_events = run_sequence(
            &mut fixture,
            vec![
                set_station("A", "http://x/a.pls"),
                Message::Resolver(ResolverMessage::Resolved {
                    generation: 1,
                    uris: Vec::new(),
                }),
            ],
        );
        assert!(session_events
            .iter()
            .any(|event| matches!(event, SessionMessage::PlaybackError(_))));
        assert!(!ops(&fixture)
            .iter()
            .any(|op| matches!(op, BackendOp::Load(_))));
    }

    #[test]
    fn test_duplicate_play_changes_intent_once_but_rerenders() {
        let mut fixture = fixture();
        run_sequence(
            &mut fixture,
            vec![
                set_station("A", "http://x/a.mp3"),
                Message::Control(ControlMessage::Play),
                Message::Control(ControlMessage::Play),
            ],
        );
        let intent_changes = ops(&fixture)
            .iter()
            .filter(|op| matches!(op, BackendOp::SetPlaying(true)))
            .count();
        assert_eq!(intent_changes, 1);
        // One render for the station load, one per PLAY.
        assert_eq!(renders(&fixture).len(), 3);
        assert!(renders(&fixture)[2].playing);
    }

    #[test]
    fn test_engine_sequence_emits_events_in_order() {
        let mut fixture = fixture();
        let session_events = run_sequence(
            &mut fixture,
            vec![
                set_station("A", "http://x/a.mp3"),
                engine_state(EngineState::Idle),
                engine_state(EngineState::Buffering),
                engine_state(EngineState::Ready { playing: true }),
            ],
        );
        let relevant: Vec<&SessionMessage> = session_events
            .iter()
            .filter(|event| {
                matches!(
                    event,
                    SessionMessage::LoadingChanged { .. } | SessionMessage::PlaybackChanged { .. }
                )
            })
            .collect();
        assert_eq!(relevant.len(), 3);
        assert!(matches!(
            relevant[0],
            SessionMessage::LoadingChanged { loading: true }
        ));
        assert!(matches!(
            relevant[1],
            SessionMessage::LoadingChanged { loading: false }
        ));
        assert!(matches!(
            relevant[2],
            SessionMessage::PlaybackChanged { playing: true }
        ));
        assert!(ops(&fixture).contains(&BackendOp::Prepare));
    }

    #[test]
    fn test_ready_state_sets_intent() {
        let mut fixture = fixture();
        run_sequence(
            &mut fixture,
            vec![
                set_station("A", "http://x/a.mp3"),
                engine_state(EngineState::Ready { playing: true }),
            ],
        );
        assert_eq!(fixture.controller.intent, PlaybackIntent::Playing);
    }

    #[test]
    fn test_commands_apply_in_arrival_order() {
        let mut fixture = fixture();
        run_sequence(
            &mut fixture,
            vec![
                set_station("A", "http://x/a.mp3"),
                Message::Control(ControlMessage::Play),
                Message::Control(ControlMessage::Pause),
                Message::Control(ControlMessage::Play),
                Message::Control(ControlMessage::Pause),
            ],
        );
        assert_eq!(fixture.controller.intent, PlaybackIntent::Paused);
        let intents: Vec<BackendOp> = ops(&fixture)
            .into_iter()
            .filter(|op| matches!(op, BackendOp::SetPlaying(_)))
            .collect();
        assert_eq!(
            intents,
            vec![
                BackendOp::SetPlaying(true),
                BackendOp::SetPlaying(false),
                BackendOp::SetPlaying(true),
                BackendOp::SetPlaying(false),
            ]
        );
    }

    #[test]
    fn test_transport_commands_without_station_are_ignored() {
        let mut fixture = fixture();
        run_sequence(&mut fixture, vec![Message::Control(ControlMessage::Play)]);
        assert!(ops(&fixture)
            .iter()
            .all(|op| matches!(op, BackendOp::Release)));
        assert!(renders(&fixture).is_empty());
    }

    #[test]
    fn test_stop_rewinds_and_halts() {
        let mut fixture = fixture();
        run_sequence(
            &mut fixture,
            vec![
                set_station("A", "http://x/a.mp3"),
                Message::Control(ControlMessage::Play),
                Message::Control(ControlMessage::Stop),
            ],
        );
        assert_eq!(fixture.controller.intent, PlaybackIntent::Stopped);
        let recorded = ops(&fixture);
        assert!(recorded.contains(&BackendOp::SeekToStart));
        assert!(recorded.contains(&BackendOp::Stop));
    }

    #[test]
    fn test_engine_error_preserves_intent() {
        let mut fixture = fixture();
        let session_events = run_sequence(
            &mut fixture,
            vec![
                set_station("A", "http://x/a.mp3"),
                Message::Control(ControlMessage::Play),
                engine_state(EngineState::Error("decode failure".to_string())),
            ],
        );
        assert_eq!(fixture.controller.intent, PlaybackIntent::Playing);
        assert!(session_events
            .iter()
            .any(|event| matches!(event, SessionMessage::PlaybackError(error) if error == "decode failure")));
    }

    #[test]
    fn test_shutdown_releases_engine_and_clears_surface() {
        let mut fixture = fixture();
        // A resolution still in flight must not keep teardown from
        // completing.
        run_sequence(&mut fixture, vec![set_station("A", "http://x/a.pls")]);
        assert!(ops(&fixture).contains(&BackendOp::Release));
        assert_eq!(*fixture.clears.lock().expect("clears lock"), 1);
    }

    #[test]
    fn test_messages_after_shutdown_are_defensively_ignored() {
        let mut fixture = fixture();
        run_sequence(&mut fixture, vec![]);
        let ops_after_shutdown = ops(&fixture).len();
        assert!(!fixture
            .controller
            .dispatch(Message::Control(ControlMessage::Play)));
        assert!(!fixture.controller.dispatch(engine_state(EngineState::Ready {
            playing: true
        })));
        assert_eq!(ops(&fixture).len(), ops_after_shutdown);
    }
}
