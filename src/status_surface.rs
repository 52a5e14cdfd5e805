//! OS status surface bridge (MPRIS/SMTC/Now Playing).
//!
//! Publishes the current station snapshot through `souvlaki` and feeds
//! control activations back onto the bus as commands. The surface never
//! calls into the controller directly; activations round-trip through the
//! bus like every other command.

use std::sync::{Arc, Mutex};

use log::warn;
use souvlaki::{
    MediaControlEvent, MediaControls, MediaMetadata, MediaPlayback, PlatformConfig,
};
use tokio::sync::broadcast::Sender;

use crate::protocol::{ControlMessage, Message, StatusSnapshot};

const STATUS_SURFACE_DISPLAY_NAME: &str = "Airtune";
const STATUS_SURFACE_DBUS_NAME: &str = "airtune";

/// Rendering seam between the controller and the OS surface.
pub trait SurfacePublisher: Send {
    /// Renders `snapshot`. Must be idempotent: repeated calls with an
    /// unchanged snapshot update nothing.
    fn render(&mut self, snapshot: &StatusSnapshot);
    /// Removes the surface at teardown.
    fn clear(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlaybackPublishState {
    Stopped,
    Paused,
    Playing,
}

/// `souvlaki`-backed status surface.
pub struct MediaControlsSurface {
    controls: Option<MediaControls>,
    playing_state: Arc<Mutex<bool>>,
    last_published_playback: Option<PlaybackPublishState>,
    last_published_metadata: Option<(String, Option<String>)>,
}

impl MediaControlsSurface {
    /// Creates the surface and attempts to initialize platform media
    /// controls. Control activations are sent to the bus as commands.
    pub fn new(bus_producer: Sender<Message>) -> Self {
        let playing_state = Arc::new(Mutex::new(false));
        let controls = Self::create_controls(bus_producer, Arc::clone(&playing_state));
        Self {
            controls,
            playing_state,
            last_published_playback: None,
            last_published_metadata: None,
        }
    }

    #[cfg(not(target_os = "windows"))]
    fn create_controls(
        bus_producer: Sender<Message>,
        playing_state: Arc<Mutex<bool>>,
    ) -> Option<MediaControls> {
        let mut controls = match MediaControls::new(PlatformConfig {
            display_name: STATUS_SURFACE_DISPLAY_NAME,
            dbus_name: STATUS_SURFACE_DBUS_NAME,
            hwnd: None,
        }) {
            Ok(controls) => controls,
            Err(err) => {
                warn!(
                    "MediaControlsSurface: failed to create media controls backend: {}",
                    err
                );
                return None;
            }
        };

        if let Err(err) = controls.attach(move |event| {
            let playing = match playing_state.lock() {
                Ok(playing) => *playing,
                Err(poisoned) => *poisoned.into_inner(),
            };
            if let Some(command) = Self::map_control_event(event, playing) {
                let _ = bus_producer.send(Message::Control(command));
            }
        }) {
            warn!(
                "MediaControlsSurface: failed to attach media controls handler: {}",
                err
            );
            return None;
        }

        Some(controls)
    }

    #[cfg(target_os = "windows")]
    fn create_controls(
        _bus_producer: Sender<Message>,
        _playing_state: Arc<Mutex<bool>>,
    ) -> Option<MediaControls> {
        // Souvlaki requires an HWND on Windows, which a headless controller
        // does not have.
        warn!("MediaControlsSurface: Windows media controls are disabled without an HWND");
        None
    }

    fn map_control_event(event: MediaControlEvent, playing: bool) -> Option<ControlMessage> {
        match event {
            MediaControlEvent::Play => Some(ControlMessage::Play),
            MediaControlEvent::Pause => Some(ControlMessage::Pause),
            MediaControlEvent::Toggle => {
                if playing {
                    Some(ControlMessage::Pause)
                } else {
                    Some(ControlMessage::Play)
                }
            }
            MediaControlEvent::Next => Some(ControlMessage::Next),
            MediaControlEvent::Previous => Some(ControlMessage::Previous),
            MediaControlEvent::Stop => Some(ControlMessage::Stop),
            MediaControlEvent::Seek(_)
            | MediaControlEvent::SeekBy(_, _)
            | MediaControlEvent::SetPosition(_)
            | MediaControlEvent::SetVolume(_)
            | MediaControlEvent::OpenUri(_)
            | MediaControlEvent::Raise
            | MediaControlEvent::Quit => None,
        }
    }

    fn set_playing_state(&self, playing: bool) {
        match self.playing_state.lock() {
            Ok(mut state) => *state = playing,
            Err(poisoned) => *poisoned.into_inner() = playing,
        }
    }

    fn publish_playback_if_needed(&mut self, desired: PlaybackPublishState) {
        if self.last_published_playback == Some(desired) {
            return;
        }
        let Some(controls) = self.controls.as_mut() else {
            return;
        };
        let playback = match desired {
            PlaybackPublishState::Stopped => MediaPlayback::Stopped,
            PlaybackPublishState::Paused => MediaPlayback::Paused { progress: None },
            PlaybackPublishState::Playing => MediaPlayback::Playing { progress: None },
        };
        if let Err(err) = controls.set_playback(playback) {
            warn!(
                "MediaControlsSurface: failed to publish playback state {:?}: {}",
                desired, err
            );
            return;
        }
        self.last_published_playback = Some(desired);
    }

    fn publish_metadata_if_needed(&mut self, title: &str, artwork_url: Option<&str>) {
        let key = (title.to_string(), artwork_url.map(ToString::to_string));
        if self.last_published_metadata.as_ref() == Some(&key) {
            return;
        }
        let Some(controls) = self.controls.as_mut() else {
            return;
        };
        let publish_result = controls.set_metadata(MediaMetadata {
            title: (!title.is_empty()).then_some(title),
            artist: None,
            album: None,
            cover_url: artwork_url,
            duration: None,
        });
        if let Err(err) = publish_result {
            warn!(
                "MediaControlsSurface: failed to publish metadata: {}",
                err
            );
            return;
        }
        self.last_published_metadata = Some(key);
    }
}

impl SurfacePublisher for MediaControlsSurface {
    fn render(&mut self, snapshot: &StatusSnapshot) {
        self.set_playing_state(snapshot.playing);
        let desired = if snapshot.playing {
            PlaybackPublishState::Playing
        } else {
            PlaybackPublishState::Paused
        };
        self.publish_playback_if_needed(desired);
        self.publish_metadata_if_needed(&snapshot.title, snapshot.artwork_url.as_deref());
    }

    fn clear(&mut self) {
        self.set_playing_state(false);
        self.publish_playback_if_needed(PlaybackPublishState::Stopped);
        self.publish_metadata_if_needed("", None);
        if let Some(mut controls) = self.controls.take() {
            if let Err(err) = controls.detach() {
                warn!("MediaControlsSurface: failed to detach controls: {}", err);
            }
        }
        self.last_published_playback = None;
        self.last_published_metadata = None;
    }
}
