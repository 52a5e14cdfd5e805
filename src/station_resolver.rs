//! Station reference resolution.
//!
//! Turns a user-supplied stream reference into the list of playable stream
//! URLs. `.pls` and `.m3u` references are fetched over HTTP and parsed;
//! anything else is treated as a direct stream URL with no network I/O.
//! `ResolverWorker` runs the blocking fetches off the controller thread and
//! posts generation-tagged results back on the bus.

use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::broadcast::{Receiver, Sender};

use crate::protocol::{Message, ResolverMessage};

pub struct StationResolver {
    http_client: ureq::Agent,
}

impl StationResolver {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Self {
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(connect_timeout)
            .timeout_read(read_timeout)
            .build();
        Self { http_client }
    }

    /// Resolves `reference` into one or more stream URLs.
    ///
    /// A `.pls` body can contribute several entries; a `.m3u` body is one
    /// trimmed entry. Playlist extensions are matched against the substring
    /// after the last `.` of the reference, so query strings and fragments
    /// defeat the match and the reference is played directly.
    pub fn resolve(&self, reference: &str) -> Result<Vec<String>, String> {
        match extension(reference) {
            "pls" => {
                let body = self.fetch(reference)?;
                Ok(parse_pls(&body))
            }
            "m3u" => {
                let body = self.fetch(reference)?;
                Ok(parse_m3u(&body))
            }
            _ => Ok(vec![reference.to_string()]),
        }
    }

    fn fetch(&self, url: &str) -> Result<String, String> {
        let response = self
            .http_client
            .get(url)
            .call()
            .map_err(|error| format!("Failed to fetch playlist {}: {}", url, error))?;
        response
            .into_string()
            .map_err(|error| format!("Failed to read playlist {}: {}", url, error))
    }
}

/// Substring after the last `.`, or the whole reference when it has none.
fn extension(reference: &str) -> &str {
    match reference.rsplit('.').next() {
        Some(extension) => extension,
        None => reference,
    }
}

fn parse_pls(body: &str) -> Vec<String> {
    body.lines()
        .filter(|line| line.contains("=http"))
        .filter_map(|line| line.split_once('='))
        .map(|(_, url)| url.to_string())
        .collect()
}

/// One-line playlists only; a multi-entry M3U body is not split line by
/// line.
fn parse_m3u(body: &str) -> Vec<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    vec![trimmed.to_string()]
}

/// Performs blocking station resolution off the controller thread.
pub struct ResolverWorker {
    bus_consumer: Receiver<Message>,
    bus_producer: Sender<Message>,
    resolver: StationResolver,
}

impl ResolverWorker {
    pub fn new(
        bus_consumer: Receiver<Message>,
        bus_producer: Sender<Message>,
        resolver: StationResolver,
    ) -> Self {
        Self {
            bus_consumer,
            bus_producer,
            resolver,
        }
    }

    fn handle_request(&self, generation: u64, reference: String) {
        info!(
            "ResolverWorker: resolving '{}' (generation {})",
            reference, generation
        );
        match self.resolver.resolve(&reference) {
            Ok(uris) => {
                debug!(
                    "ResolverWorker: '{}' resolved to {} stream(s)",
                    reference,
                    uris.len()
                );
                let _ = self
                    .bus_producer
                    .send(Message::Resolver(ResolverMessage::Resolved { generation, uris }));
            }
            Err(error) => {
                warn!("ResolverWorker: '{}' failed: {}", reference, error);
                let _ = self.bus_producer.send(Message::Resolver(ResolverMessage::Failed {
                    generation,
                    reference,
                    error,
                }));
            }
        }
    }

    /// Starts the blocking worker loop.
    pub fn run(&mut self) {
        info!("ResolverWorker: started");
        loop {
            match self.bus_consumer.blocking_recv() {
                Ok(Message::Resolver(ResolverMessage::Request {
                    generation,
                    reference,
                })) => self.handle_request(generation, reference),
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("ResolverWorker: bus lagged by {} messages", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
