//! Speaking notifications for an external emote server
//!
//! Each notification opens a fresh TCP connection, writes the trimmed
//! UTF-8 name and closes. Failures are logged and swallowed.
//!
//! An enabled client delivers notifications from its own thread, in the
//! order they were raised, so a slow or unreachable server never holds up
//! the caller.

use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

use facelink_core::{FaceLinkError, FaceLinkResult};

pub const START_SPEAKING: &str = "startspeaking";
pub const STOP_SPEAKING: &str = "stopspeaking";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmoteConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
}

impl Default for EmoteConfig {
    fn default() -> Self {
        EmoteConfig {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 7777,
            connect_timeout_ms: 250,
        }
    }
}

/// Client for the emote server; a no-op when disabled
#[derive(Debug, Clone)]
pub struct EmoteClient {
    config: EmoteConfig,
    /// Hand-off to the delivery thread; `None` sends inline
    outbox: Option<Sender<String>>,
}

impl EmoteClient {
    pub fn new(config: EmoteConfig) -> Self {
        let mut client = EmoteClient {
            config,
            outbox: None,
        };
        if client.config.enabled {
            client.outbox = client.spawn_delivery();
        }
        client
    }

    /// The thread exits once every clone of the client is dropped
    fn spawn_delivery(&self) -> Option<Sender<String>> {
        let (tx, rx) = crossbeam_channel::unbounded::<String>();
        let delivery = EmoteClient {
            config: self.config.clone(),
            outbox: None,
        };
        let spawned = std::thread::Builder::new()
            .name("facelink-emote".into())
            .spawn(move || {
                for emote in rx {
                    delivery.deliver(&emote);
                }
            });
        match spawned {
            Ok(_) => Some(tx),
            Err(e) => {
                tracing::warn!(error = %e, "emote thread failed to start, sending inline");
                None
            }
        }
    }

    pub fn disabled() -> Self {
        Self::new(EmoteConfig::default())
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Send one emote name
    pub fn send(&self, emote: &str) -> FaceLinkResult<()> {
        let emote = emote.trim();
        if emote.is_empty() {
            return Err(FaceLinkError::Config("empty emote name".into()));
        }
        let addr = (self.config.host.as_str(), self.config.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| FaceLinkError::Config(format!("cannot resolve {}", self.config.host)))?;
        let timeout = Duration::from_millis(self.config.connect_timeout_ms.max(1));
        let mut stream = TcpStream::connect_timeout(&addr, timeout)?;
        stream.write_all(emote.as_bytes())?;
        Ok(())
    }

    /// Queue a send if enabled. Failures are logged by whoever delivers.
    pub fn notify(&self, emote: &str) {
        if !self.config.enabled {
            return;
        }
        match &self.outbox {
            Some(outbox) => {
                if outbox.send(emote.to_string()).is_err() {
                    tracing::warn!(emote, "emote thread gone, dropping notification");
                }
            }
            None => self.deliver(emote),
        }
    }

    fn deliver(&self, emote: &str) {
        if let Err(e) = self.send(emote) {
            tracing::warn!(emote, error = %e, "emote notification failed");
        }
    }

    pub fn start_speaking(&self) {
        self.notify(START_SPEAKING);
    }

    pub fn stop_speaking(&self) {
        self.notify(STOP_SPEAKING);
    }
}

impl Default for EmoteClient {
    fn default() -> Self {
        Self::disabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;
    use std::time::Instant;

    #[test]
    fn test_sends_trimmed_name() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let client = EmoteClient::new(EmoteConfig {
            enabled: true,
            port,
            ..EmoteConfig::default()
        });

        let server = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut received = String::new();
            conn.read_to_string(&mut received).unwrap();
            received
        });

        client.send("  startspeaking \n").unwrap();
        assert_eq!(server.join().unwrap(), START_SPEAKING);
    }

    #[test]
    fn test_notifications_arrive_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let client = EmoteClient::new(EmoteConfig {
            enabled: true,
            port,
            ..EmoteConfig::default()
        });

        client.start_speaking();
        client.stop_speaking();
        client.start_speaking();

        let received: Vec<String> = (0..3)
            .map(|_| {
                let (mut conn, _) = listener.accept().unwrap();
                let mut text = String::new();
                conn.read_to_string(&mut text).unwrap();
                text
            })
            .collect();
        assert_eq!(received, [START_SPEAKING, STOP_SPEAKING, START_SPEAKING]);
    }

    #[test]
    fn test_unreachable_server_does_not_block_caller() {
        // Non-routable: a blocking connect would sit out the full timeout
        let client = EmoteClient::new(EmoteConfig {
            enabled: true,
            host: "10.255.255.1".into(),
            port: 7777,
            connect_timeout_ms: 2_000,
        });
        let start = Instant::now();
        client.start_speaking();
        client.stop_speaking();
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_empty_name_rejected() {
        let client = EmoteClient::disabled();
        assert!(client.send("   ").is_err());
    }

    #[test]
    fn test_disabled_is_noop() {
        // Nothing listens on this port; a disabled client must not try.
        let client = EmoteClient::new(EmoteConfig {
            enabled: false,
            port: 1,
            ..EmoteConfig::default()
        });
        client.start_speaking();
        client.stop_speaking();
        assert!(!client.is_enabled());
    }
}
