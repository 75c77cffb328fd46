//! JSON-over-UDP commands to fixtures.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use serde::Serialize;
use serde_json::json;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::{CommandDispatcher, Target};
use crate::fixture::Rgb;

/// The port fixtures listen for commands on.
pub const DEFAULT_COMMAND_PORT: u16 = 8888;

/// One command message as the fixture firmware expects it.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct CommandMessage<'a> {
    command_id: String,
    action: &'a str,
    parameters: serde_json::Value,
}

/// Sends commands to fixtures.
pub struct UdpClient {
    /// UDP socket reused between calls.
    socket: UdpSocket,
    /// Fixture command port.
    port: u16,
    /// Commands handed to the socket so far.
    sent: AtomicU64,
    /// Hostnames resolved so far. Looked up once, on first use.
    resolved: Mutex<HashMap<String, SocketAddr>>,
}

impl UdpClient {
    /// Bind a socket for sending. (try "0.0.0.0:0")
    pub fn new(bind_addr: &str, port: u16) -> io::Result<UdpClient> {
        let socket = UdpSocket::bind(bind_addr)?;
        Ok(UdpClient {
            socket,
            port,
            sent: AtomicU64::new(0),
            resolved: Mutex::new(HashMap::new()),
        })
    }

    /// Number of commands successfully handed to the network.
    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    fn resolve(&self, address: &str) -> io::Result<SocketAddr> {
        if let Ok(ip) = address.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.port));
        }
        if let Some(addr) = self.resolved.lock().get(address) {
            return Ok(*addr);
        }

        let addr = (address, self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::from(io::ErrorKind::AddrNotAvailable))?;
        debug!("[host] Resolved {} to {}", address, addr);
        self.resolved.lock().insert(address.to_string(), addr);
        Ok(addr)
    }

    /// Send one command. Failures are logged and otherwise ignored.
    fn send(&self, target: Target<'_>, action: &str, parameters: serde_json::Value) {
        let message = CommandMessage {
            command_id: Uuid::new_v4().to_string(),
            action,
            parameters,
        };

        let result = serde_json::to_vec(&message)
            .map_err(io::Error::from)
            .and_then(|buf| {
                let dest = self.resolve(target.address)?;
                self.socket.send_to(&buf, dest)
            });

        match result {
            Ok(_) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                trace!("[host] {} -> {} ({})", action, target.id, target.address);
            }
            Err(err) => {
                warn!(
                    "[host] Failed to send {} to {} ({}): {}",
                    action, target.id, target.address, err
                );
            }
        }
    }
}

fn color_params(color: Rgb) -> serde_json::Value {
    json!({ "r": color.r, "g": color.g, "b": color.b })
}

impl CommandDispatcher for UdpClient {
    fn set_indicator_color(&self, target: Target<'_>, color: Rgb) {
        self.send(target, "set_builtin_led", color_params(color));
    }

    fn set_strip_color(&self, target: Target<'_>, color: Rgb) {
        self.send(target, "set_led_color", color_params(color));
    }

    fn set_led_array(&self, target: Target<'_>, leds: &[Rgb]) {
        let leds: Vec<[u8; 3]> = leds.iter().map(|c| [c.r, c.g, c.b]).collect();
        self.send(target, "set_leds_array", json!({ "leds": leds }));
    }
}
