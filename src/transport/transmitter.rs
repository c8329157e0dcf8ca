use std::io::Write;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::GeoDetection;

const DEFAULT_TIMEOUT_S: f64 = 3.0;

/// One line on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransmitRecord {
    pub class_id: u32,
    pub confidence: f32,
    pub lat: f64,
    pub lon: f64,
    /// RFC 3339.
    pub timestamp: DateTime<Utc>,
    pub frame: Option<String>,
    pub object_id: Option<String>,
    pub track_id: Option<u64>,
}

impl From<&GeoDetection> for TransmitRecord {
    fn from(det: &GeoDetection) -> Self {
        Self {
            class_id: det.class_id,
            confidence: det.confidence,
            lat: det.lat,
            lon: det.lon,
            timestamp: det.timestamp,
            frame: det.frame_id.clone(),
            object_id: det.object_id.clone(),
            track_id: det.track_id,
        }
    }
}

impl TransmitRecord {
    /// JSON encoding terminated by `\n`.
    pub fn to_line(&self) -> Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}

/// Receiver of confirmed detections. Failures are reported, never retried.
pub trait DetectionSink: Send {
    fn send(&mut self, record: &TransmitRecord) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

/// Ground-station transmitter.
///
/// TCP connections are opened lazily and dropped after a failed write; the
/// next send reconnects.
pub struct Transmitter {
    host: String,
    port: u16,
    protocol: Protocol,
    timeout: Duration,
    tcp: Option<TcpStream>,
    udp: Option<UdpSocket>,
}

impl Transmitter {
    pub fn new(host: &str, port: u16, udp: bool, timeout_s: f64) -> Self {
        let timeout_s = if timeout_s.is_finite() && timeout_s > 0.0 {
            timeout_s
        } else {
            DEFAULT_TIMEOUT_S
        };
        Self {
            host: host.to_string(),
            port,
            protocol: if udp { Protocol::Udp } else { Protocol::Tcp },
            timeout: Duration::from_secs_f64(timeout_s),
            tcp: None,
            udp: None,
        }
    }

    /// Create and connect immediately; fails if the station is unreachable.
    pub fn connect(host: &str, port: u16, udp: bool, timeout_s: f64) -> Result<Self> {
        let mut tx = Self::new(host, port, udp, timeout_s);
        match tx.protocol {
            Protocol::Tcp => {
                tx.tcp_stream()?;
            }
            Protocol::Udp => {
                tx.udp_socket()?;
            }
        }
        log::info!(
            "Transmitter connected {}:{} ({}, timeout={:.1}s)",
            tx.host,
            tx.port,
            tx.protocol.as_str(),
            tx.timeout.as_secs_f64()
        );
        Ok(tx)
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn is_connected(&self) -> bool {
        match self.protocol {
            Protocol::Tcp => self.tcp.is_some(),
            Protocol::Udp => self.udp.is_some(),
        }
    }

    fn resolve(&self) -> Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .with_context(|| format!("failed to resolve {}:{}", self.host, self.port))?
            .next()
            .ok_or_else(|| anyhow!("no address for {}:{}", self.host, self.port))
    }

    fn tcp_stream(&mut self) -> Result<&mut TcpStream> {
        if self.tcp.is_none() {
            let addr = self.resolve()?;
            let stream = TcpStream::connect_timeout(&addr, self.timeout)
                .with_context(|| format!("failed to connect to ground station {}", addr))?;
            stream.set_write_timeout(Some(self.timeout))?;
            stream.set_nodelay(true)?;
            self.tcp = Some(stream);
        }
        self.tcp
            .as_mut()
            .ok_or_else(|| anyhow!("tcp stream unavailable"))
    }

    fn udp_socket(&mut self) -> Result<(&UdpSocket, SocketAddr)> {
        let addr = self.resolve()?;
        if self.udp.is_none() {
            let bind = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
            let socket = UdpSocket::bind(bind).context("failed to bind udp socket")?;
            socket.set_write_timeout(Some(self.timeout))?;
            self.udp = Some(socket);
        }
        let socket = self
            .udp
            .as_ref()
            .ok_or_else(|| anyhow!("udp socket unavailable"))?;
        Ok((socket, addr))
    }
}

impl DetectionSink for Transmitter {
    fn send(&mut self, record: &TransmitRecord) -> Result<()> {
        let line = record.to_line()?;
        match self.protocol {
            Protocol::Udp => {
                let (socket, addr) = self.udp_socket()?;
                socket
                    .send_to(&line, addr)
                    .with_context(|| format!("udp send to {} failed", addr))?;
            }
            Protocol::Tcp => {
                let result = self.tcp_stream()?.write_all(&line);
                if let Err(e) = result {
                    self.tcp = None;
                    return Err(e).context("tcp write to ground station failed");
                }
            }
        }
        Ok(())
    }
}
