//! Net F/T load cell link: the vendor RDT protocol over UDP.
//!
//! A request is 8 bytes, big endian: header 0x1234, a command word and a
//! sample count. A data record is 36 bytes, big endian: RDT sequence, F/T
//! sequence, status, then Fx Fy Fz Tx Ty Tz as signed 32-bit counts. The
//! sensor listens on UDP port 49152.

use crate::compensation::{ForceEngine, RawSample};
use std::fmt::{self, Display, Formatter};
use std::io;
use std::net::{ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::warn;

/// UDP port the Net F/T listens for RDT requests on.
pub const RDT_PORT: u16 = 49152;

const RDT_HEADER: u16 = 0x1234;
const RDT_COMMAND_LEN: usize = 8;
const RDT_RECORD_LEN: usize = 36;

/// RDT command words.
mod command {
    /// Stop streaming.
    pub const STOP: u16 = 0;
    /// Start real-time streaming; count 0 streams until stopped.
    pub const STREAM: u16 = 2;
    /// Tare the current load.
    pub const TARE: u16 = 0x0042;
}

/// One RDT data record as received from the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RdtRecord {
    pub rdt_sequence: u32,
    pub ft_sequence: u32,
    pub status: u32,
    pub wrench: RawSample,
}

fn encode_request(cmd: u16, count: u32) -> [u8; RDT_COMMAND_LEN] {
    let mut buf = [0u8; RDT_COMMAND_LEN];
    buf[0..2].copy_from_slice(&RDT_HEADER.to_be_bytes());
    buf[2..4].copy_from_slice(&cmd.to_be_bytes());
    buf[4..8].copy_from_slice(&count.to_be_bytes());
    buf
}

fn parse_record(buf: &[u8]) -> Result<RdtRecord, SensorError> {
    if buf.len() < RDT_RECORD_LEN {
        return Err(SensorError::ShortRecord(buf.len()));
    }
    let field = |i: usize| {
        let mut word = [0u8; 4];
        word.copy_from_slice(&buf[i * 4..i * 4 + 4]);
        u32::from_be_bytes(word)
    };
    let mut wrench = [0i32; 6];
    for (slot, value) in wrench.iter_mut().enumerate() {
        *value = field(3 + slot) as i32;
    }
    Ok(RdtRecord {
        rdt_sequence: field(0),
        ft_sequence: field(1),
        status: field(2),
        wrench,
    })
}

/// Errors of the sensor link.
#[derive(Debug)]
pub enum SensorError {
    Io(io::Error),
    /// The datagram was shorter than one RDT record.
    ShortRecord(usize),
}

impl Display for SensorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SensorError::Io(e) => e.fmt(f),
            SensorError::ShortRecord(len) => write!(
                f,
                "RDT record of {} bytes received, {} expected",
                len, RDT_RECORD_LEN
            ),
        }
    }
}

impl std::error::Error for SensorError {}

impl From<io::Error> for SensorError {
    fn from(err: io::Error) -> Self {
        SensorError::Io(err)
    }
}

/// Connected RDT endpoint of one physical sensor.
pub struct NetFt {
    socket: UdpSocket,
}

impl NetFt {
    /// Binds an ephemeral local port and connects it to the sensor. A 500 ms
    /// read timeout bounds every poll.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, SensorError> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.connect(addr)?;
        socket.set_read_timeout(Some(Duration::from_millis(500)))?;
        Ok(NetFt { socket })
    }

    /// Requests and reads a single record.
    pub fn poll_once(&self) -> Result<RdtRecord, SensorError> {
        self.socket
            .send(&encode_request(command::STREAM, 1))?;
        let mut buf = [0u8; RDT_RECORD_LEN];
        let received = self.socket.recv(&mut buf)?;
        parse_record(&buf[..received])
    }

    /// Starts streaming; count 0 streams until [`NetFt::stop_streaming`].
    pub fn start_streaming(&self, count: u32) -> Result<(), SensorError> {
        self.socket.send(&encode_request(command::STREAM, count))?;
        Ok(())
    }

    pub fn stop_streaming(&self) -> Result<(), SensorError> {
        self.socket.send(&encode_request(command::STOP, 0))?;
        Ok(())
    }

    /// Tares the current load of the sensor.
    pub fn tare(&self) -> Result<(), SensorError> {
        self.socket.send(&encode_request(command::TARE, 1))?;
        Ok(())
    }
}

/// The telemetry source: real hardware or a fixed sample for bench runs
/// without the load cell attached.
pub enum SensorLink {
    Hardware(NetFt),
    Simulated(RawSample),
}

impl SensorLink {
    pub fn sample(&self) -> Result<RawSample, SensorError> {
        match self {
            SensorLink::Hardware(sensor) => Ok(sensor.poll_once()?.wrench),
            SensorLink::Simulated(raw) => Ok(*raw),
        }
    }
}

/// Polls the link at the given period and feeds the compensation engine
/// until the shutdown flag is raised. Poll failures are logged and the last
/// good sample stays in effect.
pub fn spawn_poller(
    link: SensorLink,
    engine: Arc<ForceEngine>,
    period: Duration,
    shutdown: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("ft-sensor".to_string())
        .spawn(move || {
            while !shutdown.load(Ordering::Relaxed) {
                match link.sample() {
                    Ok(raw) => engine.update_raw(raw),
                    Err(error) => warn!(%error, "sensor poll failed"),
                }
                thread::sleep(period);
            }
            if let SensorLink::Hardware(sensor) = &link {
                if let Err(error) = sensor.stop_streaming() {
                    warn!(%error, "failed to stop sensor streaming");
                }
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_image_is_exact() {
        assert_eq!(
            encode_request(command::STREAM, 1),
            [0x12, 0x34, 0x00, 0x02, 0x00, 0x00, 0x00, 0x01]
        );
        assert_eq!(
            encode_request(command::TARE, 1),
            [0x12, 0x34, 0x00, 0x42, 0x00, 0x00, 0x00, 0x01]
        );
        assert_eq!(
            encode_request(command::STOP, 0),
            [0x12, 0x34, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn record_parses_big_endian_fields() {
        let mut buf = [0u8; RDT_RECORD_LEN];
        buf[0..4].copy_from_slice(&7u32.to_be_bytes());
        buf[4..8].copy_from_slice(&8u32.to_be_bytes());
        buf[8..12].copy_from_slice(&0x8000_0000u32.to_be_bytes());
        buf[12..16].copy_from_slice(&(-1234i32 as u32).to_be_bytes());
        buf[16..20].copy_from_slice(&5678u32.to_be_bytes());
        buf[32..36].copy_from_slice(&(-1i32 as u32).to_be_bytes());
        let record = parse_record(&buf).unwrap();
        assert_eq!(record.rdt_sequence, 7);
        assert_eq!(record.ft_sequence, 8);
        assert_eq!(record.status, 0x8000_0000);
        assert_eq!(record.wrench, [-1234, 5678, 0, 0, 0, -1]);
    }

    #[test]
    fn short_datagram_is_rejected() {
        let buf = [0u8; 10];
        assert!(matches!(
            parse_record(&buf),
            Err(SensorError::ShortRecord(10))
        ));
    }

    #[test]
    fn simulated_link_returns_its_sample() {
        let link = SensorLink::Simulated([1, 2, 3, 4, 5, 6]);
        assert_eq!(link.sample().unwrap(), [1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn round_trip_over_loopback() {
        // A fake sensor: answer every request with one fixed record.
        let server = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
        let addr = server.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let mut req = [0u8; RDT_COMMAND_LEN];
            let (n, peer) = server.recv_from(&mut req).unwrap();
            assert_eq!(n, RDT_COMMAND_LEN);
            assert_eq!(&req[0..2], &[0x12, 0x34]);
            let mut reply = [0u8; RDT_RECORD_LEN];
            reply[0..4].copy_from_slice(&1u32.to_be_bytes());
            reply[12..16].copy_from_slice(&(-42i32 as u32).to_be_bytes());
            server.send_to(&reply, peer).unwrap();
        });
        let sensor = NetFt::connect(addr).unwrap();
        let record = sensor.poll_once().unwrap();
        assert_eq!(record.rdt_sequence, 1);
        assert_eq!(record.wrench[0], -42);
        handle.join().unwrap();
    }
}
