//! Vision subsystem link.
//!
//! The camera board dials in over TCP and pushes raw little-endian 32-bit
//! integers, six consecutive values per sample, no header and no framing
//! beyond the fixed count. Only the inbound direction exists. The latest
//! sample is published as a snapshot record for the operator display.

use crate::robot::Record;
use crate::session::{SessionMonitor, SessionState};
use std::io::{ErrorKind, Read};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{info, warn};

/// One camera sample: position/orientation channels in milli-units. The
/// display consumes slots 1..3; the remaining slots ride along unchanged.
pub type CameraSample = [i32; 6];

/// Reassembles little-endian words and samples across arbitrary read
/// boundaries.
pub struct CameraDecoder {
    word: [u8; 4],
    have: usize,
    values: CameraSample,
    pos: usize,
}

impl CameraDecoder {
    pub fn new() -> Self {
        CameraDecoder {
            word: [0; 4],
            have: 0,
            values: [0; 6],
            pos: 0,
        }
    }

    /// Consumes one byte; returns a sample when this byte completed one.
    pub fn push(&mut self, byte: u8) -> Option<CameraSample> {
        self.word[self.have] = byte;
        self.have += 1;
        if self.have < 4 {
            return None;
        }
        self.have = 0;
        self.values[self.pos] = i32::from_le_bytes(self.word);
        self.pos += 1;
        if self.pos < 6 {
            return None;
        }
        self.pos = 0;
        Some(self.values)
    }
}

impl Default for CameraDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn pump(stream: &mut TcpStream, decoder: &mut CameraDecoder, record: &Record<CameraSample>) -> bool {
    let mut buf = [0u8; 256];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => {
                info!("camera disconnected");
                let _ = stream.shutdown(Shutdown::Both);
                return false;
            }
            Ok(n) => {
                for byte in &buf[..n] {
                    if let Some(sample) = decoder.push(*byte) {
                        record.set(sample);
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => return true,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(error) => {
                warn!(%error, "camera read failed");
                let _ = stream.shutdown(Shutdown::Both);
                return false;
            }
        }
    }
}

/// Listens for the camera board and keeps the sample record fresh until the
/// shutdown flag is raised.
pub fn serve(
    port: u16,
    record: Arc<Record<CameraSample>>,
    monitor: Arc<SessionMonitor>,
    period: Duration,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    let listener = TcpListener::bind(("0.0.0.0", port))?;
    listener.set_nonblocking(true)?;
    info!(port, "waiting for the camera");
    monitor.set(SessionState::Listening);
    thread::Builder::new()
        .name("camera".to_string())
        .spawn(move || {
            let mut link: Option<(TcpStream, CameraDecoder)> = None;
            while !shutdown.load(Ordering::Relaxed) {
                if link.is_none() {
                    match listener.accept() {
                        Ok((stream, peer)) => {
                            if let Err(error) = stream.set_nonblocking(true) {
                                warn!(%error, "camera link setup failed");
                            } else {
                                info!(%peer, "camera connected");
                                monitor.set(SessionState::Connected);
                                link = Some((stream, CameraDecoder::new()));
                            }
                        }
                        Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                        Err(error) => warn!(%error, "camera accept failed"),
                    }
                } else if let Some((mut stream, mut decoder)) = link.take() {
                    if pump(&mut stream, &mut decoder, &record) {
                        link = Some((stream, decoder));
                    } else {
                        monitor.set(SessionState::Listening);
                    }
                }
                thread::sleep(period);
            }
            monitor.set(SessionState::Disconnected);
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_assembles_six_words() {
        let mut decoder = CameraDecoder::new();
        let mut bytes = Vec::new();
        for value in [15i32, -300, 42, 0, -1, 7] {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        let mut samples = Vec::new();
        for byte in &bytes {
            if let Some(sample) = decoder.push(*byte) {
                samples.push(sample);
            }
        }
        assert_eq!(samples, vec![[15, -300, 42, 0, -1, 7]]);
    }

    #[test]
    fn decoder_survives_chunk_boundaries() {
        let mut decoder = CameraDecoder::new();
        let mut bytes = Vec::new();
        for value in [1i32, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12] {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        let mut samples = Vec::new();
        // Feed in awkward 5-byte chunks.
        for chunk in bytes.chunks(5) {
            for byte in chunk {
                if let Some(sample) = decoder.push(*byte) {
                    samples.push(sample);
                }
            }
        }
        assert_eq!(samples, vec![[1, 2, 3, 4, 5, 6], [7, 8, 9, 10, 11, 12]]);
    }
}
