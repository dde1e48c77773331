//! Socket sessions around the framed protocol.
//!
//! One session owns one peer connection and is driven by a fixed-period
//! `tick()`: drain whatever bytes the peer has already sent through the frame
//! decoder, then send every queued command, or exactly one default telemetry
//! frame when the queue was empty. The peer therefore receives at least one
//! frame per tick while connected, never zero and never a growing backlog.
//!
//! The controller and camera endpoints dial in, so the session side listens;
//! [`serve`] runs the accept/tick loop on its own thread. A session object
//! that saw its peer drop is finished; the loop builds a fresh one for the
//! next client.

use crate::commands::opcode;
use crate::frame_codec::{encode_frame, CommandFrame, FrameDecoder};
use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Listening,
    Connected,
}

/// Interprets inbound frames and supplies the telemetry frame sent when the
/// outbound queue is empty.
pub trait Dispatch: Send + Sync {
    fn on_frame(&self, frame: &CommandFrame);
    fn default_frame(&self) -> CommandFrame;
}

/// Outbound command FIFO. Frames are moved out on transmission; nothing is
/// ever sent twice.
pub struct CommandQueue {
    frames: Mutex<VecDeque<CommandFrame>>,
}

impl CommandQueue {
    pub fn new() -> Self {
        CommandQueue {
            frames: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, frame: CommandFrame) {
        self.frames.lock().unwrap().push_back(frame);
    }

    pub fn pop(&self) -> Option<CommandFrame> {
        self.frames.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Observable session state for the operator display.
pub struct SessionMonitor {
    state: Mutex<SessionState>,
}

impl SessionMonitor {
    pub fn new() -> Self {
        SessionMonitor {
            state: Mutex::new(SessionState::Disconnected),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    pub(crate) fn set(&self, state: SessionState) {
        *self.state.lock().unwrap() = state;
    }
}

impl Default for SessionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

pub fn stop_frame() -> CommandFrame {
    [0, opcode::STOP, 0, 0, 0, 0, 0, 0, 0]
}

/// One live connection to a peer speaking the framed protocol.
pub struct SocketSession<D: Dispatch> {
    name: String,
    stream: TcpStream,
    decoder: FrameDecoder,
    state: SessionState,
    queue: Arc<CommandQueue>,
    dispatch: Arc<D>,
}

impl<D: Dispatch> SocketSession<D> {
    pub fn new(
        name: &str,
        stream: TcpStream,
        queue: Arc<CommandQueue>,
        dispatch: Arc<D>,
    ) -> std::io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(SocketSession {
            name: name.to_string(),
            stream,
            decoder: FrameDecoder::new(),
            state: SessionState::Connected,
            queue,
            dispatch,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// One scheduling period: decode then send. Does nothing once the peer
    /// is gone.
    pub fn tick(&mut self) {
        if self.state != SessionState::Connected {
            return;
        }
        self.drain_inbound();
        if self.state == SessionState::Connected {
            self.drain_outbound();
        }
    }

    /// Enqueues a stop command, pushes out whatever is queued (best effort)
    /// and tears the connection down. Never blocks the caller.
    pub fn close(&mut self) {
        self.queue.push(stop_frame());
        if self.state == SessionState::Connected {
            self.drain_outbound();
        }
        self.disconnect();
    }

    fn drain_inbound(&mut self) {
        let mut buf = [0u8; 512];
        let mut frames = Vec::new();
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => {
                    info!(name = %self.name, "client disconnected");
                    self.disconnect();
                    break;
                }
                Ok(n) => {
                    frames.clear();
                    self.decoder.feed(&buf[..n], &mut frames);
                    for frame in &frames {
                        self.dispatch.on_frame(frame);
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(error) => {
                    warn!(name = %self.name, %error, "read failed");
                    self.disconnect();
                    break;
                }
            }
        }
    }

    fn drain_outbound(&mut self) {
        let mut sent_any = false;
        while let Some(frame) = self.queue.pop() {
            if !self.send(&frame) {
                return;
            }
            sent_any = true;
        }
        if !sent_any {
            let telemetry = self.dispatch.default_frame();
            self.send(&telemetry);
        }
    }

    fn send(&mut self, frame: &CommandFrame) -> bool {
        match self.stream.write_all(encode_frame(frame).as_bytes()) {
            Ok(()) => true,
            Err(error) => {
                warn!(name = %self.name, %error, "write failed");
                self.disconnect();
                false
            }
        }
    }

    fn disconnect(&mut self) {
        self.state = SessionState::Disconnected;
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// Listens on the given port and drives one session at a time with the given
/// tick period, until the shutdown flag is raised. Each connected client gets
/// a fresh session object; a dropped peer sends the loop back to listening.
pub fn serve<D: Dispatch + 'static>(
    name: &'static str,
    port: u16,
    queue: Arc<CommandQueue>,
    dispatch: Arc<D>,
    monitor: Arc<SessionMonitor>,
    period: Duration,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    let listener = TcpListener::bind(("0.0.0.0", port))?;
    listener.set_nonblocking(true)?;
    info!(name, port, "waiting for a client");
    monitor.set(SessionState::Listening);
    thread::Builder::new().name(name.to_string()).spawn(move || {
        let mut session: Option<SocketSession<D>> = None;
        while !shutdown.load(Ordering::Relaxed) {
            if session.is_none() {
                match listener.accept() {
                    Ok((stream, peer)) => {
                        info!(name, %peer, "client connected");
                        match SocketSession::new(name, stream, queue.clone(), dispatch.clone()) {
                            Ok(s) => {
                                monitor.set(SessionState::Connected);
                                session = Some(s);
                            }
                            Err(error) => warn!(name, %error, "session setup failed"),
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                    Err(error) => warn!(name, %error, "accept failed"),
                }
            } else if let Some(s) = session.as_mut() {
                s.tick();
            }
            let dropped = session
                .as_ref()
                .is_some_and(|s| s.state() == SessionState::Disconnected);
            if dropped {
                monitor.set(SessionState::Listening);
                session = None;
            }
            thread::sleep(period);
        }
        if let Some(mut s) = session.take() {
            s.close();
        }
        monitor.set(SessionState::Disconnected);
    })
}
