#[cfg(test)]
mod tests {
    use crate::commands::opcode;
    use crate::compensation::ForceEngine;
    use crate::frame_codec::{encode_frame, CommandFrame, FrameDecoder};
    use crate::robot::{PendingCompletion, RobotDispatch, RobotHandle, RobotState};
    use crate::session::{CommandQueue, Dispatch, SessionState, SocketSession};
    use std::io::{ErrorKind, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    /// A session under test plus the client end of its connection.
    fn connect<D: Dispatch>(
        dispatch: Arc<D>,
        queue: Arc<CommandQueue>,
    ) -> (SocketSession<D>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (stream, _) = listener.accept().unwrap();
        let session = SocketSession::new("test", stream, queue, dispatch).unwrap();
        client.set_nonblocking(true).unwrap();
        (session, client)
    }

    /// Reads until `count` frames arrived or one second passed.
    fn read_frames(client: &mut TcpStream, count: usize) -> Vec<CommandFrame> {
        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        let mut buf = [0u8; 256];
        let deadline = Instant::now() + Duration::from_secs(1);
        while frames.len() < count && Instant::now() < deadline {
            match client.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => decoder.feed(&buf[..n], &mut frames),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(5));
                }
                Err(e) => panic!("client read failed: {e}"),
            }
        }
        frames
    }

    /// Asserts that no further bytes are in flight towards the client.
    fn assert_quiet(client: &mut TcpStream) {
        thread::sleep(Duration::from_millis(50));
        let mut buf = [0u8; 64];
        match client.read(&mut buf) {
            Ok(n) => assert_eq!(n, 0, "unexpected {} extra bytes", n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => panic!("client read failed: {e}"),
        }
    }

    /// Lets loopback data reach the session socket before a tick.
    fn settle() {
        thread::sleep(Duration::from_millis(50));
    }

    struct NullDispatch;

    impl Dispatch for NullDispatch {
        fn on_frame(&self, _frame: &CommandFrame) {}
        fn default_frame(&self) -> CommandFrame {
            [0, opcode::SENSOR_VALS, 0, 0, 0, 0, 0, 0, 0]
        }
    }

    fn robot_fixture() -> (
        Arc<RobotDispatch>,
        RobotHandle,
        Arc<ForceEngine>,
        Arc<CommandQueue>,
    ) {
        let state = Arc::new(RobotState::new());
        let engine = Arc::new(ForceEngine::new());
        let pending: PendingCompletion = Arc::new(Mutex::new(None));
        let queue = Arc::new(CommandQueue::new());
        let dispatch = Arc::new(RobotDispatch::new(
            state.clone(),
            engine.clone(),
            pending.clone(),
        ));
        let handle = RobotHandle::new(queue.clone(), state, pending);
        (dispatch, handle, engine, queue)
    }

    #[test]
    fn empty_queue_tick_sends_exactly_one_default_frame() {
        let queue = Arc::new(CommandQueue::new());
        let (mut session, mut client) = connect(Arc::new(NullDispatch), queue);
        session.tick();
        let frames = read_frames(&mut client, 1);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0][1], opcode::SENSOR_VALS);
        assert_quiet(&mut client);
    }

    #[test]
    fn queued_frames_drain_completely_and_suppress_the_default() {
        let queue = Arc::new(CommandQueue::new());
        let (mut session, mut client) = connect(Arc::new(NullDispatch), queue.clone());
        queue.push([0, opcode::HOME1, 0, 0, 0, 0, 0, 0, 0]);
        queue.push([0, opcode::MOVE_JOINTS, 20, 1, 2, 3, 4, 5, 6]);
        queue.push([0, opcode::SET_PARAMS, 0, 9, 9, 9, 9, 9, 9]);
        session.tick();
        assert!(queue.is_empty());

        let frames = read_frames(&mut client, 3);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0][1], opcode::HOME1);
        assert_eq!(frames[1][1], opcode::MOVE_JOINTS);
        assert_eq!(frames[2][1], opcode::SET_PARAMS);
        assert_quiet(&mut client);

        // Next tick has nothing queued: exactly one telemetry frame.
        session.tick();
        let frames = read_frames(&mut client, 1);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0][1], opcode::SENSOR_VALS);
        assert_quiet(&mut client);
    }

    #[test]
    fn every_connected_tick_transmits_at_least_one_frame() {
        let queue = Arc::new(CommandQueue::new());
        let (mut session, mut client) = connect(Arc::new(NullDispatch), queue.clone());
        // Two enqueues interleaved with four ticks: 1 + 2 + 1 + 1 frames.
        session.tick();
        queue.push([0, opcode::HOME1, 0, 0, 0, 0, 0, 0, 0]);
        queue.push([0, opcode::HOME2, 0, 0, 0, 0, 0, 0, 0]);
        session.tick();
        session.tick();
        session.tick();
        let frames = read_frames(&mut client, 5);
        assert_eq!(frames.len(), 5);
    }

    #[test]
    fn peer_disconnect_is_terminal_for_the_session() {
        let queue = Arc::new(CommandQueue::new());
        let (mut session, client) = connect(Arc::new(NullDispatch), queue);
        drop(client);
        settle();
        session.tick();
        assert_eq!(session.state(), SessionState::Disconnected);
        // Further ticks stay quiet and do not panic.
        session.tick();
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[test]
    fn close_sends_the_stop_command_best_effort() {
        let queue = Arc::new(CommandQueue::new());
        let (mut session, mut client) = connect(Arc::new(NullDispatch), queue);
        session.close();
        assert_eq!(session.state(), SessionState::Disconnected);
        let frames = read_frames(&mut client, 1);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0][1], opcode::STOP);
    }

    #[test]
    fn position_axis_frame_over_the_wire_updates_joints() {
        let (dispatch, handle, engine, queue) = robot_fixture();
        let (mut session, mut client) = connect(dispatch, queue);

        // The exact wire image from the controller.
        client
            .write_all(b"000000 000006 000000 000010 000020 000030 000040 000050 000060 ")
            .unwrap();
        settle();
        session.tick();
        assert_eq!(handle.joints(), [10, 20, 30, 40, 50, 60]);

        // The same tick already answered with one default telemetry frame
        // carrying the offset-corrected channels (the raw sample is all zero,
        // so these are the calibration constants, scaled and sign-flipped).
        let frames = read_frames(&mut client, 1);
        assert_eq!(frames.len(), 1);
        let telemetry = frames[0];
        assert_eq!(telemetry[1], opcode::SENSOR_VALS);
        let oc = engine.sample().offset_corrected;
        assert_eq!(telemetry[3], -oc[0] / 100);
        assert_eq!(telemetry[4], oc[1] / 100);
        assert_eq!(telemetry[5], -oc[2] / 100);
        assert_eq!(telemetry[6], oc[3] / 100);
        assert_eq!(telemetry[7], oc[4] / 100);
        assert_eq!(telemetry[8], oc[5] / 100);
        assert_quiet(&mut client);
    }

    #[test]
    fn in_position_over_the_wire_fires_only_the_latest_callback() {
        let (dispatch, handle, _engine, queue) = robot_fixture();
        let (mut session, mut client) = connect(dispatch, queue);

        let fired = Arc::new(Mutex::new(Vec::new()));
        let first = fired.clone();
        handle.move_joints(
            [1, 1, 1, 1, 1, 1],
            20,
            Box::new(move || first.lock().unwrap().push("first")),
        );
        let second = fired.clone();
        handle.home1(Box::new(move || second.lock().unwrap().push("second")));

        let in_position: CommandFrame = [0, opcode::IN_POSITION, 0, 0, 0, 0, 0, 0, 0];
        client
            .write_all(encode_frame(&in_position).as_bytes())
            .unwrap();
        settle();
        session.tick();
        assert_eq!(*fired.lock().unwrap(), vec!["second"]);
    }
}
