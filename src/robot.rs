//! Controller-side state, the frame dispatch table and the motion facade.
//!
//! Every record the controller session writes (joint vector, Cartesian pose,
//! regulator arrays, delta state, last error text) lives in its own
//! [`Record`] cell; readers get snapshot copies and never observe a torn
//! write. There is deliberately no cross-record atomicity: the joint vector
//! and the sensor sample race by design, bounded by the tick period.
//!
//! Motion commands register at most one completion callback. A new motion
//! request overwrites the slot; a callback displaced before its in-position
//! report arrives is dropped without being invoked. Motion sequencing relies
//! on this, so the overwrite is load-bearing.

use crate::commands::{opcode, RangeErrors, ERR_NOT_INRANGE};
use crate::compensation::ForceEngine;
use crate::frame_codec::CommandFrame;
use crate::session::{CommandQueue, Dispatch};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// A single shared record: one writer thread, snapshot copies for readers.
pub struct Record<T: Clone> {
    value: Mutex<T>,
}

impl<T: Clone> Record<T> {
    pub fn new(value: T) -> Self {
        Record {
            value: Mutex::new(value),
        }
    }

    pub fn set(&self, value: T) {
        *self.value.lock().unwrap() = value;
    }

    pub fn get(&self) -> T {
        self.value.lock().unwrap().clone()
    }
}

/// Callback fired when the controller next reports in-position.
pub type Completion = Box<dyn FnOnce() + Send>;

/// Single-slot holder for the pending completion callback.
pub type PendingCompletion = Arc<Mutex<Option<Completion>>>;

/// Everything the controller session reports, one cell per record.
pub struct RobotState {
    pub joints: Record<[i32; 6]>,
    pub pose: Record<[i32; 6]>,
    pub regulator_output: Record<[i32; 6]>,
    pub regulator_error: Record<[i32; 6]>,
    pub delta_state: Record<[i32; 6]>,
    pub last_error: Record<Option<String>>,
}

impl RobotState {
    pub fn new() -> Self {
        RobotState {
            joints: Record::new([0; 6]),
            pose: Record::new([0; 6]),
            regulator_output: Record::new([0; 6]),
            regulator_error: Record::new([0; 6]),
            delta_state: Record::new([0; 6]),
            last_error: Record::new(None),
        }
    }
}

impl Default for RobotState {
    fn default() -> Self {
        Self::new()
    }
}

fn payload(frame: &CommandFrame) -> [i32; 6] {
    [frame[3], frame[4], frame[5], frame[6], frame[7], frame[8]]
}

/// Interprets frames arriving from the controller.
pub struct RobotDispatch {
    state: Arc<RobotState>,
    engine: Arc<ForceEngine>,
    pending: PendingCompletion,
}

impl RobotDispatch {
    pub fn new(state: Arc<RobotState>, engine: Arc<ForceEngine>, pending: PendingCompletion) -> Self {
        RobotDispatch {
            state,
            engine,
            pending,
        }
    }

    fn on_error(&self, subcode: i32) {
        let text = if subcode == ERR_NOT_INRANGE {
            "requested point is out of reach".to_string()
        } else {
            let flags = RangeErrors::from_bits_truncate(subcode);
            if flags.is_empty() {
                warn!(subcode, "unknown error subcode from the controller");
                return;
            }
            format!("joints out of range: {:?}", flags)
        };
        warn!(%text, "controller error");
        self.state.last_error.set(Some(text));
    }
}

impl Dispatch for RobotDispatch {
    fn on_frame(&self, frame: &CommandFrame) {
        match frame[1] {
            opcode::GET_POSITION_AXIS => {
                let joints = payload(frame);
                self.state.joints.set(joints);
                self.engine.update_joints(joints);
            }
            opcode::GET_POSITION => self.state.pose.set(payload(frame)),
            opcode::ERR => self.on_error(frame[2]),
            opcode::U_REGULATOR => self.state.regulator_output.set(payload(frame)),
            opcode::ERR_REGULATOR => self.state.regulator_error.set(payload(frame)),
            opcode::IN_POSITION => {
                if let Some(done) = self.pending.lock().unwrap().take() {
                    done();
                }
            }
            opcode::DELTA_STATE => self.state.delta_state.set(payload(frame)),
            other => warn!(opcode = other, "unrecognized opcode from the controller"),
        }
    }

    /// Telemetry sent when no command is queued: the offset-corrected sensor
    /// channels, X and Z force negated and everything scaled down by 100, the
    /// way the firmware's gravity program expects them.
    fn default_frame(&self) -> CommandFrame {
        let s = self.engine.sample().offset_corrected;
        [
            0,
            opcode::SENSOR_VALS,
            0,
            -s[0] / 100,
            s[1] / 100,
            -s[2] / 100,
            s[3] / 100,
            s[4] / 100,
            s[5] / 100,
        ]
    }
}

/// Typed operations the operator layer calls; each one builds a frame and
/// queues it for the next tick.
#[derive(Clone)]
pub struct RobotHandle {
    queue: Arc<CommandQueue>,
    state: Arc<RobotState>,
    pending: PendingCompletion,
}

impl RobotHandle {
    pub fn new(queue: Arc<CommandQueue>, state: Arc<RobotState>, pending: PendingCompletion) -> Self {
        RobotHandle {
            queue,
            state,
            pending,
        }
    }

    fn motion(&self, frame: CommandFrame, done: Completion) {
        self.queue.push(frame);
        // Overwrites the slot; an earlier un-invoked callback is dropped.
        *self.pending.lock().unwrap() = Some(done);
    }

    pub fn move_joints(&self, j: [i32; 6], speed: i32, done: Completion) {
        self.motion(
            [0, opcode::MOVE_JOINTS, speed, j[0], j[1], j[2], j[3], j[4], j[5]],
            done,
        );
    }

    pub fn move_cartesian(&self, p: [i32; 6], speed: i32, done: Completion) {
        self.motion(
            [0, opcode::MOVE_CARTESIAN, speed, p[0], p[1], p[2], p[3], p[4], p[5]],
            done,
        );
    }

    pub fn home1(&self, done: Completion) {
        self.motion([0, opcode::HOME1, 0, 0, 0, 0, 0, 0, 0], done);
    }

    pub fn home2(&self, done: Completion) {
        self.motion([0, opcode::HOME2, 0, 0, 0, 0, 0, 0, 0], done);
    }

    /// Jog a single joint (1..=6) by the given delta, degrees.
    pub fn jog_joint(&self, joint: usize, delta: i32, speed: i32) {
        self.queue
            .push([0, opcode::JOG_JOINT, speed, joint as i32, delta, 0, 0, 0, 0]);
    }

    pub fn stop(&self) {
        self.queue.push([0, opcode::STOP, 0, 0, 0, 0, 0, 0, 0]);
    }

    pub fn set_params(&self, params: [i32; 6]) {
        self.queue.push([
            0,
            opcode::SET_PARAMS,
            0,
            params[0],
            params[1],
            params[2],
            params[3],
            params[4],
            params[5],
        ]);
    }

    pub fn set_position(&self, p: [i32; 6]) {
        self.queue
            .push([0, opcode::SET_POS, 0, p[0], p[1], p[2], p[3], p[4], p[5]]);
    }

    pub fn set_delta_position(&self, d: [i32; 6]) {
        self.queue
            .push([0, opcode::SET_DELTA_POS, 0, d[0], d[1], d[2], d[3], d[4], d[5]]);
    }

    pub fn delta_enable(&self) {
        self.queue
            .push([0, opcode::DELTA_POS_ENABLE, 0, 0, 0, 0, 0, 0, 0]);
    }

    pub fn delta_disable(&self) {
        self.queue
            .push([0, opcode::DELTA_POS_DISABLE, 0, 0, 0, 0, 0, 0, 0]);
    }

    pub fn gravity_program_start(&self, gains: [i32; 6]) {
        self.queue.push([
            0,
            opcode::GRAVITY_PROGRAM_START,
            0,
            gains[0],
            gains[1],
            gains[2],
            gains[3],
            gains[4],
            gains[5],
        ]);
    }

    pub fn gravity_program_stop(&self) {
        self.queue
            .push([0, opcode::GRAVITY_PROGRAM_OFF, 0, 0, 0, 0, 0, 0, 0]);
    }

    pub fn toggle_gravity_mode(&self) {
        self.queue
            .push([0, opcode::CHANGE_GRAVITY_MODE, 0, 0, 0, 0, 0, 0, 0]);
    }

    pub fn joints(&self) -> [i32; 6] {
        self.state.joints.get()
    }

    pub fn pose(&self) -> [i32; 6] {
        self.state.pose.get()
    }

    pub fn regulator_output(&self) -> [i32; 6] {
        self.state.regulator_output.get()
    }

    pub fn regulator_error(&self) -> [i32; 6] {
        self.state.regulator_error.get()
    }

    pub fn delta_state(&self) -> [i32; 6] {
        self.state.delta_state.get()
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.last_error.get()
    }
}
