//! Constant tables of the controller wire protocol.
//!
//! Opcode numbers, error subcodes and the joint range tables are fixed by the
//! firmware of this specific arm; none of them is configurable.

use bitflags::bitflags;

/// Frame opcodes (field 1 of a frame). Values are the firmware's.
pub mod opcode {
    /// Immediate stop.
    pub const STOP: i32 = 4;
    /// Jog a single joint.
    pub const JOG_JOINT: i32 = 5;
    /// Controller reports the six joint angles.
    pub const GET_POSITION_AXIS: i32 = 6;
    /// Controller reports the Cartesian pose (X Y Z O A T).
    pub const GET_POSITION: i32 = 7;
    /// Point-to-point move given by joint angles.
    pub const MOVE_JOINTS: i32 = 8;
    /// Point-to-point move given by Cartesian coordinates.
    pub const MOVE_CARTESIAN: i32 = 9;
    /// Move to home zone 1.
    pub const HOME1: i32 = 10;
    /// Move to home zone 2.
    pub const HOME2: i32 = 11;
    /// Firmware error report; subcode in field 2.
    pub const ERR: i32 = 12;
    /// Displacement drawing command.
    pub const DRAW_OFFSET: i32 = 13;
    /// Absolute position setpoint.
    pub const SET_POS: i32 = 14;
    /// Relative position setpoint.
    pub const SET_DELTA_POS: i32 = 15;
    /// Allow unit displacement steps.
    pub const DELTA_POS_ENABLE: i32 = 16;
    /// Forbid unit displacement steps.
    pub const DELTA_POS_DISABLE: i32 = 17;
    /// Sensor value push (our default telemetry frame).
    pub const SENSOR_VALS: i32 = 18;
    /// Start the gravity program with the given gains.
    pub const GRAVITY_PROGRAM_START: i32 = 19;
    /// Stop the gravity program.
    pub const GRAVITY_PROGRAM_OFF: i32 = 20;
    /// Regulator output push (diagnostic).
    pub const U_REGULATOR: i32 = 21;
    /// Regulator integral/proportional error push (diagnostic).
    pub const ERR_REGULATOR: i32 = 22;
    /// Motion parameter set (acceleration and friends).
    pub const SET_PARAMS: i32 = 23;
    /// The last motion command completed.
    pub const IN_POSITION: i32 = 24;
    /// Toggle gravity control mode.
    pub const CHANGE_GRAVITY_MODE: i32 = 25;
    /// Force control log push.
    pub const POWER_LOG: i32 = 26;
    /// Displacement state pushed by the handheld client.
    pub const DELTA_STATE: i32 = 27;
}

bitflags! {
    /// Per-joint reachability failure, reported as the ERR subcode.
    /// Bit i set means joint i+1 cannot reach the requested target.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RangeErrors: i32 {
        const J1 = 1;
        const J2 = 2;
        const J3 = 4;
        const J4 = 8;
        const J5 = 16;
        const J6 = 32;
    }
}

/// Sentinel ERR subcode: the whole target is out of reach. The value is the
/// firmware's, 32786 and not 32768.
pub const ERR_NOT_INRANGE: i32 = 32786;

/// Documented joint travel, degrees. Display only; the firmware is the
/// authority and the console never rejects a target on its own.
pub const UPPER_LIMIT_DEG: [i32; 6] = [160, 140, 120, 270, 145, 360];
pub const LOWER_LIMIT_DEG: [i32; 6] = [-160, -105, -155, -270, -145, -360];
