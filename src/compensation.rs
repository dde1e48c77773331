//! Gravity and frame compensation of the raw force/torque counts.
//!
//! The sensor reports six raw counts in its own frame, polluted by the weight
//! of the attached tooling and by fixed per-channel bias. This module turns
//! a (raw sample, joint vector) pair into the corrected readout shown to the
//! operator. The computation is a pure function; the engine only caches the
//! latest inputs and republishes the result whenever either of them changes.
//!
//! The sensor is tared with the arm at the all-joints-zero pose, so the
//! gravity terms are deltas relative to that pose: at zero joints the
//! correction vanishes and the output equals the bias constants alone.

use crate::kinematics::{self, Joints, JOINTS_AT_ZERO};
use nalgebra::{Rotation3, Vector3};
use std::sync::Mutex;

/// Raw sensor counts, Fx Fy Fz Tx Ty Tz.
pub type RawSample = [i32; 6];

/// Modeled weight of the tooling in sensor counts, sensor frame.
const TOOL_WEIGHT: Vector3<f64> = Vector3::new(-12000.0, 2000.0, -50000.0);

/// Center of gravity of the tooling, meters from the sensor origin.
const TOOL_CG: Vector3<f64> = Vector3::new(0.0, 0.012, 0.055);

/// Bias applied to the raw counts before anything else. The rig shows bias
/// on the X and Z force channels and on all three torque channels.
const CHANNEL_BIAS: [i32; 6] = [1840, 0, -2620, 145, -88, 63];

/// Residual torque bias applied after the frame correction.
const TORQUE_BIAS: [i32; 3] = [36, -21, 14];

/// Fully corrected readout, published as one atomic record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompensatedSample {
    /// Raw counts plus channel bias; this is what the telemetry frame carries.
    pub offset_corrected: [i32; 6],
    /// Gravity- and frame-corrected force/torque.
    pub compensated: [i32; 6],
    /// Projected Z torque at each wrist-inward joint stage (joints 6..3).
    pub joint_torques: [i32; 4],
}

/// Corrects one raw sample against one joint vector.
pub fn compensate(raw: &RawSample, joints: &Joints) -> CompensatedSample {
    let mut counts = [0f64; 6];
    for i in 0..6 {
        counts[i] = (raw[i] + CHANNEL_BIAS[i]) as f64;
    }
    let mut offset_corrected = [0i32; 6];
    for i in 0..6 {
        offset_corrected[i] = counts[i].round() as i32;
    }

    // Tool orientation seen from the sensor mounting, now and at the taring
    // pose.
    let mounting = kinematics::base_modification();
    let now: Rotation3<f64> = mounting * kinematics::tool_rotation(joints);
    let tared: Rotation3<f64> = mounting * kinematics::tool_rotation(&JOINTS_AT_ZERO);

    let weight = TOOL_WEIGHT.norm();
    let gravity = Vector3::new(0.0, 0.0, -weight);
    let gravity_delta = now.inverse() * gravity - tared.inverse() * gravity;

    let force = Vector3::new(counts[0], counts[1], counts[2]) - gravity_delta;
    let force = (now * tared.inverse()) * force;

    let mut torque = Vector3::new(counts[3], counts[4], counts[5]);
    for i in 0..3 {
        torque[i] += TORQUE_BIAS[i] as f64;
    }
    torque += TOOL_CG.cross(&gravity_delta);

    // Walk the chain wrist-inward, projecting the accumulated torque through
    // each joint's partial rotation and keeping the Z component per stage.
    let mut joint_torques = [0i32; 4];
    let mut accumulated = torque;
    for (slot, joint) in (3..=6).rev().enumerate() {
        accumulated = kinematics::joint_rotation(joint, joints[joint - 1]).inverse() * accumulated;
        joint_torques[slot] = accumulated.z.round() as i32;
    }

    CompensatedSample {
        offset_corrected,
        compensated: [
            force.x.round() as i32,
            force.y.round() as i32,
            force.z.round() as i32,
            torque.x.round() as i32,
            torque.y.round() as i32,
            torque.z.round() as i32,
        ],
        joint_torques,
    }
}

struct EngineInner {
    raw: RawSample,
    joints: Joints,
    sample: CompensatedSample,
}

/// Caches the latest raw sample and joint vector and keeps the published
/// [`CompensatedSample`] in step with them. The two inputs arrive from
/// different session threads and may be a tick or two apart; that skew is
/// bounded by the tick period and accepted.
pub struct ForceEngine {
    inner: Mutex<EngineInner>,
}

impl ForceEngine {
    pub fn new() -> Self {
        let raw = [0; 6];
        let joints = JOINTS_AT_ZERO;
        ForceEngine {
            inner: Mutex::new(EngineInner {
                raw,
                joints,
                sample: compensate(&raw, &joints),
            }),
        }
    }

    /// New raw counts from the sensor poller.
    pub fn update_raw(&self, raw: RawSample) {
        let mut inner = self.inner.lock().unwrap();
        inner.raw = raw;
        let sample = compensate(&inner.raw, &inner.joints);
        inner.sample = sample;
    }

    /// New joint vector from the controller session.
    pub fn update_joints(&self, joints: Joints) {
        let mut inner = self.inner.lock().unwrap();
        inner.joints = joints;
        let sample = compensate(&inner.raw, &inner.joints);
        inner.sample = sample;
    }

    /// Snapshot of the latest published sample.
    pub fn sample(&self) -> CompensatedSample {
        self.inner.lock().unwrap().sample
    }
}

impl Default for ForceEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_input_yields_bias_only() {
        let sample = compensate(&[0; 6], &JOINTS_AT_ZERO);
        assert_eq!(sample.offset_corrected, CHANNEL_BIAS);
        // At the taring pose the gravity delta is zero and the frame
        // correction is the identity, so force channels carry the bias alone.
        for i in 0..3 {
            assert_eq!(sample.compensated[i], CHANNEL_BIAS[i]);
        }
        for i in 0..3 {
            assert_eq!(sample.compensated[3 + i], CHANNEL_BIAS[3 + i] + TORQUE_BIAS[i]);
        }
    }

    #[test]
    fn offset_corrected_is_raw_plus_bias_at_any_pose() {
        let raw = [100, -200, 300, -40, 50, -60];
        let joints = [10, 20, 30, 40, 50, 60];
        let sample = compensate(&raw, &joints);
        for i in 0..6 {
            assert_eq!(sample.offset_corrected[i], raw[i] + CHANNEL_BIAS[i]);
        }
    }

    #[test]
    fn recompute_triggers_on_either_input() {
        let engine = ForceEngine::new();
        let initial = engine.sample();

        engine.update_raw([500, 0, 0, 0, 0, 0]);
        let after_raw = engine.sample();
        assert_ne!(initial, after_raw);
        assert_eq!(after_raw.offset_corrected[0], 500 + CHANNEL_BIAS[0]);

        engine.update_joints([0, 45, 0, 0, 0, 0]);
        let after_joints = engine.sample();
        // Joint change moves the gravity terms but not the raw view.
        assert_eq!(after_joints.offset_corrected, after_raw.offset_corrected);
        assert_ne!(after_joints.compensated, after_raw.compensated);
    }

    #[test]
    fn gravity_terms_depend_only_on_pose_change() {
        let raw = [0; 6];
        let tilted = [0, 90, 0, 0, 0, 0];
        let sample = compensate(&raw, &tilted);
        // With the arm tilted the gravity delta is nonzero, so the force
        // channels no longer equal the bias constants.
        let forces = &sample.compensated[..3];
        assert_ne!(forces, &CHANNEL_BIAS[..3]);
    }

    #[test]
    fn joint_torque_walk_has_four_stages() {
        let sample = compensate(&[0, 0, 0, 1000, 2000, 3000], &JOINTS_AT_ZERO);
        // Stage values are projections of a nonzero torque vector; at least
        // one stage must see a nonzero Z component.
        assert!(sample.joint_torques.iter().any(|t| *t != 0));
    }
}
