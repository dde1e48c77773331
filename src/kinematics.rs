//! Forward kinematics of the arm and the rotation conversions around it.
//!
//! The kinematic model is the Denavit-Hartenberg chain of this specific
//! Kawasaki manipulator: one fixed base transform followed by six joint
//! transforms, composed base-to-tool. Joint angles arrive in degrees (that is
//! what the controller reports); every function converts to radians at its
//! own boundary.

use nalgebra::{Isometry3, Matrix3, Rotation3, Translation3, UnitQuaternion, Vector3};

/// Joint angles as reported on the wire, degrees.
pub type Joints = [i32; 6];

/// Pose of the tool frame: Cartesian position and rotation.
pub type Pose = Isometry3<f64>;

pub const JOINTS_AT_ZERO: Joints = [0; 6];

/// One row of the DH table: (θ offset, link offset d, link length a, twist α).
struct DhRow {
    theta_offset: f64,
    d: f64,
    a: f64,
    alpha: f64,
}

use std::f64::consts::{FRAC_PI_2, PI};

/// Joint rows 1..6. Lengths in meters, angles in radians.
const DH_TABLE: [DhRow; 6] = [
    DhRow { theta_offset: -FRAC_PI_2, d: 0.0, a: 0.1, alpha: FRAC_PI_2 },
    DhRow { theta_offset: -FRAC_PI_2, d: 0.0, a: 0.45, alpha: PI },
    DhRow { theta_offset: FRAC_PI_2, d: 0.0, a: 0.04, alpha: FRAC_PI_2 },
    DhRow { theta_offset: 0.0, d: 0.45, a: 0.0, alpha: -FRAC_PI_2 },
    DhRow { theta_offset: 0.0, d: 0.0, a: 0.0, alpha: FRAC_PI_2 },
    DhRow { theta_offset: FRAC_PI_2, d: 0.1, a: 0.0, alpha: 0.0 },
];

/// The single DH transform Rz(θ)·Tz(d)·Tx(a)·Rx(α).
fn dh_transform(theta: f64, d: f64, a: f64, alpha: f64) -> Isometry3<f64> {
    let rotation = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), theta)
        * UnitQuaternion::from_axis_angle(&Vector3::x_axis(), alpha);
    let translation = Translation3::new(a * theta.cos(), a * theta.sin(), d);
    Isometry3::from_parts(translation, rotation)
}

/// Fixed transform from world to the first joint axis.
pub fn base_transform() -> Isometry3<f64> {
    dh_transform(0.0, 0.0, 0.0, PI)
}

/// Transform contributed by one joint (1..=6) at the given wire angle.
pub fn joint_transform(joint: usize, q_deg: i32) -> Isometry3<f64> {
    let row = &DH_TABLE[joint - 1];
    dh_transform(
        (q_deg as f64).to_radians() + row.theta_offset,
        row.d,
        row.a,
        row.alpha,
    )
}

/// Rotation part of one joint's transform; used by the torque projection walk.
pub fn joint_rotation(joint: usize, q_deg: i32) -> Rotation3<f64> {
    joint_transform(joint, q_deg).rotation.to_rotation_matrix()
}

/// Tool pose in base coordinates for the given joint vector.
pub fn forward(joints: &Joints) -> Pose {
    let mut pose = base_transform();
    for (joint, q) in joints.iter().enumerate() {
        pose *= joint_transform(joint + 1, *q);
    }
    pose
}

/// Orientation of the tool frame for the given joint vector.
pub fn tool_rotation(joints: &Joints) -> Rotation3<f64> {
    forward(joints).rotation.to_rotation_matrix()
}

/// Fixed rotation between the sensor mounting and the robot base, Rz(+90°).
pub fn base_modification() -> Rotation3<f64> {
    Rotation3::from_matrix_unchecked(Matrix3::new(
        0.0, -1.0, 0.0, //
        1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0,
    ))
}

/// ZYZ Euler angles (degrees) to a rotation matrix, Rz(o)·Ry(a)·Rz(t) in
/// closed form.
pub fn euler_zyz(o: f64, a: f64, t: f64) -> Matrix3<f64> {
    let (so, co) = o.to_radians().sin_cos();
    let (sa, ca) = a.to_radians().sin_cos();
    let (st, ct) = t.to_radians().sin_cos();
    Matrix3::new(
        co * ca * ct - so * st,
        -co * ca * st - so * ct,
        co * sa,
        so * ca * ct + co * st,
        -so * ca * st + co * ct,
        so * sa,
        -sa * ct,
        sa * st,
        ca,
    )
}

/// Extracts XYZ-convention Euler angles (degrees) from a rotation matrix.
///
/// Near the gimbal boundary (asin result at ±90°) the decomposition is
/// degenerate: the middle angle is forced to zero and the remaining rotation
/// is folded into a single atan2 term. Displays and logs downstream expect
/// exactly this behavior at the boundary; do not "fix" it.
pub fn matrix_to_euler_xyz(m: &Matrix3<f64>) -> [f64; 3] {
    let theta_x = m[(2, 1)].asin();
    let theta_y;
    let theta_z;
    if theta_x < FRAC_PI_2 {
        if theta_x > -FRAC_PI_2 {
            theta_z = (-m[(0, 1)]).atan2(m[(1, 1)]);
            theta_y = (-m[(2, 0)]).atan2(m[(2, 2)]);
        } else {
            theta_z = -(-m[(0, 2)]).atan2(m[(0, 0)]);
            theta_y = 0.0;
        }
    } else {
        theta_z = m[(0, 2)].atan2(m[(0, 0)]);
        theta_y = 0.0;
    }
    [
        theta_x.to_degrees(),
        theta_y.to_degrees(),
        theta_z.to_degrees(),
    ]
}

/// Direction of the tool axis for the given ZYZ orientation: the ZYZ rotation
/// applied to +Z, with components below 1e-4 snapped to zero for display.
pub fn instrument_vector(o: f64, a: f64, t: f64) -> Vector3<f64> {
    let mut v = euler_zyz(o, a, t) * Vector3::z();
    for i in 0..3 {
        if v[i].abs() < 1e-4 {
            v[i] = 0.0;
        }
    }
    v
}

/// Components of a fixed downward gravity pull of the given magnitude,
/// expressed in the tool frame at the given joint vector.
pub fn gravity_in_tool(joints: &Joints, weight: f64) -> Vector3<f64> {
    tool_rotation(joints).inverse() * Vector3::new(0.0, 0.0, -weight)
}
