//! Geometry utilities: SO(3) maps, unit quaternions, bearings, SE(2) and SE(3) transforms.

pub mod bearing;
pub mod camera;
pub mod quat;
pub mod se2;
pub mod so3;
pub mod xform;

pub use bearing::{bearing_boxminus, bearing_boxplus, bearing_difference, tangent_basis, zeta};
pub use camera::CameraIntrinsics;
pub use quat::Quat;
pub use se2::{concatenate_se2, invert_se2, Se2};
pub use so3::{skew, E_X, E_Y, E_Z, I_2X3};
pub use xform::Xform;
