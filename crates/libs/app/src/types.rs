use nalgebra::{Matrix4, Point3, UnitQuaternion, UnitVector3, Vector3};

pub type Point = Point3<f32>;
pub type Vec3 = Vector3<f32>;
pub type UniVec3 = UnitVector3<f32>;
pub type Mat4 = Matrix4<f32>;
pub type Quat = UnitQuaternion<f32>;
