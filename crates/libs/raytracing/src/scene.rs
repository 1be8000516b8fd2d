//! The single hardcoded scene and the per-frame constants both render paths read.

use crate::allocator::{align_up, PLACEMENT_ALIGNMENT};
use crate::device::{VertexAttribute, VertexFormat};
use crate::types::{Mat4, Point, Vec3, Vec4};

#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 4],
}

pub const VERTEX_STRIDE: u32 = std::mem::size_of::<Vertex>() as u32;

pub const VERTEX_ATTRIBUTES: [VertexAttribute; 2] = [
    VertexAttribute {
        location: 0,
        format: VertexFormat::Float3,
        offset: 0,
    },
    VertexAttribute {
        location: 1,
        format: VertexFormat::Float4,
        offset: 12,
    },
];

const PLANE_HEIGHT: f32 = -0.8;
const PLANE_EXTENT: f32 = 1.5;
const WHITE: [f32; 4] = [1.0, 1.0, 1.0, 1.0];

pub struct GroundPlane {
    pub vertices: [Vertex; 6],
    /// Placement of the plane's only instance.
    pub translation: Vec3,
}

impl Default for GroundPlane {
    fn default() -> Self {
        let corner = |x: f32, z: f32| Vertex {
            position: [x * PLANE_EXTENT, PLANE_HEIGHT, z * PLANE_EXTENT],
            color: WHITE,
        };
        Self {
            vertices: [
                corner(-1.0, 1.0),
                corner(-1.0, -1.0),
                corner(1.0, 1.0),
                corner(1.0, 1.0),
                corner(-1.0, -1.0),
                corner(1.0, -1.0),
            ],
            translation: Vec3::new(0.0, 0.0, 2.0),
        }
    }
}

impl GroundPlane {
    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }

    pub fn vertex_bytes(&self) -> Vec<u8> {
        self.vertices
            .iter()
            .flat_map(|vertex| vertex.position.iter().chain(vertex.color.iter()))
            .flat_map(|value| value.to_le_bytes())
            .collect()
    }

    /// Object-to-world transform of the plane instance under a world rotation.
    pub fn instance_transform(&self, world: &Mat4) -> Mat4 {
        world * Mat4::new_translation(&self.translation)
    }
}

/// Per-frame scene state handed over by the application.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameView {
    pub world: Mat4,
    pub view: Mat4,
    pub projection: Mat4,
    pub eye: Point,
    pub light_intensity: f32,
}

impl Default for FrameView {
    fn default() -> Self {
        let eye = Point::new(0.0, 0.0, 3.0);
        Self {
            world: Mat4::identity(),
            view: Mat4::look_at_rh(&eye, &Point::origin(), &Vec3::y()),
            projection: Mat4::new_perspective(1.0, 37.5f32.to_radians(), 1.0, 1000.0),
            eye,
            light_intensity: 0.3,
        }
    }
}

pub const LIGHT_POSITION: [f32; 4] = [0.0, -100.0, 1500.0, 0.0];

fn push_matrix(bytes: &mut Vec<u8>, matrix: &Mat4) {
    bytes.extend(matrix.as_slice().iter().flat_map(|value| value.to_le_bytes()));
}

fn push_vector(bytes: &mut Vec<u8>, vector: &Vec4) {
    bytes.extend(vector.iter().flat_map(|value| value.to_le_bytes()));
}

fn pad_to_placement(mut bytes: Vec<u8>) -> Vec<u8> {
    bytes.resize(align_up(bytes.len() as u64, PLACEMENT_ALIGNMENT) as usize, 0);
    bytes
}

/// Camera constant buffer of the raytracing heap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraConstants {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_inverse: Mat4,
    pub projection_inverse: Mat4,
    /// Light position in xyz, intensity in w.
    pub light: Vec4,
}

impl CameraConstants {
    pub const SIZE: u64 = 4 * 64 + 16;

    /// Ray tracing camera: 45 degree vertical field of view, near 0.1, far 1000.
    pub fn new(frame: &FrameView, aspect: f32) -> Self {
        let projection = Mat4::new_perspective(aspect, 45f32.to_radians(), 0.1, 1000.0);
        Self {
            view: frame.view,
            projection,
            view_inverse: frame.view.try_inverse().unwrap_or_else(Mat4::identity),
            projection_inverse: projection.try_inverse().unwrap_or_else(Mat4::identity),
            light: Vec4::new(
                LIGHT_POSITION[0],
                LIGHT_POSITION[1],
                LIGHT_POSITION[2],
                frame.light_intensity,
            ),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::SIZE as usize);
        for matrix in [
            &self.view,
            &self.projection,
            &self.view_inverse,
            &self.projection_inverse,
        ] {
            push_matrix(&mut bytes, matrix);
        }
        push_vector(&mut bytes, &self.light);
        pad_to_placement(bytes)
    }
}

/// Vertex stage constants of the raster path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformConstants {
    pub world: Mat4,
    pub view: Mat4,
    pub projection: Mat4,
    pub view_inverse: Mat4,
    pub projection_inverse: Mat4,
}

impl TransformConstants {
    pub const SIZE: u64 = 5 * 64;

    pub fn new(frame: &FrameView, world: Mat4) -> Self {
        Self {
            world,
            view: frame.view,
            projection: frame.projection,
            view_inverse: frame.view.try_inverse().unwrap_or_else(Mat4::identity),
            projection_inverse: frame
                .projection
                .try_inverse()
                .unwrap_or_else(Mat4::identity),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::SIZE as usize);
        for matrix in [
            &self.world,
            &self.view,
            &self.projection,
            &self.view_inverse,
            &self.projection_inverse,
        ] {
            push_matrix(&mut bytes, matrix);
        }
        pad_to_placement(bytes)
    }
}

/// Pixel stage constants of the raster path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightConstants {
    pub light_position: Vec4,
    /// White light, intensity in alpha.
    pub light_color: Vec4,
    pub camera_position: Vec4,
}

impl LightConstants {
    pub const SIZE: u64 = 3 * 16;

    pub fn new(frame: &FrameView) -> Self {
        Self {
            light_position: Vec4::from(LIGHT_POSITION),
            light_color: Vec4::new(1.0, 1.0, 1.0, frame.light_intensity),
            camera_position: Vec4::new(frame.eye.x, frame.eye.y, frame.eye.z, 0.0),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::SIZE as usize);
        for vector in [&self.light_position, &self.light_color, &self.camera_position] {
            push_vector(&mut bytes, vector);
        }
        pad_to_placement(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plane_vertices_are_two_white_triangles_below_the_origin() {
        let plane = GroundPlane::default();
        assert_eq!(VERTEX_STRIDE, 28);
        assert_eq!(plane.vertex_count(), 6);
        assert_eq!(plane.vertex_bytes().len(), 6 * 28);
        for vertex in plane.vertices {
            assert_eq!(vertex.position[1], -0.8);
            assert_eq!(vertex.position[0].abs(), 1.5);
            assert_eq!(vertex.position[2].abs(), 1.5);
            assert_eq!(vertex.color, WHITE);
        }
    }

    #[test]
    fn instance_transform_applies_the_world_rotation_last() {
        let plane = GroundPlane::default();
        let identity = plane.instance_transform(&Mat4::identity());
        assert_eq!(identity[(2, 3)], 2.0);

        let half_turn = Mat4::from_euler_angles(0.0, std::f32::consts::PI, 0.0);
        let rotated = plane.instance_transform(&half_turn);
        assert!((rotated[(2, 3)] + 2.0).abs() < 1e-5);
    }

    #[test]
    fn constant_blocks_are_padded_to_placement_units() {
        let frame = FrameView::default();
        assert_eq!(CameraConstants::new(&frame, 1.0).to_bytes().len(), 512);
        assert_eq!(
            TransformConstants::new(&frame, Mat4::identity()).to_bytes().len(),
            512
        );
        assert_eq!(LightConstants::new(&frame).to_bytes().len(), 256);
    }

    #[test]
    fn light_intensity_lands_in_the_alpha_channel() {
        let frame = FrameView {
            light_intensity: 0.75,
            ..FrameView::default()
        };
        let bytes = LightConstants::new(&frame).to_bytes();
        let alpha = f32::from_le_bytes(bytes[28..32].try_into().unwrap());
        assert_eq!(alpha, 0.75);

        let camera = CameraConstants::new(&frame, 1.0).to_bytes();
        let w = f32::from_le_bytes(camera[268..272].try_into().unwrap());
        assert_eq!(w, 0.75);
    }

    #[test]
    fn inverse_view_undoes_the_view() {
        let frame = FrameView::default();
        let camera = CameraConstants::new(&frame, 16.0 / 9.0);
        let product = camera.view * camera.view_inverse;
        assert!((product - Mat4::identity()).norm() < 1e-5);
    }
}
