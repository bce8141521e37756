//! Demo scene data for the path tracer, packed through the compiled host
//! layouts of `Scene` and `Spheres`.

use thiserror::Error;

use crate::binding::device::{DeviceError, ResourceDevice};
use crate::binding::resources::ResourceRegistry;
use crate::compiler::layout::{CompiledLayouts, FieldAccessError, HostLayout};

const EPSILON: f32 = 1e-6;

#[derive(Error, Debug)]
pub enum SceneError {
    #[error("schema has no buffer layout named '{0}'")]
    MissingLayout(&'static str),

    #[error("{count} spheres do not fit in a buffer of {capacity}")]
    TooManySpheres { count: usize, capacity: u32 },

    #[error(transparent)]
    Field(#[from] FieldAccessError),

    #[error(transparent)]
    Device(#[from] DeviceError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub origin: [f32; 3],
    pub target: [f32; 3],
    pub vertical_fov_degrees: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            origin: [0.0, 1.0, 4.0],
            target: [0.0, 0.5, 0.0],
            vertical_fov_degrees: 45.0,
        }
    }
}

fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn scale(a: [f32; 3], s: f32) -> [f32; 3] {
    [a[0] * s, a[1] * s, a[2] * s]
}

fn normalize(a: [f32; 3]) -> [f32; 3] {
    let len = (a[0] * a[0] + a[1] * a[1] + a[2] * a[2]).sqrt();
    if len < EPSILON {
        [0.0, 0.0, -1.0]
    } else {
        scale(a, 1.0 / len)
    }
}

impl Camera {
    /// Forward, right and up vectors; right and up are scaled so that
    /// `forward + right * x + up * y` spans the view for `x, y` in `[-1, 1]`.
    pub fn basis(&self, aspect: f32) -> ([f32; 3], [f32; 3], [f32; 3]) {
        let forward = normalize(sub(self.target, self.origin));
        let right = normalize(cross(forward, [0.0, 1.0, 0.0]));
        let up = cross(right, forward);
        let half_height = (self.vertical_fov_degrees.to_radians() * 0.5).tan();
        let aspect = if aspect.is_finite() && aspect > 0.0 { aspect } else { 1.0 };
        (
            forward,
            scale(right, half_height * aspect),
            scale(up, half_height),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sphere {
    pub center: [f32; 3],
    pub radius: f32,
    pub albedo: [f32; 3],
    pub emission: [f32; 3],
}

/// A ground sphere, three diffuse spheres and a light.
pub fn demo_spheres() -> Vec<Sphere> {
    vec![
        Sphere {
            center: [0.0, -1000.0, 0.0],
            radius: 1000.0,
            albedo: [0.6, 0.6, 0.6],
            emission: [0.0; 3],
        },
        Sphere {
            center: [-1.2, 0.5, 0.0],
            radius: 0.5,
            albedo: [0.8, 0.2, 0.2],
            emission: [0.0; 3],
        },
        Sphere {
            center: [0.0, 0.5, 0.0],
            radius: 0.5,
            albedo: [0.2, 0.8, 0.2],
            emission: [0.0; 3],
        },
        Sphere {
            center: [1.2, 0.5, 0.0],
            radius: 0.5,
            albedo: [0.2, 0.2, 0.8],
            emission: [0.0; 3],
        },
        Sphere {
            center: [0.0, 3.0, 1.0],
            radius: 0.75,
            albedo: [0.0; 3],
            emission: [6.0, 5.5, 5.0],
        },
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameParams {
    pub frame_index: u32,
    pub accumulated_samples: u32,
    pub max_bounces: u32,
}

/// Packed contents of the `Scene` and `Spheres` buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneBuffers {
    pub scene: Vec<u8>,
    pub spheres: Vec<u8>,
}

fn layout<'a>(layouts: &'a CompiledLayouts, name: &'static str) -> Result<&'a HostLayout, SceneError> {
    layouts.buffer(name).ok_or(SceneError::MissingLayout(name))
}

fn vec4(v: [f32; 3], w: f32) -> [f32; 4] {
    [v[0], v[1], v[2], w]
}

pub fn encode_scene(
    layouts: &CompiledLayouts,
    camera: &Camera,
    spheres: &[Sphere],
    viewport: (u32, u32),
    frame: FrameParams,
) -> Result<SceneBuffers, SceneError> {
    let scene_layout = layout(layouts, "Scene")?;
    let sphere_layout = layout(layouts, "Spheres")?;
    if spheres.len() > sphere_layout.element_count as usize {
        return Err(SceneError::TooManySpheres {
            count: spheres.len(),
            capacity: sphere_layout.element_count,
        });
    }

    let (width, height) = (viewport.0.max(1) as f32, viewport.1.max(1) as f32);
    let (forward, right, up) = camera.basis(width / height);

    let mut scene = scene_layout.zeroed();
    scene_layout.write_field(&mut scene, 0, "camera_origin", vec4(camera.origin, 1.0))?;
    scene_layout.write_field(&mut scene, 0, "camera_forward", vec4(forward, 0.0))?;
    scene_layout.write_field(&mut scene, 0, "camera_right", vec4(right, 0.0))?;
    scene_layout.write_field(&mut scene, 0, "camera_up", vec4(up, 0.0))?;
    scene_layout.write_field(
        &mut scene,
        0,
        "viewport",
        [width, height, 1.0 / width, 1.0 / height],
    )?;
    scene_layout.write_field(
        &mut scene,
        0,
        "frame",
        [
            frame.frame_index,
            frame.accumulated_samples,
            spheres.len() as u32,
            frame.max_bounces,
        ],
    )?;

    let mut packed = sphere_layout.zeroed();
    for (i, sphere) in spheres.iter().enumerate() {
        let i = i as u32;
        sphere_layout.write_field(&mut packed, i, "center_radius", vec4(sphere.center, sphere.radius))?;
        sphere_layout.write_field(&mut packed, i, "albedo", vec4(sphere.albedo, 1.0))?;
        sphere_layout.write_field(&mut packed, i, "emission", vec4(sphere.emission, 1.0))?;
    }

    Ok(SceneBuffers {
        scene,
        spheres: packed,
    })
}

/// Upload packed scene buffers to their registered resources.
pub fn upload_scene<D: ResourceDevice + ?Sized>(
    resources: &ResourceRegistry,
    device: &mut D,
    buffers: &SceneBuffers,
) -> Result<(), SceneError> {
    resources.write(device, "Scene", &buffers.scene)?;
    resources.write(device, "Spheres", &buffers.spheres)?;
    Ok(())
}
