//! Per-frame GPU data

use ash::vk;
use bytemuck::{Pod, Zeroable};

use crate::foundation::math::{Mat4, Vec3};
use crate::vulkan::{Buffer, FrameSync};

/// Uniform block bound at set 0, binding 0
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FrameUniforms {
    /// World-to-view matrix (column-major)
    pub view: [[f32; 4]; 4],
    /// View-to-clip matrix (column-major)
    pub proj: [[f32; 4]; 4],
    /// Direction the light travels in world space; `w` is unused
    pub light_dir: [f32; 4],
}

impl FrameUniforms {
    /// Pack camera matrices and a light direction
    pub fn new(view: &Mat4, proj: &Mat4, light_dir: &Vec3) -> Self {
        let dir = light_dir.try_normalize(f32::EPSILON).unwrap_or_else(|| Vec3::new(0.0, -1.0, 0.0));
        Self {
            view: (*view).into(),
            proj: (*proj).into(),
            light_dir: [dir.x, dir.y, dir.z, 0.0],
        }
    }
}

/// Push constant block: the model matrix
pub const MODEL_PUSH_CONSTANT_SIZE: u32 = std::mem::size_of::<[[f32; 4]; 4]>() as u32;

/// Resources owned by one frame in flight
pub struct FrameResources {
    /// Semaphores and fence for this frame
    pub sync: FrameSync,
    /// Command buffer re-recorded every time the frame comes around
    pub command_buffer: vk::CommandBuffer,
    /// Host-visible uniform buffer
    pub uniforms: Buffer,
    /// Set 0 bound for this frame
    pub descriptor_set: vk::DescriptorSet,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_uniform_layout() {
        // Matches the std140 block in mesh.vert
        assert_eq!(std::mem::size_of::<FrameUniforms>(), 144);
        assert_eq!(MODEL_PUSH_CONSTANT_SIZE, 64);
    }

    #[test]
    fn test_matrices_stay_column_major() {
        let view = Mat4::new_translation(&Vec3::new(1.0, 2.0, 3.0));
        let uniforms = FrameUniforms::new(&view, &Mat4::identity(), &Vec3::new(0.0, -2.0, 0.0));

        // Translation lives in the fourth column
        assert_eq!(uniforms.view[3], [1.0, 2.0, 3.0, 1.0]);
        assert_relative_eq!(uniforms.light_dir[1], -1.0);
    }

    #[test]
    fn test_zero_light_direction_falls_back() {
        let uniforms = FrameUniforms::new(&Mat4::identity(), &Mat4::identity(), &Vec3::zeros());
        assert_eq!(uniforms.light_dir, [0.0, -1.0, 0.0, 0.0]);
    }
}
