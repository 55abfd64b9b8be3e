//! Camera-image background for AR scenes
//!
//! Draws the platform camera feed as a full-screen quad behind the scene.
//! The quad's texture coordinates come from the AR platform every frame, so
//! the vertex buffer is rewritten in [`ArBackground::prepare`] before the
//! render pass opens, and the quad is drawn in [`ArBackground::render`].

use std::sync::Arc;

use nalgebra::{Matrix4, Vector3};

use super::{ArModule, TEX_COORDS_LENGTH};
use crate::gfx::{CommandBufferType, GfxApi};
use crate::vulkan::{
    BindingLayout, Buffer, CommandBuffer, Device, DeviceDispatch, InputAssembler, PipelineState,
    Sampler, Texture, VulkanError, VulkanResult,
};

/// Vertex and fragment source of one shader variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderSource {
    /// Vertex stage
    pub vert: &'static str,
    /// Fragment stage
    pub frag: &'static str,
}

/// Shader variants per shading language generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderSources {
    /// Vulkan/Metal GLSL 4.5
    pub glsl4: ShaderSource,
    /// GLES 3
    pub glsl3: ShaderSource,
    /// GLES 2
    pub glsl1: ShaderSource,
}

impl ShaderSources {
    /// Variant for `api`
    pub const fn select(&self, api: GfxApi) -> &ShaderSource {
        match api {
            GfxApi::Gles2 => &self.glsl1,
            GfxApi::Gles3 => &self.glsl3,
            GfxApi::Metal | GfxApi::Vulkan => &self.glsl4,
        }
    }
}

/// Background shaders; the uniform block sits in the material set at binding 0
/// and the camera sampler at binding 1
pub const BACKGROUND_SHADERS: ShaderSources = ShaderSources {
    glsl4: ShaderSource {
        vert: r"
precision highp float;
layout(location = 0) in vec2 a_position;
layout(location = 1) in vec2 a_texCoord;
layout(set = 1, binding = 0) uniform Mats {
    mat4 u_MVP;
    mat4 u_CoordMatrix;
};
layout(location = 0) out vec2 v_texCoord;
void main() {
    v_texCoord = (u_CoordMatrix * vec4(a_texCoord, 0, 1)).xy;
    gl_Position = u_MVP * vec4(a_position, 0, 1);
}
",
        frag: r"
precision highp float;
layout(location = 0) in vec2 v_texCoord;
layout(set = 1, binding = 1) uniform sampler2D u_texture;
layout(location = 0) out vec4 o_color;
void main() {
    o_color = texture(u_texture, v_texCoord);
}
",
    },
    glsl3: ShaderSource {
        vert: r"
in vec2 a_position;
in vec2 a_texCoord;
layout(std140) uniform Mats {
    mat4 u_MVP;
    mat4 u_CoordMatrix;
};
out vec2 v_texCoord;
void main() {
    v_texCoord = (u_CoordMatrix * vec4(a_texCoord, 0, 1)).xy;
    gl_Position = u_MVP * vec4(a_position, 0, 1);
}
",
        frag: r"
#extension GL_OES_EGL_image_external_essl3 : require
precision mediump float;
in vec2 v_texCoord;
uniform samplerExternalOES u_texture;
out vec4 o_color;
void main() {
    o_color = texture(u_texture, v_texCoord);
}
",
    },
    glsl1: ShaderSource {
        vert: r"
attribute vec2 a_position;
attribute vec2 a_texCoord;
uniform mat4 u_MVP;
uniform mat4 u_CoordMatrix;
varying vec2 v_texCoord;
void main() {
    v_texCoord = (u_CoordMatrix * vec4(a_texCoord, 0, 1)).xy;
    gl_Position = u_MVP * vec4(a_position, 0, 1);
}
",
        frag: r"
#extension GL_OES_EGL_image_external : require
precision mediump float;
varying vec2 v_texCoord;
uniform samplerExternalOES u_texture;
void main() {
    gl_FragColor = texture2D(u_texture, v_texCoord);
}
",
    },
};

/// Triangle list over the four quad corners
pub const QUAD_INDICES: [u16; 6] = [0, 2, 1, 1, 2, 3];

/// Interleaved `position.xy, uv` for the quad corners
/// (bottom-left, top-left, bottom-right, top-right)
pub fn quad_vertices(tex_coords: &[f32; TEX_COORDS_LENGTH]) -> [f32; 16] {
    let corners = [[-1.0, -1.0], [-1.0, 1.0], [1.0, -1.0], [1.0, 1.0]];
    let mut vertices = [0.0; 16];
    for (i, corner) in corners.iter().enumerate() {
        vertices[i * 4] = corner[0];
        vertices[i * 4 + 1] = corner[1];
        vertices[i * 4 + 2] = tex_coords[i * 2];
        vertices[i * 4 + 3] = tex_coords[i * 2 + 1];
    }
    vertices
}

/// Contents of the `Mats` uniform block
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy)]
pub struct BackgroundUniformData {
    /// Quad transform, pushes the quad to the far plane
    pub mvp: [f32; 16],
    /// Texture coordinate transform
    pub coord_matrix: [f32; 16],
}

unsafe impl bytemuck::Pod for BackgroundUniformData {}
unsafe impl bytemuck::Zeroable for BackgroundUniformData {}

impl Default for BackgroundUniformData {
    fn default() -> Self {
        let mvp = Matrix4::new_translation(&Vector3::new(0.0, 0.0, -1.0))
            * Matrix4::new_nonuniform_scaling(&Vector3::new(1.0, 1.0, -1.0));
        let mut data: Self = bytemuck::Zeroable::zeroed();
        data.mvp.copy_from_slice(mvp.as_slice());
        data.coord_matrix.copy_from_slice(Matrix4::<f32>::identity().as_slice());
        data
    }
}

/// GPU objects the background draws with, created by the render pipeline
#[derive(Debug, Clone)]
pub struct BackgroundResources {
    /// Pipeline built from [`BACKGROUND_SHADERS`]
    pub pipeline_state: Arc<PipelineState>,
    /// Four interleaved vertices, rewritten every frame
    pub vertex_buffer: Arc<Buffer>,
    /// [`QUAD_INDICES`], 16-bit
    pub index_buffer: Arc<Buffer>,
    /// [`BackgroundUniformData`]
    pub uniform_buffer: Arc<Buffer>,
    /// Camera texture sampler
    pub sampler: Arc<Sampler>,
    /// Descriptor set holding the uniform block and camera sampler
    pub material_set: usize,
}

/// Camera background renderer
#[derive(Debug)]
pub struct ArBackground {
    pipeline_state: Arc<PipelineState>,
    vertex_buffer: Arc<Buffer>,
    uniform_buffer: Arc<Buffer>,
    sampler: Arc<Sampler>,
    material_set: usize,
    input_assembler: InputAssembler,
    binding_layout: BindingLayout,
    camera_texture: Arc<Texture>,
    texture_id: u32,
    texture_bound: bool,
    static_data_uploaded: bool,
}

impl ArBackground {
    /// Set up the background and import the camera texture.
    ///
    /// `import_camera_texture` runs while this thread holds exclusive native
    /// access to the device, and must return a texture carrying the external
    /// id the AR platform renders the camera image into.
    pub fn activate<D, F>(
        device: &Device<D>,
        resources: BackgroundResources,
        import_camera_texture: F,
    ) -> VulkanResult<Self>
    where
        D: DeviceDispatch,
        F: FnOnce(&D) -> VulkanResult<Texture>,
    {
        let camera_texture = {
            let _access = device.native_access();
            import_camera_texture(device.dispatch())?
        };
        let texture_id = camera_texture
            .external_id()
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: "camera texture has no external id".to_string(),
            })?;

        let mut binding_layout = BindingLayout::new(resources.pipeline_state.shader());
        binding_layout.bind_buffer(
            resources.material_set,
            0,
            Arc::clone(&resources.uniform_buffer),
        )?;

        let mut input_assembler = InputAssembler::new(
            vec![Arc::clone(&resources.vertex_buffer)],
            Some(resources.index_buffer),
        );
        input_assembler.set_index_count(QUAD_INDICES.len() as u32);

        log::debug!("AR background activated with camera texture {}", texture_id);

        Ok(Self {
            pipeline_state: resources.pipeline_state,
            vertex_buffer: resources.vertex_buffer,
            uniform_buffer: resources.uniform_buffer,
            sampler: resources.sampler,
            material_set: resources.material_set,
            input_assembler,
            binding_layout,
            camera_texture: Arc::new(camera_texture),
            texture_id,
            texture_bound: false,
            static_data_uploaded: false,
        })
    }

    /// External id of the camera texture
    pub fn texture_id(&self) -> u32 {
        self.texture_id
    }

    /// Camera texture
    pub fn camera_texture(&self) -> &Arc<Texture> {
        &self.camera_texture
    }

    /// Quad input assembler
    pub fn input_assembler(&self) -> &InputAssembler {
        &self.input_assembler
    }

    /// Upload this frame's quad. Must be recorded outside a render pass.
    ///
    /// Returns `false` when AR is not running and nothing was recorded.
    pub fn prepare<D: DeviceDispatch>(
        &mut self,
        ar: &mut ArModule,
        cmd: &mut CommandBuffer<D>,
    ) -> VulkanResult<bool> {
        if !ar.check_start() {
            return Ok(false);
        }
        if cmd.kind() == CommandBufferType::Primary && cmd.is_in_render_pass() {
            log::error!("AR background must be prepared outside of a render pass");
            return Ok(false);
        }

        if !self.texture_bound {
            ar.set_camera_texture_name(self.texture_id);
            self.binding_layout
                .bind_texture(self.material_set, 1, Arc::clone(&self.camera_texture))?;
            self.binding_layout
                .bind_sampler(self.material_set, 1, Arc::clone(&self.sampler))?;
            self.texture_bound = true;
        }

        if !self.static_data_uploaded {
            let indices_uploaded = self
                .input_assembler
                .index_buffer()
                .map_or(true, |ib| cmd.update_buffer(ib, 0, bytemuck::cast_slice(&QUAD_INDICES)));
            let uniforms_uploaded = cmd.update_buffer(
                &self.uniform_buffer,
                0,
                bytemuck::bytes_of(&BackgroundUniformData::default()),
            );
            // Retried next frame until both land
            self.static_data_uploaded = indices_uploaded && uniforms_uploaded;
        }

        let vertices = quad_vertices(ar.camera_tex_coords());
        cmd.update_buffer(&self.vertex_buffer, 0, bytemuck::cast_slice(&vertices));
        Ok(true)
    }

    /// Draw the quad inside the current render pass
    pub fn render<D: DeviceDispatch>(
        &mut self,
        ar: &ArModule,
        cmd: &mut CommandBuffer<D>,
    ) -> VulkanResult<()> {
        if !ar.check_start() {
            return Ok(());
        }
        if !self.texture_bound {
            log::warn!("AR background rendered before it was prepared");
            return Ok(());
        }

        cmd.bind_input_assembler(&self.input_assembler);
        cmd.bind_pipeline_state(&self.pipeline_state);
        cmd.bind_binding_layout(&mut self.binding_layout)?;
        cmd.draw(&self.input_assembler);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ar::ArPlatform;
    use crate::gfx::{Color, PrimitiveMode, Rect};
    use crate::vulkan::shader::{DescriptorBinding, DescriptorSetLayout, Shader};
    use crate::vulkan::trace::{RecordedCommand, TraceDispatch};
    use crate::vulkan::{CommandBufferInfo, DeviceCaps, Framebuffer, Queue, RenderPass};
    use ash::vk::{self, Handle};
    use std::sync::Mutex;

    struct CameraFeed {
        texture_name: Arc<Mutex<Option<u32>>>,
    }

    impl ArPlatform for CameraFeed {
        fn start(&mut self) {}
        fn resume(&mut self) {}
        fn pause(&mut self) {}
        fn update(&mut self) {}
        fn api_state(&self) -> i32 {
            0
        }
        fn check_start(&self) -> bool {
            true
        }
        fn set_camera_texture_name(&mut self, id: u32) {
            *self.texture_name.lock().unwrap() = Some(id);
        }
        fn camera_pose(&self) -> Vec<f32> {
            Vec::new()
        }
        fn camera_view_matrix(&self) -> Vec<f32> {
            Vec::new()
        }
        fn camera_projection_matrix(&self) -> Vec<f32> {
            Vec::new()
        }
        fn camera_tex_coords(&self) -> Vec<f32> {
            vec![0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0, 0.0]
        }
        fn update_planes_info(&mut self) {}
        fn added_planes_count(&self) -> i32 {
            0
        }
        fn removed_planes_count(&self) -> i32 {
            0
        }
        fn updated_planes_count(&self) -> i32 {
            0
        }
        fn added_planes_info(&self) -> Vec<f32> {
            Vec::new()
        }
        fn removed_planes_info(&self) -> Vec<i32> {
            Vec::new()
        }
        fn updated_planes_info(&self) -> Vec<f32> {
            Vec::new()
        }
    }

    fn resources() -> BackgroundResources {
        let global = DescriptorSetLayout::new(vk::DescriptorSetLayout::from_raw(1), Vec::new());
        let material = DescriptorSetLayout::new(
            vk::DescriptorSetLayout::from_raw(2),
            vec![
                DescriptorBinding::new(0, vk::DescriptorType::UNIFORM_BUFFER, 1, vk::ShaderStageFlags::VERTEX),
                DescriptorBinding::new(
                    1,
                    vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    1,
                    vk::ShaderStageFlags::FRAGMENT,
                ),
            ],
        );
        let shader = Arc::new(Shader::new(
            "ARBackground",
            vk::PipelineLayout::from_raw(3),
            vec![global, material],
        ));
        BackgroundResources {
            pipeline_state: Arc::new(PipelineState::new(
                vk::Pipeline::from_raw(4),
                PrimitiveMode::TriangleList,
                shader,
            )),
            vertex_buffer: Arc::new(Buffer::new(vk::Buffer::from_raw(5), vk::BufferUsageFlags::VERTEX_BUFFER, 64, 16)),
            index_buffer: Arc::new(Buffer::new(vk::Buffer::from_raw(6), vk::BufferUsageFlags::INDEX_BUFFER, 12, 2)),
            uniform_buffer: Arc::new(Buffer::new(
                vk::Buffer::from_raw(7),
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                std::mem::size_of::<BackgroundUniformData>() as u64,
                0,
            )),
            sampler: Arc::new(Sampler::new(vk::Sampler::from_raw(8))),
            material_set: 1,
        }
    }

    fn camera_texture() -> Texture {
        Texture::external(
            vk::Image::from_raw(9),
            vk::ImageView::from_raw(10),
            vk::Format::R8G8B8A8_UNORM,
            640,
            480,
            42,
        )
    }

    fn recorder(device: &Arc<Device<TraceDispatch>>) -> CommandBuffer<TraceDispatch> {
        let mut cmd = CommandBuffer::new(Arc::clone(device));
        cmd.initialize(CommandBufferInfo::new(
            CommandBufferType::Primary,
            Queue::new(vk::Queue::from_raw(11), 0),
        ))
        .unwrap();
        cmd
    }

    fn running_ar() -> (ArModule, Arc<Mutex<Option<u32>>>) {
        let texture_name = Arc::new(Mutex::new(None));
        let feed = CameraFeed {
            texture_name: Arc::clone(&texture_name),
        };
        (ArModule::new(Some(Box::new(feed))), texture_name)
    }

    #[test]
    fn test_select_shader_source() {
        let shaders = &BACKGROUND_SHADERS;
        assert_eq!(shaders.select(GfxApi::Gles2), &shaders.glsl1);
        assert_eq!(shaders.select(GfxApi::Gles3), &shaders.glsl3);
        assert_eq!(shaders.select(GfxApi::Vulkan), &shaders.glsl4);
        assert_eq!(shaders.select(GfxApi::Metal), &shaders.glsl4);
        assert!(shaders.glsl1.frag.contains("samplerExternalOES"));
    }

    #[test]
    fn test_quad_vertices_interleave_tex_coords() {
        let vertices = quad_vertices(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8]);
        assert_eq!(&vertices[..4], &[-1.0, -1.0, 0.1, 0.2]);
        assert_eq!(&vertices[12..], &[1.0, 1.0, 0.7, 0.8]);
    }

    #[test]
    fn test_uniform_pushes_quad_to_far_plane() {
        let data = BackgroundUniformData::default();
        let mvp = Matrix4::from_column_slice(&data.mvp);
        let corner = mvp * nalgebra::Vector4::new(1.0, 1.0, 0.0, 1.0);
        approx::assert_relative_eq!(corner, nalgebra::Vector4::new(1.0, 1.0, -1.0, 1.0));
        assert_eq!(std::mem::size_of::<BackgroundUniformData>(), 128);
    }

    #[test]
    fn test_activate_imports_under_exclusive_access() {
        let device = Arc::new(Device::new(TraceDispatch::new(), DeviceCaps::default()));
        let contender = Arc::clone(&device);

        let background = ArBackground::activate(&*device, resources(), |_| {
            assert!(contender.try_native_access().is_none());
            Ok(camera_texture())
        })
        .unwrap();

        assert_eq!(background.texture_id(), 42);
        assert!(device.try_native_access().is_some());
        assert_eq!(background.input_assembler().extract_draw_info().index_count, 6);
    }

    #[test]
    fn test_activate_requires_external_texture() {
        let device = Device::new(TraceDispatch::new(), DeviceCaps::default());
        let result = ArBackground::activate(&device, resources(), |_| {
            Ok(Texture::new(
                vk::Image::from_raw(9),
                vk::ImageView::from_raw(10),
                vk::Format::R8G8B8A8_UNORM,
                4,
                4,
            ))
        });
        assert!(matches!(result, Err(VulkanError::InvalidOperation { .. })));
    }

    #[test]
    fn test_skipped_without_ar() {
        let device = Arc::new(Device::new(TraceDispatch::new(), DeviceCaps::default()));
        let mut background = ArBackground::activate(&*device, resources(), |_| Ok(camera_texture())).unwrap();
        let mut cmd = recorder(&device);
        let mut ar = ArModule::unavailable();

        cmd.begin(None, 0, None).unwrap();
        assert!(!background.prepare(&mut ar, &mut cmd).unwrap());
        background.render(&ar, &mut cmd).unwrap();

        let commands = device.dispatch().commands_for(cmd.native_handle().unwrap());
        assert_eq!(commands.len(), 1);
    }

    #[test]
    fn test_frame_records_upload_and_draw() {
        let device = Arc::new(Device::new(TraceDispatch::new(), DeviceCaps::default()));
        let mut background = ArBackground::activate(&*device, resources(), |_| Ok(camera_texture())).unwrap();
        let mut cmd = recorder(&device);
        let (mut ar, texture_name) = running_ar();

        cmd.begin(None, 0, None).unwrap();
        assert!(background.prepare(&mut ar, &mut cmd).unwrap());
        cmd.begin_render_pass(
            &RenderPass::new(vk::RenderPass::from_raw(12), 1),
            &Framebuffer::offscreen(vk::Framebuffer::from_raw(13)),
            Rect::new(0, 0, 640, 480),
            &[Color::default()],
            1.0,
            0,
        );
        background.render(&ar, &mut cmd).unwrap();
        cmd.end_render_pass();
        cmd.end().unwrap();

        assert_eq!(*texture_name.lock().unwrap(), Some(42));
        assert_eq!(cmd.num_draw_calls(), 1);
        assert_eq!(cmd.num_tris(), 2);

        let commands = device.dispatch().commands_for(cmd.native_handle().unwrap());
        let uploads: Vec<vk::Buffer> = commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::UpdateBuffer { buffer, .. } => Some(*buffer),
                _ => None,
            })
            .collect();
        assert_eq!(
            uploads,
            vec![vk::Buffer::from_raw(6), vk::Buffer::from_raw(7), vk::Buffer::from_raw(5)]
        );
        let bound_sets = commands
            .iter()
            .filter(|c| matches!(c, RecordedCommand::BindDescriptorSets { .. }))
            .count();
        assert_eq!(bound_sets, 1);

        // Static data is uploaded once; only the quad changes per frame.
        cmd.begin(None, 0, None).unwrap();
        background.prepare(&mut ar, &mut cmd).unwrap();
        let commands = device.dispatch().commands_for(cmd.native_handle().unwrap());
        let uploads = commands
            .iter()
            .filter(|c| matches!(c, RecordedCommand::UpdateBuffer { .. }))
            .count();
        assert_eq!(uploads, 4);
    }

    #[test]
    fn test_rejected_static_upload_is_retried() {
        let device = Arc::new(Device::new(TraceDispatch::new(), DeviceCaps::default()));
        let mut res = resources();
        let uniform_buffer = Arc::new(Buffer::new(vk::Buffer::from_raw(7), vk::BufferUsageFlags::UNIFORM_BUFFER, 64, 0));
        res.uniform_buffer = Arc::clone(&uniform_buffer);
        let mut background = ArBackground::activate(&*device, res, |_| Ok(camera_texture())).unwrap();
        let mut cmd = recorder(&device);
        let (mut ar, _) = running_ar();

        let uploads = |cmd: &CommandBuffer<TraceDispatch>| -> Vec<u64> {
            device
                .dispatch()
                .commands_for(cmd.native_handle().unwrap())
                .iter()
                .filter_map(|c| match c {
                    RecordedCommand::UpdateBuffer { buffer, .. } => Some(buffer.as_raw()),
                    _ => None,
                })
                .collect()
        };

        cmd.begin(None, 0, None).unwrap();
        assert!(background.prepare(&mut ar, &mut cmd).unwrap());
        assert_eq!(uploads(&cmd), vec![6, 5]);

        uniform_buffer.rebuild(
            vk::Buffer::from_raw(7),
            0,
            std::mem::size_of::<BackgroundUniformData>() as u64,
        );
        cmd.begin(None, 0, None).unwrap();
        background.prepare(&mut ar, &mut cmd).unwrap();
        assert_eq!(uploads(&cmd), vec![6, 5, 6, 7, 5]);

        cmd.begin(None, 0, None).unwrap();
        background.prepare(&mut ar, &mut cmd).unwrap();
        assert_eq!(uploads(&cmd), vec![6, 5, 6, 7, 5, 5]);
    }

    #[test]
    fn test_prepare_inside_render_pass_is_rejected() {
        let device = Arc::new(Device::new(TraceDispatch::new(), DeviceCaps::default()));
        let mut background = ArBackground::activate(&*device, resources(), |_| Ok(camera_texture())).unwrap();
        let mut cmd = recorder(&device);
        let (mut ar, texture_name) = running_ar();

        cmd.begin(None, 0, None).unwrap();
        cmd.begin_render_pass(
            &RenderPass::new(vk::RenderPass::from_raw(12), 1),
            &Framebuffer::offscreen(vk::Framebuffer::from_raw(13)),
            Rect::new(0, 0, 640, 480),
            &[Color::default()],
            1.0,
            0,
        );
        assert!(!background.prepare(&mut ar, &mut cmd).unwrap());
        assert_eq!(*texture_name.lock().unwrap(), None);
    }
}
