//! wgpu renderer for the liquid metal effect
//!
//! One renderer per displayed icon. It owns its device, queue, pipeline,
//! buffers, icon texture and offscreen backing target; nothing is shared
//! between instances. Lifecycle:
//!
//! `Uninitialized → ContextReady → ProgramLinked → Rendering`, with
//! `Paused` while hidden and `Failed` after any terminal error.

use std::sync::Arc;
use wgpu::util::DeviceExt;

use super::pacing::backing_size;
use super::shaders;
use crate::error::RenderError;
use crate::state::{ProcessedIcon, RenderSettings, ShaderParams};

/// Format of the backing target and of read-back frames
pub const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Full-target quad as a triangle strip
const QUAD: [f32; 8] = [-1.0, -1.0, 1.0, -1.0, -1.0, 1.0, 1.0, 1.0];

const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x2];

/// Where a renderer is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererState {
    Uninitialized,
    ContextReady,
    ProgramLinked,
    Rendering,
    Paused,
    Failed,
}

/// Uniform block in the layout the shader expects
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuUniforms {
    pub time: f32,
    pub ratio: f32,
    pub img_ratio: f32,
    pub pattern_scale: f32,
    pub refraction: f32,
    pub edge: f32,
    pub pattern_blur: f32,
    pub liquid: f32,
}

impl GpuUniforms {
    /// The target is always square, so `ratio` is 1
    pub fn new(params: &ShaderParams, time_ms: f32, img_ratio: f32) -> Self {
        Self {
            time: time_ms,
            ratio: 1.0,
            img_ratio,
            pattern_scale: params.pattern_scale,
            refraction: params.refraction,
            edge: params.edge,
            pattern_blur: params.pattern_blur,
            liquid: params.liquid,
        }
    }
}

/// A read-back frame, tightly packed RGBA8 (premultiplied)
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Frame {
    pub fn alpha(&self, x: u32, y: u32) -> u8 {
        self.pixels[((y * self.width + x) * 4 + 3) as usize]
    }
}

/// Everything created by `link`
struct Program {
    _shader: wgpu::ShaderModule,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    vertex_buffer: wgpu::Buffer,
    uniform_buffer: wgpu::Buffer,
}

struct IconTexture {
    source: Arc<ProcessedIcon>,
    texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
}

struct BackingTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    size: u32,
}

/// Draws one processed icon with the liquid metal shader
pub struct MetallicRenderer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    settings: RenderSettings,
    params: ShaderParams,
    state: RendererState,
    resume_state: RendererState,
    program: Option<Program>,
    icon: Option<IconTexture>,
    target: Option<BackingTarget>,
}

// wgpu types don't implement Debug
impl std::fmt::Debug for MetallicRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetallicRenderer")
            .field("state", &self.state)
            .field("params", &self.params)
            .field("target_size", &self.target.as_ref().map(|t| t.size))
            .finish_non_exhaustive()
    }
}

impl MetallicRenderer {
    /// Acquire an adapter, device and queue
    pub async fn acquire(
        settings: &RenderSettings,
        params: ShaderParams,
    ) -> Result<Self, RenderError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let power_preference = if settings.low_power {
            wgpu::PowerPreference::LowPower
        } else {
            wgpu::PowerPreference::HighPerformance
        };

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| RenderError::ContextUnavailable("no suitable GPU adapter".into()))?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Metallic Icon Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults(),
                },
                None,
            )
            .await
            .map_err(|e| RenderError::ContextUnavailable(e.to_string()))?;

        tracing::debug!(adapter = ?adapter.get_info().name, "GPU context ready");

        Ok(Self {
            device,
            queue,
            settings: *settings,
            params,
            state: RendererState::ContextReady,
            resume_state: RendererState::ContextReady,
            program: None,
            icon: None,
            target: None,
        })
    }

    pub fn state(&self) -> RendererState {
        self.state
    }

    pub fn params(&self) -> &ShaderParams {
        &self.params
    }

    pub fn set_params(&mut self, params: ShaderParams) {
        self.params = params;
    }

    fn ensure_usable(&self) -> Result<(), RenderError> {
        match self.state {
            RendererState::Failed => Err(RenderError::NotReady("renderer failed")),
            RendererState::Uninitialized => Err(RenderError::NotReady("renderer released")),
            _ => Ok(()),
        }
    }

    fn fail(&mut self, error: RenderError) -> RenderError {
        tracing::error!(error = %error, "metallic renderer failed");
        self.state = RendererState::Failed;
        error
    }

    /// Compile the shader and build the pipeline, buffers and sampler
    ///
    /// A compile or validation error is terminal for this renderer.
    pub async fn link(&mut self) -> Result<(), RenderError> {
        self.ensure_usable()?;
        if self.program.is_some() {
            return Ok(());
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let program = self.build_program();
        if let Some(error) = self.device.pop_error_scope().await {
            return Err(self.fail(RenderError::ShaderCompile(error.to_string())));
        }

        self.program = Some(program);
        self.state = RendererState::ProgramLinked;
        tracing::debug!("liquid metal program linked");
        Ok(())
    }

    fn build_program(&self) -> Program {
        let device = &self.device;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Liquid Metal Shader"),
            source: wgpu::ShaderSource::Wgsl(shaders::get_shader().into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Liquid Metal Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Liquid Metal Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let blend_component = wgpu::BlendComponent {
            src_factor: wgpu::BlendFactor::SrcAlpha,
            dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
            operation: wgpu::BlendOperation::Add,
        };

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Liquid Metal Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: (2 * std::mem::size_of::<f32>()) as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &VERTEX_ATTRIBUTES,
                }],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: TARGET_FORMAT,
                    blend: Some(wgpu::BlendState {
                        color: blend_component,
                        alpha: blend_component,
                    }),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                unclipped_depth: false,
                polygon_mode: wgpu::PolygonMode::Fill,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            multiview: None,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Icon Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: if self.settings.mipmaps {
                wgpu::FilterMode::Linear
            } else {
                wgpu::FilterMode::Nearest
            },
            ..Default::default()
        });

        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Quad Vertex Buffer"),
            contents: bytemuck::cast_slice(&QUAD),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Liquid Metal Uniforms"),
            contents: bytemuck::cast_slice(&[GpuUniforms::new(&self.params, 0.0, 1.0)]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        Program {
            _shader: shader,
            pipeline,
            bind_group_layout,
            sampler,
            vertex_buffer,
            uniform_buffer,
        }
    }

    /// Upload an icon; a no-op when it is the icon already on the GPU
    pub fn set_icon(&mut self, icon: Arc<ProcessedIcon>) -> Result<(), RenderError> {
        self.ensure_usable()?;
        let program = self
            .program
            .as_ref()
            .ok_or(RenderError::NotReady("program not linked"))?;

        if let Some(current) = &self.icon {
            if Arc::ptr_eq(&current.source, &icon) {
                return Ok(());
            }
        }

        let levels = if self.settings.mipmaps {
            mip_chain(icon.width, icon.height, &icon.pixels)
        } else {
            vec![(icon.width, icon.height, icon.pixels.clone())]
        };

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Icon Texture"),
            size: wgpu::Extent3d {
                width: icon.width,
                height: icon.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: levels.len() as u32,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        for (level, (width, height, pixels)) in levels.iter().enumerate() {
            self.queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: &texture,
                    mip_level: level as u32,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                pixels,
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(4 * width),
                    rows_per_image: Some(*height),
                },
                wgpu::Extent3d {
                    width: *width,
                    height: *height,
                    depth_or_array_layers: 1,
                },
            );
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Liquid Metal Bind Group"),
            layout: &program.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&program.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: program.uniform_buffer.as_entire_binding(),
                },
            ],
        });

        if let Some(previous) = self.icon.take() {
            previous.texture.destroy();
        }

        tracing::debug!(
            width = icon.width,
            height = icon.height,
            mips = levels.len(),
            "icon texture uploaded"
        );
        self.icon = Some(IconTexture {
            source: icon,
            texture,
            bind_group,
        });
        Ok(())
    }

    /// Size the backing target for a CSS size and device pixel ratio
    ///
    /// Returns the backing size in pixels.
    pub fn resize(&mut self, base_size: u32, device_pixel_ratio: f32) -> Result<u32, RenderError> {
        self.ensure_usable()?;
        let size = backing_size(base_size, device_pixel_ratio, self.settings.dpr_cap);
        self.resize_backing(size);
        Ok(size)
    }

    fn resize_backing(&mut self, size: u32) {
        if self.target.as_ref().is_some_and(|t| t.size == size) {
            return;
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Backing Target"),
            size: wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        if let Some(previous) = self.target.take() {
            previous.texture.destroy();
        }
        self.target = Some(BackingTarget {
            texture,
            view,
            size,
        });
    }

    /// Backing target edge length, once one exists
    pub fn backing_size(&self) -> Option<u32> {
        self.target.as_ref().map(|t| t.size)
    }

    /// Write the uniforms for a frame at `time_ms`
    pub fn prepare(&self, time_ms: f32) -> Result<(), RenderError> {
        self.ensure_usable()?;
        let program = self
            .program
            .as_ref()
            .ok_or(RenderError::NotReady("program not linked"))?;
        let icon = self
            .icon
            .as_ref()
            .ok_or(RenderError::NotReady("no icon uploaded"))?;

        let uniforms = GpuUniforms::new(&self.params, time_ms, icon.source.aspect_ratio());
        self.queue
            .write_buffer(&program.uniform_buffer, 0, bytemuck::cast_slice(&[uniforms]));
        Ok(())
    }

    /// Encode the effect into a host-owned view
    pub fn render_to_target(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        target: &wgpu::TextureView,
        viewport: (u32, u32),
    ) -> Result<(), RenderError> {
        let program = self
            .program
            .as_ref()
            .ok_or(RenderError::NotReady("program not linked"))?;
        let icon = self
            .icon
            .as_ref()
            .ok_or(RenderError::NotReady("no icon uploaded"))?;

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Liquid Metal Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        render_pass.set_viewport(0.0, 0.0, viewport.0 as f32, viewport.1 as f32, 0.0, 1.0);
        render_pass.set_pipeline(&program.pipeline);
        render_pass.set_bind_group(0, &icon.bind_group, &[]);
        render_pass.set_vertex_buffer(0, program.vertex_buffer.slice(..));
        render_pass.draw(0..4, 0..1);
        Ok(())
    }

    /// Draw one frame into the backing target
    pub fn draw(&mut self, time_ms: f32) -> Result<(), RenderError> {
        if self.state == RendererState::Paused {
            return Ok(());
        }
        self.prepare(time_ms)?;
        if self.target.is_none() {
            self.resize_backing(self.settings.base_size.max(1));
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Liquid Metal Encoder"),
            });
        if let Some(target) = &self.target {
            self.render_to_target(&mut encoder, &target.view, (target.size, target.size))?;
        }
        self.queue.submit(Some(encoder.finish()));

        self.state = RendererState::Rendering;
        Ok(())
    }

    /// Stop drawing until `resume`
    pub fn pause(&mut self) {
        if matches!(
            self.state,
            RendererState::Failed | RendererState::Uninitialized | RendererState::Paused
        ) {
            return;
        }
        self.resume_state = self.state;
        self.state = RendererState::Paused;
    }

    pub fn resume(&mut self) {
        if self.state == RendererState::Paused {
            self.state = self.resume_state;
        }
    }

    /// Copy the backing target back to the CPU
    pub fn read_frame(&self) -> Result<Frame, RenderError> {
        let target = self
            .target
            .as_ref()
            .ok_or(RenderError::NotReady("nothing rendered yet"))?;
        let size = target.size;

        let bytes_per_row = size * 4;
        let padded_bytes_per_row = (bytes_per_row + 255) & !255;
        let buffer_size = (padded_bytes_per_row * size) as u64;

        let output_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Frame Readback Buffer"),
            size: buffer_size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &output_buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(size),
                },
            },
            wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let buffer_slice = output_buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| RenderError::Readback(e.to_string()))?
            .map_err(|e| RenderError::Readback(e.to_string()))?;

        let data = buffer_slice.get_mapped_range();
        let mut pixels = Vec::with_capacity((size * size * 4) as usize);
        for y in 0..size {
            let start = (y * padded_bytes_per_row) as usize;
            let end = start + bytes_per_row as usize;
            pixels.extend_from_slice(&data[start..end]);
        }

        drop(data);
        output_buffer.unmap();
        output_buffer.destroy();

        Ok(Frame {
            width: size,
            height: size,
            pixels,
        })
    }

    /// Destroy every GPU resource this renderer created
    pub fn release(&mut self) {
        if let Some(icon) = self.icon.take() {
            icon.texture.destroy();
        }
        if let Some(target) = self.target.take() {
            target.texture.destroy();
        }
        if let Some(program) = self.program.take() {
            program.vertex_buffer.destroy();
            program.uniform_buffer.destroy();
        }
        if self.state != RendererState::Uninitialized {
            tracing::debug!("metallic renderer released");
        }
        self.state = RendererState::Uninitialized;
    }
}

impl Drop for MetallicRenderer {
    fn drop(&mut self) {
        self.release();
    }
}

/// Number of mip levels down to 1x1
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// Box-filtered mip chain, level 0 first
pub fn mip_chain(width: u32, height: u32, pixels: &[u8]) -> Vec<(u32, u32, Vec<u8>)> {
    let mut levels = vec![(width, height, pixels.to_vec())];

    for _ in 1..mip_level_count(width, height) {
        let (w, h, prev) = &levels[levels.len() - 1];
        let (w, h) = (*w, *h);
        let (nw, nh) = ((w / 2).max(1), (h / 2).max(1));
        let mut next = vec![0u8; (nw * nh * 4) as usize];

        for y in 0..nh {
            for x in 0..nw {
                let x0 = (x * 2).min(w - 1);
                let x1 = (x * 2 + 1).min(w - 1);
                let y0 = (y * 2).min(h - 1);
                let y1 = (y * 2 + 1).min(h - 1);
                for c in 0..4 {
                    let at = |px: u32, py: u32| prev[((py * w + px) * 4 + c) as usize] as u32;
                    let sum = at(x0, y0) + at(x1, y0) + at(x0, y1) + at(x1, y1);
                    next[((y * nw + x) * 4 + c) as usize] = ((sum + 2) / 4) as u8;
                }
            }
        }

        levels.push((nw, nh, next));
    }

    levels
}
