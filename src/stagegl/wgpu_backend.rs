//! Headless wgpu implementation of [`GpuBackend`].
//!
//! The default target is an offscreen texture like every other; nothing is
//! presented. All textures are `Rgba8Unorm` holding premultiplied pixels.

use std::collections::HashMap;

use resvg::tiny_skia::Pixmap;
use wgpu::util::DeviceExt;

use super::backend::{GpuBackend, ProgramDesc, Projection, ShaderBindings, TextureHandle};
use super::batch::BatchVertex;
use super::shaders;
use crate::color::Color;
use crate::error::{Result, StageError};
use crate::filters::FilterShader;

const SCREEN: TextureHandle = TextureHandle::new(0);
const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

struct BatchProgram {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    projection: wgpu::Buffer,
    units: usize,
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct ProjectionUniform {
    size: [f32; 2],
    flip: f32,
    _pad: f32,
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct CoverUniform {
    params: [[f32; 4]; FilterShader::MAX_PARAMS],
    flip: [f32; 4],
}

pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
    limits: wgpu::Limits,
    textures: HashMap<TextureHandle, GpuTexture>,
    /// 1x1 transparent texture bound for slots whose texture is gone.
    blank: GpuTexture,
    next_id: u64,
    render_target: Option<TextureHandle>,
    batch: Option<BatchProgram>,
    cover_layout: wgpu::BindGroupLayout,
    cover_sampler: wgpu::Sampler,
    /// Cover pipelines by filter body, the plain copy under `""`.
    covers: HashMap<String, wgpu::RenderPipeline>,
    rejected_covers: HashMap<String, String>,
}

impl WgpuBackend {
    /// Opens a low-power adapter without a surface.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::LowPower,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| StageError::NoBackend(e.to_string()))?;

        let adapter_name = adapter.get_info().name;
        let limits = adapter.limits();

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("StageGL Device"),
            required_features: wgpu::Features::empty(),
            required_limits: limits.clone(),
            memory_hints: wgpu::MemoryHints::default(),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| StageError::NoBackend(e.to_string()))?;

        log::info!("StageGL using adapter {adapter_name}");

        let cover_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Cover Bind Group Layout"),
            entries: &[
                texture_entry(0),
                sampler_entry(1),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });
        let cover_sampler = create_sampler(&device, wgpu::FilterMode::Nearest);

        let blank = create_gpu_texture(&device, 1, 1);
        let mut backend = Self {
            device,
            queue,
            adapter_name,
            limits,
            textures: HashMap::new(),
            blank,
            next_id: 1,
            render_target: None,
            batch: None,
            cover_layout,
            cover_sampler,
            covers: HashMap::new(),
            rejected_covers: HashMap::new(),
        };
        backend.resize_target(width, height)?;
        backend.clear(Color::TRANSPARENT);
        Ok(backend)
    }

    fn texture(&self, handle: TextureHandle) -> Result<&GpuTexture> {
        self.textures
            .get(&handle)
            .ok_or_else(|| StageError::Gpu(format!("unknown texture {handle:?}")))
    }

    fn current(&self) -> TextureHandle {
        self.render_target.unwrap_or(SCREEN)
    }

    /// Parses and validates WGSL before it reaches the device, so a bad
    /// program is an error instead of a device fault.
    fn validate(source: &str) -> std::result::Result<(), String> {
        let module = wgpu::naga::front::wgsl::parse_str(source).map_err(|e| e.emit_to_string(source))?;
        wgpu::naga::valid::Validator::new(
            wgpu::naga::valid::ValidationFlags::all(),
            wgpu::naga::valid::Capabilities::empty(),
        )
        .validate(&module)
        .map_err(|e| e.emit_to_string(source))?;
        Ok(())
    }

    fn cover_pipeline(&mut self, body: &str) -> std::result::Result<(), String> {
        if self.covers.contains_key(body) {
            return Ok(());
        }
        if let Some(message) = self.rejected_covers.get(body) {
            return Err(message.clone());
        }

        let shader = if body.is_empty() {
            None
        } else {
            Some(FilterShader::new(body, Vec::new()))
        };
        let source = shaders::cover_source(shader.as_ref());
        if let Err(message) = Self::validate(&source) {
            self.rejected_covers.insert(body.to_owned(), message.clone());
            return Err(message);
        }

        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Cover Shader"),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Cover Pipeline Layout"),
            bind_group_layouts: &[&self.cover_layout],
            immediate_size: 0,
        });
        let pipeline = create_pipeline(
            &self.device,
            "Cover Pipeline",
            &layout,
            &module,
            &[],
            wgpu::BlendState::REPLACE,
        );
        self.covers.insert(body.to_owned(), pipeline);
        Ok(())
    }

    fn begin_pass<'a>(
        encoder: &'a mut wgpu::CommandEncoder,
        view: &'a wgpu::TextureView,
        load: wgpu::LoadOp<wgpu::Color>,
    ) -> wgpu::RenderPass<'a> {
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("StageGL Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load,
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        })
    }
}

fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            multisampled: false,
            view_dimension: wgpu::TextureViewDimension::D2,
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
        },
        count: None,
    }
}

fn sampler_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    }
}

fn create_sampler(device: &wgpu::Device, filter: wgpu::FilterMode) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("StageGL Sampler"),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: filter,
        min_filter: filter,
        mipmap_filter: wgpu::MipmapFilterMode::Nearest,
        ..Default::default()
    })
}

fn create_gpu_texture(device: &wgpu::Device, width: u32, height: u32) -> GpuTexture {
    let (width, height) = (width.max(1), height.max(1));
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("StageGL Texture"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: FORMAT,
        usage: wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    GpuTexture {
        texture,
        view,
        width,
        height,
    }
}

fn create_pipeline(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::PipelineLayout,
    module: &wgpu::ShaderModule,
    buffers: &[wgpu::VertexBufferLayout<'_>],
    blend: wgpu::BlendState,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module,
            entry_point: Some("vs_main"),
            buffers,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: FORMAT,
                blend: Some(blend),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview_mask: None,
        cache: None,
    })
}

/// Source-over for premultiplied colors.
const PREMULTIPLIED_OVER: wgpu::BlendState = wgpu::BlendState {
    color: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
        operation: wgpu::BlendOperation::Add,
    },
    alpha: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
        operation: wgpu::BlendOperation::Add,
    },
};

impl GpuBackend for WgpuBackend {
    fn name(&self) -> &str {
        &self.adapter_name
    }

    fn max_texture_units(&self) -> usize {
        self.limits.max_sampled_textures_per_shader_stage as usize
    }

    fn max_texture_size(&self) -> u32 {
        self.limits.max_texture_dimension_2d
    }

    fn compile(&mut self, program: ProgramDesc) -> Result<ShaderBindings> {
        let units = program.texture_units;
        let compile_error = |message: String| StageError::ShaderCompile { units, message };
        if units == 0 || units > self.max_texture_units() {
            return Err(compile_error(format!(
                "adapter samples at most {} textures per stage",
                self.max_texture_units()
            )));
        }

        let source = shaders::batch_source(units);
        Self::validate(&source).map_err(compile_error)?;

        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Batch Shader"),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        let mut entries: Vec<wgpu::BindGroupLayoutEntry> = (0..units as u32).map(texture_entry).collect();
        entries.push(sampler_entry(units as u32));
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: units as u32 + 1,
            visibility: wgpu::ShaderStages::VERTEX,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        });
        let layout = self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Batch Bind Group Layout"),
            entries: &entries,
        });
        let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Batch Pipeline Layout"),
            bind_group_layouts: &[&layout],
            immediate_size: 0,
        });
        let pipeline = create_pipeline(
            &self.device,
            "Batch Pipeline",
            &pipeline_layout,
            &module,
            &[BatchVertex::desc()],
            PREMULTIPLIED_OVER,
        );

        let filter = if program.antialias {
            wgpu::FilterMode::Linear
        } else {
            wgpu::FilterMode::Nearest
        };
        let projection = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Batch Projection"),
            size: std::mem::size_of::<ProjectionUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        self.batch = Some(BatchProgram {
            pipeline,
            layout,
            sampler: create_sampler(&self.device, filter),
            projection,
            units,
        });
        Ok(ShaderBindings::for_units(units))
    }

    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureHandle> {
        let max = self.max_texture_size();
        if width > max || height > max {
            return Err(StageError::Gpu(format!("texture {width}x{height} exceeds {max}")));
        }
        let handle = TextureHandle::new(self.next_id);
        self.next_id += 1;
        self.textures.insert(handle, create_gpu_texture(&self.device, width, height));
        Ok(handle)
    }

    fn upload_texture(&mut self, texture: TextureHandle, pixmap: &Pixmap) -> Result<()> {
        let (width, height) = (pixmap.width(), pixmap.height());
        if self.texture_size(texture) != Some((width, height)) {
            let max = self.max_texture_size();
            if width > max || height > max {
                return Err(StageError::Gpu(format!("texture {width}x{height} exceeds {max}")));
            }
            self.texture(texture)?;
            self.textures
                .insert(texture, create_gpu_texture(&self.device, width, height));
        }
        let target = self.texture(texture)?;
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            pixmap.data(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn resize_texture(&mut self, texture: TextureHandle, width: u32, height: u32) -> Result<()> {
        let current = self.texture(texture)?;
        if (current.width, current.height) == (width.max(1), height.max(1)) {
            return Ok(());
        }
        self.textures
            .insert(texture, create_gpu_texture(&self.device, width, height));
        Ok(())
    }

    fn delete_texture(&mut self, texture: TextureHandle) {
        if texture == SCREEN {
            return;
        }
        if let Some(gone) = self.textures.remove(&texture) {
            gone.texture.destroy();
        }
        if self.render_target == Some(texture) {
            self.render_target = None;
        }
    }

    fn texture_size(&self, texture: TextureHandle) -> Option<(u32, u32)> {
        self.textures.get(&texture).map(|t| (t.width, t.height))
    }

    fn resize_target(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(StageError::InvalidSize { width, height });
        }
        self.textures
            .insert(SCREEN, create_gpu_texture(&self.device, width, height));
        Ok(())
    }

    fn target_size(&self) -> (u32, u32) {
        self.texture_size(SCREEN).unwrap_or((0, 0))
    }

    fn set_render_target(&mut self, target: Option<TextureHandle>) -> Result<()> {
        if let Some(handle) = target {
            self.texture(handle)?;
        }
        self.render_target = target;
        Ok(())
    }

    fn clear(&mut self, color: Color) {
        let Some(target) = self.textures.get(&self.current()) else {
            return;
        };
        let a = color.a as f64;
        let load = wgpu::LoadOp::Clear(wgpu::Color {
            r: color.r as f64 * a,
            g: color.g as f64 * a,
            b: color.b as f64 * a,
            a,
        });
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("StageGL Clear"),
        });
        drop(Self::begin_pass(&mut encoder, &target.view, load));
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    fn draw_batch(
        &mut self,
        vertices: &[BatchVertex],
        slots: &[TextureHandle],
        projection: Projection,
    ) -> Result<()> {
        let program = self
            .batch
            .as_ref()
            .ok_or_else(|| StageError::Gpu("no batch program compiled".into()))?;
        if vertices.is_empty() {
            return Ok(());
        }
        let target = self.texture(self.current())?;

        let uniform = ProjectionUniform {
            size: [projection.width.max(1) as f32, projection.height.max(1) as f32],
            flip: if projection.flip_y { 1.0 } else { 0.0 },
            _pad: 0.0,
        };
        self.queue
            .write_buffer(&program.projection, 0, bytemuck::bytes_of(&uniform));

        let vertex_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Batch Vertices"),
            contents: bytemuck::cast_slice(vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let views: Vec<&wgpu::TextureView> = (0..program.units)
            .map(|i| {
                slots
                    .get(i)
                    .and_then(|h| self.textures.get(h))
                    .map_or(&self.blank.view, |t| &t.view)
            })
            .collect();
        let mut entries: Vec<wgpu::BindGroupEntry> = views
            .iter()
            .enumerate()
            .map(|(i, view)| wgpu::BindGroupEntry {
                binding: i as u32,
                resource: wgpu::BindingResource::TextureView(view),
            })
            .collect();
        entries.push(wgpu::BindGroupEntry {
            binding: program.units as u32,
            resource: wgpu::BindingResource::Sampler(&program.sampler),
        });
        entries.push(wgpu::BindGroupEntry {
            binding: program.units as u32 + 1,
            resource: program.projection.as_entire_binding(),
        });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Batch Bind Group"),
            layout: &program.layout,
            entries: &entries,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("StageGL Batch"),
        });
        {
            let mut pass = Self::begin_pass(&mut encoder, &target.view, wgpu::LoadOp::Load);
            pass.set_pipeline(&program.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_vertex_buffer(0, vertex_buffer.slice(..));
            pass.draw(0..vertices.len() as u32, 0..1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn draw_cover(
        &mut self,
        source: TextureHandle,
        shader: Option<&FilterShader>,
        flip_y: bool,
    ) -> Result<bool> {
        if source == self.current() {
            return Err(StageError::Gpu("a texture cannot be drawn into itself".into()));
        }
        let body = shader.map(|s| s.body.as_str()).unwrap_or("");
        if let Err(message) = self.cover_pipeline(body) {
            log::warn!("filter shader rejected, falling back to the CPU: {message}");
            return Ok(false);
        }
        let Some(pipeline) = self.covers.get(body) else {
            return Ok(false);
        };

        let src = self.texture(source)?;
        let target = self.texture(self.current())?;
        let uniform = CoverUniform {
            params: shader.map(|s| s.padded_params()).unwrap_or_default(),
            flip: [if flip_y { 1.0 } else { 0.0 }, 0.0, 0.0, 0.0],
        };
        let uniform_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Cover Uniforms"),
            contents: bytemuck::bytes_of(&uniform),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Cover Bind Group"),
            layout: &self.cover_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&src.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.cover_sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: uniform_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("StageGL Cover"),
        });
        {
            let mut pass = Self::begin_pass(
                &mut encoder,
                &target.view,
                wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
            );
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..6, 0..1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(true)
    }

    fn read_pixels(&mut self, target: Option<TextureHandle>) -> Result<Pixmap> {
        let source = self.texture(target.unwrap_or(SCREEN))?;
        let (width, height) = (source.width, source.height);
        let row_bytes = width * 4;
        let padded_bytes_per_row = row_bytes.div_ceil(256) * 256;

        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("StageGL Readback"),
            size: (padded_bytes_per_row * height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("StageGL Readback"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &source.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = readback.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = sender.send(res);
        });
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| StageError::Gpu(format!("device poll failed: {e:?}")))?;
        receiver
            .recv()
            .map_err(|e| StageError::Gpu(format!("readback channel closed: {e}")))?
            .map_err(|e| StageError::Gpu(format!("buffer map failed: {e:?}")))?;

        let mut pixmap = Pixmap::new(width, height).ok_or(StageError::InvalidSize { width, height })?;
        {
            let data = slice.get_mapped_range();
            for (dst, src) in pixmap
                .data_mut()
                .chunks_exact_mut(row_bytes as usize)
                .zip(data.chunks_exact(padded_bytes_per_row as usize))
            {
                dst.copy_from_slice(&src[..row_bytes as usize]);
            }
        }
        readback.unmap();
        Ok(pixmap)
    }
}

impl std::fmt::Debug for WgpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuBackend")
            .field("adapter", &self.adapter_name)
            .field("textures", &self.textures.len())
            .field("render_target", &self.render_target)
            .finish()
    }
}
