//! GPU nearest-seed partition by cone rasterization (wgpu).
//!
//! Every seed is drawn as a cone whose depth grows linearly with the
//! aspect-corrected distance from its apex. With a `Less` depth test the
//! nearest cone wins each pixel, so the color buffer ends up holding the
//! Voronoi partition. Each cone is flat-shaded with its label color.

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::partition::{validate_request, LabelRaster, PartitionBackend};
use crate::{decode_label, encode_label, Position, Result, StippleError};

/// Instance buffers grow in blocks of this many seeds
const BUFFER_INCREMENT: usize = 1000;

/// Cone radius in units of the longer raster side. Must exceed sqrt(2) so
/// every cone covers the whole canvas.
const CONE_RADIUS: f32 = 1.5;

const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Cone mesh vertex: offset from the apex in normalized coordinates, and depth
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct ConeVertex {
    offset: [f32; 2],
    depth: f32,
}

/// Per-instance seed position
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct SeedInstance {
    pos: [f32; 2],
}

const CONE_ATTRIBUTES: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32];
const SEED_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![2 => Float32x2];
const LABEL_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![3 => Unorm8x4];

const CONE_SHADER: &str = r#"
struct VertexOut {
    @builtin(position) clip: vec4<f32>,
    @location(0) @interpolate(flat) label: vec4<f32>,
}

@vertex
fn vs_main(
    @location(0) offset: vec2<f32>,
    @location(1) depth: f32,
    @location(2) seed: vec2<f32>,
    @location(3) label: vec4<f32>,
) -> VertexOut {
    let pos = seed + offset;
    var out: VertexOut;
    // normalized [0,1] with y down -> clip space
    out.clip = vec4<f32>(pos.x * 2.0 - 1.0, 1.0 - pos.y * 2.0, depth, 1.0);
    out.label = label;
    return out;
}

@fragment
fn fs_main(in: VertexOut) -> @location(0) vec4<f32> {
    return in.label;
}
"#;

/// Number of fan slices keeping the polygonal cone within `epsilon` of the
/// true circle of radius `radius`
fn cone_slices(radius: f32, epsilon: f32) -> u32 {
    let alpha = 2.0 * ((radius - epsilon) / radius).acos();
    ((std::f32::consts::TAU / alpha).ceil() as u32).max(3)
}

/// Triangle-list cone for a `width` x `height` raster.
///
/// The apex sits at depth 0 and the rim at depth 1, `CONE_RADIUS` away in
/// the metric where one unit is the longer raster side. Offsets are stored
/// in normalized coordinates, so the x and y extents differ on non-square
/// rasters.
fn cone_mesh(width: u32, height: u32) -> Vec<ConeVertex> {
    let longest = width.max(height) as f32;
    let epsilon = 1.0 / longest;
    let slices = cone_slices(CONE_RADIUS, epsilon);
    let scale_x = longest / width as f32;
    let scale_y = longest / height as f32;

    let rim = |i: u32| {
        let theta = i as f32 * std::f32::consts::TAU / slices as f32;
        ConeVertex {
            offset: [
                CONE_RADIUS * theta.cos() * scale_x,
                CONE_RADIUS * theta.sin() * scale_y,
            ],
            depth: 1.0,
        }
    };
    let apex = ConeVertex { offset: [0.0, 0.0], depth: 0.0 };

    let mut vertices = Vec::with_capacity(slices as usize * 3);
    for i in 0..slices {
        vertices.push(apex);
        vertices.push(rim(i));
        vertices.push(rim((i + 1) % slices));
    }
    vertices
}

/// Offscreen color + depth targets, readback buffer and cone mesh for one
/// raster size
struct RenderTarget {
    width: u32,
    height: u32,
    padded_row: u32,
    color: wgpu::Texture,
    depth_view: wgpu::TextureView,
    color_view: wgpu::TextureView,
    readback: wgpu::Buffer,
    cone: wgpu::Buffer,
    cone_vertices: u32,
}

/// Vertex buffer that is only ever replaced by a larger one
struct GrowableBuffer {
    buffer: wgpu::Buffer,
    capacity: usize,
}

fn block_capacity(len: usize) -> usize {
    BUFFER_INCREMENT * (len / BUFFER_INCREMENT + 1)
}

/// GPU backend drawing one depth-tested cone per seed
pub struct RasterBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::RenderPipeline,
    target: Option<RenderTarget>,
    seeds: Option<GrowableBuffer>,
    labels: Option<GrowableBuffer>,
}

impl RasterBackend {
    /// Create a new GPU backend
    pub fn new() -> Result<Self> {
        let instance = wgpu::Instance::default();

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| StippleError::Gpu("No suitable GPU adapter found".into()))?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Stipple GPU"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: Default::default(),
            },
            None,
        ))
        .map_err(|e| StippleError::Gpu(format!("Failed to create device: {}", e)))?;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Cone Shader"),
            source: wgpu::ShaderSource::Wgsl(CONE_SHADER.into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Cone Pipeline Layout"),
            bind_group_layouts: &[],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Cone Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[
                    // 0: cone mesh, per vertex
                    wgpu::VertexBufferLayout {
                        array_stride: std::mem::size_of::<ConeVertex>() as u64,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &CONE_ATTRIBUTES,
                    },
                    // 1: seed positions, per instance
                    wgpu::VertexBufferLayout {
                        array_stride: std::mem::size_of::<SeedInstance>() as u64,
                        step_mode: wgpu::VertexStepMode::Instance,
                        attributes: &SEED_ATTRIBUTES,
                    },
                    // 2: label colors, per instance
                    wgpu::VertexBufferLayout {
                        array_stride: 4,
                        step_mode: wgpu::VertexStepMode::Instance,
                        attributes: &LABEL_ATTRIBUTES,
                    },
                ],
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                // earlier instances win exact ties
                depth_compare: wgpu::CompareFunction::Less,
                stencil: Default::default(),
                bias: Default::default(),
            }),
            multisample: Default::default(),
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: COLOR_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            multiview: None,
            cache: None,
        });

        Ok(Self {
            device,
            queue,
            pipeline,
            target: None,
            seeds: None,
            labels: None,
        })
    }

    /// (Re)build render targets and cone mesh if the resolution changed
    fn ensure_target(&mut self, width: u32, height: u32) -> Result<()> {
        if matches!(&self.target, Some(t) if t.width == width && t.height == height) {
            return Ok(());
        }

        let max_dim = self.device.limits().max_texture_dimension_2d;
        if width > max_dim || height > max_dim {
            return Err(StippleError::InvalidInput(format!(
                "raster {}x{} exceeds the GPU texture limit of {}",
                width, height, max_dim
            )));
        }

        let size = wgpu::Extent3d { width, height, depth_or_array_layers: 1 };
        let color = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Label Texture"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: COLOR_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let depth = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Depth Texture"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });

        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_row = (width * 4).div_ceil(align) * align;
        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Label Readback Buffer"),
            size: padded_row as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mesh = cone_mesh(width, height);
        let cone = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Cone Buffer"),
            contents: bytemuck::cast_slice(&mesh),
            usage: wgpu::BufferUsages::VERTEX,
        });

        self.target = Some(RenderTarget {
            width,
            height,
            padded_row,
            color_view: color.create_view(&Default::default()),
            depth_view: depth.create_view(&Default::default()),
            color,
            readback,
            cone,
            cone_vertices: mesh.len() as u32,
        });
        Ok(())
    }

    /// Upload seed positions, growing the instance buffer if needed
    fn upload_seeds(&mut self, seeds: &[Position]) {
        let data: Vec<SeedInstance> = seeds
            .iter()
            .map(|s| SeedInstance { pos: [s.x as f32, s.y as f32] })
            .collect();

        if self.seeds.as_ref().map_or(true, |b| b.capacity < seeds.len()) {
            let capacity = block_capacity(seeds.len());
            let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Seed Buffer"),
                size: (capacity * std::mem::size_of::<SeedInstance>()) as u64,
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            self.seeds = Some(GrowableBuffer { buffer, capacity });
        }
        if let Some(seed_buffer) = &self.seeds {
            self.queue.write_buffer(&seed_buffer.buffer, 0, bytemuck::cast_slice(&data));
        }
    }

    /// Make sure the label color table covers `len` seeds. The table holds
    /// `encode_label(i)` at index `i`, so it only changes when it grows.
    fn ensure_labels(&mut self, len: usize) {
        if self.labels.as_ref().is_some_and(|b| b.capacity >= len) {
            return;
        }
        let capacity = block_capacity(len);
        let table: Vec<[u8; 4]> = (0..capacity as u32).map(encode_label).collect();
        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Label Color Buffer"),
            contents: bytemuck::cast_slice(&table),
            usage: wgpu::BufferUsages::VERTEX,
        });
        self.labels = Some(GrowableBuffer { buffer, capacity });
    }
}

impl PartitionBackend for RasterBackend {
    fn partition(&mut self, seeds: &[Position], width: u32, height: u32) -> Result<LabelRaster> {
        validate_request(seeds, width, height)?;

        self.ensure_target(width, height)?;
        self.ensure_labels(seeds.len());
        self.upload_seeds(seeds);

        let (Some(target), Some(seed_buffer), Some(label_buffer)) =
            (&self.target, &self.seeds, &self.labels)
        else {
            return Err(StippleError::Gpu("GPU buffers were not initialized".into()));
        };

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Cone Encoder"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Cone Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &target.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_vertex_buffer(0, target.cone.slice(..));
            pass.set_vertex_buffer(1, seed_buffer.buffer.slice(..));
            pass.set_vertex_buffer(2, label_buffer.buffer.slice(..));
            pass.draw(0..target.cone_vertices, 0..seeds.len() as u32);
        }

        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &target.color,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &target.readback,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(target.padded_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        // Read back results
        let buffer_slice = target.readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| StippleError::Gpu(format!("Readback channel closed: {}", e)))?
            .map_err(|e| StippleError::Gpu(format!("Buffer map failed: {:?}", e)))?;

        let mut labels = Vec::with_capacity(width as usize * height as usize);
        {
            let data = buffer_slice.get_mapped_range();
            for row in data.chunks_exact(target.padded_row as usize) {
                labels.extend(
                    row[..width as usize * 4]
                        .chunks_exact(4)
                        .map(|px| decode_label([px[0], px[1], px[2], px[3]])),
                );
            }
        }
        target.readback.unmap();

        Ok(LabelRaster::new(labels, width, height))
    }

    fn name(&self) -> &'static str {
        "gpu-raster"
    }
}
