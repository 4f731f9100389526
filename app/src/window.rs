//! Preview window: winit event pumping and wgpu presentation.
//!
//! The render loop owns the event loop and pumps it without blocking on
//! every `present` and `exit_requested` call, so the window lives on the
//! same thread as the supervisor.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use wgpu::util::DeviceExt;
use winit::application::ApplicationHandler;
use winit::dpi::{LogicalSize, PhysicalSize};
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::{Window, WindowId};

use preview_ipc::VideoSettings;
use preview_video::{Renderer, VideoError, VideoFrame, VideoResult};

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
struct AspectRatioUniform {
    scale: [f32; 2],
    _padding: [f32; 2],
}

/// Scale that letterboxes a `frame_w`x`frame_h` picture inside the surface.
fn aspect_scale(frame_w: u32, frame_h: u32, surface_w: u32, surface_h: u32) -> AspectRatioUniform {
    let frame_aspect = frame_w.max(1) as f32 / frame_h.max(1) as f32;
    let surface_aspect = surface_w.max(1) as f32 / surface_h.max(1) as f32;

    let (scale_x, scale_y) = if frame_aspect > surface_aspect {
        (1.0, surface_aspect / frame_aspect)
    } else {
        (frame_aspect / surface_aspect, 1.0)
    };

    AspectRatioUniform {
        scale: [scale_x, scale_y],
        _padding: [0.0, 0.0],
    }
}

/// Expand packed BGR pixels to BGRA with an opaque alpha channel.
fn bgr_to_bgra(bgr: &[u8], out: &mut Vec<u8>) {
    out.clear();
    out.reserve(bgr.len() / 3 * 4);
    for pixel in bgr.chunks_exact(3) {
        out.extend_from_slice(&[pixel[0], pixel[1], pixel[2], u8::MAX]);
    }
}

/// GPU resources for one frame size.
struct GpuState {
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    pipeline: wgpu::RenderPipeline,
    texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
    aspect_buffer: wgpu::Buffer,
    frame_width: u32,
    frame_height: u32,
    staging: Vec<u8>,
}

impl GpuState {
    fn new(window: Arc<Window>, frame_width: u32, frame_height: u32) -> VideoResult<Self> {
        let size = window.inner_size();
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());

        let surface = instance
            .create_surface(window)
            .map_err(|e| VideoError::GpuInit(format!("Failed to create surface: {e}")))?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| VideoError::GpuInit("No compatible graphics adapter".to_string()))?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("preview device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
            },
            None,
        ))
        .map_err(|e| VideoError::GpuInit(format!("Failed to get device: {e}")))?;

        let caps = surface.get_capabilities(&adapter);
        // Frames are already gamma encoded.
        let format = caps
            .formats
            .iter()
            .find(|f| !f.is_srgb())
            .or_else(|| caps.formats.first())
            .copied()
            .ok_or_else(|| VideoError::GpuInit("Surface reports no formats".to_string()))?;

        let present_mode = [wgpu::PresentMode::Mailbox, wgpu::PresentMode::Immediate]
            .into_iter()
            .find(|mode| caps.present_modes.contains(mode))
            .unwrap_or(wgpu::PresentMode::Fifo);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode,
            alpha_mode: caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 1,
        };
        surface.configure(&device, &config);

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("frame texture"),
            size: wgpu::Extent3d {
                width: frame_width,
                height: frame_height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Bgra8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let aspect = aspect_scale(frame_width, frame_height, config.width, config.height);
        let aspect_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("aspect ratio"),
            contents: bytemuck::cast_slice(&[aspect]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("frame bind group layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
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
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("frame bind group"),
            layout: &layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: aspect_buffer.as_entire_binding(),
                },
            ],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("frame shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shader.wgsl").into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("frame pipeline layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("frame pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: config.format,
                    blend: Some(wgpu::BlendState::REPLACE),
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
            multiview: None,
        });

        info!(
            frame_width,
            frame_height,
            surface_width = config.width,
            surface_height = config.height,
            ?present_mode,
            "GPU renderer initialized"
        );

        Ok(Self {
            surface,
            device,
            queue,
            config,
            pipeline,
            texture,
            bind_group,
            aspect_buffer,
            frame_width,
            frame_height,
            staging: Vec::new(),
        })
    }

    fn matches(&self, frame: &VideoFrame) -> bool {
        self.frame_width == frame.width && self.frame_height == frame.height
    }

    fn resize(&mut self, size: PhysicalSize<u32>) {
        if size.width == 0 || size.height == 0 {
            return;
        }
        self.config.width = size.width;
        self.config.height = size.height;
        self.surface.configure(&self.device, &self.config);

        let aspect = aspect_scale(self.frame_width, self.frame_height, size.width, size.height);
        self.queue
            .write_buffer(&self.aspect_buffer, 0, bytemuck::cast_slice(&[aspect]));
    }

    fn draw(&mut self, frame: &VideoFrame) -> VideoResult<()> {
        bgr_to_bgra(&frame.data, &mut self.staging);
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &self.staging,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(frame.width * 4),
                rows_per_image: Some(frame.height),
            },
            wgpu::Extent3d {
                width: frame.width,
                height: frame.height,
                depth_or_array_layers: 1,
            },
        );

        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Outdated) | Err(wgpu::SurfaceError::Lost) => {
                debug!("Surface outdated, reconfiguring");
                self.surface.configure(&self.device, &self.config);
                return Ok(());
            }
            Err(wgpu::SurfaceError::Timeout) => {
                warn!(sequence = frame.sequence, "Surface timeout, skipping frame");
                return Ok(());
            }
            Err(e) => return Err(VideoError::RenderFailed(e.to_string())),
        };

        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame encoder"),
            });

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("frame pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &self.bind_group, &[]);
            pass.draw(0..6, 0..1);
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }
}

/// Window state driven by the pumped event loop.
struct PreviewWindow {
    title: String,
    size: LogicalSize<u32>,
    window: Option<Arc<Window>>,
    gpu: Option<GpuState>,
    exit: bool,
    failure: Option<String>,
}

impl ApplicationHandler for PreviewWindow {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attributes = Window::default_attributes()
            .with_title(self.title.clone())
            .with_inner_size(self.size);

        match event_loop.create_window(attributes) {
            Ok(window) => {
                info!(title = %self.title, "Preview window opened");
                self.window = Some(Arc::new(window));
            }
            Err(e) => {
                self.failure = Some(e.to_string());
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                self.exit = true;
                event_loop.exit();
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(KeyCode::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                self.exit = true;
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(gpu) = self.gpu.as_mut() {
                    gpu.resize(size);
                }
            }
            _ => {}
        }
    }
}

/// Renderer that shows frames in a desktop window.
///
/// Escape or closing the window raises the exit request.
pub struct WindowRenderer {
    event_loop: EventLoop<()>,
    app: PreviewWindow,
}

impl WindowRenderer {
    /// Create the event loop. The window itself opens on the first pump.
    pub fn new(settings: &VideoSettings) -> VideoResult<Self> {
        let event_loop = EventLoop::new().map_err(|e| VideoError::WindowCreation(e.to_string()))?;

        Ok(Self {
            event_loop,
            app: PreviewWindow {
                title: settings.window_title.clone(),
                size: LogicalSize::new(settings.width, settings.height),
                window: None,
                gpu: None,
                exit: false,
                failure: None,
            },
        })
    }

    fn pump(&mut self) -> VideoResult<()> {
        if let PumpStatus::Exit(code) = self
            .event_loop
            .pump_app_events(Some(Duration::ZERO), &mut self.app)
        {
            debug!(code, "Event loop exited");
            self.app.exit = true;
        }

        match self.app.failure.take() {
            Some(message) => Err(VideoError::WindowCreation(message)),
            None => Ok(()),
        }
    }
}

impl Renderer for WindowRenderer {
    fn present(&mut self, frame: &VideoFrame, title: &str) -> VideoResult<()> {
        self.pump()?;
        if self.app.exit {
            return Ok(());
        }

        let Some(window) = self.app.window.clone() else {
            return Ok(());
        };
        if self.app.title != title {
            window.set_title(title);
            self.app.title = title.to_string();
        }

        if !self.app.gpu.as_ref().is_some_and(|gpu| gpu.matches(frame)) {
            self.app.gpu = None;
            self.app.gpu = Some(GpuState::new(window, frame.width, frame.height)?);
        }

        match self.app.gpu.as_mut() {
            Some(gpu) => gpu.draw(frame),
            None => Ok(()),
        }
    }

    fn exit_requested(&mut self) -> bool {
        if let Err(e) = self.pump() {
            warn!("Window failed: {}", e);
            self.app.exit = true;
        }
        self.app.exit
    }
}
