//! Window and GPU surface. The only drawing done natively is clearing the surface to the
//! script-selected background color and presenting it.

use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use winit::dpi::{LogicalSize, PhysicalSize};
use winit::event_loop::ActiveEventLoop;
use winit::window::{Fullscreen, Icon, Window};

use crate::assets::RgbaImage;
use crate::config::WindowConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SurfaceErrorAction {
    Reconfigure,
    Retry,
    OutOfMemory,
    Unknown,
}

pub struct WindowSurface {
    surface: Option<wgpu::Surface<'static>>,
    device: Option<wgpu::Device>,
    queue: Option<wgpu::Queue>,
    config: Option<wgpu::SurfaceConfiguration>,
    msaa_view: Option<wgpu::TextureView>,
    sample_count: u32,
    size: PhysicalSize<u32>,
    window: Option<Arc<Window>>,
    window_config: WindowConfig,
    vsync: bool,
    #[cfg(test)]
    resize_invocations: usize,
}

impl WindowSurface {
    pub fn new(window_cfg: &WindowConfig) -> Self {
        let (width, height) = window_cfg.initial_size();
        Self {
            surface: None,
            device: None,
            queue: None,
            config: None,
            msaa_view: None,
            sample_count: 1,
            size: PhysicalSize::new(width, height),
            window: None,
            window_config: window_cfg.clone(),
            vsync: window_cfg.vsync(),
            #[cfg(test)]
            resize_invocations: 0,
        }
    }

    /// Creates the window and GPU surface on first call. `icon` is applied when present.
    pub fn ensure_window(&mut self, event_loop: &ActiveEventLoop, icon: Option<RgbaImage>) -> Result<()> {
        if self.window.is_some() {
            return Ok(());
        }
        let cfg = &self.window_config;
        let mut attrs = Window::default_attributes().with_title(cfg.title.clone()).with_transparent(cfg.alpha);
        attrs = if cfg.high_dpi {
            attrs.with_inner_size(LogicalSize::new(self.size.width, self.size.height))
        } else {
            attrs.with_inner_size(self.size)
        };
        if cfg.fullscreen {
            attrs = attrs.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }
        if let Some(image) = icon {
            match Icon::from_rgba(image.pixels, image.width, image.height) {
                Ok(icon) => attrs = attrs.with_window_icon(Some(icon)),
                Err(err) => log::warn!("[window] ignoring icon: {err}"),
            }
        }
        let window = Arc::new(event_loop.create_window(attrs).context("Failed to create window")?);
        pollster::block_on(self.init_wgpu(&window))?;
        self.window = Some(window);
        Ok(())
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    pub fn window(&self) -> Option<&Window> {
        self.window.as_deref()
    }

    pub fn scale_factor(&self) -> f64 {
        self.window.as_ref().map_or(1.0, |window| window.scale_factor())
    }

    pub fn set_title(&self, title: &str) {
        if let Some(window) = self.window.as_ref() {
            window.set_title(title);
        }
    }

    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        self.size = new_size;
        #[cfg(test)]
        {
            self.resize_invocations = self.resize_invocations.saturating_add(1);
        }
        if new_size.width > 0 && new_size.height > 0 {
            if let Some(config) = self.config.as_mut() {
                config.width = new_size.width;
                config.height = new_size.height;
                if let Err(err) = self.configure_surface() {
                    log::error!("[window] surface resize failed: {err:?}");
                }
            }
        }
    }

    /// Clears the next surface texture to `color` and presents it.
    pub fn render_clear(&mut self, color: [f32; 4]) -> Result<()> {
        if self.size.width == 0 || self.size.height == 0 {
            return Ok(());
        }
        let surface = self.surface.as_ref().context("Surface not initialized")?;
        let frame = match surface.get_current_texture() {
            Ok(frame) => frame,
            Err(err) => return Err(self.handle_surface_error(&err)),
        };
        let device = self.device.as_ref().context("GPU device not initialized")?;
        let queue = self.queue.as_ref().context("GPU queue not initialized")?;
        let view = frame.texture.create_view(&wgpu::TextureViewDescriptor::default());
        let (target, resolve_target) = match self.msaa_view.as_ref() {
            Some(msaa) => (msaa, Some(&view)),
            None => (&view, None),
        };
        let mut encoder =
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Clear Encoder") });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Clear Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target,
                    depth_slice: None,
                    resolve_target,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(clear_color(color)),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
        }
        queue.submit(Some(encoder.finish()));
        frame.present();
        Ok(())
    }

    pub fn handle_surface_error(&mut self, error: &wgpu::SurfaceError) -> anyhow::Error {
        match Self::surface_error_action(error) {
            SurfaceErrorAction::Reconfigure => {
                self.resize(self.size);
                anyhow!("Surface lost or outdated; reconfigured surface")
            }
            SurfaceErrorAction::Retry => anyhow!("Surface acquisition timed out"),
            SurfaceErrorAction::OutOfMemory => anyhow!("Surface out of memory"),
            SurfaceErrorAction::Unknown => anyhow!("Surface reported an unknown error"),
        }
    }

    fn configure_surface(&mut self) -> Result<()> {
        let surface = self.surface.as_ref().context("Surface not initialized")?;
        let device = self.device.as_ref().context("GPU device not initialized")?;
        let config = self.config.as_ref().context("Surface configuration missing")?;
        surface.configure(device, config);
        self.msaa_view = create_msaa_view(device, config, self.sample_count);
        Ok(())
    }

    fn select_present_mode(&self, modes: &[wgpu::PresentMode]) -> wgpu::PresentMode {
        if self.vsync {
            wgpu::PresentMode::Fifo
        } else {
            modes.iter().copied().find(|mode| *mode != wgpu::PresentMode::Fifo).unwrap_or(wgpu::PresentMode::Fifo)
        }
    }

    fn choose_surface_format(formats: &[wgpu::TextureFormat]) -> Result<wgpu::TextureFormat> {
        formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| formats.first().copied())
            .context("Surface reports no supported formats")
    }

    fn choose_alpha_mode(&self, modes: &[wgpu::CompositeAlphaMode]) -> wgpu::CompositeAlphaMode {
        let preferred = if self.window_config.alpha {
            [wgpu::CompositeAlphaMode::PreMultiplied, wgpu::CompositeAlphaMode::PostMultiplied]
        } else {
            [wgpu::CompositeAlphaMode::Opaque, wgpu::CompositeAlphaMode::Auto]
        };
        preferred
            .iter()
            .copied()
            .find(|mode| modes.contains(mode))
            .or_else(|| modes.first().copied())
            .unwrap_or(wgpu::CompositeAlphaMode::Auto)
    }

    async fn init_wgpu(&mut self, window: &Arc<Window>) -> Result<()> {
        let instance = wgpu::Instance::default();
        let surface = instance.create_surface(window.clone()).context("Failed to create WGPU surface")?;
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("Failed to request WGPU adapter")?;
        let device_desc = wgpu::DeviceDescriptor {
            label: Some("Device"),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            memory_hints: wgpu::MemoryHints::default(),
            trace: wgpu::Trace::default(),
        };
        let (device, queue) = adapter.request_device(&device_desc).await.context("Failed to request WGPU device")?;

        let caps = surface.get_capabilities(&adapter);
        let format = Self::choose_surface_format(&caps.formats)?;
        let size = window.inner_size();
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: self.select_present_mode(&caps.present_modes),
            alpha_mode: self.choose_alpha_mode(&caps.alpha_modes),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);
        let format_flags = adapter.get_texture_format_features(format).flags;
        let sample_count =
            supported_sample_count(self.window_config.sample_count, |count| format_flags.sample_count_supported(count));
        if sample_count != self.window_config.sample_count {
            log::info!("[window] using {sample_count}x multisampling (requested {})", self.window_config.sample_count);
        }

        self.msaa_view = create_msaa_view(&device, &config, sample_count);
        self.sample_count = sample_count;
        self.surface = Some(surface);
        self.device = Some(device);
        self.queue = Some(queue);
        self.config = Some(config);
        self.size = size;
        Ok(())
    }

    fn surface_error_action(error: &wgpu::SurfaceError) -> SurfaceErrorAction {
        match error {
            wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated => SurfaceErrorAction::Reconfigure,
            wgpu::SurfaceError::Timeout => SurfaceErrorAction::Retry,
            wgpu::SurfaceError::OutOfMemory => SurfaceErrorAction::OutOfMemory,
            wgpu::SurfaceError::Other => SurfaceErrorAction::Unknown,
        }
    }
}

/// Largest power of two not above `requested` that the surface format can multisample.
fn supported_sample_count(requested: u32, supported: impl Fn(u32) -> bool) -> u32 {
    [16, 8, 4, 2].into_iter().find(|count| *count <= requested && supported(*count)).unwrap_or(1)
}

fn create_msaa_view(
    device: &wgpu::Device,
    config: &wgpu::SurfaceConfiguration,
    sample_count: u32,
) -> Option<wgpu::TextureView> {
    if sample_count <= 1 {
        return None;
    }
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("MSAA Color Target"),
        size: wgpu::Extent3d { width: config.width.max(1), height: config.height.max(1), depth_or_array_layers: 1 },
        mip_level_count: 1,
        sample_count,
        dimension: wgpu::TextureDimension::D2,
        format: config.format,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    Some(texture.create_view(&wgpu::TextureViewDescriptor::default()))
}

/// Script colors are clamped to `[0, 1]`.
fn clear_color(color: [f32; 4]) -> wgpu::Color {
    let [r, g, b, a] = color.map(|component| if component.is_finite() { component.clamp(0.0, 1.0) } else { 0.0 });
    wgpu::Color { r: r as f64, g: g as f64, b: b as f64, a: a as f64 }
}
