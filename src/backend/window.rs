// Window - OS window, surface and everything presented to it
//
// Opening a window creates the surface, which is what device selection
// needs, so the device is initialized from here. Teardown is the reverse:
// render pass, framebuffers, depth-stencil, swapchain, surface.

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::ffi::CStr;
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::WindowAttributes;

use super::image::DepthStencil;
use super::render_pass::{create_framebuffers, create_render_pass};
use super::selector::device_name;
use super::swapchain::Swapchain;
use super::{DeviceContext, Renderer};
use crate::config::Config;

/// Instance extensions the platform needs for presenting to a window.
pub fn required_instance_extensions(event_loop: &ActiveEventLoop) -> Result<Vec<&'static CStr>> {
    let extensions = ash_window::enumerate_required_extensions(event_loop.raw_display_handle())
        .context("Failed to query platform surface extensions")?;
    // SAFETY: ash_window hands out pointers to static, nul-terminated names
    Ok(extensions
        .iter()
        .map(|&name| unsafe { CStr::from_ptr(name) })
        .collect())
}

pub struct Window {
    framebuffers: Vec<vk::Framebuffer>,
    render_pass: vk::RenderPass,
    depth_stencil: Option<DepthStencil>,
    swapchain: Option<Swapchain>,
    image_available: vk::Fence,
    active_image: Option<u32>,
    surface: vk::SurfaceKHR,
    surface_loader: khr::Surface,
    ctx: DeviceContext,
    window: winit::window::Window,
}

impl Window {
    /// Open the OS window, create its surface, initialize the device for it
    /// and build the swapchain side.
    pub fn open(
        event_loop: &ActiveEventLoop,
        renderer: &mut Renderer,
        config: &Config,
    ) -> Result<Self> {
        let attributes = WindowAttributes::default()
            .with_title(&config.window.title)
            .with_inner_size(PhysicalSize::new(config.window.width, config.window.height))
            .with_resizable(false);
        let window = event_loop
            .create_window(attributes)
            .context("Failed to create window")?;

        let surface = unsafe {
            ash_window::create_surface(
                renderer.entry(),
                renderer.instance(),
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
        }
        .context("Failed to create window surface")?;
        let surface_loader = renderer.surface_loader().clone();

        if let Err(e) = renderer.init_device(surface) {
            unsafe { surface_loader.destroy_surface(surface, None) };
            return Err(e.into());
        }
        let ctx = match renderer.device_context() {
            Ok(ctx) => ctx,
            Err(e) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(e.into());
            }
        };

        log::info!(
            "Presenting on {} (queue family {})",
            device_name(&ctx.properties),
            ctx.graphics_queue_family
        );

        // From here on Drop cleans up whatever has been created
        let mut this = Self {
            framebuffers: Vec::new(),
            render_pass: vk::RenderPass::null(),
            depth_stencil: None,
            swapchain: None,
            image_available: vk::Fence::null(),
            active_image: None,
            surface,
            surface_loader,
            ctx,
            window,
        };
        this.init_swapchain_side(config)?;
        Ok(this)
    }

    fn init_swapchain_side(&mut self, config: &Config) -> Result<()> {
        let size = self.window.inner_size();
        let swapchain = Swapchain::new(
            &self.ctx,
            self.surface,
            &self.surface_loader,
            size.width,
            size.height,
            config.graphics.swapchain_images,
        )?;
        let extent = swapchain.extent;
        let color_format = swapchain.format;
        let image_views = swapchain.image_views.clone();
        self.swapchain = Some(swapchain);

        let depth_stencil = DepthStencil::new(&self.ctx, extent)?;
        let depth_format = depth_stencil.format;
        let stencil_available = depth_stencil.stencil_available;
        let depth_view = depth_stencil.view;
        self.depth_stencil = Some(depth_stencil);

        self.render_pass =
            create_render_pass(&self.ctx.device, color_format, depth_format, stencil_available)?;
        self.framebuffers = create_framebuffers(
            &self.ctx.device,
            &image_views,
            depth_view,
            self.render_pass,
            extent,
        )?;

        let fence_info = vk::FenceCreateInfo::builder();
        self.image_available = unsafe { self.ctx.device.create_fence(&fence_info, None) }
            .context("Failed to create image-available fence")?;

        Ok(())
    }

    fn swapchain(&self) -> Result<&Swapchain> {
        self.swapchain.as_ref().context("Swapchain not initialized")
    }

    /// Acquire the next swapchain image and wait until it can be drawn to.
    /// Returns `None` when the swapchain no longer matches the surface.
    pub fn begin_render(&mut self) -> Result<Option<u32>> {
        let device = &self.ctx.device;
        let image_index = match self.swapchain()?.acquire_next_image(self.image_available) {
            Ok(index) => index,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("Swapchain out of date, skipping frame");
                return Ok(None);
            }
            Err(e) => return Err(e).context("vkAcquireNextImageKHR failed"),
        };

        unsafe {
            device.wait_for_fences(&[self.image_available], true, u64::MAX)?;
            device.reset_fences(&[self.image_available])?;
        }

        self.active_image = Some(image_index);
        Ok(Some(image_index))
    }

    /// Present the image acquired by `begin_render` once `wait_semaphores`
    /// are signalled.
    pub fn end_render(&mut self, wait_semaphores: &[vk::Semaphore]) -> Result<()> {
        let image_index = self
            .active_image
            .take()
            .context("end_render called without begin_render")?;

        match self
            .swapchain()?
            .present(self.ctx.queue, image_index, wait_semaphores)
        {
            Ok(()) => Ok(()),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("Swapchain out of date at present");
                Ok(())
            }
            Err(e) => Err(e).context("vkQueuePresentKHR failed"),
        }
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn framebuffer(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.framebuffers.get(image_index as usize).copied()
    }

    pub fn surface_size(&self) -> vk::Extent2D {
        self.swapchain
            .as_ref()
            .map(|swapchain| swapchain.extent)
            .unwrap_or_default()
    }

    pub fn device_context(&self) -> &DeviceContext {
        &self.ctx
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    pub fn wait_idle(&self) {
        if let Err(e) = unsafe { self.ctx.device.device_wait_idle() } {
            log::warn!("vkDeviceWaitIdle failed: {}", e);
        }
    }
}

impl Drop for Window {
    fn drop(&mut self) {
        log::info!("Closing window...");
        self.wait_idle();

        let device = &self.ctx.device;
        unsafe {
            device.destroy_fence(self.image_available, None);
            for &framebuffer in &self.framebuffers {
                device.destroy_framebuffer(framebuffer, None);
            }
            device.destroy_render_pass(self.render_pass, None);
        }
        if let Some(depth_stencil) = self.depth_stencil.take() {
            depth_stencil.destroy(device);
        }
        self.swapchain = None;
        unsafe { self.surface_loader.destroy_surface(self.surface, None) };
    }
}
