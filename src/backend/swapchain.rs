// Swapchain - Window presentation
//
// Ring of presentable images bound to the window surface. Created once per
// window; resizing is not handled.

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;

use super::{create_each, DeviceContext};

/// A lone UNDEFINED entry means the surface has no preference.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    match formats {
        [only] if only.format == vk::Format::UNDEFINED => Some(vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }),
        _ => formats.first().copied(),
    }
}

/// MAILBOX if offered, otherwise FIFO (always supported).
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Requested image count clamped to what the surface allows
/// (`max_image_count == 0` means no upper limit).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR, requested: u32) -> u32 {
    let mut count = requested.max(caps.min_image_count + 1);
    if caps.max_image_count > 0 && count > caps.max_image_count {
        count = caps.max_image_count;
    }
    count
}

/// Surface extent, or the window size clamped to the surface limits when the
/// surface leaves it to us.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: khr::Swapchain,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    device: ash::Device,
}

impl Swapchain {
    pub fn new(
        ctx: &DeviceContext,
        surface: vk::SurfaceKHR,
        surface_loader: &khr::Surface,
        width: u32,
        height: u32,
        requested_images: u32,
    ) -> Result<Self> {
        let surface_caps = unsafe {
            surface_loader.get_physical_device_surface_capabilities(ctx.physical_device, surface)
        }?;
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(ctx.physical_device, surface)
        }?;
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(ctx.physical_device, surface)
        }?;

        let surface_format =
            choose_surface_format(&formats).context("Surface reports no formats")?;
        let present_mode = choose_present_mode(&present_modes);
        let extent = choose_extent(&surface_caps, width, height);
        let image_count = choose_image_count(&surface_caps, requested_images);

        log::info!(
            "Creating swapchain: {}x{}, {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            image_count,
            surface_format.format,
            present_mode
        );

        let swapchain_loader = khr::Swapchain::new(&ctx.instance, &ctx.device);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }?;

        // From here on Drop destroys the swapchain and any views it holds
        let mut this = Self {
            swapchain,
            swapchain_loader,
            image_views: Vec::new(),
            format: surface_format.format,
            extent,
            device: ctx.device.clone(),
        };

        let images = unsafe { this.swapchain_loader.get_swapchain_images(swapchain) }?;
        log::info!("Created swapchain with {} images", images.len());

        let device = &ctx.device;
        this.image_views = create_each(
            &images,
            |&image| {
                let create_info = vk::ImageViewCreateInfo::builder()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(surface_format.format)
                    .components(vk::ComponentMapping {
                        r: vk::ComponentSwizzle::IDENTITY,
                        g: vk::ComponentSwizzle::IDENTITY,
                        b: vk::ComponentSwizzle::IDENTITY,
                        a: vk::ComponentSwizzle::IDENTITY,
                    })
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });

                unsafe { device.create_image_view(&create_info, None) }
            },
            |view| unsafe { device.destroy_image_view(view, None) },
        )
        .context("Failed to create image view")?;

        Ok(this)
    }

    /// Acquire the next image, signalling `fence` once it is usable.
    pub fn acquire_next_image(&self, fence: vk::Fence) -> Result<u32, vk::Result> {
        let (index, suboptimal) = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                vk::Semaphore::null(),
                fence,
            )
        }?;
        if suboptimal {
            log::debug!("Swapchain is suboptimal for the surface");
        }
        Ok(index)
    }

    /// Present an image once `wait_semaphores` are signalled
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<(), vk::Result> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.swapchain_loader.queue_present(queue, &present_info) }?;
        Ok(())
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 64,
                height: 64,
            },
            max_image_extent: vk::Extent2D {
                width: 1024,
                height: 1024,
            },
            ..Default::default()
        }
    }

    #[test]
    fn undefined_format_means_free_choice() {
        let formats = [vk::SurfaceFormatKHR {
            format: vk::Format::UNDEFINED,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            vk::Format::B8G8R8A8_UNORM
        );
    }

    #[test]
    fn otherwise_first_format_wins() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            vk::Format::R8G8B8A8_SRGB
        );
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn mailbox_preferred_over_fifo() {
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX]),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE]),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn image_count_is_clamped() {
        assert_eq!(choose_image_count(&caps(2, 8), 3), 3);
        assert_eq!(choose_image_count(&caps(2, 2), 3), 2);
        assert_eq!(choose_image_count(&caps(3, 0), 2), 4);
        assert_eq!(choose_image_count(&caps(1, 0), 6), 6);
    }

    #[test]
    fn extent_from_window_when_surface_is_flexible() {
        let extent = choose_extent(&caps(2, 8), 4096, 10);
        assert_eq!((extent.width, extent.height), (1024, 64));
    }

    #[test]
    fn extent_from_surface_when_fixed() {
        let mut fixed = caps(2, 8);
        fixed.current_extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let extent = choose_extent(&fixed, 512, 512);
        assert_eq!((extent.width, extent.height), (800, 600));
    }
}
