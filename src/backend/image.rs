// Image utilities
//
// Memory type lookup and the depth-stencil attachment used by the window's
// render pass.

use anyhow::{Context, Result};
use ash::vk;

use super::DeviceContext;

/// Depth formats in order of preference.
pub const DEPTH_FORMATS: [vk::Format; 5] = [
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D16_UNORM_S8_UINT,
    vk::Format::D32_SFLOAT,
    vk::Format::D16_UNORM,
];

/// Find a memory type allowed by `type_filter` with all `required` flags.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..memory_properties.memory_type_count).find(|&i| {
        let has_type = (type_filter & (1 << i)) != 0;
        let has_properties = memory_properties.memory_types[i as usize]
            .property_flags
            .contains(required);
        has_type && has_properties
    })
}

/// First format whose optimal tiling can be a depth-stencil attachment.
pub fn choose_depth_format<F>(candidates: &[vk::Format], mut optimal_features: F) -> Option<vk::Format>
where
    F: FnMut(vk::Format) -> vk::FormatFeatureFlags,
{
    candidates.iter().copied().find(|&format| {
        optimal_features(format).contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    })
}

pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::S8_UINT
    )
}

/// Depth-stencil image, its memory and view.
pub struct DepthStencil {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub stencil_available: bool,
}

impl DepthStencil {
    pub fn new(ctx: &DeviceContext, extent: vk::Extent2D) -> Result<Self> {
        let format = choose_depth_format(&DEPTH_FORMATS, |format| unsafe {
            ctx.instance
                .get_physical_device_format_properties(ctx.physical_device, format)
                .optimal_tiling_features
        })
        .context("Depth stencil format not selected")?;
        let stencil_available = has_stencil(format);
        log::info!("Depth-stencil format: {:?}", format);

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let device = &ctx.device;
        let image = unsafe {
            device
                .create_image(&image_info, None)
                .context("Failed to create depth image")?
        };

        let mem_requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory_type_index = find_memory_type(
            &ctx.memory_properties,
            mem_requirements.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )
        .context("No device-local memory type for the depth image")?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(mem_requirements.size)
            .memory_type_index(memory_type_index);

        let memory = unsafe {
            device
                .allocate_memory(&alloc_info, None)
                .context("Failed to allocate depth image memory")?
        };
        unsafe {
            device
                .bind_image_memory(image, memory, 0)
                .context("Failed to bind depth image memory")?;
        }

        let mut aspect_mask = vk::ImageAspectFlags::DEPTH;
        if stencil_available {
            aspect_mask |= vk::ImageAspectFlags::STENCIL;
        }
        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = unsafe {
            device
                .create_image_view(&view_info, None)
                .context("Failed to create depth image view")?
        };

        Ok(Self {
            image,
            memory,
            view,
            format,
            stencil_available,
        })
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_image_view(self.view, None);
            device.free_memory(self.memory, None);
            device.destroy_image(self.image, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (slot, &property_flags) in properties.memory_types.iter_mut().zip(flags) {
            slot.property_flags = property_flags;
        }
        properties
    }

    #[test]
    fn memory_type_respects_filter_and_flags() {
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
        ]);

        assert_eq!(
            find_memory_type(&properties, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            Some(1)
        );
        assert_eq!(
            find_memory_type(&properties, 0b101, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            Some(2)
        );
        assert_eq!(
            find_memory_type(&properties, 0b001, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            None
        );
    }

    #[test]
    fn memory_types_past_count_are_ignored() {
        let mut properties = memory_properties(&[vk::MemoryPropertyFlags::HOST_VISIBLE]);
        properties.memory_types[1].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;

        assert_eq!(
            find_memory_type(&properties, u32::MAX, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            None
        );
    }

    #[test]
    fn depth_format_follows_preference() {
        let chosen = choose_depth_format(&DEPTH_FORMATS, |format| {
            if format == vk::Format::D24_UNORM_S8_UINT || format == vk::Format::D32_SFLOAT {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::FormatFeatureFlags::SAMPLED_IMAGE
            }
        });
        assert_eq!(chosen, Some(vk::Format::D24_UNORM_S8_UINT));
    }

    #[test]
    fn no_depth_format_when_nothing_supported() {
        let chosen = choose_depth_format(&DEPTH_FORMATS, |_| vk::FormatFeatureFlags::empty());
        assert_eq!(chosen, None);
    }

    #[test]
    fn stencil_formats() {
        assert!(has_stencil(vk::Format::D32_SFLOAT_S8_UINT));
        assert!(has_stencil(vk::Format::D24_UNORM_S8_UINT));
        assert!(!has_stencil(vk::Format::D32_SFLOAT));
        assert!(!has_stencil(vk::Format::D16_UNORM));
    }
}
