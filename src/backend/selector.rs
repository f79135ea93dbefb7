// Device selection
//
// Responsibilities:
// - Enumerate physical devices and find graphics/present queue families
// - Rank candidates by suitability for a given surface
// - Create the logical device + queue on the best candidate
//
// All driver calls go through `DeviceDriver`, so ranking can be exercised
// without a GPU.

use ash::vk;
use std::ffi::CStr;

use super::error::{check, InitError};
use super::fixed_c_str;

/// Score bonus for discrete GPUs, on top of the max 2D image dimension.
pub const DEFAULT_DISCRETE_GPU_BONUS: u64 = 1000;

/// Knobs for the suitability heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionSettings {
    pub discrete_gpu_bonus: u64,
    pub require_geometry_shader: bool,
}

impl Default for SelectionSettings {
    fn default() -> Self {
        Self {
            discrete_gpu_bonus: DEFAULT_DISCRETE_GPU_BONUS,
            require_geometry_shader: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }
}

/// One enumerated GPU with its queue families and score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysicalDeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub queue_families: QueueFamilyIndices,
    pub score: u64,
}

/// The driver entry points device selection needs.
pub trait DeviceDriver {
    type Device;

    fn enumerate_physical_devices(&self) -> Result<Vec<vk::PhysicalDevice>, InitError>;
    fn queue_family_properties(&self, gpu: vk::PhysicalDevice) -> Vec<vk::QueueFamilyProperties>;
    fn surface_support(
        &self,
        gpu: vk::PhysicalDevice,
        queue_family: u32,
        surface: vk::SurfaceKHR,
    ) -> Result<bool, InitError>;
    fn properties(&self, gpu: vk::PhysicalDevice) -> vk::PhysicalDeviceProperties;
    fn features(&self, gpu: vk::PhysicalDevice) -> vk::PhysicalDeviceFeatures;
    fn memory_properties(&self, gpu: vk::PhysicalDevice) -> vk::PhysicalDeviceMemoryProperties;
    fn create_device(
        &self,
        gpu: vk::PhysicalDevice,
        create_info: &vk::DeviceCreateInfo,
    ) -> Result<Self::Device, InitError>;
    fn device_queue(&self, device: &Self::Device, queue_family: u32, index: u32) -> vk::Queue;
    fn destroy_device(&self, device: Self::Device);
}

/// `DeviceDriver` backed by a real instance and surface loader.
pub struct AshDriver {
    instance: ash::Instance,
    surface_loader: ash::extensions::khr::Surface,
}

impl AshDriver {
    pub fn new(instance: ash::Instance, surface_loader: ash::extensions::khr::Surface) -> Self {
        Self {
            instance,
            surface_loader,
        }
    }
}

impl DeviceDriver for AshDriver {
    type Device = ash::Device;

    fn enumerate_physical_devices(&self) -> Result<Vec<vk::PhysicalDevice>, InitError> {
        check("vkEnumeratePhysicalDevices", unsafe {
            self.instance.enumerate_physical_devices()
        })
    }

    fn queue_family_properties(&self, gpu: vk::PhysicalDevice) -> Vec<vk::QueueFamilyProperties> {
        unsafe { self.instance.get_physical_device_queue_family_properties(gpu) }
    }

    fn surface_support(
        &self,
        gpu: vk::PhysicalDevice,
        queue_family: u32,
        surface: vk::SurfaceKHR,
    ) -> Result<bool, InitError> {
        check("vkGetPhysicalDeviceSurfaceSupportKHR", unsafe {
            self.surface_loader
                .get_physical_device_surface_support(gpu, queue_family, surface)
        })
    }

    fn properties(&self, gpu: vk::PhysicalDevice) -> vk::PhysicalDeviceProperties {
        unsafe { self.instance.get_physical_device_properties(gpu) }
    }

    fn features(&self, gpu: vk::PhysicalDevice) -> vk::PhysicalDeviceFeatures {
        unsafe { self.instance.get_physical_device_features(gpu) }
    }

    fn memory_properties(&self, gpu: vk::PhysicalDevice) -> vk::PhysicalDeviceMemoryProperties {
        unsafe { self.instance.get_physical_device_memory_properties(gpu) }
    }

    fn create_device(
        &self,
        gpu: vk::PhysicalDevice,
        create_info: &vk::DeviceCreateInfo,
    ) -> Result<ash::Device, InitError> {
        unsafe { self.instance.create_device(gpu, create_info, None) }
            .map_err(InitError::DeviceRejected)
    }

    fn device_queue(&self, device: &ash::Device, queue_family: u32, index: u32) -> vk::Queue {
        unsafe { device.get_device_queue(queue_family, index) }
    }

    fn destroy_device(&self, device: ash::Device) {
        unsafe { device.destroy_device(None) };
    }
}

/// Scan queue families in index order for the first graphics family and the
/// first family that can present, stopping once both are known.
pub fn find_queue_families<F>(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: F,
) -> Result<QueueFamilyIndices, InitError>
where
    F: FnMut(u32) -> Result<bool, InitError>,
{
    let mut indices = QueueFamilyIndices::default();

    for (index, family) in (0u32..).zip(families) {
        if family.queue_count > 0 {
            if indices.graphics.is_none()
                && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            {
                indices.graphics = Some(index);
            }
            if indices.present.is_none() && supports_present(index)? {
                indices.present = Some(index);
            }
        }

        if indices.is_complete() {
            break;
        }
    }

    Ok(indices)
}

/// Suitability of a device, zero meaning unusable.
pub fn rate_device(
    indices: &QueueFamilyIndices,
    properties: &vk::PhysicalDeviceProperties,
    features: &vk::PhysicalDeviceFeatures,
    settings: &SelectionSettings,
) -> u64 {
    if !indices.is_complete() {
        return 0;
    }
    if settings.require_geometry_shader && features.geometry_shader != vk::TRUE {
        return 0;
    }

    // Saturating: the bonus comes from config and may be arbitrarily large
    let mut score: u64 = 0;
    if properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
        score = score.saturating_add(settings.discrete_gpu_bonus);
    }
    score.saturating_add(u64::from(properties.limits.max_image_dimension2_d))
}

/// Drop unusable candidates and order the rest by descending score. Ties keep
/// enumeration order.
pub fn rank_candidates(
    mut candidates: Vec<PhysicalDeviceCandidate>,
) -> Result<Vec<PhysicalDeviceCandidate>, InitError> {
    candidates.retain(|candidate| candidate.score > 0);
    if candidates.is_empty() {
        log::error!("Vulkan ERROR: Supported graphics card not found.");
        return Err(InitError::NoSuitableDevice);
    }
    candidates.sort_by(|a, b| b.score.cmp(&a.score));
    Ok(candidates)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorState {
    Uninitialized,
    Enumerated,
    Ranked,
    DeviceCreated,
    Destroyed,
}

impl SelectorState {
    fn name(self) -> &'static str {
        match self {
            SelectorState::Uninitialized => "uninitialized",
            SelectorState::Enumerated => "enumerated",
            SelectorState::Ranked => "ranked",
            SelectorState::DeviceCreated => "device-created",
            SelectorState::Destroyed => "destroyed",
        }
    }
}

/// Logical device and its single graphics/present queue.
pub struct LogicalDevice<T> {
    pub device: T,
    pub queue: vk::Queue,
    pub queue_family: u32,
}

/// Picks a GPU for a surface and owns the logical device made from it.
pub struct DeviceSelector<D: DeviceDriver> {
    driver: D,
    settings: SelectionSettings,
    device_extensions: Vec<&'static CStr>,
    state: SelectorState,
    candidates: Vec<PhysicalDeviceCandidate>,
    properties: Option<vk::PhysicalDeviceProperties>,
    memory_properties: Option<vk::PhysicalDeviceMemoryProperties>,
    logical_device: Option<LogicalDevice<D::Device>>,
}

impl<D: DeviceDriver> DeviceSelector<D> {
    pub fn new(
        driver: D,
        settings: SelectionSettings,
        device_extensions: Vec<&'static CStr>,
    ) -> Self {
        Self {
            driver,
            settings,
            device_extensions,
            state: SelectorState::Uninitialized,
            candidates: Vec::new(),
            properties: None,
            memory_properties: None,
            logical_device: None,
        }
    }

    pub fn state(&self) -> SelectorState {
        self.state
    }

    fn expect_state(
        &self,
        expected: SelectorState,
        operation: &'static str,
    ) -> Result<(), InitError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(InitError::InvalidState {
                operation,
                state: self.state.name(),
            })
        }
    }

    /// Score every physical device against `surface`, in enumeration order.
    pub fn enumerate(&mut self, surface: vk::SurfaceKHR) -> Result<(), InitError> {
        self.expect_state(SelectorState::Uninitialized, "enumerate")?;

        let gpus = self.driver.enumerate_physical_devices()?;
        log::info!("Found {} physical device(s)", gpus.len());

        let mut candidates = Vec::with_capacity(gpus.len());
        for gpu in gpus {
            let families = self.driver.queue_family_properties(gpu);
            let queue_families = find_queue_families(&families, |index| {
                self.driver.surface_support(gpu, index, surface)
            })?;

            let properties = self.driver.properties(gpu);
            let features = self.driver.features(gpu);
            let score = rate_device(&queue_families, &properties, &features, &self.settings);

            log::debug!(
                "GPU '{}' ({:?}): families {:?}, score {}",
                device_name(&properties),
                properties.device_type,
                queue_families,
                score
            );

            candidates.push(PhysicalDeviceCandidate {
                handle: gpu,
                queue_families,
                score,
            });
        }

        self.candidates = candidates;
        self.state = SelectorState::Enumerated;
        Ok(())
    }

    /// Order the enumerated candidates, failing if none is usable.
    pub fn rank(&mut self) -> Result<(), InitError> {
        self.expect_state(SelectorState::Enumerated, "rank")?;

        self.candidates = rank_candidates(std::mem::take(&mut self.candidates))?;

        let best = self.candidates[0].handle;
        let properties = self.driver.properties(best);
        log::info!(
            "Selected GPU: {} (score {})",
            device_name(&properties),
            self.candidates[0].score
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        self.properties = Some(properties);
        self.memory_properties = Some(self.driver.memory_properties(best));
        self.state = SelectorState::Ranked;
        Ok(())
    }

    pub fn enumerate_and_rank(&mut self, surface: vk::SurfaceKHR) -> Result<(), InitError> {
        self.enumerate(surface)?;
        self.rank()
    }

    /// Create the logical device on the top-ranked candidate with one queue
    /// from its graphics family.
    pub fn create_logical_device(&mut self) -> Result<(), InitError> {
        self.expect_state(SelectorState::Ranked, "create_logical_device")?;

        let best = self.candidates[0];
        let queue_family = best
            .queue_families
            .graphics
            .ok_or(InitError::NoSuitableDevice)?;
        if best.queue_families.present != Some(queue_family) {
            log::warn!(
                "Present family {:?} differs from graphics family {}; presenting on the graphics queue",
                best.queue_families.present,
                queue_family
            );
        }

        let queue_priorities = [1.0];
        let queue_create_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(queue_family)
            .queue_priorities(&queue_priorities)
            .build();

        let extensions: Vec<_> = self
            .device_extensions
            .iter()
            .map(|name| name.as_ptr())
            .collect();

        let features = vk::PhysicalDeviceFeatures {
            geometry_shader: if self.settings.require_geometry_shader {
                vk::TRUE
            } else {
                vk::FALSE
            },
            ..Default::default()
        };

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = self.driver.create_device(best.handle, &create_info)?;
        let queue = self.driver.device_queue(&device, queue_family, 0);
        log::info!("Logical device created (queue family {})", queue_family);

        self.logical_device = Some(LogicalDevice {
            device,
            queue,
            queue_family,
        });
        self.state = SelectorState::DeviceCreated;
        Ok(())
    }

    /// Destroy the logical device if one was created. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        if let Some(logical_device) = self.logical_device.take() {
            log::info!("Destroying logical device...");
            self.driver.destroy_device(logical_device.device);
        }
        self.state = SelectorState::Destroyed;
    }

    pub fn candidates(&self) -> &[PhysicalDeviceCandidate] {
        &self.candidates
    }

    /// The candidate the device is (or will be) created on.
    pub fn selected(&self) -> Option<&PhysicalDeviceCandidate> {
        match self.state {
            SelectorState::Ranked | SelectorState::DeviceCreated => self.candidates.first(),
            _ => None,
        }
    }

    pub fn logical_device(&self) -> Option<&LogicalDevice<D::Device>> {
        self.logical_device.as_ref()
    }

    pub fn properties(&self) -> Option<&vk::PhysicalDeviceProperties> {
        self.properties.as_ref()
    }

    pub fn memory_properties(&self) -> Option<&vk::PhysicalDeviceMemoryProperties> {
        self.memory_properties.as_ref()
    }
}

impl<D: DeviceDriver> Drop for DeviceSelector<D> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Device name from the fixed-size C string in the properties.
pub fn device_name(properties: &vk::PhysicalDeviceProperties) -> String {
    fixed_c_str(&properties.device_name)
}
