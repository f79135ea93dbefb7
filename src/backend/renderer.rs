// Renderer - instance + chosen device
//
// Creation order is instance first, device once a surface exists. Drop runs
// it backwards: logical device, debug callback, instance.

use ash::extensions::khr;
use ash::vk;
use std::ffi::CStr;

use super::error::InitError;
use super::instance::{InstanceManager, InstanceSettings};
use super::selector::{AshDriver, DeviceSelector, SelectionSettings};

/// Device extensions every selected GPU is created with.
pub fn device_extensions() -> Vec<&'static CStr> {
    vec![khr::Swapchain::name()]
}

/// Everything the window side needs from the chosen device.
#[derive(Clone)]
pub struct DeviceContext {
    pub instance: ash::Instance,
    pub physical_device: vk::PhysicalDevice,
    pub device: ash::Device,
    pub queue: vk::Queue,
    pub graphics_queue_family: u32,
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
}

pub struct Renderer {
    selector: Option<DeviceSelector<AshDriver>>,
    selection: SelectionSettings,
    surface_loader: khr::Surface,
    instance: ash::Instance,
    manager: InstanceManager,
}

impl Renderer {
    /// Create the instance. `platform_extensions` come from the windowing side.
    pub fn new(
        settings: &InstanceSettings,
        selection: SelectionSettings,
        platform_extensions: &[&CStr],
    ) -> Result<Self, InitError> {
        let manager = InstanceManager::initialize(settings, platform_extensions)?;
        let instance = manager
            .instance()
            .cloned()
            .ok_or(InitError::InvalidState {
                operation: "Renderer::new",
                state: "destroyed",
            })?;
        let surface_loader = khr::Surface::new(manager.entry(), &instance);

        log::debug!(
            "Instance ready: {} extension(s), {} layer(s), debug callback {}",
            manager.enabled_extensions().len(),
            manager.enabled_layers().len(),
            if manager.has_debug_callback() { "on" } else { "off" }
        );

        Ok(Self {
            selector: None,
            selection,
            surface_loader,
            instance,
            manager,
        })
    }

    /// Pick the GPU for `surface` and create the logical device on it.
    pub fn init_device(&mut self, surface: vk::SurfaceKHR) -> Result<(), InitError> {
        if self.selector.is_some() {
            return Err(InitError::InvalidState {
                operation: "init_device",
                state: "device-created",
            });
        }

        let driver = AshDriver::new(self.instance.clone(), self.surface_loader.clone());
        let mut selector = DeviceSelector::new(driver, self.selection, device_extensions());
        selector.enumerate_and_rank(surface)?;
        for (rank, candidate) in selector.candidates().iter().enumerate() {
            log::info!(
                "GPU candidate #{}: {:?} (score {})",
                rank,
                candidate.handle,
                candidate.score
            );
        }
        selector.create_logical_device()?;
        log::debug!("Device selector is {:?}", selector.state());

        self.selector = Some(selector);
        Ok(())
    }

    /// Handles of the created device; fails before `init_device`.
    pub fn device_context(&self) -> Result<DeviceContext, InitError> {
        let not_ready = || InitError::InvalidState {
            operation: "device_context",
            state: "uninitialized",
        };
        let selector = self.selector.as_ref().ok_or_else(not_ready)?;
        let logical = selector.logical_device().ok_or_else(not_ready)?;
        let selected = selector.selected().ok_or_else(not_ready)?;

        Ok(DeviceContext {
            instance: self.instance.clone(),
            physical_device: selected.handle,
            device: logical.device.clone(),
            queue: logical.queue,
            graphics_queue_family: logical.queue_family,
            properties: *selector.properties().ok_or_else(not_ready)?,
            memory_properties: *selector.memory_properties().ok_or_else(not_ready)?,
        })
    }

    pub fn entry(&self) -> &ash::Entry {
        self.manager.entry()
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn surface_loader(&self) -> &khr::Surface {
        &self.surface_loader
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Some(mut selector) = self.selector.take() {
            selector.teardown();
        }
        self.manager.teardown();
    }
}
