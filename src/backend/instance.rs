// Instance management
//
// Responsibilities:
// - Load the Vulkan library
// - Assemble instance extensions and validation layers
// - Create the instance with the debug report callback chained in, so
//   messages from instance creation itself are captured
// - Register the callback and tear everything down in the right order

use ash::{vk, Entry};
use std::ffi::{CStr, CString};

use super::debug::{self, DebugReportFns, DebugReporter, ReportOptions};
use super::error::{check, InitError};
use super::fixed_c_str;

/// What the instance is created with.
#[derive(Debug, Clone)]
pub struct InstanceSettings {
    pub application_name: String,
    pub api_version: u32,
    /// Validation layers, debug report extension and callback.
    pub diagnostics: bool,
    pub layers: Vec<String>,
    pub report_flags: vk::DebugReportFlagsEXT,
    pub error_dialog: bool,
}

/// Base surface extension, then the platform ones, then debug report when
/// diagnostics are on. Duplicates are dropped.
pub fn instance_extensions<'a>(platform: &[&'a CStr], diagnostics: bool) -> Vec<&'a CStr> {
    let mut extensions = vec![ash::extensions::khr::Surface::name()];
    for &name in platform {
        if !extensions.contains(&name) {
            extensions.push(name);
        }
    }
    if diagnostics {
        extensions.push(vk::ExtDebugReportFn::name());
    }
    extensions
}

/// Keep the requested layers the loader knows about, in request order.
pub fn retain_available_layers(requested: &[String], available: &[String]) -> Vec<String> {
    requested
        .iter()
        .filter(|layer| {
            let present = available.contains(layer);
            if !present {
                log::warn!("Validation layer {} is not installed, skipping", layer);
            }
            present
        })
        .cloned()
        .collect()
}

fn to_c_strings(names: &[String]) -> Result<Vec<CString>, InitError> {
    names
        .iter()
        .map(|name| CString::new(name.as_str()).map_err(|_| InitError::InvalidName(name.clone())))
        .collect()
}

/// The two calls instance teardown makes.
pub trait InstanceRelease {
    type Reporter;

    fn unregister_reporter(&self, reporter: Self::Reporter);
    fn release(self);
}

impl InstanceRelease for ash::Instance {
    type Reporter = DebugReporter;

    fn unregister_reporter(&self, reporter: DebugReporter) {
        reporter.unregister(self.handle());
    }

    fn release(self) {
        unsafe { self.destroy_instance(None) };
    }
}

/// Unregister the callback first, then destroy the instance. The reporter is
/// left alone when there is no instance to unregister it from.
pub fn release_instance<I: InstanceRelease>(instance: Option<I>, reporter: &mut Option<I::Reporter>) {
    if let Some(instance) = instance {
        if let Some(reporter) = reporter.take() {
            instance.unregister_reporter(reporter);
        }
        log::info!("Destroying Vulkan instance...");
        instance.release();
    }
}

/// Owns the instance and the debug report callback registered on it.
pub struct InstanceManager {
    // Field order: the reporter and instance are torn down explicitly before
    // the entry (and the loader library) go away.
    reporter: Option<DebugReporter>,
    instance: Option<ash::Instance>,
    report_flags: vk::DebugReportFlagsEXT,
    report_options: Box<ReportOptions>,
    extensions: Vec<CString>,
    layers: Vec<CString>,
    entry: Entry,
}

impl InstanceManager {
    /// Load Vulkan and create the instance. With diagnostics on, the debug
    /// report callback is installed before returning.
    pub fn initialize(
        settings: &InstanceSettings,
        platform_extensions: &[&CStr],
    ) -> Result<Self, InitError> {
        let entry = unsafe { Entry::load() }?;

        let extensions: Vec<CString> = instance_extensions(platform_extensions, settings.diagnostics)
            .into_iter()
            .map(CStr::to_owned)
            .collect();

        let layers = if settings.diagnostics {
            let available: Vec<String> = check(
                "vkEnumerateInstanceLayerProperties",
                entry.enumerate_instance_layer_properties(),
            )?
            .iter()
            .map(|layer| fixed_c_str(&layer.layer_name))
            .collect();
            to_c_strings(&retain_available_layers(&settings.layers, &available))?
        } else {
            Vec::new()
        };

        log::info!("Instance extensions: {:?}", extensions);
        log::info!("Instance layers: {:?}", layers);

        let report_options = Box::new(ReportOptions {
            error_dialog: settings.error_dialog,
        });

        let app_name = CString::new(settings.application_name.as_str())
            .map_err(|_| InitError::InvalidName(settings.application_name.clone()))?;
        let engine_name = c"Vulkan Bootstrap";

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(settings.api_version);

        let extension_ptrs: Vec<_> = extensions.iter().map(|name| name.as_ptr()).collect();
        let layer_ptrs: Vec<_> = layers.iter().map(|name| name.as_ptr()).collect();

        let mut debug_info = debug::create_info(settings.report_flags, &report_options);
        let mut create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);
        if settings.diagnostics {
            create_info = create_info.push_next(&mut debug_info);
        }

        let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(|result| {
            log::error!("Vulkan ERROR: instance creation failed: {}", result);
            InitError::InstanceRejected(result)
        })?;
        log::info!("Vulkan instance created");

        let mut manager = Self {
            reporter: None,
            instance: Some(instance),
            report_flags: settings.report_flags,
            report_options,
            extensions,
            layers,
            entry,
        };

        if settings.diagnostics {
            manager.install_debug_callback()?;
        }

        Ok(manager)
    }

    /// Resolve the debug report entry points and register the callback.
    pub fn install_debug_callback(&mut self) -> Result<(), InitError> {
        if self.reporter.is_some() {
            return Ok(());
        }
        let instance = self.instance.as_ref().ok_or(InitError::InvalidState {
            operation: "install_debug_callback",
            state: "destroyed",
        })?;

        let fns = DebugReportFns::resolve(&self.entry, instance.handle())?;
        let create_info = debug::create_info(self.report_flags, &self.report_options);
        self.reporter = Some(DebugReporter::register(fns, instance.handle(), &create_info)?);

        log::info!("Debug report callback installed");
        Ok(())
    }

    /// Unregister the callback, then destroy the instance.
    pub fn teardown(&mut self) {
        release_instance(self.instance.take(), &mut self.reporter);
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// `None` once torn down.
    pub fn instance(&self) -> Option<&ash::Instance> {
        self.instance.as_ref()
    }

    pub fn has_debug_callback(&self) -> bool {
        self.reporter.is_some()
    }

    pub fn enabled_extensions(&self) -> &[CString] {
        &self.extensions
    }

    pub fn enabled_layers(&self) -> &[CString] {
        &self.layers
    }
}

impl Drop for InstanceManager {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct FakeInstance {
        calls: Rc<RefCell<Vec<String>>>,
    }

    impl InstanceRelease for FakeInstance {
        type Reporter = &'static str;

        fn unregister_reporter(&self, reporter: &'static str) {
            self.calls.borrow_mut().push(format!("unregister {}", reporter));
        }

        fn release(self) {
            self.calls.borrow_mut().push("destroy instance".to_string());
        }
    }

    fn fake_instance() -> (FakeInstance, Rc<RefCell<Vec<String>>>) {
        let calls = Rc::new(RefCell::new(Vec::new()));
        (
            FakeInstance {
                calls: calls.clone(),
            },
            calls,
        )
    }

    #[test]
    fn callback_is_unregistered_before_instance_is_destroyed() {
        let (instance, calls) = fake_instance();
        let mut reporter = Some("callback");

        release_instance(Some(instance), &mut reporter);

        assert_eq!(
            *calls.borrow(),
            vec!["unregister callback".to_string(), "destroy instance".to_string()]
        );
        assert!(reporter.is_none());
    }

    #[test]
    fn instance_without_callback_is_just_destroyed() {
        let (instance, calls) = fake_instance();
        let mut reporter = None;

        release_instance(Some(instance), &mut reporter);

        assert_eq!(*calls.borrow(), vec!["destroy instance".to_string()]);
    }

    #[test]
    fn release_without_instance_does_nothing() {
        let mut reporter = Some("callback");

        release_instance::<FakeInstance>(None, &mut reporter);

        assert_eq!(reporter, Some("callback"));
    }

    #[test]
    fn surface_extension_comes_first() {
        let platform = [c"VK_KHR_xlib_surface"];
        let extensions = instance_extensions(&platform, false);
        assert_eq!(
            extensions,
            vec![ash::extensions::khr::Surface::name(), c"VK_KHR_xlib_surface"]
        );
    }

    #[test]
    fn platform_duplicates_are_dropped() {
        let platform = [ash::extensions::khr::Surface::name(), c"VK_KHR_win32_surface"];
        let extensions = instance_extensions(&platform, false);
        assert_eq!(extensions.len(), 2);
    }

    #[test]
    fn debug_report_only_with_diagnostics() {
        let with = instance_extensions(&[], true);
        let without = instance_extensions(&[], false);

        assert!(with.contains(&vk::ExtDebugReportFn::name()));
        assert!(!without.contains(&vk::ExtDebugReportFn::name()));
    }

    #[test]
    fn missing_layers_are_skipped() {
        let requested = vec![
            "VK_LAYER_KHRONOS_validation".to_string(),
            "VK_LAYER_LUNARG_api_dump".to_string(),
        ];
        let available = vec![
            "VK_LAYER_LUNARG_api_dump".to_string(),
            "VK_LAYER_MESA_overlay".to_string(),
        ];
        assert_eq!(
            retain_available_layers(&requested, &available),
            vec!["VK_LAYER_LUNARG_api_dump".to_string()]
        );
    }

    #[test]
    fn interior_nul_is_rejected() {
        let names = vec!["bad\0name".to_string()];
        assert!(matches!(
            to_c_strings(&names),
            Err(InitError::InvalidName(name)) if name == "bad\0name"
        ));
    }
}
