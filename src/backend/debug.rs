// Debug report callback (VK_EXT_debug_report)
//
// The create/destroy entry points are resolved per instance and kept with it.

use ash::vk;
use std::ffi::{c_char, c_void, CStr};
use std::ptr;

use super::error::{check, InitError};

/// Options the callback reads through its user-data pointer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportOptions {
    /// Show error reports in a blocking dialog (Windows only).
    pub error_dialog: bool,
}

/// Debug report entry points resolved from one instance.
#[derive(Clone, Copy)]
pub struct DebugReportFns {
    create: vk::PFN_vkCreateDebugReportCallbackEXT,
    destroy: vk::PFN_vkDestroyDebugReportCallbackEXT,
}

impl DebugReportFns {
    /// Look up both entry points by name. Either one missing means the
    /// extension is unavailable.
    pub fn resolve(entry: &ash::Entry, instance: vk::Instance) -> Result<Self, InitError> {
        let create =
            unsafe { entry.get_instance_proc_addr(instance, c"vkCreateDebugReportCallbackEXT".as_ptr()) };
        let destroy =
            unsafe { entry.get_instance_proc_addr(instance, c"vkDestroyDebugReportCallbackEXT".as_ptr()) };

        match (create, destroy) {
            (Some(create), Some(destroy)) => Ok(Self {
                // SAFETY: the loader returned these for exactly these names
                create: unsafe { std::mem::transmute(create) },
                destroy: unsafe { std::mem::transmute(destroy) },
            }),
            _ => {
                log::error!("Vulkan ERROR: Can't fetch debug function pointers.");
                Err(InitError::DebugFunctionsUnavailable)
            }
        }
    }
}

/// A registered debug report callback.
pub struct DebugReporter {
    fns: DebugReportFns,
    callback: vk::DebugReportCallbackEXT,
}

impl DebugReporter {
    pub fn register(
        fns: DebugReportFns,
        instance: vk::Instance,
        create_info: &vk::DebugReportCallbackCreateInfoEXT,
    ) -> Result<Self, InitError> {
        let mut callback = vk::DebugReportCallbackEXT::null();
        let result = match unsafe { (fns.create)(instance, create_info, ptr::null(), &mut callback) } {
            vk::Result::SUCCESS => Ok(()),
            err => Err(err),
        };
        check("vkCreateDebugReportCallbackEXT", result)?;
        Ok(Self { fns, callback })
    }

    /// Unregister. Must happen before the instance is destroyed.
    pub fn unregister(self, instance: vk::Instance) {
        unsafe { (self.fns.destroy)(instance, self.callback, ptr::null()) };
    }
}

/// Create info for the callback. `options` must outlive every use of the
/// returned struct and the callback registered from it.
pub fn create_info(
    flags: vk::DebugReportFlagsEXT,
    options: &ReportOptions,
) -> vk::DebugReportCallbackCreateInfoEXT {
    vk::DebugReportCallbackCreateInfoEXT::builder()
        .flags(flags)
        .pfn_callback(Some(debug_report_callback))
        .user_data(options as *const ReportOptions as *mut c_void)
        .build()
}

/// One line per report: every severity tag that is set, then the layer and
/// the message.
pub fn describe_report(flags: vk::DebugReportFlagsEXT, layer_prefix: &str, message: &str) -> String {
    const TAGS: [(vk::DebugReportFlagsEXT, &str); 5] = [
        (vk::DebugReportFlagsEXT::INFORMATION, "INFO: "),
        (vk::DebugReportFlagsEXT::WARNING, "WARNING: "),
        (vk::DebugReportFlagsEXT::PERFORMANCE_WARNING, "PERFORMANCE: "),
        (vk::DebugReportFlagsEXT::ERROR, "ERROR: "),
        (vk::DebugReportFlagsEXT::DEBUG, "DEBUG: "),
    ];

    let mut text = String::from("VKDBG: ");
    for (flag, tag) in TAGS {
        if flags.contains(flag) {
            text.push_str(tag);
        }
    }
    text.push_str("@[");
    text.push_str(layer_prefix);
    text.push_str("]: ");
    text.push_str(message);
    text
}

/// Most severe log level for a set of report flags.
pub fn report_level(flags: vk::DebugReportFlagsEXT) -> log::Level {
    if flags.contains(vk::DebugReportFlagsEXT::ERROR) {
        log::Level::Error
    } else if flags.intersects(
        vk::DebugReportFlagsEXT::WARNING | vk::DebugReportFlagsEXT::PERFORMANCE_WARNING,
    ) {
        log::Level::Warn
    } else if flags.contains(vk::DebugReportFlagsEXT::INFORMATION) {
        log::Level::Info
    } else {
        log::Level::Debug
    }
}

unsafe fn lossy(ptr: *const c_char) -> String {
    if ptr.is_null() {
        String::new()
    } else {
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

unsafe extern "system" fn debug_report_callback(
    flags: vk::DebugReportFlagsEXT,
    _object_type: vk::DebugReportObjectTypeEXT,
    _object: u64,
    _location: usize,
    _message_code: i32,
    p_layer_prefix: *const c_char,
    p_message: *const c_char,
    p_user_data: *mut c_void,
) -> vk::Bool32 {
    let text = describe_report(flags, &lossy(p_layer_prefix), &lossy(p_message));
    log::log!(target: "vulkan", report_level(flags), "{}", text);

    if flags.contains(vk::DebugReportFlagsEXT::ERROR) && !p_user_data.is_null() {
        let options = &*(p_user_data as *const ReportOptions);
        if options.error_dialog {
            show_error_dialog(&text);
        }
    }

    // Never abort the call that triggered the report
    vk::FALSE
}

#[cfg(windows)]
fn show_error_dialog(text: &str) {
    #[link(name = "user32")]
    extern "system" {
        fn MessageBoxA(
            hwnd: *mut c_void,
            text: *const c_char,
            caption: *const c_char,
            kind: u32,
        ) -> i32;
    }

    if let Ok(text) = std::ffi::CString::new(text) {
        unsafe {
            MessageBoxA(ptr::null_mut(), text.as_ptr(), c"Vulkan Error!".as_ptr(), 0);
        }
    }
}

#[cfg(not(windows))]
fn show_error_dialog(_text: &str) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describes_single_severity() {
        assert_eq!(
            describe_report(vk::DebugReportFlagsEXT::WARNING, "Validation", "bad usage"),
            "VKDBG: WARNING: @[Validation]: bad usage"
        );
    }

    #[test]
    fn concatenates_every_severity_in_order() {
        let flags = vk::DebugReportFlagsEXT::DEBUG
            | vk::DebugReportFlagsEXT::ERROR
            | vk::DebugReportFlagsEXT::INFORMATION;
        assert_eq!(
            describe_report(flags, "Loader", "msg"),
            "VKDBG: INFO: ERROR: DEBUG: @[Loader]: msg"
        );
    }

    #[test]
    fn empty_flags_still_carry_prefix() {
        assert_eq!(
            describe_report(vk::DebugReportFlagsEXT::empty(), "", ""),
            "VKDBG: @[]: "
        );
    }

    #[test]
    fn level_follows_most_severe_flag() {
        use vk::DebugReportFlagsEXT as F;
        assert_eq!(report_level(F::ERROR | F::WARNING), log::Level::Error);
        assert_eq!(report_level(F::PERFORMANCE_WARNING), log::Level::Warn);
        assert_eq!(report_level(F::WARNING | F::INFORMATION), log::Level::Warn);
        assert_eq!(report_level(F::INFORMATION), log::Level::Info);
        assert_eq!(report_level(F::DEBUG), log::Level::Debug);
    }

    #[test]
    fn callback_never_aborts() {
        let options = ReportOptions {
            error_dialog: false,
        };
        let result = unsafe {
            debug_report_callback(
                vk::DebugReportFlagsEXT::ERROR,
                vk::DebugReportObjectTypeEXT::UNKNOWN,
                0,
                0,
                0,
                c"Validation".as_ptr(),
                c"something broke".as_ptr(),
                &options as *const ReportOptions as *mut c_void,
            )
        };
        assert_eq!(result, vk::FALSE);
    }

    #[test]
    fn create_info_points_at_options() {
        let options = ReportOptions { error_dialog: true };
        let info = create_info(vk::DebugReportFlagsEXT::ERROR, &options);

        assert_eq!(info.flags, vk::DebugReportFlagsEXT::ERROR);
        assert!(info.pfn_callback.is_some());
        assert_eq!(info.p_user_data as *const ReportOptions, &options as *const _);
    }
}
