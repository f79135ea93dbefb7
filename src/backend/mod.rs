// Backend module - Vulkan bootstrap
//
// Instance and device setup live here; the window side (surface, swapchain,
// render pass, per-frame commands) consumes the handles they produce.

pub mod debug;
pub mod error;
pub mod image;
pub mod instance;
pub mod render_pass;
pub mod renderer;
pub mod selector;
pub mod swapchain;
pub mod sync;
pub mod window;

pub use error::InitError;
pub use instance::InstanceSettings;
pub use renderer::{DeviceContext, Renderer};
pub use selector::SelectionSettings;
pub use window::Window;

use std::ffi::c_char;

/// Read a fixed-size, nul-terminated name array from a Vulkan struct.
pub(crate) fn fixed_c_str(raw: &[c_char]) -> String {
    let bytes: Vec<u8> = raw.iter().take_while(|&&c| c != 0).map(|&c| c as u8).collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Create one handle per item. If any creation fails, the handles created so
/// far are destroyed before the error is returned.
pub(crate) fn create_each<T, H, E>(
    items: &[T],
    mut create: impl FnMut(&T) -> Result<H, E>,
    mut destroy: impl FnMut(H),
) -> Result<Vec<H>, E> {
    let mut handles = Vec::with_capacity(items.len());
    for item in items {
        match create(item) {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                handles.into_iter().for_each(&mut destroy);
                return Err(e);
            }
        }
    }
    Ok(handles)
}
