// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section falls back to defaults, so a missing or partial config.toml
// is fine.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::Path;

use crate::backend::{InstanceSettings, SelectionSettings};

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub instance: InstanceConfig,
    pub debug: DebugConfig,
    pub device: DeviceConfig,
    pub graphics: GraphicsConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan Bootstrap".to_string(),
            width: 512,
            height: 512,
        }
    }
}

/// Instance creation settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    pub application_name: String,
    /// major, minor, patch
    pub api_version: [u32; 3],
    pub validation_layers: bool,
    pub layers: Vec<String>,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            application_name: "Vulkan API Tutorial Series".to_string(),
            api_version: [1, 1, 0],
            validation_layers: true,
            layers: vec!["VK_LAYER_KHRONOS_validation".to_string()],
        }
    }
}

/// Which debug reports to receive
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub report_information: bool,
    pub report_warning: bool,
    pub report_performance: bool,
    pub report_error: bool,
    pub report_debug: bool,
    pub error_dialog: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            report_information: false,
            report_warning: true,
            report_performance: true,
            report_error: true,
            report_debug: false,
            error_dialog: true,
        }
    }
}

/// GPU selection heuristic
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub discrete_gpu_bonus: u64,
    pub require_geometry_shader: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        let defaults = SelectionSettings::default();
        Self {
            discrete_gpu_bonus: defaults.discrete_gpu_bonus,
            require_geometry_shader: defaults.require_geometry_shader,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub clear_color: [f32; 4],
    pub swapchain_images: u32,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.1, 0.2, 0.8, 1.0],
            swapchain_images: 3,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Debug report flags selected in `[debug]`
    pub fn report_flags(&self) -> vk::DebugReportFlagsEXT {
        let debug = &self.debug;
        let mut flags = vk::DebugReportFlagsEXT::empty();
        for (enabled, flag) in [
            (debug.report_information, vk::DebugReportFlagsEXT::INFORMATION),
            (debug.report_warning, vk::DebugReportFlagsEXT::WARNING),
            (debug.report_performance, vk::DebugReportFlagsEXT::PERFORMANCE_WARNING),
            (debug.report_error, vk::DebugReportFlagsEXT::ERROR),
            (debug.report_debug, vk::DebugReportFlagsEXT::DEBUG),
        ] {
            if enabled {
                flags |= flag;
            }
        }
        flags
    }

    /// Instance settings. Validation additionally needs a debug build.
    pub fn instance_settings(&self) -> InstanceSettings {
        let [major, minor, patch] = self.instance.api_version;
        InstanceSettings {
            application_name: self.instance.application_name.clone(),
            api_version: vk::make_api_version(0, major, minor, patch),
            diagnostics: cfg!(debug_assertions) && self.instance.validation_layers,
            layers: self.instance.layers.clone(),
            report_flags: self.report_flags(),
            error_dialog: self.debug.error_dialog,
        }
    }

    pub fn selection_settings(&self) -> SelectionSettings {
        SelectionSettings {
            discrete_gpu_bonus: self.device.discrete_gpu_bonus,
            require_geometry_shader: self.device.require_geometry_shader,
        }
    }
}
