//! # Compute Device Selection
//!
//! Picks the candle device inference runs on. Auto-detection tries CUDA,
//! then Metal, then falls back to CPU; an explicit preference from the
//! configuration wins, with the same CPU fallback if the requested
//! accelerator is absent.

use candle_core::Device;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Detection runs once per process; the result is cached here.
static BEST_DEVICE: OnceLock<Device> = OnceLock::new();

/// Parsed form of the `classifier.device` configuration value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    /// Probe for the best available device
    #[default]
    Auto,
    /// Plain CPU
    Cpu,
    /// NVIDIA GPU, falling back to CPU when unavailable
    Cuda,
    /// Apple GPU, falling back to CPU when unavailable
    Metal,
}

impl std::str::FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" | "automatic" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda),
            "metal" => Ok(DevicePreference::Metal),
            _ => Err(format!("Unknown device preference: {}", s)),
        }
    }
}

/// Resolve a preference to a concrete device.
pub fn select_device(preference: DevicePreference) -> Device {
    match preference {
        DevicePreference::Auto => best_device().clone(),
        DevicePreference::Cpu => Device::Cpu,
        DevicePreference::Cuda => try_cuda().unwrap_or(Device::Cpu),
        DevicePreference::Metal => try_metal().unwrap_or(Device::Cpu),
    }
}

/// Resolve the configuration string directly, tolerating bad input.
pub fn device_from_config(device_str: &str) -> Device {
    match device_str.parse::<DevicePreference>() {
        Ok(preference) => select_device(preference),
        Err(_) => {
            warn!("Invalid device preference '{}', using auto", device_str);
            best_device().clone()
        }
    }
}

/// Short device name for logs.
pub fn device_label(device: &Device) -> &'static str {
    match device {
        Device::Cpu => "CPU",
        Device::Cuda(_) => "CUDA GPU",
        Device::Metal(_) => "Metal GPU",
    }
}

fn best_device() -> &'static Device {
    BEST_DEVICE.get_or_init(|| {
        if let Some(device) = try_cuda() {
            info!("Selected CUDA GPU for inference");
            return device;
        }
        if let Some(device) = try_metal() {
            info!("Selected Metal GPU for inference");
            return device;
        }
        info!("Using CPU for inference (no GPU acceleration available)");
        Device::Cpu
    })
}

fn try_cuda() -> Option<Device> {
    match Device::new_cuda(0) {
        Ok(device) => Some(device),
        Err(e) => {
            debug!("CUDA not available: {}", e);
            None
        }
    }
}

fn try_metal() -> Option<Device> {
    match Device::new_metal(0) {
        Ok(device) => Some(device),
        Err(e) => {
            debug!("Metal not available: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preference_parsing() {
        assert_eq!("auto".parse::<DevicePreference>().unwrap(), DevicePreference::Auto);
        assert_eq!("CPU".parse::<DevicePreference>().unwrap(), DevicePreference::Cpu);
        assert_eq!("gpu".parse::<DevicePreference>().unwrap(), DevicePreference::Cuda);
        assert_eq!("metal".parse::<DevicePreference>().unwrap(), DevicePreference::Metal);
        assert!("npu".parse::<DevicePreference>().is_err());
    }

    #[test]
    fn cpu_is_always_available() {
        let device = select_device(DevicePreference::Cpu);
        assert!(matches!(device, Device::Cpu));

        // A bad config string falls back instead of failing.
        let _ = device_from_config("not-a-device");
    }
}
