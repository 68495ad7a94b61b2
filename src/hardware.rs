//! Detected hardware profile.

use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::defaults::{MINIMUM_RAM_GB, MINIMUM_VRAM_GB};

/// What the host machine offers for SR processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareProfile {
    pub gpu_available: bool,
    pub vram_gb: u32,
    pub ram_gb: u32,
}

impl HardwareProfile {
    /// A CPU-only profile with the minimum supported RAM; used when
    /// detection is disabled or Safe Mode is forced.
    pub fn cpu_only(ram_gb: u32) -> Self {
        Self {
            gpu_available: false,
            vram_gb: 0,
            ram_gb: ram_gb.max(1),
        }
    }

    pub fn below_vram_target(&self) -> bool {
        self.vram_gb < MINIMUM_VRAM_GB
    }

    pub fn below_ram_target(&self) -> bool {
        self.ram_gb < MINIMUM_RAM_GB
    }
}

/// Probe the host for GPU presence, VRAM, and system RAM.
pub fn detect_hardware() -> HardwareProfile {
    let gpu_available = gpu_detected();
    let mut vram_gb = if gpu_available { detect_vram_gb() } else { 0 };
    let mut ram_gb = detect_ram_gb();

    if gpu_available && vram_gb == 0 {
        vram_gb = MINIMUM_VRAM_GB;
    }
    if ram_gb == 0 {
        ram_gb = MINIMUM_RAM_GB;
    }

    HardwareProfile {
        gpu_available,
        vram_gb,
        ram_gb,
    }
}

fn gpu_detected() -> bool {
    let output = Command::new("nvidia-smi")
        .args(["--query-gpu=name", "--format=csv,noheader"])
        .output();
    match output {
        Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
            .lines()
            .any(|line| !line.trim().is_empty()),
        _ => false,
    }
}

fn detect_vram_gb() -> u32 {
    let output = Command::new("nvidia-smi")
        .args(["--query-gpu=memory.total", "--format=csv,noheader,nounits"])
        .output();
    let Ok(output) = output else {
        return 0;
    };
    if !output.status.success() {
        return 0;
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| {
            line.split_whitespace()
                .next()
                .and_then(|token| token.parse::<u64>().ok())
        })
        .max()
        .map(|mb| mb.div_ceil(1024) as u32)
        .unwrap_or(0)
}

fn detect_ram_gb() -> u32 {
    let mut system = sysinfo::System::new();
    system.refresh_memory();
    let total = system.total_memory();
    if total == 0 {
        return 0;
    }
    total.div_ceil(1024 * 1024 * 1024) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_only_profile() {
        let profile = HardwareProfile::cpu_only(8);
        assert!(!profile.gpu_available);
        assert_eq!(profile.vram_gb, 0);
        assert!(profile.below_vram_target());
        assert!(profile.below_ram_target());
    }

    #[test]
    fn test_detection_yields_sane_values() {
        let profile = detect_hardware();
        assert!(profile.ram_gb >= 1);
        if !profile.gpu_available {
            assert_eq!(profile.vram_gb, 0);
        }
    }
}
