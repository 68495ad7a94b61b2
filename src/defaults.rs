//! Default values and tuning constants.

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "SATLIFT_DATA_DIR";

/// Minimum recommended system RAM for local SR processing.
pub const MINIMUM_RAM_GB: u32 = 16;
/// Minimum recommended GPU memory before tiling kicks in.
pub const MINIMUM_VRAM_GB: u32 = 6;

/// Default tile edge for tiled processing.
pub const DEFAULT_TILE_SIZE: u32 = 512;
/// Tile edge used on the out-of-memory retry when headroom is tight.
pub const CONSERVATIVE_TILE_SIZE: u32 = 256;

/// Base processing cost per megapixel of input.
pub const BASE_GPU_SECONDS_PER_MEGAPIXEL: f64 = 0.06;
pub const BASE_CPU_SECONDS_PER_MEGAPIXEL: f64 = 0.35;

/// Relative tolerance for pixel-grid alignment checks.
pub const GRID_ALIGN_TOLERANCE: f64 = 1e-6;

/// Download behaviour for model weights.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DOWNLOAD_TIMEOUT_SECS: u64 = 600;
pub const DOWNLOAD_MAX_RETRIES: u32 = 3;

/// Structured log rotation.
pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

pub fn default_tile_size() -> u32 {
    DEFAULT_TILE_SIZE
}

pub fn minimum_ram_gb() -> u32 {
    MINIMUM_RAM_GB
}

pub fn minimum_vram_gb() -> u32 {
    MINIMUM_VRAM_GB
}
