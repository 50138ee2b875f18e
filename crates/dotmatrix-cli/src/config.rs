use log::warn;
use serde::{Deserialize, Serialize};
use std::path::Path;

use dotmatrix_core::apu::DEFAULT_MASTER_VOLUME;
use dotmatrix_core::ppu::DEFAULT_PALETTE;

/// Settings read from the optional TOML file. Every field may be omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host colors for shades 0 (lightest) through 3 (darkest).
    pub palette: [[u8; 3]; 4],
    pub master_volume: f32,
    /// Capacity of the lossy queue between the core and the WAV writer.
    pub audio_queue_frames: usize,
    /// Frames to run when `--frames` is not given.
    pub frames: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            palette: DEFAULT_PALETTE,
            master_volume: DEFAULT_MASTER_VOLUME,
            audio_queue_frames: 4096,
            frames: 600,
        }
    }
}

pub fn load_from_file(path: &Path) -> Config {
    let text = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            warn!("Failed to read config {}: {e}; using defaults", path.display());
            return Config::default();
        }
    };

    match toml::from_str::<Config>(&text) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(
                "Failed to parse config {}: {e}; using defaults",
                path.display()
            );
            Config::default()
        }
    }
}
