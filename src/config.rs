use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::Path;

/// Shortest command frame the decoder accepts.
pub const MIN_FRAME_LENGTH: usize = 6;

/// Two decimal digits address a track.
pub const MAX_TRACKS: usize = 99;

/// One decimal digit addresses a group.
pub const MAX_GROUPS: usize = 10;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LooperConfig {
    pub sample_rate: u32,
    pub num_tracks: usize,
    pub num_groups: usize,
    pub track_max_seconds: u32,
    /// Extra frames past the maximum length so a block never straddles the end.
    pub guard_frames: usize,
    /// Frames between a record/overdub command and the moment it takes effect.
    pub rec_frame_delay: u64,
    /// Frames between a play/mute/unmute command and the moment it takes effect.
    pub play_frame_delay: u64,
    pub monitoring_off: bool,
    pub queue_capacity: usize,
    pub serial: SerialConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub device: String,
    pub baud_rate: u32,
    pub frame_length: usize,
}

impl Default for LooperConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            num_tracks: 16,
            num_groups: 4,
            track_max_seconds: 60,
            guard_frames: 512,
            rec_frame_delay: 0,
            play_frame_delay: 0,
            monitoring_off: false,
            queue_capacity: 64,
            serial: SerialConfig::default(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: "/dev/ttyACM0".to_string(),
            baud_rate: 115200,
            frame_length: MIN_FRAME_LENGTH,
        }
    }
}

impl LooperConfig {
    /// Load configuration from a TOML file.
    ///
    /// A missing file yields the defaults. A file that exists but does not
    /// parse is an error, so a typo never silently falls back.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config = Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;
        log::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            bail!("sample_rate must be positive");
        }
        if self.num_tracks == 0 || self.num_tracks > MAX_TRACKS {
            bail!("num_tracks must be between 1 and {}", MAX_TRACKS);
        }
        if self.num_groups == 0 || self.num_groups > MAX_GROUPS {
            bail!("num_groups must be between 1 and {}", MAX_GROUPS);
        }
        if self.track_max_seconds == 0 {
            bail!("track_max_seconds must be positive");
        }
        if self.queue_capacity == 0 {
            bail!("queue_capacity must be positive");
        }
        if self.serial.frame_length < MIN_FRAME_LENGTH {
            bail!(
                "serial.frame_length must be at least {} bytes",
                MIN_FRAME_LENGTH
            );
        }
        Ok(())
    }

    /// Per-channel sample capacity of every track buffer.
    pub fn track_capacity(&self) -> usize {
        self.sample_rate as usize * self.track_max_seconds as usize + self.guard_frames
    }
}
