use crate::defaults;
use crate::error::{Result, RevoiceError};
use crate::streaming::backend::ConversionConfig;
use crate::streaming::buffer::BufferConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub conversion: ConversionSection,
    pub buffer: BufferSection,
}

/// Audio format configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub chunk_size: usize,
}

/// Voice conversion configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConversionSection {
    pub model: PathBuf,
    pub pitch_shift: i32,
    pub index_rate: f32,
    pub high_accuracy_pitch: bool,
}

/// Buffering configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BufferSection {
    pub lookahead_chunks: usize,
    pub context_chunks: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            channels: defaults::CHANNELS,
            chunk_size: defaults::CHUNK_SIZE,
        }
    }
}

impl Default for ConversionSection {
    fn default() -> Self {
        Self {
            model: PathBuf::new(),
            pitch_shift: defaults::PITCH_SHIFT,
            index_rate: defaults::INDEX_RATE,
            high_accuracy_pitch: true,
        }
    }
}

impl Default for BufferSection {
    fn default() -> Self {
        Self {
            lookahead_chunks: 0,
            context_chunks: 0,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e) => {
                if e.downcast_ref::<std::io::Error>()
                    .map(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
                    .unwrap_or(false)
                {
                    Ok(Self::default())
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - REVOICE_MODEL → conversion.model
    /// - REVOICE_PITCH → conversion.pitch_shift
    /// - REVOICE_INDEX_RATE → conversion.index_rate
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(model) = std::env::var("REVOICE_MODEL")
            && !model.is_empty()
        {
            self.conversion.model = PathBuf::from(model);
        }

        if let Ok(pitch) = std::env::var("REVOICE_PITCH")
            && let Ok(pitch) = pitch.parse::<i32>()
        {
            self.conversion.pitch_shift = pitch;
        }

        if let Ok(rate) = std::env::var("REVOICE_INDEX_RATE")
            && let Ok(rate) = rate.parse::<f32>()
        {
            self.conversion.index_rate = rate;
        }

        self
    }

    /// Validate conversion parameter ranges.
    ///
    /// The first out-of-range value is reported; in-range values are never
    /// silently clamped.
    pub fn validate(&self) -> Result<()> {
        if !defaults::VALID_SAMPLE_RATES.contains(&self.audio.sample_rate) {
            return Err(RevoiceError::ConfigInvalidValue {
                key: "audio.sample_rate".to_string(),
                message: format!("{} Hz is not a supported rate", self.audio.sample_rate),
            });
        }

        if self.audio.chunk_size < defaults::MIN_CHUNK_SIZE
            || self.audio.chunk_size > defaults::MAX_CHUNK_SIZE
        {
            return Err(RevoiceError::ConfigInvalidValue {
                key: "audio.chunk_size".to_string(),
                message: format!(
                    "must be between {} and {} samples",
                    defaults::MIN_CHUNK_SIZE,
                    defaults::MAX_CHUNK_SIZE
                ),
            });
        }

        if self.conversion.pitch_shift < defaults::MIN_PITCH_SHIFT
            || self.conversion.pitch_shift > defaults::MAX_PITCH_SHIFT
        {
            return Err(RevoiceError::ConfigInvalidValue {
                key: "conversion.pitch_shift".to_string(),
                message: format!(
                    "must be between {} and {} semitones",
                    defaults::MIN_PITCH_SHIFT,
                    defaults::MAX_PITCH_SHIFT
                ),
            });
        }

        if !(0.0..=1.0).contains(&self.conversion.index_rate) {
            return Err(RevoiceError::ConfigInvalidValue {
                key: "conversion.index_rate".to_string(),
                message: "must be between 0.0 and 1.0".to_string(),
            });
        }

        Ok(())
    }

    /// Project this config onto the buffer manager configuration.
    pub fn buffer_config(&self) -> BufferConfig {
        BufferConfig {
            chunk_size: self.audio.chunk_size,
            lookahead_chunks: self.buffer.lookahead_chunks,
            context_chunks: self.buffer.context_chunks,
            sample_rate: self.audio.sample_rate,
            channels: self.audio.channels,
        }
    }

    /// Project this config onto a backend conversion configuration.
    pub fn conversion_config(&self) -> ConversionConfig {
        let buffer = self.buffer_config();
        ConversionConfig {
            model_path: self.conversion.model.clone(),
            pitch_shift: self.conversion.pitch_shift,
            index_rate: self.conversion.index_rate,
            sample_rate: self.audio.sample_rate,
            use_high_accuracy_pitch: self.conversion.high_accuracy_pitch,
            chunk_size: self.audio.chunk_size,
            lookahead_size: buffer.lookahead_size(),
            context_size: buffer.context_size(),
        }
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/revoice/config.toml on Linux
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("revoice").join("config.toml"))
    }
}
