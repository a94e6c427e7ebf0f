//! Configuration types for the Looker engine.

use crate::errors::EngineError;
use looker_cache::CacheLimits;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Instance cache budgets.
    #[serde(default)]
    pub instance_cache: InstanceCacheConfig,
    /// Frame streaming settings.
    #[serde(default)]
    pub frame_stream: FrameStreamConfig,
    /// Label painting worker pool settings.
    #[serde(default)]
    pub label_rendering: LabelRenderingConfig,
}

/// Budgets for hidden rendering instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceCacheConfig {
    /// Maximum number of hidden instances.
    #[serde(default = "default_max_hidden_items")]
    pub max_hidden_items: usize,
    /// Maximum cumulative size of hidden instances in bytes.
    #[serde(default = "default_max_hidden_items_size_bytes")]
    pub max_hidden_items_size_bytes: usize,
}

fn default_max_hidden_items() -> usize {
    510
}

fn default_max_hidden_items_size_bytes() -> usize {
    1 << 30 // 1 GiB
}

impl Default for InstanceCacheConfig {
    fn default() -> Self {
        Self {
            max_hidden_items: default_max_hidden_items(),
            max_hidden_items_size_bytes: default_max_hidden_items_size_bytes(),
        }
    }
}

impl InstanceCacheConfig {
    /// Budgets in the form the cache takes them.
    #[must_use]
    pub fn limits(&self) -> CacheLimits {
        CacheLimits {
            max_hidden_items: self.max_hidden_items,
            max_hidden_items_size_bytes: self.max_hidden_items_size_bytes,
        }
    }
}

/// Frame streaming configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameStreamConfig {
    /// Frames fetched per chunk request.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,
    /// Maximum number of cached frames per video.
    #[serde(default = "default_max_frames")]
    pub max_frames: usize,
    /// Maximum cumulative size of cached frames in bytes.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

fn default_chunk_size() -> u32 {
    20
}

fn default_max_frames() -> usize {
    1500
}

fn default_max_frame_bytes() -> usize {
    1 << 30 // 1 GiB
}

impl Default for FrameStreamConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_frames: default_max_frames(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

/// Label painting pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelRenderingConfig {
    /// Number of label painting workers.
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
}

fn default_num_workers() -> usize {
    num_cpus::get().clamp(1, 8)
}

impl Default for LabelRenderingConfig {
    fn default() -> Self {
        Self {
            num_workers: default_num_workers(),
        }
    }
}

impl EngineConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Parse a TOML document. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the document does not parse or fails validation.
    pub fn from_toml_str(source: &str) -> Result<Self, EngineError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any budget, the chunk size or the worker count
    /// is zero.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.instance_cache.max_hidden_items == 0 {
            return Err(EngineError::Config(
                "max_hidden_items cannot be 0".to_string(),
            ));
        }
        if self.instance_cache.max_hidden_items_size_bytes == 0 {
            return Err(EngineError::Config(
                "max_hidden_items_size_bytes cannot be 0".to_string(),
            ));
        }

        if self.frame_stream.chunk_size == 0 {
            return Err(EngineError::Config("chunk_size cannot be 0".to_string()));
        }
        if self.frame_stream.max_frames == 0 || self.frame_stream.max_frame_bytes == 0 {
            return Err(EngineError::Config(
                "Frame cache budgets cannot be 0".to_string(),
            ));
        }

        if self.label_rendering.num_workers == 0 {
            return Err(EngineError::Config(
                "At least one label worker is required".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for creating an `EngineConfig`.
#[derive(Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Sets both hidden instance budgets.
    #[must_use]
    pub fn hidden_limits(mut self, max_items: usize, max_size_bytes: usize) -> Self {
        self.config.instance_cache.max_hidden_items = max_items;
        self.config.instance_cache.max_hidden_items_size_bytes = max_size_bytes;
        self
    }

    /// Sets the number of frames per chunk.
    #[must_use]
    pub fn chunk_size(mut self, chunk_size: u32) -> Self {
        self.config.frame_stream.chunk_size = chunk_size;
        self
    }

    /// Sets both frame cache budgets.
    #[must_use]
    pub fn frame_limits(mut self, max_frames: usize, max_frame_bytes: usize) -> Self {
        self.config.frame_stream.max_frames = max_frames;
        self.config.frame_stream.max_frame_bytes = max_frame_bytes;
        self
    }

    /// Sets the label worker pool size.
    #[must_use]
    pub fn num_workers(mut self, num_workers: usize) -> Self {
        self.config.label_rendering.num_workers = num_workers;
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> Result<EngineConfig, EngineError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
