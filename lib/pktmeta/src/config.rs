// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Runtime configuration, read from TOML.

use crate::engine::parse::ParseOptions;
use crate::pool::POOL_HEADROOM;
use crate::pool::POOL_TAILROOM;
use crate::pool::PoolParams;
use alloc::collections::BTreeSet;
use alloc::string::String;
use alloc::vec::Vec;
use serde::Deserialize;
use serde::Serialize;
use std::path::Path;
use std::path::PathBuf;
use thiserror::Error;

/// Headroom the packet layer asks of every pool by default.
pub const DEFAULT_HEADROOM: u16 = 64;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed configuration")]
    Toml(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// The packet layer's requirements on pool blocks.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PacketConfig {
    /// Bytes reserved in front of every frame.
    pub headroom: u16,
    /// Bytes reserved after every frame. Only 0 is supported.
    pub tailroom: u16,
}

impl Default for PacketConfig {
    fn default() -> Self {
        Self { headroom: DEFAULT_HEADROOM, tailroom: 0 }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    pub packet: PacketConfig,
    pub parser: ParseOptions,
    pub pools: Vec<PoolParams>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            packet: PacketConfig::default(),
            parser: ParseOptions::default(),
            pools: vec![PoolParams::default()],
        }
    }
}

impl RuntimeConfig {
    /// Read and validate the configuration at `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| {
            ConfigError::Io { path: path.to_path_buf(), source }
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate a configuration. Missing sections take their
    /// defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: Self = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let headroom = usize::from(self.packet.headroom);
        if headroom > POOL_HEADROOM {
            return Err(ConfigError::Invalid(format!(
                "headroom {headroom} exceeds the pool reservation of \
                 {POOL_HEADROOM} bytes"
            )));
        }

        if usize::from(self.packet.tailroom) != POOL_TAILROOM {
            return Err(ConfigError::Invalid(format!(
                "tailroom must be {POOL_TAILROOM}, got {}",
                self.packet.tailroom
            )));
        }

        if self.parser.max_ipv6_ext_hdrs == 0 {
            return Err(ConfigError::Invalid(
                "max_ipv6_ext_hdrs must be at least 1".into(),
            ));
        }

        let mut names = BTreeSet::new();
        for pool in &self.pools {
            if pool.num_blocks == 0 || pool.block_len == 0 {
                return Err(ConfigError::Invalid(format!(
                    "pool {}: num_blocks and block_len must be non-zero",
                    pool.name
                )));
            }

            if !names.insert(pool.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate pool name {}",
                    pool.name
                )));
            }
        }

        Ok(())
    }
}
