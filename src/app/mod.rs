//! Application core module
//!
//! Holds the configuration shared by discovery, injection and detection.

mod config;

pub use config::{
    Config, DetectionConfig, DiscoveryConfig, GuesserConfig, HttpConfig, InjectionConfig,
};
