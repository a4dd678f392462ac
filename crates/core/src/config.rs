//! Configuration for the PPU execution core.
//!
//! This module defines the core's environment surface: decoder kind, CPU
//! string, debug/IR-log flags, and the object-cache path, plus the
//! arena/reservation sizing this crate owns.
//! Configuration is supplied as JSON by an external collaborator (the host
//! emulator's settings store) or defaulted for standalone use/tests.

use serde::Deserialize;

/// Default configuration constants.
///
/// Baseline hardware/arena constants, used when a `Config` field is not
/// explicitly overridden.
mod defaults {
    /// Code arena size in bytes (512 MiB).
    pub const ARENA_SIZE: usize = 512 * 1024 * 1024;

    /// First candidate base address for the arena reservation.
    pub const ARENA_BASE_LOW: u64 = 0x1000_0000;

    /// Highest base address such that `base + ARENA_SIZE` stays under 2 GiB.
    pub const ARENA_BASE_HIGH: u64 = 0x8000_0000 - ARENA_SIZE as u64;

    /// Step between successive reservation attempts.
    pub const ARENA_PROBE_STEP: u64 = 0x0100_0000;

    /// Maximum aggregate guest-instruction bytes per module part.
    pub const MAX_PART_BYTES: u32 = 1024 * 1024;

    /// Minimum guest stack size.
    pub const MIN_STACK_BYTES: u32 = 16 * 1024;

    /// Guard page size below a guest stack.
    pub const STACK_GUARD_BYTES: u32 = 4 * 1024;

    /// Command queue ring capacity, in 64-bit slots.
    pub const COMMAND_QUEUE_CAPACITY: usize = 256;
}

/// Selects which decoder backend services the executable cache's fallback
/// and interpreter-slot installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecoderKind {
    /// The precise (fully state-checking) interpreter.
    #[default]
    Precise,
    /// The fast interpreter (skips some architectural checks).
    Fast,
    /// The LLVM recompiler; reaching the fallback handler under this kind is fatal.
    Llvm,
}

/// Root configuration structure.
///
/// # Examples
///
/// ```
/// use ppu_core::config::Config;
///
/// let config = Config::default();
/// assert_eq!(config.arena.size_bytes, 512 * 1024 * 1024);
/// assert!(!config.debug.enable_debug);
/// ```
///
/// Deserializing from JSON (the shape a host emulator's settings store emits):
///
/// ```
/// use ppu_core::config::{Config, DecoderKind};
///
/// let json = r#"{
///     "decoder": { "kind": "llvm", "cpu": "generic" },
///     "debug": { "enable_debug": true, "enable_ir_log": true },
///     "cache_path": "/tmp/ppu-cache"
/// }"#;
///
/// let config: Config = serde_json::from_str(json).unwrap();
/// assert_eq!(config.decoder.kind, DecoderKind::Llvm);
/// assert!(config.debug.enable_debug);
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Decoder/backend selection.
    #[serde(default)]
    pub decoder: DecoderConfig,
    /// Debug and tracing flags.
    #[serde(default)]
    pub debug: DebugConfig,
    /// Code arena sizing and placement.
    #[serde(default)]
    pub arena: ArenaConfig,
    /// Module partitioning and guest-thread bookkeeping.
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Object-cache root directory.
    #[serde(default = "Config::default_cache_path")]
    pub cache_path: String,
}

impl Config {
    fn default_cache_path() -> String {
        "ppu_cache".to_string()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            decoder: DecoderConfig::default(),
            debug: DebugConfig::default(),
            arena: ArenaConfig::default(),
            runtime: RuntimeConfig::default(),
            cache_path: Self::default_cache_path(),
        }
    }
}

/// Decoder/backend selection.
#[derive(Debug, Clone, Deserialize)]
pub struct DecoderConfig {
    /// Which decoder backend specializes fallback cache entries.
    #[serde(default)]
    pub kind: DecoderKind,
    /// CPU model string passed to the IR translator/codegen collaborator.
    #[serde(default = "DecoderConfig::default_cpu")]
    pub cpu: String,
}

impl DecoderConfig {
    fn default_cpu() -> String {
        "generic".to_string()
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            kind: DecoderKind::default(),
            cpu: Self::default_cpu(),
        }
    }
}

/// Debug and tracing flags.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DebugConfig {
    /// Enables the debugger-facing breakpoint/step machinery.
    #[serde(default)]
    pub enable_debug: bool,
    /// Writes a sibling `.log` file of textual IR alongside each cached object.
    #[serde(default)]
    pub enable_ir_log: bool,
}

/// Code arena sizing and placement.
#[derive(Debug, Clone, Deserialize)]
pub struct ArenaConfig {
    /// Total reserved arena size in bytes.
    #[serde(default = "ArenaConfig::default_size")]
    pub size_bytes: usize,
    /// Lowest candidate base address for the reservation probe.
    #[serde(default = "ArenaConfig::default_base_low")]
    pub base_low: u64,
    /// Highest candidate base address for the reservation probe.
    #[serde(default = "ArenaConfig::default_base_high")]
    pub base_high: u64,
    /// Step between successive reservation attempts.
    #[serde(default = "ArenaConfig::default_probe_step")]
    pub probe_step: u64,
}

impl ArenaConfig {
    fn default_size() -> usize {
        defaults::ARENA_SIZE
    }
    fn default_base_low() -> u64 {
        defaults::ARENA_BASE_LOW
    }
    fn default_base_high() -> u64 {
        defaults::ARENA_BASE_HIGH
    }
    fn default_probe_step() -> u64 {
        defaults::ARENA_PROBE_STEP
    }
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            size_bytes: Self::default_size(),
            base_low: Self::default_base_low(),
            base_high: Self::default_base_high(),
            probe_step: Self::default_probe_step(),
        }
    }
}

/// Module partitioning and guest-thread bookkeeping sizes.
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Maximum aggregate guest-instruction bytes per module part.
    #[serde(default = "RuntimeConfig::default_max_part_bytes")]
    pub max_part_bytes: u32,
    /// Minimum guest stack size in bytes.
    #[serde(default = "RuntimeConfig::default_min_stack_bytes")]
    pub min_stack_bytes: u32,
    /// Guard page size below a guest stack, in bytes.
    #[serde(default = "RuntimeConfig::default_stack_guard_bytes")]
    pub stack_guard_bytes: u32,
    /// Command queue ring capacity, in 64-bit slots.
    #[serde(default = "RuntimeConfig::default_command_queue_capacity")]
    pub command_queue_capacity: usize,
}

impl RuntimeConfig {
    fn default_max_part_bytes() -> u32 {
        defaults::MAX_PART_BYTES
    }
    fn default_min_stack_bytes() -> u32 {
        defaults::MIN_STACK_BYTES
    }
    fn default_stack_guard_bytes() -> u32 {
        defaults::STACK_GUARD_BYTES
    }
    fn default_command_queue_capacity() -> usize {
        defaults::COMMAND_QUEUE_CAPACITY
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_part_bytes: Self::default_max_part_bytes(),
            min_stack_bytes: Self::default_min_stack_bytes(),
            stack_guard_bytes: Self::default_stack_guard_bytes(),
            command_queue_capacity: Self::default_command_queue_capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_constants() {
        let config = Config::default();
        assert_eq!(config.arena.size_bytes, 512 * 1024 * 1024);
        assert_eq!(config.runtime.max_part_bytes, 1024 * 1024);
        assert_eq!(config.runtime.min_stack_bytes, 16 * 1024);
        assert_eq!(config.decoder.kind, DecoderKind::Precise);
    }

    #[test]
    fn deserializes_partial_json_with_defaults() {
        let json = r#"{"decoder": {"kind": "fast"}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.decoder.kind, DecoderKind::Fast);
        assert_eq!(config.decoder.cpu, "generic");
        assert_eq!(config.cache_path, "ppu_cache");
    }
}
