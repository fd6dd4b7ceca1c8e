//! presto-common
//!
//! Plumbing shared by every presto-tools binary:
//! 1. **Config:** layered TOML (`presto_config.defaults.toml` + `presto_config.local.toml`).
//! 2. **Logging:** a `tracing` layer that speaks journald's native protocol,
//!    so entries show up under `journalctl -t <tool>`.
//! 3. **Commands:** PATH checks, captured output, timeouts.
//! 4. **Probes:** block devices (`lsblk`/`df`), temperatures, IPs.
//! 5. **Style:** the ANSI palette, usage bars and byte formatting.

pub mod block;
pub mod cmd;
pub mod config;
pub mod error;
pub mod journal;
pub mod style;
pub mod sys;

pub use config::PrestoConfig;
pub use error::{PrestoError, PrestoResult};
