use std::io::IsTerminal;

use anyhow::{Context, Result};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tracing::warn;

/// Puts the local terminal in raw mode for as long as it lives.
///
/// Keystrokes, Ctrl+C included, reach the remote shell unprocessed. When
/// stdin is not a terminal nothing is changed.
pub struct RawModeGuard {
    active: bool,
}

impl RawModeGuard {
    pub fn enter() -> Result<Self> {
        if !std::io::stdin().is_terminal() {
            return Ok(Self { active: false });
        }
        enable_raw_mode().context("Failed to switch terminal to raw mode")?;
        Ok(Self { active: true })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.active {
            if let Err(e) = disable_raw_mode() {
                warn!(error = %e, "Failed to restore terminal mode");
            }
        }
    }
}
