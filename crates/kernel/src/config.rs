//! Kernel configuration.

use crate::env::NENV;

/// Sizing of the simulated machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    frames: usize,
    max_envs: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            frames: 1024,
            max_envs: 64,
        }
    }
}

impl Config {
    /// Sets the number of physical frames, including the reserved frame 0.
    pub fn with_frames(mut self, frames: usize) -> Self {
        self.frames = frames;
        self
    }

    /// Sets the number of environment slots, clamped to the id space.
    pub fn with_max_envs(mut self, max_envs: usize) -> Self {
        self.max_envs = max_envs.min(NENV);
        self
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn max_envs(&self) -> usize {
        self.max_envs
    }
}
