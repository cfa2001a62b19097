//! Configuration for the SableDB engine.

use std::sync::atomic::{AtomicBool, Ordering};

/// Engine configuration, fixed at open time.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of frames in the buffer pool.
    pub buffer_pool_frames: usize,
}

impl EngineConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.buffer_pool_frames == 0 {
            return Err("buffer_pool_frames must be positive".into());
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_pool_frames: 1024,
        }
    }
}

/// Planner and session knobs, togglable at runtime via `SET`.
///
/// Reads are atomic; the planner snapshots them at construction.
#[derive(Debug)]
pub struct PlannerKnobs {
    /// Allow nested-loop joins. Wins over sort-merge when both are on.
    pub enable_nestedloop_join: AtomicBool,
    /// Allow sort-merge joins.
    pub enable_sortmerge_join: AtomicBool,
    /// Mirror query output to `output.txt`.
    pub enable_output_file: AtomicBool,
}

impl PlannerKnobs {
    /// Returns whether nested-loop joins are enabled.
    #[inline]
    pub fn nestedloop(&self) -> bool {
        self.enable_nestedloop_join.load(Ordering::Relaxed)
    }

    /// Returns whether sort-merge joins are enabled.
    #[inline]
    pub fn sortmerge(&self) -> bool {
        self.enable_sortmerge_join.load(Ordering::Relaxed)
    }

    /// Returns whether output mirroring is enabled.
    #[inline]
    pub fn output_file(&self) -> bool {
        self.enable_output_file.load(Ordering::Relaxed)
    }
}

impl Default for PlannerKnobs {
    fn default() -> Self {
        Self {
            enable_nestedloop_join: AtomicBool::new(true),
            enable_sortmerge_join: AtomicBool::new(false),
            enable_output_file: AtomicBool::new(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_knobs() {
        let knobs = PlannerKnobs::default();
        assert!(knobs.nestedloop());
        assert!(!knobs.sortmerge());
        assert!(!knobs.output_file());
    }

    #[test]
    fn test_config_validation() {
        assert!(EngineConfig::default().validate().is_ok());
        let bad = EngineConfig {
            buffer_pool_frames: 0,
        };
        assert!(bad.validate().is_err());
    }
}
