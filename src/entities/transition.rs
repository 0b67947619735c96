//! Transition coordination: which transition is active, its progress, and the blend.
//!
//! The pixel work is delegated to a [`TransitionEngine`]. A failed or invalid
//! blend degrades to a hard cut so playback never stalls on a transition.

use std::sync::Arc;

use log::{trace, warn};
use uuid::Uuid;

use super::frame::RenderedFrame;
use super::timeline::{Clip, Track, Transition};
use super::traits::TransitionEngine;

/// Transition resolved against its clips for one render call. Never cached.
#[derive(Debug, Clone, Copy)]
pub struct ActiveTransition<'a> {
    pub transition: &'a Transition,
    pub clip_a: &'a Clip,
    pub clip_b: &'a Clip,
    /// Clamped to [0, 1]
    pub progress: f32,
}

impl ActiveTransition<'_> {
    pub fn info(&self) -> TransitionRenderInfo {
        TransitionRenderInfo {
            clip_a: self.clip_a.id,
            clip_b: self.clip_b.id,
            transition_id: self.transition.id,
            progress: self.progress,
        }
    }
}

/// Owned summary of an active transition (for logging and hosts).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionRenderInfo {
    pub clip_a: Uuid,
    pub clip_b: Uuid,
    pub transition_id: Uuid,
    pub progress: f32,
}

#[derive(Clone)]
pub struct TransitionCoordinator {
    engine: Arc<dyn TransitionEngine>,
}

impl TransitionCoordinator {
    pub fn new(engine: Arc<dyn TransitionEngine>) -> Self {
        Self { engine }
    }

    /// First transition of `track` whose window contains `time`.
    ///
    /// Transitions referencing clips missing from the track are skipped.
    pub fn find_active_transition<'a>(&self, track: &'a Track, time: f64) -> Option<ActiveTransition<'a>> {
        for transition in &track.transitions {
            let (Some(clip_a), Some(clip_b)) = (track.clip(transition.clip_a), track.clip(transition.clip_b)) else {
                warn!(
                    "Transition {} references unknown clips ({} -> {}), skipped",
                    transition.id, transition.clip_a, transition.clip_b
                );
                continue;
            };
            if self.engine.is_time_in_transition(transition, clip_a, time) {
                let progress = self.progress_at(transition, clip_a, time);
                trace!("Transition {} active at {:.4}s, progress {:.3}", transition.id, time, progress);
                return Some(ActiveTransition {
                    transition,
                    clip_a,
                    clip_b,
                    progress,
                });
            }
        }
        None
    }

    /// Engine progress clamped to [0, 1]. NaN maps to 0.
    pub fn progress_at(&self, transition: &Transition, clip_a: &Clip, time: f64) -> f32 {
        let raw = self.engine.calculate_progress(transition, clip_a, time);
        if raw.is_nan() { 0.0 } else { raw.clamp(0.0, 1.0) }
    }

    /// Blend `outgoing` into `incoming`. Falls back to a hard cut on failure.
    pub fn blend(
        &self,
        outgoing: &RenderedFrame,
        incoming: &RenderedFrame,
        transition: &Transition,
        progress: f32,
    ) -> RenderedFrame {
        match self.engine.render_transition(outgoing, incoming, transition, progress) {
            Ok(out) => {
                trace!(
                    "Transition '{}' blended in {:.2}ms",
                    transition.kind,
                    out.processing_time.as_secs_f64() * 1000.0
                );
                out.frame
            }
            Err(e) => {
                warn!("Transition '{}' failed, hard cut: {:#}", transition.kind, e);
                Self::hard_cut(outgoing, incoming, progress)
            }
        }
    }

    fn hard_cut(outgoing: &RenderedFrame, incoming: &RenderedFrame, progress: f32) -> RenderedFrame {
        if progress < 0.5 { outgoing.clone() } else { incoming.clone() }
    }
}
