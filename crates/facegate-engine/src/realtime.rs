//! Polling detection loop.
//!
//! One tick at a time: fetch a frame, analyze it on the engine thread, emit an
//! update, then sleep for the interval. The next tick is only scheduled after
//! the previous one completed. Stopping is cooperative: the stop flag is read
//! at the top of each tick and again right before the callback, and the
//! interval sleep is woken immediately.

use crate::config::Config;
use crate::engine::{EngineError, EngineHandle};
use crate::source::FrameSource;
use facegate_core::{Detection, QualityScore};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct RealTimeConfig {
    pub interval: Duration,
    /// `has_acceptable_quality` requires `overall >= min_quality`.
    pub min_quality: f32,
}

impl Default for RealTimeConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(150),
            min_quality: 0.7,
        }
    }
}

impl From<&Config> for RealTimeConfig {
    fn from(config: &Config) -> Self {
        Self {
            interval: config.interval(),
            min_quality: config.min_quality,
        }
    }
}

/// Result of one tick. `detection` and `quality` are `None` when no face was found.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionUpdate {
    /// Tick counter, starting at 0.
    pub tick: u64,
    pub frame_sequence: u32,
    pub detection: Option<Detection>,
    pub quality: Option<QualityScore>,
    pub has_acceptable_quality: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoopState {
    Idle = 0,
    Active = 1,
    Stopped = 2,
}

impl LoopState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Active,
            _ => Self::Stopped,
        }
    }
}

struct Control {
    stop: AtomicBool,
    state: AtomicU8,
    wake: Notify,
}

impl Control {
    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: LoopState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

/// Cancellation handle for a running loop. Dropping it stops the loop.
pub struct DetectionHandle {
    control: Arc<Control>,
    task: Option<JoinHandle<()>>,
}

impl DetectionHandle {
    /// Request the loop to stop. At most one callback already in flight may still complete.
    pub fn stop(&self) {
        if !self.control.stop.swap(true, Ordering::SeqCst) {
            tracing::debug!("real-time detection stop requested");
        }
        self.control.wake.notify_one();
    }

    pub fn state(&self) -> LoopState {
        LoopState::from_u8(self.control.state.load(Ordering::SeqCst))
    }

    /// Stop and wait for the loop task to finish.
    pub async fn join(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "real-time detection task failed");
            }
        }
    }
}

impl Drop for DetectionHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start polling `source` and reporting each tick to `callback`.
///
/// Must be called from within a tokio runtime.
pub fn start_real_time_detection<S, F>(
    engine: EngineHandle,
    mut source: S,
    mut callback: F,
    config: RealTimeConfig,
) -> DetectionHandle
where
    S: FrameSource + 'static,
    F: FnMut(DetectionUpdate) + Send + 'static,
{
    let control = Arc::new(Control {
        stop: AtomicBool::new(false),
        state: AtomicU8::new(LoopState::Idle as u8),
        wake: Notify::new(),
    });

    let ctl = Arc::clone(&control);
    let task = tokio::spawn(async move {
        if engine.reset_history().await.is_err() {
            tracing::warn!("engine unavailable; real-time detection not started");
            ctl.set_state(LoopState::Stopped);
            return;
        }
        ctl.set_state(LoopState::Active);
        tracing::info!(interval_ms = config.interval.as_millis() as u64, min_quality = config.min_quality, "real-time detection started");

        let mut tick = 0u64;
        while !ctl.stopped() {
            match source.next_frame() {
                Some(frame) if !frame.is_empty() => {
                    let frame_sequence = frame.sequence;
                    match engine.analyze_tick(frame).await {
                        Ok(analysis) => {
                            if ctl.stopped() {
                                break;
                            }
                            let (detection, quality) = match analysis {
                                Some(a) => (Some(a.detection), Some(a.quality)),
                                None => (None, None),
                            };
                            let has_acceptable_quality = quality
                                .as_ref()
                                .is_some_and(|q| q.overall >= config.min_quality);
                            callback(DetectionUpdate {
                                tick,
                                frame_sequence,
                                detection,
                                quality,
                                has_acceptable_quality,
                            });
                            tick += 1;
                        }
                        Err(EngineError::ChannelClosed) => {
                            tracing::warn!("engine thread exited; stopping real-time detection");
                            break;
                        }
                        Err(e) => tracing::warn!(error = %e, "tick failed"),
                    }
                }
                _ => tracing::debug!("frame not ready; skipping tick"),
            }

            tokio::select! {
                _ = tokio::time::sleep(config.interval) => {}
                _ = ctl.wake.notified() => {}
            }
        }

        // Landmarks from this session must not judge later captures.
        if engine.reset_history().await.is_err() {
            tracing::debug!("engine gone before landmark history was cleared");
        }
        ctl.set_state(LoopState::Stopped);
        tracing::info!(ticks = tick, "real-time detection stopped");
    });

    DetectionHandle {
        control,
        task: Some(task),
    }
}
