//! Frame loop that follows an audio source until it disconnects.

use super::source::{AudioSource, SourceStatus};
use super::{EnvelopeEstimator, Quantizer, rms};
use crate::config::EnvelopeConfig;
use crate::error::{LipSyncError, Result};
use crate::runtime::{CueSource, MouthEmitter, MouthEvent};
use crate::speech::SessionId;
use crate::speech::driver::SessionGuard;
use crate::viseme::MouthCue;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A running envelope session.
///
/// There is no timeout: the loop ends when the source disconnects or the
/// driver is stopped/dropped.
pub struct EnvelopeDriver {
    guard: SessionGuard,
}

impl EnvelopeDriver {
    /// Start following `source`.
    ///
    /// # Errors
    ///
    /// Returns [`LipSyncError::AudioSourceMissing`] without `source`, and
    /// [`LipSyncError::Audio`] outside a tokio runtime.
    pub fn start(
        source: Option<Box<dyn AudioSource>>,
        config: &EnvelopeConfig,
        quantizer: Arc<dyn Quantizer>,
        emitter: MouthEmitter,
    ) -> Result<Self> {
        let source = source.ok_or(LipSyncError::AudioSourceMissing)?;
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| LipSyncError::Audio(format!("no async runtime: {e}")))?;

        let id = SessionId::next();
        let kind = source.kind();
        let cancel = CancellationToken::new();
        let estimator = EnvelopeEstimator::new(config, quantizer);
        let task = handle.spawn(run_envelope(
            id,
            source,
            estimator,
            config.clone(),
            emitter,
            cancel.clone(),
        ));

        info!(session = %id, ?kind, fps = config.fps, "envelope session started");
        Ok(Self {
            guard: SessionGuard::new(id, cancel, task),
        })
    }

    pub fn session(&self) -> SessionId {
        self.guard.id()
    }

    /// False once the source has disconnected.
    pub fn is_running(&self) -> bool {
        !self.guard.is_finished()
    }

    /// Stop following and wait for the closing cue.
    pub async fn stop(self) {
        let id = self.guard.id();
        self.guard.shutdown().await;
        debug!(session = %id, "envelope session stopped");
    }
}

async fn run_envelope(
    id: SessionId,
    mut source: Box<dyn AudioSource>,
    mut estimator: EnvelopeEstimator,
    config: EnvelopeConfig,
    emitter: MouthEmitter,
    cancel: CancellationToken,
) {
    let mut frame = tokio::time::interval(config.frame_interval());
    frame.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut window = vec![0.0_f32; config.window_size.max(1)];
    let mut shown: Option<MouthCue> = None;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = frame.tick() => {
                if source.read_time_domain(&mut window) == SourceStatus::Disconnected {
                    info!(session = %id, "audio source disconnected");
                    break;
                }
                let now = tokio::time::Instant::now().into_std();
                if let Some(cue) = estimator.update(rms(&window), now) {
                    emitter.emit(MouthEvent {
                        session: id,
                        cue,
                        cursor: None,
                        source: CueSource::Envelope,
                    });
                    shown = Some(cue);
                }
            }
        }
    }

    let rest = estimator.rest_cue();
    if shown.is_some_and(|cue| cue != rest) {
        emitter.emit(MouthEvent {
            session: id,
            cue: rest,
            cursor: None,
            source: CueSource::Lifecycle,
        });
    }
}
