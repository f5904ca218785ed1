//! Text-driven lip-sync: one session task per utterance.
//!
//! The session task owns the [`SpeechSession`] and multiplexes the engine's
//! event stream, the fallback ticker and the pause detector with
//! `tokio::select!`, so every cursor write happens on one task in a
//! well-defined order. Starting a new utterance cancels and joins the old
//! task before the new one is spawned.

use super::boundary::BoundaryController;
use super::engine::{EngineEvent, SpeechEngine, UtteranceRequest};
use super::fallback::FallbackDriver;
use super::session::{SessionId, SpeechSession};
use crate::config::{SpeechTimingConfig, VoiceConfig};
use crate::error::{LipSyncError, Result};
use crate::runtime::{CueSource, MouthEmitter, MouthEvent};
use crate::viseme::MouthShape;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Cancellation handle for a running session task.
///
/// Dropping the guard cancels the task; [`shutdown`](Self::shutdown) also
/// waits for it to finish.
#[derive(Debug)]
pub(crate) struct SessionGuard {
    id: SessionId,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SessionGuard {
    pub(crate) fn new(id: SessionId, cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self {
            id,
            cancel,
            task: Some(task),
        }
    }

    pub(crate) fn id(&self) -> SessionId {
        self.id
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Cancel and wait until the task has emitted its last event.
    pub(crate) async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            warn!(session = %self.id, "session task ended abnormally: {e}");
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Drives mouth shapes from a speech engine for one utterance at a time.
pub struct SpeechDriver {
    engine: Option<Arc<dyn SpeechEngine>>,
    timing: SpeechTimingConfig,
    voice: VoiceConfig,
    emitter: MouthEmitter,
    active: Option<SessionGuard>,
}

impl SpeechDriver {
    pub fn new(
        engine: Option<Arc<dyn SpeechEngine>>,
        timing: SpeechTimingConfig,
        voice: VoiceConfig,
        emitter: MouthEmitter,
    ) -> Self {
        Self {
            engine,
            timing,
            voice,
            emitter,
            active: None,
        }
    }

    /// Whether an engine is present and reports itself usable.
    pub fn can_speak(&self) -> bool {
        self.engine.as_ref().is_some_and(|e| e.is_available())
    }

    /// Whether a session task is still running.
    pub fn is_active(&self) -> bool {
        self.active.as_ref().is_some_and(|g| !g.is_finished())
    }

    /// Id of the running session, if any.
    pub fn active_session(&self) -> Option<SessionId> {
        self.active
            .as_ref()
            .filter(|g| !g.is_finished())
            .map(SessionGuard::id)
    }

    /// Speak `text`, replacing any utterance in progress.
    ///
    /// `lang` overrides the configured language tag.
    ///
    /// # Errors
    ///
    /// Returns [`LipSyncError::SpeechUnavailable`] when there is no usable
    /// engine (nothing is cancelled in that case), or the engine's error if
    /// it refuses the utterance.
    pub async fn speak(&mut self, text: &str, lang: Option<&str>) -> Result<SessionId> {
        let engine = self
            .engine
            .as_ref()
            .filter(|e| e.is_available())
            .cloned()
            .ok_or(LipSyncError::SpeechUnavailable)?;

        self.cancel().await;

        let lang = lang.unwrap_or(self.voice.lang.as_str()).to_owned();
        let session = SpeechSession::new(text, lang.clone(), self.voice.rate);
        let id = session.id();

        let (tx, rx) = mpsc::unbounded_channel();
        engine.begin(
            UtteranceRequest {
                text: text.to_owned(),
                lang: lang.clone(),
                rate: self.voice.rate,
            },
            tx,
        )?;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_session(
            session,
            rx,
            self.timing.clone(),
            self.emitter.clone(),
            cancel.clone(),
        ));
        self.active = Some(SessionGuard::new(id, cancel, task));

        info!(session = %id, chars = text.chars().count(), lang = %lang, "speech session started");
        Ok(id)
    }

    /// Stop the current utterance and all of its timers.
    ///
    /// A no-op when nothing is running.
    pub async fn cancel(&mut self) {
        let Some(guard) = self.active.take() else {
            return;
        };
        let id = guard.id();
        let was_running = !guard.is_finished();
        if was_running && let Some(engine) = &self.engine {
            engine.cancel();
        }
        guard.shutdown().await;
        if was_running {
            info!(session = %id, "speech session cancelled");
        }
    }
}

impl Drop for SpeechDriver {
    fn drop(&mut self) {
        if self.is_active()
            && let Some(engine) = &self.engine
        {
            engine.cancel();
        }
    }
}

fn ticker(period: std::time::Duration) -> Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}

fn emit(
    emitter: &MouthEmitter,
    session: &SpeechSession,
    change: Option<MouthShape>,
    source: CueSource,
) {
    if let Some(shape) = change {
        emitter.emit(MouthEvent {
            session: session.id(),
            cue: shape.into(),
            cursor: Some(session.cursor()),
            source,
        });
    }
}

async fn run_session(
    mut session: SpeechSession,
    mut events: mpsc::UnboundedReceiver<EngineEvent>,
    timing: SpeechTimingConfig,
    emitter: MouthEmitter,
    cancel: CancellationToken,
) {
    let boundary = BoundaryController::new(&timing);
    let fallback = FallbackDriver::new(&timing);
    let mut tick = ticker(timing.tick_interval());
    let mut pause = ticker(timing.pause_check_interval());
    let mut started = false;
    let id = session.id();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(session = %id, "session cancelled");
                break;
            }
            event = events.recv() => match event {
                Some(EngineEvent::Start) if !started => {
                    let change = boundary.on_start(&mut session, now());
                    emit(&emitter, &session, change, CueSource::Lifecycle);
                    started = true;
                    tick.reset();
                    pause.reset();
                }
                Some(EngineEvent::Start) => {
                    // Late or repeated start: rewinding would move the cursor back.
                    debug!(
                        session = %id,
                        cursor = session.cursor(),
                        "start ignored, session already running"
                    );
                }
                Some(EngineEvent::Boundary { char_index }) => {
                    // Some engines skip the start notification.
                    if !started {
                        let change = boundary.on_start(&mut session, now());
                        emit(&emitter, &session, change, CueSource::Lifecycle);
                        started = true;
                        tick.reset();
                        pause.reset();
                    }
                    let change = boundary.on_boundary(&mut session, char_index, now());
                    emit(&emitter, &session, change, CueSource::Boundary);
                }
                Some(EngineEvent::End) => {
                    debug!(session = %id, cursor = session.cursor(), "utterance ended");
                    break;
                }
                Some(EngineEvent::Error(reason)) => {
                    let change = boundary.on_error(&mut session, &reason);
                    emit(&emitter, &session, change, CueSource::Lifecycle);
                    break;
                }
                None => {
                    debug!(session = %id, "engine dropped the event stream");
                    break;
                }
            },
            _ = tick.tick(), if started => {
                let change = fallback.tick(&mut session, now());
                emit(&emitter, &session, change, CueSource::Tick);
            }
            _ = pause.tick(), if started => {
                let change = fallback.check_pause(&mut session, now());
                emit(&emitter, &session, change, CueSource::Pause);
            }
        }
    }

    let change = boundary.on_end(&mut session);
    emit(&emitter, &session, change, CueSource::Lifecycle);
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::viseme::MouthCue;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::broadcast;

    /// Engine whose events are pushed by the test.
    #[derive(Default)]
    struct ManualEngine {
        unavailable: AtomicBool,
        tx: Mutex<Option<mpsc::UnboundedSender<EngineEvent>>>,
        requests: Mutex<Vec<UtteranceRequest>>,
        cancels: AtomicUsize,
    }

    impl ManualEngine {
        fn send(&self, event: EngineEvent) -> bool {
            self.tx
                .lock()
                .unwrap()
                .as_ref()
                .is_some_and(|tx| tx.send(event).is_ok())
        }

        fn sender(&self) -> mpsc::UnboundedSender<EngineEvent> {
            self.tx.lock().unwrap().clone().expect("utterance begun")
        }
    }

    impl SpeechEngine for ManualEngine {
        fn is_available(&self) -> bool {
            !self.unavailable.load(Ordering::SeqCst)
        }

        fn begin(
            &self,
            request: UtteranceRequest,
            events: mpsc::UnboundedSender<EngineEvent>,
        ) -> Result<()> {
            self.requests.lock().unwrap().push(request);
            *self.tx.lock().unwrap() = Some(events);
            Ok(())
        }

        fn cancel(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn driver(engine: Option<Arc<ManualEngine>>) -> (SpeechDriver, broadcast::Receiver<MouthEvent>) {
        let emitter = MouthEmitter::new();
        let rx = emitter.subscribe();
        let engine = engine.map(|e| e as Arc<dyn SpeechEngine>);
        let driver = SpeechDriver::new(
            engine,
            SpeechTimingConfig::default(),
            VoiceConfig::default(),
            emitter,
        );
        (driver, rx)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn drain(rx: &mut broadcast::Receiver<MouthEvent>) -> Vec<MouthEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test]
    async fn speak_without_engine_is_refused() {
        let (mut d, mut rx) = driver(None);
        assert!(!d.can_speak());
        let err = d.speak("hello", None).await.unwrap_err();
        assert!(matches!(err, LipSyncError::SpeechUnavailable));
        assert!(!d.is_active());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn unavailable_engine_is_refused() {
        let engine = Arc::new(ManualEngine::default());
        engine.unavailable.store(true, Ordering::SeqCst);
        let (mut d, _rx) = driver(Some(engine.clone()));
        assert!(matches!(
            d.speak("hello", None).await,
            Err(LipSyncError::SpeechUnavailable)
        ));
        assert!(engine.requests.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn request_carries_lang_and_rate() {
        let engine = Arc::new(ManualEngine::default());
        let (mut d, _rx) = driver(Some(engine.clone()));
        d.speak("hola", Some("es-ES")).await.unwrap();
        d.speak("hello", None).await.unwrap();
        let requests = engine.requests.lock().unwrap();
        assert_eq!(requests[0].lang, "es-ES");
        assert_eq!(requests[1].lang, "en-US");
        assert_eq!(requests[1].rate, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn boundary_events_drive_shapes() {
        let engine = Arc::new(ManualEngine::default());
        let (mut d, mut rx) = driver(Some(engine.clone()));
        let id = d.speak("big moon", None).await.unwrap();

        engine.send(EngineEvent::Start);
        engine.send(EngineEvent::Boundary { char_index: 0 });
        settle().await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].session, id);
        assert_eq!(events[0].cue, MouthCue::Viseme(MouthShape::MBP));
        assert_eq!(events[0].source, CueSource::Boundary);
        assert_eq!(events[0].cursor, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_ticks_without_boundaries() {
        let engine = Arc::new(ManualEngine::default());
        let (mut d, mut rx) = driver(Some(engine.clone()));
        d.speak("mama", None).await.unwrap();
        engine.send(EngineEvent::Start);
        settle().await;

        tokio::time::sleep(Duration::from_millis(400)).await;
        let events = drain(&mut rx);
        let ticks: Vec<_> = events
            .iter()
            .filter(|e| e.source == CueSource::Tick)
            .map(|e| e.cue)
            .collect();
        assert_eq!(
            ticks[..2],
            [
                MouthCue::Viseme(MouthShape::MBP),
                MouthCue::Viseme(MouthShape::A)
            ]
        );
        assert!(events.windows(2).all(|w| w[0].cursor <= w[1].cursor));
    }

    #[tokio::test(start_paused = true)]
    async fn end_closes_mouth_and_finishes_session() {
        let engine = Arc::new(ManualEngine::default());
        let (mut d, mut rx) = driver(Some(engine.clone()));
        d.speak("a", None).await.unwrap();
        engine.send(EngineEvent::Start);
        engine.send(EngineEvent::Boundary { char_index: 0 });
        engine.send(EngineEvent::End);
        settle().await;

        let events = drain(&mut rx);
        let last = events.last().unwrap();
        assert_eq!(last.cue, MouthCue::Viseme(MouthShape::Neutral));
        assert_eq!(last.source, CueSource::Lifecycle);
        assert!(!d.is_active());
        assert_eq!(d.active_session(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn engine_error_is_treated_as_end() {
        let engine = Arc::new(ManualEngine::default());
        let (mut d, mut rx) = driver(Some(engine.clone()));
        d.speak("oh", None).await.unwrap();
        engine.send(EngineEvent::Start);
        engine.send(EngineEvent::Boundary { char_index: 0 });
        engine.send(EngineEvent::Error("synthesis-failed".into()));
        settle().await;

        let events = drain(&mut rx);
        assert_eq!(
            events.last().map(|e| e.cue),
            Some(MouthCue::Viseme(MouthShape::Neutral))
        );
        assert!(!d.is_active());

        // A fresh session can start afterwards.
        assert!(d.speak("again", None).await.is_ok());
        assert!(d.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn second_speak_silences_the_first() {
        let engine = Arc::new(ManualEngine::default());
        let (mut d, mut rx) = driver(Some(engine.clone()));

        let a = d.speak("aaaa aaaa aaaa", None).await.unwrap();
        let a_tx = engine.sender();
        a_tx.send(EngineEvent::Start).unwrap();
        a_tx.send(EngineEvent::Boundary { char_index: 0 }).unwrap();
        settle().await;
        assert!(drain(&mut rx).iter().all(|e| e.session == a));

        let b = d.speak("mmmm", None).await.unwrap();
        assert_eq!(d.active_session(), Some(b));
        assert_eq!(engine.cancels.load(Ordering::SeqCst), 1);

        // A's stream is gone; late events from its engine go nowhere.
        assert!(a_tx.send(EngineEvent::Boundary { char_index: 5 }).is_err());
        // Whatever A emitted while shutting down came before B started.
        drain(&mut rx);

        engine.send(EngineEvent::Start);
        tokio::time::sleep(Duration::from_millis(500)).await;
        let events = drain(&mut rx);
        assert!(!events.is_empty());
        assert!(events.iter().all(|e| e.session == b));
    }

    #[tokio::test(start_paused = true)]
    async fn late_start_does_not_rewind_cursor() {
        let engine = Arc::new(ManualEngine::default());
        let (mut d, mut rx) = driver(Some(engine.clone()));
        d.speak("hello moon", None).await.unwrap();

        engine.send(EngineEvent::Boundary { char_index: 6 });
        settle().await;
        engine.send(EngineEvent::Start);
        engine.send(EngineEvent::Start);
        tokio::time::sleep(Duration::from_millis(300)).await;

        let events = drain(&mut rx);
        assert_eq!(events[0].cue, MouthCue::Viseme(MouthShape::MBP));
        assert_eq!(events[0].cursor, Some(6));
        let cursors: Vec<usize> = events.iter().filter_map(|e| e.cursor).collect();
        assert!(
            cursors.windows(2).all(|w| w[0] <= w[1]),
            "cursor went backwards: {cursors:?}"
        );
        assert!(cursors.iter().all(|&c| c >= 6));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent() {
        let engine = Arc::new(ManualEngine::default());
        let (mut d, mut rx) = driver(Some(engine.clone()));

        d.cancel().await;
        assert_eq!(engine.cancels.load(Ordering::SeqCst), 0);

        d.speak("ba", None).await.unwrap();
        engine.send(EngineEvent::Start);
        engine.send(EngineEvent::Boundary { char_index: 0 });
        settle().await;
        drain(&mut rx);

        d.cancel().await;
        let closing = drain(&mut rx);
        assert_eq!(closing.len(), 1);
        assert_eq!(closing[0].cue, MouthCue::Viseme(MouthShape::Neutral));
        assert_eq!(engine.cancels.load(Ordering::SeqCst), 1);

        d.cancel().await;
        settle().await;
        assert!(drain(&mut rx).is_empty());
        assert_eq!(engine.cancels.load(Ordering::SeqCst), 1);
        assert!(!d.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn silence_after_last_grapheme_closes_mouth() {
        let engine = Arc::new(ManualEngine::default());
        let (mut d, mut rx) = driver(Some(engine.clone()));
        d.speak("ma", None).await.unwrap();
        engine.send(EngineEvent::Start);

        // Text runs out after two ticks; the engine has not said End yet.
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        let events = drain(&mut rx);
        let last = events.last().unwrap();
        assert_eq!(last.source, CueSource::Pause);
        assert_eq!(last.cue, MouthCue::Viseme(MouthShape::Neutral));
        assert!(d.is_active());
    }
}
