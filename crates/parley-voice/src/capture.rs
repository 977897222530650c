//! Microphone capture and speech recognition for one listening turn.
//!
//! A listening session bundles the microphone stream, the recognition
//! session and the voice activity detector into a single [`CaptureResources`]
//! value owned by the session's driver task. Every way the task can end
//! (manual stop, silence timeout, recognition error, stream end, controller
//! drop) drops that value, which releases the device and clears the
//! listening flags.

use crate::config::{ListenOptions, VadConfig};
use crate::error::VoiceError;
use crate::level::{level, AudioFrame};
use crate::output::SpeechOutputController;
use crate::session::VoiceSessionState;
use crate::vad::{VadEvent, VoiceActivityDetector};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Default capacity for the capture event broadcast channel.
const DEFAULT_CAPTURE_EVENT_CAPACITY: usize = 64;

type Release = Box<dyn FnOnce() + Send>;

/// A live microphone stream. Dropping it releases the device.
pub struct AudioStream {
    frames: mpsc::Receiver<AudioFrame>,
    release: Option<Release>,
}

impl AudioStream {
    pub fn new(frames: mpsc::Receiver<AudioFrame>) -> Self {
        Self {
            frames,
            release: None,
        }
    }

    /// Registers the action that frees the underlying device.
    pub fn on_release(mut self, release: impl FnOnce() + Send + 'static) -> Self {
        self.release = Some(Box::new(release));
        self
    }

    pub async fn next_frame(&mut self) -> Option<AudioFrame> {
        self.frames.recv().await
    }
}

impl Drop for AudioStream {
    fn drop(&mut self) {
        self.frames.close();
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Capability: an audio input device.
pub trait Microphone: Send + Sync {
    /// Acquires the device. Access-denied faults are reported as
    /// [`VoiceError::Permission`].
    fn open(&self) -> Result<AudioStream, VoiceError>;
}

/// Output of a recognition engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// A revisable transcript for the utterance in progress.
    Partial(String),
    /// The finalized transcript of one utterance.
    Final(String),
    Error(String),
    /// The engine finished on its own.
    Ended,
}

/// One running recognition session. Dropping it aborts recognition.
pub struct RecognitionSession {
    events: mpsc::Receiver<RecognitionEvent>,
    audio: Option<mpsc::Sender<AudioFrame>>,
    release: Option<Release>,
}

impl RecognitionSession {
    pub fn new(events: mpsc::Receiver<RecognitionEvent>) -> Self {
        Self {
            events,
            audio: None,
            release: None,
        }
    }

    /// For engines that transcribe the captured frames themselves.
    pub fn with_audio_sink(mut self, audio: mpsc::Sender<AudioFrame>) -> Self {
        self.audio = Some(audio);
        self
    }

    pub fn on_release(mut self, release: impl FnOnce() + Send + 'static) -> Self {
        self.release = Some(Box::new(release));
        self
    }

    fn feed(&self, frame: &AudioFrame) {
        if let Some(audio) = &self.audio {
            if let Err(e) = audio.try_send(frame.clone()) {
                tracing::trace!("recognizer dropped an audio frame: {}", e);
            }
        }
    }

    async fn next_event(&mut self) -> Option<RecognitionEvent> {
        self.events.recv().await
    }
}

impl Drop for RecognitionSession {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Capability: a speech-to-text engine.
pub trait Recognizer: Send + Sync {
    fn start(&self, options: &ListenOptions) -> Result<RecognitionSession, VoiceError>;
}

/// Why a listening session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// `stop_listening` was called.
    Manual,
    /// The silence timeout elapsed.
    Silence,
    /// The recognizer finished (or finalized an utterance in one-shot mode).
    Completed,
    /// The microphone stream closed.
    StreamEnded,
    RecognitionError(String),
}

/// Side-channel notifications about the capture lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    ListeningStarted,
    VoiceDetected,
    ListeningStopped { reason: StopReason },
    RecognitionFailed { message: String },
}

/// Everything acquired for one listening session.
struct CaptureResources {
    stream: AudioStream,
    recognition: RecognitionSession,
    vad: VoiceActivityDetector,
    state: VoiceSessionState,
}

impl CaptureResources {
    fn acquire(
        stream: AudioStream,
        recognition: RecognitionSession,
        vad: VadConfig,
        state: VoiceSessionState,
    ) -> Self {
        state.update(|s| {
            s.is_listening = true;
            s.is_voice_detected = false;
            s.silence_deadline = None;
        });
        Self {
            stream,
            recognition,
            vad: VoiceActivityDetector::new(vad),
            state,
        }
    }

    fn publish_vad(&self) {
        let voice = self.vad.is_voice();
        let deadline = self.vad.deadline();
        self.state.update(|s| {
            s.is_voice_detected = voice;
            s.silence_deadline = deadline;
        });
    }
}

impl Drop for CaptureResources {
    fn drop(&mut self) {
        self.vad.reset();
        self.state.update(|s| {
            s.is_listening = false;
            s.is_voice_detected = false;
            s.silence_deadline = None;
        });
    }
}

struct ActiveCapture {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct SpeechCaptureController {
    microphone: Option<Arc<dyn Microphone>>,
    recognizer: Option<Arc<dyn Recognizer>>,
    output: Option<Arc<SpeechOutputController>>,
    vad: VadConfig,
    state: VoiceSessionState,
    events: broadcast::Sender<CaptureEvent>,
    active: Mutex<Option<ActiveCapture>>,
}

impl std::fmt::Debug for SpeechCaptureController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechCaptureController")
            .field("microphone", &self.microphone.is_some())
            .field("recognizer", &self.recognizer.is_some())
            .field("vad", &self.vad)
            .finish()
    }
}

impl SpeechCaptureController {
    pub fn new(state: VoiceSessionState, vad: VadConfig) -> Self {
        let (events, _) = broadcast::channel(DEFAULT_CAPTURE_EVENT_CAPACITY);
        Self {
            microphone: None,
            recognizer: None,
            output: None,
            vad,
            state,
            events,
            active: Mutex::new(None),
        }
    }

    pub fn with_microphone(mut self, microphone: Arc<dyn Microphone>) -> Self {
        self.microphone = Some(microphone);
        self
    }

    pub fn with_recognizer(mut self, recognizer: Arc<dyn Recognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    /// Output to interrupt when the user starts talking over it.
    pub fn with_output(mut self, output: Arc<SpeechOutputController>) -> Self {
        self.output = Some(output);
        self
    }

    /// Subscribes to lifecycle notifications, including recognition failures.
    pub fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
        self.events.subscribe()
    }

    pub fn is_listening(&self) -> bool {
        self.state.snapshot().is_listening
    }

    /// Starts a listening session.
    ///
    /// `on_result(transcript, is_final)` receives every partial transcript
    /// when `interim_results` is set, and every finalized utterance once.
    /// Missing capabilities and device faults are returned immediately;
    /// faults after the session started are reported through
    /// [`subscribe`](Self::subscribe).
    pub fn start_listening<F>(&self, on_result: F, options: ListenOptions) -> Result<(), VoiceError>
    where
        F: FnMut(&str, bool) + Send + 'static,
    {
        let recognizer = self
            .recognizer
            .clone()
            .ok_or(VoiceError::Unsupported("speech recognition"))?;
        let microphone = self
            .microphone
            .clone()
            .ok_or(VoiceError::Unsupported("audio capture"))?;

        let mut active = self.lock();
        if active.as_ref().is_some_and(|a| !a.task.is_finished()) {
            return Err(VoiceError::AlreadyListening);
        }

        let stream = microphone.open()?;
        let recognition = recognizer.start(&options)?;
        let resources = CaptureResources::acquire(stream, recognition, self.vad, self.state.clone());

        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(run_capture(
            resources,
            stopped,
            on_result,
            options,
            self.output.clone(),
            self.events.clone(),
        ));
        *active = Some(ActiveCapture { stop, task });

        tracing::info!("listening started");
        let _ = self.events.send(CaptureEvent::ListeningStarted);
        Ok(())
    }

    /// Stops the current session and waits until its resources are released.
    /// Returns whether a session was running.
    pub async fn stop_listening(&self) -> bool {
        let active = self.lock().take();
        let Some(active) = active else {
            return false;
        };
        if active.task.is_finished() {
            return false;
        }
        let _ = active.stop.send(());
        if let Err(e) = active.task.await {
            tracing::error!("capture task failed: {}", e);
        }
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<ActiveCapture>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SpeechCaptureController {
    fn drop(&mut self) {
        if let Some(active) = self.lock().take() {
            active.task.abort();
        }
    }
}

/// Stops assistant speech when the user talks over it.
fn barge_in(output: &Option<Arc<SpeechOutputController>>) {
    if let Some(output) = output {
        if output.is_speaking() {
            tracing::info!("voice detected while speaking, interrupting output");
            output.stop();
        }
    }
}

async fn silence_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn run_capture<F>(
    mut res: CaptureResources,
    mut stopped: oneshot::Receiver<()>,
    mut on_result: F,
    options: ListenOptions,
    output: Option<Arc<SpeechOutputController>>,
    events: broadcast::Sender<CaptureEvent>,
) where
    F: FnMut(&str, bool) + Send + 'static,
{
    let reason = loop {
        let deadline = res.vad.deadline();
        tokio::select! {
            biased;
            _ = &mut stopped => break StopReason::Manual,
            frame = res.stream.next_frame() => {
                let Some(frame) = frame else {
                    break StopReason::StreamEnded;
                };
                res.recognition.feed(&frame);
                let event = res.vad.observe(level(&frame), Instant::now());
                res.publish_vad();
                match event {
                    Some(VadEvent::VoiceDetected) => {
                        barge_in(&output);
                        let _ = events.send(CaptureEvent::VoiceDetected);
                    }
                    Some(VadEvent::SilenceTimeout) => break StopReason::Silence,
                    None => {}
                }
            }
            _ = silence_elapsed(deadline) => {
                if let Some(VadEvent::SilenceTimeout) = res.vad.poll(Instant::now()) {
                    break StopReason::Silence;
                }
            }
            event = res.recognition.next_event() => match event {
                Some(RecognitionEvent::Partial(transcript)) => {
                    if options.interim_results {
                        barge_in(&output);
                        on_result(&transcript, false);
                    }
                }
                Some(RecognitionEvent::Final(transcript)) => {
                    barge_in(&output);
                    on_result(&transcript, true);
                    if !options.continuous {
                        break StopReason::Completed;
                    }
                }
                Some(RecognitionEvent::Error(message)) => break StopReason::RecognitionError(message),
                Some(RecognitionEvent::Ended) | None => break StopReason::Completed,
            },
        }
    };

    drop(res);

    match &reason {
        StopReason::RecognitionError(message) => {
            tracing::warn!(error = %message, "recognition failed, listening stopped");
            let _ = events.send(CaptureEvent::RecognitionFailed {
                message: message.clone(),
            });
        }
        other => tracing::info!(reason = ?other, "listening stopped"),
    }
    let _ = events.send(CaptureEvent::ListeningStopped { reason });
}
