#![allow(dead_code)]

use async_trait::async_trait;
use parley_voice::{
    AudioFrame, AudioPlayer, AudioStream, ListenOptions, Microphone, RecognitionEvent,
    RecognitionSession, Recognizer, RemoteSynthesizer, SpeakOptions, SpeechEngine,
    SynthesisRequest, SynthesisResult, VoiceError, VoiceSessionState,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Lets spawned tasks run without moving a paused clock.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

pub fn silent() -> AudioFrame {
    AudioFrame::new(vec![0.0; 160])
}

pub fn voiced() -> AudioFrame {
    AudioFrame::new(vec![0.5; 160])
}

// ── Capture doubles ──

#[derive(Default)]
pub struct FakeMicrophone {
    feed: Mutex<Option<mpsc::Sender<AudioFrame>>>,
    opened: AtomicUsize,
    released: Arc<AtomicUsize>,
    deny: bool,
}

impl FakeMicrophone {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn denied() -> Arc<Self> {
        Arc::new(Self {
            deny: true,
            ..Self::default()
        })
    }

    pub async fn send(&self, frame: AudioFrame) {
        let tx = self.feed.lock().unwrap().clone().expect("microphone is open");
        tx.send(frame).await.expect("capture loop is reading");
        settle().await;
    }

    /// Ends the stream as if the device went away.
    pub fn close(&self) {
        self.feed.lock().unwrap().take();
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl Microphone for FakeMicrophone {
    fn open(&self) -> Result<AudioStream, VoiceError> {
        if self.deny {
            return Err(VoiceError::Permission("microphone access denied".to_string()));
        }
        let (tx, rx) = mpsc::channel(64);
        *self.feed.lock().unwrap() = Some(tx);
        self.opened.fetch_add(1, Ordering::SeqCst);
        let released = self.released.clone();
        Ok(AudioStream::new(rx).on_release(move || {
            released.fetch_add(1, Ordering::SeqCst);
        }))
    }
}

#[derive(Default)]
pub struct FakeRecognizer {
    feed: Mutex<Option<mpsc::Sender<RecognitionEvent>>>,
    options: Mutex<Vec<ListenOptions>>,
    started: AtomicUsize,
    released: Arc<AtomicUsize>,
    fail: bool,
}

impl FakeRecognizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub async fn emit(&self, event: RecognitionEvent) {
        let tx = self.feed.lock().unwrap().clone().expect("recognition started");
        tx.send(event).await.expect("capture loop is reading");
        settle().await;
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn last_options(&self) -> Option<ListenOptions> {
        self.options.lock().unwrap().last().cloned()
    }
}

impl Recognizer for FakeRecognizer {
    fn start(&self, options: &ListenOptions) -> Result<RecognitionSession, VoiceError> {
        if self.fail {
            return Err(VoiceError::Recognition("engine unavailable".to_string()));
        }
        let (tx, rx) = mpsc::channel(64);
        *self.feed.lock().unwrap() = Some(tx);
        self.options.lock().unwrap().push(options.clone());
        self.started.fetch_add(1, Ordering::SeqCst);
        let released = self.released.clone();
        Ok(RecognitionSession::new(rx).on_release(move || {
            released.fetch_add(1, Ordering::SeqCst);
        }))
    }
}

// ── Output doubles ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Complete,
    Hang,
    Fail,
}

/// Records what it was asked to say and whether the session reported
/// `is_speaking` at that moment.
pub struct FakeEngine {
    behavior: Behavior,
    state: VoiceSessionState,
    pub spoken: Mutex<Vec<String>>,
    pub speaking_seen: Mutex<Vec<bool>>,
    pub cancels: AtomicUsize,
}

impl FakeEngine {
    pub fn new(behavior: Behavior, state: &VoiceSessionState) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            state: state.clone(),
            spoken: Mutex::new(Vec::new()),
            speaking_seen: Mutex::new(Vec::new()),
            cancels: AtomicUsize::new(0),
        })
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn speaking_seen(&self) -> Vec<bool> {
        self.speaking_seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechEngine for FakeEngine {
    async fn speak(&self, text: &str, _options: &SpeakOptions) -> Result<(), VoiceError> {
        self.spoken.lock().unwrap().push(text.to_string());
        self.speaking_seen
            .lock()
            .unwrap()
            .push(self.state.snapshot().is_speaking);
        match self.behavior {
            Behavior::Complete => Ok(()),
            Behavior::Hang => std::future::pending().await,
            Behavior::Fail => Err(VoiceError::Tts("engine failed".to_string())),
        }
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FakePlayer {
    behavior: Behavior,
    pub played: Mutex<Vec<String>>,
}

impl FakePlayer {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            played: Mutex::new(Vec::new()),
        })
    }

    pub fn played(&self) -> Vec<String> {
        self.played.lock().unwrap().clone()
    }
}

#[async_trait]
impl AudioPlayer for FakePlayer {
    async fn play(&self, audio_ref: &str) -> Result<(), VoiceError> {
        self.played.lock().unwrap().push(audio_ref.to_string());
        match self.behavior {
            Behavior::Complete => Ok(()),
            Behavior::Hang => std::future::pending().await,
            Behavior::Fail => Err(VoiceError::Playback("player failed".to_string())),
        }
    }
}

pub struct FakeRemote {
    response: Result<SynthesisResult, u16>,
    pub requests: Mutex<Vec<SynthesisRequest>>,
}

impl FakeRemote {
    pub fn returning(audio_url: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            response: Ok(SynthesisResult {
                audio_url: audio_url.map(str::to_string),
                duration_secs: 1.5,
            }),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(status: u16) -> Arc<Self> {
        Arc::new(Self {
            response: Err(status),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<SynthesisRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteSynthesizer for FakeRemote {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisResult, VoiceError> {
        self.requests.lock().unwrap().push(request.clone());
        match &self.response {
            Ok(result) => Ok(result.clone()),
            Err(status) => Err(VoiceError::Api {
                status: *status,
                message: "synthesis backend unavailable".to_string(),
            }),
        }
    }
}
