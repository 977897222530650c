//! Recognition through the backend's transcription endpoint.
//!
//! Frames are split into utterances with a [`VoiceActivityDetector`] tuned to
//! a short pause. Each finished utterance is uploaded as a WAV clip and its
//! transcript is reported as one final result. No partial results are
//! produced.

use crate::api::{Transcription, VoiceApiClient};
use crate::capture::{RecognitionEvent, RecognitionSession, Recognizer};
use crate::config::{ListenOptions, VadConfig};
use crate::error::VoiceError;
use crate::level::{level, AudioFrame};
use crate::vad::{VadEvent, VoiceActivityDetector};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Sample rate of frames produced by [`CommandMicrophone`](crate::CommandMicrophone).
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Pause that ends an utterance.
const DEFAULT_UTTERANCE_GAP: Duration = Duration::from_millis(800);

/// Longest utterance buffered before it is sent regardless (60 s of audio).
const MAX_UTTERANCE_SAMPLES: usize = CAPTURE_SAMPLE_RATE as usize * 60;

const AUDIO_BUFFER: usize = 256;
const EVENT_BUFFER: usize = 16;

pub struct TranscribingRecognizer {
    api: Arc<VoiceApiClient>,
    threshold: f32,
    utterance_gap: Duration,
    sample_rate: u32,
}

impl TranscribingRecognizer {
    pub fn new(api: Arc<VoiceApiClient>, vad: VadConfig) -> Self {
        Self {
            api,
            threshold: vad.threshold,
            utterance_gap: DEFAULT_UTTERANCE_GAP,
            sample_rate: CAPTURE_SAMPLE_RATE,
        }
    }

    pub fn with_utterance_gap(mut self, gap: Duration) -> Self {
        self.utterance_gap = gap;
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }
}

impl Recognizer for TranscribingRecognizer {
    fn start(&self, options: &ListenOptions) -> Result<RecognitionSession, VoiceError> {
        let (audio_tx, audio_rx) = mpsc::channel(AUDIO_BUFFER);
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let vad = VoiceActivityDetector::new(VadConfig {
            threshold: self.threshold,
            silence_duration_ms: self.utterance_gap.as_millis() as u64,
        });
        let task = tokio::spawn(transcribe_utterances(
            self.api.clone(),
            options.language.clone(),
            self.sample_rate,
            vad,
            audio_rx,
            event_tx,
        ));
        Ok(RecognitionSession::new(event_rx)
            .with_audio_sink(audio_tx)
            .on_release(move || task.abort()))
    }
}

async fn transcribe_utterances(
    api: Arc<VoiceApiClient>,
    language: String,
    sample_rate: u32,
    mut vad: VoiceActivityDetector,
    mut audio: mpsc::Receiver<AudioFrame>,
    events: mpsc::Sender<RecognitionEvent>,
) {
    let mut utterance: Vec<f32> = Vec::new();
    let mut speaking = false;

    while let Some(frame) = audio.recv().await {
        match vad.observe(level(&frame), Instant::now()) {
            Some(VadEvent::VoiceDetected) => speaking = true,
            Some(VadEvent::SilenceTimeout) => speaking = false,
            None => {}
        }
        if vad.is_voice() || speaking {
            utterance.extend_from_slice(frame.samples());
        }

        let finished = !speaking && !utterance.is_empty();
        if !finished && utterance.len() < MAX_UTTERANCE_SAMPLES {
            continue;
        }

        let clip = AudioFrame::new(std::mem::take(&mut utterance));
        let event = match transcribe_clip(&api, &clip, sample_rate, &language).await {
            Ok(transcription) => {
                let text = transcription.text.trim().to_string();
                if text.is_empty() {
                    continue;
                }
                RecognitionEvent::Final(text)
            }
            Err(e) => RecognitionEvent::Error(e.to_string()),
        };
        let failed = matches!(event, RecognitionEvent::Error(_));
        if events.send(event).await.is_err() || failed {
            return;
        }
    }
    let _ = events.send(RecognitionEvent::Ended).await;
}

async fn transcribe_clip(
    api: &VoiceApiClient,
    clip: &AudioFrame,
    sample_rate: u32,
    language: &str,
) -> Result<Transcription, VoiceError> {
    let wav = encode_wav(clip, sample_rate)?;
    api.transcribe(&wav, "wav", language).await
}

/// Wraps mono samples in a 16-bit PCM WAV container.
pub fn encode_wav(frame: &AudioFrame, sample_rate: u32) -> Result<Vec<u8>, VoiceError> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut buffer = Cursor::new(Vec::new());
    let mut writer = WavWriter::new(&mut buffer, spec)?;
    for sample in frame.to_i16() {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(buffer.into_inner())
}
