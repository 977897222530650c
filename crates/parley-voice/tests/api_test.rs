mod common;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use base64::Engine;
use common::{silent, voiced, FakeMicrophone};
use parley_types::VoiceSettings;
use parley_voice::{
    ApiConfig, CredentialSource, ListenOptions, SpeechCaptureController, StaticCredential,
    SynthesisRequest, TranscribingRecognizer, VadConfig, VoiceApiClient, VoiceError,
    VoiceSessionState,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct Seen {
    requests: Arc<Mutex<Vec<(Option<String>, Value)>>>,
}

impl Seen {
    fn record(&self, headers: &HeaderMap, body: Value) {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.requests.lock().unwrap().push((auth, body));
    }

    fn all(&self) -> Vec<(Option<String>, Value)> {
        self.requests.lock().unwrap().clone()
    }
}

async fn transcribe(
    State(seen): State<Seen>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    seen.record(&headers, body);
    Json(json!({"text": "turn on the lights", "language": "en", "confidence": 0.93, "duration": 1.2}))
}

async fn synthesize(
    State(seen): State<Seen>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let agent = body["agent_id"].as_str().unwrap_or_default().to_string();
    seen.record(&headers, body);
    if agent == "broken" {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"detail": "ElevenLabs unavailable"})),
        );
    }
    (
        StatusCode::OK,
        Json(json!({"audio_url": "/static/audio/abc.mp3", "duration": 2.5})),
    )
}

async fn spawn_backend() -> (String, Seen) {
    let seen = Seen::default();
    let app = Router::new()
        .route("/api/voice/transcribe", post(transcribe))
        .route("/api/voice/synthesize", post(synthesize))
        .with_state(seen.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), seen)
}

fn client(base_url: &str, token: Option<&str>) -> VoiceApiClient {
    let creds: Arc<dyn CredentialSource> =
        Arc::new(StaticCredential::new(token.map(str::to_string)));
    VoiceApiClient::new(&ApiConfig::new(base_url), creds).unwrap()
}

#[tokio::test]
async fn test_transcribe_sends_base64_audio_with_bearer_token() {
    let (base_url, seen) = spawn_backend().await;
    let client = client(&base_url, Some("tok-123"));

    let audio = [1u8, 2, 3, 250];
    let transcription = client.transcribe(&audio, "wav", "en").await.unwrap();
    assert_eq!(transcription.text, "turn on the lights");
    assert_eq!(transcription.language.as_deref(), Some("en"));

    let requests = seen.all();
    assert_eq!(requests.len(), 1);
    let (auth, body) = &requests[0];
    assert_eq!(auth.as_deref(), Some("Bearer tok-123"));
    assert_eq!(body["format"], "wav");
    assert_eq!(body["language"], "en");
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(body["audio_data"].as_str().unwrap())
        .unwrap();
    assert_eq!(decoded, audio);
}

#[tokio::test]
async fn test_synthesize_resolves_relative_audio_url() {
    let (base_url, seen) = spawn_backend().await;
    let client = client(&base_url, None);

    let request = SynthesisRequest {
        text: "Hello".to_string(),
        agent_id: "carol".to_string(),
        voice_settings: VoiceSettings {
            stability: Some(0.5),
            ..VoiceSettings::with_voice("v-carol")
        },
    };
    let result = client.synthesize(&request).await.unwrap();
    assert_eq!(
        result.audio_url,
        Some(format!("{}/static/audio/abc.mp3", base_url))
    );
    assert_eq!(result.duration_ms(), 2500);

    let (auth, body) = &seen.all()[0];
    assert_eq!(*auth, None, "no credential means no Authorization header");
    assert_eq!(body["agent_id"], "carol");
    assert_eq!(body["voice_settings"]["voice_id"], "v-carol");
    assert_eq!(body["voice_settings"]["stability"], 0.5);
}

#[tokio::test]
async fn test_non_success_status_maps_to_api_error() {
    let (base_url, _seen) = spawn_backend().await;
    let client = client(&base_url, Some("tok"));

    let request = SynthesisRequest {
        text: "Hello".to_string(),
        agent_id: "broken".to_string(),
        voice_settings: VoiceSettings::default(),
    };
    match client.synthesize(&request).await {
        Err(VoiceError::Api { status, message }) => {
            assert_eq!(status, 503);
            assert_eq!(message, "ElevenLabs unavailable");
        }
        other => panic!("Expected Api error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unreachable_backend_is_http_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = client(&format!("http://{}", addr), None);
    let result = client.transcribe(&[0u8; 4], "wav", "en").await;
    assert!(matches!(result, Err(VoiceError::Http(_))), "got {:?}", result);
}

#[tokio::test]
async fn test_transcribing_recognizer_uploads_each_utterance() {
    let (base_url, seen) = spawn_backend().await;
    let api = Arc::new(client(&base_url, Some("tok")));
    let recognizer = TranscribingRecognizer::new(api, VadConfig::default())
        .with_utterance_gap(Duration::from_millis(100));

    let mic = FakeMicrophone::new();
    let capture = SpeechCaptureController::new(VoiceSessionState::new(), VadConfig::default())
        .with_microphone(mic.clone())
        .with_recognizer(Arc::new(recognizer));

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    capture
        .start_listening(
            move |text: &str, is_final: bool| {
                let _ = tx.send((text.to_string(), is_final));
            },
            ListenOptions::default(),
        )
        .unwrap();

    for _ in 0..3 {
        mic.send(voiced()).await;
    }
    mic.send(silent()).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    mic.send(silent()).await;

    let result = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("transcript arrives")
        .unwrap();
    assert_eq!(result, ("turn on the lights".to_string(), true));

    let (auth, body) = &seen.all()[0];
    assert_eq!(auth.as_deref(), Some("Bearer tok"));
    assert_eq!(body["format"], "wav");
    assert_eq!(body["language"], "en-US");
    let clip = base64::engine::general_purpose::STANDARD
        .decode(body["audio_data"].as_str().unwrap())
        .unwrap();
    assert_eq!(&clip[0..4], b"RIFF");
    // Three voiced frames plus the trailing silent one, 160 samples each.
    assert_eq!(clip.len(), 44 + 4 * 160 * 2);

    assert!(capture.stop_listening().await);
}
