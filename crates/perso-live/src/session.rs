//! **Session State Machine** — lifecycle of a server-held conversational
//! avatar session.
//!
//! Local states run `Uncreated → Created → Started → Ended`; the server
//! additionally reports `TERMINATED` asynchronously, which is detected only by
//! polling (`status()`), never pushed. Every operation guards on the local
//! state first, so precondition violations fail synchronously without a
//! network call.

use crate::chat;
use crate::error::{PersoError, PersoResult};
use crate::transport::{FormFilePart, StreamBody, Transport};
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Cadence of `wait_until_ready` status polls.
const READY_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Named feature flags requested at session creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capability {
    #[serde(rename = "LLM")]
    Llm,
    #[serde(rename = "TTS")]
    Tts,
    #[serde(rename = "STT")]
    Stt,
    #[serde(rename = "STF_WEBRTC")]
    StfWebrtc,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Llm => "LLM",
            Capability::Tts => "TTS",
            Capability::Stt => "STT",
            Capability::StfWebrtc => "STF_WEBRTC",
        }
    }
}

impl std::str::FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LLM" => Ok(Capability::Llm),
            "TTS" => Ok(Capability::Tts),
            "STT" => Ok(Capability::Stt),
            "STF_WEBRTC" => Ok(Capability::StfWebrtc),
            other => Err(format!(
                "unknown capability {} (expected LLM, TTS, STT, or STF_WEBRTC)",
                other
            )),
        }
    }
}

/// Configuration sent with `Session::create`.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub llm_type: String,
    pub tts_type: String,
    pub model_style: String,
    pub prompt: String,
    /// Optional document reference for grounding.
    pub document: Option<String>,
    /// Optional background image reference.
    pub background_image: Option<String>,
    /// Requested capability set. Stored on the session for later use.
    pub capability: Vec<Capability>,
    pub stt_type: Option<String>,
    pub agent: Option<String>,
}

impl SessionConfig {
    fn to_payload(&self) -> Value {
        let mut data = json!({
            "llm_type": self.llm_type,
            "tts_type": self.tts_type,
            "model_style": self.model_style,
            "prompt": self.prompt,
        });
        let obj = data.as_object_mut().expect("payload is an object");
        if let Some(ref document) = self.document {
            obj.insert("document".into(), json!(document));
        }
        if let Some(ref background) = self.background_image {
            obj.insert("background_image".into(), json!(background));
        }
        if !self.capability.is_empty() {
            let caps: Vec<&str> = self.capability.iter().map(|c| c.as_str()).collect();
            obj.insert("capability".into(), json!(caps));
        }
        if let Some(ref stt_type) = self.stt_type {
            obj.insert("stt_type".into(), json!(stt_type));
        }
        if let Some(ref agent) = self.agent {
            obj.insert("agent".into(), json!(agent));
        }
        data
    }
}

/// Local session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uncreated,
    Created,
    Started,
    Ended,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Uncreated => "UNCREATED",
            SessionState::Created => "CREATED",
            SessionState::Started => "STARTED",
            SessionState::Ended => "ENDED",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-reported session status (server truth, independent of local state).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    InProgress,
    Terminated,
    Other(String),
}

impl SessionStatus {
    fn from_str(s: &str) -> Self {
        match s {
            "IN_PROGRESS" => SessionStatus::InProgress,
            "TERMINATED" => SessionStatus::Terminated,
            other => SessionStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SessionStatus::InProgress => "IN_PROGRESS",
            SessionStatus::Terminated => "TERMINATED",
            SessionStatus::Other(s) => s,
        }
    }
}

/// Speaker role in the conversation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    Human,
    Ai,
}

/// One turn of the session-scoped conversation history.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

/// A stateful conversational session against the Perso Live API.
///
/// All operations run on the controller thread; history is never mutated
/// concurrently. The session identifier and capability set become read-only
/// once the session reaches `Started`.
pub struct Session {
    transport: Arc<dyn Transport>,
    state: SessionState,
    session_id: Option<String>,
    capability: Vec<Capability>,
    history: Vec<ChatMessage>,
}

impl Session {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            state: SessionState::Uncreated,
            session_id: None,
            capability: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn capability(&self) -> &[Capability] {
        &self.capability
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    fn session_path(&self, suffix: &str) -> PersoResult<String> {
        let id = self.session_id.as_deref().ok_or(PersoError::SessionNotReady)?;
        Ok(format!("/api/v1/session/{}/{}", id, suffix))
    }

    /// Create the session on the server. Requires `Uncreated`; on success the
    /// assigned identifier is recorded and state becomes `Created`. A non-2xx
    /// response leaves the state `Uncreated`.
    pub fn create(&mut self, config: &SessionConfig) -> PersoResult<String> {
        if self.state != SessionState::Uncreated {
            return Err(PersoError::InvalidState {
                operation: "create",
                state: self.state.as_str(),
            });
        }

        info!("Creating session");
        let response = self
            .transport
            .post_json("/api/v1/session/", &config.to_payload())?;
        if response.status != 201 {
            return Err(PersoError::SessionCreation {
                status: response.status,
                body: response.body,
            });
        }

        let result = response.json()?;
        let session_id = result
            .get("session_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PersoError::Payload("session response missing session_id".into()))?
            .to_string();

        info!("Session created: {}", session_id);
        self.session_id = Some(session_id.clone());
        self.capability = config.capability.clone();
        self.state = SessionState::Created;
        Ok(session_id)
    }

    /// Emit the session-start event. Requires `Created`.
    pub fn start(&mut self) -> PersoResult<()> {
        match self.state {
            SessionState::Created => {}
            SessionState::Uncreated => return Err(PersoError::SessionNotReady),
            other => {
                return Err(PersoError::InvalidState {
                    operation: "start",
                    state: other.as_str(),
                })
            }
        }

        info!("Starting session");
        let path = self.session_path("event/create/")?;
        let response = self.transport.post_json(
            &path,
            &json!({ "event": "SESSION_START", "detail": "Session started via client" }),
        )?;
        if response.status != 201 {
            return Err(PersoError::SessionStart {
                status: response.status,
                body: response.body,
            });
        }

        self.state = SessionState::Started;
        info!("Session started");
        Ok(())
    }

    /// Query server truth for the session status. Independent of local state;
    /// this is how server-side termination is detected (it is never pushed).
    pub fn status(&self) -> PersoResult<SessionStatus> {
        let path = self.session_path("")?;
        let response = self.transport.get(&path)?;
        if !response.is_success() {
            return Err(PersoError::SessionStatus {
                status: response.status,
                body: response.body,
            });
        }
        let result = response.json()?;
        let status = result
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("UNKNOWN");
        Ok(SessionStatus::from_str(status))
    }

    /// Poll at a 1-second cadence until the server reports `IN_PROGRESS`.
    /// Fails with `SessionTerminated` if the server reports termination during
    /// the wait, or `SessionTimeout` once `timeout` elapses.
    pub fn wait_until_ready(&self, timeout: Duration) -> PersoResult<()> {
        info!("Waiting for session to be ready");
        let start = Instant::now();
        loop {
            match self.status() {
                Ok(SessionStatus::InProgress) => {
                    info!("Session ready");
                    return Ok(());
                }
                Ok(SessionStatus::Terminated) => return Err(PersoError::SessionTerminated),
                Ok(other) => info!("Session status: {}", other.as_str()),
                // Transient status-check failures do not abort the wait.
                Err(e) => warn!("Status check failed during wait: {}", e),
            }
            if start.elapsed() >= timeout {
                return Err(PersoError::SessionTimeout(timeout));
            }
            std::thread::sleep(READY_POLL_INTERVAL);
        }
    }

    /// Send a chat turn and decode the streamed reply. Requires `Started`.
    ///
    /// `on_fragment` is invoked for every sentence fragment as it arrives, in
    /// stream order, before the call returns — partial output is deliverable
    /// while the stream is still open. The full reply is appended to history
    /// as an AI turn and returned.
    pub fn chat_text<F>(&mut self, message: &str, on_fragment: F) -> PersoResult<String>
    where
        F: FnMut(&str),
    {
        self.require_started()?;

        self.history.push(ChatMessage {
            role: ChatRole::Human,
            content: message.to_string(),
        });

        let path = self.session_path("llm/")?;
        let stream = self.transport.post_stream(
            &path,
            &json!({ "message": message, "clear_history": false }),
        )?;
        let reader = match stream {
            StreamBody::Open(reader) => reader,
            StreamBody::Refused(response) => {
                return Err(PersoError::ChatRequest {
                    status: response.status,
                    body: response.body,
                })
            }
        };

        let response = chat::decode_stream(reader, on_fragment)?;
        self.history.push(ChatMessage {
            role: ChatRole::Ai,
            content: response.clone(),
        });
        Ok(response)
    }

    /// Synthesize speech for `text` via the session TTS. Requires `Started`.
    /// The server returns the audio inline as base64; the decoded bytes are
    /// returned and optionally written to `save_path`.
    pub fn synthesize_speech(&self, text: &str, save_path: Option<&Path>) -> PersoResult<Vec<u8>> {
        self.require_started()?;

        info!("Generating speech");
        let path = self.session_path("tts/")?;
        let response = self.transport.post_json(&path, &json!({ "text": text }))?;
        if !response.is_success() {
            return Err(PersoError::SessionRequest {
                operation: "TTS",
                status: response.status,
                body: response.body,
            });
        }

        let result = response.json()?;
        let encoded = result
            .get("audio")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PersoError::Payload("TTS response missing audio".into()))?;
        let audio = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| PersoError::Payload(format!("invalid base64 audio: {}", e)))?;

        if let Some(dest) = save_path {
            std::fs::write(dest, &audio)?;
            info!("Audio saved: {}", dest.display());
        }
        Ok(audio)
    }

    /// Recognize speech from a WAV file via the session STT. Requires
    /// `Started`.
    ///
    /// Server-side termination has no push notification, so server truth is
    /// reconciled first: a `TERMINATED` session fails before any upload.
    pub fn recognize_speech(&mut self, audio_path: &Path, language: &str) -> PersoResult<String> {
        self.require_started()?;

        let status = self.status()?;
        if status == SessionStatus::Terminated {
            return Err(PersoError::SessionTerminated);
        }
        if status != SessionStatus::InProgress {
            warn!("Session is not IN_PROGRESS (current: {})", status.as_str());
        }

        info!("Recognizing speech from {}", audio_path.display());
        let path = self.session_path("stt/")?;
        let fields = vec![("language".to_string(), language.to_string())];
        let file = FormFilePart {
            field: "audio".to_string(),
            path: audio_path.to_path_buf(),
            mime: "audio/wav".to_string(),
        };
        let response = self.transport.post_form(&path, &fields, Some(&file))?;
        if !response.is_success() {
            return Err(PersoError::SessionRequest {
                operation: "STT",
                status: response.status,
                body: response.body,
            });
        }

        let result = response.json()?;
        let text = result
            .get("text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PersoError::Payload("STT response missing text".into()))?
            .to_string();
        info!("Recognized text: {}", text);
        Ok(text)
    }

    /// Emit the session-end event and transition to `Ended`. Idempotent:
    /// calling on an uncreated or already-ended session is a no-op, and a
    /// server-side refusal is logged rather than raised.
    pub fn end(&mut self) -> PersoResult<()> {
        if self.session_id.is_none() || self.state == SessionState::Ended {
            return Ok(());
        }

        info!("Ending session");
        let path = self.session_path("event/create/")?;
        let response = self.transport.post_json(
            &path,
            &json!({ "event": "SESSION_END", "detail": "Session ended via client" }),
        )?;
        if response.status != 201 {
            warn!("Session end failed: {} - {}", response.status, response.body);
        }
        self.state = SessionState::Ended;
        Ok(())
    }

    fn require_started(&self) -> PersoResult<()> {
        if self.state != SessionState::Started {
            return Err(PersoError::SessionNotStarted);
        }
        Ok(())
    }
}

/// Query the available options for a settings category (`tts_type`,
/// `modelstyle`, ...). No session required.
pub fn available_settings(transport: &dyn Transport, setting_type: &str) -> PersoResult<Vec<Value>> {
    let response = transport.get(&format!("/api/v1/settings/{}/", setting_type))?;
    if !response.is_success() {
        return Err(PersoError::SessionRequest {
            operation: "settings",
            status: response.status,
            body: response.body,
        });
    }
    let result = response.json()?;
    result
        .as_array()
        .cloned()
        .ok_or_else(|| PersoError::Payload("settings response is not a list".into()))
}

/// Description of the browser-only WebRTC avatar visualization mode.
///
/// The visualization path is session-independent: the browser SDK creates its
/// own session over WebRTC. The client merely advertises how to launch it.
#[derive(Debug, Clone, Serialize)]
pub struct BrowserVisualization {
    pub api_server: String,
    pub sdk_docs: &'static str,
    pub instructions: &'static str,
}

/// Advertise the browser visualization flow for the given server.
pub fn browser_visualization(api_server: &str) -> BrowserVisualization {
    BrowserVisualization {
        api_server: api_server.to_string(),
        sdk_docs: "https://est-perso-live.github.io/perso-live-sdk/js/",
        instructions: "Open the JS SDK sample, configure the API server and key, \
                       and start a browser session for real-time WebRTC avatar chat",
    }
}
