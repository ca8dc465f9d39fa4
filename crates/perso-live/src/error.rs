//! Error types for the Perso Live client

use thiserror::Error;

/// Result type alias for client operations
pub type PersoResult<T> = Result<T, PersoError>;

/// Errors that can occur while driving sessions, tasks, and audio capture.
///
/// Server rejections (non-2xx) always carry the HTTP status and the raw
/// response body so the caller can retry the specific step. State-precondition
/// failures (e.g. chat before `start`) are local and never reach the network.
#[derive(Error, Debug)]
pub enum PersoError {
    #[error("Session creation failed: {status} - {body}")]
    SessionCreation { status: u16, body: String },

    #[error("Session start failed: {status} - {body}")]
    SessionStart { status: u16, body: String },

    #[error("Session has not been created")]
    SessionNotReady,

    #[error("{operation} is not valid while the session is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("Session has not been started")]
    SessionNotStarted,

    #[error("Session has been terminated by the server")]
    SessionTerminated,

    #[error("Session was not ready within {0:?}")]
    SessionTimeout(std::time::Duration),

    #[error("Session status query failed: {status} - {body}")]
    SessionStatus { status: u16, body: String },

    #[error("Audio backend unavailable: {0}")]
    AudioUnavailable(String),

    #[error("Already recording")]
    AlreadyRecording,

    #[error("Chat request failed: {status} - {body}")]
    ChatRequest { status: u16, body: String },

    #[error("{operation} request failed: {status} - {body}")]
    SessionRequest {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("{task} task submission failed: {detail}")]
    JobSubmission { task: &'static str, detail: String },

    #[error("{task} task {id} status check failed: {status} - {body}")]
    JobStatus {
        task: &'static str,
        id: String,
        status: u16,
        body: String,
    },

    #[error("{task} task {id} failed: {reason}")]
    JobFailed {
        task: &'static str,
        id: String,
        reason: String,
    },

    #[error("{task} task {id} did not finish within the deadline")]
    PollDeadlineExceeded { task: &'static str, id: String },

    #[error("Failed to modify script {script_id}: {status} - {body}")]
    ScriptModify {
        script_id: String,
        status: u16,
        body: String,
    },

    #[error("Failed to generate audio for script {script_id}: {status} - {body}")]
    AudioGeneration {
        script_id: String,
        status: u16,
        body: String,
    },

    #[error("Translation project request failed: {status} - {body}")]
    TranslationProject { status: u16, body: String },

    #[error("HTTP transport error: {0}")]
    Transport(String),

    #[error("Unexpected response payload: {0}")]
    Payload(String),

    #[error("Audio playback error: {0}")]
    Playback(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for PersoError {
    fn from(err: reqwest::Error) -> Self {
        PersoError::Transport(err.to_string())
    }
}

impl From<hound::Error> for PersoError {
    fn from(err: hound::Error) -> Self {
        PersoError::Payload(format!("WAV framing failed: {}", err))
    }
}
