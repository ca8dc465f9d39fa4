//! # Perso Live client
//!
//! Client library for the Perso Live avatar/media-generation API: stateful
//! chat sessions with streaming replies, microphone capture for voice input,
//! and the asynchronous studio/translation jobs (TTS, STF, photo avatar,
//! video export) tracked by polling.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                         Controller (CLI)                      │
//! │  ┌────────────┐  ┌────────────┐  ┌───────────────────────┐   │
//! │  │  Session   │  │ TaskClient │  │    VideoTranslator    │   │
//! │  │  (chat /   │  │ (submit +  │  │ (project / scripts /  │   │
//! │  │  TTS/STT)  │  │   poll)    │  │  revision + export)   │   │
//! │  └─────┬──────┘  └─────┬──────┘  └──────────┬────────────┘   │
//! │        └───────────────┼────────────────────┘                │
//! │                 ┌──────┴───────┐    ┌──────────────┐         │
//! │                 │  Transport   │    │   Recorder   │         │
//! │                 │  (blocking   │    │ (cpal worker │         │
//! │                 │   reqwest)   │    │   thread)    │         │
//! │                 └──────────────┘    └──────────────┘         │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! One controlling thread drives everything sequentially over blocking HTTP;
//! the only background parallelism is the audio capture worker, which is
//! joined before its output is consumed.

pub mod chat;
pub mod config;
pub mod error;
pub mod playback;
pub mod recorder;
pub mod session;
pub mod task;
pub mod translation;
pub mod transport;

pub use config::{ClientConfig, API_KEY_ENV, DEFAULT_API_SERVER};
pub use error::{PersoError, PersoResult};
pub use playback::Playback;
pub use recorder::Recorder;
pub use session::{
    available_settings, browser_visualization, BrowserVisualization, Capability, ChatMessage,
    ChatRole, Session, SessionConfig, SessionState, SessionStatus,
};
pub use task::{
    photo_avatar_request, stf_request, tts_request, FileSource, TaskClient, TaskInput, TaskKind,
    TaskOutcome, PHOTO_AVATAR, STF, TTS, VIDEO_EXPORT,
};
pub use translation::{
    ExportRequest, ExportType, ProjectRequest, ScriptSelector, TranslationProject,
    TranslationScript, VideoTranslator,
};
pub use transport::{FormFilePart, HttpResponse, HttpTransport, StreamBody, Transport};
