//! **Asynchronous Job Poller** — the submit-then-poll protocol shared by all
//! studio and video-translation task kinds.
//!
//! The four kinds (TTS, STF, photo avatar, video export) differ only in
//! endpoint, payload shape, and the field names carrying identifiers and
//! output artifacts; `TaskKind` captures those differences and one poll loop
//! serves them all. Polling is unbounded by default — long video jobs can run
//! for tens of minutes — so cancellation is the caller's to impose via the
//! optional deadline.

use crate::error::{PersoError, PersoResult};
use crate::transport::{FormFilePart, Transport};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Fixed delay between status polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Per-kind descriptor: everything that distinguishes one job kind from
/// another. The poller core is otherwise identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskKind {
    pub name: &'static str,
    /// Submit endpoint; status GETs append `<id>/`.
    pub submit_path: &'static str,
    /// Field of the submit response carrying the job identifier.
    pub id_field: &'static str,
    /// Fields of the terminal COMPLETED payload carrying output artifacts.
    pub output_fields: &'static [&'static str],
}

/// Speech synthesis (studio).
pub const TTS: TaskKind = TaskKind {
    name: "TTS",
    submit_path: "/api/studio/v1/task/tts/",
    id_field: "task_id",
    output_fields: &["tts_output_audio"],
};

/// Speech-to-face video generation (studio).
pub const STF: TaskKind = TaskKind {
    name: "STF",
    submit_path: "/api/studio/v1/task/stf/",
    id_field: "task_id",
    output_fields: &["stf_output_video"],
};

/// Photo avatar video generation (studio).
pub const PHOTO_AVATAR: TaskKind = TaskKind {
    name: "photo avatar",
    submit_path: "/api/studio/v1/task/photoavatar/",
    id_field: "task_id",
    output_fields: &["photoavatar_output_video"],
};

/// Video translation export (rendering job).
pub const VIDEO_EXPORT: TaskKind = TaskKind {
    name: "video export",
    submit_path: "/api/video_translator/v2/export/",
    id_field: "projectexport_id",
    output_fields: &[
        "video_output_video_with_lipsync",
        "video_output_video_without_lipsync",
    ],
};

/// A file-valued task input: either a local file uploaded as a multipart part,
/// or a public URL the server fetches itself.
#[derive(Debug, Clone)]
pub enum FileSource {
    Path(PathBuf),
    Url(String),
}

/// Submit payload: JSON for text/ID inputs, multipart when a binary file is
/// involved.
#[derive(Debug, Clone)]
pub enum TaskInput {
    Json(Value),
    Form {
        fields: Vec<(String, String)>,
        /// Multipart field name + source. A `Url` source is sent as a plain
        /// data field named `<field>_url` instead of a file part — the server
        /// distinguishes the two.
        file: Option<(String, FileSource)>,
    },
}

/// Terminal result of a completed task.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub id: String,
    /// Declared output fields that were present, in declaration order.
    pub outputs: Vec<(&'static str, String)>,
    /// Full terminal payload, for fields outside the declared set.
    pub raw: Value,
}

impl TaskOutcome {
    pub fn output(&self, field: &str) -> Option<&str> {
        self.outputs
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, value)| value.as_str())
    }

    /// The first declared output artifact, for single-artifact kinds.
    pub fn first_output(&self) -> Option<&str> {
        self.outputs.first().map(|(_, value)| value.as_str())
    }
}

/// Drives the two-phase submit/poll protocol for any `TaskKind`.
pub struct TaskClient {
    transport: Arc<dyn Transport>,
    poll_interval: Duration,
}

impl TaskClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Override the poll cadence (tests use zero).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Submit a task and return its identifier. A non-2xx response or a
    /// response lacking the identifier field fails with `JobSubmission`
    /// before any polling GET is issued.
    pub fn submit(&self, kind: &TaskKind, input: &TaskInput) -> PersoResult<String> {
        info!("Submitting {} task", kind.name);
        let response = match input {
            TaskInput::Json(body) => self.transport.post_json(kind.submit_path, body)?,
            TaskInput::Form { fields, file } => {
                let mut fields = fields.clone();
                let mut file_part = None;
                if let Some((field, source)) = file {
                    match source {
                        FileSource::Url(url) => {
                            fields.push((format!("{}_url", field), url.clone()));
                        }
                        FileSource::Path(path) => {
                            file_part = Some(FormFilePart {
                                field: field.clone(),
                                path: path.clone(),
                                mime: guess_mime(path).to_string(),
                            });
                        }
                    }
                }
                self.transport
                    .post_form(kind.submit_path, &fields, file_part.as_ref())?
            }
        };

        if !response.is_success() {
            return Err(PersoError::JobSubmission {
                task: kind.name,
                detail: format!("{} - {}", response.status, response.body),
            });
        }
        let data: Value = serde_json::from_str(&response.body).map_err(|e| {
            PersoError::JobSubmission {
                task: kind.name,
                detail: format!("invalid submit response: {}", e),
            }
        })?;
        let id = field_as_string(&data, kind.id_field).ok_or_else(|| {
            PersoError::JobSubmission {
                task: kind.name,
                detail: format!("submit response missing {}", kind.id_field),
            }
        })?;

        info!("{} task started (id: {})", kind.name, id);
        Ok(id)
    }

    /// Poll until the task reaches a terminal status.
    ///
    /// `COMPLETED` yields the declared output fields; `FAILED` fails with the
    /// server-supplied reason ("Unknown error" when absent). Any other status
    /// keeps polling: with `deadline == None` the loop never gives up on its
    /// own. The first GET is immediate; sleeps happen between attempts.
    pub fn poll(
        &self,
        kind: &TaskKind,
        id: &str,
        deadline: Option<Duration>,
    ) -> PersoResult<TaskOutcome> {
        let status_path = format!("{}{}/", kind.submit_path, id);
        let started = Instant::now();

        loop {
            let response = self.transport.get_unbounded(&status_path)?;
            if !response.is_success() {
                return Err(PersoError::JobStatus {
                    task: kind.name,
                    id: id.to_string(),
                    status: response.status,
                    body: response.body,
                });
            }
            let data = response.json()?;
            let status = data.get("status").and_then(|v| v.as_str()).unwrap_or("");
            info!("{} task {} status: {}", kind.name, id, status);

            match status {
                "COMPLETED" => {
                    let mut outputs = Vec::new();
                    for &field in kind.output_fields {
                        if let Some(value) = field_as_string(&data, field) {
                            outputs.push((field, value));
                        }
                    }
                    return Ok(TaskOutcome {
                        id: id.to_string(),
                        outputs,
                        raw: data,
                    });
                }
                "FAILED" => {
                    let reason = field_as_string(&data, "failure_reason")
                        .or_else(|| field_as_string(&data, "status_detail"))
                        .unwrap_or_else(|| "Unknown error".to_string());
                    return Err(PersoError::JobFailed {
                        task: kind.name,
                        id: id.to_string(),
                        reason,
                    });
                }
                _ => {}
            }

            if let Some(limit) = deadline {
                if started.elapsed() >= limit {
                    warn!("{} task {} still {} at deadline", kind.name, id, status);
                    return Err(PersoError::PollDeadlineExceeded {
                        task: kind.name,
                        id: id.to_string(),
                    });
                }
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    /// Submit and poll to completion in one call.
    pub fn run(
        &self,
        kind: &TaskKind,
        input: &TaskInput,
        deadline: Option<Duration>,
    ) -> PersoResult<TaskOutcome> {
        let id = self.submit(kind, input)?;
        self.poll(kind, &id, deadline)
    }
}

/// Payload for a TTS studio task.
pub fn tts_request(agent: &str, tts_type: &str, audio_format: &str, texts: &[String]) -> TaskInput {
    TaskInput::Json(json!({
        "agent": agent,
        "tts_type": tts_type,
        "tts_audio_format": audio_format,
        "tts_text": texts,
    }))
}

/// Payload for an STF (speech-to-face) studio task.
pub fn stf_request(agent: &str, model_style: &str, audio: FileSource) -> TaskInput {
    TaskInput::Form {
        fields: vec![
            ("agent".to_string(), agent.to_string()),
            ("stf_model_style".to_string(), model_style.to_string()),
        ],
        file: Some(("stf_input_audio".to_string(), audio)),
    }
}

/// Payload for a photo avatar studio task.
pub fn photo_avatar_request(agent: &str, model_style: &str, image: FileSource) -> TaskInput {
    TaskInput::Form {
        fields: vec![
            ("agent".to_string(), agent.to_string()),
            ("photoavatar_model_style".to_string(), model_style.to_string()),
        ],
        file: Some(("photoavatar_input_image".to_string(), image)),
    }
}

fn field_as_string(data: &Value, field: &str) -> Option<String> {
    match data.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn guess_mime(path: &std::path::Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mpeg",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}
