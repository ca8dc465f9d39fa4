//! **Video Translation** — project creation, exports, and the script
//! revision workflow.
//!
//! An export is just a `VIDEO_EXPORT` job driven by the generic task poller.
//! The revision workflow is a sequential three-step transaction (patch the
//! translated text, regenerate its audio, re-export) that is *not* atomic
//! against server-side partial failure: a crash between regenerate and
//! export leaves an updated script with a stale export artifact. Failures
//! surface at the failing step; earlier steps are never rolled back.

use crate::error::{PersoError, PersoResult};
use crate::task::{TaskClient, TaskInput, TaskOutcome, VIDEO_EXPORT};
use crate::transport::Transport;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Export flavor: the first render of a project, or a re-render after
/// proofreading edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportType {
    Initial,
    Proofread,
}

impl ExportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportType::Initial => "INITIAL_EXPORT",
            ExportType::Proofread => "PROOFREAD_EXPORT",
        }
    }
}

/// Parameters for creating a translation project.
#[derive(Debug, Clone)]
pub struct ProjectRequest {
    /// Public URL of the input video.
    pub input_file_url: String,
    /// File name; derived from the URL when absent.
    pub input_file_name: Option<String>,
    pub source_language: String,
    pub input_file_video_duration_sec: u64,
    pub video_pipeline_timeout_lower_bound_sec: u64,
    pub input_number_of_speakers: u32,
    pub experiments: Option<String>,
    pub input_file_source_language_subtitle: Option<String>,
}

impl ProjectRequest {
    pub fn new(input_file_url: impl Into<String>, source_language: impl Into<String>) -> Self {
        Self {
            input_file_url: input_file_url.into(),
            input_file_name: None,
            source_language: source_language.into(),
            input_file_video_duration_sec: 0,
            video_pipeline_timeout_lower_bound_sec: 0,
            input_number_of_speakers: 2,
            experiments: None,
            input_file_source_language_subtitle: None,
        }
    }

    fn to_payload(&self) -> Value {
        let file_name = self
            .input_file_name
            .clone()
            .unwrap_or_else(|| filename_from_url(&self.input_file_url));
        let mut payload = json!({
            "input_file_name": file_name,
            "input_file_url": self.input_file_url,
            "source_language": self.source_language,
            "input_file_video_duration_sec": self.input_file_video_duration_sec,
            "video_pipeline_timeout_lower_bound_sec": self.video_pipeline_timeout_lower_bound_sec,
            "input_number_of_speakers": self.input_number_of_speakers,
        });
        let obj = payload.as_object_mut().expect("payload is an object");
        if let Some(ref experiments) = self.experiments {
            obj.insert("experiments".into(), json!(experiments));
        }
        if let Some(ref subtitle) = self.input_file_source_language_subtitle {
            obj.insert("input_file_source_language_subtitle".into(), json!(subtitle));
        }
        payload
    }
}

/// Parameters for creating an export job.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub export_type: ExportType,
    pub project: String,
    pub target_language: String,
    pub lipsync: bool,
    pub watermark: bool,
    pub priority: u8,
    pub server_label: String,
    pub input_dictionary_url: Option<String>,
}

impl ExportRequest {
    pub fn new(
        export_type: ExportType,
        project: impl Into<String>,
        target_language: impl Into<String>,
    ) -> Self {
        Self {
            export_type,
            project: project.into(),
            target_language: target_language.into(),
            lipsync: false,
            watermark: true,
            priority: 1,
            server_label: String::new(),
            input_dictionary_url: None,
        }
    }

    fn to_payload(&self) -> Value {
        let mut payload = json!({
            "export_type": self.export_type.as_str(),
            "priority": self.priority,
            "server_label": self.server_label,
            "project": self.project,
            "target_language": self.target_language,
            "lipsync": self.lipsync,
            "watermark": self.watermark,
        });
        if let Some(ref dictionary) = self.input_dictionary_url {
            payload
                .as_object_mut()
                .expect("payload is an object")
                .insert("input_dictionary_url".into(), json!(dictionary));
        }
        payload
    }
}

/// One translation script segment: the original text is immutable, the
/// translated text is mutable via patch.
#[derive(Debug, Clone, Deserialize)]
pub struct TranslationScript {
    pub projectscript_id: String,
    #[serde(default)]
    pub text_original: Option<String>,
    #[serde(default)]
    pub text_translated: Option<String>,
}

/// Project details with its script segments.
#[derive(Debug, Clone, Deserialize)]
pub struct TranslationProject {
    pub project_id: String,
    #[serde(default)]
    pub scripts: Vec<TranslationScript>,
}

/// Select a script by server identifier or by zero-based index.
#[derive(Debug, Clone)]
pub enum ScriptSelector {
    Id(String),
    Index(usize),
}

/// Client for the video translation API.
pub struct VideoTranslator {
    transport: Arc<dyn Transport>,
    tasks: TaskClient,
}

impl VideoTranslator {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let tasks = TaskClient::new(Arc::clone(&transport));
        Self { transport, tasks }
    }

    /// Override the export poll cadence (tests use zero).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.tasks = self.tasks.with_poll_interval(interval);
        self
    }

    /// Create a translation project and return its identifier.
    pub fn create_project(&self, request: &ProjectRequest) -> PersoResult<String> {
        info!("Creating translation project for {}", request.input_file_url);
        let response = self
            .transport
            .post_json("/api/video_translator/v2/project/", &request.to_payload())?;
        if !response.is_success() {
            return Err(PersoError::TranslationProject {
                status: response.status,
                body: response.body,
            });
        }
        let data = response.json()?;
        let project_id = data
            .get("project_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PersoError::Payload("project response missing project_id".into()))?
            .to_string();
        info!("Project {} created", project_id);
        Ok(project_id)
    }

    /// Fetch project details, including its scripts.
    pub fn project(&self, project_id: &str) -> PersoResult<TranslationProject> {
        let response = self
            .transport
            .get(&format!("/api/video_translator/v2/project/{}/", project_id))?;
        if !response.is_success() {
            return Err(PersoError::TranslationProject {
                status: response.status,
                body: response.body,
            });
        }
        serde_json::from_str(&response.body)
            .map_err(|e| PersoError::Payload(format!("invalid project response: {}", e)))
    }

    /// Resolve a script selector against the project's script list.
    pub fn resolve_script(
        &self,
        project: &TranslationProject,
        selector: &ScriptSelector,
    ) -> PersoResult<String> {
        match selector {
            ScriptSelector::Id(id) => {
                if project.scripts.iter().any(|s| s.projectscript_id == *id) {
                    Ok(id.clone())
                } else {
                    Err(PersoError::Payload(format!(
                        "script {} not found in project {}",
                        id, project.project_id
                    )))
                }
            }
            ScriptSelector::Index(index) => project
                .scripts
                .get(*index)
                .map(|s| s.projectscript_id.clone())
                .ok_or_else(|| {
                    PersoError::Payload(format!(
                        "script index {} out of range (project has {} scripts)",
                        index,
                        project.scripts.len()
                    ))
                }),
        }
    }

    /// Patch the translated text of a script.
    pub fn modify_script(&self, script_id: &str, new_text: &str) -> PersoResult<()> {
        info!("Modifying script {}", script_id);
        let response = self.transport.patch_json(
            &format!("/api/video_translator/v2/script/{}/", script_id),
            &json!({ "text_translated": new_text }),
        )?;
        if !response.is_success() {
            return Err(PersoError::ScriptModify {
                script_id: script_id.to_string(),
                status: response.status,
                body: response.body,
            });
        }
        Ok(())
    }

    /// Regenerate the audio attached to a script. Must complete before any
    /// export that should reflect a text modification, because the export
    /// reads whatever audio is currently attached.
    pub fn generate_audio(&self, script_id: &str) -> PersoResult<()> {
        info!("Generating audio for script {}", script_id);
        let response = self.transport.post_empty(&format!(
            "/api/video_translator/v2/script/{}/generate_audio/",
            script_id
        ))?;
        if !response.is_success() {
            return Err(PersoError::AudioGeneration {
                script_id: script_id.to_string(),
                status: response.status,
                body: response.body,
            });
        }
        Ok(())
    }

    /// Create an export job and return its identifier (no polling yet).
    pub fn create_export(&self, request: &ExportRequest) -> PersoResult<String> {
        self.tasks
            .submit(&VIDEO_EXPORT, &TaskInput::Json(request.to_payload()))
    }

    /// Create an export job and poll it to completion.
    pub fn export(
        &self,
        request: &ExportRequest,
        deadline: Option<Duration>,
    ) -> PersoResult<TaskOutcome> {
        let export_id = self.create_export(request)?;
        info!(
            "Export {} created (project {}, target {})",
            export_id, request.project, request.target_language
        );
        self.tasks.poll(&VIDEO_EXPORT, &export_id, deadline)
    }

    /// Revision workflow: patch the translated text, regenerate its audio,
    /// then run a proofread export. Sequential, no rollback — a failure
    /// surfaces at the failing step and earlier steps stand.
    pub fn revise_script(
        &self,
        project_id: &str,
        selector: &ScriptSelector,
        new_text: &str,
        export: &ExportRequest,
        deadline: Option<Duration>,
    ) -> PersoResult<TaskOutcome> {
        let project = self.project(project_id)?;
        let script_id = self.resolve_script(&project, selector)?;

        self.modify_script(&script_id, new_text)?;
        self.generate_audio(&script_id)?;

        let request = ExportRequest {
            export_type: ExportType::Proofread,
            project: project_id.to_string(),
            ..export.clone()
        };
        self.export(&request, deadline)
    }
}

/// Extract a file name from a URL path, defaulting to `video.mp4`.
pub fn filename_from_url(url: &str) -> String {
    let path = url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(url)
        .split(['?', '#'])
        .next()
        .unwrap_or("");
    let name = path.rsplit('/').next().unwrap_or("");
    if name.is_empty() {
        "video.mp4".to_string()
    } else {
        name.to_string()
    }
}
