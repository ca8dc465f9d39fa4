//! End-to-end client behavior against an in-memory transport fake.
//!
//! Note: nothing here touches the network or audio hardware.

use perso_live::{
    stf_request, tts_request, ExportRequest, ExportType, FileSource, PersoError, ScriptSelector,
    Session, SessionConfig, SessionStatus, StreamBody, TaskClient, TaskInput, Transport,
    VideoTranslator, STF, TTS, VIDEO_EXPORT,
};
use perso_live::{FormFilePart, HttpResponse};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted transport: responses are consumed in call order, every request is
/// logged as "METHOD path".
#[derive(Default)]
struct FakeTransport {
    responses: Mutex<VecDeque<HttpResponse>>,
    streams: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<String>>,
    /// Multipart submissions: (data fields, file part field name if any).
    forms: Mutex<Vec<(Vec<(String, String)>, Option<String>)>>,
}

impl FakeTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, status: u16, body: impl Into<String>) {
        self.responses.lock().unwrap().push_back(HttpResponse {
            status,
            body: body.into(),
        });
    }

    fn push_json(&self, status: u16, body: Value) {
        self.push(status, body.to_string());
    }

    fn push_stream(&self, body: impl Into<String>) {
        self.streams.lock().unwrap().push_back(body.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn forms(&self) -> Vec<(Vec<(String, String)>, Option<String>)> {
        self.forms.lock().unwrap().clone()
    }

    fn record_and_pop(&self, method: &str, path: &str) -> HttpResponse {
        self.calls.lock().unwrap().push(format!("{} {}", method, path));
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(HttpResponse {
                status: 500,
                body: "unscripted request".into(),
            })
    }
}

impl Transport for FakeTransport {
    fn get(&self, path: &str) -> perso_live::PersoResult<HttpResponse> {
        Ok(self.record_and_pop("GET", path))
    }

    fn get_unbounded(&self, path: &str) -> perso_live::PersoResult<HttpResponse> {
        Ok(self.record_and_pop("GET", path))
    }

    fn post_json(&self, path: &str, _body: &Value) -> perso_live::PersoResult<HttpResponse> {
        Ok(self.record_and_pop("POST", path))
    }

    fn patch_json(&self, path: &str, _body: &Value) -> perso_live::PersoResult<HttpResponse> {
        Ok(self.record_and_pop("PATCH", path))
    }

    fn post_empty(&self, path: &str) -> perso_live::PersoResult<HttpResponse> {
        Ok(self.record_and_pop("POST", path))
    }

    fn post_form(
        &self,
        path: &str,
        fields: &[(String, String)],
        file: Option<&FormFilePart>,
    ) -> perso_live::PersoResult<HttpResponse> {
        self.forms
            .lock()
            .unwrap()
            .push((fields.to_vec(), file.map(|part| part.field.clone())));
        Ok(self.record_and_pop("POST", path))
    }

    fn post_stream(&self, path: &str, _body: &Value) -> perso_live::PersoResult<StreamBody> {
        self.calls.lock().unwrap().push(format!("POST {}", path));
        match self.streams.lock().unwrap().pop_front() {
            Some(body) => Ok(StreamBody::Open(Box::new(Cursor::new(body.into_bytes())))),
            None => Ok(StreamBody::Refused(HttpResponse {
                status: 500,
                body: "unscripted stream".into(),
            })),
        }
    }
}

fn started_session(transport: &Arc<FakeTransport>) -> Session {
    transport.push_json(201, json!({ "session_id": "sess-1" }));
    transport.push_json(201, json!({}));
    let mut session = Session::new(Arc::clone(transport) as Arc<dyn Transport>);
    session.create(&SessionConfig::default()).unwrap();
    session.start().unwrap();
    session
}

#[test]
fn operations_before_start_fail_locally_without_network() {
    let transport = FakeTransport::new();
    let mut session = Session::new(Arc::clone(&transport) as Arc<dyn Transport>);

    assert!(matches!(
        session.chat_text("hi", |_| {}),
        Err(PersoError::SessionNotStarted)
    ));
    assert!(matches!(
        session.synthesize_speech("hi", None),
        Err(PersoError::SessionNotStarted)
    ));
    assert!(matches!(
        session.recognize_speech(Path::new("voice.wav"), "ko"),
        Err(PersoError::SessionNotStarted)
    ));
    assert!(transport.calls().is_empty());
}

#[test]
fn create_failure_leaves_state_uncreated() {
    let transport = FakeTransport::new();
    transport.push(403, "forbidden");
    let mut session = Session::new(Arc::clone(&transport) as Arc<dyn Transport>);

    let err = session.create(&SessionConfig::default()).unwrap_err();
    assert!(matches!(err, PersoError::SessionCreation { status: 403, .. }));
    assert_eq!(session.state(), perso_live::SessionState::Uncreated);
    assert!(session.session_id().is_none());
}

#[test]
fn start_before_create_fails() {
    let transport = FakeTransport::new();
    let mut session = Session::new(Arc::clone(&transport) as Arc<dyn Transport>);
    assert!(matches!(session.start(), Err(PersoError::SessionNotReady)));
    assert!(transport.calls().is_empty());
}

#[test]
fn chat_assembles_stream_and_updates_history() {
    let transport = FakeTransport::new();
    let mut session = started_session(&transport);

    transport.push_stream(
        "data: {\"status\":\"success\",\"sentence\":\"Hi\"}\n\
         data: {\"status\":\"success\",\"sentence\":\" there\"}\n",
    );

    let mut fragments = Vec::new();
    let reply = session
        .chat_text("hello", |f| fragments.push(f.to_string()))
        .unwrap();

    assert_eq!(reply, "Hi there");
    assert_eq!(fragments, vec!["Hi", " there"]);

    let history = session.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].content, "hello");
    assert!(matches!(history[1].role, perso_live::ChatRole::Ai));
    assert_eq!(history[1].content, "Hi there");
}

#[test]
fn chat_refusal_is_a_chat_request_error() {
    let transport = FakeTransport::new();
    let mut session = started_session(&transport);
    // No stream scripted: the fake refuses with a 500.
    let err = session.chat_text("hello", |_| {}).unwrap_err();
    assert!(matches!(err, PersoError::ChatRequest { status: 500, .. }));
}

#[test]
fn wait_until_ready_detects_termination() {
    let transport = FakeTransport::new();
    let session = started_session(&transport);

    transport.push_json(200, json!({ "status": "TERMINATED" }));
    assert!(matches!(
        session.wait_until_ready(Duration::from_secs(5)),
        Err(PersoError::SessionTerminated)
    ));
}

#[test]
fn wait_until_ready_times_out() {
    let transport = FakeTransport::new();
    let session = started_session(&transport);

    transport.push_json(200, json!({ "status": "STARTING" }));
    assert!(matches!(
        session.wait_until_ready(Duration::ZERO),
        Err(PersoError::SessionTimeout(_))
    ));
}

#[test]
fn recognize_speech_reconciles_server_truth_first() {
    let transport = FakeTransport::new();
    let mut session = started_session(&transport);
    let before = transport.calls().len();

    transport.push_json(200, json!({ "status": "TERMINATED" }));
    let err = session
        .recognize_speech(Path::new("voice.wav"), "ko")
        .unwrap_err();
    assert!(matches!(err, PersoError::SessionTerminated));

    // Only the status GET went out; the upload was never attempted.
    let calls = transport.calls();
    assert_eq!(calls.len(), before + 1);
    assert!(calls.last().unwrap().starts_with("GET /api/v1/session/"));
}

#[test]
fn recognize_speech_uploads_when_in_progress() {
    let transport = FakeTransport::new();
    let mut session = started_session(&transport);

    transport.push_json(200, json!({ "status": "IN_PROGRESS" }));
    transport.push_json(200, json!({ "text": "hello world" }));
    let text = session
        .recognize_speech(Path::new("voice.wav"), "ko")
        .unwrap();
    assert_eq!(text, "hello world");
    assert!(transport
        .calls()
        .last()
        .unwrap()
        .ends_with("/stt/"));
}

#[test]
fn synthesize_speech_decodes_base64_and_saves() {
    let transport = FakeTransport::new();
    let session = started_session(&transport);

    // "RIFF" base64-encoded.
    transport.push_json(200, json!({ "audio": "UklGRg==" }));
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("reply.wav");
    let audio = session.synthesize_speech("hi", Some(&dest)).unwrap();
    assert_eq!(audio, b"RIFF");
    assert_eq!(std::fs::read(&dest).unwrap(), b"RIFF");
}

#[test]
fn end_twice_is_idempotent() {
    let transport = FakeTransport::new();
    let mut session = started_session(&transport);

    transport.push_json(201, json!({}));
    session.end().unwrap();
    assert_eq!(session.state(), perso_live::SessionState::Ended);

    // Second end: no request, no error.
    let before = transport.calls().len();
    session.end().unwrap();
    assert_eq!(session.state(), perso_live::SessionState::Ended);
    assert_eq!(transport.calls().len(), before);
}

#[test]
fn get_status_maps_server_strings() {
    let transport = FakeTransport::new();
    let session = started_session(&transport);

    transport.push_json(200, json!({ "status": "IN_PROGRESS" }));
    assert_eq!(session.status().unwrap(), SessionStatus::InProgress);

    transport.push_json(200, json!({ "status": "PROCESSING" }));
    assert_eq!(
        session.status().unwrap(),
        SessionStatus::Other("PROCESSING".into())
    );
}

#[test]
fn submit_without_id_fails_before_any_poll() {
    let transport = FakeTransport::new();
    let tasks = TaskClient::new(Arc::clone(&transport) as Arc<dyn Transport>)
        .with_poll_interval(Duration::ZERO);

    transport.push_json(201, json!({ "detail": "accepted" }));
    let err = tasks
        .run(&TTS, &tts_request("1", "yuri", "wav_16bit_32000hz_mono", &["hi".into()]), None)
        .unwrap_err();

    assert!(matches!(err, PersoError::JobSubmission { task: "TTS", .. }));
    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].starts_with("POST"));
}

#[test]
fn poller_returns_output_from_the_terminal_response() {
    let transport = FakeTransport::new();
    let tasks = TaskClient::new(Arc::clone(&transport) as Arc<dyn Transport>)
        .with_poll_interval(Duration::ZERO);

    transport.push_json(201, json!({ "task_id": "t-1" }));
    transport.push_json(200, json!({ "status": "PENDING" }));
    transport.push_json(200, json!({ "status": "PENDING" }));
    transport.push_json(
        200,
        json!({ "status": "COMPLETED", "tts_output_audio": "http://x/a.wav" }),
    );

    let outcome = tasks
        .run(&TTS, &tts_request("1", "yuri", "wav_16bit_32000hz_mono", &["hello".into()]), None)
        .unwrap();

    assert_eq!(outcome.id, "t-1");
    assert_eq!(outcome.output("tts_output_audio"), Some("http://x/a.wav"));

    // One submit plus exactly three status polls (two intervening sleeps).
    let calls = transport.calls();
    assert_eq!(calls.len(), 4);
    assert_eq!(calls[1], "GET /api/studio/v1/task/tts/t-1/");
    assert_eq!(calls[3], "GET /api/studio/v1/task/tts/t-1/");
}

#[test]
fn failed_job_without_reason_reports_unknown_error() {
    let transport = FakeTransport::new();
    let tasks = TaskClient::new(Arc::clone(&transport) as Arc<dyn Transport>)
        .with_poll_interval(Duration::ZERO);

    transport.push_json(201, json!({ "task_id": "t-2" }));
    transport.push_json(200, json!({ "status": "FAILED" }));

    let err = tasks
        .run(&STF, &TaskInput::Json(json!({})), None)
        .unwrap_err();
    match err {
        PersoError::JobFailed { reason, .. } => assert!(reason.contains("Unknown error")),
        other => panic!("expected JobFailed, got {}", other),
    }
}

#[test]
fn failed_job_prefers_explicit_failure_reason() {
    let transport = FakeTransport::new();
    let tasks = TaskClient::new(Arc::clone(&transport) as Arc<dyn Transport>)
        .with_poll_interval(Duration::ZERO);

    transport.push_json(201, json!({ "task_id": "t-3" }));
    transport.push_json(
        200,
        json!({ "status": "FAILED", "failure_reason": "voice not found" }),
    );

    let err = tasks
        .run(&TTS, &TaskInput::Json(json!({})), None)
        .unwrap_err();
    match err {
        PersoError::JobFailed { reason, .. } => assert_eq!(reason, "voice not found"),
        other => panic!("expected JobFailed, got {}", other),
    }
}

#[test]
fn url_file_inputs_are_submitted_as_data_fields() {
    let transport = FakeTransport::new();
    let tasks = TaskClient::new(Arc::clone(&transport) as Arc<dyn Transport>)
        .with_poll_interval(Duration::ZERO);

    transport.push_json(201, json!({ "task_id": "t-5" }));
    transport.push_json(
        200,
        json!({ "status": "COMPLETED", "stf_output_video": "http://x/v.mp4" }),
    );

    let input = stf_request(
        "1",
        "yuri-front_natural",
        FileSource::Url("http://x/audio.wav".into()),
    );
    let outcome = tasks.run(&STF, &input, None).unwrap();
    assert_eq!(outcome.first_output(), Some("http://x/v.mp4"));

    // The URL goes out as a plain data field with the `_url` suffix, not as
    // a file part.
    let forms = transport.forms();
    assert_eq!(forms.len(), 1);
    let (fields, file) = &forms[0];
    assert!(file.is_none());
    assert!(fields.contains(&(
        "stf_input_audio_url".to_string(),
        "http://x/audio.wav".to_string()
    )));
    assert!(fields.contains(&(
        "stf_model_style".to_string(),
        "yuri-front_natural".to_string()
    )));
}

#[test]
fn export_outputs_keep_declaration_order() {
    let transport = FakeTransport::new();
    let tasks = TaskClient::new(Arc::clone(&transport) as Arc<dyn Transport>)
        .with_poll_interval(Duration::ZERO);

    transport.push_json(
        200,
        json!({
            "status": "COMPLETED",
            "video_output_video_without_lipsync": "http://x/plain.mp4",
            "video_output_video_with_lipsync": "http://x/lipsync.mp4"
        }),
    );

    let outcome = tasks.poll(&VIDEO_EXPORT, "pvte-9", None).unwrap();
    assert_eq!(outcome.first_output(), Some("http://x/lipsync.mp4"));
    assert_eq!(
        outcome.output("video_output_video_without_lipsync"),
        Some("http://x/plain.mp4")
    );
}

#[test]
fn poll_deadline_is_opt_in() {
    let transport = FakeTransport::new();
    let tasks = TaskClient::new(Arc::clone(&transport) as Arc<dyn Transport>)
        .with_poll_interval(Duration::ZERO);

    transport.push_json(200, json!({ "status": "PENDING" }));
    let err = tasks.poll(&TTS, "t-4", Some(Duration::ZERO)).unwrap_err();
    assert!(matches!(err, PersoError::PollDeadlineExceeded { .. }));
}

#[test]
fn revision_workflow_runs_patch_regenerate_export_in_order() {
    let transport = FakeTransport::new();
    let translator = VideoTranslator::new(Arc::clone(&transport) as Arc<dyn Transport>)
        .with_poll_interval(Duration::ZERO);

    transport.push_json(
        200,
        json!({
            "project_id": "pvtp-1",
            "scripts": [
                { "projectscript_id": "pvts-a", "text_translated": "old" },
                { "projectscript_id": "pvts-b", "text_translated": "other" }
            ]
        }),
    );
    transport.push_json(200, json!({})); // patch
    transport.push_json(200, json!({})); // generate_audio
    transport.push_json(201, json!({ "projectexport_id": "pvte-1" }));
    transport.push_json(
        200,
        json!({
            "status": "COMPLETED",
            "video_output_video_with_lipsync": "http://x/lipsync.mp4"
        }),
    );

    let export = ExportRequest::new(ExportType::Proofread, "pvtp-1", "en");
    let outcome = translator
        .revise_script("pvtp-1", &ScriptSelector::Index(0), "new text", &export, None)
        .unwrap();

    assert_eq!(
        outcome.output("video_output_video_with_lipsync"),
        Some("http://x/lipsync.mp4")
    );
    let calls = transport.calls();
    assert_eq!(calls[0], "GET /api/video_translator/v2/project/pvtp-1/");
    assert_eq!(calls[1], "PATCH /api/video_translator/v2/script/pvts-a/");
    assert_eq!(
        calls[2],
        "POST /api/video_translator/v2/script/pvts-a/generate_audio/"
    );
    assert_eq!(calls[3], "POST /api/video_translator/v2/export/");
}

#[test]
fn revision_stops_at_the_failing_step() {
    let transport = FakeTransport::new();
    let translator = VideoTranslator::new(Arc::clone(&transport) as Arc<dyn Transport>)
        .with_poll_interval(Duration::ZERO);

    transport.push_json(
        200,
        json!({
            "project_id": "pvtp-1",
            "scripts": [{ "projectscript_id": "pvts-a" }]
        }),
    );
    transport.push_json(200, json!({})); // patch succeeds
    transport.push(502, "regeneration backend down");

    let export = ExportRequest::new(ExportType::Proofread, "pvtp-1", "en");
    let err = translator
        .revise_script("pvtp-1", &ScriptSelector::Id("pvts-a".into()), "x", &export, None)
        .unwrap_err();

    assert!(matches!(
        err,
        PersoError::AudioGeneration { status: 502, .. }
    ));
    // No export was attempted after the failing step.
    assert!(!transport
        .calls()
        .iter()
        .any(|c| c.ends_with("/export/")));
}

#[test]
fn unknown_script_selector_fails_before_any_mutation() {
    let transport = FakeTransport::new();
    let translator = VideoTranslator::new(Arc::clone(&transport) as Arc<dyn Transport>);

    transport.push_json(
        200,
        json!({ "project_id": "pvtp-1", "scripts": [{ "projectscript_id": "pvts-a" }] }),
    );
    let export = ExportRequest::new(ExportType::Proofread, "pvtp-1", "en");
    let err = translator
        .revise_script("pvtp-1", &ScriptSelector::Index(5), "x", &export, None)
        .unwrap_err();
    assert!(matches!(err, PersoError::Payload(_)));
    assert_eq!(transport.calls().len(), 1);
}
