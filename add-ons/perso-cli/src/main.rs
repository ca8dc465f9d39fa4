//! Perso Live command line client
//!
//! Interactive avatar chat over a live session (text or voice turns), plus
//! one-shot drivers for the asynchronous studio and video-translation jobs.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use perso_live::{
    available_settings, browser_visualization, photo_avatar_request, stf_request, tts_request,
    Capability, ClientConfig, ExportRequest, ExportType, FileSource, HttpTransport, Playback,
    ProjectRequest, Recorder, ScriptSelector, Session, SessionConfig, TaskClient, Transport,
    VideoTranslator, DEFAULT_API_SERVER, PHOTO_AVATAR, STF, TTS,
};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "perso-cli", about = "Perso Live avatar and media generation client", version)]
struct Cli {
    /// API server base URL.
    #[arg(long, global = true, default_value = DEFAULT_API_SERVER)]
    api_server: String,

    /// API key; falls back to the EST_LIVE_API_KEY environment variable.
    #[arg(long, global = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive chat session with an avatar (type /voice for a voice turn).
    Chat(ChatArgs),
    /// Synthesize speech via a studio TTS job.
    Tts(TtsArgs),
    /// Generate a speech-to-face video via a studio STF job.
    Stf(StfArgs),
    /// Animate a photo into an avatar video.
    PhotoAvatar(PhotoAvatarArgs),
    /// Create a video translation project and run its first export.
    Translate(TranslateArgs),
    /// Revise a translated script and re-export the project.
    Revise(ReviseArgs),
    /// List the available options for a settings category.
    Settings(SettingsArgs),
}

#[derive(Args)]
struct ChatArgs {
    /// LLM backend for the session.
    #[arg(long, default_value = "gpt-4o")]
    llm_type: String,
    /// TTS voice for the session.
    #[arg(long, default_value = "yuri")]
    tts_type: String,
    /// Avatar model style.
    #[arg(long, default_value = "yuri-front_natural")]
    model_style: String,
    /// System prompt for the avatar.
    #[arg(long, default_value = "You are a helpful assistant.")]
    prompt: String,
    /// Capabilities to request, comma separated: LLM, TTS, STT, STF_WEBRTC.
    #[arg(long, value_delimiter = ',', default_value = "LLM,TTS,STT")]
    capability: Vec<Capability>,
    /// Document reference for grounding the avatar.
    #[arg(long)]
    document: Option<String>,
    /// Background image reference.
    #[arg(long)]
    background_image: Option<String>,
    /// STT backend for voice turns.
    #[arg(long)]
    stt_type: Option<String>,
    /// STT language for voice turns.
    #[arg(long, default_value = "ko")]
    language: String,
    /// How long to wait for the session to come up.
    #[arg(long, default_value_t = 60)]
    ready_timeout_secs: u64,
    /// Speak replies aloud instead of text-only.
    #[arg(long)]
    speak: bool,
    /// Print instructions for the browser WebRTC visualization and exit.
    #[arg(long)]
    browser: bool,
}

impl ChatArgs {
    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            llm_type: self.llm_type.clone(),
            tts_type: self.tts_type.clone(),
            model_style: self.model_style.clone(),
            prompt: self.prompt.clone(),
            document: self.document.clone(),
            background_image: self.background_image.clone(),
            capability: self.capability.clone(),
            stt_type: self.stt_type.clone(),
            agent: None,
        }
    }
}

#[derive(Args)]
struct TtsArgs {
    /// Text to synthesize; repeatable for multiple segments.
    #[arg(required = true)]
    text: Vec<String>,
    #[arg(long, default_value = "1")]
    agent: String,
    #[arg(long, default_value = "yuri")]
    tts_type: String,
    #[arg(long, default_value = "wav_16bit_32000hz_mono")]
    audio_format: String,
    /// Download the output audio to this path.
    #[arg(long)]
    output: Option<PathBuf>,
    #[command(flatten)]
    poll: PollArgs,
}

#[derive(Args)]
struct StfArgs {
    /// Input audio: a local file path or a public URL.
    audio: String,
    #[arg(long, default_value = "1")]
    agent: String,
    #[arg(long, default_value = "yuri-front_natural")]
    model_style: String,
    /// Download the output video to this path.
    #[arg(long)]
    output: Option<PathBuf>,
    #[command(flatten)]
    poll: PollArgs,
}

#[derive(Args)]
struct PhotoAvatarArgs {
    /// Input image: a local file path or a public URL.
    image: String,
    #[arg(long, default_value = "1")]
    agent: String,
    #[arg(long, default_value = "photoavatar_default")]
    model_style: String,
    /// Download the output video to this path.
    #[arg(long)]
    output: Option<PathBuf>,
    #[command(flatten)]
    poll: PollArgs,
}

#[derive(Args)]
struct TranslateArgs {
    /// Public URL of the input video.
    video_url: String,
    #[arg(long, default_value = "ko")]
    source_language: String,
    #[arg(long, default_value = "en")]
    target_language: String,
    /// Render with lipsync.
    #[arg(long)]
    lipsync: bool,
    /// Render without the watermark.
    #[arg(long)]
    no_watermark: bool,
    /// Download the output video to this path.
    #[arg(long)]
    output: Option<PathBuf>,
    #[command(flatten)]
    poll: PollArgs,
}

#[derive(Args)]
struct ReviseArgs {
    /// Translation project identifier.
    project_id: String,
    /// New translated text for the selected script.
    new_text: String,
    /// Script identifier; mutually exclusive with --index.
    #[arg(long, conflicts_with = "index")]
    script_id: Option<String>,
    /// Zero-based script index.
    #[arg(long)]
    index: Option<usize>,
    #[arg(long, default_value = "en")]
    target_language: String,
    #[arg(long)]
    lipsync: bool,
    /// Render without the watermark.
    #[arg(long)]
    no_watermark: bool,
    /// Download the re-exported video to this path.
    #[arg(long)]
    output: Option<PathBuf>,
    #[command(flatten)]
    poll: PollArgs,
}

#[derive(Args)]
struct SettingsArgs {
    /// Category to list: llm_type, tts_type, modelstyle, stt_type, ...
    setting_type: String,
}

#[derive(Args)]
struct PollArgs {
    /// Give up polling after this many seconds (unbounded when omitted).
    #[arg(long)]
    deadline_secs: Option<u64>,
}

impl PollArgs {
    fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!(".env not loaded: {}", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = ClientConfig::from_env(cli.api_server.clone(), cli.api_key.clone())?;
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(config)?);

    match cli.command {
        Command::Chat(args) => run_chat(transport, &cli.api_server, args),
        Command::Tts(args) => run_tts(transport, args),
        Command::Stf(args) => run_stf(transport, args),
        Command::PhotoAvatar(args) => run_photo_avatar(transport, args),
        Command::Translate(args) => run_translate(transport, args),
        Command::Revise(args) => run_revise(transport, args),
        Command::Settings(args) => run_settings(transport, args),
    }
}

fn run_chat(transport: Arc<dyn Transport>, api_server: &str, args: ChatArgs) -> Result<()> {
    if args.browser {
        let info = browser_visualization(api_server);
        println!("Browser visualization (real-time WebRTC avatar):");
        println!("  API server: {}", info.api_server);
        println!("  SDK docs:   {}", info.sdk_docs);
        println!("  {}", info.instructions);
        return Ok(());
    }

    let session_config = args.session_config();

    let mut session = Session::new(Arc::clone(&transport));
    session.create(&session_config)?;
    session.start()?;
    session.wait_until_ready(Duration::from_secs(args.ready_timeout_secs))?;

    let playback = if args.speak { Some(Playback::new()?) } else { None };
    println!("Session ready. Type a message, /voice for a voice turn, /quit to exit.");

    let result = chat_loop(&mut session, playback.as_ref(), &args.language);
    // Always try to end the session, even when the loop failed.
    if let Err(e) = session.end() {
        tracing::warn!("Failed to end session: {}", e);
    }
    result
}

fn chat_loop(session: &mut Session, playback: Option<&Playback>, language: &str) -> Result<()> {
    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            return Ok(());
        }
        let line = line.trim();

        let message = match line {
            "" => continue,
            "/quit" | "/exit" => return Ok(()),
            "/status" => {
                println!("Session status: {}", session.status()?.as_str());
                continue;
            }
            "/voice" => match voice_turn(session, language)? {
                Some(text) => text,
                None => continue,
            },
            text => text.to_string(),
        };

        print!("avatar: ");
        std::io::stdout().flush()?;
        let reply = session.chat_text(&message, |fragment| {
            print!("{}", fragment);
            let _ = std::io::stdout().flush();
        })?;
        println!();

        if let Some(playback) = playback {
            let audio = session.synthesize_speech(&reply, None)?;
            playback.play_bytes(&audio)?;
            playback.wait();
        }
    }
}

/// Record from the microphone until Enter, then transcribe.
fn voice_turn(session: &mut Session, language: &str) -> Result<Option<String>> {
    let mut recorder = Recorder::new();
    recorder.start()?;
    println!("Recording... press Enter to stop.");
    let mut discard = String::new();
    std::io::stdin().read_line(&mut discard)?;

    let wav = recorder.stop()?;
    if wav.is_empty() {
        println!("No audio captured.");
        return Ok(None);
    }

    let dir = std::env::temp_dir();
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("perso-voice-{}.wav", stamp));
    std::fs::write(&path, &wav)?;
    let text = session.recognize_speech(&path, language);
    let _ = std::fs::remove_file(&path);

    let text = text?;
    println!("you (voice): {}", text);
    Ok(Some(text))
}

fn run_tts(transport: Arc<dyn Transport>, args: TtsArgs) -> Result<()> {
    let tasks = TaskClient::new(transport);
    let input = tts_request(&args.agent, &args.tts_type, &args.audio_format, &args.text);
    let outcome = tasks.run(&TTS, &input, args.poll.deadline())?;
    finish_job("audio", outcome.first_output(), args.output.as_deref())
}

fn run_stf(transport: Arc<dyn Transport>, args: StfArgs) -> Result<()> {
    let tasks = TaskClient::new(transport);
    let input = stf_request(&args.agent, &args.model_style, file_source(&args.audio));
    let outcome = tasks.run(&STF, &input, args.poll.deadline())?;
    finish_job("video", outcome.first_output(), args.output.as_deref())
}

fn run_photo_avatar(transport: Arc<dyn Transport>, args: PhotoAvatarArgs) -> Result<()> {
    let tasks = TaskClient::new(transport);
    let input = photo_avatar_request(&args.agent, &args.model_style, file_source(&args.image));
    let outcome = tasks.run(&PHOTO_AVATAR, &input, args.poll.deadline())?;
    finish_job("video", outcome.first_output(), args.output.as_deref())
}

fn run_translate(transport: Arc<dyn Transport>, args: TranslateArgs) -> Result<()> {
    let translator = VideoTranslator::new(transport);
    let project = ProjectRequest::new(&args.video_url, &args.source_language);
    let project_id = translator.create_project(&project)?;
    println!("Project created: {}", project_id);

    let mut export = ExportRequest::new(ExportType::Initial, &project_id, &args.target_language);
    export.lipsync = args.lipsync;
    export.watermark = !args.no_watermark;
    let outcome = translator.export(&export, args.poll.deadline())?;
    finish_job("video", outcome.first_output(), args.output.as_deref())
}

fn run_revise(transport: Arc<dyn Transport>, args: ReviseArgs) -> Result<()> {
    let selector = match (args.script_id, args.index) {
        (Some(id), _) => ScriptSelector::Id(id),
        (None, Some(index)) => ScriptSelector::Index(index),
        (None, None) => bail!("pass --script-id or --index to select a script"),
    };

    let translator = VideoTranslator::new(transport);
    let mut export = ExportRequest::new(
        ExportType::Proofread,
        &args.project_id,
        &args.target_language,
    );
    export.lipsync = args.lipsync;
    export.watermark = !args.no_watermark;
    let outcome = translator.revise_script(
        &args.project_id,
        &selector,
        &args.new_text,
        &export,
        args.poll.deadline(),
    )?;
    finish_job("video", outcome.first_output(), args.output.as_deref())
}

fn run_settings(transport: Arc<dyn Transport>, args: SettingsArgs) -> Result<()> {
    let options = available_settings(transport.as_ref(), &args.setting_type)?;
    for option in options {
        match option.as_str() {
            Some(name) => println!("{}", name),
            None => println!("{}", serde_json::to_string(&option)?),
        }
    }
    Ok(())
}

/// Print the output artifact URL and optionally download it.
fn finish_job(label: &str, url: Option<&str>, output: Option<&Path>) -> Result<()> {
    let url = url.with_context(|| format!("job completed but returned no output {}", label))?;
    println!("Output {}: {}", label, url);
    if let Some(dest) = output {
        download_file(url, dest)?;
        println!("Saved to {}", dest.display());
    }
    Ok(())
}

fn file_source(input: &str) -> FileSource {
    if input.starts_with("http://") || input.starts_with("https://") {
        FileSource::Url(input.to_string())
    } else {
        FileSource::Path(PathBuf::from(input))
    }
}

fn download_file(url: &str, dest: &Path) -> Result<()> {
    let response = reqwest::blocking::get(url)
        .with_context(|| format!("failed to download {}", url))?;
    if !response.status().is_success() {
        bail!("download of {} failed: {}", url, response.status());
    }
    let bytes = response.bytes()?;
    std::fs::write(dest, &bytes)?;
    Ok(())
}
