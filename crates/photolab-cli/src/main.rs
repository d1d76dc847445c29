use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use photolab_contracts::chat::{parse_intent, Intent, LAB_HELP_COMMANDS};
use photolab_contracts::credentials::{CredentialSlot, EnvCredentialSource};
use photolab_contracts::errors::{EnhanceError, SessionError};
use photolab_contracts::events::{new_session_id, EventWriter};
use photolab_contracts::images::{EncodedImage, SharedImage};
use photolab_contracts::modes::{AspectRatio, EnhancementConfig, ModeRegistry};
use photolab_contracts::prompt::build_prompt;
use photolab_contracts::session::{BoundingBox, SessionHistory};
use photolab_engine::input::load_image_reference;
use photolab_engine::{
    default_gateway_registry, EnhancementGateway, LabSession, LabSettings, PendingEnhancement,
};
use serde_json::{json, Value};

#[derive(Debug, Parser)]
#[command(name = "photolab", version, about = "TIsera Photo Lab: AI photo enhancement")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive lab shell.
    Lab(LabArgs),
    /// Enhance one image and write the result.
    Enhance(EnhanceArgs),
    /// Print the prompt a configuration would send.
    Prompt(PromptArgs),
    /// List enhancement modes.
    Modes(ModesArgs),
}

#[derive(Debug, Args)]
struct GatewayArgs {
    #[arg(long, default_value = "gemini")]
    gateway: String,
    #[arg(long)]
    api_base: Option<String>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    timeout: Option<f64>,
    #[arg(long)]
    modes: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct LabArgs {
    #[arg(long, default_value = "out")]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    history_capacity: Option<usize>,
    #[command(flatten)]
    gateway: GatewayArgs,
}

#[derive(Debug, Parser)]
struct EnhanceArgs {
    #[arg(long)]
    image: String,
    #[arg(long, default_value = "reconstruct")]
    mode: String,
    #[arg(long, default_value = "1:1")]
    ratio: String,
    #[arg(long, default_value = "")]
    note: String,
    #[arg(long, default_value = "out")]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    /// Also write the before/after comparison frame.
    #[arg(long)]
    compare: bool,
    #[command(flatten)]
    gateway: GatewayArgs,
}

#[derive(Debug, Parser)]
struct PromptArgs {
    #[arg(long, default_value = "reconstruct")]
    mode: String,
    #[arg(long, default_value = "1:1")]
    ratio: String,
    #[arg(long, default_value = "")]
    note: String,
    #[arg(long)]
    modes: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct ModesArgs {
    #[arg(long)]
    modes: Option<PathBuf>,
    #[arg(long)]
    json: bool,
}

const PROGRESS_TICK: Duration = Duration::from_millis(500);
const PROMPT_PREVIEW_CHARS: usize = 72;

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("photolab error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Lab(args) => {
            run_lab(args)?;
            Ok(0)
        }
        Command::Enhance(args) => run_enhance(args),
        Command::Prompt(args) => run_prompt(args),
        Command::Modes(args) => run_modes(args),
    }
}

fn resolve_settings(args: &GatewayArgs, history_capacity: Option<usize>) -> LabSettings {
    let mut settings = LabSettings::from_env();
    if let Some(api_base) = args.api_base.as_deref() {
        settings = settings.with_api_base(api_base);
    }
    if let Some(model) = args.model.as_deref().map(str::trim) {
        if !model.is_empty() {
            settings.model = model.to_string();
        }
    }
    if let Some(timeout) = args.timeout {
        settings = settings.with_request_timeout(timeout);
    }
    if let Some(capacity) = history_capacity {
        settings = settings.with_history_capacity(capacity);
    }
    if args.modes.is_some() {
        settings.modes_path = args.modes.clone();
    }
    settings
}

fn resolve_gateway(
    name: &str,
    settings: &LabSettings,
    credentials: Arc<CredentialSlot>,
) -> Result<Arc<dyn EnhancementGateway>> {
    let registry = default_gateway_registry(settings, credentials);
    registry.get(name).with_context(|| {
        format!(
            "unknown gateway '{}' (available: {})",
            name.trim(),
            registry.names().join(", ")
        )
    })
}

fn open_session(settings: &LabSettings, events_path: &Path) -> Result<LabSession> {
    let modes = settings.load_mode_registry()?;
    let mut session = LabSession::new(modes, settings.history_capacity);
    session.attach_events(EventWriter::new(events_path, new_session_id()))?;
    Ok(session)
}

fn load_registry(path: Option<PathBuf>) -> Result<ModeRegistry> {
    LabSettings {
        modes_path: path,
        ..LabSettings::default()
    }
    .load_mode_registry()
}

fn parse_ratio(raw: &str) -> Result<AspectRatio> {
    Ok(raw.parse::<AspectRatio>()?)
}

fn run_prompt(args: PromptArgs) -> Result<i32> {
    let modes = load_registry(args.modes)?;
    let config = EnhancementConfig::new(args.mode.as_str(), parse_ratio(&args.ratio)?);
    println!("{}", build_prompt(&modes, &config, &args.note)?);
    Ok(0)
}

fn run_modes(args: ModesArgs) -> Result<i32> {
    let modes = load_registry(args.modes)?;
    if args.json {
        let rows: Vec<&_> = modes.list().collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(0);
    }
    for mode in modes.list() {
        println!("{} {:<12} {}", mode.icon, mode.id, mode.label);
    }
    Ok(0)
}

fn run_enhance(args: EnhanceArgs) -> Result<i32> {
    let settings = resolve_settings(&args.gateway, None);
    let credentials = Arc::new(CredentialSlot::from_source(&EnvCredentialSource::default()));
    let gateway = resolve_gateway(&args.gateway.gateway, &settings, credentials)?;
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let mut session = open_session(&settings, &events_path)?;

    session.select_image(load_image_reference(&args.image)?)?;
    session.set_mode(&args.mode)?;
    session.set_aspect_ratio(parse_ratio(&args.ratio)?)?;
    session.set_note(&args.note)?;

    match run_with_progress(&mut session, &gateway) {
        Ok(_) => {}
        Err(SessionError::Enhance(err)) => {
            report_enhance_error(&err);
            return Ok(1);
        }
        Err(err) => return Err(err.into()),
    }

    let path = session.export_enhanced(&args.out)?;
    println!("Enhanced image written to {}", path.display());
    if args.compare {
        let path = session.export_comparison(&args.out)?;
        println!("Comparison written to {}", path.display());
    }
    Ok(0)
}

fn run_lab(args: LabArgs) -> Result<()> {
    let settings = resolve_settings(&args.gateway, args.history_capacity);
    let credentials = Arc::new(CredentialSlot::from_source(&EnvCredentialSource::default()));
    let gateway = resolve_gateway(&args.gateway.gateway, &settings, credentials.clone())?;
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let mut session = open_session(&settings, &events_path)?;

    let stdin = io::stdin();
    let mut line = String::new();

    println!(
        "TIsera Photo Lab ({} gateway). Type /help for commands.",
        gateway.name()
    );
    if gateway.name() == "gemini" {
        println!("API key: {}", credentials.state().as_str());
    }

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let intent = parse_intent(line.trim_end_matches(['\n', '\r']));
        if intent.action == "quit" {
            break;
        }
        if let Err(err) = dispatch(&mut session, &gateway, &credentials, &args.out, &intent) {
            match err.downcast_ref::<SessionError>() {
                Some(SessionError::Enhance(enhance)) => report_enhance_error(enhance),
                _ => println!("Error: {err:#}"),
            }
        }
    }

    println!("Session log: {}", events_path.display());
    Ok(())
}

fn dispatch(
    session: &mut LabSession,
    gateway: &Arc<dyn EnhancementGateway>,
    credentials: &CredentialSlot,
    out_dir: &Path,
    intent: &Intent,
) -> Result<()> {
    match intent.action.as_str() {
        "noop" => {}
        "help" => {
            println!("Commands: {}", LAB_HELP_COMMANDS.join(" "));
            println!("Any other text sets the note and enhances right away.");
        }
        "open_image" => {
            let Some(path) = non_empty_arg(intent, "path") else {
                bail!("/open requires a path");
            };
            let original = session.select_image(load_image_reference(path)?)?;
            println!(
                "Loaded {} ({} bytes, {})",
                path,
                original.byte_len(),
                original.mime_type()
            );
        }
        "set_mode" => match non_empty_arg(intent, "mode") {
            Some(mode) => {
                session.set_mode(mode)?;
                print_mode_line(session);
            }
            None => print_modes(session),
        },
        "set_ratio" => match non_empty_arg(intent, "ratio") {
            Some(raw) => {
                session.set_aspect_ratio(parse_ratio(raw)?)?;
                println!("Aspect ratio: {}", session.config().aspect_ratio);
            }
            None => {
                let options: Vec<&str> =
                    AspectRatio::ALL.iter().map(|ratio| ratio.as_str()).collect();
                println!(
                    "Aspect ratio: {} (options: {})",
                    session.config().aspect_ratio,
                    options.join(" ")
                );
            }
        },
        "set_note" => {
            session.set_note(intent.arg_str("note").unwrap_or_default())?;
            if session.note().is_empty() {
                println!("Note cleared");
            } else {
                println!("Note: {}", session.note());
            }
        }
        "set_credential" => {
            let Some(key) = non_empty_arg(intent, "key") else {
                bail!("/key requires a value");
            };
            credentials.replace(key)?;
            println!("API key replaced ({})", credentials.state().as_str());
        }
        "enhance" => {
            if let Some(note) = intent.note.as_deref() {
                session.set_note(note)?;
            }
            let enhanced = run_with_progress(session, gateway)?;
            println!(
                "Enhanced: {} bytes. History {}/{}. Divider at {:.0}%.",
                enhanced.byte_len(),
                session.history().len(),
                session.history().capacity(),
                session.slider().position()
            );
        }
        "readjust" => {
            session.readjust()?;
            println!("Back to the original. Adjust mode, ratio or note, then /enhance.");
        }
        "reset" => {
            session.reset()?;
            println!("Photo closed. History kept ({} entries).", session.history().len());
        }
        "clear_session" => {
            session.clear_session()?;
            println!("Session cleared.");
        }
        "history" => print_history(session),
        "select_history" => {
            let index = first_number(intent, "index").context("/select requires an entry number")?;
            if index < 1.0 || index.fract() != 0.0 {
                bail!("/select takes an entry number from /history");
            }
            let entry = session.select_history(index as usize - 1)?;
            println!(
                "Showing entry {} ({})",
                index as usize,
                truncate_text(entry.prompt_used(), PROMPT_PREVIEW_CHARS)
            );
        }
        "set_slider" => {
            let percent =
                first_number(intent, "position").context("/slider requires a percentage")?;
            let position = session.set_slider(percent)?;
            println!("Divider at {position:.0}%");
        }
        "pointer_move" => {
            let values = intent.arg_numbers("values");
            let [pointer_x, left, width] = values.as_slice() else {
                bail!("/pointer requires X LEFT WIDTH");
            };
            match session.pointer_move(*pointer_x, BoundingBox::new(*left, *width)) {
                Some(position) => println!("Divider at {position:.0}%"),
                None => println!("Pointer ignored"),
            }
        }
        "export" => {
            let dir = non_empty_arg(intent, "path")
                .map(PathBuf::from)
                .unwrap_or_else(|| out_dir.to_path_buf());
            let path = session.export_enhanced(&dir)?;
            println!("Saved {}", path.display());
        }
        "compare" => {
            let dir = non_empty_arg(intent, "path")
                .map(PathBuf::from)
                .unwrap_or_else(|| out_dir.to_path_buf());
            let path = session.export_comparison(&dir)?;
            println!("Saved {}", path.display());
        }
        "modes" => print_modes(session),
        "status" => print_status(session, gateway.as_ref(), credentials),
        "unknown" => {
            let command = intent.arg_str("command").unwrap_or_default();
            println!("Unknown command /{command}. Type /help.");
        }
        other => println!("Unsupported action: {other}"),
    }
    Ok(())
}

/// Runs the gateway call on a worker thread and settles the session with
/// its outcome, ticking progress while waiting.
fn run_with_progress(
    session: &mut LabSession,
    gateway: &Arc<dyn EnhancementGateway>,
) -> Result<SharedImage, SessionError> {
    let pending = session.begin_enhance()?;
    println!(
        "Enhancing ({}, {})...",
        session.config().mode,
        pending.aspect_ratio()
    );
    let outcome = await_worker(spawn_worker(gateway.clone(), pending.clone()));
    session.settle(pending, outcome)
}

fn spawn_worker(
    gateway: Arc<dyn EnhancementGateway>,
    pending: PendingEnhancement,
) -> mpsc::Receiver<Result<EncodedImage, EnhanceError>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(pending.run(gateway.as_ref()));
    });
    rx
}

fn await_worker(
    rx: mpsc::Receiver<Result<EncodedImage, EnhanceError>>,
) -> Result<EncodedImage, EnhanceError> {
    let started = Instant::now();
    loop {
        match rx.recv_timeout(PROGRESS_TICK) {
            Ok(outcome) => {
                println!();
                return outcome;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                print!(".");
                let _ = io::stdout().flush();
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                println!();
                return Err(EnhanceError::Transport(format!(
                    "enhancement worker stopped after {:.1}s",
                    started.elapsed().as_secs_f64()
                )));
            }
        }
    }
}

fn report_enhance_error(err: &EnhanceError) {
    println!("{}", err.user_message());
    println!("  ({err})");
    if err.offers_credential_reselect() {
        println!("  Use /key <API key> to select another key.");
    }
}

fn print_mode_line(session: &LabSession) {
    if let Some(mode) = session.modes().get(&session.config().mode) {
        println!("Mode: {} {} ({})", mode.icon, mode.label, mode.id);
    }
}

fn print_modes(session: &LabSession) {
    for mode in session.modes().list() {
        let marker = if mode.id == session.config().mode { "*" } else { " " };
        println!("{marker} {} {:<12} {}", mode.icon, mode.id, mode.label);
    }
}

fn print_history(session: &LabSession) {
    let history = session.history();
    if history.is_empty() {
        println!("History is empty.");
        return;
    }
    for (index, entry) in history.entries().iter().enumerate() {
        let marker = if SessionHistory::is_displayed(entry, session.view()) {
            "*"
        } else {
            " "
        };
        println!(
            "{marker} {:>2}. {} {}",
            index + 1,
            entry.created_at().format("%H:%M:%S"),
            truncate_text(entry.prompt_used(), PROMPT_PREVIEW_CHARS)
        );
    }
}

fn print_status(
    session: &LabSession,
    gateway: &dyn EnhancementGateway,
    credentials: &CredentialSlot,
) {
    let view = session.view();
    let status = json!({
        "gateway": gateway.name(),
        "credential": credentials.state().as_str(),
        "mode": session.config().mode,
        "aspect_ratio": session.config().aspect_ratio.as_str(),
        "note": session.note(),
        "image_loaded": view.original().is_some(),
        "enhanced": view.enhanced().is_some(),
        "processing": session.is_processing(),
        "divider": session
            .slider()
            .pair()
            .map(|_| json!(session.slider().position()))
            .unwrap_or(Value::Null),
        "history": format!("{}/{}", session.history().len(), session.history().capacity()),
        "last_error": session.last_error().map(|err| json!(err.kind())).unwrap_or(Value::Null),
        "session_id": session.events().map(|events| events.session_id().to_string()),
        "started_at": session.started_at().to_rfc3339(),
    });
    match serde_json::to_string_pretty(&status) {
        Ok(text) => println!("{text}"),
        Err(err) => println!("Status unavailable: {err}"),
    }
}

fn non_empty_arg<'a>(intent: &'a Intent, key: &str) -> Option<&'a str> {
    intent
        .arg_str(key)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn first_number(intent: &Intent, key: &str) -> Option<f64> {
    intent.arg_numbers(key).first().copied()
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use photolab_engine::DryrunGateway;

    use super::*;

    fn png_reference() -> anyhow::Result<String> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("seed.png");
        image::RgbImage::from_pixel(4, 3, image::Rgb([10, 20, 30])).save(&path)?;
        let image = load_image_reference(&path.to_string_lossy())?;
        Ok(image.to_data_uri())
    }

    fn lab() -> LabSession {
        LabSession::new(ModeRegistry::default(), 8)
    }

    #[test]
    fn dispatch_drives_a_dryrun_session() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let gateway: Arc<dyn EnhancementGateway> = Arc::new(DryrunGateway);
        let credentials = CredentialSlot::empty();
        let mut session = lab();
        let reference = png_reference()?;

        for line in [
            format!("/open {reference}"),
            "/mode resize".to_string(),
            "/ratio 16:9".to_string(),
            "más luz".to_string(),
            "/slider 25".to_string(),
            "/export".to_string(),
            "/compare".to_string(),
        ] {
            dispatch(&mut session, &gateway, &credentials, temp.path(), &parse_intent(&line))?;
        }

        assert_eq!(session.config().mode, "resize");
        assert_eq!(session.note(), "más luz");
        assert_eq!(session.history().len(), 1);
        assert!(session.history().entries()[0]
            .prompt_used()
            .ends_with(" Nota extra: más luz"));
        assert_eq!(session.slider().position(), 25.0);
        assert!(temp.path().join("tisera_final.png").is_file());
        assert!(temp.path().join("tisera_compare.png").is_file());
        Ok(())
    }

    #[test]
    fn dispatch_reports_usage_errors() {
        let gateway: Arc<dyn EnhancementGateway> = Arc::new(DryrunGateway);
        let credentials = CredentialSlot::empty();
        let mut session = lab();
        let out = Path::new("unused");
        for line in ["/enhance", "/select 0", "/pointer 1 2", "/mode sepia", "/open"] {
            assert!(
                dispatch(&mut session, &gateway, &credentials, out, &parse_intent(line)).is_err(),
                "{line} should fail"
            );
        }
        let unknown = parse_intent("/frobnicate");
        assert!(dispatch(&mut session, &gateway, &credentials, out, &unknown).is_ok());
    }

    #[test]
    fn key_command_replaces_credential() -> anyhow::Result<()> {
        let gateway: Arc<dyn EnhancementGateway> = Arc::new(DryrunGateway);
        let credentials = CredentialSlot::empty();
        let mut session = lab();
        dispatch(
            &mut session,
            &gateway,
            &credentials,
            Path::new("unused"),
            &parse_intent("/key AIzaSyExampleExampleExample00"),
        )?;
        assert_eq!(credentials.state().as_str(), "unverified");
        Ok(())
    }

    #[test]
    fn worker_outcome_is_delivered() -> anyhow::Result<()> {
        let gateway: Arc<dyn EnhancementGateway> = Arc::new(DryrunGateway);
        let mut session = lab();
        session.select_image(EncodedImage::from_data_uri(&png_reference()?)?)?;
        let enhanced = run_with_progress(&mut session, &gateway)?;
        assert!(!session.is_processing());
        assert_eq!(enhanced.mime_type(), "image/png");
        Ok(())
    }

    #[test]
    fn settings_flags_override_environment() {
        let args = GatewayArgs {
            gateway: "dryrun".to_string(),
            api_base: Some("http://127.0.0.1:1/v1beta/".to_string()),
            model: Some(" custom-model ".to_string()),
            timeout: Some(1000.0),
            modes: None,
        };
        let settings = resolve_settings(&args, Some(3));
        assert_eq!(settings.api_base, "http://127.0.0.1:1/v1beta");
        assert_eq!(settings.model, "custom-model");
        assert_eq!(settings.request_timeout_s, 300.0);
        assert_eq!(settings.history_capacity, 3);
    }

    #[test]
    fn unknown_gateway_is_rejected() {
        let err = resolve_gateway(
            "openai",
            &LabSettings::default(),
            Arc::new(CredentialSlot::empty()),
        )
        .err()
        .map(|err| err.to_string())
        .unwrap_or_default();
        assert!(err.contains("dryrun, gemini"));
    }
}
