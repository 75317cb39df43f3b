use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::{Parser, Subcommand};
use ethereal_contracts::chat::display_text;
use ethereal_contracts::events::SessionLog;
use ethereal_contracts::session::{download_file_name, ConversationState, ImageHandle, Phase};
use ethereal_engine::{
    default_backend_registry, ConsultantSession, Credential, CredentialStore, EngineConfig,
    ImageOutcome, SessionError, StudioBackend, TurnOutcome,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

mod repl;

use repl::{parse_line, ReplCommand, HELP_COMMANDS};

#[derive(Debug, Parser)]
#[command(name = "ethereal", version, about = "AI wedding photography consultant")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start an interactive consultation.
    Chat(ChatArgs),
    /// Manage the stored Gemini API key.
    Key(KeyArgs),
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long, default_value = "gemini")]
    backend: String,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    text_model: Option<String>,
    #[arg(long)]
    image_model: Option<String>,
}

#[derive(Debug, Parser)]
struct KeyArgs {
    #[command(subcommand)]
    action: KeyAction,
}

#[derive(Debug, Subcommand)]
enum KeyAction {
    Set { value: String },
    Clear,
    Status,
}

// The offline backend still goes through the credential gate.
const DRYRUN_CREDENTIAL: &str = "dryrun";

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("ethereal error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ethereal=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Key(args) => run_key(args),
    }
}

fn run_key(args: KeyArgs) -> Result<i32> {
    let store = CredentialStore::default_location()?;
    match args.action {
        KeyAction::Set { value } => {
            let credential =
                Credential::new(&value).ok_or_else(|| anyhow!("API key must not be blank"))?;
            store.save(&credential)?;
            println!(
                "Saved key {} to {}",
                credential.masked(),
                store.path().display()
            );
        }
        KeyAction::Clear => {
            if store.clear()? {
                println!("Removed {}", store.path().display());
            } else {
                println!("No stored key.");
            }
        }
        KeyAction::Status => match resolve_credential(&store)? {
            Some((credential, source)) => println!("Key {} ({source})", credential.masked()),
            None => {
                println!("No key set. Use `ethereal key set <value>` or GEMINI_API_KEY.");
                return Ok(1);
            }
        },
    }
    Ok(0)
}

fn resolve_credential(store: &CredentialStore) -> Result<Option<(Credential, &'static str)>> {
    resolve_credential_with(store, Credential::from_env)
}

/// A saved key wins; the environment only seeds sessions with nothing stored.
fn resolve_credential_with(
    store: &CredentialStore,
    from_env: impl FnOnce() -> Option<Credential>,
) -> Result<Option<(Credential, &'static str)>> {
    if let Some(credential) = store.load()? {
        return Ok(Some((credential, "key file")));
    }
    Ok(from_env().map(|credential| (credential, "environment")))
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let config = EngineConfig::from_env()
        .with_text_model(args.text_model.clone())
        .with_image_model(args.image_model.clone());
    let registry = default_backend_registry(&config);
    let backend: Arc<dyn StudioBackend> = registry.get(&args.backend).ok_or_else(|| {
        anyhow!(
            "unknown backend {:?}; available: {}",
            args.backend,
            registry.names().join(", ")
        )
    })?;

    let log = match args.events.as_ref() {
        Some(path) => SessionLog::new(path),
        None => SessionLog::disabled(),
    };
    let session = ConsultantSession::new(backend, log);
    session.log().emit(
        "session_started",
        json!({
            "backend": session.backend_name(),
            "text_model": config.text_model,
            "image_model": config.image_model,
        })
        .as_object()
        .cloned()
        .unwrap_or_default(),
    )?;
    tracing::info!(
        backend = session.backend_name(),
        session_id = session.log().session_id(),
        "consultation started"
    );

    let store = CredentialStore::default_location()?;
    match resolve_credential(&store) {
        Ok(Some((credential, source))) => {
            tracing::info!(source, "using stored credential");
            session.set_credential(credential);
        }
        Ok(None) => {}
        Err(err) => tracing::warn!(error = %format!("{err:#}"), "credential file ignored"),
    }
    if !session.has_credential() && session.backend_name() == "dryrun" {
        if let Some(credential) = Credential::new(DRYRUN_CREDENTIAL) {
            session.set_credential(credential);
        }
    }

    if let Some(welcome) = session.snapshot().last_message() {
        println!("{}", welcome.content);
    }
    if !session.has_credential() {
        println!("Enter your Gemini API key with /key <value> to begin.");
    }
    println!("Type /help for commands.");

    let stdin = io::stdin();
    let mut line = String::new();
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

        match parse_line(&line) {
            ReplCommand::Noop => {}
            ReplCommand::Say(text) => report_turn(session.send_message(&text)),
            ReplCommand::Photos(paths) => {
                let photos = match load_photos(&paths) {
                    Ok(photos) => photos,
                    Err(err) => {
                        println!("Could not read photos: {err:#}");
                        continue;
                    }
                };
                let outcome = session.upload_photos(photos);
                if outcome.is_ok() && session.snapshot().phase() == Phase::Identity {
                    session.set_phase(Phase::Gathering);
                }
                report_turn(outcome);
            }
            ReplCommand::Edit(instruction) => report_image(session.edit_latest(&instruction)),
            ReplCommand::Preset(preset) => {
                println!("Applying {}...", preset.label());
                report_image(session.apply_preset(preset));
            }
            ReplCommand::Gallery => print_gallery(&session.snapshot()),
            ReplCommand::Save { index, path } => {
                match save_asset(&session.snapshot(), index, path.as_deref()) {
                    Ok(written) => println!("Saved {}", written.display()),
                    Err(err) => println!("Could not save: {err:#}"),
                }
            }
            ReplCommand::Key(value) => match Credential::new(&value) {
                Some(credential) => {
                    if let Err(err) = store.save(&credential) {
                        tracing::warn!(error = %format!("{err:#}"), "key not persisted");
                    }
                    println!("Key {} set.", credential.masked());
                    session.set_credential(credential);
                }
                None => println!("/key requires a value"),
            },
            ReplCommand::Phase => println!("Phase: {}", session.snapshot().phase().as_str()),
            ReplCommand::Help => println!("Commands: {}", HELP_COMMANDS.join("  ")),
            ReplCommand::Quit => break,
            ReplCommand::Invalid(message) => println!("{message}"),
        }
    }

    session.log().emit("session_ended", Default::default())?;
    Ok(())
}

fn report_turn(outcome: Result<TurnOutcome, SessionError>) {
    match outcome {
        Err(err) => println!("{err}"),
        Ok(TurnOutcome::Ignored) => {}
        Ok(TurnOutcome::ChatFailed { error }) => print_notice(&format!("(no reply: {error})")),
        Ok(TurnOutcome::Replied { reply, image }) => {
            let visible = display_text(&reply);
            if !visible.is_empty() {
                println!("{visible}");
            }
            print_image_outcome(&image);
        }
    }
}

fn report_image(outcome: Result<ImageOutcome, SessionError>) {
    match outcome {
        Err(err) => println!("{err}"),
        Ok(ImageOutcome::NotRequested) => println!("Nothing to edit yet."),
        Ok(image) => print_image_outcome(&image),
    }
}

fn print_image_outcome(image: &ImageOutcome) {
    match image {
        ImageOutcome::NotRequested => {}
        ImageOutcome::Generated { directive } => {
            println!("New concept: {}", directive.scene_summary);
            print_notice("(see /gallery, /save 1)");
        }
        ImageOutcome::Edited { instruction } => {
            println!("Concept updated: {instruction}");
        }
        ImageOutcome::NoImage => print_notice("(the studio returned no image)"),
        ImageOutcome::Failed { error } => print_notice(&format!("(image request failed: {error})")),
    }
}

fn print_notice(text: &str) {
    println!("\x1b[2m{text}\x1b[0m");
}

fn print_gallery(state: &ConversationState) {
    if state.assets().is_empty() {
        println!("No concepts yet.");
        return;
    }
    for (index, status, image) in state.assets().iter() {
        println!(
            "{}. {} ({} KB)",
            index + 1,
            status.label(),
            encoded_size_kb(image)
        );
    }
}

fn encoded_size_kb(image: &ImageHandle) -> usize {
    (image.payload().len() * 3 / 4).div_ceil(1024)
}

fn load_photos(paths: &[PathBuf]) -> Result<Vec<ImageHandle>> {
    paths.iter().map(|path| read_image_as_handle(path)).collect()
}

fn read_image_as_handle(path: &Path) -> Result<ImageHandle> {
    let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
    if bytes.is_empty() {
        bail!("{} is empty", path.display());
    }
    Ok(ImageHandle::from_base64(
        guess_image_mime(path),
        &BASE64.encode(bytes),
    ))
}

fn guess_image_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "heic" | "heif" => "image/heic",
        _ => "image/png",
    }
}

fn save_asset(state: &ConversationState, index: usize, path: Option<&Path>) -> Result<PathBuf> {
    let image = state
        .assets()
        .get(index)
        .ok_or_else(|| anyhow!("no concept #{} in the gallery", index + 1))?;
    let bytes = BASE64
        .decode(image.payload())
        .context("stored concept is not valid base64")?;
    let target = match path {
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(download_file_name(index)),
    };
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(&target, bytes).with_context(|| format!("failed writing {}", target.display()))?;
    Ok(target)
}
