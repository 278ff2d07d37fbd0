use std::env;
use std::fs;
use std::io::{self, BufRead, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use cardgen_contracts::chat::{parse_intent, Intent, CHAT_HELP_COMMANDS};
use cardgen_contracts::config::{StudioConfig, DEFAULT_CONFIG_FILE};
use cardgen_contracts::events::EventWriter;
use cardgen_contracts::kinds::GeneratorKind;
use cardgen_contracts::request::{GenerationRequest, ImageSize, MAX_REFERENCE_IMAGES};
use cardgen_engine::export::DEFAULT_ARCHIVE_NAME;
use cardgen_engine::normalize::encode_png;
use cardgen_engine::{
    build_provider, new_session_id, session_from_parts, CredentialStore, ImageProvider,
    ProgressState, Session,
};
use clap::{Parser, Subcommand};

const MULTI_LINE_TERMINATOR: &str = ".";
const EDIT_PREVIEW_FILE: &str = "edit_selected.png";
/// `run` exit code when generation stopped early but a partial archive was
/// still written.
const PARTIAL_RUN_EXIT_CODE: i32 = 2;

#[derive(Debug, Parser)]
#[command(name = "cardgen", version, about = "Diagram and icon card generator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Chat(ChatArgs),
    Run(RunArgs),
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value = "cardgen-out")]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct RunArgs {
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    user: String,
    #[arg(long, default_value = "icon")]
    kind: GeneratorKind,
    #[arg(long = "prompt", required = true)]
    prompts: Vec<String>,
    #[arg(long)]
    variations: Option<u32>,
    #[arg(long, default_value = "auto")]
    size: ImageSize,
    #[arg(long = "ref")]
    refs: Vec<PathBuf>,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("cardgen error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Run(args) => {
            let password = env::var("CARDGEN_PASSWORD")
                .context("CARDGEN_PASSWORD must hold the password for --user")?;
            run_once(args, &password)
        }
    }
}

/// `--config`, then `CARDGEN_CONFIG`, then `cardgen.toml` in the working
/// directory. Only the fallback may be missing.
fn load_config(flag: Option<&Path>) -> Result<StudioConfig> {
    if let Some(path) = flag {
        return StudioConfig::from_file(path);
    }
    if let Some(path) = env::var("CARDGEN_CONFIG")
        .ok()
        .filter(|value| !value.trim().is_empty())
    {
        return StudioConfig::from_file(path.trim());
    }
    StudioConfig::load_or_default(DEFAULT_CONFIG_FILE)
}

fn open_session(
    config: &StudioConfig,
    provider: Arc<dyn ImageProvider>,
    out: &Path,
    events: Option<PathBuf>,
) -> Result<Session> {
    fs::create_dir_all(out).with_context(|| format!("failed creating {}", out.display()))?;
    let events_path = events.unwrap_or_else(|| out.join("events.jsonl"));
    let writer = EventWriter::new(events_path, new_session_id());
    let store = Arc::new(CredentialStore::from_config(config));
    Ok(session_from_parts(config, provider, store, writer))
}

struct ChatState {
    kind: GeneratorKind,
    variations: u32,
    size: ImageSize,
    references: Vec<Vec<u8>>,
    last_progress: Option<ProgressState>,
}

impl ChatState {
    fn new(session: &Session) -> Self {
        let kind = GeneratorKind::Icon;
        Self {
            kind,
            variations: session.resolver().registry().default_variations(kind),
            size: ImageSize::default(),
            references: Vec::new(),
            last_progress: None,
        }
    }
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    if config.credentials.is_empty() {
        println!("Warning: no [credentials] configured; nobody can log in.");
    }
    let provider = build_provider(&config.provider)?;
    let mut session = open_session(&config, provider, &args.out, args.events.clone())?;
    let mut state = ChatState::new(&session);

    let stdin = io::stdin();
    let mut input_lines = stdin.lock();
    let mut line = String::new();

    println!(
        "Cardgen chat started (provider {}). Log in with /login <user> <password>; /help lists commands.",
        session.provider_name()
    );

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match input_lines.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        let intent = parse_intent(input);
        if intent.action == "noop" {
            continue;
        }
        if !matches!(intent.action.as_str(), "help" | "login" | "unknown")
            && session.current_user().is_none()
        {
            println!("Please log in first with /login <user> <password>.");
            continue;
        }

        match intent.action.as_str() {
            "help" => {
                println!("Commands: {}", CHAT_HELP_COMMANDS.join(" "));
                println!("Plain text generates {} images with the current settings.", state.kind);
            }
            "login" => {
                let username = intent.arg_str("username").unwrap_or_default().to_string();
                let password = intent
                    .command_args
                    .get("password")
                    .and_then(|value| value.as_str())
                    .unwrap_or_default()
                    .to_string();
                match session.login(&username, &password) {
                    Ok(()) => println!("Logged in as {username}."),
                    Err(err) => println!("{err}"),
                }
            }
            "logout" => {
                session.logout();
                println!("Logged out.");
            }
            "whoami" => {
                println!(
                    "Logged in as {} (session {})",
                    session.current_user().unwrap_or_default(),
                    session.session_id()
                );
            }
            "set_kind" => {
                let raw = setting_str(&intent, "kind");
                match raw.parse::<GeneratorKind>() {
                    Ok(kind) => {
                        state.kind = kind;
                        state.variations = session.resolver().registry().default_variations(kind);
                        println!("Kind set to {kind} ({} variations).", state.variations);
                    }
                    Err(message) => println!("{message}"),
                }
            }
            "set_variations" => {
                let raw = setting_str(&intent, "variations");
                let max = session.gallery_config().max_variations;
                match parse_variations(&raw, max) {
                    Ok(count) => {
                        state.variations = count;
                        println!("Variations set to {count}.");
                    }
                    Err(message) => println!("{message}"),
                }
            }
            "set_size" => {
                let raw = setting_str(&intent, "size");
                match raw.parse::<ImageSize>() {
                    Ok(size) => {
                        state.size = size;
                        println!("Image size set to {size}.");
                    }
                    Err(message) => println!("{message}"),
                }
            }
            "set_system_prompt" => {
                let text = intent.arg_str("text").unwrap_or_default();
                if text.is_empty() {
                    println!("/system requires the template text");
                    continue;
                }
                session.set_system_prompt(state.kind, text);
                println!("System prompt for {} updated.", state.kind);
            }
            "reset_system_prompt" => {
                session.reset_system_prompt(state.kind);
                println!("System prompt for {} reset to the built-in template.", state.kind);
            }
            "show_system_prompt" => {
                let text = session.system_prompt(state.kind);
                let source = if session.has_system_override(state.kind) {
                    "custom"
                } else {
                    "built-in"
                };
                if text.is_empty() {
                    println!("{} has no system prompt ({source}).", state.kind);
                } else {
                    println!("System prompt for {} ({source}):\n{text}", state.kind);
                }
            }
            "set_references" => {
                let paths = intent.arg_strings("paths");
                match read_references(&paths) {
                    Ok(references) => {
                        println!("{} reference image(s) attached.", references.len());
                        state.references = references;
                    }
                    Err(err) => println!("Could not attach references: {err:#}"),
                }
            }
            "clear_references" => {
                state.references.clear();
                println!("References cleared.");
            }
            "multi_line" => {
                println!("Enter one prompt per line; finish with a single '{MULTI_LINE_TERMINATOR}'.");
                let text = collect_multi_line(&mut input_lines)?;
                submit_prompt(&mut session, &mut state, &text);
            }
            "show_gallery" => print_gallery(&session, state.kind),
            "show_progress" => match &state.last_progress {
                Some(progress) => println!(
                    "{} ({}/{}, {:.0}%)",
                    progress.status_line(),
                    progress.completed,
                    progress.total,
                    progress.fraction() * 100.0
                ),
                None => println!("Nothing generated yet."),
            },
            "save_image" => {
                let Some(position) = intent.arg_position() else {
                    println!("/save requires an image number (see /gallery)");
                    continue;
                };
                match session.image_png(state.kind, position) {
                    Ok((name, bytes)) => {
                        let target = intent
                            .arg_str("path")
                            .map(PathBuf::from)
                            .unwrap_or_else(|| args.out.join(&name));
                        write_file(&target, &bytes)?;
                        println!("Saved {}", target.display());
                    }
                    Err(err) => println!("{err}"),
                }
            }
            "select_image" => {
                let Some(position) = intent.arg_position() else {
                    println!("/select requires an image number (see /gallery)");
                    continue;
                };
                match session.select(state.kind, position) {
                    Ok(()) => {
                        println!("Editing {} image {position}. Use /edit <prompt>, /upload <path> or /back.", state.kind);
                        write_edit_preview(&session, &args.out)?;
                    }
                    Err(err) => println!("{err}"),
                }
            }
            "upload_replacement" => {
                let Some(path) = intent.arg_str("path") else {
                    println!("/upload requires a path");
                    continue;
                };
                let bytes = match fs::read(path) {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        println!("Upload failed: {path}: {err}");
                        continue;
                    }
                };
                match session.upload_replacement(&bytes) {
                    Ok(()) => {
                        println!("Replaced the image being edited.");
                        write_edit_preview(&session, &args.out)?;
                    }
                    Err(err) => println!("{err}"),
                }
            }
            "apply_edit" => {
                let Some(prompt) = intent.arg_str("prompt") else {
                    println!("/edit requires an edit prompt");
                    continue;
                };
                println!("Editing image...");
                match session.apply_edit(state.kind, prompt, state.size) {
                    Ok(()) => {
                        println!("Edit applied.");
                        write_edit_preview(&session, &args.out)?;
                    }
                    Err(err) => println!("Error editing image: {err}"),
                }
            }
            "exit_edit" => {
                session.exit_edit();
                println!("Back to the gallery.");
            }
            "export" => {
                let target = intent
                    .arg_str("path")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| args.out.join(DEFAULT_ARCHIVE_NAME));
                match session.export_to(state.kind, &target) {
                    Ok(count) => println!("Exported {count} image(s) to {}", target.display()),
                    Err(err) => println!("{err}"),
                }
            }
            "unknown" => {
                let command = intent.arg_str("command").unwrap_or("unknown");
                println!("Unknown command: {command}");
            }
            "generate" => {
                let prompt = intent.prompt.clone().unwrap_or_default();
                submit_prompt(&mut session, &mut state, &prompt);
            }
            other => {
                println!("Unhandled command: {other}");
            }
        }
    }
    Ok(())
}

fn setting_str(intent: &Intent, key: &str) -> String {
    intent
        .settings_update
        .get(key)
        .and_then(|value| value.as_str())
        .map(|value| value.trim().to_string())
        .unwrap_or_default()
}

fn parse_variations(raw: &str, max: u32) -> std::result::Result<u32, String> {
    match raw.trim().parse::<u32>() {
        Ok(count) if (1..=max).contains(&count) => Ok(count),
        _ => Err(format!("Variations must be a number between 1 and {max}.")),
    }
}

fn submit_prompt(session: &mut Session, state: &mut ChatState, text: &str) {
    let request = GenerationRequest::new(
        state.kind,
        text,
        state.variations,
        state.references.clone(),
        state.size,
    );
    let mut last = None;
    let outcome = session.submit(&request, |_, progress| {
        println!("{}", progress.status_line());
        last = Some(progress.clone());
    });
    if last.is_some() {
        state.last_progress = last;
    }
    match outcome {
        Ok(summary) => {
            let mut message = format!(
                "Generated {} {} image(s) from {} prompt(s).",
                summary.images, summary.kind, summary.prompt_count
            );
            if summary.skipped > 0 {
                message.push_str(&format!(" {} empty response(s) skipped.", summary.skipped));
            }
            println!("{message} Gallery holds {}.", session.gallery().count(summary.kind));
        }
        Err(err) => println!("{err}"),
    }
}

fn print_gallery(session: &Session, kind: GeneratorKind) {
    let entries = session.gallery().entries(kind);
    if entries.is_empty() {
        println!(
            "No {kind} images yet ({} across all kinds).",
            session.gallery().total_count()
        );
    }
    let mut current_prompt = None;
    for entry in &entries {
        if current_prompt != Some(entry.prompt_index) {
            println!("Prompt {}: {}", entry.prompt_index, entry.prompt_text);
            current_prompt = Some(entry.prompt_index);
        }
        println!(
            "  {}. variation {} ({}x{})",
            entry.position,
            entry.variation,
            entry.image.width(),
            entry.image.height()
        );
    }
    if session.gallery().edit_mode_active() {
        println!("Edit mode is active (/back to leave).");
    }
}

fn read_references(paths: &[String]) -> Result<Vec<Vec<u8>>> {
    if paths.is_empty() {
        bail!("/refs requires at least one path");
    }
    if paths.len() > MAX_REFERENCE_IMAGES {
        bail!(
            "at most {MAX_REFERENCE_IMAGES} reference images are allowed ({} given)",
            paths.len()
        );
    }
    paths
        .iter()
        .map(|path| fs::read(path).with_context(|| format!("failed reading {path}")))
        .collect()
}

/// Reads prompt lines until a line holding only `.` or end of input.
fn collect_multi_line<R: BufRead>(reader: &mut R) -> Result<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    loop {
        line.clear();
        let read = match reader.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }
        let text = line.trim_end_matches(['\n', '\r']);
        if text.trim() == MULTI_LINE_TERMINATOR {
            break;
        }
        lines.push(text.to_string());
    }
    Ok(lines.join("\n"))
}

fn write_edit_preview(session: &Session, out: &Path) -> Result<()> {
    let Some(image) = session.selected_image() else {
        return Ok(());
    };
    let target = out.join(EDIT_PREVIEW_FILE);
    write_file(&target, &encode_png(image)?)?;
    println!("Current edit image: {}", target.display());
    Ok(())
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed creating {}", parent.display()))?;
    }
    fs::write(path, bytes).with_context(|| format!("failed writing {}", path.display()))
}

fn run_once(args: RunArgs, password: &str) -> Result<i32> {
    let config = load_config(args.config.as_deref())?;
    let provider = build_provider(&config.provider)?;
    run_with_provider(args, &config, provider, password)
}

/// Exit code 0 for a complete run, 1 when nothing was generated and
/// [`PARTIAL_RUN_EXIT_CODE`] when a failure cut the run short after some
/// images were already produced.
fn run_with_provider(
    args: RunArgs,
    config: &StudioConfig,
    provider: Arc<dyn ImageProvider>,
    password: &str,
) -> Result<i32> {
    if args.prompts.len() > 1 && !args.kind.splits_lines() {
        bail!("multiple --prompt values need --kind icon");
    }
    let out_dir = args
        .out
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let events = args
        .events
        .clone()
        .or_else(|| Some(out_dir.join("events.jsonl")));
    let mut session = open_session(config, provider, &out_dir, events)?;
    session.login(&args.user, password)?;

    let references = args
        .refs
        .iter()
        .map(|path| fs::read(path).with_context(|| format!("failed reading {}", path.display())))
        .collect::<Result<Vec<_>>>()?;
    let variations = args
        .variations
        .unwrap_or_else(|| session.resolver().registry().default_variations(args.kind));
    let request = GenerationRequest::new(
        args.kind,
        &args.prompts.join("\n"),
        variations,
        references,
        args.size,
    );

    let outcome = session.submit(&request, |_, progress| {
        println!("{}", progress.status_line());
    });
    let generated = session.gallery().count(args.kind);
    let complete = match outcome {
        Ok(_) => true,
        Err(err) => {
            eprintln!("{err}");
            if generated == 0 {
                return Ok(1);
            }
            false
        }
    };
    let count = session.export_to(args.kind, &args.out)?;
    if !complete {
        println!(
            "Exported {count} image(s) to {} before the run stopped.",
            args.out.display()
        );
        return Ok(PARTIAL_RUN_EXIT_CODE);
    }
    println!("Exported {count} image(s) to {}", args.out.display());
    Ok(0)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use anyhow::bail;
    use cardgen_contracts::config::StudioConfig;
    use cardgen_contracts::kinds::GeneratorKind;
    use cardgen_contracts::request::ImageSize;
    use cardgen_engine::provider::{
        DryrunProvider, ImageProvider, ProviderRequest, ProviderResponse,
    };
    use clap::Parser;
    use zip::ZipArchive;

    use super::{
        collect_multi_line, parse_variations, run_once, run_with_provider, Cli, Command, RunArgs,
        PARTIAL_RUN_EXIT_CODE,
    };

    /// Answers like the dryrun provider until `fail_from` calls were made.
    struct FlakyProvider {
        calls: AtomicUsize,
        fail_from: usize,
    }

    impl ImageProvider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }

        fn generate(&self, request: &ProviderRequest) -> anyhow::Result<ProviderResponse> {
            if self.calls.fetch_add(1, Ordering::SeqCst) >= self.fail_from {
                bail!("upstream timed out");
            }
            DryrunProvider.generate(request)
        }
    }

    #[test]
    fn multi_line_stops_at_terminator() -> anyhow::Result<()> {
        let mut input = Cursor::new("rocket\n\ngear\r\n.\nleftover\n");
        assert_eq!(collect_multi_line(&mut input)?, "rocket\n\ngear");

        let mut unterminated = Cursor::new("one\ntwo");
        assert_eq!(collect_multi_line(&mut unterminated)?, "one\ntwo");
        Ok(())
    }

    #[test]
    fn variations_are_bounded() {
        assert_eq!(parse_variations("3", 10), Ok(3));
        assert!(parse_variations("0", 10).is_err());
        assert!(parse_variations("11", 10).is_err());
        assert!(parse_variations("many", 10).is_err());
    }

    #[test]
    fn run_command_parses_repeated_prompts() {
        let cli = Cli::try_parse_from([
            "cardgen", "run", "--user", "alice", "--kind", "icons", "--prompt", "rocket",
            "--prompt", "gear", "--size", "512x512", "--out", "cards.zip",
        ])
        .expect("valid args");
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.kind, GeneratorKind::Icon);
                assert_eq!(args.prompts, vec!["rocket", "gear"]);
                assert_eq!(args.size, ImageSize::Square512);
                assert_eq!(args.out, PathBuf::from("cards.zip"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn run_once_exports_dryrun_icons() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let config_path = temp.path().join("cardgen.toml");
        std::fs::write(
            &config_path,
            "[credentials]\nalice = \"s3cret\"\n\n[provider]\nname = \"dryrun\"\n",
        )?;
        let out = temp.path().join("cards.zip");
        let args = RunArgs {
            config: Some(config_path),
            user: "alice".to_string(),
            kind: GeneratorKind::Icon,
            prompts: vec!["rocket".to_string(), "gear".to_string()],
            variations: Some(2),
            size: ImageSize::Square256,
            refs: Vec::new(),
            out: out.clone(),
            events: None,
        };
        assert_eq!(run_once(args, "s3cret")?, 0);

        let archive = ZipArchive::new(std::fs::File::open(&out)?)?;
        assert_eq!(archive.len(), 4);
        assert!(temp.path().join("events.jsonl").exists());
        Ok(())
    }

    #[test]
    fn run_once_rejects_bad_password() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let config_path = temp.path().join("cardgen.toml");
        std::fs::write(
            &config_path,
            "[credentials]\nalice = \"s3cret\"\n\n[provider]\nname = \"dryrun\"\n",
        )?;
        let args = RunArgs {
            config: Some(config_path),
            user: "alice".to_string(),
            kind: GeneratorKind::Diagram,
            prompts: vec!["flow".to_string()],
            variations: None,
            size: ImageSize::Auto,
            refs: Vec::new(),
            out: temp.path().join("cards.zip"),
            events: None,
        };
        let err = run_once(args, "wrong").err().map(|err| err.to_string());
        assert_eq!(
            err.as_deref(),
            Some("Authentication failed: Invalid username or password.")
        );
        assert!(!temp.path().join("cards.zip").exists());
        Ok(())
    }

    #[test]
    fn partial_run_writes_archive_and_signals_it() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let config = StudioConfig::from_toml("[credentials]\nalice = \"s3cret\"\n")?;
        let out = temp.path().join("cards.zip");
        let args = RunArgs {
            config: None,
            user: "alice".to_string(),
            kind: GeneratorKind::Diagram,
            prompts: vec!["pipeline".to_string()],
            variations: Some(3),
            size: ImageSize::Square256,
            refs: Vec::new(),
            out: out.clone(),
            events: None,
        };
        let provider = Arc::new(FlakyProvider {
            calls: AtomicUsize::new(0),
            fail_from: 1,
        });
        assert_eq!(
            run_with_provider(args, &config, provider, "s3cret")?,
            PARTIAL_RUN_EXIT_CODE
        );
        let archive = ZipArchive::new(std::fs::File::open(&out)?)?;
        assert_eq!(archive.len(), 1);
        Ok(())
    }

    #[test]
    fn run_without_any_image_fails_without_archive() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let config = StudioConfig::from_toml("[credentials]\nalice = \"s3cret\"\n")?;
        let out = temp.path().join("cards.zip");
        let args = RunArgs {
            config: None,
            user: "alice".to_string(),
            kind: GeneratorKind::Icon,
            prompts: vec!["rocket".to_string()],
            variations: Some(2),
            size: ImageSize::Square256,
            refs: Vec::new(),
            out: out.clone(),
            events: None,
        };
        let provider = Arc::new(FlakyProvider {
            calls: AtomicUsize::new(0),
            fail_from: 0,
        });
        assert_eq!(run_with_provider(args, &config, provider, "s3cret")?, 1);
        assert!(!out.exists());
        Ok(())
    }
}
