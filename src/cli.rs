use std::error::Error;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use atty::Stream;
use clap::{Parser, Subcommand};
use escape_room_rs::matcher::{FUZZY_MATCH_THRESHOLD, exceeds_fuzzy_threshold};
use escape_room_rs::{
    AppConfig, Catalog, ConfiguredBackend, EscapeRoom, Normalizer, TurnReply, build_service,
    generate_session_id, is_match, token_sort_ratio,
};
use serde_json::json;
use termimad::{FmtText, MadSkin, terminal_size};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "escape-room", about = "Play a conversational escape room", version)]
pub struct Cli {
    /// Emit JSON instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// TOML configuration file.
    #[arg(long, global = true, env = "ESCAPE_ROOM_CONFIG")]
    config: Option<PathBuf>,

    /// Content file to load instead of the configured or bundled themes.
    #[arg(long, global = true)]
    content: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Play in the terminal.
    Play,
    /// Serve the JSON API over HTTP.
    #[cfg(feature = "web")]
    Serve {
        /// Listen address, overriding the config file.
        #[arg(long)]
        addr: Option<String>,
    },
    /// List the available themes.
    Themes,
    /// Show how an answer would be judged.
    Match {
        /// The accepted answer.
        correct: String,
        /// What the player typed.
        candidate: String,
    },
}

pub fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    if let Some(path) = cli.content {
        config.content.path = Some(path);
    }
    match cli.command {
        Command::Play => {
            init_tracing("warn");
            handle_play(&config, cli.json)
        }
        #[cfg(feature = "web")]
        Command::Serve { addr } => {
            init_tracing("info");
            handle_serve(config, addr)
        }
        Command::Themes => handle_themes(&config, cli.json),
        Command::Match {
            correct,
            candidate,
        } => handle_match(&correct, &candidate, cli.json),
    }
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn runtime() -> io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
}

fn handle_play(config: &AppConfig, as_json: bool) -> Result<(), Box<dyn Error>> {
    let service = build_service(config)?;
    let runtime = runtime()?;
    let session_id = generate_session_id();

    if !as_json {
        render_markdown("Type **start** to begin or **exit** to quit.");
    }
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        if !as_json {
            print!("> ");
            io::stdout().flush()?;
        }
        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        let reply = runtime.block_on(service.handle_turn(&session_id, &line));
        print_reply(&reply, as_json)?;
        if line.trim().eq_ignore_ascii_case("exit") {
            break;
        }
    }
    persist_on_exit(&service);
    Ok(())
}

fn persist_on_exit(service: &EscapeRoom<ConfiguredBackend>) {
    if service.store().snapshot_path().is_some() {
        service.store().snapshot_now();
    }
}

fn print_reply(reply: &TurnReply, as_json: bool) -> Result<(), Box<dyn Error>> {
    if as_json {
        println!("{}", serde_json::to_string(&reply.view())?);
        return Ok(());
    }
    for message in &reply.messages {
        render_markdown(message);
    }
    if let Some(image) = &reply.image {
        println!("[illustration attached: {} bytes of base64 PNG]", image.len());
    }
    Ok(())
}

#[cfg(feature = "web")]
fn handle_serve(config: AppConfig, addr: Option<String>) -> Result<(), Box<dyn Error>> {
    use std::sync::Arc;

    let addr = escape_room_rs::web::parse_addr(addr.as_deref().unwrap_or(&config.server.addr))?;
    let service = Arc::new(build_service(&config)?);
    runtime()?.block_on(escape_room_rs::web::serve(service, addr))?;
    Ok(())
}

fn handle_themes(config: &AppConfig, as_json: bool) -> Result<(), Box<dyn Error>> {
    let service = build_service(config)?;
    let catalog = service.catalog();
    if as_json {
        println!("{}", serde_json::to_string_pretty(&themes_json(catalog))?);
    } else {
        print_themes(catalog);
    }
    Ok(())
}

fn themes_json(catalog: &Catalog) -> serde_json::Value {
    let themes: Vec<_> = catalog
        .themes()
        .iter()
        .enumerate()
        .map(|(idx, theme)| {
            let rooms: Vec<_> = theme
                .rooms()
                .iter()
                .map(|room| {
                    json!({
                        "name": room.name(),
                        "elements": room.elements().map(|element| json!({
                            "name": element.name(),
                            "difficulty": element.difficulty().label(),
                        })).collect::<Vec<_>>(),
                    })
                })
                .collect();
            json!({
                "number": idx + 1,
                "name": theme.name(),
                "description": theme.description(),
                "rooms": rooms,
            })
        })
        .collect();
    json!({ "themes": themes })
}

fn print_themes(catalog: &Catalog) {
    for (idx, theme) in catalog.themes().iter().enumerate() {
        println!("{}. {}", idx + 1, theme.name());
        for room in theme.rooms() {
            println!("   {}", room.name());
            let width = room
                .elements()
                .map(|element| element.name().len())
                .max()
                .unwrap_or(7)
                .max("ELEMENT".len());
            println!("     {:<width$}  {}", "ELEMENT", "DIFFICULTY", width = width);
            println!("     {:-<width$}  {}", "", "----------", width = width);
            for element in room.elements() {
                println!(
                    "     {:<width$}  {}",
                    element.name(),
                    element.difficulty(),
                    width = width
                );
            }
        }
    }
}

fn handle_match(correct: &str, candidate: &str, as_json: bool) -> Result<(), Box<dyn Error>> {
    let normalizer = Normalizer::english();
    let processed_correct = normalizer.answer_form(correct);
    let processed_candidate = normalizer.answer_form(candidate);
    let score = token_sort_ratio(&processed_correct, &processed_candidate);
    let matched = is_match(&processed_correct, &processed_candidate);

    if as_json {
        let payload = json!({
            "correct": { "raw": correct, "processed": processed_correct },
            "candidate": { "raw": candidate, "processed": processed_candidate },
            "token_sort_ratio": score,
            "threshold": FUZZY_MATCH_THRESHOLD,
            "match": matched,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("correct:    {correct:?} -> {processed_correct:?}");
        println!("candidate:  {candidate:?} -> {processed_candidate:?}");
        println!(
            "fuzzy:      {score} ({} threshold {FUZZY_MATCH_THRESHOLD})",
            if exceeds_fuzzy_threshold(score) { "above" } else { "at or below" }
        );
        println!("match:      {}", if matched { "yes" } else { "no" });
    }
    Ok(())
}

fn stdout_is_tty() -> bool {
    atty::is(Stream::Stdout)
}

fn markdown_width() -> usize {
    let (width, _) = terminal_size();
    width.max(60) as usize
}

fn render_markdown(body: &str) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return;
    }
    if stdout_is_tty() {
        let skin = MadSkin::default();
        let formatted = FmtText::from(&skin, trimmed, Some(markdown_width()));
        println!("{formatted}");
    } else {
        println!("{trimmed}\n");
    }
}
