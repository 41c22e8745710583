use clap::Parser;
use once_cell::sync::OnceCell;
use std::{
    error::Error,
    fs,
    io::{self, IsTerminal, Read},
    path::{Path, PathBuf},
};
use tracing::{debug, info, level_filters::LevelFilter};

use parley::{
    chat::ChatSession,
    commands::{Cli, Commands, GlobalArgs},
    config::{self, ParleyConfig},
    error::ParleyError,
    personality, repl,
    session_store::{self, SessionStore},
    transcript::Transcript,
    vector_store,
};

static TRACING: OnceCell<()> = OnceCell::new();

fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    TRACING.get_or_init(|| {
        let level = match cli.global.verbose {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        };
        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(io::stderr)
            .init();
    });

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config_path = match &cli.global.config {
        Some(path) => path.clone(),
        None => parley::config_dir()?.join("config.yaml"),
    };
    let load = || load_config(&config_path, &cli.global);
    let personalities_dir = parley::personalities_dir()?;

    match cli.command {
        Commands::Init { force } => init(&config_path, force)?,
        Commands::Ask { question } => {
            let config = load()?;
            let mut question = question.join(" ");
            if question.trim().is_empty() && !io::stdin().is_terminal() {
                io::stdin().read_to_string(&mut question)?;
            }
            let mut chat = open_chat(config, &personalities_dir)?;
            repl::ask(&mut chat, &question).await?;
        }
        Commands::Interactive => {
            let config = load()?;
            let mut chat = open_chat(config, &personalities_dir)?;
            repl::run(&mut chat).await?;
        }
        Commands::Ingest { paths } => {
            let config = load()?;
            require_session(&config, "ingest")?;
            let mut chat = open_chat(config, &personalities_dir)?;
            for path in paths {
                match chat.ingest(&path) {
                    Ok(0) => println!("{} is already indexed", path.display()),
                    Ok(added) => println!("{}: {added} chunks", path.display()),
                    Err(err) => eprintln!("{}: {err}", path.display()),
                }
            }
        }
        Commands::Export { format, output } => {
            let mut config = load()?;
            let name = require_session(&config, "export")?;
            let personality = config.personality.clone();
            let mut store = SessionStore::open(&mut config, &name, &personality)?;
            let path = store.transcript()?.write_export(format, output.as_deref())?;
            println!("Saved transcript to {}", path.display());
        }
        Commands::Import { file } => {
            let mut config = load()?;
            let name = require_session(&config, "import")?;
            let transcript = Transcript::read(&file)?;
            let personality = config.personality.clone();
            let mut store = SessionStore::open(&mut config, &name, &personality)?;
            let imported = store.import(&transcript)?;
            println!("Imported {imported} messages into {name}");
        }
        Commands::Personalities => {
            let config = load()?;
            for p in personality::list(Some(&personalities_dir)) {
                let marker = if p.name == config.personality { "*" } else { " " };
                println!("{marker} {:<12} {}", p.name, p.description);
            }
        }
        Commands::Sessions { delete: Some(name) } => {
            let config = load()?;
            if session_store::delete_session(&config.session_db_url, &name)? {
                let snapshot = vector_store::snapshot_path(&parley::data_dir()?, &name);
                if snapshot.exists() {
                    fs::remove_file(&snapshot)?;
                }
                println!("Deleted session {name}");
            } else {
                println!("No session named {name}");
            }
        }
        Commands::Sessions { delete: None } => {
            let config = load()?;
            let sessions = session_store::list_sessions(&config.session_db_url)?;
            if sessions.is_empty() {
                println!("No stored sessions.");
            }
            for s in sessions {
                println!(
                    "{:<20} {:<12} {:>5} messages  created {}",
                    s.session_name, s.personality, s.message_count, s.created_at
                );
            }
        }
        Commands::Clear { documents } => {
            let mut config = load()?;
            let name = require_session(&config, "clear")?;
            let personality = config.personality.clone();
            let mut store = SessionStore::open(&mut config, &name, &personality)?;
            let cleared = store.clear()?;
            println!("Cleared {cleared} messages from {name}");
            if documents {
                let snapshot = vector_store::snapshot_path(&parley::data_dir()?, &name);
                if snapshot.exists() {
                    fs::remove_file(&snapshot)?;
                    println!("Removed indexed documents");
                }
            }
        }
    }

    Ok(())
}

/// Read `config.yaml`, then apply the environment and command-line overrides.
fn load_config(config_path: &Path, global: &GlobalArgs) -> Result<ParleyConfig, Box<dyn Error>> {
    let mut config = config::load_config_or_default(config_path)?;
    config.resolve_api_key();
    global.apply(&mut config);
    config.validate()?;
    config.session_db_url = resolve_db_path(&config.session_db_url)?;
    debug!("Config loaded: {:?}", redacted(&config));
    Ok(config)
}

/// Build the chat session, attaching storage and the knowledge base when a
/// session name is set.
fn open_chat(mut config: ParleyConfig, personalities_dir: &Path) -> Result<ChatSession, Box<dyn Error>> {
    let personality = personality::find(&config.personality, Some(personalities_dir))?;

    let store = match config.session_name.clone() {
        Some(name) => Some((SessionStore::open(&mut config, &name, &personality.name)?, name)),
        None => None,
    };

    let mut chat = ChatSession::new(config, personality)?
        .with_personalities_dir(personalities_dir)
        .with_progress(io::stderr().is_terminal());

    if let Some((store, name)) = store {
        let snapshot = vector_store::snapshot_path(&parley::data_dir()?, &name);
        chat = chat.with_store(store)?.with_knowledge_path(snapshot)?;
    }
    Ok(chat)
}

fn require_session(config: &ParleyConfig, command: &str) -> Result<String, ParleyError> {
    config
        .session_name
        .clone()
        .ok_or_else(|| ParleyError::Usage(format!("parley --session <name> {command} ...")))
}

/// Relative database paths live in the data directory.
fn resolve_db_path(db_url: &str) -> Result<String, Box<dyn Error>> {
    let path = Path::new(db_url);
    if path.is_absolute() || db_url == ":memory:" {
        return Ok(db_url.to_string());
    }
    let data_dir = parley::data_dir()?;
    fs::create_dir_all(&data_dir)?;
    Ok(data_dir.join(path).to_string_lossy().into_owned())
}

fn redacted(config: &ParleyConfig) -> ParleyConfig {
    let mut config = config.clone();
    if config.has_api_key() {
        config.api_key = "***".to_string();
    }
    config
}

fn init(config_path: &Path, force: bool) -> Result<(), Box<dyn Error>> {
    if let Some(dir) = config_path.parent() {
        fs::create_dir_all(dir)?;
    }

    if config_path.exists() && !force {
        println!("Keeping existing {}", config_path.display());
    } else {
        info!("Creating config file: {}", config_path.display());
        let config_yaml = serde_yaml::to_string(&ParleyConfig::default())?;
        fs::write(config_path, config_yaml)?;
        println!("Wrote {}", config_path.display());
    }

    let personalities_dir: PathBuf = parley::personalities_dir()?;
    for path in personality::write_builtins(&personalities_dir)? {
        println!("Wrote {}", path.display());
    }
    println!("Set PARLEY_API_KEY or OPENAI_API_KEY (a .env file works too) before chatting.");
    Ok(())
}
