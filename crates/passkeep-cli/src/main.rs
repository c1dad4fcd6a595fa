use anyhow::{anyhow, bail, Context as _, Result};
use clap::{Args, Parser, Subcommand};
use passkeep_core::cipher::{self, Key};
use passkeep_core::collab::{edit_record, passphrase_key_fn, EditOutcome, SecretPrompt};
use passkeep_core::hashpass::{Alphabet, Context};
use passkeep_core::paths::{default_store_path, DB_ENV};
use passkeep_core::query::{self, find_record, MatchQuality};
use passkeep_core::randpass::{self, Charset};
use passkeep_core::{Database, EncryptedStore, Record, StoreWatcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

mod editor;
mod prompt;

use crate::editor::ExternalEditor;
use crate::prompt::TerminalPrompt;

const PASSPHRASE_LABEL: &str = "Store passphrase";

#[derive(Parser, Debug)]
#[command(name = "passkeep", author, version, about = "Encrypted password store", long_about = None)]
struct Cli {
    /// Store file (defaults to the platform data directory)
    #[arg(long, global = true, env = DB_ENV)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new empty store
    Init,
    /// List records, optionally filtered by a query
    List {
        query: Option<String>,
        /// Include archived records
        #[arg(long)]
        archived: bool,
    },
    /// Show one record
    Show {
        query: String,
        #[arg(long)]
        archived: bool,
        /// Print hidden details and the password
        #[arg(long)]
        reveal: bool,
    },
    /// Print a record's password, stored or generated (`tag@label` picks a tag)
    Pass {
        query: String,
        #[arg(long)]
        archived: bool,
    },
    /// Edit a record in $VISUAL or $EDITOR
    Edit {
        query: String,
        /// Editor command, overriding $VISUAL and $EDITOR
        #[arg(long)]
        editor: Option<String>,
    },
    /// Derive a password without a store
    Hashpass(HashpassArgs),
    /// Generate random credentials
    Random {
        #[command(subcommand)]
        kind: RandomKind,
    },
    /// Re-encrypt the store under a new passphrase
    Rekey,
    /// Dump the decrypted database as JSON (unencrypted!)
    Export,
    /// Replace the database with a JSON export
    Import { file: PathBuf },
    /// Keep the store loaded and report reloads until Ctrl-C
    Watch {
        /// Poll interval in milliseconds
        #[arg(long, default_value = "1000")]
        interval: u64,
    },
}

#[derive(Args, Debug)]
struct HashpassArgs {
    #[arg(long)]
    site: String,
    #[arg(long, default_value = "")]
    salt: String,
    #[arg(short, long, default_value = "18")]
    length: usize,
    /// Positional template (`^ _ # * ? ~`), overrides --length
    #[arg(long)]
    format: Option<String>,
    /// `+`-joined alphabet tokens, e.g. `letters+digits`
    #[arg(long, default_value = "all")]
    alphabet: String,
}

#[derive(Subcommand, Debug)]
enum RandomKind {
    /// Random characters
    Chars {
        #[arg(short, long, default_value = "20")]
        length: usize,
        #[arg(long)]
        no_digits: bool,
        #[arg(long)]
        no_symbols: bool,
    },
    /// Random word passphrase
    Words {
        #[arg(short, long, default_value = "5")]
        count: usize,
        #[arg(long, default_value = "-")]
        joiner: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let prompt = TerminalPrompt::new();
    match cli.command {
        Commands::Init => init_command(&prompt, &store_path(cli.db)?),
        Commands::List { query, archived } => {
            let store = open_store(&prompt, &store_path(cli.db)?)?;
            list_command(store.payload(), query.as_deref(), archived)
        }
        Commands::Show {
            query,
            archived,
            reveal,
        } => {
            let store = open_store(&prompt, &store_path(cli.db)?)?;
            show_command(store.payload(), &query, archived, reveal)
        }
        Commands::Pass { query, archived } => {
            let store = open_store(&prompt, &store_path(cli.db)?)?;
            let db = store.payload();
            let found = find_record(db, &query, archived)?;
            let password = db.password(found.record, &found.tag)?;
            println!("{}", password.as_str());
            Ok(())
        }
        Commands::Edit { query, editor } => {
            let editor = editor
                .map(ExternalEditor::with_command)
                .unwrap_or_else(ExternalEditor::from_env);
            edit_command(&prompt, &store_path(cli.db)?, &query, editor)
        }
        Commands::Hashpass(args) => hashpass_command(&prompt, args),
        Commands::Random { kind } => random_command(kind),
        Commands::Rekey => rekey_command(&prompt, &store_path(cli.db)?),
        Commands::Export => {
            let store = open_store(&prompt, &store_path(cli.db)?)?;
            eprintln!("warning: writing the decrypted database to stdout");
            println!("{}", store.payload().to_json_pretty()?);
            Ok(())
        }
        Commands::Import { file } => import_command(&prompt, &store_path(cli.db)?, &file),
        Commands::Watch { interval } => {
            watch_command(&prompt, &store_path(cli.db)?, interval).await
        }
    }
}

fn store_path(flag: Option<PathBuf>) -> Result<PathBuf> {
    let path = match flag {
        Some(p) => p,
        None => default_store_path()?,
    };
    debug!(path = %path.display(), "using store");
    Ok(path)
}

fn open_store(prompt: &TerminalPrompt, path: &Path) -> Result<EncryptedStore<Database>> {
    if !path.exists() {
        bail!("no store at {}; run init first", path.display());
    }
    let store = EncryptedStore::open_file(path, passphrase_key_fn(prompt, PASSPHRASE_LABEL))
        .with_context(|| format!("opening {}", path.display()))?;
    Ok(store)
}

fn new_access_key(prompt: &TerminalPrompt, label: &str) -> Result<(Key, [u8; cipher::SALT_SIZE])> {
    let passphrase = prompt.new_passphrase(label)?;
    let salt = cipher::generate_salt();
    let key = cipher::access_key(passphrase.as_bytes(), &salt)?;
    Ok((key, salt))
}

fn import_command(prompt: &TerminalPrompt, path: &Path, file: &Path) -> Result<()> {
    let raw = Zeroizing::new(
        std::fs::read(file).with_context(|| format!("reading {}", file.display()))?,
    );
    let imported = Database::from_json(&raw)?;
    let mut store = open_store(prompt, path)?;
    let count = imported.records.len();
    *store.payload_mut() = imported;
    store.save_file(path)?;
    println!("Imported {count} records");
    Ok(())
}

fn init_command(prompt: &TerminalPrompt, path: &Path) -> Result<()> {
    if path.exists() {
        return Err(anyhow!("store already exists at {}", path.display()));
    }
    let (key, salt) = new_access_key(prompt, "New store passphrase")?;
    let store = EncryptedStore::<Database>::new(key.as_bytes(), &salt, None)?;
    store.save_file(path)?;
    info!("store created");
    println!("Store created: {}", path.display());
    Ok(())
}

fn rekey_command(prompt: &TerminalPrompt, path: &Path) -> Result<()> {
    let store = open_store(prompt, path)?;
    let (key, salt) = new_access_key(&TerminalPrompt::replacement(), "New store passphrase")?;
    let store = store.rekey(key.as_bytes(), &salt)?;
    store.save_file(path)?;
    println!("Store re-encrypted with a new passphrase and data key");
    Ok(())
}

fn list_command(db: &Database, query: Option<&str>, archived: bool) -> Result<()> {
    let rows: Vec<(usize, &Record, Option<MatchQuality>)> = match query {
        Some(q) => {
            let (_, label) = query::parse_query(q)?;
            query::find_records(&db.records, label)
                .into_iter()
                .filter(|f| archived || !f.record.archived)
                .map(|f| (f.index, f.record, Some(f.quality)))
                .collect()
        }
        None => db
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| archived || !r.archived)
            .map(|(i, r)| (i, r, None))
            .collect(),
    };
    for (index, record, quality) in rows {
        let mut line = format!("{index:>4}  {}", record.display_name());
        if !record.hosts.is_empty() {
            line.push_str(&format!("  [{}]", record.hosts.join(", ")));
        }
        if record.archived {
            line.push_str("  (archived)");
        }
        if let Some(q) = quality {
            line.push_str(&format!("  {q:?}"));
        }
        println!("{line}");
    }
    Ok(())
}

fn show_command(db: &Database, query: &str, archived: bool, reveal: bool) -> Result<()> {
    let found = find_record(db, query, archived)?;
    let r = found.record;
    let field = |name: &str, value: &str| {
        if !value.is_empty() {
            println!("{name:>10}: {value}");
        }
    };
    field("label", &r.label);
    field("title", &r.title);
    field("username", &r.username);
    field("email", &r.email);
    field("hosts", &r.hosts.join(", "));
    field("addrs", &r.addrs.join(", "));
    field("tags", &r.tags.join(", "));
    match db.password(r, &found.tag) {
        Ok(pw) if reveal => field("password", pw.as_str()),
        Ok(_) => field("password", "********"),
        Err(e) => debug!(error = %e, "no password to show"),
    }
    if r.otp.as_deref().is_some_and(|u| !u.is_empty()) {
        field("otp", "configured");
    }
    for d in &r.details {
        let value = if d.hidden && !reveal { "********" } else { d.value.as_str() };
        field(&d.label, value);
    }
    if !r.notes.is_empty() {
        println!();
        println!("{}", r.notes);
    }
    Ok(())
}

fn edit_command(
    prompt: &TerminalPrompt,
    path: &Path,
    query: &str,
    mut editor: ExternalEditor,
) -> Result<()> {
    let mut store = open_store(prompt, path)?;
    let index = find_record(store.payload(), query, true)?.index;
    match edit_record(store.payload_mut(), index, &mut editor)? {
        EditOutcome::Changed(_) => {
            store.save_file(path)?;
            println!("Record saved");
        }
        EditOutcome::Unchanged => println!("No changes"),
        EditOutcome::Rejected => println!("Edit abandoned"),
    }
    Ok(())
}

fn hashpass_command(prompt: &TerminalPrompt, args: HashpassArgs) -> Result<()> {
    let alphabet = Alphabet::parse(&args.alphabet)?;
    let secret = prompt.prompt("Hashpass secret")?;
    let ctx = Context {
        alphabet: &alphabet,
        site: &args.site,
        salt: &args.salt,
        secret: &secret,
    };
    let password = match args.format.as_deref() {
        Some(template) => Zeroizing::new(ctx.format(template)),
        None => {
            let pw = Zeroizing::new(ctx.password(args.length)?);
            eprintln!("entropy: ~{} bits", ctx.entropy(args.length));
            pw
        }
    };
    println!("{}", password.as_str());
    Ok(())
}

fn random_command(kind: RandomKind) -> Result<()> {
    match kind {
        RandomKind::Chars {
            length,
            no_digits,
            no_symbols,
        } => {
            let mut charset = Charset::LETTERS;
            if !no_digits {
                charset = charset | Charset::DIGITS;
            }
            if !no_symbols {
                charset = charset | Charset::SYMBOLS;
            }
            println!("{}", randpass::random_chars(length, charset)?.as_str());
        }
        RandomKind::Words { count, joiner } => {
            println!("{}", randpass::random_words(count, &joiner)?);
        }
    }
    Ok(())
}

async fn watch_command(prompt: &TerminalPrompt, path: &Path, interval: u64) -> Result<()> {
    let passphrase = prompt.prompt(PASSPHRASE_LABEL)?;
    let watcher = StoreWatcher::<Database>::start(path, move |salt| {
        cipher::access_key(passphrase.as_bytes(), salt)
    })
    .await
    .with_context(|| format!("watching {}", path.display()))?;

    let mut last = watcher.current().await?;
    println!("Loaded {} records", last.payload().records.len());
    let mut ticker = tokio::time::interval(Duration::from_millis(interval.max(50)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = watcher.current().await?;
                if !Arc::ptr_eq(&now, &last) {
                    println!("Reloaded: {} records", now.payload().records.len());
                    last = now;
                }
            }
            res = signal::ctrl_c() => {
                res?;
                break;
            }
        }
    }
    watcher.shutdown();
    info!("watch stopped");
    Ok(())
}
