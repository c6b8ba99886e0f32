//! tipdrop: source identity and encrypted drop CLI
//!
//! Operator commands:
//!   config show|check            - display / validate the active configuration
//!   passphrase generate          - mint a new source passphrase from the wordlist
//!   encrypt --to <fp|age1..>     - encrypt a file to keyring fingerprints
//!   reply send --id <ID> <text>  - store a reply readable by source and operator
//!   shredder clear               - securely delete everything in the shredder
//!
//! Source commands (passphrase from TIPDROP_PASSPHRASE or a prompt):
//!   source id|create|lookup|delete
//!   submit message|file
//!   reply read <path>
//!   decrypt <file>

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use secrecy::SecretString;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use tipdrop_core::config::TipdropConfig;
use tipdrop_core::{SourceId, TipdropError};
use tipdrop_crypto::Wordlist;
use tipdrop_secrets::{
    DirKeyring, GenerateKeypair, KeygenQueue, MemoryKeyring, SourceCrypto, Submissions,
};
use tipdrop_storage::BlobStore;

const PASSPHRASE_ENV: &str = "TIPDROP_PASSPHRASE";

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "tipdrop",
    version,
    about = "Anonymous source identities and encrypted submissions",
    long_about = "tipdrop: derive source identities from passphrases, manage their keypairs, \
                  and store submissions and replies as age-encrypted blobs"
)]
struct Cli {
    /// Path to tipdrop.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "TIPDROP_CONFIG",
        default_value = "/etc/tipdrop/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides logging.level
    #[arg(long, env = "TIPDROP_LOG")]
    log: Option<String>,

    /// Log format; overrides logging.format
    #[arg(long, env = "TIPDROP_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Source passphrases
    Passphrase {
        #[command(subcommand)]
        action: PassphraseAction,
    },

    /// Source identity and keypair
    Source {
        #[command(subcommand)]
        action: SourceAction,
    },

    /// Encrypt a file (or stdin with `-`) to one or more recipients
    ///
    /// Recipients are keyring fingerprints or age recipients (age1...).
    Encrypt {
        #[arg(long = "to", required = true)]
        to: Vec<String>,
        /// Blob path inside the store; stdout if omitted
        #[arg(long)]
        out: Option<PathBuf>,
        input: PathBuf,
    },

    /// Decrypt a ciphertext file with the source's passphrase
    Decrypt {
        file: PathBuf,
        /// Write plaintext here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Store a submission from the source
    Submit {
        #[command(subcommand)]
        action: SubmitAction,
    },

    /// Journalist replies
    Reply {
        #[command(subcommand)]
        action: ReplyAction,
    },

    /// Shredder maintenance
    Shredder {
        #[command(subcommand)]
        action: ShredderAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration with salts redacted
    Show,
    /// Run the startup checks without serving anything
    Check,
}

#[derive(Subcommand, Debug)]
enum PassphraseAction {
    /// Print a freshly generated passphrase
    Generate {
        /// Number of words (overrides passphrase.words)
        #[arg(long)]
        words: Option<usize>,
    },
}

#[derive(Subcommand, Debug)]
enum SourceAction {
    /// Print the identifier for a passphrase
    Id,
    /// Generate the source's keypair if it has none
    Create,
    /// Show the source's public key
    Lookup {
        /// Look up by identifier instead of passphrase
        #[arg(long)]
        id: Option<String>,
    },
    /// Delete the source's keypair and securely delete its blobs
    Delete {
        /// Delete by identifier instead of passphrase
        #[arg(long)]
        id: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum SubmitAction {
    /// Submit a text message
    Message {
        #[arg(long, default_value = "")]
        designation: String,
        text: String,
    },
    /// Submit a document (compressed before encryption)
    File {
        #[arg(long, default_value = "")]
        designation: String,
        path: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum ReplyAction {
    /// Store a reply to a source
    Send {
        #[arg(long)]
        id: String,
        #[arg(long, default_value = "")]
        designation: String,
        text: String,
    },
    /// Read a reply with the source's passphrase
    Read { path: PathBuf },
}

#[derive(Subcommand, Debug)]
enum ShredderAction {
    /// Securely delete everything waiting in the shredder
    Clear,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = TipdropConfig::load(&cli.config)?;

    let level = cli.log.clone().unwrap_or_else(|| config.logging.level.clone());
    let format = cli.log_format.clone().unwrap_or_else(|| {
        if config.logging.format.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    });
    init_logging(&level, &format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        config_found = cli.config.exists(),
        "tipdrop starting"
    );

    match cli.command {
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
        Commands::Config { action: ConfigAction::Check } => cmd_config_check(&config),
        Commands::Passphrase { action: PassphraseAction::Generate { words } } => {
            cmd_passphrase_generate(&config, words)
        }
        Commands::Source { action } => cmd_source(&config, action).await,
        Commands::Encrypt { to, out, input } => cmd_encrypt(&config, &to, out.as_deref(), &input),
        Commands::Decrypt { file, out } => cmd_decrypt(&config, &file, out.as_deref()),
        Commands::Submit { action } => cmd_submit(&config, action),
        Commands::Reply { action: ReplyAction::Send { id, designation, text } } => {
            cmd_reply_send(&config, &id, &designation, &text)
        }
        Commands::Reply { action: ReplyAction::Read { path } } => cmd_reply_read(&config, &path),
        Commands::Shredder { action: ShredderAction::Clear } => cmd_shredder_clear(&config),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries plaintext and ciphertext, so logs go to stderr
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Shared setup ──────────────────────────────────────────────────────────────

fn open_crypto(config: &TipdropConfig) -> Result<Arc<SourceCrypto>> {
    let keyring = DirKeyring::open(&config.keyring.dir)?;
    Ok(Arc::new(SourceCrypto::new(config, Arc::new(keyring))?))
}

fn open_submissions(config: &TipdropConfig) -> Result<Submissions> {
    let crypto = open_crypto(config)?;
    let store = BlobStore::from_config(&config.storage)?;
    Ok(Submissions::new(crypto, store))
}

fn read_passphrase() -> Result<SecretString> {
    if let Ok(p) = std::env::var(PASSPHRASE_ENV) {
        if !p.trim().is_empty() {
            return Ok(SecretString::from(p));
        }
    }
    let p = rpassword::prompt_password("passphrase: ").context("reading passphrase")?;
    Ok(SecretString::from(p))
}

/// Identifier from `--id`, or derived from the passphrase.
fn resolve_source(crypto: &SourceCrypto, id: Option<&str>) -> Result<SourceId> {
    match id {
        Some(id) => Ok(SourceId::parse(id.trim())?),
        None => Ok(crypto.identifier(&read_passphrase()?)?),
    }
}

/// Report a crypto or storage failure the same way regardless of cause.
fn fail_uniformly(context: &str, err: TipdropError) -> ! {
    tracing::debug!(error = %err, "{context} failed");
    eprintln!("{}", err.user_message());
    std::process::exit(1);
}

fn write_output(out: Option<&Path>, bytes: &[u8]) -> Result<()> {
    match out {
        Some(path) => std::fs::write(path, bytes)
            .with_context(|| format!("writing {}", path.display())),
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(bytes).context("writing to stdout")?;
            stdout.flush().context("flushing stdout")
        }
    }
}

// ── `tipdrop config` ──────────────────────────────────────────────────────────

fn cmd_config_show(config: &TipdropConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();

    let mut shown = config.clone();
    for salt in [&mut shown.identity.id_salt, &mut shown.identity.secret_salt] {
        if !salt.is_empty() {
            *salt = "[REDACTED]".into();
        }
    }
    let rendered = toml::to_string_pretty(&shown).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

fn cmd_config_check(config: &TipdropConfig) -> Result<()> {
    // Deriver and operator key are built exactly as a server would build them
    let crypto = SourceCrypto::new(config, Arc::new(MemoryKeyring::new()))?;
    println!("identity:  ok (argon2id m={}KiB t={} p={})",
        config.identity.argon2_mem_cost_kib,
        config.identity.argon2_time_cost,
        config.identity.argon2_parallelism,
    );
    println!("operator:  {}", crypto.operator_fingerprint());
    println!("keyring:   {} ({})", config.keyring.dir.display(), config.keyring.algorithm);
    println!("store:     {}", config.storage.root.display());
    println!("shredder:  {}", config.storage.shredder.display());
    Ok(())
}

// ── `tipdrop passphrase generate` ─────────────────────────────────────────────

fn cmd_passphrase_generate(config: &TipdropConfig, words: Option<usize>) -> Result<()> {
    use secrecy::ExposeSecret;

    let list = Wordlist::load(&config.passphrase.wordlist)?;
    let count = words.unwrap_or(config.passphrase.words);
    let passphrase = list.generate(count)?;
    eprintln!(
        "# {count} words from {} ({:.1} bits)",
        config.passphrase.wordlist.display(),
        list.entropy_bits(count)
    );
    println!("{}", passphrase.expose_secret());
    Ok(())
}

// ── `tipdrop source` ──────────────────────────────────────────────────────────

async fn cmd_source(config: &TipdropConfig, action: SourceAction) -> Result<()> {
    match action {
        SourceAction::Id => {
            let crypto = open_crypto(config)?;
            let id = crypto.identifier(&read_passphrase()?)?;
            println!("{id}");
        }
        SourceAction::Create => {
            let crypto = open_crypto(config)?;
            let derived = crypto.derive(&read_passphrase()?)?;
            let id = derived.id.clone();

            let queue = KeygenQueue::spawn(crypto.clone(), 1);
            queue
                .enqueue(GenerateKeypair {
                    id: derived.id,
                    secret: derived.secret,
                })
                .await?;
            let stats = queue.shutdown().await?;
            if stats.failed > 0 {
                anyhow::bail!("keypair generation failed for source {}", id.short());
            }

            let key = crypto
                .lookup_public_key(&id)?
                .context("keypair missing after generation")?;
            println!("id:          {id}");
            println!("fingerprint: {}", key.fingerprint);
            println!("recipient:   {}", key.recipient);
            if stats.generated == 0 {
                eprintln!("# keypair already existed");
            }
        }
        SourceAction::Lookup { id } => {
            let crypto = open_crypto(config)?;
            let id = resolve_source(&crypto, id.as_deref())?;
            match crypto.lookup_public_key(&id)? {
                Some(key) => {
                    println!("fingerprint:   {}", key.fingerprint);
                    println!("recipient:     {}", key.recipient);
                    println!("created_at_ms: {}", key.created_at_ms);
                }
                None => println!("no keypair for source {}", id.short()),
            }
        }
        SourceAction::Delete { id } => {
            let subs = open_submissions(config)?;
            let id = resolve_source(subs.crypto(), id.as_deref())?;
            let deleted = subs.delete_source(&id)?;
            println!(
                "deleted {} keypair(s), shredded {} file(s)",
                deleted.keypairs, deleted.files_shredded
            );
        }
    }
    Ok(())
}

// ── `tipdrop encrypt` / `tipdrop decrypt` ─────────────────────────────────────

fn cmd_encrypt(config: &TipdropConfig, to: &[String], out: Option<&Path>, input: &Path) -> Result<()> {
    let crypto = open_crypto(config)?;
    let reader: Box<dyn Read> = if input == Path::new("-") {
        Box::new(std::io::stdin().lock())
    } else {
        Box::new(
            std::fs::File::open(input)
                .with_context(|| format!("opening {}", input.display()))?,
        )
    };

    match out {
        Some(out) => {
            let store = BlobStore::from_config(&config.storage)?;
            let written = crypto.encrypt_to_path(reader, to, &store, out)?;
            eprintln!("wrote {}", written.display());
        }
        None => {
            let ciphertext = crypto.encrypt(reader, to)?;
            write_output(None, &ciphertext)?;
        }
    }
    Ok(())
}

fn cmd_decrypt(config: &TipdropConfig, file: &Path, out: Option<&Path>) -> Result<()> {
    let crypto = open_crypto(config)?;
    let passphrase = read_passphrase()?;
    let ciphertext = match std::fs::File::open(file) {
        Ok(f) => f,
        Err(e) => fail_uniformly("decrypt", e.into()),
    };
    match crypto.decrypt(&passphrase, ciphertext) {
        Ok(plaintext) => write_output(out, &plaintext),
        Err(e) => fail_uniformly("decrypt", e),
    }
}

// ── `tipdrop submit` ──────────────────────────────────────────────────────────

fn cmd_submit(config: &TipdropConfig, action: SubmitAction) -> Result<()> {
    let subs = open_submissions(config)?;
    let id = subs.crypto().identifier(&read_passphrase()?)?;
    let path = match action {
        SubmitAction::Message { designation, text } => {
            subs.save_message(&id, &designation, &text)?
        }
        SubmitAction::File { designation, path } => {
            let file = std::fs::File::open(&path)
                .with_context(|| format!("opening {}", path.display()))?;
            subs.save_file(&id, &designation, file)?
        }
    };
    println!("{}", path.display());
    Ok(())
}

// ── `tipdrop reply` ───────────────────────────────────────────────────────────

fn cmd_reply_send(config: &TipdropConfig, id: &str, designation: &str, text: &str) -> Result<()> {
    let subs = open_submissions(config)?;
    let id = SourceId::parse(id.trim())?;
    let path = subs.save_reply(&id, designation, text)?;
    println!("{}", path.display());
    Ok(())
}

fn cmd_reply_read(config: &TipdropConfig, path: &Path) -> Result<()> {
    let subs = open_submissions(config)?;
    let passphrase = read_passphrase()?;
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        subs.store().root().join(path)
    };
    match subs.read_reply(&passphrase, &path) {
        Ok(plaintext) => write_output(None, &plaintext),
        Err(e) => fail_uniformly("reply read", e),
    }
}

// ── `tipdrop shredder clear` ──────────────────────────────────────────────────

fn cmd_shredder_clear(config: &TipdropConfig) -> Result<()> {
    let store = BlobStore::from_config(&config.storage)?;
    let shredded = store.clear_shredder()?;
    println!("shredded {shredded} file(s)");
    Ok(())
}
