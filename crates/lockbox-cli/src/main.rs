//! lockbox: encryption at rest for an offline archive
//!
//! Usage:
//!   lockbox encrypt                      encrypt the store, tokens and attachments
//!   lockbox decrypt                      reverse of encrypt
//!   lockbox key init [--provider P]      generate a key into the keyring or a keyfile
//!   lockbox key export --out <path>      back up the key (or --stdout)
//!   lockbox key import --from <path>     restore a key (or --stdin)
//!   lockbox key fingerprint              show which key is active
//!   lockbox key rotate                   re-key everything under a fresh key
//!   lockbox key rotate --resume <file>   finish a rotation that stopped partway
//!   lockbox config show                  print the effective configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::SecretString;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lockbox_core::LockboxConfig;
use lockbox_keys::{KeyContext, KeyPersistence};
use lockbox_vault::keyops::KeyPlacement;
use lockbox_vault::{
    AnalyticsCache, Archive, CacheInvalidator, ExportTarget, KeyInput, MigrationReport,
};

// ── CLI structure ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "lockbox",
    version,
    about = "lockbox: encryption at rest for an offline archive",
    long_about = "Encrypts the archive database, credential tokens and attachments \
                  with a single 256-bit key, and manages that key across the OS keyring, \
                  keyfiles, environment variables, passphrases and external commands."
)]
struct Cli {
    /// Path to lockbox.toml config file
    #[arg(long, short = 'c', env = "LOCKBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (overrides [log] level)
    #[arg(long, env = "LOCKBOX_LOG")]
    log_level: Option<String>,

    /// Log format (overrides [log] format)
    #[arg(long, env = "LOCKBOX_LOG_FORMAT")]
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
    /// Encrypt the archive (generates a keyring key if none exists)
    Encrypt,

    /// Decrypt the archive back to plaintext
    Decrypt,

    /// Manage the encryption key
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },

    /// Show or inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum KeyAction {
    /// Generate a new key and store it (keyring or keyfile only)
    Init {
        /// Provider to store the key in (default: the configured provider)
        #[arg(long, value_parser = ["keyring", "keyfile"])]
        provider: Option<String>,
    },

    /// Write the current key out as base64
    Export {
        /// File to write the key to (created with mode 0600)
        #[arg(long, conflicts_with = "stdout", required_unless_present = "stdout")]
        out: Option<PathBuf>,

        /// Print the key to stdout instead
        #[arg(long)]
        stdout: bool,
    },

    /// Store a base64 key from a backup
    Import {
        /// File containing the base64 key
        #[arg(long, conflicts_with = "stdin", required_unless_present = "stdin")]
        from: Option<PathBuf>,

        /// Read the base64 key from stdin
        #[arg(long)]
        stdin: bool,

        /// Provider to store the key in (default: the configured provider)
        #[arg(long, value_parser = ["keyring", "keyfile"])]
        provider: Option<String>,

        /// Keyfile destination (keyfile provider)
        #[arg(long)]
        keyfile_path: Option<PathBuf>,
    },

    /// Print the active key's fingerprint
    Fingerprint,

    /// Replace the key and re-encrypt everything under it
    Rotate {
        /// Finish an interrupted rotation to the key in FILE ("-" for stdin)
        #[arg(long, value_name = "FILE")]
        resume: Option<PathBuf>,

        /// Key the data is moving away from, when the provider already
        /// holds the new one
        #[arg(long, value_name = "FILE", requires = "resume")]
        previous_key: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(lockbox_core::config::default_config_path);
    let config = LockboxConfig::load(&config_path)
        .with_context(|| format!("loading config: {}", config_path.display()))?;

    let level = cli.log_level.as_deref().unwrap_or(&config.log.level);
    let format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| match config.log.format.as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        });
    init_logging(level, &format);
    tracing::debug!(
        path = %config_path.display(),
        provider = config.encryption.provider_name(),
        enabled = config.encryption.enabled,
        "loaded config"
    );

    let mut archive = Archive::new(config, config_path);
    let needs_key = !matches!(cli.command, Commands::Config { .. });
    if needs_key && archive.config.encryption.provider_name() == "passphrase" {
        archive = archive.with_passphrase(read_passphrase()?);
    }

    let ctx = KeyContext::default();
    cancel_on_ctrl_c(&ctx);

    match cli.command {
        Commands::Encrypt => cmd_encrypt(&mut archive, &ctx).await,
        Commands::Decrypt => cmd_decrypt(&mut archive, &ctx).await,
        Commands::Key { action } => match action {
            KeyAction::Init { provider } => {
                cmd_key_init(&mut archive, &ctx, provider.as_deref()).await
            }
            KeyAction::Export { out, stdout: _ } => cmd_key_export(&archive, &ctx, out).await,
            KeyAction::Import {
                from,
                stdin: _,
                provider,
                keyfile_path,
            } => cmd_key_import(&mut archive, from, provider.as_deref(), keyfile_path.as_deref()),
            KeyAction::Fingerprint => cmd_key_fingerprint(&archive, &ctx).await,
            KeyAction::Rotate {
                resume,
                previous_key,
            } => cmd_key_rotate(&archive, &ctx, resume, previous_key).await,
        },
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&archive.config, &archive.config_path),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

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

/// Stop bulk work between files on the first Ctrl-C.
fn cancel_on_ctrl_c(ctx: &KeyContext) {
    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\ninterrupted: finishing in-flight files...");
            cancel.cancel();
        }
    });
}

/// Passphrase for the passphrase provider: LOCKBOX_PASSPHRASE, else a prompt.
fn read_passphrase() -> Result<SecretString> {
    if let Ok(pass) = std::env::var("LOCKBOX_PASSPHRASE") {
        return Ok(SecretString::from(pass));
    }
    if !std::io::stdin().is_terminal() {
        anyhow::bail!(
            "passphrase provider needs a passphrase\n\
             Set LOCKBOX_PASSPHRASE or run lockbox from a terminal."
        );
    }
    let pass = rpassword::prompt_password("Archive passphrase: ").context("reading passphrase")?;
    Ok(SecretString::from(pass))
}

// ── Progress display ──────────────────────────────────────────────────────────

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} {spinner} {pos} files {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn backup_reminder() {
    println!();
    println!("Back up this key now. Without it the archive cannot be read:");
    println!("  lockbox key export --out <path>");
}

fn print_migration(report: &MigrationReport, verb: &str) {
    println!("  fingerprint: {}", report.fingerprint);
    println!(
        "  database:    {}",
        if report.store_migrated { verb } else { "unchanged" }
    );
    println!(
        "  files:       {} {} ({} scanned)",
        report.files.changed, verb, report.files.scanned
    );
}

// ── encrypt / decrypt ─────────────────────────────────────────────────────────

async fn cmd_encrypt(archive: &mut Archive, ctx: &KeyContext) -> Result<()> {
    let pb = make_spinner("encrypt");
    let result =
        lockbox_vault::enable_encryption(archive, ctx, &|n| pb.set_position(n as u64)).await;
    pb.finish_and_clear();
    let report = result.context("encrypting archive")?;

    println!("Encryption enabled.");
    if report.key_generated {
        println!("  key:         generated and stored in the OS keyring ({})", archive.scope());
    }
    if report.salt_generated {
        println!("  salt:        generated and saved to {}", archive.config_path.display());
    }
    print_migration(&report, "encrypted");
    if report.key_generated {
        backup_reminder();
    }
    Ok(())
}

async fn cmd_decrypt(archive: &mut Archive, ctx: &KeyContext) -> Result<()> {
    let pb = make_spinner("decrypt");
    let result =
        lockbox_vault::disable_encryption(archive, ctx, &|n| pb.set_position(n as u64)).await;
    pb.finish_and_clear();
    let report = result.context("decrypting archive")?;

    println!("Encryption disabled. The archive is stored in plaintext.");
    print_migration(&report, "decrypted");
    Ok(())
}

// ── key ───────────────────────────────────────────────────────────────────────

fn print_placement(placed: &KeyPlacement) {
    println!("  provider:    {}", placed.provider);
    println!("  location:    {}", placed.location);
    println!("  fingerprint: {}", placed.fingerprint);
}

async fn cmd_key_init(
    archive: &mut Archive,
    ctx: &KeyContext,
    provider: Option<&str>,
) -> Result<()> {
    let placed = lockbox_vault::init_key(archive, ctx, provider)
        .await
        .context("initializing key")?;
    println!("Key created.");
    print_placement(&placed);
    println!();
    println!("Encryption is enabled in {}.", archive.config_path.display());
    println!("Run `lockbox encrypt` to encrypt existing data.");
    backup_reminder();
    Ok(())
}

async fn cmd_key_export(archive: &Archive, ctx: &KeyContext, out: Option<PathBuf>) -> Result<()> {
    let target = match out {
        Some(path) => ExportTarget::File(path),
        None => ExportTarget::Stdout,
    };
    let exported = lockbox_vault::export_key(archive, ctx, &target)
        .await
        .context("exporting key")?;

    match (&target, exported.key_b64) {
        (_, Some(key)) => {
            println!("{}", key.as_str());
            eprintln!("fingerprint: {}", exported.fingerprint);
        }
        (ExportTarget::File(path), None) => {
            println!("Key written to {} (mode 0600).", path.display());
            println!("  fingerprint: {}", exported.fingerprint);
            println!("Store it somewhere safe and separate from the archive.");
        }
        (ExportTarget::Stdout, None) => {}
    }
    Ok(())
}

fn cmd_key_import(
    archive: &mut Archive,
    from: Option<PathBuf>,
    provider: Option<&str>,
    keyfile_path: Option<&Path>,
) -> Result<()> {
    let input = match from {
        Some(path) => KeyInput::File(path),
        None => KeyInput::Stdin,
    };
    let encoded = lockbox_vault::read_key_input(&input).context("reading key")?;
    let placed = lockbox_vault::import_key(archive, &encoded, provider, keyfile_path)
        .context("importing key")?;
    println!("Key imported.");
    print_placement(&placed);
    Ok(())
}

async fn cmd_key_fingerprint(archive: &Archive, ctx: &KeyContext) -> Result<()> {
    let fingerprint = lockbox_vault::fingerprint(archive, ctx)
        .await
        .context("resolving key")?;
    println!("{fingerprint}");
    Ok(())
}

/// `-` reads the key from stdin.
fn key_input(path: PathBuf) -> KeyInput {
    if path.as_os_str() == "-" {
        KeyInput::Stdin
    } else {
        KeyInput::File(path)
    }
}

async fn cmd_key_rotate(
    archive: &Archive,
    ctx: &KeyContext,
    resume: Option<PathBuf>,
    previous_key: Option<PathBuf>,
) -> Result<()> {
    let resume = match resume {
        Some(path) => {
            let (target, previous) = (key_input(path), previous_key.map(key_input));
            if matches!(target, KeyInput::Stdin) && matches!(previous, Some(KeyInput::Stdin)) {
                anyhow::bail!("--resume and --previous-key cannot both read stdin");
            }
            let target = lockbox_vault::load_key(&target).context("reading new key")?;
            let previous = previous
                .map(|input| lockbox_vault::load_key(&input))
                .transpose()
                .context("reading previous key")?;
            Some((target, previous))
        }
        None => None,
    };

    let analytics = AnalyticsCache::new(archive.layout().analytics);
    let caches: [&dyn CacheInvalidator; 1] = [&analytics];

    let pb = make_spinner("rotate");
    let on_file = |n: usize| pb.set_position(n as u64);
    let result = match resume {
        Some((target, previous)) => {
            lockbox_vault::resume_rotation(archive, ctx, target, previous, &caches, &on_file).await
        }
        None => lockbox_vault::rotate_key(archive, ctx, &caches, &on_file).await,
    };
    pb.finish_and_clear();
    let report = result.context("rotating key")?;

    println!("Key rotated.");
    println!("  old fingerprint: {}", report.old_fingerprint);
    println!("  new fingerprint: {}", report.new_fingerprint);
    println!(
        "  database:        {}",
        if report.store_rekeyed { "re-keyed" } else { "not present" }
    );
    println!(
        "  files:           {} re-encrypted ({} scanned)",
        report.files.changed, report.files.scanned
    );
    if report.cache_invalidated {
        println!("  analytics cache: cleared, rebuilt on next use");
    }

    match (report.persistence, report.manual_key_b64) {
        (KeyPersistence::Stored, _) => backup_reminder(),
        (KeyPersistence::ManualUpdateRequired { provider }, Some(key)) => {
            println!();
            println!("The {provider} provider is read-only. Update its source with the new key");
            println!("before running lockbox again; the old key no longer opens the archive.");
            println!();
            println!("  {}", key.as_str());
        }
        (KeyPersistence::ManualUpdateRequired { provider }, None) => {
            println!("The {provider} provider must be updated by hand with the new key.");
        }
    }
    Ok(())
}

// ── config ────────────────────────────────────────────────────────────────────

fn cmd_config_show(config: &LockboxConfig, path: &Path) -> Result<()> {
    let exists = path.exists();
    println!(
        "# {}{}",
        path.display(),
        if exists { "" } else { " (not found, showing defaults)" }
    );
    let rendered = toml::to_string_pretty(config).context("serializing config")?;
    print!("{rendered}");

    let layout = config.layout();
    println!();
    println!("# resolved paths");
    println!("#   database:    {}", layout.database.display());
    println!("#   attachments: {}", layout.attachments.display());
    println!("#   tokens:      {}", layout.tokens.display());
    println!("#   analytics:   {}", layout.analytics.display());
    Ok(())
}
