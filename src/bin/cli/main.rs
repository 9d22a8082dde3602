use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use quillvault::note::EncryptionType;
use quillvault::password::check_strength;
use quillvault::Vault;

#[derive(Parser)]
#[command(name = "quillvault", about = "Encrypted Markdown notebook vault", version)]
struct Cli {
    /// Vault directory (default: ~/Documents/QuillVault)
    #[arg(long, global = true)]
    vault: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize the vault directory and default settings
    Init,

    /// List notes in the vault
    List,

    /// Create a note and save it
    New {
        /// Note title
        title: String,
        /// Initial content (use "-" to read from stdin)
        #[arg(long)]
        content: Option<String>,
    },

    /// Print a note's content, decrypting if needed
    Show {
        /// Note path relative to the vault root
        path: String,
        /// Password for encrypted notes
        #[arg(long)]
        password: Option<String>,
    },

    /// Encrypt a note in place
    Encrypt {
        /// Note path relative to the vault root
        path: String,
        #[arg(long)]
        password: String,
        /// Authentication: password, biometric, or both
        #[arg(long, default_value = "password")]
        auth: String,
    },

    /// Remove encryption from a note permanently
    Decrypt {
        /// Note path relative to the vault root
        path: String,
        #[arg(long)]
        password: String,
    },

    /// Score a candidate password
    Strength {
        password: String,
    },

    /// Show or change settings
    #[command(subcommand)]
    Settings(SettingsCommand),
}

#[derive(Subcommand)]
enum SettingsCommand {
    /// Print the current settings document
    Show,
    /// Change one or more settings
    Set {
        /// Default encryption algorithm: aes256 or chacha20
        #[arg(long)]
        encryption: Option<String>,
        /// Auto-save interval in minutes (1-60)
        #[arg(long)]
        interval: Option<u32>,
        /// Theme: light, dark, or auto
        #[arg(long)]
        theme: Option<String>,
        /// Default save location for new notes
        #[arg(long)]
        location: Option<String>,
        /// Enable or disable biometric unlock
        #[arg(long)]
        biometric: Option<bool>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let root = match &cli.vault {
        Some(path) => path.clone(),
        None => Vault::default_root()?,
    };
    let vault = Vault::open(&root)
        .with_context(|| format!("cannot open vault at {}", root.display()))?;

    match cli.command {
        Command::Init => {
            vault.update_settings(|_| Ok(()))?;
            println!("initialized vault at {}", root.display());
        }
        Command::List => {
            let entries = vault.list_notes()?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("no notes yet");
            } else {
                for entry in entries {
                    let marker = if entry.is_encrypted { "E" } else { " " };
                    println!("{marker} {}", entry.path);
                }
            }
        }
        Command::New { title, content } => {
            let content = resolve_content(content);
            let note = vault.create_note(&title, &content)?;
            vault.save_note(&note.id).await?;
            println!("{}", note.file_path);
        }
        Command::Show { path, password } => {
            let note = vault.open_note(&path, password.as_deref())?;
            print!("{}", note.content);
            if !note.content.ends_with('\n') {
                println!();
            }
        }
        Command::Encrypt {
            path,
            password,
            auth,
        } => {
            let auth_type = EncryptionType::parse(&auth)
                .with_context(|| format!("unknown auth type: {auth}"))?;
            let note = vault.open_note(&path, None)?;
            let encrypted = vault.encrypt_note(&note.id, &password, auth_type)?;
            println!("{}", encrypted.file_path);
        }
        Command::Decrypt { path, password } => {
            let note = vault.open_note(&path, Some(&password))?;
            let plain = vault.remove_encryption(&note.id, &password)?;
            println!("{}", plain.file_path);
        }
        Command::Strength { password } => {
            let report = check_strength(&password);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{} (score {})", report.label.as_str(), report.score);
                for suggestion in &report.suggestions {
                    println!("  - {suggestion}");
                }
            }
        }
        Command::Settings(SettingsCommand::Show) => {
            let settings = vault.settings()?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        Command::Settings(SettingsCommand::Set {
            encryption,
            interval,
            theme,
            location,
            biometric,
        }) => {
            let updated = vault.update_settings(|s| {
                if let Some(algorithm) = &encryption {
                    s.set_encryption(algorithm)?;
                }
                if let Some(minutes) = interval {
                    s.set_auto_save_interval(minutes)?;
                }
                if let Some(theme) = &theme {
                    s.set_theme(theme)?;
                }
                if let Some(location) = &location {
                    s.set_save_location(location);
                }
                if let Some(enabled) = biometric {
                    s.set_biometric(enabled);
                }
                Ok(())
            })?;
            println!("{}", serde_json::to_string_pretty(&updated)?);
        }
    }

    vault.shutdown()?;
    Ok(())
}

/// "-" means read stdin; None means empty.
fn resolve_content(content: Option<String>) -> String {
    match content.as_deref() {
        Some("-") => {
            use std::io::Read;
            let mut buf = String::new();
            if std::io::stdin().read_to_string(&mut buf).is_err() {
                log::error!("failed to read content from stdin");
            }
            buf
        }
        Some(text) => text.to_string(),
        None => String::new(),
    }
}
