//! Compound document signer CLI
//!
//! Inspect compound documents, add or extract streams, compute the content
//! digest that a signature covers, and embed detached signatures.

use clap::{Parser, Subcommand, ValueEnum};
use comdoc_signer::{
    open_file, open_file_read_only, CompoundDigest, ConfigManager, Container,
    EngineConfiguration, EntryKind, ExportFormat, HashAlgorithm, SignatureEmbedder,
};
use miette::{Context, IntoDiagnostic, Result};
use std::fs::OpenOptions;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "comdoc-signer")]
#[command(about = "Compound document (MSI / OLE2) inspection and signature embedding")]
#[command(long_about = "
Compound document signer - container tooling for code signing

EXAMPLES:
    # List every storage and stream
    comdoc-signer list setup.msi

    # Digest to sign (signature streams excluded)
    comdoc-signer digest setup.msi --hash sha256

    # Embed a detached PKCS#7 signature
    comdoc-signer embed setup.msi signature.p7s

ENVIRONMENT VARIABLES:
    RUST_LOG        Logging level (debug, info, warn, error); overrides --verbose
")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Debug logging (also enabled by `verbose = true` in the config)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all entries
    List {
        file: PathBuf,
    },

    /// Write a stream's content to a file or stdout
    Extract {
        file: PathBuf,
        /// Stream path inside the container, e.g. /Storage/Stream
        stream: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Add or replace a stream
    Add {
        file: PathBuf,
        stream: String,
        /// File holding the stream content
        input: PathBuf,
    },

    /// Remove a stream
    Remove {
        file: PathBuf,
        stream: String,
    },

    /// Compute the content digest
    Digest {
        file: PathBuf,
        /// Hash algorithm (overrides config)
        #[arg(long, value_enum)]
        hash: Option<HashAlgorithmArg>,
    },

    /// Embed a detached signature
    Embed {
        file: PathBuf,
        /// DER-encoded PKCS#7 signature
        signature: PathBuf,
        /// Extended (metadata) signature
        #[arg(long)]
        signature_ex: Option<PathBuf>,
        /// Replace an existing signature
        #[arg(long)]
        force: bool,
    },

    /// Create an empty compound document
    Create {
        file: PathBuf,
        /// Sector size in bytes (overrides config)
        #[arg(long, value_parser = ["512", "4096"])]
        sector_size: Option<String>,
    },

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Create default configuration file
    Init,

    /// Set a configuration value
    Set {
        /// Configuration key
        key: String,
        /// Configuration value
        value: String,
    },

    /// Export configuration
    Export {
        /// Export format
        #[arg(short, long, value_enum, default_value = "toml")]
        format: ExportFormatArg,
        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum HashAlgorithmArg {
    Sha256,
    Sha384,
    Sha512,
}

impl From<HashAlgorithmArg> for HashAlgorithm {
    fn from(arg: HashAlgorithmArg) -> Self {
        match arg {
            HashAlgorithmArg::Sha256 => HashAlgorithm::Sha256,
            HashAlgorithmArg::Sha384 => HashAlgorithm::Sha384,
            HashAlgorithmArg::Sha512 => HashAlgorithm::Sha512,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportFormatArg {
    Toml,
    Json,
}

impl From<ExportFormatArg> for ExportFormat {
    fn from(arg: ExportFormatArg) -> Self {
        match arg {
            ExportFormatArg::Toml => ExportFormat::Toml,
            ExportFormatArg::Json => ExportFormat::Json,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let manager = match &cli.config {
        Some(path) => ConfigManager::with_path(path),
        None => ConfigManager::new().into_diagnostic()?,
    };
    // A broken config file must not block the config subcommands.
    let loaded = manager.load_or_default();

    let default_level = if cli.verbose {
        "debug"
    } else {
        loaded
            .as_ref()
            .map_or("info", EngineConfiguration::default_log_level)
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match cli.command {
        Commands::Config(cmd) => handle_config_command(&manager, cmd),
        command => {
            let config = loaded.into_diagnostic()?;
            handle_container_command(command, &config)
        }
    }
}

fn handle_container_command(command: Commands, config: &EngineConfiguration) -> Result<()> {
    match command {
        Commands::List { file } => {
            let container = open_file_read_only(&file).into_diagnostic()?;
            println!("📦 {} ({} byte sectors)", file.display(), container.sector_size());
            for entry in container.walk() {
                let marker = match entry.kind {
                    EntryKind::Root | EntryKind::Storage => "📁",
                    _ => "  ",
                };
                println!("{marker} {:>10}  {}", entry.size, entry.path.escape_debug());
            }
        }

        Commands::Extract {
            file,
            stream,
            output,
        } => {
            let mut container = open_file_read_only(&file).into_diagnostic()?;
            let data = container
                .read_stream_to_vec(&stream)
                .into_diagnostic()
                .wrap_err_with(|| format!("Failed to read stream {stream}"))?;
            match output {
                Some(path) => {
                    std::fs::write(&path, &data).into_diagnostic()?;
                    println!("✅ Extracted {} bytes to {}", data.len(), path.display());
                }
                None => {
                    use std::io::Write;
                    std::io::stdout().write_all(&data).into_diagnostic()?;
                }
            }
        }

        Commands::Add {
            file,
            stream,
            input,
        } => {
            let content = std::fs::read(&input)
                .into_diagnostic()
                .wrap_err_with(|| format!("Failed to read {}", input.display()))?;
            let mut container = open_file(&file).into_diagnostic()?;
            container.put_stream(&stream, &content).into_diagnostic()?;
            container.commit().into_diagnostic()?;
            println!("✅ Wrote {} bytes to {stream}", content.len());
        }

        Commands::Remove { file, stream } => {
            let mut container = open_file(&file).into_diagnostic()?;
            container.remove_stream(&stream).into_diagnostic()?;
            container.commit().into_diagnostic()?;
            println!("✅ Removed {stream}");
        }

        Commands::Digest { file, hash } => {
            let algorithm = match hash {
                Some(arg) => arg.into(),
                None => config.hash_algorithm().into_diagnostic()?,
            };
            let mut container = open_file_read_only(&file).into_diagnostic()?;
            let digest = CompoundDigest::compute(&mut container, algorithm).into_diagnostic()?;
            println!("{algorithm}: {}", hex::encode(digest));
        }

        Commands::Embed {
            file,
            signature,
            signature_ex,
            force,
        } => {
            let sig = std::fs::read(&signature)
                .into_diagnostic()
                .wrap_err_with(|| format!("Failed to read {}", signature.display()))?;
            let sig_ex = signature_ex
                .as_ref()
                .map(std::fs::read)
                .transpose()
                .into_diagnostic()
                .wrap_err("Failed to read extended signature")?;

            let embedder = SignatureEmbedder::from_config(config)
                .with_replace_existing(force || config.replace_existing_signature);
            let container = open_file(&file).into_diagnostic()?;
            embedder
                .embed(container, &sig, sig_ex.as_deref())
                .into_diagnostic()?;
            println!("✅ Signature embedded into {}", file.display());
        }

        Commands::Create { file, sector_size } => {
            let size = match sector_size {
                Some(s) => comdoc_signer::SectorSize::from_bytes(s.parse().into_diagnostic()?)
                    .into_diagnostic()?,
                None => config.sector_size().into_diagnostic()?,
            };
            let handle = OpenOptions::new()
                .read(true)
                .write(true)
                .create_new(true)
                .open(&file)
                .into_diagnostic()
                .wrap_err_with(|| format!("Failed to create {}", file.display()))?;
            Container::create(handle, size).into_diagnostic()?;
            println!("✅ Created {}", file.display());
        }

        Commands::Config(_) => unreachable!("handled in main"),
    }

    Ok(())
}

fn handle_config_command(manager: &ConfigManager, cmd: ConfigCommands) -> Result<()> {
    match cmd {
        ConfigCommands::Show => match manager.load() {
            Ok(config) => {
                println!("📋 Current Configuration:");
                println!("  Hash algorithm: {}", config.default_hash_algorithm);
                println!("  Sector size: {}", config.sector_size);
                println!("  Verify after commit: {}", config.verify_after_commit);
                println!(
                    "  Replace existing signature: {}",
                    config.replace_existing_signature
                );
                println!("  Verbose logging: {}", config.verbose);
                println!("  Configuration file: {}", manager.config_path().display());
            }
            Err(_) => {
                println!("📋 No configuration file found. Use 'config init' to create one.");
            }
        },

        ConfigCommands::Init => {
            manager.load_or_create_default().into_diagnostic()?;
            println!(
                "✅ Configuration initialized: {}",
                manager.config_path().display()
            );
        }

        ConfigCommands::Set { key, value } => {
            manager.update_value(&key, &value).into_diagnostic()?;
            println!("✅ Configuration updated: {key} = {value}");
        }

        ConfigCommands::Export { format, output } => {
            let content = manager.export_config(format.into()).into_diagnostic()?;
            if let Some(output_path) = output {
                std::fs::write(&output_path, content).into_diagnostic()?;
                println!("✅ Configuration exported to: {}", output_path.display());
            } else {
                println!("{content}");
            }
        }
    }

    Ok(())
}
