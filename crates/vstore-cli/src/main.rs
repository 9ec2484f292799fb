//! vstore command-line interface: dataset and pool administration for a VM host.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::warn;
use rpassword::prompt_password;
use schemars::schema_for;
use serde::Serialize;
use serde_json::to_string_pretty;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use vstore_core::{
    handle, logging,
    model::{DestroyFlags, ListKind},
    props::{Properties, ENCRYPTION_KEY},
    DatasetKind, StoreConfig,
};
use vstore_zfs::ZfsEngine;

const DEFAULT_CONFIG: &str = "/etc/vstore.toml";

/// Top-level command-line options shared by every subcommand.
#[derive(Parser, Debug)]
#[command(
    name = "vstore",
    version,
    about = "Dataset and pool management for virtualization hosts."
)]
struct Cli {
    /// Path to the vstore configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List datasets, optionally of one type and below one name.
    List {
        /// all, filesystem, volume, or snapshot.
        #[arg(short = 't', long = "type", default_value = "all")]
        kind: String,

        filter: Option<String>,
    },

    /// Show one dataset with every property.
    Get { name: String },

    /// Create a filesystem.
    CreateFs {
        name: String,

        /// Property as key=value; repeatable.
        #[arg(short = 'o', long = "property", value_parser = parse_property)]
        properties: Vec<(String, String)>,

        /// Prompt for an encryption passphrase.
        #[arg(long)]
        prompt_key: bool,
    },

    /// Create a volume of a fixed size.
    CreateVol {
        name: String,

        /// Size in bytes, or with a K/M/G/T suffix (powers of 1024).
        #[arg(short, long, value_parser = parse_size)]
        size: u64,

        #[arg(short = 'o', long = "property", value_parser = parse_property)]
        properties: Vec<(String, String)>,

        #[arg(long)]
        prompt_key: bool,
    },

    /// Change properties on a filesystem or volume.
    Edit {
        name: String,

        #[arg(short = 'o', long = "property", value_parser = parse_property)]
        properties: Vec<(String, String)>,
    },

    /// Receive a send stream from a file or stdin.
    Receive {
        name: String,

        /// Roll back and overwrite an existing target.
        #[arg(short = 'F', long)]
        force: bool,

        /// Read the stream from this file instead of stdin.
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Snapshot a filesystem or volume.
    Snapshot {
        dataset: String,
        snapshot: String,

        #[arg(short, long)]
        recursive: bool,
    },

    /// Destroy a dataset.
    Destroy {
        name: String,

        #[arg(short, long)]
        recursive: bool,

        /// Also destroy clones of descendant snapshots.
        #[arg(long)]
        recursive_clones: bool,

        /// Defer snapshot deletion until its last hold is released.
        #[arg(long)]
        defer: bool,

        /// Force-unmount before destroying.
        #[arg(short, long)]
        force: bool,
    },

    /// Inode changes between a snapshot and a later snapshot or the live dataset.
    Diff {
        snapshot: String,
        other: Option<String>,
    },

    /// Pool operations.
    Pool {
        #[command(subcommand)]
        command: PoolCommands,
    },

    /// Validate a configuration file or emit the config schema.
    Validate {
        #[arg(short = 'f', long, default_value = DEFAULT_CONFIG)]
        file: PathBuf,

        /// Output the JSON schema instead of validating a file.
        #[arg(long)]
        schema: bool,
    },
}

#[derive(Subcommand, Debug)]
enum PoolCommands {
    List,

    Get {
        name: String,

        /// Treat NAME as a pool GUID.
        #[arg(long)]
        guid: bool,
    },

    Status { name: String },

    /// Create a pool; trailing arguments are the vdev specification.
    Create {
        name: String,

        #[arg(short = 'o', long = "property", value_parser = parse_property)]
        properties: Vec<(String, String)>,

        #[arg(required = true, trailing_var_arg = true)]
        vdevs: Vec<String>,
    },

    Destroy {
        name: String,

        /// Skip the interactive confirmation.
        #[arg(long)]
        yes: bool,
    },

    Replace {
        name: String,
        old_device: String,
        new_device: String,
    },

    Scrub { name: String },

    Set {
        name: String,
        property: String,
        value: String,
    },

    /// Mean I/O wait in milliseconds for one pool, or across every pool.
    IoDelay { name: Option<String> },
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    logging::init("info");
    let cli = Cli::parse();

    if let Commands::Validate { file, schema } = &cli.command {
        return validate(file, *schema);
    }

    let config = load_config(&cli.config)?;
    let engine = ZfsEngine::from_config(&config).context("failed to set up storage engine")?;
    handle::install(Box::new(engine))?;
    let engine = handle::engine()?;

    match cli.command {
        Commands::List { kind, filter } => {
            let kind: ListKind = kind.parse()?;
            print_json(&engine.list(kind, filter.as_deref().unwrap_or_default())?)
        }
        Commands::Get { name } => print_json(&handle::get_dataset(&name)?),
        Commands::CreateFs {
            name,
            properties,
            prompt_key,
        } => {
            let props = build_properties(&name, properties, prompt_key)?;
            print_json(&handle::create_filesystem(&name, &props)?)
        }
        Commands::CreateVol {
            name,
            size,
            properties,
            prompt_key,
        } => {
            let props = build_properties(&name, properties, prompt_key)?;
            print_json(&handle::create_volume(&name, size, &props)?)
        }
        Commands::Edit { name, properties } => {
            let props: Properties = properties.into_iter().collect();
            let dataset = handle::get_dataset(&name)?;
            match dataset.kind {
                DatasetKind::Volume => engine.edit_volume(&name, &props)?,
                DatasetKind::Filesystem => engine.edit_filesystem(&name, &props)?,
                DatasetKind::Snapshot => bail!("snapshot {name} cannot be edited"),
            }
            print_json(&handle::get_dataset(&name)?)
        }
        Commands::Receive { name, force, input } => {
            let mut reader: Box<dyn Read + Send> = match input {
                Some(path) => Box::new(
                    File::open(&path)
                        .with_context(|| format!("failed to open {}", path.display()))?,
                ),
                None => Box::new(io::stdin()),
            };
            print_json(&handle::receive_snapshot(reader.as_mut(), &name, force)?)
        }
        Commands::Snapshot {
            dataset,
            snapshot,
            recursive,
        } => {
            let dataset = handle::get_dataset(&dataset)?;
            print_json(&engine.snapshot(&dataset, &snapshot, recursive)?)
        }
        Commands::Destroy {
            name,
            recursive,
            recursive_clones,
            defer,
            force,
        } => {
            let mut flags = DestroyFlags::DEFAULT;
            if recursive {
                flags |= DestroyFlags::RECURSIVE;
            }
            if recursive_clones {
                flags |= DestroyFlags::RECURSIVE_CLONES;
            }
            if defer {
                flags |= DestroyFlags::DEFER_DELETION;
            }
            if force {
                flags |= DestroyFlags::FORCE_UMOUNT;
            }
            let dataset = handle::get_dataset(&name)?;
            engine.destroy(&dataset, flags)?;
            println!("Destroyed {name}.");
            Ok(())
        }
        Commands::Diff { snapshot, other } => {
            let snapshot = handle::get_dataset(&snapshot)?;
            let other = other.map(|o| handle::get_dataset(&o)).transpose()?;
            print_json(&engine.diff(&snapshot, other.as_ref())?)
        }
        Commands::Pool { command } => run_pool(command),
        Commands::Validate { .. } => Ok(()),
    }
}

fn run_pool(command: PoolCommands) -> Result<()> {
    match command {
        PoolCommands::List => print_json(&handle::list_zpools()?),
        PoolCommands::Get { name, guid } => {
            let pool = if guid {
                handle::engine()?.get_zpool_by_guid(&name)?
            } else {
                handle::get_zpool(&name)?
            };
            print_json(&pool)
        }
        PoolCommands::Status { name } => print_json(&handle::get_zpool_status(&name)?),
        PoolCommands::Create {
            name,
            properties,
            vdevs,
        } => {
            let props: Properties = properties.into_iter().collect();
            print_json(&handle::create_zpool(&name, &props, &vdevs)?)
        }
        PoolCommands::Destroy { name, yes } => {
            let prompt = format!(
                "This destroys pool `{name}` and every dataset in it.\n\
                 Type the pool name to continue or press Enter to abort:"
            );
            if !yes && !confirm(&prompt, &name)? {
                println!("Pool destroy aborted.");
                return Ok(());
            }
            handle::destroy_pool(&name)?;
            warn!("pool {name} destroyed from the command line");
            println!("Destroyed pool {name}.");
            Ok(())
        }
        PoolCommands::Replace {
            name,
            old_device,
            new_device,
        } => {
            handle::replace_in_pool(&name, &old_device, &new_device)?;
            println!("Replacing {old_device} with {new_device} in pool {name}.");
            Ok(())
        }
        PoolCommands::Scrub { name } => {
            handle::scrub_pool(&name)?;
            println!("Scrub started on pool {name}.");
            Ok(())
        }
        PoolCommands::Set {
            name,
            property,
            value,
        } => {
            handle::set_zpool_property(&name, &property, &value)?;
            println!("Set {property}={value} on pool {name}.");
            Ok(())
        }
        PoolCommands::IoDelay { name } => {
            let delay = match name {
                Some(name) => handle::get_pool_io_delay(&name)?,
                None => handle::get_total_io_delay()?,
            };
            println!("{delay:.3}");
            Ok(())
        }
    }
}

fn validate(file: &Path, schema: bool) -> Result<()> {
    if schema {
        let schema = schema_for!(StoreConfig);
        println!("{}", to_string_pretty(&schema)?);
        return Ok(());
    }

    let cfg = StoreConfig::load(file)
        .with_context(|| format!("failed to load configuration from {}", file.display()))?;
    println!(
        "Configuration valid (keys in {}, timeout {}s).",
        cfg.keys.directory, cfg.commands.timeout_secs
    );
    Ok(())
}

/// Load the config file, or run with defaults when the default file is absent.
fn load_config(path: &Path) -> Result<StoreConfig> {
    if path == Path::new(DEFAULT_CONFIG) && !path.exists() {
        warn!("{DEFAULT_CONFIG} not found, using built-in defaults");
        return Ok(StoreConfig::default());
    }
    StoreConfig::load(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

fn build_properties(
    name: &str,
    pairs: Vec<(String, String)>,
    prompt_key: bool,
) -> Result<Properties> {
    let mut props: Properties = pairs.into_iter().collect();
    if prompt_key {
        let passphrase = prompt_password(format!("Encryption passphrase for {name}: "))?;
        let again = prompt_password("Repeat passphrase: ")?;
        if passphrase != again {
            bail!("passphrases do not match");
        }
        props.insert(ENCRYPTION_KEY.to_string(), passphrase);
        props
            .entry("encryption".to_string())
            .or_insert_with(|| "on".to_string());
    }
    Ok(props)
}

fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    println!("{prompt}");
    print!("> ");
    io::stdout().flush().ok();
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(answer.trim() == expected)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", to_string_pretty(value)?);
    Ok(())
}

fn parse_property(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got `{raw}`")),
    }
}

fn parse_size(raw: &str) -> Result<u64, String> {
    let raw = raw.trim();
    let (digits, shift) = match raw.char_indices().last() {
        Some((idx, c)) if c.is_ascii_alphabetic() => {
            let shift = match c.to_ascii_uppercase() {
                'K' => 10,
                'M' => 20,
                'G' => 30,
                'T' => 40,
                _ => return Err(format!("unknown size suffix in `{raw}`")),
            };
            (&raw[..idx], shift)
        }
        _ => (raw, 0),
    };
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid size `{raw}`"))?;
    value
        .checked_mul(1u64 << shift)
        .ok_or_else(|| format!("size `{raw}` is too large"))
}
