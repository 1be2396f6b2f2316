// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use rand::Rng;
use tracing_subscriber::EnvFilter;

use glbpipe::assembler::{compression_kinds, ParsedModel};
use glbpipe::codec::CodecKind;
use glbpipe::config::{CodecConfig, WorkerConfig};
use glbpipe::container::{self, ChunkKind, ContainerFormat, HEADER_LEN};
use glbpipe::protocol::{Request, Response, ResponseKind};
use glbpipe::worker::Worker;
use glbpipe::MemoryModelCache;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit codes following sysexits.h conventions
mod exit_codes {
    /// Success - model loaded
    pub const SUCCESS: i32 = 0;
    /// Data error - malformed container or model
    pub const DATA_ERR: i32 = 65;
    /// Internal software error - worker failure
    pub const SOFTWARE: i32 = 70;
    /// I/O error - download or file read failed
    pub const IO_ERR: i32 = 74;
    /// Configuration error - a required codec is disabled or unavailable
    pub const CONFIG: i32 = 78;
    /// Interrupted by Ctrl+C
    pub const INTERRUPTED: i32 = 130;
}

use exit_codes::*;

/// glbpipe - Off-thread streaming loader for binary glTF containers.
#[derive(Parser)]
#[command(name = "glbpipe")]
#[command(version = VERSION)]
#[command(about = "Off-thread streaming loader for binary glTF containers.")]
#[command(long_about = "glbpipe - streaming GLB/glTF loader\n\n\
    Load a model:        glbpipe load https://example.com/city.glb\n\
    Raw protocol:        glbpipe load city.glb --json\n\
    Inspect a file:      glbpipe inspect city.glb\n\
    Configure:           glbpipe config show")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.glbpipe/config.json)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Quiet mode: only errors
    #[arg(short = 'q', long, global = true)]
    quiet: bool,

    /// Verbose mode: debug logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a model through the worker and print a summary
    ///
    /// Examples:
    ///   glbpipe load https://example.com/city.glb
    ///   glbpipe load ./city.glb --no-geometry-codec
    Load {
        /// Model URL or local path
        url: String,

        /// Task id to use in protocol messages (random when omitted)
        #[arg(long)]
        id: Option<String>,

        /// Disable the geometry codec slot
        #[arg(long)]
        no_geometry_codec: bool,

        /// Disable the texture codec slot
        #[arg(long)]
        no_texture_codec: bool,

        /// Disable the mesh-opt codec slot
        #[arg(long)]
        no_meshopt_codec: bool,

        /// Print raw protocol responses as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Parse a local container and print its layout
    Inspect {
        /// Path to a .glb or .gltf file
        file: PathBuf,
    },

    /// View or create the configuration file
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the config file location
    Path,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = WorkerConfig::load(cli.config.as_deref())?;
    init_tracing(&cli, &config);

    let code = match cli.command {
        Commands::Load {
            url,
            id,
            no_geometry_codec,
            no_texture_codec,
            no_meshopt_codec,
            json,
        } => {
            let mut codecs = config.codecs.clone();
            for (off, kind) in [
                (no_geometry_codec, CodecKind::Geometry),
                (no_texture_codec, CodecKind::Texture),
                (no_meshopt_codec, CodecKind::MeshOpt),
            ] {
                if off {
                    codecs = codecs.without(kind);
                }
            }
            let task_id = id.unwrap_or_else(generate_task_id);
            let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
            runtime.block_on(load_model(config, &task_id, &url, codecs, json, cli.quiet))?
        }
        Commands::Inspect { file } => inspect(&file)?,
        Commands::Config { command } => {
            handle_config(command.unwrap_or(ConfigCommands::Show), cli.config.as_deref(), &config)?;
            SUCCESS
        }
    };

    std::process::exit(code);
}

fn init_tracing(cli: &Cli, config: &WorkerConfig) {
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        config.log_level.as_str()
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},hyper=warn,reqwest=warn", level)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn generate_task_id() -> String {
    format!("load-{:08x}", rand::thread_rng().gen::<u32>())
}

fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% | {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░"),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

async fn load_model(
    config: WorkerConfig,
    task_id: &str,
    url: &str,
    codecs: CodecConfig,
    json: bool,
    quiet: bool,
) -> Result<i32> {
    let (handle, mut responses) = Worker::new(config)
        .with_cache(std::sync::Arc::new(MemoryModelCache::default()))
        .spawn()?;
    handle.send(Request::load(task_id, url, Some(codecs)))?;

    let pb = (!json && !quiet).then(progress_bar);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let response = tokio::select! {
            _ = &mut ctrl_c => {
                handle.cancel(task_id);
                if let Some(pb) = &pb {
                    pb.finish_and_clear();
                }
                eprintln!("{} Load cancelled", "[!]".yellow());
                return Ok(INTERRUPTED);
            }
            response = responses.recv() => response,
        };
        let Some(response) = response else {
            bail!("Worker exited without a result");
        };

        if json {
            println!("{}", response.to_json()?);
        }

        match response.kind {
            ResponseKind::Progress => {
                if let Some(pb) = &pb {
                    if let Some(percent) = response.data.progress {
                        pb.set_position(percent as u64);
                    }
                    match (response.data.step.as_deref(), response.data.loaded) {
                        (Some(step), _) => pb.set_message(step.to_string()),
                        (None, Some(loaded)) => pb.set_message(byte_summary(loaded, response.data.total)),
                        (None, None) => {}
                    }
                }
            }
            ResponseKind::Complete => {
                if let Some(pb) = &pb {
                    pb.finish_and_clear();
                }
                if !json && !quiet {
                    match response.into_model() {
                        Some(model) => print_summary(&model),
                        None => println!("{} Load complete", "[OK]".green()),
                    }
                }
                return Ok(SUCCESS);
            }
            ResponseKind::Error => {
                if let Some(pb) = &pb {
                    pb.finish_and_clear();
                }
                return Ok(report_error(&response, json));
            }
        }
    }
}

fn report_error(response: &Response, json: bool) -> i32 {
    let code = response.data.error.as_deref().unwrap_or("internal-error");
    if !json {
        eprintln!(
            "{} {}",
            "[X]".red(),
            response.data.message.as_deref().unwrap_or("Load failed")
        );
        if let Some(stack) = &response.data.stack {
            eprintln!("    {}", stack.dimmed());
        }
    }
    if response.id.is_none() {
        return SOFTWARE;
    }
    match code {
        "network-error" => IO_ERR,
        "missing-codec" => CONFIG,
        "internal-error" => SOFTWARE,
        _ => DATA_ERR,
    }
}

fn byte_summary(loaded: u64, total: Option<u64>) -> String {
    glbpipe::DownloadProgress::new(loaded, total).size_string()
}

fn print_summary(model: &ParsedModel) {
    let scene = &model.scene;
    let meta = &model.metadata;
    let primitives: usize = scene.meshes.iter().map(|m| m.primitives.len()).sum();

    println!("{} Loaded {}", "[OK]".green(), meta.url.bold());
    println!("  {:<12} {}", "Format:".dimmed(), meta.format.as_str());
    println!("  {:<12} {} ms", "Load time:".dimmed(), meta.load_time_ms);
    println!(
        "  {:<12} {} nodes, {} meshes ({} primitives), {} vertices",
        "Scene:".dimmed(),
        scene.nodes.len(),
        scene.meshes.len(),
        primitives,
        scene.vertex_count()
    );
    println!(
        "  {:<12} {} materials, {} textures, {} animations",
        "Resources:".dimmed(),
        scene.materials.len(),
        scene.textures.len(),
        model.animations.len()
    );
    if !meta.codecs_used.is_empty() {
        let used: Vec<&str> = meta.codecs_used.iter().map(|k| k.as_str()).collect();
        println!("  {:<12} {}", "Codecs:".dimmed(), used.join(", ").cyan());
    }
    println!("  {:<12} {}", "Steps:".dimmed(), meta.load_steps.join(" -> "));
}

fn inspect(path: &Path) -> Result<i32> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;

    let parsed = match container::parse(&bytes) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("{} {} ({})", "[X]".red(), e.detail, e.reason.as_str().yellow());
            return Ok(DATA_ERR);
        }
    };

    println!("{} {}", "File:".bold(), path.display());
    println!("  {:<16} {}", "Format:".dimmed(), parsed.format.as_str());

    if parsed.format == ContainerFormat::Glb {
        let header = container::read_header(&bytes)?;
        println!("  {:<16} {}", "Version:".dimmed(), header.version);
        println!(
            "  {:<16} {} ({} bytes in file)",
            "Total length:".dimmed(),
            header.total_length,
            bytes.len()
        );

        let end = header.total_length as usize;
        let mut offset = HEADER_LEN;
        let mut index = 0;
        while offset < end {
            let (chunk, next) = container::read_chunk(&bytes, offset, end)?;
            let kind = match chunk.kind() {
                Some(ChunkKind::Json) => "JSON".to_string(),
                Some(ChunkKind::Bin) => "BIN".to_string(),
                None => format!("0x{:08X}", chunk.tag),
            };
            println!(
                "  {:<16} {} @ {} ({} bytes)",
                format!("Chunk {}:", index).dimmed(),
                kind.cyan(),
                offset,
                chunk.byte_length
            );
            offset = next;
            index += 1;
        }
    }

    let document = &parsed.document;
    if let Some(version) = document.asset_version() {
        println!("  {:<16} {}", "Asset version:".dimmed(), version);
    }
    println!("  {:<16} {}", "Buffers:".dimmed(), document.buffers.len());
    for (i, buffer) in document.buffers.iter().enumerate() {
        let note = if buffer.synthetic { " (synthetic)" } else { "" };
        println!("    [{}] {:?} {} bytes{}", i, buffer.source, buffer.byte_length, note);
    }

    let required = document.required_extensions();
    if !required.is_empty() {
        println!("  {:<16} {}", "Required ext:".dimmed(), required.join(", "));
    }
    let kinds: Vec<&str> = compression_kinds(document).iter().map(|k| k.as_str()).collect();
    if !kinds.is_empty() {
        println!("  {:<16} {}", "Needs codecs:".dimmed(), kinds.join(", ").yellow());
    }

    Ok(SUCCESS)
}

fn handle_config(command: ConfigCommands, explicit: Option<&Path>, config: &WorkerConfig) -> Result<()> {
    let path = explicit.map(Path::to_path_buf).unwrap_or_else(WorkerConfig::default_path);
    match command {
        ConfigCommands::Show => {
            println!("{}", serde_json::to_string_pretty(config)?);
        }
        ConfigCommands::Init { force } => {
            if path.exists() && !force {
                println!(
                    "{} Config already exists at {} (use --force to overwrite)",
                    "[!]".yellow(),
                    path.display()
                );
                return Ok(());
            }
            WorkerConfig::default().save(&path)?;
            println!("{} Wrote {}", "[OK]".green(), path.display());
        }
        ConfigCommands::Path => {
            println!("{}", path.display());
        }
    }
    Ok(())
}
