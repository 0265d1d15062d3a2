mod cli;

use ffpreview::{config, render};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use fp_av::{duration_to_position, Cut, Resolution, ToolRegistry};
use fp_exec::CancellationToken;
use std::path::{Path, PathBuf};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG if set, otherwise pick defaults from the verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "ffpreview=debug,fp_av=debug,fp_exec=debug,fp_core=debug".to_string()
        } else {
            "ffpreview=info,fp_av=warn,fp_exec=warn,fp_core=warn".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Preview {
            files,
            cut,
            out_dir,
            width,
            height,
            debug,
        } => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            let mut resolution = Resolution::from(&config.preview);
            resolution.width = width.unwrap_or(resolution.width);
            resolution.height = height.unwrap_or(resolution.height);
            let cut = match cut {
                Some(s) => s.parse::<Cut>().with_context(|| format!("Invalid --cut {s:?}"))?,
                None => Cut::from(&config.preview),
            };
            let opts = render::RenderOptions {
                resolution,
                cut,
                stderr_lines: config.command.stderr_lines,
                debug,
            };
            let tools = ToolRegistry::discover(&config.tools);
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(preview_files(&tools, &files, &out_dir, &opts))
        }
        Commands::Probe { file, json } => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            let tools = ToolRegistry::discover(&config.tools);
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(probe_file(&tools, &file, json, config.command.stderr_lines))
        }
        Commands::CheckTools => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            check_tools(&ToolRegistry::discover(&config.tools))
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("ffpreview {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// A token cancelled on Ctrl-C, so running ffmpeg processes get killed.
fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, stopping...");
            cancel.cancel();
        }
    });
    token
}

async fn preview_files(
    tools: &ToolRegistry,
    files: &[PathBuf],
    out_dir: &Path,
    opts: &render::RenderOptions,
) -> Result<()> {
    let cancel = interrupt_token();
    let mut failed = 0;

    for file in files {
        if cancel.is_cancelled() {
            break;
        }
        match render::render_file(tools, file, opts, &cancel).await {
            Ok(rendered) => {
                println!("{}: {}", file.display(), rendered.summary());
                let written = rendered.save(file, out_dir)?;
                for (image, path) in rendered.images.iter().zip(&written) {
                    let stream = rendered
                        .probe
                        .streams
                        .iter()
                        .find(|s| s.index == image.strip.stream_index);
                    match stream {
                        Some(s) => println!("  {} -> {}", render::describe_stream(s), path.display()),
                        None => println!("  {}", path.display()),
                    }
                }
            }
            Err(e) => {
                failed += 1;
                eprintln!("{}: {e:#}", file.display());
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} files failed", files.len());
    }
    Ok(())
}

async fn probe_file(tools: &ToolRegistry, file: &Path, json: bool, stderr_lines: usize) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {}", file.display());
    }

    let cancel = interrupt_token();
    let result = render::probe(tools, file, stderr_lines, &cancel).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result.raw)?);
        return Ok(());
    }

    println!("File: {}", file.display());
    println!("Format: {}", result.format_name());
    println!("Duration: {}", duration_to_position(result.duration()));
    println!("Codecs: {result}");
    println!("\nStreams: {}", result.streams.len());
    for stream in &result.streams {
        println!("  {}", render::describe_stream(stream));
    }
    Ok(())
}

fn check_tools(tools: &ToolRegistry) -> Result<()> {
    println!("Checking external tools...\n");

    let mut all_ok = true;
    for tool in tools.check_all() {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);
        if let Some(ref version) = tool.version {
            print!(" ({version})");
        }
        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }
        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install ffmpeg to render previews.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            config::Config::default()
        }
    };

    let p = &config.preview;
    println!("  Preview: {}x{} (align {}x{})", p.width, p.height, p.width_align, p.height_align);
    println!("  Cut: offset {}s, delta {}s, duration {}s", p.offset, p.delta, p.duration);
    println!("  Stderr lines: {}", config.command.stderr_lines);

    let warnings = config.validate();
    if !warnings.is_empty() {
        println!("\nWarnings:");
        for warning in warnings {
            println!("  - {warning}");
        }
    }

    Ok(())
}
