use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mediajob", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a job manifest and write its outputs to a directory.
    Run(RunArgs),
    /// Validate a job manifest without running anything.
    Check(CheckArgs),
    /// Report which external tools are available on PATH.
    Tools(ToolsArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Job manifest JSON.
    #[arg(long)]
    manifest: PathBuf,

    /// Directory receiving the outputs.
    #[arg(long)]
    out: PathBuf,

    /// Pipeline config JSON (limits, workspace root).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the workspace root.
    #[arg(long)]
    workspace_root: Option<PathBuf>,

    /// Override the default per-stage timeout, in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[derive(Parser, Debug)]
struct CheckArgs {
    /// Job manifest JSON.
    #[arg(long)]
    manifest: PathBuf,

    /// Pipeline config JSON (limits, workspace root).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct ToolsArgs {
    /// Programs to look for.
    #[arg(default_values_t = ["ffmpeg".to_string(), "ffprobe".to_string(), "gs".to_string()])]
    tools: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("MEDIAJOB_LOG")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Run(args) => cmd_run(args),
        Command::Check(args) => cmd_check(args),
        Command::Tools(args) => cmd_tools(args),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<mediajob::PipelineConfig> {
    match path {
        Some(path) => Ok(mediajob::PipelineConfig::from_path(path)?),
        None => Ok(mediajob::PipelineConfig::default()),
    }
}

fn load_spec(manifest: &Path, max_input_bytes: u64) -> anyhow::Result<mediajob::JobSpec> {
    let base = manifest.parent().unwrap_or_else(|| Path::new("."));
    let spec = mediajob::JobManifest::from_path(manifest)?.into_spec(base, max_input_bytes)?;
    Ok(spec)
}

fn cmd_run(args: RunArgs) -> anyhow::Result<()> {
    let mut cfg = load_config(args.config.as_deref())?;
    if let Some(root) = args.workspace_root {
        cfg.workspace_root = root;
    }
    if let Some(ms) = args.timeout_ms {
        cfg.default_stage_timeout = Duration::from_millis(ms);
    }

    let spec = load_spec(&args.manifest, cfg.max_input_bytes)?;
    let orch = mediajob::Orchestrator::new(cfg)?;
    let result = orch.run(&spec)?;

    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("create output dir '{}'", args.out.display()))?;
    for (name, output) in result.outputs {
        let path = args.out.join(&name);
        std::fs::write(&path, &output.bytes)
            .with_context(|| format!("write output '{}'", path.display()))?;
        eprintln!(
            "wrote {} ({} bytes, {})",
            path.display(),
            output.bytes.len(),
            output.content_type
        );
    }
    Ok(())
}

fn cmd_check(args: CheckArgs) -> anyhow::Result<()> {
    let cfg = load_config(args.config.as_deref())?;
    let spec = load_spec(&args.manifest, cfg.max_input_bytes)?;
    let orch = mediajob::Orchestrator::new(cfg)?;
    spec.validate(orch.codecs())?;
    eprintln!(
        "ok: {} input(s), {} stage(s), {} output(s)",
        spec.inputs.len(),
        spec.stages.len(),
        spec.outputs.len()
    );
    Ok(())
}

fn cmd_tools(args: ToolsArgs) -> anyhow::Result<()> {
    let mut missing = Vec::new();
    for tool in &args.tools {
        let found = mediajob::is_tool_on_path(tool, version_flag(tool));
        println!("{tool}: {}", if found { "found" } else { "missing" });
        if !found {
            missing.push(tool.as_str());
        }
    }
    anyhow::ensure!(missing.is_empty(), "missing tools: {}", missing.join(", "));
    Ok(())
}

fn version_flag(tool: &str) -> &'static str {
    match tool {
        "ffmpeg" | "ffprobe" => "-version",
        _ => "--version",
    }
}
