//! runstep - run a custom step the way the automation service would.
//!
//! Builds an execution context from flags or a JSON file, ensures the tool
//! version is installed in the bin dir, and streams the command's output.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use clap::{Parser, Subcommand};
use eyre::{eyre, WrapErr};
use runstep::executor::ShellSpec;
use runstep::output::OutputSink;
use runstep::resolver::BinDirEnsurer;
use runstep::{RunRequest, RunStepError, RunStepRunner};
use runstep_core::events::OutputEvent;
use runstep_core::{
    Distribution, EngineConfig, ExecutionContext, Id, PostProcessMode, RunKey, ToolVersion,
};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "runstep", about = "Custom run-step execution engine", version)]
struct Cli {
    /// Engine config file (key=value)
    #[arg(long, global = true, env = "RUNSTEP_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a command as a custom step
    Exec(ExecArgs),
    /// Print the environment a step would see, without running anything
    Env(ExecArgs),
}

#[derive(clap::Args)]
struct ExecArgs {
    /// Execution context as JSON (fields not given default to empty)
    #[arg(long)]
    context: Option<PathBuf>,

    /// Working directory (default: current directory)
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Directory with installed tool binaries
    #[arg(long)]
    bin_dir: Option<PathBuf>,

    /// Engine default distribution
    #[arg(long, value_parser = parse_distribution)]
    default_distribution: Option<Distribution>,

    /// Engine default version
    #[arg(long, value_parser = parse_version)]
    default_version: Option<ToolVersion>,

    /// Project distribution override
    #[arg(long, value_parser = parse_distribution)]
    distribution: Option<Distribution>,

    /// Project version override
    #[arg(long = "tool-version", value_parser = parse_version)]
    tool_version: Option<ToolVersion>,

    /// Workspace name
    #[arg(long)]
    workspace: Option<String>,

    /// Project name
    #[arg(long)]
    project: Option<String>,

    /// Output post-processing: show, hide, or strip_refreshing
    #[arg(long, default_value = "show")]
    post_process: PostProcessMode,

    /// Extra environment variable (KEY=VALUE), repeatable
    #[arg(long = "env", value_parser = parse_env_pair)]
    env: Vec<(String, String)>,

    /// Do not stream output while the command runs
    #[arg(long)]
    no_stream: bool,

    /// Stream output as JSON events
    #[arg(long)]
    json: bool,

    /// Command text, run through the configured shell
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

fn parse_distribution(s: &str) -> Result<Distribution, String> {
    s.parse().map_err(|e: runstep_core::version::VersionError| e.to_string())
}

fn parse_version(s: &str) -> Result<ToolVersion, String> {
    s.parse().map_err(|e: runstep_core::version::VersionError| e.to_string())
}

fn parse_env_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}

/// Writes streamed lines to stdout as they arrive.
struct StdoutSink {
    json: bool,
}

impl OutputSink for StdoutSink {
    fn send(&self, invocation: &Id, run: &RunKey, line: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = if self.json {
            let event = OutputEvent::line(invocation.clone(), run.clone(), line);
            event
                .to_json()
                .map_or(Ok(()), |json| writeln!(stdout, "{json}"))
        } else {
            writeln!(stdout, "{line}")
        };
    }

    fn complete(&self, invocation: &Id, run: &RunKey) {
        if self.json {
            if let Ok(json) = OutputEvent::complete(invocation.clone(), run.clone()).to_json() {
                let _ = writeln!(std::io::stdout().lock(), "{json}");
            }
        }
    }
}

fn load_config(path: Option<&PathBuf>, args: &ExecArgs) -> eyre::Result<EngineConfig> {
    let mut config = match path {
        Some(path) => EngineConfig::from_file(path)
            .wrap_err_with(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(bin_dir) = &args.bin_dir {
        config.bin_dir.clone_from(bin_dir);
    }
    if let Some(distribution) = args.default_distribution {
        config.default_distribution = distribution;
    }
    if let Some(version) = &args.default_version {
        config.default_version = version.clone();
    }
    if args.no_stream {
        config.stream_output = false;
    }
    config.resolve_paths(&std::env::current_dir()?);
    Ok(config)
}

fn load_context(args: &ExecArgs) -> eyre::Result<ExecutionContext> {
    let mut ctx = match &args.context {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .wrap_err_with(|| format!("reading context {}", path.display()))?;
            serde_json::from_str(&content)
                .wrap_err_with(|| format!("parsing context {}", path.display()))?
        }
        None => ExecutionContext::default(),
    };
    if let Some(workspace) = &args.workspace {
        ctx.workspace.clone_from(workspace);
    }
    if ctx.workspace.is_empty() {
        ctx.workspace = "default".to_string();
    }
    if let Some(project) = &args.project {
        ctx.project_name.clone_from(project);
    }
    if args.distribution.is_some() {
        ctx.distribution = args.distribution;
    }
    if args.tool_version.is_some() {
        ctx.version.clone_from(&args.tool_version);
    }
    Ok(ctx)
}

fn main() {
    let cli = Cli::parse();

    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to create tokio runtime");

    match runtime.block_on(run(cli)) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!("{e:#}");
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> eyre::Result<i32> {
    let (args, print_env) = match cli.command {
        Command::Exec(args) => (args, false),
        Command::Env(args) => (args, true),
    };

    let config = load_config(cli.config.as_ref(), &args)?;
    let ctx = load_context(&args)?;
    let dir = match &args.dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    let env: BTreeMap<String, String> = args.env.iter().cloned().collect();

    if print_env {
        let tool = runstep::resolver::effective_tool(&ctx, &config);
        let inherited_path = std::env::var("PATH").unwrap_or_default();
        let vars = runstep_core::env::build_env(&ctx, &dir, &tool, &inherited_path, &env);
        for (key, value) in vars {
            println!("{key}={value}");
        }
        return Ok(0);
    }

    let command = args.command.join(" ");
    if command.trim().is_empty() {
        return Err(eyre!("no command given"));
    }

    let request = RunRequest {
        command,
        dir,
        env,
        stream_output: config.stream_output,
        post_process: args.post_process,
        shell: Some(ShellSpec::from_config(&config)),
    };
    let runner = RunStepRunner::new(
        config.clone(),
        Arc::new(BinDirEnsurer::new(&config.bin_dir)),
        Arc::new(StdoutSink { json: args.json }),
    );

    match runner.run(&ctx, &request).await {
        Ok(output) => {
            // Streamed output already reached stdout; print only what the
            // post-processing kept when nothing was streamed.
            if !request.stream_output {
                print!("{output}");
            }
            Ok(0)
        }
        Err(err @ RunStepError::Exec { .. }) => {
            tracing::error!("{err}");
            Ok(err.exit_code().unwrap_or(1))
        }
        Err(err) => Err(err.into()),
    }
}
