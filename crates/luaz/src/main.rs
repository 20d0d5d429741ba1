//! LUAZ CLI: run TSO/E commands, allocations and batch scripts.
//!
//! Every invocation opens one TSO session against the in-process host,
//! runs the request and releases whatever the session allocated before
//! exiting. The process exit code is the command's return code.

mod batch;
mod output;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result, WrapErr};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use luaz_tso::{
    AllocSpec, CaptureMode, CommandOptions, SimHost, TraceLevel, TsoConfig, TsoContext,
    TsoScript,
};

use output::{
    print_json, AllocOutput, BatchOutput, CmdOutput, ConfigOutput, ErrorOutput, OutputFormat,
};

/// LUAZ CLI.
#[derive(Parser)]
#[command(name = "luaz", version, about = "LUAZ TSO/E command execution for scripts")]
struct Cli {
    /// LUACFG settings file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Enable debug logging on stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one TSO command and print its output.
    Cmd(CmdArgs),
    /// Allocate a DD, report the DAIR result, then free it.
    Alloc(AllocArgs),
    /// Run a batch script, one operation per line.
    Batch(BatchArgs),
    /// Show the effective TSO settings.
    Config,
}

#[derive(Parser)]
struct CmdArgs {
    /// Command text, e.g. "LISTCAT LEVEL(IBMUSER)".
    text: String,

    /// Let the command write to the terminal instead of capturing it.
    #[arg(long)]
    no_capture: bool,

    /// Run through the authorized command processor.
    #[arg(long)]
    authorized: bool,

    /// Capture mode (direct, legacy, auto).
    #[arg(long, value_parser = parse_mode)]
    mode: Option<CaptureMode>,
}

#[derive(Parser)]
struct AllocArgs {
    /// Allocation operands, e.g. "FILE(IN) DA('IBMUSER.DATA') SHR".
    spec: String,
}

#[derive(Parser)]
struct BatchArgs {
    /// Script file.
    file: PathBuf,
}

fn parse_mode(s: &str) -> std::result::Result<CaptureMode, String> {
    s.parse()
}

fn main() {
    let cli = Cli::parse();
    let format = cli.format;
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            if format.is_json() {
                let report = ErrorOutput {
                    status: "error".to_string(),
                    message: format!("{e}"),
                };
                if let Err(write_err) = print_json(&report) {
                    warn!(error = %write_err, "could not write JSON error report");
                }
            }
            eprintln!("Error: {e:?}");
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let config = load_config(cli.config.as_deref())?;
    init_tracing(cli.verbose, config.trace_level);
    info!(config = ?cli.config, mode = %config.capture_mode, "session start");

    match cli.command {
        Commands::Cmd(args) => run_cmd(config, args, cli.format),
        Commands::Alloc(args) => run_alloc(config, args, cli.format),
        Commands::Batch(args) => run_batch(config, args, cli.format),
        Commands::Config => {
            let source = cli.config.map(|p| p.display().to_string());
            show_config(config, source, cli.format)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<TsoConfig> {
    let Some(path) = path else {
        return Ok(TsoConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .into_diagnostic()
        .wrap_err_with(|| format!("cannot read {}", path.display()))?;
    TsoConfig::parse(&text).wrap_err_with(|| format!("in {}", path.display()))
}

/// `RUST_LOG` wins, then `--verbose`, then `trace.level`.
fn init_tracing(verbose: bool, level: Option<TraceLevel>) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new(level.map_or("warn", TraceLevel::as_filter))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

fn run_cmd(config: TsoConfig, args: CmdArgs, format: OutputFormat) -> Result<i32> {
    let mut ctx = TsoContext::new(SimHost::new(), config);
    let options = CommandOptions {
        capture: args.no_capture.then_some(false),
        authorized: args.authorized,
        mode: args.mode,
    };
    let outcome = ctx
        .run_command(&args.text, options)
        .wrap_err_with(|| format!("command '{}' failed", args.text))?;

    let mut out = CmdOutput::new(&args.text, &outcome);
    out.terminal = ctx
        .host()
        .terminal()
        .iter()
        .map(|(_, line)| line.clone())
        .collect();

    if format.is_json() {
        print_json(&out)?;
    } else {
        for line in out.terminal.iter().chain(&out.lines) {
            println!("{line}");
        }
        if out.truncated > 0 {
            eprintln!("({} more lines not shown)", out.truncated);
        }
        if let Some(err) = &out.cleanup_error {
            eprintln!("Warning: {err}");
        }
    }
    Ok(outcome.rc())
}

fn run_alloc(config: TsoConfig, args: AllocArgs, format: OutputFormat) -> Result<i32> {
    let spec = AllocSpec::parse(&args.spec).wrap_err("invalid allocation")?;
    let mut ctx = TsoContext::new(SimHost::new(), config);
    let (name, result) = ctx
        .allocate(&spec)
        .wrap_err_with(|| format!("allocation '{}' failed", args.spec))?;
    let failures = ctx.release_all();
    for failure in &failures {
        warn!(error = %failure, "allocation not released");
    }

    let out = AllocOutput {
        status: "success".to_string(),
        ddname: name.to_string(),
        dsname: spec.dsname.clone(),
        service_rc: result.service_rc,
        reason_code: result.reason_code,
        catalog_rc: result.catalog_rc,
        freed: failures.is_empty(),
    };
    if format.is_json() {
        print_json(&out)?;
    } else {
        println!(
            "{} allocated (rc={}, darc={:04X}, ctrc={:04X})",
            out.ddname, out.service_rc, out.reason_code, out.catalog_rc
        );
        for failure in &failures {
            eprintln!("Warning: {failure}");
        }
    }
    Ok(result.service_rc)
}

fn run_batch(config: TsoConfig, args: BatchArgs, format: OutputFormat) -> Result<i32> {
    let source = std::fs::read_to_string(&args.file)
        .into_diagnostic()
        .wrap_err_with(|| format!("cannot read {}", args.file.display()))?;
    let ops = batch::parse(&source)?;
    let tso = TsoScript::new(TsoContext::new(SimHost::new(), config));
    let result = batch::run(tso, ops);

    if format.is_json() {
        print_json(&BatchOutput {
            status: if result.failed { "failed" } else { "success" }.to_string(),
            exit_code: result.exit_code,
            steps: result.steps,
            released: result.released,
        })?;
    } else {
        for step in &result.steps {
            for line in &step.lines {
                println!("{line}");
            }
            if let Some(err) = &step.error {
                eprintln!("line {}: {err}", step.line);
            }
            for warning in &step.warnings {
                eprintln!("line {}: Warning: {warning}", step.line);
            }
        }
    }
    Ok(result.exit_code)
}

fn show_config(config: TsoConfig, source: Option<String>, format: OutputFormat) -> Result<i32> {
    if format.is_json() {
        print_json(&ConfigOutput {
            status: "success".to_string(),
            source,
            config,
        })?;
        return Ok(0);
    }
    let policy = match config.policy.mode {
        None => "all commands".to_string(),
        Some(mode) => format!("{mode:?}").to_ascii_lowercase(),
    };
    println!("allow.tso.cmd            {policy}");
    if !config.policy.whitelist.is_empty() {
        println!("tso.cmd.whitelist        {}", config.policy.whitelist.join(" "));
    }
    if !config.policy.blacklist.is_empty() {
        println!("tso.cmd.blacklist        {}", config.policy.blacklist.join(" "));
    }
    println!("tso.cmd.mode             {}", config.capture_mode);
    println!("tso.cmd.capture.default  {}", config.capture_default);
    match config.output_line_limit {
        Some(n) => println!("limits.output.lines      {n}"),
        None => println!("limits.output.lines      unlimited"),
    }
    println!("tso.rexx.exec            {}", config.rexx_exec);
    println!("tso.rexx.dd              {}", config.rexx_dd);
    println!("tso.out.dd               {}", config.out_dd);
    Ok(0)
}
