use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use std::io::IsTerminal;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use vmwatch::{MonitorApp, RendererKind, StatusLineWriter, VmWatchConfig};

#[derive(Parser, Debug)]
#[command(name = "vmwatch")]
#[command(about = "Keeps a service inside a VirtualBox VM reachable by power-cycling the VM")]
#[command(version)]
#[command(long_about = "Probes a service running inside a virtual machine at a fixed interval \
and power-cycles the VM through VBoxManage when the service stops answering. \
Monitoring can be paused, resumed and stopped from the keyboard or an optional HTTP endpoint.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "vmwatch.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the monitor")]
    validate_config: bool,

    /// Print the effective configuration and exit
    #[arg(long, help = "Print the effective configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Disable the p/r/q keyboard controls
    #[arg(long, help = "Do not read control keys from the terminal")]
    no_keyboard: bool,

    /// Skip the power-cycle performed at startup
    #[arg(long, help = "Start monitoring without launching the VM first")]
    no_launch: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Loaded before logging so the log file setting can take effect
    let mut config = match VmWatchConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("✗ Failed to load configuration from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    if args.print_config {
        println!("# vmwatch configuration (defaults merged with {} and VMWATCH_* variables)", args.config);
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    if args.no_keyboard {
        config.control.keyboard = false;
    }
    if args.no_launch {
        config.vm.start_on_launch = false;
    }

    let log_guard = init_logging(&args, &config)?;

    info!("Starting vmwatch v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        eprintln!("✗ Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    if args.validate_config {
        info!("Configuration validation successful");
        println!("✓ Configuration is valid");
        return Ok(());
    }

    let mut app = MonitorApp::new(config).map_err(|e| {
        error!("Failed to create monitor: {}", e);
        e
    })?;

    app.initialize().await.map_err(|e| {
        error!("Failed to initialize monitor: {}", e);
        e
    })?;

    app.start().await.map_err(|e| {
        error!("Failed to start monitor: {}", e);
        e
    })?;

    let exit_code = app.run().await.map_err(|e| {
        error!("Monitor error during execution: {}", e);
        e
    })?;

    info!("vmwatch exited with code: {}", exit_code);

    // process::exit skips destructors, so flush the file writer first
    drop(log_guard);
    std::process::exit(exit_code);
}

fn init_logging(args: &Args, config: &VmWatchConfig) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("vmwatch={}", log_level)));

    // Shares the terminal with the status line and raw-mode key input
    let interactive = std::io::stderr().is_terminal()
        && (config.indicator.renderer == RendererKind::Terminal || config.control.keyboard);

    // Everything goes to stderr; stdout is reserved for --validate-config and --print-config
    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .with_writer(stderr_writer(interactive))
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .with_writer(stderr_writer(interactive))
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .with_writer(stderr_writer(interactive))
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_writer(stderr_writer(interactive))
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    let (file_layer, guard) = match config.logging.file.as_deref() {
        Some(path) => {
            let path = std::path::Path::new(path);
            let directory = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("logging.file '{}' has no file name", path.display()))?;

            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

fn stderr_writer(interactive: bool) -> BoxMakeWriter {
    if interactive {
        BoxMakeWriter::new(|| StatusLineWriter::new(std::io::stderr()))
    } else {
        BoxMakeWriter::new(std::io::stderr)
    }
}
