use clap::{Parser, Subcommand};
use stem_live::{
    read_audio, split_file, write_stem, CommandServer, ConsoleMode, LineSink, LiveConsole,
    PlaybackController, SeparationEngine, ServiceConfig, SplitProgress, StemRole,
};
use std::{io, ops::ControlFlow, path::PathBuf, process::ExitCode};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stem-live")]
#[command(about = "AI stem separation service with live stem mixing", long_about = None)]
#[command(version)]
struct Cli {
    /// Separation model to load
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// External separation runner script (enables the real model)
    #[arg(long, global = true, value_name = "PATH")]
    script: Option<PathBuf>,

    /// Verbose logging (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve JSON commands on stdin/stdout (default)
    Serve,

    /// Separate one file and exit
    Split {
        #[arg(short, long)]
        audio: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Separate one file and control its playback from stdin
    Live {
        #[arg(short, long)]
        audio: PathBuf,

        /// Also write the separated stems here
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Read text commands (`mute 0 yes`) instead of JSON lines
        #[arg(short, long)]
        interactive: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let mut config = ServiceConfig::from_env();
    if let Some(model) = cli.model {
        config.model_name = model;
    }
    if cli.script.is_some() {
        config.demucs_script = cli.script;
    }

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => handle_serve(config),
        Commands::Split { audio, output } => handle_split(config, audio, output),
        Commands::Live {
            audio,
            output,
            interactive,
        } => handle_live(config, audio, output, interactive),
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let filter = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = if quiet { "error" } else { filter };

    // stdout carries the protocol
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn handle_serve(config: ServiceConfig) -> ExitCode {
    let mut server = CommandServer::new(config, LineSink::stdout());

    let registry = server.registry();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("received termination signal");
        registry.stop_all_live();
        registry.cancel_all();
        std::process::exit(0);
    }) {
        error!("could not install signal handler: {e}");
    }

    let stdin = io::stdin();
    match server.run(stdin.lock()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("service error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn handle_split(config: ServiceConfig, audio: PathBuf, output: PathBuf) -> ExitCode {
    if !audio.exists() {
        error!("audio file not found: {}", audio.display());
        println!("ERROR:Audio file not found: {}", audio.display());
        return ExitCode::FAILURE;
    }

    let mut engine = SeparationEngine::new(&config);
    engine.load_model(&config.model_name);
    info!(
        "splitting {} with {} model",
        audio.display(),
        if engine.is_real() { "real" } else { "mock" }
    );

    let result = split_file(&engine, &audio, &output, |p: &SplitProgress| {
        println!("PROGRESS:{}", p.percent());
        ControlFlow::Continue(())
    });

    match result {
        Ok(res) => {
            println!("SEPARATION_COMPLETE");
            for (role, path) in res.iter() {
                println!("STEM:{}:{}", role, path.display());
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("separation failed: {e}");
            println!("ERROR:{e}");
            ExitCode::FAILURE
        }
    }
}

fn handle_live(
    config: ServiceConfig,
    audio: PathBuf,
    output: Option<PathBuf>,
    interactive: bool,
) -> ExitCode {
    if !audio.exists() {
        error!("audio file not found: {}", audio.display());
        return ExitCode::FAILURE;
    }

    let mut engine = SeparationEngine::new(&config);
    engine.load_model(&config.model_name);
    let stems = match read_audio(&audio)
        .map_err(Into::into)
        .and_then(|a| engine.separate(&a))
    {
        Ok(s) => s,
        Err(e) => {
            error!("failed to start live separation: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(dir) = output {
        let written = std::fs::create_dir_all(&dir)
            .map_err(Into::into)
            .and_then(|()| {
                StemRole::ALL
                    .into_iter()
                    .try_for_each(|role| write_stem(&stems, role, &dir).map(drop))
            });
        if let Err(e) = written {
            error!("failed to write stems to {}: {e}", dir.display());
            return ExitCode::FAILURE;
        }
    }

    let mut controller = PlaybackController::with_system_clock(config.default_duration_secs);
    controller.load(&audio, stems);
    if let Err(e) = controller.play() {
        error!("failed to start playback: {e}");
        return ExitCode::FAILURE;
    }

    let mode = if interactive {
        ConsoleMode::Interactive
    } else {
        ConsoleMode::Json
    };
    let mut console = LiveConsole::new(controller, LineSink::stdout(), mode);
    match console.run(io::stdin().lock()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("live session error: {e}");
            ExitCode::FAILURE
        }
    }
}
