use argh::FromArgs;
use metrics_shell::{Interpreter, Settings};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::filter::LevelFilter;

const LOG_ENV: &str = "METRICS_SHELL_LOG";

#[derive(FromArgs)]
/// Interactive shell with job control and a system metrics monitor.
struct Args {
    #[argh(positional)]
    /// file with one command per line; runs it instead of reading the terminal.
    batch_file: Option<PathBuf>,

    #[argh(option)]
    /// path of the JSON configuration file.
    config: Option<PathBuf>,

    #[argh(option)]
    /// path of the named pipe the monitor writes to.
    metrics_pipe: Option<PathBuf>,
}

fn init_logging() {
    let level = std::env::var(LOG_ENV)
        .ok()
        .and_then(|value| value.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::WARN);
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_max_level(level)
        .init();
}

fn main() -> ExitCode {
    let args: Args = argh::from_env();
    init_logging();

    let mut settings = Settings::default();
    if let Some(path) = args.config {
        settings = settings.with_config_path(path);
    }
    if let Some(path) = args.metrics_pipe {
        settings = settings.with_metrics_pipe(path);
    }
    let mut sh = Interpreter::new(settings);

    let result = match &args.batch_file {
        Some(path) => match File::open(path) {
            Ok(file) => sh
                .run_batch(BufReader::new(file), &mut io::stdout())
                .map_err(|e| format!("cannot read {}: {e}", path.display())),
            Err(e) => Err(format!("cannot open {}: {e}", path.display())),
        },
        None => sh.repl().map_err(|e| format!("cannot read input: {e}")),
    };
    sh.shutdown();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!("{message}");
            eprintln!("metrics_shell: {message}");
            ExitCode::FAILURE
        }
    }
}
