//! taskrun binary entry point.

use std::process::ExitCode;

use taskrun::cli::{self, Args};
use taskrun::{logging, Config, Context, InStream, RunOptions, RunResult, TaskrunError};
use tracing::debug;

fn main() -> ExitCode {
    let args = match cli::parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("taskrun: {e}");
            eprintln!("Try 'taskrun --help' for more information.");
            return ExitCode::from(2);
        }
    };

    if args.help {
        cli::print_help();
        return ExitCode::SUCCESS;
    }
    if args.version {
        cli::print_version();
        return ExitCode::SUCCESS;
    }
    if args.command.is_empty() {
        eprintln!("taskrun: no command given");
        eprintln!("Try 'taskrun --help' for more information.");
        return ExitCode::from(2);
    }

    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("taskrun: {e}");
            return ExitCode::FAILURE;
        }
    };

    // A subscriber may already be installed when embedded; that is fine.
    let _ = logging::init_with_filter(config.log_filter());
    debug!("taskrun v{}", env!("CARGO_PKG_VERSION"));

    run(&args, config)
}

fn run(args: &Args, config: Config) -> ExitCode {
    let context = Context::new(config);
    let mut options = RunOptions::new();
    if args.no_stdin {
        options = options.in_stream(InStream::Disabled);
    }

    match context.run(&args.command_line(), options).and_then(|o| o.join()) {
        Ok(Some(result)) => exit_code(&result),
        Ok(None) => ExitCode::SUCCESS,
        Err(TaskrunError::UnexpectedExit { result }) => {
            // Output that was hidden has not been seen yet.
            if !result.hide.is_empty() {
                eprintln!("{}", TaskrunError::UnexpectedExit { result: result.clone() });
            }
            exit_code(&result)
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Exit status mirroring the command: its own code, or 128+N for signal N.
fn exit_code(result: &RunResult) -> ExitCode {
    let code = match result.exited {
        Some(code) if code >= 0 => code,
        Some(signal) => 128 - signal,
        None => 1,
    };
    ExitCode::from(u8::try_from(code).unwrap_or(u8::MAX))
}
