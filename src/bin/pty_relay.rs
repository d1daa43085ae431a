//! PTY Relay
//!
//! Spawns a program on a pseudoterminal and relays I/O between this process's
//! stdin/stdout and the PTY primary until the program exits.

use std::io;
use std::process::ExitCode;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let options = match Options::parse(&args[1..]) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("{}", message);
            eprintln!("Try 'pty-relay --help' for more information.");
            return ExitCode::FAILURE;
        },
    };

    if options.show_help {
        print_help();
        return ExitCode::SUCCESS;
    }

    relay::run(options)
}

/// Command line options
#[derive(Debug, Default)]
struct Options {
    config_file: Option<String>,
    program: Option<String>,
    args: Vec<String>,
    env: Vec<(String, String)>,
    show_help: bool,
}

impl Options {
    fn parse(args: &[String]) -> Result<Self, String> {
        let mut options = Options::default();

        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "-f" | "--config" => {
                    i += 1;
                    options.config_file = Some(value(args, i, "--config")?);
                },
                "-p" | "--program" => {
                    i += 1;
                    options.program = Some(value(args, i, "--program")?);
                },
                "-a" | "--arg" => {
                    i += 1;
                    options.args.push(value(args, i, "--arg")?);
                },
                "-e" | "--env" => {
                    i += 1;
                    let pair = value(args, i, "--env")?;
                    let (key, val) = pair
                        .split_once('=')
                        .ok_or_else(|| format!("--env expects KEY=VALUE, got '{}'", pair))?;
                    options.env.push((key.to_string(), val.to_string()));
                },
                "-h" | "--help" => {
                    options.show_help = true;
                },
                other => return Err(format!("Unknown option: {}", other)),
            }
            i += 1;
        }

        Ok(options)
    }
}

fn value(args: &[String], i: usize, flag: &str) -> Result<String, String> {
    args.get(i)
        .cloned()
        .ok_or_else(|| format!("{} requires a value", flag))
}

#[cfg(unix)]
mod relay {
    use std::io::{self, Read, Write};
    use std::process::ExitCode;
    use std::thread;

    use pty_pair::{PtyChild, PtyError, SpawnConfig};

    use super::Options;

    pub(super) fn run(options: Options) -> ExitCode {
        let config = match build_config(options) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Invalid configuration: {}", e);
                return ExitCode::FAILURE;
            },
        };

        tracing::info!("Spawning {} {:?}", config.program, config.args);

        let mut child = match PtyChild::spawn(&config) {
            Ok(child) => child,
            Err(e) => {
                eprintln!("Failed to spawn PTY child: {}", e);
                return ExitCode::FAILURE;
            },
        };

        tracing::info!("PTY child spawned, PID: {}", child.pid());

        // Spawn a thread to read from stdin and write to the PTY
        let primary_fd = child.primary_fd();
        let _stdin_thread = thread::spawn(move || {
            let mut stdin = io::stdin();
            let mut buf = [0u8; 1024];

            loop {
                match stdin.read(&mut buf) {
                    Ok(0) => break, // EOF
                    Ok(n) => {
                        if nix::unistd::write(primary_fd, &buf[..n]).is_err() {
                            break;
                        }
                    },
                    Err(_) => break,
                }
            }
        });

        // Main loop: read from the PTY and write to stdout
        let mut stdout = io::stdout();
        let mut buf = [0u8; 4096];

        loop {
            match child.poll_read(100) {
                Ok(true) => match child.read(&mut buf) {
                    Ok(0) => {
                        if !child.is_alive() {
                            break;
                        }
                    },
                    Ok(n) => {
                        if stdout.write_all(&buf[..n]).is_err() {
                            break;
                        }
                        let _ = stdout.flush();
                    },
                    Err(e) => {
                        tracing::error!("Read error: {}", e);
                        break;
                    },
                },
                Ok(false) => {
                    if !child.is_alive() {
                        tracing::info!("Child process exited");
                        break;
                    }
                },
                Err(e) => {
                    tracing::error!("Poll error: {}", e);
                    break;
                },
            }
        }

        // The stdin thread stays blocked in read(); it ends with the process.
        match child.wait() {
            Ok(code) => {
                tracing::info!("Child exited with code: {}", code);
                ExitCode::from(code.clamp(0, 255) as u8)
            },
            Err(PtyError::ChildSignaled(sig)) => {
                tracing::info!("Child killed by signal: {}", sig);
                ExitCode::from((128 + sig).clamp(0, 255) as u8)
            },
            Err(e) => {
                tracing::error!("Wait error: {}", e);
                ExitCode::FAILURE
            },
        }
    }

    fn build_config(options: Options) -> Result<SpawnConfig, PtyError> {
        let mut config = match &options.config_file {
            Some(path) => SpawnConfig::load(path)?,
            None => SpawnConfig::default(),
        };

        if let Some(program) = options.program {
            config = config.with_program(program);
        }
        config = config.with_args(options.args);
        for (key, value) in options.env {
            config = config.with_env(key, value);
        }

        Ok(config)
    }
}

#[cfg(not(unix))]
mod relay {
    use std::process::ExitCode;

    use super::Options;

    pub(super) fn run(_options: Options) -> ExitCode {
        eprintln!("{}", pty_pair::PtyError::NotSupported);
        ExitCode::FAILURE
    }
}

fn print_help() {
    println!("PTY Relay - run a program on a pseudoterminal");
    println!();
    println!("Usage: pty-relay [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -f, --config <FILE>    Load a JSON spawn configuration");
    println!("  -p, --program <PATH>   Program to run (default: $SHELL or /bin/sh)");
    println!("  -a, --arg <ARG>        Argument for the program (repeatable)");
    println!("  -e, --env <KEY=VALUE>  Extra environment variable (repeatable)");
    println!("  -h, --help             Show this help message");
    println!();
    println!("Command line options are applied on top of the configuration file.");
    println!("Set RUST_LOG to control log output (default: info).");
}
