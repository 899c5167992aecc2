//! cpx-master binary: parse the command line, then either signal a running
//! master or become one.

use std::process;
use std::thread;
use std::time::Duration;

use cpx_master::cli::{self, CliAction, CliOptions};
use cpx_master::SupervisorError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Demo worker body: stay up for a staggered while, then exit with 1 so the
/// master has something to respawn.
fn worker_process_cycle(index: usize) -> i32 {
    let pid = process::id();
    tracing::info!("start worker process: {}, pid = {}", index, pid);

    let jitter = (pid as u64 + index as u64 * 7) % 30;
    thread::sleep(Duration::from_secs(40 - jitter));
    1
}

#[cfg(target_os = "linux")]
fn run(options: CliOptions) -> Result<(), SupervisorError> {
    use cpx_master::cli::ControlCommand;
    use cpx_master::{notifier, pid_file, platform, PlatformError, Supervisor, SupervisorConfig};
    use unsafe_linux_process::{safe_daemonize, safe_enable_core_dumps};

    let mut config = SupervisorConfig::default().with_cli(&options);
    config.validate()?;

    let mut platform = platform::create_platform_manager()?;

    match options.command {
        Some(ControlCommand::Parse) => {
            tracing::info!("configuration {:?} is ok", config.config_file);
            return Ok(());
        }
        Some(command) => {
            pid_file::send_control_signal(&config.pid_file, command, &mut platform)?;
            return Ok(());
        }
        None => {}
    }

    if let Some(pid) = pid_file::check_running(&config.pid_file, &platform)? {
        return Err(SupervisorError::AlreadyRunning { pid });
    }

    match safe_enable_core_dumps() {
        Ok(()) => tracing::info!("core dumps enabled"),
        Err(error) => tracing::warn!("could not enable core dumps: {}", error),
    }

    if config.daemon {
        let cwd = std::env::current_dir().map_err(|source| SupervisorError::PidFile {
            path: config.pid_file.clone(),
            source,
        })?;
        config.resolve_paths(&cwd);
        safe_daemonize().map_err(PlatformError::from)?;
        tracing::info!("daemonized as pid {}", process::id());
    }

    pid_file::write_pid_file(&config.pid_file, process::id())?;
    let pid_path = config.pid_file.clone();

    let result = Supervisor::new(config, platform, &notifier::SIGNALS, worker_process_cycle)
        .and_then(|mut supervisor| supervisor.run());

    pid_file::remove_pid_file(&pid_path);
    result
}

#[cfg(not(target_os = "linux"))]
fn run(_options: CliOptions) -> Result<(), SupervisorError> {
    let _ = worker_process_cycle;
    Err(SupervisorError::PlatformError {
        error: cpx_master::PlatformError::ResourceUnavailable {
            resource: "Unsupported platform".to_string(),
        },
    })
}

fn main() {
    init_tracing();

    let options = match cli::parse_args(std::env::args_os()) {
        Ok(CliAction::Run(options)) => options,
        Ok(CliAction::Version) => {
            eprintln!("{}", cli::version());
            process::exit(1);
        }
        Ok(CliAction::Usage) => {
            eprint!("{}", cli::usage());
            process::exit(1);
        }
        Err(error) => {
            eprintln!("{}", error);
            eprint!("{}", cli::usage());
            process::exit(1);
        }
    };

    if let Err(error) = run(options) {
        tracing::error!("{}", error);
        process::exit(1);
    }
}
