//! Command-line options

use std::ffi::OsString;
use std::path::PathBuf;

use clap::Parser;

use crate::config::{APP_NAME, DEFAULT_CONFIG_FILE};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// What `-k` asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Reload,
    Rotate,
    Shutdown,
    Kill,
    /// Check the configuration and exit without touching a running master
    Parse,
}

impl ControlCommand {
    const WORDS: [(&'static str, ControlCommand); 5] = [
        ("reload", ControlCommand::Reload),
        ("rotate", ControlCommand::Rotate),
        ("shutdown", ControlCommand::Shutdown),
        ("kill", ControlCommand::Kill),
        ("parse", ControlCommand::Parse),
    ];

    /// Accepts any prefix of a command word; earlier words win ties
    pub fn from_prefix(arg: &str) -> Option<Self> {
        if arg.is_empty() {
            return None;
        }
        Self::WORDS
            .iter()
            .find(|(word, _)| word.starts_with(arg))
            .map(|&(_, command)| command)
    }

    /// Signal delivered to the running master, `None` for `parse`
    pub fn signal(self) -> Option<i32> {
        match self {
            ControlCommand::Reload => Some(libc::SIGHUP),
            ControlCommand::Rotate => Some(libc::SIGUSR1),
            ControlCommand::Shutdown => Some(libc::SIGTERM),
            ControlCommand::Kill => Some(libc::SIGKILL),
            ControlCommand::Parse => None,
        }
    }
}

fn parse_control_command(arg: &str) -> Result<ControlCommand, String> {
    ControlCommand::from_prefix(arg)
        .ok_or_else(|| format!("expected reload|rotate|shutdown|kill|parse, got {:?}", arg))
}

#[derive(Parser, Debug)]
#[command(name = APP_NAME, disable_help_flag = true, disable_version_flag = true)]
struct Args {
    /// Print help message
    #[arg(short = 'h')]
    help: bool,

    /// Show version and exit
    #[arg(short = 'v')]
    version: bool,

    /// No daemon mode
    #[arg(short = 'N')]
    no_daemon: bool,

    /// Use given config-file
    #[arg(short = 'c', value_name = "file")]
    config: Option<PathBuf>,

    /// Send signal to the running master (or only parse the configuration)
    #[arg(short = 'k', value_name = "signal", value_parser = parse_control_command)]
    signal: Option<ControlCommand>,
}

/// Options that survive parsing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOptions {
    pub no_daemon: bool,
    pub config_file: Option<PathBuf>,
    pub command: Option<ControlCommand>,
}

/// Outcome of parsing the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliAction {
    Usage,
    Version,
    Run(CliOptions),
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Invalid command line: {details}")]
    InvalidArguments { details: String },
}

pub fn parse_args<I, T>(args: I) -> Result<CliAction, CliError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args = Args::try_parse_from(args).map_err(|error| CliError::InvalidArguments {
        details: error.to_string().lines().next().unwrap_or_default().to_string(),
    })?;

    if args.help {
        return Ok(CliAction::Usage);
    }
    if args.version {
        return Ok(CliAction::Version);
    }

    Ok(CliAction::Run(CliOptions {
        no_daemon: args.no_daemon,
        config_file: args.config,
        command: args.signal,
    }))
}

pub fn usage() -> String {
    format!(
        "Usage: {app} [-?hvN] [-c file] [-k signal]\n\
         \x20      -h          Print help message.\n\
         \x20      -v          Show version and exit.\n\
         \x20      -N          No daemon mode.\n\
         \x20      -c file     Use given config-file instead of\n\
         \x20                  {config}\n\
         \x20      -k reload|rotate|shutdown|kill|parse\n\
         \x20                  shutdown is graceful, kill is fast shutdown.\n\
         \x20                  Parse configuration file, then send signal to\n\
         \x20                  running copy (except -k parse) and exit.\n",
        app = APP_NAME,
        config = DEFAULT_CONFIG_FILE,
    )
}

pub fn version() -> String {
    format!("{} version: {}", APP_NAME, VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(args: &[&str]) -> CliOptions {
        match parse_args(std::iter::once(APP_NAME).chain(args.iter().copied())) {
            Ok(CliAction::Run(options)) => options,
            other => panic!("expected options for {:?}, got {:?}", args, other),
        }
    }

    #[test]
    fn test_no_arguments() {
        assert_eq!(run(&[]), CliOptions::default());
    }

    #[test]
    fn test_flags_and_config() {
        let options = run(&["-N", "-c", "/etc/cpx.conf"]);
        assert!(options.no_daemon);
        assert_eq!(options.config_file, Some(PathBuf::from("/etc/cpx.conf")));
    }

    #[test]
    fn test_help_and_version() {
        assert_eq!(parse_args([APP_NAME, "-h"]).expect("parse"), CliAction::Usage);
        assert_eq!(parse_args([APP_NAME, "-v"]).expect("parse"), CliAction::Version);
    }

    #[test]
    fn test_control_command_prefixes() {
        assert_eq!(run(&["-k", "reload"]).command, Some(ControlCommand::Reload));
        assert_eq!(run(&["-k", "rot"]).command, Some(ControlCommand::Rotate));
        assert_eq!(run(&["-k", "r"]).command, Some(ControlCommand::Reload));
        assert_eq!(run(&["-k", "shut"]).command, Some(ControlCommand::Shutdown));
        assert_eq!(run(&["-k", "kill"]).command, Some(ControlCommand::Kill));
        assert_eq!(run(&["-kparse"]).command, Some(ControlCommand::Parse));
    }

    #[test]
    fn test_bad_arguments_rejected() {
        assert!(parse_args([APP_NAME, "-k", "reloadx"]).is_err());
        assert!(parse_args([APP_NAME, "-k", ""]).is_err());
        assert!(parse_args([APP_NAME, "-x"]).is_err());
        assert!(parse_args([APP_NAME, "-c"]).is_err());
    }

    #[test]
    fn test_command_signals() {
        assert_eq!(ControlCommand::Reload.signal(), Some(libc::SIGHUP));
        assert_eq!(ControlCommand::Rotate.signal(), Some(libc::SIGUSR1));
        assert_eq!(ControlCommand::Shutdown.signal(), Some(libc::SIGTERM));
        assert_eq!(ControlCommand::Kill.signal(), Some(libc::SIGKILL));
        assert_eq!(ControlCommand::Parse.signal(), None);
    }

    #[test]
    fn test_usage_mentions_every_option() {
        let text = usage();
        for option in ["-h", "-v", "-N", "-c file", "-k reload|rotate|shutdown|kill|parse"] {
            assert!(text.contains(option), "usage is missing {}", option);
        }
    }
}
