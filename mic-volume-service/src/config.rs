//! Command line and start parameters.
//!
//! Everything the service needs is given on its command line; the installer
//! replays the same options into the registered service command.

use crate::logging::{LogDestination, DEFAULT_LOG_FILE};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Poll interval used when none (or an invalid one) is given.
pub const DEFAULT_INTERVAL_SECS: u64 = 2;

/// Longest accepted interval: a DWORD of milliseconds.
pub const MAX_INTERVAL_SECS: u64 = u32::MAX as u64 / 1000;

/// Keeps every microphone's capture volume at 100%.
#[derive(Debug, Parser)]
#[command(name = "mic-volume-service", version, about, arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Register the Windows service (auto-start)
    Install(RunOptions),

    /// Remove the Windows service
    Uninstall,

    /// Start the installed service
    Start,

    /// Stop the installed service
    Stop,

    /// Run under the Service Control Manager
    #[command(hide = true)]
    Service(RunOptions),

    /// Run in the foreground until Ctrl+C
    Test(RunOptions),
}

/// Options shared by every mode that polls.
#[derive(Debug, Clone, Default, Args)]
pub struct RunOptions {
    /// Check interval in seconds (values below 1 fall back to 2)
    #[arg(short = 't', long = "interval", value_name = "SECONDS", allow_hyphen_values = true)]
    pub interval: Option<String>,

    /// Only touch microphones whose name contains this text (case-sensitive)
    #[arg(short = 'm', long = "microphone", value_name = "NAME", default_value = "")]
    pub filter: String,

    /// Append log lines to this file
    #[arg(short = 'l', long = "log-file", value_name = "PATH", conflicts_with = "eventlog")]
    pub log_file: Option<PathBuf>,

    /// Write to the Windows Application event log
    #[arg(long = "eventlog")]
    pub eventlog: bool,
}

impl RunOptions {
    /// Interval in whole seconds after coercion.
    pub fn interval_secs(&self) -> u64 {
        self.interval
            .as_deref()
            .map_or(DEFAULT_INTERVAL_SECS, coerce_interval)
    }

    /// Arguments that reproduce these options on a service command line.
    pub fn to_service_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        let secs = self.interval_secs();
        if secs != DEFAULT_INTERVAL_SECS {
            args.push("-t".to_string());
            args.push(secs.to_string());
        }
        if !self.filter.is_empty() {
            args.push("-m".to_string());
            args.push(self.filter.clone());
        }
        if let Some(path) = &self.log_file {
            args.push("-l".to_string());
            args.push(path.display().to_string());
        }
        if self.eventlog {
            args.push("--eventlog".to_string());
        }

        args
    }

    /// Build the runtime configuration; `default_log` applies when neither
    /// `-l` nor `--eventlog` was given.
    pub fn into_config(self, default_log: LogDestination) -> ServiceConfig {
        let log = if self.eventlog {
            LogDestination::EventLog
        } else if let Some(path) = &self.log_file {
            LogDestination::File(path.clone())
        } else {
            default_log
        };

        ServiceConfig {
            interval: Duration::from_secs(self.interval_secs()),
            filter: self.filter,
            log,
        }
    }
}

/// Command line the SCM runs for the installed service.
///
/// The executable path is always quoted; other arguments only when needed.
pub fn service_command_line(exe: &Path, options: &RunOptions) -> String {
    let mut line = quote(&exe.display().to_string());
    line.push_str(" service");
    for arg in options.to_service_args() {
        line.push(' ');
        line.push_str(&quote_arg(&arg));
    }
    line
}

fn quote_arg(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains([' ', '\t', '"']) {
        return arg.to_string();
    }
    quote(arg)
}

/// Quote for `CommandLineToArgvW`: backslash runs before a `"` or the closing
/// quote are doubled, and the `"` itself is escaped.
fn quote(arg: &str) -> String {
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');

    let mut backslashes = 0;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                quoted.extend(std::iter::repeat('\\').take(backslashes * 2 + 1));
                quoted.push('"');
                backslashes = 0;
            }
            _ => {
                quoted.extend(std::iter::repeat('\\').take(backslashes));
                quoted.push(c);
                backslashes = 0;
            }
        }
    }
    quoted.extend(std::iter::repeat('\\').take(backslashes * 2));

    quoted.push('"');
    quoted
}

/// Parse an interval argument; anything that is not an integer >= 1 becomes
/// the default, and larger values are capped at [`MAX_INTERVAL_SECS`].
pub fn coerce_interval(raw: &str) -> u64 {
    match raw.trim().parse::<i64>() {
        Ok(secs) if secs >= 1 => (secs as u64).min(MAX_INTERVAL_SECS),
        _ => DEFAULT_INTERVAL_SECS,
    }
}

/// Runtime configuration, built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Delay between polling passes
    pub interval: Duration,

    /// Case-sensitive device name filter; empty means all devices
    pub filter: String,

    /// Log destination
    pub log: LogDestination,
}

impl ServiceConfig {
    /// Service defaults: 2 seconds, all devices, default log file.
    pub fn service_default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            filter: String::new(),
            log: LogDestination::File(PathBuf::from(DEFAULT_LOG_FILE)),
        }
    }

    /// Filter as shown in log lines.
    pub fn filter_description(&self) -> &str {
        if self.filter.is_empty() {
            "(all microphones)"
        } else {
            &self.filter
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::service_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Command {
        Cli::try_parse_from(args).unwrap().command
    }

    fn run_options(args: &[&str]) -> RunOptions {
        match parse(args) {
            Command::Test(opts) | Command::Service(opts) | Command::Install(opts) => opts,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_interval_valid_value() {
        let opts = run_options(&["mic-volume-service", "test", "-t", "5"]);
        assert_eq!(opts.interval_secs(), 5);
    }

    #[test]
    fn test_interval_zero_uses_default() {
        let opts = run_options(&["mic-volume-service", "test", "-t", "0"]);
        assert_eq!(opts.interval_secs(), DEFAULT_INTERVAL_SECS);
    }

    #[test]
    fn test_interval_negative_and_garbage_use_default() {
        let opts = run_options(&["mic-volume-service", "test", "-t", "-3"]);
        assert_eq!(opts.interval_secs(), DEFAULT_INTERVAL_SECS);
        assert_eq!(coerce_interval("abc"), DEFAULT_INTERVAL_SECS);
        assert_eq!(coerce_interval(""), DEFAULT_INTERVAL_SECS);
        assert_eq!(coerce_interval(" 7 "), 7);
    }

    #[test]
    fn test_parse_microphone_filter() {
        let opts = run_options(&["mic-volume-service", "service", "-m", "USB Microphone"]);
        assert_eq!(opts.filter, "USB Microphone");
        assert_eq!(opts.interval_secs(), DEFAULT_INTERVAL_SECS);
    }

    #[test]
    fn test_parse_eventlog_flag() {
        let opts = run_options(&["mic-volume-service", "test", "--eventlog"]);
        let config = opts.into_config(LogDestination::Console);
        assert_eq!(config.log, LogDestination::EventLog);
    }

    #[test]
    fn test_log_destinations_are_exclusive() {
        let result = Cli::try_parse_from([
            "mic-volume-service",
            "service",
            "--eventlog",
            "-l",
            "C:\\temp\\mic.log",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_default_log_applies_without_flags() {
        let config = run_options(&["mic-volume-service", "service"])
            .into_config(ServiceConfig::service_default().log);
        assert_eq!(config, ServiceConfig::service_default());
        assert_eq!(config.filter_description(), "(all microphones)");
    }

    #[test]
    fn test_service_args_replay_non_default_options() {
        let opts = run_options(&[
            "mic-volume-service",
            "install",
            "-t",
            "5",
            "-m",
            "USB Microphone",
            "--eventlog",
        ]);
        assert_eq!(
            opts.to_service_args(),
            vec!["-t", "5", "-m", "USB Microphone", "--eventlog"]
        );

        let defaults = run_options(&["mic-volume-service", "install", "-t", "0"]);
        assert!(defaults.to_service_args().is_empty());
    }

    #[test]
    fn test_service_command_line_quotes_paths_and_filters() {
        let opts = run_options(&["mic-volume-service", "install", "-t", "5", "-m", "USB Microphone"]);
        let line = service_command_line(
            Path::new(r"C:\Program Files\MicVol\mic-volume-service.exe"),
            &opts,
        );
        assert_eq!(
            line,
            r#""C:\Program Files\MicVol\mic-volume-service.exe" service -t 5 -m "USB Microphone""#
        );

        let opts = run_options(&["mic-volume-service", "install", "-m", "Mic \"Pro\""]);
        let line = service_command_line(Path::new(r"C:\svc.exe"), &opts);
        assert_eq!(line, r#""C:\svc.exe" service -m "Mic \"Pro\"""#);
    }

    #[test]
    fn test_huge_interval_is_capped() {
        let opts = run_options(&["mic-volume-service", "test", "-t", "9223372036854775807"]);
        assert_eq!(opts.interval_secs(), MAX_INTERVAL_SECS);
        assert_eq!(coerce_interval("4294967"), 4_294_967);
        assert_eq!(coerce_interval("4294968"), MAX_INTERVAL_SECS);
    }

    #[test]
    fn test_quoting_doubles_backslashes_before_quotes() {
        assert_eq!(quote_arg(r"Mic\"), r"Mic\");
        assert_eq!(quote_arg(r"My Mic\"), r#""My Mic\\""#);
        assert_eq!(quote_arg(r#"a\"b"#), r#""a\\\"b""#);
        assert_eq!(quote_arg(r"a\\b c"), r#""a\\b c""#);
        assert_eq!(quote_arg(""), r#""""#);
    }

    #[test]
    fn test_executable_path_is_always_quoted() {
        let line = service_command_line(Path::new(r"C:\svc.exe"), &RunOptions::default());
        assert_eq!(line, r#""C:\svc.exe" service"#);
    }

    #[test]
    fn test_management_commands() {
        assert!(matches!(parse(&["mic-volume-service", "uninstall"]), Command::Uninstall));
        assert!(matches!(parse(&["mic-volume-service", "start"]), Command::Start));
        assert!(matches!(parse(&["mic-volume-service", "stop"]), Command::Stop));
    }

    #[test]
    fn test_no_arguments_shows_help() {
        assert!(Cli::try_parse_from(["mic-volume-service"]).is_err());
    }
}
