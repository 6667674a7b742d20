//! Command-line interface definitions using clap.

use crate::function::FunctionSpec;
use crate::logging::LogFormat;
use crate::rule::{Bracket, Rule};
use crate::scheduler::{DEFAULT_MAX_DEVIATION, IntegratorConfig};
use crate::worker::TransportKind;
use clap::Parser;
use std::path::PathBuf;

/// Adaptive parallel numerical integration.
///
/// Integrates a built-in function over [FROM, TO] to an absolute error of
/// about MAX_DEVIATION, spreading the work over WORKERS workers.
#[derive(Parser, Debug)]
#[command(name = "quadpool")]
#[command(author, version, about, long_about = None)]
#[command(allow_negative_numbers = true)]
pub struct Cli {
    /// Lower bound of the domain.
    #[arg(required_unless_present = "internal_worker")]
    pub from: Option<f64>,

    /// Upper bound of the domain.
    #[arg(required_unless_present = "internal_worker")]
    pub to: Option<f64>,

    /// Number of workers.
    #[arg(env = "QUADPOOL_WORKERS", default_value_t = 1)]
    pub workers: usize,

    /// Maximum absolute deviation of the result.
    #[arg(env = "QUADPOOL_MAX_DEVIATION", default_value_t = DEFAULT_MAX_DEVIATION)]
    pub max_deviation: f64,

    /// Function to integrate: cubic, sin, exp, gauss, sqrt, step, const=<c>.
    #[arg(short, long, env = "QUADPOOL_FUNCTION", default_value = "cubic")]
    pub function: FunctionSpec,

    /// Quadrature rule: gauss-kronrod, bracket, bracket:<steps>.
    #[arg(short, long, default_value = "gauss-kronrod")]
    pub rule: Rule,

    /// Sub-steps of the bracket rule (implies --rule bracket).
    #[arg(long)]
    pub bracket_steps: Option<usize>,

    /// Segments in the initial partition (default: one per worker).
    #[arg(long)]
    pub initial_segments: Option<usize>,

    /// Run workers as threads or as child processes.
    #[arg(long, env = "QUADPOOL_TRANSPORT", default_value = "thread")]
    pub transport: TransportKind,

    /// Do not pin workers to CPUs.
    #[arg(long)]
    pub no_affinity: bool,

    /// Verify the partition after every step (slow).
    #[arg(long)]
    pub audit: bool,

    /// Show a progress bar on stderr.
    #[arg(long)]
    pub progress: bool,

    /// Print the result and run statistics as JSON.
    #[arg(long)]
    pub json: bool,

    /// Enable verbose output (-v for info, -vv for debug, -vvv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except the result and errors.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output.
    #[arg(long, env = "NO_COLOR")]
    pub no_color: bool,

    /// Log format: pretty, compact, json.
    #[arg(long)]
    pub log_format: Option<LogFormat>,

    /// Also write logs to this file.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Serve requests on stdin/stdout (used by the process transport).
    #[arg(long, hide = true)]
    pub internal_worker: bool,
}

/// Verbosity levels for output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// -q: errors only.
    Quiet,
    /// Default: warnings, e.g. lost workers.
    Normal,
    /// -v: run start and summary.
    Info,
    /// -vv: pool and scheduler details.
    Debug,
    /// -vvv: every request and response.
    Trace,
}

impl From<u8> for Verbosity {
    fn from(count: u8) -> Self {
        match count {
            0 => Verbosity::Normal,
            1 => Verbosity::Info,
            2 => Verbosity::Debug,
            _ => Verbosity::Trace,
        }
    }
}

impl Verbosity {
    /// `EnvFilter` directive for this level.
    pub fn filter(self) -> &'static str {
        match self {
            Verbosity::Quiet => "error",
            Verbosity::Normal => "warn",
            Verbosity::Info => "quadpool=info,warn",
            Verbosity::Debug => "quadpool=debug,info",
            Verbosity::Trace => "quadpool=trace,info",
        }
    }
}

impl Cli {
    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else {
            Verbosity::from(self.verbose)
        }
    }

    /// Rule after applying `--bracket-steps`.
    pub fn effective_rule(&self) -> Rule {
        match self.bracket_steps {
            Some(steps) => Rule::Bracket(Bracket::new(steps)),
            None => self.rule,
        }
    }

    pub fn integrator_config(&self) -> IntegratorConfig {
        let mut builder = IntegratorConfig::builder()
            .workers(self.workers)
            .max_deviation(self.max_deviation)
            .rule(self.effective_rule())
            .transport(self.transport)
            .affinity(!self.no_affinity)
            .audit_partition(self.audit);
        if let Some(count) = self.initial_segments {
            builder = builder.initial_segments(count);
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parsing() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_positional_defaults() {
        let args = Cli::try_parse_from(["quadpool", "0", "1"]).unwrap();
        assert_eq!(args.from, Some(0.0));
        assert_eq!(args.to, Some(1.0));
        assert_eq!(args.workers, 1);
        assert_eq!(args.max_deviation, 1e-6);
        assert_eq!(args.function, FunctionSpec::Cubic);
        assert_eq!(args.transport, TransportKind::Thread);
    }

    #[test]
    fn test_all_positionals() {
        let args = Cli::try_parse_from(["quadpool", "-2.5", "3", "4", "1e-9"]).unwrap();
        assert_eq!(args.from, Some(-2.5));
        assert_eq!(args.to, Some(3.0));
        assert_eq!(args.workers, 4);
        assert_eq!(args.max_deviation, 1e-9);
    }

    #[test]
    fn test_bounds_required() {
        assert!(Cli::try_parse_from(["quadpool"]).is_err());
        assert!(Cli::try_parse_from(["quadpool", "0"]).is_err());
    }

    #[test]
    fn test_malformed_number_is_error() {
        assert!(Cli::try_parse_from(["quadpool", "zero", "1"]).is_err());
        assert!(Cli::try_parse_from(["quadpool", "0", "1", "-3"]).is_err());
    }

    #[test]
    fn test_internal_worker_needs_no_bounds() {
        let args = Cli::try_parse_from([
            "quadpool",
            "--internal-worker",
            "--function",
            "const=2",
            "--rule",
            "bracket:8",
        ])
        .unwrap();
        assert!(args.internal_worker);
        assert_eq!(args.function, FunctionSpec::Constant(2.0));
        assert_eq!(args.rule, Rule::Bracket(Bracket::new(8)));
    }

    #[test]
    fn test_bracket_steps_override_rule() {
        let args = Cli::try_parse_from(["quadpool", "0", "1", "--bracket-steps", "32"]).unwrap();
        assert_eq!(args.effective_rule(), Rule::Bracket(Bracket::new(32)));
    }

    #[test]
    fn test_integrator_config() {
        let args = Cli::try_parse_from([
            "quadpool",
            "0",
            "1",
            "3",
            "--transport",
            "process",
            "--no-affinity",
            "--initial-segments",
            "8",
        ])
        .unwrap();
        let config = args.integrator_config();
        assert_eq!(config.workers, 3);
        assert_eq!(config.transport, TransportKind::Process);
        assert!(!config.affinity);
        assert_eq!(config.initial_segment_count(), 8);
    }

    #[test]
    fn test_verbosity() {
        let args = Cli::try_parse_from(["quadpool", "-vv", "0", "1"]).unwrap();
        assert_eq!(args.verbosity(), Verbosity::Debug);
        let args = Cli::try_parse_from(["quadpool", "-q", "0", "1"]).unwrap();
        assert_eq!(args.verbosity(), Verbosity::Quiet);
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["quadpool", "-v", "-q", "0", "1"]).is_err());
    }

    #[test]
    fn test_unknown_function_is_error() {
        assert!(Cli::try_parse_from(["quadpool", "0", "1", "--function", "tan"]).is_err());
    }
}
