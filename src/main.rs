//! quadpool - adaptive parallel numerical integration

use anyhow::{Context, Result, bail};
use clap::Parser;
use owo_colors::{OwoColorize, Stream::Stderr};
use serde::Serialize;

use quadpool::cli::Cli;
use quadpool::logging::{self, LogConfig};
use quadpool::progress::BarReporter;
use quadpool::scheduler::{Integrator, RunStats};
use quadpool::worker::run_worker_main;

/// JSON document printed by `--json`.
#[derive(Serialize)]
struct Report<'a> {
    function: &'a str,
    from: f64,
    to: f64,
    max_deviation: f64,
    rule: String,
    value: f64,
    degraded: bool,
    stats: &'a RunStats,
}

fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        owo_colors::set_override(false);
    }
    init_logging(&cli);

    if cli.internal_worker {
        run_worker_main(cli.function.integrand(), &cli.effective_rule());
    }

    if let Err(e) = run(&cli) {
        eprintln!(
            "{}: {}",
            "error"
                .if_supports_color(Stderr, |text| text.red())
                .if_supports_color(Stderr, |text| text.bold()),
            e
        );
        for cause in e.chain().skip(1) {
            eprintln!(
                "  {}: {}",
                "caused by".if_supports_color(Stderr, |text| text.yellow()),
                cause
            );
        }
        std::process::exit(1);
    }
}

fn init_logging(cli: &Cli) {
    let mut config = LogConfig::new().with_thread_ids(cli.verbose >= 2);
    // Explicit -v/-q win over QUADPOOL_LOG; the default level does not.
    if cli.verbose > 0 || cli.quiet {
        config = config.with_filter(cli.verbosity().filter().to_string());
    }
    config = config.with_env_overrides();
    if let Some(format) = cli.log_format {
        config = config.with_format(format);
    }
    if let Some(path) = &cli.log_file {
        config = config.with_file(path.clone());
    }
    logging::init(config);
}

fn run(cli: &Cli) -> Result<()> {
    let (from, to) = match (cli.from, cli.to) {
        (Some(from), Some(to)) => (from, to),
        _ => bail!("both <FROM> and <TO> are required"),
    };

    let integrand = cli.function.integrand();
    let integrator = Integrator::new(cli.integrator_config());
    let outcome = if cli.progress {
        let mut bar = BarReporter::new();
        integrator.integrate_with_reporter(&integrand, from, to, &mut bar)
    } else {
        integrator.integrate(&integrand, from, to)
    };
    let integration = outcome.with_context(|| {
        format!(
            "Failed to integrate {} over [{}, {}]",
            integrand.name(),
            from,
            to
        )
    })?;

    let stats = &integration.stats;
    if cli.json {
        let report = Report {
            function: integrand.name(),
            from,
            to,
            max_deviation: cli.max_deviation,
            rule: integrator.config().rule.to_string(),
            value: integration.value,
            degraded: stats.degraded(),
            stats,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{:.6}", integration.value);
    }

    if stats.degraded() && !cli.quiet {
        eprintln!(
            "{}: {} of {} workers were lost; the remaining workers completed the integration",
            "warning".if_supports_color(Stderr, |text| text.yellow()),
            stats.workers_lost,
            stats.workers
        );
    }
    if stats.forced_accepts > 0 && !cli.quiet {
        eprintln!(
            "{}: {} segments reached floating-point resolution and were accepted as is",
            "warning".if_supports_color(Stderr, |text| text.yellow()),
            stats.forced_accepts
        );
    }

    Ok(())
}
