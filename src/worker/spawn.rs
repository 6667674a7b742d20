//! Worker subprocess spawning.
//!
//! Process workers are re-executions of a program (by default the current
//! executable) in internal worker mode, talking frames over stdin/stdout.

use super::WorkerId;
use super::proc::Proc;
use crate::error::{QuadError, Result};
use crate::function::{FunctionSpec, Integrand};
use crate::rule::Rule;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Flag that switches the binary into worker mode.
pub const INTERNAL_WORKER_FLAG: &str = "--internal-worker";

/// How to launch one worker process.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    /// Program to run; `None` means the current executable.
    pub program: Option<PathBuf>,
    pub args: Vec<OsString>,
}

impl WorkerCommand {
    /// Re-run the current executable as a worker for `function` with `rule`.
    pub fn current_exe(function: FunctionSpec, rule: Rule) -> Self {
        Self {
            program: None,
            args: vec![
                INTERNAL_WORKER_FLAG.into(),
                "--function".into(),
                function.to_string().into(),
                "--rule".into(),
                rule.to_string().into(),
            ],
        }
    }

    /// Re-run the current executable for a catalog integrand.
    ///
    /// Only integrands built by [`FunctionSpec::integrand`] can be rebuilt
    /// inside a worker process.
    pub fn for_integrand(f: &Integrand, rule: Rule) -> Result<Self> {
        let function = f.spec().ok_or_else(|| {
            QuadError::Worker(format!(
                "integrand '{}' cannot be rebuilt in a worker process",
                f.name()
            ))
        })?;
        Ok(Self::current_exe(function, rule))
    }

    /// Run an arbitrary program that speaks the frame protocol.
    pub fn program(program: impl Into<PathBuf>, args: Vec<OsString>) -> Self {
        Self {
            program: Some(program.into()),
            args,
        }
    }

    fn resolve_program(&self) -> Result<PathBuf> {
        match &self.program {
            Some(path) => Ok(path.clone()),
            None => std::env::current_exe().map_err(|e| {
                QuadError::Worker(format!("Failed to get current executable: {}", e))
            }),
        }
    }
}

/// Spawn one worker subprocess.
pub fn spawn_worker(command: &WorkerCommand, id: WorkerId) -> Result<Proc> {
    let program = command.resolve_program()?;

    let child = Command::new(&program)
        .args(&command.args)
        .env("QUADPOOL_WORKER_ID", id.to_string())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        // Worker diagnostics go straight to the parent's stderr.
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| QuadError::Spawn {
            worker: id,
            reason: format!("{}: {}", program.display(), e),
        })?;

    Proc::from_child(child)
}

/// Spawn a named helper thread that forwards a process worker's frames.
pub fn spawn_collector_thread<F>(id: WorkerId, f: F) -> Result<std::thread::JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::Builder::new()
        .name(format!("quad-collector-{}", id))
        .spawn(f)
        .map_err(|e| QuadError::Spawn {
            worker: id,
            reason: format!("collector thread: {}", e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_exe_command_args() {
        let cmd = WorkerCommand::current_exe(FunctionSpec::Constant(2.0), Rule::default());
        assert!(cmd.program.is_none());
        let args: Vec<String> = cmd
            .args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "--internal-worker",
                "--function",
                "const=2",
                "--rule",
                "gauss-kronrod"
            ]
        );
    }

    #[test]
    fn test_for_integrand_requires_catalog_name() {
        let f = FunctionSpec::Sin.integrand();
        assert!(WorkerCommand::for_integrand(&f, Rule::default()).is_ok());

        let custom = Integrand::new("x squared", |x| x * x);
        assert!(matches!(
            WorkerCommand::for_integrand(&custom, Rule::default()),
            Err(QuadError::Worker(_))
        ));
    }

    #[test]
    fn test_for_integrand_ignores_catalog_looking_names() {
        let impostor = Integrand::new("cubic", f64::sin);
        assert!(matches!(
            WorkerCommand::for_integrand(&impostor, Rule::default()),
            Err(QuadError::Worker(_))
        ));

        let f = FunctionSpec::Constant(2.0).integrand();
        let cmd = WorkerCommand::for_integrand(&f, Rule::default()).unwrap();
        assert!(cmd.args.iter().any(|a| a == "const=2"));
    }

    #[test]
    fn test_spawn_missing_program_names_worker() {
        let cmd = WorkerCommand::program("/nonexistent/quadpool-worker", Vec::new());
        match spawn_worker(&cmd, WorkerId(5)) {
            Err(QuadError::Spawn { worker, reason }) => {
                assert_eq!(worker, WorkerId(5));
                assert!(reason.contains("/nonexistent/quadpool-worker"));
            }
            other => panic!("expected spawn error, got {:?}", other.map(|p| p.pid())),
        }
    }
}
