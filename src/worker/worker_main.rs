//! Worker loop and the process worker entry point.
//!
//! The same loop serves both transports: it reads a request, applies the
//! rule, stamps the response and writes it back, until the request side
//! closes. Process workers run it when the binary is started with
//! `--internal-worker`.

use super::ipc::{FrameReader, FrameWriter, PipeFd};
use crate::function::Integrand;
use crate::protocol::{Request, Response, Timestamp};
use crate::rule::QuadratureRule;
use crossbeam_channel::{Receiver, Sender};
use std::io;

/// Where a worker takes its requests from.
pub trait RequestSource {
    /// Next request, or `None` once the scheduler hung up.
    fn next_request(&mut self) -> io::Result<Option<Request>>;
}

/// Where a worker puts its responses.
pub trait ResponseSink {
    fn send_response(&mut self, response: Response) -> io::Result<()>;
}

impl RequestSource for Receiver<Request> {
    fn next_request(&mut self) -> io::Result<Option<Request>> {
        Ok(self.recv().ok())
    }
}

impl ResponseSink for Sender<Response> {
    fn send_response(&mut self, response: Response) -> io::Result<()> {
        self.send(response)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "scheduler went away"))
    }
}

impl RequestSource for FrameReader {
    fn next_request(&mut self) -> io::Result<Option<Request>> {
        self.read_request()
    }
}

impl ResponseSink for FrameWriter {
    fn send_response(&mut self, response: Response) -> io::Result<()> {
        self.write_response(&response)
    }
}

/// Evaluate one request.
pub fn evaluate(f: &Integrand, rule: &dyn QuadratureRule, request: &Request) -> Response {
    let received_at = Timestamp::now();
    let estimate = rule.estimate(f, request.left, request.right, request.density_budget);
    let computed_at = Timestamp::now();
    Response {
        estimate: estimate.value,
        error_density: estimate.error_density,
        received_at,
        computed_at,
        replied_at: computed_at,
    }
}

/// Serve requests until the source is exhausted. Returns the number served.
pub fn serve<S, K>(
    source: &mut S,
    sink: &mut K,
    f: &Integrand,
    rule: &dyn QuadratureRule,
) -> io::Result<usize>
where
    S: RequestSource + ?Sized,
    K: ResponseSink + ?Sized,
{
    let mut served = 0;
    while let Some(request) = source.next_request()? {
        let mut response = evaluate(f, rule, &request);
        response.replied_at = Timestamp::now();
        sink.send_response(response)?;
        served += 1;
    }
    Ok(served)
}

/// Run the worker subprocess main function on stdin/stdout.
///
/// Exits with status 0 when the parent closes stdin and 1 on any I/O error.
pub fn run_worker_main(f: Integrand, rule: &dyn QuadratureRule) -> ! {
    // Pipe errors surface as io::Error instead of killing the worker.
    unsafe {
        nix::sys::signal::signal(
            nix::sys::signal::Signal::SIGPIPE,
            nix::sys::signal::SigHandler::SigIgn,
        )
        .ok();
    }

    // Safety: file descriptors 0 and 1 are always valid for stdin/stdout
    let stdin_fd = unsafe { PipeFd::from_raw(0) };
    let stdout_fd = unsafe { PipeFd::from_raw(1) };

    let mut reader = FrameReader::new(stdin_fd);
    let mut writer = FrameWriter::new(stdout_fd);

    match serve(&mut reader, &mut writer, &f, rule) {
        Ok(served) => {
            tracing::debug!(served, function = f.name(), "Worker input closed");
            std::process::exit(0)
        }
        Err(e) => {
            eprintln!("Worker error: {}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::FunctionSpec;
    use crate::rule::{GaussKronrod, Rule};
    use crate::worker::ipc::create_pipe;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_serve_over_channels() {
        let (req_tx, mut req_rx) = unbounded();
        let (mut resp_tx, resp_rx) = unbounded();
        let f = FunctionSpec::Cubic.integrand();

        req_tx.send(Request::new(0.0, 1.0, 1e-6)).unwrap();
        req_tx.send(Request::new(1.0, 2.0, 1e-6)).unwrap();
        drop(req_tx);

        let served = serve(&mut req_rx, &mut resp_tx, &f, &GaussKronrod).unwrap();
        assert_eq!(served, 2);

        let first: Response = resp_rx.recv().unwrap();
        let second: Response = resp_rx.recv().unwrap();
        assert!((first.estimate - 1.0).abs() < 1e-12);
        assert!((second.estimate - 15.0).abs() < 1e-12);
        assert!(first.received_at <= first.computed_at);
        assert!(first.computed_at <= first.replied_at);
    }

    #[test]
    fn test_serve_over_pipes() {
        let (req_read, req_write) = create_pipe();
        let (resp_read, resp_write) = create_pipe();
        let mut scheduler_out = FrameWriter::new(req_write);
        let mut scheduler_in = FrameReader::new(resp_read);
        let f = FunctionSpec::Constant(3.0).integrand();

        scheduler_out
            .write_request(&Request::new(-1.0, 1.0, 1e-9))
            .unwrap();
        drop(scheduler_out);

        let mut worker_in = FrameReader::new(req_read);
        let mut worker_out = FrameWriter::new(resp_write);
        let served = serve(&mut worker_in, &mut worker_out, &f, &Rule::default()).unwrap();
        assert_eq!(served, 1);
        drop(worker_out);

        let response = scheduler_in.read_response().unwrap().unwrap();
        assert!((response.estimate - 6.0).abs() < 1e-12);
        assert_eq!(scheduler_in.read_response().unwrap(), None);
    }

    #[test]
    fn test_serve_fails_when_sink_closed() {
        let (req_tx, mut req_rx) = unbounded();
        let (mut resp_tx, resp_rx) = unbounded::<Response>();
        drop(resp_rx);
        req_tx.send(Request::new(0.0, 1.0, 1e-6)).unwrap();

        let f = FunctionSpec::Sin.integrand();
        let err = serve(&mut req_rx, &mut resp_tx, &f, &GaussKronrod).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
