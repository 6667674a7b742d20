//! quadpool - adaptive definite integration over a pool of workers.
//!
//! The domain is kept as a partition of segments. Workers estimate one
//! segment at a time; the scheduler accepts a segment when its error per
//! unit length beats `max_deviation / domain_width` and splits it in half
//! otherwise, until every segment has been accepted.
//!
//! ```no_run
//! use quadpool::function::FunctionSpec;
//! use quadpool::scheduler::integrate;
//!
//! let f = FunctionSpec::Cubic.integrand();
//! let value = integrate(&f, 0.0, 1.0, 4, 1e-6)?;
//! assert!((value - 1.0).abs() < 1e-6);
//! # Ok::<(), quadpool::error::QuadError>(())
//! ```

pub mod cli;
pub mod error;
pub mod function;
pub mod logging;
pub mod progress;
pub mod protocol;
pub mod rule;
pub mod scheduler;
pub mod segment;
pub mod worker;

pub use error::{QuadError, Result};
pub use function::{FunctionSpec, Integrand};
pub use scheduler::{Integration, Integrator, IntegratorConfig, RunStats, integrate};
