//! Quadrature rules run by workers.
//!
//! A rule turns `(left, right, density_budget)` into an [`Estimate`]: the
//! integral over `[left, right]` and its error per unit length. The scheduler
//! accepts a segment iff `error_density < density_budget`, where the budget is
//! `max_deviation / domain_width`.
//!
//! Rules hold no state between calls, so any worker can serve any request.

use crate::function::Integrand;
use std::fmt;
use std::str::FromStr;

/// Result of applying a rule to one segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    /// Integral over the segment (already scaled by its width).
    pub value: f64,
    /// Error estimate divided by the segment width.
    pub error_density: f64,
}

/// A quadrature kernel.
pub trait QuadratureRule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Estimate the integral of `f` over `[left, right]`.
    ///
    /// Rules may stop refining as soon as the error density is known to reach
    /// `density_budget`; the returned `value` is then meaningless and the
    /// segment will be split.
    fn estimate(&self, f: &Integrand, left: f64, right: f64, density_budget: f64) -> Estimate;
}

// G7/K15 abscissae on [0, 1] of the symmetric rule; index 0 is the centre.
const KRONROD_NODES: [f64; 8] = [
    0.0,
    0.207784955007898467600689403773245,
    0.405845151377397166906606412076961,
    0.586087235467691130294144838258730,
    0.741531185599394439863864773280788,
    0.864864423359769072789712788640926,
    0.949107912342758524526189684047851,
    0.991455371120812639206854697526329,
];

const KRONROD_WEIGHTS: [f64; 8] = [
    0.209482141084727828012999174891714,
    0.204432940075298892414161999234649,
    0.190350578064785409913256402421014,
    0.169004726639267902826583426598550,
    0.140653259715525918745189590510238,
    0.104790010322250183839876322541518,
    0.063092092629978553290700663189204,
    0.022935322010529224963732008058970,
];

// Gauss weights for Kronrod nodes 0, 2, 4, 6.
const GAUSS_WEIGHTS: [f64; 4] = [
    0.417959183673469387755102040816327,
    0.381830050505118944950369775488975,
    0.279705391489276667901467771423780,
    0.129484966168869693270611432679082,
];

/// 15-point Gauss–Kronrod rule; the error is |K15 − G7|.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GaussKronrod;

impl QuadratureRule for GaussKronrod {
    fn name(&self) -> &'static str {
        "gauss-kronrod"
    }

    fn estimate(&self, f: &Integrand, left: f64, right: f64, _density_budget: f64) -> Estimate {
        let mid = 0.5 * (left + right);
        let half = 0.5 * (right - left);

        let centre = f.eval(mid);
        let mut kronrod = KRONROD_WEIGHTS[0] * centre;
        let mut gauss = GAUSS_WEIGHTS[0] * centre;

        for i in 1..KRONROD_NODES.len() {
            let dx = half * KRONROD_NODES[i];
            let pair = f.eval(mid - dx) + f.eval(mid + dx);
            kronrod += KRONROD_WEIGHTS[i] * pair;
            if i % 2 == 0 {
                gauss += GAUSS_WEIGHTS[i / 2] * pair;
            }
        }

        let value = half * kronrod;
        let error = (half * (kronrod - gauss)).abs();
        Estimate {
            value,
            error_density: error / (right - left),
        }
    }
}

/// Lower/upper step sums over `steps` equal sub-steps.
///
/// On every sub-step the smaller endpoint value bounds the lower sum and the
/// larger one the upper sum, which brackets the integral for monotone pieces.
/// The estimate is the midpoint of the bracket and the error half its width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bracket {
    pub steps: usize,
}

impl Bracket {
    pub const DEFAULT_STEPS: usize = 64;

    pub fn new(steps: usize) -> Self {
        Self {
            steps: steps.max(1),
        }
    }
}

impl Default for Bracket {
    fn default() -> Self {
        Self::new(Self::DEFAULT_STEPS)
    }
}

impl QuadratureRule for Bracket {
    fn name(&self) -> &'static str {
        "bracket"
    }

    fn estimate(&self, f: &Integrand, left: f64, right: f64, density_budget: f64) -> Estimate {
        let steps = self.steps.max(1);
        let width = right - left;
        let shift = width / steps as f64;
        // error_density < budget  <=>  upper - lower < 2 * budget * width
        let gap_limit = 2.0 * density_budget * width;

        let mut lower = 0.0;
        let mut upper = 0.0;
        let mut x0 = left;
        let mut f0 = f.eval(left);

        for i in 1..=steps {
            let x1 = if i == steps {
                right
            } else {
                left + shift * i as f64
            };
            let f1 = f.eval(x1);
            let h = x1 - x0;
            if f0 < f1 {
                lower += f0 * h;
                upper += f1 * h;
            } else {
                lower += f1 * h;
                upper += f0 * h;
            }

            if i < steps && upper - lower >= gap_limit {
                // The gap only grows from here on.
                return Estimate {
                    value: 0.5 * (lower + upper),
                    error_density: ((upper - lower) / (2.0 * width)).max(density_budget),
                };
            }
            x0 = x1;
            f0 = f1;
        }

        Estimate {
            value: 0.5 * (lower + upper),
            error_density: (upper - lower) / (2.0 * width),
        }
    }
}

/// Rule selection carried by configuration and passed to worker processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    GaussKronrod(GaussKronrod),
    Bracket(Bracket),
}

impl Default for Rule {
    fn default() -> Self {
        Self::GaussKronrod(GaussKronrod)
    }
}

impl QuadratureRule for Rule {
    fn name(&self) -> &'static str {
        match self {
            Self::GaussKronrod(rule) => rule.name(),
            Self::Bracket(rule) => rule.name(),
        }
    }

    fn estimate(&self, f: &Integrand, left: f64, right: f64, density_budget: f64) -> Estimate {
        match self {
            Self::GaussKronrod(rule) => rule.estimate(f, left, right, density_budget),
            Self::Bracket(rule) => rule.estimate(f, left, right, density_budget),
        }
    }
}

impl FromStr for Rule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        if let Some(steps) = s.strip_prefix("bracket:") {
            return steps
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .map(|n| Self::Bracket(Bracket::new(n)))
                .ok_or_else(|| format!("Invalid bracket step count: '{}'", steps));
        }
        match s.as_str() {
            "gauss-kronrod" | "gk" => Ok(Self::GaussKronrod(GaussKronrod)),
            "bracket" => Ok(Self::Bracket(Bracket::default())),
            _ => Err(format!(
                "Unknown rule: '{}'. Valid options: gauss-kronrod, bracket, bracket:<steps>",
                s
            )),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GaussKronrod(_) => write!(f, "gauss-kronrod"),
            Self::Bracket(b) => write!(f, "bracket:{}", b.steps),
        }
    }
}
