//! Integrands.
//!
//! The scheduler only ever sees an [`Integrand`]: a named, thread-safe, pure
//! `f64 -> f64` function. [`FunctionSpec`] is the small catalog the command
//! line can name; process workers rebuild their integrand from the spec it
//! was built from.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// A pure real function shared by every worker.
#[derive(Clone)]
pub struct Integrand {
    name: String,
    func: Arc<dyn Fn(f64) -> f64 + Send + Sync>,
    spec: Option<FunctionSpec>,
}

impl Integrand {
    pub fn new(name: impl Into<String>, func: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            func: Arc::new(func),
            spec: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Catalog entry this integrand was built from, if any.
    pub fn spec(&self) -> Option<FunctionSpec> {
        self.spec
    }

    #[inline]
    pub fn eval(&self, x: f64) -> f64 {
        (self.func)(x)
    }
}

impl fmt::Debug for Integrand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Integrand")
            .field("name", &self.name)
            .field("spec", &self.spec)
            .finish()
    }
}

/// Built-in integrands selectable by name.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum FunctionSpec {
    /// 4x³
    #[default]
    Cubic,
    Sin,
    Exp,
    /// e^(-x²)
    Gauss,
    /// √|x|
    Sqrt,
    /// 0 for x < 0, 1 otherwise
    Step,
    Constant(f64),
}

impl FunctionSpec {
    pub fn integrand(self) -> Integrand {
        let name = self.to_string();
        let integrand = match self {
            Self::Cubic => Integrand::new(name, |x| 4.0 * x * x * x),
            Self::Sin => Integrand::new(name, f64::sin),
            Self::Exp => Integrand::new(name, f64::exp),
            Self::Gauss => Integrand::new(name, |x| (-x * x).exp()),
            Self::Sqrt => Integrand::new(name, |x: f64| x.abs().sqrt()),
            Self::Step => Integrand::new(name, |x| if x < 0.0 { 0.0 } else { 1.0 }),
            Self::Constant(c) => Integrand::new(name, move |_| c),
        };
        Integrand {
            spec: Some(self),
            ..integrand
        }
    }
}

impl FromStr for FunctionSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(value) = s
            .strip_prefix("const=")
            .or_else(|| s.strip_prefix("constant="))
        {
            return value
                .parse::<f64>()
                .ok()
                .filter(|c| c.is_finite())
                .map(Self::Constant)
                .ok_or_else(|| format!("Invalid constant value: '{}'", value));
        }

        match s.to_lowercase().as_str() {
            "cubic" => Ok(Self::Cubic),
            "sin" => Ok(Self::Sin),
            "exp" => Ok(Self::Exp),
            "gauss" => Ok(Self::Gauss),
            "sqrt" => Ok(Self::Sqrt),
            "step" => Ok(Self::Step),
            _ => Err(format!(
                "Unknown function: '{}'. Valid options: cubic, sin, exp, gauss, sqrt, step, const=<c>",
                s
            )),
        }
    }
}

impl fmt::Display for FunctionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cubic => write!(f, "cubic"),
            Self::Sin => write!(f, "sin"),
            Self::Exp => write!(f, "exp"),
            Self::Gauss => write!(f, "gauss"),
            Self::Sqrt => write!(f, "sqrt"),
            Self::Step => write!(f, "step"),
            Self::Constant(c) => write!(f, "const={}", c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_spec_from_str() {
        assert_eq!("cubic".parse::<FunctionSpec>().unwrap(), FunctionSpec::Cubic);
        assert_eq!("SIN".parse::<FunctionSpec>().unwrap(), FunctionSpec::Sin);
        assert_eq!(
            "const=2.5".parse::<FunctionSpec>().unwrap(),
            FunctionSpec::Constant(2.5)
        );
        assert_eq!(
            "constant=-1".parse::<FunctionSpec>().unwrap(),
            FunctionSpec::Constant(-1.0)
        );
        assert!("tan".parse::<FunctionSpec>().is_err());
        assert!("const=abc".parse::<FunctionSpec>().is_err());
        assert!("const=inf".parse::<FunctionSpec>().is_err());
    }

    #[test]
    fn test_display_parses_back() {
        for spec in [
            FunctionSpec::Cubic,
            FunctionSpec::Gauss,
            FunctionSpec::Step,
            FunctionSpec::Constant(0.75),
        ] {
            assert_eq!(spec.to_string().parse::<FunctionSpec>().unwrap(), spec);
        }
    }

    #[test]
    fn test_integrand_values() {
        assert_eq!(FunctionSpec::Cubic.integrand().eval(2.0), 32.0);
        assert_eq!(FunctionSpec::Sqrt.integrand().eval(-4.0), 2.0);
        assert_eq!(FunctionSpec::Step.integrand().eval(-0.1), 0.0);
        assert_eq!(FunctionSpec::Step.integrand().eval(0.0), 1.0);
        assert_eq!(FunctionSpec::Constant(3.0).integrand().eval(1e9), 3.0);
    }

    #[test]
    fn test_integrand_name() {
        let f = FunctionSpec::Constant(2.0).integrand();
        assert_eq!(f.name(), "const=2");
        assert!(format!("{:?}", f).contains("const=2"));
    }

    #[test]
    fn test_spec_travels_with_catalog_integrands() {
        assert_eq!(FunctionSpec::Gauss.integrand().spec(), Some(FunctionSpec::Gauss));
        let custom = Integrand::new("cubic", f64::sin);
        assert_eq!(custom.spec(), None);
    }
}
