use crate::error::Error;
use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

/// Time integration scheme selector. All three are strong-stability
/// preserving: RK2 and RK3 are convex combinations of Euler sub-steps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TimesteppingMethod {
    Euler,
    Rk2,
    Rk3,
}

impl FromStr for TimesteppingMethod {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self, Error> {
        match name {
            "euler" => Ok(Self::Euler),
            "rk2" => Ok(Self::Rk2),
            "rk3" => Ok(Self::Rk3),
            _ => Err(Error::InvalidTimesteppingMethod(name.to_string())),
        }
    }
}

impl TryFrom<usize> for TimesteppingMethod {
    type Error = Error;

    fn try_from(selector: usize) -> Result<Self, Error> {
        match selector {
            1 => Ok(Self::Euler),
            2 => Ok(Self::Rk2),
            3 => Ok(Self::Rk3),
            _ => Err(Error::InvalidTimesteppingMethod(selector.to_string())),
        }
    }
}

impl fmt::Display for TimesteppingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Euler => write!(f, "euler"),
            Self::Rk2 => write!(f, "rk2"),
            Self::Rk3 => write!(f, "rk3"),
        }
    }
}

/// Integration parameters the domain starts out with. Each field can be
/// changed later through the corresponding setter on the domain.
#[derive(Clone, Debug)]
pub struct Config {
    /// Safety factor multiplying the characteristic-speed timestep.
    pub cfl: f64,

    /// Default slope limiter parameter handed to every quantity.
    pub beta_w: f64,

    /// General-purpose numerical tolerance.
    pub epsilon: f64,

    /// Spatial reconstruction order, 1 or 2.
    pub default_order: u32,

    pub timestepping_method: TimesteppingMethod,

    /// Largest timestep ever taken; also the default yieldstep.
    pub max_timestep: f64,

    /// Steps below this trip the small-step protection.
    pub min_timestep: f64,

    /// Consecutive small steps tolerated before dropping the order (and
    /// eventually failing).
    pub max_smallsteps: u32,

    pub protect_against_isolated_degenerate_timesteps: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cfl: 1.0,
            beta_w: 1.5,
            epsilon: 1.0e-12,
            default_order: 1,
            timestepping_method: TimesteppingMethod::Euler,
            max_timestep: 1.0e3,
            min_timestep: 1.0e-6,
            max_smallsteps: 50,
            protect_against_isolated_degenerate_timesteps: false,
        }
    }
}

/// Tolerance used when comparing candidate extrema against recorded ones.
pub const SINGLE_PRECISION_EPSILON: f64 = f32::EPSILON as f64;

#[cfg(test)]
mod test {
    use super::TimesteppingMethod;
    use std::convert::TryFrom;

    #[test]
    fn method_parses_from_name_and_selector() {
        assert_eq!("rk2".parse::<TimesteppingMethod>().unwrap(), TimesteppingMethod::Rk2);
        assert_eq!(TimesteppingMethod::try_from(3).unwrap(), TimesteppingMethod::Rk3);
        assert!("foo".parse::<TimesteppingMethod>().is_err());
        assert!(TimesteppingMethod::try_from(0).is_err());
    }
}
