use crate::domain::Domain;

/// The flux half of a concrete conservation law. The driver calls
/// `compute_fluxes` once per sub-step; the kernel reads the reconstructed
/// edge and boundary values, writes each conserved quantity's
/// `explicit_update`, records the per-cell `max_speed`, and returns the
/// largest stable timestep implied by the characteristic speeds (before the
/// CFL factor is applied).
pub trait FluxKernel {
    fn compute_fluxes(&self, domain: &mut Domain) -> f64;
}

/// An extra source or sink driving the system, e.g. wind stress, friction,
/// rainfall. Forcing terms add into each quantity's `explicit_update` and
/// `semi_implicit_update`, and may tighten the flux timestep to keep
/// themselves stable.
pub trait ForcingTerm {
    fn apply(&self, domain: &mut Domain);
}

impl<F> ForcingTerm for F
where
    F: Fn(&mut Domain),
{
    fn apply(&self, domain: &mut Domain) {
        self(domain)
    }
}
