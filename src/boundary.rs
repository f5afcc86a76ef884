use crate::domain::Domain;

/// A boundary condition attached to one or more tagged boundary edges.
///
/// `evaluate` returns the boundary vector for the given half-edge, with one
/// entry per conserved quantity or one per evolved quantity; the driver
/// completes conserved-length vectors through the domain's
/// conserved-to-evolved mapping. Boundary objects read the domain but must
/// not mutate it.
pub trait Boundary {
    fn evaluate(&self, domain: &Domain, cell: usize, edge: usize) -> Vec<f64>;
}

/// Fixed boundary vector, e.g. a still-water level on an open ocean edge.
pub struct Dirichlet {
    values: Vec<f64>,
}

impl Dirichlet {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }
}

impl Boundary for Dirichlet {
    fn evaluate(&self, _domain: &Domain, _cell: usize, _edge: usize) -> Vec<f64> {
        self.values.clone()
    }
}

/// Mirrors the flow state of the adjacent cell back onto the boundary, so
/// waves pass out of the domain undisturbed. Uses the reconstructed edge
/// value unless the domain asks for the (safer) centroid value.
pub struct Transmissive;

impl Boundary for Transmissive {
    fn evaluate(&self, domain: &Domain, cell: usize, edge: usize) -> Vec<f64> {
        if domain.centroid_transmissive_bc() {
            domain.evolved_values_at(cell, None)
        } else {
            domain.evolved_values_at(cell, Some(edge))
        }
    }
}

/// Boundary vector given as a function of absolute model time, e.g. a tidal
/// record.
pub struct TimeBoundary {
    function: Box<dyn Fn(f64) -> Vec<f64>>,
}

impl TimeBoundary {
    pub fn new<F>(function: F) -> Self
    where
        F: Fn(f64) -> Vec<f64> + 'static,
    {
        Self {
            function: Box::new(function),
        }
    }
}

impl Boundary for TimeBoundary {
    fn evaluate(&self, domain: &Domain, _cell: usize, _edge: usize) -> Vec<f64> {
        (self.function)(domain.get_time())
    }
}
