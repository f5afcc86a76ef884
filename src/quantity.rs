use crate::error::Error;
use crate::geometry::Point;
use crate::mesh::Mesh;
use rayon::prelude::*;

/// Where a value assignment applies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Location {
    Centroids,
    Vertices,
    Edges,
}

/// The value source for [`Quantity::set_values`].
pub enum Values<'a> {
    Constant(f64),
    /// Evaluated pointwise at the target location's coordinates.
    Function(&'a dyn Fn(Point) -> f64),
    /// One value per cell, applied uniformly over the cell.
    Cells(&'a [f64]),
    /// Full per-vertex control.
    Vertices(&'a [[f64; 3]]),
    Quantity(&'a Quantity),
}

/// Mesh-resident storage for one named field: cell averages, reconstructed
/// per-vertex and per-edge values, boundary values (one slot per boundary
/// edge), and the two update accumulators filled by the flux kernel and the
/// forcing terms.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Quantity {
    centroid_values: Vec<f64>,
    vertex_values: Vec<[f64; 3]>,
    edge_values: Vec<[f64; 3]>,
    boundary_values: Vec<f64>,
    explicit_update: Vec<f64>,
    semi_implicit_update: Vec<f64>,
    centroid_backup: Vec<f64>,
    beta: f64,
}

impl Quantity {
    pub fn zeros(num_cells: usize, num_boundary: usize) -> Self {
        Self {
            centroid_values: vec![0.0; num_cells],
            vertex_values: vec![[0.0; 3]; num_cells],
            edge_values: vec![[0.0; 3]; num_cells],
            boundary_values: vec![0.0; num_boundary],
            explicit_update: vec![0.0; num_cells],
            semi_implicit_update: vec![0.0; num_cells],
            centroid_backup: vec![0.0; num_cells],
            beta: 1.0,
        }
    }

    pub fn from_scalar_function<F>(mesh: &Mesh, f: F) -> Self
    where
        F: Fn(Point) -> f64,
    {
        let mut q = Self::zeros(mesh.number_of_triangles(), mesh.boundary().len());
        q.set_values(mesh, Values::Function(&f), Location::Vertices, None);
        q
    }

    pub fn num_cells(&self) -> usize {
        self.centroid_values.len()
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    pub fn set_beta(&mut self, beta: f64) {
        self.beta = beta;
    }

    /// Assign values at the given location. Assignments at vertices are
    /// immediately interpolated down to centroids and edges; centroid
    /// assignments leave the reconstruction to the next
    /// `distribute_to_vertices_and_edges`.
    pub fn set_values(
        &mut self,
        mesh: &Mesh,
        values: Values,
        location: Location,
        indices: Option<&[usize]>,
    ) {
        let cells: Vec<usize> = match indices {
            Some(ids) => ids.to_vec(),
            None => (0..self.num_cells()).collect(),
        };

        match values {
            Values::Constant(c) => {
                for &k in &cells {
                    self.assign_cell(k, location, [c, c, c]);
                }
            }
            Values::Function(f) => {
                for &k in &cells {
                    let v = match location {
                        Location::Centroids => {
                            let c = f(mesh.centroid(k));
                            [c, c, c]
                        }
                        Location::Vertices => {
                            let p = mesh.vertex_coordinates(k);
                            [f(p[0]), f(p[1]), f(p[2])]
                        }
                        Location::Edges => [
                            f(mesh.edge_midpoint(k, 0)),
                            f(mesh.edge_midpoint(k, 1)),
                            f(mesh.edge_midpoint(k, 2)),
                        ],
                    };
                    self.assign_cell(k, location, v);
                }
            }
            Values::Cells(data) => {
                // One entry per selected cell.
                for (j, &k) in cells.iter().enumerate() {
                    let c = data[j];
                    self.assign_cell(k, location, [c, c, c]);
                }
            }
            Values::Vertices(data) => {
                for (j, &k) in cells.iter().enumerate() {
                    self.assign_cell(k, Location::Vertices, data[j]);
                }
            }
            Values::Quantity(other) => {
                for &k in &cells {
                    self.centroid_values[k] = other.centroid_values[k];
                    self.vertex_values[k] = other.vertex_values[k];
                    self.edge_values[k] = other.edge_values[k];
                }
            }
        }

        if location == Location::Vertices {
            self.interpolate(&cells);
        }
    }

    fn assign_cell(&mut self, k: usize, location: Location, v: [f64; 3]) {
        match location {
            Location::Centroids => self.centroid_values[k] = v[0],
            Location::Vertices => self.vertex_values[k] = v,
            Location::Edges => self.edge_values[k] = v,
        }
    }

    /// Compute centroid and edge values from vertex values on the given
    /// cells.
    fn interpolate(&mut self, cells: &[usize]) {
        for &k in cells {
            let v = self.vertex_values[k];
            self.centroid_values[k] = (v[0] + v[1] + v[2]) / 3.0;
            for i in 0..3 {
                self.edge_values[k][i] = 0.5 * (v[(i + 1) % 3] + v[(i + 2) % 3]);
            }
        }
    }

    /// Piecewise-constant reconstruction: every vertex and edge takes its
    /// cell's average.
    pub fn extrapolate_first_order(&mut self) {
        let centroid = &self.centroid_values;

        self.vertex_values
            .par_iter_mut()
            .zip(self.edge_values.par_iter_mut())
            .enumerate()
            .for_each(|(k, (vv, ev))| {
                *vv = [centroid[k]; 3];
                *ev = [centroid[k]; 3];
            });
    }

    /// Limited piecewise-linear reconstruction. A least-squares gradient is
    /// fit through the neighbouring cell averages, then scaled back so no
    /// vertex value leaves the range spanned by the neighbourhood averages
    /// (scaled by the limiter parameter beta, capped at one).
    pub fn extrapolate_second_order(&mut self, mesh: &Mesh) {
        let centroid = &self.centroid_values;
        let beta = self.beta;

        self.vertex_values
            .par_iter_mut()
            .enumerate()
            .for_each(|(k, vv)| {
                let qc = centroid[k];
                let ck = mesh.centroid(k);

                let mut others: Vec<usize> = mesh
                    .surrogate_neighbours(k)
                    .iter()
                    .copied()
                    .filter(|&n| n != k)
                    .collect();
                others.dedup();

                let gradient = least_squares_gradient(ck, qc, &others, centroid, mesh);

                let mut qmin = qc;
                let mut qmax = qc;
                for &n in &others {
                    qmin = qmin.min(centroid[n]);
                    qmax = qmax.max(centroid[n]);
                }

                let corners = mesh.vertex_coordinates(k);
                let raw = [
                    qc + gradient.dot(corners[0] - ck),
                    qc + gradient.dot(corners[1] - ck),
                    qc + gradient.dot(corners[2] - ck),
                ];

                let mut phi = 1.0f64;
                for &v in &raw {
                    let dq = v - qc;
                    let r = if dq > 0.0 {
                        (qmax - qc) / dq
                    } else if dq < 0.0 {
                        (qmin - qc) / dq
                    } else {
                        1.0
                    };
                    phi = phi.min((r * beta).min(1.0));
                }
                phi = phi.max(0.0);

                for i in 0..3 {
                    vv[i] = qc + phi * (raw[i] - qc);
                }
            });

        let vertex = &self.vertex_values;
        self.edge_values
            .par_iter_mut()
            .enumerate()
            .for_each(|(k, ev)| {
                let v = vertex[k];
                for i in 0..3 {
                    ev[i] = 0.5 * (v[(i + 1) % 3] + v[(i + 2) % 3]);
                }
            });
    }

    /// Advance the cell averages by one timestep: the explicit increment,
    /// then the semi-implicit factor `1 / (1 - dt * s / c)` which keeps
    /// decay-type source terms stable at large timesteps.
    pub fn update(&mut self, timestep: f64) -> Result<(), Error> {
        for (c, &e) in self
            .centroid_values
            .iter_mut()
            .zip(self.explicit_update.iter())
        {
            *c += timestep * e;
        }

        for (k, (c, &s)) in self
            .centroid_values
            .iter_mut()
            .zip(self.semi_implicit_update.iter())
            .enumerate()
        {
            if s == 0.0 {
                continue;
            }
            if *c == 0.0 {
                // A vanished quantity cannot absorb a relative source.
                continue;
            }
            let denominator = 1.0 - timestep * s / *c;
            if denominator <= 0.0 {
                return Err(Error::SemiImplicitBreakdown {
                    cell: k,
                    denominator,
                });
            }
            *c /= denominator;
        }

        self.semi_implicit_update.iter_mut().for_each(|s| *s = 0.0);
        Ok(())
    }

    pub fn backup_centroid_values(&mut self) {
        self.centroid_backup.copy_from_slice(&self.centroid_values);
    }

    /// `centroid <- a * centroid + b * backup`
    pub fn saxpy_centroid_values(&mut self, a: f64, b: f64) {
        for (c, &s) in self
            .centroid_values
            .iter_mut()
            .zip(self.centroid_backup.iter())
        {
            *c = a * *c + b * s;
        }
    }

    /// Largest cell average, with its cell index, over the given subset (or
    /// everything).
    pub fn maximum(&self, indices: Option<&[usize]>) -> Option<(usize, f64)> {
        self.extremum(indices, |candidate, best| candidate > best)
    }

    pub fn minimum(&self, indices: Option<&[usize]>) -> Option<(usize, f64)> {
        self.extremum(indices, |candidate, best| candidate < best)
    }

    fn extremum(
        &self,
        indices: Option<&[usize]>,
        better: impl Fn(f64, f64) -> bool,
    ) -> Option<(usize, f64)> {
        let mut result: Option<(usize, f64)> = None;
        let consider = |result: &mut Option<(usize, f64)>, k: usize| {
            let v = self.centroid_values[k];
            match result {
                Some((_, best)) if !better(v, *best) => {}
                _ => *result = Some((k, v)),
            }
        };
        match indices {
            Some(ids) => ids.iter().for_each(|&k| consider(&mut result, k)),
            None => (0..self.num_cells()).for_each(|k| consider(&mut result, k)),
        }
        result
    }

    pub fn centroid_values(&self) -> &[f64] {
        &self.centroid_values
    }

    pub fn centroid_values_mut(&mut self) -> &mut [f64] {
        &mut self.centroid_values
    }

    pub fn vertex_values(&self, cell: usize) -> [f64; 3] {
        self.vertex_values[cell]
    }

    pub fn edge_values(&self, cell: usize) -> [f64; 3] {
        self.edge_values[cell]
    }

    pub fn edge_value(&self, cell: usize, edge: usize) -> f64 {
        self.edge_values[cell][edge]
    }

    pub fn boundary_values(&self) -> &[f64] {
        &self.boundary_values
    }

    pub fn set_boundary_value(&mut self, slot: usize, value: f64) {
        self.boundary_values[slot] = value;
    }

    pub fn boundary_value(&self, slot: usize) -> f64 {
        self.boundary_values[slot]
    }

    pub fn explicit_update(&self) -> &[f64] {
        &self.explicit_update
    }

    pub fn explicit_update_mut(&mut self) -> &mut [f64] {
        &mut self.explicit_update
    }

    pub fn semi_implicit_update_mut(&mut self) -> &mut [f64] {
        &mut self.semi_implicit_update
    }

    /// Elementwise combination of two quantities over every storage
    /// location. This is the engine behind quantity arithmetic and the
    /// expression evaluator.
    pub fn zip_with(&self, other: &Quantity, f: impl Fn(f64, f64) -> f64) -> Quantity {
        let mut out = self.clone();
        for (a, &b) in out
            .centroid_values
            .iter_mut()
            .zip(other.centroid_values.iter())
        {
            *a = f(*a, b);
        }
        for (a, b) in out.vertex_values.iter_mut().zip(other.vertex_values.iter()) {
            for i in 0..3 {
                a[i] = f(a[i], b[i]);
            }
        }
        for (a, b) in out.edge_values.iter_mut().zip(other.edge_values.iter()) {
            for i in 0..3 {
                a[i] = f(a[i], b[i]);
            }
        }
        for (a, &b) in out
            .boundary_values
            .iter_mut()
            .zip(other.boundary_values.iter())
        {
            *a = f(*a, b);
        }
        out.explicit_update.iter_mut().for_each(|x| *x = 0.0);
        out.semi_implicit_update.iter_mut().for_each(|x| *x = 0.0);
        out
    }

    pub fn map(&self, f: impl Fn(f64) -> f64) -> Quantity {
        let mut out = self.clone();
        out.centroid_values.iter_mut().for_each(|x| *x = f(*x));
        out.vertex_values
            .iter_mut()
            .for_each(|v| v.iter_mut().for_each(|x| *x = f(*x)));
        out.edge_values
            .iter_mut()
            .for_each(|v| v.iter_mut().for_each(|x| *x = f(*x)));
        out.boundary_values.iter_mut().for_each(|x| *x = f(*x));
        out.explicit_update.iter_mut().for_each(|x| *x = 0.0);
        out.semi_implicit_update.iter_mut().for_each(|x| *x = 0.0);
        out
    }

    pub fn powf(&self, exponent: f64) -> Quantity {
        self.map(|x| x.powf(exponent))
    }
}

/// Fit a linear function through the cell average and its neighbours'
/// averages by normal equations. Falls back to a flat gradient when the
/// neighbourhood is too thin or too collinear to determine a slope.
fn least_squares_gradient(
    ck: Point,
    qc: f64,
    neighbours: &[usize],
    centroid: &[f64],
    mesh: &Mesh,
) -> Point {
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    let mut syy = 0.0;
    let mut sxq = 0.0;
    let mut syq = 0.0;

    for &n in neighbours {
        let d = mesh.centroid(n) - ck;
        let dq = centroid[n] - qc;
        sxx += d.x * d.x;
        sxy += d.x * d.y;
        syy += d.y * d.y;
        sxq += d.x * dq;
        syq += d.y * dq;
    }

    let det = sxx * syy - sxy * sxy;
    if det.abs() < 1.0e-14 {
        return Point::default();
    }
    Point::new((syy * sxq - sxy * syq) / det, (sxx * syq - sxy * sxq) / det)
}

impl std::ops::Add for &Quantity {
    type Output = Quantity;
    fn add(self, other: &Quantity) -> Quantity {
        self.zip_with(other, |a, b| a + b)
    }
}

impl std::ops::Sub for &Quantity {
    type Output = Quantity;
    fn sub(self, other: &Quantity) -> Quantity {
        self.zip_with(other, |a, b| a - b)
    }
}

impl std::ops::Mul for &Quantity {
    type Output = Quantity;
    fn mul(self, other: &Quantity) -> Quantity {
        self.zip_with(other, |a, b| a * b)
    }
}

impl std::ops::Div for &Quantity {
    type Output = Quantity;
    fn div(self, other: &Quantity) -> Quantity {
        self.zip_with(other, |a, b| a / b)
    }
}

#[cfg(test)]
mod test {
    use super::{Location, Quantity, Values};
    use crate::geometry::Point;
    use crate::mesh::{Mesh, MeshOptions};

    fn unit_square_mesh() -> Mesh {
        let points = vec![
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(0.0, 1.0),
        ];
        Mesh::new(points, vec![[0, 1, 2], [0, 2, 3]], MeshOptions::default()).unwrap()
    }

    #[test]
    fn constant_assignment_round_trips() {
        let mesh = unit_square_mesh();
        let mut q = Quantity::zeros(mesh.number_of_triangles(), mesh.boundary().len());

        q.set_values(&mesh, Values::Constant(7.5), Location::Vertices, None);

        assert_eq!(q.centroid_values(), &[7.5, 7.5]);
        assert_eq!(q.vertex_values(0), [7.5; 3]);
        assert_eq!(q.edge_values(1), [7.5; 3]);
    }

    #[test]
    fn function_assignment_interpolates_centroid() {
        let mesh = unit_square_mesh();
        let q = Quantity::from_scalar_function(&mesh, |p| p.x + 2.0 * p.y);

        for k in 0..2 {
            let c = mesh.centroid(k);
            assert!((q.centroid_values()[k] - (c.x + 2.0 * c.y)).abs() < 1e-12);
        }
    }

    #[test]
    fn first_order_extrapolation_round_trips() {
        let mesh = unit_square_mesh();
        let mut q = Quantity::zeros(2, mesh.boundary().len());
        q.set_values(&mesh, Values::Cells(&[1.0, 4.0]), Location::Centroids, None);

        q.extrapolate_first_order();

        assert_eq!(q.vertex_values(0), [1.0; 3]);
        assert_eq!(q.edge_values(1), [4.0; 3]);

        // Interpolating the vertex values back recovers the averages.
        assert_eq!(q.centroid_values(), &[1.0, 4.0]);
    }

    #[test]
    fn second_order_extrapolation_is_exact_for_constants() {
        let mesh = unit_square_mesh();
        let mut q = Quantity::zeros(2, mesh.boundary().len());
        q.set_values(&mesh, Values::Constant(3.0), Location::Centroids, None);

        q.extrapolate_second_order(&mesh);

        for k in 0..2 {
            for v in q.vertex_values(k) {
                assert!((v - 3.0).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn limiter_keeps_vertex_values_in_neighbourhood_range() {
        let mesh = unit_square_mesh();
        let mut q = Quantity::zeros(2, mesh.boundary().len());
        q.set_values(&mesh, Values::Cells(&[0.0, 10.0]), Location::Centroids, None);
        q.set_beta(1.0);

        q.extrapolate_second_order(&mesh);

        for k in 0..2 {
            for v in q.vertex_values(k) {
                assert!((0.0..=10.0).contains(&v));
            }
        }
    }

    #[test]
    fn explicit_and_semi_implicit_update() {
        let mesh = unit_square_mesh();
        let mut q = Quantity::zeros(2, mesh.boundary().len());
        q.set_values(&mesh, Values::Constant(2.0), Location::Centroids, None);

        q.explicit_update_mut()[0] = 1.0;
        q.semi_implicit_update_mut()[1] = 1.0;

        q.update(0.5).unwrap();

        assert!((q.centroid_values()[0] - 2.5).abs() < 1e-12);
        // 2.0 / (1 - 0.5 * 1.0 / 2.0) = 2.0 / 0.75
        assert!((q.centroid_values()[1] - 2.0 / 0.75).abs() < 1e-12);

        // The semi-implicit accumulator is consumed by the update.
        q.update(0.5).unwrap();
        assert!((q.centroid_values()[1] - 2.0 / 0.75 - 0.0).abs() < 1e-12);
    }

    #[test]
    fn semi_implicit_breakdown_is_an_error() {
        let mesh = unit_square_mesh();
        let mut q = Quantity::zeros(2, mesh.boundary().len());
        q.set_values(&mesh, Values::Constant(1.0), Location::Centroids, None);
        q.semi_implicit_update_mut()[0] = 10.0;

        assert!(q.update(1.0).is_err());
    }

    #[test]
    fn saxpy_blends_with_backup() {
        let mesh = unit_square_mesh();
        let mut q = Quantity::zeros(2, mesh.boundary().len());
        q.set_values(&mesh, Values::Cells(&[1.0, 2.0]), Location::Centroids, None);

        q.backup_centroid_values();
        q.set_values(&mesh, Values::Cells(&[5.0, 6.0]), Location::Centroids, None);
        q.saxpy_centroid_values(0.5, 0.5);

        assert_eq!(q.centroid_values(), &[3.0, 4.0]);
    }

    #[test]
    fn extrema_with_indices() {
        let mesh = unit_square_mesh();
        let mut q = Quantity::zeros(2, mesh.boundary().len());
        q.set_values(&mesh, Values::Cells(&[1.0, 9.0]), Location::Centroids, None);

        assert_eq!(q.maximum(None), Some((1, 9.0)));
        assert_eq!(q.minimum(None), Some((0, 1.0)));
        assert_eq!(q.maximum(Some(&[0])), Some((0, 1.0)));
    }

    #[test]
    fn arithmetic_combines_all_locations() {
        let mesh = unit_square_mesh();
        let mut a = Quantity::zeros(2, mesh.boundary().len());
        let mut b = Quantity::zeros(2, mesh.boundary().len());
        a.set_values(&mesh, Values::Constant(6.0), Location::Vertices, None);
        b.set_values(&mesh, Values::Constant(2.0), Location::Vertices, None);

        let sum = &a + &b;
        let ratio = &a / &b;

        assert_eq!(sum.centroid_values(), &[8.0, 8.0]);
        assert_eq!(sum.vertex_values(0), [8.0; 3]);
        assert_eq!(ratio.centroid_values(), &[3.0, 3.0]);
        assert_eq!(a.powf(2.0).centroid_values(), &[36.0, 36.0]);
    }
}
