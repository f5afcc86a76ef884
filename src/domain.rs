use crate::boundary::Boundary;
use crate::checkpoint::CheckpointState;
use crate::config::{Config, TimesteppingMethod, SINGLE_PRECISION_EPSILON};
use crate::error::Error;
use crate::expression::Expression;
use crate::forcing::{FluxKernel, ForcingTerm};
use crate::geometry::{points_in_polygon, Point};
use crate::ghost::{GhostExchange, PeerDescriptor};
use crate::mesh::Mesh;
use crate::monitor::{ExtremaBlock, Monitor};
use crate::quantity::{Location, Quantity, Values};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Instant;

/// Optional construction inputs beyond the mesh and the conserved-quantity
/// names.
pub struct DomainOptions {
    /// All quantities whose vertex/edge values are maintained; the conserved
    /// names must be its first entries. Defaults to the conserved list.
    pub evolved: Option<Vec<String>>,

    /// Auxiliary quantities (e.g. bed elevation, friction) that get storage
    /// but are not advanced by the balance law.
    pub other: Vec<String>,

    /// Ghost-exchange descriptors, keyed by peer process index.
    pub ghosts: BTreeMap<usize, PeerDescriptor>,

    pub processor: usize,
    pub numproc: usize,

    /// Overrides the mesh's count of locally-owned cells. When ghost
    /// descriptors are present and no override is given, the count defaults
    /// to the cells not appearing in any ghost list.
    pub number_of_full_triangles: Option<usize>,

    pub config: Config,
}

impl Default for DomainOptions {
    fn default() -> Self {
        Self {
            evolved: None,
            other: Vec::new(),
            ghosts: BTreeMap::new(),
            processor: 0,
            numproc: 1,
            number_of_full_triangles: None,
            config: Config::default(),
        }
    }
}

type ConservedToEvolved = Box<dyn Fn(&[f64], &mut [f64])>;

/// The mesh-bound numerical state of a finite-volume computation, and the
/// driver that advances it. Concrete conservation laws plug in a flux
/// kernel, forcing terms, boundary objects, and (when the evolved list is a
/// strict superset of the conserved one) a conserved-to-evolved mapping.
pub struct Domain {
    pub(crate) mesh: Mesh,

    pub(crate) conserved_quantities: Vec<String>,
    pub(crate) evolved_quantities: Vec<String>,
    pub(crate) other_quantities: Vec<String>,
    pub(crate) quantities: BTreeMap<String, Quantity>,

    pub(crate) boundary_map: Option<BTreeMap<String, Option<Rc<dyn Boundary>>>>,
    pub(crate) boundary_objects: Vec<((usize, usize), Rc<dyn Boundary>)>,

    pub(crate) forcing_terms: Vec<Box<dyn ForcingTerm>>,
    pub(crate) flux_kernel: Option<Box<dyn FluxKernel>>,
    pub(crate) conserved_to_evolved: Option<ConservedToEvolved>,

    pub(crate) ghosts: GhostExchange,
    pub(crate) tri_full_flag: Vec<u8>,
    pub(crate) processor: usize,
    pub(crate) numproc: usize,

    // Integration parameters
    pub(crate) cfl: f64,
    pub(crate) beta: f64,
    pub(crate) epsilon: f64,
    pub(crate) default_order: u32,
    pub(crate) order: u32,
    pub(crate) timestepping_method: TimesteppingMethod,
    pub(crate) evolve_max_timestep: f64,
    pub(crate) evolve_min_timestep: f64,
    pub(crate) max_smallsteps: u32,
    pub(crate) smallsteps: u32,
    pub(crate) protect_against_isolated_degenerate_timesteps: bool,
    pub(crate) protection_quantities: Vec<String>,
    pub(crate) centroid_transmissive_bc: bool,

    // Time state
    pub(crate) time: f64,
    pub(crate) starttime: f64,
    pub(crate) finaltime: Option<f64>,
    pub(crate) yieldtime: f64,
    pub(crate) timestep: f64,
    pub(crate) flux_timestep: f64,
    pub(crate) recorded_min_timestep: f64,
    pub(crate) recorded_max_timestep: f64,
    pub(crate) number_of_steps: u64,
    pub(crate) number_of_first_order_steps: u64,

    // Diagnostics
    pub(crate) max_speed: Vec<f64>,
    pub(crate) already_computed_flux: Vec<[i32; 3]>,
    pub(crate) last_walltime: Instant,
    pub(crate) simulation_name: String,

    pub(crate) monitor: Option<Monitor>,
    pub(crate) checkpointing: bool,
    pub(crate) last_checkpoint: Option<CheckpointState>,
}

impl Domain {
    pub fn new(mesh: Mesh, conserved: &[&str], options: DomainOptions) -> Result<Self, Error> {
        let mut mesh = mesh;
        let conserved_quantities: Vec<String> =
            conserved.iter().map(|s| s.to_string()).collect();

        let evolved_quantities = options
            .evolved
            .unwrap_or_else(|| conserved_quantities.clone());

        if evolved_quantities.len() < conserved_quantities.len()
            || evolved_quantities[..conserved_quantities.len()] != conserved_quantities[..]
        {
            return Err(Error::ConservedNotPrefixOfEvolved {
                conserved: conserved_quantities,
                evolved: evolved_quantities,
            });
        }

        let n = mesh.number_of_triangles();
        let num_boundary = mesh.boundary().len();

        let mut quantities = BTreeMap::new();
        for name in evolved_quantities.iter().chain(options.other.iter()) {
            quantities.insert(name.clone(), Quantity::zeros(n, num_boundary));
        }

        let nsys = conserved_quantities.len();
        let ghosts = GhostExchange::new(options.ghosts, nsys);
        let tri_full_flag = ghosts.tri_full_flag(n);

        let number_of_full_triangles = options
            .number_of_full_triangles
            .unwrap_or_else(|| n - ghosts.total_ghost_count());
        mesh.set_number_of_full_triangles(number_of_full_triangles);

        // Full cells are expected to be stored before ghost cells.
        if options.numproc > 1
            && tri_full_flag[..number_of_full_triangles]
                .iter()
                .any(|&f| f == 0)
        {
            log::warn!("not all full triangles are stored before ghost triangles");
        }

        let config = options.config;
        let mut domain = Self {
            mesh,
            conserved_quantities,
            evolved_quantities,
            other_quantities: options.other,
            quantities,
            boundary_map: None,
            boundary_objects: Vec::new(),
            forcing_terms: Vec::new(),
            flux_kernel: None,
            conserved_to_evolved: None,
            ghosts,
            tri_full_flag,
            processor: options.processor,
            numproc: options.numproc,
            cfl: config.cfl,
            beta: config.beta_w,
            epsilon: config.epsilon,
            default_order: 1,
            order: 1,
            timestepping_method: config.timestepping_method,
            evolve_max_timestep: config.max_timestep,
            evolve_min_timestep: config.min_timestep,
            max_smallsteps: config.max_smallsteps,
            smallsteps: 0,
            protect_against_isolated_degenerate_timesteps: config
                .protect_against_isolated_degenerate_timesteps,
            protection_quantities: Vec::new(),
            centroid_transmissive_bc: false,
            time: 0.0,
            starttime: 0.0,
            finaltime: None,
            yieldtime: 0.0,
            timestep: 0.0,
            flux_timestep: 0.0,
            recorded_min_timestep: 0.0,
            recorded_max_timestep: 0.0,
            number_of_steps: 0,
            number_of_first_order_steps: 0,
            max_speed: vec![0.0; n],
            already_computed_flux: vec![[0; 3]; n],
            last_walltime: Instant::now(),
            simulation_name: "domain".to_string(),
            monitor: None,
            checkpointing: false,
            last_checkpoint: None,
        };

        domain.set_default_order(config.default_order)?;
        domain.set_beta(config.beta_w);
        Ok(domain)
    }

    //
    // Mesh access
    //

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    pub fn number_of_triangles(&self) -> usize {
        self.mesh.number_of_triangles()
    }

    pub fn tri_full_flag(&self) -> &[u8] {
        &self.tri_full_flag
    }

    pub fn check_integrity(&self) -> Result<(), Error> {
        self.mesh.check_integrity()?;

        for name in &self.conserved_quantities {
            if !self.quantities.contains_key(name) {
                return Err(Error::UnknownQuantity {
                    name: name.clone(),
                    known: self.quantities.keys().cloned().collect(),
                });
            }
        }
        Ok(())
    }

    //
    // Quantity registry
    //

    pub fn conserved_quantities(&self) -> &[String] {
        &self.conserved_quantities
    }

    pub fn evolved_quantities(&self) -> &[String] {
        &self.evolved_quantities
    }

    /// All quantity names, evolved first, then the auxiliary ones.
    pub fn get_quantity_names(&self) -> Vec<String> {
        self.evolved_quantities
            .iter()
            .chain(self.other_quantities.iter())
            .cloned()
            .collect()
    }

    pub fn get_quantity(&self, name: &str) -> Result<&Quantity, Error> {
        self.quantities.get(name).ok_or_else(|| Error::UnknownQuantity {
            name: name.to_string(),
            known: self.quantities.keys().cloned().collect(),
        })
    }

    pub fn get_quantity_mut(&mut self, name: &str) -> Result<&mut Quantity, Error> {
        if !self.quantities.contains_key(name) {
            return Err(Error::UnknownQuantity {
                name: name.to_string(),
                known: self.quantities.keys().cloned().collect(),
            });
        }
        Ok(self
            .quantities
            .get_mut(name)
            .expect("presence was just checked"))
    }

    pub fn set_quantity(
        &mut self,
        name: &str,
        values: Values,
        location: Location,
        indices: Option<&[usize]>,
    ) -> Result<(), Error> {
        let mesh = &self.mesh;
        if !self.quantities.contains_key(name) {
            return Err(Error::UnknownQuantity {
                name: name.to_string(),
                known: self.quantities.keys().cloned().collect(),
            });
        }
        self.quantities
            .get_mut(name)
            .expect("presence was just checked")
            .set_values(mesh, values, location, indices);
        Ok(())
    }

    /// Evaluate an expression over the current quantities and assign the
    /// result to `name`.
    pub fn set_quantity_from_expression(
        &mut self,
        name: &str,
        expression: &str,
    ) -> Result<(), Error> {
        let derived = self.create_quantity_from_expression(expression)?;
        self.set_quantity(name, Values::Quantity(&derived), Location::Vertices, None)
    }

    pub fn add_quantity(
        &mut self,
        name: &str,
        values: Values,
        location: Location,
    ) -> Result<(), Error> {
        let mut temp = Quantity::zeros(
            self.mesh.number_of_triangles(),
            self.mesh.boundary().len(),
        );
        temp.set_values(&self.mesh, values, location, None);
        let combined = self.get_quantity(name)? + &temp;
        self.set_quantity(name, Values::Quantity(&combined), Location::Vertices, None)
    }

    pub fn add_quantity_from_expression(
        &mut self,
        name: &str,
        expression: &str,
    ) -> Result<(), Error> {
        let temp = self.create_quantity_from_expression(expression)?;
        let combined = self.get_quantity(name)? + &temp;
        self.set_quantity(name, Values::Quantity(&combined), Location::Vertices, None)
    }

    /// Combine existing quantities into a fresh one, e.g.
    /// `create_quantity_from_expression("stage - elevation")`. The domain is
    /// not mutated.
    pub fn create_quantity_from_expression(&self, expression: &str) -> Result<Quantity, Error> {
        Expression::parse(expression)?.evaluate(&self.quantities)
    }

    /// Batch assignment at vertices from a name-to-values list.
    pub fn set_quantity_values<'a, I>(&mut self, entries: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = (&'a str, Values<'a>)>,
    {
        for (name, values) in entries {
            self.set_quantity(name, values, Location::Vertices, None)?;
        }
        Ok(())
    }

    /// Conserved values at a cell: centroid by default, or at one vertex or
    /// one edge. Asking for both at once is a configuration error.
    pub fn get_conserved_quantities(
        &self,
        cell: usize,
        vertex: Option<usize>,
        edge: Option<usize>,
    ) -> Result<Vec<f64>, Error> {
        self.values_at(&self.conserved_quantities, cell, vertex, edge)
    }

    pub fn get_evolved_quantities(
        &self,
        cell: usize,
        vertex: Option<usize>,
        edge: Option<usize>,
    ) -> Result<Vec<f64>, Error> {
        self.values_at(&self.evolved_quantities, cell, vertex, edge)
    }

    fn values_at(
        &self,
        names: &[String],
        cell: usize,
        vertex: Option<usize>,
        edge: Option<usize>,
    ) -> Result<Vec<f64>, Error> {
        if vertex.is_some() && edge.is_some() {
            return Err(Error::BothVertexAndEdge);
        }

        Ok(names
            .iter()
            .map(|name| {
                let q = &self.quantities[name];
                match (vertex, edge) {
                    (Some(v), None) => q.vertex_values(cell)[v],
                    (None, Some(e)) => q.edge_value(cell, e),
                    _ => q.centroid_values()[cell],
                }
            })
            .collect())
    }

    /// Infallible evolved vector at a cell's centroid or one of its edges;
    /// used by transmissive boundaries.
    pub fn evolved_values_at(&self, cell: usize, edge: Option<usize>) -> Vec<f64> {
        self.evolved_quantities
            .iter()
            .map(|name| {
                let q = &self.quantities[name];
                match edge {
                    Some(e) => q.edge_value(cell, e),
                    None => q.centroid_values()[cell],
                }
            })
            .collect()
    }

    //
    // Integration parameters
    //

    pub fn set_cfl(&mut self, cfl: f64) -> Result<(), Error> {
        if cfl <= 0.0 {
            return Err(Error::InvalidCfl(cfl));
        }
        if cfl > 1.0 {
            log::warn!("setting CFL > 1.0 ({})", cfl);
        }
        self.cfl = cfl;
        Ok(())
    }

    pub fn cfl(&self) -> f64 {
        self.cfl
    }

    /// Set the limiter parameter on every quantity.
    pub fn set_beta(&mut self, beta: f64) {
        self.beta = beta;
        for q in self.quantities.values_mut() {
            q.set_beta(beta);
        }
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    pub fn set_default_order(&mut self, order: u32) -> Result<(), Error> {
        if order != 1 && order != 2 {
            return Err(Error::InvalidOrder(order));
        }
        self.default_order = order;
        self.order = order;
        Ok(())
    }

    pub fn default_order(&self) -> u32 {
        self.default_order
    }

    /// The reconstruction order currently in effect; differs from the
    /// default while the small-step fallback holds it at one.
    pub fn active_order(&self) -> u32 {
        self.order
    }

    pub fn set_timestepping_method(&mut self, method: TimesteppingMethod) {
        self.timestepping_method = method;
    }

    pub fn get_timestepping_method(&self) -> TimesteppingMethod {
        self.timestepping_method
    }

    pub fn set_evolve_max_timestep(&mut self, max_timestep: f64) {
        self.evolve_max_timestep = max_timestep;
    }

    pub fn get_evolve_max_timestep(&self) -> f64 {
        self.evolve_max_timestep
    }

    pub fn set_evolve_min_timestep(&mut self, min_timestep: f64) {
        self.evolve_min_timestep = min_timestep;
    }

    pub fn get_evolve_min_timestep(&self) -> f64 {
        self.evolve_min_timestep
    }

    pub fn set_centroid_transmissive_bc(&mut self, flag: bool) {
        self.centroid_transmissive_bc = flag;
    }

    pub fn centroid_transmissive_bc(&self) -> bool {
        self.centroid_transmissive_bc
    }

    pub fn set_name(&mut self, name: &str) {
        self.simulation_name = name.trim_end_matches(".sww").to_string();
    }

    pub fn get_name(&self) -> &str {
        &self.simulation_name
    }

    //
    // Time state
    //

    /// Absolute model time.
    pub fn get_time(&self) -> f64 {
        self.time
    }

    pub fn set_time(&mut self, time: f64) {
        self.time = time;
    }

    pub fn get_starttime(&self) -> f64 {
        self.starttime
    }

    /// Set the start time and move the model clock there. Call before
    /// evolving.
    pub fn set_starttime(&mut self, starttime: f64) {
        self.starttime = starttime;
        self.time = starttime;
    }

    pub fn finaltime(&self) -> Option<f64> {
        self.finaltime
    }

    pub fn processor(&self) -> usize {
        self.processor
    }

    pub fn numproc(&self) -> usize {
        self.numproc
    }

    pub fn timestep(&self) -> f64 {
        self.timestep
    }

    pub fn flux_timestep(&self) -> f64 {
        self.flux_timestep
    }

    /// Forcing terms call this to keep the timestep within their own
    /// stability limit.
    pub fn tighten_flux_timestep(&mut self, timestep: f64) {
        self.flux_timestep = self.flux_timestep.min(timestep);
    }

    pub fn number_of_steps(&self) -> u64 {
        self.number_of_steps
    }

    pub fn number_of_first_order_steps(&self) -> u64 {
        self.number_of_first_order_steps
    }

    pub fn recorded_min_timestep(&self) -> f64 {
        self.recorded_min_timestep
    }

    pub fn recorded_max_timestep(&self) -> f64 {
        self.recorded_max_timestep
    }

    pub fn max_speed(&self) -> &[f64] {
        &self.max_speed
    }

    pub fn max_speed_mut(&mut self) -> &mut [f64] {
        &mut self.max_speed
    }

    pub fn already_computed_flux_mut(&mut self) -> &mut [[i32; 3]] {
        &mut self.already_computed_flux
    }

    //
    // Physics plug-ins
    //

    pub fn set_flux_kernel(&mut self, kernel: Box<dyn FluxKernel>) {
        self.flux_kernel = Some(kernel);
    }

    pub fn add_forcing_term(&mut self, term: Box<dyn ForcingTerm>) {
        self.forcing_terms.push(term);
    }

    /// Install the map filling the non-conserved tail of an evolved vector
    /// from a conserved one. Without it, conserved-length boundary vectors
    /// are only accepted when the two lists coincide.
    pub fn set_conserved_to_evolved<F>(&mut self, map: F)
    where
        F: Fn(&[f64], &mut [f64]) + 'static,
    {
        self.conserved_to_evolved = Some(Box::new(map));
    }

    /// Momentum-like quantities zeroed by the isolated-degenerate-timestep
    /// protection. Leaving this empty disables the heuristic.
    pub fn set_timestep_protection_quantities(&mut self, names: &[&str]) {
        self.protection_quantities = names.iter().map(|s| s.to_string()).collect();
    }

    //
    // Boundary binding
    //

    /// Associate boundary objects with tagged boundary edges. The first call
    /// stores the map; later calls merge by tag, so a tag can be re-bound
    /// between yields. Tags mapped to `None` are skipped. Every tag present
    /// on the mesh must be covered.
    ///
    /// The boundary-object list is rebuilt from scratch in ascending
    /// `(cell, edge)` order, and each bound edge's neighbour entry becomes
    /// the negative 1-based slot of its boundary object.
    pub fn set_boundary(
        &mut self,
        map: BTreeMap<String, Option<Rc<dyn Boundary>>>,
    ) -> Result<(), Error> {
        match &mut self.boundary_map {
            None => self.boundary_map = Some(map),
            Some(existing) => {
                for (tag, object) in map {
                    existing.insert(tag, object);
                }
            }
        }
        let boundary_map = self.boundary_map.as_ref().unwrap();

        let edges: Vec<((usize, usize), String)> = self
            .mesh
            .boundary()
            .iter()
            .map(|(&key, tag)| (key, tag.clone()))
            .collect();

        self.boundary_objects.clear();
        for ((cell, edge), tag) in edges {
            match boundary_map.get(&tag) {
                None => {
                    return Err(Error::UnboundBoundaryTag {
                        tag,
                        known: self.mesh.boundary_tags(),
                    });
                }
                Some(None) => {}
                Some(Some(object)) => {
                    self.boundary_objects.push(((cell, edge), Rc::clone(object)));
                    let slot = self.boundary_objects.len() as i64;
                    self.mesh.set_neighbour(cell, edge, -slot);
                }
            }
        }
        Ok(())
    }

    pub fn boundary_objects(&self) -> &[((usize, usize), Rc<dyn Boundary>)] {
        &self.boundary_objects
    }

    /// Refresh every quantity's boundary values from the bound boundary
    /// objects, in list order. Objects returning conserved-length vectors
    /// are completed to evolved length through the installed mapping.
    pub fn update_boundary(&mut self) -> Result<(), Error> {
        let objects = self.boundary_objects.clone();

        for (i, ((cell, edge), object)) in objects.into_iter().enumerate() {
            let q = object.evaluate(self, cell, edge);

            let q_evol = if q.len() == self.evolved_quantities.len() {
                q
            } else if q.len() == self.conserved_quantities.len() {
                let mut evol = self.evolved_values_at(cell, Some(edge));
                self.conserved_values_to_evolved_values(&q, &mut evol)?;
                evol
            } else {
                return Err(Error::BoundaryValueLength {
                    got: q.len(),
                    conserved: self.conserved_quantities.len(),
                    evolved: self.evolved_quantities.len(),
                });
            };

            for (name, &value) in self.evolved_quantities.iter().zip(q_evol.iter()) {
                self.quantities
                    .get_mut(name)
                    .expect("evolved quantities always have storage")
                    .set_boundary_value(i, value);
            }
        }
        Ok(())
    }

    fn conserved_values_to_evolved_values(
        &self,
        q_cons: &[f64],
        q_evol: &mut [f64],
    ) -> Result<(), Error> {
        match &self.conserved_to_evolved {
            Some(map) => {
                map(q_cons, q_evol);
                Ok(())
            }
            None if q_cons.len() == q_evol.len() => {
                q_evol.copy_from_slice(q_cons);
                Ok(())
            }
            None => Err(Error::MissingConservedToEvolvedMap {
                conserved: q_cons.len(),
                evolved: q_evol.len(),
            }),
        }
    }

    //
    // Ghost update
    //

    /// Local half of the ghost exchange: any cross-peer transport has
    /// already filled the receive buffers; here we only copy conserved
    /// centroid values this process sends to itself.
    pub fn update_ghosts(&mut self) {
        let pairs: Vec<(usize, usize)> = match self.ghosts.peer(self.processor) {
            Some(peer) => peer
                .full_ids
                .iter()
                .copied()
                .zip(peer.ghost_ids.iter().copied())
                .collect(),
            None => return,
        };

        for name in &self.conserved_quantities {
            let centroid = self
                .quantities
                .get_mut(name)
                .expect("conserved quantities always have storage")
                .centroid_values_mut();
            for &(full, ghost) in &pairs {
                centroid[ghost] = centroid[full];
            }
        }
    }

    pub fn ghosts(&self) -> &GhostExchange {
        &self.ghosts
    }

    pub fn ghosts_mut(&mut self) -> &mut GhostExchange {
        &mut self.ghosts
    }

    //
    // Per-sub-step operations
    //

    pub(crate) fn compute_fluxes(&mut self) -> Result<(), Error> {
        let kernel = self.flux_kernel.take().ok_or(Error::MissingFluxKernel)?;
        self.flux_timestep = kernel.compute_fluxes(self);
        self.flux_kernel = Some(kernel);
        Ok(())
    }

    pub(crate) fn compute_forcing_terms(&mut self) {
        let terms = std::mem::take(&mut self.forcing_terms);
        for term in &terms {
            term.apply(self);
        }
        self.forcing_terms = terms;
    }

    pub(crate) fn update_conserved_quantities(&mut self) -> Result<(), Error> {
        let timestep = self.timestep;
        for name in &self.conserved_quantities {
            self.quantities
                .get_mut(name)
                .expect("conserved quantities always have storage")
                .update(timestep)?;
        }
        Ok(())
    }

    pub(crate) fn backup_conserved_quantities(&mut self) {
        for name in &self.conserved_quantities {
            self.quantities
                .get_mut(name)
                .expect("conserved quantities always have storage")
                .backup_centroid_values();
        }
    }

    pub(crate) fn saxpy_conserved_quantities(&mut self, a: f64, b: f64) {
        for name in &self.conserved_quantities {
            self.quantities
                .get_mut(name)
                .expect("conserved quantities always have storage")
                .saxpy_centroid_values(a, b);
        }
    }

    /// Reconstruct per-vertex and per-edge values of the conserved
    /// quantities from their cell averages, at the active order.
    pub fn distribute_to_vertices_and_edges(&mut self) -> Result<(), Error> {
        let mesh = &self.mesh;
        for name in &self.conserved_quantities {
            let q = self
                .quantities
                .get_mut(name)
                .expect("conserved quantities always have storage");
            match self.order {
                1 => q.extrapolate_first_order(),
                2 => q.extrapolate_second_order(mesh),
                other => return Err(Error::UnknownReconstructionOrder(other)),
            }
        }
        Ok(())
    }

    /// Stability hack for the rare signature of a single near-degenerate
    /// triangle dragging the global timestep down: when the speed histogram
    /// has an empty gap below a populated top bin, the momentum-like
    /// quantities on the offending full triangles are zeroed, loudly.
    pub(crate) fn apply_protection_against_isolated_degenerate_timesteps(&mut self) {
        if !self.protect_against_isolated_degenerate_timesteps
            || self.protection_quantities.is_empty()
        {
            return;
        }

        let max = self.max_speed.iter().cloned().fold(f64::MIN, f64::max);
        if !(max >= 10.0) {
            return;
        }

        let bins = crate::diagnostics::create_bins(&self.max_speed, 10);
        let hist = crate::diagnostics::histogram(&self.max_speed, &bins);

        if hist.len() > 1
            && hist[hist.len() - 1] > 0
            && hist[4..9].iter().all(|&count| count == 0)
        {
            let threshold = bins[bins.len() - 1];
            let names = self.protection_quantities.clone();

            for i in 0..self.mesh.number_of_full_triangles() {
                if self.max_speed[i] > threshold {
                    log::warn!(
                        "time={}: ignoring isolated high speed triangle #{} of {} with max speed={}",
                        self.time,
                        i,
                        self.mesh.number_of_full_triangles(),
                        self.max_speed[i]
                    );
                    for name in &names {
                        if let Some(q) = self.quantities.get_mut(name) {
                            q.set_values(
                                &self.mesh,
                                Values::Constant(0.0),
                                Location::Centroids,
                                Some(&[i]),
                            );
                        }
                    }
                    self.max_speed[i] = 0.0;
                }
            }
        }
    }

    //
    // Extrema monitoring
    //

    /// Register quantities (or derived expressions) for extrema tracking.
    /// Expressions are validated by trial evaluation. A polygon restricts
    /// monitoring to cells whose centroid lies strictly inside it; a time
    /// interval restricts it to model times within the window. Passing no
    /// names switches monitoring off.
    pub fn set_quantities_to_be_monitored(
        &mut self,
        names: Option<&[&str]>,
        polygon: Option<&[Point]>,
        time_interval: Option<(f64, f64)>,
    ) -> Result<(), Error> {
        let names = match names {
            None => {
                self.monitor = None;
                return Ok(());
            }
            Some(names) => names,
        };

        let mut blocks = BTreeMap::new();
        for &name in names {
            if !self.quantities.contains_key(name) {
                // Not a plain quantity; require a valid derived expression.
                self.create_quantity_from_expression(name)?;
            }
            blocks.insert(name.to_string(), ExtremaBlock::default());
        }

        let indices = polygon.map(|polygon| {
            let centroids = self.mesh.centroid_coordinates(true);
            points_in_polygon(&centroids, polygon)
        });

        self.monitor = Some(Monitor {
            blocks,
            polygon: polygon.map(|p| p.to_vec()),
            time_interval,
            indices,
        });
        Ok(())
    }

    pub fn monitor(&self) -> Option<&Monitor> {
        self.monitor.as_ref()
    }

    /// Fold the current state into the registered extrema blocks, subject
    /// to the polygon and time-window restrictions.
    pub fn update_extrema(&mut self) -> Result<(), Error> {
        let mut monitor = match self.monitor.take() {
            Some(m) => m,
            None => return Ok(()),
        };
        let result = self.update_extrema_inner(&mut monitor);
        self.monitor = Some(monitor);
        result
    }

    fn update_extrema_inner(&self, monitor: &mut Monitor) -> Result<(), Error> {
        if !monitor.wants_time(self.time) {
            return Ok(());
        }

        let centroids = self.mesh.centroid_coordinates(true);
        let indices = monitor.indices.as_deref();

        for (name, block) in monitor.blocks.iter_mut() {
            let derived;
            let q = match self.quantities.get(name) {
                Some(q) => q,
                None => {
                    derived = self.create_quantity_from_expression(name)?;
                    &derived
                }
            };

            if let Some((cell, value)) = q.maximum(indices) {
                block.consider_max(value, centroids[cell], self.time, SINGLE_PRECISION_EPSILON);
            }
            if let Some((cell, value)) = q.minimum(indices) {
                block.consider_min(value, centroids[cell], self.time, SINGLE_PRECISION_EPSILON);
            }
        }
        Ok(())
    }

    //
    // Regions
    //

    /// Apply a function to every tagged cell group, in tag order.
    pub fn set_region<F>(&mut self, mut function: F) -> Result<(), Error>
    where
        F: FnMut(&str, &[usize], &mut Domain) -> Result<(), Error>,
    {
        let groups: Vec<(String, Vec<usize>)> = self
            .mesh
            .tagged_elements()
            .iter()
            .map(|(tag, cells)| (tag.clone(), cells.clone()))
            .collect();

        for (tag, cells) in groups {
            function(&tag, &cells, self)?;
        }
        Ok(())
    }

    /// Assign values to a quantity over one tagged cell group.
    pub fn set_region_quantity(
        &mut self,
        tag: &str,
        name: &str,
        values: Values,
        location: Location,
    ) -> Result<(), Error> {
        let cells = self
            .mesh
            .tagged_elements()
            .get(tag)
            .cloned()
            .unwrap_or_default();
        self.set_quantity(name, values, location, Some(&cells))
    }

    /// Norm of a quantity's centroid vector under the supplied norm.
    pub fn centroid_norm<F>(&self, name: &str, normfunc: F) -> Result<f64, Error>
    where
        F: Fn(&[f64]) -> f64,
    {
        Ok(normfunc(self.get_quantity(name)?.centroid_values()))
    }

    //
    // Checkpointing hooks
    //

    pub fn enable_checkpointing(&mut self, flag: bool) {
        self.checkpointing = flag;
    }

    pub fn last_checkpoint(&self) -> Option<&CheckpointState> {
        self.last_checkpoint.as_ref()
    }
}

#[cfg(test)]
mod test {
    use super::{Domain, DomainOptions};
    use crate::error::Error;
    use crate::geometry::Point;
    use crate::ghost::PeerDescriptor;
    use crate::mesh::{Mesh, MeshOptions};
    use crate::quantity::{Location, Values};
    use std::collections::BTreeMap;

    fn unit_square_mesh() -> Mesh {
        let points = vec![
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(0.0, 1.0),
        ];
        Mesh::new(points, vec![[0, 1, 2], [0, 2, 3]], MeshOptions::default()).unwrap()
    }

    fn shallow_water_domain() -> Domain {
        Domain::new(
            unit_square_mesh(),
            &["stage", "xmomentum", "ymomentum"],
            DomainOptions {
                other: vec!["elevation".to_string()],
                ..DomainOptions::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn registry_has_one_field_per_name() {
        let domain = shallow_water_domain();

        assert_eq!(
            domain.get_quantity_names(),
            vec!["stage", "xmomentum", "ymomentum", "elevation"]
        );
        for name in domain.get_quantity_names() {
            assert_eq!(domain.get_quantity(&name).unwrap().num_cells(), 2);
        }
        assert!(matches!(
            domain.get_quantity("height").err(),
            Some(Error::UnknownQuantity { .. })
        ));
    }

    #[test]
    fn parameter_setters_validate() {
        let mut domain = shallow_water_domain();

        assert!(domain.set_default_order(3).is_err());
        assert!(domain.set_default_order(2).is_ok());
        assert!(domain.set_cfl(0.0).is_err());
        assert!(domain.set_cfl(-1.0).is_err());
        assert!(domain.set_cfl(0.9).is_ok());
    }

    #[test]
    fn expression_assignment_and_addition() {
        let mut domain = shallow_water_domain();
        domain
            .set_quantity("stage", Values::Constant(3.0), Location::Vertices, None)
            .unwrap();
        domain
            .set_quantity("elevation", Values::Constant(1.0), Location::Vertices, None)
            .unwrap();

        // xmomentum <- stage - elevation
        domain
            .set_quantity_from_expression("xmomentum", "stage - elevation")
            .unwrap();
        assert_eq!(
            domain.get_quantity("xmomentum").unwrap().centroid_values(),
            &[2.0, 2.0]
        );

        domain
            .add_quantity("xmomentum", Values::Constant(0.5), Location::Vertices)
            .unwrap();
        assert_eq!(
            domain.get_quantity("xmomentum").unwrap().centroid_values(),
            &[2.5, 2.5]
        );

        let depth = domain
            .create_quantity_from_expression("stage - elevation")
            .unwrap();
        assert_eq!(depth.centroid_values(), &[2.0, 2.0]);
        // The source quantities were not disturbed.
        assert_eq!(
            domain.get_quantity("stage").unwrap().centroid_values(),
            &[3.0, 3.0]
        );
    }

    #[test]
    fn ghost_flags_and_local_scatter() {
        let mut ghosts = BTreeMap::new();
        // This process sends cell 0 to itself and mirrors it into cell 1.
        ghosts.insert(
            0,
            PeerDescriptor {
                full_ids: vec![0],
                ghost_ids: vec![1],
            },
        );

        let mut domain = Domain::new(
            unit_square_mesh(),
            &["stage"],
            DomainOptions {
                ghosts,
                ..DomainOptions::default()
            },
        )
        .unwrap();

        assert_eq!(domain.tri_full_flag(), &[1, 0]);
        assert_eq!(domain.mesh().number_of_full_triangles(), 1);

        domain
            .set_quantity("stage", Values::Cells(&[7.0, 0.0]), Location::Centroids, None)
            .unwrap();
        domain.update_ghosts();
        assert_eq!(
            domain.get_quantity("stage").unwrap().centroid_values(),
            &[7.0, 7.0]
        );
    }

    #[test]
    fn region_assignment_uses_tagged_elements() {
        let mut tagged = BTreeMap::new();
        tagged.insert("reservoir".to_string(), vec![1usize]);
        let points = vec![
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(0.0, 1.0),
        ];
        let mesh = Mesh::new(
            points,
            vec![[0, 1, 2], [0, 2, 3]],
            MeshOptions {
                tagged_elements: tagged,
                ..MeshOptions::default()
            },
        )
        .unwrap();

        let mut domain = Domain::new(mesh, &["stage"], DomainOptions::default()).unwrap();
        domain
            .set_region_quantity("reservoir", "stage", Values::Constant(4.0), Location::Centroids)
            .unwrap();

        assert_eq!(
            domain.get_quantity("stage").unwrap().centroid_values(),
            &[0.0, 4.0]
        );

        let mut seen = Vec::new();
        domain
            .set_region(|tag, cells, _domain| {
                seen.push((tag.to_string(), cells.to_vec()));
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![("reservoir".to_string(), vec![1])]);
    }

    #[test]
    fn centroid_norm_applies_the_supplied_norm() {
        let mut domain = shallow_water_domain();
        domain
            .set_quantity("stage", Values::Cells(&[3.0, 4.0]), Location::Centroids, None)
            .unwrap();

        let l2 = domain
            .centroid_norm("stage", |v| v.iter().map(|x| x * x).sum::<f64>().sqrt())
            .unwrap();
        assert!((l2 - 5.0).abs() < 1e-12);
    }

    #[test]
    fn degenerate_timestep_protection_zeroes_momenta() {
        let mut domain = shallow_water_domain();
        domain.protect_against_isolated_degenerate_timesteps = true;
        domain.set_timestep_protection_quantities(&["xmomentum", "ymomentum"]);
        domain
            .set_quantity("xmomentum", Values::Constant(2.0), Location::Vertices, None)
            .unwrap();

        // Cell 1 is an isolated outlier far above cell 0.
        domain.max_speed_mut().copy_from_slice(&[1.0, 100.0]);
        domain.apply_protection_against_isolated_degenerate_timesteps();

        assert_eq!(domain.max_speed()[1], 0.0);
        assert_eq!(
            domain.get_quantity("xmomentum").unwrap().centroid_values()[1],
            0.0
        );
        // The quiet cell keeps its momentum.
        assert_eq!(
            domain.get_quantity("xmomentum").unwrap().centroid_values()[0],
            2.0
        );
    }

    #[test]
    fn protection_is_a_noop_without_quantities_or_signature() {
        let mut domain = shallow_water_domain();
        domain.protect_against_isolated_degenerate_timesteps = true;
        domain
            .set_quantity("xmomentum", Values::Constant(2.0), Location::Vertices, None)
            .unwrap();

        // No protection quantities registered: nothing happens.
        domain.max_speed_mut().copy_from_slice(&[1.0, 100.0]);
        domain.apply_protection_against_isolated_degenerate_timesteps();
        assert_eq!(domain.max_speed()[1], 100.0);

        // Speeds below the absolute threshold: nothing happens either.
        domain.set_timestep_protection_quantities(&["xmomentum"]);
        domain.max_speed_mut().copy_from_slice(&[0.001, 5.0]);
        domain.apply_protection_against_isolated_degenerate_timesteps();
        assert_eq!(domain.max_speed()[1], 5.0);
    }
}
