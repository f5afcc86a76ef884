use crate::config::TimesteppingMethod;
use crate::domain::Domain;
use crate::error::Error;

/// Arguments to [`Domain::evolve`]. At most one of `finaltime` and
/// `duration` may be given; without either, the evolution runs until the
/// caller stops stepping it.
#[derive(Clone, Copy, Default)]
pub struct EvolveOptions {
    /// Interval between yields. Defaults to the maximum timestep.
    pub yieldstep: Option<f64>,

    /// Absolute time where the evolution ends.
    pub finaltime: Option<f64>,

    /// Alternative to `finaltime`: run for this long past the start time.
    pub duration: Option<f64>,

    /// Suppress the yield of the initial state, e.g. when dovetailing
    /// several evolve calls.
    pub skip_initial_step: bool,
}

/// One sample of the evolution's lazy time sequence.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Step {
    /// The model reached a yield point; the domain is coherent and may be
    /// inspected or modified before stepping again.
    Yielded(f64),

    /// The model reached the final time. Further calls keep returning this.
    Done(f64),
}

/// The pull-style evolution controller. Obtain one from [`Domain::evolve`],
/// then call [`Evolution::step`] in a loop; between calls the domain is in a
/// coherent state (ghosts exchanged, vertex and edge values reconstructed,
/// boundary values refreshed, extrema folded in) and may be freely
/// inspected or mutated. Dropping the controller cancels the evolution.
pub struct Evolution {
    yieldstep: f64,
    finaltime: Option<f64>,
    initial_pending: bool,
    pending_yield_reset: bool,
    finished: bool,
}

impl Domain {
    /// Begin evolving the model from the current time. Boundary tags must
    /// have been bound first. The initial state is brought up to coherence
    /// here, so the first [`Evolution::step`] yields immediately (unless
    /// `skip_initial_step` is set).
    pub fn evolve(&mut self, options: EvolveOptions) -> Result<Evolution, Error> {
        if self.boundary_map.is_none() {
            return Err(Error::BoundaryNotBound {
                tags: self.mesh.boundary_tags(),
            });
        }
        if options.finaltime.is_some() && options.duration.is_some() {
            return Err(Error::BothFinaltimeAndDuration);
        }

        let yieldstep = options.yieldstep.unwrap_or(self.evolve_max_timestep);
        let finaltime = options
            .finaltime
            .or_else(|| options.duration.map(|d| self.starttime + d));

        self.order = self.default_order;
        self.finaltime = finaltime;
        self.yieldtime = self.time + yieldstep;
        self.recorded_min_timestep = self.evolve_max_timestep;
        self.recorded_max_timestep = self.evolve_min_timestep;
        self.number_of_steps = 0;
        self.number_of_first_order_steps = 0;

        self.update_ghosts();
        self.distribute_to_vertices_and_edges()?;
        self.update_extrema()?;
        self.update_boundary()?;

        if self.checkpointing {
            if let Some(checkpoint) = self.last_checkpoint.clone() {
                self.restore(&checkpoint);
            }
        }

        Ok(Evolution {
            yieldstep,
            finaltime,
            initial_pending: !options.skip_initial_step,
            pending_yield_reset: false,
            finished: false,
        })
    }

    /// Drain the evolution all the way to `finaltime` and return it.
    pub fn evolve_to_end(&mut self, finaltime: f64) -> Result<f64, Error> {
        let mut evolution = self.evolve(EvolveOptions {
            finaltime: Some(finaltime),
            ..EvolveOptions::default()
        })?;
        loop {
            if let Step::Done(t) = evolution.step(self)? {
                return Ok(t);
            }
        }
    }
}

impl Evolution {
    /// Advance the domain to its next yield point and return the model time
    /// there. Sub-steps of a scheme never yield; whatever state the caller
    /// sees here is the consistent end-of-step state.
    pub fn step(&mut self, domain: &mut Domain) -> Result<Step, Error> {
        if self.initial_pending {
            self.initial_pending = false;
            return Ok(Step::Yielded(domain.time));
        }
        if self.finished {
            return Ok(Step::Done(domain.time));
        }
        if self.pending_yield_reset {
            // The caller has seen the statistics for the last reporting
            // interval; start the next one.
            self.pending_yield_reset = false;
            domain.yieldtime += self.yieldstep;
            domain.recorded_min_timestep = domain.evolve_max_timestep;
            domain.recorded_max_timestep = domain.evolve_min_timestep;
            domain.number_of_steps = 0;
            domain.number_of_first_order_steps = 0;
            domain.max_speed.iter_mut().for_each(|s| *s = 0.0);
        }

        loop {
            match domain.timestepping_method {
                TimesteppingMethod::Euler => domain.evolve_one_euler_step(self.finaltime)?,
                TimesteppingMethod::Rk2 => domain.evolve_one_rk2_step(self.finaltime)?,
                TimesteppingMethod::Rk3 => domain.evolve_one_rk3_step(self.finaltime)?,
            }

            domain.update_extrema()?;
            domain.number_of_steps += 1;
            if domain.order == 1 {
                domain.number_of_first_order_steps += 1;
            }

            if let Some(finaltime) = self.finaltime {
                if domain.time >= finaltime - domain.epsilon {
                    if domain.time > finaltime + domain.epsilon {
                        return Err(Error::FinaltimeOvershoot {
                            time: domain.time,
                            finaltime,
                        });
                    }
                    domain.time = finaltime;
                    self.finished = true;
                    return Ok(Step::Done(finaltime));
                }
            }

            if domain.time >= domain.yieldtime {
                if domain.checkpointing {
                    domain.last_checkpoint = Some(domain.snapshot());
                }
                self.pending_yield_reset = true;
                return Ok(Step::Yielded(domain.time));
            }
        }
    }
}

impl Domain {
    /// One forward Euler step, `Q^{n+1} = E(dt) Q^n`. Assumes vertex and
    /// edge values have been reconstructed; re-establishes that on exit.
    fn evolve_one_euler_step(&mut self, finaltime: Option<f64>) -> Result<(), Error> {
        self.compute_fluxes()?;
        self.compute_forcing_terms();
        self.update_timestep(finaltime)?;
        self.update_conserved_quantities()?;
        self.update_ghosts();
        self.time += self.timestep;
        self.distribute_to_vertices_and_edges()?;
        self.update_boundary()?;
        Ok(())
    }

    /// One SSP RK2 step, `Q^{n+1} = 1/2 Q^n + 1/2 E(dt)^2 Q^n`.
    ///
    /// The second Euler sub-step reuses the timestep chosen in the first
    /// one. In principle the CFL condition could tighten in between; in
    /// practice the SSP combination has not been observed to go unstable.
    fn evolve_one_rk2_step(&mut self, finaltime: Option<f64>) -> Result<(), Error> {
        self.backup_conserved_quantities();

        // First sub-step, with timestep selection.
        self.compute_fluxes()?;
        self.compute_forcing_terms();
        self.update_timestep(finaltime)?;
        self.update_conserved_quantities()?;
        self.update_ghosts();
        self.time += self.timestep;
        self.distribute_to_vertices_and_edges()?;
        self.update_boundary()?;

        // Second sub-step at the same timestep.
        self.compute_fluxes()?;
        self.compute_forcing_terms();
        self.update_conserved_quantities()?;

        // Convex combination with the saved state, then refresh.
        self.saxpy_conserved_quantities(0.5, 0.5);
        self.update_ghosts();
        self.distribute_to_vertices_and_edges()?;
        self.update_boundary()?;
        Ok(())
    }

    /// One SSP RK3 (Shu-Osher) step:
    /// `Q^(1) = 3/4 Q^n + 1/4 E(dt)^2 Q^n` at `t^n + dt/2`, then
    /// `Q^{n+1} = 1/3 Q^n + 2/3 E(dt) Q^(1)` at `t^{n+1}`.
    ///
    /// As with RK2, later sub-steps reuse the first sub-step's timestep.
    fn evolve_one_rk3_step(&mut self, finaltime: Option<f64>) -> Result<(), Error> {
        self.backup_conserved_quantities();
        let initial_time = self.time;

        // First sub-step, with timestep selection.
        self.compute_fluxes()?;
        self.compute_forcing_terms();
        self.update_timestep(finaltime)?;
        self.update_conserved_quantities()?;
        self.update_ghosts();
        self.time += self.timestep;
        self.distribute_to_vertices_and_edges()?;
        self.update_boundary()?;

        // Second sub-step at the same timestep.
        self.compute_fluxes()?;
        self.compute_forcing_terms();
        self.update_conserved_quantities()?;

        // Intermediate solution at t^n + dt/2.
        self.saxpy_conserved_quantities(0.25, 0.75);
        self.update_ghosts();
        self.time = initial_time + 0.5 * self.timestep;
        self.distribute_to_vertices_and_edges()?;
        self.update_boundary()?;

        // Third sub-step.
        self.compute_fluxes()?;
        self.compute_forcing_terms();
        self.update_conserved_quantities()?;

        self.saxpy_conserved_quantities(2.0 / 3.0, 1.0 / 3.0);
        self.update_ghosts();
        self.time = initial_time + self.timestep;
        self.distribute_to_vertices_and_edges()?;
        self.update_boundary()?;
        Ok(())
    }

    /// Choose the timestep for the step about to be taken: CFL times the
    /// flux timestep, capped by the maximum, guarded against persistent
    /// degenerate steps, and clamped so neither the final time nor the next
    /// yield time is overshot.
    pub(crate) fn update_timestep(&mut self, finaltime: Option<f64>) -> Result<(), Error> {
        self.apply_protection_against_isolated_degenerate_timesteps();

        let mut timestep = (self.cfl * self.flux_timestep).min(self.evolve_max_timestep);

        self.recorded_max_timestep = timestep.max(self.recorded_max_timestep);
        self.recorded_min_timestep = timestep.min(self.recorded_min_timestep);

        if timestep < self.evolve_min_timestep {
            self.smallsteps += 1;

            if self.smallsteps > self.max_smallsteps {
                self.smallsteps = 0;

                if self.order == 1 {
                    log::error!(
                        "too small timestep {:.16} reached even after {} steps of first order scheme",
                        timestep,
                        self.max_smallsteps
                    );
                    self.timestep = self.evolve_min_timestep;
                    if let Ok(stats) = self.timestepping_statistics(true, None) {
                        log::error!("{}", stats);
                    }
                    return Err(Error::TimestepBelowMinimum {
                        timestep,
                        max_smallsteps: self.max_smallsteps,
                    });
                } else {
                    // Try to ride out the situation at first order.
                    self.order = 1;
                }
            }
        } else {
            self.smallsteps = 0;
            if self.order == 1 && self.default_order == 2 {
                self.order = 2;
            }
        }

        if let Some(finaltime) = finaltime {
            if self.time + timestep > finaltime {
                timestep = finaltime - self.time;
            }
        }
        if self.time + timestep > self.yieldtime {
            timestep = self.yieldtime - self.time;
        }

        self.timestep = timestep;
        Ok(())
    }
}
