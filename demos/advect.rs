//! Transport of a passive tracer around a small fan mesh, reported at
//! regular yield steps.

use std::collections::BTreeMap;
use std::rc::Rc;

use triflow::boundary::{Boundary, Dirichlet};
use triflow::config::TimesteppingMethod;
use triflow::domain::{Domain, DomainOptions};
use triflow::evolve::{EvolveOptions, Step};
use triflow::forcing::FluxKernel;
use triflow::geometry::Point;
use triflow::mesh::{Mesh, MeshOptions};
use triflow::quantity::{Location, Values};

/// First-order upwind transport around the ring of fan cells.
struct RingTransport {
    speed: f64,
}

impl FluxKernel for RingTransport {
    fn compute_fluxes(&self, domain: &mut Domain) -> f64 {
        let n = domain.number_of_triangles();
        let mesh = domain.mesh();
        let tracer = domain.get_quantity("tracer").unwrap();

        let mut update = vec![0.0; n];
        let mut min_timestep = f64::INFINITY;

        for cell in 0..n {
            min_timestep = min_timestep.min(mesh.radius(cell) / self.speed);

            let donor = tracer.centroid_values()[cell];
            let next = (cell + 1) % n;
            let flux = self.speed * mesh.edgelength(cell, 0) * donor;

            update[cell] -= flux / mesh.area(cell);
            update[next] += flux / mesh.area(next);
        }

        for speed in domain.max_speed_mut() {
            *speed = self.speed;
        }
        domain
            .get_quantity_mut("tracer")
            .unwrap()
            .explicit_update_mut()
            .copy_from_slice(&update);

        0.5 * min_timestep
    }
}

fn fan_mesh() -> Mesh {
    let points = vec![
        Point::new(0.0, 0.0),
        Point::new(1.0, 0.0),
        Point::new(1.0, 1.0),
        Point::new(0.0, 1.0),
        Point::new(0.5, 0.5),
    ];
    let triangles = vec![[0, 1, 4], [1, 2, 4], [2, 3, 4], [3, 0, 4]];
    Mesh::new(points, triangles, MeshOptions::default()).unwrap()
}

fn main() {
    simple_logger::SimpleLogger::new().init().unwrap();

    let mut domain = Domain::new(fan_mesh(), &["tracer"], DomainOptions::default()).unwrap();
    domain.set_timestepping_method(TimesteppingMethod::Rk2);
    domain
        .set_quantity(
            "tracer",
            Values::Cells(&[1.0, 0.0, 0.0, 0.0]),
            Location::Centroids,
            None,
        )
        .unwrap();
    domain
        .set_quantities_to_be_monitored(Some(&["tracer"]), None, None)
        .unwrap();

    let mut map: BTreeMap<String, Option<Rc<dyn Boundary>>> = BTreeMap::new();
    map.insert("exterior".to_string(), Some(Rc::new(Dirichlet::new(vec![0.0]))));
    domain.set_boundary(map).unwrap();

    domain.set_flux_kernel(Box::new(RingTransport { speed: 1.0 }));

    let mut evolution = domain
        .evolve(EvolveOptions {
            yieldstep: Some(0.25),
            finaltime: Some(2.0),
            ..EvolveOptions::default()
        })
        .unwrap();

    loop {
        let step = evolution.step(&mut domain).unwrap();
        domain.write_time(false).unwrap();

        if let Step::Done(_) = step {
            break;
        }
    }

    print!("{}", domain.quantity_statistics(4));
}
