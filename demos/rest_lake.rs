//! A lake at rest: constant stage, zero momenta, a flux kernel with nothing
//! to do. The state must come out of the evolve loop exactly as it went in.

use std::collections::BTreeMap;
use std::rc::Rc;

use triflow::boundary::{Boundary, Transmissive};
use triflow::domain::{Domain, DomainOptions};
use triflow::evolve::{EvolveOptions, Step};
use triflow::forcing::FluxKernel;
use triflow::geometry::Point;
use triflow::mesh::{Mesh, MeshOptions};
use triflow::quantity::{Location, Values};

struct NoFlow;

impl FluxKernel for NoFlow {
    fn compute_fluxes(&self, domain: &mut Domain) -> f64 {
        for name in domain.conserved_quantities().to_vec() {
            domain
                .get_quantity_mut(&name)
                .unwrap()
                .explicit_update_mut()
                .iter_mut()
                .for_each(|u| *u = 0.0);
        }
        domain.get_evolve_max_timestep()
    }
}

fn main() {
    simple_logger::SimpleLogger::new().init().unwrap();

    let points = vec![
        Point::new(0.0, 0.0),
        Point::new(10.0, 0.0),
        Point::new(10.0, 10.0),
        Point::new(0.0, 10.0),
    ];
    let mesh = Mesh::new(points, vec![[0, 1, 2], [0, 2, 3]], MeshOptions::default()).unwrap();

    let mut domain = Domain::new(
        mesh,
        &["stage", "xmomentum", "ymomentum"],
        DomainOptions::default(),
    )
    .unwrap();

    domain
        .set_quantity("stage", Values::Constant(10.0), Location::Vertices, None)
        .unwrap();

    let mut map: BTreeMap<String, Option<Rc<dyn Boundary>>> = BTreeMap::new();
    map.insert("exterior".to_string(), Some(Rc::new(Transmissive)));
    domain.set_boundary(map).unwrap();

    domain.set_flux_kernel(Box::new(NoFlow));

    let mut evolution = domain
        .evolve(EvolveOptions {
            yieldstep: Some(1.0),
            finaltime: Some(5.0),
            ..EvolveOptions::default()
        })
        .unwrap();

    loop {
        match evolution.step(&mut domain).unwrap() {
            Step::Yielded(t) => println!("t = {:.4}", t),
            Step::Done(t) => {
                println!("t = {:.4} (done)", t);
                break;
            }
        }
    }

    println!(
        "stage centroid values: {:?}",
        domain.get_quantity("stage").unwrap().centroid_values()
    );
    print!("{}", domain.boundary_statistics(None, None).unwrap());
}
