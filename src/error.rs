use thiserror::Error;

/// Everything that can go wrong while configuring or evolving a domain.
///
/// Configuration and contract violations abort immediately. Numerical
/// stability failures abort the evolve loop after the timestepping statistics
/// have been dumped to the log. Recoverable conditions (CFL above one, ghost
/// flag inconsistencies, unbound `None` boundaries at step time) are logged
/// as warnings and never surface here.
#[derive(Error, Debug)]
pub enum Error {
    #[error("conserved quantities must be the first entries of the evolved quantities; conserved = {conserved:?}, evolved = {evolved:?}")]
    ConservedNotPrefixOfEvolved {
        conserved: Vec<String>,
        evolved: Vec<String>,
    },

    #[error("default order must be either 1 or 2, got {0}")]
    InvalidOrder(u32),

    #[error("{0:?} is not a timestepping method; expected euler, rk2 or rk3 (or selectors 1, 2, 3)")]
    InvalidTimesteppingMethod(String),

    #[error("CFL number must be positive, got {0}")]
    InvalidCfl(f64),

    #[error("no quantity named {name:?}; known quantities are {known:?}")]
    UnknownQuantity { name: String, known: Vec<String> },

    #[error("tag {tag:?} has not been bound to a boundary object; every tag on the mesh must appear in set_boundary; the tags are {known:?}")]
    UnboundBoundaryTag { tag: String, known: Vec<String> },

    #[error("boundary tags must be bound to boundary objects before evolving, e.g. with set_boundary; this mesh has the boundary tags {tags:?}")]
    BoundaryNotBound { tags: Vec<String> },

    #[error("values for both vertex and edge were specified; only one (or none) is allowed")]
    BothVertexAndEdge,

    #[error("only one of finaltime and duration may be specified")]
    BothFinaltimeAndDuration,

    #[error("could not parse expression {expression:?}: {reason}")]
    ExpressionParse { expression: String, reason: String },

    #[error("boundary object returned {got} values; must return either {conserved} (conserved) or {evolved} (evolved) values")]
    BoundaryValueLength {
        got: usize,
        conserved: usize,
        evolved: usize,
    },

    #[error("conserved-to-evolved mapping must be supplied when the evolved quantities ({evolved}) outnumber the conserved ones ({conserved})")]
    MissingConservedToEvolvedMap { conserved: usize, evolved: usize },

    #[error("unknown reconstruction order {0}")]
    UnknownReconstructionOrder(u32),

    #[error("a flux kernel must be supplied before evolving; use set_flux_kernel")]
    MissingFluxKernel,

    #[error("timestep {timestep:.16} stayed below the minimum even after {max_smallsteps} steps of the first order scheme")]
    TimestepBelowMinimum {
        timestep: f64,
        max_smallsteps: u32,
    },

    #[error("model time {time} overshot finaltime {finaltime}")]
    FinaltimeOvershoot { time: f64, finaltime: f64 },

    #[error("semi-implicit update diverged at cell {cell}: denominator {denominator} is not positive")]
    SemiImplicitBreakdown { cell: usize, denominator: f64 },

    #[error("triangle {id} does not exist in a mesh of {len} triangles")]
    NoSuchTriangle { id: usize, len: usize },

    #[error("mesh integrity violated: {0}")]
    MeshIntegrity(String),
}
