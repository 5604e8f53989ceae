/// Index into the row-major bordered grid.
pub type Cell = usize;

/// A sequence of cells, one per timestep.
pub type Path = Vec<Cell>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    /// May carry tasks.
    Workpoint,
    /// An agent's initial cell; never carries a task.
    Home,
}

/// A distinguished grid cell where tasks originate or terminate, or where an
/// agent rests. Owns its shortest-distance table over the passable sub-grid.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub id: usize,
    pub loc: Cell,
    pub kind: EndpointKind,
    /// `dist[c]` is the true shortest-path distance from `c` to `loc`,
    /// `UNREACHABLE` for cells with no passable route.
    pub dist: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agent {
    pub id: usize,
    pub loc: Cell,
    /// First future timestep at which the agent is idle and may be planned.
    pub finish_time: usize,
    /// Task picked up but not yet delivered (TPTR only). The delivery
    /// segment stays committed in the token while this is set.
    pub carrying: Option<usize>,
}

impl Agent {
    pub fn new(id: usize, loc: Cell) -> Self {
        Agent {
            id,
            loc,
            finish_time: 0,
            carrying: None,
        }
    }
}
