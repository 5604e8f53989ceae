use thiserror::Error;

/// The top-level error type for the simulator.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed input in {path}: {detail}")]
    Input { path: String, detail: String },

    #[error("agent {agent} found no plannable task at timestep {timestep}")]
    PlanFailure { agent: usize, timestep: usize },

    #[error("horizon {horizon} exhausted at timestep {timestep} with tasks pending")]
    HorizonExhausted { horizon: usize, timestep: usize },

    #[error("agents {agent_1} and {agent_2} collide at cell {cell} at timestep {timestep}")]
    ConstraintViolation {
        agent_1: usize,
        agent_2: usize,
        cell: usize,
        timestep: usize,
    },
}

pub type SimResult<T> = Result<T, SimError>;
