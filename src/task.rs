use std::fs::File;
use std::io::{BufRead, BufReader};

use crate::error::{SimError, SimResult};
use crate::map::Map;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Free,
    Taken {
        agent: usize,
        /// Timestep the assigned agent reaches the pickup endpoint.
        arrive_start: usize,
        /// Timestep the assigned agent reaches the delivery endpoint.
        arrive_goal: usize,
    },
}

/// A pickup-and-delivery request between two endpoints.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: usize,
    /// Pickup endpoint index.
    pub start: usize,
    /// Delivery endpoint index.
    pub goal: usize,
    /// Timestep the task first becomes visible to the planner.
    pub release_time: usize,
    /// Reporting metadata from the task file, passed through unchanged.
    pub appear_start: usize,
    pub appear_goal: usize,
    pub state: TaskState,
}

/// Load the task stream: a count line, then one task per line as
/// `release_time start_ep goal_ep appear_start appear_goal`. Each line is
/// parsed with fresh state.
pub fn load_tasks(path: &str, map: &Map) -> SimResult<Vec<Task>> {
    let file = File::open(path).map_err(|source| SimError::Io {
        path: path.to_string(),
        source,
    })?;
    let reader = BufReader::new(file);
    let input = |detail: String| SimError::Input {
        path: path.to_string(),
        detail,
    };

    let mut lines = reader.lines();
    let count_line = match lines.next() {
        Some(Ok(line)) => line,
        Some(Err(source)) => {
            return Err(SimError::Io {
                path: path.to_string(),
                source,
            })
        }
        None => return Err(input("empty task file".to_string())),
    };
    let count: usize = count_line
        .split_whitespace()
        .next()
        .and_then(|f| f.parse().ok())
        .ok_or_else(|| input(format!("bad task count line {count_line:?}")))?;

    let mut tasks = Vec::with_capacity(count);
    for id in 0..count {
        let line = match lines.next() {
            Some(Ok(line)) => line,
            Some(Err(source)) => {
                return Err(SimError::Io {
                    path: path.to_string(),
                    source,
                })
            }
            None => return Err(input(format!("expected {count} tasks, found {id}"))),
        };
        let fields: Vec<usize> = line
            .split_whitespace()
            .map(|f| f.parse())
            .collect::<Result<_, _>>()
            .map_err(|_| input(format!("bad task line {line:?}")))?;
        let [release_time, start, goal, appear_start, appear_goal] = fields[..] else {
            return Err(input(format!(
                "task line {line:?} has {} fields, expected 5",
                fields.len()
            )));
        };

        if start >= map.endpoints.len() || goal >= map.endpoints.len() {
            return Err(input(format!(
                "task {id} references endpoint out of range (have {})",
                map.endpoints.len()
            )));
        }
        if release_time >= map.horizon {
            return Err(input(format!(
                "task {id} released at {release_time}, beyond horizon {}",
                map.horizon
            )));
        }

        tasks.push(Task {
            id,
            start,
            goal,
            release_time,
            appear_start,
            appear_goal,
            state: TaskState::Free,
        });
    }

    Ok(tasks)
}
