use tracing::error;

use crate::common::{Cell, Path};
use crate::error::{SimError, SimResult};
use crate::map::{action_offsets, Map};
use crate::task::{Task, TaskState};

/// The shared planning state: the global clock, the open task list, and
/// every agent's complete future trajectory. The dispatcher is the sole
/// mutator of the clock and the task list; path rows are rewritten only by
/// the planner acting for their agent.
#[derive(Debug, Clone)]
pub struct Token {
    pub timestep: usize,
    pub horizon: usize,
    /// `paths[a][t]` is agent `a`'s cell at timestep `t`, for all `t` in
    /// `[0, horizon)`.
    pub paths: Vec<Path>,
    /// Published, unfinished task ids in publication order.
    pub open: Vec<usize>,
}

impl Token {
    pub fn new(horizon: usize, homes: &[Cell]) -> Self {
        Token {
            timestep: 0,
            horizon,
            paths: homes.iter().map(|&loc| vec![loc; horizon]).collect(),
            open: Vec::new(),
        }
    }

    /// Append every task with `release_time` in `(after, up_to]` to the open
    /// list, in release order then file order.
    pub fn publish_tasks(&mut self, releases: &[Vec<usize>], after: usize, up_to: usize) {
        for t in after + 1..=up_to.min(releases.len().saturating_sub(1)) {
            self.open.extend_from_slice(&releases[t]);
        }
    }

    /// Drop every taken task whose pickup time has been reached (TPTR only).
    pub fn expire_tasks(&mut self, tasks: &[Task]) {
        let now = self.timestep;
        self.open.retain(|&id| {
            !matches!(tasks[id].state,
                TaskState::Taken { arrive_start, .. } if arrive_start <= now)
        });
    }

    /// Read-only view of all other agents' committed paths.
    pub fn constraints_for(&self, agent: usize) -> Vec<&[Cell]> {
        self.paths
            .iter()
            .enumerate()
            .filter(|&(id, _)| id != agent)
            .map(|(_, path)| path.as_slice())
            .collect()
    }

    /// Overwrite `paths[agent][start_time + i]` with `cells[i]`.
    pub fn write_path(&mut self, agent: usize, start_time: usize, cells: &[Cell]) {
        self.paths[agent][start_time..start_time + cells.len()].copy_from_slice(cells);
    }

    /// Pin the agent to its cell at `t` for the rest of the horizon.
    pub fn hold_from(&mut self, agent: usize, t: usize) {
        let cell = self.paths[agent][t];
        self.paths[agent][t + 1..].fill(cell);
    }

    /// Debug self-test: scan the whole path table for vertex and edge
    /// collisions, off-grid cells, and non-local moves.
    pub fn verify(&self, map: &Map) -> SimResult<()> {
        for (agent, path) in self.paths.iter().enumerate() {
            for t in 0..self.horizon {
                if !map.is_passable(path[t]) {
                    error!("agent {agent} stands on blocked cell {} at {t}", path[t]);
                    return Err(SimError::ConstraintViolation {
                        agent_1: agent,
                        agent_2: agent,
                        cell: path[t],
                        timestep: t,
                    });
                }
                if t >= 1 && !are_neighbors(map, path[t - 1], path[t]) {
                    error!("agent {agent} jumps {} -> {} at {t}", path[t - 1], path[t]);
                    return Err(SimError::ConstraintViolation {
                        agent_1: agent,
                        agent_2: agent,
                        cell: path[t],
                        timestep: t,
                    });
                }
            }
        }

        for a in 0..self.paths.len() {
            for b in a + 1..self.paths.len() {
                for t in 0..self.horizon {
                    if self.paths[a][t] == self.paths[b][t] {
                        error!(
                            "agents {a} and {b} collide at {} at timestep {t}",
                            self.paths[a][t]
                        );
                        return Err(SimError::ConstraintViolation {
                            agent_1: a,
                            agent_2: b,
                            cell: self.paths[a][t],
                            timestep: t,
                        });
                    }
                    if t >= 1
                        && self.paths[a][t] == self.paths[b][t - 1]
                        && self.paths[a][t - 1] == self.paths[b][t]
                    {
                        error!(
                            "agents {a} and {b} swap {} <-> {} at timestep {t}",
                            self.paths[a][t - 1],
                            self.paths[a][t]
                        );
                        return Err(SimError::ConstraintViolation {
                            agent_1: a,
                            agent_2: b,
                            cell: self.paths[a][t],
                            timestep: t,
                        });
                    }
                }
            }
        }

        Ok(())
    }
}

fn are_neighbors(map: &Map, from: Cell, to: Cell) -> bool {
    action_offsets(map.width)
        .iter()
        .any(|&offset| map.shift(from, offset) == to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::tests::{cell_at, write_fixture, TINY_MAP};
    use crate::task::load_tasks;

    fn tiny() -> (Map, Vec<Task>) {
        let dir = tempfile::tempdir().unwrap();
        let map = Map::from_file(&write_fixture(&dir, "tiny.map", TINY_MAP)).unwrap();
        let tasks = load_tasks(
            &write_fixture(&dir, "tiny.task", "2\n0 0 1 0 0\n3 1 0 0 0\n"),
            &map,
        )
        .unwrap();
        (map, tasks)
    }

    fn releases(tasks: &[Task], horizon: usize) -> Vec<Vec<usize>> {
        let mut buckets = vec![Vec::new(); horizon];
        for task in tasks {
            buckets[task.release_time].push(task.id);
        }
        buckets
    }

    #[test]
    fn test_publish_in_release_order() {
        let (map, tasks) = tiny();
        let buckets = releases(&tasks, map.horizon);
        let homes: Vec<Cell> = map.homes().iter().map(|e| e.loc).collect();
        let mut token = Token::new(map.horizon, &homes);

        token.publish_tasks(&buckets, 0, 0);
        assert!(token.open.is_empty());

        // Release 0 is published by the bucket-0 bootstrap, not the range.
        token.open.extend_from_slice(&buckets[0]);
        token.publish_tasks(&buckets, 0, 5);
        assert_eq!(token.open, vec![0, 1]);
    }

    #[test]
    fn test_expire_drops_picked_up_tasks() {
        let (map, mut tasks) = tiny();
        let homes: Vec<Cell> = map.homes().iter().map(|e| e.loc).collect();
        let mut token = Token::new(map.horizon, &homes);
        token.open = vec![0, 1];

        tasks[0].state = TaskState::Taken {
            agent: 0,
            arrive_start: 2,
            arrive_goal: 6,
        };
        token.timestep = 1;
        token.expire_tasks(&tasks);
        assert_eq!(token.open, vec![0, 1]);

        token.timestep = 2;
        token.expire_tasks(&tasks);
        assert_eq!(token.open, vec![1]);
    }

    #[test]
    fn test_verify_catches_vertex_collision() {
        let (map, _) = tiny();
        let c = cell_at(&map, 1, 1);
        let mut token = Token::new(map.horizon, &[c, cell_at(&map, 0, 0)]);
        // Walk agent 1 onto agent 0's hold cell.
        token.paths[1][1] = cell_at(&map, 0, 1);
        token.paths[1][2..].fill(cell_at(&map, 1, 1));
        assert!(matches!(
            token.verify(&map),
            Err(SimError::ConstraintViolation {
                agent_1: 0,
                agent_2: 1,
                timestep: 2,
                ..
            })
        ));
    }

    #[test]
    fn test_verify_catches_edge_collision() {
        let (map, _) = tiny();
        let a = cell_at(&map, 0, 0);
        let b = cell_at(&map, 1, 0);
        let mut token = Token::new(map.horizon, &[a, b]);
        token.paths[0][1..].fill(b);
        token.paths[1][1..].fill(a);
        assert!(matches!(
            token.verify(&map),
            Err(SimError::ConstraintViolation { timestep: 1, .. })
        ));
    }

    #[test]
    fn test_verify_catches_teleport() {
        let (map, _) = tiny();
        let mut token = Token::new(map.horizon, &[cell_at(&map, 0, 0)]);
        token.paths[0][5..].fill(cell_at(&map, 2, 2));
        assert!(token.verify(&map).is_err());
    }

    #[test]
    fn test_constraint_view_skips_own_row() {
        let (map, _) = tiny();
        let a = cell_at(&map, 0, 0);
        let b = cell_at(&map, 2, 2);
        let token = Token::new(map.horizon, &[a, b]);
        let cons = token.constraints_for(0);
        assert_eq!(cons.len(), 1);
        assert_eq!(cons[0][0], b);
    }
}
