use tracing::debug;

use crate::common::{Agent, Cell};
use crate::error::{SimError, SimResult};
use crate::map::{Map, UNREACHABLE};
use crate::search::space_time_search;
use crate::stat::Stats;
use crate::task::{Task, TaskState};
use crate::token::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Greedy assignment by heuristic travel cost; the task is owned
    /// through delivery.
    Totp,
    /// Like TOTP, but a task may be taken over by a faster agent until it
    /// is picked up.
    Tptr,
}

impl Policy {
    pub fn label(self) -> &'static str {
        match self {
            Policy::Totp => "TOTP",
            Policy::Tptr => "TPTR",
        }
    }
}

/// What the planner did for the dispatched agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanOutcome {
    /// Committed a pickup-and-delivery path for a free task.
    Assigned,
    /// Committed a path for a task taken over from another agent, which
    /// now rests pending a replan.
    Reassigned,
    /// No candidate task; the agent waits one tick.
    Rested,
}

struct Candidate {
    task: usize,
    /// Admissible lower bound on travel: to the pickup, then to the goal.
    score: usize,
    /// Position in the open list, used as the tie-break.
    order: usize,
    /// `(agent, arrive_start)` when taking over a task already assigned.
    held_by: Option<(usize, usize)>,
}

/// Select a task for the dispatched agent and commit a collision-free
/// pickup-and-delivery trajectory into the token.
pub fn plan_agent(
    policy: Policy,
    map: &Map,
    token: &mut Token,
    tasks: &mut [Task],
    agents: &mut [Agent],
    agent_id: usize,
    stats: &mut Stats,
) -> SimResult<PlanOutcome> {
    let t = token.timestep;
    let loc = agents[agent_id].loc;

    let mut saw_free = false;
    let mut candidates = Vec::new();
    for (order, &task_id) in token.open.iter().enumerate() {
        let task = &tasks[task_id];
        let held_by = match task.state {
            TaskState::Free => {
                saw_free = true;
                None
            }
            TaskState::Taken {
                agent,
                arrive_start,
                ..
            } => {
                if policy != Policy::Tptr || agent == agent_id {
                    continue;
                }
                Some((agent, arrive_start))
            }
        };

        let start_ep = &map.endpoints[task.start];
        let to_pickup = start_ep.dist[loc];
        let to_goal = map.endpoints[task.goal].dist[start_ep.loc];
        if to_pickup == UNREACHABLE || to_goal == UNREACHABLE {
            continue;
        }
        if let Some((_, arrive_start)) = held_by {
            // Admissible bound says we cannot beat the current assignee.
            if t + to_pickup >= arrive_start {
                continue;
            }
        }

        candidates.push(Candidate {
            task: task_id,
            score: to_pickup + to_goal,
            order,
            held_by,
        });
    }
    candidates.sort_by_key(|c| (c.score, c.order));

    for cand in &candidates {
        let task_id = cand.task;

        // A dispossessed agent is left resting where it stands, so its
        // current cell must stay clear of every other committed path.
        let mut saved_row = None;
        if let Some((prev_agent, _)) = cand.held_by {
            let rest_cell = token.paths[prev_agent][t];
            let rest_blocked = token
                .paths
                .iter()
                .enumerate()
                .any(|(other, path)| other != prev_agent && path[t + 1..].contains(&rest_cell));
            if rest_blocked {
                debug!(
                    "skip takeover of task {task_id}: agent {prev_agent} cannot rest at {rest_cell}"
                );
                continue;
            }
            if !map.is_endpoint(rest_cell) {
                debug!("takeover would leave agent {prev_agent} resting off-endpoint at {rest_cell}");
            }
            saved_row = Some(token.paths[prev_agent].clone());
            token.hold_from(prev_agent, t);
        }

        let earlier_than = cand.held_by.map(|(_, arrive_start)| arrive_start);
        match plan_legs(map, token, tasks, agent_id, loc, t, task_id, earlier_than, stats) {
            Some((pickup, delivery)) => {
                let t_pickup = t + pickup.len() - 1;
                let t_goal = t_pickup + delivery.len() - 1;

                token.write_path(agent_id, t, &pickup);
                token.write_path(agent_id, t_pickup, &delivery);
                token.hold_from(agent_id, t_goal);
                tasks[task_id].state = TaskState::Taken {
                    agent: agent_id,
                    arrive_start: t_pickup,
                    arrive_goal: t_goal,
                };
                stats.assignments += 1;

                match policy {
                    Policy::Totp => {
                        agents[agent_id].finish_time = t_goal;
                        token.open.retain(|&id| id != task_id);
                    }
                    Policy::Tptr => {
                        agents[agent_id].finish_time = t_pickup;
                        agents[agent_id].carrying = Some(task_id);
                    }
                }

                if let Some((prev_agent, _)) = cand.held_by {
                    agents[prev_agent].finish_time = t;
                    agents[prev_agent].carrying = None;
                    stats.reassignments += 1;
                    debug!(
                        "agent {agent_id} takes task {task_id} over from agent {prev_agent}, \
                         pickup at {t_pickup}, delivery at {t_goal}"
                    );
                    return Ok(PlanOutcome::Reassigned);
                }
                debug!("agent {agent_id} takes task {task_id}, pickup at {t_pickup}, delivery at {t_goal}");
                return Ok(PlanOutcome::Assigned);
            }
            None => {
                if let (Some(row), Some((prev_agent, _))) = (saved_row, cand.held_by) {
                    token.paths[prev_agent] = row;
                }
            }
        }
    }

    if saw_free {
        return Err(SimError::PlanFailure {
            agent: agent_id,
            timestep: t,
        });
    }

    // Nothing assignable: wait one tick and let the dispatcher come back.
    agents[agent_id].finish_time += 1;
    debug!("agent {agent_id} rests at timestep {t}");
    Ok(PlanOutcome::Rested)
}

/// Plan the pickup leg and the delivery leg against the other agents'
/// committed paths. The delivery leg requires an indefinite hold at the
/// goal, the pickup leg does not: the agent only passes through the pickup.
#[allow(clippy::too_many_arguments)]
fn plan_legs(
    map: &Map,
    token: &Token,
    tasks: &[Task],
    agent_id: usize,
    loc: Cell,
    t: usize,
    task_id: usize,
    earlier_than: Option<usize>,
    stats: &mut Stats,
) -> Option<(Vec<Cell>, Vec<Cell>)> {
    let start_ep = &map.endpoints[tasks[task_id].start];
    let goal_ep = &map.endpoints[tasks[task_id].goal];
    let cons = token.constraints_for(agent_id);

    let pickup = space_time_search(
        map,
        &start_ep.dist,
        loc,
        start_ep.loc,
        t,
        &cons,
        false,
        stats,
    )?;
    let t_pickup = t + pickup.len() - 1;
    if earlier_than.is_some_and(|bound| t_pickup >= bound) {
        return None;
    }

    let delivery = space_time_search(
        map,
        &goal_ep.dist,
        start_ep.loc,
        goal_ep.loc,
        t_pickup,
        &cons,
        true,
        stats,
    )?;
    Some((pickup, delivery))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::tests::{write_fixture, TINY_MAP};
    use crate::task::load_tasks;

    fn setup(map_str: &str, task_str: &str) -> (Map, Vec<Task>, Vec<Agent>, Token) {
        let dir = tempfile::tempdir().unwrap();
        let map = Map::from_file(&write_fixture(&dir, "t.map", map_str)).unwrap();
        let tasks = load_tasks(&write_fixture(&dir, "t.task", task_str), &map).unwrap();
        let agents: Vec<Agent> = map
            .homes()
            .iter()
            .enumerate()
            .map(|(id, ep)| Agent::new(id, ep.loc))
            .collect();
        let homes: Vec<Cell> = map.homes().iter().map(|e| e.loc).collect();
        let token = Token::new(map.horizon, &homes);
        (map, tasks, agents, token)
    }

    #[test]
    fn test_totp_assignment_commits_both_legs() {
        let (map, mut tasks, mut agents, mut token) = setup(TINY_MAP, "1\n0 0 1 0 0\n");
        token.open = vec![0];
        let mut stats = Stats::default();

        let outcome = plan_agent(
            Policy::Totp,
            &map,
            &mut token,
            &mut tasks,
            &mut agents,
            0,
            &mut stats,
        )
        .unwrap();

        assert_eq!(outcome, PlanOutcome::Assigned);
        assert_eq!(
            tasks[0].state,
            TaskState::Taken {
                agent: 0,
                arrive_start: 2,
                arrive_goal: 6,
            }
        );
        assert_eq!(agents[0].finish_time, 6);
        assert_eq!(agents[0].carrying, None);
        assert!(token.open.is_empty());
        assert_eq!(token.paths[0][2], map.endpoints[0].loc);
        assert_eq!(token.paths[0][6], map.endpoints[1].loc);
        // Parked on the delivery endpoint for the rest of the horizon.
        assert!(token.paths[0][6..].iter().all(|&c| c == map.endpoints[1].loc));
    }

    #[test]
    fn test_tptr_assignment_releases_agent_at_pickup() {
        let (map, mut tasks, mut agents, mut token) = setup(TINY_MAP, "1\n0 0 1 0 0\n");
        token.open = vec![0];
        let mut stats = Stats::default();

        let outcome = plan_agent(
            Policy::Tptr,
            &map,
            &mut token,
            &mut tasks,
            &mut agents,
            0,
            &mut stats,
        )
        .unwrap();

        assert_eq!(outcome, PlanOutcome::Assigned);
        assert_eq!(agents[0].finish_time, 2);
        assert_eq!(agents[0].carrying, Some(0));
        // The task stays open until the clock reaches its pickup.
        assert_eq!(token.open, vec![0]);
        assert_eq!(token.paths[0][6], map.endpoints[1].loc);
    }

    // Two homes at the row-0 corners, four workpoints along row 1.
    const TWIN_MAP: &str = "5,2\n4\n2\n30\nr...r\nee.ee\n";

    #[test]
    fn test_tptr_takeover_by_faster_agent() {
        // Task starts next to agent 1's home, but agent 0 plans first.
        let (map, mut tasks, mut agents, mut token) = setup(TWIN_MAP, "1\n0 3 1 0 0\n");
        token.open = vec![0];
        let mut stats = Stats::default();

        let first = plan_agent(
            Policy::Tptr,
            &map,
            &mut token,
            &mut tasks,
            &mut agents,
            0,
            &mut stats,
        )
        .unwrap();
        assert_eq!(first, PlanOutcome::Assigned);
        assert_eq!(
            tasks[0].state,
            TaskState::Taken {
                agent: 0,
                arrive_start: 5,
                arrive_goal: 8,
            }
        );

        let second = plan_agent(
            Policy::Tptr,
            &map,
            &mut token,
            &mut tasks,
            &mut agents,
            1,
            &mut stats,
        )
        .unwrap();
        assert_eq!(second, PlanOutcome::Reassigned);
        assert_eq!(
            tasks[0].state,
            TaskState::Taken {
                agent: 1,
                arrive_start: 1,
                arrive_goal: 4,
            }
        );
        assert_eq!(stats.reassignments, 1);

        // The dispossessed agent rests where it stood and replans now.
        assert_eq!(agents[0].finish_time, 0);
        assert_eq!(agents[0].carrying, None);
        let home_0 = map.homes()[0].loc;
        assert!(token.paths[0].iter().all(|&c| c == home_0));

        assert_eq!(agents[1].finish_time, 1);
        assert_eq!(agents[1].carrying, Some(0));
        token.verify(&map).unwrap();
    }

    #[test]
    fn test_tptr_keeps_task_with_closer_assignee() {
        // Task starts next to agent 0's home; agent 1 cannot beat it.
        let (map, mut tasks, mut agents, mut token) = setup(TWIN_MAP, "1\n0 0 2 0 0\n");
        token.open = vec![0];
        let mut stats = Stats::default();

        plan_agent(
            Policy::Tptr,
            &map,
            &mut token,
            &mut tasks,
            &mut agents,
            0,
            &mut stats,
        )
        .unwrap();
        let arrive_before = tasks[0].state;

        let second = plan_agent(
            Policy::Tptr,
            &map,
            &mut token,
            &mut tasks,
            &mut agents,
            1,
            &mut stats,
        )
        .unwrap();
        assert_eq!(second, PlanOutcome::Rested);
        assert_eq!(tasks[0].state, arrive_before);
        assert_eq!(agents[1].finish_time, 1);
        assert_eq!(stats.reassignments, 0);
    }

    #[test]
    fn test_unreachable_task_is_fatal() {
        // A full wall splits the agent from the task's pickup endpoint.
        let (map, mut tasks, mut agents, mut token) =
            setup("3,3\n2\n1\n20\ne@.\nr@e\n.@.\n", "1\n0 1 0 0 0\n");
        token.open = vec![0];
        let mut stats = Stats::default();

        let result = plan_agent(
            Policy::Totp,
            &map,
            &mut token,
            &mut tasks,
            &mut agents,
            0,
            &mut stats,
        );
        assert!(matches!(
            result,
            Err(SimError::PlanFailure {
                agent: 0,
                timestep: 0,
            })
        ));
    }
}
