use std::fs::File;
use std::io::{BufWriter, Write};
use std::time::Instant;

use tracing::{debug, info};

use crate::common::{Agent, Cell};
use crate::error::{SimError, SimResult};
use crate::map::Map;
use crate::planner::{plan_agent, Policy};
use crate::stat::Stats;
use crate::task::{Task, TaskState};
use crate::token::Token;

/// Deliveries and releases are profiled over a sliding window of this many
/// timesteps.
const THROUGHPUT_WINDOW: usize = 100;

/// One policy's worth of simulation: the dispatcher loop over the token,
/// the agent team, and the task stream.
pub struct Simulation {
    map: Map,
    tasks: Vec<Task>,
    /// Task ids bucketed by release time.
    releases: Vec<Vec<usize>>,
    agents: Vec<Agent>,
    token: Token,
    policy: Policy,
    check_constraints: bool,
    last_release: usize,
    stats: Stats,
}

impl Simulation {
    pub fn new(map: Map, tasks: Vec<Task>, policy: Policy, check_constraints: bool) -> Self {
        let agents: Vec<Agent> = map
            .homes()
            .iter()
            .enumerate()
            .map(|(id, ep)| Agent::new(id, ep.loc))
            .collect();
        let homes: Vec<Cell> = agents.iter().map(|a| a.loc).collect();
        let mut token = Token::new(map.horizon, &homes);

        let mut releases = vec![Vec::new(); map.horizon];
        for task in &tasks {
            releases[task.release_time].push(task.id);
        }
        let last_release = tasks.iter().map(|t| t.release_time).max().unwrap_or(0);
        // Tasks released at the initial timestep are visible immediately.
        token.open.extend_from_slice(&releases[0]);

        Simulation {
            map,
            tasks,
            releases,
            agents,
            token,
            policy,
            check_constraints,
            last_release,
            stats: Stats::default(),
        }
    }

    /// Run the dispatcher until every published task is done and the clock
    /// has reached the last release.
    pub fn run(&mut self) -> SimResult<()> {
        info!("running {}", self.policy.label());
        let run_start = Instant::now();

        while !self.token.open.is_empty() || self.token.timestep < self.last_release {
            // Pick the next agent: one whose finish time matches the clock
            // if any, otherwise the earliest to finish; lowest id wins ties.
            let chosen = (0..self.agents.len())
                .find(|&i| self.agents[i].finish_time == self.token.timestep)
                .unwrap_or_else(|| {
                    (0..self.agents.len())
                        .min_by_key(|&i| self.agents[i].finish_time)
                        .unwrap()
                });

            let finish = self.agents[chosen].finish_time;
            if finish >= self.map.horizon {
                return Err(SimError::HorizonExhausted {
                    horizon: self.map.horizon,
                    timestep: self.token.timestep,
                });
            }

            // Publish tasks released while the clock advances.
            let old = self.token.timestep;
            self.token.publish_tasks(&self.releases, old, finish);
            self.token.timestep = finish;
            self.agents[chosen].loc = self.token.paths[chosen][finish];
            debug!(
                "dispatch agent {} at timestep {finish}, {} open tasks",
                self.agents[chosen].id,
                self.token.open.len()
            );

            if self.policy == Policy::Tptr {
                self.token.expire_tasks(&self.tasks);
            }

            // An agent dispatched at its pickup time is still executing its
            // committed delivery; it re-enters the pool once that completes.
            if let Some(task_id) = self.agents[chosen].carrying.take() {
                if let TaskState::Taken { arrive_goal, .. } = self.tasks[task_id].state {
                    self.agents[chosen].finish_time = arrive_goal;
                }
                continue;
            }

            if self.token.open.is_empty() {
                self.agents[chosen].finish_time += 1;
                continue;
            }

            let plan_start = Instant::now();
            plan_agent(
                self.policy,
                &self.map,
                &mut self.token,
                &mut self.tasks,
                &mut self.agents,
                chosen,
                &mut self.stats,
            )?;
            self.stats.plan_time_us += plan_start.elapsed().as_micros();

            if self.check_constraints {
                self.token.verify(&self.map)?;
            }
        }

        info!(
            "{} done at timestep {} in {:?}",
            self.policy.label(),
            self.token.timestep,
            run_start.elapsed()
        );
        Ok(())
    }

    /// Write the per-agent path table: for each agent in id order, the
    /// horizon followed by one `x\ty` line per timestep in inner-grid
    /// coordinates.
    pub fn save_paths(&self, path: &str) -> SimResult<()> {
        self.write_paths(path).map_err(|source| SimError::Io {
            path: path.to_string(),
            source,
        })
    }

    fn write_paths(&self, path: &str) -> std::io::Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        for agent_path in &self.token.paths {
            writeln!(out, "{}", self.map.horizon)?;
            for &cell in agent_path {
                let (x, y) = self.map.to_inner_xy(cell);
                writeln!(out, "{x}\t{y}")?;
            }
        }
        out.flush()
    }

    /// Write per-timestep counts of deliveries and releases within the
    /// trailing profile window.
    pub fn save_throughput(&self, path: &str) -> SimResult<()> {
        self.write_throughput(path).map_err(|source| SimError::Io {
            path: path.to_string(),
            source,
        })
    }

    fn write_throughput(&self, path: &str) -> std::io::Result<()> {
        let len = self.map.horizon + THROUGHPUT_WINDOW;
        let mut delivered = vec![0usize; len];
        let mut released = vec![0usize; len];
        for task in &self.tasks {
            if let TaskState::Taken { arrive_goal, .. } = task.state {
                for slot in delivered.iter_mut().skip(arrive_goal).take(THROUGHPUT_WINDOW) {
                    *slot += 1;
                }
            }
            for slot in released
                .iter_mut()
                .skip(task.release_time)
                .take(THROUGHPUT_WINDOW)
            {
                *slot += 1;
            }
        }

        let mut out = BufWriter::new(File::create(path)?);
        for (d, r) in delivered.iter().zip(&released) {
            writeln!(out, "{d} {r}")?;
        }
        out.flush()
    }

    /// Log the end-of-run task metrics: deliveries, finishing timestep, and
    /// the summed task waiting time.
    pub fn summarize(&self) {
        let mut waiting = 0;
        let mut last_finish = 0;
        let mut delivered = 0;
        for task in &self.tasks {
            if let TaskState::Taken {
                agent,
                arrive_start,
                arrive_goal,
            } = task.state
            {
                debug!(
                    "task {} ({} -> {}) released {} appear ({}, {}): agent {agent} \
                     pickup {arrive_start} delivery {arrive_goal}",
                    task.id,
                    task.start,
                    task.goal,
                    task.release_time,
                    task.appear_start,
                    task.appear_goal
                );
                delivered += 1;
                waiting += arrive_goal - task.release_time;
                last_finish = last_finish.max(arrive_goal);
            }
        }
        info!(
            "{}: {delivered}/{} tasks delivered, finishing timestep {last_finish}, summed waiting time {waiting}",
            self.policy.label(),
            self.tasks.len()
        );
        self.stats.print(self.policy.label());
    }
}
