use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::{debug, instrument, trace};

use crate::common::{Cell, Path};
use crate::map::{action_offsets, Map, UNREACHABLE};
use crate::stat::Stats;

/// Suboptimality weight for the focal queue. Fixed at 1.0, so the focal
/// queue tracks the open queue's f-minimum frontier; the conflict-count
/// ordering is kept for bounded-suboptimal extensions.
const FOCAL_WEIGHT: f64 = 1.0;

// Open list is indexed on (f, g, cell); larger g wins ties to prefer
// deeper nodes.
#[derive(Clone, Eq, Debug, PartialEq, Hash)]
struct OpenNode {
    cell: Cell,
    f: usize,
    g: usize,
}

impl Ord for OpenNode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.f
            .cmp(&other.f)
            .then_with(|| self.g.cmp(&other.g).reverse())
            .then_with(|| self.cell.cmp(&other.cell))
    }
}

impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Clone, Eq, Debug, PartialEq, Hash)]
struct FocalNode {
    cell: Cell,
    conflicts: usize,
    f: usize,
    g: usize,
}

impl Ord for FocalNode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.conflicts
            .cmp(&other.conflicts)
            .then_with(|| self.f.cmp(&other.f))
            .then_with(|| self.g.cmp(&other.g).reverse())
            .then_with(|| self.cell.cmp(&other.cell))
    }
}

impl PartialOrd for FocalNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Shortest collision-free path from `start` at absolute time `start_time`
/// to `goal`, against the committed trajectories in `cons_paths`. Node
/// timesteps are relative to `start_time` and equal `g` under unit costs.
/// With `require_hold`, the goal is accepted only once no constraint path
/// ever touches it again, so the agent may rest there indefinitely.
///
/// Returns the cell sequence including both ends, or `None` when no path
/// fits before the horizon.
#[allow(clippy::too_many_arguments)]
#[instrument(skip_all, name = "space_time_search", fields(start = start, goal = goal, start_time = start_time, require_hold = require_hold), level = "debug")]
pub fn space_time_search(
    map: &Map,
    heuristic: &[usize],
    start: Cell,
    goal: Cell,
    start_time: usize,
    cons_paths: &[&[Cell]],
    require_hold: bool,
    stats: &mut Stats,
) -> Option<Path> {
    stats.searches += 1;

    let start_h = heuristic[start];
    if start_h == UNREACHABLE {
        return None;
    }

    // Last absolute time any constraint path mentions the goal cell.
    let last_goal_visit = cons_paths
        .iter()
        .flat_map(|path| {
            path.iter()
                .enumerate()
                .filter(|&(_, &cell)| cell == goal)
                .map(|(t, _)| t)
        })
        .max();

    let offsets = action_offsets(map.width);

    let mut open_list = BTreeSet::new();
    let mut focal_list = BTreeSet::new();
    let mut closed_list = HashSet::new();
    let mut trace_map = HashMap::new();

    open_list.insert(OpenNode {
        cell: start,
        f: start_h,
        g: 0,
    });
    focal_list.insert(FocalNode {
        cell: start,
        conflicts: 0,
        f: start_h,
        g: 0,
    });
    let mut f_min = start_h;

    while let Some(current) = focal_list.pop_first() {
        trace!("expand node: {current:?}");
        stats.expanded_nodes += 1;

        closed_list.insert((current.cell, current.g));
        f_min = f_min.max(open_list.first().unwrap().f);

        // Remove the same node from the open list.
        assert!(open_list.remove(&OpenNode {
            cell: current.cell,
            f: current.f,
            g: current.g,
        }));

        if current.cell == goal
            && (!require_hold
                || (last_goal_visit.is_none_or(|t| start_time + current.g > t)
                    && can_hold(goal, start_time + current.g, cons_paths)))
        {
            debug!("reached goal with g {} (f min {f_min})", current.g);
            return Some(construct_path(&trace_map, (current.cell, current.g)));
        }

        // Unit cost: g is also the relative timestep.
        let tentative_g = current.g + 1;
        if start_time + tentative_g >= map.horizon {
            continue;
        }

        for &offset in &offsets {
            let next = map.shift(current.cell, offset);
            if !map.is_passable(next) {
                continue;
            }
            if closed_list.contains(&(next, tentative_g)) {
                continue;
            }
            if is_constrained(current.cell, next, start_time + tentative_g, cons_paths) {
                continue;
            }
            let h = heuristic[next];
            if h == UNREACHABLE {
                continue;
            }

            let f = tentative_g + h;
            // f is a function of (cell, g) under unit costs, so set
            // membership fully deduplicates states.
            if open_list.insert(OpenNode {
                cell: next,
                f,
                g: tentative_g,
            }) {
                stats.generated_nodes += 1;
                trace_map.insert((next, tentative_g), (current.cell, current.g));
                if f as f64 <= f_min as f64 * FOCAL_WEIGHT {
                    focal_list.insert(FocalNode {
                        cell: next,
                        conflicts: 0,
                        f,
                        g: tentative_g,
                    });
                }
            }
        }

        // Maintain the focal queue when the f minimum rises.
        if let Some(head) = open_list.first() {
            let new_f_min = head.f;
            if f_min < new_f_min {
                for node in &open_list {
                    if node.f as f64 > f_min as f64 * FOCAL_WEIGHT
                        && node.f as f64 <= new_f_min as f64 * FOCAL_WEIGHT
                    {
                        focal_list.insert(FocalNode {
                            cell: node.cell,
                            conflicts: 0,
                            f: node.f,
                            g: node.g,
                        });
                    }
                }
            }
        }
    }

    debug!("cannot find path");
    None
}

/// Vertex or edge collision against any constraint path when stepping from
/// `curr` into `next` at absolute time `next_abs_t`.
fn is_constrained(curr: Cell, next: Cell, next_abs_t: usize, cons_paths: &[&[Cell]]) -> bool {
    cons_paths.iter().any(|path| {
        path[next_abs_t] == next || (path[next_abs_t] == curr && path[next_abs_t - 1] == next)
    })
}

/// No constraint path visits `goal` strictly after `arrive_abs_t`.
fn can_hold(goal: Cell, arrive_abs_t: usize, cons_paths: &[&[Cell]]) -> bool {
    cons_paths
        .iter()
        .all(|path| path.iter().skip(arrive_abs_t + 1).all(|&cell| cell != goal))
}

fn construct_path(trace_map: &HashMap<(Cell, usize), (Cell, usize)>, goal: (Cell, usize)) -> Path {
    let mut current = goal;
    let mut path = vec![current.0];
    while let Some(&prev) = trace_map.get(&current) {
        path.push(prev.0);
        current = prev;
    }
    path.reverse();
    path
}
