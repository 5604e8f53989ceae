use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};

use tracing::debug;

use crate::common::{Cell, Endpoint, EndpointKind};
use crate::error::{SimError, SimResult};

/// Sentinel distance for cells with no passable route to an endpoint.
pub const UNREACHABLE: usize = usize::MAX;

/// Move offsets in action order WAIT, NORTH, EAST, SOUTH, WEST.
pub fn action_offsets(width: usize) -> [isize; 5] {
    let w = width as isize;
    [0, -w, 1, w, -1]
}

/// A rectangular grid with a one-cell blocked border. Cells are row-major
/// indices into the bordered `width x height` array.
#[derive(Debug, Clone)]
pub struct Map {
    /// Bordered width (inner cols + 2).
    pub width: usize,
    /// Bordered height (inner rows + 2).
    pub height: usize,
    /// Max timesteps planned per agent.
    pub horizon: usize,
    pub num_workpoints: usize,
    pub num_agents: usize,
    /// Workpoints in slots `[0, num_workpoints)`, homes after.
    pub endpoints: Vec<Endpoint>,
    passable: Vec<bool>,
    endpoint_mask: Vec<bool>,
}

impl Map {
    pub fn from_file(path: &str) -> SimResult<Self> {
        let file = File::open(path).map_err(|source| SimError::Io {
            path: path.to_string(),
            source,
        })?;
        Self::parse(BufReader::new(file), path)
    }

    fn parse<R: Read>(reader: BufReader<R>, path: &str) -> SimResult<Self> {
        let input = |detail: String| SimError::Input {
            path: path.to_string(),
            detail,
        };

        let mut lines = reader.lines();
        let mut next_line = |what: &str| -> SimResult<String> {
            match lines.next() {
                Some(Ok(line)) => Ok(line),
                Some(Err(source)) => Err(SimError::Io {
                    path: path.to_string(),
                    source,
                }),
                None => Err(input(format!("unexpected end of file, expected {what}"))),
            }
        };

        let dims = next_line("cols,rows")?;
        let mut fields = dims.split(',');
        let cols: usize = fields
            .next()
            .and_then(|f| f.trim().parse().ok())
            .ok_or_else(|| input(format!("bad dimension line {dims:?}")))?;
        let rows: usize = fields
            .next()
            .and_then(|f| f.trim().parse().ok())
            .ok_or_else(|| input(format!("bad dimension line {dims:?}")))?;

        let parse_count = |line: String, what: &str| -> SimResult<usize> {
            line.split_whitespace()
                .next()
                .and_then(|f| f.parse().ok())
                .ok_or_else(|| input(format!("bad {what} line {line:?}")))
        };
        let num_workpoints = parse_count(next_line("workpoint count")?, "workpoint count")?;
        let num_agents = parse_count(next_line("agent count")?, "agent count")?;
        let horizon = parse_count(next_line("horizon")?, "horizon")?;
        if horizon == 0 {
            return Err(input("horizon must be positive".to_string()));
        }

        // One-cell blocked border around the stored grid.
        let width = cols + 2;
        let height = rows + 2;
        let mut passable = vec![false; width * height];
        let mut endpoint_mask = vec![false; width * height];
        let mut workpoints = Vec::new();
        let mut homes = Vec::new();

        for i in 1..height - 1 {
            let line = next_line("map row")?;
            let chars: Vec<char> = line.chars().collect();
            if chars.len() < cols {
                return Err(input(format!(
                    "map row {} has {} cells, expected {}",
                    i - 1,
                    chars.len(),
                    cols
                )));
            }
            for j in 1..width - 1 {
                let cell = i * width + j;
                match chars[j - 1] {
                    '@' => {}
                    '.' => passable[cell] = true,
                    'e' => {
                        passable[cell] = true;
                        endpoint_mask[cell] = true;
                        workpoints.push(cell);
                    }
                    'r' => {
                        passable[cell] = true;
                        endpoint_mask[cell] = true;
                        homes.push(cell);
                    }
                    other => {
                        return Err(input(format!(
                            "unknown map character {other:?} at row {}, col {}",
                            i - 1,
                            j - 1
                        )))
                    }
                }
            }
        }

        if workpoints.len() != num_workpoints {
            return Err(input(format!(
                "found {} workpoints, header says {}",
                workpoints.len(),
                num_workpoints
            )));
        }
        if homes.len() != num_agents {
            return Err(input(format!(
                "found {} agent homes, header says {}",
                homes.len(),
                num_agents
            )));
        }

        let mut endpoints = Vec::with_capacity(num_workpoints + num_agents);
        let located = workpoints
            .into_iter()
            .map(|loc| (loc, EndpointKind::Workpoint))
            .chain(homes.into_iter().map(|loc| (loc, EndpointKind::Home)));
        for (id, (loc, kind)) in located.enumerate() {
            endpoints.push(Endpoint {
                id,
                loc,
                kind,
                dist: distance_table(&passable, width, loc),
            });
        }

        let map = Map {
            width,
            height,
            horizon,
            num_workpoints,
            num_agents,
            endpoints,
            passable,
            endpoint_mask,
        };
        debug!(
            "loaded {}x{} bordered grid from {path}: {} workpoints, {} agents, horizon {}",
            map.width, map.height, map.num_workpoints, map.num_agents, map.horizon
        );
        for ep in &map.endpoints {
            debug!(
                "endpoint {} ({:?}) at {:?}",
                ep.id,
                ep.kind,
                map.to_inner_xy(ep.loc)
            );
        }
        Ok(map)
    }

    pub fn is_passable(&self, cell: Cell) -> bool {
        self.passable.get(cell).copied().unwrap_or(false)
    }

    pub fn is_endpoint(&self, cell: Cell) -> bool {
        self.endpoint_mask.get(cell).copied().unwrap_or(false)
    }

    /// Apply a signed move offset. Passable cells never touch the array
    /// boundary (the border is blocked), so a wrapped index simply fails the
    /// passability check.
    pub fn shift(&self, cell: Cell, offset: isize) -> Cell {
        (cell as isize).wrapping_add(offset) as usize
    }

    /// Home endpoints, in agent-id order.
    pub fn homes(&self) -> &[Endpoint] {
        &self.endpoints[self.num_workpoints..]
    }

    /// Inner-grid coordinates `(x, y)` of a bordered cell.
    pub fn to_inner_xy(&self, cell: Cell) -> (usize, usize) {
        (cell % self.width - 1, cell / self.width - 1)
    }
}

/// True shortest distance from every cell to `source` over the passable
/// sub-grid, unit edge costs, four-connectivity.
fn distance_table(passable: &[bool], width: usize, source: Cell) -> Vec<usize> {
    let mut dist = vec![UNREACHABLE; passable.len()];
    let mut queue = VecDeque::new();
    dist[source] = 0;
    queue.push_back(source);
    while let Some(cell) = queue.pop_front() {
        for &offset in &action_offsets(width)[1..] {
            let next = (cell as isize + offset) as usize;
            if passable[next] && dist[next] == UNREACHABLE {
                dist[next] = dist[cell] + 1;
                queue.push_back(next);
            }
        }
    }
    dist
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    pub(crate) fn write_fixture(dir: &TempDir, name: &str, contents: &str) -> String {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path.to_str().unwrap().to_string()
    }

    /// Bordered cell index of inner-grid coordinates.
    pub(crate) fn cell_at(map: &Map, x: usize, y: usize) -> Cell {
        (y + 1) * map.width + (x + 1)
    }

    // 3x3 open grid, workpoints in opposite corners, home in the center.
    pub(crate) const TINY_MAP: &str = "3,3\n2\n1\n20\ne..\n.r.\n..e\n";

    #[test]
    fn test_read_map() {
        let dir = tempfile::tempdir().unwrap();
        let map = Map::from_file(&write_fixture(&dir, "tiny.map", TINY_MAP)).unwrap();

        assert_eq!(map.width, 5);
        assert_eq!(map.height, 5);
        assert_eq!(map.horizon, 20);
        assert_eq!(map.num_workpoints, 2);
        assert_eq!(map.num_agents, 1);

        // Border is blocked, interior is open.
        assert!(!map.is_passable(0));
        assert!(!map.is_passable(cell_at(&map, 0, 0) - 1));
        assert!(map.is_passable(cell_at(&map, 0, 0)));
        assert!(map.is_passable(cell_at(&map, 2, 2)));

        // Workpoints in row-major scan order, then homes.
        assert_eq!(map.endpoints[0].loc, cell_at(&map, 0, 0));
        assert_eq!(map.endpoints[0].kind, EndpointKind::Workpoint);
        assert_eq!(map.endpoints[1].loc, cell_at(&map, 2, 2));
        assert_eq!(map.endpoints[2].loc, cell_at(&map, 1, 1));
        assert_eq!(map.endpoints[2].kind, EndpointKind::Home);
        assert!(map.is_endpoint(cell_at(&map, 1, 1)));
        assert!(!map.is_endpoint(cell_at(&map, 1, 0)));
    }

    #[test]
    fn test_heuristic_is_true_distance() {
        let dir = tempfile::tempdir().unwrap();
        let map = Map::from_file(&write_fixture(&dir, "tiny.map", TINY_MAP)).unwrap();

        let corner = &map.endpoints[0]; // inner (0, 0)
        assert_eq!(corner.dist[cell_at(&map, 0, 0)], 0);
        assert_eq!(corner.dist[cell_at(&map, 1, 1)], 2);
        assert_eq!(corner.dist[cell_at(&map, 2, 2)], 4);
        assert_eq!(corner.dist[0], UNREACHABLE);
    }

    #[test]
    fn test_heuristic_symmetry_between_endpoints() {
        let dir = tempfile::tempdir().unwrap();
        let map = Map::from_file(&write_fixture(&dir, "tiny.map", TINY_MAP)).unwrap();

        for a in &map.endpoints {
            for b in &map.endpoints {
                assert_eq!(a.dist[b.loc], b.dist[a.loc]);
            }
        }
    }

    #[test]
    fn test_walls_block_distance() {
        let dir = tempfile::tempdir().unwrap();
        // Vertical wall with a gap at the bottom row.
        let contents = "3,3\n2\n1\n20\ne@.\nr@e\n...\n";
        let map = Map::from_file(&write_fixture(&dir, "wall.map", contents)).unwrap();

        let left = &map.endpoints[0]; // inner (0, 0)
        // Around the wall: down 2, right 2, up 1.
        assert_eq!(left.dist[cell_at(&map, 2, 1)], 5);
    }

    #[test]
    fn test_malformed_map_is_rejected() {
        let dir = tempfile::tempdir().unwrap();

        let short_row = "3,3\n2\n1\n20\ne..\n.r\n..e\n";
        assert!(matches!(
            Map::from_file(&write_fixture(&dir, "short.map", short_row)),
            Err(SimError::Input { .. })
        ));

        let bad_char = "3,3\n2\n1\n20\ne..\n.x.\n..e\n";
        assert!(matches!(
            Map::from_file(&write_fixture(&dir, "char.map", bad_char)),
            Err(SimError::Input { .. })
        ));

        let wrong_count = "3,3\n5\n1\n20\ne..\n.r.\n..e\n";
        assert!(matches!(
            Map::from_file(&write_fixture(&dir, "count.map", wrong_count)),
            Err(SimError::Input { .. })
        ));

        assert!(matches!(
            Map::from_file("no_such_file.map"),
            Err(SimError::Io { .. })
        ));
    }
}
