use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub searches: usize,
    pub expanded_nodes: usize,
    pub generated_nodes: usize,
    pub assignments: usize,
    pub reassignments: usize,
    pub plan_time_us: u128,
}

impl Stats {
    pub fn print(&self, label: &str) {
        info!(
            "{} planning: {} searches, {} expanded, {} generated, {} assignments ({} reassigned), {}us",
            label,
            self.searches,
            self.expanded_nodes,
            self.generated_nodes,
            self.assignments,
            self.reassignments,
            self.plan_time_us
        );
    }
}
