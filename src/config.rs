use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Parser, Debug)]
#[command(
    name = "mapd-sim",
    about = "Lifelong multi-agent pickup-and-delivery simulation with token-based planning.",
    author = "Moriarty Yu",
    version = "0.1"
)]
pub struct Cli {
    #[arg(help = "Path to the map file")]
    pub map_file: String,

    #[arg(help = "Path to the task file")]
    pub task_file: String,

    #[arg(long, short, help = "Path to a YAML config file")]
    pub config: Option<String>,

    #[arg(long, help = "Scan the path table for collisions after every plan")]
    pub check: bool,

    #[arg(long, help = "Write per-timestep throughput profiles")]
    pub throughput: bool,
}

#[derive(Serialize, Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub check_constraints: bool,
    pub write_throughput: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            check_constraints: false,
            write_throughput: false,
        }
    }
}

impl Config {
    pub fn from_yaml_str(config_str: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(config_str)?;
        config.validate()
    }

    pub fn override_from_command_line(mut self, cli: &Cli) -> anyhow::Result<Self> {
        if cli.check {
            self.check_constraints = true;
        }
        if cli.throughput {
            self.write_throughput = true;
        }
        self.validate()
    }

    pub fn validate(self) -> anyhow::Result<Self> {
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_yaml_override() {
        let config = Config::default();
        assert!(!config.check_constraints);
        assert!(!config.write_throughput);

        let config = Config::from_yaml_str("check_constraints: true\n").unwrap();
        assert!(config.check_constraints);
        assert!(!config.write_throughput);
    }
}
