use std::path::PathBuf;

use clap::{ArgAction, Parser};

/// Behavior enforcement daemon for supervised automated agents.
#[derive(Parser, Debug)]
#[command(name = "wardend", version, about)]
pub struct WardendOpts {
    /// Custom configuration file
    #[arg(short, long)]
    pub config_file: Option<String>,

    /// Rules directory, overriding the configured path
    #[arg(long)]
    pub rules_dir: Option<PathBuf>,

    /// Judge and audit without sending any signal
    #[arg(long)]
    pub monitor_only: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, action = ArgAction::Count)]
    pub verbose: u8,
}

impl WardendOpts {
    pub fn override_log_level(&self) -> Option<log::LevelFilter> {
        match self.verbose {
            0 => None,
            1 => Some(log::LevelFilter::Debug),
            _ => Some(log::LevelFilter::Trace),
        }
    }
}

pub fn parse_from_args() -> WardendOpts {
    WardendOpts::parse()
}

/// Print an error and its cause chain to stderr.
pub fn report_error(err: &anyhow::Error) {
    eprintln!("Error: {err:#}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_log_levels() {
        let opts = WardendOpts::parse_from(["wardend"]);
        assert_eq!(opts.override_log_level(), None);
        let opts = WardendOpts::parse_from(["wardend", "-v"]);
        assert_eq!(opts.override_log_level(), Some(log::LevelFilter::Debug));
        let opts = WardendOpts::parse_from(["wardend", "-vv", "--monitor-only"]);
        assert_eq!(opts.override_log_level(), Some(log::LevelFilter::Trace));
        assert!(opts.monitor_only);
    }
}
