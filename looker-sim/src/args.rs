use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "looker-sim")]
#[command(about = "Drive the Looker engine against synthetic media and report its behaviour")]
#[command(version)]
pub struct Args {
    /// Engine configuration file (TOML)
    #[arg(short, long, env = "LOOKER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Number of grid samples to scroll through
    #[arg(long, default_value_t = 600)]
    pub samples: usize,

    /// Number of frames in the simulated video
    #[arg(long, default_value_t = 300)]
    pub frames: u32,

    /// Number of label painting requests to issue
    #[arg(long, default_value_t = 200)]
    pub jobs: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["looker-sim"]);
        assert_eq!(args.samples, 600);
        assert_eq!(args.frames, 300);
        assert_eq!(args.jobs, 200);
        assert!(!args.verbose);
    }

    #[test]
    fn test_overrides() {
        let args = Args::parse_from(["looker-sim", "--frames", "45", "--jobs", "3", "-v"]);
        assert_eq!(args.frames, 45);
        assert_eq!(args.jobs, 3);
        assert!(args.verbose);
    }
}
