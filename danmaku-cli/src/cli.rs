use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Parser, Debug)]
#[command(name = "danmaku")]
#[command(about = "Replay, inspect and convert danmaku comment files")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Engine configuration file (TOML)
    #[arg(short, long, global = true, env = "DANMAKU_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load a comment file and run the scheduler over a time range
    Replay {
        /// Comment file (.json or .xml)
        input: PathBuf,

        /// Media time to start at, in seconds
        #[arg(long, default_value_t = 0.0)]
        from: f64,

        /// Media time to stop at; defaults to the last comment plus its screen time
        #[arg(long)]
        to: Option<f64>,

        /// Wall-clock seconds between ticks
        #[arg(long, default_value_t = 0.04)]
        step: f64,

        /// Seek when playback reaches a time, as AT=TO (repeatable)
        #[arg(long = "seek", value_name = "AT=TO")]
        seeks: Vec<SeekEvent>,

        /// Playback rate
        #[arg(long, default_value_t = 1.0)]
        rate: f64,

        /// Blocklist file (JSON)
        #[arg(long)]
        blocklist: Option<PathBuf>,

        /// Output mode
        #[arg(short, long, value_enum, default_value_t = ReplayOutput::Summary)]
        output: ReplayOutput,
    },

    /// Print statistics for a comment file
    Stats {
        /// Comment file (.json or .xml)
        input: PathBuf,

        /// Density bucket length, in seconds
        #[arg(long, default_value_t = 10.0)]
        bucket: f64,

        /// Number of top senders and words to list
        #[arg(long, default_value_t = 10)]
        top: usize,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Convert between JSON and XML comment files
    Convert {
        /// Source file (.json or .xml)
        input: PathBuf,

        /// Destination file (.json or .xml)
        output: PathBuf,

        /// Leave blocked comments out
        #[arg(long)]
        exclude_blocked: bool,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Show the effective engine configuration
    Config {
        /// Print the built-in defaults instead of the loaded file
        #[arg(long)]
        defaults: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReplayOutput {
    /// One JSON snapshot per tick
    Json,
    /// Totals once the replay finishes
    Summary,
}

/// A scripted seek: when playback reaches `at`, jump to `to`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekEvent {
    pub at: f64,
    pub to: f64,
}

impl FromStr for SeekEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (at, to) = s
            .split_once('=')
            .ok_or_else(|| format!("expected AT=TO, got {s:?}"))?;
        let parse = |value: &str| {
            value
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| format!("invalid time {value:?}"))
        };
        Ok(Self {
            at: parse(at)?,
            to: parse(to)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_are_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_seek_event() {
        assert_eq!(
            "12.5=3".parse::<SeekEvent>(),
            Ok(SeekEvent { at: 12.5, to: 3.0 })
        );
        assert!("12.5".parse::<SeekEvent>().is_err());
        assert!("x=1".parse::<SeekEvent>().is_err());
        assert!("1=inf".parse::<SeekEvent>().is_err());
    }

    #[test]
    fn test_parse_replay() {
        let args = Args::parse_from([
            "danmaku", "replay", "in.xml", "--to", "30", "--seek", "10=2", "--seek", "20=25",
            "-o", "json",
        ]);
        match args.command {
            Commands::Replay {
                to, seeks, output, ..
            } => {
                assert_eq!(to, Some(30.0));
                assert_eq!(seeks.len(), 2);
                assert_eq!(output, ReplayOutput::Json);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
