use clap::{ArgAction, Parser};
use std::path::PathBuf;

pub mod args;
pub mod handlers;
pub mod prompt;

/// fassembler: assembles site builds from configuration-driven projects.
///
/// Positional arguments are project names (or the pseudo-projects `all` and
/// `missing`) and setting assignments: `VAR=VALUE` (DEFAULT section),
/// `section.VAR=VALUE` or `[section]VAR=VALUE`.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    styles = clap::builder::Styles::styled()
        .header(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .usage(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .literal(clap::builder::styling::AnsiColor::Cyan.on_default().bold())
        .placeholder(clap::builder::styling::AnsiColor::Green.on_default()),
)]
#[command(disable_help_subcommand = true)]
pub struct Cli {
    /// The base directory of the build (default: discovered from etc/build.ini).
    #[arg(short = 'b', long = "base", value_name = "DIR")]
    pub base: Option<String>,

    /// Extra configuration files, read after etc/build.ini. May be repeated.
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Vec<PathBuf>,

    /// Show what would happen without changing anything.
    #[arg(short = 'n', long = "simulate")]
    pub simulate: bool,

    /// Never prompt; unresolvable conflicts and failures end the run.
    #[arg(long = "no-interactive")]
    pub no_interactive: bool,

    /// Skip updates of existing checkouts.
    #[arg(long)]
    pub quick: bool,

    /// Describe the tasks of the given projects instead of running them.
    #[arg(short = 'H', long = "project-help")]
    pub project_help: bool,

    /// List the available projects.
    #[arg(long = "list-projects")]
    pub list_projects: bool,

    /// Print the project list as JSON.
    #[arg(long, requires = "list_projects")]
    pub json: bool,

    /// Additional directories of project definition files. May be repeated.
    #[arg(long = "projects-dir", value_name = "DIR")]
    pub projects_dir: Vec<PathBuf>,

    /// More output (repeat for more).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Less output (repeat for less).
    #[arg(short, long, action = ArgAction::Count)]
    pub quiet: u8,

    /// Projects to build and VAR=VALUE settings.
    #[arg(value_name = "PROJECT | VAR=VALUE")]
    pub args: Vec<String>,
}

impl Cli {
    /// The log level selected by `-v` and `-q`, starting from `info`.
    pub fn log_filter(&self) -> log::LevelFilter {
        const LEVELS: [log::LevelFilter; 6] = [
            log::LevelFilter::Off,
            log::LevelFilter::Error,
            log::LevelFilter::Warn,
            log::LevelFilter::Info,
            log::LevelFilter::Debug,
            log::LevelFilter::Trace,
        ];
        let level = (3 + usize::from(self.verbose)).saturating_sub(usize::from(self.quiet));
        LEVELS[level.min(LEVELS.len() - 1)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_flags_shift_the_level() {
        let cli = Cli::parse_from(["fassembler", "base"]);
        assert_eq!(cli.log_filter(), log::LevelFilter::Info);
        let cli = Cli::parse_from(["fassembler", "-vv", "base"]);
        assert_eq!(cli.log_filter(), log::LevelFilter::Trace);
        let cli = Cli::parse_from(["fassembler", "-qqqq", "base"]);
        assert_eq!(cli.log_filter(), log::LevelFilter::Off);
    }

    #[test]
    fn test_options_and_positionals() {
        let cli = Cli::parse_from([
            "fassembler",
            "-b",
            "/srv/site",
            "-n",
            "--no-interactive",
            "-c",
            "a.ini",
            "-c",
            "b.ini",
            "base",
            "port=80",
        ]);
        assert_eq!(cli.base.as_deref(), Some("/srv/site"));
        assert!(cli.simulate && cli.no_interactive);
        assert_eq!(cli.config, vec![PathBuf::from("a.ini"), PathBuf::from("b.ini")]);
        assert_eq!(cli.args, vec!["base", "port=80"]);
    }
}
