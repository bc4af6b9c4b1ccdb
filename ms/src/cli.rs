//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// MentorSTEM+ - STEM+ project plan assistant
#[derive(Parser)]
#[command(
    name = "ms",
    about = "Generate, refine, narrate and export STEM+ project plans",
    version,
    after_help = "Logs are written to: ~/.local/share/mentorstem/logs/mentorstem.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Start a new project in the interactive session
    New {
        /// Grade(s), e.g. "5to Grado"
        #[arg(long)]
        grade: Option<String>,

        /// Project topic
        #[arg(long)]
        topic: Option<String>,

        /// Resource option letter (A-F)
        #[arg(long)]
        resources: Option<String>,

        /// Estimated time, e.g. "4 semanas"
        #[arg(long)]
        time: Option<String>,
    },

    /// Manage saved projects
    History {
        #[command(subcommand)]
        command: HistoryCommand,
    },

    /// Open a saved project in the interactive session
    Open {
        /// Project id
        id: i64,
    },

    /// Render a markdown file to HTML
    Render {
        /// Markdown file
        file: PathBuf,
    },

    /// Show the numbered sections of a plan file
    Sections {
        /// Plan file
        file: PathBuf,
    },

    /// Extract proposals from a model response file
    Proposals {
        /// Response file
        file: PathBuf,

        /// Print proposals as JSON
        #[arg(long)]
        json: bool,
    },

    /// Export a saved project as a printable document
    Export {
        /// Project id
        id: i64,

        /// Teacher name(s) for the plan header
        #[arg(long)]
        teacher: String,

        /// School name for the plan header
        #[arg(long)]
        school: String,

        /// Keep remote images as links instead of embedding them
        #[arg(long)]
        no_images: bool,
    },
}

/// History subcommands
#[derive(Subcommand)]
pub enum HistoryCommand {
    /// List saved projects, most recent first
    List,

    /// Print the plan of a saved project
    Show {
        /// Project id
        id: i64,
    },

    /// Delete a saved project
    Delete {
        /// Project id
        id: i64,
    },
}

impl Command {
    /// Whether the command talks to the model
    pub fn needs_llm(&self) -> bool {
        matches!(self, Self::New { .. } | Self::Open { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_no_command() {
        let cli = Cli::parse_from(["ms"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_parse_new_bare() {
        let cli = Cli::parse_from(["ms", "new"]);
        assert!(matches!(
            cli.command,
            Some(Command::New {
                grade: None,
                topic: None,
                resources: None,
                time: None
            })
        ));
    }

    #[test]
    fn test_cli_parse_new_with_form() {
        let cli = Cli::parse_from([
            "ms",
            "new",
            "--grade",
            "5to Grado",
            "--topic",
            "Agua",
            "--resources",
            "b",
            "--time",
            "4 semanas",
        ]);
        if let Some(Command::New {
            grade,
            topic,
            resources,
            time,
        }) = cli.command
        {
            assert_eq!(grade.as_deref(), Some("5to Grado"));
            assert_eq!(topic.as_deref(), Some("Agua"));
            assert_eq!(resources.as_deref(), Some("b"));
            assert_eq!(time.as_deref(), Some("4 semanas"));
        } else {
            panic!("Expected New command");
        }
    }

    #[test]
    fn test_cli_parse_history() {
        let cli = Cli::parse_from(["ms", "history", "list"]);
        assert!(matches!(
            cli.command,
            Some(Command::History {
                command: HistoryCommand::List
            })
        ));

        let cli = Cli::parse_from(["ms", "history", "delete", "42"]);
        assert!(matches!(
            cli.command,
            Some(Command::History {
                command: HistoryCommand::Delete { id: 42 }
            })
        ));
    }

    #[test]
    fn test_cli_parse_export() {
        let cli = Cli::parse_from(["ms", "export", "7", "--teacher", "Ana", "--school", "IE", "--no-images"]);
        if let Some(Command::Export {
            id,
            teacher,
            school,
            no_images,
        }) = cli.command
        {
            assert_eq!(id, 7);
            assert_eq!(teacher, "Ana");
            assert_eq!(school, "IE");
            assert!(no_images);
        } else {
            panic!("Expected Export command");
        }
    }

    #[test]
    fn test_needs_llm() {
        assert!(Cli::parse_from(["ms", "open", "1"]).command.unwrap().needs_llm());
        assert!(!Cli::parse_from(["ms", "render", "plan.md"]).command.unwrap().needs_llm());
    }

    #[test]
    fn test_cli_with_config() {
        let cli = Cli::parse_from(["ms", "-c", "/path/to/config.yml", "history", "list"]);
        assert_eq!(cli.config, Some(PathBuf::from("/path/to/config.yml")));
    }
}
