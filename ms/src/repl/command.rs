//! Slash command parsing

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Comando desconocido: {0}")]
    Unknown(String),

    #[error("{command} necesita {argument}")]
    MissingArgument { command: &'static str, argument: &'static str },

    #[error("{command}: '{value}' no es un número válido")]
    InvalidNumber { command: &'static str, value: String },
}

/// One slash command; section and proposal numbers are 0-based here
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Help,
    Quit,
    New,
    Select(usize),
    Show,
    Toggle(usize),
    Edit,
    Set(usize),
    Done,
    Cancel,
    Save,
    History,
    Open(i64),
    Delete(i64),
    Refine,
    Close,
    Podcast,
    Play,
    Export,
}

impl Command {
    pub fn parse(input: &str) -> Result<Self, CommandError> {
        let mut parts = input.split_whitespace();
        let name = parts.next().unwrap_or("");
        let arg = parts.next();

        let command = match name {
            "/help" | "/h" => Self::Help,
            "/quit" | "/q" | "/exit" => Self::Quit,
            "/new" | "/nuevo" => Self::New,
            "/select" | "/s" => Self::Select(position("/select", "el número de la propuesta", arg)?),
            "/show" => Self::Show,
            "/toggle" | "/t" => Self::Toggle(position("/toggle", "el número de la sección", arg)?),
            "/edit" => Self::Edit,
            "/set" => Self::Set(position("/set", "el número de la sección", arg)?),
            "/done" => Self::Done,
            "/cancel" => Self::Cancel,
            "/save" => Self::Save,
            "/history" => Self::History,
            "/open" => Self::Open(id("/open", arg)?),
            "/delete" => Self::Delete(id("/delete", arg)?),
            "/refine" => Self::Refine,
            "/close" => Self::Close,
            "/podcast" => Self::Podcast,
            "/play" => Self::Play,
            "/export" => Self::Export,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}

/// 1-based number from the user, 0-based index out
fn position(command: &'static str, argument: &'static str, arg: Option<&str>) -> Result<usize, CommandError> {
    let value = arg.ok_or(CommandError::MissingArgument { command, argument })?;
    match value.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n - 1),
        _ => Err(CommandError::InvalidNumber {
            command,
            value: value.to_string(),
        }),
    }
}

fn id(command: &'static str, arg: Option<&str>) -> Result<i64, CommandError> {
    let value = arg.ok_or(CommandError::MissingArgument {
        command,
        argument: "el id del proyecto",
    })?;
    value.parse().map_err(|_| CommandError::InvalidNumber {
        command,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(Command::parse("/help"), Ok(Command::Help));
        assert_eq!(Command::parse("/q"), Ok(Command::Quit));
        assert_eq!(Command::parse("/refine"), Ok(Command::Refine));
        assert_eq!(Command::parse("  /save  "), Ok(Command::Save));
    }

    #[test]
    fn test_parse_positions_are_zero_based() {
        assert_eq!(Command::parse("/select 1"), Ok(Command::Select(0)));
        assert_eq!(Command::parse("/toggle 3"), Ok(Command::Toggle(2)));
        assert_eq!(Command::parse("/set 7"), Ok(Command::Set(6)));
    }

    #[test]
    fn test_parse_rejects_zero_and_garbage() {
        assert!(matches!(Command::parse("/select 0"), Err(CommandError::InvalidNumber { .. })));
        assert!(matches!(Command::parse("/toggle dos"), Err(CommandError::InvalidNumber { .. })));
        assert_eq!(
            Command::parse("/set"),
            Err(CommandError::MissingArgument {
                command: "/set",
                argument: "el número de la sección"
            })
        );
    }

    #[test]
    fn test_parse_ids() {
        assert_eq!(Command::parse("/open 1718000000000"), Ok(Command::Open(1_718_000_000_000)));
        assert!(matches!(Command::parse("/delete"), Err(CommandError::MissingArgument { .. })));
    }

    #[test]
    fn test_parse_unknown() {
        assert_eq!(Command::parse("/bogus"), Err(CommandError::Unknown("/bogus".to_string())));
    }
}
