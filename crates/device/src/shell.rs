//! Line commands of the simulator shell

use thiserror::Error;

/// One user action entered at the simulator prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellCommand {
    Power,
    Start,
    Pause,
    Resume,
    Stop,
    /// Put the electrodes on
    Contact,
    /// Take the electrodes off
    Disconnect,
    Charge,
    Status,
    Sessions,
    /// Upload a logged session, by zero-based history index
    Upload { index: usize },
    Wave { site: usize },
    DateTime,
    Help,
    Quit,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Unknown command '{0}', type 'help' for a list")]
    UnknownCommand(String),
    #[error("'{command}' needs a {what}")]
    MissingArgument {
        command: &'static str,
        what: &'static str,
    },
    #[error("Invalid number '{0}'")]
    InvalidNumber(String),
}

pub const HELP: &str = "\
power          toggle power
start          begin a session
pause          pause the session
resume         resume the session
stop           stop the session
contact        put the electrodes on
disconnect     take the electrodes off
charge         charge the battery to full
status         show device state
sessions       list logged sessions
upload <n>     upload session #n to the PC
wave <site>    show a site's waveform
datetime       date and time menu
quit           exit";

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<ShellCommand>, ParseError> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "power" | "p" => ShellCommand::Power,
        "start" | "begin" => ShellCommand::Start,
        "pause" => ShellCommand::Pause,
        "resume" => ShellCommand::Resume,
        "stop" => ShellCommand::Stop,
        "contact" => ShellCommand::Contact,
        "disconnect" => ShellCommand::Disconnect,
        "charge" => ShellCommand::Charge,
        "status" | "s" => ShellCommand::Status,
        "sessions" | "log" => ShellCommand::Sessions,
        "upload" => {
            // Sessions are numbered from 1 on screen
            let number = number_arg(words.next(), "upload", "session number")?;
            let index = number
                .checked_sub(1)
                .ok_or_else(|| ParseError::InvalidNumber(number.to_string()))?;
            ShellCommand::Upload { index }
        }
        "wave" => ShellCommand::Wave {
            site: number_arg(words.next(), "wave", "site index")?,
        },
        "datetime" => ShellCommand::DateTime,
        "help" | "?" => ShellCommand::Help,
        "quit" | "exit" | "q" => ShellCommand::Quit,
        other => return Err(ParseError::UnknownCommand(other.to_string())),
    };
    Ok(Some(command))
}

fn number_arg(
    word: Option<&str>,
    command: &'static str,
    what: &'static str,
) -> Result<usize, ParseError> {
    let word = word.ok_or(ParseError::MissingArgument { command, what })?;
    word.parse()
        .map_err(|_| ParseError::InvalidNumber(word.to_string()))
}
