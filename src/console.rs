use std::fmt;

use crate::device::types::ScaleUpdate;

pub const HELP: &str = "commands: scan [n], stop [n], remind <n>, status, help, quit";

/// A line typed by the operator. Scale numbers are 1-based on the console and converted to
/// indexes here; `None` means every scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Scan(Option<usize>),
    Stop(Option<usize>),
    Remind(usize),
    Status,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleError {
    Empty,
    Unknown(String),
    MissingScale(&'static str),
    BadScale(String),
}

impl fmt::Display for ConsoleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsoleError::Empty => write!(f, "{}", HELP),
            ConsoleError::Unknown(word) => write!(f, "unknown command {:?}; {}", word, HELP),
            ConsoleError::MissingScale(command) => write!(f, "{} needs a scale number", command),
            ConsoleError::BadScale(token) => write!(f, "no scale {:?}", token),
        }
    }
}

fn scale_index(token: &str, scale_count: usize) -> Result<usize, ConsoleError> {
    match token.parse::<usize>() {
        Ok(number) if number >= 1 && number <= scale_count => Ok(number - 1),
        _ => Err(ConsoleError::BadScale(token.to_string())),
    }
}

pub fn parse_command(line: &str, scale_count: usize) -> Result<ConsoleCommand, ConsoleError> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Err(ConsoleError::Empty);
    };
    let scale = words.next().map(|token| scale_index(token, scale_count)).transpose()?;

    match command.to_ascii_lowercase().as_str() {
        "scan" | "start" => Ok(ConsoleCommand::Scan(scale)),
        "stop" => Ok(ConsoleCommand::Stop(scale)),
        "remind" => scale.map(ConsoleCommand::Remind).ok_or(ConsoleError::MissingScale("remind")),
        "status" => Ok(ConsoleCommand::Status),
        "help" | "?" => Ok(ConsoleCommand::Help),
        "quit" | "exit" => Ok(ConsoleCommand::Quit),
        _ => Err(ConsoleError::Unknown(command.to_string())),
    }
}

pub fn format_update(update: &ScaleUpdate) -> String {
    match update {
        ScaleUpdate::Status(report) => format!("Scale {}: {}", report.index + 1, report.status),
        ScaleUpdate::Notice { text, .. } => format!("* {}", text),
    }
}
