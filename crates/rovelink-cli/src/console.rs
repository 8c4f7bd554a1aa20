//! Console input parsing and execution.
//!
//! One line is one command. Device actions use their wire names
//! (`forward`, `emgStop`, `joint3 120`, ...); anything else goes through
//! `send <action> [value]` or `msg <json>`.

use std::str::FromStr;

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, warn};

use rovelink_core::InboundMessage;
use rovelink_core::protocol::DeviceAction;
use rovelink_session::ConnectionManager;

/// A parsed console line.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    /// A known device action.
    Action {
        action: DeviceAction,
        value: Option<f64>,
    },
    /// An arbitrary action name, sent as-is.
    Send { action: String, value: Option<f64> },
    /// A custom-envelope payload.
    Message(Value),
    Connect,
    Disconnect,
    Status,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unknown command: {0} (try `help`)")]
    UnknownCommand(String),

    #[error("{0} needs a value")]
    MissingValue(String),

    #[error("invalid number: {0}")]
    InvalidNumber(String),

    #[error("invalid JSON payload: {0}")]
    InvalidJson(String),

    #[error("unexpected argument: {0}")]
    UnexpectedArgument(String),
}

pub const HELP: &str = "\
drive:    forward | backward | left | right | stop | emgStop | resume
arm:      joint1..joint6 <angle> | getArmPosition | armEmgStop | armResume
auto:     startAutoMode | stopAutoMode
raw:      send <action> [value] | msg <json>
session:  connect | disconnect | status | help | quit";

/// Parse one input line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Option<Result<ConsoleCommand, ParseError>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let (head, rest) = line
        .split_once(char::is_whitespace)
        .map_or((line, ""), |(h, r)| (h, r.trim()));
    Some(parse_parts(head, rest))
}

fn parse_parts(head: &str, rest: &str) -> Result<ConsoleCommand, ParseError> {
    let bare = |command: ConsoleCommand| {
        if rest.is_empty() {
            Ok(command)
        } else {
            Err(ParseError::UnexpectedArgument(rest.to_string()))
        }
    };

    match head {
        "connect" => bare(ConsoleCommand::Connect),
        "disconnect" => bare(ConsoleCommand::Disconnect),
        "status" => bare(ConsoleCommand::Status),
        "help" | "?" => bare(ConsoleCommand::Help),
        "quit" | "exit" => bare(ConsoleCommand::Quit),
        "msg" => serde_json::from_str(rest)
            .map(ConsoleCommand::Message)
            .map_err(|e| ParseError::InvalidJson(e.to_string())),
        "send" => {
            let mut parts = rest.split_whitespace();
            let action = parts
                .next()
                .ok_or_else(|| ParseError::MissingValue("send".to_string()))?;
            let value = parts.next().map(parse_number).transpose()?;
            if let Some(extra) = parts.next() {
                return Err(ParseError::UnexpectedArgument(extra.to_string()));
            }
            Ok(ConsoleCommand::Send {
                action: action.to_string(),
                value,
            })
        }
        other => {
            let action = DeviceAction::from_str(other)
                .map_err(|_| ParseError::UnknownCommand(other.to_string()))?;
            if action.takes_value() {
                if rest.is_empty() {
                    return Err(ParseError::MissingValue(other.to_string()));
                }
                let value = parse_number(rest)?;
                Ok(ConsoleCommand::Action {
                    action,
                    value: Some(value),
                })
            } else {
                bare(ConsoleCommand::Action {
                    action,
                    value: None,
                })
            }
        }
    }
}

fn parse_number(raw: &str) -> Result<f64, ParseError> {
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ParseError::InvalidNumber(raw.to_string()))
}

/// Whether the console keeps reading after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Execute one command against the manager.
#[allow(clippy::print_stdout)]
pub async fn execute(manager: &ConnectionManager, command: ConsoleCommand) -> Flow {
    match command {
        ConsoleCommand::Action { action, value } => {
            report_send(&action.to_string(), manager.send_action(action, value));
        }
        ConsoleCommand::Send { action, value } => {
            report_send(&action, manager.send_command(&action, value));
        }
        ConsoleCommand::Message(payload) => {
            report_send("custom message", manager.send_message(payload));
        }
        ConsoleCommand::Connect => match manager.connect().await {
            Ok(()) => debug!("Connect completed"),
            Err(e) => println!("connect failed: {e}"),
        },
        ConsoleCommand::Disconnect => manager.disconnect(),
        ConsoleCommand::Status => {
            let status = manager.status();
            println!("{} ({})", status.state, status.endpoint);
        }
        ConsoleCommand::Help => println!("{HELP}"),
        ConsoleCommand::Quit => return Flow::Quit,
    }
    Flow::Continue
}

#[allow(clippy::print_stdout)]
fn report_send(what: &str, sent: bool) {
    if !sent {
        println!("not connected: {what} dropped");
    }
}

/// Read commands until end of input or `quit`.
#[allow(clippy::print_stdout)]
pub async fn run<R>(manager: &ConnectionManager, input: R) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        match parse_line(&line) {
            None => {}
            Some(Ok(command)) => {
                if execute(manager, command).await == Flow::Quit {
                    break;
                }
            }
            Some(Err(e)) => {
                warn!(input = %line, error = %e, "Rejected console input");
                println!("{e}");
            }
        }
    }
    Ok(())
}

/// Print a connection state change.
#[allow(clippy::print_stdout)]
pub fn print_state(connected: bool) {
    if connected {
        println!("[connected]");
    } else {
        println!("[disconnected]");
    }
}

/// Print an inbound device frame.
#[allow(clippy::print_stdout)]
pub fn print_message(message: &InboundMessage) {
    match message.message_type() {
        Some("error") => println!(
            "[device error] {}",
            message.error_message().unwrap_or("(no message)")
        ),
        Some(kind) => println!("[{kind}] {message}"),
        None => println!("{message}"),
    }
}
