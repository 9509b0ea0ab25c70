//! Line-oriented control commands.
//!
//! The settings UI and the render surface drive the engine by writing one
//! command per line to the process's stdin:
//!
//! ```text
//! increase-sensitivity | decrease-sensitivity | reset-sensitivity
//! remove <device-id>   | clear-disconnected  | list
//! renderer-ready       | reset-config        | quit
//! ```

use std::str::FromStr;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::device::DeviceId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    IncreaseSensitivity,
    DecreaseSensitivity,
    ResetSensitivity,
    Remove(DeviceId),
    ClearDisconnected,
    List,
    RendererReady,
    ResetConfig,
    Quit,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    #[error("unknown command `{0}`")]
    Unknown(String),
    #[error("`{0}` requires an argument")]
    MissingArgument(&'static str),
    #[error("`{0}` takes no argument")]
    UnexpectedArgument(&'static str),
}

impl FromStr for ControlCommand {
    type Err = ControlError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words.next().unwrap_or_default().to_ascii_lowercase();
        let arg = words.next();

        let bare = |cmd: ControlCommand, name: &'static str| match arg {
            None => Ok(cmd),
            Some(_) => Err(ControlError::UnexpectedArgument(name)),
        };

        match verb.as_str() {
            "increase-sensitivity" => bare(Self::IncreaseSensitivity, "increase-sensitivity"),
            "decrease-sensitivity" => bare(Self::DecreaseSensitivity, "decrease-sensitivity"),
            "reset-sensitivity" => bare(Self::ResetSensitivity, "reset-sensitivity"),
            "remove" => arg
                .map(|id| Self::Remove(DeviceId::from(id)))
                .ok_or(ControlError::MissingArgument("remove")),
            "clear-disconnected" => bare(Self::ClearDisconnected, "clear-disconnected"),
            "list" => bare(Self::List, "list"),
            "renderer-ready" => bare(Self::RendererReady, "renderer-ready"),
            "reset-config" => bare(Self::ResetConfig, "reset-config"),
            "quit" | "exit" => bare(Self::Quit, "quit"),
            other => Err(ControlError::Unknown(other.to_owned())),
        }
    }
}

/// Reads commands from stdin until EOF, handing each parsed command to
/// `sink`. Blank lines are skipped; bad lines are logged and skipped.
pub async fn read_stdin(sink: impl Fn(ControlCommand)) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => match line.parse::<ControlCommand>() {
                Ok(cmd) => {
                    log::debug!("control: {cmd:?}");
                    sink(cmd);
                }
                Err(e) => log::warn!("control: {e}"),
            },
            Ok(None) => {
                log::debug!("control: stdin closed");
                break;
            }
            Err(e) => {
                log::warn!("control: stdin read failed: {e}");
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_commands() {
        let parse = |s: &str| s.parse::<ControlCommand>();
        assert_eq!(parse("increase-sensitivity"), Ok(ControlCommand::IncreaseSensitivity));
        assert_eq!(parse("  Decrease-Sensitivity "), Ok(ControlCommand::DecreaseSensitivity));
        assert_eq!(parse("renderer-ready"), Ok(ControlCommand::RendererReady));
        assert_eq!(parse("exit"), Ok(ControlCommand::Quit));
    }

    #[test]
    fn remove_takes_a_device_id() {
        assert_eq!(
            "remove device_65539".parse::<ControlCommand>(),
            Ok(ControlCommand::Remove(DeviceId::from("device_65539")))
        );
        assert_eq!(
            "remove".parse::<ControlCommand>(),
            Err(ControlError::MissingArgument("remove"))
        );
    }

    #[test]
    fn rejects_unknown_and_extra_arguments() {
        assert_eq!(
            "jump".parse::<ControlCommand>(),
            Err(ControlError::Unknown("jump".into()))
        );
        assert_eq!(
            "list all".parse::<ControlCommand>(),
            Err(ControlError::UnexpectedArgument("list"))
        );
    }
}
