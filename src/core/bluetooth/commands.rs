//! Scooter command tokens and the dispatcher that forwards them
//! This module validates command requests and hands them to a connected link

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::core::bluetooth::connection::ConnectionSession;
use crate::core::bluetooth::transport::ConnectionTransport;
use crate::core::error::{CoreError, Result};

/// Scooter commands
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandToken {
    /// Drive mode, speed limited (22 km/h)
    ModeDrive,
    /// Sport mode (37 km/h)
    ModeSport,
    /// Request diagnostics
    Diagnostic,
    /// A token added by the vehicle's protocol definition
    Extension(String),
}

impl CommandToken {
    pub const BUILT_IN: [CommandToken; 3] = [Self::ModeDrive, Self::ModeSport, Self::Diagnostic];

    pub fn as_str(&self) -> &str {
        match self {
            Self::ModeDrive => "MODE_DRIVE",
            Self::ModeSport => "MODE_SPORT",
            Self::Diagnostic => "DIAGNOSTIC",
            Self::Extension(name) => name,
        }
    }
}

impl fmt::Display for CommandToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses built-in tokens only. Extensions go through
/// [`CommandDispatcher::resolve`].
impl FromStr for CommandToken {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "MODE_DRIVE" => Ok(Self::ModeDrive),
            "MODE_SPORT" => Ok(Self::ModeSport),
            "DIAGNOSTIC" => Ok(Self::Diagnostic),
            other => Err(CoreError::UnknownCommand(other.to_string())),
        }
    }
}

/// Validates command requests and forwards them to the session's link.
#[derive(Debug, Clone, Default)]
pub struct CommandDispatcher {
    extensions: BTreeSet<String>,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts `extra` token names on top of the built-in set. Names that
    /// collide with a built-in are ignored.
    pub fn with_extensions<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let extensions = extra
            .into_iter()
            .map(|name| name.into().trim().to_string())
            .filter(|name| !name.is_empty() && CommandToken::from_str(name).is_err())
            .collect();
        Self { extensions }
    }

    pub fn resolve(&self, token: &str) -> Result<CommandToken> {
        let token = token.trim();
        match CommandToken::from_str(token) {
            Ok(command) => Ok(command),
            Err(_) if self.extensions.contains(token) => {
                Ok(CommandToken::Extension(token.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Every token this dispatcher accepts.
    pub fn known_tokens(&self) -> Vec<CommandToken> {
        CommandToken::BUILT_IN
            .into_iter()
            .chain(self.extensions.iter().cloned().map(CommandToken::Extension))
            .collect()
    }

    /// Forwards `token` over the session's link. The connection check comes
    /// first, so a disconnected session reports `NotConnected` for any token.
    pub fn dispatch<C: ConnectionTransport>(
        &self,
        session: &ConnectionSession<C::Handle>,
        transport: &C,
        token: &str,
    ) -> Result<CommandToken> {
        let Some(handle) = session.connected_handle() else {
            debug!("Dropping command {token}: not connected");
            return Err(CoreError::NotConnected);
        };
        let command = self.resolve(token)?;

        info!("Sending command to scooter: {command}");
        transport.send(handle, &command).map_err(|e| {
            warn!("Failed to send command {command}: {e}");
            CoreError::TransportError(e.to_string())
        })?;
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_in_tokens_round_trip_through_names() {
        for token in CommandToken::BUILT_IN {
            assert_eq!(CommandToken::from_str(token.as_str()).ok(), Some(token));
        }
    }

    #[test]
    fn unknown_token_is_rejected() {
        let dispatcher = CommandDispatcher::new();
        assert_eq!(
            dispatcher.resolve("MODE_TURBO"),
            Err(CoreError::UnknownCommand("MODE_TURBO".into()))
        );
        assert!(dispatcher.resolve("mode_sport").is_err());
    }

    #[test]
    fn extensions_are_accepted() {
        let dispatcher = CommandDispatcher::with_extensions(["LIGHTS_ON", "MODE_SPORT", " "]);
        assert_eq!(
            dispatcher.resolve("LIGHTS_ON"),
            Ok(CommandToken::Extension("LIGHTS_ON".into()))
        );
        assert_eq!(dispatcher.resolve("MODE_SPORT"), Ok(CommandToken::ModeSport));
        assert_eq!(dispatcher.known_tokens().len(), 4);
    }
}
