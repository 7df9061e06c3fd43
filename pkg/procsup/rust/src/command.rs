// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::attributes::ProcessAttributes;
use nix::sys::signal::Signal;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Grace period used by stop and restart requests that do not carry one.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// A lifecycle request consumed once by the engine loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start(ProcessAttributes),
    Kill {
        id: String,
        prune: bool,
    },
    Stop {
        id: String,
        grace: Duration,
        prune: bool,
    },
    Restart {
        id: String,
        grace: Duration,
    },
    /// `None` is the null signal: an existence check with no effect.
    Signal {
        id: String,
        signal: Option<Signal>,
    },
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Start(attrs) => write!(f, "start(cmd={})", attrs.cmd),
            Command::Kill { id, prune } => write!(f, "kill({id}, prune={prune})"),
            Command::Stop { id, grace, prune } => {
                write!(f, "stop({id}, grace={grace:?}, prune={prune})")
            }
            Command::Restart { id, grace } => write!(f, "restart({id}, grace={grace:?})"),
            Command::Signal { id, signal } => {
                write!(f, "signal({id}, {})", signal_name(*signal))
            }
        }
    }
}

/// Map a symbolic name such as `TERM`, `sigusr1` or `SIGHUP` to a signal.
/// Unknown names yield `None`, the null signal.
pub fn parse_signal(name: &str) -> Option<Signal> {
    let upper = name.trim().to_ascii_uppercase();
    let bare = upper.strip_prefix("SIG").unwrap_or(&upper);
    match bare {
        "" => None,
        "IOT" => Some(Signal::SIGABRT),
        _ => Signal::from_str(&format!("SIG{bare}")).ok(),
    }
}

pub fn signal_name(signal: Option<Signal>) -> &'static str {
    signal.map_or("SIG0", Signal::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_signal_names() {
        assert_eq!(parse_signal("TERM"), Some(Signal::SIGTERM));
        assert_eq!(parse_signal("kill"), Some(Signal::SIGKILL));
        assert_eq!(parse_signal("SIGHUP"), Some(Signal::SIGHUP));
        assert_eq!(parse_signal(" usr1 "), Some(Signal::SIGUSR1));
        assert_eq!(parse_signal("IOT"), Some(Signal::SIGABRT));
    }

    #[test]
    fn test_parse_signal_unknown_is_null() {
        assert_eq!(parse_signal("BOGUS"), None);
        assert_eq!(parse_signal(""), None);
        assert_eq!(parse_signal("SIG"), None);
    }

    #[test]
    fn test_display() {
        let cmd = Command::Signal {
            id: "abc".into(),
            signal: None,
        };
        assert_eq!(cmd.to_string(), "signal(abc, SIG0)");
        let cmd = Command::Signal {
            id: "abc".into(),
            signal: Some(Signal::SIGUSR2),
        };
        assert_eq!(cmd.to_string(), "signal(abc, SIGUSR2)");
    }
}
