use std::fmt;

/// The two actuators the gateway drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActuatorKind {
    Gate,
    Garage,
}

impl ActuatorKind {
    pub const ALL: [ActuatorKind; 2] = [ActuatorKind::Gate, ActuatorKind::Garage];

    /// Name used on the wire and in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gate => "gate",
            Self::Garage => "garage",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "gate" => Some(Self::Gate),
            "garage" => Some(Self::Garage),
            _ => None,
        }
    }
}

impl fmt::Display for ActuatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a command sent to a bot.
///
/// Everything except [`BotStatus::WriteError`] and [`BotStatus::Timeout`]
/// is reported by the peripheral itself through a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotStatus {
    /// The command never reached the peripheral
    WriteError,
    Ok,
    Error,
    Busy,
    VersionIncompatible,
    UnsupportedCommand,
    LowBattery,
    DeviceEncrypted,
    DeviceUnencrypted,
    PasswordError,
    UnsupportedEncryption,
    NoNearbyDevice,
    NoNetwork,
    /// The write succeeded but no notification arrived in time
    Timeout,
}

/// What a client sees for a command result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAnswer {
    Ok,
    Busy,
    Low,
    Error,
}

impl ClientAnswer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Busy => "busy",
            Self::Low => "low",
            Self::Error => "error",
        }
    }
}

impl From<BotStatus> for ClientAnswer {
    fn from(status: BotStatus) -> Self {
        match status {
            BotStatus::Ok => Self::Ok,
            BotStatus::Busy => Self::Busy,
            BotStatus::LowBattery => Self::Low,
            _ => Self::Error,
        }
    }
}

impl fmt::Display for ClientAnswer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which actuators a session may control, fixed by the endpoint it came in on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entitlement {
    GateOnly,
    GateAndGarage,
}

impl Entitlement {
    pub fn actuators(&self) -> &'static [ActuatorKind] {
        match self {
            Self::GateOnly => &[ActuatorKind::Gate],
            Self::GateAndGarage => &ActuatorKind::ALL,
        }
    }

    pub fn allows(&self, kind: ActuatorKind) -> bool {
        self.actuators().contains(&kind)
    }
}

/// Coarse lifecycle phase of a link, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    Closed,
    Connecting,
    Discovering,
    Ready,
}

impl fmt::Display for LinkPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Connecting => "connecting",
            Self::Discovering => "discovering",
            Self::Ready => "ready",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSnapshot {
    pub phase: LinkPhase,
    pub ref_count: usize,
    pub close_pending: bool,
}
