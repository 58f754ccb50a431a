use serde::Deserialize;
use serde::Serialize;

/// The enabled subset of high-impact tool classes for one turn. Generator and
/// reader tools are always available and are deliberately not part of this
/// set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    #[serde(default)]
    pub shell: bool,
    #[serde(default)]
    pub write: bool,
    #[serde(default)]
    pub browser: bool,
    #[serde(default)]
    pub dangerous: bool,
}

impl CapabilitySet {
    pub const fn none() -> Self {
        Self {
            shell: false,
            write: false,
            browser: false,
            dangerous: false,
        }
    }

    pub const fn all() -> Self {
        Self {
            shell: true,
            write: true,
            browser: true,
            dangerous: true,
        }
    }

    /// Bit-wise intersection; the effective set of a turn is always an
    /// intersection of the requested set with one or more ceilings.
    pub fn intersect(self, other: Self) -> Self {
        Self {
            shell: self.shell && other.shell,
            write: self.write && other.write,
            browser: self.browser && other.browser,
            dangerous: self.dangerous && other.dangerous,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.shell || self.write || self.browser || self.dangerous)
    }
}

/// Named capability request shipped with a chat request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityPreset {
    /// No high-impact tools at all.
    #[default]
    Safe,
    /// Workspace writes only.
    Standard,
    /// Shell, writes and browser.
    Power,
    /// Explicit per-capability toggles from the request body.
    Custom,
}

/// Membership role inside a team. Only owners and admins may enable
/// high-impact capabilities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamRole {
    Owner,
    Admin,
    #[default]
    Member,
}

impl TeamRole {
    pub fn can_enable_dangerous(&self) -> bool {
        matches!(self, TeamRole::Owner | TeamRole::Admin)
    }
}

impl std::str::FromStr for TeamRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(TeamRole::Owner),
            "admin" => Ok(TeamRole::Admin),
            "member" => Ok(TeamRole::Member),
            other => Err(format!("unknown team role: {other}")),
        }
    }
}

impl std::fmt::Display for TeamRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TeamRole::Owner => "owner",
            TeamRole::Admin => "admin",
            TeamRole::Member => "member",
        };
        f.write_str(s)
    }
}

/// Outcome of the capability derivation for one turn. Both the requested and
/// the effective sets are reported in the `security_profile` event so the
/// trace shows exactly what was silently cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityProfile {
    pub preset: SecurityPreset,
    pub requested: CapabilitySet,
    pub effective: CapabilitySet,
}
