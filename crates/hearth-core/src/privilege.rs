use std::fmt;

use hearth_utils::system::is_root;

/// Privilege a session operates with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectivePrivilege {
    /// Effective UID is 0.
    Real,
    /// Not root, but asked to behave as if it were. Nothing is written to the
    /// system.
    Faked,
    None,
}

impl EffectivePrivilege {
    pub fn detect(fake_root: bool) -> Self {
        Self::from_parts(is_root(), fake_root)
    }

    pub fn from_parts(running_as_root: bool, fake_root: bool) -> Self {
        match (running_as_root, fake_root) {
            (true, _) => Self::Real,
            (false, true) => Self::Faked,
            (false, false) => Self::None,
        }
    }

    pub fn is_elevated(self) -> bool {
        matches!(self, Self::Real | Self::Faked)
    }

    /// Refreshing writes the system metadata cache, which needs real root.
    pub fn can_refresh(self) -> bool {
        self == Self::Real
    }
}

impl fmt::Display for EffectivePrivilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Real => "root",
            Self::Faked => "fake root",
            Self::None => "unprivileged",
        })
    }
}
