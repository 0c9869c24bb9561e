use std::fmt;

/// Health of a proxy as tracked by the proxy pool
///
/// `Banned` is terminal: a banned proxy is never offered again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyState {
    /// Eligible for selection
    Active,

    /// Failed recently; excluded until its cooldown window has passed
    Cooling,

    /// Rejected by the origin as automated traffic; never reused
    Banned,
}

impl ProxyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Cooling => "cooling",
            Self::Banned => "banned",
        }
    }
}

impl fmt::Display for ProxyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
