/// Access gate for the execution endpoint.
///
/// The expected credential is read once at startup from the `ALLY_KEY`
/// environment variable and compared for exact equality against the
/// `x-ally-key` header of each request. When the variable is unset or
/// empty the gate fails closed: no credential can ever match.
use tracing::warn;

/// Environment variable holding the shared secret.
pub const ALLY_KEY_VAR: &str = "ALLY_KEY";

#[derive(Debug, Clone)]
pub struct AccessGate {
    expected: Option<String>,
}

impl AccessGate {
    /// Builds a gate from an optional expected credential.
    /// An empty string counts as "not configured".
    pub fn new(expected: Option<String>) -> Self {
        let expected = expected.filter(|key| !key.is_empty());
        if expected.is_none() {
            warn!("{ALLY_KEY_VAR} is not set — all requests will be denied");
        }
        Self { expected }
    }

    /// Reads the credential from the process environment.
    pub fn from_env() -> Self {
        Self::new(std::env::var(ALLY_KEY_VAR).ok())
    }

    /// Returns true iff a credential is configured and `supplied` matches
    /// it exactly. An unset expected credential never matches anything,
    /// including an empty supplied one.
    pub fn verify(&self, supplied: &str) -> bool {
        match &self.expected {
            Some(expected) => supplied == expected,
            None => false,
        }
    }
}
