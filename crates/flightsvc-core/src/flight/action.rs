//! Administrative actions accepted by `do_action`.

use super::protocol::{ActionRequest, ActionType};

/// The closed set of actions the broker knows, plus a catch-all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Advertised, but answers with a not-implemented error.
    Clear,
    /// Acknowledge, then stop serving after the grace period.
    Shutdown,
    /// Liveness check; returns no results. Not advertised.
    Healthcheck,
    Unknown(String),
}

impl Action {
    pub const CLEAR: &'static str = "clear";
    pub const SHUTDOWN: &'static str = "shutdown";
    pub const HEALTHCHECK: &'static str = "healthcheck";

    pub fn from_name(name: &str) -> Self {
        match name {
            Self::CLEAR => Action::Clear,
            Self::SHUTDOWN => Action::Shutdown,
            Self::HEALTHCHECK => Action::Healthcheck,
            other => Action::Unknown(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Action::Clear => Self::CLEAR,
            Action::Shutdown => Self::SHUTDOWN,
            Action::Healthcheck => Self::HEALTHCHECK,
            Action::Unknown(name) => name,
        }
    }

    /// Actions reported by `list_actions`, in advertised order.
    pub fn advertised() -> Vec<ActionType> {
        vec![
            ActionType::new(Self::CLEAR, "Clear the stored flights."),
            ActionType::new(Self::SHUTDOWN, "Shut down this server."),
        ]
    }
}

impl From<&ActionRequest> for Action {
    fn from(request: &ActionRequest) -> Self {
        Action::from_name(&request.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name() {
        assert_eq!(Action::from_name("clear"), Action::Clear);
        assert_eq!(Action::from_name("shutdown"), Action::Shutdown);
        assert_eq!(
            Action::from_name("Shutdown"),
            Action::Unknown("Shutdown".to_string())
        );
        assert_eq!(Action::from_name("frobnicate").name(), "frobnicate");
    }

    #[test]
    fn test_advertised_order() {
        let names: Vec<String> = Action::advertised().into_iter().map(|a| a.kind).collect();
        assert_eq!(names, vec!["clear", "shutdown"]);
    }
}
