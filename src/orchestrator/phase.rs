/// Phase of a deployment run.
///
/// Runs move strictly forward through the list below; `Failed` may be
/// entered from any phase and `Terminated` only through cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeployPhase {
    /// Nothing submitted yet.
    Idle,
    Submitted,
    Fulfilling,
    Fulfilled,
    SshWait,
    Bootstrapping,
    Ready,
    WorkDispatched,
    Terminated,
    Failed,
}

impl DeployPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Submitted => "submitted",
            Self::Fulfilling => "fulfilling",
            Self::Fulfilled => "fulfilled",
            Self::SshWait => "ssh_wait",
            Self::Bootstrapping => "bootstrapping",
            Self::Ready => "ready",
            Self::WorkDispatched => "work_dispatched",
            Self::Terminated => "terminated",
            Self::Failed => "failed",
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Self::Terminated | Self::Failed)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_advance_to(&self, next: DeployPhase) -> bool {
        match next {
            Self::Failed => !self.is_final(),
            Self::Terminated => *self != Self::Terminated,
            Self::Idle => false,
            _ => !self.is_final() && next > *self,
        }
    }
}

impl std::fmt::Display for DeployPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_only() {
        assert!(DeployPhase::Idle.can_advance_to(DeployPhase::Submitted));
        assert!(DeployPhase::Fulfilled.can_advance_to(DeployPhase::SshWait));
        assert!(!DeployPhase::Ready.can_advance_to(DeployPhase::SshWait));
        assert!(!DeployPhase::Ready.can_advance_to(DeployPhase::Idle));
    }

    #[test]
    fn test_final_phases() {
        assert!(DeployPhase::Bootstrapping.can_advance_to(DeployPhase::Failed));
        assert!(!DeployPhase::Failed.can_advance_to(DeployPhase::Ready));
        assert!(!DeployPhase::Failed.can_advance_to(DeployPhase::Failed));
        assert!(DeployPhase::WorkDispatched.can_advance_to(DeployPhase::Terminated));
        assert!(DeployPhase::Failed.can_advance_to(DeployPhase::Terminated));
        assert!(!DeployPhase::Terminated.can_advance_to(DeployPhase::Terminated));
    }

    #[test]
    fn test_display() {
        assert_eq!(DeployPhase::WorkDispatched.to_string(), "work_dispatched");
        assert_eq!(DeployPhase::SshWait.to_string(), "ssh_wait");
    }
}
