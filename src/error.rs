/// Errors related to execution-plan validation.
///
/// A plan is validated once, at orchestrator construction. None of these
/// can occur mid-run, so a running pipeline never returns them.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("plan references unknown agent: {0}")]
    UnknownAgent(String),

    #[error("agent appears in more than one wave: {0}")]
    DuplicateAgent(String),

    #[error("registered agent missing from plan: {0}")]
    MissingAgent(String),

    #[error("final agent '{0}' must not appear in a wave; it always runs last, alone")]
    FinalAgentInPlan(String),

    #[error("final agent '{0}' is not registered")]
    FinalAgentNotRegistered(String),

    #[error("duplicate agent registration: {0}")]
    DuplicateRegistration(String),
}
