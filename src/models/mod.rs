pub mod course;
pub mod session;

pub use course::Course;
pub use session::{
    NormalizedSession, OutcomeAction, ReconcileReport, ReconcileSummary, Session, SessionOutcome,
    SessionRecord, SessionRequest,
};
