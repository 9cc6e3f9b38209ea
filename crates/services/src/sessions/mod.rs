mod answers;
mod machine;
mod sampler;

// Public API of the session subsystem.
pub use answers::{AnswerOutcome, AnswerSubmissionHandler, AnswerValidation};
pub use machine::{MAX_SESSION_PAGE, QuizSessionMachine, SessionRange};
pub use sampler::QuestionSampler;
