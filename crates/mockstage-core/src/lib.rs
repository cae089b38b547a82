//! Interview engine: session store, prompt construction, streamed turn
//! orchestration and evaluation parsing. Everything here is transport
//! agnostic; the HTTP layer lives in `mockstage-server`.

pub mod engine;
pub mod evaluation;
pub mod prompt;
pub mod store;

pub use engine::{DefaultProviderFactory, InterviewEngine, ProviderFactory, TurnStream};
pub use prompt::{INTERVIEW_COMPLETE, OPENING_MESSAGE};
pub use store::{SessionStore, TurnGuard};
