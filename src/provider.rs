pub mod classify;
pub mod detect;
pub mod fallback;
pub mod invocation;
pub mod output_parse;
pub mod process;
pub mod runner;
pub mod types;

pub use classify::{classify_outcome, match_signature, RecoverableKind};
pub use detect::{locate_executable, CliDetector};
pub use fallback::{
    execute_with_fallback, plan_models, rotate_chain, FallbackCursor, FallbackFailure,
    FallbackPlan, FallbackSuccess,
};
pub use invocation::build_invocation;
pub use output_parse::{parse_event_stream, ParsedEvents};
pub use process::{
    spawn_process, CapturedOutput, ChildProcess, ProcessHandle, ProcessOutcome, Signal,
    SignalSender, SpawnRequest, SystemSignaler, DEFAULT_OUTPUT_CAP_BYTES,
};
pub use runner::{effective_timeout, run_attempt, spawn_attempt, AttemptConfig};
pub use types::{CliAvailability, ExecError, InvocationSpec, ProviderKind};
