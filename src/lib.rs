// CLASSIFICATION: COMMUNITY
// Filename: lib.rs v1.0
// Author: Lukas Bower
// Date Modified: 2026-04-20

//! NPU protocol driver: the mailbox request-lifecycle engine.
//!
//! User-space sessions submit network-management commands (load, unload,
//! stream control) and inference frames; the engine moves each request
//! through FREE -> REQUESTED -> PROCESSING -> COMPLETED (or the STUCKED
//! quarantine after a hardware timeout), publishes to the firmware mailbox,
//! and delivers results through per-request callbacks. A dedicated polling
//! thread drives the engine; producers only enqueue and ring the doorbell.

/// Firmware-facing command identifiers and result-code namespaces.
pub mod cmd;

/// Pool sizes, per-state deadlines, poller tuning.
pub mod config;

/// Driver lifecycle glue (open/close with init-step unwind).
pub mod drv;

/// The request-lifecycle state engine.
pub mod engine;

/// Fault-diagnostic hooks and dump rate limiting.
pub mod fault;

/// List-state-machine container underlying the request pools.
pub mod lsm;

/// Mailbox transport seam (trait + loopback implementation).
pub mod mailbox;

/// Per-command publish predicates and completion actions.
pub mod policy;

/// Request envelopes, id generation, timestamp history.
pub mod req;

/// Session-facing submission queues and completion callbacks.
pub mod session;

/// Session reference tracker.
pub mod sref;

/// Auto-sleep polling thread and doorbell.
pub mod poller;

pub use cmd::{DriverErr, FrameCmd, NwCmd, ResultCode};
pub use config::{ProtoConfig, TimeoutConfig};
pub use drv::{InitSteps, OpenError, ProtocolDriver};
pub use engine::{Engine, PassStats};
pub use fault::{FaultInspector, LogInspector};
pub use mailbox::{FrameMboxMsg, LoopbackMailbox, MailboxTransport, MboxResult, NwMboxMsg};
pub use req::{ReqId, ReqState, Uid, REQ_ID_INVALID};
pub use session::{CompletionNotice, FrameRequest, NwRequest, SubmitQueues};
pub use sref::{SessionSnapshot, SessionState};
