// CLASSIFICATION: COMMUNITY
// Filename: policy.rs v0.5
// Author: Lukas Bower
// Date Modified: 2026-03-18

//! Per-command dispatch table. Each nw command supplies a publish
//! predicate over the owning session's state plus a completion action;
//! the engine stays generic and the command semantics live here.

use crate::cmd::NwCmd;
use crate::sref::SessionState;

/// What the engine does when a command's request completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionAction {
    None,
    /// LOAD: flip the session ACTIVE on success, tear the reference down
    /// on failure.
    ActivateOnSuccess,
    /// UNLOAD: once this is the session's last reference, mark INVALID and
    /// drop the reference regardless of the unload's own result.
    TeardownIfLast,
    /// STREAMOFF: hold completion until this is the last in-flight
    /// reference, then declare the session INACTIVE.
    StopWhenLast,
    /// CLEAR_CB: suppress the callbacks of the session's other requests.
    ClearCallbacks,
}

#[derive(Clone, Copy)]
pub struct CmdPolicy {
    /// Request must be linked to a registered session.
    pub session_linked: bool,
    /// Handled entirely inside the driver; never published to firmware.
    pub local_only: bool,
    /// May the request leave REQUESTED for the mailbox right now?
    pub can_publish: fn(Option<SessionState>) -> bool,
    pub on_complete: CompletionAction,
}

fn publish_always(_: Option<SessionState>) -> bool {
    true
}

fn publish_when_inactive(s: Option<SessionState>) -> bool {
    s == Some(SessionState::Inactive)
}

fn publish_when_active(s: Option<SessionState>) -> bool {
    s == Some(SessionState::Active)
}

fn publish_when_active_or_stopping(s: Option<SessionState>) -> bool {
    matches!(s, Some(SessionState::Active) | Some(SessionState::Stopping))
}

fn publish_never(_: Option<SessionState>) -> bool {
    false
}

/// Dispatch entry for `cmd`.
pub fn policy(cmd: NwCmd) -> CmdPolicy {
    match cmd {
        NwCmd::Load => CmdPolicy {
            session_linked: true,
            local_only: false,
            can_publish: publish_always,
            on_complete: CompletionAction::ActivateOnSuccess,
        },
        NwCmd::Unload => CmdPolicy {
            session_linked: true,
            local_only: false,
            can_publish: publish_when_inactive,
            on_complete: CompletionAction::TeardownIfLast,
        },
        NwCmd::Streamon => CmdPolicy {
            session_linked: true,
            local_only: false,
            can_publish: publish_when_active,
            on_complete: CompletionAction::None,
        },
        NwCmd::Streamoff => CmdPolicy {
            session_linked: true,
            local_only: false,
            can_publish: publish_when_active_or_stopping,
            on_complete: CompletionAction::StopWhenLast,
        },
        NwCmd::ClearCb => CmdPolicy {
            session_linked: true,
            local_only: true,
            can_publish: publish_never,
            on_complete: CompletionAction::ClearCallbacks,
        },
        // Session-independent control commands go straight to hardware.
        NwCmd::PowerCtl
        | NwCmd::ProfileStart
        | NwCmd::ProfileStop
        | NwCmd::FwTcExecute
        | NwCmd::CoreCtl
        | NwCmd::Mode
        | NwCmd::ImbSize => CmdPolicy {
            session_linked: false,
            local_only: false,
            can_publish: publish_always,
            on_complete: CompletionAction::None,
        },
    }
}
