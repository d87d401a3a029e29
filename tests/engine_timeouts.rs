// CLASSIFICATION: COMMUNITY
// Filename: engine_timeouts.rs v0.4
// Author: Lukas Bower
// Date Modified: 2026-04-22

//! Deadline-overrun scenarios: scheduler-side timeouts recycle the slot,
//! hardware-facing timeouts quarantine it until the late response shows up.
//! Zero-length deadlines make every scan fire deterministically.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use serial_test::serial;

use npu_protodrv::engine::Engine;
use npu_protodrv::fault::{self, LogInspector};
use npu_protodrv::mailbox::{LoopbackMailbox, MboxResult};
use npu_protodrv::session::{CompletionNotice, FrameRequest, NwRequest, SubmitQueues};
use npu_protodrv::{DriverErr, NwCmd, ProtoConfig, ReqState, TimeoutConfig};

fn harness(timeouts: TimeoutConfig, mbox_capacity: usize) -> (Engine, Arc<SubmitQueues>, LoopbackMailbox) {
    let _ = env_logger::builder().is_test(true).try_init();
    let cfg = ProtoConfig { nw_slots: 4, max_sessions: 16, timeouts, ..Default::default() };
    let queues = Arc::new(SubmitQueues::new(cfg.queue_depth));
    let mbox = LoopbackMailbox::new(mbox_capacity);
    let engine =
        Engine::new(cfg, queues.clone(), Box::new(mbox.clone()), Box::new(LogInspector));
    (engine, queues, mbox)
}

fn load_with_channel(
    queues: &SubmitQueues,
) -> mpsc::Receiver<CompletionNotice> {
    let (tx, rx) = mpsc::channel();
    queues
        .submit_nw(NwRequest {
            cmd: NwCmd::Load,
            uid: 7,
            param: 0,
            notify: Some(Box::new(move |n| {
                let _ = tx.send(n);
            })),
        })
        .unwrap();
    rx
}

#[test]
#[serial]
fn requested_timeout_frees_slot_and_session() {
    fault::reset_dump_gate();
    let timeouts = TimeoutConfig {
        nw_requested: Some(Duration::ZERO),
        nw_processing: None,
        frame_requested: None,
        frame_processing: None,
    };
    // Zero-capacity mailbox: publication always comes back busy, so the
    // request sits in REQUESTED until the scan claims it.
    let (mut engine, queues, _mbox) = harness(timeouts, 0);
    let rx = load_with_channel(&queues);

    engine.run_once();
    assert_eq!(engine.nw_count(ReqState::Requested), 1);

    engine.run_once();
    let notice = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(notice.result, DriverErr::SchedTimeout.wire());
    // Never reached hardware: no quarantine, slot straight back to FREE.
    assert_eq!(engine.nw_count(ReqState::Stucked), 0);
    assert_eq!(engine.nw_count(ReqState::Free), 4);
    // The failed LOAD's session reference is gone with it.
    assert_eq!(engine.session_count(), 0);
}

#[test]
#[serial]
fn processing_timeout_quarantines_until_late_response() {
    fault::reset_dump_gate();
    let timeouts = TimeoutConfig {
        nw_requested: None,
        nw_processing: Some(Duration::ZERO),
        frame_requested: None,
        frame_processing: None,
    };
    let (mut engine, queues, mbox) = harness(timeouts, 8);
    let rx = load_with_channel(&queues);

    engine.run_once();
    let msg = mbox.pop_nw().expect("load published");
    assert_eq!(engine.nw_count(ReqState::Processing), 1);

    // Firmware never answers; the scan force-completes and quarantines.
    engine.run_once();
    let notice = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(notice.result, DriverErr::NpuHwTimeout.wire());
    assert_eq!(engine.nw_count(ReqState::Stucked), 1);
    assert_eq!(engine.nw_count(ReqState::Free), 3);

    // The answer finally arrives: discarded, slot released.
    mbox.push_nw_result(MboxResult { id: msg.id, result: 0 });
    engine.run_once();
    assert_eq!(engine.nw_count(ReqState::Stucked), 0);
    assert_eq!(engine.nw_count(ReqState::Free), 4);
}

#[test]
#[serial]
fn frame_requested_timeout_recycles_slot_and_linkage() {
    fault::reset_dump_gate();
    let timeouts = TimeoutConfig {
        nw_requested: None,
        nw_processing: None,
        frame_requested: Some(Duration::ZERO),
        frame_processing: None,
    };
    let (mut engine, queues, mbox) = harness(timeouts, 8);
    // Session registered but never ACTIVE (the LOAD is still at the
    // firmware), so the frame parks in REQUESTED.
    let _load_rx = load_with_channel(&queues);
    engine.run_once();
    let _ = mbox.pop_nw();

    let (tx, rx) = mpsc::channel();
    queues
        .submit_frame(FrameRequest {
            uid: 7,
            frame_id: 3,
            notify: Some(Box::new(move |n| {
                let _ = tx.send(n);
            })),
        })
        .unwrap();
    engine.run_once();
    assert_eq!(engine.frame_count(ReqState::Requested), 1);

    engine.run_once();
    let notice = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(notice.result, DriverErr::SchedTimeout.wire());
    assert!(!notice.cancelled);
    // Never reached hardware: no quarantine, slot straight back to FREE.
    assert_eq!(engine.frame_count(ReqState::Stucked), 0);
    assert_eq!(engine.frame_count(ReqState::Requested), 0);

    // Busy-slot guard and session linkage were both released: the same
    // session can queue another frame immediately.
    queues.submit_frame(FrameRequest { uid: 7, frame_id: 4, notify: None }).unwrap();
    engine.run_once();
    assert_eq!(engine.frame_count(ReqState::Requested), 1);
}

#[test]
#[serial]
fn quarantined_slot_stays_out_of_rotation() {
    fault::reset_dump_gate();
    let timeouts = TimeoutConfig {
        nw_requested: None,
        nw_processing: Some(Duration::ZERO),
        frame_requested: None,
        frame_processing: None,
    };
    let (mut engine, queues, mbox) = harness(timeouts, 8);
    let _rx = load_with_channel(&queues);
    engine.run_once();
    let _ = mbox.pop_nw();
    engine.run_once();
    assert_eq!(engine.nw_count(ReqState::Stucked), 1);

    // With no late response, further passes never free the slot.
    engine.run_once();
    engine.run_once();
    assert_eq!(engine.nw_count(ReqState::Stucked), 1);
    assert_eq!(engine.nw_count(ReqState::Free), 3);
}

#[test]
#[serial]
fn unknown_completion_is_dropped() {
    fault::reset_dump_gate();
    let timeouts = TimeoutConfig {
        nw_requested: None,
        nw_processing: None,
        frame_requested: None,
        frame_processing: None,
    };
    let (mut engine, _queues, mbox) = harness(timeouts, 8);
    mbox.push_nw_result(MboxResult { id: 0xDEAD, result: 0 });
    engine.run_once();
    assert_eq!(engine.nw_count(ReqState::Free), 4);
    assert_eq!(engine.nw_count(ReqState::Completed), 0);
}
