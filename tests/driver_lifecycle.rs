// CLASSIFICATION: COMMUNITY
// Filename: driver_lifecycle.rs v0.4
// Author: Lukas Bower
// Date Modified: 2026-04-22

//! End-to-end driver tests: open a full driver (engine + poller), submit
//! through the public surface, and let the loopback mailbox auto-complete
//! as a compliant firmware would.

use std::sync::mpsc;
use std::time::Duration;

use anyhow::Result;

use npu_protodrv::fault::LogInspector;
use npu_protodrv::session::{CompletionNotice, FrameRequest, NwRequest};
use npu_protodrv::{
    InitSteps, LoopbackMailbox, NwCmd, OpenError, ProtoConfig, ProtocolDriver,
};

fn open_driver() -> Result<(ProtocolDriver, LoopbackMailbox)> {
    let _ = env_logger::builder().is_test(true).try_init();
    let mbox = LoopbackMailbox::new(16);
    mbox.set_auto_complete(0);
    let cfg = ProtoConfig {
        max_sessions: 16,
        poll_interval: Duration::from_millis(5),
        ..Default::default()
    };
    let drv = ProtocolDriver::open(cfg, Box::new(mbox.clone()), Box::new(LogInspector))?;
    Ok((drv, mbox))
}

fn channel_notify() -> (npu_protodrv::session::Notify, mpsc::Receiver<CompletionNotice>) {
    let (tx, rx) = mpsc::channel();
    let notify: npu_protodrv::session::Notify = Box::new(move |n| {
        let _ = tx.send(n);
    });
    (notify, rx)
}

#[test]
fn open_completes_every_init_step() -> Result<()> {
    let (mut drv, _mbox) = open_driver()?;
    assert_eq!(drv.init_steps(), InitSteps::all());
    drv.close();
    Ok(())
}

#[test]
fn bad_config_fails_open_early() {
    let mbox = LoopbackMailbox::new(4);
    let cfg = ProtoConfig { nw_slots: 0, ..Default::default() };
    match ProtocolDriver::open(cfg, Box::new(mbox), Box::new(LogInspector)) {
        Err(OpenError::BadConfig(_)) => {}
        other => panic!("expected BadConfig, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn load_and_frame_complete_through_the_poller() -> Result<()> {
    let (mut drv, _mbox) = open_driver()?;

    let (notify, rx) = channel_notify();
    drv.submit_nw(NwRequest { cmd: NwCmd::Load, uid: 3, param: 0, notify: Some(notify) })?;
    let notice = rx.recv_timeout(Duration::from_secs(2)).expect("load completion");
    assert_eq!(notice.result, 0);
    assert_eq!(notice.uid, 3);

    let (notify, rx) = channel_notify();
    drv.submit_frame(FrameRequest { uid: 3, frame_id: 11, notify: Some(notify) })?;
    let notice = rx.recv_timeout(Duration::from_secs(2)).expect("frame completion");
    assert_eq!(notice.result, 0);
    assert!(!notice.cancelled);

    let engine = drv.close().expect("engine handed back");
    // Shutdown drained the session table.
    assert_eq!(engine.session_count(), 0);
    Ok(())
}

#[test]
fn pending_submissions_are_cancelled_on_close() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    // Dead transport: nothing ever publishes, everything is in flight at
    // close time.
    let mbox = LoopbackMailbox::new(0);
    let cfg = ProtoConfig {
        max_sessions: 16,
        poll_interval: Duration::from_millis(5),
        ..Default::default()
    };
    let mut drv = ProtocolDriver::open(cfg, Box::new(mbox), Box::new(LogInspector))?;

    let (notify, rx) = channel_notify();
    drv.submit_nw(NwRequest { cmd: NwCmd::Load, uid: 9, param: 0, notify: Some(notify) })?;
    drv.close();
    let notice = rx.recv_timeout(Duration::from_secs(2)).expect("cancel notice");
    assert_ne!(notice.result, 0);
    Ok(())
}

#[test]
fn drop_without_close_is_clean() -> Result<()> {
    let (drv, _mbox) = open_driver()?;
    drop(drv);
    Ok(())
}
