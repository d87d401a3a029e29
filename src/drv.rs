// CLASSIFICATION: COMMUNITY
// Filename: drv.rs v0.7
// Author: Lukas Bower
// Date Modified: 2026-04-20

//! Driver lifecycle glue: open/close with an explicit bitmask of completed
//! initialization steps, so a partial open unwinds precisely the steps
//! that succeeded. The driver is an owned context object, not a global;
//! test harnesses instantiate as many as they like.

use std::io;
use std::sync::Arc;

use bitflags::bitflags;
use log::{info, warn};
use thiserror::Error;

use crate::config::ProtoConfig;
use crate::engine::Engine;
use crate::fault::FaultInspector;
use crate::mailbox::MailboxTransport;
use crate::poller::{Doorbell, Poller};
use crate::req::Uid;
use crate::session::{FrameRequest, NwRequest, SubmitError, SubmitQueues};

bitflags! {
    /// Initialization steps completed so far, in open order.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InitSteps: u32 {
        const CONFIG = 1 << 0;
        const QUEUES = 1 << 1;
        const ENGINE = 1 << 2;
        const POLLER = 1 << 3;
    }
}

#[derive(Debug, Error)]
pub enum OpenError {
    #[error("invalid configuration: {0}")]
    BadConfig(&'static str),
    #[error("failed to spawn poller thread: {0}")]
    Thread(#[from] io::Error),
}

/// Owned protocol-driver context. Constructed by [`ProtocolDriver::open`],
/// torn down by [`ProtocolDriver::close`] or drop.
pub struct ProtocolDriver {
    steps: InitSteps,
    queues: Arc<SubmitQueues>,
    bell: Arc<Doorbell>,
    poller: Option<Poller>,
}

impl ProtocolDriver {
    pub fn open(
        cfg: ProtoConfig,
        transport: Box<dyn MailboxTransport>,
        inspector: Box<dyn FaultInspector>,
    ) -> Result<Self, OpenError> {
        let mut steps = InitSteps::empty();

        cfg.validate().map_err(OpenError::BadConfig)?;
        steps |= InitSteps::CONFIG;

        let bell = Arc::new(Doorbell::new());
        let queues = Arc::new(SubmitQueues::new(cfg.queue_depth));
        steps |= InitSteps::QUEUES;

        let poll_interval = cfg.poll_interval;
        let idle_warn = cfg.idle_warn;
        let engine = Engine::new(cfg, queues.clone(), transport, inspector);
        steps |= InitSteps::ENGINE;

        let poller = match Poller::spawn(engine, bell.clone(), poll_interval, idle_warn) {
            Ok(p) => p,
            Err(e) => {
                // Engine and queues unwind by drop; nothing hardware-side
                // has been touched yet.
                warn!("open unwound at steps {:?}: {}", steps, e);
                return Err(OpenError::Thread(e));
            }
        };
        steps |= InitSteps::POLLER;

        info!("protocol driver open (steps {:?})", steps);
        Ok(Self { steps, queues, bell, poller: Some(poller) })
    }

    /// Steps completed during open; full opens report all bits set.
    pub fn init_steps(&self) -> InitSteps {
        self.steps
    }

    /// Submit a network-management command and wake the poller.
    pub fn submit_nw(&self, req: NwRequest) -> Result<(), SubmitError> {
        self.queues.submit_nw(req)?;
        self.bell.ring();
        Ok(())
    }

    /// Submit a frame for inference and wake the poller.
    pub fn submit_frame(&self, req: FrameRequest) -> Result<(), SubmitError> {
        self.queues.submit_frame(req)?;
        self.bell.ring();
        Ok(())
    }

    /// Request cooperative cancellation of `uid`'s in-flight frame.
    pub fn cancel_frame(&self, uid: Uid) -> Result<(), SubmitError> {
        self.queues.cancel_frame(uid)?;
        self.bell.ring();
        Ok(())
    }

    /// Stop the poller, drain in-flight work, and unwind in reverse of
    /// open order. Returns the drained engine for post-mortem inspection.
    pub fn close(&mut self) -> Option<Engine> {
        let mut engine = None;
        if self.steps.contains(InitSteps::POLLER) {
            if let Some(poller) = self.poller.take() {
                engine = poller.stop();
            }
            self.steps.remove(InitSteps::POLLER);
            self.steps.remove(InitSteps::ENGINE);
        }
        self.steps.remove(InitSteps::QUEUES);
        self.steps.remove(InitSteps::CONFIG);
        info!("protocol driver closed");
        engine
    }
}

impl Drop for ProtocolDriver {
    fn drop(&mut self) {
        if self.poller.is_some() {
            let _ = self.close();
        }
    }
}
