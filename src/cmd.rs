// CLASSIFICATION: COMMUNITY
// Filename: cmd.rs v0.4
// Author: Lukas Bower
// Date Modified: 2026-01-22

//! Firmware-facing command identifiers and result-code namespaces.
//!
//! The numeric values are shared with NPU firmware and must not change:
//! network-management commands start at `NW_CMD_BASE`, frame commands at
//! `FRAME_CMD_BASE`, both assigned consecutively in declaration order.

/// First value of the network-management command range.
pub const NW_CMD_BASE: u32 = 1024;

/// First value of the frame command range.
pub const FRAME_CMD_BASE: u32 = 4096;

/// Network-management (control-plane) commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum NwCmd {
    /// Load a compiled model into firmware and create the session.
    Load = 1025,
    /// Tear the session down on the firmware side.
    Unload = 1026,
    /// Begin accepting frames for the session.
    Streamon = 1027,
    /// Drain and stop the session's frame stream.
    Streamoff = 1028,
    /// NPU power control; not tied to a session.
    PowerCtl = 1029,
    ProfileStart = 1030,
    ProfileStop = 1031,
    /// Firmware self-test execution.
    FwTcExecute = 1032,
    CoreCtl = 1033,
    /// Force-clear pending callbacks of the session's other requests.
    /// Handled entirely inside the driver; never published to firmware.
    ClearCb = 1034,
    Mode = 1035,
    ImbSize = 1036,
}

impl NwCmd {
    /// Numeric value carried on the mailbox wire.
    pub fn wire(self) -> u32 {
        self as u32
    }
}

/// Frame (data-plane) commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum FrameCmd {
    /// Queue one inference invocation.
    Q = 4097,
    /// Cooperative cancel of an in-flight frame.
    QCancel = 4098,
    /// Dequeue a finished frame.
    Dq = 4099,
}

impl FrameCmd {
    pub fn wire(self) -> u32 {
        self as u32
    }
}

/// Base of the driver-layer result-code namespace. Everything below this
/// value (except 0) is a firmware-layer code passed through unmodified.
pub const ERR_DRIVER_BASE: u32 = 0xC000_0000;

/// Driver-layer failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErr {
    /// Deadline expired while waiting in REQUESTED (never reached hardware).
    SchedTimeout,
    /// Deadline expired in PROCESSING; firmware did not answer.
    NpuHwTimeout,
    SessionNotFound,
    SessionExists,
    /// The session's single frame slot is already occupied.
    SlotBusy,
    QueueFull,
    InvalidUid,
    Cancelled,
    TransportDown,
}

impl DriverErr {
    pub fn wire(self) -> u32 {
        let off = match self {
            DriverErr::SchedTimeout => 1,
            DriverErr::NpuHwTimeout => 2,
            DriverErr::SessionNotFound => 3,
            DriverErr::SessionExists => 4,
            DriverErr::SlotBusy => 5,
            DriverErr::QueueFull => 6,
            DriverErr::InvalidUid => 7,
            DriverErr::Cancelled => 8,
            DriverErr::TransportDown => 9,
        };
        ERR_DRIVER_BASE + off
    }
}

/// Per-request completion status, filled in before the notification fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultCode {
    #[default]
    NoError,
    /// Nonzero firmware-layer code passed through from the mailbox response.
    Firmware(u32),
    Driver(DriverErr),
}

impl ResultCode {
    pub fn wire(self) -> u32 {
        match self {
            ResultCode::NoError => 0,
            ResultCode::Firmware(v) => v,
            ResultCode::Driver(e) => e.wire(),
        }
    }

    /// Decode a wire code coming back from the transport.
    pub fn from_wire(v: u32) -> Self {
        match v {
            0 => ResultCode::NoError,
            x if x == DriverErr::SchedTimeout.wire() => ResultCode::Driver(DriverErr::SchedTimeout),
            x if x == DriverErr::NpuHwTimeout.wire() => ResultCode::Driver(DriverErr::NpuHwTimeout),
            x if x == DriverErr::Cancelled.wire() => ResultCode::Driver(DriverErr::Cancelled),
            x => ResultCode::Firmware(x),
        }
    }

    /// Timeout-class codes; these force-complete a request from the scan.
    pub fn is_timeout(self) -> bool {
        matches!(
            self,
            ResultCode::Driver(DriverErr::SchedTimeout) | ResultCode::Driver(DriverErr::NpuHwTimeout)
        )
    }

    /// True when the slot must be quarantined in STUCKED instead of
    /// returning to FREE: a late firmware response may still arrive.
    pub fn quarantines(self) -> bool {
        matches!(self, ResultCode::Driver(DriverErr::NpuHwTimeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nw_values_are_wire_stable() {
        assert_eq!(NwCmd::Load.wire(), NW_CMD_BASE + 1);
        assert_eq!(NwCmd::Unload.wire(), 1026);
        assert_eq!(NwCmd::Streamoff.wire(), 1028);
        assert_eq!(NwCmd::ClearCb.wire(), 1034);
        assert_eq!(NwCmd::ImbSize.wire(), 1036);
        assert_eq!(FrameCmd::Q.wire(), FRAME_CMD_BASE + 1);
    }

    #[test]
    fn result_code_round_trip() {
        assert_eq!(ResultCode::from_wire(0), ResultCode::NoError);
        let hw = ResultCode::Driver(DriverErr::NpuHwTimeout);
        assert_eq!(ResultCode::from_wire(hw.wire()), hw);
        assert_eq!(ResultCode::from_wire(17), ResultCode::Firmware(17));
    }

    #[test]
    fn only_hw_timeout_quarantines() {
        assert!(ResultCode::Driver(DriverErr::NpuHwTimeout).quarantines());
        assert!(!ResultCode::Driver(DriverErr::SchedTimeout).quarantines());
        assert!(ResultCode::Driver(DriverErr::SchedTimeout).is_timeout());
        assert!(!ResultCode::Driver(DriverErr::Cancelled).is_timeout());
    }
}
