// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! txp-core: event model and wire framing for the txProc server

pub mod clock;
pub mod event;
pub mod frame;
pub mod limits;
pub mod queue;
pub mod reference;
pub mod route;

pub use clock::{Clock, FakeClock, SystemClock};
pub use event::{Command, Event, EventKind, ExecParams, ParamValue, SysParams, MAX_RETRIES};
pub use frame::{FrameError, PartialFrame, FRAME_HEADER, FRAME_HEADER_LEN, PROTOCOL_VERSION};
pub use limits::ResourceLimits;
pub use queue::{ManagementEventKind, ManagementMask, QueueDescriptor, QueueKind};
pub use reference::generate_reference;
pub use route::{ReturnRoute, RouteHop};
