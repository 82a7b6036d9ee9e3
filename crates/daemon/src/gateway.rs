// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The gateway contract.
//!
//! External listeners deserialize wire frames and push events into the
//! nucleus; the nucleus pushes result events headed for clients the
//! gateway still holds back out. Both directions are plain bounded
//! channels of already-parsed events — the frame codec in txp-core is
//! the wire side of this boundary.

use tokio::sync::mpsc;
use txp_core::Event;

/// Default per-direction channel depth.
pub const ENDPOINT_DEPTH: usize = 1024;

/// The half held by the outside world.
pub struct GatewayEndpoint {
    /// Events into the nucleus.
    pub tx: mpsc::Sender<Event>,
    /// Result events back out.
    pub rx: mpsc::Receiver<Event>,
}

/// The half owned by the nucleus.
pub struct NucleusEndpoint {
    pub rx: mpsc::Receiver<Event>,
    pub tx: mpsc::Sender<Event>,
}

/// Create a connected endpoint pair.
pub fn endpoint_pair(depth: usize) -> (GatewayEndpoint, NucleusEndpoint) {
    let (in_tx, in_rx) = mpsc::channel(depth);
    let (out_tx, out_rx) = mpsc::channel(depth);
    (
        GatewayEndpoint { tx: in_tx, rx: out_rx },
        NucleusEndpoint { rx: in_rx, tx: out_tx },
    )
}
