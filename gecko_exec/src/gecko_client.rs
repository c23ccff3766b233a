//! # Gecko Clients
//!
//! Network side of the gripper link:
//!
//! - [`GeckoCmdPublisher`] publishes gripper commands as JSON [`JointMsg`]s,
//! - [`TelemetrySubscriber`] runs two background threads, one receiving raw gripper telemetry and
//!   one receiving the robot controller's error feedback, and feeds both into the link.
//!
//! Telemetry arrives as the raw big endian bytes of the slot array, since the header slot is a NaN
//! bit pattern.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use comms_if::{
    eqpt::gecko::{self, CtrlFeedback, JointMsg},
    net::{zmq, MonitoredSocket, MonitoredSocketError, NetParams, SocketOptions},
    tm::{ReportKind, StatusReport},
};
use log::{error, trace, warn};

use crate::{
    gripper_link::{GripperCmdSink, GripperLink, LinkError},
    report::Reporter,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Publishes gripper commands.
pub struct GeckoCmdPublisher {
    socket: MonitoredSocket,
}

/// Background subscribers feeding telemetry and control feedback into the link.
pub struct TelemetrySubscriber {
    bg_run: Arc<AtomicBool>,
    bg_jhs: Vec<JoinHandle<()>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum GeckoClientError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl GeckoCmdPublisher {
    pub fn new(ctx: &zmq::Context, params: &NetParams) -> Result<Self, GeckoClientError> {
        let socket_options = SocketOptions {
            block_on_first_connect: false,
            bind: true,
            linger: 1,
            send_timeout: 10,
            ..Default::default()
        };

        let socket = MonitoredSocket::new(
            ctx,
            zmq::PUB,
            socket_options,
            &params.gecko_cmds_endpoint,
        )
        .map_err(GeckoClientError::SocketError)?;

        Ok(Self { socket })
    }
}

impl GripperCmdSink for GeckoCmdPublisher {
    fn publish(&mut self, msg: &JointMsg) -> Result<(), LinkError> {
        let msg_str =
            serde_json::to_string(msg).map_err(|e| LinkError::SerializationError(e.to_string()))?;

        self.socket
            .send(&msg_str, 0)
            .map_err(|e| LinkError::PublishError(e.to_string()))
    }
}

impl TelemetrySubscriber {
    /// Connect the subscribers and start their background threads.
    pub fn new(
        ctx: &zmq::Context,
        params: &NetParams,
        link: Arc<GripperLink>,
        reporter: Arc<dyn Reporter>,
    ) -> Result<Self, GeckoClientError> {
        let states = MonitoredSocket::new(
            ctx,
            zmq::SUB,
            sub_options(),
            &params.gecko_states_endpoint,
        )
        .map_err(GeckoClientError::SocketError)?;

        let feedback = MonitoredSocket::new(
            ctx,
            zmq::SUB,
            sub_options(),
            &params.ctrl_feedback_endpoint,
        )
        .map_err(GeckoClientError::SocketError)?;

        let bg_run = Arc::new(AtomicBool::new(true));

        let states_jh = {
            let run = bg_run.clone();
            let link = link.clone();
            thread::spawn(move || states_thread(states, run, link))
        };

        let feedback_jh = {
            let run = bg_run.clone();
            thread::spawn(move || feedback_thread(feedback, run, link, reporter))
        };

        Ok(Self {
            bg_run,
            bg_jhs: vec![states_jh, feedback_jh],
        })
    }
}

impl Drop for TelemetrySubscriber {
    fn drop(&mut self) {
        self.bg_run.store(false, Ordering::Relaxed);

        for jh in self.bg_jhs.drain(..) {
            jh.join().ok();
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn sub_options() -> SocketOptions {
    SocketOptions {
        block_on_first_connect: false,
        connect_timeout: 1000,
        heartbeat_ivl: 500,
        heartbeat_ttl: 1000,
        heartbeat_timeout: 1000,
        linger: 1,
        recv_timeout: 10,
        subscribe: Some(vec![]),
        ..Default::default()
    }
}

/// Background thread decoding gripper telemetry into the link's state.
fn states_thread(socket: MonitoredSocket, run: Arc<AtomicBool>, link: Arc<GripperLink>) {
    while run.load(Ordering::Relaxed) {
        let bytes = match socket.recv_bytes(0) {
            Ok(b) => b,
            Err(zmq::Error::EAGAIN) => continue,
            Err(e) => {
                error!("Error receiving gripper telemetry: {:?}", e);
                break;
            }
        };

        let slots = match gecko::slots_from_bytes(&bytes) {
            Ok(s) => s,
            Err(e) => {
                warn!("Dropping gripper telemetry: {}", e);
                continue;
            }
        };

        if let Ok(pkt) = link.on_telemetry(&slots) {
            trace!("Gripper status word 0x{:04X}", pkt.status_word);
        }
    }
}

/// Background thread passing controller error feedback to the feedback perching loop.
fn feedback_thread(
    socket: MonitoredSocket,
    run: Arc<AtomicBool>,
    link: Arc<GripperLink>,
    reporter: Arc<dyn Reporter>,
) {
    while run.load(Ordering::Relaxed) {
        let msg = match socket.recv_string(0) {
            Ok(Ok(s)) => s,
            Ok(Err(_)) => {
                warn!("Non UTF-8 control feedback message");
                continue;
            }
            Err(zmq::Error::EAGAIN) => continue,
            Err(e) => {
                error!("Error receiving control feedback: {:?}", e);
                break;
            }
        };

        let fb: CtrlFeedback = match serde_json::from_str(&msg) {
            Ok(f) => f,
            Err(e) => {
                warn!("Error deserialising control feedback: {}", e);
                continue;
            }
        };

        match link.on_ctrl_feedback(fb.error_position_m) {
            Ok(true) => reporter.report(
                StatusReport::new(ReportKind::Feedback, "Feedback perching engaged and locked")
                    .with("error_position_m", fb.error_position_m)
                    .with("error_tolerance_m", link.feedback().error_tolerance),
            ),
            Ok(false) => (),
            Err(e) => reporter.report(
                StatusReport::new(ReportKind::Warning, "Feedback perching could not engage")
                    .with("error", e.to_string()),
            ),
        }
    }
}
