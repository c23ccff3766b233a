//! # TM Server
//!
//! Publishes status reports to the ground and archives each one into the session directory.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::Mutex;

use comms_if::{
    net::{zmq, MonitoredSocket, MonitoredSocketError, NetParams, SocketOptions},
    tm::{ReportKind, StatusReport},
};
use log::{error, info, warn};

use crate::report::Reporter;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Telemetry server
pub struct TmServer {
    socket: Mutex<MonitoredSocket>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TmServerError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not send telemetry: {0}")]
    SendError(zmq::Error),

    #[error("Could not serialize the telemetry: {0}")]
    SerializationError(serde_json::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TmServer {
    /// Create a new instance of the TM Server.
    ///
    /// This function will not block until a subscriber connects.
    pub fn new(ctx: &zmq::Context, params: &NetParams) -> Result<Self, TmServerError> {
        let socket_options = SocketOptions {
            block_on_first_connect: false,
            bind: true,
            connect_timeout: 1000,
            heartbeat_ivl: 500,
            heartbeat_ttl: 1000,
            heartbeat_timeout: 1000,
            linger: 1,
            recv_timeout: 10,
            send_timeout: 10,
            ..Default::default()
        };

        let socket = MonitoredSocket::new(
            ctx,
            zmq::PUB,
            socket_options,
            &params.report_endpoint,
        )
        .map_err(TmServerError::SocketError)?;

        Ok(Self {
            socket: Mutex::new(socket),
        })
    }

    /// Publish a report.
    pub fn send(&self, report: &StatusReport) -> Result<(), TmServerError> {
        let report_str =
            serde_json::to_string(report).map_err(TmServerError::SerializationError)?;

        self.socket
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .send(&report_str, 0)
            .map_err(TmServerError::SendError)
    }
}

impl Reporter for TmServer {
    fn report(&self, report: StatusReport) {
        match report.kind {
            ReportKind::Aborted => error!("{}", report),
            ReportKind::Warning => warn!("{}", report),
            _ => info!("{}", report),
        }

        if let Err(e) = self.send(&report) {
            warn!("TmServer error: {}", e);
        }

        util::session::save_with_timestamp(format!("reports/{}.json", report.kind), report);
    }
}
