//! # Motion provider
//!
//! The perch sequencer moves the robot through a [`MotionProvider`]. On the robot this is the
//! [`MotionClient`], which talks to the motion server over a request/reply socket. Tests and the
//! `--sim` mode use [`crate::sim::SimMotion`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{convert::TryFrom, time::Duration};

use comms_if::{
    eqpt::motion::{MotionCmd, MotionRep, MoveResult, Pose},
    net::{zmq, MonitoredSocket, MonitoredSocketError, NetParams, SocketOptions},
};
use log::{debug, warn};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

pub trait MotionProvider: Send {
    /// Move to the given pose, blocking until the move has finished.
    fn move_to(&mut self, target: &Pose) -> MoveResult;

    /// Get the current pose from trusted kinematics, `None` if not available within `timeout`.
    fn get_trusted_kinematics(&mut self, timeout: Duration) -> Option<Pose>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Motion client
pub struct MotionClient {
    reqrep: MonitoredSocket,

    /// Time allowed for the server to reply to a move
    move_timeout_ms: i32,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum MotionClientError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not send the request to the server: {0}")]
    SendError(zmq::Error),

    #[error("Could not recieve a message from the server: {0}")]
    RecvError(zmq::Error),

    #[error("The motion server did not reply in time")]
    Timeout,

    #[error("Could not serialize the data: {0}")]
    SerializationError(serde_json::Error),

    #[error("Could not deserialize the response from the server: {0}")]
    DeserializeError(serde_json::Error),

    #[error("The server responded with a message which was not valid UTF-8")]
    NonUtf8Response,

    #[error("Motion server error: {0}")]
    ServerError(String),

    #[error("Unexpected reply from the motion server: {0:?}")]
    UnexpectedReply(MotionRep),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MotionClient {
    pub fn new(
        ctx: &zmq::Context,
        params: &NetParams,
        move_timeout_ms: i32,
    ) -> Result<Self, MotionClientError> {
        let reqrep_opts = SocketOptions {
            block_on_first_connect: false,
            connect_timeout: 1000,
            heartbeat_ivl: 500,
            heartbeat_ttl: 1000,
            heartbeat_timeout: 1000,
            linger: 1,
            recv_timeout: move_timeout_ms,
            send_timeout: 10,
            req_correlate: true,
            req_relaxed: true,
            ..Default::default()
        };

        let reqrep = MonitoredSocket::new(ctx, zmq::REQ, reqrep_opts, &params.motion_endpoint)
            .map_err(MotionClientError::SocketError)?;

        Ok(Self {
            reqrep,
            move_timeout_ms,
        })
    }

    /// Send a request and wait up to `timeout_ms` for its reply.
    fn request(&mut self, cmd: &MotionCmd, timeout_ms: i32) -> Result<MotionRep, MotionClientError> {
        let request_str =
            serde_json::to_string(cmd).map_err(MotionClientError::SerializationError)?;

        self.reqrep
            .set_rcvtimeo(timeout_ms)
            .map_err(MotionClientError::RecvError)?;

        self.reqrep
            .send(&request_str, 0)
            .map_err(MotionClientError::SendError)?;

        let response_str = match self.reqrep.recv_string(0) {
            Ok(Ok(s)) => s,
            Ok(Err(_)) => return Err(MotionClientError::NonUtf8Response),
            Err(zmq::Error::EAGAIN) => return Err(MotionClientError::Timeout),
            Err(e) => return Err(MotionClientError::RecvError(e)),
        };

        match serde_json::from_str(&response_str).map_err(MotionClientError::DeserializeError)? {
            MotionRep::Error(e) => Err(MotionClientError::ServerError(e)),
            r => Ok(r),
        }
    }
}

impl MotionProvider for MotionClient {
    fn move_to(&mut self, target: &Pose) -> MoveResult {
        debug!("Requesting move to {:?}", target.position_m);

        match self.request(&MotionCmd::MoveTo(*target), self.move_timeout_ms) {
            Ok(MotionRep::MoveResult(r)) => r,
            Ok(r) => MoveResult::failed(&MotionClientError::UnexpectedReply(r).to_string()),
            Err(e) => MoveResult::failed(&e.to_string()),
        }
    }

    fn get_trusted_kinematics(&mut self, timeout: Duration) -> Option<Pose> {
        let cmd = MotionCmd::GetKinematics {
            timeout_s: timeout.as_secs_f64(),
        };

        match self.request(&cmd, reply_timeout_ms(timeout)) {
            Ok(MotionRep::Kinematics(k)) => k,
            Ok(r) => {
                warn!("{}", MotionClientError::UnexpectedReply(r));
                None
            }
            Err(e) => {
                warn!("Could not get trusted kinematics: {}", e);
                None
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Margin left to the server to reply on top of its own timeout.
const REPLY_MARGIN_MS: i32 = 1000;

/// Socket receive timeout for a request the server may spend `timeout` on.
fn reply_timeout_ms(timeout: Duration) -> i32 {
    i32::try_from(timeout.as_millis())
        .unwrap_or(i32::MAX)
        .saturating_add(REPLY_MARGIN_MS)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_reply_timeout_saturates() {
        assert_eq!(reply_timeout_ms(Duration::from_secs(5)), 6000);
        assert_eq!(reply_timeout_ms(Duration::from_millis(i32::MAX as u64 - 10)), i32::MAX);
        assert_eq!(reply_timeout_ms(Duration::from_secs(u64::MAX)), i32::MAX);
    }
}
