//! # Telecommand Client
//!
//! Receives telecommands from the ground console and sends back one response per telecommand.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    net::{zmq, MonitoredSocket, SocketOptions, MonitoredSocketError, NetParams},
    tc::{Tc, TcParseError, TcResponse}
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Telecommand client
pub struct TcClient {
    socket: MonitoredSocket
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TcClientError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("The client is not connected to the server")]
    NotConnected,

    #[error("Could not send the response to the server: {0}")]
    SendError(zmq::Error),

    #[error("Could not recieve a message from the server: {0}")]
    RecvError(zmq::Error),

    #[error("Could not serialize the data: {0}")]
    SerializationError(serde_json::Error),

    #[error("Could not parse the recieved telecommand: {0}")]
    TcParseError(TcParseError),

    #[error("The server sent a message which was not valid UTF-8")]
    NonUtf8Response
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TcClientError {
    /// True if the exec cannot keep receiving TCs after this error.
    ///
    /// A malformed TC has already been answered with an `ERROR` response, and a lost ground link
    /// is retried every cycle, so neither ends the session.
    pub fn is_fatal(&self) -> bool {
        match self {
            TcClientError::NotConnected
            | TcClientError::TcParseError(_)
            | TcClientError::NonUtf8Response => false,
            _ => true
        }
    }
}

impl TcClient {

    /// Create a new instance of the TC Client.
    ///
    /// This function will not block until the server connects.
    pub fn new(ctx: &zmq::Context, params: &NetParams) -> Result<Self, TcClientError> {
        let socket_options = SocketOptions {
            block_on_first_connect: false,
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
            zmq::REP,
            socket_options,
            &params.tc_endpoint
        ).map_err(|e| TcClientError::SocketError(e))?;

        Ok(Self {
            socket
        })
    }

    /// Check if the client is connected to the server
    pub fn is_connected(&self) -> bool {
        self.socket.connected()
    }

    /// Recieve a single TC from the server.
    ///
    /// The protocol here is to call recieve_tc in a loop until `Ok(None)` is returned, indicating
    /// that there are no more pending TCs to be recieved.
    ///
    /// After recieving a valid TC the client must send a response using `.send_response()` before
    /// attempting to recieve another TC. If the TC cannot be read or parsed an `ERROR` response is
    /// sent by this function.
    pub fn recieve_tc(&self) -> Result<Option<Tc>, TcClientError> {
        if !self.socket.connected() {
            return Err(TcClientError::NotConnected)
        }

        let tc_str = match self.socket.recv_string(0) {
            Ok(Ok(s)) => s,
            Ok(Err(_)) => {
                self.send_response(&TcResponse::error("TC is not valid UTF-8"))?;

                return Err(TcClientError::NonUtf8Response)
            },
            // No message in timeout
            Err(zmq::Error::EAGAIN) => return Ok(None),
            // No response is sent if we could not recieve
            Err(e) => return Err(TcClientError::RecvError(e))
        };

        match Tc::from_json(&tc_str) {
            Ok(tc) => Ok(Some(tc)),
            Err(e) => {
                self.send_response(&TcResponse::error(&e.to_string()))?;

                Err(TcClientError::TcParseError(e))
            }
        }
    }

    /// Send the given response back to the server.
    ///
    /// This function must be called after recieving a TC.
    pub fn send_response(&self, response: &TcResponse) -> Result<(), TcClientError> {
        let response_str = serde_json::to_string(response)
            .map_err(|e| TcClientError::SerializationError(e))?;

        self.socket.send(&response_str, 0)
            .map_err(|e| TcClientError::SendError(e))
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::tc::TcStatus;
    use std::time::{Duration, Instant};

    /// Poll the client until it returns something other than `Ok(None)`.
    fn recv_next(client: &TcClient) -> Result<Option<Tc>, TcClientError> {
        let start = Instant::now();
        loop {
            match client.recieve_tc() {
                Ok(None) if start.elapsed() < Duration::from_secs(5) => continue,
                r => return r
            }
        }
    }

    fn recv_response(ground: &zmq::Socket) -> TcResponse {
        let msg = ground.recv_string(0).unwrap().unwrap();
        serde_json::from_str(&msg).unwrap()
    }

    #[test]
    fn test_malformed_tcs_not_fatal() {
        assert!(!TcClientError::NonUtf8Response.is_fatal());
        assert!(!TcClientError::NotConnected.is_fatal());
        assert!(!TcClientError::TcParseError(TcParseError::MissingName).is_fatal());
        assert!(TcClientError::RecvError(zmq::Error::ETERM).is_fatal());
    }

    #[test]
    fn test_non_utf8_tc_answered_and_intake_continues() {
        let endpoint = "tcp://127.0.0.1:25920";
        let ctx = zmq::Context::new();

        // Ground console side
        let ground = ctx.socket(zmq::REQ).unwrap();
        ground.set_rcvtimeo(5000).unwrap();
        ground.set_linger(0).unwrap();
        ground.bind(endpoint).unwrap();

        let params = NetParams {
            tc_endpoint: endpoint.into(),
            ..Default::default()
        };
        let client = TcClient::new(&ctx, &params).unwrap();

        let start = Instant::now();
        while !client.is_connected() {
            assert!(start.elapsed() < Duration::from_secs(5), "client never connected");
            std::thread::sleep(Duration::from_millis(10));
        }

        ground.send(&[0xFFu8, 0xFE][..], 0).unwrap();
        let err = recv_next(&client).unwrap_err();
        assert!(matches!(err, TcClientError::NonUtf8Response));
        assert!(!err.is_fatal());
        assert_eq!(recv_response(&ground).status, TcStatus::Error);

        // The next TC is still received
        ground.send(r#"{"name": "gecko_gripper_open"}"#, 0).unwrap();
        let tc = recv_next(&client).unwrap().unwrap();
        assert_eq!(tc.name, "gecko_gripper_open");
        client.send_response(&TcResponse::ok("")).unwrap();
        assert!(recv_response(&ground).is_ok());
    }
}
