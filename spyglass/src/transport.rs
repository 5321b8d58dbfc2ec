use crossbeam_channel::{Receiver, Sender};
use thiserror::Error;

use crate::events::{CaptureRequest, CaptureResponse};

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TransportError {
    #[error("the capture stream is disconnected")]
    Disconnected,

    #[error("writes on the capture stream were already finished")]
    WritesAlreadyDone,
}

/// The boundary to the agent's bidirectional stream.
///
/// The actual wire (gRPC, unix socket, in-process channel) is the host's
/// concern; the client only needs these four operations. `read_response`
/// returning `None` means the agent has closed its side and all capture data
/// has been received.
pub trait CaptureTransport {
    fn write_request(&mut self, request: &CaptureRequest) -> Result<(), TransportError>;

    fn read_response(&mut self) -> Option<CaptureResponse>;

    /// Signals the agent that no further requests will be written, which asks
    /// it to stop capturing and drain.
    fn writes_done(&mut self) -> Result<(), TransportError>;

    /// Tears the stream down. Errors are reported but the stream is gone
    /// either way.
    fn finish(&mut self) -> Result<(), TransportError>;
}

/// A [`CaptureTransport`] over a pair of crossbeam channels, for in-process
/// agents and tests.
pub struct ChannelTransport {
    requests: Option<Sender<CaptureRequest>>,
    responses: Receiver<CaptureResponse>,
}

/// The agent's half of a [`ChannelTransport`].
pub struct ChannelAgent {
    pub requests: Receiver<CaptureRequest>,
    pub responses: Sender<CaptureResponse>,
}

impl ChannelTransport {
    pub fn new_pair() -> (ChannelTransport, ChannelAgent) {
        let (request_tx, request_rx) = crossbeam_channel::unbounded();
        let (response_tx, response_rx) = crossbeam_channel::unbounded();
        (
            ChannelTransport {
                requests: Some(request_tx),
                responses: response_rx,
            },
            ChannelAgent {
                requests: request_rx,
                responses: response_tx,
            },
        )
    }
}

impl CaptureTransport for ChannelTransport {
    fn write_request(&mut self, request: &CaptureRequest) -> Result<(), TransportError> {
        let sender = self.requests.as_ref().ok_or(TransportError::WritesAlreadyDone)?;
        sender
            .send(request.clone())
            .map_err(|_| TransportError::Disconnected)
    }

    fn read_response(&mut self) -> Option<CaptureResponse> {
        self.responses.recv().ok()
    }

    fn writes_done(&mut self) -> Result<(), TransportError> {
        // Dropping the sender closes the request channel, which is the
        // agent's signal to stop capturing.
        match self.requests.take() {
            Some(_) => Ok(()),
            None => Err(TransportError::WritesAlreadyDone),
        }
    }

    fn finish(&mut self) -> Result<(), TransportError> {
        self.requests = None;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn request_reaches_agent() {
        let (mut transport, agent) = ChannelTransport::new_pair();
        transport.write_request(&CaptureRequest::default()).unwrap();
        assert!(agent.requests.try_recv().is_ok());
    }

    #[test]
    fn read_ends_when_agent_hangs_up() {
        let (mut transport, agent) = ChannelTransport::new_pair();
        agent.responses.send(CaptureResponse::default()).unwrap();
        drop(agent);
        assert!(transport.read_response().is_some());
        assert!(transport.read_response().is_none());
    }

    #[test]
    fn write_after_agent_exit_fails() {
        let (mut transport, agent) = ChannelTransport::new_pair();
        drop(agent);
        assert!(matches!(
            transport.write_request(&CaptureRequest::default()),
            Err(TransportError::Disconnected)
        ));
    }

    #[test]
    fn double_writes_done_fails() {
        let (mut transport, _agent) = ChannelTransport::new_pair();
        transport.writes_done().unwrap();
        assert!(matches!(
            transport.writes_done(),
            Err(TransportError::WritesAlreadyDone)
        ));
    }
}
