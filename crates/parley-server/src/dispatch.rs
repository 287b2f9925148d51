//! Delivery dispatcher: fan a frame out to a user's live sessions.
//!
//! Pushes never block and never fail the overall dispatch: each session's
//! outbound queue is tried independently, and a queue that is full or whose
//! writer task died only costs that one session its copy. The dead session
//! id goes to the reaper channel for asynchronous teardown; sibling
//! sessions and the calling router are unaffected.

use parley_proto::Frame;
use tokio::sync::mpsc;

use crate::registry::{OutboundHandle, SessionRegistry};

/// Pushes frames into session outbound queues via the registry.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    reaper: mpsc::UnboundedSender<u64>,
}

impl Dispatcher {
    /// Create a dispatcher reporting dead sessions to the reaper channel.
    ///
    /// The receiving end is drained by the server runtime, which unregisters
    /// each reported session as if it had disconnected.
    #[must_use]
    pub fn new(reaper: mpsc::UnboundedSender<u64>) -> Self {
        Self { reaper }
    }

    /// Push a frame to every live session of a user.
    ///
    /// Returns the number of sessions reached. Zero means the user had no
    /// session able to take the frame; for message delivery the router
    /// treats that as "recipient offline."
    pub fn push(&self, registry: &SessionRegistry, user_id: u64, frame: &Frame) -> usize {
        let mut reached = 0;

        for handle in registry.sessions_for(user_id) {
            if self.push_handle(&handle, frame.clone()) {
                reached += 1;
            }
        }

        reached
    }

    /// Push a frame to one specific session.
    ///
    /// Returns `false` if the session is unknown or its queue rejected the
    /// frame.
    pub fn push_to_session(
        &self,
        registry: &SessionRegistry,
        session_id: u64,
        frame: Frame,
    ) -> bool {
        registry
            .handle_for(session_id)
            .is_some_and(|handle| self.push_handle(&handle, frame))
    }

    fn push_handle(&self, handle: &OutboundHandle, frame: Frame) -> bool {
        match handle.sender.try_send(frame) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(
                    session_id = handle.session_id,
                    error = %err,
                    "outbound queue rejected frame, scheduling session teardown"
                );
                // Reaper gone means the server is shutting down; nothing to
                // tear down.
                let _ = self.reaper.send(handle.session_id);
                false
            },
        }
    }
}
