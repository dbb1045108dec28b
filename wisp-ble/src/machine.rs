//! Provisioning state machine
//!
//! Pure and synchronous: the session feeds it events from the notification
//! stream, the deadline timer and the link, and forwards whatever status it
//! produces. Once a terminal status is produced every later event is ignored.

use wisp_proto::StatusToken;

use crate::{ProvisionError, ProvisioningStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Negotiating,
    Listening,
    AwaitingAck,
    Processing,
    Complete,
    Failed,
    Closed,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Negotiating => "negotiating",
            Phase::Listening => "listening",
            Phase::AwaitingAck => "awaiting acknowledgement",
            Phase::Processing => "processing",
            Phase::Complete => "complete",
            Phase::Failed => "failed",
            Phase::Closed => "closed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Complete | Phase::Failed | Phase::Closed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Notification(StatusToken),
    Deadline,
    Disconnected,
}

#[derive(Debug)]
pub(crate) struct Machine {
    phase: Phase,
    written: bool,
    progress: u8,
    deadline_armed: bool,
    strict_deadline: bool,
    last: Option<ProvisioningStatus>,
}

impl Machine {
    pub(crate) fn new(strict_deadline: bool) -> Self {
        Self {
            phase: Phase::Idle,
            written: false,
            progress: 0,
            deadline_armed: false,
            strict_deadline,
            last: None,
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn last(&self) -> Option<&ProvisioningStatus> {
        self.last.as_ref()
    }

    pub(crate) fn deadline_armed(&self) -> bool {
        self.deadline_armed
    }

    fn illegal(&self, action: &'static str) -> ProvisionError {
        ProvisionError::InvalidState {
            action,
            phase: self.phase.name(),
        }
    }

    pub(crate) fn begin_negotiation(&mut self) -> Result<(), ProvisionError> {
        match self.phase {
            Phase::Idle => {
                self.phase = Phase::Negotiating;
                Ok(())
            }
            _ => Err(self.illegal("initialize")),
        }
    }

    pub(crate) fn expect_negotiated(&self, action: &'static str) -> Result<(), ProvisionError> {
        match self.phase {
            Phase::Negotiating | Phase::Listening => Ok(()),
            _ => Err(self.illegal(action)),
        }
    }

    pub(crate) fn listening(&mut self) {
        if self.phase == Phase::Negotiating {
            self.phase = Phase::Listening;
        }
    }

    /// The credentials write was accepted; the deadline starts now
    pub(crate) fn credentials_written(&mut self) {
        if matches!(self.phase, Phase::Negotiating | Phase::Listening) {
            self.phase = Phase::AwaitingAck;
            self.written = true;
            self.deadline_armed = true;
        }
    }

    /// Record a terminal failure, unless the session already ended
    pub(crate) fn fail(&mut self, cause: ProvisionError) -> Option<ProvisioningStatus> {
        if self.phase.is_terminal() {
            return None;
        }
        Some(self.finish(Phase::Failed, ProvisioningStatus::error(cause)))
    }

    /// Release the session. Returns whether a pending deadline was cancelled.
    pub(crate) fn close(&mut self) -> bool {
        self.phase = Phase::Closed;
        std::mem::replace(&mut self.deadline_armed, false)
    }

    fn finish(&mut self, phase: Phase, status: ProvisioningStatus) -> ProvisioningStatus {
        self.phase = phase;
        self.deadline_armed = false;
        if let Some(progress) = status.progress() {
            self.progress = progress;
        }
        self.last = Some(status.clone());
        status
    }

    pub(crate) fn on_event(&mut self, event: SessionEvent) -> Option<ProvisioningStatus> {
        if self.phase.is_terminal() {
            return None;
        }
        match event {
            SessionEvent::Notification(token) => self.on_token(token),
            SessionEvent::Deadline => self.on_deadline(),
            SessionEvent::Disconnected => Some(self.on_disconnect()),
        }
    }

    fn on_token(&mut self, token: StatusToken) -> Option<ProvisioningStatus> {
        if !self.written {
            return None;
        }
        // any token proves the link is alive; the deadline is not restarted
        self.deadline_armed = false;

        match token {
            StatusToken::Success => Some(self.finish(
                Phase::Complete,
                ProvisioningStatus::confirmed("Device provisioned and connecting to the network"),
            )),
            StatusToken::StorageFailed => self.fail(ProvisionError::StorageFailed),
            StatusToken::InvalidJson => self.fail(ProvisionError::InvalidPayload),
            StatusToken::Unknown(raw) => self.fail(ProvisionError::UnknownStatus(raw)),
            step => {
                let progress = step.progress()?;
                if progress <= self.progress {
                    return None;
                }
                let message = match step {
                    StatusToken::Received => "Device received the credentials",
                    StatusToken::Processing => "Device is applying the credentials",
                    _ => "Credentials stored, device is joining the network",
                };
                self.phase = Phase::Processing;
                self.progress = progress;
                let status = ProvisioningStatus::processing(progress, message);
                self.last = Some(status.clone());
                Some(status)
            }
        }
    }

    fn on_deadline(&mut self) -> Option<ProvisioningStatus> {
        if !self.deadline_armed {
            return None;
        }
        if self.strict_deadline {
            return self.fail(ProvisionError::Timeout);
        }
        Some(self.finish(
            Phase::Complete,
            ProvisioningStatus::optimistic(
                "Credentials sent, device is joining the network",
                "The device did not confirm in time; it most likely restarted to join the network",
            ),
        ))
    }

    fn on_disconnect(&mut self) -> ProvisioningStatus {
        if !self.written {
            return self.finish(
                Phase::Failed,
                ProvisioningStatus::error(ProvisionError::ConnectionFailed(
                    "peripheral disconnected before credentials were sent".to_string(),
                )),
            );
        }
        self.finish(
            Phase::Complete,
            ProvisioningStatus::optimistic(
                "Device is restarting to join the network",
                "The device disconnected before confirming; this is expected while it joins the network",
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn written() -> Machine {
        let mut m = Machine::new(false);
        m.begin_negotiation().unwrap();
        m.listening();
        m.credentials_written();
        m
    }

    fn token(t: StatusToken) -> SessionEvent {
        SessionEvent::Notification(t)
    }

    #[test]
    fn happy_path() {
        let mut m = written();
        assert_eq!(m.phase(), Phase::AwaitingAck);
        let progress: Vec<Option<u8>> = [
            StatusToken::Received,
            StatusToken::Processing,
            StatusToken::Stored,
            StatusToken::Success,
        ]
        .into_iter()
        .map(|t| m.on_event(token(t)).and_then(|s| s.progress()))
        .collect();
        assert_eq!(progress, vec![Some(25), Some(50), Some(75), Some(100)]);
        assert_eq!(m.phase(), Phase::Complete);
        assert!(matches!(
            m.last(),
            Some(ProvisioningStatus::Complete { warning: None, .. })
        ));
    }

    #[test]
    fn skipped_steps_are_fine() {
        let mut m = written();
        assert!(m.on_event(token(StatusToken::Stored)).is_some());
        assert!(matches!(
            m.on_event(token(StatusToken::Success)),
            Some(ProvisioningStatus::Complete { warning: None, .. })
        ));
    }

    #[test]
    fn progress_never_regresses() {
        let mut m = written();
        m.on_event(token(StatusToken::Stored));
        assert_eq!(m.on_event(token(StatusToken::Received)), None);
        assert_eq!(m.on_event(token(StatusToken::Stored)), None);
        assert_eq!(m.phase(), Phase::Processing);
    }

    #[test]
    fn any_token_disarms_deadline() {
        let mut m = written();
        assert!(m.deadline_armed());
        m.on_event(token(StatusToken::Received));
        assert!(!m.deadline_armed());
        assert_eq!(m.on_event(SessionEvent::Deadline), None);
        assert_eq!(m.phase(), Phase::Processing);
    }

    #[test]
    fn deadline_is_optimistic() {
        let mut m = written();
        match m.on_event(SessionEvent::Deadline) {
            Some(ProvisioningStatus::Complete {
                warning: Some(w), ..
            }) => assert!(!w.is_empty()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn strict_deadline_times_out() {
        let mut m = Machine::new(true);
        m.begin_negotiation().unwrap();
        m.credentials_written();
        assert!(matches!(
            m.on_event(SessionEvent::Deadline),
            Some(ProvisioningStatus::Error {
                cause: ProvisionError::Timeout,
                ..
            })
        ));
    }

    #[test]
    fn error_tokens_are_terminal() {
        for (t, cause) in [
            (StatusToken::StorageFailed, ProvisionError::StorageFailed),
            (StatusToken::InvalidJson, ProvisionError::InvalidPayload),
            (
                StatusToken::Unknown("FOO".into()),
                ProvisionError::UnknownStatus("FOO".into()),
            ),
        ] {
            let mut m = written();
            match m.on_event(token(t)) {
                Some(ProvisioningStatus::Error { cause: c, .. }) => assert_eq!(c, cause),
                other => panic!("unexpected {other:?}"),
            }
            assert_eq!(m.phase(), Phase::Failed);
            assert_eq!(m.on_event(token(StatusToken::Success)), None);
        }
    }

    #[test]
    fn disconnect_before_write_fails() {
        let mut m = Machine::new(false);
        m.begin_negotiation().unwrap();
        assert!(matches!(
            m.on_event(SessionEvent::Disconnected),
            Some(ProvisioningStatus::Error {
                cause: ProvisionError::ConnectionFailed(_),
                ..
            })
        ));
    }

    #[test]
    fn disconnect_after_write_is_optimistic() {
        let mut m = written();
        m.on_event(token(StatusToken::Received));
        assert!(matches!(
            m.on_event(SessionEvent::Disconnected),
            Some(ProvisioningStatus::Complete {
                warning: Some(_),
                ..
            })
        ));
    }

    #[test]
    fn disconnect_after_error_changes_nothing() {
        let mut m = written();
        m.on_event(token(StatusToken::StorageFailed));
        assert_eq!(m.on_event(SessionEvent::Disconnected), None);
        assert!(matches!(m.last(), Some(ProvisioningStatus::Error { .. })));
    }

    #[test]
    fn tokens_before_write_are_ignored() {
        let mut m = Machine::new(false);
        m.begin_negotiation().unwrap();
        assert_eq!(m.on_event(token(StatusToken::Success)), None);
        assert_eq!(m.phase(), Phase::Negotiating);
    }

    #[test]
    fn illegal_transitions_are_typed_errors() {
        let mut m = Machine::new(false);
        assert!(matches!(
            m.expect_negotiated("send credentials"),
            Err(ProvisionError::InvalidState { phase: "idle", .. })
        ));
        m.begin_negotiation().unwrap();
        assert!(m.begin_negotiation().is_err());
    }

    #[test]
    fn close_reports_armed_deadline_once() {
        let mut m = written();
        assert!(m.close());
        assert!(!m.close());
        assert_eq!(m.phase(), Phase::Closed);
        assert_eq!(m.on_event(SessionEvent::Deadline), None);
    }
}
