//! Session collection and delivery.

use chrono::Utc;
use tokio::sync::mpsc;

use crate::diagnostics::session::DiagnosticsWebSession;

/// Receives finished diagnostics sessions.
///
/// Cloning is cheap; every clone delivers to the same subscriber.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsCollector {
    sink: Option<mpsc::UnboundedSender<DiagnosticsWebSession>>,
}

impl DiagnosticsCollector {
    /// A collector that records nothing.
    pub fn disabled() -> Self {
        Self { sink: None }
    }

    /// An enabled collector and the receiving end of its sessions.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DiagnosticsWebSession>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { sink: Some(tx) }, rx)
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Deliver a session to the subscriber. Does nothing when disabled.
    pub fn report(&self, session: DiagnosticsWebSession) {
        let Some(sink) = &self.sink else {
            return;
        };
        if sink.send(session).is_err() {
            tracing::debug!("Diagnostics subscriber gone, session discarded");
        }
    }

    /// Start recording a new session.
    pub fn begin(&self) -> SessionRecorder {
        match &self.sink {
            Some(sink) => SessionRecorder {
                active: Some(ActiveSession {
                    session: Box::new(DiagnosticsWebSession {
                        started_at: Some(Utc::now()),
                        ..Default::default()
                    }),
                    collector: DiagnosticsCollector {
                        sink: Some(sink.clone()),
                    },
                }),
            },
            None => SessionRecorder { active: None },
        }
    }
}

/// In-flight session owned by one transaction.
///
/// Reported exactly once: on [`SessionRecorder::finish`] or when dropped,
/// whichever comes first.
#[derive(Debug)]
pub struct SessionRecorder {
    active: Option<ActiveSession>,
}

#[derive(Debug)]
struct ActiveSession {
    session: Box<DiagnosticsWebSession>,
    collector: DiagnosticsCollector,
}

impl SessionRecorder {
    /// A recorder that never reports.
    pub fn noop() -> Self {
        Self { active: None }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Apply `f` to the session. The closure only runs when recording, so
    /// expensive captures belong inside it.
    pub fn record(&mut self, f: impl FnOnce(&mut DiagnosticsWebSession)) {
        if let Some(active) = self.active.as_mut() {
            f(&mut active.session);
        }
    }

    /// Stamp the end time and report.
    pub fn finish(mut self) {
        self.finalize();
    }

    fn finalize(&mut self) {
        if let Some(active) = self.active.take() {
            let mut session = *active.session;
            session.ended_at = Some(Utc::now());
            active.collector.report(session);
        }
    }
}

impl Default for SessionRecorder {
    fn default() -> Self {
        Self::noop()
    }
}

impl Drop for SessionRecorder {
    fn drop(&mut self) {
        self.finalize();
    }
}
