//! Session controller: owns one record-capture session and turns host inputs into
//! presentation events.
//!
//! ```text
//! Idle ──utterance──▶ AwaitingInterpretation ──result/failure──▶ Idle | ReadyToSubmit
//! ReadyToSubmit ──submit──▶ AwaitingSubmission ──success──▶ Idle (record reset)
//!                                             └─failure──▶ ReadyToSubmit
//! ```
//!
//! Only one outbound call is in flight per session. An utterance or submission
//! arriving while one is pending is rejected with [`SessionError::Busy`]; nothing
//! is queued. Dropping an in-flight `handle` future puts the session back to rest.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::client::{InterpretRequest, InterpretationResult, Services};
use crate::completion::CompletionSnapshot;
use crate::config::SessionConfig;
use crate::error::{ClientError, Result, SessionError};
use crate::record::Record;
use crate::transcript::Transcript;

pub const WELCOME_MESSAGE: &str = "Welcome! Please provide information about the medical procedure. You can start by telling me the patient's name and age.";
pub const DEFAULT_SUBMIT_MESSAGE: &str = "Record submitted successfully";
pub const DRAFT_READY_MESSAGE: &str =
    "Sample field report generated. You can edit it before sending.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    AwaitingInterpretation,
    ReadyToSubmit,
    AwaitingSubmission,
}

impl SessionState {
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            SessionState::AwaitingInterpretation | SessionState::AwaitingSubmission
        )
    }
}

/// Everything a host can feed into a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Typed chat message.
    Utterance(String),
    /// Final transcript from the speech recogniser.
    SpeechResult(String),
    ToggleListening,
    SpeechEnded,
    SpeechFailed(String),
    Submit,
    GenerateReport,
}

/// What the presentation layer should show after an input.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SessionEvent {
    AssistantMessage(String),
    CompletionChanged(CompletionSnapshot),
    SubmitAvailable,
    /// Draft narrative to place in the input box for editing.
    DraftReady(String),
    ListeningChanged(bool),
    /// Speech capture is not available; hide the control.
    SpeechUnavailable,
}

pub struct SessionController {
    id: String,
    record: Record,
    transcript: Transcript,
    state: SessionState,
    ready: bool,
    listening: bool,
    speech_available: bool,
    services: Services,
}

impl SessionController {
    pub fn new(id: impl Into<String>, services: Services, config: SessionConfig) -> Self {
        Self {
            id: id.into(),
            record: Record::new(),
            transcript: Transcript::new(),
            state: SessionState::Idle,
            ready: false,
            listening: false,
            speech_available: config.speech_available,
            services,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn completion(&self) -> CompletionSnapshot {
        CompletionSnapshot::of(&self.record)
    }

    /// Events to render when the session is first shown.
    pub fn start(&self) -> Vec<SessionEvent> {
        let mut events = vec![SessionEvent::AssistantMessage(WELCOME_MESSAGE.to_string())];
        if !self.speech_available {
            events.push(SessionEvent::SpeechUnavailable);
        }
        events.push(SessionEvent::CompletionChanged(self.completion()));
        events
    }

    pub async fn handle(&mut self, input: Input) -> Result<Vec<SessionEvent>> {
        debug!(session_id = %self.id, state = ?self.state, input = input_kind(&input), "handling input");
        match input {
            Input::Utterance(text) => self.send_utterance(&text).await,
            Input::SpeechResult(text) => {
                if self.state.is_busy() {
                    return Err(SessionError::Busy(self.id.clone()));
                }
                let mut events = self.stop_listening();
                events.extend(self.send_utterance(&text).await?);
                Ok(events)
            }
            Input::ToggleListening => Ok(self.toggle_listening()),
            Input::SpeechEnded => Ok(self.stop_listening()),
            Input::SpeechFailed(reason) => {
                warn!(session_id = %self.id, reason = %reason, "speech recognition error");
                Ok(self.stop_listening())
            }
            Input::Submit => self.submit().await,
            Input::GenerateReport => self.generate_report().await,
        }
    }

    /// Send one utterance through the interpreter and apply the outcome.
    pub async fn send_utterance(&mut self, text: &str) -> Result<Vec<SessionEvent>> {
        let Some(request) = self.begin_utterance(text)? else {
            return Ok(Vec::new());
        };
        let interpreter = self.services.interpreter.clone();
        let pending = PendingCall::new(&self.id, &mut self.state, self.ready);
        let outcome = interpreter.interpret(&request).await;
        pending.finish();
        Ok(self.complete_utterance(outcome))
    }

    /// First half of an utterance: record the user turn and build the request.
    ///
    /// Returns `None` for blank input, which is ignored.
    pub fn begin_utterance(&mut self, text: &str) -> Result<Option<InterpretRequest>> {
        if self.state.is_busy() {
            warn!(session_id = %self.id, state = ?self.state, "rejecting utterance while a request is in flight");
            return Err(SessionError::Busy(self.id.clone()));
        }
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }

        self.transcript.add_user(text);
        self.state = SessionState::AwaitingInterpretation;
        info!(session_id = %self.id, turns = self.transcript.len(), "awaiting interpretation");

        Ok(Some(InterpretRequest {
            user_message: text.to_string(),
            current_record: self.record.clone(),
            chat_history: self.transcript.clone(),
        }))
    }

    /// Second half of an utterance: apply the interpreter's answer, or report
    /// its failure without touching the record or the log.
    pub fn complete_utterance(
        &mut self,
        outcome: std::result::Result<InterpretationResult, ClientError>,
    ) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        match outcome {
            Ok(result) => {
                if let Some(message) = result.message.filter(|m| !m.is_empty()) {
                    self.transcript.add_assistant(message.clone());
                    events.push(SessionEvent::AssistantMessage(message));
                }

                if let Some(delta) = result.updated_record {
                    let applied = self.record.merge(delta);
                    info!(session_id = %self.id, fields = ?applied, "record updated");
                    events.push(SessionEvent::CompletionChanged(self.completion()));
                }

                if result.ready_to_insert.unwrap_or(false) {
                    info!(session_id = %self.id, "record is complete and ready to insert");
                    self.ready = true;
                    events.push(SessionEvent::SubmitAvailable);
                }

                if let Some(prompt) = result.next_prompt.map(|p| p.prompt).filter(|p| !p.is_empty()) {
                    events.push(SessionEvent::AssistantMessage(prompt));
                }
            }
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "interpretation failed");
                events.push(SessionEvent::AssistantMessage(format!("An error occurred: {e}")));
            }
        }

        self.state = self.resting_state();
        events
    }

    /// Persist the record. Only allowed once the interpreter flagged it ready.
    pub async fn submit(&mut self) -> Result<Vec<SessionEvent>> {
        if self.state.is_busy() {
            return Err(SessionError::Busy(self.id.clone()));
        }
        if self.state != SessionState::ReadyToSubmit {
            return Err(SessionError::NotReady);
        }

        self.state = SessionState::AwaitingSubmission;
        let submitter = self.services.submitter.clone();
        let pending = PendingCall::new(&self.id, &mut self.state, self.ready);
        let outcome = submitter.submit(&self.record).await;
        pending.finish();

        let events = match outcome {
            Ok(response) => {
                info!(session_id = %self.id, "record submitted, starting a new record");
                self.record.reset();
                self.ready = false;
                let message = response
                    .message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| DEFAULT_SUBMIT_MESSAGE.to_string());
                vec![
                    SessionEvent::AssistantMessage(message),
                    SessionEvent::CompletionChanged(self.completion()),
                ]
            }
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "submission failed");
                vec![SessionEvent::AssistantMessage(format!(
                    "Error submitting record: {e}"
                ))]
            }
        };

        self.state = self.resting_state();
        Ok(events)
    }

    /// Ask for a draft narrative of the current record. Never changes the record.
    pub async fn generate_report(&mut self) -> Result<Vec<SessionEvent>> {
        if self.state.is_busy() {
            return Err(SessionError::Busy(self.id.clone()));
        }

        let reporter = self.services.reporter.clone();
        let outcome = reporter
            .generate_report(&self.record)
            .await
            .and_then(|response| {
                response
                    .field_report
                    .filter(|report| !report.is_empty())
                    .ok_or(ClientError::EmptyReport)
            });

        Ok(match outcome {
            Ok(report) => {
                info!(session_id = %self.id, length = report.len(), "field report generated");
                vec![
                    SessionEvent::DraftReady(report),
                    SessionEvent::AssistantMessage(DRAFT_READY_MESSAGE.to_string()),
                ]
            }
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "field report generation failed");
                vec![SessionEvent::AssistantMessage(format!(
                    "Error generating field report: {e}"
                ))]
            }
        })
    }

    /// Abandon a call started with [`begin_utterance`](Self::begin_utterance)
    /// whose outcome will never arrive. The user turn stays in the log.
    pub fn cancel_pending(&mut self) {
        if self.state.is_busy() {
            warn!(session_id = %self.id, state = ?self.state, "pending call abandoned");
            self.state = self.resting_state();
        }
    }

    fn toggle_listening(&mut self) -> Vec<SessionEvent> {
        if !self.speech_available {
            return vec![SessionEvent::SpeechUnavailable];
        }
        self.listening = !self.listening;
        vec![SessionEvent::ListeningChanged(self.listening)]
    }

    fn stop_listening(&mut self) -> Vec<SessionEvent> {
        if !self.listening {
            return Vec::new();
        }
        self.listening = false;
        vec![SessionEvent::ListeningChanged(false)]
    }

    fn resting_state(&self) -> SessionState {
        if self.ready {
            SessionState::ReadyToSubmit
        } else {
            SessionState::Idle
        }
    }
}

/// Returns the session to rest if an outbound call is dropped before it settles.
struct PendingCall<'a> {
    session_id: &'a str,
    state: &'a mut SessionState,
    ready: bool,
    settled: bool,
}

impl<'a> PendingCall<'a> {
    fn new(session_id: &'a str, state: &'a mut SessionState, ready: bool) -> Self {
        Self {
            session_id,
            state,
            ready,
            settled: false,
        }
    }

    fn finish(mut self) {
        self.settled = true;
    }
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        warn!(session_id = %self.session_id, state = ?self.state, "outbound call cancelled");
        *self.state = if self.ready {
            SessionState::ReadyToSubmit
        } else {
            SessionState::Idle
        };
    }
}

fn input_kind(input: &Input) -> &'static str {
    match input {
        Input::Utterance(_) => "utterance",
        Input::SpeechResult(_) => "speech_result",
        Input::ToggleListening => "toggle_listening",
        Input::SpeechEnded => "speech_ended",
        Input::SpeechFailed(_) => "speech_failed",
        Input::Submit => "submit",
        Input::GenerateReport => "generate_report",
    }
}
