use dictation_flow::{
    CompletionSnapshot, Input, Record, SessionController, SessionEvent, SessionState, Transcript,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: Option<String>,
    #[serde(default)]
    pub content: String,
}

/// Speech-recognition callbacks forwarded by the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SpeechRequest {
    Toggle,
    Result { text: String },
    Ended,
    Failed {
        #[serde(default)]
        reason: String,
    },
}

impl From<SpeechRequest> for Input {
    fn from(request: SpeechRequest) -> Self {
        match request {
            SpeechRequest::Toggle => Input::ToggleListening,
            SpeechRequest::Result { text } => Input::SpeechResult(text),
            SpeechRequest::Ended => Input::SpeechEnded,
            SpeechRequest::Failed { reason } => Input::SpeechFailed(reason),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub session_id: String,
    pub state: SessionState,
    pub events: Vec<SessionEvent>,
}

/// Full state of a session for rendering the form and the chat.
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub session_id: String,
    pub state: SessionState,
    pub listening: bool,
    pub record: Record,
    pub completion: CompletionSnapshot,
    pub chat_history: Transcript,
}

impl SessionView {
    pub fn of(session: &SessionController) -> Self {
        Self {
            session_id: session.id().to_string(),
            state: session.state(),
            listening: session.is_listening(),
            record: session.record().clone(),
            completion: session.completion(),
            chat_history: session.transcript().clone(),
        }
    }
}
