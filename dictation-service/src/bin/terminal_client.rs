use anyhow::{Context, Result, anyhow};
use clap::Parser;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "terminal_client")]
#[command(about = "Dictate a procedure record against a running dictation service")]
struct Cli {
    /// Base URL of the dictation service
    #[arg(long, env = "DICTATION_SERVER_URL", default_value = "http://localhost:3000")]
    server: String,
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Say(String),
    Send,
    Submit,
    Report,
    Mic,
    Status,
    Help,
    Quit,
    Unknown(String),
}

fn parse_command(line: &str) -> Command {
    let line = line.trim();
    match line {
        "/send" => Command::Send,
        "/submit" => Command::Submit,
        "/report" => Command::Report,
        "/mic" => Command::Mic,
        "/status" => Command::Status,
        "/help" => Command::Help,
        "/quit" | "/exit" => Command::Quit,
        other if other.starts_with('/') => Command::Unknown(other.to_string()),
        other => Command::Say(other.to_string()),
    }
}

/// One line of output per session event.
fn render_event(event: &Value) -> Option<String> {
    let data = &event["data"];
    match event["type"].as_str()? {
        "assistant_message" => Some(format!("assistant> {}", data.as_str().unwrap_or_default())),
        "completion_changed" => {
            let sections = data["sections"].as_array()?;
            let lines: Vec<String> = sections
                .iter()
                .map(|s| {
                    format!(
                        "  {}: {:.1}% complete, {} / {} items completed",
                        s["label"].as_str().unwrap_or_default(),
                        s["percent"].as_f64().unwrap_or_default(),
                        s["completed"],
                        s["total"]
                    )
                })
                .collect();
            Some(lines.join("\n"))
        }
        "submit_available" => Some("  [record ready: type /submit to insert it]".to_string()),
        "draft_ready" => Some(format!(
            "draft>\n{}\n  [type /send to dictate it as is, or type an edited version]",
            data.as_str().unwrap_or_default()
        )),
        "listening_changed" => Some(if data.as_bool().unwrap_or(false) {
            "  [microphone on]".to_string()
        } else {
            "  [microphone off]".to_string()
        }),
        "speech_unavailable" => Some("  [speech capture is not available]".to_string()),
        _ => None,
    }
}

struct ServiceClient {
    http: reqwest::Client,
    server: String,
    session_id: Option<String>,
}

impl ServiceClient {
    fn new(server: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            server: server.trim_end_matches('/').to_string(),
            session_id: None,
        }
    }

    fn session_path(&self, suffix: &str) -> Result<String> {
        let id = self
            .session_id
            .as_deref()
            .ok_or_else(|| anyhow!("no session yet, say something first"))?;
        Ok(format!("{}/session/{id}{suffix}", self.server))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value> {
        let response = request.send().await.context("request failed")?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            let message = body["error"].as_str().unwrap_or("request rejected");
            return Err(anyhow!("{status}: {message}"));
        }
        Ok(body)
    }

    async fn chat(&mut self, content: &str) -> Result<Value> {
        let body = json!({ "session_id": self.session_id, "content": content });
        let response = self
            .send(self.http.post(format!("{}/chat", self.server)).json(&body))
            .await?;
        if let Some(id) = response["session_id"].as_str() {
            self.session_id = Some(id.to_string());
        }
        Ok(response)
    }

    async fn post(&self, suffix: &str, body: Option<Value>) -> Result<Value> {
        let mut request = self.http.post(self.session_path(suffix)?);
        if let Some(body) = body {
            request = request.json(&body);
        }
        self.send(request).await
    }

    async fn status(&self) -> Result<Value> {
        self.send(self.http.get(self.session_path("")?)).await
    }
}

/// Latest draft report in a response, if any.
fn draft_in(response: &Value) -> Option<String> {
    response["events"]
        .as_array()?
        .iter()
        .rev()
        .find(|event| event["type"] == "draft_ready")
        .and_then(|event| event["data"].as_str())
        .map(str::to_string)
}

fn print_events(response: &Value) {
    for line in response["events"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(render_event)
    {
        println!("{line}");
    }
}

fn print_help() {
    println!("Type to dictate. Commands: /submit /report /send /mic /status /help /quit");
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let mut client = ServiceClient::new(cli.server);

    // An empty first message opens the session and shows the greeting.
    print_events(&client.chat("").await?);
    print_help();

    let mut draft: Option<String> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let outcome = match parse_command(&line) {
            Command::Say(text) if text.is_empty() => continue,
            Command::Say(text) => client.chat(&text).await,
            Command::Send => match draft.take() {
                Some(text) => client.chat(&text).await,
                None => {
                    println!("no draft to send, use /report first");
                    continue;
                }
            },
            Command::Submit => client.post("/submit", None).await,
            Command::Report => client.post("/report", None).await,
            Command::Mic => client.post("/speech", Some(json!({"event": "toggle"}))).await,
            Command::Status => match client.status().await {
                Ok(view) => {
                    println!("{}", serde_json::to_string_pretty(&view["record"])?);
                    continue;
                }
                Err(e) => Err(e),
            },
            Command::Help => {
                print_help();
                continue;
            }
            Command::Quit => break,
            Command::Unknown(command) => {
                println!("unknown command {command}");
                print_help();
                continue;
            }
        };

        match outcome {
            Ok(response) => {
                if let Some(text) = draft_in(&response) {
                    draft = Some(text);
                }
                print_events(&response);
            }
            Err(e) => eprintln!("error: {e:#}"),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_and_dictation_are_told_apart() {
        assert_eq!(parse_command(" /submit "), Command::Submit);
        assert_eq!(parse_command("/exit"), Command::Quit);
        assert_eq!(parse_command("/foo"), Command::Unknown("/foo".to_string()));
        assert_eq!(
            parse_command("Jane Doe, 45"),
            Command::Say("Jane Doe, 45".to_string())
        );
    }

    #[test]
    fn completion_event_renders_one_line_per_section() {
        let event = json!({
            "type": "completion_changed",
            "data": {"sections": [
                {"label": "Patient Info", "completed": 2, "total": 3, "percent": 66.66666666666667},
                {"label": "Coding", "completed": 0, "total": 3, "percent": 0.0}
            ]}
        });

        assert_eq!(
            render_event(&event).unwrap(),
            "  Patient Info: 66.7% complete, 2 / 3 items completed\n  Coding: 0.0% complete, 0 / 3 items completed"
        );
    }

    #[test]
    fn draft_is_picked_from_report_response() {
        let response = json!({"events": [
            {"type": "draft_ready", "data": "45F underwent appendectomy."},
            {"type": "assistant_message", "data": "Sample field report generated."}
        ]});

        assert_eq!(draft_in(&response).as_deref(), Some("45F underwent appendectomy."));
        assert_eq!(draft_in(&json!({"events": []})), None);
        assert_eq!(parse_command("/send"), Command::Send);
    }

    #[test]
    fn unknown_events_are_skipped() {
        assert_eq!(render_event(&json!({"type": "something_else"})), None);
        assert_eq!(
            render_event(&json!({"type": "assistant_message", "data": "hi"})).unwrap(),
            "assistant> hi"
        );
    }
}
