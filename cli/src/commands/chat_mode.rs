use clap::Subcommand;
use serde_json::json;
use uuid::Uuid;

use crate::util::{api_request, exit_error, read_json_from_file};

#[derive(Subcommand)]
pub enum ChatModeCommands {
    /// Show the derived chat mode and the context behind it
    Show {
        #[arg(long)]
        home: Uuid,
    },
    /// Route a message and get the mode and updated session back
    Ask {
        #[arg(long)]
        home: Uuid,
        #[arg(long)]
        message: String,
        /// Session JSON from a previous reply (file path or '-' for stdin)
        #[arg(long)]
        session: Option<String>,
        /// Leave interpretive mode
        #[arg(long)]
        exit_interpretive: bool,
    },
}

pub async fn run(api_url: &str, token: &str, command: ChatModeCommands) -> i32 {
    match command {
        ChatModeCommands::Show { home } => {
            api_request(
                api_url,
                reqwest::Method::GET,
                &format!("/v1/homes/{home}/chat-mode"),
                Some(token),
                None,
                &[],
            )
            .await
        }
        ChatModeCommands::Ask {
            home,
            message,
            session,
            exit_interpretive,
        } => {
            let session = match session {
                Some(source) => {
                    let value = read_json_from_file(&source)
                        .unwrap_or_else(|e| exit_error(&e, None));
                    // Accept either a bare session or a whole previous reply.
                    value.get("session").cloned().unwrap_or(value)
                }
                None => json!({}),
            };
            let body = json!({
                "message": message,
                "session": session,
                "exit_interpretive": exit_interpretive,
            });
            api_request(
                api_url,
                reqwest::Method::POST,
                &format!("/v1/homes/{home}/chat-mode/message"),
                Some(token),
                Some(body),
                &[],
            )
            .await
        }
    }
}
