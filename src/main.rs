use std::io::Write;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use research_assistant::config::Config;
use research_assistant::models::StreamUpdate;
use research_assistant::AssistantService;

#[tokio::main]
async fn main() -> Result<()> {
    // Log to stderr so stdout stays clean for the chat transcript.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("research_assistant=info")),
        )
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load();
    let service = AssistantService::new(&config)?;

    let mut history = service.empty_history();
    let mut search_enabled = true;

    println!("Research assistant ready.");
    println!("Commands: 'search on' | 'search off' | 'find <text>' | 'quit'");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();

        match input {
            "quit" | "exit" => break,
            "search on" => {
                search_enabled = true;
                println!("Web search enabled.");
            }
            "search off" => {
                search_enabled = false;
                println!("Web search disabled.");
            }
            _ if input.starts_with("find ") => {
                let result = service.search_history(&input[5..], &history).await;
                if result.matches.is_empty() {
                    println!("No matching messages.");
                    continue;
                }
                for message in &result.matches {
                    println!("[{}] {}", message.role.as_str(), message.content);
                }
                if let Some(summary) = result.summary {
                    println!("Summary: {summary}");
                }
            }
            _ => {
                let (tx, rx) = mpsc::channel::<StreamUpdate>(32);
                let turn = service.chat_streaming(input, &history, search_enabled, tx);
                let ((new_history, outcome), _) = tokio::join!(turn, render_updates(rx));
                history = new_history;

                if !outcome.evidence.is_empty() {
                    eprintln!("[{} search results used]", outcome.evidence.len());
                }
            }
        }
    }

    Ok(())
}

/// Render incremental updates as they arrive: reasoning goes to stderr
/// so piping stdout captures only the transcript.
async fn render_updates(mut rx: mpsc::Receiver<StreamUpdate>) {
    let mut reasoning_open = false;
    while let Some(update) = rx.recv().await {
        if let Some(delta) = update.reasoning_delta {
            if !reasoning_open {
                eprint!("(thinking) ");
                reasoning_open = true;
            }
            eprint!("{delta}");
        }
        if let Some(delta) = update.answer_delta {
            if reasoning_open {
                eprintln!();
                reasoning_open = false;
            }
            print!("{delta}");
            let _ = std::io::stdout().flush();
        }
        if update.done {
            break;
        }
    }
    if reasoning_open {
        eprintln!();
    }
    println!();
}
