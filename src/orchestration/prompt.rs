//! Terminal prompt for interactive runs

use crate::core::error::PublishError;
use crate::core::traits::{Prompt, StepDecision};
use async_trait::async_trait;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Reads answers from stdin
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinPrompt;

impl StdinPrompt {
    async fn ask(&self, question: &str) -> Result<String, PublishError> {
        let mut stdout = io::stdout();
        stdout.write_all(question.as_bytes()).await?;
        stdout.write_all(b" ").await?;
        stdout.flush().await?;

        let mut reader = BufReader::new(io::stdin());
        let mut answer = String::new();
        reader.read_line(&mut answer).await?;
        Ok(answer.trim().to_lowercase())
    }
}

#[async_trait]
impl Prompt for StdinPrompt {
    async fn confirm(&self, message: &str) -> Result<bool, PublishError> {
        let answer = self.ask(&format!("{} (yes/no):", message)).await?;
        Ok(parse_confirm(&answer))
    }

    async fn decide(&self, message: &str) -> Result<StepDecision, PublishError> {
        loop {
            let answer = self
                .ask(&format!("{} [r]etry/[c]ontinue/[a]bort:", message))
                .await?;
            if let Some(decision) = parse_decision(&answer) {
                return Ok(decision);
            }
        }
    }
}

fn parse_confirm(answer: &str) -> bool {
    answer == "yes" || answer == "y"
}

fn parse_decision(answer: &str) -> Option<StepDecision> {
    match answer {
        "r" | "retry" => Some(StepDecision::Retry),
        "c" | "continue" => Some(StepDecision::Continue),
        "a" | "abort" => Some(StepDecision::Abort),
        // EOF on stdin
        "" => Some(StepDecision::Abort),
        _ => None,
    }
}
