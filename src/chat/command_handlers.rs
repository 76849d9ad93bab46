use std::io::{stdout, Write};
use colored::*;

use weai::llm::sanitize::LabelFilter;
use weai::llm::{ChatService, FinishReason};
use super::display::{display_history, display_model_summary};

pub(super) fn handle_history(service: &ChatService) {
    display_history(&service.history());
}

pub(super) fn handle_reset(service: &ChatService) {
    match service.reset_conversation() {
        Ok(()) => println!("{}", "Conversation cleared.".green()),
        Err(e) => println!("{}", format!("Error: {}", e).yellow()),
    }
}

pub(super) fn handle_model_info(service: &ChatService) {
    display_model_summary(service.model());
}

/// Streams one answer to the terminal. Ctrl-C cancels it and keeps what
/// was generated so far.
pub(super) async fn handle_generate(service: &ChatService, prompt: &str) {
    let mut turn = match service.generate_stream(prompt).await {
        Ok(turn) => turn,
        Err(e) => {
            println!("{}", format!("Error: {}", e).yellow());
            return;
        }
    };

    print!("\n{} ", "[assistant]".yellow().bold());
    let _ = stdout().flush();

    let cancel = turn.cancel_handle();
    let mut filter = LabelFilter::new();
    loop {
        tokio::select! {
            fragment = turn.next_fragment() => match fragment {
                Some(fragment) => {
                    print!("{}", filter.push(&fragment).bright_cyan());
                    let _ = stdout().flush();
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => {
                cancel.cancel();
            }
        }
    }
    println!("{}", filter.finish().bright_cyan());

    match turn.finish().await {
        Ok(outcome) => {
            if outcome.finish_reason == FinishReason::Cancelled {
                println!("{}", "[Generation Interrupted]".yellow());
            }
            if outcome.dropped_messages > 0 {
                println!(
                    "{}",
                    format!("({} earlier messages no longer fit the context)", outcome.dropped_messages).bright_black()
                );
            }
        }
        Err(e) => println!("{}", format!("Error: {}", e).yellow()),
    }
}
