use std::io::{stdout, Write};
use anyhow::Result;
use colored::*;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use weai::llm::ChatService;
use super::command_handlers::{handle_generate, handle_history, handle_model_info, handle_reset};

fn print_help() {
    println!("\n{}", "weai Chat Commands".cyan());
    println!("{}", "=".repeat(60).bright_cyan());
    println!("{}  - Exit the chat", "/quit, /exit, /bye".green());
    println!("{}               - Show this help message", "/help".green());
    println!("{}              - Clear the screen", "/clear".green());
    println!("{}            - Show the conversation so far", "/history".green());
    println!("{}              - Start a new conversation", "/reset".green());
    println!("{}              - Show the loaded model", "/model".green());
    println!("Anything else is sent to the model. Ctrl-C stops a running answer.");
    println!();
}

// --- Main Chat Loop ---

pub async fn chat_loop(service: &ChatService) -> Result<()> {
    println!("Starting chat session with {}", service.model().summary().name.bold());
    print_help();

    let mut rl = DefaultEditor::new()?;

    loop {
        match rl.readline("[you] > ") {
            Ok(input) => {
                let input_trimmed = input.trim();
                if input_trimmed.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(input_trimmed);

                match input_trimmed.to_lowercase().as_str() {
                    "/quit" | "/exit" | "/bye" => {
                        println!("Goodbye!");
                        break;
                    }
                    "/help" => print_help(),
                    "/clear" => {
                        print!("\x1B[2J\x1B[1;1H");
                        stdout().flush()?;
                    }
                    "/history" => handle_history(service),
                    "/reset" => handle_reset(service),
                    "/model" => handle_model_info(service),
                    cmd if cmd.starts_with('/') => {
                        println!("{}", format!("Unknown command: {}. Type /help for a list.", cmd).yellow());
                    }
                    _ => handle_generate(service, input_trimmed).await,
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
