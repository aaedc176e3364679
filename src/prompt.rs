//! Interactive questions, kept behind a trait so the engine can run unattended
//! in tests.
use anyhow::{Context, Result};
use std::io::{self, BufRead, Write};

pub trait Prompt {
    /// Ask a yes/no question; an empty answer picks `default`.
    fn confirm(&self, question: &str, default: bool) -> Result<bool>;
    /// Show a block of text to the user.
    fn show(&self, text: &str);
}

/// Reads answers from stdin.
pub struct StdinPrompt;

impl Prompt for StdinPrompt {
    fn confirm(&self, question: &str, default: bool) -> Result<bool> {
        let hint = if default { "Y/n" } else { "y/N" };
        let mut stdout = io::stdout();
        write!(stdout, "{question} ({hint}) ").context("write prompt")?;
        stdout.flush().context("flush prompt")?;

        let mut answer = String::new();
        io::stdin()
            .lock()
            .read_line(&mut answer)
            .context("read answer")?;
        Ok(parse_answer(&answer, default))
    }

    fn show(&self, text: &str) {
        println!("{text}");
    }
}

fn parse_answer(answer: &str, default: bool) -> bool {
    match answer.trim().to_ascii_lowercase().as_str() {
        "" => default,
        "y" | "yes" => true,
        _ => false,
    }
}
