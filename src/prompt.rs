//! Interactive prompting.
//!
//! The orchestration code never reads stdin directly. It asks a `Prompter`,
//! which is either a terminal prompt or a non-interactive stand-in that
//! refuses to answer so callers fail closed.

use std::io::{self, BufRead, IsTerminal, Write};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PromptError {
    /// A question needed an answer but nobody is there to give one.
    #[error("cannot prompt in non-interactive mode: {message}")]
    NonInteractive { message: String },

    #[error("no answer given for: {message}")]
    NoAnswer { message: String },

    #[error("prompt failed: {0}")]
    Io(#[from] io::Error),
}

/// One entry in a selection list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    /// What the user sees.
    pub label: String,
    /// What the prompt returns.
    pub value: String,
}

pub trait Prompter: Send + Sync {
    /// Whether the prompter can actually reach a human.
    fn is_interactive(&self) -> bool;

    /// Pick one value from `choices`.
    fn select(&self, message: &str, choices: &[Choice]) -> Result<String, PromptError>;

    /// Ask a yes/no question.
    fn confirm(&self, message: &str, default: bool) -> Result<bool, PromptError>;
}

/// Prompts on stdin/stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompter;

impl TerminalPrompter {
    /// Interactive only when both ends are a terminal and CI is not set.
    pub fn detect() -> Box<dyn Prompter> {
        let ci = std::env::var_os("CI").is_some();
        if !ci && io::stdin().is_terminal() && io::stdout().is_terminal() {
            Box::new(Self)
        } else {
            Box::new(NonInteractivePrompter)
        }
    }
}

impl Prompter for TerminalPrompter {
    fn is_interactive(&self) -> bool {
        true
    }

    fn select(&self, message: &str, choices: &[Choice]) -> Result<String, PromptError> {
        select_from(&mut io::stdin().lock(), &mut io::stdout(), message, choices)
    }

    fn confirm(&self, message: &str, default: bool) -> Result<bool, PromptError> {
        confirm_from(&mut io::stdin().lock(), &mut io::stdout(), message, default)
    }
}

/// Reads one trimmed answer. End of input means nobody will answer.
fn read_answer<R: BufRead>(input: &mut R, message: &str) -> Result<String, PromptError> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(PromptError::NoAnswer {
            message: message.to_string(),
        });
    }
    Ok(line.trim().to_string())
}

fn select_from<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    message: &str,
    choices: &[Choice],
) -> Result<String, PromptError> {
    if choices.is_empty() {
        return Err(PromptError::NoAnswer {
            message: message.to_string(),
        });
    }
    loop {
        writeln!(output, "? {}", message)?;
        for (idx, choice) in choices.iter().enumerate() {
            writeln!(output, "  {}) {}", idx + 1, choice.label)?;
        }
        write!(output, "  Answer [1-{}]: ", choices.len())?;
        output.flush()?;
        let answer = read_answer(input, message)?;
        if let Some(choice) = answer
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|idx| choices.get(idx))
        {
            return Ok(choice.value.clone());
        }
        writeln!(output, "  Please enter a number between 1 and {}.", choices.len())?;
    }
}

fn confirm_from<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    message: &str,
    default: bool,
) -> Result<bool, PromptError> {
    let hint = if default { "Y/n" } else { "y/N" };
    write!(output, "? {} ({}) ", message, hint)?;
    output.flush()?;
    let answer = read_answer(input, message)?;
    Ok(parse_confirm(&answer).unwrap_or(default))
}

/// Refuses every question.
#[derive(Debug, Default, Clone, Copy)]
pub struct NonInteractivePrompter;

impl Prompter for NonInteractivePrompter {
    fn is_interactive(&self) -> bool {
        false
    }

    fn select(&self, message: &str, _choices: &[Choice]) -> Result<String, PromptError> {
        Err(PromptError::NonInteractive {
            message: message.to_string(),
        })
    }

    fn confirm(&self, message: &str, _default: bool) -> Result<bool, PromptError> {
        Err(PromptError::NonInteractive {
            message: message.to_string(),
        })
    }
}

fn parse_confirm(answer: &str) -> Option<bool> {
    match answer.to_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}
