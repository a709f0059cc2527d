use anyhow::{
    Context,
    Result,
    bail,
};
use rpassword::prompt_password;
use std::io::{
    self,
    BufRead,
    Write,
};

/// Operator questions asked during a deploy.
pub trait Prompter {
    fn confirm(&mut self, message: &str, default: bool) -> Result<bool>;

    /// Blank input yields `default` (or the empty string without one).
    fn input(&mut self, message: &str, default: Option<&str>) -> Result<String>;

    /// Hidden input.
    fn secret(&mut self, message: &str) -> Result<String>;

    /// Returns the index of the chosen entry.
    fn select(&mut self, message: &str, choices: &[&str], default: usize) -> Result<usize>;
}

/// Asks until the answer is non-empty.
pub fn required_input<P: Prompter + ?Sized>(
    prompter: &mut P,
    message: &str,
    default: Option<&str>,
) -> Result<String> {
    loop {
        let answer = prompter.input(message, default)?;
        let trimmed = answer.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_owned());
        }
        println!("A value is required.");
    }
}

pub struct TerminalPrompter<R> {
    input: R,
}

impl TerminalPrompter<io::StdinLock<'static>> {
    pub fn stdin() -> Self {
        Self {
            input: io::stdin().lock(),
        }
    }
}

impl<R: BufRead> TerminalPrompter<R> {
    fn read_line(&mut self, prompt: &str) -> Result<String> {
        print!("{prompt}");
        io::stdout().flush().context("failed to flush stdout")?;
        let mut line = String::new();
        let read = self
            .input
            .read_line(&mut line)
            .context("failed to read answer")?;
        if read == 0 {
            bail!("input closed before an answer was given");
        }
        Ok(line.trim().to_owned())
    }
}

impl<R: BufRead> Prompter for TerminalPrompter<R> {
    fn confirm(&mut self, message: &str, default: bool) -> Result<bool> {
        let hint = if default { "[Y/n]" } else { "[y/N]" };
        loop {
            let answer = self.read_line(&format!("{message} {hint} "))?;
            match answer.to_lowercase().as_str() {
                "" => return Ok(default),
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => println!("Please answer y or n."),
            }
        }
    }

    fn input(&mut self, message: &str, default: Option<&str>) -> Result<String> {
        let prompt = match default {
            Some(d) => format!("{message} ({d}) "),
            None => format!("{message} "),
        };
        let answer = self.read_line(&prompt)?;
        if answer.is_empty() {
            return Ok(default.unwrap_or_default().to_owned());
        }
        Ok(answer)
    }

    fn secret(&mut self, message: &str) -> Result<String> {
        prompt_password(format!("{message} ")).context("failed to read hidden input")
    }

    fn select(&mut self, message: &str, choices: &[&str], default: usize) -> Result<usize> {
        println!("{message}");
        for (i, choice) in choices.iter().enumerate() {
            let marker = if i == default { "*" } else { " " };
            println!(" {marker} {}) {choice}", i + 1);
        }
        loop {
            let answer = self.read_line(&format!("Choice [{}]: ", default + 1))?;
            if answer.is_empty() {
                return Ok(default);
            }
            match answer.parse::<usize>() {
                Ok(n) if (1..=choices.len()).contains(&n) => return Ok(n - 1),
                _ => println!("Enter a number between 1 and {}.", choices.len()),
            }
        }
    }
}
