use std::io::{self, BufRead, Write};

use crate::error::{DwsError, ErrorContext, Result};

/// Execution context threaded through every operation.
///
/// Carries the batch/verbose switches that the command line sets once per
/// invocation, instead of relying on process-global state. In batch mode no
/// prompt is ever shown: confirmations auto-approve and prompts that have no
/// default fail with a configuration error.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionContext {
    pub batch: bool,
    pub verbose: bool,
}

impl ExecutionContext {
    pub fn new(batch: bool, verbose: bool) -> Self {
        Self { batch, verbose }
    }

    /// Ask a yes/no question. Empty input counts as yes.
    pub fn confirm(&self, prompt: &str) -> Result<bool> {
        if self.batch {
            return Ok(true);
        }
        print!("{} [Y/n] ", prompt);
        io::stdout()
            .flush()
            .with_io_context(|| "flushing confirmation prompt".to_string())?;
        let mut line = String::new();
        io::stdin()
            .lock()
            .read_line(&mut line)
            .with_io_context(|| "reading confirmation response".to_string())?;
        let answer = line.trim().to_lowercase();
        Ok(answer.is_empty() || answer == "y" || answer == "yes")
    }

    /// Prompt for a value with a default. Batch mode takes the default.
    pub fn prompt_with_default(&self, prompt: &str, default: &str) -> Result<String> {
        if self.batch {
            return Ok(default.to_string());
        }
        print!("{} [{}] ", prompt, default);
        io::stdout()
            .flush()
            .with_io_context(|| "flushing prompt".to_string())?;
        let mut line = String::new();
        io::stdin()
            .lock()
            .read_line(&mut line)
            .with_io_context(|| "reading prompt response".to_string())?;
        let answer = line.trim();
        if answer.is_empty() {
            Ok(default.to_string())
        } else {
            Ok(answer.to_string())
        }
    }

    /// Prompt for a value that has no sensible default. Fails in batch mode.
    pub fn prompt_required(&self, prompt: &str, option_hint: &str) -> Result<String> {
        if self.batch {
            return Err(DwsError::config(format!(
                "Running in batch mode, but no value provided for {}",
                option_hint
            )));
        }
        print!("{} ", prompt);
        io::stdout()
            .flush()
            .with_io_context(|| "flushing prompt".to_string())?;
        let mut line = String::new();
        io::stdin()
            .lock()
            .read_line(&mut line)
            .with_io_context(|| "reading prompt response".to_string())?;
        let answer = line.trim().to_string();
        if answer.is_empty() {
            Err(DwsError::config(format!("No value provided for {}", option_hint)))
        } else {
            Ok(answer)
        }
    }

    pub fn vlog(&self, message: &str) {
        if self.verbose {
            eprintln!("{}", message);
        }
    }
}
