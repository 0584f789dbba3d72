use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::io::{self, Result};

pub enum Command {
  Step(u32), // Step N cycles
  Quit,
  Continue,
}

pub struct Shell {
  editor: DefaultEditor,
}

impl Shell {
  pub fn new() -> Result<Self> {
    let editor = DefaultEditor::new().map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    Ok(Self { editor })
  }

  pub fn read_command(&mut self) -> Result<Command> {
    loop {
      match self.editor.readline("(axon) ") {
        Ok(line) => {
          let trimmed = line.trim();

          if !trimmed.is_empty() {
            let _ = self.editor.add_history_entry(trimmed);
          }

          // Empty input: step once
          if trimmed.is_empty() {
            return Ok(Command::Step(1));
          }

          // si command: step N cycles
          if let Some(num_str) = trimmed.strip_prefix("si") {
            let num_str = num_str.trim();

            if num_str.is_empty() {
              eprintln!("Error: 'si' requires a number, e.g., 'si 100'");
              continue;
            }

            return match num_str.parse::<u32>() {
              Ok(n) if n > 0 => Ok(Command::Step(n)),
              Ok(_) => {
                eprintln!("Error: step count must be greater than 0");
                continue;
              }
              Err(e) => {
                eprintln!("Error: invalid number '{}': {}", num_str, e);
                continue;
              }
            };
          }

          if trimmed == "q" {
            return Ok(Command::Quit);
          }

          if trimmed == "c" {
            return Ok(Command::Continue);
          }

          eprintln!(
            "Unknown command: '{}'. Use Enter to step, 'q' to quit, 'c' to continue, or 'si 100' to step N cycles",
            trimmed
          );
        }
        Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
          return Ok(Command::Quit);
        }
        Err(err) => {
          return Err(io::Error::new(io::ErrorKind::Other, err));
        }
      }
    }
  }
}
