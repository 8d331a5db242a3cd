//! The one-key console menu every workflow starts with.

use std::io::{self, BufRead, Write};

/// The answer is read as a whole line, so a key press alone is not enough.
pub const PROMPT: &str = "Press A to train and save a model, \
     press B to make predictions with a saved model, then press Enter";
pub const WRONG_ANSWER: &str = "Wrong answer!";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    Train,
    Predict,
    /// Anything else, including end of input.
    Invalid,
}

impl MenuChoice {
    /// Interpret one line of input; only its first non-blank character counts.
    pub fn parse(line: &str) -> Self {
        match line.trim().chars().next().map(|c| c.to_ascii_uppercase()) {
            Some('A') => Self::Train,
            Some('B') => Self::Predict,
            _ => Self::Invalid,
        }
    }
}

/// Print the prompt to `output` and read the answer from `input`.
pub fn prompt(input: &mut impl BufRead, output: &mut impl Write) -> io::Result<MenuChoice> {
    writeln!(output, "{PROMPT}")?;
    output.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(MenuChoice::parse(&line))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_case_insensitive() {
        assert_eq!(MenuChoice::parse("a\n"), MenuChoice::Train);
        assert_eq!(MenuChoice::parse("  B"), MenuChoice::Predict);
        assert_eq!(MenuChoice::parse("b and more"), MenuChoice::Predict);
        assert_eq!(MenuChoice::parse("c"), MenuChoice::Invalid);
        assert_eq!(MenuChoice::parse(""), MenuChoice::Invalid);
    }

    #[test]
    fn prompt_writes_question_and_reads_answer() {
        let mut input = io::Cursor::new(b"A\n".to_vec());
        let mut output = Vec::new();
        let choice = prompt(&mut input, &mut output).unwrap();
        assert_eq!(choice, MenuChoice::Train);
        let text = String::from_utf8(output).unwrap();
        assert!(text.starts_with("Press A"));
        assert!(text.trim_end().ends_with("then press Enter"));
    }

    #[test]
    fn end_of_input_is_invalid() {
        let mut input = io::Cursor::new(Vec::new());
        let mut output = Vec::new();
        assert_eq!(prompt(&mut input, &mut output).unwrap(), MenuChoice::Invalid);
    }
}
