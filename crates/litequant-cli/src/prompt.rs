//! Interactive yes/no questions.

use std::io::{self, BufRead, Write};

/// Ask `question` on `output` and read one answer line from `input`.
///
/// Only `y` (any case, surrounding whitespace ignored) counts as consent.
/// End of input counts as a refusal.
pub fn confirm<R: BufRead, W: Write>(input: &mut R, output: &mut W, question: &str) -> io::Result<bool> {
    write!(output, "{question}")?;
    output.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(answer.trim().eq_ignore_ascii_case("y"))
}

/// Ask `question` on the terminal.
pub fn confirm_stdin(question: &str) -> io::Result<bool> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    confirm(&mut stdin.lock(), &mut stdout, question)
}
