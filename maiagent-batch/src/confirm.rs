use std::io::{self, BufRead, Write};

pub const CONFIRMATION_WORD: &str = "YES";

/// Prints `prompt` and reads one line; only the exact word `YES` confirms.
pub fn confirm<R, W>(input: &mut R, output: &mut W, prompt: &str) -> io::Result<bool>
where
    R: BufRead,
    W: Write,
{
    write!(output, "{prompt} Type '{CONFIRMATION_WORD}' to confirm: ")?;
    output.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']) == CONFIRMATION_WORD)
}

pub fn confirm_on_terminal(prompt: &str) -> io::Result<bool> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    confirm(&mut stdin.lock(), &mut stdout, prompt)
}
