use std::io::{self, BufRead, IsTerminal, Write};

use anyhow::{Result, anyhow};
use rpassword::prompt_password;

/// Read a credential from the user.
///
/// On a terminal the input is echo-suppressed; when stdin is a pipe (CI,
/// scripted setup) a single line is read and trimmed instead.
pub fn read_secret(prompt: &str) -> Result<String> {
    if io::stdin().is_terminal() {
        return prompt_password(prompt).map_err(|err| anyhow!("read secret: {err}"));
    }
    print!("{prompt}");
    io::stdout().flush()?;
    let mut buffer = String::new();
    io::stdin().lock().read_line(&mut buffer)?;
    Ok(buffer.trim().to_string())
}
