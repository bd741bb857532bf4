// UI layer: terminal output for the router. Results go to stdout, failures
// to stderr, spinners to stderr (indicatif hides them when stderr is not a
// terminal). The interactive `init` prompts use `dialoguer`.

use crate::api::{EncryptResult, EncryptStatus, PythonVersions, StatusResult};
use crate::config::{ClientConfig, DEFAULT_BASE_URL, DEFAULT_TIMEOUT_SECS};
use crate::error::ClientError;
use crossterm::style::{Color, Stylize};
use dialoguer::{Input, Password};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use std::path::Path;
use std::time::Duration;

/// Spinner shown while a request is in flight. Call `finish_and_clear` when
/// the request returns.
pub fn spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner} {msg}").unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Result marker, coloured only when the stream it goes to is a terminal.
fn mark(symbol: &str, color: Color, tty: bool) -> String {
    if tty {
        symbol.with(color).to_string()
    } else {
        symbol.to_string()
    }
}

fn ok_mark() -> String {
    mark("✓", Color::Green, std::io::stdout().is_terminal())
}

fn fail_mark(on_stderr: bool) -> String {
    let tty = if on_stderr { std::io::stderr().is_terminal() } else { std::io::stdout().is_terminal() };
    mark("✗", Color::Red, tty)
}

/// Print a single-line failure on stderr.
pub fn print_error(err: &ClientError) {
    eprintln!("{} {}", fail_mark(true), err);
}

pub fn print_status(base_url: &str, status: &StatusResult) {
    if status.reachable {
        println!("{} Service reachable: {}", ok_mark(), base_url);
    } else {
        println!("{} Service unreachable: {}", fail_mark(false), base_url);
    }
    if let Some(version) = &status.version {
        println!("  version: {version}");
    }
    if let Some(message) = &status.message {
        println!("  message: {message}");
    }
}

pub fn print_encrypt_result(result: &EncryptResult) {
    match &result.status {
        EncryptStatus::Success => {
            println!("{} Encrypted artifact written", ok_mark());
            println!("  path: {}", result.output_path.display());
            println!("  size: {} bytes", result.size_bytes);
        }
        EncryptStatus::Failure(err) => eprintln!("{} Encryption failed: {}", fail_mark(true), err),
    }
}

pub fn print_versions(versions: &PythonVersions) {
    if versions.versions.is_empty() {
        println!("No Python versions available on the service.");
        return;
    }
    let default = versions.default_version.as_ref().map(|v| v.version.as_str());
    println!("Available Python versions:");
    for v in &versions.versions {
        let marker = if Some(v.version.as_str()) == default { " (default)" } else { "" };
        match &v.full_version {
            Some(full) => println!("  {}: {}{}", v.version, full, marker),
            None => println!("  {}{}", v.version, marker),
        }
        if let Some(path) = &v.path {
            println!("    path: {path}");
        }
    }
}

pub fn print_config(path: &Path, config: &ClientConfig) {
    println!("Config file: {}", path.display());
    println!("  base_url:       {}", config.base_url.as_deref().unwrap_or("(not set)"));
    println!(
        "  api_token:      {}",
        config.api_token.as_deref().map(mask_token).unwrap_or_else(|| "(not set)".into())
    );
    println!("  python_version: {}", config.python_version.as_deref().unwrap_or("(not set)"));
    println!("  timeout:        {} s", config.timeout_secs_or_default());
}

pub fn print_saved(path: &Path) {
    println!("{} Configuration saved to {}", ok_mark(), path.display());
}

/// Show only the last four characters of a token.
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 4 {
        return "****".into();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{tail}")
}

/// Ask for every setting, offering `current` values as defaults. Empty
/// answers leave optional fields unset.
pub fn prompt_config(current: &ClientConfig) -> std::io::Result<ClientConfig> {
    let base_url: String = Input::new()
        .with_prompt("Service base URL")
        .default(current.base_url_or_default().to_string())
        .interact_text()?;

    let token: String = Password::new()
        .with_prompt("API token (leave empty for none)")
        .allow_empty_password(true)
        .interact()?;

    let python_version: String = Input::new()
        .with_prompt("Default Python version (leave empty for service default)")
        .default(current.python_version.clone().unwrap_or_default())
        .allow_empty(true)
        .interact_text()?;

    let timeout_secs: u64 = Input::new()
        .with_prompt("Request timeout in seconds")
        .default(current.timeout_secs.filter(|t| *t > 0).unwrap_or(DEFAULT_TIMEOUT_SECS))
        .validate_with(|secs: &u64| if *secs == 0 { Err("timeout must be at least 1 second") } else { Ok(()) })
        .interact_text()?;

    Ok(ClientConfig {
        base_url: Some(if base_url.trim().is_empty() { DEFAULT_BASE_URL.to_string() } else { base_url.trim().to_string() }),
        api_token: Some(token).filter(|t| !t.is_empty()),
        python_version: Some(python_version.trim().to_string()).filter(|v| !v.is_empty()),
        timeout_secs: Some(timeout_secs),
    })
}

#[cfg(test)]
mod tests {
    use super::{mark, mask_token};
    use crossterm::style::Color;

    #[test]
    fn tokens_are_masked() {
        assert_eq!(mask_token("abcdef123456"), "****3456");
        assert_eq!(mask_token("abc"), "****");
    }

    #[test]
    fn markers_are_plain_when_not_a_terminal() {
        assert_eq!(mark("✓", Color::Green, false), "✓");
        assert_eq!(mark("✗", Color::Red, false), "✗");
    }
}
