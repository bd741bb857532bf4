// Library root
// -----------
// This crate exposes a small library surface for the CLI. The binary
// (`main.rs`) parses the arguments with `router::parse`, initialises logging
// from the parsed flags and hands the command to `router::execute`.
//
// Module responsibilities:
// - `config`: the persisted client configuration and the `ConfigStore`
//   that owns the file on disk.
// - `api`: the blocking HTTP client that talks to the encryption service
//   (status, encrypt, versions) including timeouts and retries.
// - `router`: the command surface (clap definitions), dispatch and exit codes.
// - `ui`: terminal rendering, prompts and progress spinners.
// - `error`: the typed error every fallible operation returns.
// - `logger`: env_logger setup.
pub mod api;
pub mod config;
pub mod error;
pub mod logger;
pub mod router;
pub mod ui;

pub use error::{ClientError, Result};
