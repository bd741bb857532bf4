// Command router: clap definitions for the command surface, dispatch to the
// config store and the service client, and exit codes. Every command runs
// exactly once per process; there is no session state.

use crate::api::{
    normalize_base_url, prepare_output_dir, EncryptRequest, EncryptResult, EncryptStatus, ServiceClient, TextRequest,
};
use crate::config::{ClientConfig, ConfigStore, DEFAULT_BASE_URL};
use crate::error::{ClientError, Result, EXIT_FAILURE, EXIT_OK, EXIT_USAGE};
use crate::ui;
use clap::error::ErrorKind;
use clap::{Args, CommandFactory, Parser, Subcommand};
use log::{debug, info};
use std::collections::HashSet;
use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

const EXAMPLES: &str = "\
Examples:
  pyencrypt-client init --base-url http://localhost:5000
  pyencrypt-client status
  pyencrypt-client encrypt-file --file main.py --output ./dist/
  pyencrypt-client encrypt-file --file project.zip --output ./dist/ --python-version 3.11
  pyencrypt-client encrypt-files --file main.py --file utils.py --output ./dist/
  pyencrypt-client encrypt-text --name test.py --content \"print('hi')\" --output ./dist/";

#[derive(Parser, Debug)]
#[command(name = "pyencrypt-client", version)]
#[command(about = "Client for the remote Python source encryption service")]
#[command(after_help = EXAMPLES)]
pub struct Cli {
    /// Config file to use instead of the per-user default
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Enable debug logging on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Flags shared by every command that talks to the service.
#[derive(Args, Debug, Clone, Default)]
pub struct ServiceArgs {
    /// Service base URL (overrides the saved config)
    #[arg(long, env = "PYENCRYPT_BASE_URL", value_name = "URL")]
    pub base_url: Option<String>,

    /// Request timeout in seconds (overrides the saved config)
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write the config file (prompts when run without flags in a terminal)
    Init {
        /// Service base URL to save
        #[arg(long, value_name = "URL")]
        base_url: Option<String>,
        /// API token sent as a bearer token
        #[arg(long)]
        token: Option<String>,
        /// Default Python version for encryption requests
        #[arg(long, value_name = "VERSION")]
        python_version: Option<String>,
        /// Default request timeout in seconds
        #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
        timeout: Option<u64>,
    },
    /// Show the config file location and its values
    Config,
    /// Check whether the service is reachable
    Status {
        #[command(flatten)]
        service: ServiceArgs,
    },
    /// List the Python versions the service can target
    Versions {
        #[command(flatten)]
        service: ServiceArgs,
    },
    /// Encrypt a single file (.py or .zip) and save the artifact
    EncryptFile {
        /// File to encrypt
        #[arg(long, value_name = "PATH")]
        file: PathBuf,
        /// Directory the encrypted artifact is written to (created if missing)
        #[arg(short, long, value_name = "DIR")]
        output: PathBuf,
        /// Python version to target (overrides the saved config)
        #[arg(long, value_name = "VERSION")]
        python_version: Option<String>,
        #[command(flatten)]
        service: ServiceArgs,
    },
    /// Encrypt several files one after another into the same directory
    EncryptFiles {
        /// File to encrypt (repeat for more files)
        #[arg(short = 'f', long = "file", value_name = "PATH", required = true)]
        files: Vec<PathBuf>,
        /// Directory the encrypted artifacts are written to (created if missing)
        #[arg(short, long, value_name = "DIR")]
        output: PathBuf,
        /// Python version to target (overrides the saved config)
        #[arg(long, value_name = "VERSION")]
        python_version: Option<String>,
        #[command(flatten)]
        service: ServiceArgs,
    },
    /// Encrypt source code given on the command line
    EncryptText {
        /// File name the service sees, e.g. test.py
        #[arg(long, value_name = "NAME")]
        name: String,
        /// Python source to encrypt
        #[arg(long, value_name = "CODE")]
        content: String,
        /// Directory the encrypted artifact is written to (created if missing)
        #[arg(short, long, value_name = "DIR")]
        output: PathBuf,
        /// Python version to target (overrides the saved config)
        #[arg(long, value_name = "VERSION")]
        python_version: Option<String>,
        #[command(flatten)]
        service: ServiceArgs,
    },
}

/// Parse `args` (including the program name), run the command and return the
/// process exit code.
pub fn run<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match parse(args) {
        Ok(cli) => execute(cli),
        Err(code) => code,
    }
}

/// Parse the command line. When clap stops early (help, version, bad
/// flags) its output is already printed and the exit code is returned as
/// the error.
pub fn parse<I, T>(args: I) -> std::result::Result<Cli, i32>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Cli::try_parse_from(args).map_err(parse_error)
}

/// Run a parsed command line and return the process exit code.
pub fn execute(cli: Cli) -> i32 {
    let store = match &cli.config {
        Some(path) => ConfigStore::new(path),
        None => ConfigStore::at_default_location(),
    };
    debug!("Using config file {}", store.path().display());
    dispatch(cli.command, &store)
}

/// Run one parsed command against `store`.
pub fn dispatch(command: Option<Commands>, store: &ConfigStore) -> i32 {
    let result = match command {
        None => Ok(show_help()),
        Some(Commands::Init {
            base_url,
            token,
            python_version,
            timeout,
        }) => init(
            store,
            ClientConfig {
                base_url,
                api_token: token,
                python_version,
                timeout_secs: timeout,
            },
        ),
        Some(Commands::Config) => {
            ui::print_config(store.path(), &store.load());
            Ok(EXIT_OK)
        }
        Some(Commands::Status { service }) => status(store, &service),
        Some(Commands::Versions { service }) => versions(store, &service),
        Some(Commands::EncryptFile {
            file,
            output,
            python_version,
            service,
        }) => encrypt_file(store, file, output, python_version, &service),
        Some(Commands::EncryptFiles {
            files,
            output,
            python_version,
            service,
        }) => encrypt_files(store, files, output, python_version, &service),
        Some(Commands::EncryptText {
            name,
            content,
            output,
            python_version,
            service,
        }) => encrypt_text(store, name, content, output, python_version, &service),
    };
    match result {
        Ok(code) => code,
        Err(e) => {
            ui::print_error(&e);
            e.exit_code()
        }
    }
}

/// Help, version and unknown commands print usage and succeed; anything else
/// clap rejects is a usage error.
fn parse_error(err: clap::Error) -> i32 {
    match err.kind() {
        ErrorKind::DisplayHelp
        | ErrorKind::DisplayVersion
        | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
            let _ = err.print();
            EXIT_OK
        }
        ErrorKind::InvalidSubcommand => show_help(),
        _ => {
            let _ = err.print();
            EXIT_USAGE
        }
    }
}

fn show_help() -> i32 {
    let _ = Cli::command().print_help();
    println!();
    EXIT_OK
}

fn init(store: &ConfigStore, flags: ClientConfig) -> Result<i32> {
    let interactive = flags == ClientConfig::default() && std::io::stdin().is_terminal();
    let mut config = if interactive {
        ui::prompt_config(&store.load())
            .map_err(|e| ClientError::Usage(format!("cannot read input: {e}")))?
    } else {
        flags
    };

    let base_url = config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
    config.base_url = Some(normalize_base_url(base_url)?);

    store.save(&config)?;
    ui::print_saved(store.path());
    Ok(EXIT_OK)
}

/// Build a client from the saved config with command-line overrides applied.
fn build_client(config: &ClientConfig, service: &ServiceArgs) -> Result<ServiceClient> {
    let base_url = service
        .base_url
        .as_deref()
        .unwrap_or_else(|| config.base_url_or_default());
    let timeout = Duration::from_secs(service.timeout.unwrap_or_else(|| config.timeout_secs_or_default()));

    let mut builder = ServiceClient::builder(base_url)
        .token(config.api_token.clone())
        .transfer_timeout(timeout);
    if service.timeout.is_some() {
        builder = builder.status_timeout(timeout);
    }
    let client = builder.build()?;
    debug!("Service base URL: {}", client.base_url());
    Ok(client)
}

fn status(store: &ConfigStore, service: &ServiceArgs) -> Result<i32> {
    let client = build_client(&store.load(), service)?;

    let spinner = ui::spinner("Checking service status...");
    let status = client.check_status();
    spinner.finish_and_clear();

    ui::print_status(client.base_url(), &status);
    Ok(if status.reachable { EXIT_OK } else { EXIT_FAILURE })
}

fn versions(store: &ConfigStore, service: &ServiceArgs) -> Result<i32> {
    let client = build_client(&store.load(), service)?;

    let spinner = ui::spinner("Fetching Python versions...");
    let versions = client.python_versions();
    spinner.finish_and_clear();

    ui::print_versions(&versions?);
    Ok(EXIT_OK)
}

fn encrypt_file(
    store: &ConfigStore,
    file: PathBuf,
    output: PathBuf,
    python_version: Option<String>,
    service: &ServiceArgs,
) -> Result<i32> {
    let config = store.load();
    let client = build_client(&config, service)?;
    let request = EncryptRequest::new(file, output).with_python_version(python_version.or(config.python_version));

    // Local problems are reported before anything touches the network.
    request.validate()?;

    let spinner = ui::spinner(&format!("Encrypting {}...", request.file_path.display()));
    let result = client.encrypt_file(&request);
    spinner.finish_and_clear();

    ui::print_encrypt_result(&result);
    Ok(result_code(&result))
}

/// Encrypt each file in turn. Every source is checked before the first
/// upload; a failed upload does not stop the remaining ones.
fn encrypt_files(
    store: &ConfigStore,
    files: Vec<PathBuf>,
    output: PathBuf,
    python_version: Option<String>,
    service: &ServiceArgs,
) -> Result<i32> {
    let config = store.load();
    let client = build_client(&config, service)?;
    let python_version = python_version.or(config.python_version);

    let requests: Vec<EncryptRequest> = files
        .into_iter()
        .map(|file| EncryptRequest::new(file, &output).with_python_version(python_version.clone()))
        .collect();
    let mut names = HashSet::new();
    for request in &requests {
        let (file_name, _) = request.validate_source()?;
        if !names.insert(file_name.clone()) {
            return Err(ClientError::Usage(format!(
                "two files would both be written to {}",
                request.output_path(&file_name).display()
            )));
        }
    }
    prepare_output_dir(&output)?;

    let mut failed = 0;
    for request in &requests {
        let spinner = ui::spinner(&format!("Encrypting {}...", request.file_path.display()));
        let result = client.encrypt_file(request);
        spinner.finish_and_clear();

        ui::print_encrypt_result(&result);
        if !result.is_success() {
            failed += 1;
        }
    }
    info!("{} of {} files encrypted", requests.len() - failed, requests.len());
    Ok(if failed == 0 { EXIT_OK } else { EXIT_FAILURE })
}

fn encrypt_text(
    store: &ConfigStore,
    name: String,
    content: String,
    output: PathBuf,
    python_version: Option<String>,
    service: &ServiceArgs,
) -> Result<i32> {
    let config = store.load();
    let client = build_client(&config, service)?;
    let request = TextRequest::new(name, content, output).with_python_version(python_version.or(config.python_version));
    request.validate_name()?;

    let spinner = ui::spinner(&format!("Encrypting {}...", request.name.trim()));
    let result = client.encrypt_text(&request);
    spinner.finish_and_clear();

    ui::print_encrypt_result(&result);
    Ok(result_code(&result))
}

fn result_code(result: &EncryptResult) -> i32 {
    match &result.status {
        EncryptStatus::Success => EXIT_OK,
        EncryptStatus::Failure(e) => e.exit_code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_arguments_is_help() {
        let cli = Cli::try_parse_from(["pyencrypt-client"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn encrypt_file_requires_file_and_output() {
        let err = Cli::try_parse_from(["pyencrypt-client", "encrypt-file", "--file", "main.py"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        assert_eq!(parse_error(err), EXIT_USAGE);
    }

    #[test]
    fn verbose_flag_is_parsed_once() {
        let cli = parse(["pyencrypt-client", "status", "-v"]).unwrap();
        assert!(cli.verbose);
        let cli = parse(["pyencrypt-client", "--verbose", "config"]).unwrap();
        assert!(cli.verbose);
        // A file literally named `-v` is a value, not the flag.
        let cli = parse(["pyencrypt-client", "encrypt-file", "--file=-v", "-o", "dist"]).unwrap();
        assert!(!cli.verbose);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = parse(["pyencrypt-client", "status", "--timeout", "0"]).unwrap_err();
        assert_eq!(err, EXIT_USAGE);
        let err = parse(["pyencrypt-client", "init", "--timeout", "0"]).unwrap_err();
        assert_eq!(err, EXIT_USAGE);
        assert!(parse(["pyencrypt-client", "status", "--timeout", "1"]).is_ok());
    }

    #[test]
    fn encrypt_files_takes_repeated_file_flags() {
        let cli = parse(["pyencrypt-client", "encrypt-files", "--file", "a.py", "-f", "b.py", "-o", "dist"]).unwrap();
        match cli.command {
            Some(Commands::EncryptFiles { files, output, .. }) => {
                assert_eq!(files, vec![PathBuf::from("a.py"), PathBuf::from("b.py")]);
                assert_eq!(output, PathBuf::from("dist"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert_eq!(parse(["pyencrypt-client", "encrypt-files", "-o", "dist"]).unwrap_err(), EXIT_USAGE);
    }

    #[test]
    fn unknown_command_shows_help() {
        let err = Cli::try_parse_from(["pyencrypt-client", "frobnicate"]).unwrap_err();
        assert_eq!(parse_error(err), EXIT_OK);
    }

    #[test]
    fn global_config_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["pyencrypt-client", "status", "--config", "/tmp/c.json", "--base-url", "http://h:1"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.json")));
        match cli.command {
            Some(Commands::Status { service }) => assert_eq!(service.base_url.as_deref(), Some("http://h:1")),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn flag_overrides_saved_base_url() {
        let config = ClientConfig {
            base_url: Some("http://saved:5000".into()),
            ..ClientConfig::default()
        };
        let service = ServiceArgs {
            base_url: Some("http://override:6000/".into()),
            timeout: None,
        };
        assert_eq!(build_client(&config, &service).unwrap().base_url(), "http://override:6000");
        assert_eq!(
            build_client(&config, &ServiceArgs::default()).unwrap().base_url(),
            "http://saved:5000"
        );
        assert_eq!(
            build_client(&ClientConfig::default(), &ServiceArgs::default()).unwrap().base_url(),
            DEFAULT_BASE_URL
        );
    }
}
