/// Initialize the client logger.
/// Sets up env_logger on stderr with a `warn` default filter (`debug` when
/// verbose); `RUST_LOG` still takes precedence.
pub fn init(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .try_init();
}
