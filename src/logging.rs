use env_logger::Builder;

pub const LOG_ENV: &str = "ENCLAVE_LOG";
const DEFAULT_FILTER: &str = "info";

/// Install the `env_logger` backend. The filter comes from `ENCLAVE_LOG`, then
/// `RUST_LOG`, then `info`. Safe to call more than once.
pub fn init_logging() {
    let filter = resolve_filter(|key| std::env::var(key).ok());
    let _ = Builder::new()
        .parse_filters(&filter)
        .format_timestamp_millis()
        .try_init();
}

fn resolve_filter<F>(lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(LOG_ENV)
        .or_else(|| lookup("RUST_LOG"))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}
