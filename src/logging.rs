use env_logger::Env;

/// `TOUCHREC_LOG` takes the usual env_logger filter syntax; defaults to `info`.
pub fn init() {
    let _ = env_logger::Builder::from_env(Env::default().filter_or("TOUCHREC_LOG", "info"))
        .format_timestamp_millis()
        .try_init();
}
