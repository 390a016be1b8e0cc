/// Install `env_logger` as the `log` backend.
///
/// The filter comes from `RUST_LOG` and defaults to `warn`. Calling this
/// more than once, or after another logger is installed, does nothing.
pub fn init() {
    let env = env_logger::Env::default().default_filter_or("warn");
    let _ = env_logger::Builder::from_env(env).try_init();
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_init_is_idempotent() {
        super::init();
        super::init();
        log::debug!("logger installed");
    }
}
