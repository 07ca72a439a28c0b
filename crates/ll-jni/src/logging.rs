use std::sync::Once;

static INIT: Once = Once::new();

/// Route `log` records to logcat on Android and to `env_logger` elsewhere.
///
/// Safe to call repeatedly; only the first call has an effect. A logger
/// already installed by the host process is left in place.
pub fn init() {
    INIT.call_once(|| {
        #[cfg(target_os = "android")]
        android_logger::init_once(
            android_logger::Config::default()
                .with_max_level(log::LevelFilter::Debug)
                .with_tag("local_llama"),
        );

        #[cfg(not(target_os = "android"))]
        {
            let _ = env_logger::Builder::from_default_env().try_init();
        }
    });
}
