use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Initialize structured logging. The level comes from `NOCTURNE_LOG`
/// (error/warn/info/debug/trace), defaulting to info.
pub fn init() {
    let level = match std::env::var("NOCTURNE_LOG").as_deref() {
        Ok("error") => Level::ERROR,
        Ok("warn") => Level::WARN,
        Ok("debug") => Level::DEBUG,
        Ok("trace") => Level::TRACE,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok(); // Ignore err in restart loop
}
