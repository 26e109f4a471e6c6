/// Timestamped logging
pub fn log(msg: &str) {
    // Honor the compile-time logging configuration
    if crate::config::LOGGING_ENABLED {
        #[cfg(debug_assertions)]
        {
            // Development builds additionally honor dev::ENABLE_LOGGING
            if !crate::config::dev::ENABLE_LOGGING {
                return;
            }
        }

        let now = chrono::Local::now();
        println!(
            "PAIRLINK: [{}] {}",
            now.format("%Y-%m-%d %H:%M:%S%.3f"),
            msg
        );
    }
}
