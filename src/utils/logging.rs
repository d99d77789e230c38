//! Logging setup
//!
//! env_logger behind the standard RUST_LOG filter; repeated calls (tests)
//! are harmless.

use std::io::Write;

pub fn setup_logging() {
    let _ = env_logger::Builder::from_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                buf.timestamp_millis(),
                record.level(),
                record.args()
            )
        })
        .try_init();
}
