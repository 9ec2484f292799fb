//! Process-wide logger bootstrap for the vstore binaries and test harnesses.

use env_logger::Env;
use serde_json::json;
use std::env;
use std::io::Write;
use std::sync::OnceLock;

static INIT: OnceLock<()> = OnceLock::new();

const FORMAT_ENV: &str = "VSTORE_LOG_FORMAT";
const LEVEL_ENV: &str = "VSTORE_LOG_LEVEL";

/// Install the global logger once; later calls are no-ops.
///
/// `RUST_LOG` wins when set. Otherwise `VSTORE_LOG_LEVEL`, then `default_level`.
/// Output is JSON lines unless `VSTORE_LOG_FORMAT=plain`.
pub fn init(default_level: &str) {
    let _ = INIT.get_or_init(|| configure(default_level));
}

fn configure(default_level: &str) {
    let level = env::var(LEVEL_ENV).unwrap_or_else(|_| default_level.to_string());
    let plain = env::var(FORMAT_ENV)
        .map(|v| v.eq_ignore_ascii_case("plain"))
        .unwrap_or(false);

    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or(level));
    if plain {
        builder.format(|buf, record| {
            writeln!(
                buf,
                "{} {} {} - {}",
                buf.timestamp(),
                record.level().to_string().to_lowercase(),
                record.target(),
                record.args()
            )
        });
    } else {
        builder.format(|buf, record| {
            let payload = json!({
                "timestamp": buf.timestamp().to_string(),
                "level": record.level().to_string().to_lowercase(),
                "target": record.target(),
                "message": record.args().to_string(),
            });
            writeln!(buf, "{}", payload)
        });
    }

    if let Err(err) = builder.try_init() {
        eprintln!("failed to initialize logger: {}", err);
    }
}
