use std::io::Write;

use env_logger::WriteStyle;
use log::LevelFilter;

/// `RUST_LOG` still overrides the default Info filter.
pub fn try_init() -> Result<(), log::SetLoggerError> {
    env_logger::builder()
        .format(|buf, record| {
            writeln!(
                buf,
                "[RACE | {}] {}",
                record.level(),
                record.args()
            )
        })
        .write_style(WriteStyle::Always)
        .filter(None, LevelFilter::Info)
        .parse_default_env()
        .try_init()
}
