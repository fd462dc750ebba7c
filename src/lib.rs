/*!
Academic records server.

Administrators, faculty (teachers and principals), and students log in and
work with server-rendered pages backed by a Postgres store.
*/
use time::{Date, OffsetDateTime, format_description::FormatItem, macros::format_description};

pub mod attendance;
pub mod auth;
pub mod config;
pub mod course;
pub mod inter;
pub mod store;
pub mod user;

/// Dates as they arrive from `<input type="date">` fields and as they are
/// shown in tables.
pub const DATE_FMT: &[FormatItem] = format_description!("[year]-[month]-[day]");

// Serializes `time::Date`s in `DATE_FMT` for the templates.
time::serde::format_description!(ymd, Date, "[year]-[month]-[day]");

/// The current date (UTC).
pub fn today() -> Date {
    OffsetDateTime::now_utc().date()
}

/// Parse a form date string; blank or malformed input yields `None`.
pub fn parse_date(s: &str) -> Option<Date> {
    match s.trim() {
        "" => None,
        s => Date::parse(s, DATE_FMT).ok(),
    }
}

pub fn format_date(d: &Date) -> String {
    d.format(DATE_FMT).unwrap_or_else(|_| d.to_string())
}

/// Trim a form field, treating blank input as absent.
pub fn blank_means_none(s: &str) -> Option<String> {
    match s.trim() {
        "" => None,
        x => Some(x.to_owned()),
    }
}

pub fn log_level_from_env() -> simplelog::LevelFilter {
    use simplelog::LevelFilter;

    let mut level_string = match std::env::var("LOG_LEVEL") {
        Err(_) => { return LevelFilter::Warn; },
        Ok(s) => s,
    };

    level_string.make_ascii_lowercase();
    match level_string.as_str() {
        "max" => LevelFilter::max(),
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        "off" => LevelFilter::Off,
        _ => LevelFilter::Warn,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub fn ensure_logging() {
        use simplelog::{TermLogger, TerminalMode, ColorChoice};
        let log_cfg = simplelog::ConfigBuilder::new()
            .add_filter_allow_str("registrar")
            .build();
        let res = TermLogger::init(
            log_level_from_env(),
            log_cfg,
            TerminalMode::Stdout,
            ColorChoice::Auto
        );

        match res {
            Ok(_) => { log::info!("Test logging started."); },
            Err(_) => { log::info!("Test logging already started."); },
        }
    }

    #[test]
    fn form_dates() {
        ensure_logging();
        assert_eq!(
            parse_date(" 2024-03-09 "),
            Some(Date::from_calendar_date(2024, time::Month::March, 9).unwrap())
        );
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("03/09/2024"), None);
        let d = Date::from_calendar_date(2024, time::Month::March, 9).unwrap();
        assert_eq!(format_date(&d), "2024-03-09");
    }

    #[test]
    fn blank_fields() {
        assert_eq!(blank_means_none("  "), None);
        assert_eq!(blank_means_none(" Physics "), Some("Physics".to_owned()));
    }
}
