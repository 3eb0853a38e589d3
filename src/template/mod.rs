//! File name templates of the form `prefix{date:FORMAT}suffix`.
//!
//! `FORMAT` uses single-letter date tokens (`Y`, `m`, `d`, `H`, `i`, `s`, ...);
//! a backslash escapes the next character. Rendering produces the file stem for
//! a point in time, matching recovers that point in time from a file name.

use chrono::NaiveDateTime;
use std::fmt;
use std::str::FromStr;

use crate::errors::{Result, SnapshotError};

pub const DEFAULT_DATE_FORMAT: &str = "Ymd";

/// Which calendar fields a date format carries. Missing fields fall back to
/// the Unix epoch (1970-01-01 00:00:00) when a name is parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Fields {
    year: bool,
    month: bool,
    day: bool,
    hour: bool,
    twelve_hour: bool,
    meridiem: bool,
    minute: bool,
    second: bool,
    timestamp: bool,
    weekday: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTemplate {
    template: String,
    prefix: String,
    suffix: String,
    date_format: String,
    strftime: String,
    /// `strftime` with literal letters lower-cased; names are lower-cased
    /// before they are parsed against it.
    match_format: String,
    fields: Fields,
}

impl FileTemplate {
    /// Splits a template on its single `{date}` token.
    pub fn parse(template: &str) -> Result<Self> {
        if template.matches('{').count() > 1 || template.matches('}').count() > 1 {
            return Err(SnapshotError::config(format!(
                "file_template '{}' can only contain one date replacement",
                template
            )));
        }

        let (prefix, rest) = template.split_once('{').ok_or_else(|| {
            SnapshotError::config(format!(
                "file_template '{}' does not have a {{date}} placeholder",
                template
            ))
        })?;
        let (token, suffix) = rest.split_once('}').ok_or_else(|| {
            SnapshotError::config(format!(
                "file_template '{}' has an unterminated date placeholder",
                template
            ))
        })?;

        let (name, format) = match token.find([':', '|']) {
            Some(idx) => (&token[..idx], Some(&token[idx + 1..])),
            None => (token, None),
        };
        if name.trim() != "date" {
            return Err(SnapshotError::config(format!(
                "file_template '{}' does not have a {{date}} placeholder",
                template
            )));
        }

        let date_format = format
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .unwrap_or(DEFAULT_DATE_FORMAT);

        if date_format.contains('W') {
            return Err(SnapshotError::config(format!(
                "\"W\" in the date format of '{}' is not supported as week numbers cannot be parsed back into a date",
                template
            )));
        }

        let (strftime, match_format, fields) = translate(date_format).map_err(|token| {
            SnapshotError::config(format!(
                "date format '{}' in file_template '{}' uses unsupported token '{}'",
                date_format, template, token
            ))
        })?;

        if fields.weekday && !fields.timestamp && !(fields.year && fields.month && fields.day) {
            return Err(SnapshotError::config(format!(
                "weekday names in the date format of '{}' need a full year, month and day",
                template
            )));
        }

        // Matching cuts names at the first '.', so no rendered part may hold one.
        if prefix.contains('.') || suffix.contains('.') || strftime.contains('.') {
            return Err(SnapshotError::config(format!(
                "file_template '{}' cannot contain '.' outside the file extension",
                template
            )));
        }

        Ok(FileTemplate {
            template: template.to_string(),
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
            date_format: date_format.to_string(),
            strftime,
            match_format,
            fields,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn date_format(&self) -> &str {
        &self.date_format
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Combined length of the literal text around the date token. Longer
    /// literals are more specific and get the first chance to claim a file.
    pub fn literal_len(&self) -> usize {
        self.prefix.len() + self.suffix.len()
    }

    /// Renders the file stem for `instant`. The date portion is title-cased so
    /// textual tokens (month names, am/pm) are written the same way every time.
    pub fn render(&self, instant: &NaiveDateTime) -> String {
        let date = title_case(&instant.format(&self.strftime).to_string());
        format!("{}{}{}", self.prefix, date, self.suffix)
    }

    /// Recovers the timestamp embedded in `candidate`, or `None` when the name
    /// does not belong to this template. Everything after the first `.` is
    /// treated as extension and ignored.
    pub fn match_name(&self, candidate: &str) -> Option<NaiveDateTime> {
        let stem = candidate.split('.').next().unwrap_or(candidate);

        if stem.len() < self.literal_len()
            || !stem.starts_with(&self.prefix)
            || !stem.ends_with(&self.suffix)
        {
            return None;
        }

        let middle = stem.get(self.prefix.len()..stem.len() - self.suffix.len())?;
        if middle.is_empty() {
            return None;
        }

        self.parse_date(&middle.to_lowercase())
    }

    fn parse_date(&self, value: &str) -> Option<NaiveDateTime> {
        let mut format = self.match_format.clone();
        let mut input = value.to_string();

        if !self.fields.timestamp {
            let f = self.fields;
            // A bare meridiem needs a 12-hour clock value to agree with.
            let hour = if f.meridiem { ("%I", "12") } else { ("%H", "00") };
            let defaults: [(bool, &str, &str); 6] = [
                (f.year, "%Y", "1970"),
                (f.month, "%m", "01"),
                (f.day, "%d", "01"),
                (f.hour, hour.0, hour.1),
                (f.minute, "%M", "00"),
                (f.second, "%S", "00"),
            ];
            for (present, spec, default) in defaults {
                if !present {
                    format.push('|');
                    format.push_str(spec);
                    input.push('|');
                    input.push_str(default);
                }
            }
            if f.twelve_hour && !f.meridiem {
                format.push_str("|%p");
                input.push_str("|AM");
            }
        }

        NaiveDateTime::parse_from_str(&input, &format).ok()
    }
}

impl FromStr for FileTemplate {
    type Err = SnapshotError;

    fn from_str(s: &str) -> Result<Self> {
        FileTemplate::parse(s)
    }
}

impl fmt::Display for FileTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}

/// Translates a token date format into a chrono format string for rendering
/// and one for matching lower-cased names. On failure the offending token is
/// returned.
fn translate(date_format: &str) -> std::result::Result<(String, String, Fields), char> {
    let mut out = String::new();
    let mut matcher = String::new();
    let mut fields = Fields::default();
    let mut chars = date_format.chars();

    while let Some(c) = chars.next() {
        let spec = match c {
            '\\' => {
                if let Some(literal) = chars.next() {
                    push_literal(&mut out, &mut matcher, literal);
                }
                continue;
            }
            'Y' => {
                fields.year = true;
                "%Y"
            }
            'y' => {
                fields.year = true;
                "%y"
            }
            'm' => {
                fields.month = true;
                "%m"
            }
            'n' => {
                fields.month = true;
                "%-m"
            }
            'M' => {
                fields.month = true;
                "%b"
            }
            'F' => {
                fields.month = true;
                "%B"
            }
            'd' => {
                fields.day = true;
                "%d"
            }
            'j' => {
                fields.day = true;
                "%-d"
            }
            'D' => {
                fields.weekday = true;
                "%a"
            }
            'l' => {
                fields.weekday = true;
                "%A"
            }
            'H' => {
                fields.hour = true;
                "%H"
            }
            'G' => {
                fields.hour = true;
                "%-H"
            }
            'h' => {
                fields.hour = true;
                fields.twelve_hour = true;
                "%I"
            }
            'g' => {
                fields.hour = true;
                fields.twelve_hour = true;
                "%-I"
            }
            'A' => {
                fields.meridiem = true;
                "%p"
            }
            'a' => {
                fields.meridiem = true;
                "%P"
            }
            'i' => {
                fields.minute = true;
                "%M"
            }
            's' => {
                fields.second = true;
                "%S"
            }
            'U' => {
                fields.timestamp = true;
                "%s"
            }
            other if other.is_ascii_alphabetic() => return Err(other),
            other => {
                push_literal(&mut out, &mut matcher, other);
                continue;
            }
        };
        out.push_str(spec);
        matcher.push_str(spec);
    }

    Ok((out, matcher, fields))
}

fn push_literal(out: &mut String, matcher: &mut String, c: char) {
    if c == '%' {
        out.push_str("%%");
        matcher.push_str("%%");
    } else {
        out.push(c);
        matcher.extend(c.to_lowercase());
    }
}

/// Upper-cases the first letter of every alphabetic run, lower-cases the rest.
fn title_case(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut in_word = false;
    for c in value.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .and_then(|date| date.and_hms_opt(h, mi, s))
            .expect("valid test instant")
    }

    #[test]
    fn test_parse_splits_prefix_format_and_suffix() -> anyhow::Result<()> {
        let template = FileTemplate::parse("mysql-snapshot-daily-{date:Ymd}-full")?;
        assert_eq!(template.prefix(), "mysql-snapshot-daily-");
        assert_eq!(template.suffix(), "-full");
        assert_eq!(template.date_format(), "Ymd");
        assert_eq!(template.literal_len(), "mysql-snapshot-daily-".len() + "-full".len());

        let piped = FileTemplate::parse("daily-{date|Y-m-d}")?;
        assert_eq!(piped.date_format(), "Y-m-d");

        let defaulted = FileTemplate::parse("mysql-snapshots-{date}")?;
        assert_eq!(defaulted.date_format(), DEFAULT_DATE_FORMAT);
        Ok(())
    }

    #[test]
    fn test_parse_rejects_bad_templates() {
        for bad in [
            "no-placeholder",
            "two-{date}-{date}",
            "open-{date",
            "wrong-{time:Ymd}",
            "week-{date:YW}",
            "unknown-{date:Yq}",
            "weekly-{date:D}",
            "weekday-{date:md_l}",
            "dotted-{date:Y.m.d}",
            "dotted.{date:Ymd}",
            "snap-{date:Ymd}.sql",
        ] {
            let err = FileTemplate::parse(bad).expect_err(bad);
            assert!(err.is_config(), "{} should be a configuration error", bad);
        }
    }

    #[test]
    fn test_round_trip_at_format_precision() -> anyhow::Result<()> {
        let cases = [
            ("snap-{date:Ymd}", at(2024, 9, 13, 0, 0, 0)),
            ("snap-{date:Ymd}", at(2024, 12, 31, 0, 0, 0)),
            ("snap-{date:Ymd}", at(2024, 2, 29, 0, 0, 0)),
            ("snap-{date:Y-m-d_His}", at(2024, 1, 1, 23, 59, 59)),
            ("snap-{date:YmdHi}-hourly", at(2023, 10, 31, 13, 0, 0)),
            ("{date:YmdH}", at(2024, 3, 1, 0, 0, 0)),
            ("monthly-{date:M-Y}", at(2024, 9, 1, 0, 0, 0)),
            ("noon-{date:Ymd_ga}", at(2024, 6, 30, 12, 0, 0)),
            ("epoch-{date:U}", at(2024, 9, 13, 8, 30, 15)),
            ("snap-{date:Y\\xmd}", at(2024, 9, 13, 0, 0, 0)),
            ("weekly-{date:Ymd-D}", at(2024, 9, 13, 0, 0, 0)),
            ("weekly-{date:l_Y-m-d}", at(2024, 9, 16, 0, 0, 0)),
        ];

        for (raw, instant) in cases {
            let template = FileTemplate::parse(raw)?;
            let rendered = template.render(&instant);
            assert_eq!(
                template.match_name(&format!("{}.sql.gz", rendered)),
                Some(instant),
                "{} rendered as {}",
                raw,
                rendered
            );
        }
        Ok(())
    }

    #[test]
    fn test_render_title_cases_date_portion() -> anyhow::Result<()> {
        let template = FileTemplate::parse("snap-{date:d-M-Y_a}")?;
        assert_eq!(template.render(&at(2024, 9, 13, 15, 0, 0)), "snap-13-Sep-2024_Pm");
        assert_eq!(
            template.match_name("snap-13-SEP-2024_PM.sql"),
            Some(at(2024, 9, 13, 12, 0, 0))
        );
        Ok(())
    }

    #[test]
    fn test_match_fills_missing_fields_from_epoch() -> anyhow::Result<()> {
        let template = FileTemplate::parse("hourly-{date:Hi}")?;
        assert_eq!(template.match_name("hourly-0930"), Some(at(1970, 1, 1, 9, 30, 0)));
        Ok(())
    }

    #[test]
    fn test_match_never_panics_on_garbage() -> anyhow::Result<()> {
        let template = FileTemplate::parse("snap-{date:Ymd}")?;
        for candidate in [
            "",
            ".",
            "snap-",
            "snap-.sql",
            "snap-v8-20240913.sql.gz",
            "snap-2024AB13.sql",
            "snap-20241313.sql",
            "snap-202409130.sql",
            "other-20240913.sql",
            "{date}",
            "snap-{date}",
            "snap-\u{e9}\u{e9}.sql",
        ] {
            assert_eq!(template.match_name(candidate), None, "{:?}", candidate);
        }
        Ok(())
    }

    #[test]
    fn test_match_respects_suffix() -> anyhow::Result<()> {
        let template = FileTemplate::parse("db-{date:Ymd}-full")?;
        assert_eq!(
            template.match_name("db-20240913-full.sql.gz"),
            Some(at(2024, 9, 13, 0, 0, 0))
        );
        assert_eq!(template.match_name("db-20240913-partial.sql.gz"), None);
        Ok(())
    }

    #[test]
    fn test_escaped_literals_survive_round_trip() -> anyhow::Result<()> {
        let template = FileTemplate::parse("snap-{date:Y\\Tmd}")?;
        let instant = at(2024, 9, 13, 0, 0, 0);
        assert_eq!(template.render(&instant), "snap-2024T0913");
        assert_eq!(template.match_name("snap-2024T0913.sql"), Some(instant));

        let lower = FileTemplate::parse("snap-{date:Y\\xmd}")?;
        assert_eq!(lower.render(&instant), "snap-2024X0913");
        assert_eq!(lower.match_name("snap-2024X0913.sql.gz"), Some(instant));
        Ok(())
    }

    #[test]
    fn test_weekday_must_agree_with_date() -> anyhow::Result<()> {
        let template = FileTemplate::parse("weekly-{date:Ymd-D}")?;
        assert_eq!(template.render(&at(2024, 9, 13, 0, 0, 0)), "weekly-20240913-Fri");
        assert_eq!(template.match_name("weekly-20240913-Mon.sql"), None);
        Ok(())
    }
}
