//! Interview date/time extraction from transcript text
//!
//! Transcripts arrive as free text with the interview date buried in a
//! header, a filename echo or a "Date:" label. Extraction tries matchers in
//! a fixed priority order and stops at the first hit:
//!
//! 1. Combined `Month D, YYYY - H:MM am/pm`
//! 2. Labeled fields (`Interview Date:`, `Session Date:`, `Date:`)
//! 3. A date followed by `|` and a time
//! 4. Bare numeric dates (`MM/DD/YYYY`, ISO-8601)
//! 5. A bare month-name date that is not next to the word "Transcript" and
//!    not part of a filename
//!
//! Times are searched with the same structure, independently. Nothing here
//! fails: unrecognized input yields `None`.

use chrono::{NaiveDate, NaiveTime};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

const MONTH: &str = r"(Jan(?:uary)?|Feb(?:ruary)?|Mar(?:ch)?|Apr(?:il)?|May|June?|July?|Aug(?:ust)?|Sep(?:t(?:ember)?)?|Oct(?:ober)?|Nov(?:ember)?|Dec(?:ember)?)";
const TZ: &str = r"(?:\s*\(?((?-i:UTC|GMT|BST|CES?T|IST|AE[SD]T|[ECMP][SD]?T))\)?\b)?";

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid built-in pattern {pattern}: {e}"))
}

/// `March 5, 2024` / `Mar. 5th 2024`
static MONTH_NAME_DATE: Lazy<Regex> = Lazy::new(|| {
    compile(&format!(
        r"(?i)\b{MONTH}\.?\s+(\d{{1,2}})(?:st|nd|rd|th)?,?\s+(\d{{4}})\b"
    ))
});

/// `5 March 2024`, accepted only inside labeled values
static DAY_FIRST_DATE: Lazy<Regex> = Lazy::new(|| {
    compile(&format!(
        r"(?i)\b(\d{{1,2}})(?:st|nd|rd|th)?\s+{MONTH}\.?,?\s+(\d{{4}})\b"
    ))
});

/// `03/05/2024`, `3-5-24`
static NUMERIC_DATE: Lazy<Regex> =
    Lazy::new(|| compile(r"\b(\d{1,2})[/-](\d{1,2})[/-](\d{4}|\d{2})\b"));

/// `2024-03-05`, optionally `T14:30`
static ISO_DATE: Lazy<Regex> = Lazy::new(|| {
    compile(r"\b(\d{4})-(\d{2})-(\d{2})(?:[T ](\d{2}):(\d{2})(?::\d{2}(?:\.\d+)?)?)?")
});

/// `2:30 pm`, `2:30:15 P.M. EST`
static TIME_12H: Lazy<Regex> = Lazy::new(|| {
    compile(&format!(
        r"(?i)\b(\d{{1,2}}):(\d{{2}})(?::\d{{2}})?\s*([ap])\.?\s*m\b\.?{TZ}"
    ))
});

/// 12-hour or 24-hour clock, used only where context says it is a time
static TIME_ANY: Lazy<Regex> = Lazy::new(|| {
    compile(&format!(
        r"(?i)\b(\d{{1,2}}):(\d{{2}})(?::\d{{2}})?(?:\s*([ap])\.?\s*m\b\.?)?{TZ}"
    ))
});

static COMBINED: Lazy<Regex> = Lazy::new(|| {
    compile(&format!(
        r"(?i)\b{MONTH}\.?\s+(\d{{1,2}})(?:st|nd|rd|th)?,?\s+(\d{{4}})\s*(?:[-–—]|,|\bat\b)\s*(\d{{1,2}}:\d{{2}}(?::\d{{2}})?\s*[ap]\.?\s*m\b\.?{TZ})"
    ))
});

static LABELED_DATE: Lazy<Regex> = Lazy::new(|| {
    compile(r"(?im)\b(?:interview\s+date|session\s+date|date)\s*:\s*([^\r\n|]+)")
});

static LABELED_TIME: Lazy<Regex> = Lazy::new(|| {
    compile(r"(?im)\b(?:interview\s+time|session\s+time|time)\s*:\s*([^\r\n|]+)")
});

static PIPE_SEPARATED: Lazy<Regex> = Lazy::new(|| {
    compile(&format!(
        r"(?i)(\b{MONTH}\.?\s+\d{{1,2}}(?:st|nd|rd|th)?,?\s+\d{{4}}|\b\d{{1,2}}[/-]\d{{1,2}}[/-]\d{{2,4}}|\b\d{{4}}-\d{{2}}-\d{{2}})\s*\|\s*(\d{{1,2}}:\d{{2}}(?::\d{{2}})?(?:\s*[ap]\.?\s*m\b\.?)?{TZ})"
    ))
});

static FILE_EXTENSION: Lazy<Regex> = Lazy::new(|| compile(r"^\.[A-Za-z0-9]{2,5}\b"));

/// Best-effort interview schedule pulled from a transcript
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedSchedule {
    /// `Mon D, YYYY`
    pub interview_date: Option<String>,
    /// `H:MM AM/PM` plus optional timezone abbreviation
    pub interview_time: Option<String>,
}

/// Extract the interview date and time from raw transcript text
pub fn parse_schedule(text: &str) -> ParsedSchedule {
    ParsedSchedule {
        interview_date: extract_date(text),
        interview_time: extract_time(text),
    }
}

/// Date extraction in priority order
pub fn extract_date(text: &str) -> Option<String> {
    if let Some(caps) = COMBINED.captures(text) {
        if let Some(date) = month_name_date(&caps, 1, 2, 3) {
            return Some(display_date(date));
        }
    }

    for caps in LABELED_DATE.captures_iter(text) {
        if let Some(date) = normalize_date(&caps[1]) {
            return Some(date);
        }
    }

    for caps in PIPE_SEPARATED.captures_iter(text) {
        if let Some(date) = normalize_date(&caps[1]) {
            return Some(date);
        }
    }

    for caps in NUMERIC_DATE.captures_iter(text) {
        if let Some(date) = numeric_date(&caps) {
            return Some(display_date(date));
        }
    }
    for caps in ISO_DATE.captures_iter(text) {
        if let Some(date) = iso_date(&caps) {
            return Some(display_date(date));
        }
    }

    for caps in MONTH_NAME_DATE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        if follows_transcript_word(&text[..whole.start()])
            || FILE_EXTENSION.is_match(&text[whole.end()..])
        {
            continue;
        }
        if let Some(date) = month_name_date(&caps, 1, 2, 3) {
            return Some(display_date(date));
        }
    }

    None
}

/// Time extraction, mirroring the date priority order
pub fn extract_time(text: &str) -> Option<String> {
    if let Some(caps) = COMBINED.captures(text) {
        if let Some(time) = normalize_time(&caps[4]) {
            return Some(time);
        }
    }

    for caps in LABELED_TIME.captures_iter(text) {
        if let Some(time) = normalize_time(&caps[1]) {
            return Some(time);
        }
    }

    // group 2 is the month name inside the date alternation
    for caps in PIPE_SEPARATED.captures_iter(text) {
        if let Some(time) = normalize_time(&caps[3]) {
            return Some(time);
        }
    }

    for caps in ISO_DATE.captures_iter(text) {
        if let (Some(h), Some(m)) = (caps.get(4), caps.get(5)) {
            if let Some(time) = clock_time(h.as_str(), m.as_str(), None) {
                return Some(display_time(time, None));
            }
        }
    }

    for caps in TIME_12H.captures_iter(text) {
        if let Some(time) = time_from_captures(&caps) {
            return Some(time);
        }
    }

    None
}

/// Normalize a user-entered or extracted date string to `Mon D, YYYY`
pub fn normalize_date(value: &str) -> Option<String> {
    parse_date_value(value).map(display_date)
}

/// Parse any accepted date form into a calendar date
///
/// Accepts month-name dates (either order), `MM/DD/YYYY`, `MM-DD-YY` and
/// ISO `YYYY-MM-DD`. A leading "Transcript" left over from filename text is
/// stripped first.
pub fn parse_date_value(value: &str) -> Option<NaiveDate> {
    let value = strip_transcript_prefix(value);

    if let Some(date) = MONTH_NAME_DATE
        .captures(value)
        .and_then(|caps| month_name_date(&caps, 1, 2, 3))
    {
        return Some(date);
    }
    if let Some(date) = ISO_DATE.captures(value).and_then(|caps| iso_date(&caps)) {
        return Some(date);
    }
    if let Some(date) = NUMERIC_DATE.captures(value).and_then(|caps| numeric_date(&caps)) {
        return Some(date);
    }
    DAY_FIRST_DATE
        .captures(value)
        .and_then(|caps| month_name_date(&caps, 2, 1, 3))
}

/// Normalize a time string to `H:MM AM/PM`, keeping a timezone abbreviation
///
/// 24-hour input is converted to the 12-hour display form.
pub fn normalize_time(value: &str) -> Option<String> {
    TIME_ANY
        .captures_iter(value)
        .find_map(|caps| time_from_captures(&caps))
}

/// Parse a normalized (or user-entered) time back to a clock value
pub fn parse_time_value(value: &str) -> Option<NaiveTime> {
    TIME_ANY.captures_iter(value).find_map(|caps| {
        let meridiem = caps.get(3).map(|m| m.as_str());
        clock_time(&caps[1], &caps[2], meridiem)
    })
}

fn time_from_captures(caps: &Captures<'_>) -> Option<String> {
    let meridiem = caps.get(3).map(|m| m.as_str());
    let time = clock_time(&caps[1], &caps[2], meridiem)?;
    Some(display_time(time, caps.get(4).map(|m| m.as_str())))
}

fn clock_time(hour: &str, minute: &str, meridiem: Option<&str>) -> Option<NaiveTime> {
    let hour: u32 = hour.parse().ok()?;
    let minute: u32 = minute.parse().ok()?;
    let hour = match meridiem.map(|m| m.to_ascii_lowercase()) {
        Some(m) => {
            if !(1..=12).contains(&hour) {
                return None;
            }
            match (m.as_str(), hour) {
                ("a", 12) => 0,
                ("a", h) => h,
                (_, 12) => 12,
                (_, h) => h + 12,
            }
        }
        None => hour,
    };
    NaiveTime::from_hms_opt(hour, minute, 0)
}

fn display_time(time: NaiveTime, zone: Option<&str>) -> String {
    let base = time.format("%-I:%M %p").to_string();
    match zone {
        Some(zone) => format!("{} {}", base, zone),
        None => base,
    }
}

fn display_date(date: NaiveDate) -> String {
    date.format("%b %-d, %Y").to_string()
}

fn month_name_date(caps: &Captures<'_>, month: usize, day: usize, year: usize) -> Option<NaiveDate> {
    let month = month_number(caps.get(month)?.as_str())?;
    let day: u32 = caps.get(day)?.as_str().parse().ok()?;
    let year: i32 = caps.get(year)?.as_str().parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn numeric_date(caps: &Captures<'_>) -> Option<NaiveDate> {
    let month: u32 = caps[1].parse().ok()?;
    let day: u32 = caps[2].parse().ok()?;
    let year_text = &caps[3];
    let mut year: i32 = year_text.parse().ok()?;
    if year_text.len() == 2 {
        year += 2000;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

fn iso_date(caps: &Captures<'_>) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(caps[1].parse().ok()?, caps[2].parse().ok()?, caps[3].parse().ok()?)
}

fn month_number(name: &str) -> Option<u32> {
    let prefix: String = name.chars().take(3).collect::<String>().to_ascii_lowercase();
    let month = match prefix.as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

/// True when the text right before a match ends with "Transcript"
fn follows_transcript_word(before: &str) -> bool {
    let trimmed = before.trim_end_matches(|c: char| c.is_whitespace() || "-_:–—".contains(c));
    trimmed.to_ascii_lowercase().ends_with("transcript")
}

fn strip_transcript_prefix(value: &str) -> &str {
    let lower = value.to_ascii_lowercase();
    let rest = match lower.rfind("transcript") {
        Some(pos) => &value[pos + "transcript".len()..],
        None => value,
    };
    rest.trim_start_matches(|c: char| c.is_whitespace() || "-_:–—".contains(c))
        .trim_end()
}
