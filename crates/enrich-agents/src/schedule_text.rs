//! Bell-schedule text parsing shared by the free tiers.
//!
//! Works line by line: a line with a school-day time range (`7:45 AM -
//! 2:30 PM`) becomes one grade band, labelled by a grade marker on the same
//! line or the nearest marker above it. Ranges that cannot be a school day
//! (office hours, lunch periods) are ignored.

use std::sync::LazyLock;

use regex::Regex;

use coordination::{BellSchedule, GradeSchedule};

static TIME_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(\d{1,2}):(\d{2})\s*([ap])?\.?\s*m?\.?\s*(?:-|\x{2013}|\x{2014}|to)\s*(\d{1,2}):(\d{2})\s*([ap])\.?\s*m\.?",
    )
    .expect("TIME_RANGE regex should compile")
});

static GRADE_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(t?k\s*-\s*5|k\s*-\s*8|6\s*-\s*8|9\s*-\s*12|elementary|middle|junior high|high)\b",
    )
    .expect("GRADE_LABEL regex should compile")
});

static SCHEDULE_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(bell\s+schedules?|school\s+hours|daily\s+schedule|start\s+and\s+end\s+times?)\b")
        .expect("SCHEDULE_HEADING regex should compile")
});

static SCRIPT_OR_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|noscript)[^>]*>.*?</(script|style|noscript)>")
        .expect("SCRIPT_OR_STYLE regex should compile")
});

static BLOCK_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<\s*/?\s*(br|p|div|li|tr|h[1-6]|table|section)[^>]*>")
        .expect("BLOCK_TAG regex should compile")
});

static ANY_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("ANY_TAG regex should compile"));

/// Shortest and longest plausible instructional day, in minutes
const MIN_DAY_MINUTES: u32 = 180;
const MAX_DAY_MINUTES: u32 = 480;

/// A parsed schedule with a heuristic confidence
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSchedule {
    pub schedule: BellSchedule,
    pub confidence: f64,
}

/// Reduce HTML to newline-separated visible text
pub fn html_to_text(html: &str) -> String {
    let text = SCRIPT_OR_STYLE.replace_all(html, " ");
    let text = BLOCK_TAG.replace_all(&text, "\n");
    let text = ANY_TAG.replace_all(&text, " ");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-");

    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Extract a bell schedule from plain text, if any school-day range is present
pub fn parse_schedule(text: &str) -> Option<ParsedSchedule> {
    let mut grades: Vec<GradeSchedule> = Vec::new();
    let mut current_label: Option<String> = None;
    let mut labelled = false;

    for line in text.lines() {
        let line_label = GRADE_LABEL.captures(line).map(|c| normalize_band(&c[1]));
        if line_label.is_some() {
            current_label = line_label.clone();
        }

        for caps in TIME_RANGE.captures_iter(line) {
            let Some((start, end)) = day_range(&caps) else {
                continue;
            };
            let band = line_label
                .clone()
                .or_else(|| current_label.clone())
                .unwrap_or_else(|| "all".to_string());
            if grades.iter().any(|g| g.grade_band == band) {
                continue;
            }
            labelled |= band != "all";
            grades.push(GradeSchedule {
                grade_band: band,
                start_time: format_hm(start),
                end_time: format_hm(end),
                instructional_minutes: Some(end - start),
            });
        }
    }

    if grades.is_empty() {
        return None;
    }

    let mut confidence: f64 = 0.5;
    if labelled {
        confidence += 0.15;
    }
    if SCHEDULE_HEADING.is_match(text) {
        confidence += 0.15;
    }
    if grades.len() >= 2 {
        confidence += 0.1;
    }

    Some(ParsedSchedule {
        schedule: BellSchedule {
            grades,
            notes: None,
        },
        confidence: confidence.min(0.95),
    })
}

/// Start and end in minutes after midnight, if the range looks like a school day
fn day_range(caps: &regex::Captures<'_>) -> Option<(u32, u32)> {
    let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
    let (sh, sm, eh, em) = (num(1)?, num(2)?, num(4)?, num(5)?);
    if sh == 0 || sh > 12 || eh == 0 || eh > 12 || sm > 59 || em > 59 {
        return None;
    }

    let end_pm = caps.get(6)?.as_str().eq_ignore_ascii_case("p");
    // A bare start time in a morning-to-afternoon range is a morning time
    let start_pm = match caps.get(3) {
        Some(m) => m.as_str().eq_ignore_ascii_case("p"),
        None => false,
    };

    let start = to_minutes(sh, sm, start_pm);
    let end = to_minutes(eh, em, end_pm);
    if end <= start {
        return None;
    }
    let length = end - start;
    let morning_start = (5 * 60..=10 * 60 + 30).contains(&start);
    (morning_start && (MIN_DAY_MINUTES..=MAX_DAY_MINUTES).contains(&length)).then_some((start, end))
}

fn to_minutes(hour: u32, minute: u32, pm: bool) -> u32 {
    let hour = match (hour, pm) {
        (12, false) => 0,
        (12, true) => 12,
        (h, true) => h + 12,
        (h, false) => h,
    };
    hour * 60 + minute
}

fn format_hm(minutes: u32) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

fn normalize_band(label: &str) -> String {
    let compact: String = label
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase();
    match compact.as_str() {
        "k-5" | "tk-5" | "elementary" => "elementary",
        "6-8" | "middle" | "juniorhigh" => "middle",
        "9-12" | "high" => "high",
        "k-8" => "k-8",
        _ => "all",
    }
    .to_string()
}
