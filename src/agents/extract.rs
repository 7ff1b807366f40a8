//! 从用户消息抽取结构化数据，合并进线程上下文
//!
//! - 搜索条件：卧室 / 卫浴数、预算上限、房型、设施、区域
//! - 引用房源：序数词（first / second / last）从 search_results 中取出单个房源
//! - 预约时段：today / tomorrow / 星期名 / 月日 / next week 解析为相对本轮时间的日期，外加具体时间或时段

use std::sync::OnceLock;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Timelike, Utc, Weekday};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agents::AgentId;
use crate::memory::{keys, ThreadContext};

static BEDROOMS_RE: OnceLock<Regex> = OnceLock::new();
static BATHROOMS_RE: OnceLock<Regex> = OnceLock::new();
static PRICE_RE: OnceLock<Regex> = OnceLock::new();
static DOLLAR_RE: OnceLock<Regex> = OnceLock::new();
static TYPE_RE: OnceLock<Regex> = OnceLock::new();
static CLOCK_RE: OnceLock<Regex> = OnceLock::new();
static AT_HOUR_RE: OnceLock<Regex> = OnceLock::new();
static MONTH_DAY_RE: OnceLock<Regex> = OnceLock::new();
static DAY_OF_MONTH_RE: OnceLock<Regex> = OnceLock::new();

const CLOCK_PATTERN: &str = r"\b(\d{1,2})(?::(\d{2}))?\s*(am|pm|a\.m|p\.m)\b";
const AT_HOUR_PATTERN: &str = r"\bat\s+(\d{1,2}):(\d{2})\b";
const MONTHS: &str = "jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?";

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static pattern is valid"))
}

fn word_re(word: &str) -> Option<Regex> {
    Regex::new(&format!(r"\b{}\b", regex::escape(word))).ok()
}

fn has_word(text: &str, word: &str) -> bool {
    word_re(word).is_some_and(|re| re.is_match(text))
}

fn parse_count(token: &str) -> Option<u32> {
    match token {
        "one" => Some(1),
        "two" => Some(2),
        "three" => Some(3),
        "four" => Some(4),
        "five" => Some(5),
        n => n.parse().ok(),
    }
}

/// 设施：规范名 → 触发词
const AMENITIES: &[(&str, &[&str])] = &[
    ("pool", &["pool", "swimming"]),
    ("gym", &["gym", "fitness"]),
    ("parking", &["parking", "garage"]),
    ("balcony", &["balcony"]),
    ("garden", &["garden", "yard"]),
    ("terrace", &["terrace", "deck"]),
    ("ocean", &["ocean", "sea", "beach"]),
    ("waterfront", &["waterfront", "water view"]),
];

/// 已知区域，越具体越靠前
const LOCATIONS: &[&str] = &[
    "south beach",
    "miami beach",
    "coral gables",
    "coconut grove",
    "brickell",
    "wynwood",
    "aventura",
    "downtown",
    "miami",
];

/// 搜索条件；各字段缺省表示未指定
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bedrooms: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bathrooms: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_price: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub amenities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl SearchFilters {
    pub fn parse(message: &str) -> Self {
        let text = message.to_lowercase();
        let mut filters = SearchFilters::default();

        let bedrooms = regex(&BEDROOMS_RE, r"\b(\d+|one|two|three|four|five)[\s-]*(?:bedrooms?|beds?|br)\b");
        filters.bedrooms = bedrooms.captures(&text).and_then(|c| parse_count(&c[1]));

        let bathrooms = regex(&BATHROOMS_RE, r"\b(\d+|one|two|three|four|five)[\s-]*(?:bathrooms?|baths?|ba)\b");
        filters.bathrooms = bathrooms.captures(&text).and_then(|c| parse_count(&c[1]));

        filters.max_price = parse_price(&text);

        let types = regex(&TYPE_RE, r"\b(house|apartment|apt|condo|studio)s?\b");
        filters.property_type = types.captures(&text).map(|c| match &c[1] {
            "apt" => "apartment".to_string(),
            other => other.to_string(),
        });

        filters.amenities = AMENITIES
            .iter()
            .filter(|(_, triggers)| triggers.iter().any(|t| has_word(&text, t)))
            .map(|(name, _)| name.to_string())
            .collect();

        filters.location = LOCATIONS
            .iter()
            .find(|loc| has_word(&text, loc))
            .map(|loc| loc.to_string());

        filters
    }

    pub fn is_empty(&self) -> bool {
        *self == SearchFilters::default()
    }

    /// 本轮条件覆盖上一轮：指定了的字段替换，设施取并集
    pub fn merged_over(self, previous: &SearchFilters) -> SearchFilters {
        let mut amenities = previous.amenities.clone();
        for a in self.amenities {
            if !amenities.contains(&a) {
                amenities.push(a);
            }
        }
        SearchFilters {
            bedrooms: self.bedrooms.or(previous.bedrooms),
            bathrooms: self.bathrooms.or(previous.bathrooms),
            max_price: self.max_price.or(previous.max_price),
            property_type: self.property_type.or_else(|| previous.property_type.clone()),
            amenities,
            location: self.location.or_else(|| previous.location.clone()),
        }
    }
}

fn parse_amount(digits: &str, thousands: bool) -> Option<u64> {
    let n: u64 = digits.replace(',', "").parse().ok()?;
    if thousands {
        n.checked_mul(1000)
    } else {
        Some(n)
    }
}

/// "under $2000"、"budget of 2,500"、"max 3k"，否则退回第一个 "$N"
fn parse_price(text: &str) -> Option<u64> {
    let keyed = regex(
        &PRICE_RE,
        r"(?:under|below|max(?:imum)?|up to|less than|around|budget(?:\s+(?:of|is))?)\s*\$?\s*(\d[\d,]*)\s*(k)?\b",
    );
    if let Some(c) = keyed.captures(text) {
        return parse_amount(&c[1], c.get(2).is_some());
    }
    let dollar = regex(&DOLLAR_RE, r"\$\s*(\d[\d,]*)\s*(k)?\b");
    dollar
        .captures(text)
        .and_then(|c| parse_amount(&c[1], c.get(2).is_some()))
}

/// 按序数词从候选结果中取出被引用的房源
pub fn select_ordinal(message: &str, results: &Value) -> Option<Value> {
    let items = results.as_array().filter(|a| !a.is_empty())?;
    let text = message.to_lowercase();
    let ordinals: [(&[&str], usize); 5] = [
        (&["first", "1st"], 0),
        (&["second", "2nd"], 1),
        (&["third", "3rd"], 2),
        (&["fourth", "4th"], 3),
        (&["fifth", "5th"], 4),
    ];
    if has_word(&text, "last") {
        return items.last().cloned();
    }
    ordinals
        .iter()
        .find(|(words, _)| words.iter().any(|w| has_word(&text, w)))
        .and_then(|(_, index)| items.get(*index).cloned())
}

/// 时段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartOfDay {
    Morning,
    Afternoon,
    Evening,
}

/// 预约时段：日期按本轮时间解析为具体日期（ISO 格式序列化）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSlot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<NaiveTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_of_day: Option<PartOfDay>,
    /// 用户原话中的日期说法，如 "tomorrow"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_reference: Option<String>,
}

const WEEKDAYS: [(&str, Weekday); 7] = [
    ("monday", Weekday::Mon),
    ("tuesday", Weekday::Tue),
    ("wednesday", Weekday::Wed),
    ("thursday", Weekday::Thu),
    ("friday", Weekday::Fri),
    ("saturday", Weekday::Sat),
    ("sunday", Weekday::Sun),
];

/// 严格晚于 today 的下一个 target 星期
fn next_weekday(today: NaiveDate, target: Weekday) -> NaiveDate {
    let ahead = (7 + target.num_days_from_monday() as i64 - today.weekday().num_days_from_monday() as i64) % 7;
    today + Duration::days(if ahead == 0 { 7 } else { ahead })
}

impl ScheduleSlot {
    /// 日期、时间、时段都没有时返回 None
    pub fn parse(message: &str, now: DateTime<Utc>) -> Option<Self> {
        let text = message.to_lowercase();
        let today = now.date_naive();

        let (date, day_reference) = if text.contains("day after tomorrow") {
            (Some(today + Duration::days(2)), Some("day after tomorrow".to_string()))
        } else if has_word(&text, "today") {
            (Some(today), Some("today".to_string()))
        } else if has_word(&text, "tomorrow") {
            (Some(today + Duration::days(1)), Some("tomorrow".to_string()))
        } else if let Some((name, day)) = WEEKDAYS.iter().find(|(name, _)| has_word(&text, name)) {
            (Some(next_weekday(today, *day)), Some(name.to_string()))
        } else if let Some((date, mention)) = parse_calendar_date(&text, today) {
            (Some(date), Some(mention))
        } else if text.contains("this weekend") {
            let date = if today.weekday() == Weekday::Sat || today.weekday() == Weekday::Sun {
                today
            } else {
                next_weekday(today, Weekday::Sat)
            };
            (Some(date), Some("this weekend".to_string()))
        } else if text.contains("next week") {
            (Some(next_weekday(today, Weekday::Mon)), Some("next week".to_string()))
        } else {
            (None, None)
        };

        let time = parse_time(&text);

        let part_of_day = if has_word(&text, "morning") {
            Some(PartOfDay::Morning)
        } else if has_word(&text, "afternoon") {
            Some(PartOfDay::Afternoon)
        } else if has_word(&text, "evening") || has_word(&text, "tonight") {
            Some(PartOfDay::Evening)
        } else {
            time.map(|t| match t.hour() {
                0..=11 => PartOfDay::Morning,
                12..=16 => PartOfDay::Afternoon,
                _ => PartOfDay::Evening,
            })
        };

        if date.is_none() && time.is_none() && part_of_day.is_none() {
            return None;
        }
        Some(Self {
            date,
            time,
            part_of_day,
            day_reference,
        })
    }

    /// 仅用新值覆盖上一次解析出的时段（如先说日期，再补充时间）
    pub fn merged_over(self, previous: &ScheduleSlot) -> ScheduleSlot {
        ScheduleSlot {
            date: self.date.or(previous.date),
            time: self.time.or(previous.time),
            part_of_day: self.part_of_day.or(previous.part_of_day),
            day_reference: self.day_reference.or_else(|| previous.day_reference.clone()),
        }
    }
}

fn month_number(name: &str) -> Option<u32> {
    let prefix = name.get(..3)?;
    let month = match prefix {
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

fn month_day_regexes() -> [&'static Regex; 2] {
    [
        regex(
            &MONTH_DAY_RE,
            &format!(r"\b({MONTHS})\.?\s+(\d{{1,2}})(?:st|nd|rd|th)?\b"),
        ),
        regex(
            &DAY_OF_MONTH_RE,
            &format!(r"\b(\d{{1,2}})(?:st|nd|rd|th)?\s+(?:of\s+)?({MONTHS})\b"),
        ),
    ]
}

/// "October 20"、"oct 20th"、"20th of october"：返回 (月, 日, 原文)
fn find_month_day(text: &str) -> Option<(u32, u32, String)> {
    let [month_first, day_first] = month_day_regexes();
    if let Some(c) = month_first.captures(text) {
        return Some((month_number(&c[1])?, c[2].parse().ok()?, c[0].to_string()));
    }
    let c = day_first.captures(text)?;
    Some((month_number(&c[2])?, c[1].parse().ok()?, c[0].to_string()))
}

/// 月日解析为不早于 today 的日期：今年已过则取明年
fn parse_calendar_date(text: &str, today: NaiveDate) -> Option<(NaiveDate, String)> {
    let (month, day, mention) = find_month_day(text)?;
    let this_year = NaiveDate::from_ymd_opt(today.year(), month, day);
    let date = match this_year {
        Some(d) if d >= today => d,
        _ => NaiveDate::from_ymd_opt(today.year() + 1, month, day)?,
    };
    Some((date, mention))
}

/// 消息中的钟点时间原文，如 "4pm"、"10:30 am"、"at 15:00"
pub fn find_clock_time(message: &str) -> Option<String> {
    let text = message.to_lowercase();
    regex(&CLOCK_RE, CLOCK_PATTERN)
        .captures(&text)
        .filter(|c| c[1].parse::<u32>().is_ok_and(|h| (1..=12).contains(&h)))
        .or_else(|| regex(&AT_HOUR_RE, AT_HOUR_PATTERN).captures(&text))
        .map(|c| c[0].to_string())
}

/// 消息中的日历日期原文，如 "october 20"
pub fn find_calendar_date(message: &str) -> Option<String> {
    let text = message.to_lowercase();
    // 闰年，接受 2 月 29 日
    find_month_day(&text)
        .filter(|(month, day, _)| NaiveDate::from_ymd_opt(2024, *month, *day).is_some())
        .map(|(_, _, mention)| mention)
}

/// "3pm"、"3:30 pm"、"at 15:00"、"noon"
fn parse_time(text: &str) -> Option<NaiveTime> {
    if has_word(text, "noon") {
        return NaiveTime::from_hms_opt(12, 0, 0);
    }
    let clock = regex(&CLOCK_RE, CLOCK_PATTERN);
    if let Some(c) = clock.captures(text) {
        let hour: u32 = c[1].parse().ok()?;
        let minute: u32 = c.get(2).map_or(Some(0), |m| m.as_str().parse().ok())?;
        if !(1..=12).contains(&hour) {
            return None;
        }
        let pm = c[3].starts_with('p');
        let hour = match (hour, pm) {
            (12, false) => 0,
            (12, true) => 12,
            (h, true) => h + 12,
            (h, false) => h,
        };
        return NaiveTime::from_hms_opt(hour, minute, 0);
    }
    let at_hour = regex(&AT_HOUR_RE, AT_HOUR_PATTERN);
    at_hour.captures(text).and_then(|c| {
        let hour: u32 = c[1].parse().ok()?;
        let minute: u32 = c[2].parse().ok()?;
        NaiveTime::from_hms_opt(hour, minute, 0)
    })
}

fn typed<T: for<'de> Deserialize<'de>>(context: &ThreadContext, key: &str) -> Option<T> {
    context
        .get(key)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

/// 按 Agent 抽取本轮的结构化数据，返回待合并的上下文补丁
pub fn extract_context(agent: AgentId, message: &str, context: &ThreadContext, now: DateTime<Utc>) -> ThreadContext {
    let mut patch = ThreadContext::new();

    match agent {
        AgentId::Search => {
            let parsed = SearchFilters::parse(message);
            if !parsed.is_empty() {
                let previous: SearchFilters = typed(context, keys::SEARCH_FILTERS).unwrap_or_default();
                if let Ok(v) = serde_json::to_value(parsed.merged_over(&previous)) {
                    patch.insert(keys::SEARCH_FILTERS.to_string(), v);
                }
            }
        }
        AgentId::Property | AgentId::Scheduling => {
            if let Some(property) = context
                .get(keys::SEARCH_RESULTS)
                .and_then(|results| select_ordinal(message, results))
            {
                patch.insert(keys::PROPERTY.to_string(), property);
            }
        }
    }

    if agent == AgentId::Scheduling {
        if let Some(slot) = ScheduleSlot::parse(message, now) {
            let slot = match typed::<ScheduleSlot>(context, keys::SCHEDULE_SLOT) {
                Some(previous) => slot.merged_over(&previous),
                None => slot,
            };
            if let Ok(v) = serde_json::to_value(slot) {
                patch.insert(keys::SCHEDULE_SLOT.to_string(), v);
            }
        }
    }

    patch
}
