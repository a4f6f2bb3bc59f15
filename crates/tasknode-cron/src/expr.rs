use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, Datelike, FixedOffset, TimeZone, Timelike};

use crate::calendar::{self, days_in_month, nearest_weekday, weekday};
use crate::error::{CronError, Result};
use crate::field::{parse_values, Field, ValueSet};

/// How far ahead `next_exec_time` searches before giving up.
pub const SEARCH_HORIZON_YEARS: i32 = 8;

/// Day-of-month constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DayRule {
    /// `*` or `?`.
    Any,
    Days(ValueSet),
    /// `L`
    LastDay,
    /// `<n>W`
    NearestWeekday(u32),
    /// `LW`
    LastWeekday,
}

/// Day-of-week constraint, 0 = Sunday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WeekRule {
    /// `*` or `?`.
    Any,
    Weekdays(ValueSet),
    /// `<w>L`
    Last(u32),
    /// `<w>#<n>`
    Nth { weekday: u32, nth: u32 },
}

/// A parsed six-field expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    seconds: ValueSet,
    minutes: ValueSet,
    hours: ValueSet,
    days: DayRule,
    months: ValueSet,
    weekdays: WeekRule,
}

impl Schedule {
    pub fn parse(expr: &str) -> Result<Self> {
        let parts: Vec<&str> = expr.trim().split(' ').collect();
        if parts.len() != 6 {
            return Err(CronError::FieldCount { found: parts.len() });
        }

        Ok(Self {
            seconds: parse_values(Field::Second, parts[0])?,
            minutes: parse_values(Field::Minute, parts[1])?,
            hours: parse_values(Field::Hour, parts[2])?,
            days: parse_day_rule(parts[3])?,
            months: parse_values(Field::Month, parts[4])?,
            weekdays: parse_week_rule(parts[5])?,
        })
    }

    /// Earliest instant `>= from` (truncated to the second) matching every
    /// field, expressed in the UTC+8 operating zone.
    pub fn next_after<Tz: TimeZone>(&self, from: &DateTime<Tz>) -> Result<DateTime<FixedOffset>> {
        let zone = calendar::zone();
        let local = from.with_timezone(&zone);
        let mut cur = Cursor {
            year: local.year(),
            month: local.month(),
            day: local.day(),
            hour: local.hour(),
            minute: local.minute(),
            second: local.second(),
        };
        let limit = cur.year + SEARCH_HORIZON_YEARS;

        loop {
            if cur.year > limit {
                return Err(CronError::MatchEmpty {
                    years: SEARCH_HORIZON_YEARS,
                });
            }

            match self.months.first_from(cur.month) {
                Some(m) if m == cur.month => {}
                Some(m) => {
                    cur.month = m;
                    cur.reset_from_day();
                }
                None => {
                    cur.next_year();
                    continue;
                }
            }

            match self.day_set(cur.year, cur.month).first_from(cur.day) {
                Some(d) if d == cur.day => {}
                Some(d) => {
                    cur.day = d;
                    cur.reset_from_hour();
                }
                None => {
                    cur.next_month();
                    continue;
                }
            }

            match self.hours.first_from(cur.hour) {
                Some(h) if h == cur.hour => {}
                Some(h) => {
                    cur.hour = h;
                    cur.reset_from_minute();
                }
                None => {
                    cur.next_day();
                    continue;
                }
            }

            match self.minutes.first_from(cur.minute) {
                Some(m) if m == cur.minute => {}
                Some(m) => {
                    cur.minute = m;
                    cur.second = 0;
                }
                None => {
                    cur.next_hour();
                    continue;
                }
            }

            match self.seconds.first_from(cur.second) {
                Some(s) => cur.second = s,
                None => {
                    cur.next_minute();
                    continue;
                }
            }

            return zone
                .with_ymd_and_hms(cur.year, cur.month, cur.day, cur.hour, cur.minute, cur.second)
                .single()
                .ok_or(CronError::MatchEmpty {
                    years: SEARCH_HORIZON_YEARS,
                });
        }
    }

    /// Days of `month` that satisfy the day constraints.
    ///
    /// A restricted day-of-month wins over day-of-week; day-of-week only
    /// applies when day-of-month is `*` or `?`.
    fn day_set(&self, year: i32, month: u32) -> ValueSet {
        let dim = days_in_month(year, month);
        let mut set = ValueSet::EMPTY;
        match self.days {
            DayRule::Days(days) => return days.intersect(ValueSet::span(1, dim)),
            DayRule::LastDay => {
                set.insert(dim);
                return set;
            }
            DayRule::NearestWeekday(n) => {
                set.insert(nearest_weekday(year, month, n));
                return set;
            }
            DayRule::LastWeekday => {
                set.insert(nearest_weekday(year, month, dim));
                return set;
            }
            DayRule::Any => {}
        }

        let matching = |wanted: u32| {
            (1..=dim).filter(move |d| weekday(year, month, *d) == Some(wanted))
        };
        match self.weekdays {
            WeekRule::Any => return ValueSet::span(1, dim),
            WeekRule::Weekdays(wds) => {
                for d in 1..=dim {
                    if weekday(year, month, d).is_some_and(|w| wds.contains(w)) {
                        set.insert(d);
                    }
                }
            }
            WeekRule::Last(w) => {
                if let Some(d) = matching(w).last() {
                    set.insert(d);
                }
            }
            WeekRule::Nth { weekday: w, nth } => {
                if let Some(d) = matching(w).nth(nth as usize - 1) {
                    set.insert(d);
                }
            }
        }
        set
    }
}

impl FromStr for Schedule {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self> {
        Schedule::parse(s)
    }
}

fn parse_day_rule(expr: &str) -> Result<DayRule> {
    let field = Field::DayOfMonth;
    let special = || CronError::Special {
        field,
        expr: expr.to_string(),
    };
    match expr {
        "*" | "?" => return Ok(DayRule::Any),
        "L" | "l" => return Ok(DayRule::LastDay),
        "LW" | "lw" => return Ok(DayRule::LastWeekday),
        _ => {}
    }
    if let Some(n) = expr.strip_suffix('W').or_else(|| expr.strip_suffix('w')) {
        if n.is_empty() || !n.bytes().all(|b| b.is_ascii_digit()) {
            return Err(special());
        }
        return Ok(DayRule::NearestWeekday(field.value(n)?));
    }
    if expr.contains(['L', 'l', 'W', 'w', '#']) {
        return Err(special());
    }
    Ok(DayRule::Days(parse_values(field, expr)?))
}

fn parse_week_rule(expr: &str) -> Result<WeekRule> {
    let field = Field::DayOfWeek;
    let special = || CronError::Special {
        field,
        expr: expr.to_string(),
    };
    if expr == "*" || expr == "?" {
        return Ok(WeekRule::Any);
    }
    if let Some((w, n)) = expr.split_once('#') {
        if w.is_empty() || n.contains('#') || expr.contains(',') {
            return Err(special());
        }
        let nth: u32 = n.parse().map_err(|_| special())?;
        if !(1..=5).contains(&nth) {
            return Err(CronError::OutOfRange {
                field,
                value: nth,
                min: 1,
                max: 5,
            });
        }
        return Ok(WeekRule::Nth {
            weekday: field.value(w)? % 7,
            nth,
        });
    }
    if let Some(w) = expr.strip_suffix('L').or_else(|| expr.strip_suffix('l')) {
        if w.is_empty() || w.contains([',', '-', '/']) {
            return Err(special());
        }
        return Ok(WeekRule::Last(field.value(w)? % 7));
    }
    if expr.contains('#') {
        return Err(special());
    }
    Ok(WeekRule::Weekdays(parse_values(field, expr)?))
}

/// Calendar position being advanced during the search.
struct Cursor {
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
}

impl Cursor {
    fn reset_from_minute(&mut self) {
        self.minute = 0;
        self.second = 0;
    }

    fn reset_from_hour(&mut self) {
        self.hour = 0;
        self.reset_from_minute();
    }

    fn reset_from_day(&mut self) {
        self.day = 1;
        self.reset_from_hour();
    }

    fn next_year(&mut self) {
        self.year += 1;
        self.month = 1;
        self.reset_from_day();
    }

    fn next_month(&mut self) {
        if self.month >= 12 {
            self.next_year();
        } else {
            self.month += 1;
            self.reset_from_day();
        }
    }

    fn next_day(&mut self) {
        if self.day >= days_in_month(self.year, self.month) {
            self.next_month();
        } else {
            self.day += 1;
            self.reset_from_hour();
        }
    }

    fn next_hour(&mut self) {
        if self.hour >= 23 {
            self.next_day();
        } else {
            self.hour += 1;
            self.reset_from_minute();
        }
    }

    fn next_minute(&mut self) {
        if self.minute >= 59 {
            self.next_hour();
        } else {
            self.minute += 1;
            self.second = 0;
        }
    }
}

/// A cron expression whose parse is computed once and then reused.
///
/// Parse failures are not cached; every call re-reports them.
#[derive(Debug, Default)]
pub struct CronExpr {
    source: String,
    parsed: OnceLock<Schedule>,
}

impl CronExpr {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            parsed: OnceLock::new(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Parsed form, computing it on first use.
    pub fn schedule(&self) -> Result<&Schedule> {
        if let Some(schedule) = self.parsed.get() {
            return Ok(schedule);
        }
        let schedule = Schedule::parse(&self.source)?;
        Ok(self.parsed.get_or_init(|| schedule))
    }

    /// Check the expression without evaluating it.
    pub fn validate(&self) -> Result<()> {
        self.schedule().map(|_| ())
    }

    /// Next fire time at or after `from`, in the UTC+8 operating zone.
    pub fn next_exec_time<Tz: TimeZone>(&self, from: DateTime<Tz>) -> Result<DateTime<FixedOffset>> {
        self.schedule()?.next_after(&from)
    }
}

impl Clone for CronExpr {
    fn clone(&self) -> Self {
        let parsed = OnceLock::new();
        if let Some(schedule) = self.parsed.get() {
            let _ = parsed.set(schedule.clone());
        }
        Self {
            source: self.source.clone(),
            parsed,
        }
    }
}

impl PartialEq for CronExpr {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl From<&str> for CronExpr {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CronExpr {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}
