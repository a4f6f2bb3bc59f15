//! Per-field tokenizing and value-set construction.

use std::fmt;

use crate::error::{CronError, Result};

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// Position of a field inside a six-field expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Second,
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
}

impl Field {
    pub const ALL: [Field; 6] = [
        Field::Second,
        Field::Minute,
        Field::Hour,
        Field::DayOfMonth,
        Field::Month,
        Field::DayOfWeek,
    ];

    /// Inclusive bounds accepted in the expression text.
    ///
    /// Day of week accepts 7 as an alias for Sunday, so its upper bound is
    /// wider than the normalized 0-6 range.
    pub fn bounds(self) -> (u32, u32) {
        match self {
            Field::Second | Field::Minute => (0, 59),
            Field::Hour => (0, 23),
            Field::DayOfMonth => (1, 31),
            Field::Month => (1, 12),
            Field::DayOfWeek => (0, 7),
        }
    }

    fn lookup_name(self, token: &str) -> Option<u32> {
        let lower = token.to_ascii_lowercase();
        match self {
            Field::Month => MONTH_NAMES
                .iter()
                .position(|n| *n == lower)
                .map(|i| i as u32 + 1),
            Field::DayOfWeek => WEEKDAY_NAMES
                .iter()
                .position(|n| *n == lower)
                .map(|i| i as u32),
            _ => None,
        }
    }

    /// Resolve a single literal token (number or name) and range-check it.
    pub(crate) fn value(self, token: &str) -> Result<u32> {
        let (min, max) = self.bounds();
        let value = match token.parse::<u32>() {
            Ok(v) => v,
            Err(_) => self
                .lookup_name(token)
                .ok_or_else(|| CronError::InvalidValue {
                    field: self,
                    token: token.to_string(),
                })?,
        };
        if value < min || value > max {
            return Err(CronError::OutOfRange {
                field: self,
                value,
                min,
                max,
            });
        }
        Ok(value)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Field::Second => "second",
            Field::Minute => "minute",
            Field::Hour => "hour",
            Field::DayOfMonth => "day-of-month",
            Field::Month => "month",
            Field::DayOfWeek => "day-of-week",
        };
        write!(f, "{s}")
    }
}

/// Set of admissible values for one field, one bit per value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ValueSet(u64);

impl ValueSet {
    pub const EMPTY: ValueSet = ValueSet(0);

    /// Every value in `min..=max`.
    pub fn span(min: u32, max: u32) -> Self {
        let mut set = ValueSet::EMPTY;
        for v in min..=max {
            set.insert(v);
        }
        set
    }

    pub fn insert(&mut self, value: u32) {
        if value < 64 {
            self.0 |= 1 << value;
        }
    }

    pub fn contains(self, value: u32) -> bool {
        value < 64 && self.0 & (1 << value) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Smallest member `>= value`.
    pub fn first_from(self, value: u32) -> Option<u32> {
        if value >= 64 {
            return None;
        }
        let masked = self.0 & (u64::MAX << value);
        if masked == 0 {
            None
        } else {
            Some(masked.trailing_zeros())
        }
    }

    pub fn first(self) -> Option<u32> {
        self.first_from(0)
    }

    pub fn intersect(self, other: ValueSet) -> ValueSet {
        ValueSet(self.0 & other.0)
    }

    pub fn iter(self) -> impl Iterator<Item = u32> {
        (0..64u32).filter(move |v| self.contains(*v))
    }
}

/// Parse a plain field (no `L`/`W`/`#`) into its value set.
///
/// Day-of-week sevens are folded onto Sunday.
pub(crate) fn parse_values(field: Field, expr: &str) -> Result<ValueSet> {
    let mut set = ValueSet::EMPTY;
    if expr.contains(',') {
        for item in expr.split(',') {
            if item.is_empty() {
                return Err(CronError::Comma {
                    field,
                    expr: expr.to_string(),
                });
            }
            parse_item(field, item, &mut set)?;
        }
    } else {
        parse_item(field, expr, &mut set)?;
    }

    if field == Field::DayOfWeek && set.contains(7) {
        set.0 &= !(1 << 7);
        set.insert(0);
    }
    Ok(set)
}

fn parse_item(field: Field, item: &str, set: &mut ValueSet) -> Result<()> {
    let (min, max) = field.bounds();

    if let Some((base, step)) = item.split_once('/') {
        let slash = || CronError::Slash {
            field,
            expr: item.to_string(),
        };
        if base.is_empty() || step.contains('/') {
            return Err(slash());
        }
        let step: u32 = step.parse().map_err(|_| slash())?;
        if step == 0 || step > max {
            return Err(slash());
        }
        let values = if base == "*" {
            (min..=max).collect()
        } else if base.contains('-') {
            parse_range(field, base)?
        } else {
            let start = field.value(base)?;
            (start..=max).collect::<Vec<_>>()
        };
        for v in values.into_iter().step_by(step as usize) {
            set.insert(v);
        }
        return Ok(());
    }

    if item == "*" {
        *set = ValueSet::span(min, max);
        return Ok(());
    }

    if item.contains('-') {
        for v in parse_range(field, item)? {
            set.insert(v);
        }
        return Ok(());
    }

    set.insert(field.value(item)?);
    Ok(())
}

/// Expand `start-end` in order, wrapping through the field maximum when
/// `start > end` (e.g. hours `22-2` yields 22, 23, 0, 1, 2).
fn parse_range(field: Field, item: &str) -> Result<Vec<u32>> {
    let dash = || CronError::Dash {
        field,
        expr: item.to_string(),
    };
    let (start, end) = item.split_once('-').ok_or_else(dash)?;
    if start.is_empty() || end.is_empty() || end.contains('-') {
        return Err(dash());
    }
    let start = field.value(start)?;
    let end = field.value(end)?;
    let (min, max) = field.bounds();

    if start <= end {
        Ok((start..=end).collect())
    } else {
        Ok((start..=max).chain(min..=end).collect())
    }
}
