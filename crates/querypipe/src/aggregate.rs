//! Exact running aggregates over a scalar stream
//!
//! Sums are kept as fixed-point decimals with six fractional digits in an
//! `i128`, so adding many values never drifts the way `f64` does.

use querypipe_core::{
    error::{PipelineError, Result},
    Value,
};
use std::fmt;

const SCALE_DIGITS: usize = 6;
const SCALE: i128 = 1_000_000;

/// Fixed-point decimal with six fractional digits
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Decimal {
    scaled: i128,
}

impl Decimal {
    pub const ZERO: Decimal = Decimal { scaled: 0 };

    pub fn from_scaled(scaled: i128) -> Self {
        Self { scaled }
    }

    /// Value multiplied by 10^6
    pub fn scaled(&self) -> i128 {
        self.scaled
    }

    pub fn from_i64(value: i64) -> Self {
        Self {
            scaled: value as i128 * SCALE,
        }
    }

    /// Parse a plain decimal literal such as `-12.5`. Digits past the sixth
    /// fractional place are rounded half away from zero.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let (negative, digits) = match text.as_bytes().first()? {
            b'-' => (true, &text[1..]),
            b'+' => (false, &text[1..]),
            _ => (false, text),
        };
        let (int_part, frac_part) = match digits.split_once('.') {
            Some((int_part, frac_part)) => (int_part, frac_part),
            None => (digits, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return None;
        }
        if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
            return None;
        }

        let mut scaled: i128 = 0;
        for b in int_part.bytes() {
            scaled = scaled.checked_mul(10)?.checked_add((b - b'0') as i128)?;
        }
        let mut frac = frac_part.bytes();
        for _ in 0..SCALE_DIGITS {
            let digit = frac.next().map(|b| (b - b'0') as i128).unwrap_or(0);
            scaled = scaled.checked_mul(10)?.checked_add(digit)?;
        }
        if matches!(frac.next(), Some(b'5'..=b'9')) {
            scaled = scaled.checked_add(1)?;
        }

        Some(Self {
            scaled: if negative { -scaled } else { scaled },
        })
    }

    /// Convert a store value. Accepts integers, reals and numeric text.
    pub fn from_value(value: &Value) -> Result<Self> {
        let parsed = match value {
            Value::Integer(v) => Some(Self::from_i64(*v)),
            Value::Real(v) if v.is_finite() => Self::parse(&v.to_string()),
            Value::Text(s) => Self::parse(s),
            _ => None,
        };
        parsed.ok_or_else(|| {
            PipelineError::InvalidState(format!("not a numeric value: {value:?}"))
        })
    }

    pub fn checked_add(self, other: Decimal) -> Option<Decimal> {
        self.scaled.checked_add(other.scaled).map(Self::from_scaled)
    }

    /// Divide by a count, rounding half away from zero
    pub fn div_count(self, count: u64) -> Option<Decimal> {
        if count == 0 {
            return None;
        }
        let count = count as i128;
        let quotient = self.scaled / count;
        let remainder = self.scaled % count;
        let rounded = if remainder.abs() * 2 >= count {
            quotient + self.scaled.signum()
        } else {
            quotient
        };
        Some(Self::from_scaled(rounded))
    }

    pub fn to_f64(&self) -> f64 {
        self.scaled as f64 / SCALE as f64
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.scaled < 0 { "-" } else { "" };
        let abs = self.scaled.unsigned_abs();
        let int_part = abs / SCALE as u128;
        let frac_part = abs % SCALE as u128;
        if frac_part == 0 {
            return write!(f, "{sign}{int_part}");
        }
        let frac = format!("{:0width$}", frac_part, width = SCALE_DIGITS);
        write!(f, "{sign}{int_part}.{}", frac.trim_end_matches('0'))
    }
}

/// Running sum and count over a stream of numbers, in O(1) memory
///
/// # Example
///
/// ```
/// use querypipe::RunningAggregate;
///
/// let mut agg = RunningAggregate::new();
/// for age in [30, 22, 45, 50] {
///     agg.push(age).unwrap();
/// }
/// assert_eq!(agg.count(), 4);
/// assert_eq!(agg.average().unwrap().to_string(), "36.75");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunningAggregate {
    sum: Decimal,
    count: u64,
}

impl RunningAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold every value of a scalar stream, stopping at the first error.
    pub fn consume<I>(values: I) -> Result<Self>
    where
        I: IntoIterator<Item = Result<Value>>,
    {
        let mut agg = Self::new();
        for value in values {
            agg.push_value(&value?)?;
        }
        Ok(agg)
    }

    pub fn push(&mut self, value: impl Into<Value>) -> Result<()> {
        self.push_value(&value.into())
    }

    pub fn push_value(&mut self, value: &Value) -> Result<()> {
        let decimal = Decimal::from_value(value)?;
        self.sum = self
            .sum
            .checked_add(decimal)
            .ok_or_else(|| PipelineError::InvalidState("running sum overflowed".into()))?;
        self.count += 1;
        Ok(())
    }

    pub fn sum(&self) -> Decimal {
        self.sum
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Mean of the values seen so far, or `None` when there were none.
    pub fn average(&self) -> Option<Decimal> {
        self.sum.div_count(self.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(Decimal::parse("12.5"), Some(Decimal::from_scaled(12_500_000)));
        assert_eq!(Decimal::parse("-0.25"), Some(Decimal::from_scaled(-250_000)));
        assert_eq!(Decimal::parse(".5"), Some(Decimal::from_scaled(500_000)));
        assert_eq!(Decimal::parse("1.0000005"), Some(Decimal::from_scaled(1_000_001)));
        assert_eq!(Decimal::parse("1e3"), None);
        assert_eq!(Decimal::parse("-"), None);
        assert_eq!(Decimal::parse(""), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Decimal::from_scaled(36_750_000).to_string(), "36.75");
        assert_eq!(Decimal::from_scaled(-500_000).to_string(), "-0.5");
        assert_eq!(Decimal::from_i64(147).to_string(), "147");
    }

    #[test]
    fn test_no_drift_on_repeated_tenths() {
        let mut agg = RunningAggregate::new();
        for _ in 0..10_000 {
            agg.push(0.1).unwrap();
        }
        assert_eq!(agg.sum(), Decimal::from_i64(1000));
    }

    #[test]
    fn test_average_of_empty_is_none() {
        let agg = RunningAggregate::new();
        assert_eq!(agg.count(), 0);
        assert_eq!(agg.average(), None);
    }

    #[test]
    fn test_mixed_numeric_values() {
        let agg = RunningAggregate::consume(vec![
            Ok(Value::Integer(1)),
            Ok(Value::Real(2.5)),
            Ok(Value::Text(" 3.25 ".into())),
        ])
        .unwrap();
        assert_eq!(agg.sum().to_string(), "6.75");
        assert_eq!(agg.average().unwrap().to_string(), "2.25");
    }

    #[test]
    fn test_non_numeric_rejected() {
        let mut agg = RunningAggregate::new();
        assert!(matches!(
            agg.push_value(&Value::Text("abc".into())),
            Err(PipelineError::InvalidState(_))
        ));
        assert!(agg.push_value(&Value::Null).is_err());
        assert!(agg.push(f64::NAN).is_err());
        assert_eq!(agg.count(), 0);
    }

    #[test]
    fn test_average_rounds_half_away_from_zero() {
        let mut agg = RunningAggregate::new();
        agg.push(1).unwrap();
        agg.push(1).unwrap();
        agg.push(0).unwrap();
        // 2 / 3 = 0.666666|6...
        assert_eq!(agg.average(), Some(Decimal::from_scaled(666_667)));
    }
}
