//! Column value generation by column name
//!
//! The rule book maps a normalized column name (lowercase, no `_`, `-` or
//! whitespace) to a value source plus an extraction step. Columns without a
//! rule fall back to a value derived from their declared type.

mod date;
mod hours;

pub use date::DateGenerator;
pub use hours::HourGenerator;

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use fake::faker::address::en::{BuildingNumber, CityName, StreetName, ZipCode};
use fake::faker::name::en::Name;
use fake::faker::phone_number::en::PhoneNumber;
use fake::Fake;
use rand::distr::Alphanumeric;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;

use crate::parser::SqlValue;
use crate::schema::ColumnType;

/// Produces a fresh value for a column, or `None` when it has no rule for the name.
pub trait ColumnValueGenerator {
    fn generate(&mut self, column_name: &str) -> Option<SqlValue>;
}

impl<F> ColumnValueGenerator for F
where
    F: FnMut(&str) -> Option<SqlValue>,
{
    fn generate(&mut self, column_name: &str) -> Option<SqlValue> {
        self(column_name)
    }
}

/// Which part of the source output a rule keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extract {
    WholeValue,
    /// The n-th space separated word
    NthWord(usize),
}

impl Extract {
    pub fn apply(self, value: String) -> String {
        match self {
            Extract::WholeValue => value,
            Extract::NthWord(index) => match value.split(' ').nth(index) {
                Some(word) => word.to_string(),
                None => value,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    FullName,
    Pesel,
    Address,
    PhoneNumber,
    LicenseNumber,
    Date,
    Hour,
}

#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub source: Source,
    pub extract: Extract,
}

impl Rule {
    const fn new(source: Source, extract: Extract) -> Self {
        Self { source, extract }
    }
}

const DEFAULT_RULES: &[(&str, Rule)] = &[
    ("name", Rule::new(Source::FullName, Extract::NthWord(0))),
    ("secondname", Rule::new(Source::FullName, Extract::NthWord(1))),
    ("surname", Rule::new(Source::FullName, Extract::NthWord(1))),
    ("lastname", Rule::new(Source::FullName, Extract::NthWord(1))),
    ("pesel", Rule::new(Source::Pesel, Extract::WholeValue)),
    ("address", Rule::new(Source::Address, Extract::WholeValue)),
    ("telephonenumber", Rule::new(Source::PhoneNumber, Extract::WholeValue)),
    ("telephonenum", Rule::new(Source::PhoneNumber, Extract::WholeValue)),
    ("phonenumber", Rule::new(Source::PhoneNumber, Extract::WholeValue)),
    ("phonenum", Rule::new(Source::PhoneNumber, Extract::WholeValue)),
    ("licensenumber", Rule::new(Source::LicenseNumber, Extract::WholeValue)),
    ("date", Rule::new(Source::Date, Extract::WholeValue)),
    ("examdate", Rule::new(Source::Date, Extract::WholeValue)),
    ("hour", Rule::new(Source::Hour, Extract::WholeValue)),
    ("starthour", Rule::new(Source::Hour, Extract::WholeValue)),
    ("endhour", Rule::new(Source::Hour, Extract::WholeValue)),
    ("starttime", Rule::new(Source::Hour, Extract::WholeValue)),
    ("endtime", Rule::new(Source::Hour, Extract::WholeValue)),
];

/// Name-driven value generator with its own seeded RNG.
pub struct RuleBook {
    rules: HashMap<String, Rule>,
    rng: ChaCha8Rng,
    dates: DateGenerator,
    hours: HourGenerator,
    today: NaiveDate,
}

impl RuleBook {
    pub fn new(seed: u64) -> Self {
        Self {
            rules: DEFAULT_RULES
                .iter()
                .map(|(name, rule)| (name.to_string(), *rule))
                .collect(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            dates: DateGenerator::default(),
            hours: HourGenerator::default(),
            today: Local::now().date_naive(),
        }
    }

    /// Pin "today" so date output does not depend on the wall clock.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn insert_rule(&mut self, column_name: &str, rule: Rule) {
        self.rules.insert(normalize(column_name), rule);
    }

    pub fn rule(&self, column_name: &str) -> Option<Rule> {
        self.rules.get(&normalize(column_name)).copied()
    }

    fn produce(&mut self, source: Source) -> String {
        let rng = &mut self.rng;
        match source {
            Source::FullName => Name().fake_with_rng(rng),
            Source::Pesel => pesel(rng),
            Source::Address => {
                let street: String = StreetName().fake_with_rng(rng);
                let number: String = BuildingNumber().fake_with_rng(rng);
                let zip: String = ZipCode().fake_with_rng(rng);
                let city: String = CityName().fake_with_rng(rng);
                format!("{} {}, {} {}", street, number, zip, city)
            }
            Source::PhoneNumber => PhoneNumber().fake_with_rng(rng),
            Source::LicenseNumber => license_number(rng),
            Source::Date => self.dates.generate_formatted(rng, self.today),
            Source::Hour => self.hours.next_formatted(rng),
        }
    }
}

impl ColumnValueGenerator for RuleBook {
    fn generate(&mut self, column_name: &str) -> Option<SqlValue> {
        let rule = self.rule(column_name)?;
        let value = self.produce(rule.source);
        Some(SqlValue::Text(rule.extract.apply(value)))
    }
}

/// Lowercase and drop `_`, `-` and whitespace.
pub fn normalize(column_name: &str) -> String {
    column_name
        .chars()
        .filter(|c| *c != '_' && *c != '-' && !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// A PESEL with a valid birth-date encoding and check digit.
pub fn pesel<R: Rng + ?Sized>(rng: &mut R) -> String {
    const WEIGHTS: [u32; 10] = [1, 3, 7, 9, 1, 3, 7, 9, 1, 3];

    let first = NaiveDate::from_ymd_opt(1940, 1, 1).unwrap_or_default();
    let birth = first + TimeDelta::days(rng.random_range(0..365 * 65));
    let century_offset = if birth.year() >= 2000 { 20 } else { 0 };

    let mut digits: Vec<u32> = Vec::with_capacity(11);
    let yy = birth.year().rem_euclid(100) as u32;
    let mm = birth.month() + century_offset;
    for part in [yy, mm, birth.day()] {
        digits.push(part / 10);
        digits.push(part % 10);
    }
    for _ in 0..4 {
        digits.push(rng.random_range(0..10));
    }

    let sum: u32 = digits.iter().zip(WEIGHTS).map(|(d, w)| d * w).sum();
    digits.push((10 - sum % 10) % 10);

    digits
        .into_iter()
        .filter_map(|d| char::from_digit(d, 10))
        .collect()
}

/// Three capital letters followed by six digits.
pub fn license_number<R: Rng + ?Sized>(rng: &mut R) -> String {
    let mut value = String::with_capacity(9);
    for _ in 0..3 {
        value.push(char::from(rng.random_range(b'A'..=b'Z')));
    }
    for _ in 0..6 {
        value.push(char::from(rng.random_range(b'0'..=b'9')));
    }
    value
}

/// A random value matching the declared type, for columns without a rule.
pub fn fallback_value<R: Rng + ?Sized>(col_type: &ColumnType, rng: &mut R) -> SqlValue {
    match col_type {
        ColumnType::Integer => SqlValue::Integer(rng.random_range(1..=1_000_000)),
        ColumnType::Float => {
            let value: f64 = rng.random_range(0.0..1000.0);
            SqlValue::Real((value * 100.0).round() / 100.0)
        }
        ColumnType::Boolean => SqlValue::Integer(i64::from(rng.random_bool(0.5))),
        ColumnType::Date => SqlValue::Text(random_date(rng).format("%Y-%m-%d").to_string()),
        ColumnType::DateTime => {
            let seconds = rng.random_range(0..86_400);
            let time =
                NaiveTime::from_num_seconds_from_midnight_opt(seconds, 0).unwrap_or_default();
            let stamp = NaiveDateTime::new(random_date(rng), time);
            SqlValue::Text(stamp.format("%Y-%m-%d %H:%M:%S").to_string())
        }
        ColumnType::Char(Some(n)) => SqlValue::Text(alphanumeric(rng, *n as usize)),
        ColumnType::Varchar(Some(n)) => {
            let len = rng.random_range(1..=(*n as usize).clamp(1, 16));
            SqlValue::Text(alphanumeric(rng, len))
        }
        ColumnType::Char(None) | ColumnType::Varchar(None) | ColumnType::Text => {
            SqlValue::Text(alphanumeric(rng, 12))
        }
    }
}

fn random_date<R: Rng + ?Sized>(rng: &mut R) -> NaiveDate {
    let first = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or_default();
    first + TimeDelta::days(rng.random_range(0..365 * 25))
}

fn alphanumeric<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len).map(|_| char::from(rng.sample(Alphanumeric))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("Phone_Number"), "phonenumber");
        assert_eq!(normalize("Telephone - num"), "telephonenum");
        assert_eq!(normalize("License_Number"), "licensenumber");
    }

    #[test]
    fn test_extract_nth_word() {
        assert_eq!(Extract::NthWord(1).apply("Jan Kowalski".into()), "Kowalski");
        assert_eq!(Extract::NthWord(0).apply("Jan Kowalski".into()), "Jan");
        assert_eq!(Extract::NthWord(4).apply("Jan".into()), "Jan");
        assert_eq!(Extract::WholeValue.apply("a b".into()), "a b");
    }

    #[test]
    fn test_unknown_column_has_no_rule() {
        let mut book = RuleBook::new(1);
        assert_eq!(book.generate("Gearbox"), None);
        assert!(matches!(book.generate("Surname"), Some(SqlValue::Text(_))));
    }

    #[test]
    fn test_pesel_checksum() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        for _ in 0..50 {
            let value = pesel(&mut rng);
            assert_eq!(value.len(), 11);
            let digits: Vec<u32> = value.chars().map(|c| c.to_digit(10).unwrap()).collect();
            let weights = [1, 3, 7, 9, 1, 3, 7, 9, 1, 3, 1];
            let sum: u32 = digits.iter().zip(weights).map(|(d, w)| d * w).sum();
            assert_eq!(sum % 10, 0, "{}", value);
        }
    }

    #[test]
    fn test_same_seed_same_values() {
        let mut a = RuleBook::new(5);
        let mut b = RuleBook::new(5);
        for column in ["Name", "Address", "Phone_Number", "PESEL"] {
            assert_eq!(a.generate(column), b.generate(column));
        }
    }

    #[test]
    fn test_fallback_respects_type() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        match fallback_value(&ColumnType::Char(Some(4)), &mut rng) {
            SqlValue::Text(text) => assert_eq!(text.len(), 4),
            other => panic!("unexpected {:?}", other),
        }
        match fallback_value(&ColumnType::Boolean, &mut rng) {
            SqlValue::Integer(v) => assert!(v == 0 || v == 1),
            other => panic!("unexpected {:?}", other),
        }
    }
}
