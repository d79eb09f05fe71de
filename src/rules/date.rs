use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rand::Rng;

/// Working-day dates between two years, never later than `today`.
#[derive(Debug, Clone)]
pub struct DateGenerator {
    pub begin_year: i32,
    pub end_year: i32,
    pub format: String,
}

impl Default for DateGenerator {
    fn default() -> Self {
        Self {
            begin_year: 2023,
            end_year: 2025,
            format: "%Y-%m-%d".to_string(),
        }
    }
}

impl DateGenerator {
    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R, today: NaiveDate) -> NaiveDate {
        let first = NaiveDate::from_ymd_opt(self.begin_year, 1, 1).unwrap_or(today);
        let last = NaiveDate::from_ymd_opt(self.end_year, 12, 31)
            .unwrap_or(today)
            .min(today)
            .max(first);

        let span = (last - first).num_days();
        let date = first + Duration::days(rng.random_range(0..=span));

        // Sundays move to the neighbouring Saturday or Monday inside the range
        if date.weekday() != Weekday::Sun {
            date
        } else if date > first {
            date - Duration::days(1)
        } else {
            date + Duration::days(1)
        }
    }

    pub fn generate_formatted<R: Rng + ?Sized>(&self, rng: &mut R, today: NaiveDate) -> String {
        self.generate(rng, today).format(&self.format).to_string()
    }
}
