use chrono::{NaiveTime, TimeDelta};
use rand::Rng;

/// Stateful clock producing short ordered runs of times.
///
/// Each run starts at a random time within `begin..end` hours and every
/// following call adds 30 to 60 minutes. After `reset_limit` calls a new run
/// starts, so two consecutive columns (start, end) always come out ordered.
#[derive(Debug, Clone)]
pub struct HourGenerator {
    pub reset_limit: u32,
    pub begin: u32,
    pub end: u32,
    pub format: String,
    current: Option<NaiveTime>,
    count: u32,
}

impl Default for HourGenerator {
    fn default() -> Self {
        Self::new(2, 8, 18)
    }
}

impl HourGenerator {
    pub fn new(reset_limit: u32, begin: u32, end: u32) -> Self {
        Self {
            reset_limit: reset_limit.max(1),
            begin,
            end: end.max(begin + 1),
            format: "%H:%M".to_string(),
            current: None,
            count: 0,
        }
    }

    pub fn next_time<R: Rng + ?Sized>(&mut self, rng: &mut R) -> NaiveTime {
        let time = match self.current {
            Some(previous) if self.count < self.reset_limit => {
                previous + TimeDelta::minutes(rng.random_range(30..=60))
            }
            _ => {
                self.count = 0;
                let minute = rng.random_range(self.begin * 60..self.end * 60);
                NaiveTime::from_num_seconds_from_midnight_opt(minute * 60, 0)
                    .unwrap_or_default()
            }
        };
        self.count += 1;
        self.current = Some(time);
        time
    }

    pub fn next_formatted<R: Rng + ?Sized>(&mut self, rng: &mut R) -> String {
        self.next_time(rng).format(&self.format).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_pairs_are_ordered() {
        let mut generator = HourGenerator::default();
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        for _ in 0..100 {
            let start = generator.next_time(&mut rng);
            let end = generator.next_time(&mut rng);
            assert!(start >= NaiveTime::from_hms_opt(8, 0, 0).unwrap());
            assert!(start < NaiveTime::from_hms_opt(18, 0, 0).unwrap());
            let gap = (end - start).num_minutes();
            assert!((30..=60).contains(&gap), "gap {}", gap);
        }
    }
}
