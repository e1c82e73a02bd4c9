use chrono::{DateTime, Utc};

use super::traits::Clock;

/// Clock backed by the host's system time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn name(&self) -> &str {
        "system"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct At(DateTime<Utc>);

    impl Clock for At {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }

        fn name(&self) -> &str {
            "at"
        }
    }

    #[test]
    fn system_clock_is_close_to_now() {
        let delta = Utc::now() - SystemClock.now();
        assert!(delta.num_seconds().abs() < 5);
        assert_eq!(SystemClock.name(), "system");
    }

    #[test]
    fn today_uses_reference_zone() {
        // 20:00 UTC on Jan 1 is 01:30 on Jan 2 in Kolkata.
        let clock = At(Utc.with_ymd_and_hms(2024, 1, 1, 20, 0, 0).unwrap());
        assert_eq!(
            clock.today(chrono_tz::Asia::Kolkata).to_string(),
            "2024-01-02"
        );
        assert_eq!(clock.today(chrono_tz::UTC).to_string(), "2024-01-01");
    }
}
