use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::fmt;
use std::sync::Arc;

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Source of "now" plus the user's local time zone.
#[derive(Clone)]
pub struct Clock {
    now_provider: NowProvider,
    timezone: Tz,
}

impl Clock {
    pub fn system(timezone: Tz) -> Self {
        Self {
            now_provider: Arc::new(Utc::now),
            timezone,
        }
    }

    pub fn fixed(now: DateTime<Utc>, timezone: Tz) -> Self {
        Self {
            now_provider: Arc::new(move || now),
            timezone,
        }
    }

    /// Shares this clock's source of "now" with stores that stamp writes.
    pub fn now_provider(&self) -> NowProvider {
        Arc::clone(&self.now_provider)
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }

    pub fn now_local(&self) -> DateTime<Tz> {
        self.now().with_timezone(&self.timezone)
    }

    pub fn today(&self) -> NaiveDate {
        self.now_local().date_naive()
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Converts a wall-clock time in the clock's zone to an instant.
    ///
    /// Ambiguous times (DST fall-back) take the earlier instant; times inside a
    /// DST gap move to the first valid half hour after it.
    pub fn resolve_local(&self, local: NaiveDateTime) -> DateTime<Utc> {
        resolve_local(self.timezone, local)
    }
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Clock")
            .field("now", &self.now())
            .field("timezone", &self.timezone)
            .finish()
    }
}

pub fn resolve_local(timezone: Tz, local: NaiveDateTime) -> DateTime<Utc> {
    let mut candidate = local;
    // DST gaps are at most a couple of hours; walk forward in 30 minute steps.
    for _ in 0..8 {
        if let Some(resolved) = timezone.from_local_datetime(&candidate).earliest() {
            return resolved.with_timezone(&Utc);
        }
        candidate += chrono::Duration::minutes(30);
    }
    Utc.from_utc_datetime(&local)
}
