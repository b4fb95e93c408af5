//! Filter/Query Engine
//!
//! Pure functions over a marker snapshot. A [`MarkerFilter`] is one selection:
//! applying a new one replaces the previous view rather than narrowing it.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ProblemReport, format_timestamp};

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// City selection; `AllCities` applies no restriction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CityFilter {
    AllCities,
    Named(String),
}

/// The active marker selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MarkerFilter {
    All,
    /// Case-insensitive substring of the label; empty matches everything
    Text(String),
    City(CityFilter),
    /// `newer` keeps reports at most `days` old, otherwise strictly older ones
    Age { days: f64, newer: bool },
    /// Great-circle radius around a point
    Nearby {
        latitude: f64,
        longitude: f64,
        radius_km: f64,
    },
}

/// Header counters of the list view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerStats {
    pub total: usize,
    pub today: usize,
}

impl MarkerFilter {
    /// Whether one report passes this selection at time `now`
    #[must_use]
    pub fn matches(&self, report: &ProblemReport, now: DateTime<Utc>) -> bool {
        match self {
            MarkerFilter::All => true,
            MarkerFilter::Text(query) => report
                .label
                .to_lowercase()
                .contains(&query.to_lowercase()),
            MarkerFilter::City(CityFilter::AllCities) => true,
            MarkerFilter::City(CityFilter::Named(city)) => {
                report.city.as_deref() == Some(city.as_str())
            }
            MarkerFilter::Age { days, newer } => match age_in_days(report, now) {
                Some(age) if *newer => age <= *days,
                Some(age) => age > *days,
                None => false,
            },
            MarkerFilter::Nearby {
                latitude,
                longitude,
                radius_km,
            } => {
                let distance = haversine::distance(
                    haversine::Location {
                        latitude: *latitude,
                        longitude: *longitude,
                    },
                    haversine::Location {
                        latitude: report.lat,
                        longitude: report.lon,
                    },
                    haversine::Units::Kilometers,
                );
                distance <= *radius_km
            }
        }
    }

    /// The reports passing this selection, in their stored order
    #[must_use]
    pub fn apply(&self, reports: &[ProblemReport], now: DateTime<Utc>) -> Vec<ProblemReport> {
        reports
            .iter()
            .filter(|report| self.matches(report, now))
            .cloned()
            .collect()
    }
}

fn age_in_days(report: &ProblemReport, now: DateTime<Utc>) -> Option<f64> {
    let captured = report.captured_at()?;
    Some((now - captured).num_milliseconds() as f64 / MILLIS_PER_DAY)
}

/// Total count and reports captured within the last 24 hours.
///
/// "Today" compares the stored ISO strings against the cutoff rendered in the same
/// fixed format, which orders the same way as the instants they encode.
#[must_use]
pub fn stats(reports: &[ProblemReport], now: DateTime<Utc>) -> MarkerStats {
    let cutoff = format_timestamp(now - Duration::milliseconds(86_400_000));
    MarkerStats {
        total: reports.len(),
        today: reports
            .iter()
            .filter(|report| report.timestamp.as_str() > cutoff.as_str())
            .count(),
    }
}

/// Distinct resolved cities in order of first appearance
#[must_use]
pub fn distinct_cities(reports: &[ProblemReport]) -> Vec<String> {
    let mut seen = HashSet::new();
    reports
        .iter()
        .filter_map(|report| report.city.as_deref())
        .filter(|city| !city.is_empty())
        .filter(|city| seen.insert(*city))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn at(label: &str, lat: f64, lon: f64, ts: &str) -> ProblemReport {
        let mut report = ProblemReport::new(label, lat, lon);
        report.timestamp = ts.to_string();
        report
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap()
    }

    fn reports() -> Vec<ProblemReport> {
        vec![
            at("pothole", 40.0, -73.0, "2024-01-08T00:00:00.000Z").with_city("New York"),
            at("Graffiti", 45.07, 7.68, "2024-01-09T12:00:00.000Z").with_city("Turin"),
            at("pothole", 45.06, 7.69, "2023-09-01T08:30:00.000Z").with_city("Turin"),
            at("broken light", 51.5, -0.12, "2024-01-09T23:00:00.000Z"),
        ]
    }

    #[rstest]
    #[case("pot", 2)]
    #[case("POTHOLE", 2)]
    #[case("graf", 1)]
    #[case("", 4)]
    #[case("graffiti wall", 0)]
    fn test_text_filter(#[case] query: &str, #[case] expected: usize) {
        let filtered = MarkerFilter::Text(query.to_string()).apply(&reports(), now());
        assert_eq!(filtered.len(), expected);
    }

    #[test]
    fn test_city_filter() {
        let all = reports();
        let turin = MarkerFilter::City(CityFilter::Named("Turin".to_string())).apply(&all, now());
        assert_eq!(turin.len(), 2);
        assert!(turin.iter().all(|r| r.city.as_deref() == Some("Turin")));

        let every = MarkerFilter::City(CityFilter::AllCities).apply(&all, now());
        assert_eq!(every, all);

        let partial = MarkerFilter::City(CityFilter::Named("Tur".to_string())).apply(&all, now());
        assert!(partial.is_empty());
    }

    #[test]
    fn test_age_boundary_is_inclusive_for_newer() {
        let report = at("pothole", 40.0, -73.0, "2024-01-08T00:00:00.000Z");
        let newer = MarkerFilter::Age {
            days: 2.0,
            newer: true,
        };
        let older = MarkerFilter::Age {
            days: 2.0,
            newer: false,
        };
        assert!(newer.matches(&report, now()));
        assert!(!older.matches(&report, now()));
    }

    #[test]
    fn test_age_partitions() {
        let all = reports();
        let old = MarkerFilter::Age {
            days: 90.0,
            newer: false,
        }
        .apply(&all, now());
        assert_eq!(old.len(), 1);
        assert_eq!(old[0].timestamp, "2023-09-01T08:30:00.000Z");

        let fresh = MarkerFilter::Age {
            days: 90.0,
            newer: true,
        }
        .apply(&all, now());
        assert_eq!(fresh.len(), 3);
    }

    #[test]
    fn test_unparsable_timestamp_is_excluded_both_ways() {
        let report = at("pothole", 40.0, -73.0, "last tuesday");
        for newer in [true, false] {
            let filter = MarkerFilter::Age { days: 2.0, newer };
            assert!(!filter.matches(&report, now()));
        }
    }

    #[test]
    fn test_filters_are_idempotent() {
        let all = reports();
        let filters = [
            MarkerFilter::All,
            MarkerFilter::Text("pot".to_string()),
            MarkerFilter::City(CityFilter::Named("Turin".to_string())),
            MarkerFilter::Age {
                days: 2.0,
                newer: true,
            },
            MarkerFilter::Nearby {
                latitude: 45.07,
                longitude: 7.68,
                radius_km: 5.0,
            },
        ];
        for filter in filters {
            let once = filter.apply(&all, now());
            let twice = filter.apply(&once, now());
            assert_eq!(once, twice, "{filter:?}");
        }
    }

    #[test]
    fn test_nearby_filter() {
        let near = MarkerFilter::Nearby {
            latitude: 45.07,
            longitude: 7.68,
            radius_km: 5.0,
        }
        .apply(&reports(), now());
        assert_eq!(near.len(), 2);
    }

    #[test]
    fn test_stats_today_uses_last_24_hours() {
        let stats = stats(&reports(), now());
        assert_eq!(stats.total, 4);
        // 2024-01-09T12:00 and 2024-01-09T23:00 are after the 2024-01-09T00:00 cutoff
        assert_eq!(stats.today, 2);
    }

    #[test]
    fn test_distinct_cities_keep_first_appearance() {
        assert_eq!(distinct_cities(&reports()), vec!["New York", "Turin"]);
    }
}
