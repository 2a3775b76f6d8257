//! Inclusive time intervals and their algebra.
//!
//! A [`Span`] is an inclusive range between two UTC instants. Both actuator
//! state machines use spans to answer a single question ("has the current
//! phase expired yet") via [`Span::contains_time`], but the full interval
//! algebra (overlap, intersection, gap, encompass) is provided so schedules
//! can be composed and reasoned about.
//!
//! All operations are pure and total; none of them error. Construction
//! normalizes the pair so that `end >= start` always holds. "No span yet" is
//! expressed by the callers as `Option<Span>` rather than a sentinel value, so
//! a legitimately zero-length span is never ambiguous with "uninitialized".

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// An inclusive range between two time instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl Span {
    /// Create a span covering `duration` from `start`.
    ///
    /// If the duration is negative-equivalent (the computed end precedes the
    /// start), the endpoints are swapped so the span is always well ordered.
    pub fn new(start: DateTime<Utc>, duration: Duration) -> Self {
        let delta =
            ChronoDuration::from_std(duration).unwrap_or_else(|_| ChronoDuration::max_value());
        let end = start
            .checked_add_signed(delta)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        if end < start {
            Span { start: end, end: start }
        } else {
            Span { start, end }
        }
    }

    /// The instant at the start of the span.
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// The instant at the end of the span.
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// The length of time represented by the span.
    pub fn duration(&self) -> Duration {
        (self.end - self.start).to_std().unwrap_or_default()
    }

    /// Whether `t` is within the span, inclusive on both ends.
    pub fn contains_time(&self, t: DateTime<Utc>) -> bool {
        !(t < self.start || t > self.end)
    }

    /// Whether `other` lies entirely within this span.
    pub fn contains(&self, other: &Span) -> bool {
        self.contains_time(other.start) && self.contains_time(other.end)
    }

    /// Whether the span ends before `t`.
    pub fn before(&self, t: DateTime<Utc>) -> bool {
        self.end < t
    }

    /// Whether the span begins after `t`.
    pub fn after(&self, t: DateTime<Utc>) -> bool {
        self.start > t
    }

    /// Whether this span ends before or exactly at the start of `other`.
    pub fn precedes(&self, other: &Span) -> bool {
        self.end <= other.start
    }

    /// Whether this span begins after or exactly at the end of `other`.
    pub fn follows(&self, other: &Span) -> bool {
        self.start >= other.end
    }

    /// Whether the spans intersect for a non-zero duration.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && self.end > other.start
    }

    /// The non-zero overlap of the two spans, if any.
    pub fn intersection(&self, other: &Span) -> Option<Span> {
        if !self.overlaps(other) {
            return None;
        }
        Some(Span {
            start: self.start.max(other.start),
            end: self.end.min(other.end),
        })
    }

    /// The period between two non-overlapping spans, if any.
    pub fn gap(&self, other: &Span) -> Option<Span> {
        if self.overlaps(other) {
            return None;
        }
        Some(Span {
            start: self.end.min(other.end),
            end: self.start.max(other.start),
        })
    }

    /// The minimum span that fully contains both spans.
    pub fn encompass(&self, other: &Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// This span shifted forward by `d`.
    pub fn offset(&self, d: Duration) -> Span {
        let delta =
            ChronoDuration::from_std(d).unwrap_or_else(|_| ChronoDuration::max_value());
        Span {
            start: self
                .start
                .checked_add_signed(delta)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            end: self
                .end
                .checked_add_signed(delta)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn span(start: i64, len: u64) -> Span {
        Span::new(at(start), Duration::from_secs(len))
    }

    #[test]
    fn test_containment_is_inclusive_on_both_ends() {
        let s = span(0, 10);
        assert!(s.contains_time(at(0)));
        assert!(s.contains_time(at(10)));
        assert!(s.contains_time(at(5)));
        assert!(!s.contains_time(at(11)));
        assert!(!s.contains_time(at(-1)));
    }

    #[test]
    fn test_duration_round_trips() {
        let s = span(0, 42);
        assert_eq!(s.duration(), Duration::from_secs(42));
        assert_eq!(s.start(), at(0));
        assert_eq!(s.end(), at(42));
    }

    #[test]
    fn test_zero_length_span_contains_its_instant() {
        let s = span(7, 0);
        assert!(s.contains_time(at(7)));
        assert!(!s.contains_time(at(8)));
    }

    #[test]
    fn test_overlap_and_intersection() {
        let a = span(0, 10);
        let b = span(5, 10);
        let c = span(20, 5);

        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));

        let i = a.intersection(&b).unwrap();
        assert_eq!(i.start(), at(5));
        assert_eq!(i.end(), at(10));
        assert!(a.intersection(&c).is_none());
    }

    #[test]
    fn test_touching_spans_do_not_overlap() {
        let a = span(0, 10);
        let b = span(10, 5);
        assert!(!a.overlaps(&b));
        assert!(a.precedes(&b));
        assert!(b.follows(&a));
    }

    #[test]
    fn test_gap_between_disjoint_spans() {
        let a = span(0, 5);
        let b = span(10, 5);
        let g = a.gap(&b).unwrap();
        assert_eq!(g.start(), at(5));
        assert_eq!(g.end(), at(10));
        assert!(a.gap(&span(3, 10)).is_none());
    }

    #[test]
    fn test_encompass_and_contains() {
        let a = span(0, 5);
        let b = span(10, 5);
        let e = a.encompass(&b);
        assert_eq!(e.start(), at(0));
        assert_eq!(e.end(), at(15));
        assert!(e.contains(&a));
        assert!(e.contains(&b));
        assert!(!a.contains(&e));
    }

    #[test]
    fn test_before_and_after() {
        let s = span(10, 5);
        assert!(s.before(at(16)));
        assert!(!s.before(at(15)));
        assert!(s.after(at(9)));
        assert!(!s.after(at(10)));
    }

    #[test]
    fn test_offset_shifts_both_ends() {
        let s = span(0, 5).offset(Duration::from_secs(100));
        assert_eq!(s.start(), at(100));
        assert_eq!(s.end(), at(105));
    }

    #[test]
    fn test_serde_round_trip() {
        let s = span(3, 9);
        let json = serde_json::to_string(&s).unwrap();
        let back: Span = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
