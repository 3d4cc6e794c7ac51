//! Fragment reassembly.
//!
//! Frames that carry fragment metadata are grouped by identity until a
//! completion signal arrives: the declared total is reached, or a piece is
//! flagged final. Messages that go quiet for longer than the staleness window
//! are force-completed with whatever arrived.

use std::{
    collections::{BTreeSet, HashMap, VecDeque},
    ops::RangeInclusive,
    time::{Duration, Instant},
};

use {
    tether_protocol::{Fragment, LogicalMessage, MAX_LISTED_GAPS},
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use tether_metrics::{buffer as buffer_metrics, counter, labels};

/// What happened to a submitted fragment.
#[derive(Debug, Clone)]
pub enum FragmentOutcome {
    /// The fragment completed a buffered message.
    Completed(LogicalMessage),
    /// The fragment was buffered (or dropped as a duplicate); nothing to do.
    Pending,
    /// The fragment needs no reassembly and is released as-is, or carries no
    /// completion signal the buffer could wait for.
    Passthrough(LogicalMessage),
}

impl FragmentOutcome {
    /// The released message, if any.
    #[must_use]
    pub fn into_message(self) -> Option<LogicalMessage> {
        match self {
            Self::Completed(message) | Self::Passthrough(message) => Some(message),
            Self::Pending => None,
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferConfig {
    /// When off, every frame is released immediately as its own message.
    pub reconstruction: bool,
    /// Idle time after which a partial message is force-completed.
    pub staleness_window: Duration,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            reconstruction: true,
            staleness_window: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct PendingMessage {
    fragments: Vec<Fragment>,
    seen: BTreeSet<u64>,
    expected_total: Option<u64>,
    last_update: Instant,
}

impl PendingMessage {
    fn new(now: Instant) -> Self {
        Self {
            fragments: Vec::new(),
            seen: BTreeSet::new(),
            expected_total: None,
            last_update: now,
        }
    }
}

/// Holds partially received messages keyed by identity.
///
/// Owned by a single session loop; needs no locking.
#[derive(Debug, Default)]
pub struct FragmentBuffer {
    config: BufferConfig,
    pending: HashMap<String, PendingMessage>,
    expired: VecDeque<LogicalMessage>,
}

impl FragmentBuffer {
    #[must_use]
    pub fn new(config: BufferConfig) -> Self {
        Self {
            config,
            pending: HashMap::new(),
            expired: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Number of identities with buffered fragments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Route one fragment. The fragment's arrival time is the clock used for
    /// staleness; any message that went stale by then is moved to the
    /// expired queue (see [`FragmentBuffer::take_expired`]) before routing.
    pub fn submit(&mut self, fragment: Fragment) -> FragmentOutcome {
        if !self.config.reconstruction || !fragment.is_fragment() {
            return self.passthrough(fragment);
        }

        let now = fragment.received_at;
        self.evict_stale(now);

        let key = fragment.identity_key().to_string();
        let entry = self
            .pending
            .entry(key.clone())
            .or_insert_with(|| PendingMessage::new(now));

        if let Some(seq) = fragment.sequence
            && !entry.seen.insert(seq)
        {
            warn!(identity = %key, sequence = seq, "dropping duplicate fragment");
            #[cfg(feature = "metrics")]
            counter!(buffer_metrics::DUPLICATES_DROPPED_TOTAL).increment(1);
            return FragmentOutcome::Pending;
        }

        if let Some(total) = fragment.total {
            match entry.expected_total {
                None => entry.expected_total = Some(total),
                Some(declared) if declared != total => warn!(
                    identity = %key,
                    declared,
                    conflicting = total,
                    "conflicting fragment total, keeping first"
                ),
                Some(_) => {},
            }
        }

        let final_flag = fragment.is_final;
        entry.fragments.push(fragment);
        entry.last_update = now;

        let received = entry.fragments.len() as u64;
        let total_reached = entry.expected_total.is_some_and(|total| received >= total);
        let no_signal = entry.expected_total.is_none() && final_flag.is_none();

        if final_flag == Some(true) || total_reached {
            let message = self.release(&key, false);
            return FragmentOutcome::Completed(message);
        }
        if no_signal {
            debug!(identity = %key, "fragment carries no completion signal, releasing");
            let message = self.release(&key, false);
            return FragmentOutcome::Passthrough(message);
        }

        #[cfg(feature = "metrics")]
        counter!(buffer_metrics::FRAGMENTS_BUFFERED_TOTAL).increment(1);
        debug!(
            identity = %key,
            received,
            expected = ?self.pending.get(&key).and_then(|p| p.expected_total),
            "fragment buffered"
        );
        FragmentOutcome::Pending
    }

    /// Force-complete every message idle for longer than the staleness
    /// window, and return them together with any already queued by
    /// [`FragmentBuffer::submit`]. Each is marked `partial`.
    pub fn sweep_stale(&mut self, now: Instant) -> Vec<LogicalMessage> {
        self.evict_stale(now);
        self.take_expired()
    }

    /// Drain messages force-completed during earlier submits.
    pub fn take_expired(&mut self) -> Vec<LogicalMessage> {
        self.expired.drain(..).collect()
    }

    /// Discard all buffered state. Returns how many partial messages were
    /// dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len() + self.expired.len();
        self.pending.clear();
        self.expired.clear();
        dropped
    }

    fn passthrough(&self, fragment: Fragment) -> FragmentOutcome {
        #[cfg(feature = "metrics")]
        counter!(buffer_metrics::MESSAGES_RELEASED_TOTAL, labels::COMPLETION => "passthrough")
            .increment(1);
        FragmentOutcome::Passthrough(LogicalMessage::single(fragment))
    }

    fn evict_stale(&mut self, now: Instant) {
        let window = self.config.staleness_window;
        let stale: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| now.saturating_duration_since(p.last_update) > window)
            .map(|(key, _)| key.clone())
            .collect();

        for key in stale {
            let message = self.release(&key, true);
            info!(
                identity = %message.identity,
                fragments = message.fragment_count(),
                expected = ?message.expected_total,
                window_secs = window.as_secs(),
                "force-completing stale message"
            );
            #[cfg(feature = "metrics")]
            counter!(buffer_metrics::STALE_EVICTIONS_TOTAL).increment(1);
            self.expired.push_back(message);
        }
    }

    fn release(&mut self, key: &str, partial: bool) -> LogicalMessage {
        let pending = self
            .pending
            .remove(key)
            .unwrap_or_else(|| PendingMessage::new(Instant::now()));
        let message = assemble(key, pending, partial);

        if message.has_gaps() {
            warn!(
                identity = %message.identity,
                missing = message.missing,
                gaps = ?message.gaps,
                "message completed with missing fragments"
            );
        }
        #[cfg(feature = "metrics")]
        counter!(
            buffer_metrics::MESSAGES_RELEASED_TOTAL,
            labels::COMPLETION => if partial { "stale" } else { "complete" }
        )
        .increment(1);

        message
    }
}

/// Order the pieces and compute gaps.
fn assemble(key: &str, pending: PendingMessage, partial: bool) -> LogicalMessage {
    let PendingMessage {
        mut fragments,
        seen,
        expected_total,
        ..
    } = pending;

    if fragments.iter().all(|f| f.sequence.is_some()) {
        fragments.sort_by_key(|f| f.sequence);
    }

    // With a known total, indices below it are taken as zero-based and an
    // index equal to it as one-based.
    let (gaps, missing) = match (seen.first(), seen.last()) {
        (Some(&lo), Some(&hi)) => {
            let range = match expected_total {
                Some(total) if hi < total => 0..=total - 1,
                Some(total) if hi == total && lo >= 1 => 1..=total,
                _ => lo..=hi,
            };
            find_gaps(&seen, range)
        },
        _ => (Vec::new(), 0),
    };

    LogicalMessage {
        identity: key.to_string(),
        fragments,
        expected_total,
        partial,
        gaps,
        missing,
    }
}

/// Count the indices of `range` absent from `seen` and list the first few.
///
/// Runs in time bounded by `seen.len()` and [`MAX_LISTED_GAPS`], never by
/// the width of the range, which comes straight from the peer.
fn find_gaps(seen: &BTreeSet<u64>, range: RangeInclusive<u64>) -> (Vec<u64>, u64) {
    let (start, end) = (*range.start(), *range.end());
    let present = seen.range(start..=end).count() as u64;
    let missing = (end - start).saturating_add(1).saturating_sub(present);

    let mut gaps = Vec::new();
    let mut next = Some(start);
    for &index in seen.range(start..=end) {
        while let Some(candidate) = next
            && candidate < index
            && gaps.len() < MAX_LISTED_GAPS
        {
            gaps.push(candidate);
            next = candidate.checked_add(1);
        }
        if gaps.len() >= MAX_LISTED_GAPS {
            break;
        }
        next = index.checked_add(1);
    }
    while let Some(candidate) = next
        && candidate <= end
        && gaps.len() < MAX_LISTED_GAPS
    {
        gaps.push(candidate);
        next = candidate.checked_add(1);
    }

    (gaps, missing)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn buffer() -> FragmentBuffer {
        FragmentBuffer::new(BufferConfig {
            reconstruction: true,
            staleness_window: Duration::from_secs(30),
        })
    }

    fn at(frame: &str, base: Instant, secs: u64) -> Fragment {
        Fragment::decode(frame).with_received_at(base + Duration::from_secs(secs))
    }

    fn completed(outcome: FragmentOutcome) -> LogicalMessage {
        match outcome {
            FragmentOutcome::Completed(message) => message,
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    fn passthrough(outcome: FragmentOutcome) -> LogicalMessage {
        match outcome {
            FragmentOutcome::Passthrough(message) => message,
            other => panic!("expected Passthrough, got {other:?}"),
        }
    }

    #[test]
    fn two_fragments_with_total_reassemble() {
        let mut buf = buffer();
        assert!(
            buf.submit(Fragment::decode(r#"{"id":1,"seq":0,"total":2,"text":"Hello "}"#))
                .is_pending()
        );
        let msg = completed(buf.submit(Fragment::decode(
            r#"{"id":1,"seq":1,"total":2,"text":"world"}"#,
        )));

        assert_eq!(msg.content(), "Hello world");
        assert_eq!(msg.identity, "1");
        assert_eq!(msg.expected_total, Some(2));
        assert!(!msg.partial);
        assert!(!msg.has_gaps());
        assert!(buf.is_empty());
    }

    #[rstest]
    #[case([0, 1, 2])]
    #[case([0, 2, 1])]
    #[case([1, 0, 2])]
    #[case([1, 2, 0])]
    #[case([2, 0, 1])]
    #[case([2, 1, 0])]
    fn any_arrival_order_reassembles(#[case] order: [u64; 3]) {
        let pieces = ["a", "b", "c"];
        let mut buf = buffer();
        let mut outcomes: Vec<FragmentOutcome> = order
            .iter()
            .map(|&seq| {
                let text = pieces[seq as usize];
                buf.submit(Fragment::decode(&format!(
                    r#"{{"id":"m","seq":{seq},"total":3,"text":"{text}"}}"#
                )))
            })
            .collect();

        let last = outcomes.pop().unwrap();
        assert!(outcomes.iter().all(FragmentOutcome::is_pending));
        let msg = completed(last);
        assert_eq!(msg.content(), "abc");
        assert!(!msg.has_gaps());
        assert!(buf.is_empty());
    }

    #[test]
    fn arrival_order_when_sequence_is_missing() {
        let mut buf = buffer();
        buf.submit(Fragment::decode(r#"{"id":"x","seq":5,"total":2,"text":"first "}"#));
        let msg = completed(buf.submit(Fragment::decode(
            r#"{"id":"x","total":2,"text":"second"}"#,
        )));
        assert_eq!(msg.content(), "first second");
    }

    #[test]
    fn final_flag_completes_without_total() {
        let mut buf = buffer();
        assert!(
            buf.submit(Fragment::decode(r#"{"id":"s","part":0,"final":false,"text":"a"}"#))
                .is_pending()
        );
        assert!(
            buf.submit(Fragment::decode(r#"{"id":"s","part":1,"final":false,"text":"b"}"#))
                .is_pending()
        );
        let msg = completed(buf.submit(Fragment::decode(
            r#"{"id":"s","part":2,"final":true,"text":"c"}"#,
        )));
        assert_eq!(msg.content(), "abc");
        assert_eq!(msg.expected_total, None);
    }

    #[test]
    fn final_flag_before_total_reached_records_gaps() {
        let mut buf = buffer();
        buf.submit(Fragment::decode(r#"{"id":1,"seq":0,"total":4,"text":"a"}"#));
        let msg = completed(buf.submit(Fragment::decode(
            r#"{"id":1,"seq":2,"total":4,"final":true,"text":"c"}"#,
        )));
        assert_eq!(msg.content(), "ac");
        assert_eq!(msg.gaps, vec![1, 3]);
        assert_eq!(msg.missing, 2);
    }

    #[test]
    fn huge_declared_total_with_final_flag_completes_promptly() {
        let mut buf = buffer();
        let msg = completed(buf.submit(Fragment::decode(
            r#"{"id":1,"seq":0,"total":100000000000,"final":true,"text":"a"}"#,
        )));

        assert_eq!(msg.content(), "a");
        assert_eq!(msg.missing, 100_000_000_000 - 1);
        assert_eq!(msg.gaps.len(), MAX_LISTED_GAPS);
        assert_eq!(msg.gaps[..3], [1, 2, 3]);
    }

    #[test]
    fn huge_index_spread_completes_promptly() {
        let mut buf = buffer();
        buf.submit(Fragment::decode(r#"{"id":1,"seq":0,"final":false,"text":"a"}"#));
        let msg = completed(buf.submit(Fragment::decode(
            r#"{"id":1,"seq":1000000000000,"final":true,"text":"b"}"#,
        )));

        assert_eq!(msg.content(), "ab");
        assert_eq!(msg.missing, 1_000_000_000_000 - 1);
        assert_eq!(msg.gaps.len(), MAX_LISTED_GAPS);
    }

    #[test]
    fn stale_message_with_huge_total_is_evicted_promptly() {
        let base = Instant::now();
        let mut buf = buffer();
        buf.submit(at(r#"{"id":9,"seq":5,"total":18446744073709551615,"text":"x"}"#, base, 0));

        let expired = buf.sweep_stale(base + Duration::from_secs(31));
        assert_eq!(expired.len(), 1);
        assert!(expired[0].partial);
        assert_eq!(expired[0].missing, u64::MAX - 1);
        assert_eq!(expired[0].gaps[..6], [0, 1, 2, 3, 4, 6]);
    }

    #[rstest]
    #[case(&[0, 2, 4], 0..=4, vec![1, 3], 2)]
    #[case(&[3], 0..=5, vec![0, 1, 2, 4, 5], 5)]
    #[case(&[0, 1, 2], 0..=2, vec![], 0)]
    #[case(&[u64::MAX], 0..=u64::MAX, (0..32).collect(), u64::MAX - 1)]
    fn gaps_are_listed_up_to_the_cap(
        #[case] seen: &[u64],
        #[case] range: RangeInclusive<u64>,
        #[case] gaps: Vec<u64>,
        #[case] missing: u64,
    ) {
        let seen: BTreeSet<u64> = seen.iter().copied().collect();
        assert_eq!(find_gaps(&seen, range), (gaps, missing));
    }

    #[test]
    fn whole_message_passes_through() {
        let mut buf = buffer();
        let msg = passthrough(buf.submit(Fragment::decode(r#"{"message":"open the door"}"#)));
        assert_eq!(msg.content(), "open the door");
        assert_eq!(msg.fragment_count(), 1);
        assert!(buf.is_empty());

        let msg = passthrough(buf.submit(Fragment::decode("plain text")));
        assert_eq!(msg.content(), "plain text");
    }

    #[test]
    fn no_completion_signal_releases_immediately() {
        let mut buf = buffer();
        let msg = passthrough(buf.submit(Fragment::decode(r#"{"id":"q","seq":3,"text":"lonely"}"#)));
        assert_eq!(msg.content(), "lonely");
        assert!(!msg.partial);

        let msg = passthrough(buf.submit(Fragment::decode(
            r#"{"session":"q","timestamp":1700000000,"text":"stamped"}"#,
        )));
        assert_eq!(msg.identity, "q");
        assert!(buf.is_empty());
    }

    #[rstest]
    #[case(r#"{"id":1,"seq":0,"total":2,"text":"a"}"#)]
    #[case(r#"{"message":"whole"}"#)]
    #[case("not json")]
    fn reconstruction_disabled_passes_everything_through(#[case] frame: &str) {
        let mut buf = FragmentBuffer::new(BufferConfig {
            reconstruction: false,
            ..BufferConfig::default()
        });
        let msg = passthrough(buf.submit(Fragment::decode(frame)));
        assert_eq!(msg.fragment_count(), 1);
        assert!(buf.is_empty());
    }

    #[test]
    fn identity_less_fragments_share_default_session() {
        let mut buf = buffer();
        buf.submit(Fragment::decode(r#"{"seq":0,"total":2,"text":"x"}"#));
        let msg = completed(buf.submit(Fragment::decode(r#"{"seq":1,"total":2,"text":"y"}"#)));
        assert_eq!(msg.identity, "default");
        assert_eq!(msg.content(), "xy");
    }

    #[test]
    fn identities_are_independent() {
        let mut buf = buffer();
        buf.submit(Fragment::decode(r#"{"id":"a","seq":0,"total":2,"text":"a0"}"#));
        buf.submit(Fragment::decode(r#"{"id":"b","seq":0,"total":2,"text":"b0"}"#));
        assert_eq!(buf.len(), 2);

        let b = completed(buf.submit(Fragment::decode(
            r#"{"id":"b","seq":1,"total":2,"text":"b1"}"#,
        )));
        assert_eq!(b.content(), "b0b1");
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn duplicate_sequence_is_dropped() {
        let mut buf = buffer();
        buf.submit(Fragment::decode(r#"{"id":1,"seq":0,"total":2,"text":"a"}"#));
        assert!(
            buf.submit(Fragment::decode(r#"{"id":1,"seq":0,"total":2,"text":"a-again"}"#))
                .is_pending()
        );
        let msg = completed(buf.submit(Fragment::decode(
            r#"{"id":1,"seq":1,"total":2,"text":"b"}"#,
        )));
        assert_eq!(msg.content(), "ab");
    }

    #[test]
    fn first_declared_total_wins() {
        let mut buf = buffer();
        buf.submit(Fragment::decode(r#"{"id":1,"seq":0,"total":3,"text":"a"}"#));
        assert!(
            buf.submit(Fragment::decode(r#"{"id":1,"seq":1,"total":2,"text":"b"}"#))
                .is_pending()
        );
        let msg = completed(buf.submit(Fragment::decode(
            r#"{"id":1,"seq":2,"total":2,"text":"c"}"#,
        )));
        assert_eq!(msg.expected_total, Some(3));
        assert_eq!(msg.content(), "abc");
    }

    #[test]
    fn stale_message_is_force_completed_by_sweep() {
        let base = Instant::now();
        let mut buf = buffer();
        buf.submit(at(r#"{"id":7,"seq":0,"total":3,"text":"partial "}"#, base, 0));
        buf.submit(at(r#"{"id":7,"seq":1,"total":3,"text":"data"}"#, base, 10));

        assert!(buf.sweep_stale(base + Duration::from_secs(40)).is_empty());
        let expired = buf.sweep_stale(base + Duration::from_secs(41));
        assert_eq!(expired.len(), 1);

        let msg = &expired[0];
        assert!(msg.partial);
        assert_eq!(msg.content(), "partial data");
        assert_eq!(msg.fragment_count(), 2);
        assert_eq!(msg.gaps, vec![2]);
        assert_eq!(msg.missing, 1);
        assert!(buf.is_empty());
    }

    #[test]
    fn late_fragment_starts_a_new_message() {
        let base = Instant::now();
        let mut buf = buffer();
        buf.submit(at(r#"{"id":7,"seq":0,"total":2,"text":"early"}"#, base, 0));

        // Arrives after the window: the old message expires on submit and
        // the late piece is buffered on its own.
        let outcome = buf.submit(at(r#"{"id":7,"seq":1,"total":2,"text":"late"}"#, base, 31));
        assert!(outcome.is_pending());

        let expired = buf.take_expired();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].content(), "early");
        assert!(expired[0].partial);

        assert_eq!(buf.len(), 1);
        let expired = buf.sweep_stale(base + Duration::from_secs(62));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].content(), "late");
        assert_eq!(expired[0].gaps, vec![0]);
    }

    #[test]
    fn submit_expires_other_identities() {
        let base = Instant::now();
        let mut buf = buffer();
        buf.submit(at(r#"{"id":"old","seq":0,"total":2,"text":"o"}"#, base, 0));
        let msg = passthrough(buf.submit(at(r#"{"text":"whole"}"#, base, 100)));
        assert_eq!(msg.content(), "whole");
        // Passthrough frames skip the staleness check.
        assert_eq!(buf.len(), 1);

        buf.submit(at(r#"{"id":"new","seq":0,"total":2,"text":"n"}"#, base, 100));
        let expired = buf.take_expired();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].identity, "old");
    }

    #[test]
    fn clear_discards_pending() {
        let mut buf = buffer();
        buf.submit(Fragment::decode(r#"{"id":1,"seq":0,"total":2,"text":"a"}"#));
        buf.submit(Fragment::decode(r#"{"id":2,"seq":0,"total":2,"text":"b"}"#));
        assert_eq!(buf.clear(), 2);
        assert!(buf.is_empty());
        assert_eq!(buf.clear(), 0);
    }
}
