//! Per-`(engine_type, engine_id)` bookkeeping: reconstructing absolute
//! record timestamps from a router's relative uptime clock, and tracking
//! the NetFlow v5 flow-sequence counter to estimate records lost in
//! transit.
//!
//! NetFlow v5 carries no absolute record timestamp; each PDU header gives
//! the router's own millisecond uptime counter (`sys_uptime_ms`) alongside
//! a wall-clock sample (`unix_secs`/`unix_nsecs`) taken at the same
//! instant, and each record gives its own `first_ms`/`last_ms` relative to
//! that same uptime counter. Reconstructing a record's wall-clock time is
//! therefore `router_boot_time + record.first_ms`, where `router_boot_time
//! = (unix_secs, unix_nsecs) - sys_uptime_ms`. Because `sys_uptime_ms` is a
//! 32-bit millisecond counter, it wraps roughly every 49.7 days; a router
//! reboot is detected the same way, as a sudden large decrease in
//! `sys_uptime_ms` relative to the previous PDU.

/// How far backward `sys_uptime_ms` may drift between consecutive PDUs
/// before it is treated as a router reboot rather than packet reordering.
const REBOOT_GRACE_MS: i64 = 1_000;

/// `Δ` bands for [`EngineState::observe_sequence`], in units of records.
/// The engine tolerates up to a 1-hour loss window and a 60-second
/// late-arrival window at a assumed ~1000-flow/s export ceiling.
const LOSS_WINDOW: i64 = 3_600_000;
const LATE_WINDOW: i64 = 60_000;
const SEQUENCE_SPACE: i64 = 1i64 << 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceOutcome {
    /// `received == expected`: no gap.
    InOrder,
    /// `0 < Δ < 3_600_000`: presumed packet loss of `lost` records.
    PresumedLoss { lost: u64 },
    /// `Δ > 2³² − 60_000`: a PDU arrived late, just past a sequence
    /// rollover; `recovered` records are credited back against
    /// previously-presumed loss.
    LateArrivalAcrossRollover { recovered: u64 },
    /// `−60_000 < Δ < 0`: an ordinary late-arriving PDU; `recovered`
    /// records are credited back against previously-presumed loss.
    LateArrival { recovered: u64 },
    /// `Δ` deeply negative, within `3_600_000` of a full wrap: the
    /// sequence counter rolled over and records were lost across it.
    RolloverWithLoss { lost: u64 },
    /// None of the above bands matched; treated as a fresh baseline.
    PresumedReset,
}

#[derive(Debug, Clone)]
pub struct EngineState {
    engine_type: u8,
    engine_id: u8,
    router_boot_time_ms: i64,
    last_sys_uptime_ms: u32,
    expected_sequence: u32,
    missing_recs: u64,
    initialized: bool,
    sequence_initialized: bool,
    pub reboot_count: u64,
}

impl EngineState {
    pub fn new(engine_type: u8, engine_id: u8) -> Self {
        Self {
            engine_type,
            engine_id,
            router_boot_time_ms: 0,
            last_sys_uptime_ms: 0,
            expected_sequence: 0,
            missing_recs: 0,
            initialized: false,
            sequence_initialized: false,
            reboot_count: 0,
        }
    }

    pub fn key(&self) -> (u8, u8) {
        (self.engine_type, self.engine_id)
    }

    /// The `flow_sequence` value this engine expects on the next PDU.
    pub fn expected_sequence(&self) -> u32 {
        self.expected_sequence
    }

    /// Running count of records this engine presumes lost in transit,
    /// floored at zero as late arrivals credit it back down.
    pub fn missing_recs(&self) -> u64 {
        self.missing_recs
    }

    fn compute_boot_time_ms(unix_secs: u32, unix_nsecs: u32, sys_uptime_ms: u32) -> i64 {
        let wall_ms = unix_secs as i64 * 1000 + (unix_nsecs as i64 / 1_000_000);
        wall_ms - sys_uptime_ms as i64
    }

    /// Updates the reboot-detection state for a freshly arrived PDU header
    /// and returns the router boot time (milliseconds since the Unix
    /// epoch) to use for reconstructing this PDU's record timestamps.
    pub fn observe_pdu(&mut self, unix_secs: u32, unix_nsecs: u32, sys_uptime_ms: u32) -> i64 {
        let boot_time_ms = Self::compute_boot_time_ms(unix_secs, unix_nsecs, sys_uptime_ms);
        if self.initialized && (sys_uptime_ms as i64) + REBOOT_GRACE_MS < self.last_sys_uptime_ms as i64 {
            self.reboot_count += 1;
            // The next `observe_sequence` call re-establishes the baseline
            // at whatever flow_sequence it receives, which is equivalent to
            // resetting `expected` to that PDU's flow_sequence.
            self.sequence_initialized = false;
        }
        self.last_sys_uptime_ms = sys_uptime_ms;
        self.router_boot_time_ms = boot_time_ms;
        self.initialized = true;
        boot_time_ms
    }

    /// Converts a record's router-relative millisecond timestamp to an
    /// absolute Unix epoch millisecond timestamp using the boot time
    /// established by the most recent [`EngineState::observe_pdu`] call.
    pub fn absolute_time_ms(&self, relative_ms: u32) -> i64 {
        self.router_boot_time_ms + relative_ms as i64
    }

    /// Accounts for `flow_sequence` against the running expectation via the
    /// signed delta `Δ = received − expected`, then advances the
    /// expectation by `record_count` for the branches that call for it
    /// (NetFlow v5's sequence number counts total flow records exported,
    /// not PDUs).
    pub fn observe_sequence(&mut self, flow_sequence: u32, record_count: u32) -> SequenceOutcome {
        if !self.sequence_initialized {
            self.sequence_initialized = true;
            self.expected_sequence = flow_sequence;
        }

        let received = flow_sequence as i64;
        let expected = self.expected_sequence as i64;
        let delta = received - expected;

        let outcome = if delta == 0 {
            self.expected_sequence = flow_sequence.wrapping_add(record_count);
            SequenceOutcome::InOrder
        } else if delta > 0 && delta < LOSS_WINDOW {
            self.missing_recs += delta as u64;
            self.expected_sequence = flow_sequence.wrapping_add(record_count);
            SequenceOutcome::PresumedLoss { lost: delta as u64 }
        } else if delta > SEQUENCE_SPACE - LATE_WINDOW {
            let recovered = (record_count as u64).min(self.missing_recs);
            self.missing_recs -= recovered;
            SequenceOutcome::LateArrivalAcrossRollover { recovered }
        } else if delta > -LATE_WINDOW && delta < 0 {
            let recovered = (record_count as u64).min(self.missing_recs);
            self.missing_recs -= recovered;
            SequenceOutcome::LateArrival { recovered }
        } else if delta < -(SEQUENCE_SPACE - LOSS_WINDOW) {
            let lost = (SEQUENCE_SPACE - delta.unsigned_abs() as i64) as u64;
            self.missing_recs += lost;
            self.expected_sequence = flow_sequence.wrapping_add(record_count);
            SequenceOutcome::RolloverWithLoss { lost }
        } else {
            self.expected_sequence = flow_sequence.wrapping_add(record_count);
            SequenceOutcome::PresumedReset
        };
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot_time_reconstructs_absolute_record_time() {
        let mut engine = EngineState::new(0, 0);
        // Router has been up 123456 ms when this PDU's wall clock sample
        // was taken at unix_secs=1_700_000_000.
        let boot_ms = engine.observe_pdu(1_700_000_000, 0, 123_456);
        assert_eq!(boot_ms, 1_700_000_000_000 - 123_456);
        // A record whose first_ms equals the PDU's own sys_uptime_ms was
        // switched at exactly the wall-clock sample time.
        assert_eq!(engine.absolute_time_ms(123_456), 1_700_000_000_000);
    }

    #[test]
    fn in_order_sequence_advances_by_record_count() {
        let mut engine = EngineState::new(0, 0);
        assert_eq!(engine.observe_sequence(0, 10), SequenceOutcome::InOrder);
        assert_eq!(engine.observe_sequence(10, 5), SequenceOutcome::InOrder);
    }

    #[test]
    fn first_pdu_establishes_a_baseline_without_presumed_loss() {
        // A brand-new engine has no prior `expected_sequence` to compare
        // against; the first PDU it ever sees must not be reported as a
        // gap just because `expected_sequence` defaults to 0.
        let mut engine = EngineState::new(0, 0);
        let outcome = engine.observe_sequence(1000, 30);
        assert_eq!(outcome, SequenceOutcome::InOrder);
        assert_eq!(engine.missing_recs(), 0);
        assert_eq!(engine.expected_sequence(), 1030);
    }

    #[test]
    fn sequence_loss_is_tallied_and_expected_catches_up() {
        let mut engine = EngineState::new(0, 0);
        engine.observe_sequence(1000, 30);
        let outcome = engine.observe_sequence(1100, 30);
        assert_eq!(outcome, SequenceOutcome::PresumedLoss { lost: 70 });
        assert_eq!(engine.missing_recs(), 70);
        assert_eq!(engine.expected_sequence(), 1130);
    }

    #[test]
    fn sequence_rollover_with_loss_credits_the_wrap_distance() {
        let mut engine = EngineState::new(0, 0);
        engine.observe_sequence(4_294_967_200, 0);
        let outcome = engine.observe_sequence(100, 30);
        assert_eq!(outcome, SequenceOutcome::RolloverWithLoss { lost: 196 });
        assert_eq!(engine.missing_recs(), 196);
        assert_eq!(engine.expected_sequence(), 130);
    }

    #[test]
    fn late_arrival_recovers_previously_presumed_loss() {
        let mut engine = EngineState::new(0, 0);
        engine.observe_sequence(1000, 0);
        engine.observe_sequence(1050, 10); // presumed loss of 50; expected -> 1060
        let outcome = engine.observe_sequence(1010, 5);
        assert_eq!(outcome, SequenceOutcome::LateArrival { recovered: 5 });
        assert_eq!(engine.missing_recs(), 45);
        // A late arrival does not advance the expectation.
        assert_eq!(engine.expected_sequence(), 1060);
    }

    #[test]
    fn late_arrival_across_rollover_recovers_previously_presumed_loss() {
        let mut engine = EngineState::new(0, 0);
        engine.observe_sequence(100, 0);
        engine.observe_sequence(150, 0); // presumed loss of 50; expected -> 150
        let outcome = engine.observe_sequence(4_294_967_285, 5);
        assert_eq!(outcome, SequenceOutcome::LateArrivalAcrossRollover { recovered: 5 });
        assert_eq!(engine.missing_recs(), 45);
        assert_eq!(engine.expected_sequence(), 150);
    }

    #[test]
    fn delta_outside_every_band_is_a_presumed_reset() {
        let mut engine = EngineState::new(0, 0);
        engine.observe_sequence(0, 0);
        let outcome = engine.observe_sequence(10_000_000, 7);
        assert_eq!(outcome, SequenceOutcome::PresumedReset);
        assert_eq!(engine.missing_recs(), 0);
        assert_eq!(engine.expected_sequence(), 10_000_007);
    }

    #[test]
    fn sequence_wraparound_is_treated_as_in_order_progress() {
        let mut engine = EngineState::new(0, 0);
        engine.observe_sequence(u32::MAX - 2, 3); // expected becomes 0 (wraps)
        let outcome = engine.observe_sequence(0, 1);
        assert_eq!(outcome, SequenceOutcome::InOrder);
    }

    #[test]
    fn large_backward_uptime_jump_is_a_reboot() {
        let mut engine = EngineState::new(0, 0);
        engine.observe_pdu(1_700_000_000, 0, 500_000);
        engine.observe_sequence(100, 10);
        engine.observe_pdu(1_700_000_100, 0, 1_000); // uptime reset: reboot
        assert_eq!(engine.reboot_count, 1);
        assert_eq!(engine.observe_sequence(0, 1), SequenceOutcome::InOrder);
    }
}
