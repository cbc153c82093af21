//! The EC engine: accumulation, publication, force-extend, and refresh
//! (spec §4.2–§4.6).

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::clock::{Clock, MonotonicClock};
use crate::config::Config;
use crate::error::KanonError;
use crate::kernel::ec::{fit, generalize, Ec, GeneralizeOutcome};
use crate::types::{Field, FieldPos, Published};

/// A record whose QI values have been assigned to ECs but which has not yet
/// matured to `k` members on every dimension (spec §3 "Accumulated Record").
#[derive(Debug, Clone)]
struct AccumulatedRecord {
    counter: u64,
    payload: Vec<Field>,
    qi_ec_map: HashMap<FieldPos, u32>,
}

/// Outcome of force-extending one QI dimension of an expiring record
/// (spec §4.3).
enum ForceExtendOutcome {
    /// The record migrated to `Ec` ordinal `.0`, which is now mature.
    Migrated(u32),
    /// No mature neighbor was available; the record publishes this QI via
    /// the Compromise Map instead (spec §4.3 step 5).
    Compromised,
}

/// The streaming k-anonymization engine (spec §3 "Lifecycle", §5).
///
/// An `Engine` owns all of its state — EC lists, accumulation queue,
/// compromise map, EC-alter log, and refresh timer — so callers get
/// reentrancy-free semantics for free (design notes §9) instead of the
/// reference implementation's module-level globals. Multi-producer callers
/// serialize access themselves, e.g. behind a `Mutex<Engine>`.
#[derive(Debug)]
pub struct Engine<C: Clock = MonotonicClock> {
    config: Config,
    ec_lists: HashMap<FieldPos, Vec<Ec>>,
    queue: VecDeque<AccumulatedRecord>,
    compromise: HashMap<FieldPos, (f64, f64)>,
    alter_log: HashMap<FieldPos, (u32, u32)>,
    init_timer: Instant,
    clock: C,
    rng: ChaCha8Rng,
}

impl Engine<MonotonicClock> {
    /// Build an engine seeded from OS entropy, with a monotonic refresh
    /// clock suitable for deployment.
    pub fn new(config: Config) -> Self {
        Self::new_with_clock(config, ChaCha8Rng::from_entropy(), MonotonicClock)
    }

    /// Build an engine with a fixed RNG seed, for deterministic tests and
    /// the publication-determinism law (spec §8).
    pub fn new_seeded(config: Config, seed: u64) -> Self {
        Self::new_with_clock(config, ChaCha8Rng::seed_from_u64(seed), MonotonicClock)
    }
}

impl<C: Clock> Engine<C> {
    /// Build an engine with an explicit RNG and clock. Used directly by
    /// tests that need a `ManualClock` to exercise refresh timing without
    /// sleeping.
    pub fn new_with_clock(config: Config, rng: ChaCha8Rng, clock: C) -> Self {
        let init_timer = clock.now();
        Engine {
            config,
            ec_lists: HashMap::new(),
            queue: VecDeque::new(),
            compromise: HashMap::new(),
            alter_log: HashMap::new(),
            init_timer,
            clock,
            rng,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Mutable access to the engine's clock, so tests driving a
    /// `ManualClock` can advance it between `ingest` calls.
    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    /// Number of records currently awaiting maturation.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Read-only access to one QI's current ECs, newest-created last.
    /// Exposed for invariant checks in tests; not required for normal
    /// ingest operation.
    pub fn ecs(&self, qi: FieldPos) -> &[Ec] {
        self.ec_lists.get(&qi).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// The `counter` of the oldest still-queued record, if any. Exposed for
    /// the queue-bound invariant check in tests (spec §8: "No record remains
    /// in the queue with `head.counter <= latest_counter -
    /// ACCUMULATION_DELAY_TOLERANCE`").
    pub fn queue_head_counter(&self) -> Option<u64> {
        self.queue.front().map(|r| r.counter)
    }

    fn qi_value(&self, fields: &[Field], counter: u64, qi: FieldPos) -> Result<f64, KanonError> {
        fields
            .get(qi)
            .and_then(Field::as_number)
            .ok_or_else(|| {
                KanonError::input_invalid(counter, format!("QI position {qi} is not numeric"))
            })
    }

    /// `ingest(counter, fields)` — spec §4.2 `process`, plus the refresh
    /// check (§4.5) and expiry sweep (§4.6) the reference runs after every
    /// incoming record. Returns every record published as a side effect of
    /// this call, in the order they were published (immediate publication,
    /// then any refresh-forced flush, then the expiry sweep).
    pub fn ingest(
        &mut self,
        counter: u64,
        mut fields: Vec<Field>,
    ) -> Result<Vec<Published>, KanonError> {
        let qi_positions = self.config.qi_pos.clone();
        let mut qi_ec_map: HashMap<FieldPos, u32> = HashMap::new();

        for &qi in &qi_positions {
            let v = self.qi_value(&fields, counter, qi)?;
            let ecs = self.ec_lists.entry(qi).or_default();
            let ordinal = match fit(ecs, v) {
                Some(ord) => {
                    let e = ecs.iter_mut().find(|e| e.number == ord).ok_or_else(|| {
                        KanonError::InternalInvariant(format!(
                            "fit() returned ordinal {ord} for QI {qi} with no matching EC"
                        ))
                    })?;
                    e.member += 1;
                    ord
                }
                None => match generalize(ecs, v, self.config.generalize_range, &mut self.rng) {
                    Ok(GeneralizeOutcome::Created(n)) | Ok(GeneralizeOutcome::Merged(n)) => n,
                    Err(detail) => return Err(KanonError::InternalInvariant(detail)),
                },
            };
            qi_ec_map.insert(qi, ordinal);
        }

        // Post-check is authoritative (spec §4.2 step 3); the in-line flag
        // the reference also sets during the fit loop is dead and is not
        // reproduced here.
        let to_accumulate = qi_positions.iter().any(|&qi| {
            let ord = qi_ec_map[&qi];
            self.ec_lists[&qi]
                .iter()
                .find(|e| e.number == ord)
                .map(|e| e.member < self.config.threshold_k)
                .unwrap_or(true)
        });

        let mut published = Vec::new();
        if to_accumulate {
            self.queue.push_back(AccumulatedRecord {
                counter,
                payload: std::mem::take(&mut fields),
                qi_ec_map,
            });
        } else {
            published.push(self.publish(counter, fields, qi_ec_map, false)?);
        }

        published.extend(self.refresh_check()?);
        published.extend(self.expiry_sweep(counter)?);
        Ok(published)
    }

    /// Emit a record: substitute QI ranges, strip SI fields (spec §4.4).
    fn publish(
        &mut self,
        counter: u64,
        mut payload: Vec<Field>,
        qi_ec_map: HashMap<FieldPos, u32>,
        compromise_mode: bool,
    ) -> Result<Published, KanonError> {
        for &qi in &self.config.qi_pos {
            let range = if compromise_mode {
                match self.compromise.get(&qi) {
                    Some(&(lb, ub)) => (lb, ub),
                    None => self.ec_range_for(qi, &qi_ec_map, counter)?,
                }
            } else {
                self.ec_range_for(qi, &qi_ec_map, counter)?
            };
            payload[qi] = Field::Range(range.0, range.1);
        }

        if compromise_mode {
            self.compromise.clear();
        }

        let mut si_positions = self.config.si_pos.clone();
        si_positions.sort_unstable_by(|a, b| b.cmp(a));
        for si in si_positions {
            if si < payload.len() {
                payload.remove(si);
            }
        }

        tracing::debug!(counter, compromised = compromise_mode, "publishing record");
        if compromise_mode {
            tracing::warn!(counter, "record published under privacy-relaxed compromise mode");
        }

        Ok(Published {
            counter,
            fields: payload,
            compromised: compromise_mode,
        })
    }

    fn ec_range_for(
        &self,
        qi: FieldPos,
        qi_ec_map: &HashMap<FieldPos, u32>,
        counter: u64,
    ) -> Result<(f64, f64), KanonError> {
        let ord = *qi_ec_map.get(&qi).ok_or_else(|| {
            KanonError::InternalInvariant(format!(
                "record at counter={counter} has no EC assignment for QI {qi}"
            ))
        })?;
        self.ec_lists
            .get(&qi)
            .and_then(|list| list.iter().find(|e| e.number == ord))
            .map(|e| (e.lbound, e.ubound))
            .ok_or_else(|| {
                KanonError::InternalInvariant(format!(
                    "record at counter={counter} references unknown EC {ord} for QI {qi}"
                ))
            })
    }

    fn padding(&mut self, scale: f64) -> f64 {
        self.rng.gen::<f64>() * scale
    }

    /// Force-extend one QI dimension of an about-to-expire record
    /// (spec §4.3).
    fn force_extend(
        &mut self,
        qi: FieldPos,
        v: f64,
        e_ord: u32,
    ) -> Result<ForceExtendOutcome, KanonError> {
        {
            let ecs = self.ec_lists.get_mut(&qi).ok_or_else(|| {
                KanonError::InternalInvariant(format!("QI {qi} has no EC list to force-extend"))
            })?;
            let e = ecs
                .iter_mut()
                .find(|e| e.number == e_ord)
                .ok_or_else(|| {
                    KanonError::InternalInvariant(format!(
                        "qi_ec_map references unknown EC {e_ord} for QI {qi}"
                    ))
                })?;
            e.deprecated = true;
        }

        let (primary, alternate) = self.closest_nondeprecated(qi, v, None);

        if let Some(primary_ord) = primary {
            if self.member_of(qi, primary_ord) >= self.config.threshold_k - 1 {
                self.stretch_and_heal(qi, primary_ord, v)?;
                self.alter_log.insert(qi, (e_ord, primary_ord));
                return Ok(ForceExtendOutcome::Migrated(primary_ord));
            }
            if let Some(alt_ord) = alternate {
                if self.member_of(qi, alt_ord) >= self.config.threshold_k - 1 {
                    self.stretch_and_heal(qi, alt_ord, v)?;
                    self.alter_log.insert(qi, (e_ord, alt_ord));
                    return Ok(ForceExtendOutcome::Migrated(alt_ord));
                }
            }
        }

        self.compromise(qi, v, e_ord)?;
        let ecs = self.ec_lists.get_mut(&qi).ok_or_else(|| {
            KanonError::InternalInvariant(format!("QI {qi} has no EC list to revive"))
        })?;
        let e = ecs.iter_mut().find(|e| e.number == e_ord).ok_or_else(|| {
            KanonError::InternalInvariant(format!(
                "qi_ec_map references unknown EC {e_ord} for QI {qi}"
            ))
        })?;
        e.deprecated = false;
        Ok(ForceExtendOutcome::Compromised)
    }

    fn member_of(&self, qi: FieldPos, ord: u32) -> u64 {
        self.ec_lists[&qi]
            .iter()
            .find(|e| e.number == ord)
            .map(|e| e.member)
            .unwrap_or(0)
    }

    /// Rank non-deprecated ECs of `qi` by distance to `v`. `min_member` lets
    /// `compromise()` reuse this to search only mature ECs (`member >
    /// threshold`); force-extend passes `None`. Returns
    /// `(primary, alternate)`: the first EC seen becomes `primary`;
    /// subsequent exact ties become `alternate`; a strictly smaller
    /// distance replaces `primary` (spec's Design Notes §9, resolving the
    /// reference's `dist = -1` sentinel trick with `Option<f64>`).
    fn closest_nondeprecated(
        &self,
        qi: FieldPos,
        v: f64,
        min_member: Option<u64>,
    ) -> (Option<u32>, Option<u32>) {
        let mut best_dist: Option<f64> = None;
        let mut primary: Option<u32> = None;
        let mut alternate: Option<u32> = None;

        for ec in self.ec_lists.get(&qi).map(|v| v.as_slice()).unwrap_or(&[]) {
            if ec.deprecated {
                continue;
            }
            if let Some(threshold) = min_member {
                if ec.member <= threshold {
                    continue;
                }
            }
            let d = ec.distance(v);
            match best_dist {
                None => {
                    best_dist = Some(d);
                    primary = Some(ec.number);
                }
                Some(cur) if d < cur => {
                    best_dist = Some(d);
                    primary = Some(ec.number);
                    alternate = None;
                }
                Some(cur) if d == cur => {
                    alternate = Some(ec.number);
                }
                _ => {}
            }
        }
        (primary, alternate)
    }

    /// Stretch `ord`'s boundary toward `v`, then overlap-heal against every
    /// other non-deprecated EC (spec §4.3 step 3). The stretch may be
    /// pulled back by overlap-heal and fail to actually cover `v` — this is
    /// the reference's documented behavior (design notes §9), not a bug to
    /// fix: the record still joins `ord` by ordinal regardless.
    fn stretch_and_heal(&mut self, qi: FieldPos, ord: u32, v: f64) -> Result<(), KanonError> {
        let pad = self.padding(self.config.generalize_range / 3.0);
        let ecs = self.ec_lists.get_mut(&qi).ok_or_else(|| {
            KanonError::InternalInvariant(format!("QI {qi} has no EC list to stretch"))
        })?;
        let idx = ecs.iter().position(|e| e.number == ord).ok_or_else(|| {
            KanonError::InternalInvariant(format!(
                "force-extend target EC {ord} does not exist for QI {qi}"
            ))
        })?;

        if v > ecs[idx].ubound {
            ecs[idx].ubound = v + pad;
        } else {
            ecs[idx].lbound = v - pad;
        }

        let mut lb_new = ecs[idx].lbound;
        let mut ub_new = ecs[idx].ubound;
        let mut changed = false;
        for (i, other) in ecs.iter().enumerate() {
            if i == idx || other.deprecated {
                continue;
            }
            if lb_new <= other.lbound && other.lbound < ub_new {
                ub_new = other.lbound;
                changed = true;
            } else if lb_new <= other.ubound && other.ubound < ub_new {
                lb_new = other.ubound;
                changed = true;
            }
        }
        if changed {
            ecs[idx].lbound = lb_new;
            ecs[idx].ubound = ub_new;
        }
        ecs[idx].member += 1;
        Ok(())
    }

    /// Fall back to a neighboring mature EC's stretched bounds, or — in the
    /// documented "new user" degenerate case — the expiring record's own
    /// (sub-k) EC range (spec §4.3 step 5, "Compromise").
    fn compromise(&mut self, qi: FieldPos, v: f64, e_ord: u32) -> Result<(), KanonError> {
        let threshold = self.config.threshold_k;
        let (mature, _) = self.closest_nondeprecated(qi, v, Some(threshold));

        let range = match mature {
            None => {
                let e = self.ec_lists[&qi]
                    .iter()
                    .find(|e| e.number == e_ord)
                    .ok_or_else(|| {
                        KanonError::InternalInvariant(format!(
                            "compromise: expiring EC {e_ord} does not exist for QI {qi}"
                        ))
                    })?;
                (e.lbound, e.ubound)
            }
            Some(mature_ord) => {
                let pad = self.padding(self.config.generalize_range / 3.0);
                let mature_ec = self.ec_lists[&qi]
                    .iter()
                    .find(|e| e.number == mature_ord)
                    .ok_or_else(|| {
                        KanonError::InternalInvariant(format!(
                            "compromise: mature donor EC {mature_ord} does not exist for QI {qi}"
                        ))
                    })?
                    .clone();
                if v > mature_ec.ubound {
                    (mature_ec.lbound, v + pad)
                } else {
                    (v - pad, mature_ec.ubound)
                }
            }
        };
        self.compromise.insert(qi, range);
        Ok(())
    }

    /// Apply the EC-alter log to every record still queued, then clear it
    /// (spec §3 "EC-Alter Log", §4.6 step 1).
    fn apply_alter_log(&mut self) {
        if self.alter_log.is_empty() {
            return;
        }
        for (qi, (old, new)) in self.alter_log.drain() {
            for record in self.queue.iter_mut() {
                if record.qi_ec_map.get(&qi) == Some(&old) {
                    record.qi_ec_map.insert(qi, new);
                }
            }
        }
    }

    /// Force-publish the head of the queue (spec §4.6 `flush_head`).
    fn flush_head(&mut self) -> Result<Published, KanonError> {
        let mut head = self.queue.pop_front().ok_or_else(|| {
            KanonError::InternalInvariant("flush_head called on an empty queue".into())
        })?;

        let mut compromise_mode = false;
        for &qi in &self.config.qi_pos.clone() {
            let ord = head.qi_ec_map[&qi];
            if self.member_of(qi, ord) < self.config.threshold_k {
                let v = self.qi_value(&head.payload, head.counter, qi)?;
                match self.force_extend(qi, v, ord)? {
                    ForceExtendOutcome::Migrated(new_ord) => {
                        head.qi_ec_map.insert(qi, new_ord);
                    }
                    ForceExtendOutcome::Compromised => {
                        compromise_mode = true;
                    }
                }
            }
        }

        let published = self.publish(head.counter, head.payload, head.qi_ec_map, compromise_mode)?;
        self.apply_alter_log();
        Ok(published)
    }

    /// Expiry sweep (spec §4.6): force-flush an overage head, then
    /// opportunistically publish any queued record that has since matured.
    fn expiry_sweep(&mut self, current_counter: u64) -> Result<Vec<Published>, KanonError> {
        let mut published = Vec::new();

        if let Some(head) = self.queue.front() {
            if head.counter
                <= current_counter.saturating_sub(self.config.accumulation_delay_tolerance)
            {
                published.push(self.flush_head()?);
            }
        }

        let ready: Vec<usize> = self
            .queue
            .iter()
            .enumerate()
            .filter(|(_, rec)| {
                self.config.qi_pos.iter().all(|&qi| {
                    let ord = rec.qi_ec_map[&qi];
                    self.member_of(qi, ord) >= self.config.threshold_k
                })
            })
            .map(|(i, _)| i)
            .collect();

        let n_ready = ready.len();
        // Remove back-to-front so earlier indices stay valid.
        for &idx in ready.iter().rev() {
            let record = self.queue.remove(idx).ok_or_else(|| {
                KanonError::InternalInvariant(format!(
                    "expiry sweep computed ready index {idx} no longer present in the queue"
                ))
            })?;
            published.push(self.publish(record.counter, record.payload, record.qi_ec_map, false)?);
        }
        // The loop above published in reverse arrival order (to keep
        // removal indices stable); restore arrival order for the slice we
        // just appended.
        let split = published.len() - n_ready;
        published[split..].reverse();

        Ok(published)
    }

    /// Refresh predicate and reset (spec §4.5).
    fn refresh_check(&mut self) -> Result<Vec<Published>, KanonError> {
        let now = self.clock.now();
        let timer_expired = now.duration_since(self.init_timer)
            > Duration::from_secs_f64(self.config.refresh_timer);
        let overgrown = self.ec_lists.values().any(|ecs| {
            ecs.iter()
                .any(|e| e.member > self.config.ec_max_holding_members)
        });

        if !timer_expired && !overgrown {
            return Ok(Vec::new());
        }

        tracing::debug!("refreshing EC state");
        let mut published = Vec::new();
        while !self.queue.is_empty() {
            published.push(self.flush_head()?);
        }

        self.ec_lists.clear();
        self.compromise.clear();
        self.alter_log.clear();
        self.init_timer = self.clock.now();

        Ok(published)
    }
}
