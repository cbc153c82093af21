//! Equivalence Classes: per-QI disjoint interval partitions (spec §3, §4.1).

use rand::Rng;

/// One equivalence class: a half-open interval `[lbound, ubound)` on a
/// single QI dimension, with a membership count and a stable ordinal.
///
/// `number` is the EC's position within its QI's list *at creation time*.
/// Because ECs are only ever removed en masse at refresh, `number` and the
/// EC's index in the backing `Vec` coincide for the life of a generation —
/// ordinals double as storage indices (design notes §9).
#[derive(Debug, Clone, PartialEq)]
pub struct Ec {
    pub number: u32,
    pub lbound: f64,
    pub ubound: f64,
    pub member: u64,
    pub deprecated: bool,
}

impl Ec {
    pub fn contains(&self, v: f64) -> bool {
        !self.deprecated && self.lbound <= v && v < self.ubound
    }

    /// `min(|ubound - v|, |lbound - v|)`, the distance used to rank
    /// candidate ECs during force-extend (spec §4.3 step 2).
    pub fn distance(&self, v: f64) -> f64 {
        (self.ubound - v).abs().min((self.lbound - v).abs())
    }
}

/// The outcome of `generalize`: either a fresh EC was created, or two
/// existing neighbors were pinched together via merge-extend (spec §4.1
/// "Two overlaps" case).
pub enum GeneralizeOutcome {
    Created(u32),
    Merged(u32),
}

/// Find the unique non-deprecated EC containing `v` (spec §4.1 Fit).
pub fn fit(ecs: &[Ec], v: f64) -> Option<u32> {
    ecs.iter().find(|ec| ec.contains(v)).map(|ec| ec.number)
}

/// Append a new EC `[lb, ub)` with `member = 1` to `ecs`, returning its
/// ordinal (spec §3: "`number` is unique within a QI list and never
/// reused").
fn create(ecs: &mut Vec<Ec>, lb: f64, ub: f64) -> u32 {
    let number = ecs.len() as u32;
    ecs.push(Ec {
        number,
        lbound: lb,
        ubound: ub,
        member: 1,
        deprecated: false,
    });
    number
}

/// One side of a straddle overlap detected while sizing a new candidate EC.
enum Side {
    Lower,
    Upper,
}

struct Overlap {
    index: usize,
    side: Side,
    boundary: f64,
}

/// Scan `ecs` for straddle overlaps against the candidate `[lb, ub)`
/// (spec §4.1: Straddle-lower / Straddle-upper).
fn straddles(ecs: &[Ec], lb: f64, ub: f64) -> Vec<Overlap> {
    let mut out = Vec::new();
    for (index, ec) in ecs.iter().enumerate() {
        if ec.deprecated {
            continue;
        }
        if lb < ec.lbound && ec.lbound < ub {
            out.push(Overlap {
                index,
                side: Side::Lower,
                boundary: ec.lbound,
            });
        } else if lb < ec.ubound && ec.ubound < ub {
            out.push(Overlap {
                index,
                side: Side::Upper,
                boundary: ec.ubound,
            });
        }
    }
    out
}

/// Construct a generalized range for `v` and resolve it against `ecs`
/// (spec §4.1 Generalize). Returns `Err` only if more than two overlaps are
/// ever observed, which would indicate an internal invariant violation —
/// by construction this cannot happen for legitimate numeric input.
pub fn generalize<R: Rng>(
    ecs: &mut Vec<Ec>,
    v: f64,
    range: f64,
    rng: &mut R,
) -> Result<GeneralizeOutcome, String> {
    let u: f64 = rng.gen::<f64>() * range;
    let mut lb_new = v - u;
    let mut ub_new = lb_new + range;

    let mut pass = 0u8;
    loop {
        let overlaps = straddles(ecs, lb_new, ub_new);
        match overlaps.len() {
            0 => return Ok(GeneralizeOutcome::Created(create(ecs, lb_new, ub_new))),
            1 if pass == 0 => {
                match overlaps[0].side {
                    Side::Lower => {
                        ub_new = overlaps[0].boundary;
                        lb_new = ub_new - range;
                    }
                    Side::Upper => {
                        lb_new = overlaps[0].boundary;
                        ub_new = lb_new + range;
                    }
                }
                pass = 1;
                continue;
            }
            1 => return Ok(GeneralizeOutcome::Created(create(ecs, lb_new, ub_new))),
            2 => {
                let number = merge_extend(ecs, overlaps[0].index, overlaps[1].index, v);
                return Ok(GeneralizeOutcome::Merged(number));
            }
            n => {
                return Err(format!(
                    "generalize() observed {n} overlapping ECs, expected at most 2"
                ))
            }
        }
    }
}

/// Pinch two neighboring ECs together at their shared midpoint and report
/// which side `v` lands in (spec §4.1 Merge-extend).
fn merge_extend(ecs: &mut [Ec], idx1: usize, idx2: usize, v: f64) -> u32 {
    let (lo, hi) = if ecs[idx1].ubound <= ecs[idx2].ubound {
        (idx1, idx2)
    } else {
        (idx2, idx1)
    };
    let avg = (ecs[hi].lbound + ecs[lo].ubound) / 2.0;
    ecs[lo].ubound = avg;
    ecs[hi].lbound = avg;
    if v > avg {
        ecs[hi].number
    } else {
        ecs[lo].number
    }
}
