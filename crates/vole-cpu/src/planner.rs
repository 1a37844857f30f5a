use std::collections::HashMap;

use vole_core::OperandIndex;

// Memory planner — first-fit offset assignment over happens-before claims
//
// Every static operand owned by the backend claims a region of the shared
// arena for the set of op sequences that produce or read it. Two claims
// may share storage only when every access to one strictly precedes every
// access to the other in the sequence dependency DAG. Linear-order
// positions are not enough here: the parallel executor runs
// DAG-incomparable sequences concurrently, so two operands that look
// disjoint along the lowered order can still be live at the same time.

/// One operand's storage request.
#[derive(Debug, Clone)]
pub struct Claim {
    pub operand: OperandIndex,
    /// Element count.
    pub size: usize,
    /// Sequences (by op-sequence index) producing or reading this operand.
    pub live: Vec<usize>,
    /// Position of the producing sequence in lowered order, or 0 for
    /// operands live from the start. Placement order only, never safety.
    pub first: usize,
}

/// The planned arena: per-operand (offset, size) and the total arena size.
#[derive(Debug, Default)]
pub struct MemoryPlan {
    pub allocations: HashMap<OperandIndex, (usize, usize)>,
    pub total: usize,
}

impl MemoryPlan {
    pub fn region(&self, operand: OperandIndex) -> Option<(usize, usize)> {
        self.allocations.get(&operand).copied()
    }
}

/// True when every sequence in `xs` strictly precedes every sequence in
/// `ys` under `precedes`.
fn all_precede(xs: &[usize], ys: &[usize], precedes: &dyn Fn(usize, usize) -> bool) -> bool {
    xs.iter().all(|&x| ys.iter().all(|&y| precedes(x, y)))
}

/// True when the two claims can never be live at the same time: one's
/// accesses all complete before the other's begin, in either direction.
fn ordered_apart(a: &Claim, b: &Claim, precedes: &dyn Fn(usize, usize) -> bool) -> bool {
    all_precede(&a.live, &b.live, precedes) || all_precede(&b.live, &a.live, precedes)
}

/// Assign offsets first-fit: claims are placed in order of first use
/// (size-descending within a position, for tighter packing), each at the
/// lowest offset leaving no overlap with any possibly-co-live claim.
///
/// `precedes(a, b)` must hold only when sequence `a` is a strict
/// transitive predecessor of sequence `b` in the dependency DAG — the
/// executor then guarantees `a` has fully completed before `b` starts,
/// whatever the dispatch strategy.
pub fn plan(claims: &[Claim], precedes: &dyn Fn(usize, usize) -> bool) -> MemoryPlan {
    let mut ordered: Vec<&Claim> = claims.iter().collect();
    ordered.sort_by(|a, b| {
        a.first
            .cmp(&b.first)
            .then(b.size.cmp(&a.size))
            .then(a.operand.cmp(&b.operand))
    });

    // (offset, size, claim) of everything placed so far.
    let mut placed: Vec<(usize, usize, &Claim)> = Vec::new();
    let mut plan = MemoryPlan::default();

    for claim in ordered {
        // Regions this claim could be live alongside.
        let mut busy: Vec<(usize, usize)> = placed
            .iter()
            .filter(|(_, _, other)| !ordered_apart(claim, other, precedes))
            .map(|&(offset, size, _)| (offset, size))
            .collect();
        busy.sort();

        let mut offset = 0;
        for &(busy_offset, busy_size) in &busy {
            if offset + claim.size <= busy_offset {
                break;
            }
            offset = offset.max(busy_offset + busy_size);
        }

        placed.push((offset, claim.size, claim));
        plan.allocations
            .insert(claim.operand, (offset, claim.size));
        plan.total = plan.total.max(offset + claim.size);
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim(id: usize, size: usize, live: &[usize], first: usize) -> Claim {
        Claim {
            operand: OperandIndex(id),
            size,
            live: live.to_vec(),
            first,
        }
    }

    fn overlaps(a: (usize, usize), b: (usize, usize)) -> bool {
        a.0 < b.0 + b.1 && b.0 < a.0 + a.1
    }

    /// Chain DAG 0 → 1 → 2 → 3: everything is comparable.
    fn chain_precedes(a: usize, b: usize) -> bool {
        a < b
    }

    #[test]
    fn test_sequential_lifetimes_share_storage() {
        // %0 is dead after sequence 1; %2 is born in sequence 2, which the
        // chain orders strictly after everything %0 touched.
        let plan = plan(
            &[
                claim(0, 4, &[0, 1], 0),
                claim(1, 4, &[0, 2], 0),
                claim(2, 4, &[2, 3], 2),
            ],
            &chain_precedes,
        );
        let r0 = plan.region(OperandIndex(0)).unwrap();
        let r2 = plan.region(OperandIndex(2)).unwrap();
        assert_eq!(r0, r2);
        assert_eq!(plan.total, 8);
    }

    #[test]
    fn test_dag_incomparable_claims_never_alias() {
        // Two independent chains, 0 → 1 and 2 → 3: sequences 2 and 3 come
        // later in the lowered order but nothing orders them after the
        // first chain, so the parallel executor may run all four at once.
        let dag_precedes = |a: usize, b: usize| (a == 0 && b == 1) || (a == 2 && b == 3);
        let plan = plan(
            &[claim(0, 4, &[0, 1], 0), claim(1, 4, &[2, 3], 2)],
            &dag_precedes,
        );
        let r0 = plan.region(OperandIndex(0)).unwrap();
        let r1 = plan.region(OperandIndex(1)).unwrap();
        assert!(!overlaps(r0, r1), "concurrent operands alias");
        assert_eq!(plan.total, 8);
    }

    #[test]
    fn test_co_live_claims_never_alias() {
        let claims = vec![
            claim(0, 3, &[0, 2], 0),
            claim(1, 5, &[0, 1], 0),
            claim(2, 2, &[1, 3], 1),
            claim(3, 4, &[2, 3], 2),
            claim(4, 1, &[3], 3),
        ];
        let plan = plan(&claims, &chain_precedes);
        for a in &claims {
            for b in &claims {
                if a.operand == b.operand {
                    continue;
                }
                if !ordered_apart(a, b, &chain_precedes) {
                    let ra = plan.region(a.operand).unwrap();
                    let rb = plan.region(b.operand).unwrap();
                    assert!(
                        !overlaps(ra, rb),
                        "co-live operands {} and {} alias",
                        a.operand,
                        b.operand
                    );
                }
            }
        }
    }

    #[test]
    fn test_empty_plan() {
        let plan = plan(&[], &chain_precedes);
        assert_eq!(plan.total, 0);
    }
}
