use std::fs;
use std::io;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use emissor_types::{Environment, IssuerId, LedgerIdentity, SequenceNumber};

use crate::atomic::write_atomic;
use crate::error::{AllocationError, StoreError};
use crate::layout::{DataLayout, IdentityPaths};
use crate::lock::IdentityGuard;

/// On-disk counter: `{ "issuer", "environment", "last_value", "skipped" }`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct SequenceRecord {
    issuer: IssuerId,
    environment: Environment,
    last_value: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    skipped: Vec<SkippedRange>,
}

/// Numbers jumped over by [`SequenceAllocator::advance_to`]: `after + 1 ..= through`.
///
/// Never allocated, so never expected in the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRange {
    pub after: u64,
    pub through: u64,
}

impl SkippedRange {
    pub fn contains(&self, n: u64) -> bool {
        n > self.after && n <= self.through
    }

    /// How many of the skipped numbers fall in `start..=end`.
    pub fn overlap(&self, start: u64, end: u64) -> u64 {
        let lo = start.max(self.after + 1);
        let hi = end.min(self.through);
        if hi < lo {
            0
        } else {
            hi - lo + 1
        }
    }
}

/// Hands out sequence numbers, one counter per identity.
///
/// Every allocated number is durable before it is returned, so a restart
/// never hands out the same number twice. Gaps are allowed, reuse is not.
#[derive(Clone, Debug)]
pub struct SequenceAllocator {
    layout: DataLayout,
}

impl SequenceAllocator {
    pub fn new(layout: DataLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    /// Persist and return `last_value + 1` for the guard's identity.
    pub fn allocate_next(&self, guard: &IdentityGuard) -> Result<SequenceNumber, AllocationError> {
        let paths = self.checked_paths(guard)?;
        let mut record = read_record(&paths)?;
        let last = record.last_value;
        if last >= SequenceNumber::MAX {
            return Err(AllocationError::Exhausted {
                identity: paths.identity.clone(),
                last,
            });
        }
        let next = last + 1;
        record.last_value = next;
        write_record(&paths, &record)?;
        debug!(identity = %paths.identity, seq = next, "sequence allocated");
        Ok(SequenceNumber::new(next))
    }

    /// Last allocated value; `0` when nothing has been allocated yet.
    pub fn current(&self, identity: &LedgerIdentity) -> Result<u64, AllocationError> {
        Ok(read_record(&self.layout.identity(identity))?.last_value)
    }

    /// Ranges jumped over by [`advance_to`](Self::advance_to), oldest first.
    pub fn skipped(&self, identity: &LedgerIdentity) -> Result<Vec<SkippedRange>, AllocationError> {
        Ok(read_record(&self.layout.identity(identity))?.skipped)
    }

    /// The number the next allocation would return. Does not allocate.
    pub fn peek_next(&self, identity: &LedgerIdentity) -> Result<SequenceNumber, AllocationError> {
        let last = self.current(identity)?;
        if last >= SequenceNumber::MAX {
            return Err(AllocationError::Exhausted {
                identity: identity.clone(),
                last,
            });
        }
        Ok(SequenceNumber::new(last + 1))
    }

    /// Administrative fast-forward: the next allocation will return `value + 1`.
    ///
    /// Used when numbers were consumed outside this tool. Never moves backwards.
    /// The jumped-over range is recorded so audits do not report it as gaps.
    pub fn advance_to(&self, guard: &IdentityGuard, value: u64) -> Result<(), AllocationError> {
        let paths = self.checked_paths(guard)?;
        let mut record = read_record(&paths)?;
        let current = record.last_value;
        if value < current {
            return Err(AllocationError::Backwards {
                identity: paths.identity.clone(),
                current,
                requested: value,
            });
        }
        if value > SequenceNumber::MAX {
            return Err(AllocationError::Exhausted {
                identity: paths.identity.clone(),
                last: value,
            });
        }
        if value > current {
            record.skipped.push(SkippedRange {
                after: current,
                through: value,
            });
            record.last_value = value;
            write_record(&paths, &record)?;
        }
        info!(identity = %paths.identity, from = current, to = value, "sequence advanced");
        Ok(())
    }

    /// Paths under this allocator's root, provided the guard locks them.
    fn checked_paths(&self, guard: &IdentityGuard) -> Result<IdentityPaths, AllocationError> {
        let paths = self.layout.identity(guard.identity());
        if !guard.covers(&paths) {
            return Err(AllocationError::WrongLock {
                held: guard.identity().clone(),
                lock_path: guard.path().to_path_buf(),
                expected_path: paths.lock,
            });
        }
        Ok(paths)
    }
}

fn read_record(paths: &IdentityPaths) -> Result<SequenceRecord, AllocationError> {
    let raw = match fs::read(&paths.sequence) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok(SequenceRecord {
                issuer: paths.identity.issuer.clone(),
                environment: paths.identity.environment,
                last_value: 0,
                skipped: Vec::new(),
            })
        }
        Err(e) => return Err(StoreError::io(&paths.sequence, e).into()),
    };
    let record: SequenceRecord =
        serde_json::from_slice(&raw).map_err(|e| AllocationError::Corrupt {
            path: paths.sequence.clone(),
            reason: e.to_string(),
        })?;
    if record.issuer != paths.identity.issuer || record.environment != paths.identity.environment {
        return Err(AllocationError::IdentityMismatch {
            path: paths.sequence.clone(),
            expected: paths.identity.clone(),
            found: format!("{}/{}", record.issuer, record.environment),
        });
    }
    Ok(record)
}

fn write_record(paths: &IdentityPaths, record: &SequenceRecord) -> Result<(), AllocationError> {
    let bytes = serde_json::to_vec_pretty(record).map_err(|e| AllocationError::Corrupt {
        path: paths.sequence.clone(),
        reason: e.to_string(),
    })?;
    write_atomic(&paths.sequence, &bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    fn identity(env: Environment) -> LedgerIdentity {
        LedgerIdentity::new(IssuerId::new("12345678000199").unwrap(), env)
    }

    fn allocate(alloc: &SequenceAllocator, id: &LedgerIdentity) -> u64 {
        let guard = IdentityGuard::acquire(&alloc.layout().identity(id)).unwrap();
        alloc.allocate_next(&guard).unwrap().get()
    }

    #[test]
    fn first_allocation_is_one() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = SequenceAllocator::new(DataLayout::new(dir.path()));
        let id = identity(Environment::Staging);
        assert_eq!(alloc.current(&id).unwrap(), 0);
        assert_eq!(alloc.peek_next(&id).unwrap(), SequenceNumber::new(1));
        assert_eq!(allocate(&alloc, &id), 1);
        assert_eq!(alloc.current(&id).unwrap(), 1);
    }

    #[test]
    fn strictly_increasing_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let id = identity(Environment::Staging);
        let mut seen = Vec::new();
        for _ in 0..3 {
            // A fresh allocator each round stands in for a process restart.
            let alloc = SequenceAllocator::new(DataLayout::new(dir.path()));
            seen.push(allocate(&alloc, &id));
            seen.push(allocate(&alloc, &id));
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn persisted_format_is_readable_json() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = SequenceAllocator::new(DataLayout::new(dir.path()));
        let id = identity(Environment::Production);
        allocate(&alloc, &id);
        let raw = fs::read_to_string(alloc.layout().identity(&id).sequence).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["issuer"], "12345678000199");
        assert_eq!(value["environment"], "producao");
        assert_eq!(value["last_value"], 1);
        assert!(value.get("skipped").is_none());
    }

    #[test]
    fn counter_written_before_skips_existed_still_loads() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = SequenceAllocator::new(DataLayout::new(dir.path()));
        let id = identity(Environment::Staging);
        let paths = alloc.layout().identity(&id);
        paths.ensure_dir().unwrap();
        fs::write(
            &paths.sequence,
            br#"{ "issuer": "12345678000199", "environment": "homologacao", "last_value": 7 }"#,
        )
        .unwrap();
        assert_eq!(alloc.current(&id).unwrap(), 7);
        assert!(alloc.skipped(&id).unwrap().is_empty());
    }

    #[test]
    fn advance_records_the_skipped_range() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = SequenceAllocator::new(DataLayout::new(dir.path()));
        let id = identity(Environment::Staging);
        let guard = IdentityGuard::acquire(&alloc.layout().identity(&id)).unwrap();

        alloc.allocate_next(&guard).unwrap();
        alloc.advance_to(&guard, 50).unwrap();
        alloc.advance_to(&guard, 50).unwrap();
        alloc.allocate_next(&guard).unwrap();
        alloc.advance_to(&guard, 80).unwrap();

        let skipped = alloc.skipped(&id).unwrap();
        assert_eq!(
            skipped,
            vec![
                SkippedRange { after: 1, through: 50 },
                SkippedRange { after: 51, through: 80 },
            ]
        );
        assert!(!skipped[0].contains(1));
        assert!(skipped[0].contains(2) && skipped[0].contains(50));
        assert_eq!(skipped[0].overlap(40, 60), 11);
        assert_eq!(skipped[1].overlap(1, 51), 0);
    }

    #[test]
    fn environments_have_separate_counters() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = SequenceAllocator::new(DataLayout::new(dir.path()));
        assert_eq!(allocate(&alloc, &identity(Environment::Staging)), 1);
        assert_eq!(allocate(&alloc, &identity(Environment::Staging)), 2);
        assert_eq!(allocate(&alloc, &identity(Environment::Production)), 1);
    }

    #[test]
    fn corrupt_store_is_an_error_not_a_reset() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = SequenceAllocator::new(DataLayout::new(dir.path()));
        let id = identity(Environment::Staging);
        let paths = alloc.layout().identity(&id);
        allocate(&alloc, &id);
        fs::write(&paths.sequence, b"{ \"last_value\": ").unwrap();

        let guard = IdentityGuard::acquire(&paths).unwrap();
        let err = alloc.allocate_next(&guard).unwrap_err();
        assert!(matches!(err, AllocationError::Corrupt { .. }));
        // The damaged file is left untouched for the operator.
        assert_eq!(fs::read(&paths.sequence).unwrap(), b"{ \"last_value\": ");
    }

    #[test]
    fn store_from_another_identity_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = SequenceAllocator::new(DataLayout::new(dir.path()));
        let staging = alloc.layout().identity(&identity(Environment::Staging));
        let prod = alloc.layout().identity(&identity(Environment::Production));
        allocate(&alloc, &identity(Environment::Staging));
        prod.ensure_dir().unwrap();
        fs::copy(&staging.sequence, &prod.sequence).unwrap();

        let err = alloc.current(&identity(Environment::Production)).unwrap_err();
        assert!(matches!(err, AllocationError::IdentityMismatch { .. }));
    }

    #[test]
    fn advance_never_moves_backwards() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = SequenceAllocator::new(DataLayout::new(dir.path()));
        let id = identity(Environment::Staging);
        let guard = IdentityGuard::acquire(&alloc.layout().identity(&id)).unwrap();

        alloc.advance_to(&guard, 40).unwrap();
        assert_eq!(alloc.allocate_next(&guard).unwrap(), SequenceNumber::new(41));
        let err = alloc.advance_to(&guard, 10).unwrap_err();
        assert!(matches!(err, AllocationError::Backwards { current: 41, requested: 10, .. }));
        alloc.advance_to(&guard, 41).unwrap();
        assert_eq!(alloc.current(&id).unwrap(), 41);
    }

    #[test]
    fn exhausted_counter_refuses() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = SequenceAllocator::new(DataLayout::new(dir.path()));
        let id = identity(Environment::Staging);
        let guard = IdentityGuard::acquire(&alloc.layout().identity(&id)).unwrap();
        alloc.advance_to(&guard, SequenceNumber::MAX).unwrap();
        assert!(matches!(
            alloc.allocate_next(&guard),
            Err(AllocationError::Exhausted { .. })
        ));
    }

    #[test]
    fn guard_for_another_root_is_refused() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let id = identity(Environment::Staging);
        let alloc = SequenceAllocator::new(DataLayout::new(a.path()));
        let foreign = IdentityGuard::acquire(&DataLayout::new(b.path()).identity(&id)).unwrap();
        assert!(matches!(
            alloc.allocate_next(&foreign),
            Err(AllocationError::WrongLock { .. })
        ));
    }

    #[test]
    fn concurrent_allocations_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let seen = Arc::new(Mutex::new(HashSet::new()));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let root = root.clone();
                let seen = Arc::clone(&seen);
                std::thread::spawn(move || {
                    let alloc = SequenceAllocator::new(DataLayout::new(root));
                    let id = identity(Environment::Staging);
                    for _ in 0..10 {
                        let n = allocate(&alloc, &id);
                        assert!(seen.lock().unwrap().insert(n), "duplicate {n}");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 40);
        assert_eq!(*seen.iter().max().unwrap(), 40);
    }

    fn run(root: &Path, n: usize) -> Vec<u64> {
        let alloc = SequenceAllocator::new(DataLayout::new(root));
        let id = identity(Environment::Staging);
        (0..n).map(|_| allocate(&alloc, &id)).collect()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn each_allocation_is_previous_plus_one(start in 0u64..1_000_000, n in 1usize..12) {
            let dir = tempfile::tempdir().unwrap();
            let alloc = SequenceAllocator::new(DataLayout::new(dir.path()));
            let id = identity(Environment::Staging);
            let guard = IdentityGuard::acquire(&alloc.layout().identity(&id)).unwrap();
            alloc.advance_to(&guard, start).unwrap();
            drop(guard);

            let got = run(dir.path(), n);
            let expected: Vec<u64> = (start + 1..=start + n as u64).collect();
            prop_assert_eq!(got, expected);
        }
    }
}
