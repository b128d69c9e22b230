use std::collections::BTreeSet;
use std::fmt;

use emissor_ledger::{CorruptionNotice, LedgerEntry};
use emissor_store::SkippedRange;
use emissor_types::{LedgerIdentity, SequenceNumber};

/// Cap on how many missing numbers are listed individually.
const MAX_LISTED_GAPS: u64 = 1000;

/// Consistency of the counter against the ledger for one identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditReport {
    pub identity: LedgerIdentity,
    /// Last value handed out by the allocator.
    pub counter: u64,
    pub highest_ledger_sequence: Option<SequenceNumber>,
    /// Allocated numbers with no ledger entry (crash between allocation and
    /// draft, or a prepare that failed after allocating). Capped listing;
    /// numbers skipped with `sequence set` are never included.
    pub undrafted: Vec<u64>,
    pub undrafted_total: u64,
    /// Entries whose submission never resolved.
    pub open_drafts: Vec<SequenceNumber>,
    /// The ledger holds a number the counter has not reached. Allocation
    /// would collide with it.
    pub counter_behind: bool,
    pub corruption: Option<CorruptionNotice>,
}

impl AuditReport {
    pub fn compute(
        identity: LedgerIdentity,
        counter: u64,
        skipped: &[SkippedRange],
        entries: &[LedgerEntry],
        corruption: Option<CorruptionNotice>,
    ) -> Self {
        let drafted: BTreeSet<u64> = entries.iter().map(|e| e.sequence.get()).collect();
        let highest = drafted.last().copied();
        let is_skipped = |n: u64| skipped.iter().find(|r| r.contains(n));

        // Numbers below the first drafted one predate this ledger.
        let start = drafted.first().copied().unwrap_or(1);
        let mut undrafted = Vec::new();
        let mut undrafted_total = 0u64;
        if counter >= start {
            let skipped_in_range: u64 = skipped.iter().map(|r| r.overlap(start, counter)).sum();
            let drafted_in_range = drafted
                .range(start..=counter)
                .filter(|&&n| is_skipped(n).is_none())
                .count() as u64;
            undrafted_total = (counter - start + 1)
                .saturating_sub(skipped_in_range)
                .saturating_sub(drafted_in_range);

            let mut n = start;
            while n <= counter && (undrafted.len() as u64) < undrafted_total.min(MAX_LISTED_GAPS) {
                if let Some(range) = is_skipped(n) {
                    n = range.through + 1;
                    continue;
                }
                if !drafted.contains(&n) {
                    undrafted.push(n);
                }
                n += 1;
            }
        }

        Self {
            identity,
            counter,
            highest_ledger_sequence: highest.map(SequenceNumber::new),
            undrafted,
            undrafted_total,
            open_drafts: entries
                .iter()
                .filter(|e| e.is_draft())
                .map(|e| e.sequence)
                .collect(),
            counter_behind: highest.is_some_and(|h| h > counter),
            corruption,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.undrafted_total == 0
            && self.open_drafts.is_empty()
            && !self.counter_behind
            && self.corruption.is_none()
    }
}

impl fmt::Display for AuditReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "identity:        {}", self.identity)?;
        writeln!(f, "counter:         {}", self.counter)?;
        match self.highest_ledger_sequence {
            Some(h) => writeln!(f, "highest in ledger: {h}")?,
            None => writeln!(f, "highest in ledger: none")?,
        }
        if self.undrafted_total > 0 {
            let listed: Vec<String> = self.undrafted.iter().map(u64::to_string).collect();
            let more = self.undrafted_total - self.undrafted.len() as u64;
            write!(f, "undrafted:       {}", listed.join(", "))?;
            if more > 0 {
                write!(f, " (+{more} more)")?;
            }
            writeln!(f)?;
        }
        if !self.open_drafts.is_empty() {
            let open: Vec<String> = self.open_drafts.iter().map(ToString::to_string).collect();
            writeln!(f, "open drafts:     {}", open.join(", "))?;
        }
        if self.counter_behind {
            writeln!(f, "counter is behind the ledger")?;
        }
        if let Some(c) = &self.corruption {
            writeln!(f, "ledger was corrupt; backup at {}", c.backup_path.display())?;
        }
        Ok(())
    }
}
