//! Per-book counters, book outcomes and the batch report.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

/// Counts per cleanup category. Combining is plain field-wise addition, so
/// totals do not depend on the order books finish in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportCounters {
    pub linebreak_fixes: u64,
    pub forward_links_repaired: u64,
    pub backlinks_added: u64,
    pub note_ids_created: u64,
    pub soft_hyphens_removed: u64,
    pub empty_paragraphs_collapsed: u64,
    pub blacklist_removals: u64,
    pub banners_removed: u64,
    pub banners_kept: u64,
    pub illegitimate_paragraphs_merged: u64,
    pub unresolved_markers: u64,
    pub orphan_notes: u64,
    pub secondary_references: u64,
    pub nested_links_unwrapped: u64,
    pub broken_links_removed: u64,
}

impl ReportCounters {
    pub const COLUMNS: [&'static str; 15] = [
        "linebreak_fixes",
        "forward_links_repaired",
        "backlinks_added",
        "note_ids_created",
        "soft_hyphens_removed",
        "empty_paragraphs_collapsed",
        "blacklist_removals",
        "banners_removed",
        "banners_kept",
        "illegitimate_paragraphs_merged",
        "unresolved_markers",
        "orphan_notes",
        "secondary_references",
        "nested_links_unwrapped",
        "broken_links_removed",
    ];

    /// Values in [`ReportCounters::COLUMNS`] order.
    pub fn values(&self) -> [u64; 15] {
        [
            self.linebreak_fixes,
            self.forward_links_repaired,
            self.backlinks_added,
            self.note_ids_created,
            self.soft_hyphens_removed,
            self.empty_paragraphs_collapsed,
            self.blacklist_removals,
            self.banners_removed,
            self.banners_kept,
            self.illegitimate_paragraphs_merged,
            self.unresolved_markers,
            self.orphan_notes,
            self.secondary_references,
            self.nested_links_unwrapped,
            self.broken_links_removed,
        ]
    }

    pub fn to_map(&self) -> BTreeMap<String, u64> {
        Self::COLUMNS
            .iter()
            .zip(self.values())
            .map(|(name, value)| (name.to_string(), value))
            .collect()
    }

    pub fn get(&self, column: &str) -> Option<u64> {
        Self::COLUMNS
            .iter()
            .position(|name| *name == column)
            .map(|idx| self.values()[idx])
    }

    pub fn is_zero(&self) -> bool {
        self.values().iter().all(|v| *v == 0)
    }
}

impl AddAssign for ReportCounters {
    fn add_assign(&mut self, rhs: Self) {
        self.linebreak_fixes += rhs.linebreak_fixes;
        self.forward_links_repaired += rhs.forward_links_repaired;
        self.backlinks_added += rhs.backlinks_added;
        self.note_ids_created += rhs.note_ids_created;
        self.soft_hyphens_removed += rhs.soft_hyphens_removed;
        self.empty_paragraphs_collapsed += rhs.empty_paragraphs_collapsed;
        self.blacklist_removals += rhs.blacklist_removals;
        self.banners_removed += rhs.banners_removed;
        self.banners_kept += rhs.banners_kept;
        self.illegitimate_paragraphs_merged += rhs.illegitimate_paragraphs_merged;
        self.unresolved_markers += rhs.unresolved_markers;
        self.orphan_notes += rhs.orphan_notes;
        self.secondary_references += rhs.secondary_references;
        self.nested_links_unwrapped += rhs.nested_links_unwrapped;
        self.broken_links_removed += rhs.broken_links_removed;
    }
}

impl Add for ReportCounters {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self {
        self += rhs;
        self
    }
}

impl Sum for ReportCounters {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

impl<'a> Sum<&'a ReportCounters> for ReportCounters {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookStatus {
    Processed,
    DryRun,
    SkippedByMarker,
    /// The book could not be loaded or one of its documents failed to parse.
    Failed(String),
    /// Processing finished but the result could not be written.
    WriteFailed(String),
}

impl BookStatus {
    pub fn label(&self) -> &'static str {
        match self {
            BookStatus::Processed => "processed",
            BookStatus::DryRun => "dry-run",
            BookStatus::SkippedByMarker => "skipped",
            BookStatus::Failed(_) => "failed",
            BookStatus::WriteFailed(_) => "write-failed",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            BookStatus::Failed(msg) | BookStatus::WriteFailed(msg) => msg,
            _ => "",
        }
    }
}

impl fmt::Display for BookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            "" => f.write_str(self.label()),
            msg => write!(f, "{}: {}", self.label(), msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookReport {
    pub book_id: String,
    pub status: BookStatus,
    pub counters: ReportCounters,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub books: Vec<BookReport>,
}

impl BatchReport {
    pub fn total(&self) -> ReportCounters {
        self.books.iter().map(|b| &b.counters).sum()
    }

    pub fn count_status(&self, pred: impl Fn(&BookStatus) -> bool) -> usize {
        self.books.iter().filter(|b| pred(&b.status)).count()
    }

    pub fn processed(&self) -> usize {
        self.count_status(|s| matches!(s, BookStatus::Processed | BookStatus::DryRun))
    }

    pub fn skipped(&self) -> usize {
        self.count_status(|s| *s == BookStatus::SkippedByMarker)
    }

    pub fn failed(&self) -> usize {
        self.count_status(|s| matches!(s, BookStatus::Failed(_) | BookStatus::WriteFailed(_)))
    }

    /// One row per book plus a `TOTAL` row.
    pub fn write_csv<W: io::Write>(&self, writer: W) -> csv::Result<()> {
        let mut csv = csv::Writer::from_writer(writer);
        let mut header = vec!["book", "status", "message"];
        header.extend(ReportCounters::COLUMNS);
        csv.write_record(&header)?;

        for book in &self.books {
            csv.write_record(row(&book.book_id, book.status.label(), book.status.message(), &book.counters))?;
        }
        let summary = format!(
            "processed={} skipped={} failed={}",
            self.processed(),
            self.skipped(),
            self.failed()
        );
        csv.write_record(row("TOTAL", "", &summary, &self.total()))?;
        csv.flush()?;
        Ok(())
    }
}

fn row(book: &str, status: &str, message: &str, counters: &ReportCounters) -> Vec<String> {
    let mut fields = vec![book.to_string(), status.to_string(), message.to_string()];
    fields.extend(counters.values().iter().map(u64::to_string));
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(n: u64) -> ReportCounters {
        ReportCounters {
            linebreak_fixes: n,
            backlinks_added: 2 * n,
            banners_kept: 1,
            ..ReportCounters::default()
        }
    }

    #[test]
    fn test_addition_is_fieldwise() {
        let total = sample(1) + sample(3);
        assert_eq!(total.linebreak_fixes, 4);
        assert_eq!(total.backlinks_added, 8);
        assert_eq!(total.banners_kept, 2);
        assert_eq!(sample(1) + sample(3), sample(3) + sample(1));
    }

    #[test]
    fn test_columns_match_values() {
        let counters = sample(5);
        assert_eq!(counters.get("linebreak_fixes"), Some(5));
        assert_eq!(counters.get("backlinks_added"), Some(10));
        assert_eq!(counters.get("nope"), None);
        assert_eq!(counters.to_map().len(), ReportCounters::COLUMNS.len());
    }

    #[test]
    fn test_csv_has_row_per_book_and_total() {
        let report = BatchReport {
            books: vec![
                BookReport {
                    book_id: "a".into(),
                    status: BookStatus::Processed,
                    counters: sample(1),
                },
                BookReport {
                    book_id: "b".into(),
                    status: BookStatus::Failed("bad markup".into()),
                    counters: ReportCounters::default(),
                },
            ],
        };
        let mut out = Vec::new();
        report.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("book,status,message,linebreak_fixes"));
        assert!(lines[1].starts_with("a,processed,,1,0,2"));
        assert!(lines[2].starts_with("b,failed,bad markup,0"));
        assert!(lines[3].starts_with("TOTAL,,processed=1 skipped=0 failed=1,1,0,2"));
    }
}
