//! Per-scan index of the catalog's existing views.

use dashmap::DashMap;
use viewsync_catalog_core::FormView;

/// Whether a catalog view has been matched by a scanned table yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ComparisonFlag {
    /// Present in the catalog, not seen in this scan (yet)
    Unmatched = 1,
    /// Matched by a table of the current batch
    Matched = 2,
}

#[derive(Debug, Clone)]
struct Entry {
    view: FormView,
    flag: ComparisonFlag,
}

/// Existing views of one datasource keyed by technical name.
///
/// Built once per scan. Workers only claim the names of their own tables,
/// which are disjoint across partitions.
#[derive(Debug, Default)]
pub struct ScanWorkingSet {
    entries: DashMap<String, Entry>,
}

impl ScanWorkingSet {
    pub fn from_views(views: Vec<FormView>) -> Self {
        let entries = DashMap::with_capacity(views.len());
        for view in views {
            entries.insert(
                view.technical_name.clone(),
                Entry {
                    view,
                    flag: ComparisonFlag::Unmatched,
                },
            );
        }
        Self { entries }
    }

    /// Mark the view backing `technical_name` as matched and return it.
    pub fn claim(&self, technical_name: &str) -> Option<FormView> {
        self.entries.get_mut(technical_name).map(|mut entry| {
            entry.flag = ComparisonFlag::Matched;
            entry.view.clone()
        })
    }

    pub fn flag(&self, technical_name: &str) -> Option<ComparisonFlag> {
        self.entries.get(technical_name).map(|entry| entry.flag)
    }

    /// Views no scanned table matched, ordered by technical name.
    pub fn unmatched(&self) -> Vec<FormView> {
        let mut views: Vec<FormView> = self
            .entries
            .iter()
            .filter(|entry| entry.flag == ComparisonFlag::Unmatched)
            .map(|entry| entry.view.clone())
            .collect();
        views.sort_by(|a, b| a.technical_name.cmp(&b.technical_name));
        views
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
