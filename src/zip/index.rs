use std::cmp::Reverse;
use std::collections::HashMap;
use tracing::warn;

use super::structures::EntryDescriptor;

/// Immutable, ordered view of an archive's directory.
#[derive(Debug, Clone)]
pub struct ContainerIndex {
    entries: Vec<EntryDescriptor>,
    by_name: HashMap<String, usize>,
    archive_size: u64,
    cd_offset: u64,
    cd_size: u64,
}

impl ContainerIndex {
    /// Build the index from directory-ordered entries.
    ///
    /// Span ends are derived here: each entry runs up to the next local header
    /// (by offset) or, for the last one, up to the directory start.
    pub fn new(
        mut entries: Vec<EntryDescriptor>,
        archive_size: u64,
        cd_offset: u64,
        cd_size: u64,
    ) -> Self {
        let mut by_offset: Vec<usize> = (0..entries.len()).collect();
        by_offset.sort_by_key(|&i| entries[i].lfh_offset);
        for (pos, &i) in by_offset.iter().enumerate() {
            let next = by_offset
                .get(pos + 1)
                .map(|&j| entries[j].lfh_offset)
                .unwrap_or(cd_offset);
            entries[i].span_end = next.max(entries[i].lfh_offset);
        }

        let mut by_name = HashMap::with_capacity(entries.len());
        entries.retain(|entry| {
            if by_name.contains_key(&entry.name) {
                warn!(name = %entry.name, "duplicate entry name, keeping the first");
                return false;
            }
            by_name.insert(entry.name.clone(), by_name.len());
            true
        });

        Self {
            entries,
            by_name,
            archive_size,
            cd_offset,
            cd_size,
        }
    }

    pub fn get(&self, name: &str) -> Option<&EntryDescriptor> {
        self.by_name.get(name).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Entries in directory order
    pub fn entries(&self) -> &[EntryDescriptor] {
        &self.entries
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn archive_size(&self) -> u64 {
        self.archive_size
    }

    /// Offset and size of the central directory
    pub fn directory_span(&self) -> (u64, u64) {
        (self.cd_offset, self.cd_size)
    }

    /// Entries whose spans directly follow `name`'s span, in archive order.
    pub fn followers(&self, name: &str) -> Vec<&EntryDescriptor> {
        let Some(start) = self.get(name) else {
            return Vec::new();
        };
        let mut ordered: Vec<&EntryDescriptor> = self.entries.iter().collect();
        ordered.sort_by_key(|e| e.lfh_offset);

        let mut out = Vec::new();
        let mut cursor = start.span_end;
        for entry in ordered.into_iter().filter(|e| e.lfh_offset > start.lfh_offset) {
            if entry.lfh_offset != cursor {
                break;
            }
            cursor = entry.span_end;
            out.push(entry);
        }
        out
    }

    /// Entries whose spans end exactly where `name`'s span starts, nearest first.
    pub fn predecessors(&self, name: &str) -> Vec<&EntryDescriptor> {
        let Some(target) = self.get(name) else {
            return Vec::new();
        };
        let mut ordered: Vec<&EntryDescriptor> = self
            .entries
            .iter()
            .filter(|e| e.lfh_offset < target.lfh_offset)
            .collect();
        ordered.sort_by_key(|e| Reverse(e.lfh_offset));

        let mut out = Vec::new();
        let mut cursor = target.lfh_offset;
        for entry in ordered {
            if entry.span_end != cursor {
                break;
            }
            cursor = entry.lfh_offset;
            out.push(entry);
        }
        out
    }
}
