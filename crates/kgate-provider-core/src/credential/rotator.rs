use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

/// Where a credential lives. Never holds token material, so every use
/// reloads the latest persisted state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotatorEntry {
    pub path: PathBuf,
    /// Region override; empty means "derive from the credential".
    pub region: String,
    pub label: String,
}

impl RotatorEntry {
    pub fn new(path: impl Into<PathBuf>, region: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            region: region.into(),
            label: label.into(),
        }
    }

    pub fn display_name(&self) -> String {
        if self.label.is_empty() {
            self.path.display().to_string()
        } else {
            self.label.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotatorCandidate {
    pub entry: RotatorEntry,
    /// Position in the rotator, or `None` when rotation is not in effect.
    pub index: Option<usize>,
}

/// Round-robin over credential locations with a shared atomic cursor.
#[derive(Debug, Default)]
pub struct CredentialRotator {
    entries: Vec<RotatorEntry>,
    cursor: AtomicU32,
}

impl CredentialRotator {
    pub fn new(entries: Vec<RotatorEntry>) -> Self {
        Self {
            entries,
            cursor: AtomicU32::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[RotatorEntry] {
        &self.entries
    }

    /// Rotation only applies with two or more entries.
    pub fn rotates(&self) -> bool {
        self.entries.len() >= 2
    }

    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire) as usize
    }

    /// Entries starting at the cursor, wrapping around once.
    pub fn candidates(&self) -> Vec<RotatorCandidate> {
        if !self.rotates() {
            return self
                .entries
                .iter()
                .map(|entry| RotatorCandidate {
                    entry: entry.clone(),
                    index: None,
                })
                .collect();
        }
        let len = self.entries.len();
        let start = self.cursor() % len;
        (0..len)
            .map(|offset| {
                let idx = (start + offset) % len;
                RotatorCandidate {
                    entry: self.entries[idx].clone(),
                    index: Some(idx),
                }
            })
            .collect()
    }

    /// Moves the cursor past `attempted`, whatever the outcome of the attempt.
    pub fn advance(&self, attempted: usize) {
        if !self.rotates() {
            return;
        }
        let next = (attempted + 1) % self.entries.len();
        self.cursor.store(next as u32, Ordering::Release);
    }

    /// Candidates for a call. A pinned location bypasses rotation entirely.
    pub fn select(&self, pinned: Option<&RotatorEntry>) -> Vec<RotatorCandidate> {
        match pinned {
            Some(entry) => vec![RotatorCandidate {
                entry: entry.clone(),
                index: None,
            }],
            None => self.candidates(),
        }
    }
}
