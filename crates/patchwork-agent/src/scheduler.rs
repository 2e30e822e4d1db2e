//! File-conflict-aware step scheduling.

use patchwork_core::WorkStep;
use patchwork_edit::normalize_relative;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

/// Plan-order schedule that never runs two steps touching the same file at
/// the same time. Paths are compared in normalized form, so `./src/a.ts`
/// and `src/a.ts` conflict.
#[derive(Debug, Clone)]
pub struct ConflictSchedule {
    names: Vec<String>,
    files: Vec<Vec<PathBuf>>,
    file_access_map: HashMap<PathBuf, Vec<usize>>,
}

impl ConflictSchedule {
    /// Builds the schedule for `steps`, indexed by position.
    pub fn from_steps(steps: &[WorkStep]) -> Self {
        let files: Vec<Vec<PathBuf>> = steps
            .iter()
            .map(|step| {
                let normalized: HashSet<PathBuf> =
                    step.files.iter().map(|file| normalize_relative(file)).collect();
                normalized.into_iter().collect()
            })
            .collect();

        let mut file_access_map: HashMap<PathBuf, Vec<usize>> = HashMap::new();
        for (index, step_files) in files.iter().enumerate() {
            for file in step_files {
                file_access_map.entry(file.clone()).or_default().push(index);
            }
        }

        Self {
            names: steps.iter().map(|step| step.name.clone()).collect(),
            files,
            file_access_map,
        }
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the schedule has no steps.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Name of the step at `index`.
    pub fn name(&self, index: usize) -> &str {
        self.names.get(index).map_or("", String::as_str)
    }

    /// Whether `index` shares a file with any step in `running`.
    pub fn conflicts_with_running(&self, index: usize, running: &HashSet<usize>) -> bool {
        self.files.get(index).is_some_and(|files| {
            files.iter().any(|file| {
                self.file_access_map.get(file).is_some_and(|accessing| {
                    accessing
                        .iter()
                        .any(|other| *other != index && running.contains(other))
                })
            })
        })
    }

    /// Steps not yet started that could start now, in plan order.
    pub fn ready(&self, started: &HashSet<usize>, running: &HashSet<usize>) -> Vec<usize> {
        (0..self.len())
            .filter(|index| !started.contains(index))
            .filter(|index| !self.conflicts_with_running(*index, running))
            .collect()
    }
}
