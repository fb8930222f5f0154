// ABOUTME: Positional heuristics classifying command arguments as input or output paths
// Ambiguous arguments pass through untranslated; this component never fails

use crate::config::DetectorConfig;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Clone)]
pub struct DetectedPaths {
    pub inputs: Vec<PathBuf>,
    pub outputs: Vec<PathBuf>,
}

/// Scans an argument vector and picks out likely input and output paths.
///
/// The wrapped commands are arbitrary external CLIs whose flag grammar is
/// not known up front, so classification is heuristic: an explicit output
/// flag always wins, positional arguments count as inputs only when they
/// exist locally, and everything else passes through unchanged. An
/// existing local file that was never meant as an input can still be
/// picked up; that is a known limitation of the heuristic.
pub struct PathDetector {
    output_flags: HashSet<String>,
    input_flags: HashSet<String>,
}

impl PathDetector {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            output_flags: config.output_flags.iter().cloned().collect(),
            input_flags: config.input_flags.iter().cloned().collect(),
        }
    }

    pub fn classify(&self, argv: &[String]) -> DetectedPaths {
        let mut detected = DetectedPaths::default();

        for (i, arg) in argv.iter().enumerate() {
            if !Self::is_path_like(arg) {
                continue;
            }
            let prev = if i > 0 { argv[i - 1].as_str() } else { "" };

            // Explicit output flag is stronger evidence than any input
            // inference, so it is checked first.
            if self.output_flags.contains(prev) {
                push_unique(&mut detected.outputs, arg);
            } else if self.input_flags.contains(prev)
                || (!prev.starts_with('-') && Path::new(arg).exists())
            {
                push_unique(&mut detected.inputs, arg);
            }
            // Neither: leave unclassified. Guessing an output location
            // without a flag could clobber files.
        }

        detected
    }

    fn is_path_like(arg: &str) -> bool {
        if arg.starts_with('-') || arg.len() < 2 {
            return false;
        }
        let path = Path::new(arg);
        path.extension().is_some()
            || arg.contains(std::path::MAIN_SEPARATOR)
            || path.exists()
    }
}

fn push_unique(list: &mut Vec<PathBuf>, arg: &str) {
    let path = PathBuf::from(arg);
    if !list.contains(&path) {
        list.push(path);
    }
}
