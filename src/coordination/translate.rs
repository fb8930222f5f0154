// ABOUTME: Argument vector rewriting, substituting local paths with remote equivalents
// Exact matches first, then longest-path-first substring replacement

use crate::coordination::session::Session;

/// Rewrites an argument vector against a session's file mappings.
pub struct CommandTranslator {
    /// (local, remote) pairs sorted by descending local-path length so a
    /// longer path is never partially shadowed by a shorter prefix of it.
    mappings: Vec<(String, String)>,
}

impl CommandTranslator {
    pub fn from_session(session: &Session) -> Self {
        let mut mappings: Vec<(String, String)> = session
            .mappings()
            .iter()
            .map(|m| {
                (
                    m.local_path.to_string_lossy().to_string(),
                    m.remote_path.clone(),
                )
            })
            .collect();
        mappings.sort_by_key(|(local, _)| std::cmp::Reverse(local.len()));
        Self { mappings }
    }

    pub fn translate(&self, argv: &[String]) -> Vec<String> {
        argv.iter().map(|arg| self.translate_arg(arg)).collect()
    }

    fn translate_arg(&self, arg: &str) -> String {
        for (local, remote) in &self.mappings {
            if arg == local {
                return remote.clone();
            }
        }

        // Paths can be embedded in larger arguments, e.g. "out=/local/a.jpg".
        let mut result = arg.to_string();
        for (local, remote) in &self.mappings {
            if result.contains(local.as_str()) {
                result = result.replace(local.as_str(), remote);
            }
        }
        result
    }
}
