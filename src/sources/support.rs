//! Support source backed by a conversation export directory.
//!
//! The export directory is searched for the first JSON file whose name
//! contains "conversation". The file may hold either a bare array of
//! conversations or an object with a `conversations` array.

use super::{Conversation, FetchParams, MetricSource, SourceRecord, SupportSnapshot};
use crate::error::SourceError;
use crate::models::SourceId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Reads support conversations from an export directory.
#[derive(Debug, Clone)]
pub struct SupportExportSource {
    export_dir: PathBuf,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ExportFile {
    List(Vec<Conversation>),
    Wrapped { conversations: Vec<Conversation> },
}

impl SupportExportSource {
    pub fn new(export_dir: PathBuf) -> Self {
        Self { export_dir }
    }

    /// Find the conversation export file, if any.
    fn find_export(&self) -> Option<PathBuf> {
        let mut candidates: Vec<PathBuf> = WalkDir::new(&self.export_dir)
            .max_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| is_conversation_export(p))
            .collect();

        // Directory iteration order is platform-dependent.
        candidates.sort();
        candidates.into_iter().next()
    }

    /// "Support-conversation summary" for the window.
    pub fn load_conversations(&self, params: &FetchParams) -> Result<SupportSnapshot, SourceError> {
        if !self.export_dir.is_dir() {
            return Err(SourceError::Unavailable(format!(
                "export directory not found: {}",
                self.export_dir.display()
            )));
        }

        let Some(path) = self.find_export() else {
            debug!("No conversation export in {}", self.export_dir.display());
            return Err(SourceError::Empty);
        };

        let content = std::fs::read_to_string(&path).map_err(|e| {
            SourceError::Unavailable(format!("failed to read {}: {}", path.display(), e))
        })?;

        let mut conversations = match serde_json::from_str::<ExportFile>(&content) {
            Ok(ExportFile::List(list)) => list,
            Ok(ExportFile::Wrapped { conversations }) => conversations,
            Err(e) => {
                return Err(SourceError::Malformed(format!(
                    "{}: {}",
                    path.display(),
                    e
                )))
            }
        };

        conversations.retain(|c| {
            c.created_at
                .map_or(true, |d| d >= params.from && d <= params.to)
        });
        conversations.truncate(params.limit as usize);

        if conversations.is_empty() {
            return Err(SourceError::Empty);
        }

        Ok(SupportSnapshot {
            conversations,
            as_of: modified_at(&path),
        })
    }
}

fn is_conversation_export(path: &Path) -> bool {
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("json"));
    let name_matches = path
        .file_name()
        .and_then(|n| n.to_str())
        .map_or(false, |n| n.to_lowercase().contains("conversation"));
    is_json && name_matches
}

fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

#[async_trait]
impl MetricSource for SupportExportSource {
    fn id(&self) -> SourceId {
        SourceId::Support
    }

    async fn fetch(&self, params: &FetchParams) -> Result<SourceRecord, SourceError> {
        let source = self.clone();
        let params = params.clone();

        // File I/O stays off the async workers.
        tokio::task::spawn_blocking(move || source.load_conversations(&params))
            .await
            .map_err(|e| SourceError::Unavailable(format!("export reader failed: {}", e)))?
            .map(SourceRecord::Support)
    }
}
