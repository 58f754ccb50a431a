//! File record operations. Rows are indirect references into the artifact
//! root; the artifact store owns the bytes on disk and deletes the row before
//! unlinking the file.

use chrono::DateTime;
use chrono::Utc;
use rusqlite::params;

use super::Store;
use super::rows;
use super::rows::FileRecord;
use crate::error::Result;

impl Store {
    pub async fn insert_file(&self, record: FileRecord) -> Result<()> {
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO file_records
                 (file_id, kind, filename, content_type, size_bytes, team_id,
                  project_id, session_id, created_at, source_path)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    record.file_id,
                    record.kind,
                    record.filename,
                    record.content_type,
                    record.size_bytes,
                    record.team_id,
                    record.project_id,
                    record.session_id,
                    super::fmt_ts(record.created_at),
                    record.source_path,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_file(&self, file_id: &str) -> Result<Option<FileRecord>> {
        let file_id = file_id.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT file_id, kind, filename, content_type, size_bytes, team_id,
                        project_id, session_id, created_at, source_path
                 FROM file_records WHERE file_id = ?1",
            )?;
            let mut result = stmt.query(params![file_id])?;
            match result.next()? {
                Some(row) => Ok(Some(rows::file_from_row(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    /// Team-scoped lookup; rows owned by another team read as absent.
    pub async fn get_team_file(&self, team_id: i64, file_id: &str) -> Result<Option<FileRecord>> {
        let record = self.get_file(file_id).await?;
        Ok(record.filter(|r| r.team_id == team_id))
    }

    pub async fn list_files(&self, team_id: i64) -> Result<Vec<FileRecord>> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT file_id, kind, filename, content_type, size_bytes, team_id,
                        project_id, session_id, created_at, source_path
                 FROM file_records WHERE team_id = ?1 ORDER BY created_at DESC",
            )?;
            let mut result = stmt.query(params![team_id])?;
            let mut out = Vec::new();
            while let Some(row) = result.next()? {
                out.push(rows::file_from_row(row)?);
            }
            Ok(out)
        })
        .await
    }

    /// True when any persisted message links to this file.
    pub async fn is_file_referenced(&self, file_id: &str) -> Result<bool> {
        let file_id = file_id.to_string();
        self.call(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM message_attachments WHERE file_id = ?1",
                params![file_id],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
        .await
    }

    /// Rows older than `cutoff` that no live message references; candidates
    /// for the GC sweep.
    pub async fn expired_unreferenced_files(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<FileRecord>> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT file_id, kind, filename, content_type, size_bytes, team_id,
                        project_id, session_id, created_at, source_path
                 FROM file_records f
                 WHERE f.created_at < ?1
                   AND NOT EXISTS (
                       SELECT 1 FROM message_attachments a WHERE a.file_id = f.file_id
                   )",
            )?;
            let mut result = stmt.query(params![super::fmt_ts(cutoff)])?;
            let mut out = Vec::new();
            while let Some(row) = result.next()? {
                out.push(rows::file_from_row(row)?);
            }
            Ok(out)
        })
        .await
    }

    /// Removes the row. Callers unlink the file only after this succeeds.
    pub async fn delete_file(&self, file_id: &str) -> Result<bool> {
        let file_id = file_id.to_string();
        self.call(move |conn| {
            let n = conn.execute(
                "DELETE FROM file_records WHERE file_id = ?1",
                params![file_id],
            )?;
            Ok(n > 0)
        })
        .await
    }
}
