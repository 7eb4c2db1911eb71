use std::num::TryFromIntError;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::error::{PreviewError, Result};
use crate::models::{ChatMessage, FileTable, Project, ProjectFile, ProjectSummary, Role};

use super::Database;

/// Durable project state: file tables, chat history, credits and the
/// in-progress turn flag.
pub trait ProjectStore {
    fn create(&self, name: &str, owner: &str) -> Result<Project>;

    /// Load a project with its files (insertion order) and messages (oldest first).
    fn get(&self, id: &str) -> Result<Project>;

    /// Insert or overwrite one file. New paths go to the end of the table.
    fn replace_file(&self, id: &str, path: &str, content: &str) -> Result<()>;

    fn list_projects(&self) -> Result<Vec<ProjectSummary>>;

    /// Delete a project together with its files, messages and turn flag.
    /// Returns `false` when nothing matched.
    fn delete_project(&self, id: &str) -> Result<bool>;

    fn append_message(&self, id: &str, message: &ChatMessage) -> Result<()>;

    /// Add to the running credit total and return the new total.
    fn add_credits(&self, id: &str, credits: u64) -> Result<u64>;

    fn set_turn_flag(&self, id: &str) -> Result<()>;

    fn clear_turn_flag(&self, id: &str) -> Result<()>;

    /// When the outstanding turn started, if one is flagged.
    fn turn_flag(&self, id: &str) -> Result<Option<DateTime<Utc>>>;

    /// Persist the outcome of a successful turn. Returns the new credit total.
    fn commit_turn(
        &self,
        id: &str,
        files: &[ProjectFile],
        credits: u64,
        message: &ChatMessage,
    ) -> Result<u64> {
        for file in files {
            self.replace_file(id, &file.path, &file.content)?;
        }
        let total = self.add_credits(id, credits)?;
        self.append_message(id, message)?;
        Ok(total)
    }
}

impl Database {
    fn ensure_project(&self, id: &str) -> Result<()> {
        let found: Option<i64> = self
            .conn()
            .query_row("SELECT 1 FROM projects WHERE id = ?1", params![id], |r| {
                r.get(0)
            })
            .optional()?;
        match found {
            Some(_) => Ok(()),
            None => Err(PreviewError::ProjectNotFound { id: id.to_string() }),
        }
    }

    fn touch(&self, id: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE projects SET updated_at = ?2 WHERE id = ?1",
            params![id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn get_files(&self, id: &str) -> Result<FileTable> {
        let mut stmt = self.conn().prepare(
            "SELECT path, content FROM files WHERE project_id = ?1 ORDER BY position",
        )?;
        let rows = stmt.query_map(params![id], |row| {
            Ok(ProjectFile {
                path: row.get(0)?,
                content: row.get(1)?,
            })
        })?;
        let mut files = Vec::new();
        for r in rows {
            files.push(r?);
        }
        Ok(FileTable::from_files(files))
    }

    fn get_messages(&self, id: &str) -> Result<Vec<ChatMessage>> {
        let mut stmt = self.conn().prepare(
            "SELECT role, content, created_at FROM messages WHERE project_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![id], |row| {
            Ok(ChatMessage {
                role: Role::parse(row.get::<_, String>(0)?.as_str()),
                content: row.get(1)?,
                created_at: parse_timestamp(2, &row.get::<_, String>(2)?)?,
            })
        })?;
        let mut messages = Vec::new();
        for r in rows {
            messages.push(r?);
        }
        Ok(messages)
    }
}

impl ProjectStore for Database {
    fn create(&self, name: &str, owner: &str) -> Result<Project> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn().execute(
            "INSERT INTO projects (id, name, owner, credits, created_at, updated_at)
             VALUES (?1, ?2, ?3, 0, ?4, ?4)",
            params![id, name, owner, now],
        )?;
        Ok(Project {
            id,
            name: name.to_string(),
            owner: owner.to_string(),
            credits: 0,
            messages: Vec::new(),
            files: FileTable::new(),
        })
    }

    fn get(&self, id: &str) -> Result<Project> {
        let head = self
            .conn()
            .query_row(
                "SELECT name, owner, credits FROM projects WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        sql_unsigned::<u64>(2, row.get::<_, i64>(2)?)?,
                    ))
                },
            )
            .optional()?;
        let Some((name, owner, credits)) = head else {
            return Err(PreviewError::ProjectNotFound { id: id.to_string() });
        };
        Ok(Project {
            id: id.to_string(),
            name,
            owner,
            credits,
            messages: self.get_messages(id)?,
            files: self.get_files(id)?,
        })
    }

    fn replace_file(&self, id: &str, path: &str, content: &str) -> Result<()> {
        self.ensure_project(id)?;
        self.conn().execute(
            "INSERT INTO files (project_id, path, content, position)
             VALUES (?1, ?2, ?3, (SELECT COALESCE(MAX(position) + 1, 0) FROM files WHERE project_id = ?1))
             ON CONFLICT(project_id, path) DO UPDATE SET content = excluded.content",
            params![id, path, content],
        )?;
        self.touch(id)
    }

    fn list_projects(&self) -> Result<Vec<ProjectSummary>> {
        let mut stmt = self.conn().prepare(
            "SELECT p.id, p.name, p.owner, p.credits,
                    (SELECT COUNT(*) FROM files f WHERE f.project_id = p.id)
             FROM projects p ORDER BY p.created_at, p.name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ProjectSummary {
                id: row.get(0)?,
                name: row.get(1)?,
                owner: row.get(2)?,
                credits: sql_unsigned(3, row.get::<_, i64>(3)?)?,
                file_count: sql_unsigned(4, row.get::<_, i64>(4)?)?,
            })
        })?;
        let mut projects = Vec::new();
        for r in rows {
            projects.push(r?);
        }
        Ok(projects)
    }

    fn delete_project(&self, id: &str) -> Result<bool> {
        let deleted = self
            .conn()
            .execute("DELETE FROM projects WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    fn append_message(&self, id: &str, message: &ChatMessage) -> Result<()> {
        self.ensure_project(id)?;
        self.conn().execute(
            "INSERT INTO messages (project_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                id,
                message.role.as_str(),
                message.content,
                message.created_at.to_rfc3339()
            ],
        )?;
        self.touch(id)
    }

    fn add_credits(&self, id: &str, credits: u64) -> Result<u64> {
        self.ensure_project(id)?;
        let delta = i64::try_from(credits)
            .map_err(|_| PreviewError::Other(format!("credit cost {credits} is out of range")))?;
        let total: i64 = self.conn().query_row(
            "SELECT credits FROM projects WHERE id = ?1",
            params![id],
            |r| r.get(0),
        )?;
        let total = total
            .checked_add(delta)
            .ok_or_else(|| PreviewError::Other(format!("credit total for {id} would overflow")))?;
        self.conn().execute(
            "UPDATE projects SET credits = ?2 WHERE id = ?1",
            params![id, total],
        )?;
        u64::try_from(total)
            .map_err(|_| PreviewError::Other(format!("credit total {total} is negative")))
    }

    fn set_turn_flag(&self, id: &str) -> Result<()> {
        self.ensure_project(id)?;
        self.conn().execute(
            "INSERT OR REPLACE INTO turn_flags (project_id, started_at) VALUES (?1, ?2)",
            params![id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn clear_turn_flag(&self, id: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM turn_flags WHERE project_id = ?1", params![id])?;
        Ok(())
    }

    fn turn_flag(&self, id: &str) -> Result<Option<DateTime<Utc>>> {
        let started: Option<String> = self
            .conn()
            .query_row(
                "SELECT started_at FROM turn_flags WHERE project_id = ?1",
                params![id],
                |r| r.get(0),
            )
            .optional()?;
        match started {
            Some(s) => Ok(Some(parse_timestamp(0, &s)?)),
            None => Ok(None),
        }
    }

    /// Runs in one transaction so a failed commit leaves the project untouched.
    fn commit_turn(
        &self,
        id: &str,
        files: &[ProjectFile],
        credits: u64,
        message: &ChatMessage,
    ) -> Result<u64> {
        let tx = self.conn().unchecked_transaction()?;
        for file in files {
            self.replace_file(id, &file.path, &file.content)?;
        }
        let total = self.add_credits(id, credits)?;
        self.append_message(id, message)?;
        tx.commit()?;
        Ok(total)
    }
}

fn sql_unsigned<T>(idx: usize, value: i64) -> rusqlite::Result<T>
where
    T: TryFrom<i64, Error = TryFromIntError>,
{
    T::try_from(value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

fn parse_timestamp(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn create_and_get_project() {
        let db = test_db();
        let p = db.create("landing", "alice").unwrap();
        assert!(Uuid::parse_str(&p.id).is_ok());

        let loaded = db.get(&p.id).unwrap();
        assert_eq!(loaded.name, "landing");
        assert_eq!(loaded.owner, "alice");
        assert_eq!(loaded.credits, 0);
        assert!(loaded.files.is_empty());
    }

    #[test]
    fn get_missing_project_is_not_found() {
        let db = test_db();
        let err = db.get("nope").unwrap_err();
        assert!(matches!(err, PreviewError::ProjectNotFound { .. }));
    }

    #[test]
    fn replace_file_keeps_insertion_order() {
        let db = test_db();
        let p = db.create("p", "o").unwrap();
        db.replace_file(&p.id, "src/App.tsx", "a").unwrap();
        db.replace_file(&p.id, "src/index.css", "b").unwrap();
        db.replace_file(&p.id, "src/App.tsx", "c").unwrap();

        let files = db.get(&p.id).unwrap().files;
        assert_eq!(files.paths().collect::<Vec<_>>(), ["src/App.tsx", "src/index.css"]);
        assert_eq!(files.get("src/App.tsx"), Some("c"));
    }

    #[test]
    fn replace_file_unknown_project() {
        let db = test_db();
        assert!(matches!(
            db.replace_file("missing", "a", "b"),
            Err(PreviewError::ProjectNotFound { .. })
        ));
    }

    #[test]
    fn messages_round_trip_in_order() {
        let db = test_db();
        let p = db.create("p", "o").unwrap();
        db.append_message(&p.id, &ChatMessage::new(Role::User, "make a header"))
            .unwrap();
        db.append_message(&p.id, &ChatMessage::new(Role::Assistant, "Updated 1 file"))
            .unwrap();

        let msgs = db.get(&p.id).unwrap().messages;
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, Role::User);
        assert_eq!(msgs[1].content, "Updated 1 file");
    }

    #[test]
    fn credit_total_overflow_is_an_error() {
        let db = test_db();
        let p = db.create("p", "o").unwrap();
        db.add_credits(&p.id, i64::MAX as u64).unwrap();
        assert!(matches!(db.add_credits(&p.id, 1), Err(PreviewError::Other(_))));
        assert_eq!(db.get(&p.id).unwrap().credits, i64::MAX as u64);
    }

    #[test]
    fn negative_stored_credits_fail_to_load() {
        let db = test_db();
        let p = db.create("p", "o").unwrap();
        db.conn()
            .execute("UPDATE projects SET credits = -1 WHERE id = ?1", params![p.id])
            .unwrap();
        assert!(db.get(&p.id).is_err());
        assert!(db.list_projects().is_err());
    }

    #[test]
    fn credits_accumulate() {
        let db = test_db();
        let p = db.create("p", "o").unwrap();
        assert_eq!(db.add_credits(&p.id, 3).unwrap(), 3);
        assert_eq!(db.add_credits(&p.id, 4).unwrap(), 7);
        assert!(matches!(
            db.add_credits(&p.id, u64::MAX),
            Err(PreviewError::Other(_))
        ));
        assert_eq!(db.get(&p.id).unwrap().credits, 7);
        assert_eq!(db.get(&p.id).unwrap().credits, 7);
    }

    #[test]
    fn turn_flag_set_and_clear() {
        let db = test_db();
        let p = db.create("p", "o").unwrap();
        assert!(db.turn_flag(&p.id).unwrap().is_none());
        db.set_turn_flag(&p.id).unwrap();
        assert!(db.turn_flag(&p.id).unwrap().is_some());
        db.clear_turn_flag(&p.id).unwrap();
        assert!(db.turn_flag(&p.id).unwrap().is_none());
    }

    #[test]
    fn delete_project_cascades() {
        let db = test_db();
        let p = db.create("p", "o").unwrap();
        db.replace_file(&p.id, "a.tsx", "x").unwrap();
        db.append_message(&p.id, &ChatMessage::new(Role::User, "hi")).unwrap();
        db.set_turn_flag(&p.id).unwrap();

        assert!(db.delete_project(&p.id).unwrap());
        assert!(!db.delete_project(&p.id).unwrap());

        for table in ["files", "messages", "turn_flags"] {
            let n: i64 = db
                .conn()
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
                .unwrap();
            assert_eq!(n, 0, "{table} not cleaned up");
        }
    }

    #[test]
    fn list_projects_counts_files() {
        let db = test_db();
        let a = db.create("a", "o").unwrap();
        db.create("b", "o").unwrap();
        db.replace_file(&a.id, "x.ts", "1").unwrap();
        db.replace_file(&a.id, "y.ts", "2").unwrap();

        let list = db.list_projects().unwrap();
        assert_eq!(list.len(), 2);
        let row = list.iter().find(|s| s.id == a.id).unwrap();
        assert_eq!(row.file_count, 2);
    }

    #[test]
    fn commit_turn_is_atomic() {
        let db = test_db();
        let p = db.create("p", "o").unwrap();
        let files = vec![ProjectFile {
            path: "src/App.tsx".into(),
            content: "x".into(),
        }];
        let total = db
            .commit_turn(&p.id, &files, 5, &ChatMessage::new(Role::Assistant, "done"))
            .unwrap();
        assert_eq!(total, 5);

        let err = db.commit_turn("missing", &files, 5, &ChatMessage::new(Role::Assistant, "x"));
        assert!(err.is_err());
        let loaded = db.get(&p.id).unwrap();
        assert_eq!(loaded.files.len(), 1);
        assert_eq!(loaded.messages.len(), 1);
    }
}
