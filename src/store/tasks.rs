//! Task rows: undated to-dos that live until deleted by id.

use rusqlite::{params, Row};

use super::{with_connection, Store, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: i64,
    pub assigner_id: i64,
    pub assignee_id: i64,
    pub channel_id: i64,
    pub task: String,
}

impl Task {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            assigner_id: row.get(1)?,
            assignee_id: row.get(2)?,
            channel_id: row.get(3)?,
            task: row.get(4)?,
        })
    }
}

/// All open tasks of one assignee, in assignment order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskGroup {
    pub assignee_id: i64,
    pub tasks: Vec<Task>,
}

impl TaskGroup {
    /// Distinct channels of this group's tasks, first occurrence first.
    pub fn channels(&self) -> Vec<i64> {
        let mut channels: Vec<i64> = Vec::new();
        for task in &self.tasks {
            if !channels.contains(&task.channel_id) {
                channels.push(task.channel_id);
            }
        }
        channels
    }
}

/// Group tasks by assignee. Groups appear in the order their assignee is
/// first seen; tasks keep their input order within a group.
pub fn group_by_assignee(tasks: Vec<Task>) -> Vec<TaskGroup> {
    let mut groups: Vec<TaskGroup> = Vec::new();
    for task in tasks {
        match groups.iter_mut().find(|g| g.assignee_id == task.assignee_id) {
            Some(group) => group.tasks.push(task),
            None => groups.push(TaskGroup {
                assignee_id: task.assignee_id,
                tasks: vec![task],
            }),
        }
    }
    groups
}

impl Store {
    pub async fn add_task(
        &self,
        assigner_id: i64,
        assignee_id: i64,
        channel_id: i64,
        task: &str,
    ) -> Result<i64, StoreError> {
        let task = task.to_string();
        with_connection(&self.tasks_path, move |conn| {
            conn.execute(
                "INSERT INTO tasks (assigner_id, assignee_id, channel_id, task) VALUES (?1, ?2, ?3, ?4)",
                params![assigner_id, assignee_id, channel_id, task],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Assign the same text to every assignee as independent rows, all or
    /// nothing. Returns the new ids in assignee order.
    pub async fn add_tasks(
        &self,
        assigner_id: i64,
        assignee_ids: &[i64],
        channel_id: i64,
        task: &str,
    ) -> Result<Vec<i64>, StoreError> {
        let assignee_ids = assignee_ids.to_vec();
        let task = task.to_string();
        with_connection(&self.tasks_path, move |conn| {
            let tx = conn.transaction()?;
            let mut ids = Vec::with_capacity(assignee_ids.len());
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO tasks (assigner_id, assignee_id, channel_id, task) VALUES (?1, ?2, ?3, ?4)",
                )?;
                for assignee_id in assignee_ids {
                    stmt.execute(params![assigner_id, assignee_id, channel_id, task])?;
                    ids.push(tx.last_insert_rowid());
                }
            }
            tx.commit()?;
            Ok(ids)
        })
        .await
    }

    /// Returns false if no such task existed.
    pub async fn delete_task(&self, id: i64) -> Result<bool, StoreError> {
        with_connection(&self.tasks_path, move |conn| {
            let n = conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
            Ok(n > 0)
        })
        .await
    }

    /// Every task, in assignment order.
    pub async fn all_tasks(&self) -> Result<Vec<Task>, StoreError> {
        with_connection(&self.tasks_path, |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, assigner_id, assignee_id, channel_id, task FROM tasks ORDER BY id",
            )?;
            let rows = stmt.query_map([], Task::from_row)?;
            rows.collect()
        })
        .await
    }
}
