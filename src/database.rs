use crate::types::{Pid, Record};
use anyhow::{Context, Result, anyhow};
use duckdb::{Appender, Connection, params};
use std::sync::{Mutex, MutexGuard};

pub struct Database {
    conn: Mutex<Connection>,
}

/// Append one record through an open appender.
///
/// `file_pid` is the pid taken from the trace file name, used when the
/// record itself carries none.
pub fn append_record(
    appender: &mut Appender,
    trace_file: &str,
    file_pid: Option<Pid>,
    record: &Record,
) -> Result<()> {
    let args = serde_json::to_string(&record.args).context("Failed to encode arguments")?;
    appender.append_row(params![
        trace_file,
        record.pid.or(file_pid),
        &record.timestamp,
        record.started.as_deref(),
        &record.name,
        record.category().as_str(),
        args,
        record.args.len() as i64,
        &record.result,
        record.elapsed.as_deref(),
        record.split,
    ])?;
    Ok(())
}

impl Database {
    /// Initialize a new database with schema
    pub fn init(path: &str) -> Result<Self> {
        let conn =
            Connection::open(path).context(format!("Failed to open database at {}", path))?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                trace_file VARCHAR,
                pid UINTEGER,
                timestamp VARCHAR,
                started VARCHAR,
                name VARCHAR,
                category VARCHAR,
                args TEXT,
                argc BIGINT,
                result VARCHAR,
                elapsed VARCHAR,
                split BOOLEAN DEFAULT FALSE
            )
            "#,
            [],
        )?;

        conn.execute("CREATE INDEX IF NOT EXISTS idx_name ON records(name)", [])?;
        conn.execute("CREATE INDEX IF NOT EXISTS idx_pid ON records(pid)", [])?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_category ON records(category)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_trace_file ON records(trace_file)",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Lock the shared connection
    pub fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection mutex poisoned"))
    }

    /// Open a dedicated connection to the same database, for a worker thread
    pub fn worker_connection(&self) -> Result<Connection> {
        let conn = self.lock()?;
        conn.try_clone().context("Failed to clone database connection")
    }

    /// Count total records
    pub fn count_records(&self) -> Result<usize> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT COUNT(*) FROM records")?;
        let count: i64 = stmt.query_row([], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(i: usize, pid: Option<Pid>) -> Record {
        Record {
            pid,
            timestamp: format!("22:21:11.{:06}", i),
            started: None,
            name: "openat".to_string(),
            args: vec!["AT_FDCWD".to_string(), "\"/etc/hosts\"".to_string()],
            result: "3".to_string(),
            elapsed: Some("0.000004".to_string()),
            split: false,
        }
    }

    fn append(db: &Database, trace_file: &str, file_pid: Option<Pid>, records: &[Record]) {
        let conn = db.lock().unwrap();
        let mut appender = conn.appender("records").expect("Failed to create appender");
        for record in records {
            append_record(&mut appender, trace_file, file_pid, record).expect("Failed to append");
        }
        appender.flush().expect("Failed to flush appender");
    }

    #[test]
    fn test_database_init() {
        let db = Database::init(":memory:").expect("Failed to create database");
        let count = db.count_records().expect("Failed to count");
        assert_eq!(count, 0, "New database should be empty");
    }

    #[test]
    fn test_append_record() {
        let db = Database::init(":memory:").expect("Failed to create database");

        append(&db, "trace.12345", Some(12345), &[record(1, None)]);

        assert_eq!(db.count_records().unwrap(), 1);

        let conn = db.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT name, pid, trace_file, argc, args, category FROM records")
            .expect("Failed to prepare query");

        let result = stmt
            .query_row([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .expect("Failed to query");

        assert_eq!(
            result,
            (
                "openat".to_string(),
                12345,
                "trace.12345".to_string(),
                2,
                r#"["AT_FDCWD","\"/etc/hosts\""]"#.to_string(),
                "default".to_string()
            )
        );
    }

    #[test]
    fn test_record_pid_wins_over_file_pid() {
        let db = Database::init(":memory:").expect("Failed to create database");
        append(&db, "trace.1", Some(1), &[record(1, Some(7)), record(2, None)]);

        let conn = db.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT pid FROM records ORDER BY timestamp")
            .unwrap();
        let pids: Vec<u32> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(pids, vec![7, 1]);
    }

    #[test]
    fn test_concurrent_appenders() {
        use std::sync::Arc;
        use std::thread;

        let db = Arc::new(Database::init(":memory:").expect("Failed to create database"));
        let mut handles = vec![];

        for thread_id in 0..3u32 {
            let db_clone = Arc::clone(&db);
            handles.push(thread::spawn(move || {
                let conn = db_clone
                    .worker_connection()
                    .expect("Failed to open worker connection");
                let mut appender = conn.appender("records").expect("Failed to create appender");
                let trace_file = format!("thread_{}.trace", thread_id);
                for i in 0..100 {
                    append_record(&mut appender, &trace_file, Some(thread_id), &record(i, None))
                        .expect("Failed to append");
                }
                appender.flush().expect("Failed to flush appender");
            }));
        }

        for handle in handles {
            handle.join().expect("Thread panicked");
        }

        assert_eq!(db.count_records().unwrap(), 300);
    }
}
