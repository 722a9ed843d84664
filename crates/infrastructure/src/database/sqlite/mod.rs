pub mod sqlite_store;

pub use sqlite_store::SqliteStore;

/// 表结构，按顺序执行
pub const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS requests (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        uuid TEXT NOT NULL UNIQUE,
        service TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_requests_status ON requests(status)",
    r#"
    CREATE TABLE IF NOT EXISTS request_options (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        request_id INTEGER NOT NULL REFERENCES requests(id) ON DELETE CASCADE,
        position INTEGER NOT NULL,
        name TEXT NOT NULL,
        value TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        request_id INTEGER NOT NULL UNIQUE REFERENCES requests(id) ON DELETE CASCADE,
        service TEXT NOT NULL,
        configuration TEXT,
        job_ref TEXT,
        working_dir TEXT,
        status TEXT NOT NULL,
        return_code INTEGER
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)",
    r#"
    CREATE TABLE IF NOT EXISTS files (
        id TEXT PRIMARY KEY,
        job_id INTEGER REFERENCES jobs(id) ON DELETE SET NULL,
        title TEXT NOT NULL,
        path TEXT NOT NULL
    )
    "#,
];
