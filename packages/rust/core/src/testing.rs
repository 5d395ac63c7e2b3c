//! Test helpers shared by the core test modules.

use std::path::{Path, PathBuf};

/// Fresh database path under the temp dir.
pub(crate) fn temp_db(prefix: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{prefix}_{}.db", uuid::Uuid::now_v7()))
}

/// Run raw SQL against a database through its own connection, e.g. to
/// install or drop a trigger that makes some writes fail.
pub(crate) async fn exec_sql(db: &Path, sql: &str) {
    let db = libsql::Builder::new_local(db)
        .build()
        .await
        .expect("open side connection");
    let conn = db.connect().expect("connect");
    conn.execute_batch(sql).await.expect("exec sql");
}
