use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::Serialize;

static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

fn temp_name(name: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let seq = WRITE_SEQ.fetch_add(1, Ordering::Relaxed);
    format!(".{name}.{}.{millis}-{seq}.tmp", std::process::id())
}

/// Write a file atomically: the body lands in a temp sibling (named with pid
/// and a monotonic counter so concurrent writers in one process never
/// collide) and is renamed over the target. A crash mid-write leaves the
/// target untouched.
pub async fn write_atomic(dir: &Path, name: &str, body: &[u8]) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let temp = dir.join(temp_name(name));
    tokio::fs::write(&temp, body).await?;
    match tokio::fs::rename(&temp, dir.join(name)).await {
        Ok(()) => Ok(()),
        Err(why) => {
            let _ = tokio::fs::remove_file(&temp).await;
            Err(why)
        }
    }
}

/// Serialize `value` and write it atomically into every configured data
/// directory. Per-directory failures are logged but do not abort the tick.
pub async fn write_json_all<T: Serialize>(dirs: &[PathBuf], name: &str, value: &T) {
    let body = match serde_json::to_vec_pretty(value) {
        Ok(body) => body,
        Err(why) => {
            log::error!("[persist] failed to encode {name}: {why}");
            return;
        }
    };
    for dir in dirs {
        if let Err(why) = write_atomic(dir, name, &body).await {
            log::warn!("[persist] failed to write {}: {why}", dir.join(name).display());
        }
    }
}

/// Read and parse the first readable copy of `name`, trying each data
/// directory in order.
pub async fn read_json_any<T: DeserializeOwned>(dirs: &[PathBuf], name: &str) -> Option<T> {
    for dir in dirs {
        let path = dir.join(name);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(_) => continue,
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => return Some(value),
            Err(why) => {
                log::warn!("[persist] failed to parse {}: {why}", path.display());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn write_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let dirs = vec![dir.path().to_path_buf()];

        let mut value = HashMap::new();
        value.insert("bus".to_owned(), 12.5f64);
        write_json_all(&dirs, "mileage.json", &value).await;

        let read: HashMap<String, f64> = read_json_any(&dirs, "mileage.json").await.unwrap();
        assert_eq!(read, value);
    }

    #[tokio::test]
    async fn overwrite_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        write_atomic(dir.path(), "state.json", b"{\"a\":1}")
            .await
            .unwrap();
        write_atomic(dir.path(), "state.json", b"{\"a\":2}")
            .await
            .unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(entries, vec!["state.json".to_owned()]);

        let body = std::fs::read_to_string(dir.path().join("state.json")).unwrap();
        assert_eq!(body, "{\"a\":2}");
    }

    #[tokio::test]
    async fn interrupted_write_preserves_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        write_atomic(dir.path(), "state.json", b"original")
            .await
            .unwrap();

        // Simulate a crash between the temp write and the rename: the temp
        // file exists but the rename never happened.
        let temp = dir.path().join(temp_name("state.json"));
        std::fs::write(&temp, b"half-writ").unwrap();

        let body = std::fs::read_to_string(dir.path().join("state.json")).unwrap();
        assert_eq!(body, "original");
    }

    #[tokio::test]
    async fn read_falls_back_across_directories() {
        let missing = tempfile::tempdir().unwrap();
        let present = tempfile::tempdir().unwrap();
        let dirs = vec![
            missing.path().join("nope"),
            present.path().to_path_buf(),
        ];

        write_atomic(present.path(), "notes.json", b"[1,2,3]")
            .await
            .unwrap();
        let read: Vec<i64> = read_json_any(&dirs, "notes.json").await.unwrap();
        assert_eq!(read, vec![1, 2, 3]);
    }
}
