//! JSONL log of every frame crossing the app-server socket.

use std::path::PathBuf;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WireDirection {
    In,
    Out,
}

#[derive(Serialize)]
struct WireEntry<'a> {
    timestamp_ms: i64,
    direction: WireDirection,
    raw: &'a str,
}

/// Handle to a background writer task. Cheap to clone; entries are
/// dropped if the file could not be opened.
#[derive(Clone, Debug)]
pub struct WireLog {
    tx: mpsc::UnboundedSender<String>,
}

impl WireLog {
    pub fn open(path: PathBuf) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            if let Some(parent) = path.parent() {
                let _ = tokio::fs::create_dir_all(parent).await;
            }
            let mut file = match tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(err) => {
                    tracing::warn!(error = %err, path = %path.display(), "failed to open wire log");
                    return;
                }
            };
            while let Some(line) = rx.recv().await {
                if file.write_all(line.as_bytes()).await.is_err()
                    || file.write_all(b"\n").await.is_err()
                {
                    tracing::warn!(path = %path.display(), "wire log write failed, closing");
                    return;
                }
                let _ = file.flush().await;
            }
        });
        Self { tx }
    }

    pub fn record(&self, direction: WireDirection, raw: &str) {
        let entry = WireEntry {
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            direction,
            raw,
        };
        if let Ok(line) = serde_json::to_string(&entry) {
            let _ = self.tx.send(line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::time::Duration;

    #[tokio::test]
    async fn writes_one_json_line_per_frame() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("logs").join("wire.jsonl");
        let log = WireLog::open(path.clone());

        log.record(WireDirection::Out, r#"{"id":1,"method":"initialize"}"#);
        log.record(WireDirection::In, r#"{"id":1,"result":{}}"#);

        let mut content = String::new();
        for _ in 0..50 {
            content = tokio::fs::read_to_string(&path).await.unwrap_or_default();
            if content.lines().count() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let lines: Vec<Value> = content
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["direction"], "out");
        assert_eq!(lines[1]["raw"], r#"{"id":1,"result":{}}"#);
        assert!(lines[0]["timestamp_ms"].as_i64().is_some());
    }
}
