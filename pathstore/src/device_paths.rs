use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;

use crate::error::{StoreError, StoreResult};
use crate::io::{read_json, write_json_atomic};
use crate::lonlat::{ClosedLoop, LonLat};

const MISSING: &str = "paths.json not found";

/// Device ID -> closed driving loop, persisted as one JSON object. Every change rewrites the whole
/// file.
pub struct DevicePaths {
    path: PathBuf,
    // Held for the whole load-modify-save, so two devices saved at once both survive
    write_lock: Mutex<()>,
}

impl DevicePaths {
    pub fn new(path: PathBuf) -> DevicePaths {
        DevicePaths {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Fails with `NotFound` if nothing has been saved yet.
    pub fn load_all(&self) -> StoreResult<BTreeMap<String, Vec<LonLat>>> {
        read_json(&self.path, MISSING)
    }

    /// The stored loop for one device. Fails with `NotFound` if the file or the device is missing.
    pub fn get(&self, device_id: &str) -> StoreResult<Vec<LonLat>> {
        let mut all = self.load_all()?;
        match all.remove(device_id) {
            Some(pts) if !pts.is_empty() => Ok(pts),
            Some(_) => Err(StoreError::Malformed(format!(
                "stored path for {} is empty",
                device_id
            ))),
            None => Err(StoreError::NotFound(format!(
                "No stored path for device {}",
                device_id
            ))),
        }
    }

    /// Sets or replaces one device's loop, keeping every other entry.
    pub async fn save(&self, device_id: &str, path: &ClosedLoop) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;

        // The file I/O happens on the blocking pool, not on a runtime worker
        let file = self.path.clone();
        let key = device_id.to_string();
        let points = path.points().to_vec();
        let (replaced, total) =
            tokio::task::spawn_blocking(move || merge_into_file(&file, key, points))
                .await
                .map_err(|err| StoreError::Io(std::io::Error::new(ErrorKind::Other, err)))??;

        info!(
            "{} path for {} ({} points, {} devices total)",
            if replaced { "Replaced" } else { "Saved" },
            device_id,
            path.len(),
            total
        );
        Ok(())
    }
}

/// Load-modify-save of the whole document. Returns whether the device already had a path, and how
/// many devices are stored afterwards. A file that exists but doesn't parse is left alone.
fn merge_into_file(
    file: &Path,
    device_id: String,
    points: Vec<LonLat>,
) -> StoreResult<(bool, usize)> {
    let mut all: BTreeMap<String, Vec<LonLat>> = match read_json(file, MISSING) {
        Ok(all) => all,
        Err(StoreError::NotFound(_)) => BTreeMap::new(),
        Err(err) => return Err(err),
    };
    let replaced = all.insert(device_id, points).is_some();
    write_json_atomic(file, &all)?;
    Ok((replaced, all.len()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn square(offset: f64) -> ClosedLoop {
        ClosedLoop::close(vec![
            LonLat(offset, offset),
            LonLat(offset + 1.0, offset),
            LonLat(offset + 1.0, offset + 1.0),
        ])
        .unwrap()
    }

    fn store() -> (tempfile::TempDir, DevicePaths) {
        let dir = tempfile::tempdir().unwrap();
        let paths = DevicePaths::new(dir.path().join(crate::DEVICE_PATHS_FILE));
        (dir, paths)
    }

    #[test]
    fn nothing_saved_yet() {
        let (_dir, paths) = store();
        assert!(matches!(paths.load_all(), Err(StoreError::NotFound(_))));
        assert!(matches!(paths.get("d1"), Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn merge_and_replace() {
        let (_dir, paths) = store();
        paths.save("d1", &square(0.0)).await.unwrap();
        paths.save("d2", &square(10.0)).await.unwrap();

        let all = paths.load_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["d1"], square(0.0).into_points());
        assert_eq!(all["d2"], square(10.0).into_points());

        paths.save("d1", &square(5.0)).await.unwrap();
        assert_eq!(paths.get("d1").unwrap(), square(5.0).into_points());
        assert_eq!(paths.get("d2").unwrap(), square(10.0).into_points());

        match paths.get("d3") {
            Err(StoreError::NotFound(msg)) => assert!(msg.contains("d3")),
            x => panic!("expected NotFound, got {:?}", x),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_saves_dont_lose_devices() {
        let (_dir, paths) = store();
        let paths = Arc::new(paths);

        let mut handles = Vec::new();
        for i in 0..16 {
            let paths = paths.clone();
            handles.push(tokio::spawn(async move {
                paths
                    .save(&format!("device_{}", i), &square(i as f64))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let all = paths.load_all().unwrap();
        assert_eq!(all.len(), 16);
        for (_, pts) in all {
            assert_eq!(pts.first(), pts.last());
        }
    }

    #[test]
    fn corrupt_file_isnt_clobbered() {
        let (_dir, paths) = store();
        fs_err::write(paths.path(), "{\"d1\": [[0, 0],").unwrap();

        let err = merge_into_file(paths.path(), "d2".to_string(), square(1.0).into_points())
            .unwrap_err();
        assert!(matches!(err, StoreError::Json { .. }));
        assert_eq!(
            fs_err::read_to_string(paths.path()).unwrap(),
            "{\"d1\": [[0, 0],"
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn save_works_on_a_single_threaded_runtime() {
        let (_dir, paths) = store();
        // The write runs on the blocking pool while this task keeps the only worker
        let path = square(0.0);
        let (saved, ()) = tokio::join!(paths.save("d1", &path), tokio::task::yield_now());
        saved.unwrap();
        assert_eq!(paths.get("d1").unwrap(), square(0.0).into_points());
    }

    #[test]
    fn file_is_a_plain_object() {
        let (_dir, paths) = store();
        tokio::runtime::Runtime::new()
            .unwrap()
            .block_on(paths.save("d1", &square(0.0)))
            .unwrap();
        let raw: serde_json::Value = read_json(paths.path(), "missing").unwrap();
        assert_eq!(raw["d1"][0], serde_json::json!([0.0, 0.0]));
        assert_eq!(raw["d1"].as_array().unwrap().len(), 4);
    }
}
