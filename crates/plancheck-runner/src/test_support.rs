use chrono::Utc;
use std::fs;
use std::path::PathBuf;

pub(crate) struct TempDirGuard {
    pub(crate) path: PathBuf,
}

impl TempDirGuard {
    pub(crate) fn new(prefix: &str) -> Self {
        let path = std::env::temp_dir().join(format!(
            "{}_{}_{}",
            prefix,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        fs::create_dir_all(&path).expect("temp dir");
        Self { path }
    }

    /// Creates `name/` with placeholder planning files.
    pub(crate) fn benchmark(&self, name: &str, files: &[&str]) -> PathBuf {
        let dir = self.path.join(name);
        fs::create_dir_all(&dir).expect("benchmark dir");
        for file in files {
            fs::write(dir.join(file), "(define)").expect("fixture");
        }
        dir
    }
}

impl Drop for TempDirGuard {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}
