use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

pub struct TestProject {
    pub root: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        Self { root }
    }

    pub fn write_config(&self, content: &str) -> PathBuf {
        let path = self.root.path().join("config.yaml");
        fs::write(&path, content).unwrap();
        path
    }

    #[allow(dead_code)]
    pub fn create_dir(&self, relative: &str) -> PathBuf {
        let dir = self.root.path().join(relative);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    pub fn path(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }
}
