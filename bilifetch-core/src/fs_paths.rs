use std::path::PathBuf;

pub trait AppPaths: Send + Sync {
    fn downloads_dir(&self) -> PathBuf;
    fn data_dir(&self) -> PathBuf;
    fn config_file(&self) -> PathBuf;

    /// Where persisted account cookies live.
    fn cookie_dir(&self) -> PathBuf {
        self.data_dir().join("cookies")
    }
}

pub struct DesktopPaths;

impl AppPaths for DesktopPaths {
    fn downloads_dir(&self) -> PathBuf {
        dirs::download_dir()
            .map(|d| d.join("bilifetch"))
            .unwrap_or_else(|| PathBuf::from("./downloads"))
    }

    fn data_dir(&self) -> PathBuf {
        dirs::data_dir()
            .map(|d| d.join("bilifetch"))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    fn config_file(&self) -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("bilifetch").join("settings.json"))
            .unwrap_or_else(|| PathBuf::from("settings.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedPaths;

    impl AppPaths for FixedPaths {
        fn downloads_dir(&self) -> PathBuf {
            PathBuf::from("/srv/out")
        }

        fn data_dir(&self) -> PathBuf {
            PathBuf::from("/srv/data")
        }

        fn config_file(&self) -> PathBuf {
            PathBuf::from("/srv/settings.json")
        }
    }

    #[test]
    fn cookie_dir_lives_under_data_dir() {
        assert_eq!(FixedPaths.cookie_dir(), PathBuf::from("/srv/data/cookies"));
    }

    #[test]
    fn desktop_paths_are_namespaced() {
        let data = DesktopPaths.data_dir();
        assert!(data.ends_with("bilifetch") || data == PathBuf::from("."));
    }
}
