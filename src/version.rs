use std::fmt;
use std::sync::OnceLock;

/// Version details baked in at compile time.
///
/// `CAMELPACK_COMMIT` and `CAMELPACK_BUILD_DATE` are read from the build
/// environment and fall back to `unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildInfo {
    pub version: &'static str,
    pub commit: &'static str,
    pub date: &'static str,
}

impl BuildInfo {
    pub const fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            commit: match option_env!("CAMELPACK_COMMIT") {
                Some(commit) => commit,
                None => "unknown",
            },
            date: match option_env!("CAMELPACK_BUILD_DATE") {
                Some(date) => date,
                None => "unknown",
            },
        }
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (commit {}, built {})", self.version, self.commit, self.date)
    }
}

/// Text shown by `--version`.
pub fn long_version() -> &'static str {
    static LONG_VERSION: OnceLock<String> = OnceLock::new();
    LONG_VERSION.get_or_init(|| BuildInfo::current().to_string())
}
