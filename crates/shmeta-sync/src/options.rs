use std::time::Duration;

/// How `get` treats entries the instance has not seen yet.
///
/// The default reads the local namespace once: no cluster sync, no waiting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GetOptions {
    /// Run a synchronization round on the instance before reading.
    pub sync_remote: bool,
    /// Keep retrying (with sync) until the entry shows up or the timeout hits.
    pub wait: bool,
    /// Overrides the configured wait timeout.
    pub timeout: Option<Duration>,
}

impl GetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sync_remote(mut self, sync_remote: bool) -> Self {
        self.sync_remote = sync_remote;
        self
    }

    pub fn with_wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }

    /// Wait with this timeout. Implies `wait`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.wait = true;
        self.timeout = Some(timeout);
        self
    }
}

/// Number of entries `list` returns unless told otherwise.
pub const DEFAULT_LIST_LIMIT: usize = 5;

/// Typename filter for `list`. A `limit` of 0 means unbounded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListOptions {
    pub pattern: String,
    pub regex: bool,
    pub limit: usize,
}

impl ListOptions {
    pub fn glob(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            ..Self::default()
        }
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            regex: true,
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn unbounded(self) -> Self {
        self.with_limit(0)
    }
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            pattern: "*".into(),
            regex: false,
            limit: DEFAULT_LIST_LIMIT,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Delete even if other live objects still reference the target.
    pub force: bool,
    /// Also delete members not referenced from elsewhere.
    pub deep: bool,
}

impl DeleteOptions {
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_deep(mut self, deep: bool) -> Self {
        self.deep = deep;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_defaults_are_local_and_immediate() {
        let o = GetOptions::default();
        assert!(!o.sync_remote);
        assert!(!o.wait);
        assert_eq!(o.timeout, None);
    }

    #[test]
    fn timeout_implies_wait() {
        let o = GetOptions::new().with_timeout(Duration::from_millis(100));
        assert!(o.wait);
        assert_eq!(o.timeout, Some(Duration::from_millis(100)));
    }

    #[test]
    fn list_defaults() {
        let o = ListOptions::default();
        assert_eq!(o.pattern, "*");
        assert!(!o.regex);
        assert_eq!(o.limit, 5);
        assert_eq!(ListOptions::regex("^a").unbounded().limit, 0);
        assert!(ListOptions::regex("^a").regex);
    }
}
