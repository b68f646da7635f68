use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Persists the bearer token of the signed-in session.
///
/// The session store is the only writer. Everything else, including the API-call guard, only
/// reads the token.
pub trait TokenStore: Send + Sync + fmt::Debug {
    /// Returns the persisted token, if any.
    fn load(&self) -> Option<String>;

    /// Persists `token`, replacing any previous one.
    fn save(&self, token: &str) -> crate::Result<()>;

    /// Removes the persisted token. Removing a missing token is not an error.
    fn clear(&self) -> crate::Result<()>;
}

/// A [`TokenStore`] that keeps the token in memory only.
#[derive(Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<String>>,
}

impl MemoryTokenStore {
    /// Creates a store that already holds `token`.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }
}

impl fmt::Debug for MemoryTokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTokenStore")
            .field("token", &"[redacted]")
            .finish()
    }
}

// NB: Token stores unwrap their mutexes. A poisoned lock means a panic happened while swapping a
// string, which leaves nothing sensible to recover.
impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Option<String> {
        self.token.lock().unwrap().clone()
    }

    fn save(&self, token: &str) -> crate::Result<()> {
        *self.token.lock().unwrap() = Some(token.to_owned());
        Ok(())
    }

    fn clear(&self) -> crate::Result<()> {
        self.token.lock().unwrap().take();
        Ok(())
    }
}

/// A [`TokenStore`] that persists the token to a file so sessions survive restarts.
///
/// The token is also cached in memory, so a failing write only loses persistence, not the
/// running session.
pub struct FileTokenStore {
    path: PathBuf,
    cached: Mutex<Option<String>>,
}

impl FileTokenStore {
    /// Opens the token file at `path`, reading any token persisted there.
    ///
    /// A missing file is treated as "no token".
    pub fn open(path: impl Into<PathBuf>) -> crate::Result<Self> {
        let path = path.into();
        let cached = match std::fs::read_to_string(&path) {
            Ok(content) => Some(content.trim().to_owned()).filter(|t| !t.is_empty()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => return Err(err.into()),
        };

        Ok(Self {
            path,
            cached: Mutex::new(cached),
        })
    }

    /// Returns the location of the token file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Debug for FileTokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileTokenStore")
            .field("path", &self.path)
            .field("token", &"[redacted]")
            .finish()
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Option<String> {
        self.cached.lock().unwrap().clone()
    }

    fn save(&self, token: &str) -> crate::Result<()> {
        *self.cached.lock().unwrap() = Some(token.to_owned());
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, token)?;
        Ok(())
    }

    fn clear(&self) -> crate::Result<()> {
        self.cached.lock().unwrap().take();
        match std::fs::remove_file(&self.path) {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }
}
