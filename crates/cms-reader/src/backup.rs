//! Backup of the previous reply and cache around a configure run.
//!
//! A failed reconfigure must not destroy a good model: before the tool runs,
//! `reply` is moved to `reply.prev` and `CMakeCache.txt` is copied to
//! `CMakeCache.txt.prev`. On failure both are moved back.

use camino::{Utf8Path, Utf8PathBuf};
use cms_config::CACHE_FILE_NAME;

use crate::error::ReaderError;
use crate::fileapi::reply_dir;

/// Backup state of one configure run.
#[derive(Debug)]
pub struct ReplyBackup {
    reply: Utf8PathBuf,
    reply_prev: Utf8PathBuf,
    cache: Utf8PathBuf,
    cache_prev: Utf8PathBuf,
    has_reply: bool,
    has_cache: bool,
}

fn prev_path(path: &Utf8Path) -> Utf8PathBuf {
    let mut prev = path.as_str().to_owned();
    prev.push_str(".prev");
    Utf8PathBuf::from(prev)
}

impl ReplyBackup {
    /// Moves the current reply aside and copies the cache.
    pub fn create(build_dir: &Utf8Path) -> Result<Self, ReaderError> {
        let reply = reply_dir(build_dir);
        let reply_prev = prev_path(&reply);
        let cache = build_dir.join(CACHE_FILE_NAME);
        let cache_prev = prev_path(&cache);

        let has_reply = reply.is_dir();
        if has_reply {
            if reply_prev.exists() {
                std::fs::remove_dir_all(&reply_prev).map_err(|e| ReaderError::io(&reply_prev, e))?;
            }
            std::fs::rename(&reply, &reply_prev).map_err(|e| ReaderError::io(&reply, e))?;
        }

        let has_cache = cache.is_file();
        if has_cache {
            std::fs::copy(&cache, &cache_prev).map_err(|e| ReaderError::io(&cache, e))?;
        }

        tracing::debug!(reply = has_reply, cache = has_cache, "Backed up previous reply");
        Ok(Self {
            reply,
            reply_prev,
            cache,
            cache_prev,
            has_reply,
            has_cache,
        })
    }

    /// Returns `true` if there was a reply to back up.
    #[must_use]
    pub const fn has_reply(&self) -> bool {
        self.has_reply
    }

    /// Puts the previous reply and cache back.
    pub fn restore(self) -> Result<(), ReaderError> {
        if self.has_reply {
            if self.reply.exists() {
                std::fs::remove_dir_all(&self.reply).map_err(|e| ReaderError::io(&self.reply, e))?;
            }
            std::fs::rename(&self.reply_prev, &self.reply)
                .map_err(|e| ReaderError::io(&self.reply_prev, e))?;
        }
        if self.has_cache {
            std::fs::rename(&self.cache_prev, &self.cache).map_err(|e| ReaderError::io(&self.cache_prev, e))?;
        }
        tracing::info!("Restored previous reply after failed configure");
        Ok(())
    }
}
