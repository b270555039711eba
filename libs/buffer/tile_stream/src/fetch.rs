// This file is part of Nitrogen.
//
// Nitrogen is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// Nitrogen is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with Nitrogen.  If not, see <http://www.gnu.org/licenses/>.
use crate::loader::LoadError;
use log::trace;
use std::{
    fmt::Debug,
    fs,
    io::Read,
    path::{Path, PathBuf},
    time::Duration,
};

/// Where tile bytes come from when they are not in the disk cache. Called
/// from worker threads.
pub trait TileFetcher: Debug + Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, LoadError>;
}

/// HTTP(S) fetches over a shared agent.
#[derive(Debug)]
pub struct HttpFetcher {
    agent: ureq::Agent,
    max_bytes: u64,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            max_bytes: 64 * 1024 * 1024,
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl TileFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, LoadError> {
        let response = self.agent.get(url).call().map_err(|e| LoadError::Network {
            url: url.to_owned(),
            reason: e.to_string(),
        })?;
        let mut buf = Vec::new();
        response
            .into_reader()
            .take(self.max_bytes)
            .read_to_end(&mut buf)
            .map_err(|e| LoadError::Network {
                url: url.to_owned(),
                reason: e.to_string(),
            })?;
        trace!("fetched {} bytes from {}", buf.len(), url);
        Ok(buf)
    }
}

/// Serves a mirrored tile tree from disk: urls starting with `prefix` are
/// looked up under `root`, as are `file://` urls.
#[derive(Debug)]
pub struct DirectoryFetcher {
    prefix: String,
    root: PathBuf,
}

impl DirectoryFetcher {
    pub fn new(prefix: &str, root: &Path) -> Self {
        Self {
            prefix: prefix.to_owned(),
            root: root.to_owned(),
        }
    }

    fn resolve(&self, url: &str) -> Option<PathBuf> {
        if let Some(path) = url.strip_prefix("file://") {
            return Some(PathBuf::from(path));
        }
        let rest = url.strip_prefix(&self.prefix)?;
        let mut path = self.root.clone();
        for part in rest.split(|c| c == '/' || c == '?' || c == '&').filter(|p| !p.is_empty()) {
            if part == ".." {
                return None;
            }
            path.push(part);
        }
        Some(path)
    }
}

impl TileFetcher for DirectoryFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, LoadError> {
        let path = self.resolve(url).ok_or_else(|| LoadError::Network {
            url: url.to_owned(),
            reason: "url is outside of the mirrored tree".to_owned(),
        })?;
        fs::read(&path).map_err(|e| LoadError::Network {
            url: url.to_owned(),
            reason: format!("{}: {}", path.display(), e),
        })
    }
}
