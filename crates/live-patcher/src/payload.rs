// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of live-patcher.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Payloads shipped with a patch, looked up by logical key

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};

pub trait PayloadSource: Send + Sync {
    /// Open the payload stored under `key`
    fn open(&self, key: &str) -> io::Result<Box<dyn Read + Send + '_>>;
}

/// Payloads compiled into the host binary, e.g. with `include_bytes!`
#[derive(Debug, Default, Clone)]
pub struct EmbeddedPayloads {
    entries: HashMap<String, Cow<'static, [u8]>>,
}

impl EmbeddedPayloads {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, bytes: impl Into<Cow<'static, [u8]>>) -> Self {
        self.insert(key, bytes);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, bytes: impl Into<Cow<'static, [u8]>>) {
        self.entries.insert(key.into(), bytes.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PayloadSource for EmbeddedPayloads {
    fn open(&self, key: &str) -> io::Result<Box<dyn Read + Send + '_>> {
        let bytes = self.entries.get(key).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no embedded payload {key}"))
        })?;
        Ok(Box::new(Cursor::new(bytes.as_ref())))
    }
}

/// Payloads unpacked next to the host, under `<root>/<key>`
pub struct DirectoryPayloads {
    root: PathBuf,
}

impl DirectoryPayloads {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

impl fmt::Debug for DirectoryPayloads {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DirectoryPayloads({})", self.root.display())
    }
}

impl PayloadSource for DirectoryPayloads {
    fn open(&self, key: &str) -> io::Result<Box<dyn Read + Send + '_>> {
        // Keys are logical names, never paths out of the payload root.
        if key.contains("..") || Path::new(key).is_absolute() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid payload key {key}"),
            ));
        }
        Ok(Box::new(File::open(self.root.join(key))?))
    }
}
