// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Path utilities for the on-disk key store.
//!
//! ```text
//! <private_dir>/<utc-midnight-millis><private_suffix>
//! <public_dir>/<utc-midnight-millis><public_suffix>
//! ```

use std::path::{Path, PathBuf};

/// Default private key directory.
pub const DEFAULT_PRIVATE_DIR: &str = "keys/private";

/// Default public key directory.
pub const DEFAULT_PUBLIC_DIR: &str = "keys/public";

pub const DEFAULT_PRIVATE_SUFFIX: &str = "_private.pem";

pub const DEFAULT_PUBLIC_SUFFIX: &str = "_public.pem";

/// Storage path utilities for key files.
#[derive(Debug, Clone)]
pub struct KeyPaths {
    private_dir: PathBuf,
    public_dir: PathBuf,
    private_suffix: String,
    public_suffix: String,
}

impl Default for KeyPaths {
    fn default() -> Self {
        Self::new(
            DEFAULT_PRIVATE_DIR,
            DEFAULT_PUBLIC_DIR,
            DEFAULT_PRIVATE_SUFFIX,
            DEFAULT_PUBLIC_SUFFIX,
        )
    }
}

impl KeyPaths {
    pub fn new(
        private_dir: impl AsRef<Path>,
        public_dir: impl AsRef<Path>,
        private_suffix: impl Into<String>,
        public_suffix: impl Into<String>,
    ) -> Self {
        Self {
            private_dir: private_dir.as_ref().to_path_buf(),
            public_dir: public_dir.as_ref().to_path_buf(),
            private_suffix: private_suffix.into(),
            public_suffix: public_suffix.into(),
        }
    }

    /// Both directories under one root with the default suffixes (useful for testing).
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self::new(
            root.join("private"),
            root.join("public"),
            DEFAULT_PRIVATE_SUFFIX,
            DEFAULT_PUBLIC_SUFFIX,
        )
    }

    pub fn private_dir(&self) -> &Path {
        &self.private_dir
    }

    pub fn public_dir(&self) -> &Path {
        &self.public_dir
    }

    pub fn private_key(&self, stamp: i64) -> PathBuf {
        self.private_dir
            .join(format!("{stamp}{}", self.private_suffix))
    }

    pub fn public_key(&self, stamp: i64) -> PathBuf {
        self.public_dir.join(format!("{stamp}{}", self.public_suffix))
    }

    /// Parse the creation stamp out of a private key file name.
    pub fn private_stamp(&self, file_name: &str) -> Option<i64> {
        parse_stamp(file_name, &self.private_suffix)
    }

    /// Parse the creation stamp out of a public key file name.
    pub fn public_stamp(&self, file_name: &str) -> Option<i64> {
        parse_stamp(file_name, &self.public_suffix)
    }
}

fn parse_stamp(file_name: &str, suffix: &str) -> Option<i64> {
    file_name.strip_suffix(suffix)?.parse().ok()
}
