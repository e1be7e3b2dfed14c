// Copyright (c) The remora Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Content-addressed file tree manifests.
//!
//! A manifest maps each file of an exported recipe or a built package to the
//! hash of its contents, plus a modification time used for update comparison.
//! The textual form is the interchange format consumed by remotes and the local
//! cache, so `dumps`/`parse` must round-trip byte for byte.

use crate::errors::Error;
use crate::hash::sha256_hex;
use std::collections::BTreeMap;
use std::fmt;

/// A content-addressed manifest of one file tree.
#[derive(Clone, Debug)]
pub struct FileTreeManifest {
    /// Creation time, seconds since the epoch. Used only to order a local
    /// manifest against an upstream one; not part of equality.
    pub time: u64,
    file_sums: BTreeMap<String, String>,
}

impl FileTreeManifest {
    /// Creates a manifest from file names and their content hashes.
    pub fn new(time: u64, file_sums: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            time,
            file_sums: file_sums.into_iter().collect(),
        }
    }

    /// Creates a manifest hashing the given file contents.
    pub fn from_contents<'a>(
        time: u64,
        files: impl IntoIterator<Item = (&'a str, &'a [u8])>,
    ) -> Self {
        Self {
            time,
            file_sums: files
                .into_iter()
                .map(|(name, contents)| (name.to_string(), sha256_hex(contents)))
                .collect(),
        }
    }

    /// The files covered by this manifest, in sorted order.
    pub fn files(&self) -> impl Iterator<Item = (&str, &str)> {
        self.file_sums
            .iter()
            .map(|(name, sum)| (name.as_str(), sum.as_str()))
    }

    /// Parses the textual manifest form produced by [`dumps`](Self::dumps).
    pub fn parse(text: &str) -> Result<Self, Error> {
        let mut lines = text.lines();
        let time = lines
            .next()
            .ok_or_else(|| Error::ManifestParseError("empty manifest".into()))?
            .trim()
            .parse::<u64>()
            .map_err(|err| Error::ManifestParseError(format!("invalid time line: {}", err)))?;
        let mut file_sums = BTreeMap::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let (name, sum) = line.rsplit_once(": ").ok_or_else(|| {
                Error::ManifestParseError(format!("invalid manifest line '{}'", line))
            })?;
            file_sums.insert(name.to_string(), sum.to_string());
        }
        Ok(Self { time, file_sums })
    }

    /// Serializes this manifest. The output is stable: files are emitted in
    /// sorted order, one per line.
    pub fn dumps(&self) -> String {
        let mut out = format!("{}\n", self.time);
        for (name, sum) in &self.file_sums {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(sum);
            out.push('\n');
        }
        out
    }

    /// A single hash summarizing the file tree, independent of `time`.
    ///
    /// Recipe manifests record this in each built package's descriptor; the
    /// outdated check compares it against the current recipe manifest.
    pub fn summary_hash(&self) -> String {
        let mut body = String::new();
        for (name, sum) in &self.file_sums {
            body.push_str(name);
            body.push_str(": ");
            body.push_str(sum);
            body.push('\n');
        }
        sha256_hex(body.as_bytes())
    }

    /// Returns true if this manifest is strictly newer than `other`.
    pub fn newer_than(&self, other: &FileTreeManifest) -> bool {
        self.time > other.time
    }
}

/// Equality covers the file tree only. Two manifests written at different times
/// over identical trees are equal; `time` orders them for update decisions.
impl PartialEq for FileTreeManifest {
    fn eq(&self, other: &Self) -> bool {
        self.file_sums == other.file_sums
    }
}

impl Eq for FileTreeManifest {}

impl fmt::Display for FileTreeManifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dumps())
    }
}
