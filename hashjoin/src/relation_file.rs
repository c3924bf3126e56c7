// Copyright 2018-2022 Clemens Lutz
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Loads join relations from files.
//!
//! A relation file contains one `key value` tuple per line, separated by a
//! space, and a header line. Files ending with `gz` are decompressed on the
//! fly. Only the keys are loaded, because the join outputs row indices.

use crate::error::Result;
use csv::{ByteRecord, ReaderBuilder};
use flate2::read::GzDecoder;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

fn open(path: &Path) -> Result<csv::Reader<Box<dyn Read>>> {
    let file = File::open(path)?;
    let reader: Box<dyn Read> = if path.extension().map_or(false, |ext| ext == "gz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };

    let reader = ReaderBuilder::new()
        .delimiter(b' ')
        .has_headers(true)
        .quoting(false)
        .double_quote(false)
        .from_reader(reader);

    Ok(reader)
}

/// Reads the key column of a relation file.
pub fn read_keys<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader = open(path)?;
    let mut record = ByteRecord::new();
    let mut keys = Vec::new();

    while reader.read_byte_record(&mut record)? {
        let (key, _value): (T, T) = record.deserialize(None)?;
        keys.push(key);
    }

    debug!(path = %path.display(), tuples = keys.len(), "Loaded relation");

    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("{}-{}", std::process::id(), name))
    }

    #[test]
    fn reads_plain_file() -> Result<()> {
        let path = temp_path("relation.tsv");
        std::fs::write(&path, "key value\n3 30\n1 10\n2 20\n")?;

        let keys: Vec<i32> = read_keys(&path)?;
        std::fs::remove_file(&path)?;

        assert_eq!(keys, vec![3, 1, 2]);
        Ok(())
    }

    #[test]
    fn reads_gzip_file() -> Result<()> {
        let path = temp_path("relation.tsv.gz");
        let mut encoder = GzEncoder::new(File::create(&path)?, Compression::default());
        encoder.write_all(b"key value\n7 1\n8 2\n")?;
        encoder.finish()?;

        let keys: Vec<i64> = read_keys(&path)?;
        std::fs::remove_file(&path)?;

        assert_eq!(keys, vec![7, 8]);
        Ok(())
    }
}
