// Copyright 2025 vista Project Authors
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

use std::{collections::HashMap, fs::File, io::BufReader, path::PathBuf};

use anyhow::anyhow;
use bytesize::ByteSize;
use clap::Args;
use vista::Format;

use crate::error::Result;

#[derive(Debug, Args)]
pub struct FormatsArgs {
    /// JSON file holding an array of formats.
    file: PathBuf,
}

pub fn run(args: FormatsArgs) -> Result<()> {
    let reader = BufReader::new(File::open(&args.file)?);
    let formats: Vec<Format> = serde_json::from_reader(reader)?;

    for format in check(formats)? {
        let size = match format.size {
            Some(size) => format!("{}x{}", size.width, size.height),
            None => "original".to_string(),
        };
        println!(
            "{:<24} {:>12} {:?} quality={} disk={} persisted={} preload={:?}",
            format.name,
            size,
            format.scale_mode,
            format.compression_quality,
            ByteSize::b(format.disk_capacity as u64),
            format.allow_disk_cache,
            format.preload,
        );
    }
    Ok(())
}

/// Validate every format and fold duplicated declarations.
fn check(formats: Vec<Format>) -> Result<Vec<Format>> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut checked: Vec<Format> = Vec::with_capacity(formats.len());

    for format in formats {
        format.validate()?;
        match seen.get(&format.name) {
            Some(&index) if !checked[index].is_compatible(&format) => {
                return Err(anyhow!("format {} is declared twice with different renderings", format.name).into());
            }
            Some(_) => tracing::debug!("[cli]: Skip duplicated format {}.", format.name),
            None => {
                seen.insert(format.name.clone(), checked.len());
                checked.push(format);
            }
        }
    }
    Ok(checked)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::error::Error;

    fn parse(json: &str) -> Vec<Format> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_check() {
        let formats = parse(
            r#"[
                { "name": "thumb", "size": { "width": 100, "height": 100 } },
                { "name": "thumb", "size": { "width": 100, "height": 100 }, "disk_capacity": 1024 },
                { "name": "full" }
            ]"#,
        );
        let checked = check(formats).unwrap();
        assert_eq!(checked.len(), 2);
        assert_eq!(checked[0].compression_quality, 90);

        let conflicting = parse(
            r#"[
                { "name": "thumb", "size": { "width": 100, "height": 100 } },
                { "name": "thumb", "size": { "width": 50, "height": 50 } }
            ]"#,
        );
        assert!(matches!(check(conflicting), Err(Error::Other(_))));

        let invalid = parse(r#"[{ "name": "thumb", "compression_quality": 0 }]"#);
        assert!(matches!(check(invalid), Err(Error::Cache(_))));
    }

    #[test]
    fn test_run() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{ "name": "thumb", "scale_mode": "aspect_fit" }}]"#).unwrap();
        run(FormatsArgs {
            file: file.path().to_path_buf(),
        })
        .unwrap();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "name": "thumb" }}"#).unwrap();
        assert!(matches!(
            run(FormatsArgs {
                file: file.path().to_path_buf(),
            }),
            Err(Error::Json(_))
        ));
    }
}
