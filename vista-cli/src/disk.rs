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

//! Maintenance commands on a disk tier directory.

use std::path::{Path, PathBuf};

use bytesize::ByteSize;
use clap::Args;
use vista_storage::{DiskStore, DiskStoreBuilder};

use crate::error::{Error, Result};

#[derive(Debug, Args)]
pub struct StatArgs {
    /// Directory of the disk tier.
    dir: PathBuf,
}

#[derive(Debug, Args)]
pub struct TrimArgs {
    /// Directory of the disk tier.
    dir: PathBuf,

    /// Format to trim.
    #[arg(short, long)]
    format: String,

    /// New capacity of the format. e.g. 16MiB, 512KiB
    #[arg(short, long)]
    capacity: ByteSize,
}

#[derive(Debug, Args)]
pub struct RemoveArgs {
    /// Directory of the disk tier.
    dir: PathBuf,

    /// Key to remove from every format.
    #[arg(short, long)]
    key: String,
}

#[derive(Debug, Args)]
pub struct ClearArgs {
    /// Directory of the disk tier.
    dir: PathBuf,

    /// Only clear this format.
    #[arg(short, long)]
    format: Option<String>,
}

async fn open(dir: &Path) -> Result<DiskStore> {
    if !dir.is_dir() {
        return Err(Error::DirectoryNotFound(dir.to_path_buf()));
    }
    let store = DiskStoreBuilder::new(dir).open().await?;
    Ok(store)
}

fn ensure_format(store: &DiskStore, format: &str) -> Result<()> {
    match store.capacity(format) {
        Some(_) => Ok(()),
        None => Err(Error::FormatNotFound(format.to_string())),
    }
}

fn bytes(size: usize) -> String {
    ByteSize::b(size as u64).to_string()
}

fn total_len(store: &DiskStore) -> usize {
    store.formats().iter().map(|format| store.len(format)).sum()
}

pub async fn stat(args: StatArgs) -> Result<()> {
    let store = open(&args.dir).await?;
    let formats = store.formats();
    if formats.is_empty() {
        println!("{:?} holds no formats", store.dir());
        return Ok(());
    }

    println!("{:<24} {:>10} {:>14}", "FORMAT", "ENTRIES", "USAGE");
    let mut usage = 0;
    for format in formats.iter() {
        usage += store.usage(format);
        println!(
            "{:<24} {:>10} {:>14}",
            format,
            store.len(format),
            bytes(store.usage(format))
        );
    }
    println!("{:<24} {:>10} {:>14}", "total", total_len(&store), bytes(usage));
    Ok(())
}

pub async fn trim(args: TrimArgs) -> Result<()> {
    let store = open(&args.dir).await?;
    ensure_format(&store, &args.format)?;

    let before = store.usage(&args.format);
    let capacity = usize::try_from(args.capacity.as_u64()).unwrap_or(usize::MAX);
    store.set_capacity(&args.format, capacity)?;
    store.wait().await;

    println!(
        "{}: {} -> {} ({} entries left)",
        args.format,
        bytes(before),
        bytes(store.usage(&args.format)),
        store.len(&args.format)
    );
    Ok(())
}

pub async fn remove(args: RemoveArgs) -> Result<()> {
    let store = open(&args.dir).await?;
    let before = total_len(&store);
    store.remove_key(&args.key).await?;
    println!("removed {} entries of key {:?}", before - total_len(&store), args.key);
    Ok(())
}

pub async fn clear(args: ClearArgs) -> Result<()> {
    let store = open(&args.dir).await?;
    match args.format {
        Some(format) => {
            ensure_format(&store, &format)?;
            let len = store.len(&format);
            store.clear_format(&format).await?;
            println!("cleared {len} entries of format {format}");
        }
        None => {
            let len = total_len(&store);
            store.clear().await?;
            println!("cleared {len} entries");
        }
    }
    Ok(())
}
