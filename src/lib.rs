// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

#![forbid(unsafe_code)]

//! A copy-on-write B-tree engine for filesystem-metadata-shaped
//! workloads: fixed-width keys, variable-length values, proactive
//! split/merge during a single top-down descent, and sequence-stamped
//! items for freshness-filtered range scans.

mod alloc;
mod block;
mod cache;
mod config;
mod cursor;
mod descent;
mod device;
mod error;
mod key;
mod tree;

pub use block::item::BlockRef;
pub use config::BtreeConfig;
pub use cursor::{ItemRef, RangeIter};
pub use device::{BlockDevice, BlockNo, FileDevice, MemDevice};
pub use error::{Error, Result};
pub use key::{IntKey, TreeKey};
pub use tree::{Btree, Root, Txn};
