// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Interact with Flattened Device Tree (FDT) blobs.
//!
//! An FDT, often called a device tree blob (DTB), is the binary
//! hardware-description format firmware and bootloaders hand to kernels.
//! A blob is one self-describing buffer: a fixed header locates a memory
//! reservation block (64-bit address/size pairs ended by an all-zero
//! sentinel), a tag-encoded *structure block* describing nodes and
//! properties, and a *strings block* holding NUL-terminated property names
//! referenced by offset.
//!
//! This crate decodes one blob into a read-only tree of named nodes and
//! renders each property payload as display text. The gateway is
//! [DecodedTree], which owns every byte it exposes, so the source buffer
//! can be dropped as soon as decoding returns.
//!
//! Blobs are treated as untrusted input. Every offset and length is
//! checked against the block that owns it, and any violation fails the
//! whole decode with an [Error] naming the kind and byte offset; there is
//! no partial tree and nothing is silently skipped.
//!
//! Writing or re-encoding blobs is not supported.

pub mod error;
pub mod format;
pub mod tree;
pub mod value;

pub use {
    error::{Error, HeaderError, ReserveMapError, StringTableError, StructureError},
    format::{FdtHeader, FdtReserveEntry, ReserveMapIter, StringsBlock},
    tree::{DecodedTree, Node, NodeId, Property},
};
