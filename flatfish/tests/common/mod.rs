//! In-tree builder for the canonical test image
//!
//! Emits a complete little-endian v4.0 image with every block stored
//! uncompressed, so the reader under test exercises real metablock chains,
//! fragment sharing, xattrs, and the export table without any compressed
//! reference data:
//!
//! ```text
//! /
//! ├── a            2 bytes, fragment only, xattr user.foo (inline)
//! ├── b            1,050,000 bytes, 8 data blocks + shared fragment tail,
//! │                xattr user.bar (indirect)
//! └── large_dir    extended directory, listing spans metablocks
//!     ├── 1..1000  empty files
//!     ├── loop1    -> loop2
//!     ├── loop2    -> loop1
//!     ├── sparse   one sparse block of zeros
//!     └── sym      -> ../b
//! ```

use std::io::Write;

pub const BLOCK_SIZE: u32 = 0x20000;
pub const BLOCK_LOG: u16 = 17;

pub const UID: u32 = 2020;
pub const GID: u32 = 202020;

pub const B_FILE_SIZE: u64 = 1_050_000;
pub const B_FULL_BLOCKS: u64 = B_FILE_SIZE / BLOCK_SIZE as u64;
pub const B_TAIL: u64 = B_FILE_SIZE - B_FULL_BLOCKS * BLOCK_SIZE as u64;

pub const XATTR_VALUE: &[u8] = b"1234567891234567891234567890001234567890";

const METABLOCK: usize = 8192;
const UNCOMPRESSED: u16 = 0x8000;
const DATA_UNCOMPRESSED: u32 = 1 << 24;
const NO_FRAGMENT: u32 = 0xffff_ffff;
const NO_XATTR: u32 = 0xffff_ffff;
const NOT_SET: u64 = 0xffff_ffff_ffff_ffff;

const MTIME: u32 = 0x6600_0000;

/// Logical byte stream that will be chunked into uncompressed metablocks
struct Stream {
    bytes: Vec<u8>,
}

impl Stream {
    fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    /// (physical offset of the holding metablock, offset inside it) of the
    /// next written byte. Holds because every non-final chunk is exactly
    /// 8192 bytes behind a 2-byte header.
    fn pos(&self) -> (u64, u16) {
        let logical = self.bytes.len();
        (((logical / METABLOCK) * (METABLOCK + 2)) as u64, (logical % METABLOCK) as u16)
    }

    fn ref64(&self) -> u64 {
        let (block, offset) = self.pos();
        block << 16 | u64::from(offset)
    }

    fn u16(&mut self, v: u16) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    fn raw(&mut self, v: &[u8]) {
        self.bytes.extend_from_slice(v);
    }

    /// Chunk into `0x8000 | len` framed metablocks
    fn into_metablocks(self) -> Vec<u8> {
        let mut out = Vec::new();
        for chunk in self.bytes.chunks(METABLOCK) {
            out.extend_from_slice(&(chunk.len() as u16 | UNCOMPRESSED).to_le_bytes());
            out.extend_from_slice(chunk);
        }
        out
    }
}

/// One directory entry to be emitted: where the target inode lives, its
/// number, and its basic type
struct Entry {
    name: Vec<u8>,
    block: u64,
    offset: u16,
    ino: u32,
    t: u16,
}

/// Emit listing headers/entries, starting a new header whenever the target
/// metablock changes or a header fills up. Returns (block_index,
/// block_offset, file_size) for the directory inode.
fn write_listing(dir: &mut Stream, entries: &[Entry]) -> (u32, u16, u32) {
    let (block_index, block_offset) = dir.pos();
    let start_len = dir.bytes.len();

    let mut i = 0;
    while i < entries.len() {
        let block = entries[i].block;
        let base_ino = entries[i].ino;
        let mut run = 0;
        while i + run < entries.len()
            && entries[i + run].block == block
            && run < 256
            && i64::from(entries[i + run].ino) - i64::from(base_ino) <= i64::from(i16::MAX)
        {
            run += 1;
        }

        dir.u32(run as u32 - 1);
        dir.u32(block as u32);
        dir.u32(base_ino);
        for entry in &entries[i..i + run] {
            dir.u16(entry.offset);
            dir.u16((i64::from(entry.ino) - i64::from(base_ino)) as u16);
            dir.u16(entry.t);
            dir.u16(entry.name.len() as u16 - 1);
            dir.raw(&entry.name);
        }
        i += run;
    }

    let size = (dir.bytes.len() - start_len) as u32;
    (block_index as u32, block_offset, size + 3)
}

fn inode_header(inodes: &mut Stream, t: u16, perms: u16, ino: u32) {
    inodes.u16(t);
    inodes.u16(perms);
    inodes.u16(0); // uid idx
    inodes.u16(1); // gid idx
    inodes.u32(MTIME);
    inodes.u32(ino);
}

/// Build the canonical image
pub fn build_image() -> Vec<u8> {
    let mut image = vec![0u8; 96];

    // data region: b's full blocks, then the fragment shared by a and b
    let b_blocks_start = image.len() as u64;
    for _ in 0..B_FULL_BLOCKS {
        image.extend(std::iter::repeat(b'b').take(BLOCK_SIZE as usize));
    }
    let fragment_start = image.len() as u64;
    image.extend_from_slice(b"a\n");
    image.extend(std::iter::repeat(b'b').take(B_TAIL as usize));
    let fragment_stored = 2 + B_TAIL as u32;

    // inode table, leaves first so the directories can reference them
    let mut inodes = Stream::new();
    let mut next_ino = 1u32;
    let mut exports: Vec<u64> = Vec::new();

    let mut alloc_ino = |exports: &mut Vec<u64>, inodes: &Stream| {
        let ino = next_ino;
        next_ino += 1;
        exports.push(inodes.ref64());
        ino
    };

    // /a: extended file, fragment only, xattr index 0
    let a_pos = inodes.pos();
    let a_ino = alloc_ino(&mut exports, &inodes);
    inode_header(&mut inodes, 9, 0o644, a_ino);
    inodes.u64(0); // blocks_start
    inodes.u64(2); // file_size
    inodes.u64(0); // sparse
    inodes.u32(1); // nlink
    inodes.u32(0); // frag_index
    inodes.u32(0); // block_offset
    inodes.u32(0); // xattr index

    // /b: extended file, 8 blocks plus fragment tail, xattr index 1
    let b_pos = inodes.pos();
    let b_ino = alloc_ino(&mut exports, &inodes);
    inode_header(&mut inodes, 9, 0o644, b_ino);
    inodes.u64(b_blocks_start);
    inodes.u64(B_FILE_SIZE);
    inodes.u64(0); // sparse
    inodes.u32(1); // nlink
    inodes.u32(0); // frag_index
    inodes.u32(2); // block_offset
    inodes.u32(1); // xattr index
    for _ in 0..B_FULL_BLOCKS {
        inodes.u32(BLOCK_SIZE | DATA_UNCOMPRESSED);
    }

    // large_dir content: 1000 empty files, two looping symlinks, a sparse
    // file, and a symlink back to /b, in name order
    let mut names: Vec<String> = (1..=1000).map(|n| n.to_string()).collect();
    names.sort();

    let mut large_entries: Vec<Entry> = Vec::new();
    for name in &names {
        let (block, offset) = inodes.pos();
        let ino = alloc_ino(&mut exports, &inodes);
        inode_header(&mut inodes, 2, 0o644, ino);
        inodes.u32(0); // blocks_start
        inodes.u32(NO_FRAGMENT);
        inodes.u32(0); // block_offset
        inodes.u32(0); // file_size
        large_entries.push(Entry { name: name.clone().into_bytes(), block, offset, ino, t: 2 });
    }
    for (name, target) in [("loop1", "loop2"), ("loop2", "loop1")] {
        let (block, offset) = inodes.pos();
        let ino = alloc_ino(&mut exports, &inodes);
        inode_header(&mut inodes, 3, 0o777, ino);
        inodes.u32(1); // nlink
        inodes.u32(target.len() as u32);
        inodes.raw(target.as_bytes());
        large_entries.push(Entry { name: name.as_bytes().to_vec(), block, offset, ino, t: 3 });
    }
    {
        let (block, offset) = inodes.pos();
        let ino = alloc_ino(&mut exports, &inodes);
        inode_header(&mut inodes, 2, 0o644, ino);
        inodes.u32(0); // blocks_start, nothing stored
        inodes.u32(NO_FRAGMENT);
        inodes.u32(0); // block_offset
        inodes.u32(BLOCK_SIZE); // file_size, one sparse block
        inodes.u32(0); // sparse size word
        large_entries.push(Entry { name: b"sparse".to_vec(), block, offset, ino, t: 2 });
    }
    {
        let (block, offset) = inodes.pos();
        let ino = alloc_ino(&mut exports, &inodes);
        inode_header(&mut inodes, 3, 0o777, ino);
        inodes.u32(1); // nlink
        inodes.u32(4);
        inodes.raw(b"../b");
        large_entries.push(Entry { name: b"sym".to_vec(), block, offset, ino, t: 3 });
    }

    // directory table: large_dir's listing, then the root listing
    let mut dirs = Stream::new();
    let (ld_block_index, ld_block_offset, ld_size) = write_listing(&mut dirs, &large_entries);

    // large_dir inode (extended, exercises that decode path)
    let large_dir_pos = inodes.pos();
    let large_dir_ino = alloc_ino(&mut exports, &inodes);
    let root_ino = large_dir_ino + 1;
    inode_header(&mut inodes, 8, 0o755, large_dir_ino);
    inodes.u32(2); // nlink
    inodes.u32(ld_size);
    inodes.u32(ld_block_index);
    inodes.u32(root_ino); // parent
    inodes.u16(0); // index count
    inodes.u16(ld_block_offset);
    inodes.u32(NO_XATTR);

    let root_entries = [
        Entry { name: b"a".to_vec(), block: a_pos.0, offset: a_pos.1, ino: a_ino, t: 2 },
        Entry { name: b"b".to_vec(), block: b_pos.0, offset: b_pos.1, ino: b_ino, t: 2 },
        Entry {
            name: b"large_dir".to_vec(),
            block: large_dir_pos.0,
            offset: large_dir_pos.1,
            ino: large_dir_ino,
            t: 1,
        },
    ];
    let (root_block_index, root_block_offset, root_size) = write_listing(&mut dirs, &root_entries);

    let root_ref = inodes.ref64();
    let _ = alloc_ino(&mut exports, &inodes);
    inode_header(&mut inodes, 1, 0o755, root_ino);
    inodes.u32(root_block_index);
    inodes.u32(3); // nlink
    inodes.u16(root_size as u16);
    inodes.u16(root_block_offset);
    inodes.u32(root_ino + 1); // parent of the root points past the tree

    let inode_count = next_ino - 1;

    // lay the metadata sections down
    let inode_table = image.len() as u64;
    image.extend_from_slice(&inodes.into_metablocks());

    let dir_table = image.len() as u64;
    image.extend_from_slice(&dirs.into_metablocks());

    // fragment table: entry metablock, then the pointer list
    let fragment_meta = image.len() as u64;
    let mut frag = Stream::new();
    frag.u64(fragment_start);
    frag.u32(fragment_stored | DATA_UNCOMPRESSED);
    frag.u32(0);
    image.extend_from_slice(&frag.into_metablocks());
    let frag_table = image.len() as u64;
    image.extend_from_slice(&fragment_meta.to_le_bytes());

    // export table: one ref per inode number
    let export_meta = image.len() as u64;
    let mut export = Stream::new();
    for r in &exports {
        export.u64(*r);
    }
    image.extend_from_slice(&export.into_metablocks());
    let export_table = image.len() as u64;
    image.extend_from_slice(&export_meta.to_le_bytes());

    // id table: uid at index 0, gid at index 1
    let id_meta = image.len() as u64;
    let mut ids = Stream::new();
    ids.u32(UID);
    ids.u32(GID);
    image.extend_from_slice(&ids.into_metablocks());
    let id_table = image.len() as u64;
    image.extend_from_slice(&id_meta.to_le_bytes());

    // xattr key/value region: the out-of-line value record first, then a's
    // inline list, then b's indirect list pointing back at the record
    let kv_start = image.len() as u64;
    let mut kv = Stream::new();
    let ool_ref = kv.ref64();
    kv.u32(XATTR_VALUE.len() as u32);
    kv.raw(XATTR_VALUE);

    let a_list_ref = kv.ref64();
    kv.u16(0); // user. prefix
    kv.u16(3);
    kv.raw(b"foo");
    kv.u32(XATTR_VALUE.len() as u32);
    kv.raw(XATTR_VALUE);
    let a_list_size = kv.ref64() - a_list_ref;

    let b_list_ref = kv.ref64();
    kv.u16(0x0100); // user. prefix, indirect
    kv.u16(3);
    kv.raw(b"bar");
    kv.u32(8);
    kv.u64(ool_ref);
    let b_list_size = kv.ref64() - b_list_ref;
    image.extend_from_slice(&kv.into_metablocks());

    // xattr id entries, then the id-table header with its pointer list
    let xattr_id_meta = image.len() as u64;
    let mut xattr_ids = Stream::new();
    xattr_ids.u64(a_list_ref);
    xattr_ids.u32(1);
    xattr_ids.u32(a_list_size as u32);
    xattr_ids.u64(b_list_ref);
    xattr_ids.u32(1);
    xattr_ids.u32(b_list_size as u32);
    image.extend_from_slice(&xattr_ids.into_metablocks());

    let xattr_table = image.len() as u64;
    image.extend_from_slice(&kv_start.to_le_bytes());
    image.extend_from_slice(&2u32.to_le_bytes());
    image.extend_from_slice(&0u32.to_le_bytes());
    image.extend_from_slice(&xattr_id_meta.to_le_bytes());

    let bytes_used = image.len() as u64;

    // superblock
    let mut sb = Vec::with_capacity(96);
    sb.write_all(&0x7371_7368u32.to_le_bytes()).unwrap(); // magic
    sb.write_all(&inode_count.to_le_bytes()).unwrap();
    sb.write_all(&MTIME.to_le_bytes()).unwrap();
    sb.write_all(&BLOCK_SIZE.to_le_bytes()).unwrap();
    sb.write_all(&1u32.to_le_bytes()).unwrap(); // frag_count
    sb.write_all(&1u16.to_le_bytes()).unwrap(); // gzip
    sb.write_all(&BLOCK_LOG.to_le_bytes()).unwrap();
    sb.write_all(&0x0080u16.to_le_bytes()).unwrap(); // export table exists
    sb.write_all(&2u16.to_le_bytes()).unwrap(); // id_count
    sb.write_all(&4u16.to_le_bytes()).unwrap();
    sb.write_all(&0u16.to_le_bytes()).unwrap();
    sb.write_all(&root_ref.to_le_bytes()).unwrap();
    sb.write_all(&bytes_used.to_le_bytes()).unwrap();
    sb.write_all(&id_table.to_le_bytes()).unwrap();
    sb.write_all(&xattr_table.to_le_bytes()).unwrap();
    sb.write_all(&inode_table.to_le_bytes()).unwrap();
    sb.write_all(&dir_table.to_le_bytes()).unwrap();
    sb.write_all(&frag_table.to_le_bytes()).unwrap();
    sb.write_all(&export_table.to_le_bytes()).unwrap();
    assert_eq!(sb.len(), 96);
    image[..96].copy_from_slice(&sb);

    image
}

/// Same image, but without fragment, export, and xattr tables and with no
/// xattr indices on the file inodes. Used for the absent-table error paths.
pub fn build_image_without_optional_tables() -> Vec<u8> {
    let mut image = build_image();
    // a and b keep their shapes, only the superblock advertises less
    image[0x18..0x1a].copy_from_slice(&0u16.to_le_bytes()); // flags
    image[0x38..0x40].copy_from_slice(&NOT_SET.to_le_bytes()); // xattr
    image[0x50..0x58].copy_from_slice(&NOT_SET.to_le_bytes()); // frag
    image[0x58..0x60].copy_from_slice(&NOT_SET.to_le_bytes()); // export
    image
}

/// Write the image to a temp file for path-based opens
pub fn write_image(bytes: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}
