mod common;

use common::{
    build_image, build_image_without_optional_tables, write_image, B_FILE_SIZE, GID, UID,
    XATTR_VALUE,
};
use flatfish::{Archive, Config, InodeId, InodeRef, SquashfsError};
use test_log::test;

fn archive() -> Archive {
    Archive::from_bytes(build_image()).unwrap()
}

#[test]
fn open_from_file_path() {
    let file = write_image(&build_image());
    let archive = Archive::open(file.path()).unwrap();
    assert_eq!(archive.superblock().inode_count, 1008);
}

#[test]
fn list_root_in_order() {
    let archive = archive();
    let root = archive.root().unwrap();
    let mut dir = root.directory().unwrap();

    let mut names = vec![];
    while dir.advance().unwrap() {
        names.push(String::from_utf8(dir.name().to_vec()).unwrap());
    }
    assert_eq!(names, ["a", "b", "large_dir"]);
}

#[test]
fn entry_types_agree_with_loaded_inodes() {
    let archive = archive();
    let root = archive.root().unwrap();
    let mut dir = root.directory().unwrap();
    while dir.advance().unwrap() {
        let inode = dir.load_inode().unwrap();
        assert_eq!(dir.inode_type(), inode.id().into_base_type());
    }
}

#[test]
fn read_fragment_only_file() {
    let archive = archive();
    let inode = archive.inode_by_path("/a").unwrap();
    assert_eq!(inode.file_size(), 2);
    assert!(inode.has_fragment());
    assert_eq!(inode.block_count(), 0);

    assert_eq!(archive.read_file("/a").unwrap(), b"a\n");
}

#[test]
fn read_blocks_and_fragment_tail() {
    let archive = archive();
    let inode = archive.inode_by_path("/b").unwrap();
    assert_eq!(inode.file_size(), B_FILE_SIZE);
    assert_eq!(inode.block_count(), 8);

    let content = archive.read_file("/b").unwrap();
    assert_eq!(content.len() as u64, B_FILE_SIZE);
    assert!(content.iter().all(|&byte| byte == b'b'));
}

#[test]
fn read_past_end_keeps_buffer_consistent() {
    let archive = archive();
    let inode = archive.inode_by_path("/b").unwrap();
    let mut reader = inode.reader().unwrap();

    let err = reader.read(B_FILE_SIZE + 4096);
    assert!(matches!(err, Err(SquashfsError::SeekOutOfRange)));
    assert_eq!(reader.size() as u64, B_FILE_SIZE);
    assert!(reader.data().iter().all(|&byte| byte == b'b'));
}

#[test]
fn block_sizes_sum_to_file_size() {
    let archive = archive();
    let inode = archive.inode_by_path("/b").unwrap();

    let stored: u64 = (0..inode.block_count())
        .map(|i| u64::from(inode.block_size(i as usize).unwrap().size()))
        .sum();
    let tail = inode.file_size() - u64::from(inode.block_count()) * 0x20000;
    // every block is stored uncompressed, so stored size == logical size
    assert_eq!(stored + tail, inode.file_size());
}

#[test]
fn uid_and_gid_resolve_through_id_table() {
    let archive = archive();
    let root = archive.root().unwrap();
    assert_eq!(root.uid().unwrap(), UID);
    assert_eq!(root.gid().unwrap(), GID);
}

#[test]
fn inline_xattr() {
    let archive = archive();
    let inode = archive.inode_by_path("/a").unwrap();
    let mut xattrs = inode.xattrs().unwrap();

    assert!(xattrs.advance().unwrap());
    assert_eq!(xattrs.full_name().unwrap(), b"user.foo");
    assert!(!xattrs.is_indirect());
    assert_eq!(xattrs.value().unwrap(), XATTR_VALUE);
    assert!(!xattrs.advance().unwrap());
}

#[test]
fn indirect_xattr() {
    let archive = archive();
    let inode = archive.inode_by_path("/b").unwrap();
    let mut xattrs = inode.xattrs().unwrap();

    assert!(xattrs.advance().unwrap());
    assert_eq!(xattrs.full_name().unwrap(), b"user.bar");
    assert!(xattrs.is_indirect());
    assert_eq!(xattrs.value().unwrap(), XATTR_VALUE);
}

#[test]
fn no_xattr_listing_is_empty() {
    let archive = archive();
    // large_dir is extended but carries no xattrs
    let inode = archive.inode_by_path("/large_dir").unwrap();
    let mut xattrs = inode.xattrs().unwrap();
    assert!(!xattrs.advance().unwrap());
}

#[test]
fn extended_directory_lookup() {
    let archive = archive();
    let inode = archive.inode_by_path("/large_dir/999").unwrap();
    assert_eq!(inode.id(), InodeId::BasicFile);
    assert_eq!(inode.file_size(), 0);
}

#[test]
fn large_listing_is_complete() {
    let archive = archive();
    let large_dir = archive.inode_by_path("/large_dir").unwrap();
    assert_eq!(large_dir.id(), InodeId::ExtendedDirectory);

    let mut dir = large_dir.directory().unwrap();
    let mut count = 0;
    let mut last = vec![];
    while dir.advance().unwrap() {
        count += 1;
        last = dir.name().to_vec();
    }
    assert_eq!(count, 1004);
    assert_eq!(last, b"sym");
}

#[test]
fn lookup_missing_name_terminates_early() {
    let archive = archive();
    let root = archive.root().unwrap();
    let mut dir = root.directory().unwrap();
    assert!(matches!(dir.lookup(b"ab"), Err(SquashfsError::NoSuchFile)));
}

#[test]
fn path_of_root_is_root_ref() {
    let archive = archive();
    let root = archive.inode_by_path("/").unwrap();
    assert_eq!(root.inode_ref(), InodeRef(archive.superblock().root_inode));
}

#[test]
fn dot_and_dotdot_segments() {
    let archive = archive();
    let b = archive.inode_by_path("/b").unwrap();

    for path in ["/./b", "//b", "/large_dir/../b", "/../b", "/large_dir/./../b"] {
        let inode = archive.inode_by_path(path).unwrap();
        assert_eq!(inode.inode_number(), b.inode_number(), "{path}");
    }
}

#[test]
fn nonexistent_path() {
    let archive = archive();
    let err = archive.inode_by_path("/nonexistent");
    assert!(matches!(err, Err(SquashfsError::NoSuchFile)));

    let err = archive.inode_by_path("/a/impossible");
    assert!(matches!(err, Err(SquashfsError::NotADirectory)));
}

#[test]
fn symlink_resolves_like_its_target() {
    let archive = archive();
    let via_link = archive.inode_by_path("/large_dir/sym").unwrap();
    let direct = archive.inode_by_path("/b").unwrap();
    assert_eq!(via_link.inode_ref(), direct.inode_ref());
}

#[test]
fn symlink_loop_is_detected() {
    let archive = archive();
    let err = archive.inode_by_path("/large_dir/loop1");
    assert!(matches!(err, Err(SquashfsError::SymlinkLoop)));
}

#[test]
fn symlink_depth_is_configurable() {
    // depth 0 refuses the very first symlink
    let mut config = Config::default();
    config.max_symlink_depth = 0;
    let archive = Archive::from_bytes_with_config(build_image(), config).unwrap();
    let err = archive.inode_by_path("/large_dir/sym");
    assert!(matches!(err, Err(SquashfsError::SymlinkLoop)));
}

#[test]
fn sparse_file_reads_as_zeros() {
    let archive = archive();
    let content = archive.read_file("/large_dir/sparse").unwrap();
    assert_eq!(content.len(), 0x20000);
    assert!(content.iter().all(|&byte| byte == 0));
}

#[test]
fn export_table_round_trip() {
    let archive = archive();
    for number in [1u32, 2, 500, 1008] {
        let inode = archive.inode_by_number(number).unwrap();
        assert_eq!(inode.inode_number(), number);
    }

    let b = archive.inode_by_path("/b").unwrap();
    let by_number = archive.inode_by_number(b.inode_number()).unwrap();
    assert_eq!(by_number.inode_ref(), b.inode_ref());
}

#[test]
fn seek_before_read() {
    let archive = archive();
    let b = archive.inode_by_path("/b").unwrap();

    // skip the first block and a half
    let mut reader = b.reader().unwrap();
    reader.seek(0x30000).unwrap();
    reader.read(0x100).unwrap();
    assert_eq!(reader.size(), 0x100);
    assert!(reader.data().iter().all(|&byte| byte == b'b'));

    let mut reader = b.reader().unwrap();
    assert!(matches!(reader.seek(B_FILE_SIZE + 1), Err(SquashfsError::SeekOutOfRange)));

    // the tail lives in the fragment, seeking there is refused
    let mut reader = b.reader().unwrap();
    assert!(matches!(reader.seek(0x100001), Err(SquashfsError::SeekInFragment)));
}

#[test]
fn absent_tables_report_their_kind() {
    let archive = Archive::from_bytes(build_image_without_optional_tables()).unwrap();

    let err = archive.inode_by_number(2);
    assert!(matches!(err, Err(SquashfsError::NoExportTable)));

    let inode = archive.inode_by_path("/a").unwrap();
    assert!(matches!(inode.xattrs(), Err(SquashfsError::NoXattrTable)));

    let mut reader = inode.reader().unwrap();
    let err = reader.read(2);
    assert!(matches!(err, Err(SquashfsError::NoFragmentTable)));
}

#[test]
fn compression_options_absent() {
    let archive = archive();
    assert!(matches!(
        archive.compression_options(),
        Err(SquashfsError::NoCompressionOptions)
    ));
}

#[test]
fn concurrent_readers_share_one_archive() {
    let archive = archive();

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                let content = archive.read_file("/b").unwrap();
                assert_eq!(content.len() as u64, B_FILE_SIZE);

                let root = archive.root().unwrap();
                let mut dir = root.directory().unwrap();
                let mut count = 0;
                while dir.advance().unwrap() {
                    count += 1;
                }
                assert_eq!(count, 3);
            });
        }
    });
}

#[test]
fn decoded_blocks_are_cached_idempotently() {
    let archive = archive();
    let first = archive.read_file("/a").unwrap();
    let second = archive.read_file("/a").unwrap();
    assert_eq!(first, second);
}
